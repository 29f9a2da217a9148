use std::collections::{BTreeMap, BTreeSet, HashSet};
use crate::base::*;

/// A reason an object is reachable from the document structure. The variants order page users
/// after the root but before the catch-all trailer and root keys, which keeps bucket assembly
/// deterministic.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum ObjUser {
    Root,
    Page(usize),
    Thumb(usize),
    TrailerKey(Name),
    RootKey(Name),
}

/// The bidirectional reachability maps produced by [`optimize`].
#[derive(Debug, Default)]
pub struct Usage {
    pub obj_user_to_objects: BTreeMap<ObjUser, BTreeSet<ObjRef>>,
    pub object_to_obj_users: BTreeMap<ObjRef, BTreeSet<ObjUser>>,
}

impl Usage {
    fn record(&mut self, ou: &ObjUser, oref: ObjRef) {
        self.obj_user_to_objects.entry(ou.clone()).or_default().insert(oref);
        self.object_to_obj_users.entry(oref).or_default().insert(ou.clone());
    }

    /// Rewrites every object-stream member to its container's identity. After this the maps talk
    /// about file-level objects only.
    pub fn filter_compressed_objects(&mut self, containers: &BTreeMap<types::ObjNum, types::ObjNum>) {
        if containers.is_empty() {
            return;
        }
        let fold = |oref: ObjRef| match containers.get(&oref.num) {
            Some(&container) => ObjRef { num: container, gen: 0 },
            None => oref,
        };
        let old = std::mem::take(&mut self.object_to_obj_users);
        for (oref, ous) in old {
            self.object_to_obj_users.entry(fold(oref)).or_default().extend(ous);
        }
        for objects in self.obj_user_to_objects.values_mut() {
            *objects = objects.iter().map(|&oref| fold(oref)).collect();
        }
    }
}

/// Walks the document from its structural roots and records which object is needed by which
/// user. `skip_filter_keys` mirrors the writer's decode decision: when stream data will be
/// re-filtered, `/Filter` and `/DecodeParms` no longer matter for reachability.
pub fn optimize(document: &Document, skip_filter_keys: bool) -> Result<Usage, Error> {
    let mut usage = Usage::default();
    let pages = document.pages()?;
    for (index, &page) in pages.iter().enumerate() {
        update_maps(&mut usage, document, &ObjUser::Page(index), &Object::Ref(page),
            skip_filter_keys);
        if let Some(dict) = document.resolve_ref(&page).dict() {
            let thumb = dict.lookup(b"Thumb");
            if thumb.as_objref().is_some() {
                update_maps(&mut usage, document, &ObjUser::Thumb(index), thumb,
                    skip_filter_keys);
            }
        }
    }
    let root_ref = document.root_ref()?;
    for (key, value) in document.trailer().iter() {
        if key == b"Root" {
            update_maps(&mut usage, document, &ObjUser::Root, value, skip_filter_keys);
            if let Some(root) = document.resolve_ref(&root_ref).dict() {
                for (rkey, rvalue) in root.iter() {
                    update_maps(&mut usage, document, &ObjUser::RootKey(rkey.clone()), rvalue,
                        skip_filter_keys);
                }
            }
        } else if key != b"Size" {
            update_maps(&mut usage, document, &ObjUser::TrailerKey(key.clone()), value,
                skip_filter_keys);
        }
    }
    Ok(usage)
}

fn update_maps(usage: &mut Usage, document: &Document, ou: &ObjUser, seed: &Object,
        skip_filter_keys: bool) {
    enum Item<'a> {
        Direct(&'a Object),
        Indirect(ObjRef, bool),
    }

    let mut visited = HashSet::new();
    let mut work = Vec::new();
    match seed {
        // a referenced seed is "top": a page seed must descend into its own dict
        Object::Ref(oref) => work.push(Item::Indirect(*oref, true)),
        other => work.push(Item::Direct(other)),
    }
    while let Some(item) = work.pop() {
        let obj = match item {
            Item::Direct(obj) => obj,
            Item::Indirect(oref, top) => {
                usage.record(ou, oref);
                if !visited.insert(oref) {
                    continue;
                }
                let obj = document.get(&oref);
                // stop at other pages, their own user covers them
                if !top {
                    if let Some(dict) = obj.dict() {
                        if dict.lookup(b"Type") == &Object::new_name(b"Page") {
                            continue;
                        }
                    }
                }
                obj
            }
        };
        match obj {
            Object::Ref(oref) => work.push(Item::Indirect(*oref, false)),
            Object::Array(arr) => work.extend(arr.iter().map(Item::Direct)),
            Object::Dict(dict) => queue_dict(&mut work, dict, false, skip_filter_keys),
            Object::Stream(stm) => queue_dict(&mut work, &stm.dict, true, skip_filter_keys),
            _ => (),
        }
    }

    fn queue_dict<'a>(work: &mut Vec<Item<'a>>, dict: &'a Dict, stream: bool,
            skip_filter_keys: bool) {
        for (key, value) in dict.iter() {
            if key == b"Parent" || key == b"Thumb" {
                continue;
            }
            if stream && (key == b"Length"
                    || (skip_filter_keys && (key == b"Filter" || key == b"DecodeParms"))) {
                continue;
            }
            work.push(Item::Direct(value));
        }
    }
}

/// Per-page slice of the plan.
#[derive(Debug)]
pub struct PageData {
    pub oref: ObjRef,
    /// Objects belonging to the page, the page object included.
    pub nobjects: usize,
    /// Indices into [`LinData::shared_order`], ascending. Empty for the first page.
    pub shared: Vec<usize>,
}

/// The complete linearization plan: part contents in output order plus the shared-object index
/// the hint tables are built from.
#[derive(Debug)]
pub struct LinData {
    pub part4: Vec<ObjRef>,
    pub part6: Vec<ObjRef>,
    pub part7: Vec<ObjRef>,
    pub part8: Vec<ObjRef>,
    pub part9: Vec<ObjRef>,
    pub pages: Vec<PageData>,
    pub first_page_object: ObjRef,
    pub shared_order: Vec<ObjRef>,
    pub shared_index: BTreeMap<ObjRef, usize>,
    pub n_shared_first_page: usize,
    pub outline_count: usize,
    pub first_outline: Option<ObjRef>,
}

const OPEN_DOCUMENT_KEYS: [&[u8]; 5] =
    [b"ViewerPreferences", b"PageMode", b"Threads", b"OpenAction", b"AcroForm"];

/// Assigns every reachable object to its part. The buckets partition
/// `usage.object_to_obj_users`; losing or duplicating an object here is a bug, so the final
/// coverage check asserts.
pub fn calculate(document: &Document, usage: &Usage) -> Result<LinData, Error> {
    let pages = document.pages()?;
    if pages.is_empty() {
        return Err(Error::Data("cannot linearize a document with no pages".into()));
    }
    let root_ref = document.root_ref()?;

    let mut open_document = Vec::new();
    let mut outlines = Vec::new();
    let mut first_private = Vec::new();
    let mut first_shared = Vec::new();
    let mut page_private: BTreeMap<usize, Vec<ObjRef>> = BTreeMap::new();
    let mut page_shared = Vec::new();
    let mut thumb_private: BTreeMap<usize, Vec<ObjRef>> = BTreeMap::new();
    let mut thumb_shared = Vec::new();
    let mut other = Vec::new();

    let thumbs: Vec<Option<ObjRef>> = pages.iter().map(|&page| {
        document.resolve_ref(&page).dict()
            .and_then(|dict| dict.lookup(b"Thumb").as_objref().copied())
    }).collect();
    let special: HashSet<ObjRef> = std::iter::once(root_ref)
        .chain(pages.iter().copied())
        .chain(thumbs.iter().flatten().copied())
        .collect();

    let mut categorized = special.len();
    for (&oref, ous) in &usage.object_to_obj_users {
        if special.contains(&oref) {
            continue;
        }
        let mut in_open_document = false;
        let mut in_outlines = false;
        let mut in_first_page = false;
        let mut other_pages = BTreeSet::new();
        let mut in_thumbs = BTreeSet::new();
        let mut others = 0;
        for ou in ous {
            match ou {
                ObjUser::Root => (),
                ObjUser::Page(0) => in_first_page = true,
                ObjUser::Page(n) => { other_pages.insert(*n); },
                ObjUser::Thumb(n) => { in_thumbs.insert(*n); },
                ObjUser::TrailerKey(key) => {
                    if key == b"Encrypt" {
                        in_open_document = true;
                    } else {
                        others += 1;
                    }
                }
                ObjUser::RootKey(key) => {
                    if OPEN_DOCUMENT_KEYS.iter().any(|&k| key == k) {
                        in_open_document = true;
                    } else if key == b"Outlines" {
                        in_outlines = true;
                    } else {
                        others += 1;
                    }
                }
            }
        }
        categorized += 1;
        if in_outlines {
            outlines.push(oref);
        } else if in_open_document {
            open_document.push(oref);
        } else if in_first_page && others == 0 && other_pages.is_empty() && in_thumbs.is_empty() {
            first_private.push(oref);
        } else if in_first_page {
            first_shared.push(oref);
        } else if other_pages.len() == 1 && others == 0 && in_thumbs.is_empty() {
            page_private.entry(*other_pages.iter().next().unwrap()).or_default().push(oref);
        } else if other_pages.len() > 1 {
            page_shared.push(oref);
        } else if in_thumbs.len() == 1 && others == 0 && other_pages.is_empty() {
            thumb_private.entry(*in_thumbs.iter().next().unwrap()).or_default().push(oref);
        } else if in_thumbs.len() > 1 {
            thumb_shared.push(oref);
        } else {
            other.push(oref);
        }
    }
    assert_eq!(categorized, usage.object_to_obj_users.len(),
        "linearization plan failed to cover the reachable set");

    let outlines_in_part6 = document.resolve_ref(&root_ref).dict()
        .map(|dict| document.resolve(dict.lookup(b"PageMode")) == &Object::new_name(b"UseOutlines"))
        .unwrap_or(false);

    let mut part4 = vec![root_ref];
    part4.extend_from_slice(&open_document);

    let mut part6 = vec![pages[0]];
    part6.extend_from_slice(&first_private);
    part6.extend_from_slice(&first_shared);
    if outlines_in_part6 {
        part6.extend_from_slice(&outlines);
    }

    let mut part7 = Vec::new();
    let mut page_data = vec![PageData {
        oref: pages[0],
        nobjects: part6.len() - if outlines_in_part6 { outlines.len() } else { 0 },
        shared: Vec::new(),
    }];
    for (index, &page) in pages.iter().enumerate().skip(1) {
        part7.push(page);
        let private = page_private.remove(&index).unwrap_or_default();
        page_data.push(PageData { oref: page, nobjects: 1 + private.len(), shared: Vec::new() });
        part7.extend(private);
    }

    let part8 = page_shared;

    // Part 9 follows the recommended order: the pages tree, private thumbnails in page
    // order, shared thumbnails, outlines, then everything left over.
    let mut part9 = Vec::new();
    if let Some(tree) = usage.obj_user_to_objects.get(&ObjUser::RootKey(Name::from(b"Pages"))) {
        let (in_tree, rest): (Vec<_>, Vec<_>) = other.into_iter()
            .partition(|oref| tree.contains(oref));
        part9.extend(in_tree);
        other = rest;
    }
    for (index, thumb) in thumbs.iter().enumerate() {
        if let Some(thumb) = thumb {
            part9.push(*thumb);
            part9.extend(thumb_private.remove(&index).unwrap_or_default());
        }
    }
    part9.extend(thumb_shared);
    if !outlines_in_part6 {
        part9.extend_from_slice(&outlines);
    }
    part9.extend(other);

    let n_shared_first_page = part6.len();
    let shared_order: Vec<ObjRef> = part6.iter().chain(part8.iter()).copied().collect();
    let shared_index: BTreeMap<ObjRef, usize> =
        shared_order.iter().enumerate().map(|(i, &oref)| (oref, i)).collect();
    for (index, data) in page_data.iter_mut().enumerate().skip(1) {
        if let Some(objects) = usage.obj_user_to_objects.get(&ObjUser::Page(index)) {
            data.shared = objects.iter()
                .filter_map(|oref| shared_index.get(oref).copied())
                .collect();
            data.shared.sort_unstable();
        }
    }

    Ok(LinData {
        part4, part6, part7, part8, part9,
        pages: page_data,
        first_page_object: pages[0],
        n_shared_first_page,
        shared_order,
        shared_index,
        outline_count: outlines.len(),
        first_outline: outlines.first().copied(),
    })
}


#[cfg(test)]
mod tests {
    use super::*;

    fn sample_document() -> Document {
        // 1: catalog, 2: page tree, 3-4: pages, 5: shared resource, 6: page 2 private font,
        // 7: first page content, 8: outlines, 9: info
        let mut doc = Document::new((1, 4));
        doc.insert(ObjRef { num: 1, gen: 0 }, Object::Dict(Dict::from(vec![
            (Name::from(b"Type"), Object::new_name(b"Catalog")),
            (Name::from(b"Pages"), Object::Ref(ObjRef { num: 2, gen: 0 })),
            (Name::from(b"Outlines"), Object::Ref(ObjRef { num: 8, gen: 0 })),
        ])));
        doc.insert(ObjRef { num: 2, gen: 0 }, Object::Dict(Dict::from(vec![
            (Name::from(b"Type"), Object::new_name(b"Pages")),
            (Name::from(b"Kids"), Object::Array(vec![
                Object::Ref(ObjRef { num: 3, gen: 0 }),
                Object::Ref(ObjRef { num: 4, gen: 0 }),
            ])),
            (Name::from(b"Count"), Object::new_int(2)),
        ])));
        doc.insert(ObjRef { num: 3, gen: 0 }, Object::Dict(Dict::from(vec![
            (Name::from(b"Type"), Object::new_name(b"Page")),
            (Name::from(b"Parent"), Object::Ref(ObjRef { num: 2, gen: 0 })),
            (Name::from(b"Contents"), Object::Ref(ObjRef { num: 7, gen: 0 })),
            (Name::from(b"Resources"), Object::Ref(ObjRef { num: 5, gen: 0 })),
        ])));
        doc.insert(ObjRef { num: 4, gen: 0 }, Object::Dict(Dict::from(vec![
            (Name::from(b"Type"), Object::new_name(b"Page")),
            (Name::from(b"Parent"), Object::Ref(ObjRef { num: 2, gen: 0 })),
            (Name::from(b"Resources"), Object::Ref(ObjRef { num: 5, gen: 0 })),
            (Name::from(b"Annots"), Object::Array(vec![
                Object::Ref(ObjRef { num: 6, gen: 0 }),
            ])),
        ])));
        doc.insert(ObjRef { num: 5, gen: 0 }, Object::Dict(Dict::new()));
        doc.insert(ObjRef { num: 6, gen: 0 }, Object::Dict(Dict::new()));
        doc.insert(ObjRef { num: 7, gen: 0 }, Object::Stream(Stream::new(
            Dict::from(vec![(Name::from(b"Length"), Object::new_int(2))]),
            b"BT".to_vec())));
        doc.insert(ObjRef { num: 8, gen: 0 }, Object::Dict(Dict::from(vec![
            (Name::from(b"Type"), Object::new_name(b"Outlines")),
            (Name::from(b"Count"), Object::new_int(0)),
        ])));
        doc.insert(ObjRef { num: 9, gen: 0 }, Object::Dict(Dict::from(vec![
            (Name::from(b"Producer"), Object::new_string(b"test")),
        ])));
        doc.set_trailer(Dict::from(vec![
            (Name::from(b"Size"), Object::new_int(10)),
            (Name::from(b"Root"), Object::Ref(ObjRef { num: 1, gen: 0 })),
            (Name::from(b"Info"), Object::Ref(ObjRef { num: 9, gen: 0 })),
        ]));
        doc
    }

    fn oref(num: types::ObjNum) -> ObjRef {
        ObjRef { num, gen: 0 }
    }

    #[test]
    fn test_optimize_users() {
        let doc = sample_document();
        let usage = optimize(&doc, false).unwrap();
        let page0 = &usage.obj_user_to_objects[&ObjUser::Page(0)];
        assert!(page0.contains(&oref(3)));
        assert!(page0.contains(&oref(5)));
        assert!(page0.contains(&oref(7)));
        // the parent tree is not followed upwards
        assert!(!page0.contains(&oref(2)));
        // shared resource is seen by both pages
        assert!(usage.object_to_obj_users[&oref(5)].contains(&ObjUser::Page(1)));
        // info dictionary hangs off the trailer
        assert!(usage.object_to_obj_users[&oref(9)]
            .contains(&ObjUser::TrailerKey(Name::from(b"Info"))));
    }

    #[test]
    fn test_page_stop() {
        let doc = sample_document();
        let usage = optimize(&doc, false).unwrap();
        // the pages tree lists both kids, but traversal from the tree stops at page nodes,
        // so page 1's private annotation is never attributed to the root
        let root_key = &usage.obj_user_to_objects[&ObjUser::RootKey(Name::from(b"Pages"))];
        assert!(root_key.contains(&oref(3)));
        assert!(!root_key.contains(&oref(6)));
    }

    #[test]
    fn test_calculate_parts() {
        let doc = sample_document();
        let usage = optimize(&doc, false).unwrap();
        let plan = calculate(&doc, &usage).unwrap();
        assert_eq!(plan.part4, vec![oref(1)]);
        assert_eq!(plan.first_page_object, oref(3));
        // first page, its content, and the shared resource (page tree counts as shared too)
        assert!(plan.part6.contains(&oref(7)));
        assert_eq!(plan.part6[0], oref(3));
        assert!(plan.part6.contains(&oref(5)));
        // page 1 and its private annotation
        assert_eq!(plan.part7, vec![oref(4), oref(6)]);
        assert!(plan.part8.is_empty());
        // outlines and info end up in part 9 (no /PageMode)
        assert!(plan.part9.contains(&oref(8)));
        assert!(plan.part9.contains(&oref(9)));
        assert_eq!(plan.outline_count, 1);
        assert_eq!(plan.first_outline, Some(oref(8)));
        // page 1 references the shared resource by index
        assert_eq!(plan.pages[1].shared.len(), 1);
        assert_eq!(plan.shared_order[plan.pages[1].shared[0]], oref(5));
        assert_eq!(plan.pages[1].nobjects, 2);
        assert_eq!(plan.pages[0].nobjects, plan.part6.len());
    }

    #[test]
    fn test_part9_order() {
        let mut doc = sample_document();
        // give the second page a thumbnail
        doc.insert(oref(4), Object::Dict(Dict::from(vec![
            (Name::from(b"Type"), Object::new_name(b"Page")),
            (Name::from(b"Parent"), Object::Ref(oref(2))),
            (Name::from(b"Resources"), Object::Ref(oref(5))),
            (Name::from(b"Thumb"), Object::Ref(oref(10))),
        ])));
        doc.insert(oref(10), Object::Stream(Stream::new(
            Dict::from(vec![(Name::from(b"Length"), Object::new_int(0))]),
            Vec::new())));
        let usage = optimize(&doc, false).unwrap();
        let plan = calculate(&doc, &usage).unwrap();
        // pages tree, then the thumbnail, then outlines, then the info dictionary
        assert_eq!(plan.part9, vec![oref(2), oref(10), oref(8), oref(9)]);
    }

    #[test]
    fn test_filter_compressed() {
        let doc = sample_document();
        let mut usage = optimize(&doc, false).unwrap();
        let containers = BTreeMap::from([(5, 20), (6, 20)]);
        usage.filter_compressed_objects(&containers);
        assert!(!usage.object_to_obj_users.contains_key(&oref(5)));
        let container = &usage.object_to_obj_users[&oref(20)];
        assert!(container.contains(&ObjUser::Page(0)));
        assert!(container.contains(&ObjUser::Page(1)));
    }
}
