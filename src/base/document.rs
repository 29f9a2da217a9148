use std::collections::{BTreeMap, BTreeSet};

use super::*;
use super::types::*;

/// A fully loaded PDF document: the object map, the trailer dictionary and the header version.
///
/// This is the unit the rewriter works on. All objects, including former object stream members,
/// live directly in the map; the original packing, if any, is recorded separately in the
/// cross-reference table the loader returns.
#[derive(Debug, Default)]
pub struct Document {
    objects: BTreeMap<ObjNum, (ObjGen, Object)>,
    trailer: Dict,
    version: (u8, u8),
}

impl Document {
    pub fn new(version: (u8, u8)) -> Document {
        Document { objects: BTreeMap::new(), trailer: Dict::default(), version }
    }

    pub fn version(&self) -> (u8, u8) {
        self.version
    }

    pub fn set_version(&mut self, version: (u8, u8)) {
        self.version = version;
    }

    pub fn trailer(&self) -> &Dict {
        &self.trailer
    }

    pub fn set_trailer(&mut self, trailer: Dict) {
        self.trailer = trailer;
    }

    /// Inserts or replaces an object. An existing object under the same number is dropped
    /// regardless of its generation.
    pub fn insert(&mut self, oref: ObjRef, obj: Object) {
        self.objects.insert(oref.num, (oref.gen, obj));
    }

    /// The object stored under this reference, or [`Object::Null`] when absent or when the
    /// generation does not match.
    pub fn get(&self, oref: &ObjRef) -> &Object {
        match self.objects.get(&oref.num) {
            Some((gen, obj)) if *gen == oref.gen => obj,
            _ => &Object::Null
        }
    }

    /// Follows [`Object::Ref`] chains until a direct object is reached. Reference loops resolve
    /// to [`Object::Null`] with a warning.
    pub fn resolve<'a>(&'a self, obj: &'a Object) -> &'a Object {
        let mut cur = obj;
        for _ in 0..32 {
            match cur {
                Object::Ref(oref) => cur = self.get(oref),
                _ => return cur
            }
        }
        log::warn!("indirect reference chain too deep, treating as null");
        &Object::Null
    }

    pub fn resolve_ref(&self, oref: &ObjRef) -> &Object {
        self.resolve(self.get(oref))
    }

    /// The `/Root` reference from the trailer.
    pub fn root_ref(&self) -> Result<ObjRef, Error> {
        self.trailer.lookup(b"Root").as_objref().copied()
            .ok_or(Error::Parse("trailer /Root missing or not a reference"))
    }

    /// All objects in ascending object number order.
    pub fn objects(&self) -> impl Iterator<Item = (ObjRef, &Object)> {
        self.objects.iter().map(|(&num, (gen, obj))| (ObjRef { num, gen: *gen }, obj))
    }

    pub fn contains(&self, oref: &ObjRef) -> bool {
        matches!(self.objects.get(&oref.num), Some((gen, _)) if *gen == oref.gen)
    }

    pub fn max_num(&self) -> ObjNum {
        self.objects.keys().next_back().copied().unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// All page objects in document order, walking the page tree iteratively.
    ///
    /// Intermediate `/Pages` nodes are recognized by their `/Kids`; a node without kids is taken
    /// for a page. Cycles in a malformed tree are broken with a warning.
    pub fn pages(&self) -> Result<Vec<ObjRef>, Error> {
        let root = self.resolve_ref(&self.root_ref()?).as_dict()
            .ok_or(Error::Parse("/Root is not a dictionary"))?;
        let &pages_ref = root.lookup(b"Pages").as_objref()
            .ok_or(Error::Parse("/Root /Pages missing or not a reference"))?;

        let mut result = Vec::new();
        let mut seen = BTreeSet::new();
        let mut stack = vec![pages_ref];
        while let Some(node_ref) = stack.pop() {
            if !seen.insert(node_ref) {
                log::warn!("loop in page tree at {node_ref} R");
                continue;
            }
            let node = self.resolve_ref(&node_ref).as_dict()
                .ok_or(Error::Parse("page tree node is not a dictionary"))?;
            match self.resolve(node.lookup(b"Kids")) {
                Object::Array(kids) => {
                    for kid in kids.iter().rev() {
                        let &kid_ref = kid.as_objref()
                            .ok_or(Error::Parse("page tree kid is not a reference"))?;
                        stack.push(kid_ref);
                    }
                },
                Object::Null => result.push(node_ref),
                _ => return Err(Error::Parse("page tree /Kids is not an array"))
            }
        }
        Ok(result)
    }
}
