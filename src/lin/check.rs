use std::collections::BTreeMap;
use std::io::{BufRead, Cursor, Seek};

use crate::base::*;
use crate::base::types::*;
use crate::lin::hints::HintTables;
use crate::lin::plan;
use crate::parser::{FileParser, Parsed};

/// Validates the linearization metadata of a loaded file against its actual layout.
///
/// The linearization dictionary is located and verified, the hint stream is decoded, and the
/// hint table contents are compared against freshly derived ordering data and the real object
/// offsets and lengths. All discrepancies come back as a list of messages; an empty list means
/// the file checks out. Only structural impossibilities (a broken page tree, say) surface as
/// errors.
pub fn check_linearization(document: &Document, xref: &XRef, data: &[u8])
        -> Result<Vec<String>, Error> {
    let mut warnings = Vec::new();
    let header_pos = data.windows(4).position(|win| win == b"%PDF").unwrap_or(0);
    let file_length = (data.len() - header_pos) as u64;
    let fp = FileParser::new(Cursor::new(data));

    let Some(lindict) = find_lindict(&fp, data, header_pos) else {
        warnings.push("no linearization dictionary found".into());
        return Ok(warnings);
    };

    let required = [b"L", b"O", b"N", b"T", b"E"]
        .map(|key| lindict.lookup(key).num_value::<u64>());
    let [Some(l), Some(o), Some(n), Some(t), Some(e)] = required else {
        warnings.push("linearization dictionary is missing required keys".into());
        return Ok(warnings);
    };
    let h_pair = lindict.lookup(b"H").as_array().map(|arr| (
        arr.first().and_then(|obj| obj.num_value::<u64>()),
        arr.get(1).and_then(|obj| obj.num_value::<u64>()),
    ));
    let Some((Some(h_offset), Some(h_length))) = h_pair else {
        warnings.push("malformed /H in linearization dictionary".into());
        return Ok(warnings);
    };
    // hint table location values disregard the hint stream itself
    let adj = |offset: u64| if offset >= h_offset { offset + h_length } else { offset };

    if l != file_length {
        warnings.push(format!("file length mismatch: /L = {l}, actual = {file_length}"));
    }
    let pages = document.pages()?;
    if pages.is_empty() {
        warnings.push("document has no pages".into());
        return Ok(warnings);
    }
    if n as usize != pages.len() {
        warnings.push(format!("page count mismatch: /N = {n}, actual = {}", pages.len()));
    }
    if o != pages[0].num {
        warnings.push(format!("first page object mismatch: /O = {o}, actual = {}",
            pages[0].num));
    }
    if t >= file_length {
        warnings.push("/T points outside the file".into());
    }
    if e >= file_length {
        warnings.push("/E points outside the file".into());
    }

    let tables = match read_hint_stream(&fp, data, header_pos, h_offset, pages.len()) {
        Ok(tables) => tables,
        Err(err) => {
            warnings.push(format!("failed to read the hint stream: {err}"));
            return Ok(warnings);
        }
    };

    let mut usage = plan::optimize(document, false)?;
    let containers = xref.map.iter()
        .filter_map(|(&num, rec)| match rec {
            Record::Compr { num_within, .. } => Some((num, *num_within)),
            _ => None
        })
        .collect::<BTreeMap<ObjNum, ObjNum>>();
    if !containers.is_empty() {
        usage.filter_compressed_objects(&containers);
    }
    let lin = plan::calculate(document, &usage)?;

    // every object ends where the next one (or a cross-reference section) begins
    let mut boundaries = xref.map.values().filter_map(Record::offset).collect::<Vec<_>>();
    if let Ok(entrypoint) = fp.entrypoint() {
        if let Ok(first_xref) = fp.read_xref_at(entrypoint) {
            if let Some(prev) = first_xref.dict.lookup(b"Prev").num_value::<u64>() {
                boundaries.push(prev);
            }
        }
    }
    boundaries.push(file_length);
    boundaries.sort_unstable();
    boundaries.dedup();

    if let Some(&last_first_page) = lin.part6.last() {
        if let Some(offset) = offset_of(xref, last_first_page.num) {
            let expected = offset + length_of(&boundaries, offset);
            if e != expected {
                warnings.push(format!("first page end mismatch: /E = {e}, \
                    computed = {expected}"));
            }
        }
    }

    check_page_offset(&tables, &lin, &pages, xref, &boundaries, &adj, &mut warnings);
    check_shared_object(&tables, &lin, xref, &boundaries, &adj, &mut warnings);
    check_outline(&tables, &lin, xref, &boundaries, &adj, &mut warnings);
    Ok(warnings)
}

/// The first dictionary object near the start of the file carrying `/Linearized`.
fn find_lindict<T: BufRead + Seek>(fp: &FileParser<T>, data: &[u8], header_pos: usize)
        -> Option<Dict> {
    let window = &data[header_pos..data.len().min(header_pos + 1024)];
    for (index, _) in window.iter().enumerate().filter(|(_, &b)| b == b'\n' || b == b'\r') {
        let pos = index + 1;
        if pos >= window.len() || !window[pos].is_ascii_digit() {
            continue;
        }
        if let Ok((_, Parsed::Obj(Object::Dict(dict)))) = fp.read_obj_at(pos as Offset) {
            if dict.contains_key(b"Linearized") {
                return Some(dict);
            }
        }
    }
    None
}

fn read_hint_stream<T: BufRead + Seek>(fp: &FileParser<T>, data: &[u8], header_pos: usize,
        h_offset: u64, npages: usize) -> Result<HintTables, Error> {
    let (_, parsed) = fp.read_obj_at(h_offset)?;
    let Parsed::Stream(dict, data_at) = parsed else {
        return Err(Error::Data("object at /H is not a stream".into()));
    };
    let length = dict.lookup(b"Length").num_value::<u64>()
        .ok_or(Error::Parse("hint stream /Length missing or indirect"))?;
    let shared_offset = dict.lookup(b"S").num_value::<usize>()
        .ok_or(Error::Parse("hint stream /S missing"))?;
    let outline_offset = dict.lookup(b"O").num_value::<usize>();
    let start = header_pos + data_at as usize;
    let end = start + length as usize;
    if end > data.len() {
        return Err(Error::Parse("hint stream data truncated"));
    }
    let stream = Stream::new(dict, data[start..end].to_vec());
    let decoded = stream.decoded_data()?;
    HintTables::read(&decoded, npages, shared_offset, outline_offset)
}

fn offset_of(xref: &XRef, num: ObjNum) -> Option<Offset> {
    xref.locate(num).and_then(Record::offset)
}

fn length_of(boundaries: &[Offset], offset: Offset) -> u64 {
    let next = boundaries.partition_point(|&b| b <= offset);
    boundaries.get(next).map(|&b| b - offset).unwrap_or(0)
}

/// Total length of `count` objects with consecutive numbers starting at `first`.
fn length_next_n(xref: &XRef, boundaries: &[Offset], first: ObjNum, count: u64,
        warnings: &mut Vec<String>) -> u64 {
    let mut length = 0;
    for num in first..first + count {
        match offset_of(xref, num) {
            Some(offset) => length += length_of(boundaries, offset),
            None => warnings.push(format!(
                "no cross-reference entry for object {num} 0 in a hint table group"))
        }
    }
    length
}

fn check_page_offset(tables: &HintTables, lin: &plan::LinData, pages: &[ObjRef], xref: &XRef,
        boundaries: &[Offset], adj: &impl Fn(u64) -> u64, warnings: &mut Vec<String>) {
    let po = &tables.page_offset;
    match offset_of(xref, pages[0].num) {
        Some(offset) if adj(po.first_page_offset) != offset => warnings.push(format!(
            "first page object offset mismatch: hint table = {}, actual = {offset}",
            adj(po.first_page_offset))),
        None => warnings.push("first page object has no cross-reference entry".into()),
        _ => ()
    }
    if po.entries.len() != pages.len() {
        warnings.push(format!("page offset hint table has {} entries for {} pages",
            po.entries.len(), pages.len()));
        return;
    }
    for (pageno, entry) in po.entries.iter().enumerate() {
        let h_nobjects = entry.delta_nobjects + po.min_nobjects;
        let expected_nobjects = lin.pages[pageno].nobjects as u64;
        if h_nobjects != expected_nobjects {
            warnings.push(format!("object count mismatch for page {pageno}: \
                hint table = {h_nobjects}, computed = {expected_nobjects}"));
        }
        let h_length = entry.delta_page_length + po.min_page_length;
        let expected_length =
            length_next_n(xref, boundaries, pages[pageno].num, h_nobjects, warnings);
        if h_length != expected_length {
            warnings.push(format!("page length mismatch for page {pageno}: \
                hint table = {h_length}, computed = {expected_length}"));
        }
        let expected_shared = lin.pages[pageno].shared.iter()
            .map(|&index| index as u64)
            .collect::<Vec<_>>();
        if entry.shared_identifiers != expected_shared {
            warnings.push(format!("shared object mismatch for page {pageno}: \
                hint table = {:?}, computed = {:?}",
                entry.shared_identifiers, expected_shared));
        }
    }
}

fn check_shared_object(tables: &HintTables, lin: &plan::LinData, xref: &XRef,
        boundaries: &[Offset], adj: &impl Fn(u64) -> u64, warnings: &mut Vec<String>) {
    let so = &tables.shared_object;
    if so.nshared_total as usize != lin.shared_order.len() {
        warnings.push(format!("shared object count mismatch: hint table = {}, \
            computed = {}", so.nshared_total, lin.shared_order.len()));
    }
    if so.nshared_first_page as usize != lin.n_shared_first_page {
        warnings.push(format!("first page shared object count mismatch: hint table = {}, \
            computed = {}", so.nshared_first_page, lin.n_shared_first_page));
    }
    if so.entries.len() != lin.shared_order.len() {
        return;
    }
    for (index, entry) in so.entries.iter().enumerate() {
        let h_length = entry.delta_group_length + so.min_group_length;
        let expected = length_next_n(xref, boundaries, lin.shared_order[index].num,
            entry.nobjects_minus_one + 1, warnings);
        if h_length != expected {
            warnings.push(format!("shared object {index} length mismatch: \
                hint table = {h_length}, computed = {expected}"));
        }
    }
    if so.nshared_total > so.nshared_first_page {
        match offset_of(xref, so.first_shared_obj) {
            Some(offset) if adj(so.first_shared_offset) != offset => warnings.push(format!(
                "first shared object offset mismatch: hint table = {}, actual = {offset}",
                adj(so.first_shared_offset))),
            None => warnings.push(
                "first shared object has no cross-reference entry".into()),
            _ => ()
        }
    }
}

fn check_outline(tables: &HintTables, lin: &plan::LinData, xref: &XRef,
        boundaries: &[Offset], adj: &impl Fn(u64) -> u64, warnings: &mut Vec<String>) {
    match (&tables.outline, &lin.first_outline) {
        (Some(ho), Some(first)) => {
            if ho.first_object != first.num {
                warnings.push(format!("outline first object mismatch: hint table = {}, \
                    computed = {}", ho.first_object, first.num));
            }
            match offset_of(xref, first.num) {
                Some(offset) if adj(ho.first_object_offset) != offset => warnings.push(format!(
                    "outline offset mismatch: hint table = {}, actual = {offset}",
                    adj(ho.first_object_offset))),
                None => warnings.push("first outline object has no cross-reference entry".into()),
                _ => ()
            }
            if ho.nobjects as usize != lin.outline_count {
                warnings.push(format!("outline object count mismatch: hint table = {}, \
                    computed = {}", ho.nobjects, lin.outline_count));
            }
            let expected = length_next_n(xref, boundaries, first.num, ho.nobjects, warnings);
            if ho.group_length != expected {
                warnings.push(format!("outline group length mismatch: hint table = {}, \
                    computed = {expected}", ho.group_length));
            }
        },
        (Some(_), None) => warnings.push(
            "hint tables describe outlines the document does not have".into()),
        (None, Some(_)) => warnings.push("document outlines missing from the hint tables".into()),
        (None, None) => ()
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use crate::reader::load_document;
    use crate::write::{ObjStreamMode, Writer, WriterConfig};

    fn oref(num: ObjNum) -> ObjRef {
        ObjRef { num, gen: 0 }
    }

    fn dict(entries: Vec<(&[u8], Object)>) -> Dict {
        Dict::from(entries.into_iter()
            .map(|(key, value)| (Name::from(key), value))
            .collect::<Vec<_>>())
    }

    fn two_page_document() -> Document {
        let mut doc = Document::new((1, 4));
        doc.insert(oref(1), Object::Dict(dict(vec![
            (b"Type", Object::new_name(b"Catalog")),
            (b"Pages", Object::Ref(oref(2))),
        ])));
        doc.insert(oref(2), Object::Dict(dict(vec![
            (b"Type", Object::new_name(b"Pages")),
            (b"Kids", Object::Array(vec![Object::Ref(oref(3)), Object::Ref(oref(5))])),
            (b"Count", Object::new_int(2)),
        ])));
        doc.insert(oref(3), Object::Dict(dict(vec![
            (b"Type", Object::new_name(b"Page")),
            (b"Parent", Object::Ref(oref(2))),
            (b"Contents", Object::Ref(oref(4))),
            (b"Resources", Object::Ref(oref(7))),
        ])));
        doc.insert(oref(4), Object::Stream(Stream::new(Dict::default(), b"BT ET".to_vec())));
        doc.insert(oref(5), Object::Dict(dict(vec![
            (b"Type", Object::new_name(b"Page")),
            (b"Parent", Object::Ref(oref(2))),
            (b"Contents", Object::Ref(oref(6))),
            (b"Resources", Object::Ref(oref(7))),
        ])));
        doc.insert(oref(6), Object::Stream(Stream::new(Dict::default(), b"BT T* ET".to_vec())));
        doc.insert(oref(7), Object::Dict(dict(vec![
            (b"ProcSet", Object::Array(vec![Object::new_name(b"PDF")])),
        ])));
        let mut trailer = Dict::default();
        trailer.insert(Name::from(b"Size"), Object::new_int(8));
        trailer.insert(Name::from(b"Root"), Object::Ref(oref(1)));
        doc.set_trailer(trailer);
        doc
    }

    fn write_linearized(doc: &Document, object_streams: ObjStreamMode) -> Vec<u8> {
        let config = WriterConfig::builder()
            .linearize(true).unwrap()
            .static_id(true).unwrap()
            .object_streams(object_streams)
            .build().unwrap();
        let mut writer = Writer::new(doc, config);
        let mut out = Vec::new();
        writer.write(&mut out).unwrap();
        assert!(writer.warnings().is_empty());
        out
    }

    #[test]
    fn test_clean_file_checks_out() {
        let doc = two_page_document();
        let out = write_linearized(&doc, ObjStreamMode::Disable);
        let (reloaded, xref) = load_document(Cursor::new(&out)).unwrap();
        let warnings = check_linearization(&reloaded, &xref, &out).unwrap();
        assert_eq!(warnings, Vec::<String>::new());
    }

    #[test]
    fn test_clean_file_with_object_streams() {
        let doc = two_page_document();
        let out = write_linearized(&doc, ObjStreamMode::Generate);
        let (reloaded, xref) = load_document(Cursor::new(&out)).unwrap();
        let warnings = check_linearization(&reloaded, &xref, &out).unwrap();
        assert_eq!(warnings, Vec::<String>::new());
    }

    #[test]
    fn test_unlinearized_file() {
        let doc = two_page_document();
        let mut writer = Writer::new(&doc, WriterConfig::default());
        let mut out = Vec::new();
        writer.write(&mut out).unwrap();
        let (reloaded, xref) = load_document(Cursor::new(&out)).unwrap();
        let warnings = check_linearization(&reloaded, &xref, &out).unwrap();
        assert_eq!(warnings, vec!["no linearization dictionary found".to_string()]);
    }

    #[test]
    fn test_tampered_page_count() {
        let doc = two_page_document();
        let mut out = write_linearized(&doc, ObjStreamMode::Disable);
        let pos = out.windows(4).position(|win| win == b"/N 2").unwrap();
        out[pos + 3] = b'3';
        let (reloaded, xref) = load_document(Cursor::new(&out)).unwrap();
        let warnings = check_linearization(&reloaded, &xref, &out).unwrap();
        assert!(warnings.iter().any(|msg| msg.contains("page count mismatch")),
            "got {warnings:?}");
    }
}
