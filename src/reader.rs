use std::collections::{BTreeMap, BTreeSet};
use std::io::{BufRead, Cursor, Read, Seek};

use crate::base::*;
use crate::base::types::*;
use crate::parser::{FileParser, ObjParser, Parsed, Tokenizer};
use crate::utils;

/// Loads a whole PDF file into a [`Document`], following the cross-reference chain.
///
/// Object stream members are unpacked into the document as plain objects; the returned [`XRef`]
/// preserves their original packing for writers that want to keep it. Encrypted files are
/// refused.
pub fn load_document<T: BufRead + Seek>(input: T) -> Result<(Document, XRef), Error> {
    let fp = FileParser::new(input);
    let version = match fp.header() {
        Ok(header) => header.version,
        Err(_) => (1, 4)
    };

    let mut xref = fp.read_xref_at(fp.entrypoint()?)?;
    merge_xref_chain(&fp, &mut xref)?;
    if !matches!(xref.dict.lookup(b"Encrypt"), Object::Null) {
        return Err(Error::Data("encrypted files are not supported".into()));
    }

    let mut doc = Document::new(version);
    let mut compressed: BTreeMap<ObjNum, Vec<(ObjNum, ObjIndex)>> = BTreeMap::new();

    for (&num, &rec) in &xref.map {
        match rec {
            Record::Free { .. } => (),
            Record::Used { gen, offset } => {
                match load_at(&fp, &xref, num, gen, offset) {
                    Ok((oref, obj)) => doc.insert(oref, obj),
                    Err(err) => log::warn!("skipping object {num} {gen}: {err}")
                }
            },
            Record::Compr { num_within, index } => {
                compressed.entry(num_within).or_default().push((num, index));
            }
        }
    }

    for (container, members) in compressed {
        if let Err(err) = load_object_stream(&mut doc, container, &members) {
            log::warn!("skipping object stream {container}: {err}");
        }
    }

    doc.set_trailer(xref.dict.clone());
    bump_catalog_version(&mut doc);
    Ok((doc, xref))
}

fn merge_xref_chain<T: BufRead + Seek>(fp: &FileParser<T>, xref: &mut XRef) -> Result<(), Error> {
    let mut seen = BTreeSet::new();
    // A hybrid file's /XRefStm supplements its own section before /Prev is followed.
    if let Some(stm_at) = xref.dict.lookup(b"XRefStm").num_value::<Offset>() {
        if seen.insert(stm_at) {
            match fp.read_xref_at(stm_at) {
                Ok(stm) => xref.merge_prev(stm),
                Err(err) => log::warn!("broken /XRefStm link: {err}")
            }
        }
    }
    let mut prev_at = xref.dict.lookup(b"Prev").num_value::<Offset>();
    while let Some(at) = prev_at {
        if !seen.insert(at) {
            log::warn!("loop in cross-reference chain at offset {at}");
            break;
        }
        let mut section = fp.read_xref_at(at)?;
        if let Some(stm_at) = section.dict.lookup(b"XRefStm").num_value::<Offset>() {
            if seen.insert(stm_at) {
                match fp.read_xref_at(stm_at) {
                    Ok(stm) => section.merge_prev(stm),
                    Err(err) => log::warn!("broken /XRefStm link: {err}")
                }
            }
        }
        prev_at = section.dict.lookup(b"Prev").num_value::<Offset>();
        xref.merge_prev(section);
    }
    Ok(())
}

fn load_at<T: BufRead + Seek>(fp: &FileParser<T>, xref: &XRef, num: ObjNum, gen: ObjGen,
        offset: Offset) -> Result<(ObjRef, Object), Error> {
    let (oref, parsed) = fp.read_obj_at(offset)?;
    if oref != (ObjRef { num, gen }) {
        return Err(Error::Data(format!("object label {oref} R does not match the table")));
    }
    match parsed {
        Parsed::Obj(obj) => Ok((oref, obj)),
        Parsed::Stream(dict, data_at) => {
            let len = stream_length(fp, xref, &dict)?;
            let mut data = Vec::with_capacity(len as usize);
            fp.read_raw(data_at)?.take(len).read_to_end(&mut data)?;
            if data.len() as Offset != len {
                return Err(Error::Parse("stream data truncated"));
            }
            Ok((oref, Object::Stream(Stream::new(dict, data))))
        }
    }
}

fn stream_length<T: BufRead + Seek>(fp: &FileParser<T>, xref: &XRef, dict: &Dict)
        -> Result<Offset, Error> {
    match dict.lookup(b"Length") {
        Object::Number(Number::Int(len)) =>
            (*len).try_into().map_err(|_| Error::Parse("negative /Length")),
        Object::Ref(oref) => {
            let Some(&Record::Used { offset, .. }) = xref.locate(oref.num) else {
                return Err(Error::Parse("unresolvable indirect /Length"));
            };
            let (_, parsed) = fp.read_obj_at(offset)?;
            match parsed {
                Parsed::Obj(obj) => obj.num_value()
                    .ok_or(Error::Parse("indirect /Length is not an integer")),
                _ => Err(Error::Parse("indirect /Length is not an integer"))
            }
        },
        _ => Err(Error::Parse("missing /Length"))
    }
}

fn load_object_stream(doc: &mut Document, container: ObjNum, members: &[(ObjNum, ObjIndex)])
        -> Result<(), Error> {
    let stm = doc.get(&ObjRef { num: container, gen: 0 }).as_stream()
        .ok_or(Error::Parse("object stream container is not a stream"))?;
    if stm.dict.lookup(b"Type") != &Object::new_name(b"ObjStm") {
        return Err(Error::Parse("object stream container is not /Type /ObjStm"));
    }
    let count: usize = stm.dict.lookup(b"N").num_value()
        .ok_or(Error::Parse("object stream missing /N"))?;
    let first: usize = stm.dict.lookup(b"First").num_value()
        .ok_or(Error::Parse("object stream missing /First"))?;
    let data = stm.decoded_data()?;
    if first > data.len() {
        return Err(Error::Parse("object stream /First out of range"));
    }

    // the header section: `num offset` pairs
    let mut header = Cursor::new(&data[..first]);
    let mut pairs = Vec::with_capacity(count);
    for _ in 0..count {
        let num = utils::parse_int_strict::<ObjNum>(&header.read_token_nonempty()?)
            .ok_or(Error::Parse("malformed object stream header"))?;
        let off = utils::parse_num::<usize>(&header.read_token_nonempty()?)
            .ok_or(Error::Parse("malformed object stream header"))?;
        pairs.push((num, off));
    }

    let mut loaded = Vec::new();
    for &(num, index) in members {
        let Some(&(hdr_num, off)) = pairs.get(index as usize) else {
            log::warn!("object stream {container} has no member at index {index}");
            continue;
        };
        if hdr_num != num {
            log::warn!("object stream {container} member {index} is {hdr_num}, table says {num}");
        }
        if first + off > data.len() {
            log::warn!("object stream {container} member {index} offset out of range");
            continue;
        }
        let mut cur = Cursor::new(&data[(first + off)..]);
        match ObjParser::read_obj(&mut cur) {
            Ok(obj) => loaded.push((ObjRef { num: hdr_num, gen: 0 }, obj)),
            Err(err) => log::warn!("object stream {container} member {index}: {err}")
        }
    }
    for (oref, obj) in loaded {
        doc.insert(oref, obj);
    }
    Ok(())
}

// A catalog /Version newer than the header bumps the document version.
fn bump_catalog_version(doc: &mut Document) {
    let version = (|| {
        let dict = doc.resolve_ref(&doc.root_ref().ok()?).as_dict()?;
        match dict.lookup(b"Version").as_name()?.as_slice() {
            [maj @ b'0'..=b'9', b'.', min @ b'0'..=b'9'] => Some((maj - b'0', min - b'0')),
            _ => None
        }
    })();
    if let Some(version) = version {
        if version > doc.version() {
            doc.set_version(version);
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    fn push_obj(out: &mut Vec<u8>, offsets: &mut Vec<Offset>, body: &str) {
        offsets.push(out.len() as Offset);
        out.extend_from_slice(body.as_bytes());
    }

    fn classic_pdf() -> Vec<u8> {
        let mut out: Vec<u8> = Vec::new();
        out.extend_from_slice(b"%PDF-1.4\n%\xbf\xf7\xa2\xfe\n");
        let mut offsets = Vec::new();
        push_obj(&mut out, &mut offsets,
            "1 0 obj\n<< /Type /Catalog /Pages 2 0 R >>\nendobj\n");
        push_obj(&mut out, &mut offsets,
            "2 0 obj\n<< /Type /Pages /Kids [ 3 0 R ] /Count 1 >>\nendobj\n");
        push_obj(&mut out, &mut offsets,
            "3 0 obj\n<< /Type /Page /Parent 2 0 R /Contents 4 0 R >>\nendobj\n");
        push_obj(&mut out, &mut offsets,
            "4 0 obj\n<< /Length 5 0 R >>\nstream\nBT ET\nendstream\nendobj\n");
        push_obj(&mut out, &mut offsets, "5 0 obj\n5\nendobj\n");
        let xref_at = out.len();
        out.extend_from_slice(b"xref\n0 6\n0000000000 65535 f \n");
        for off in &offsets {
            out.extend_from_slice(format!("{off:010} 00000 n \n").as_bytes());
        }
        out.extend_from_slice(b"trailer\n<< /Size 6 /Root 1 0 R >>\n");
        out.extend_from_slice(format!("startxref\n{xref_at}\n%%EOF\n").as_bytes());
        out
    }

    #[test]
    fn test_load_classic() {
        let (doc, xref) = load_document(Cursor::new(classic_pdf())).unwrap();
        assert_eq!(doc.version(), (1, 4));
        assert_eq!(doc.len(), 5);
        assert!(matches!(xref.tpe, XRefType::Table));
        let pages = doc.pages().unwrap();
        assert_eq!(pages, vec![ObjRef { num: 3, gen: 0 }]);
        // indirect /Length resolved while loading
        let contents = doc.get(&ObjRef { num: 4, gen: 0 }).as_stream().unwrap();
        assert_eq!(contents.data, b"BT ET");
    }

    fn objstm_pdf() -> Vec<u8> {
        // objects 1 (catalog) and 2 (pages) live in object stream 5; 3 is a page, 4 its contents
        let inner = "<< /Type /Catalog /Pages 2 0 R >>\n\
                     << /Type /Pages /Kids [ 3 0 R ] /Count 1 >>";
        let pos2 = inner.find("<< /Type /Pages").unwrap();
        let header = format!("1 0 2 {pos2} ");
        let first = header.len();
        let stm_data = format!("{header}{inner}");

        let mut out: Vec<u8> = Vec::new();
        out.extend_from_slice(b"%PDF-1.5\n%\xbf\xf7\xa2\xfe\n");
        let mut offsets = Vec::new();
        push_obj(&mut out, &mut offsets,
            "3 0 obj\n<< /Type /Page /Parent 2 0 R /Contents 4 0 R >>\nendobj\n");
        push_obj(&mut out, &mut offsets,
            "4 0 obj\n<< /Length 5 >>\nstream\nBT ET\nendstream\nendobj\n");
        push_obj(&mut out, &mut offsets, &format!(
            "5 0 obj\n<< /Type /ObjStm /N 2 /First {first} /Length {} >>\nstream\n{stm_data}\nendstream\nendobj\n",
            stm_data.len()));

        // xref stream, object 6, W [1 2 1], no filter
        let xref_at = out.len() as Offset;
        let mut rows: Vec<u8> = Vec::new();
        let mut push_row = |t: u8, f2: u16, f3: u8| {
            rows.push(t);
            rows.extend_from_slice(&f2.to_be_bytes());
            rows.push(f3);
        };
        push_row(0, 0, 255);                     // 0: free
        push_row(2, 5, 0);                       // 1: in stream 5, index 0
        push_row(2, 5, 1);                       // 2: in stream 5, index 1
        push_row(1, offsets[0] as u16, 0);       // 3
        push_row(1, offsets[1] as u16, 0);       // 4
        push_row(1, offsets[2] as u16, 0);       // 5
        push_row(1, xref_at as u16, 0);          // 6: this stream
        out.extend_from_slice(format!(
            "6 0 obj\n<< /Type /XRef /Size 7 /W [ 1 2 1 ] /Root 1 0 R /Length {} >>\nstream\n",
            rows.len()).as_bytes());
        out.extend_from_slice(&rows);
        out.extend_from_slice(b"\nendstream\nendobj\n");
        out.extend_from_slice(format!("startxref\n{xref_at}\n%%EOF\n").as_bytes());
        out
    }

    #[test]
    fn test_load_object_streams() {
        let (doc, xref) = load_document(Cursor::new(objstm_pdf())).unwrap();
        assert_eq!(doc.version(), (1, 5));
        assert!(matches!(xref.tpe, XRefType::Stream(ObjRef { num: 6, gen: 0 })));
        assert_eq!(xref.locate(2), Some(&Record::Compr { num_within: 5, index: 1 }));
        let root = doc.resolve_ref(&doc.root_ref().unwrap()).as_dict().unwrap();
        assert_eq!(root.lookup(b"Type"), &Object::new_name(b"Catalog"));
        assert_eq!(doc.pages().unwrap(), vec![ObjRef { num: 3, gen: 0 }]);
    }

    #[test]
    fn test_reject_encrypted() {
        let mut out = classic_pdf();
        // splice /Encrypt into the trailer
        let pos = out.windows(9).position(|w| w == b"/Size 6 /").unwrap();
        out.splice(pos..pos, b"/Encrypt 9 0 R ".iter().copied());
        // offsets into the trailer dict are unaffected, startxref still valid
        let err = load_document(Cursor::new(out)).unwrap_err();
        assert!(matches!(err, Error::Data(_)));
    }
}
