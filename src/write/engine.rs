use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::io::Write;

use crate::base::*;
use crate::base::types::*;
use crate::base::string::{hex_string, literal_string};
use crate::codecs;
use crate::lin::hints::HintTables;
use crate::lin::plan::{self, LinData};
use crate::write::config::{DecodeLevel, ObjStreamMode, WriterConfig};
use crate::write::pipeline::{ByteSink, PipelineStack};
use crate::write::tables::{NewObjTable, ObjTable};

pub(crate) const F_STREAM: u32 = 1;
pub(crate) const F_FILTERED: u32 = 2;
pub(crate) const F_IN_OSTREAM: u32 = 4;
pub(crate) const F_HEX_STRING: u32 = 8;
pub(crate) const F_NO_ENCRYPTION: u32 = 16;

const STATIC_ID: [u8; 16] = [
    0x31, 0x41, 0x59, 0x26, 0x53, 0x58, 0x97, 0x93,
    0x23, 0x84, 0x62, 0x64, 0x33, 0x83, 0x27, 0x95,
];

/// Space reserved for the linearization parameter dictionary, whose values are only known
/// after the first pass.
const LINDICT_PAD: u64 = 200;

#[derive(Debug, Clone, Copy, PartialEq)]
enum TrailerKind {
    Normal,
    LinFirst,
    LinSecond,
}

/// Rewrites a loaded [`Document`] into a fresh PDF file.
///
/// All writing modes funnel through the same serializer: objects are renumbered consecutively
/// in traversal order, stream data is re-filtered or preserved per the configuration, and the
/// cross-reference comes out as a classic table or a stream depending on whether object
/// streams are in play. Linearization runs the whole serialization twice, the first pass into
/// a counting sink to learn the layout.
pub struct Writer<'a> {
    document: &'a Document,
    input_xref: Option<&'a XRef>,
    config: WriterConfig,
    output_name: String,

    obj: ObjTable,
    new_obj: NewObjTable,
    object_queue: Vec<ObjRef>,
    next_objid: ObjNum,
    object_stream_to_objects: BTreeMap<ObjNum, Vec<ObjRef>>,
    max_ostream_index: u64,
    streams_empty: bool,
    root_ref: ObjRef,
    metadata_ref: Option<ObjRef>,
    final_version: (u8, u8),
    direct_stream_lengths: bool,

    page_object_to_seq: HashMap<ObjRef, usize>,
    contents_to_page_seq: HashMap<ObjRef, usize>,
    normalized_streams: HashSet<ObjRef>,

    encryption_dict_objid: ObjNum,
    cur_data_key: Option<Vec<u8>>,
    cur_stream_length: u64,
    cur_stream_length_id: ObjNum,
    added_newline: bool,

    id1: Vec<u8>,
    id2: Vec<u8>,
    deterministic_id_data: String,

    stream_warnings: BTreeSet<ObjNum>,
    warnings: Vec<String>,
}

fn w(st: &mut PipelineStack<'_>, data: impl AsRef<[u8]>) -> Result<(), Error> {
    ByteSink::write_all(st, data.as_ref()).map_err(Error::from)
}

fn spaces(st: &mut PipelineStack<'_>, count: u64) -> Result<(), Error> {
    w(st, " ".repeat(count as usize))
}

fn bytes_needed(mut value: u64) -> usize {
    let mut needed = 0;
    while value > 0 {
        needed += 1;
        value >>= 8;
    }
    needed
}

fn push_be(out: &mut Vec<u8>, value: u64, len: usize) {
    for i in (0..len).rev() {
        out.push((value >> (8 * i)) as u8);
    }
}

/// Worst-case growth of a cross-reference stream between the counting pass and the real one:
/// offsets grow by the hint stream length, and Flate output is not monotone in its input.
fn xref_stream_padding(xref_bytes: u64) -> u64 {
    16 + 5 * ((xref_bytes + 16383) / 16384)
}

impl<'a> Writer<'a> {
    pub fn new(document: &'a Document, config: WriterConfig) -> Writer<'a> {
        Writer {
            document,
            input_xref: None,
            config,
            output_name: String::new(),
            obj: ObjTable::new(),
            new_obj: NewObjTable::new(),
            object_queue: Vec::new(),
            next_objid: 1,
            object_stream_to_objects: BTreeMap::new(),
            max_ostream_index: 0,
            streams_empty: false,
            root_ref: ObjRef { num: 0, gen: 0 },
            metadata_ref: None,
            final_version: (0, 0),
            direct_stream_lengths: true,
            page_object_to_seq: HashMap::new(),
            contents_to_page_seq: HashMap::new(),
            normalized_streams: HashSet::new(),
            encryption_dict_objid: 0,
            cur_data_key: None,
            cur_stream_length: 0,
            cur_stream_length_id: 0,
            added_newline: false,
            id1: Vec::new(),
            id2: Vec::new(),
            deterministic_id_data: String::new(),
            stream_warnings: BTreeSet::new(),
            warnings: Vec::new(),
        }
    }

    /// Supplies the cross-reference table of the input file. Only consulted when object
    /// streams are to be preserved.
    pub fn set_input_xref(&mut self, xref: &'a XRef) {
        self.input_xref = Some(xref);
    }

    /// The output file name, mixed into the document ID for non-reproducible runs.
    pub fn set_output_name(&mut self, name: &str) {
        self.output_name = name.to_string();
    }

    /// Recoverable problems encountered while writing, in order of appearance.
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn write(&mut self, out: &mut dyn Write) -> Result<(), Error> {
        self.setup()?;
        if self.config.linearize {
            self.write_linearized(out)
        } else {
            let mut st = PipelineStack::new(out);
            self.write_standard(&mut st)
        }
    }

    fn setup(&mut self) -> Result<(), Error> {
        let doc = self.document;
        self.root_ref = doc.root_ref()?;
        self.metadata_ref = doc.resolve_ref(&self.root_ref).dict()
            .and_then(|root| root.lookup(b"Metadata").as_objref())
            .copied();

        if let Some(forced) = self.config.force_version {
            if forced < (1, 5) {
                self.config.object_stream_mode = ObjStreamMode::Disable;
            }
            if let Some(enc) = &self.config.encryption {
                if forced < enc.params.min_version() {
                    let msg = format!("version {}.{} can not express the requested encryption, \
                        dropping encryption", forced.0, forced.1);
                    log::warn!("{msg}");
                    self.warnings.push(msg);
                    self.config.encryption = None;
                }
            }
        }

        if self.config.qdf || self.config.normalize_content {
            self.initialize_special_streams()?;
        }

        let mut never_compress = BTreeSet::new();
        if self.config.linearize || self.config.encryption.is_some() {
            never_compress.insert(self.root_ref.num);
        }
        if self.config.linearize {
            for page in doc.pages()? {
                never_compress.insert(page.num);
            }
        }
        match self.config.object_stream_mode {
            ObjStreamMode::Disable => self.streams_empty = true,
            ObjStreamMode::Preserve => self.preserve_object_streams(&never_compress),
            ObjStreamMode::Generate => self.generate_object_streams(&never_compress),
        }
        if !self.streams_empty {
            for (oref, _) in doc.objects() {
                let container = self.obj.get(oref.num).object_stream;
                if container != 0 {
                    self.object_stream_to_objects.entry(container).or_default().push(oref);
                }
            }
            for members in self.object_stream_to_objects.values() {
                self.max_ostream_index = self.max_ostream_index.max(members.len() as u64 - 1);
            }
            if self.object_stream_to_objects.is_empty() {
                self.streams_empty = true;
            }
        }

        let mut version = doc.version().max(self.config.min_version.unwrap_or((0, 0)));
        if !self.streams_empty {
            version = version.max((1, 5));
        }
        if let Some(enc) = &self.config.encryption {
            version = version.max(enc.params.min_version());
        }
        if let Some(forced) = self.config.force_version {
            version = forced;
        }
        self.final_version = version;
        self.direct_stream_lengths = !self.config.qdf;
        if !self.config.extra_header_text.is_empty() && !self.config.extra_header_text.ends_with('\n') {
            self.config.extra_header_text.push('\n');
        }
        Ok(())
    }

    fn initialize_special_streams(&mut self) -> Result<(), Error> {
        let doc = self.document;
        for (seq, page_ref) in doc.pages()?.iter().enumerate() {
            self.page_object_to_seq.insert(*page_ref, seq + 1);
            let contents = doc.resolve_ref(page_ref).dict()
                .map(|page| page.lookup(b"Contents"))
                .unwrap_or(&Object::Null);
            let mut content_refs = Vec::new();
            match contents {
                Object::Ref(oref) => match doc.resolve_ref(oref) {
                    Object::Array(items) => for item in items {
                        if let Object::Ref(o) = item {
                            content_refs.push(*o);
                        }
                    },
                    _ => content_refs.push(*oref)
                },
                Object::Array(items) => for item in items {
                    if let Object::Ref(o) = item {
                        content_refs.push(*o);
                    }
                },
                _ => ()
            }
            for oref in content_refs {
                self.contents_to_page_seq.insert(oref, seq + 1);
                self.normalized_streams.insert(oref);
            }
        }
        Ok(())
    }

    fn preserve_object_streams(&mut self, never_compress: &BTreeSet<ObjNum>) {
        let Some(xref) = self.input_xref else {
            self.streams_empty = true;
            return;
        };
        let doc = self.document;
        for (&num, &rec) in &xref.map {
            if let Record::Compr { num_within, .. } = rec {
                let oref = ObjRef { num, gen: 0 };
                if !doc.contains(&oref) || matches!(doc.get(&oref), Object::Stream(_)) {
                    continue;
                }
                if never_compress.contains(&num) {
                    continue;
                }
                if !doc.contains(&ObjRef { num: num_within, gen: 0 }) {
                    continue;
                }
                self.obj.at_mut(num).object_stream = num_within;
            }
        }
    }

    fn generate_object_streams(&mut self, never_compress: &BTreeSet<ObjNum>) {
        let doc = self.document;
        let eligible = doc.objects()
            .filter(|(oref, object)| oref.gen == 0
                && !matches!(object, Object::Stream(_))
                && !never_compress.contains(&oref.num))
            .map(|(oref, _)| oref.num)
            .collect::<Vec<_>>();
        if eligible.is_empty() {
            self.streams_empty = true;
            return;
        }
        // keep the streams balanced rather than filling each to the recommended 100
        let n_streams = eligible.len().div_ceil(100);
        let n_per = eligible.len().div_ceil(n_streams);
        let mut container = doc.max_num() + 1;
        for chunk in eligible.chunks(n_per) {
            for &num in chunk {
                self.obj.at_mut(num).object_stream = container;
            }
            container += 1;
        }
    }

    fn enqueue(&mut self, object: &Object) {
        let doc = self.document;
        match object {
            Object::Ref(oref) => {
                // stale cross-reference streams would duplicate what we generate ourselves
                if self.config.qdf {
                    if let Object::Stream(stm) = doc.get(oref) {
                        if stm.dict.lookup(b"Type").as_name().is_some_and(|name| name == b"XRef") {
                            return;
                        }
                    }
                }
                let entry = self.obj.get(oref.num);
                if entry.renumber != 0 {
                    return;
                }
                if entry.object_stream > 0 {
                    self.obj.at_mut(oref.num).renumber = -1;
                    self.enqueue(&Object::Ref(ObjRef { num: entry.object_stream, gen: 0 }));
                } else {
                    self.object_queue.push(*oref);
                    self.obj.at_mut(oref.num).renumber = self.next_objid as i64;
                    self.obj.at_mut(oref.num).gen = oref.gen;
                    self.next_objid += 1;
                    if oref.gen == 0 && self.object_stream_to_objects.contains_key(&oref.num) {
                        if !self.config.linearize {
                            self.assign_compressed_numbers(oref.num);
                        }
                    } else if !self.direct_stream_lengths
                            && matches!(doc.get(oref), Object::Stream(_)) {
                        // reserve the next number for the indirect /Length
                        self.next_objid += 1;
                    }
                }
            },
            // in linearized mode the parts dictate the order; children are never pulled in
            _ if self.config.linearize => (),
            Object::Array(items) => for item in items {
                self.enqueue(item);
            },
            Object::Dict(dict) => for (_key, value) in dict.iter() {
                if !matches!(value, Object::Null) {
                    self.enqueue(value);
                }
            },
            _ => ()
        }
    }

    fn assign_compressed_numbers(&mut self, container: ObjNum) {
        let Some(members) = self.object_stream_to_objects.get(&container) else { return };
        for oref in members.clone() {
            self.obj.at_mut(oref.num).renumber = self.next_objid as i64;
            self.next_objid += 1;
        }
    }

    fn enqueue_part(&mut self, part: &[ObjRef]) {
        for oref in part {
            self.enqueue(&Object::Ref(*oref));
        }
    }

    fn set_data_key(&mut self, id: ObjNum) {
        if let Some(enc) = &self.config.encryption {
            self.cur_data_key = Some(enc.data_key(id, 0));
        }
    }

    fn write_encrypted(&self, st: &mut PipelineStack<'_>, data: &[u8]) -> Result<(), Error> {
        match (&self.config.encryption, &self.cur_data_key) {
            (Some(enc), Some(key)) => w(st, enc.process_with_key(key, data)),
            _ => w(st, data)
        }
    }

    fn indent(&self, st: &mut PipelineStack<'_>, level: usize) -> Result<(), Error> {
        if self.config.qdf {
            w(st, "\n")?;
            w(st, "  ".repeat(level))
        } else {
            w(st, " ")
        }
    }

    fn open_object(&mut self, st: &mut PipelineStack<'_>, id: ObjNum) -> Result<(), Error> {
        self.new_obj.at_mut(id).xref = Record::Used { gen: 0, offset: st.count() };
        w(st, format!("{id} 0 obj\n"))
    }

    fn close_object(&mut self, st: &mut PipelineStack<'_>, id: ObjNum) -> Result<(), Error> {
        w(st, "\nendobj\n")?;
        if self.config.qdf {
            w(st, "\n")?;
        }
        let entry = self.new_obj.at_mut(id);
        entry.length = st.count() - entry.xref.offset().unwrap_or(0);
        Ok(())
    }

    fn unparse_child(&mut self, st: &mut PipelineStack<'_>, child: &Object, level: usize,
            flags: u32) -> Result<(), Error> {
        if !self.config.linearize {
            self.enqueue(child);
        }
        if let Object::Ref(oref) = child {
            let renumber = self.obj.renumber(oref.num);
            if renumber <= 0 {
                return Err(Error::Data(format!("object {} {} has no assigned output number",
                    oref.num, oref.gen)));
            }
            w(st, format!("{renumber} 0 R"))
        } else {
            self.unparse_object(st, child, level, flags)
        }
    }

    fn unparse_object(&mut self, st: &mut PipelineStack<'_>, object: &Object, level: usize,
            flags: u32) -> Result<(), Error> {
        match object {
            Object::Array(items) => {
                w(st, "[")?;
                for item in items {
                    self.indent(st, level + 1)?;
                    self.unparse_child(st, item, level + 1, flags)?;
                }
                self.indent(st, level)?;
                w(st, "]")
            },
            Object::Dict(dict) => self.unparse_dict(st, dict, level, flags, 0, false),
            Object::Stream(_) => Err(Error::Data("stream used as a direct object".into())),
            Object::Ref(oref) => w(st, format!("{} 0 R", self.obj.renumber(oref.num))),
            Object::String(s) => {
                let encrypt = flags & (F_IN_OSTREAM | F_NO_ENCRYPTION) == 0;
                match (&self.config.encryption, &self.cur_data_key) {
                    (Some(enc), Some(key)) if encrypt =>
                        w(st, hex_string(&enc.process_with_key(key, s))),
                    _ if flags & F_HEX_STRING != 0 => w(st, hex_string(s)),
                    _ => w(st, literal_string(s))
                }
            },
            other => w(st, format!("{other}"))
        }
    }

    fn unparse_dict(&mut self, st: &mut PipelineStack<'_>, dict: &Dict, level: usize, flags: u32,
            stream_length: u64, compress: bool) -> Result<(), Error> {
        let is_sig = dict.lookup(b"Type").as_name().is_some_and(|name| name == b"Sig")
            && dict.contains_key(b"ByteRange");
        let stripped;
        let dict = if flags & F_STREAM != 0 {
            let mut drop: Vec<&[u8]> = vec![b"Length"];
            if flags & F_FILTERED != 0 {
                drop.push(b"Filter");
                drop.push(b"DecodeParms");
            }
            stripped = dict.without_keys(&drop);
            &stripped
        } else {
            dict
        };
        w(st, "<<")?;
        for (key, value) in dict.iter() {
            if matches!(value, Object::Null) {
                continue;
            }
            self.indent(st, level + 1)?;
            w(st, format!("{key} "))?;
            let mut child_flags = flags & !(F_STREAM | F_FILTERED);
            if is_sig && key == b"Contents" {
                // signature values must survive byte for byte
                child_flags |= F_HEX_STRING | F_NO_ENCRYPTION;
            }
            self.unparse_child(st, value, level + 1, child_flags)?;
        }
        if flags & F_STREAM != 0 {
            self.indent(st, level + 1)?;
            if self.direct_stream_lengths {
                w(st, format!("/Length {stream_length}"))?;
            } else {
                w(st, format!("/Length {} 0 R", self.cur_stream_length_id))?;
            }
            if compress && flags & F_FILTERED != 0 {
                self.indent(st, level + 1)?;
                w(st, "/Filter /FlateDecode")?;
            }
        }
        self.indent(st, level)?;
        w(st, ">>")
    }

    /// Decides whether a stream gets refiltered and with what data, falling back to a raw copy
    /// (with a warning, once per object) when the data refuses to decode.
    fn will_filter_stream(&mut self, oref: ObjRef, stm: &Stream)
            -> Result<(bool, bool, Vec<u8>), Error> {
        let mut filter = self.config.compress_streams
            || self.config.decode_level != DecodeLevel::None;
        if !stm.is_plain() {
            if self.config.decode_level == DecodeLevel::None || stm.filters().is_err() {
                filter = false;
            } else if self.config.compress_streams && !self.config.recompress_flate {
                // already Flate; squeezing it again gains nothing
                filter = false;
            }
        }
        let mut compress = filter && self.config.compress_streams;
        if self.config.normalize_content && self.normalized_streams.contains(&oref) {
            filter = true;
        }
        if self.metadata_ref == Some(oref) {
            let plain = match &self.config.encryption {
                Some(enc) => !enc.params.encrypt_metadata,
                None => true,
            };
            if plain {
                // unencrypted document metadata stays uncompressed so that tools which do
                // not decode streams can still find it
                filter = true;
                compress = false;
                self.cur_data_key = None;
            }
        }
        if stm.data.is_empty() {
            filter = true;
            compress = false;
        }
        if filter {
            match stm.decoded_data() {
                Ok(data) => return Ok((true, compress, data)),
                Err(err) => {
                    if self.stream_warnings.insert(oref.num) {
                        let msg = format!("object {} {}: error getting stream data: {err}; \
                            writing raw data", oref.num, oref.gen);
                        log::warn!("{msg}");
                        self.warnings.push(msg);
                    }
                }
            }
        }
        Ok((false, false, stm.data.clone()))
    }

    fn unparse_top(&mut self, st: &mut PipelineStack<'_>, oref: ObjRef, object: &Object,
            flags: u32) -> Result<(), Error> {
        let Object::Stream(stm) = object else {
            return self.unparse_object(st, object, 0, flags);
        };
        if !self.direct_stream_lengths {
            self.cur_stream_length_id = self.obj.renumber(oref.num) as ObjNum + 1;
        }
        let (filtered, compress, mut data) = self.will_filter_stream(oref, stm)?;
        if filtered && compress {
            data = codecs::compress(&data);
        }
        self.cur_stream_length = data.len() as u64;
        if let (Some(enc), Some(_)) = (&self.config.encryption, &self.cur_data_key) {
            self.cur_stream_length = enc.stream_length(self.cur_stream_length);
        }
        let flags = flags | F_STREAM | if filtered { F_FILTERED } else { 0 };
        self.unparse_dict(st, &stm.dict, 0, flags, self.cur_stream_length, compress)?;
        w(st, "\nstream\n")?;
        self.write_encrypted(st, &data)?;
        self.added_newline = self.config.newline_before_endstream
            || (self.config.qdf && data.last() != Some(&b'\n'));
        w(st, if self.added_newline { "\nendstream" } else { "endstream" })
    }

    fn write_object(&mut self, st: &mut PipelineStack<'_>, oref: ObjRef) -> Result<(), Error> {
        if oref.gen == 0 && self.object_stream_to_objects.contains_key(&oref.num) {
            return self.write_object_stream(st, oref.num);
        }
        let doc = self.document;
        let object = doc.get(&oref);
        let new_id = self.obj.renumber(oref.num) as ObjNum;
        if self.config.qdf {
            if let Some(&seq) = self.page_object_to_seq.get(&oref) {
                w(st, format!("%% Page {seq}\n"))?;
            }
            if let Some(&seq) = self.contents_to_page_seq.get(&oref) {
                w(st, format!("%% Contents for page {seq}\n"))?;
            }
            w(st, format!("%% Original object ID: {} {}\n", oref.num, oref.gen))?;
        }
        self.open_object(st, new_id)?;
        self.set_data_key(new_id);
        self.added_newline = false;
        self.unparse_top(st, oref, object, 0)?;
        self.cur_data_key = None;
        self.close_object(st, new_id)?;
        if !self.direct_stream_lengths && matches!(object, Object::Stream(_)) {
            if self.config.qdf && self.added_newline {
                w(st, "%QDF: ignore_newline\n")?;
            }
            self.open_object(st, new_id + 1)?;
            w(st, format!("{}", self.cur_stream_length))?;
            self.close_object(st, new_id + 1)?;
        }
        Ok(())
    }

    fn write_object_stream(&mut self, st: &mut PipelineStack<'_>, container: ObjNum)
            -> Result<(), Error> {
        let doc = self.document;
        let new_stream_id = self.obj.renumber(container) as ObjNum;
        let members = self.object_stream_to_objects.get(&container).cloned()
            .ok_or_else(|| Error::Data(format!("object stream {container} has no members")))?;
        let compress = self.config.compress_streams && !self.config.qdf;

        // members first, to learn their relative offsets
        let mut offsets = Vec::with_capacity(members.len());
        let pp = st.activate_buffer();
        for (index, oref) in members.iter().enumerate() {
            let new_id = self.obj.renumber(oref.num) as ObjNum;
            if self.config.qdf {
                w(st, format!("%% Object stream: object {new_id}, index {index}; \
                    original object ID: {} {}\n", oref.num, oref.gen))?;
            }
            offsets.push(st.count());
            let object = doc.get(oref);
            if matches!(object, Object::Stream(_)) {
                let msg = format!("object {} {}: a stream can not live in an object stream; \
                    writing null", oref.num, oref.gen);
                log::warn!("{msg}");
                self.warnings.push(msg);
                w(st, "null")?;
            } else {
                self.unparse_top(st, *oref, object, F_IN_OSTREAM)?;
            }
            w(st, "\n")?;
            self.new_obj.at_mut(new_id).xref = Record::Compr {
                num_within: new_stream_id,
                index: index as ObjIndex,
            };
        }
        let body = st.pop(pp);

        let first_offset = offsets.first().copied().unwrap_or(0);
        for offset in &mut offsets {
            *offset -= first_offset;
        }
        let first_new_id = members.first()
            .map(|oref| self.obj.renumber(oref.num) as ObjNum)
            .unwrap_or(0);
        // the header pairs precede the members, so /First includes their own length
        let pp = st.activate_discard();
        self.write_ostream_offsets(st, &offsets, first_new_id)?;
        let header_len = st.count();
        st.pop(pp);
        let first = first_offset + header_len;

        let pp = st.activate_buffer();
        self.write_ostream_offsets(st, &offsets, first_new_id)?;
        w(st, &body)?;
        let mut data = st.pop(pp);
        if compress {
            data = codecs::compress(&data);
        }

        self.open_object(st, new_stream_id)?;
        self.set_data_key(new_stream_id);
        let mut length = data.len() as u64;
        if let (Some(enc), Some(_)) = (&self.config.encryption, &self.cur_data_key) {
            length = enc.stream_length(length);
        }
        w(st, "<<")?;
        self.indent(st, 1)?;
        w(st, format!("/Type /ObjStm /Length {length}"))?;
        if compress {
            self.indent(st, 1)?;
            w(st, "/Filter /FlateDecode")?;
        }
        self.indent(st, 1)?;
        w(st, format!("/N {} /First {first}", members.len()))?;
        if let Object::Stream(stm) = doc.get(&ObjRef { num: container, gen: 0 }) {
            let extends = stm.dict.lookup(b"Extends");
            if !matches!(extends, Object::Null) {
                self.indent(st, 1)?;
                w(st, "/Extends ")?;
                self.unparse_child(st, extends, 1, 0)?;
            }
        }
        self.indent(st, 0)?;
        w(st, ">>\nstream\n")?;
        self.write_encrypted(st, &data)?;
        w(st, if self.config.newline_before_endstream { "\nendstream" } else { "endstream" })?;
        self.cur_data_key = None;
        self.close_object(st, new_stream_id)
    }

    fn write_ostream_offsets(&mut self, st: &mut PipelineStack<'_>, offsets: &[Offset],
            first_new_id: ObjNum) -> Result<(), Error> {
        for (index, offset) in offsets.iter().enumerate() {
            if index > 0 {
                w(st, if self.config.qdf { "\n" } else { " " })?;
            }
            w(st, format!("{} {offset}", first_new_id + index as ObjNum))?;
        }
        w(st, "\n")
    }

    fn trimmed_trailer(&self) -> Dict {
        self.document.trailer().without_keys(&[
            b"ID", b"Encrypt", b"Prev", b"Index", b"W", b"Length",
            b"Filter", b"DecodeParms", b"Type", b"XRefStm",
        ])
    }

    fn original_id1(&self) -> Option<&Vec<u8>> {
        self.document.trailer().lookup(b"ID").as_array()
            .and_then(|ids| ids.first())
            .and_then(Object::as_string)
    }

    fn generate_id(&mut self) -> Result<(), Error> {
        if !self.id2.is_empty() {
            return Ok(());
        }
        let doc = self.document;
        let id2 = if self.config.static_id {
            STATIC_ID.to_vec()
        } else {
            let mut seed = Vec::new();
            if self.config.deterministic_id {
                if self.deterministic_id_data.is_empty() {
                    return Err(Error::Usage("no content digest available for the \
                        deterministic ID".into()));
                }
                seed.extend_from_slice(self.deterministic_id_data.as_bytes());
            } else {
                let now = std::time::SystemTime::now()
                    .duration_since(std::time::UNIX_EPOCH)
                    .unwrap_or_default();
                seed.extend_from_slice(
                    format!("{}.{:09}", now.as_secs(), now.subsec_nanos()).as_bytes());
                seed.push(b' ');
                seed.extend_from_slice(self.output_name.as_bytes());
            }
            seed.extend_from_slice(b" pdfrewrite");
            if let Object::Dict(info) = doc.resolve(doc.trailer().lookup(b"Info")) {
                for (_key, value) in info.iter() {
                    if let Object::String(s) = doc.resolve(value) {
                        seed.push(b' ');
                        seed.extend_from_slice(s);
                    }
                }
            }
            md5::compute(&seed).0.to_vec()
        };
        self.id1 = self.original_id1().cloned().unwrap_or_else(|| id2.clone());
        self.id2 = id2;
        Ok(())
    }

    fn write_trailer(&mut self, st: &mut PipelineStack<'_>, kind: TrailerKind, size: ObjNum,
            xref_stream: bool, prev: u64, pass: u8) -> Result<(), Error> {
        let trailer = self.trimmed_trailer();
        if xref_stream {
            // cross-reference streams are never encrypted
            self.cur_data_key = None;
        } else {
            w(st, "trailer <<")?;
        }
        if self.config.qdf {
            w(st, "\n")?;
        }
        if kind == TrailerKind::LinSecond {
            w(st, format!(" /Size {size}"))?;
        } else {
            let mut wrote_size = false;
            for (key, value) in trailer.iter() {
                if matches!(value, Object::Null) {
                    continue;
                }
                w(st, if self.config.qdf { "  " } else { " " })?;
                w(st, format!("{key} "))?;
                if key == b"Size" {
                    wrote_size = true;
                    w(st, format!("{size}"))?;
                    if kind == TrailerKind::LinFirst {
                        w(st, " /Prev ")?;
                        let pos = st.count();
                        w(st, format!("{prev}"))?;
                        spaces(st, (pos + 21).saturating_sub(st.count()))?;
                    }
                } else {
                    self.unparse_child(st, value, 1, 0)?;
                }
                if self.config.qdf {
                    w(st, "\n")?;
                }
            }
            if !wrote_size {
                w(st, format!(" /Size {size}"))?;
                if self.config.qdf {
                    w(st, "\n")?;
                }
            }
        }

        w(st, " /ID [")?;
        if pass == 1 {
            // placeholder of the final length; the real ID only exists after pass 2 layout
            let id1_len = self.original_id1().map(|id| 2 * id.len()).unwrap_or(32);
            w(st, format!("<{}>", "0".repeat(id1_len)))?;
            w(st, format!("<{}>", "0".repeat(32)))?;
        } else {
            if pass == 0 && self.config.deterministic_id && self.id2.is_empty() {
                self.deterministic_id_data = st.hex_digest();
            }
            self.generate_id()?;
            w(st, hex_string(&self.id1))?;
            w(st, hex_string(&self.id2))?;
        }
        w(st, "]")?;

        if kind != TrailerKind::LinSecond && self.config.encryption.is_some() {
            w(st, format!(" /Encrypt {} 0 R", self.encryption_dict_objid))?;
        }
        w(st, if self.config.qdf { "\n>>" } else { " >>" })
    }

    /// Writes a classic cross-reference section followed by its trailer. Returns the offset of
    /// the newline before the first entry, the value `/T` wants in a linearized file.
    #[allow(clippy::too_many_arguments)]
    fn write_xref_table(&mut self, st: &mut PipelineStack<'_>, kind: TrailerKind, first: ObjNum,
            last: ObjNum, size: ObjNum, prev: u64, suppress_offsets: bool, hint_id: ObjNum,
            hint_offset: Offset, hint_length: u64, pass: u8) -> Result<Offset, Error> {
        w(st, format!("xref\n{first} {}", last - first + 1))?;
        let space_before_zero = st.count();
        w(st, "\n")?;
        let mut first = first;
        if first == 0 {
            w(st, "0000000000 65535 f \n")?;
            first = 1;
        }
        for id in first..=last {
            let mut offset = 0;
            if !suppress_offsets {
                offset = self.new_obj.get(id).xref.offset().unwrap_or(0);
                if hint_id != 0 && id != hint_id && offset >= hint_offset {
                    offset += hint_length;
                }
            }
            w(st, format!("{offset:010} 00000 n \n"))?;
        }
        self.write_trailer(st, kind, size, false, prev, pass)?;
        w(st, "\n")?;
        Ok(space_before_zero)
    }

    /// Writes a cross-reference stream object. Returns the offset one byte before the object
    /// header, mirroring what [`write_xref_table`](Self::write_xref_table) reports.
    #[allow(clippy::too_many_arguments)]
    fn write_xref_stream(&mut self, st: &mut PipelineStack<'_>, xref_id: ObjNum, max_id: ObjNum,
            max_offset: u64, kind: TrailerKind, first: ObjNum, last: ObjNum, size: ObjNum,
            prev: u64, hint_id: ObjNum, hint_offset: Offset, hint_length: u64,
            skip_compression: bool, pass: u8) -> Result<Offset, Error> {
        let xref_offset = st.count();
        let space_before_zero = xref_offset - 1;
        self.new_obj.at_mut(xref_id).xref = Record::Used { gen: 0, offset: xref_offset };

        let f1 = bytes_needed(max_offset + hint_length).max(bytes_needed(max_id)).max(1);
        let f2 = bytes_needed(self.max_ostream_index).max(1);
        let esize = 1 + f1 + f2;

        let mut rows = Vec::with_capacity(esize * (last - first + 1) as usize);
        for id in first..=last {
            match self.new_obj.get(id).xref {
                Record::Free { .. } => {
                    rows.push(0);
                    push_be(&mut rows, 0, f1);
                    push_be(&mut rows, 0, f2);
                },
                Record::Used { offset, .. } => {
                    let mut offset = offset;
                    if hint_id != 0 && id != hint_id && offset >= hint_offset {
                        offset += hint_length;
                    }
                    rows.push(1);
                    push_be(&mut rows, offset, f1);
                    push_be(&mut rows, 0, f2);
                },
                Record::Compr { num_within, index } => {
                    rows.push(2);
                    push_be(&mut rows, num_within, f1);
                    push_be(&mut rows, index as u64, f2);
                }
            }
        }
        let compress = self.config.compress_streams && !self.config.qdf;
        let mut data = rows;
        if compress {
            data = codecs::png_encode(&data, esize);
            if !skip_compression {
                data = codecs::compress(&data);
            }
        }

        self.open_object(st, xref_id)?;
        w(st, "<<")?;
        self.indent(st, 1)?;
        w(st, format!("/Type /XRef /Length {}", data.len()))?;
        if compress {
            self.indent(st, 1)?;
            w(st, format!("/Filter /FlateDecode /DecodeParms << /Columns {esize} \
                /Predictor 12 >>"))?;
        }
        self.indent(st, 1)?;
        w(st, format!("/W [ 1 {f1} {f2} ]"))?;
        if !(first == 0 && last == size - 1) {
            self.indent(st, 1)?;
            w(st, format!("/Index [ {first} {} ]", last - first + 1))?;
        }
        self.write_trailer(st, kind, size, true, prev, pass)?;
        w(st, "\nstream\n")?;
        w(st, &data)?;
        w(st, "\nendstream")?;
        self.close_object(st, xref_id)?;
        Ok(space_before_zero)
    }

    fn write_encryption_dictionary(&mut self, st: &mut PipelineStack<'_>) -> Result<(), Error> {
        if self.encryption_dict_objid == 0 {
            self.encryption_dict_objid = self.next_objid;
            self.next_objid += 1;
        }
        let id = self.encryption_dict_objid;
        let dict = match &self.config.encryption {
            Some(enc) => Object::Dict(enc.dictionary()),
            None => return Err(Error::Usage("no encryption parameters set".into()))
        };
        self.cur_data_key = None;
        self.open_object(st, id)?;
        self.unparse_object(st, &dict, 0, F_NO_ENCRYPTION)?;
        self.close_object(st, id)
    }

    fn write_hint_stream(&mut self, st: &mut PipelineStack<'_>, hint_id: ObjNum,
            lin: &LinData) -> Result<(), Error> {
        let tables = HintTables::calculate(lin, &self.obj, &self.new_obj)?;
        let (mut data, shared_offset, outline_offset) = tables.write();
        let compress = self.config.compress_streams;
        if compress {
            data = codecs::compress(&data);
        }
        self.open_object(st, hint_id)?;
        self.set_data_key(hint_id);
        let mut length = data.len() as u64;
        if let (Some(enc), Some(_)) = (&self.config.encryption, &self.cur_data_key) {
            length = enc.stream_length(length);
        }
        w(st, "<< ")?;
        if compress {
            w(st, "/Filter /FlateDecode ")?;
        }
        w(st, format!("/S {shared_offset}"))?;
        if let Some(outline_offset) = outline_offset {
            w(st, format!(" /O {outline_offset}"))?;
        }
        w(st, format!(" /Length {length} >>\nstream\n"))?;
        self.write_encrypted(st, &data)?;
        w(st, if data.last() == Some(&b'\n') { "endstream" } else { "\nendstream" })?;
        self.cur_data_key = None;
        self.close_object(st, hint_id)
    }

    fn write_header(&self, st: &mut PipelineStack<'_>) -> Result<(), Error> {
        let (major, minor) = self.final_version;
        w(st, format!("%PDF-{major}.{minor}"))?;
        if self.config.pclm {
            w(st, "\n%PCLm 1.0\n")?;
        } else {
            // the binary comment keeps transfer agents from treating the file as text
            w(st, b"\n%\xbf\xf7\xa2\xfe\n".as_slice())?;
        }
        if self.config.qdf {
            w(st, "%QDF-1.0\n\n")?;
        }
        Ok(())
    }

    fn enqueue_objects_standard(&mut self) {
        if self.config.preserve_unreferenced {
            let orefs = self.document.objects().map(|(oref, _)| oref).collect::<Vec<_>>();
            for oref in orefs {
                self.enqueue(&Object::Ref(oref));
            }
        }
        self.enqueue(&Object::Ref(self.root_ref));
        let trailer = self.trimmed_trailer();
        for (_key, value) in trailer.iter() {
            self.enqueue(value);
        }
    }

    fn write_standard(&mut self, st: &mut PipelineStack<'_>) -> Result<(), Error> {
        if self.config.deterministic_id {
            st.activate_md5();
        }
        self.write_header(st)?;
        w(st, self.config.extra_header_text.as_bytes())?;

        self.enqueue_objects_standard();
        let mut index = 0;
        while index < self.object_queue.len() {
            let oref = self.object_queue[index];
            index += 1;
            self.write_object(st, oref)?;
        }
        if self.config.encryption.is_some() {
            self.write_encryption_dictionary(st)?;
        }

        let xref_offset = st.count();
        if self.object_stream_to_objects.is_empty() {
            self.write_xref_table(st, TrailerKind::Normal, 0, self.next_objid - 1,
                self.next_objid, 0, false, 0, 0, 0, 0)?;
        } else {
            let xref_id = self.next_objid;
            self.next_objid += 1;
            self.write_xref_stream(st, xref_id, xref_id, xref_offset, TrailerKind::Normal,
                0, xref_id, self.next_objid, 0, 0, 0, 0, false, 0)?;
        }
        w(st, format!("startxref\n{xref_offset}\n%%EOF\n"))
    }

    fn write_linearized(&mut self, out: &mut dyn Write) -> Result<(), Error> {
        let doc = self.document;
        let skip_filter_keys = self.config.decode_level != DecodeLevel::None;
        let mut usage = plan::optimize(doc, skip_filter_keys)?;
        if !self.object_stream_to_objects.is_empty() {
            let mut containers = BTreeMap::new();
            for (&container, members) in &self.object_stream_to_objects {
                for oref in members {
                    containers.insert(oref.num, container);
                }
            }
            usage.filter_compressed_objects(&containers);
        }
        let lin = plan::calculate(doc, &usage)?;
        let npages = lin.pages.len();

        // output numbering: second half first, then the first half
        let second_half_uncompressed =
            (lin.part7.len() + lin.part8.len() + lin.part9.len()) as ObjNum;
        let second_half_first_obj: ObjNum = 1;
        let after_second_half = second_half_first_obj + second_half_uncompressed;
        self.next_objid = after_second_half;
        let need_xref_stream = !self.streams_empty;
        let mut second_half_xref = 0;
        if need_xref_stream {
            second_half_xref = self.next_objid;
            self.next_objid += 1;
        }
        for oref in lin.part7.iter().chain(&lin.part8).chain(&lin.part9).copied()
                .collect::<Vec<_>>() {
            self.assign_compressed_numbers(oref.num);
        }
        let second_half_end = self.next_objid - 1;
        let second_trailer_size = self.next_objid;

        let first_half_start = self.next_objid;
        let lindict_id = self.next_objid;
        self.next_objid += 1;
        let mut first_half_xref = 0;
        if need_xref_stream {
            first_half_xref = self.next_objid;
            self.next_objid += 1;
        }
        let part4_first_obj = self.next_objid;
        self.next_objid += lin.part4.len() as ObjNum;
        let after_part4 = self.next_objid;
        if self.config.encryption.is_some() {
            self.encryption_dict_objid = self.next_objid;
            self.next_objid += 1;
        }
        let hint_id = self.next_objid;
        self.next_objid += 1;
        let part6_first_obj = self.next_objid;
        self.next_objid += lin.part6.len() as ObjNum;
        let after_part6 = self.next_objid;
        for oref in lin.part4.iter().chain(&lin.part6).copied().collect::<Vec<_>>() {
            self.assign_compressed_numbers(oref.num);
        }
        let first_half_end = self.next_objid - 1;
        let first_trailer_size = self.next_objid;

        let part4_end_marker = lin.part4.last().copied()
            .ok_or(Error::Parse("linearization requires a document catalog"))?;
        let part6_end_marker = lin.part6.last().copied()
            .ok_or(Error::Parse("linearization requires at least one page"))?;

        self.next_objid = part4_first_obj;
        self.enqueue_part(&lin.part4);
        if self.next_objid != after_part4 {
            return Err(Error::Data("document part object count mismatch (part 4)".into()));
        }
        self.next_objid = part6_first_obj;
        self.enqueue_part(&lin.part6);
        if self.next_objid != after_part6 {
            return Err(Error::Data("document part object count mismatch (part 6)".into()));
        }
        self.next_objid = second_half_first_obj;
        self.enqueue_part(&lin.part7);
        self.enqueue_part(&lin.part8);
        self.enqueue_part(&lin.part9);
        if self.next_objid != after_second_half {
            return Err(Error::Data("document part object count mismatch (second half)".into()));
        }

        let mut file_size: u64 = 0;
        let mut part6_end_offset: u64 = 0;
        let mut first_half_max_obj_offset: u64 = 0;
        let mut second_xref_offset: u64 = 0;
        let mut space_before_zero: u64 = 0;
        let mut first_xref_end: u64 = 0;
        let mut second_xref_end: u64 = 0;
        let mut hint_length: u64 = 0;
        let mut hint_buffer = Vec::new();

        for pass in 1..=2u8 {
            let mut discard_st;
            let mut out_st;
            let st: &mut PipelineStack<'_> = if pass == 1 {
                discard_st = PipelineStack::discard();
                if self.config.deterministic_id {
                    discard_st.activate_md5();
                }
                &mut discard_st
            } else {
                out_st = PipelineStack::new(&mut *out);
                &mut out_st
            };

            self.write_header(st)?;

            // the linearization parameter dictionary, values known only in pass 2
            let pos = st.count();
            self.open_object(st, lindict_id)?;
            w(st, "<<")?;
            if pass == 2 {
                let hint_offset = self.new_obj.get(hint_id).xref.offset().unwrap_or(0);
                w(st, format!(" /Linearized 1 /L {}", file_size + hint_length))?;
                w(st, format!(" /H [ {hint_offset} {hint_length} ]"))?;
                w(st, format!(" /O {}", self.obj.renumber(lin.first_page_object.num)))?;
                w(st, format!(" /E {}", part6_end_offset + hint_length))?;
                w(st, format!(" /N {npages}"))?;
                w(st, format!(" /T {}", space_before_zero + hint_length))?;
            }
            w(st, " >>")?;
            self.close_object(st, lindict_id)?;
            let consumed = st.count() - pos;
            assert!(consumed <= LINDICT_PAD, "linearization dictionary overflow");
            spaces(st, LINDICT_PAD - consumed)?;
            w(st, "\n")?;
            w(st, self.config.extra_header_text.as_bytes())?;

            let first_xref_offset = st.count();
            let hint_offset = if pass == 2 {
                self.new_obj.get(hint_id).xref.offset().unwrap_or(0)
            } else {
                0
            };
            if need_xref_stream {
                if pass == 1 {
                    // any offset fits in four bytes; the real bound is measured below
                    first_half_max_obj_offset = 1 << 25;
                }
                let pos = st.count();
                self.write_xref_stream(st, first_half_xref, first_half_end,
                    first_half_max_obj_offset, TrailerKind::LinFirst, first_half_start,
                    first_half_end, first_trailer_size, hint_length + second_xref_offset,
                    hint_id, hint_offset, hint_length, pass == 1, pass)?;
                let endpos = st.count();
                if pass == 1 {
                    spaces(st, xref_stream_padding(endpos - pos))?;
                    first_xref_end = st.count();
                } else {
                    assert!(endpos <= first_xref_end, "insufficient cross-reference padding");
                    spaces(st, first_xref_end - endpos)?;
                }
                w(st, "\n")?;
            } else {
                self.write_xref_table(st, TrailerKind::LinFirst, first_half_start,
                    first_half_end, first_trailer_size, hint_length + second_xref_offset,
                    pass == 1, hint_id, hint_offset, hint_length, pass)?;
                w(st, "startxref\n0\n%%EOF\n")?;
            }

            for index in 0..self.object_queue.len() {
                let oref = self.object_queue[index];
                if oref == part6_end_marker {
                    first_half_max_obj_offset = st.count();
                }
                self.write_object(st, oref)?;
                if oref == part4_end_marker {
                    if self.config.encryption.is_some() {
                        self.write_encryption_dictionary(st)?;
                    }
                    if pass == 1 {
                        self.new_obj.at_mut(hint_id).xref =
                            Record::Used { gen: 0, offset: st.count() };
                    } else {
                        w(st, &hint_buffer)?;
                    }
                }
                if oref == part6_end_marker {
                    part6_end_offset = st.count();
                }
            }

            second_xref_offset = st.count();
            if need_xref_stream {
                let pos = st.count();
                space_before_zero = self.write_xref_stream(st, second_half_xref,
                    self.next_objid - 1, second_xref_offset, TrailerKind::LinSecond, 0,
                    second_half_end, second_trailer_size, 0, 0, 0, 0, pass == 1, pass)?;
                let endpos = st.count();
                if pass == 1 {
                    spaces(st, xref_stream_padding(endpos - pos))?;
                    w(st, "\n")?;
                    second_xref_end = st.count();
                } else {
                    let target = second_xref_end + hint_length;
                    assert!(endpos + 1 <= target, "insufficient cross-reference padding");
                    spaces(st, target - 1 - endpos)?;
                    w(st, "\n")?;
                    assert_eq!(st.count(), target, "second-half layout diverged between passes");
                }
            } else {
                space_before_zero = self.write_xref_table(st, TrailerKind::LinSecond, 0,
                    second_half_end, second_trailer_size, 0, false, 0, 0, 0, pass)?;
            }
            w(st, format!("startxref\n{first_xref_offset}\n%%EOF\n"))?;

            if pass == 1 {
                if self.config.deterministic_id {
                    self.deterministic_id_data = st.hex_digest();
                }
                file_size = st.count();
                // generate the hint stream off to the side, preserving its file offset
                let hint_file_offset = self.new_obj.get(hint_id).xref.offset().unwrap_or(0);
                let pp = st.activate_buffer();
                self.write_hint_stream(st, hint_id, &lin)?;
                hint_buffer = st.pop(pp);
                hint_length = hint_buffer.len() as u64;
                self.new_obj.at_mut(hint_id).xref =
                    Record::Used { gen: 0, offset: hint_file_offset };
            }
        }
        Ok(())
    }
}
