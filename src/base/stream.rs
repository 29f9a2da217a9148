use std::io::Read;

use super::*;

/// A PDF stream object with its data held in memory.
///
/// The data is kept exactly as it would appear between `stream` and `endstream`, so it
/// corresponds to the `/Filter` and `/DecodeParms` entries of the dictionary. A stream created
/// in memory with no `/Filter` simply holds plain data.
#[derive(Debug, PartialEq, Clone)]
pub struct Stream {
    /// The stream dictionary.
    pub dict: Dict,
    /// The raw (possibly filtered) stream data.
    pub data: Vec<u8>
}

impl Stream {
    pub fn new(dict: Dict, data: Vec<u8>) -> Stream {
        Stream { dict, data }
    }

    /// The filters of this stream in decoding order, or an error for filters this crate can not
    /// decode.
    pub fn filters(&self) -> Result<Vec<crate::codecs::Filter>, Error> {
        crate::codecs::to_filters(self.dict.lookup(b"Filter"))
    }

    /// Decodes the stream data according to `/Filter` and `/DecodeParms`.
    pub fn decoded_data(&self) -> Result<Vec<u8>, Error> {
        let filters = self.filters()?;
        let params = match self.dict.lookup(b"DecodeParms") {
            Object::Dict(dict) => Some(dict),
            Object::Null => None,
            _ => return Err(Error::Parse("malformed /DecodeParms"))
        };
        let mut reader = crate::codecs::decode(&self.data[..], &filters, params);
        let mut out = Vec::new();
        reader.read_to_end(&mut out).map_err(|err| Error::Data(format!("stream decode: {err}")))?;
        Ok(out)
    }

    /// True if the stream carries no filters at all.
    pub fn is_plain(&self) -> bool {
        matches!(self.dict.lookup(b"Filter"), Object::Null)
    }
}
