use super::types::*;

/// Location and version of the `%PDF-M.m` marker.
///
/// Files may carry garbage before the marker; every offset stored in the file is then relative
/// to [`start`](Self::start), not to byte zero. Available through
/// [`parser::FileParser::header()`](crate::parser::FileParser::header).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// The byte offset of the `%PDF` marker from start of file data.
    pub start: Offset,
    /// Version (major, minor).
    pub version: (u8, u8),
}

impl Header {
    pub(crate) const MAGIC: &'static [u8] = b"%PDF-";

    /// Length of the complete marker including the version digits.
    pub(crate) const FULL_LEN: usize = Self::MAGIC.len() + 3;

    /// Tries to read a complete marker from the start of `window`.
    pub(crate) fn from_window(window: &[u8], start: Offset) -> Option<Header> {
        if window.len() < Self::FULL_LEN || &window[..Self::MAGIC.len()] != Self::MAGIC {
            return None;
        }
        match window[Self::MAGIC.len()..Self::FULL_LEN] {
            [major @ b'0'..=b'9', b'.', minor @ b'0'..=b'9'] =>
                Some(Header { start, version: (major - b'0', minor - b'0') }),
            _ => None
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_window() {
        assert_eq!(Header::from_window(b"%PDF-1.7\n...", 3),
            Some(Header { start: 3, version: (1, 7) }));
        assert_eq!(Header::from_window(b"%PDF-2.0", 0),
            Some(Header { start: 0, version: (2, 0) }));
        // short, malformed version, wrong magic
        assert_eq!(Header::from_window(b"%PDF-1.", 0), None);
        assert_eq!(Header::from_window(b"%PDF-1x7rest", 0), None);
        assert_eq!(Header::from_window(b"%!PS-Adobe-1", 0), None);
    }
}
