/// Character classes as defined by the PDF lexical conventions.
#[derive(Debug, PartialEq, Clone, Copy)]
pub enum CharClass {
    /// White-space characters (NUL, TAB, LF, FF, CR, space).
    Space,
    /// Delimiters (`( ) < > [ ] { } / %`).
    Delim,
    /// Everything else ("regular" characters).
    Reg
}

impl CharClass {
    pub fn of(c: u8) -> CharClass {
        match c {
            b'\0' | b'\t' | b'\n' | b'\x0c' | b'\r' | b' ' => CharClass::Space,
            b'(' | b')' | b'<' | b'>' | b'[' | b']' | b'{' | b'}' | b'/' | b'%' => CharClass::Delim,
            _ => CharClass::Reg
        }
    }
}
