use super::bp::ByteProvider;
use super::cc::CharClass;

pub type Token = Vec<u8>;

/// Splits input into PDF tokens. Comments and runs of whitespace both collapse into a single
/// space token, which content-oriented callers skip via
/// [`read_token_nonempty`](Self::read_token_nonempty).
pub trait Tokenizer: ByteProvider {
    fn read_token(&mut self) -> std::io::Result<Token> {
        let first = self.next_or_eof()?;
        match CharClass::of(first) {
            CharClass::Space => {
                self.skip_ws()?;
                Ok(vec![b' '])
            },
            CharClass::Delim if first == b'%' => {
                // a comment runs to the end of line, the terminator itself is left unread
                while self.next_if(|c| c != b'\n' && c != b'\r').is_some() { }
                Ok(vec![b' '])
            },
            CharClass::Delim => {
                // << and >> are the only two-byte delimiters
                if (first == b'<' || first == b'>') && self.next_if(|c| c == first).is_some() {
                    Ok(vec![first, first])
                } else {
                    Ok(vec![first])
                }
            },
            CharClass::Reg => {
                let mut token = vec![first];
                while let Some(c) = self.next_if(|c| CharClass::of(c) == CharClass::Reg) {
                    token.push(c);
                }
                Ok(token)
            }
        }
    }

    fn read_token_nonempty(&mut self) -> std::io::Result<Token> {
        loop {
            let token = self.read_token()?;
            if token != b" " {
                return Ok(token);
            }
        }
    }
}

impl<T: ByteProvider> Tokenizer for T { }


#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_token_classes() {
        let mut tkn = Cursor::new("12 0 obj<</Length 3>>");
        assert_eq!(tkn.read_token().unwrap(), b"12");
        assert_eq!(tkn.read_token().unwrap(), b" ");
        assert_eq!(tkn.read_token().unwrap(), b"0");
        assert_eq!(tkn.read_token_nonempty().unwrap(), b"obj");
        assert_eq!(tkn.read_token().unwrap(), b"<<");
        assert_eq!(tkn.read_token().unwrap(), b"/");
        assert_eq!(tkn.read_token().unwrap(), b"Length");
        assert_eq!(tkn.read_token_nonempty().unwrap(), b"3");
        assert_eq!(tkn.read_token().unwrap(), b">>");
        assert!(tkn.read_token().is_err());
    }

    #[test]
    fn test_single_angle_brackets() {
        let mut tkn = Cursor::new("<41>");
        assert_eq!(tkn.read_token().unwrap(), b"<");
        assert_eq!(tkn.read_token().unwrap(), b"41");
        assert_eq!(tkn.read_token().unwrap(), b">");
    }

    #[test]
    fn test_comments_collapse() {
        let mut tkn = Cursor::new("A%skipped\rB% another\nC");
        assert_eq!(tkn.read_token_nonempty().unwrap(), b"A");
        assert_eq!(tkn.read_token_nonempty().unwrap(), b"B");
        assert_eq!(tkn.read_token_nonempty().unwrap(), b"C");

        // the comment token and the line end each yield one separate space
        let mut tkn = Cursor::new("A%1\nB");
        assert_eq!(tkn.read_token().unwrap(), b"A");
        assert_eq!(tkn.read_token().unwrap(), b" ");
        assert_eq!(tkn.read_token().unwrap(), b" ");
        assert_eq!(tkn.read_token().unwrap(), b"B");
    }
}
