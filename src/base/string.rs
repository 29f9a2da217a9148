use std::fmt::Formatter;
use std::fmt::Write;

/// Literal form (`(...)`) with control characters escaped.
pub(crate) fn literal_string(s: &[u8]) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('(');
    for c in s {
        match c {
            b'\x0a' => out.push_str("\\n"),
            b'\x0d' => out.push_str("\\r"),
            b'\x09' => out.push_str("\\t"),
            b'\x08' => out.push_str("\\b"),
            b'\x0c' => out.push_str("\\f"),
            b'(' => out.push_str("\\("),
            b')' => out.push_str("\\)"),
            b'\\' => out.push_str("\\\\"),
            b'\x20' ..= b'\x7E' => out.push(*c as char),
            _ => write!(out, "\\{c:03o}").expect("writing into a String can not fail")
        }
    }
    out.push(')');
    out
}

/// Hex form (`<4E6F76>`), used for encrypted string values and file identifiers.
pub(crate) fn hex_string(s: &[u8]) -> String {
    let mut out = String::with_capacity(2 * s.len() + 2);
    out.push('<');
    for c in s {
        write!(out, "{c:02x}").expect("writing into a String can not fail");
    }
    out.push('>');
    out
}

pub(crate) fn format_string(f: &mut Formatter<'_>, s: &[u8]) -> std::fmt::Result {
    f.write_str(&literal_string(s))
}

pub(crate) fn format_hex_string(f: &mut Formatter<'_>, s: &[u8]) -> std::fmt::Result {
    f.write_str(&hex_string(s))
}
