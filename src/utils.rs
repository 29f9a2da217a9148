pub fn parse_num<T: std::str::FromStr>(bstr: &[u8]) -> Option<T> {
    std::str::from_utf8(bstr).ok()?
        .parse::<T>().ok()
}

/// Like [`parse_num`], but accepts canonical digit strings only: no sign, no dot, no exponent,
/// no superfluous leading zeros.
pub fn parse_int_strict<T: std::str::FromStr>(bstr: &[u8]) -> Option<T> {
    if bstr.is_empty() || !bstr.iter().all(u8::is_ascii_digit) {
        return None;
    }
    if bstr[0] == b'0' && bstr.len() > 1 {
        return None;
    }
    parse_num(bstr)
}

pub fn hex_value(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None
    }
}
