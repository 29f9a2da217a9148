use crate::base::Error;

/// Minimum number of bits needed to represent `val` (0 for 0).
pub fn nbits(val: u64) -> usize {
    (64 - val.leading_zeros()) as usize
}

/// Packs values MSB-first into a byte buffer. Hint tables are written through this.
#[derive(Default)]
pub struct BitWriter {
    out: Vec<u8>,
    cur: u8,
    filled: usize,
}

impl BitWriter {
    pub fn new() -> BitWriter {
        BitWriter::default()
    }

    /// Appends the low `bits` bits of `val`, most significant first. The value must fit.
    pub fn write_bits(&mut self, val: u64, bits: usize) {
        assert!(bits <= 64);
        if bits < 64 {
            assert!(val >> bits == 0, "value does not fit into {bits} bits");
        }
        for i in (0..bits).rev() {
            self.cur = (self.cur << 1) | ((val >> i) & 1) as u8;
            self.filled += 1;
            if self.filled == 8 {
                self.out.push(self.cur);
                self.cur = 0;
                self.filled = 0;
            }
        }
    }

    /// Pads the current partial byte with zero bits.
    pub fn flush(&mut self) {
        if self.filled > 0 {
            self.out.push(self.cur << (8 - self.filled));
            self.cur = 0;
            self.filled = 0;
        }
    }

    pub fn byte_len(&mut self) -> usize {
        self.flush();
        self.out.len()
    }

    pub fn into_bytes(mut self) -> Vec<u8> {
        self.flush();
        self.out
    }
}

/// Reads values MSB-first from a byte slice, the inverse of [`BitWriter`].
pub struct BitReader<'a> {
    data: &'a [u8],
    pos: usize,
    bit: usize,
}

impl<'a> BitReader<'a> {
    pub fn new(data: &'a [u8]) -> BitReader<'a> {
        BitReader { data, pos: 0, bit: 0 }
    }

    pub fn read_bits(&mut self, bits: usize) -> Result<u64, Error> {
        assert!(bits <= 64);
        let mut val = 0u64;
        for _ in 0..bits {
            let byte = *self.data.get(self.pos)
                .ok_or(Error::Parse("bit stream exhausted"))?;
            val = (val << 1) | ((byte >> (7 - self.bit)) & 1) as u64;
            self.bit += 1;
            if self.bit == 8 {
                self.bit = 0;
                self.pos += 1;
            }
        }
        Ok(val)
    }

    pub fn skip_to_next_byte(&mut self) {
        if self.bit > 0 {
            self.bit = 0;
            self.pos += 1;
        }
    }

    /// Current position in bytes, counting a partial byte as consumed.
    pub fn byte_pos(&self) -> usize {
        self.pos + if self.bit > 0 { 1 } else { 0 }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nbits() {
        assert_eq!(nbits(0), 0);
        assert_eq!(nbits(1), 1);
        assert_eq!(nbits(2), 2);
        assert_eq!(nbits(3), 2);
        assert_eq!(nbits(4), 3);
        assert_eq!(nbits(255), 8);
        assert_eq!(nbits(256), 9);
        assert_eq!(nbits(u64::MAX), 64);
    }

    #[test]
    fn test_packing() {
        let mut w = BitWriter::new();
        w.write_bits(0b101, 3);
        w.write_bits(0b01, 2);
        w.write_bits(0b110, 3);
        w.write_bits(0xAB, 8);
        assert_eq!(w.into_bytes(), vec![0b10101110, 0xAB]);
    }

    #[test]
    fn test_flush_alignment() {
        let mut w = BitWriter::new();
        w.write_bits(0b1, 1);
        w.flush();
        w.write_bits(0b1, 1);
        assert_eq!(w.into_bytes(), vec![0b10000000, 0b10000000]);

        let mut w = BitWriter::new();
        w.write_bits(0, 0);
        w.flush();
        assert_eq!(w.into_bytes(), Vec::<u8>::new());
    }

    #[test]
    fn test_roundtrip() {
        let values = [(5u64, 3usize), (0, 1), (1023, 10), (0, 0), (77, 32)];
        let mut w = BitWriter::new();
        for &(val, bits) in &values {
            w.write_bits(val, bits);
        }
        w.flush();
        w.write_bits(3, 2);
        let bytes = w.into_bytes();

        let mut r = BitReader::new(&bytes);
        for &(val, bits) in &values {
            assert_eq!(r.read_bits(bits).unwrap(), val);
        }
        r.skip_to_next_byte();
        assert_eq!(r.read_bits(2).unwrap(), 3);
        assert!(r.read_bits(64).is_err());
    }
}
