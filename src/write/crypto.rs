use crate::base::*;

/// A symmetric cipher transforming a byte string under a given key.
///
/// RC4 is provided by [`Rc4`]; AES implementations are supplied by the caller (the writer only
/// needs the transform and the block-padding arithmetic).
pub trait Crypter {
    fn process(&self, key: &[u8], data: &[u8]) -> Vec<u8>;
}

/// Plain RC4.
pub struct Rc4;

impl Crypter for Rc4 {
    fn process(&self, key: &[u8], data: &[u8]) -> Vec<u8> {
        let mut s: [u8; 256] = std::array::from_fn(|i| i as u8);
        let mut j = 0u8;
        for i in 0..256 {
            j = j.wrapping_add(s[i]).wrapping_add(key[i % key.len()]);
            s.swap(i, j as usize);
        }
        let mut out = Vec::with_capacity(data.len());
        let (mut i, mut j) = (0u8, 0u8);
        for byte in data {
            i = i.wrapping_add(1);
            j = j.wrapping_add(s[i as usize]);
            s.swap(i as usize, j as usize);
            let k = s[(s[i as usize].wrapping_add(s[j as usize])) as usize];
            out.push(byte ^ k);
        }
        out
    }
}

/// The security-handler parameters the writer needs to emit an `/Encrypt` dictionary and derive
/// per-object keys. Password processing happens elsewhere; these values arrive precomputed.
#[derive(Debug, Clone)]
pub struct EncryptionParams {
    pub v: u8,
    pub r: u8,
    /// File encryption key length in bytes.
    pub key_bytes: usize,
    /// Permission bits, as stored in `/P`.
    pub p: i32,
    pub o: Vec<u8>,
    pub u: Vec<u8>,
    pub oe: Vec<u8>,
    pub ue: Vec<u8>,
    pub perms: Vec<u8>,
    pub encrypt_metadata: bool,
    pub use_aes: bool,
}

impl EncryptionParams {
    /// The minimum PDF version able to express these parameters.
    pub fn min_version(&self) -> (u8, u8) {
        match self.r {
            6.. => (1, 7),
            5 => (1, 7),
            4 => if self.use_aes { (1, 6) } else { (1, 5) },
            3 => (1, 4),
            _ => (1, 3),
        }
    }
}

/// Active encryption state: parameters, the file key, and the cipher.
pub struct Encryption {
    pub params: EncryptionParams,
    key: Vec<u8>,
    crypter: Box<dyn Crypter>,
}

impl Encryption {
    /// RC4 encryption (R2-R4 without `/AESV2`).
    pub fn rc4(params: EncryptionParams, key: Vec<u8>) -> Result<Encryption, Error> {
        if params.use_aes {
            return Err(Error::Usage("AES parameters require an AES crypter".into()));
        }
        Ok(Encryption { params, key, crypter: Box::new(Rc4) })
    }

    /// Encryption with a caller-supplied cipher (AES).
    pub fn with_crypter(params: EncryptionParams, key: Vec<u8>, crypter: Box<dyn Crypter>)
            -> Encryption {
        Encryption { params, key, crypter }
    }

    /// The key used for a particular object.
    ///
    /// For V5 it is the file key itself; below that, the file key is salted with the low bytes of
    /// the object and generation numbers (and `sAlT` for AES) and digested.
    pub fn data_key(&self, num: types::ObjNum, gen: types::ObjGen) -> Vec<u8> {
        if self.params.v >= 5 {
            return self.key.clone();
        }
        let mut salted = self.key.clone();
        salted.extend_from_slice(&(num as u32).to_le_bytes()[..3]);
        salted.extend_from_slice(&gen.to_le_bytes());
        if self.params.use_aes {
            salted.extend_from_slice(b"sAlT");
        }
        let digest = md5::compute(&salted);
        let len = std::cmp::min(self.key.len() + 5, 16);
        digest.0[..len].to_vec()
    }

    pub fn process(&self, num: types::ObjNum, gen: types::ObjGen, data: &[u8]) -> Vec<u8> {
        self.crypter.process(&self.data_key(num, gen), data)
    }

    /// Runs the crypter with an already derived object key.
    pub fn process_with_key(&self, key: &[u8], data: &[u8]) -> Vec<u8> {
        self.crypter.process(key, data)
    }

    /// The on-file length of an encrypted stream (AES adds an IV and pads to whole blocks).
    pub fn stream_length(&self, len: u64) -> u64 {
        if self.params.use_aes {
            len + 32 - (len & 15)
        } else {
            len
        }
    }

    /// Builds the `/Encrypt` dictionary. Its string values are never themselves encrypted.
    pub fn dictionary(&self) -> Dict {
        let p = &self.params;
        let mut dict = Dict::from(vec![
            (Name::from(b"Filter"), Object::new_name(b"Standard")),
            (Name::from(b"V"), Object::new_int(p.v as i64)),
            (Name::from(b"Length"), Object::new_int(p.key_bytes as i64 * 8)),
            (Name::from(b"R"), Object::new_int(p.r as i64)),
            (Name::from(b"P"), Object::new_int(p.p as i64)),
            (Name::from(b"O"), Object::String(p.o.clone())),
            (Name::from(b"U"), Object::String(p.u.clone())),
        ]);
        if p.v >= 5 {
            dict.insert(Name::from(b"OE"), Object::String(p.oe.clone()));
            dict.insert(Name::from(b"UE"), Object::String(p.ue.clone()));
            dict.insert(Name::from(b"Perms"), Object::String(p.perms.clone()));
        }
        if p.v >= 4 {
            let cfm: &[u8] = match (p.v, p.use_aes) {
                (5.., _) => b"AESV3",
                (_, true) => b"AESV2",
                (_, false) => b"V2",
            };
            dict.insert(Name::from(b"CF"), Object::Dict(Dict::from(vec![
                (Name::from(b"StdCF"), Object::Dict(Dict::from(vec![
                    (Name::from(b"AuthEvent"), Object::new_name(b"DocOpen")),
                    (Name::from(b"CFM"), Object::new_name(cfm)),
                    (Name::from(b"Length"), Object::new_int(p.key_bytes as i64)),
                ]))),
            ])));
            dict.insert(Name::from(b"StmF"), Object::new_name(b"StdCF"));
            dict.insert(Name::from(b"StrF"), Object::new_name(b"StdCF"));
            if !p.encrypt_metadata {
                dict.insert(Name::from(b"EncryptMetadata"), Object::Bool(false));
            }
        }
        dict
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    fn params(v: u8, r: u8, key_bytes: usize, use_aes: bool) -> EncryptionParams {
        EncryptionParams {
            v, r, key_bytes, p: -4, o: vec![0; 32], u: vec![0; 32],
            oe: Vec::new(), ue: Vec::new(), perms: Vec::new(),
            encrypt_metadata: true, use_aes,
        }
    }

    #[test]
    fn test_rc4_vector() {
        let out = Rc4.process(b"Key", b"Plaintext");
        assert_eq!(out, [0xBB, 0xF3, 0x16, 0xE8, 0xD9, 0x40, 0xAF, 0x0A, 0xD3]);
        // involutive
        assert_eq!(Rc4.process(b"Key", &out), b"Plaintext");
    }

    #[test]
    fn test_data_key_length() {
        let enc = Encryption::rc4(params(1, 2, 5, false), vec![7; 5]).unwrap();
        assert_eq!(enc.data_key(1, 0).len(), 10);
        let enc = Encryption::rc4(params(2, 3, 16, false), vec![7; 16]).unwrap();
        assert_eq!(enc.data_key(1, 0).len(), 16);
        // different objects get different keys
        assert_ne!(enc.data_key(1, 0), enc.data_key(2, 0));

        let enc = Encryption::with_crypter(params(5, 6, 32, true), vec![9; 32], Box::new(Rc4));
        assert_eq!(enc.data_key(1, 0), vec![9; 32]);
    }

    #[test]
    fn test_aes_stream_length() {
        let enc = Encryption::with_crypter(params(4, 4, 16, true), vec![0; 16], Box::new(Rc4));
        assert_eq!(enc.stream_length(0), 32);
        assert_eq!(enc.stream_length(15), 32);
        assert_eq!(enc.stream_length(16), 48);
        assert_eq!(enc.stream_length(17), 48);
        let rc4 = Encryption::rc4(params(2, 3, 16, false), vec![0; 16]).unwrap();
        assert_eq!(rc4.stream_length(17), 17);
    }

    #[test]
    fn test_min_version() {
        assert_eq!(params(1, 2, 5, false).min_version(), (1, 3));
        assert_eq!(params(2, 3, 16, false).min_version(), (1, 4));
        assert_eq!(params(4, 4, 16, false).min_version(), (1, 5));
        assert_eq!(params(4, 4, 16, true).min_version(), (1, 6));
        assert_eq!(params(5, 6, 32, true).min_version(), (1, 7));
    }

    #[test]
    fn test_encrypt_dictionary() {
        let enc = Encryption::rc4(params(2, 3, 16, false), vec![0; 16]).unwrap();
        let dict = enc.dictionary();
        assert_eq!(dict.lookup(b"Filter"), &Object::new_name(b"Standard"));
        assert_eq!(dict.lookup(b"Length"), &Object::new_int(128));
        assert!(!dict.contains_key(b"CF"));

        let enc = Encryption::with_crypter(params(5, 6, 32, true), vec![0; 32], Box::new(Rc4));
        let dict = enc.dictionary();
        let cf = dict.lookup(b"CF").as_dict().unwrap();
        let stdcf = cf.lookup(b"StdCF").as_dict().unwrap();
        assert_eq!(stdcf.lookup(b"CFM"), &Object::new_name(b"AESV3"));
        assert!(dict.contains_key(b"Perms"));
    }
}
