use crate::base::Error;
use crate::write::crypto::Encryption;

/// How stream data is carried into the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamDataMode {
    /// Decode whatever the decode level allows and write it uncompressed.
    Uncompress,
    /// Keep filtered data as is, compress plain streams.
    #[default]
    Preserve,
    /// Decode whatever the decode level allows and recompress with Flate.
    Compress,
}

/// Which filters the writer may strip when it decides to rewrite stream data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum DecodeLevel {
    None,
    #[default]
    Generalized,
    Specialized,
    All,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ObjStreamMode {
    Disable,
    #[default]
    Preserve,
    Generate,
}

/// Fully reconciled writer settings. Produced by [`WriterConfig::builder`]; the raw fields stay
/// private so every instance has been through the consistency checks.
pub struct WriterConfig {
    pub(crate) linearize: bool,
    pub(crate) qdf: bool,
    pub(crate) pclm: bool,
    pub(crate) normalize_content: bool,
    pub(crate) compress_streams: bool,
    pub(crate) decode_level: DecodeLevel,
    pub(crate) object_stream_mode: ObjStreamMode,
    pub(crate) recompress_flate: bool,
    pub(crate) newline_before_endstream: bool,
    pub(crate) preserve_unreferenced: bool,
    pub(crate) static_id: bool,
    pub(crate) deterministic_id: bool,
    pub(crate) min_version: Option<(u8, u8)>,
    pub(crate) force_version: Option<(u8, u8)>,
    pub(crate) extra_header_text: String,
    pub(crate) encryption: Option<Encryption>,
}

impl WriterConfig {
    pub fn builder() -> WriterConfigBuilder {
        WriterConfigBuilder::default()
    }
}

impl Default for WriterConfig {
    fn default() -> Self {
        WriterConfig::builder().build().unwrap()
    }
}

/// Collects writer settings. Conflicting combinations fail in the setter itself, so the CLI can
/// report a bad flag as soon as it is parsed; [`build`](Self::build) resolves what remains.
///
/// Tri-state options (`Option<bool>` and friends) distinguish "caller said so" from "pick the
/// mode's default", which matters for QDF where several defaults flip.
#[derive(Default)]
pub struct WriterConfigBuilder {
    linearize: bool,
    qdf: bool,
    pclm: bool,
    normalize_content: Option<bool>,
    stream_data: Option<StreamDataMode>,
    decode_level: Option<DecodeLevel>,
    object_stream_mode: Option<ObjStreamMode>,
    recompress_flate: bool,
    newline_before_endstream: bool,
    preserve_unreferenced: bool,
    static_id: bool,
    deterministic_id: bool,
    min_version: Option<(u8, u8)>,
    force_version: Option<(u8, u8)>,
    extra_header_text: String,
    encryption: Option<Encryption>,
}

impl WriterConfigBuilder {
    /// Output modes are claimed at most once; a second claim, even of the same mode, errors
    /// right away rather than at build time.
    fn claim_mode(&self) -> Result<(), Error> {
        if self.linearize || self.qdf || self.pclm {
            return Err(Error::Usage(
                "linearized, QDF and PCLm output are mutually exclusive".into()));
        }
        Ok(())
    }

    pub fn linearize(mut self, flag: bool) -> Result<Self, Error> {
        if flag {
            self.claim_mode()?;
        }
        self.linearize = flag;
        Ok(self)
    }

    pub fn qdf(mut self, flag: bool) -> Result<Self, Error> {
        if flag {
            self.claim_mode()?;
        }
        self.qdf = flag;
        Ok(self)
    }

    pub fn pclm(mut self, flag: bool) -> Result<Self, Error> {
        if flag {
            self.claim_mode()?;
            if self.encryption.is_some() {
                return Err(Error::Usage("PCLm output cannot be encrypted".into()));
            }
        }
        self.pclm = flag;
        Ok(self)
    }

    pub fn normalize_content(mut self, flag: bool) -> Self {
        self.normalize_content = Some(flag);
        self
    }

    pub fn stream_data(mut self, mode: StreamDataMode) -> Self {
        self.stream_data = Some(mode);
        self
    }

    pub fn decode_level(mut self, level: DecodeLevel) -> Self {
        self.decode_level = Some(level);
        self
    }

    pub fn object_streams(mut self, mode: ObjStreamMode) -> Self {
        self.object_stream_mode = Some(mode);
        self
    }

    pub fn recompress_flate(mut self, flag: bool) -> Self {
        self.recompress_flate = flag;
        self
    }

    pub fn newline_before_endstream(mut self, flag: bool) -> Self {
        self.newline_before_endstream = flag;
        self
    }

    pub fn preserve_unreferenced(mut self, flag: bool) -> Self {
        self.preserve_unreferenced = flag;
        self
    }

    /// Use a fixed file ID instead of a digest-derived one. Output becomes reproducible between
    /// runs, which is only suitable for testing.
    pub fn static_id(mut self, flag: bool) -> Result<Self, Error> {
        if flag && self.deterministic_id {
            return Err(Error::Usage(
                "static and deterministic IDs are mutually exclusive".into()));
        }
        self.static_id = flag;
        Ok(self)
    }

    /// Derive the file ID from the output contents rather than from time and randomness.
    pub fn deterministic_id(mut self, flag: bool) -> Result<Self, Error> {
        if flag && self.static_id {
            return Err(Error::Usage(
                "static and deterministic IDs are mutually exclusive".into()));
        }
        if flag && self.encryption.is_some() {
            return Err(Error::Usage(
                "deterministic IDs are incompatible with encryption".into()));
        }
        self.deterministic_id = flag;
        Ok(self)
    }

    pub fn min_version(mut self, version: (u8, u8)) -> Self {
        self.min_version = Some(version);
        self
    }

    pub fn force_version(mut self, version: (u8, u8)) -> Self {
        self.force_version = Some(version);
        self
    }

    pub fn extra_header_text(mut self, text: &str) -> Self {
        self.extra_header_text = text.to_owned();
        self
    }

    pub fn encrypt(mut self, encryption: Encryption) -> Result<Self, Error> {
        if self.deterministic_id {
            return Err(Error::Usage(
                "deterministic IDs are incompatible with encryption".into()));
        }
        if self.pclm {
            return Err(Error::Usage("PCLm output cannot be encrypted".into()));
        }
        self.encryption = Some(encryption);
        Ok(self)
    }

    pub fn build(self) -> Result<WriterConfig, Error> {
        let stream_data = self.stream_data.unwrap_or_default();
        let mut decode_level = self.decode_level.unwrap_or(match stream_data {
            StreamDataMode::Preserve => DecodeLevel::None,
            _ => DecodeLevel::Generalized,
        });
        let mut compress = stream_data == StreamDataMode::Compress
            || (stream_data == StreamDataMode::Preserve && !self.qdf);
        let mut normalize = self.normalize_content.unwrap_or(false);
        let mut object_stream_mode = self.object_stream_mode.unwrap_or_default();

        if self.qdf {
            // QDF output is meant to be read and edited by hand.
            if self.normalize_content.is_none() {
                normalize = true;
            }
            if self.decode_level.is_none() {
                decode_level = DecodeLevel::Generalized;
            }
            compress = false;
            if self.object_stream_mode.is_none() {
                object_stream_mode = ObjStreamMode::Disable;
            }
        }
        if self.pclm {
            decode_level = DecodeLevel::None;
            compress = false;
            normalize = false;
            object_stream_mode = ObjStreamMode::Disable;
        }
        if normalize && self.encryption.is_some() {
            return Err(Error::Usage(
                "content normalization cannot be combined with encryption".into()));
        }

        Ok(WriterConfig {
            linearize: self.linearize,
            qdf: self.qdf,
            pclm: self.pclm,
            normalize_content: normalize,
            compress_streams: compress,
            decode_level,
            object_stream_mode,
            recompress_flate: self.recompress_flate,
            newline_before_endstream: self.newline_before_endstream || self.pclm,
            preserve_unreferenced: self.preserve_unreferenced,
            static_id: self.static_id,
            deterministic_id: self.deterministic_id,
            min_version: self.min_version,
            force_version: self.force_version,
            extra_header_text: self.extra_header_text,
            encryption: self.encryption,
        })
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::write::crypto::EncryptionParams;

    #[test]
    fn test_defaults() {
        let config = WriterConfig::default();
        assert!(!config.linearize);
        assert!(config.compress_streams);
        assert_eq!(config.decode_level, DecodeLevel::None);
        assert_eq!(config.object_stream_mode, ObjStreamMode::Preserve);
        assert!(!config.normalize_content);
    }

    #[test]
    fn test_qdf_flips_defaults() {
        let config = WriterConfig::builder().qdf(true).unwrap().build().unwrap();
        assert!(config.normalize_content);
        assert!(!config.compress_streams);
        assert_eq!(config.decode_level, DecodeLevel::Generalized);
        assert_eq!(config.object_stream_mode, ObjStreamMode::Disable);

        // explicit choices survive
        let config = WriterConfig::builder().qdf(true).unwrap()
            .normalize_content(false)
            .object_streams(ObjStreamMode::Generate)
            .build().unwrap();
        assert!(!config.normalize_content);
        assert_eq!(config.object_stream_mode, ObjStreamMode::Generate);
    }

    #[test]
    fn test_pclm_overrides() {
        let config = WriterConfig::builder().pclm(true).unwrap()
            .stream_data(StreamDataMode::Compress)
            .build().unwrap();
        assert_eq!(config.decode_level, DecodeLevel::None);
        assert!(!config.compress_streams);
        assert!(config.newline_before_endstream);
    }

    #[test]
    fn test_exclusive_modes() {
        assert!(WriterConfig::builder().qdf(true).unwrap().linearize(true).is_err());
        assert!(WriterConfig::builder().pclm(true).unwrap().linearize(true).is_err());
        assert!(WriterConfig::builder().static_id(true).unwrap().deterministic_id(true).is_err());
    }

    #[test]
    fn test_repeated_mode_rejected() {
        let builder = WriterConfig::builder().qdf(true).unwrap();
        assert!(matches!(builder.qdf(true), Err(Error::Usage(_))));
        let builder = WriterConfig::builder().linearize(true).unwrap();
        assert!(matches!(builder.linearize(true), Err(Error::Usage(_))));
        // turning a mode off frees the slot again
        let builder = WriterConfig::builder().qdf(true).unwrap().qdf(false).unwrap();
        assert!(builder.linearize(true).is_ok());
    }

    fn sample_encryption() -> Encryption {
        let params = EncryptionParams {
            v: 2, r: 3, key_bytes: 16, p: -4,
            o: vec![0x41; 32], u: vec![0x42; 32],
            oe: Vec::new(), ue: Vec::new(), perms: Vec::new(),
            encrypt_metadata: true, use_aes: false,
        };
        Encryption::rc4(params, vec![7u8; 16]).unwrap()
    }

    #[test]
    fn test_deterministic_id_excludes_encryption() {
        assert!(matches!(
            WriterConfig::builder().deterministic_id(true).unwrap().encrypt(sample_encryption()),
            Err(Error::Usage(_))));
        assert!(matches!(
            WriterConfig::builder().encrypt(sample_encryption()).unwrap().deterministic_id(true),
            Err(Error::Usage(_))));
    }

    #[test]
    fn test_stream_data_sugar() {
        let config = WriterConfig::builder()
            .stream_data(StreamDataMode::Uncompress).build().unwrap();
        assert!(!config.compress_streams);
        assert_eq!(config.decode_level, DecodeLevel::Generalized);

        let config = WriterConfig::builder()
            .stream_data(StreamDataMode::Compress).build().unwrap();
        assert!(config.compress_streams);
        assert_eq!(config.decode_level, DecodeLevel::Generalized);
    }
}
