use std::io::Write;

use flate2::write::ZlibEncoder;
use flate2::Compression;

/// Anything the serializer can emit bytes into.
pub trait ByteSink {
    fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()>;
}

impl ByteSink for Vec<u8> {
    fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        self.extend_from_slice(buf);
        Ok(())
    }
}

enum Frame {
    Buffer(Vec<u8>),
    Discard(u64),
    Flate(ZlibEncoder<Vec<u8>>, u64),
}

impl Frame {
    fn count(&self) -> u64 {
        match self {
            Frame::Buffer(buf) => buf.len() as u64,
            Frame::Discard(count) => *count,
            Frame::Flate(_, count) => *count,
        }
    }
}

enum Base<'a> {
    Out(&'a mut dyn Write),
    Null,
}

/// A token for a pushed pipeline frame. Consumed by [`PipelineStack::pop()`], so a frame can
/// not be popped twice; popping out of LIFO order panics.
#[must_use]
pub struct Popper {
    id: u64,
}

/// A LIFO stack of byte sinks.
///
/// Writes go to the topmost frame: a capture buffer, a discard counter, or a Flate compressor
/// emptying into a hidden buffer. With no frames pushed, bytes flow through the optional MD5
/// digest stage into the base output. Every level counts the bytes it receives.
pub struct PipelineStack<'a> {
    base: Base<'a>,
    base_count: u64,
    frames: Vec<(u64, Frame)>,
    next_id: u64,
    md5: Option<(md5::Context, bool)>,
}

impl<'a> PipelineStack<'a> {
    pub fn new(out: &'a mut dyn Write) -> Self {
        PipelineStack { base: Base::Out(out), base_count: 0, frames: Vec::new(), next_id: 1, md5: None }
    }

    /// A stack that counts and drops everything reaching its base. Used for measuring passes.
    pub fn discard() -> Self {
        PipelineStack { base: Base::Null, base_count: 0, frames: Vec::new(), next_id: 1, md5: None }
    }

    /// Bytes received by the topmost level so far.
    pub fn count(&self) -> u64 {
        match self.frames.last() {
            Some((_, frame)) => frame.count(),
            None => self.base_count,
        }
    }

    fn push(&mut self, frame: Frame) -> Popper {
        let id = self.next_id;
        self.next_id += 1;
        self.frames.push((id, frame));
        Popper { id }
    }

    pub fn activate_buffer(&mut self) -> Popper {
        self.push(Frame::Buffer(Vec::new()))
    }

    pub fn activate_discard(&mut self) -> Popper {
        self.push(Frame::Discard(0))
    }

    /// Pushes a Flate compressor; [`pop`](Self::pop) returns the compressed bytes.
    pub fn activate_flate(&mut self) -> Popper {
        self.push(Frame::Flate(ZlibEncoder::new(Vec::new(), Compression::default()), 0))
    }

    /// Finishes the topmost frame and returns its captured bytes (empty for a discard frame).
    pub fn pop(&mut self, popper: Popper) -> Vec<u8> {
        let (id, frame) = self.frames.pop().expect("pipeline stack underflow");
        assert_eq!(id, popper.id, "pipeline frames popped out of order");
        match frame {
            Frame::Buffer(buf) => buf,
            Frame::Discard(_) => Vec::new(),
            Frame::Flate(enc, _) => enc.finish().expect("writing into a Vec can not fail"),
        }
    }

    /// Starts digesting everything that flows into the base output. Only one digest stage may
    /// exist, and it must be activated before any bytes reach the base.
    pub fn activate_md5(&mut self) {
        assert!(self.md5.is_none(), "md5 stage already active");
        assert_eq!(self.base_count, 0, "md5 stage activated mid-stream");
        self.md5 = Some((md5::Context::new(), true));
    }

    /// The digest of all bytes seen so far, as lowercase hex. Disables further digesting.
    pub fn hex_digest(&mut self) -> String {
        let (ctx, enabled) = self.md5.as_mut().expect("no md5 stage active");
        *enabled = false;
        format!("{:x}", ctx.clone().compute())
    }

    pub fn clear_md5(&mut self) {
        self.md5 = None;
    }
}

impl ByteSink for PipelineStack<'_> {
    fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        match self.frames.last_mut() {
            Some((_, Frame::Buffer(out))) => out.extend_from_slice(buf),
            Some((_, Frame::Discard(count))) => *count += buf.len() as u64,
            Some((_, Frame::Flate(enc, count))) => {
                enc.write_all(buf)?;
                *count += buf.len() as u64;
            },
            None => {
                if let Some((ctx, true)) = self.md5.as_mut() {
                    ctx.consume(buf);
                }
                self.base_count += buf.len() as u64;
                if let Base::Out(out) = &mut self.base {
                    out.write_all(buf)?;
                }
            }
        }
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifo_and_counts() {
        let mut out = Vec::new();
        let mut stack = PipelineStack::new(&mut out);
        stack.write_all(b"head ").unwrap();
        assert_eq!(stack.count(), 5);

        let pp_buf = stack.activate_buffer();
        stack.write_all(b"captured").unwrap();
        assert_eq!(stack.count(), 8);

        let pp_disc = stack.activate_discard();
        stack.write_all(b"dropped").unwrap();
        assert_eq!(stack.count(), 7);
        assert!(stack.pop(pp_disc).is_empty());

        assert_eq!(stack.pop(pp_buf), b"captured");
        stack.write_all(b"tail").unwrap();
        assert_eq!(stack.count(), 9);
        drop(stack);
        assert_eq!(out, b"head tail");
    }

    #[test]
    #[should_panic(expected = "popped out of order")]
    fn test_pop_out_of_order() {
        let mut stack = PipelineStack::discard();
        let pp1 = stack.activate_buffer();
        let _pp2 = stack.activate_buffer();
        stack.pop(pp1);
    }

    #[test]
    fn test_flate_frame() {
        let mut stack = PipelineStack::discard();
        let pp = stack.activate_flate();
        stack.write_all(b"squeeze me, squeeze me").unwrap();
        let packed = stack.pop(pp);
        let mut unpacked = Vec::new();
        std::io::Read::read_to_end(
            &mut crate::codecs::decode(&packed[..], &[crate::codecs::Filter::Flate], None),
            &mut unpacked).unwrap();
        assert_eq!(unpacked, b"squeeze me, squeeze me");
    }

    #[test]
    fn test_md5_stage() {
        let mut out = Vec::new();
        let mut stack = PipelineStack::new(&mut out);
        stack.activate_md5();
        stack.write_all(b"abc").unwrap();
        // a buffer frame hides its contents from the digest
        let pp = stack.activate_buffer();
        stack.write_all(b"invisible").unwrap();
        stack.pop(pp);
        assert_eq!(stack.hex_digest(), "900150983cd24fb0d6963f7d28e17f72");
        // digesting is off after hex_digest()
        stack.write_all(b"more").unwrap();
        stack.clear_md5();
    }

    #[test]
    #[should_panic(expected = "mid-stream")]
    fn test_md5_after_bytes() {
        let mut stack = PipelineStack::discard();
        stack.write_all(b"x").unwrap();
        stack.activate_md5();
    }
}
