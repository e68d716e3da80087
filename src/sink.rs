//! Byte sinks for the [`Writer`](crate::Writer), and the two ways of back-patching lengths.
//!
//! Every Document and Array opens with a 4-byte length that isn't known until the scope closes.
//! A sink either holds the scope's bytes back until then ([`Buffered`], for sinks that can't go
//! back) or writes straight through and later seeks back to overwrite the placeholder
//! ([`Seeking`]). A plain `Vec<u8>` is both at once: it patches in place.

use std::io::{Seek, SeekFrom, Write};

use log::trace;

use crate::error::{Error, Result};

/// Destination for encoded bytes.
///
/// Scopes nest strictly: every `patch_length` call closes the most recently reserved placeholder
/// that hasn't been closed yet.
pub trait Sink {
    /// Reserve 4 placeholder bytes for a scope's length, returning their absolute offset.
    fn reserve_length(&mut self) -> Result<u64>;

    /// Append bytes to the innermost open scope.
    fn put(&mut self, bytes: &[u8]) -> Result<()>;

    /// Close the innermost scope by overwriting its placeholder at `at` with `length`.
    fn patch_length(&mut self, at: u64, length: i32) -> Result<()>;

    /// Called once a top-level document is complete.
    fn finish(&mut self) -> Result<()>;

    /// Total bytes accepted so far, staged or not.
    fn position(&self) -> u64;
}

impl Sink for Vec<u8> {
    fn reserve_length(&mut self) -> Result<u64> {
        let at = self.len() as u64;
        self.extend_from_slice(&[0u8; 4]);
        Ok(at)
    }

    fn put(&mut self, bytes: &[u8]) -> Result<()> {
        self.extend_from_slice(bytes);
        Ok(())
    }

    fn patch_length(&mut self, at: u64, length: i32) -> Result<()> {
        let at = at as usize;
        let slot = self
            .get_mut(at..at + 4)
            .ok_or_else(|| Error::protocol("Length placeholder is outside the output buffer"))?;
        slot.copy_from_slice(&length.to_le_bytes());
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        Ok(())
    }

    fn position(&self) -> u64 {
        self.len() as u64
    }
}

impl<S: Sink + ?Sized> Sink for &mut S {
    fn reserve_length(&mut self) -> Result<u64> {
        (**self).reserve_length()
    }

    fn put(&mut self, bytes: &[u8]) -> Result<()> {
        (**self).put(bytes)
    }

    fn patch_length(&mut self, at: u64, length: i32) -> Result<()> {
        (**self).patch_length(at, length)
    }

    fn finish(&mut self) -> Result<()> {
        (**self).finish()
    }

    fn position(&self) -> u64 {
        (**self).position()
    }
}

/// Stages each open scope in its own buffer.
///
/// A closed scope is patched and appended to its parent's buffer; the top-level scope goes to
/// the underlying writer in one `write_all` once it closes. Works for any `Write`, including
/// sockets and pipes.
#[derive(Debug)]
pub struct Buffered<W> {
    inner: W,
    staging: Vec<(u64, Vec<u8>)>,
    position: u64,
}

impl<W: Write> Buffered<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            staging: Vec::new(),
            position: 0,
        }
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    /// Give back the underlying writer. Bytes from scopes that never closed are dropped.
    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Sink for Buffered<W> {
    fn reserve_length(&mut self) -> Result<u64> {
        let at = self.position;
        self.staging.push((at, vec![0u8; 4]));
        self.position += 4;
        Ok(at)
    }

    fn put(&mut self, bytes: &[u8]) -> Result<()> {
        match self.staging.last_mut() {
            Some((_, buf)) => buf.extend_from_slice(bytes),
            None => self.inner.write_all(bytes)?,
        }
        self.position += bytes.len() as u64;
        Ok(())
    }

    fn patch_length(&mut self, at: u64, length: i32) -> Result<()> {
        let (start, mut buf) = self
            .staging
            .pop()
            .ok_or_else(|| Error::protocol("No open scope to close"))?;
        if start != at {
            return Err(Error::protocol(format!(
                "Closing scope at byte {}, but innermost open scope is at byte {}",
                at, start
            )));
        }
        buf[0..4].copy_from_slice(&length.to_le_bytes());
        match self.staging.last_mut() {
            Some((_, parent)) => parent.extend_from_slice(&buf),
            None => {
                trace!("Flushing {} staged bytes", buf.len());
                self.inner.write_all(&buf)?;
            }
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.inner.flush()?;
        Ok(())
    }

    fn position(&self) -> u64 {
        self.position
    }
}

/// Writes straight through, then seeks back to each placeholder to patch it.
///
/// Offsets are relative to where the underlying writer was positioned when this was created.
#[derive(Debug)]
pub struct Seeking<W> {
    inner: W,
    base: u64,
    position: u64,
}

impl<W: Write + Seek> Seeking<W> {
    pub fn new(mut inner: W) -> Result<Self> {
        let base = inner.stream_position()?;
        Ok(Self {
            inner,
            base,
            position: 0,
        })
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write + Seek> Sink for Seeking<W> {
    fn reserve_length(&mut self) -> Result<u64> {
        let at = self.position;
        self.inner.write_all(&[0u8; 4])?;
        self.position += 4;
        Ok(at)
    }

    fn put(&mut self, bytes: &[u8]) -> Result<()> {
        self.inner.write_all(bytes)?;
        self.position += bytes.len() as u64;
        Ok(())
    }

    fn patch_length(&mut self, at: u64, length: i32) -> Result<()> {
        self.inner.seek(SeekFrom::Start(self.base + at))?;
        self.inner.write_all(&length.to_le_bytes())?;
        self.inner.seek(SeekFrom::Start(self.base + self.position))?;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.inner.flush()?;
        Ok(())
    }

    fn position(&self) -> u64 {
        self.position
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Cursor;

    // Two nested scopes: outer [len][a][inner [len][b]][c]
    fn drive<S: Sink>(sink: &mut S) {
        let outer = sink.reserve_length().unwrap();
        sink.put(b"a").unwrap();
        let inner = sink.reserve_length().unwrap();
        sink.put(b"b").unwrap();
        let len = (sink.position() - inner) as i32;
        sink.patch_length(inner, len).unwrap();
        sink.put(b"c").unwrap();
        let len = (sink.position() - outer) as i32;
        sink.patch_length(outer, len).unwrap();
        sink.finish().unwrap();
    }

    const EXPECTED: [u8; 11] = [11, 0, 0, 0, b'a', 5, 0, 0, 0, b'b', b'c'];

    #[test]
    fn vec() {
        let mut sink = Vec::new();
        drive(&mut sink);
        assert_eq!(sink, EXPECTED);
    }

    #[test]
    fn buffered() {
        let mut sink = Buffered::new(Vec::new());
        drive(&mut sink);
        assert_eq!(sink.into_inner(), EXPECTED);
    }

    #[test]
    fn buffered_holds_back_open_scopes() {
        let mut sink = Buffered::new(Vec::new());
        sink.reserve_length().unwrap();
        sink.put(b"abc").unwrap();
        assert!(sink.get_ref().is_empty());
        assert_eq!(sink.position(), 7);
    }

    #[test]
    fn seeking() {
        let mut cursor = Cursor::new(vec![0xee, 0xee]);
        cursor.set_position(2);
        let mut sink = Seeking::new(cursor).unwrap();
        drive(&mut sink);
        let out = sink.into_inner().into_inner();
        assert_eq!(&out[..2], &[0xee, 0xee]);
        assert_eq!(&out[2..], &EXPECTED);
    }
}
