//! Byte sources for the [`Reader`](crate::Reader).
//!
//! The reader only ever needs sequential reads plus a way to jump forward over a value whose length
//! it already knows. How cheap that jump is depends on the source.

use std::io::{self, Read, Seek, SeekFrom};

/// A sequential byte source that can skip forward.
pub trait Source: Read {
    /// Advance past the next `n` bytes without handing them to the caller. Fails with
    /// [`io::ErrorKind::UnexpectedEof`] if the source is known to run out first.
    fn skip(&mut self, n: u64) -> io::Result<()>;
}

impl Source for &[u8] {
    fn skip(&mut self, n: u64) -> io::Result<()> {
        match usize::try_from(n) {
            Ok(n) if n <= self.len() => {
                *self = &self[n..];
                Ok(())
            }
            _ => {
                *self = &self[self.len()..];
                Err(io::ErrorKind::UnexpectedEof.into())
            }
        }
    }
}

impl<S: Source + ?Sized> Source for &mut S {
    fn skip(&mut self, n: u64) -> io::Result<()> {
        (**self).skip(n)
    }
}

/// A source that skips with a relative seek, for files and other seekable readers.
///
/// Seeking past the end doesn't fail by itself; the reader notices when the frame terminator it
/// expects to find there can't be read.
#[derive(Debug)]
pub struct Seekable<R> {
    inner: R,
}

impl<R: Read + Seek> Seekable<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read + Seek> Read for Seekable<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl<R: Read + Seek> Source for Seekable<R> {
    fn skip(&mut self, n: u64) -> io::Result<()> {
        let n = i64::try_from(n).map_err(|_| io::Error::from(io::ErrorKind::InvalidInput))?;
        self.inner.seek(SeekFrom::Current(n))?;
        Ok(())
    }
}

/// A source that can only read forward, such as a socket. Skipping reads the bytes and drops them.
#[derive(Debug)]
pub struct Streamed<R> {
    inner: R,
}

impl<R: Read> Streamed<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> Read for Streamed<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl<R: Read> Source for Streamed<R> {
    fn skip(&mut self, n: u64) -> io::Result<()> {
        let copied = io::copy(&mut (&mut self.inner).take(n), &mut io::sink())?;
        if copied < n {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }
        Ok(())
    }
}
