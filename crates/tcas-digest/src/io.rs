use std::io::{self, Write};

use tcas_types::DigestType;

use crate::digester::Digester;

/// Writer adapter hashing every byte written through it.
pub struct DigestWriter<W> {
    inner: W,
    digester: Digester,
    bytes_written: u64,
}

impl<W: Write> DigestWriter<W> {
    pub fn new(inner: W, digest_type: DigestType) -> Self {
        Self {
            inner,
            digester: Digester::new(digest_type),
            bytes_written: 0,
        }
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    /// Returns `(inner writer, hex digest, bytes written)`.
    pub fn finish(self) -> (W, String, u64) {
        (self.inner, self.digester.finalize_hex(), self.bytes_written)
    }
}

impl<W: Write> Write for DigestWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.digester.update(&buf[..n]);
        self.bytes_written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
