use std::io::{Read, Write};

use tracing::trace;

use crate::{ProtoError, TERMINATOR};

/// Longest line accepted before the peer is considered broken
pub const MAX_LINE_LEN: usize = 1024;

const CHUNK_LEN: usize = 256;

/// Splits a byte stream into CR terminated lines.
///
/// A stray LF next to the CR is tolerated and blank lines are skipped. Bytes
/// of a partial line survive a read timeout, so a slow peer does not lose
/// the start of its request.
pub struct LineReader<R> {
    inner: R,
    pending: Vec<u8>,
}

impl<R: Read> LineReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            pending: Vec::with_capacity(CHUNK_LEN),
        }
    }

    #[inline]
    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    #[inline]
    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }

    /// Block for the next complete line, without its terminator
    pub fn read_line(&mut self) -> Result<String, ProtoError> {
        loop {
            if let Some(line) = self.take_line() {
                return line;
            }

            let mut chunk = [0u8; CHUNK_LEN];

            match self.inner.read(&mut chunk) {
                Ok(0) => return Err(ProtoError::Closed),
                Ok(n) => self.pending.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn take_line(&mut self) -> Option<Result<String, ProtoError>> {
        while let Some(end) = self
            .pending
            .iter()
            .position(|b| *b == TERMINATOR || *b == b'\n')
        {
            let mut line: Vec<u8> = self.pending.drain(..=end).collect();
            line.pop();

            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }

            let line = String::from_utf8(line).map_err(|e| {
                ProtoError::Malformed(String::from_utf8_lossy(e.as_bytes()).into_owned())
            });

            trace!(?line, "line in");

            return Some(line);
        }

        if self.pending.len() > MAX_LINE_LEN {
            let junk = String::from_utf8_lossy(&self.pending[..32]).into_owned();
            self.pending.clear();

            return Some(Err(ProtoError::Malformed(junk)));
        }

        None
    }
}

/// Write one line followed by the terminator.
pub fn write_line<W: Write + ?Sized>(writer: &mut W, line: &str) -> Result<(), ProtoError> {
    let mut buf = Vec::with_capacity(line.len() + 1);

    buf.extend_from_slice(line.as_bytes());
    buf.push(TERMINATOR);

    writer.write_all(&buf)?;
    writer.flush()?;

    trace!(line, "line out");

    Ok(())
}
