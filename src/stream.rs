//! Standard stream adapters.
//!
//! The guest's descriptors 0, 1 and 2 never reach the open-file table; they
//! are byte sources and sinks supplied at construction.  The adaptors here
//! cover the common embeddings: a line-buffered sink for interactive
//! terminals, a pass-through sink for pipes, and preloaded or shared byte
//! buffers for scripted runs and tests.
//!
//! ## Authors
//!
//! The WASI Sandbox Development Team.
//!
//! ## Licensing and copyright notice
//!
//! See the `LICENSE_MIT.markdown` file in the WASI Sandbox root directory for
//! information on licensing and copyright.

use std::{
    collections::VecDeque,
    io::Write,
    sync::{Arc, Mutex},
};

/// A byte source for guest standard input.  Reads may be short; an empty
/// result means end of input.
pub trait InputStream: Send {
    fn read(&mut self, max: usize) -> Vec<u8>;
}

/// A byte sink for guest standard output or error.
pub trait OutputStream: Send {
    fn write(&mut self, bytes: &[u8]);
}

/// An input stream over a preloaded byte buffer.
pub struct ByteSource {
    pending: VecDeque<u8>,
}

impl ByteSource {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        ByteSource {
            pending: bytes.into().into(),
        }
    }

    /// A source that is at end of input from the start.
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }
}

impl InputStream for ByteSource {
    fn read(&mut self, max: usize) -> Vec<u8> {
        let take = max.min(self.pending.len());
        self.pending.drain(..take).collect()
    }
}

/// A sink that forwards every chunk unmodified.
pub struct PassThrough<W: Write + Send> {
    inner: W,
}

impl<W: Write + Send> PassThrough<W> {
    pub fn new(inner: W) -> Self {
        PassThrough { inner }
    }
}

impl<W: Write + Send> OutputStream for PassThrough<W> {
    fn write(&mut self, bytes: &[u8]) {
        // Stream failures are invisible to the guest: a broken host pipe
        // must not turn into a spurious errno inside the sandbox.
        let _ = self.inner.write_all(bytes);
        let _ = self.inner.flush();
    }
}

/// A sink that buffers until a newline, then emits whole lines.  Interactive
/// front-ends want this so partially-written lines do not interleave with
/// their own prompt.
pub struct LineBuffered<W: Write + Send> {
    inner: W,
    pending: Vec<u8>,
}

impl<W: Write + Send> LineBuffered<W> {
    pub fn new(inner: W) -> Self {
        LineBuffered {
            inner,
            pending: Vec::new(),
        }
    }
}

impl<W: Write + Send> OutputStream for LineBuffered<W> {
    fn write(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
        if let Some(last_newline) = self.pending.iter().rposition(|&b| b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=last_newline).collect();
            let _ = self.inner.write_all(&line);
            let _ = self.inner.flush();
        }
    }
}

impl<W: Write + Send> Drop for LineBuffered<W> {
    fn drop(&mut self) {
        if !self.pending.is_empty() {
            let _ = self.inner.write_all(&self.pending);
            let _ = self.inner.flush();
        }
    }
}

/// A sink into a shared byte buffer.  Cloning shares the buffer, so a test
/// or front-end can keep one end while the bindings own the other.
#[derive(Clone, Default)]
pub struct SharedSink {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl SharedSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// The bytes written so far.
    pub fn contents(&self) -> Vec<u8> {
        self.buffer
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .clone()
    }
}

impl OutputStream for SharedSink {
    fn write(&mut self, bytes: &[u8]) {
        self.buffer
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .extend_from_slice(bytes);
    }
}

impl Write for SharedSink {
    fn write(&mut self, bytes: &[u8]) -> std::io::Result<usize> {
        OutputStream::write(self, bytes);
        Ok(bytes.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// A sink that discards everything.
#[derive(Default)]
pub struct Discard;

impl OutputStream for Discard {
    fn write(&mut self, _bytes: &[u8]) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_source_reads_short_and_then_reports_eof() {
        let mut source = ByteSource::new(b"abcde".to_vec());
        assert_eq!(source.read(3), b"abc");
        assert_eq!(source.read(16), b"de");
        assert_eq!(source.read(16), b"");
    }

    #[test]
    fn line_buffered_sink_holds_partial_lines() {
        let sink = SharedSink::new();
        let mut out = LineBuffered::new(sink.clone());
        out.write(b"hello ");
        assert_eq!(sink.contents(), b"");
        out.write(b"world\npartial");
        assert_eq!(sink.contents(), b"hello world\n");
        drop(out);
        assert_eq!(sink.contents(), b"hello world\npartial");
    }

    #[test]
    fn pass_through_sink_forwards_chunks_unmodified() {
        let sink = SharedSink::new();
        let mut out = PassThrough::new(sink.clone());
        out.write(b"no newline");
        assert_eq!(sink.contents(), b"no newline");
    }
}
