//! Sinks that receive forwarded log output.

use std::io::Write;

/// Receives each chunk of container output as it arrives.
///
/// The launcher forwards chunks in stream order and never buffers or
/// reorders them; a sink sees exactly what the engine produced.
pub trait LogSink: Send {
    /// Called once per chunk, in arrival order.
    fn write_chunk(&mut self, chunk: &[u8]);
}

/// Sink that forwards chunks to the operator's console.
#[derive(Debug, Default)]
pub struct ConsoleSink;

impl LogSink for ConsoleSink {
    fn write_chunk(&mut self, chunk: &[u8]) {
        let stdout = std::io::stdout();
        let mut lock = stdout.lock();
        // Container output is not guaranteed to be valid UTF-8; pass the
        // bytes through untouched and let the terminal cope.
        let _ = lock.write_all(chunk);
        let _ = lock.flush();
    }
}

/// Sink that collects chunks in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    chunks: Vec<Vec<u8>>,
}

impl MemorySink {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Chunks received so far, in arrival order.
    pub fn chunks(&self) -> &[Vec<u8>] {
        &self.chunks
    }

    /// All received bytes concatenated, lossily decoded.
    pub fn as_text(&self) -> String {
        String::from_utf8_lossy(&self.chunks.concat()).into_owned()
    }
}

impl LogSink for MemorySink {
    fn write_chunk(&mut self, chunk: &[u8]) {
        self.chunks.push(chunk.to_vec());
    }
}
