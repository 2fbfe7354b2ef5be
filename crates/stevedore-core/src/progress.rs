use std::io::{self, Read};

/// Observer of byte-level import progress.
///
/// Updates are keyed by a short identifier (a truncated digest) and a phase
/// label. Implementations must not fail; progress is purely cosmetic.
pub trait ProgressSink {
    /// A new unit of work starts. `total` is the byte size when known.
    fn start(&self, _id: &str, _phase: &str, _total: Option<u64>) {}

    /// `current` bytes of the unit have been processed so far.
    fn update(&self, id: &str, phase: &str, current: u64);

    fn finish(&self, _id: &str, _phase: &str) {}
}

/// Sink that discards every update.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn update(&self, _id: &str, _phase: &str, _current: u64) {}
}

/// Reader that reports the number of bytes read through it.
pub struct ProgressReader<'a, R> {
    inner: R,
    sink: &'a dyn ProgressSink,
    id: String,
    phase: &'static str,
    read: u64,
}

impl<'a, R: Read> ProgressReader<'a, R> {
    pub fn new(
        inner: R,
        sink: &'a dyn ProgressSink,
        id: impl Into<String>,
        phase: &'static str,
        total: Option<u64>,
    ) -> Self {
        let id = id.into();
        sink.start(&id, phase, total);
        Self {
            inner,
            sink,
            id,
            phase,
            read: 0,
        }
    }
}

impl<R: Read> Read for ProgressReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n == 0 {
            self.sink.finish(&self.id, self.phase);
        } else {
            self.read += n as u64;
            self.sink.update(&self.id, self.phase, self.read);
        }
        Ok(n)
    }
}
