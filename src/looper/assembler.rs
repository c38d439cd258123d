//! Read reassembly and error throttling for the data loop.
//!
//! Neither type touches the OS; both are driven by the listener thread.

use crate::backend::ReadStatus;

/// What one readiness notification produced for the sink, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Chunk<'a> {
    Data(&'a [u8]),
    Error(i32),
}

/// Reads one readiness notification's worth of bytes, gluing partial reads
/// together before handing them out.
#[derive(Debug)]
pub struct ReadAssembler {
    chunk: Vec<u8>,
    pending: Vec<u8>,
    capacity: usize,
}

impl ReadAssembler {
    /// `chunk_size` bytes are requested per read; at most `capacity` bytes are
    /// held across partial reads before they are handed out.
    pub fn new(chunk_size: usize, capacity: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        let capacity = capacity.max(chunk_size);
        Self {
            chunk: vec![0; chunk_size],
            pending: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Read until the notification is exhausted, calling `emit` for every
    /// buffer or error the sink should see.
    pub fn drain<R, E>(&mut self, mut read: R, mut emit: E)
    where
        R: FnMut(&mut [u8]) -> ReadStatus,
        E: FnMut(Chunk<'_>),
    {
        loop {
            match read(&mut self.chunk) {
                ReadStatus::Complete(n) => {
                    let n = n.min(self.chunk.len());
                    if self.pending.is_empty() {
                        emit(Chunk::Data(&self.chunk[..n]));
                    } else {
                        if self.pending.len() + n > self.capacity {
                            self.flush(&mut emit);
                            emit(Chunk::Data(&self.chunk[..n]));
                        } else {
                            self.pending.extend_from_slice(&self.chunk[..n]);
                            self.flush(&mut emit);
                        }
                    }
                    return;
                }
                ReadStatus::Partial(n) => {
                    let n = n.min(self.chunk.len());
                    if self.pending.len() + n > self.capacity {
                        self.flush(&mut emit);
                    }
                    self.pending.extend_from_slice(&self.chunk[..n]);
                }
                ReadStatus::Interrupted => continue,
                ReadStatus::Empty => {
                    self.flush(&mut emit);
                    return;
                }
                ReadStatus::Failed(code) => {
                    self.flush(&mut emit);
                    emit(Chunk::Error(code));
                    return;
                }
            }
        }
    }

    fn flush<E: FnMut(Chunk<'_>)>(&mut self, emit: &mut E) {
        if !self.pending.is_empty() {
            emit(Chunk::Data(&self.pending));
            self.pending.clear();
        }
    }
}

/// Counts consecutive wait errors and says when the sink should hear about them.
#[derive(Debug, Clone)]
pub struct ErrorThrottle {
    threshold: u32,
    count: u32,
}

impl ErrorThrottle {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            count: 0,
        }
    }

    /// Record one error. Returns `true` on every `threshold`-th error, after
    /// which the count starts over.
    pub fn record(&mut self) -> bool {
        self.count += 1;
        if self.count >= self.threshold {
            self.count = 0;
            true
        } else {
            false
        }
    }

    /// A successful wait ends the run of errors.
    pub fn reset(&mut self) {
        self.count = 0;
    }

    pub fn count(&self) -> u32 {
        self.count
    }
}
