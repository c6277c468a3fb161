use std::collections::VecDeque;

/// Rolling window of recent raw shell output.
///
/// Appends never grow the buffer past `capacity`; the oldest bytes are
/// evicted first. Marker scanning never reads from here, so eviction only
/// affects what passive snapshots can see.
#[derive(Debug, Clone)]
pub struct OutputBuffer {
    data: VecDeque<u8>,
    capacity: usize,
}

impl OutputBuffer {
    pub const DEFAULT_CAPACITY: usize = 100_000;

    pub fn new(capacity: usize) -> Self {
        Self {
            data: VecDeque::with_capacity(capacity.min(Self::DEFAULT_CAPACITY)),
            capacity,
        }
    }

    pub fn append(&mut self, bytes: &[u8]) {
        if bytes.len() >= self.capacity {
            self.data.clear();
            self.data
                .extend(bytes[bytes.len() - self.capacity..].iter().copied());
            return;
        }
        let overflow = (self.data.len() + bytes.len()).saturating_sub(self.capacity);
        self.data.drain(..overflow);
        self.data.extend(bytes.iter().copied());
    }

    pub fn snapshot(&self) -> Vec<u8> {
        self.data.iter().copied().collect()
    }

    /// Snapshot decoded as UTF-8 (lossy). Continuation bytes left dangling
    /// at the front by eviction are skipped rather than rendered as U+FFFD.
    pub fn snapshot_lossy(&self) -> String {
        let bytes = self.snapshot();
        let skip = bytes
            .iter()
            .take(3)
            .take_while(|b| (**b & 0b1100_0000) == 0b1000_0000)
            .count();
        String::from_utf8_lossy(&bytes[skip..]).into_owned()
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for OutputBuffer {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}
