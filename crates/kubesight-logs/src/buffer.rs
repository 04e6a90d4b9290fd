use std::collections::VecDeque;

/// Bounded FIFO of recent log lines
///
/// Keeps at most `capacity` lines; pushing onto a full buffer evicts the
/// oldest line.
#[derive(Clone, Debug)]
pub struct LineBuffer {
    lines: VecDeque<String>,

    /// Maximum capacity
    capacity: usize,

    /// Lines pushed since creation or the last clear
    total: u64,
}

impl LineBuffer {
    /// Create a new buffer with the given capacity (at least one line)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            lines: VecDeque::with_capacity(capacity.min(4096)),
            capacity,
            total: 0,
        }
    }

    /// Push a new line, returning the evicted one if at capacity
    pub fn push(&mut self, line: impl Into<String>) -> Option<String> {
        self.total += 1;
        let evicted = if self.lines.len() >= self.capacity {
            self.lines.pop_front()
        } else {
            None
        };
        self.lines.push_back(line.into());
        evicted
    }

    /// The last `n` lines, oldest first
    pub fn tail(&self, n: usize) -> impl Iterator<Item = &str> {
        let start = self.lines.len().saturating_sub(n);
        self.lines.iter().skip(start).map(String::as_str)
    }

    /// The last `n` lines joined with newlines
    pub fn tail_text(&self, n: usize) -> String {
        self.tail(n).collect::<Vec<_>>().join("\n")
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Lines pushed since the last clear, evicted ones included
    pub fn total_pushed(&self) -> u64 {
        self.total
    }

    /// Clear all lines
    pub fn clear(&mut self) {
        self.lines.clear();
        self.total = 0;
    }
}
