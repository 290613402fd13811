// Source position tracking for diagnostics

/// A byte range in the preprocessed source together with its 1-based line.
///
/// Line 0 means the position is unknown (synthesized nodes, host-provided values).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Span {
    pub start: u32,
    pub end: u32,
    pub line: u32,
}

impl Span {
    pub fn new(start: u32, end: u32, line: u32) -> Self {
        Self { start, end, line }
    }

    /// Create a dummy span for testing
    pub fn dummy() -> Self {
        Self::default()
    }

    /// Merge two spans into one that covers both.
    /// The merged span reports the line where it starts.
    pub fn merge(self, other: Span) -> Span {
        let line = if self.start <= other.start {
            self.line
        } else {
            other.line
        };
        Span {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
            line,
        }
    }

    pub fn len(&self) -> u32 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Compute the 1-based line of a byte offset in `source`.
pub fn line_of_offset(source: &str, offset: usize) -> u32 {
    let end = offset.min(source.len());
    source.as_bytes()[..end].iter().filter(|&&b| b == b'\n').count() as u32 + 1
}
