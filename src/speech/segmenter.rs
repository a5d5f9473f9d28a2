//! Clause segmenter for streamed chat output.
//!
//! Accumulates rewritten fragments in a pending buffer and, once the
//! buffer ends on a clause delimiter (`. ! ? , \n`), splits the whole
//! buffer into normalized clauses.  A unit is only emitted when a
//! delimiter arrives, never on a timer, so at most one clause lags.

use tracing::{debug, trace};

use super::normalize::{normalize_clause, rewrite};

/// Characters that both trigger emission and separate clauses.
pub const CLAUSE_DELIMITERS: &[char] = &['.', '!', '?', ',', '\n'];

/// Owns the pending (not yet segmented) text.
///
/// Every method takes `&mut self`; the owner serializes access so a
/// producer push can never interleave with a reset.
#[derive(Debug, Default)]
pub struct Segmenter {
    buffer: String,
}

impl Segmenter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a fragment and return the clauses it completed.
    ///
    /// Returns an empty vector while more text is needed.  A fragment
    /// made only of whitespace (including `"\n"`) is kept for spacing but
    /// never triggers emission.
    ///
    /// Rewrites see one fragment at a time, so a contraction split across
    /// fragments (`"I"` then `"'m"`) is not expanded.
    pub fn submit(&mut self, fragment: &str) -> Vec<String> {
        if fragment.is_empty() {
            return Vec::new();
        }
        if fragment.trim().is_empty() {
            self.buffer.push_str(fragment);
            return Vec::new();
        }

        self.buffer.push_str(&rewrite(fragment));

        let ends_on_delimiter = self
            .buffer
            .chars()
            .last()
            .is_some_and(|c| CLAUSE_DELIMITERS.contains(&c));
        if !ends_on_delimiter {
            trace!(pending = self.buffer.len(), "Segmenter: waiting for delimiter");
            return Vec::new();
        }

        let clauses = split_clauses(&self.buffer);
        self.buffer.clear();
        debug!(count = clauses.len(), "Segmenter: emitted clauses");
        clauses
    }

    /// Emit whatever is pending as final clauses (end of stream).
    pub fn flush(&mut self) -> Vec<String> {
        let clauses = split_clauses(&self.buffer);
        self.buffer.clear();
        clauses
    }

    /// Drop pending text without emitting it.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// Text received but not yet segmented.
    pub fn pending(&self) -> &str {
        &self.buffer
    }
}

fn split_clauses(text: &str) -> Vec<String> {
    text.split(CLAUSE_DELIMITERS)
        .map(normalize_clause)
        .filter(|clause| !clause.is_empty())
        .collect()
}
