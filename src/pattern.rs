//! Resumable delimiter sub-matchers.
//!
//! A sub-matcher searches one delimiter inside the matcher's buffer and is
//! resumable across chunk boundaries: all progress is carried in the
//! `(index, offset)` pair handed back to the caller, never in hidden
//! mid-call state. `index` is the count of leading window bytes proven not
//! to participate in any future match (safe to release); `offset` is the
//! length of the pattern prefix currently anchored at `window[index]`.

use crate::regex::{Machine, Regex};

/// The resumable matching contract shared by the literal and regex
/// sub-matchers.
pub(crate) trait Pattern {
    /// Advance the search over `window`, resuming from `(index, offset)`.
    ///
    /// Returns `(index', offset', true)` when the delimiter matched in full
    /// at `window[index' .. index' + offset']`, and `(index', offset',
    /// false)` when the caller must retain `window[index'..]` and call again
    /// with more bytes appended.
    fn find(&mut self, index: usize, offset: usize, window: &[u8]) -> (usize, usize, bool);

    /// Abandon any in-flight candidate so the next `find` starts fresh.
    /// All KMP progress lives in `(index, offset)`, so only the regex
    /// sub-matcher has state to discard.
    fn reset(&mut self);

    /// Release any pooled resources. The KMP matcher has none.
    fn clear(&mut self);
}

/// Literal sub-matcher: streaming Knuth-Morris-Pratt forward search.
pub(crate) struct KmpPattern {
    source: Vec<u8>,
    lps: Vec<usize>,
}

impl KmpPattern {
    pub fn new(source: &[u8]) -> Self {
        KmpPattern {
            source: source.to_vec(),
            lps: compute_lps(source),
        }
    }
}

/// Longest-proper-prefix-suffix failure table, O(m).
fn compute_lps(pattern: &[u8]) -> Vec<usize> {
    let n = pattern.len();
    let mut lps = vec![0; n];
    let (mut i, mut j) = (1, 0);
    while i < n {
        if pattern[i] == pattern[j] {
            j += 1;
            lps[i] = j;
            i += 1;
        } else if j != 0 {
            j = lps[j - 1];
        } else {
            lps[i] = 0;
            i += 1;
        }
    }
    lps
}

impl Pattern for KmpPattern {
    fn find(&mut self, index: usize, offset: usize, window: &[u8]) -> (usize, usize, bool) {
        let m = self.source.len();
        if offset == m {
            // Already fully matched on a previous call.
            return (index, offset, true);
        }
        let n = window.len();
        let (mut i, mut j) = (index + offset, offset);
        while i < n {
            if window[i] == self.source[j] {
                i += 1;
                j += 1;
                if j == m {
                    return (i - j, j, true);
                }
            } else if j != 0 {
                j = self.lps[j - 1];
            } else {
                i += 1;
            }
        }
        // i - j is the earliest position that could still begin a match;
        // everything before it is released.
        (i - j, j, false)
    }

    fn reset(&mut self) {}

    fn clear(&mut self) {}
}

/// Regex sub-matcher: a checked-out VM over a shared compiled program.
pub(crate) struct RegexPattern {
    re: Regex,
    machine: Option<Machine>,
}

impl RegexPattern {
    pub fn new(re: Regex) -> Self {
        let machine = re.get();
        RegexPattern {
            re,
            machine: Some(machine),
        }
    }
}

impl Pattern for RegexPattern {
    fn find(&mut self, index: usize, offset: usize, window: &[u8]) -> (usize, usize, bool) {
        let machine = self
            .machine
            .get_or_insert_with(|| self.re.get());
        machine.find(index, offset, window)
    }

    fn reset(&mut self) {
        if let Some(machine) = self.machine.as_mut() {
            machine.reset();
        }
    }

    fn clear(&mut self) {
        if let Some(machine) = self.machine.take() {
            self.re.put(machine);
        }
    }
}
