//! Resumable NFA simulation.
//!
//! A `Machine` runs a Thompson-style thread simulation over a compiled
//! program, in the manner of <https://swtch.com/~rsc/regexp/regexp2.html>,
//! with one structural difference from a batch simulator: the thread queues,
//! match state, and a release counter survive between calls, so a match
//! candidate can straddle any number of input chunks.
//!
//! Coordinates. Capture slots are recorded in the coordinates of the window
//! seen when the thread was created. `accum` counts the bytes released to
//! the caller since the candidate start last re-anchored, so for a live
//! thread `cap[0] - accum` is its candidate start in the current window;
//! the bias is applied once, when a finished thread's captures are copied
//! into `matchcap`. `accum` resets whenever the candidate start re-anchors
//! and whenever a match resolves.

use std::mem;
use std::sync::Arc;

use smallvec::SmallVec;

use super::prog::{context, decode_rune, EmptyOp, InstOp, LazyFlag};
use super::RegexCore;

/// Capture array carried by a thread. Two inline slots cover programs
/// without capture groups.
pub(crate) type CapVec = SmallVec<[usize; 2]>;

/// Pending-thread queue: the sparse/dense pair from
/// <https://research.swtch.com/sparse>, giving O(1) membership by pc and
/// insertion-order iteration. An entry with no thread is a placeholder
/// recording that the pc was already scheduled this step.
#[derive(Debug, Default)]
pub(crate) struct Queue {
    sparse: Vec<u32>,
    dense: Vec<Entry>,
}

#[derive(Debug)]
pub(crate) struct Entry {
    pc: u32,
    thread: Option<CapVec>,
}

impl Queue {
    pub fn with_capacity(n: usize) -> Self {
        Queue {
            sparse: vec![0; n],
            dense: Vec::with_capacity(n),
        }
    }

    pub fn capacity(&self) -> usize {
        self.sparse.len()
    }

    fn contains(&self, pc: u32) -> bool {
        let j = self.sparse[pc as usize] as usize;
        j < self.dense.len() && self.dense[j].pc == pc
    }

    /// Drop every entry, recycling live threads into `pool`.
    pub fn clear_into(&mut self, pool: &mut Vec<CapVec>) {
        for e in self.dense.drain(..) {
            if let Some(t) = e.thread {
                pool.push(t);
            }
        }
    }
}

/// A checked-out simulation instance bound to one compiled program.
///
/// Not safe for concurrent use; the program it runs is.
pub(crate) struct Machine {
    re: Arc<RegexCore>,
    pub(crate) q0: Queue,
    pub(crate) q1: Queue,
    pub(crate) pool: Vec<CapVec>,
    matchcap: CapVec,
    seedcap: CapVec,
    matched: bool,
    accum: usize,
}

impl Machine {
    pub(crate) fn new(re: Arc<RegexCore>, q0: Queue, q1: Queue, pool: Vec<CapVec>) -> Self {
        let ncap = re.prog.num_cap;
        let mut matchcap = CapVec::new();
        matchcap.resize(ncap, 0);
        let mut seedcap = CapVec::new();
        seedcap.resize(ncap, 0);
        Machine {
            re,
            q0,
            q1,
            pool,
            matchcap,
            seedcap,
            matched: false,
            accum: 0,
        }
    }

    /// Resumable search over `buf`, continuing from `(index, offset)`.
    ///
    /// On a match, returns `(start, length, true)` in current-window
    /// coordinates and resets the candidate state. Otherwise returns the
    /// new resume point: `index'` bytes may be released, `offset'` bytes
    /// past that belong to a still-live candidate (or partial literal
    /// prefix) and must be retained.
    pub(crate) fn find(&mut self, index: usize, offset: usize, buf: &[u8]) -> (usize, usize, bool) {
        let mut q0 = mem::take(&mut self.q0);
        let mut q1 = mem::take(&mut self.q1);
        let (idx, off, ok) = self.run(&mut q0, &mut q1, index, offset, buf);
        if ok {
            // Candidate resolved: recycle whatever the final step left live.
            q0.clear_into(&mut self.pool);
            q1.clear_into(&mut self.pool);
            self.q0 = q0;
            self.q1 = q1;
            let start = self.matchcap[0];
            let len = self.matchcap[1] - start;
            self.accum = 0;
            self.matched = false;
            return (start, len, true);
        }
        // Suspended. Everything before the earliest live candidate start is
        // proven dead and may be released. The scan position can sit short
        // of the window end (an incomplete trailing rune), so the retained
        // offset is measured from where it actually stopped.
        let reached = idx + off;
        // Seeds installed while an older generation was still live can sit
        // below the epoch baseline; clamping retains their bytes instead of
        // wrapping.
        let shift = q0
            .dense
            .iter()
            .filter_map(|e| e.thread.as_ref().map(|t| t[0].saturating_sub(self.accum)))
            .min();
        self.q0 = q0;
        self.q1 = q1;
        match shift {
            Some(shift) => {
                self.accum += shift;
                (shift, reached - shift, false)
            }
            None => {
                // No live candidate at all; the scan already advanced past
                // every possible start.
                self.accum += idx;
                (idx, off, false)
            }
        }
    }

    /// Recycle queued threads; called when the machine is returned to its
    /// pool.
    pub(crate) fn reset(&mut self) {
        let mut q0 = mem::take(&mut self.q0);
        let mut q1 = mem::take(&mut self.q1);
        q0.clear_into(&mut self.pool);
        q1.clear_into(&mut self.pool);
        self.q0 = q0;
        self.q1 = q1;
        self.matched = false;
        self.accum = 0;
    }

    /// The main simulation loop. `runq` holds the threads awaiting the rune
    /// at `index + offset`; a fresh candidate is seeded at every position
    /// until a match is recorded.
    fn run(
        &mut self,
        runq: &mut Queue,
        nextq: &mut Queue,
        mut index: usize,
        mut offset: usize,
        buf: &[u8],
    ) -> (usize, usize, bool) {
        let re = Arc::clone(&self.re);
        if re.start_cond.is_none() {
            // The program can never match.
            return (index, offset, false);
        }

        let (mut r, mut width) = decode_rune(buf, index + offset);
        let (mut r1, mut width1) = if r.is_some() {
            decode_rune(buf, index + offset + width)
        } else {
            (None, 0)
        };
        // Out-of-text on the left only at the true start: window position 0
        // with nothing released since the candidate re-anchored.
        let mut flag = context(buf, index + offset, self.accum);

        loop {
            if runq.dense.is_empty() {
                if self.matched {
                    break;
                }
                if !re.prefix.is_empty() {
                    // No live candidate: the next one must begin with the
                    // literal prefix, so locate it without thread
                    // bookkeeping. A partial hit at the window end is the
                    // resume point; everything before it is released.
                    let (pi, po) = scan_prefix(&re.prefix, buf, index, offset);
                    if po < re.prefix.len() {
                        return (pi, po, false);
                    }
                    if pi != index || offset != 0 {
                        // The candidate start re-anchors at the prefix; the
                        // release counter restarts with it.
                        index = pi;
                        offset = 0;
                        self.accum = 0;
                        (r, width) = decode_rune(buf, index);
                        (r1, width1) = if r.is_some() {
                            decode_rune(buf, index + width)
                        } else {
                            (None, 0)
                        };
                        flag = context(buf, index, self.accum);
                    }
                }
            }

            if !self.matched {
                // Seed a candidate at the current position; the sparse set
                // suppresses re-seeding pcs that are already scheduled.
                let pos = index + offset;
                let mut seed = mem::take(&mut self.seedcap);
                seed[0] = pos;
                self.add(runq, re.prog.start, pos, &mut seed, &flag);
                self.seedcap = seed;
            }

            flag = LazyFlag::new(r, r1);
            let c = match r {
                Some(c) if width > 0 => c,
                _ => break,
            };

            self.step(runq, nextq, index + offset + width, c, &flag);
            offset += width;
            if self.matched && !re.longest {
                // First-match mode resolves immediately; longest mode keeps
                // exploring for a strictly longer match.
                break;
            }
            mem::swap(runq, nextq);

            if runq.dense.is_empty() {
                if self.matched {
                    break;
                }
                // Every candidate died; re-anchor the search here. The
                // release counter measures from the new anchor.
                index += offset;
                offset = 0;
                self.accum = 0;
                (r, width) = decode_rune(buf, index);
                (r1, width1) = if r.is_some() {
                    decode_rune(buf, index + width)
                } else {
                    (None, 0)
                };
                flag = context(buf, index, self.accum);
                continue;
            }

            (r, width) = (r1, width1);
            if r.is_some() {
                (r1, width1) = decode_rune(buf, index + offset + width);
            }
        }

        (index, offset, self.matched)
    }

    /// Run every thread in `runq` against the rune `c`, scheduling
    /// survivors into `nextq` at `next_pos`.
    fn step(
        &mut self,
        runq: &mut Queue,
        nextq: &mut Queue,
        next_pos: usize,
        c: char,
        next_flag: &LazyFlag,
    ) {
        let longest = self.re.longest;
        for j in 0..runq.dense.len() {
            let Some(mut tcap) = runq.dense[j].thread.take() else {
                continue;
            };
            if longest && self.matched && self.matchcap[0] < tcap[0].saturating_sub(self.accum) {
                // Leftmost-longest: a thread starting after the recorded
                // match can never beat it.
                self.pool.push(tcap);
                continue;
            }
            let pc = runq.dense[j].pc;
            let (out, consumed) = {
                let inst = &self.re.prog.insts[pc as usize];
                match inst.op {
                    InstOp::Rune | InstOp::Rune1 | InstOp::RuneAny | InstOp::RuneAnyNotNL => {
                        (inst.out, inst.match_rune(c))
                    }
                    _ => unreachable!("non-consuming instruction in thread queue"),
                }
            };
            if consumed {
                // The thread's captures flow through the closure into every
                // state it reaches.
                self.add(nextq, out, next_pos, &mut tcap, next_flag);
            }
            self.pool.push(tcap);
        }
        runq.dense.clear();
    }

    /// Add `pc` and everything ε-reachable from it to `q`, evaluating
    /// zero-width conditions against `flag`. `cap` is the capture set in
    /// effect; `Capture` instructions mutate it for the sub-closure and
    /// restore on the way out, and every installed thread receives a copy
    /// of it as seen at install time.
    fn add(&mut self, q: &mut Queue, mut pc: u32, pos: usize, cap: &mut CapVec, flag: &LazyFlag) {
        loop {
            if pc == 0 {
                // Reserved Fail instruction: dead arm.
                return;
            }
            if q.contains(pc) {
                return;
            }
            let j = q.dense.len();
            q.dense.push(Entry { pc, thread: None });
            q.sparse[pc as usize] = j as u32;

            let (op, out, arg) = {
                let inst = &self.re.prog.insts[pc as usize];
                (inst.op, inst.out, inst.arg)
            };
            match op {
                InstOp::Fail => return,
                InstOp::Alt | InstOp::AltMatch => {
                    self.add(q, out, pos, cap, flag);
                    pc = arg;
                }
                InstOp::EmptyWidth => {
                    if !flag.satisfies(EmptyOp(arg as u8)) {
                        return;
                    }
                    pc = out;
                }
                InstOp::Nop => pc = out,
                InstOp::Capture => {
                    let slot = arg as usize;
                    if slot < cap.len() {
                        let opos = cap[slot];
                        cap[slot] = pos;
                        self.add(q, out, pos, cap, flag);
                        cap[slot] = opos;
                        return;
                    }
                    pc = out;
                }
                InstOp::Match => {
                    let longest = self.re.longest;
                    if !longest || !self.matched || self.matchcap[1] < pos {
                        // The one place the release bias applies: slot 0 is
                        // rebased into current-window coordinates as it is
                        // copied out; slot 1 is the end position.
                        let start = cap[0].saturating_sub(self.accum);
                        self.matchcap.clear();
                        self.matchcap.extend_from_slice(cap);
                        self.matchcap[0] = start;
                        self.matchcap[1] = pos;
                    }
                    if !longest {
                        // First-match mode: cut off all lower-priority
                        // threads.
                        q.clear_into(&mut self.pool);
                    }
                    self.matched = true;
                    return;
                }
                InstOp::Rune | InstOp::Rune1 | InstOp::RuneAny | InstOp::RuneAnyNotNL => {
                    let mut thread = self.pool.pop().unwrap_or_default();
                    thread.clear();
                    thread.extend_from_slice(cap);
                    q.dense[j].thread = Some(thread);
                    return;
                }
            }
        }
    }
}

/// Byte-exact scan for the program's literal prefix, resumable via
/// `(index, offset)` like the sub-matcher contract. On mismatch the scan
/// restarts one byte past the failed candidate start, so self-overlapping
/// prefixes are found; UTF-8 lead and continuation bytes are disjoint, so a
/// byte-granular restart cannot land mid-rune on the first prefix byte.
fn scan_prefix(prefix: &[u8], buf: &[u8], index: usize, offset: usize) -> (usize, usize) {
    let (n, m) = (buf.len(), prefix.len());
    let (mut i, mut j) = (index, offset);
    while i + j < n && j < m {
        if buf[i + j] == prefix[j] {
            j += 1;
        } else {
            i += 1;
            j = 0;
        }
    }
    (i, j)
}
