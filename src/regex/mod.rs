//! Streaming regular-expression engine.
//!
//! `Regex` wraps a compiled instruction program shared read-only by any
//! number of matcher instances. Each matcher checks a mutable [`Machine`]
//! out of a global pool on construction and returns it when closed, so
//! queue and thread allocations are recycled across matcher lifetimes.

mod compile;
mod machine;
mod prog;

pub(crate) use compile::CompileError;
pub(crate) use machine::Machine;

use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;

use machine::{CapVec, Queue};
use prog::{EmptyOp, Prog};

/// Everything a machine needs from its compiled expression.
pub(crate) struct RegexCore {
    expr: String,
    pub(crate) prog: Prog,
    /// Literal bytes every match must begin with; empty when the program
    /// starts with a branch or class.
    pub(crate) prefix: Vec<u8>,
    /// Zero-width conditions required at a match start; `None` means the
    /// program can never match.
    pub(crate) start_cond: Option<EmptyOp>,
    /// Leftmost-longest (POSIX) instead of leftmost-first (Perl).
    pub(crate) longest: bool,
    /// Index of the pool size class serving this program.
    mpool: usize,
}

/// A compiled streaming regular expression. Cheap to clone; safe for
/// concurrent read by multiple machines.
#[derive(Clone)]
pub(crate) struct Regex {
    core: Arc<RegexCore>,
}

impl Regex {
    /// Compile with leftmost-first (Perl) match semantics.
    pub fn new(expr: &str) -> Result<Regex, CompileError> {
        Regex::compile(expr, false)
    }

    /// Compile with leftmost-longest (POSIX) match semantics.
    pub fn new_posix(expr: &str) -> Result<Regex, CompileError> {
        Regex::compile(expr, true)
    }

    fn compile(expr: &str, longest: bool) -> Result<Regex, CompileError> {
        let hir = compile::parse(expr)?;
        let prog = compile::compile(&hir)?;
        let prefix = prog.prefix();
        let start_cond = prog.start_cond();
        let mpool = pool_class(prog.len());
        Ok(Regex {
            core: Arc::new(RegexCore {
                expr: expr.to_string(),
                prog,
                prefix,
                start_cond,
                longest,
                mpool,
            }),
        })
    }

    /// Check a machine out of the pool, rebound to this program. Queues and
    /// pooled capture arrays are resized to fit.
    pub fn get(&self) -> Machine {
        let mut parts = pools()[self.core.mpool]
            .lock()
            .pop()
            .unwrap_or_default();
        let n = match MATCH_SIZE[self.core.mpool] {
            0 => self.core.prog.len(),
            n => n,
        };
        if parts.q0.capacity() < n {
            parts.q0 = Queue::with_capacity(n);
            parts.q1 = Queue::with_capacity(n);
        }
        let ncap = self.core.prog.num_cap;
        for t in &mut parts.pool {
            t.resize(ncap, 0);
        }
        Machine::new(Arc::clone(&self.core), parts.q0, parts.q1, parts.pool)
    }

    /// Return a machine to the pool. The machine must not be used again.
    pub fn put(&self, mut machine: Machine) {
        machine.reset();
        pools()[self.core.mpool].lock().push(MachineParts {
            q0: machine.q0,
            q1: machine.q1,
            pool: machine.pool,
        });
    }
}

impl std::fmt::Debug for Regex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Regex")
            .field("expr", &self.core.expr)
            .field("longest", &self.core.longest)
            .finish()
    }
}

/// Reusable allocation set stored between machine checkouts.
#[derive(Default)]
struct MachineParts {
    q0: Queue,
    q1: Queue,
    pool: Vec<CapVec>,
}

/// Queue capacities per pool size class; 0 is the catch-all where queues
/// are sized to the program.
const MATCH_SIZE: [usize; 5] = [128, 512, 2048, 16384, 0];

fn pool_class(prog_len: usize) -> usize {
    let mut i = 0;
    while MATCH_SIZE[i] != 0 && MATCH_SIZE[i] < prog_len {
        i += 1;
    }
    i
}

fn pools() -> &'static [Mutex<Vec<MachineParts>>; 5] {
    static POOLS: OnceLock<[Mutex<Vec<MachineParts>>; 5]> = OnceLock::new();
    POOLS.get_or_init(|| std::array::from_fn(|_| Mutex::new(Vec::new())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_class_selection() {
        assert_eq!(pool_class(10), 0);
        assert_eq!(pool_class(128), 0);
        assert_eq!(pool_class(129), 1);
        assert_eq!(pool_class(2048), 2);
        assert_eq!(pool_class(16384), 3);
        assert_eq!(pool_class(100_000), 4);
    }

    #[test]
    fn test_get_put_round_trip() {
        let re = Regex::new("roundtrip").unwrap();
        let m1 = re.get();
        re.put(m1);
        // The recycled machine must behave like a fresh one.
        let mut m2 = re.get();
        let (idx, off, ok) = m2.find(0, 0, b"a roundtrip b");
        assert_eq!((idx, off, ok), (2, 9, true));
        re.put(m2);
    }

    #[test]
    fn test_pool_shared_across_programs_in_class() {
        // Two small programs share size class 0; a machine used by one must
        // rebind cleanly to the other.
        let re_a = Regex::new("alpha").unwrap();
        let re_b = Regex::new("(bet)(a)").unwrap();
        let mut m = re_a.get();
        let (_, _, ok) = m.find(0, 0, b"xx alpha");
        assert!(ok);
        re_a.put(m);
        let mut m = re_b.get();
        let (idx, off, ok) = m.find(0, 0, b"beta");
        assert_eq!((idx, off, ok), (0, 4, true));
        re_b.put(m);
    }

    #[test]
    fn test_invalid_pattern_is_error() {
        assert!(Regex::new("(unclosed").is_err());
        assert!(Regex::new("ok").is_ok());
    }

    #[test]
    fn test_concurrent_checkout() {
        // The compiled program is shared; each thread gets its own machine.
        let re = Regex::new("needle").unwrap();
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let re = re.clone();
                std::thread::spawn(move || {
                    let mut m = re.get();
                    let (idx, off, ok) = m.find(0, 0, b"hay needle hay");
                    re.put(m);
                    (idx, off, ok)
                })
            })
            .collect();
        for h in handles {
            assert_eq!(h.join().unwrap(), (4, 6, true));
        }
    }
}
