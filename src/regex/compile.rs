//! Compilation from `regex-syntax` HIR to the instruction program.
//!
//! Classic Thompson construction with patch lists: every fragment is a start
//! pc plus the set of unfilled exits, stitched together bottom-up. The
//! parser has already resolved case folding and flag scoping, so classes
//! arrive pre-folded and the compiler only deals in structure.

use regex_syntax::hir::{Class, Hir, HirKind, Look};
use regex_syntax::ParserBuilder;
use std::fmt;

use super::prog::{EmptyOp, Inst, InstOp, Prog};

/// Ceiling on counted-repetition expansion, matching the limit the
/// reference engines in this space use for untrusted patterns.
pub const MAX_REPEAT: u32 = 1000;

#[derive(Debug)]
pub enum CompileError {
    /// The expression does not parse.
    Parse(Box<regex_syntax::Error>),
    /// A look-around assertion the engine cannot evaluate (anything beyond
    /// text/line anchors and word boundaries).
    UnsupportedLook(String),
    /// A byte-oriented character class; the engine decodes runes.
    UnsupportedClass,
    /// `{n,m}` exceeds [`MAX_REPEAT`]. Carries `(requested, limit)`.
    RepetitionTooLarge(u32, u32),
    /// The pattern can match the empty string, which a delimiter never may.
    EmptyMatch,
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompileError::Parse(err) => write!(f, "{err}"),
            CompileError::UnsupportedLook(look) => {
                write!(f, "unsupported look-around assertion: {look}")
            }
            CompileError::UnsupportedClass => write!(f, "unsupported byte-oriented class"),
            CompileError::RepetitionTooLarge(n, limit) => {
                write!(f, "repetition count {n} exceeds limit {limit}")
            }
            CompileError::EmptyMatch => {
                write!(f, "pattern can match the empty string")
            }
        }
    }
}

impl std::error::Error for CompileError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CompileError::Parse(err) => Some(err),
            _ => None,
        }
    }
}

/// Parse an expression into HIR and reject delimiters that could match
/// empty.
pub(crate) fn parse(expr: &str) -> Result<Hir, CompileError> {
    let hir = ParserBuilder::new()
        .build()
        .parse(expr)
        .map_err(|e| CompileError::Parse(Box::new(e)))?;
    if hir.properties().minimum_len() == Some(0) {
        return Err(CompileError::EmptyMatch);
    }
    Ok(hir)
}

/// An unfilled branch target: the pc whose `out` (or `arg`) field still
/// points at the reserved Fail instruction.
#[derive(Clone, Copy, Debug)]
struct Hole {
    pc: u32,
    to_arg: bool,
}

/// A compiled sub-expression: entry pc plus its dangling exits.
struct Frag {
    start: u32,
    out: Vec<Hole>,
}

struct Compiler {
    insts: Vec<Inst>,
    max_cap_slot: usize,
}

/// Compile HIR into an executable program.
pub(crate) fn compile(hir: &Hir) -> Result<Prog, CompileError> {
    let mut c = Compiler {
        // insts[0] is the reserved Fail; holes point here until filled.
        insts: vec![Inst::new(InstOp::Fail)],
        max_cap_slot: 1,
    };
    let f0 = c.cap(0);
    let body = c.hir(hir)?;
    let f = c.cat(f0, body);
    let f1 = c.cap(1);
    let f = c.cat(f, f1);
    let end = c.push(Inst::new(InstOp::Match));
    c.fill(&f.out, end);
    Ok(Prog {
        insts: c.insts,
        start: f.start,
        num_cap: c.max_cap_slot + 1,
    })
}

impl Compiler {
    fn push(&mut self, inst: Inst) -> u32 {
        let pc = self.insts.len() as u32;
        self.insts.push(inst);
        pc
    }

    fn fill(&mut self, holes: &[Hole], pc: u32) {
        for hole in holes {
            let inst = &mut self.insts[hole.pc as usize];
            if hole.to_arg {
                inst.arg = pc;
            } else {
                inst.out = pc;
            }
        }
    }

    fn hir(&mut self, hir: &Hir) -> Result<Frag, CompileError> {
        match hir.kind() {
            HirKind::Empty => Ok(self.nop()),
            HirKind::Literal(lit) => {
                let text = std::str::from_utf8(&lit.0)
                    .map_err(|_| CompileError::UnsupportedClass)?;
                let mut frag: Option<Frag> = None;
                for ch in text.chars() {
                    let next = self.rune1(ch);
                    frag = Some(match frag {
                        Some(f) => self.cat(f, next),
                        None => next,
                    });
                }
                Ok(frag.unwrap_or_else(|| self.nop()))
            }
            HirKind::Class(class) => self.class(class),
            HirKind::Look(look) => {
                let op = look_op(*look)
                    .ok_or_else(|| CompileError::UnsupportedLook(format!("{look:?}")))?;
                Ok(self.empty_width(op))
            }
            HirKind::Capture(capture) => {
                let lo = 2 * capture.index as usize;
                let hi = lo + 1;
                self.max_cap_slot = self.max_cap_slot.max(hi);
                let open = self.cap(lo as u32);
                let sub = self.hir(&capture.sub)?;
                let f = self.cat(open, sub);
                let close = self.cap(hi as u32);
                Ok(self.cat(f, close))
            }
            HirKind::Concat(subs) => {
                let mut frag: Option<Frag> = None;
                for sub in subs {
                    let next = self.hir(sub)?;
                    frag = Some(match frag {
                        Some(f) => self.cat(f, next),
                        None => next,
                    });
                }
                Ok(frag.unwrap_or_else(|| self.nop()))
            }
            HirKind::Alternation(subs) => {
                // Fold right-to-left so the leftmost alternative gets the
                // highest thread priority.
                let mut frag: Option<Frag> = None;
                for sub in subs.iter().rev() {
                    let this = self.hir(sub)?;
                    frag = Some(match frag {
                        Some(rest) => self.alt(this, rest),
                        None => this,
                    });
                }
                Ok(frag.unwrap_or_else(|| self.nop()))
            }
            HirKind::Repetition(rep) => {
                let greedy = rep.greedy;
                match (rep.min, rep.max) {
                    (0, Some(1)) => {
                        let f = self.hir(&rep.sub)?;
                        Ok(self.quest(f, greedy))
                    }
                    (0, None) => {
                        let f = self.hir(&rep.sub)?;
                        Ok(self.star(f, greedy))
                    }
                    (1, None) => {
                        let f = self.hir(&rep.sub)?;
                        Ok(self.plus(f, greedy))
                    }
                    (min, None) => {
                        if min > MAX_REPEAT {
                            return Err(CompileError::RepetitionTooLarge(min, MAX_REPEAT));
                        }
                        // x{n,} compiles as x^(n-1) followed by x+.
                        let mut frag: Option<Frag> = None;
                        for _ in 0..min - 1 {
                            let f = self.hir(&rep.sub)?;
                            frag = Some(match frag {
                                Some(acc) => self.cat(acc, f),
                                None => f,
                            });
                        }
                        let last = self.hir(&rep.sub)?;
                        let p = self.plus(last, greedy);
                        Ok(match frag {
                            Some(acc) => self.cat(acc, p),
                            None => p,
                        })
                    }
                    (min, Some(max)) => {
                        if max > MAX_REPEAT {
                            return Err(CompileError::RepetitionTooLarge(max, MAX_REPEAT));
                        }
                        if max == 0 {
                            return Ok(self.nop());
                        }
                        // x{n,m} compiles as x^n (x (x ...)?)? — nested so
                        // a skipped copy cannot be followed by a taken one.
                        let mut tail: Option<Frag> = None;
                        for _ in min..max {
                            let f = self.hir(&rep.sub)?;
                            let inner = match tail {
                                Some(t) => self.cat(f, t),
                                None => f,
                            };
                            tail = Some(self.quest(inner, greedy));
                        }
                        let mut head: Option<Frag> = None;
                        for _ in 0..min {
                            let f = self.hir(&rep.sub)?;
                            head = Some(match head {
                                Some(acc) => self.cat(acc, f),
                                None => f,
                            });
                        }
                        Ok(match (head, tail) {
                            (Some(h), Some(t)) => self.cat(h, t),
                            (Some(h), None) => h,
                            (None, Some(t)) => t,
                            (None, None) => self.nop(),
                        })
                    }
                }
            }
        }
    }

    fn class(&mut self, class: &Class) -> Result<Frag, CompileError> {
        let cls = match class {
            Class::Unicode(cls) => cls,
            Class::Bytes(_) => return Err(CompileError::UnsupportedClass),
        };
        let ranges = cls.ranges();
        if ranges.len() == 1 && ranges[0].start() == ranges[0].end() {
            return Ok(self.rune1(ranges[0].start()));
        }
        if ranges.len() == 1 && ranges[0].start() == '\0' && ranges[0].end() == char::MAX {
            let pc = self.push(Inst::new(InstOp::RuneAny));
            return Ok(Frag {
                start: pc,
                out: vec![Hole { pc, to_arg: false }],
            });
        }
        if ranges.len() == 2
            && ranges[0].start() == '\0'
            && ranges[0].end() == '\u{9}'
            && ranges[1].start() == '\u{b}'
            && ranges[1].end() == char::MAX
        {
            let pc = self.push(Inst::new(InstOp::RuneAnyNotNL));
            return Ok(Frag {
                start: pc,
                out: vec![Hole { pc, to_arg: false }],
            });
        }
        let mut runes = Vec::with_capacity(ranges.len() * 2);
        for r in ranges {
            runes.push(r.start());
            runes.push(r.end());
        }
        let mut inst = Inst::new(InstOp::Rune);
        inst.runes = runes;
        let pc = self.push(inst);
        Ok(Frag {
            start: pc,
            out: vec![Hole { pc, to_arg: false }],
        })
    }

    fn nop(&mut self) -> Frag {
        let pc = self.push(Inst::new(InstOp::Nop));
        Frag {
            start: pc,
            out: vec![Hole { pc, to_arg: false }],
        }
    }

    fn rune1(&mut self, ch: char) -> Frag {
        let mut inst = Inst::new(InstOp::Rune1);
        inst.runes = vec![ch];
        let pc = self.push(inst);
        Frag {
            start: pc,
            out: vec![Hole { pc, to_arg: false }],
        }
    }

    fn empty_width(&mut self, op: EmptyOp) -> Frag {
        let mut inst = Inst::new(InstOp::EmptyWidth);
        inst.arg = op.0 as u32;
        let pc = self.push(inst);
        Frag {
            start: pc,
            out: vec![Hole { pc, to_arg: false }],
        }
    }

    fn cap(&mut self, slot: u32) -> Frag {
        let mut inst = Inst::new(InstOp::Capture);
        inst.arg = slot;
        let pc = self.push(inst);
        Frag {
            start: pc,
            out: vec![Hole { pc, to_arg: false }],
        }
    }

    fn cat(&mut self, f1: Frag, f2: Frag) -> Frag {
        self.fill(&f1.out, f2.start);
        Frag {
            start: f1.start,
            out: f2.out,
        }
    }

    /// `f1` gets thread priority over `f2`.
    fn alt(&mut self, f1: Frag, f2: Frag) -> Frag {
        let mut inst = Inst::new(InstOp::Alt);
        inst.out = f1.start;
        inst.arg = f2.start;
        let pc = self.push(inst);
        let mut out = f1.out;
        out.extend(f2.out);
        Frag { start: pc, out }
    }

    fn quest(&mut self, f: Frag, greedy: bool) -> Frag {
        let mut inst = Inst::new(InstOp::Alt);
        let pc = self.insts.len() as u32;
        let skip = Hole {
            pc,
            to_arg: greedy,
        };
        if greedy {
            inst.out = f.start;
        } else {
            inst.arg = f.start;
        }
        self.push(inst);
        let mut out = f.out;
        out.push(skip);
        Frag { start: pc, out }
    }

    fn star(&mut self, f: Frag, greedy: bool) -> Frag {
        let mut inst = Inst::new(InstOp::Alt);
        let pc = self.insts.len() as u32;
        let exit = Hole {
            pc,
            to_arg: greedy,
        };
        if greedy {
            inst.out = f.start;
        } else {
            inst.arg = f.start;
        }
        self.push(inst);
        self.fill(&f.out, pc);
        Frag {
            start: pc,
            out: vec![exit],
        }
    }

    /// Like `star`, but entered through the body: the loop-back Alt only
    /// runs after at least one iteration.
    fn plus(&mut self, f: Frag, greedy: bool) -> Frag {
        let start = f.start;
        let looped = self.star(f, greedy);
        Frag {
            start,
            out: looped.out,
        }
    }
}

fn look_op(look: Look) -> Option<EmptyOp> {
    match look {
        Look::Start => Some(EmptyOp::BEGIN_TEXT),
        Look::End => Some(EmptyOp::END_TEXT),
        Look::StartLF | Look::StartCRLF => Some(EmptyOp::BEGIN_LINE),
        Look::EndLF | Look::EndCRLF => Some(EmptyOp::END_LINE),
        Look::WordAscii | Look::WordUnicode => Some(EmptyOp::WORD_BOUNDARY),
        Look::WordAsciiNegate | Look::WordUnicodeNegate => Some(EmptyOp::NO_WORD_BOUNDARY),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prog_of(expr: &str) -> Prog {
        compile(&parse(expr).unwrap()).unwrap()
    }

    fn count_op(prog: &Prog, op: InstOp) -> usize {
        prog.insts.iter().filter(|i| i.op == op).count()
    }

    #[test]
    fn test_literal_chain() {
        let prog = prog_of("abc");
        assert_eq!(count_op(&prog, InstOp::Rune1), 3);
        assert_eq!(count_op(&prog, InstOp::Match), 1);
        assert_eq!(prog.num_cap, 2);
        assert_eq!(prog.prefix(), b"abc");
        assert_eq!(prog.start_cond(), Some(EmptyOp::NONE));
    }

    #[test]
    fn test_anchored_start_cond() {
        let prog = prog_of("^abc");
        assert_eq!(prog.start_cond(), Some(EmptyOp::BEGIN_TEXT));
        assert_eq!(prog.prefix(), b"abc");
    }

    #[test]
    fn test_alternation_priority_order() {
        // Multi-char alternatives keep the HIR an alternation (single-char
        // ones may be merged into a class by the parser).
        let prog = prog_of("ab|cd|ef");
        assert_eq!(count_op(&prog, InstOp::Alt), 2);
        assert!(prog.prefix().is_empty());
        // Walking in from the start, the Alt's first-explored arm must be
        // the leftmost alternative.
        let mut pc = prog.start as usize;
        while matches!(prog.insts[pc].op, InstOp::Capture | InstOp::Nop) {
            pc = prog.insts[pc].out as usize;
        }
        assert_eq!(prog.insts[pc].op, InstOp::Alt);
        let first_arm = prog.insts[pc].out as usize;
        assert_eq!(prog.insts[first_arm].runes, vec!['a']);
    }

    #[test]
    fn test_class_compiles_to_rune_pairs() {
        let prog = prog_of("[a-cx-z]1");
        let rune = prog
            .insts
            .iter()
            .find(|i| i.op == InstOp::Rune)
            .expect("class instruction");
        assert_eq!(rune.runes, vec!['a', 'c', 'x', 'z']);
    }

    #[test]
    fn test_dot_ops() {
        let prog = prog_of("a.b");
        assert_eq!(count_op(&prog, InstOp::RuneAnyNotNL), 1);
        let prog = prog_of("(?s)a.b");
        assert_eq!(count_op(&prog, InstOp::RuneAny), 1);
    }

    #[test]
    fn test_counted_repetition_expansion() {
        let prog = prog_of("a{2,4}");
        // Two required copies plus two optional ones.
        assert_eq!(count_op(&prog, InstOp::Rune1), 4);
        assert_eq!(count_op(&prog, InstOp::Alt), 2);
    }

    #[test]
    fn test_min_only_repetition() {
        let prog = prog_of("a{3,}");
        // Two plain copies and a plus loop.
        assert_eq!(count_op(&prog, InstOp::Rune1), 3);
        assert_eq!(count_op(&prog, InstOp::Alt), 1);
    }

    #[test]
    fn test_repetition_limit() {
        let err = compile(&parse("a{1,5000}").unwrap()).unwrap_err();
        assert!(matches!(
            err,
            CompileError::RepetitionTooLarge(5000, MAX_REPEAT)
        ));
    }

    #[test]
    fn test_capture_slots() {
        let prog = prog_of("(a)(b)");
        // Slots 0..=5: outer match plus two groups.
        assert_eq!(prog.num_cap, 6);
        assert_eq!(count_op(&prog, InstOp::Capture), 6);
    }

    #[test]
    fn test_case_insensitive_folds_at_parse() {
        let prog = prog_of("(?i)ab");
        // Folded literals become classes; the VM never folds.
        assert_eq!(count_op(&prog, InstOp::Rune1), 0);
        assert_eq!(count_op(&prog, InstOp::Rune), 2);
    }

    #[test]
    fn test_empty_match_rejected() {
        assert!(matches!(parse("a*"), Err(CompileError::EmptyMatch)));
        assert!(matches!(parse(""), Err(CompileError::EmptyMatch)));
        assert!(matches!(parse("a?"), Err(CompileError::EmptyMatch)));
        assert!(parse("a+").is_ok());
    }

    #[test]
    fn test_parse_error_surfaces() {
        assert!(matches!(parse("a{"), Ok(_) | Err(CompileError::Parse(_))));
        assert!(matches!(parse("(a"), Err(CompileError::Parse(_))));
    }

    #[test]
    fn test_word_boundary_look() {
        let prog = prog_of(r"\bword\b");
        assert_eq!(count_op(&prog, InstOp::EmptyWidth), 2);
    }
}
