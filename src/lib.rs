//! bookend: streaming extraction of head/tail-delimited regions
//!
//! A [`Matcher`] consumes an arbitrarily chunked byte stream and classifies
//! every byte as outside any pair ([`State::None`]), part of the head
//! delimiter ([`State::Head`]), between the delimiters ([`State::Body`]), or
//! part of the tail delimiter ([`State::Tail`]). Output is released as
//! eagerly as possible: only the suffix that could still extend into a
//! delimiter match is held across chunk boundaries.
//!
//! Delimiters are literal byte strings matched with a resumable KMP scan,
//! or regular expressions matched with a resumable NFA simulation.
//!
//! ```
//! use bookend::{Matcher, Pair, State};
//!
//! let pair = Pair::new("prologue", "epilogue");
//! let mut matcher = Matcher::new(&pair).unwrap();
//! let segments: Vec<_> = matcher.matches("prologue middle epilogue").collect();
//! assert_eq!(segments.len(), 3);
//! assert_eq!(segments[0].state(), State::Head);
//! assert_eq!(segments[1].to_string(), " middle ");
//! assert!(matcher.drain().is_empty());
//! matcher.close().unwrap();
//! ```
//!
//! A `Matcher` is not safe for concurrent use; a compiled regex pair may
//! back any number of matchers concurrently.

mod buffer;
mod pattern;
mod regex;

use std::borrow::Cow;
use std::fmt;

use buffer::ByteBuffer;
use pattern::{KmpPattern, Pattern, RegexPattern};
use regex::Regex;

/// Errors surfaced by the public API.
#[derive(Debug)]
pub enum Error {
    /// `close` was called while classified-but-unread bytes remain; call
    /// [`Matcher::drain`] first.
    BufferNotDrained,
    /// A delimiter must be at least one byte (and a regex delimiter must
    /// not match the empty string).
    EmptyDelimiter,
    /// A regex delimiter failed to compile.
    InvalidPattern(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::BufferNotDrained => write!(f, "matcher closed without drained buffer"),
            Error::EmptyDelimiter => write!(f, "delimiter must match at least one byte"),
            Error::InvalidPattern(msg) => write!(f, "invalid pattern: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

/// Match semantics for a regex delimiter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegexMode {
    /// Leftmost-first, as Perl and friends resolve ambiguity.
    Perl,
    /// Leftmost-longest, as POSIX specifies.
    Posix,
}

/// Classification of an emitted segment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    /// Outside any pair.
    None,
    /// The head delimiter.
    Head,
    /// Between head and tail.
    Body,
    /// The tail delimiter.
    Tail,
}

impl State {
    /// Which sub-matcher is active while searching in this state.
    fn pattern_index(self) -> usize {
        match self {
            State::None | State::Head => 0,
            State::Body | State::Tail => 1,
        }
    }

    /// The label of the delimiter found while searching in this state.
    fn delimiter(self) -> State {
        match self {
            State::None => State::Head,
            State::Body => State::Tail,
            _ => unreachable!("delimiter() on a non-searching state"),
        }
    }

    /// The searching state entered after this state's delimiter matched.
    fn flip(self) -> State {
        match self {
            State::None => State::Body,
            State::Body => State::None,
            _ => unreachable!("flip() on a non-searching state"),
        }
    }
}

/// A head/tail delimiter configuration.
///
/// Delimiters are literal unless a regex mode is selected:
///
/// ```
/// use bookend::{Pair, RegexMode};
///
/// let literal = Pair::new("BEGIN", "END");
/// let tagged = Pair::new("<[a-z]+>", "</[a-z]+>")
///     .regex_head(RegexMode::Perl)
///     .regex_tail(RegexMode::Perl);
/// # let _ = (literal, tagged);
/// ```
#[derive(Clone, Debug)]
pub struct Pair {
    head: String,
    tail: String,
    head_mode: Option<RegexMode>,
    tail_mode: Option<RegexMode>,
}

impl Pair {
    pub fn new(head: impl Into<String>, tail: impl Into<String>) -> Pair {
        Pair {
            head: head.into(),
            tail: tail.into(),
            head_mode: None,
            tail_mode: None,
        }
    }

    /// Treat the head delimiter as a regular expression.
    pub fn regex_head(mut self, mode: RegexMode) -> Pair {
        self.head_mode = Some(mode);
        self
    }

    /// Treat the tail delimiter as a regular expression.
    pub fn regex_tail(mut self, mode: RegexMode) -> Pair {
        self.tail_mode = Some(mode);
        self
    }
}

fn build_pattern(source: &str, mode: Option<RegexMode>) -> Result<Box<dyn Pattern>, Error> {
    match mode {
        None => {
            if source.is_empty() {
                return Err(Error::EmptyDelimiter);
            }
            Ok(Box::new(KmpPattern::new(source.as_bytes())))
        }
        Some(mode) => {
            let re = match mode {
                RegexMode::Perl => Regex::new(source),
                RegexMode::Posix => Regex::new_posix(source),
            }
            .map_err(|err| match err {
                regex::CompileError::EmptyMatch => Error::EmptyDelimiter,
                other => Error::InvalidPattern(other.to_string()),
            })?;
            Ok(Box::new(RegexPattern::new(re)))
        }
    }
}

/// One classified run of bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Segment {
    state: State,
    raw: Vec<u8>,
}

impl Segment {
    /// The classified bytes. Never empty.
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn into_raw(self) -> Vec<u8> {
        self.raw
    }

    /// The matched strings within this segment.
    ///
    /// Yields the segment text once. For regex delimiters this is the full
    /// match; per-capture-group iteration is a planned extension of this
    /// method.
    pub fn matches(&self) -> impl Iterator<Item = Cow<'_, str>> {
        std::iter::once(String::from_utf8_lossy(&self.raw))
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.raw))
    }
}

/// The streaming pair automaton.
///
/// Alternates between searching for the head delimiter (in [`State::None`])
/// and the tail delimiter (in [`State::Body`]), emitting classified
/// segments as soon as bytes are proven not to participate in any future
/// delimiter match.
pub struct Matcher {
    state: State,
    index: usize,
    offset: usize,
    buffer: ByteBuffer,
    /// A recognized delimiter the caller has not pulled yet; emitted ahead
    /// of any further matching so a partially consumed iterator resumes
    /// cleanly.
    pending: Option<Segment>,
    patterns: [Box<dyn Pattern>; 2],
}

impl Matcher {
    pub fn new(pair: &Pair) -> Result<Matcher, Error> {
        let head = build_pattern(&pair.head, pair.head_mode)?;
        let tail = build_pattern(&pair.tail, pair.tail_mode)?;
        Ok(Matcher {
            state: State::None,
            index: 0,
            offset: 0,
            buffer: ByteBuffer::new(),
            pending: None,
            patterns: [head, tail],
        })
    }

    /// Append a chunk and lazily classify as much of the buffer as the new
    /// bytes allow. The returned iterator borrows the matcher; an iterator
    /// dropped part-way leaves the matcher consistent, and the next call
    /// resumes where it stopped.
    pub fn matches(&mut self, chunk: impl AsRef<[u8]>) -> Segments<'_> {
        self.buffer.extend(chunk.as_ref());
        Segments { matcher: self }
    }

    /// Produce the next classified segment, if the buffered bytes resolve
    /// one.
    fn pump(&mut self) -> Option<Segment> {
        if let Some(seg) = self.pending.take() {
            return Some(seg);
        }
        let active = self.state.pattern_index();
        let (index, offset, ok) =
            self.patterns[active].find(self.index, self.offset, self.buffer.bytes());
        if ok {
            let state = self.state;
            self.index = 0;
            self.offset = 0;
            let content = if index > 0 {
                Some(self.buffer.split_to(index))
            } else {
                None
            };
            let delimiter = Segment {
                state: state.delimiter(),
                raw: self.buffer.split_to(offset),
            };
            self.state = state.flip();
            return match content {
                Some(raw) => {
                    self.pending = Some(delimiter);
                    Some(Segment { state, raw })
                }
                None => Some(delimiter),
            };
        }
        self.index = index;
        self.offset = offset;
        if self.index > 0 {
            let raw = self.buffer.split_to(self.index);
            self.index = 0;
            return Some(Segment {
                state: self.state,
                raw,
            });
        }
        None
    }

    /// Return every byte not yet classified and reset the automaton to its
    /// initial state. Call once the input stream is exhausted to recover
    /// the trailing unmatched suffix.
    pub fn drain(&mut self) -> Vec<u8> {
        self.state = State::None;
        self.index = 0;
        self.offset = 0;
        for pattern in &mut self.patterns {
            pattern.reset();
        }
        let mut out = match self.pending.take() {
            Some(seg) => seg.raw,
            None => Vec::new(),
        };
        out.extend(self.buffer.take_all());
        out
    }

    /// Release sub-matcher resources (a regex sub-matcher returns its VM to
    /// the shared pool). Fails with [`Error::BufferNotDrained`] while
    /// unclassified bytes remain, in which case nothing is released and the
    /// matcher is still usable: drain, then close again.
    pub fn close(&mut self) -> Result<(), Error> {
        if self.pending.is_some() || !self.buffer.is_empty() {
            return Err(Error::BufferNotDrained);
        }
        for pattern in &mut self.patterns {
            pattern.clear();
        }
        Ok(())
    }
}

impl fmt::Debug for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Matcher")
            .field("state", &self.state)
            .field("index", &self.index)
            .field("offset", &self.offset)
            .field("buffered", &self.buffer.len())
            .finish()
    }
}

/// Lazy segment sequence returned by [`Matcher::matches`].
pub struct Segments<'m> {
    matcher: &'m mut Matcher,
}

impl Iterator for Segments<'_> {
    type Item = Segment;

    fn next(&mut self) -> Option<Segment> {
        self.matcher.pump()
    }
}
