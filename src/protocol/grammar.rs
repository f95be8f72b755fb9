//! A small matcher for the comma and pipe separated ASCII sentences devices send.
//!
//! A [`Grammar`] is an ordered list of [`Slot`]s. Matching is anchored at both
//! ends and backtracks like a regular expression: variable width tokens try
//! their longest match first, optional blocks are tried before being skipped,
//! and alternatives are tried in order. A successful match yields [`Captures`],
//! read strictly left to right by the code decoding that kind of sentence.

use std::ops::Range;


#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Token {
    /// `min..=max` decimal digits
    Digits { min: usize, max: usize },

    /// `min..=max` hex digits, either case
    Hex { min: usize, max: usize },

    /// `d+.d+`
    Decimal,

    /// `d+[.d*]`
    Number,

    /// `[-]d+`
    SignedInteger,

    /// `[-]d+[.d*]`
    SignedNumber,

    /// Degrees followed by two digit decimal minutes: `d+dd.d+`
    Coordinate,

    /// A single character from the set.
    OneOf(&'static str),

    /// Any run (possibly empty) of characters not in the set.
    NoneOf(&'static str),

    /// Everything up to the end of the line.
    Rest,
}

pub const UNBOUNDED: usize = usize::MAX;

fn run(input: &[u8], pred: impl Fn(u8) -> bool) -> usize {
    input.iter().take_while(|b| pred(**b)).count()
}

fn is_digit(b: u8) -> bool {
    b.is_ascii_digit()
}

/// Lengths of `d+[.d*]` at the start of `input`, longest first.
fn number_lengths(input: &[u8]) -> Vec<usize> {
    let int = run(input, is_digit);
    if int == 0 {
        return vec![];
    }

    let mut lengths = vec![];
    if input.get(int) == Some(&b'.') {
        let frac = run(&input[int + 1..], is_digit);
        lengths.extend((int + 1..=int + 1 + frac).rev());
    }
    lengths.extend((1..=int).rev());
    lengths
}

/// Lengths of `d{min_int,}.d+` at the start of `input`, longest first.
fn decimal_lengths(input: &[u8], min_int: usize) -> Vec<usize> {
    let int = run(input, is_digit);
    if int < min_int || input.get(int) != Some(&b'.') {
        return vec![];
    }

    let frac = run(&input[int + 1..], is_digit);
    (int + 2..=int + 1 + frac).rev().collect()
}

fn bounded_lengths(count: usize, min: usize, max: usize) -> Vec<usize> {
    let count = count.min(max);
    if count < min {
        return vec![];
    }
    (min..=count).rev().collect()
}

fn signed(input: &[u8], lengths: impl Fn(&[u8]) -> Vec<usize>) -> Vec<usize> {
    match input.first() {
        Some(b'-') => lengths(&input[1..]).into_iter().map(|len| len + 1).collect(),
        _ => lengths(input),
    }
}

impl Token {
    /// Every length this token can match at the start of `input`, in the
    /// order they should be tried.
    fn lengths(&self, input: &[u8]) -> Vec<usize> {
        match *self {
            Token::Digits { min, max } => bounded_lengths(run(input, is_digit), min, max),
            Token::Hex { min, max } => bounded_lengths(run(input, |b| b.is_ascii_hexdigit()), min, max),
            Token::Decimal => decimal_lengths(input, 1),
            Token::Number => number_lengths(input),
            Token::SignedInteger => signed(input, |input| bounded_lengths(run(input, is_digit), 1, UNBOUNDED)),
            Token::SignedNumber => signed(input, number_lengths),
            Token::Coordinate => decimal_lengths(input, 3),
            Token::OneOf(set) => match input.first() {
                Some(b) if set.as_bytes().contains(b) => vec![1],
                _ => vec![],
            },
            Token::NoneOf(set) => {
                let count = run(input, |b| !set.as_bytes().contains(&b));
                (0..=count).rev().collect()
            }
            Token::Rest => {
                let count = run(input, |b| b != b'\r' && b != b'\n');
                (0..=count).rev().collect()
            }
        }
    }
}


#[derive(Clone, Debug)]
pub enum Slot {
    Literal(&'static str),

    /// Token that must match but is not captured.
    Match(Token),

    /// Captured token and its capture index.
    Capture(Token, usize),

    /// Block matched as a whole or not at all.
    Optional(Vec<Slot>),

    /// Exactly one of the alternatives, tried in order, and the alternation index.
    Either(Vec<Vec<Slot>>, usize),
}

pub fn lit(text: &'static str) -> Slot {
    Slot::Literal(text)
}

pub fn skip(token: Token) -> Slot {
    Slot::Match(token)
}

pub fn capture(token: Token) -> Slot {
    Slot::Capture(token, 0)
}

pub fn optional(slots: Vec<Slot>) -> Slot {
    Slot::Optional(slots)
}

pub fn either(alternatives: Vec<Vec<Slot>>) -> Slot {
    Slot::Either(alternatives, 0)
}

pub fn digits(n: usize) -> Token {
    Token::Digits { min: n, max: n }
}

pub fn hex(n: usize) -> Token {
    Token::Hex { min: n, max: n }
}


#[derive(Debug)]
pub struct Grammar {
    name: &'static str,
    slots: Vec<Slot>,
    groups: usize,
    alternations: usize,
}

#[derive(Default)]
struct Counters {
    groups: usize,
    alternations: usize,
}

fn number(slots: &mut [Slot], counters: &mut Counters) {
    for slot in slots {
        match slot {
            Slot::Literal(_) | Slot::Match(_) => {}
            Slot::Capture(_, index) => {
                *index = counters.groups;
                counters.groups += 1;
            }
            Slot::Optional(inner) => number(inner, counters),
            Slot::Either(alternatives, index) => {
                *index = counters.alternations;
                counters.alternations += 1;
                for alternative in alternatives {
                    number(alternative, counters);
                }
            }
        }
    }
}

impl Grammar {
    /// Assigns capture and alternation indexes in declaration order.
    pub fn new(name: &'static str, mut slots: Vec<Slot>) -> Self {
        let mut counters = Counters::default();
        number(&mut slots, &mut counters);

        Self {
            name,
            slots,
            groups: counters.groups,
            alternations: counters.alternations,
        }
    }

    /// Number of captures a match produces.
    pub fn groups(&self) -> usize {
        self.groups
    }

    /// Match the whole of `input`, returning `None` unless every required slot matched.
    pub fn parse<'s>(&self, input: &'s str) -> Option<Captures<'s>> {
        let mut state = State {
            groups: vec![None; self.groups],
            alternatives: vec![None; self.alternations],
        };

        let cont = Cont { slots: &self.slots, next: None };

        if !matches(Some(&cont), input.as_bytes(), 0, &mut state) {
            tracing::trace!(grammar = self.name, input, "sentence did not match");
            return None;
        }

        Some(Captures {
            input,
            groups: state.groups,
            alternatives: state.alternatives,
            cursor: 0,
        })
    }
}


#[derive(Clone)]
struct State {
    groups: Vec<Option<Range<usize>>>,
    alternatives: Vec<Option<usize>>,
}

/// Slots still to be matched: the remainder of the current block, then its parents'.
struct Cont<'a> {
    slots: &'a [Slot],
    next: Option<&'a Cont<'a>>,
}

fn matches(cont: Option<&Cont<'_>>, input: &[u8], pos: usize, state: &mut State) -> bool {
    let Some(cont) = cont else {
        return pos == input.len();
    };

    let Some((slot, rest)) = cont.slots.split_first() else {
        return matches(cont.next, input, pos, state);
    };

    let after = Cont { slots: rest, next: cont.next };
    let remaining = &input[pos..];

    match slot {
        Slot::Literal(text) => {
            remaining.starts_with(text.as_bytes()) && matches(Some(&after), input, pos + text.len(), state)
        }

        Slot::Match(token) => token
            .lengths(remaining)
            .into_iter()
            .any(|len| matches(Some(&after), input, pos + len, state)),

        Slot::Capture(token, index) => {
            for len in token.lengths(remaining) {
                state.groups[*index] = Some(pos..pos + len);
                if matches(Some(&after), input, pos + len, state) {
                    return true;
                }
            }
            state.groups[*index] = None;
            false
        }

        Slot::Optional(inner) => {
            let saved = state.clone();
            let block = Cont { slots: inner, next: Some(&after) };
            if matches(Some(&block), input, pos, state) {
                return true;
            }
            *state = saved;
            matches(Some(&after), input, pos, state)
        }

        Slot::Either(alternatives, index) => {
            for (n, alternative) in alternatives.iter().enumerate() {
                let saved = state.clone();
                state.alternatives[*index] = Some(n);
                let block = Cont { slots: alternative, next: Some(&after) };
                if matches(Some(&block), input, pos, state) {
                    return true;
                }
                *state = saved;
            }
            false
        }
    }
}


/// Result of a successful match. Each `next*` call consumes one capture, present or not.
#[derive(Debug)]
pub struct Captures<'s> {
    input: &'s str,
    groups: Vec<Option<Range<usize>>>,
    alternatives: Vec<Option<usize>>,
    cursor: usize,
}

impl<'s> Captures<'s> {
    pub fn next(&mut self) -> Option<&'s str> {
        let group = self.groups.get(self.cursor).cloned().flatten();
        self.cursor += 1;
        group.and_then(|range| self.input.get(range))
    }

    pub fn skip(&mut self, count: usize) {
        self.cursor += count;
    }

    /// Which alternative of the `index`th alternation matched, if the
    /// alternation took part in the match at all.
    pub fn alternative(&self, index: usize) -> Option<usize> {
        self.alternatives.get(index).copied().flatten()
    }

    pub fn next_int(&mut self) -> Option<i64> {
        self.next()?.parse().ok()
    }

    pub fn next_u32(&mut self) -> Option<u32> {
        self.next()?.parse().ok()
    }

    pub fn next_f64(&mut self) -> Option<f64> {
        self.next()?.parse().ok()
    }

    pub fn next_hex_u32(&mut self) -> Option<u32> {
        u32::from_str_radix(self.next()?, 16).ok()
    }

    pub fn next_hex_u64(&mut self) -> Option<u64> {
        u64::from_str_radix(self.next()?, 16).ok()
    }

    /// Consume a [`Token::Coordinate`] capture and its hemisphere capture,
    /// returning signed decimal degrees. `S` and `W` are negative.
    pub fn next_coordinate(&mut self) -> Option<f64> {
        let value = self.next();
        let hemisphere = self.next();

        let value = value?;
        let split = value.find('.')?.checked_sub(2)?;
        let degrees: f64 = value[..split].parse().ok()?;
        let minutes: f64 = value[split..].parse().ok()?;

        let coordinate = degrees + minutes / 60.0;

        match hemisphere {
            Some("S" | "W") => Some(-coordinate),
            _ => Some(coordinate),
        }
    }
}
