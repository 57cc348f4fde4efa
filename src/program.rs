// Copyright 2014-2015 The Rust Project Developers. See the COPYRIGHT
// file at the top-level directory of this distribution and at
// http://rust-lang.org/COPYRIGHT.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The immutable, shareable compiled program.

use std::collections::HashMap;

use crate::charclass::CharClass;
use crate::error::{Error, Result};
use crate::options::Options;

/// A small dependency-free bitset, written out by hand rather than
/// pulled in from the `bitflags` crate, since nothing else in this
/// workspace's ancestry depends on it.
macro_rules! bitflags_lite {
    (pub struct $name:ident: $repr:ty { $(const $variant:ident = $val:expr;)* }) => {
        #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
        pub struct $name($repr);

        impl $name {
            $(pub const $variant: $name = $name($val);)*

            pub fn empty() -> $name {
                $name(0)
            }

            pub fn contains(self, other: $name) -> bool {
                self.0 & other.0 == other.0
            }

            pub fn insert(&mut self, other: $name) {
                self.0 |= other.0;
            }

            pub fn is_empty(self) -> bool {
                self.0 == 0
            }
        }

        impl std::ops::BitOr for $name {
            type Output = $name;
            fn bitor(self, rhs: $name) -> $name {
                $name(self.0 | rhs.0)
            }
        }
    };
}

bitflags_lite! {
    pub struct Anchors: u8 {
        const BEGINNING = 0b0001;
        const START     = 0b0010;
        const END       = 0b0100;
        const ENDZ      = 0b1000;
    }
}

/// A literal prefix the Scanner can slide a Boyer-Moore-Horspool search
/// over before ever invoking the interpreter.
#[derive(Clone, Debug)]
pub struct BmPrefix {
    pub pattern: Vec<char>,
    pub case_insensitive: bool,
    /// Horspool bad-character shift table, keyed on the lowercased char
    /// when `case_insensitive` so a single table serves both cases.
    pub shift: HashMap<char, usize>,
}

impl BmPrefix {
    pub fn new(pattern: Vec<char>, case_insensitive: bool) -> Option<BmPrefix> {
        if pattern.is_empty() {
            return None;
        }
        let m = pattern.len();
        let mut shift = HashMap::new();
        for (i, &c) in pattern.iter().enumerate().take(m - 1) {
            let key = if case_insensitive { c.to_ascii_lowercase() } else { c };
            shift.insert(key, m - 1 - i);
        }
        Some(BmPrefix { pattern, case_insensitive, shift })
    }

    fn eq_char(&self, a: char, b: char) -> bool {
        if self.case_insensitive {
            a.to_ascii_lowercase() == b.to_ascii_lowercase()
        } else {
            a == b
        }
    }

    /// Search `text[from..]` for the prefix, returning the match start.
    /// This is the single entry point the scanner's candidate-skipping
    /// logic delegates to when a `bm_prefix` is present.
    pub fn find(&self, text: &[char], from: usize) -> Option<usize> {
        let m = self.pattern.len();
        if from + m > text.len() {
            return None;
        }
        let mut i = from;
        'outer: while i + m <= text.len() {
            let mut j = m;
            while j > 0 {
                j -= 1;
                if !self.eq_char(text[i + j], self.pattern[j]) {
                    let key = if self.case_insensitive {
                        text[i + m - 1].to_ascii_lowercase()
                    } else {
                        text[i + m - 1]
                    };
                    let shift = self.shift.get(&key).copied().unwrap_or(m);
                    i += shift.max(1);
                    continue 'outer;
                }
            }
            return Some(i);
        }
        None
    }
}

#[derive(Clone, Copy, Debug)]
pub struct FirstCharPrefix {
    pub class_id: usize,
    pub case_insensitive: bool,
}

/// Dense <-> sparse capture-slot mapping: declared group numbers may be
/// sparse (named groups are numbered after all positional ones, and
/// balanced groups may skip numbers), but the Match record stores them
/// densely.
#[derive(Clone, Debug, Default)]
pub struct CaptureMap {
    pub slot_of: HashMap<u32, usize>,
    pub names: HashMap<String, u32>,
    pub cap_size: usize,
}

impl CaptureMap {
    pub fn slot(&self, group: u32) -> Option<usize> {
        self.slot_of.get(&group).copied()
    }

    pub fn group_for_name(&self, name: &str) -> Option<u32> {
        self.names.get(name).copied()
    }
}

/// The immutable compiled program: everything the Scanner and
/// Interpreter need, and nothing they're allowed to mutate.
#[derive(Clone, Debug)]
pub struct Program {
    pub original: String,
    pub options: Options,
    pub codes: Vec<i32>,
    pub strings: Vec<String>,
    pub classes: Vec<CharClass>,
    pub track_count: usize,
    pub anchors: Anchors,
    pub first_char_prefix: Option<FirstCharPrefix>,
    pub bm_prefix: Option<BmPrefix>,
    pub right_to_left: bool,
    pub caps: CaptureMap,
}

// Every field here is either `Copy` data or owned and immutable after
// `Program::new` returns, so sharing a `&Program` across threads is
// sound; `Send + Sync` both derive automatically.

impl Program {
    pub fn new(pattern: &str, options: Options) -> Result<Program> {
        let parsed = crate::parse::parse(pattern, options)?;
        crate::compile::compile(pattern, &parsed, options)
    }

    pub fn num_captures(&self) -> usize {
        self.caps.cap_size
    }

    pub fn is_anchored_begin(&self) -> bool {
        self.anchors.contains(Anchors::BEGINNING)
    }

    pub fn is_anchored_end(&self) -> bool {
        self.anchors.contains(Anchors::END) || self.anchors.contains(Anchors::ENDZ)
    }

    pub fn op_at(&self, pc: usize) -> Result<i32> {
        self.codes.get(pc).copied().ok_or_else(|| {
            Error::InternalInvariantViolated(format!(
                "program counter {} out of range ({} codes)",
                pc,
                self.codes.len()
            ))
        })
    }

    pub fn operand(&self, pc: usize, n: usize) -> Result<i32> {
        self.codes.get(pc + 1 + n).copied().ok_or_else(|| {
            Error::InternalInvariantViolated(format!(
                "operand {} of instruction at {} out of range",
                n, pc
            ))
        })
    }
}
