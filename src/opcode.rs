// Copyright 2014-2015 The Rust Project Developers. See the COPYRIGHT
// file at the top-level directory of this distribution and at
// http://rust-lang.org/COPYRIGHT.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The bytecode's opcode encoding: a base opcode in the low bits, and
//! four flag bits layered on top so the same 32-bit word carries both
//! the instruction and the direction/re-entry/case mode it runs under.

/// Re-entered via the track stack's `Back` slot (the first backtrack
/// continuation an opcode defines).
pub const BACK: i32 = 0x0040;
/// Re-entered via the track stack's `Back2` slot (a second, usually
/// rarer, backtrack continuation — e.g. the "one more iteration vs.
/// give up" split inside a greedy loop).
pub const BACK2: i32 = 0x0080;
/// This occurrence of the opcode runs right-to-left.
pub const RTL: i32 = 0x0100;
/// This occurrence of the opcode is case-insensitive.
pub const CI: i32 = 0x0200;

const FLAGS: i32 = BACK | BACK2 | RTL | CI;

pub fn base(code: i32) -> i32 {
    code & !FLAGS
}

pub fn has_back(code: i32) -> bool {
    code & BACK != 0
}

pub fn has_back2(code: i32) -> bool {
    code & BACK2 != 0
}

pub fn is_rtl(code: i32) -> bool {
    code & RTL != 0
}

pub fn is_ci(code: i32) -> bool {
    code & CI != 0
}

macro_rules! opcodes {
    ($($name:ident = $val:expr),* $(,)?) => {
        $(pub const $name: i32 = $val;)*

        pub fn name(op: i32) -> &'static str {
            match base(op) {
                $($val => stringify!($name),)*
                _ => "Unknown",
            }
        }
    };
}

opcodes! {
    STOP = 0,
    NOTHING = 1,
    GOTO = 2,

    ONE = 3,
    NOTONE = 4,
    SET = 5,

    ONEREP = 6,
    NOTONEREP = 7,
    SETREP = 8,

    ONELOOP = 9,
    NOTONELOOP = 10,
    SETLOOP = 11,

    ONELAZY = 12,
    NOTONELAZY = 13,
    SETLAZY = 14,

    MULTI = 15,
    REF = 16,

    LAZYBRANCH = 17,
    BRANCHMARK = 18,
    BRANCHCOUNT = 19,
    LAZYBRANCHMARK = 20,
    LAZYBRANCHCOUNT = 21,

    SETMARK = 22,
    NULLMARK = 23,
    SETCOUNT = 24,
    NULLCOUNT = 25,
    GETMARK = 26,

    SETJUMP = 27,
    BACKJUMP = 28,
    FOREJUMP = 29,
    COMMITJUMP = 42,

    CAPTUREMARK = 30,
    TESTREF = 31,

    BOL = 32,
    EOL = 33,
    BOUNDARY = 34,
    NONBOUNDARY = 35,
    ECMA_BOUNDARY = 36,
    NON_ECMA_BOUNDARY = 37,
    BEGINNING = 38,
    START = 39,
    END = 40,
    ENDZ = 41,
}

/// Number of `i32` operand slots (not counting the opcode word itself)
/// each base opcode carries. This is what `code_pos` advances by on a
/// fallthrough (non-jumping, non-backtracking) step.
pub fn operand_count(op: i32) -> usize {
    match base(op) {
        STOP | NOTHING => 0,
        GOTO => 1, // target
        ONE | NOTONE => 1, // char literal (string-table index)
        SET => 1, // class id
        ONEREP | NOTONEREP => 2, // char, count
        SETREP => 2, // class id, count
        ONELOOP | NOTONELOOP => 3, // char, max count, min count
        SETLOOP => 3, // class id, max count, min count
        ONELAZY | NOTONELAZY => 3, // char, max count, min count
        SETLAZY => 3, // class id, max count, min count
        MULTI => 1, // string-table index
        REF => 1, // group slot
        LAZYBRANCH => 1, // target
        BRANCHMARK | LAZYBRANCHMARK => 1,
        BRANCHCOUNT | LAZYBRANCHCOUNT => 4, // target, min, max, after_loop
        SETMARK | NULLMARK => 0,
        SETCOUNT | NULLCOUNT => 1,
        GETMARK => 0,
        SETJUMP => 1, // resume target for a negated lookaround (-1 if none)
        BACKJUMP | FOREJUMP | COMMITJUMP => 0,
        CAPTUREMARK => 2, // group slot, uncapture slot (-1 if none)
        TESTREF => 1,
        BOL | EOL | BOUNDARY | NONBOUNDARY | ECMA_BOUNDARY
        | NON_ECMA_BOUNDARY | BEGINNING | START | END | ENDZ => 0,
        _ => 0,
    }
}
