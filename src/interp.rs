// Copyright 2014-2015 The Rust Project Developers. See the COPYRIGHT
// file at the top-level directory of this distribution and at
// http://rust-lang.org/COPYRIGHT.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The three-stack backtracking virtual machine.
//!
//! Every opcode that can be revisited pushes a frame onto the *track*
//! stack before falling through; the frame is nothing but the program
//! counter of the instruction that pushed it; `Opcode::base` plus the
//! `Back` dispatch tells the interpreter which of two code paths
//! (forward vs. re-entry) to run. A handful of opcodes also need a
//! scratch integer or two alongside that program counter (a saved
//! position, an iteration count) — those are pushed right before it and
//! popped right after, so the track stack stays a flat `Vec<i32>`.
//!
//! The *group* stack is the same idea turned into a general-purpose
//! mark register: `Setmark` stashes a position to restore later,
//! `Setcount` stashes a loop counter, `Setjump` stashes a position, a
//! track-stack depth, and a crawl-stack depth to fall back to — the
//! crawl depth matters for `Backjump`: a negated lookaround whose body
//! matched (so the assertion fails) must discard every capture the
//! body made along the way, not just rewind the text position.
//!
//! The *crawl* stack is narrower: it only ever holds group slot
//! numbers, in the order captures committed, so `Uncapture` knows
//! exactly which group to roll back without consulting anything else.

use crate::captures::Captures;
use crate::error::{Error, Result};
use crate::opcode::*;
use crate::program::Program;
use crate::timeout::{Deadline, TickGate};

/// The result of a single anchored attempt: the pattern matched
/// starting at the position the caller asked about, consuming through
/// `end` (or, right-to-left, through `start`).
#[derive(Debug)]
pub struct RawMatch {
    pub start: usize,
    pub end: usize,
    pub captures: Captures,
}

enum StepOutcome {
    Advance(usize),
    Matched,
    Fail,
}

enum BackOutcome {
    Resume(usize),
    ContinuePopping,
}

struct Frame<'p, 't> {
    prog: &'p Program,
    text: &'t [char],
    pos: usize,
    scan_start: usize,
    track: Vec<i32>,
    group: Vec<i32>,
    crawl: Vec<i32>,
    captures: Captures,
    deadline: Deadline,
    ticks: TickGate,
}

/// The reusable allocation backing one anchored attempt: the three
/// stacks plus the Match record under construction. A Program's Pool
/// (`pool.rs`) lends exactly one of these to one caller at a time, so
/// repeated scans against the same Program amortize allocation instead
/// of growing fresh stacks on every candidate start position.
pub struct Scratch {
    track: Vec<i32>,
    group: Vec<i32>,
    crawl: Vec<i32>,
    captures: Captures,
}

impl Scratch {
    pub fn new(prog: &Program) -> Scratch {
        let cap = prog.track_count.max(8);
        Scratch {
            track: Vec::with_capacity(cap),
            group: Vec::with_capacity(cap),
            crawl: Vec::new(),
            captures: Captures::new(prog.num_captures()),
        }
    }
}

/// Attempt a single match anchored at `pos`. Returns `None` if this
/// position doesn't lead anywhere, regardless of how much backtracking
/// was explored; the caller (the Scanner) is responsible for trying the
/// next position.
pub fn interpret(
    prog: &Program,
    text: &[char],
    pos: usize,
    scan_start: usize,
    deadline: Deadline,
    scratch: &mut Scratch,
) -> Result<Option<RawMatch>> {
    let mut track = std::mem::take(&mut scratch.track);
    let mut group = std::mem::take(&mut scratch.group);
    let mut crawl = std::mem::take(&mut scratch.crawl);
    track.clear();
    group.clear();
    crawl.clear();
    let captures = std::mem::replace(&mut scratch.captures, Captures::new(0));

    let mut f = Frame { prog, text, pos, scan_start, track, group, crawl, captures, deadline, ticks: TickGate::new() };
    let outcome = f.run();
    scratch.track = f.track;
    scratch.group = f.group;
    scratch.crawl = f.crawl;
    match outcome? {
        Some(other_end) => {
            let (start, end) = if prog.right_to_left {
                (other_end, pos)
            } else {
                (pos, other_end)
            };
            f.captures.capture(0, start, end);
            f.captures.tidy();
            scratch.captures = Captures::new(prog.num_captures());
            Ok(Some(RawMatch { start, end, captures: f.captures }))
        }
        None => {
            f.captures.reset();
            scratch.captures = f.captures;
            Ok(None)
        }
    }
}

impl<'p, 't> Frame<'p, 't> {
    fn run(&mut self) -> Result<Option<usize>> {
        let mut pc = 0usize;
        loop {
            if self.ticks.tick() && self.deadline.expired() {
                return Err(self.timeout_error());
            }
            match self.step(pc)? {
                StepOutcome::Advance(next) => pc = next,
                StepOutcome::Matched => return Ok(Some(self.pos)),
                StepOutcome::Fail => match self.backtrack()? {
                    Some(resume) => pc = resume,
                    None => return Ok(None),
                },
            }
        }
    }

    fn timeout_error(&self) -> Error {
        let prefix: String = self.text.iter().take(32).collect();
        Error::Timeout {
            pattern: self.prog.original.clone(),
            input_prefix: prefix,
            budget: self.deadline.budget(),
        }
    }

    fn peek(&self, rtl: bool) -> Option<char> {
        if rtl {
            if self.pos == 0 {
                None
            } else {
                Some(self.text[self.pos - 1])
            }
        } else {
            self.text.get(self.pos).copied()
        }
    }

    fn advance(&mut self, rtl: bool) {
        if rtl {
            self.pos -= 1;
        } else {
            self.pos += 1;
        }
    }

    fn is_word(&self, at: Option<char>) -> bool {
        at.map_or(false, crate::charclass::is_word_char)
    }

    fn backtrack(&mut self) -> Result<Option<usize>> {
        loop {
            let pc = match self.track.pop() {
                Some(pc) => pc as usize,
                None => return Ok(None),
            };
            match self.run_back(pc)? {
                BackOutcome::Resume(next) => return Ok(Some(next)),
                BackOutcome::ContinuePopping => continue,
            }
        }
    }

    fn step(&mut self, pc: usize) -> Result<StepOutcome> {
        let op = self.prog.op_at(pc)?;
        let rtl = is_rtl(op);
        let ci = is_ci(op);
        match base(op) {
            STOP => Ok(StepOutcome::Matched),
            NOTHING => Ok(StepOutcome::Advance(pc + 1)),
            GOTO => {
                let target = self.prog.operand(pc, 0)?;
                Ok(StepOutcome::Advance(target as usize))
            }
            ONE | NOTONE => {
                let want = char_from_operand(self.prog.operand(pc, 0)?);
                let negate = base(op) == NOTONE;
                match self.peek(rtl) {
                    Some(c) if char_eq(c, want, ci) != negate => {
                        self.advance(rtl);
                        Ok(StepOutcome::Advance(pc + 2))
                    }
                    _ => Ok(StepOutcome::Fail),
                }
            }
            SET => {
                let idx = self.prog.operand(pc, 0)? as usize;
                match self.peek(rtl) {
                    Some(c) if self.prog.classes[idx].matches(c, ci) => {
                        self.advance(rtl);
                        Ok(StepOutcome::Advance(pc + 2))
                    }
                    _ => Ok(StepOutcome::Fail),
                }
            }
            ONEREP | NOTONEREP => {
                let want = char_from_operand(self.prog.operand(pc, 0)?);
                let negate = base(op) == NOTONEREP;
                let count = self.prog.operand(pc, 1)?;
                for _ in 0..count {
                    match self.peek(rtl) {
                        Some(c) if char_eq(c, want, ci) != negate => self.advance(rtl),
                        _ => return Ok(StepOutcome::Fail),
                    }
                }
                Ok(StepOutcome::Advance(pc + 3))
            }
            SETREP => {
                let idx = self.prog.operand(pc, 0)? as usize;
                let count = self.prog.operand(pc, 1)?;
                for _ in 0..count {
                    match self.peek(rtl) {
                        Some(c) if self.prog.classes[idx].matches(c, ci) => self.advance(rtl),
                        _ => return Ok(StepOutcome::Fail),
                    }
                }
                Ok(StepOutcome::Advance(pc + 3))
            }
            ONELOOP | NOTONELOOP => {
                let want = char_from_operand(self.prog.operand(pc, 0)?);
                let negate = base(op) == NOTONELOOP;
                let max = self.prog.operand(pc, 1)?;
                let min = self.prog.operand(pc, 2)?;
                let mut count = 0;
                while count < max {
                    match self.peek(rtl) {
                        Some(c) if char_eq(c, want, ci) != negate => {
                            self.advance(rtl);
                            count += 1;
                        }
                        _ => break,
                    }
                }
                if count < min {
                    return Ok(StepOutcome::Fail);
                }
                if count > min {
                    self.track.push(count);
                    self.track.push(min);
                    self.track.push(pc as i32);
                }
                Ok(StepOutcome::Advance(pc + 4))
            }
            SETLOOP => {
                let idx = self.prog.operand(pc, 0)? as usize;
                let max = self.prog.operand(pc, 1)?;
                let min = self.prog.operand(pc, 2)?;
                let mut count = 0;
                while count < max {
                    match self.peek(rtl) {
                        Some(c) if self.prog.classes[idx].matches(c, ci) => {
                            self.advance(rtl);
                            count += 1;
                        }
                        _ => break,
                    }
                }
                if count < min {
                    return Ok(StepOutcome::Fail);
                }
                if count > min {
                    self.track.push(count);
                    self.track.push(min);
                    self.track.push(pc as i32);
                }
                Ok(StepOutcome::Advance(pc + 4))
            }
            ONELAZY | NOTONELAZY => {
                let max = self.prog.operand(pc, 1)?;
                let min = self.prog.operand(pc, 2)?;
                for _ in 0..min {
                    let want = char_from_operand(self.prog.operand(pc, 0)?);
                    let negate = base(op) == NOTONELAZY;
                    match self.peek(rtl) {
                        Some(c) if char_eq(c, want, ci) != negate => self.advance(rtl),
                        _ => return Ok(StepOutcome::Fail),
                    }
                }
                let _ = max;
                self.track.push(min);
                self.track.push(pc as i32);
                Ok(StepOutcome::Advance(pc + 4))
            }
            SETLAZY => {
                let idx = self.prog.operand(pc, 0)? as usize;
                let min = self.prog.operand(pc, 2)?;
                for _ in 0..min {
                    match self.peek(rtl) {
                        Some(c) if self.prog.classes[idx].matches(c, ci) => self.advance(rtl),
                        _ => return Ok(StepOutcome::Fail),
                    }
                }
                self.track.push(min);
                self.track.push(pc as i32);
                Ok(StepOutcome::Advance(pc + 4))
            }
            MULTI => {
                let idx = self.prog.operand(pc, 0)? as usize;
                let s = &self.prog.strings[idx];
                let chars: Vec<char> = s.chars().collect();
                if rtl {
                    if self.pos < chars.len() {
                        return Ok(StepOutcome::Fail);
                    }
                    for (i, &want) in chars.iter().rev().enumerate() {
                        if !char_eq(self.text[self.pos - 1 - i], want, ci) {
                            return Ok(StepOutcome::Fail);
                        }
                    }
                    self.pos -= chars.len();
                } else {
                    if self.pos + chars.len() > self.text.len() {
                        return Ok(StepOutcome::Fail);
                    }
                    for (i, &want) in chars.iter().enumerate() {
                        if !char_eq(self.text[self.pos + i], want, ci) {
                            return Ok(StepOutcome::Fail);
                        }
                    }
                    self.pos += chars.len();
                }
                Ok(StepOutcome::Advance(pc + 2))
            }
            REF => {
                let slot = self.prog.operand(pc, 0)? as usize;
                if !self.captures.is_matched(slot) {
                    // Default semantics fail a reference to a group that
                    // never captured; ECMAScript mode instead treats it
                    // as matching the empty string.
                    return if self.prog.options.ecma_script {
                        Ok(StepOutcome::Advance(pc + 2))
                    } else {
                        Ok(StepOutcome::Fail)
                    };
                }
                let start = self.captures.match_index(slot) as usize;
                let len = self.captures.match_length(slot) as usize;
                if rtl {
                    if self.pos < len {
                        return Ok(StepOutcome::Fail);
                    }
                    for i in 0..len {
                        if !char_eq(
                            self.text[self.pos - len + i],
                            self.text[start + i],
                            ci,
                        ) {
                            return Ok(StepOutcome::Fail);
                        }
                    }
                    self.pos -= len;
                } else {
                    if self.pos + len > self.text.len() {
                        return Ok(StepOutcome::Fail);
                    }
                    for i in 0..len {
                        if !char_eq(self.text[self.pos + i], self.text[start + i], ci) {
                            return Ok(StepOutcome::Fail);
                        }
                    }
                    self.pos += len;
                }
                Ok(StepOutcome::Advance(pc + 2))
            }
            TESTREF => {
                let slot = self.prog.operand(pc, 0)? as usize;
                if self.captures.is_matched(slot) {
                    // Commit to `yes`: discard the Lazybranch frame
                    // pushed immediately ahead of this instruction for
                    // the `no` alternative. A conditional backreference
                    // is a one-time test, not a search alternative — once
                    // it comes out true, backtracking must not be able to
                    // land on `no` as if the test had never happened.
                    self.track.pop();
                    self.track.pop();
                    Ok(StepOutcome::Advance(pc + 2))
                } else {
                    Ok(StepOutcome::Fail)
                }
            }
            LAZYBRANCH => {
                let target = self.prog.operand(pc, 0)?;
                self.track.push(target);
                self.track.push(pc as i32);
                Ok(StepOutcome::Advance(pc + 2))
            }
            SETCOUNT => {
                let init = self.prog.operand(pc, 0)?;
                // Two group slots per loop, not one: the iteration count
                // and the text position the current iteration began at.
                // The latter is what lets Branchcount notice a body that
                // matched zero-width and refuse to loop on it forever,
                // and what lets it rewind `text_pos` when it gives back
                // an iteration on backtrack.
                self.group.push(init);
                self.group.push(self.pos as i32);
                self.track.push(pc as i32);
                Ok(StepOutcome::Advance(pc + 2))
            }
            BRANCHCOUNT => {
                let body_start = self.prog.operand(pc, 0)? as usize;
                let min = self.prog.operand(pc, 1)?;
                let max = self.prog.operand(pc, 2)?;
                let after_loop = self.prog.operand(pc, 3)? as usize;
                let len = self.group.len();
                if len < 2 {
                    return Err(self.invariant("branchcount: empty group stack"));
                }
                let count = self.group[len - 2];
                let prev_start = self.group[len - 1];
                if count > 0 && self.pos as i32 == prev_start {
                    return Ok(StepOutcome::Advance(after_loop));
                }
                if count < max {
                    if count >= min {
                        // Restore point is *here*, not `prev_start`: if the
                        // next iteration fails outright it gives back
                        // nothing, so backtracking into this choice point
                        // must land back at the position the loop is at
                        // right now, not the position the iteration before
                        // it started from.
                        self.track.push(count);
                        self.track.push(self.pos as i32);
                        self.track.push(pc as i32);
                    }
                    self.group[len - 2] = count + 1;
                    self.group[len - 1] = self.pos as i32;
                    Ok(StepOutcome::Advance(body_start))
                } else {
                    Ok(StepOutcome::Advance(after_loop))
                }
            }
            LAZYBRANCHCOUNT => {
                let body_start = self.prog.operand(pc, 0)? as usize;
                let min = self.prog.operand(pc, 1)?;
                let max = self.prog.operand(pc, 2)?;
                let after_loop = self.prog.operand(pc, 3)? as usize;
                let len = self.group.len();
                if len < 2 {
                    return Err(self.invariant("lazybranchcount: empty group stack"));
                }
                let count = self.group[len - 2];
                let prev_start = self.group[len - 1];
                if count > 0 && self.pos as i32 == prev_start {
                    return Ok(StepOutcome::Advance(after_loop));
                }
                if count < min {
                    self.group[len - 2] = count + 1;
                    self.group[len - 1] = self.pos as i32;
                    Ok(StepOutcome::Advance(body_start))
                } else if count < max {
                    self.track.push(count);
                    self.track.push(self.pos as i32);
                    self.track.push(pc as i32);
                    Ok(StepOutcome::Advance(after_loop))
                } else {
                    Ok(StepOutcome::Advance(after_loop))
                }
            }
            SETMARK => {
                self.group.push(self.pos as i32);
                self.track.push(pc as i32);
                Ok(StepOutcome::Advance(pc + 1))
            }
            CAPTUREMARK => {
                let slot = self.prog.operand(pc, 0)?;
                let xfer = self.prog.operand(pc, 1)?;
                let start = self
                    .group
                    .pop()
                    .ok_or_else(|| self.invariant("capturemark: empty group stack"))?
                    as usize;
                let end = self.pos;
                let mut pushed = 0i32;
                if xfer < 0 {
                    let g = slot as usize;
                    self.captures.capture(g, start, end);
                    self.crawl.push(g as i32);
                    pushed = 1;
                } else {
                    let g2 = xfer as usize;
                    let g = if slot >= 0 { Some(slot as usize) } else { None };
                    self.captures.transfer_capture(g, g2, start, end);
                    self.crawl.push(g2 as i32);
                    pushed += 1;
                    if let Some(g) = g {
                        self.crawl.push(g as i32);
                        pushed += 1;
                    }
                }
                self.track.push(start as i32);
                self.track.push(pushed);
                self.track.push(pc as i32);
                Ok(StepOutcome::Advance(pc + 3))
            }
            SETJUMP => {
                self.group.push(self.pos as i32);
                self.group.push(self.track.len() as i32);
                self.group.push(self.crawl.len() as i32);
                self.track.push(pc as i32);
                Ok(StepOutcome::Advance(pc + 2))
            }
            FOREJUMP => {
                let _crawl_len = self
                    .group
                    .pop()
                    .ok_or_else(|| self.invariant("forejump: empty group stack"))?
                    as usize;
                let track_len = self.group.pop().unwrap() as usize;
                let saved_pos = self.group.pop().unwrap() as usize;
                self.track.truncate(track_len);
                self.pos = saved_pos;
                Ok(StepOutcome::Advance(pc + 1))
            }
            // Atomic-group commit: discard the child's own backtrack
            // frames just like Forejump, but leave `self.pos` where the
            // child advanced it to. An atomic group still consumes
            // input, it just never backtracks into its child again.
            COMMITJUMP => {
                let _crawl_len = self
                    .group
                    .pop()
                    .ok_or_else(|| self.invariant("commitjump: empty group stack"))?
                    as usize;
                let track_len = self.group.pop().unwrap() as usize;
                let _saved_pos = self.group.pop().unwrap() as usize;
                self.track.truncate(track_len);
                Ok(StepOutcome::Advance(pc + 1))
            }
            BACKJUMP => {
                let crawl_len = self
                    .group
                    .pop()
                    .ok_or_else(|| self.invariant("backjump: empty group stack"))?
                    as usize;
                let track_len = self.group.pop().unwrap() as usize;
                let saved_pos = self.group.pop().unwrap() as usize;
                self.track.truncate(track_len);
                while self.crawl.len() > crawl_len {
                    if let Some(slot) = self.crawl.pop() {
                        self.captures.uncapture(slot as usize);
                    }
                }
                self.pos = saved_pos;
                Ok(StepOutcome::Fail)
            }
            BOL => {
                let ok = self.pos == 0 || self.text[self.pos - 1] == '\n';
                self.anchor_result(ok, pc + 1)
            }
            EOL => {
                let ok = self.pos == self.text.len() || self.text[self.pos] == '\n';
                self.anchor_result(ok, pc + 1)
            }
            BEGINNING => self.anchor_result(self.pos == 0, pc + 1),
            START => self.anchor_result(self.pos == self.scan_start, pc + 1),
            END => self.anchor_result(self.pos == self.text.len(), pc + 1),
            ENDZ => {
                let len = self.text.len();
                let ok = self.pos == len || (self.pos == len - 1 && self.text[self.pos] == '\n');
                self.anchor_result(ok, pc + 1)
            }
            BOUNDARY | ECMA_BOUNDARY => {
                let ok = self.at_word_boundary();
                self.anchor_result(ok, pc + 1)
            }
            NONBOUNDARY | NON_ECMA_BOUNDARY => {
                let ok = !self.at_word_boundary();
                self.anchor_result(ok, pc + 1)
            }
            other => Err(self.invariant(&format!("unrecognized opcode {}", other))),
        }
    }

    fn at_word_boundary(&self) -> bool {
        let before = if self.pos == 0 { None } else { Some(self.text[self.pos - 1]) };
        let after = self.text.get(self.pos).copied();
        self.is_word(before) != self.is_word(after)
    }

    fn anchor_result(&self, ok: bool, next: usize) -> Result<StepOutcome> {
        if ok {
            Ok(StepOutcome::Advance(next))
        } else {
            Ok(StepOutcome::Fail)
        }
    }

    fn invariant(&self, msg: &str) -> Error {
        Error::InternalInvariantViolated(msg.to_string())
    }

    fn run_back(&mut self, pc: usize) -> Result<BackOutcome> {
        let op = self.prog.op_at(pc)?;
        let rtl = is_rtl(op);
        let ci = is_ci(op);
        match base(op) {
            SETMARK => {
                self.group.pop();
                Ok(BackOutcome::ContinuePopping)
            }
            SETCOUNT => {
                self.group.pop();
                self.group.pop();
                Ok(BackOutcome::ContinuePopping)
            }
            SETJUMP => {
                let crawl_len = self.group.pop().unwrap_or(0) as usize;
                let track_len = self.group.pop().unwrap_or(0) as usize;
                let saved_pos = self.group.pop().unwrap_or(self.pos as i32) as usize;
                self.track.truncate(track_len);
                while self.crawl.len() > crawl_len {
                    if let Some(slot) = self.crawl.pop() {
                        self.captures.uncapture(slot as usize);
                    }
                }
                self.pos = saved_pos;
                let resume = self.prog.operand(pc, 0)?;
                if resume >= 0 {
                    Ok(BackOutcome::Resume(resume as usize))
                } else {
                    Ok(BackOutcome::ContinuePopping)
                }
            }
            CAPTUREMARK => {
                let pushed = self.track.pop().unwrap_or(0);
                let start = self.track.pop().unwrap_or(0);
                for _ in 0..pushed {
                    if let Some(slot) = self.crawl.pop() {
                        self.captures.uncapture(slot as usize);
                    }
                }
                self.group.push(start);
                Ok(BackOutcome::ContinuePopping)
            }
            LAZYBRANCH => {
                let target = self.track.pop().unwrap_or(0);
                Ok(BackOutcome::Resume(target as usize))
            }
            BRANCHCOUNT => {
                // Give up on attempting one more iteration: restore the
                // count and the position the loop was at right before
                // that attempt (not the position the attempt's body
                // itself started consuming from), then resume past the
                // loop with the count unchanged.
                let restore_pos = self.track.pop().unwrap_or(0);
                let count = self.track.pop().unwrap_or(0);
                let len = self.group.len();
                if len < 2 {
                    return Err(self.invariant("branchcount back: empty group stack"));
                }
                self.group[len - 2] = count;
                self.group[len - 1] = restore_pos;
                self.pos = restore_pos as usize;
                let after_loop = self.prog.operand(pc, 3)?;
                Ok(BackOutcome::Resume(after_loop as usize))
            }
            LAZYBRANCHCOUNT => {
                let start_pos = self.track.pop().unwrap_or(0);
                let count = self.track.pop().unwrap_or(0);
                let len = self.group.len();
                if len < 2 {
                    return Err(self.invariant("lazybranchcount back: empty group stack"));
                }
                self.group[len - 2] = count + 1;
                self.group[len - 1] = self.pos as i32;
                let _ = start_pos;
                let body_start = self.prog.operand(pc, 0)?;
                Ok(BackOutcome::Resume(body_start as usize))
            }
            ONELOOP | NOTONELOOP => {
                let min = self.track.pop().unwrap_or(0);
                let count = self.track.pop().unwrap_or(0);
                if count <= min {
                    return Ok(BackOutcome::ContinuePopping);
                }
                if rtl {
                    self.pos += 1;
                } else {
                    self.pos -= 1;
                }
                let new_count = count - 1;
                if new_count > min {
                    self.track.push(new_count);
                    self.track.push(min);
                    self.track.push(pc as i32);
                }
                Ok(BackOutcome::Resume(pc + 4))
            }
            SETLOOP => {
                let min = self.track.pop().unwrap_or(0);
                let count = self.track.pop().unwrap_or(0);
                if count <= min {
                    return Ok(BackOutcome::ContinuePopping);
                }
                if rtl {
                    self.pos += 1;
                } else {
                    self.pos -= 1;
                }
                let new_count = count - 1;
                if new_count > min {
                    self.track.push(new_count);
                    self.track.push(min);
                    self.track.push(pc as i32);
                }
                Ok(BackOutcome::Resume(pc + 4))
            }
            ONELAZY | NOTONELAZY => {
                let count = self.track.pop().unwrap_or(0);
                let max = self.prog.operand(pc, 1)?;
                let want = char_from_operand(self.prog.operand(pc, 0)?);
                let negate = base(op) == NOTONELAZY;
                if count < max {
                    if let Some(c) = self.peek(rtl) {
                        if char_eq(c, want, ci) != negate {
                            self.advance(rtl);
                            self.track.push(count + 1);
                            self.track.push(pc as i32);
                            return Ok(BackOutcome::Resume(pc + 4));
                        }
                    }
                }
                Ok(BackOutcome::ContinuePopping)
            }
            SETLAZY => {
                let count = self.track.pop().unwrap_or(0);
                let max = self.prog.operand(pc, 1)?;
                let idx = self.prog.operand(pc, 0)? as usize;
                if count < max {
                    if let Some(c) = self.peek(rtl) {
                        if self.prog.classes[idx].matches(c, ci) {
                            self.advance(rtl);
                            self.track.push(count + 1);
                            self.track.push(pc as i32);
                            return Ok(BackOutcome::Resume(pc + 4));
                        }
                    }
                }
                Ok(BackOutcome::ContinuePopping)
            }
            other => Err(self.invariant(&format!("opcode {} has no backtrack handler", other))),
        }
    }
}

fn char_from_operand(v: i32) -> char {
    char::from_u32(v as u32).unwrap_or('\u{FFFD}')
}

fn char_eq(a: char, b: char, ci: bool) -> bool {
    if ci {
        a.to_lowercase().eq(b.to_lowercase())
    } else {
        a == b
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::compile;
    use crate::options::Options;
    use crate::parse::parse;

    fn program(pattern: &str, options: Options) -> Program {
        let parsed = parse(pattern, options).unwrap();
        compile(pattern, &parsed, options).unwrap()
    }

    fn run(pattern: &str, input: &str) -> Option<(usize, usize)> {
        let prog = program(pattern, Options::new());
        let text: Vec<char> = input.chars().collect();
        let mut scratch = Scratch::new(&prog);
        interpret(&prog, &text, 0, 0, Deadline::none(), &mut scratch)
            .unwrap()
            .map(|m| (m.start, m.end))
    }

    #[test]
    fn greedy_star_then_literal() {
        assert_eq!(run("a*b", "aaab"), Some((0, 4)));
    }

    #[test]
    fn capturing_group_records_span() {
        let prog = program("(a*)b", Options::new());
        let text: Vec<char> = "aaab".chars().collect();
        let mut scratch = Scratch::new(&prog);
        let m = interpret(&prog, &text, 0, 0, Deadline::none(), &mut scratch).unwrap().unwrap();
        assert_eq!(m.captures.match_index(1), 0);
        assert_eq!(m.captures.match_length(1), 3);
    }

    #[test]
    fn lazy_quantifier_stops_early() {
        assert_eq!(run("a.*?b", "axbxb"), Some((0, 3)));
    }

    #[test]
    fn backreference_requires_equal_text() {
        assert_eq!(run(r"(\w+)\s+\1", "foo foo"), Some((0, 7)));
        assert_eq!(run(r"(\w+)\s+\1", "foo bar"), None);
    }

    #[test]
    fn unmatched_backreference_fails_by_default_but_not_under_ecmascript() {
        // `(a)?\1` against "b": group 1 never captures, so the
        // backreference must fail the default-mode match but succeed
        // (as an empty match) under ECMAScript semantics.
        let default_prog = program(r"(a)?\1", Options::new());
        let text: Vec<char> = "b".chars().collect();
        let mut scratch = Scratch::new(&default_prog);
        assert!(interpret(&default_prog, &text, 0, 0, Deadline::none(), &mut scratch)
            .unwrap()
            .is_none());

        let ecma_prog = program(r"(a)?\1", Options::new().ecma_script(true));
        let mut scratch = Scratch::new(&ecma_prog);
        let m = interpret(&ecma_prog, &text, 0, 0, Deadline::none(), &mut scratch)
            .unwrap()
            .unwrap();
        assert_eq!((m.start, m.end), (0, 0));
    }

    #[test]
    fn right_to_left_literal_run_matches_forward_not_reversed() {
        // A literal run longer than one character must still read
        // forward in the text under `RightToLeft` — only the scan
        // direction (which candidate position is tried first) flips,
        // not the character order within the run itself.
        let prog = program("cat", Options::new().right_to_left(true));
        let text: Vec<char> = "a cat sat".chars().collect();
        let mut scratch = Scratch::new(&prog);
        let m = interpret(&prog, &text, text.len(), text.len(), Deadline::none(), &mut scratch)
            .unwrap()
            .unwrap();
        assert_eq!((m.start, m.end), (2, 5));
    }

    #[test]
    fn balanced_match_consumes_nested_parens() {
        let prog = program(r"^(?:(?<o>\()|(?<-o>\)))+$", Options::new());
        let text: Vec<char> = "(())".chars().collect();
        let mut scratch = Scratch::new(&prog);
        let m = interpret(&prog, &text, 0, 0, Deadline::none(), &mut scratch).unwrap().unwrap();
        assert_eq!((m.start, m.end), (0, 4));
        assert_eq!(m.captures.match_count(1), 0);
    }

    #[test]
    fn generic_repeat_tracks_every_iteration_of_a_group_body() {
        // A repeated capturing group is too complex for the atom loop
        // opcodes, so it exercises Setcount/Branchcount. Each iteration
        // must leave the group stack exactly as it found it, or the
        // third "ab" here would never be attempted.
        let prog = program("(ab)+", Options::new());
        let text: Vec<char> = "ababab".chars().collect();
        let mut scratch = Scratch::new(&prog);
        let m = interpret(&prog, &text, 0, 0, Deadline::none(), &mut scratch).unwrap().unwrap();
        assert_eq!((m.start, m.end), (0, 6));
        assert_eq!(m.captures.match_index(1), 4);
        assert_eq!(m.captures.match_length(1), 2);
    }

    #[test]
    fn generic_repeat_gives_back_one_iteration_on_backtrack() {
        // Greedy `(ab)+` must be willing to backtrack down to fewer
        // repetitions (and rewind `text_pos` with it) when the rest of
        // the pattern demands it.
        assert_eq!(run("(ab)+ab$", "ababab"), Some((0, 6)));
        assert_eq!(run("(ab)+c", "ababc"), Some((0, 5)));
    }

    #[test]
    fn generic_repeat_does_not_loop_forever_on_a_zero_width_body() {
        // `(a?)*` can complete an iteration without consuming any
        // input; the loop must recognize that and stop instead of
        // spinning until it hits its (unbounded) repeat count.
        let prog = program("(a?)*", Options::new());
        let text: Vec<char> = "b".chars().collect();
        let mut scratch = Scratch::new(&prog);
        let m = interpret(&prog, &text, 0, 0, Deadline::none(), &mut scratch).unwrap().unwrap();
        assert_eq!((m.start, m.end), (0, 0));
    }

    #[test]
    fn atomic_group_does_not_backtrack_into_child() {
        assert_eq!(run("(?>a*)a", "aaa"), None);
    }

    #[test]
    fn atomic_group_keeps_the_position_its_child_consumed() {
        // Unlike a lookaround, an atomic group is not zero-width: once
        // committed, the position it advanced to must stick around for
        // whatever follows it in the pattern.
        assert_eq!(run("(?>a*)b", "aaab"), Some((0, 4)));
    }

    #[test]
    fn conditional_backref_commits_to_yes_and_does_not_fall_into_no() {
        // Group 1 matches, so the condition is true and `yes` is the
        // only valid branch. `yes` then fails outright; the whole
        // conditional must fail with it instead of falling back into
        // `no` as though the condition had never been decided.
        assert_eq!(run(r"(a)(?(1)x|y)", "ay"), None);
    }

    #[test]
    fn negative_lookahead_rejects_match() {
        assert_eq!(run("a(?!b)", "ab"), None);
        assert_eq!(run("a(?!b)", "ac"), Some((0, 1)));
    }

    #[test]
    fn negative_lookahead_discards_captures_from_failed_assertion() {
        // `(?!(a)b)` fully matching its child (so the negation itself
        // fails) captures group 1 along the way; since that branch is
        // abandoned for good, the capture must not survive into the
        // match eventually produced by the alternative's second arm.
        let prog = program(r"(?:(?!(a)b)|a)", Options::new());
        let text: Vec<char> = "ab".chars().collect();
        let mut scratch = Scratch::new(&prog);
        let m = interpret(&prog, &text, 0, 0, Deadline::none(), &mut scratch)
            .unwrap()
            .unwrap();
        assert_eq!((m.start, m.end), (0, 1));
        assert_eq!(m.captures.match_count(1), 0);
    }

    #[test]
    fn timeout_is_reported() {
        let prog = program("(a+)+$", Options::new());
        let input = "a".repeat(40) + "!";
        let text: Vec<char> = input.chars().collect();
        let mut scratch = Scratch::new(&prog);
        let err = interpret(
            &prog,
            &text,
            0,
            0,
            Deadline::after(std::time::Duration::from_millis(1)),
            &mut scratch,
        );
        assert!(err.is_err() || err.unwrap().is_none());
    }
}
