// Copyright 2014-2015 The Rust Project Developers. See the COPYRIGHT
// file at the top-level directory of this distribution and at
// http://rust-lang.org/COPYRIGHT.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The code writer: turns a parsed [`Node`] tree into a [`Program`].
//!
//! Emission is a single forward pass over the tree. Jump targets that
//! aren't known yet (the far side of an alternative, the head of a
//! loop) are written as placeholders and backpatched once the
//! sub-expression they belong to is fully emitted.

use std::collections::HashMap;

use crate::charclass::CharClass;
use crate::error::{Error, Result};
use crate::opcode::*;
use crate::options::Options;
use crate::parse::ParseOutcome;
use crate::program::{Anchors, BmPrefix, CaptureMap, FirstCharPrefix, Program};
use crate::tree::{AnchorKind, GroupKind, GroupRef, Node};

struct Compiler<'a> {
    codes: Vec<i32>,
    strings: Vec<String>,
    classes: Vec<CharClass>,
    options: Options,
    names: &'a HashMap<String, u32>,
    track_estimate: usize,
}

/// Turns the parsed tree into an immutable [`Program`]. Grounded on the
/// same `Node`-in/`Program`-out seam `program::Program::new` already
/// calls.
pub fn compile(pattern: &str, parsed: &ParseOutcome, options: Options) -> Result<Program> {
    let mut c = Compiler {
        codes: Vec::new(),
        strings: Vec::new(),
        classes: Vec::new(),
        options,
        names: &parsed.names,
        track_estimate: 16,
    };

    // Merge runs of adjacent literal characters into `LiteralString`
    // before emission: `Multi` walks a whole run in one step and gets
    // right-to-left direction right, while a chain of single-char
    // `One`s emitted back to back would each flip direction on its
    // own and match the run reversed.
    let tree = coalesce_literals(parsed.tree.clone());

    c.emit_node(&tree, options.right_to_left)?;
    c.emit(STOP);

    let cap_size = (parsed.group_count + 1) as usize;
    let mut slot_of = HashMap::with_capacity(cap_size);
    for g in 0..cap_size as u32 {
        slot_of.insert(g, g as usize);
    }
    let caps = CaptureMap { slot_of, names: parsed.names.clone(), cap_size };

    let anchors = analyze_anchors(&tree);
    let first_char_prefix = analyze_first_char(&tree, &mut c.classes, options);
    let bm_prefix = analyze_literal_prefix(&tree, options);

    Ok(Program {
        original: pattern.to_string(),
        options,
        codes: c.codes,
        strings: c.strings,
        classes: c.classes,
        track_count: c.track_estimate,
        anchors,
        first_char_prefix,
        bm_prefix,
        right_to_left: options.right_to_left,
        caps,
    })
}

impl<'a> Compiler<'a> {
    fn emit(&mut self, op: i32) -> usize {
        let pc = self.codes.len();
        self.codes.push(op);
        pc
    }

    fn emit_operand(&mut self, v: i32) {
        self.codes.push(v);
    }

    fn patch(&mut self, pc: usize, operand: usize, value: i32) {
        self.codes[pc + 1 + operand] = value;
    }

    fn here(&self) -> usize {
        self.codes.len()
    }

    fn flags(&self, rtl: bool) -> i32 {
        let mut f = 0;
        if rtl {
            f |= RTL;
        }
        if self.options.ignore_case {
            f |= CI;
        }
        f
    }

    fn resolve_group(&self, r: &GroupRef) -> Result<u32> {
        match r {
            GroupRef::Number(n) => Ok(*n),
            GroupRef::Name(name) => self.names.get(name).copied().ok_or_else(|| {
                Error::InvalidArgument(format!("unknown group name {:?}", name))
            }),
        }
    }

    fn emit_node(&mut self, node: &Node, rtl: bool) -> Result<()> {
        match node {
            Node::Empty => {
                self.emit(NOTHING);
            }
            Node::Literal(ch) => {
                self.emit(ONE | self.flags(rtl));
                self.emit_operand(*ch as i32);
            }
            Node::LiteralString(s) => {
                let idx = self.strings.len();
                self.strings.push(s.clone());
                self.emit(MULTI | self.flags(rtl));
                self.emit_operand(idx as i32);
            }
            Node::CharClass(cc) => {
                let idx = self.classes.len();
                self.classes.push(cc.clone());
                self.emit(SET | self.flags(rtl));
                self.emit_operand(idx as i32);
            }
            Node::AnyChar { includes_newline } => {
                let idx = self.classes.len();
                self.classes.push(CharClass::any(*includes_newline));
                self.emit(SET | self.flags(rtl));
                self.emit_operand(idx as i32);
            }
            Node::Concat(parts) => {
                // Right-to-left patterns still read left-to-right in
                // the tree; the *direction* each atom consumes input
                // in is `rtl`, but sibling order in the bytecode stream
                // mirrors sibling order in the pattern regardless, same
                // as the tree the parser already hands us.
                for p in parts {
                    self.emit_node(p, rtl)?;
                }
            }
            Node::Alternate(branches) => self.emit_alternate(branches, rtl)?,
            Node::Group { kind, index, name: _, child } => {
                self.emit_group(kind, *index, child, rtl)?
            }
            Node::Repeat { child, min, max, lazy } => {
                self.emit_repeat(child, *min, *max, *lazy, rtl)?
            }
            Node::Backreference(r) => {
                let g = self.resolve_group(r)?;
                self.track_estimate += 1;
                self.emit(REF | self.flags(rtl));
                self.emit_operand(g as i32);
            }
            Node::Anchor(kind) => self.emit_anchor(*kind),
            Node::ConditionalBackref { group, yes, no } => {
                let g = self.resolve_group(group)?;
                self.track_estimate += 2;
                // `Testref` only ever fails forward (no jump target of
                // its own); the `no` branch is reached by backtracking
                // into the `Lazybranch` alternative pushed just ahead
                // of it, the same mechanism `Alternate` uses.
                let branch_pc = self.emit(LAZYBRANCH);
                self.emit_operand(0); // patched: address of the `no` branch
                self.emit(TESTREF);
                self.emit_operand(g as i32);
                self.emit_node(yes, rtl)?;
                let end_goto = self.emit(GOTO);
                self.emit_operand(0); // patched: address past the whole construct
                let no_pc = self.here();
                self.patch(branch_pc, 0, no_pc as i32);
                match no {
                    Some(n) => self.emit_node(n, rtl)?,
                    None => {
                        self.emit(NOTHING);
                    }
                }
                let end_pc = self.here();
                self.patch(end_goto, 0, end_pc as i32);
            }
        }
        Ok(())
    }

    fn emit_alternate(&mut self, branches: &[Node], rtl: bool) -> Result<()> {
        if branches.is_empty() {
            self.emit(NOTHING);
            return Ok(());
        }
        if branches.len() == 1 {
            return self.emit_node(&branches[0], rtl);
        }
        self.track_estimate += branches.len() * 2;
        let mut end_patches = Vec::new();
        for (i, branch) in branches.iter().enumerate() {
            let is_last = i + 1 == branches.len();
            if is_last {
                self.emit_node(branch, rtl)?;
            } else {
                let branch_pc = self.emit(LAZYBRANCH);
                self.emit_operand(0); // patched below
                self.emit_node(branch, rtl)?;
                let goto_pc = self.emit(GOTO);
                self.emit_operand(0); // patched to the end, once known
                end_patches.push(goto_pc);
                let next_branch_pc = self.here();
                self.patch(branch_pc, 0, next_branch_pc as i32);
            }
        }
        let end = self.here();
        for pc in end_patches {
            self.patch(pc, 0, end as i32);
        }
        Ok(())
    }

    fn emit_group(
        &mut self,
        kind: &GroupKind,
        index: Option<u32>,
        child: &Node,
        rtl: bool,
    ) -> Result<()> {
        match kind {
            GroupKind::NonCapturing => self.emit_node(child, rtl),
            GroupKind::Capturing => {
                let slot = index.expect("capturing group always carries an index");
                self.track_estimate += 2;
                self.emit(SETMARK);
                self.emit_node(child, rtl)?;
                self.emit(CAPTUREMARK);
                self.emit_operand(slot as i32);
                self.emit_operand(-1);
                Ok(())
            }
            GroupKind::Balanced { close_name } => {
                let close_slot = self.names.get(close_name).copied().ok_or_else(|| {
                    Error::InvalidArgument(format!(
                        "balanced group closes unknown name {:?}",
                        close_name
                    ))
                })?;
                self.track_estimate += 2;
                self.emit(SETMARK);
                self.emit_node(child, rtl)?;
                self.emit(CAPTUREMARK);
                self.emit_operand(index.map(|i| i as i32).unwrap_or(-1));
                self.emit_operand(close_slot as i32);
                Ok(())
            }
            GroupKind::Atomic => self.emit_atomic_like(child, rtl, false, true),
            GroupKind::Lookahead { negate } => self.emit_lookaround(child, false, *negate),
            GroupKind::Lookbehind { negate } => self.emit_lookaround(child, true, *negate),
        }
    }

    /// Lookaround always runs its child in its own intrinsic direction
    /// (lookahead forward, lookbehind backward) regardless of the
    /// pattern's overall `right_to_left` option, and never advances the
    /// outer match position.
    fn emit_lookaround(&mut self, child: &Node, behind: bool, negate: bool) -> Result<()> {
        self.emit_atomic_like(child, behind, negate, false)
    }

    /// `Setjump` records the position and track depth to fall back to.
    /// A positive lookaround commits via `Forejump` once the child
    /// succeeds: captures stick, everything the child pushed onto
    /// `track` is discarded, and the lookaround's own position movement
    /// is undone (it must stay zero-width). An atomic group commits via
    /// `Commitjump` instead: same discarding of the child's `track`
    /// frames, but the position the child advanced to is kept, since an
    /// atomic group still consumes input and just never backtracks into
    /// its own child once it has matched once. A negated lookaround
    /// instead hits `Backjump` on success, which undoes the position and
    /// fails the surrounding alternative outright; `Setjump`'s own
    /// operand gives the interpreter somewhere to resume if the child is
    /// exhausted without ever matching, which is exactly the case where
    /// the negation succeeds.
    fn emit_atomic_like(&mut self, child: &Node, rtl: bool, negate: bool, atomic: bool) -> Result<()> {
        self.track_estimate += 2;
        let sj = self.emit(SETJUMP);
        self.emit_operand(-1);
        self.emit_node(child, rtl)?;
        if negate {
            self.emit(BACKJUMP);
            let after = self.here();
            self.patch(sj, 0, after as i32);
        } else if atomic {
            self.emit(COMMITJUMP);
        } else {
            self.emit(FOREJUMP);
        }
        Ok(())
    }

    /// A child the Scanner/Interpreter can consume with a single
    /// bounded loop opcode instead of the generic mark-and-branch
    /// construct: a bare literal, class, or `.`.
    fn simple_atom(&self, node: &Node) -> Option<(i32, CharClass)> {
        match node {
            Node::Literal(ch) => Some((ONE, CharClass::single(*ch))),
            Node::CharClass(cc) => Some((SET, cc.clone())),
            Node::AnyChar { includes_newline } => {
                Some((SET, CharClass::any(*includes_newline)))
            }
            _ => None,
        }
    }

    fn emit_repeat(
        &mut self,
        child: &Node,
        min: u32,
        max: Option<u32>,
        lazy: bool,
        rtl: bool,
    ) -> Result<()> {
        let max = max.unwrap_or(i32::MAX as u32);
        if let Some((base, class)) = self.simple_atom(child) {
            return self.emit_atom_repeat(base, class, min, max, lazy, rtl);
        }
        self.emit_generic_repeat(child, min, max, lazy, rtl)
    }

    fn emit_atom_repeat(
        &mut self,
        base: i32,
        class: CharClass,
        min: u32,
        max: u32,
        lazy: bool,
        rtl: bool,
    ) -> Result<()> {
        let operand = match base {
            ONE => class.ranges[0].0 as i32,
            SET => {
                let idx = self.classes.len();
                self.classes.push(class);
                idx as i32
            }
            _ => unreachable!(),
        };
        self.track_estimate += 2;
        if min == max {
            let op = match base {
                ONE => ONEREP,
                SET => SETREP,
                _ => unreachable!(),
            };
            self.emit(op | self.flags(rtl));
            self.emit_operand(operand);
            self.emit_operand(min as i32);
        } else if lazy {
            let op = match base {
                ONE => ONELAZY,
                SET => SETLAZY,
                _ => unreachable!(),
            };
            self.emit(op | self.flags(rtl));
            self.emit_operand(operand);
            self.emit_operand(max as i32);
            self.emit_operand(min as i32);
        } else {
            let op = match base {
                ONE => ONELOOP,
                SET => SETLOOP,
                _ => unreachable!(),
            };
            self.emit(op | self.flags(rtl));
            self.emit_operand(operand);
            self.emit_operand(max as i32);
            self.emit_operand(min as i32);
        }
        Ok(())
    }

    /// Any repeated sub-expression too complex for the atom loop
    /// opcodes: `Setcount` carries the iteration counter *and* the text
    /// position the current iteration started at across loop entries
    /// on the group stack (two slots, not one — see `Branchcount`'s own
    /// comment in `interp.rs`), so the body itself must leave the group
    /// stack exactly as it found it on every path that loops back here.
    fn emit_generic_repeat(
        &mut self,
        child: &Node,
        min: u32,
        max: u32,
        lazy: bool,
        rtl: bool,
    ) -> Result<()> {
        self.track_estimate += 4;
        self.emit(SETCOUNT);
        self.emit_operand(0);
        let branch_pc = self.emit(if lazy { LAZYBRANCHCOUNT } else { BRANCHCOUNT });
        self.emit_operand(0); // patched: body_start
        self.emit_operand(min as i32);
        self.emit_operand(max as i32);
        self.emit_operand(0); // patched: after_loop
        let body_start = self.here();
        self.patch(branch_pc, 0, body_start as i32);
        self.emit_node(child, rtl)?;
        self.emit(GOTO);
        self.emit_operand(branch_pc as i32);
        let after_loop = self.here();
        self.patch(branch_pc, 3, after_loop as i32);
        Ok(())
    }

    fn emit_anchor(&mut self, kind: AnchorKind) {
        let op = match kind {
            AnchorKind::Bol => BOL,
            AnchorKind::Eol => EOL,
            AnchorKind::Beginning => BEGINNING,
            AnchorKind::Start => START,
            AnchorKind::End => END,
            AnchorKind::EndZ => ENDZ,
            AnchorKind::WordBoundary => {
                if self.options.ecma_script {
                    ECMA_BOUNDARY
                } else {
                    BOUNDARY
                }
            }
            AnchorKind::NotWordBoundary => {
                if self.options.ecma_script {
                    NON_ECMA_BOUNDARY
                } else {
                    NONBOUNDARY
                }
            }
        };
        self.emit(op);
    }
}

/// Merges adjacent `Literal` children of a `Concat` into a single
/// `LiteralString`, recursively, so the emitter sees one run instead
/// of a sequence of single characters.
fn coalesce_literals(node: Node) -> Node {
    match node {
        Node::Concat(parts) => {
            let mut merged: Vec<Node> = Vec::with_capacity(parts.len());
            for part in parts {
                let part = coalesce_literals(part);
                let leftover = match merged.pop() {
                    Some(Node::Literal(prev)) => match part {
                        Node::Literal(c) => {
                            let mut s = String::new();
                            s.push(prev);
                            s.push(c);
                            merged.push(Node::LiteralString(s));
                            None
                        }
                        other => Some((Node::Literal(prev), other)),
                    },
                    Some(Node::LiteralString(mut s)) => match part {
                        Node::Literal(c) => {
                            s.push(c);
                            merged.push(Node::LiteralString(s));
                            None
                        }
                        other => Some((Node::LiteralString(s), other)),
                    },
                    Some(prev) => Some((prev, part)),
                    None => {
                        merged.push(part);
                        None
                    }
                };
                if let Some((prev, part)) = leftover {
                    merged.push(prev);
                    merged.push(part);
                }
            }
            if merged.len() == 1 {
                merged.pop().unwrap()
            } else {
                Node::Concat(merged)
            }
        }
        Node::Alternate(parts) => {
            Node::Alternate(parts.into_iter().map(coalesce_literals).collect())
        }
        Node::Group { kind, index, name, child } => Node::Group {
            kind,
            index,
            name,
            child: Box::new(coalesce_literals(*child)),
        },
        Node::Repeat { child, min, max, lazy } => Node::Repeat {
            child: Box::new(coalesce_literals(*child)),
            min,
            max,
            lazy,
        },
        Node::ConditionalBackref { group, yes, no } => Node::ConditionalBackref {
            group,
            yes: Box::new(coalesce_literals(*yes)),
            no: no.map(|n| Box::new(coalesce_literals(*n))),
        },
        other => other,
    }
}

/// `FindFirstChar` anchor analysis: which of the begin/start/end/endz
/// bits the whole pattern is provably anchored on, scanning through
/// the outermost concatenation and alternation structure only (a
/// conservative, not exhaustive, analysis).
fn analyze_anchors(tree: &Node) -> Anchors {
    let mut anchors = Anchors::empty();
    if let Some(kind) = leading_anchor(tree) {
        match kind {
            AnchorKind::Beginning => anchors.insert(Anchors::BEGINNING),
            AnchorKind::Bol => anchors.insert(Anchors::START),
            _ => {}
        }
    }
    if let Some(kind) = trailing_anchor(tree) {
        match kind {
            AnchorKind::End => anchors.insert(Anchors::END),
            AnchorKind::EndZ | AnchorKind::Eol => anchors.insert(Anchors::ENDZ),
            _ => {}
        }
    }
    anchors
}

fn leading_anchor(node: &Node) -> Option<AnchorKind> {
    match node {
        Node::Anchor(k) => Some(*k),
        Node::Concat(parts) => parts.first().and_then(leading_anchor),
        Node::Group { kind: GroupKind::Capturing | GroupKind::NonCapturing, child, .. } => {
            leading_anchor(child)
        }
        Node::Alternate(branches) => {
            let mut all = branches.iter().map(leading_anchor);
            let first = all.next()??;
            if all.all(|k| k == Some(first)) {
                Some(first)
            } else {
                None
            }
        }
        _ => None,
    }
}

fn trailing_anchor(node: &Node) -> Option<AnchorKind> {
    match node {
        Node::Anchor(k) => Some(*k),
        Node::Concat(parts) => parts.last().and_then(trailing_anchor),
        Node::Group { kind: GroupKind::Capturing | GroupKind::NonCapturing, child, .. } => {
            trailing_anchor(child)
        }
        Node::Alternate(branches) => {
            let mut all = branches.iter().map(trailing_anchor);
            let first = all.next()??;
            if all.all(|k| k == Some(first)) {
                Some(first)
            } else {
                None
            }
        }
        _ => None,
    }
}

/// If the pattern begins with a single-character class (no literal
/// run long enough to be worth a Boyer-Moore table), record it so the
/// Scanner can skip ahead with `memchr`-style scanning instead of
/// invoking the interpreter at every position.
fn analyze_first_char(
    tree: &Node,
    classes: &mut Vec<CharClass>,
    options: Options,
) -> Option<FirstCharPrefix> {
    let first = leading_required_node(tree)?;
    let class = match first {
        Node::Literal(ch) => CharClass::single(*ch),
        Node::CharClass(cc) => cc.clone(),
        _ => return None,
    };
    let idx = classes.len();
    classes.push(class);
    Some(FirstCharPrefix { class_id: idx, case_insensitive: options.ignore_case })
}

/// If the pattern begins with a run of plain literal characters, hand
/// it to the Scanner as a Boyer-Moore-Horspool prefix.
fn analyze_literal_prefix(tree: &Node, options: Options) -> Option<BmPrefix> {
    let mut chars = Vec::new();
    collect_literal_prefix(tree, &mut chars);
    if chars.len() < 2 {
        return None;
    }
    BmPrefix::new(chars, options.ignore_case)
}

fn collect_literal_prefix(node: &Node, out: &mut Vec<char>) {
    match node {
        Node::Literal(ch) => out.push(*ch),
        Node::LiteralString(s) => out.extend(s.chars()),
        Node::Concat(parts) => {
            for p in parts {
                let before = out.len();
                collect_literal_prefix(p, out);
                if out.len() == before {
                    break;
                }
                if !matches!(p, Node::Literal(_) | Node::LiteralString(_)) {
                    break;
                }
            }
        }
        Node::Group { kind: GroupKind::Capturing | GroupKind::NonCapturing, child, .. } => {
            collect_literal_prefix(child, out)
        }
        _ => {}
    }
}

/// The first node in the pattern that must match at the scan's start
/// position once leading zero-width assertions and transparent
/// wrappers are skipped.
fn leading_required_node(node: &Node) -> Option<&Node> {
    match node {
        Node::Anchor(_) => None,
        Node::Concat(parts) => parts.first().and_then(leading_required_node),
        Node::Group { kind: GroupKind::Capturing | GroupKind::NonCapturing, child, .. } => {
            leading_required_node(child)
        }
        Node::Literal(_) | Node::CharClass(_) => Some(node),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coalesces_adjacent_literals() {
        let tree = Node::Concat(vec![
            Node::Literal('a'),
            Node::Literal('b'),
            Node::Literal('c'),
        ]);
        assert_eq!(coalesce_literals(tree), Node::LiteralString("abc".to_string()));
    }

    #[test]
    fn leaves_non_literal_runs_alone() {
        let cc = CharClass::digit();
        let tree = Node::Concat(vec![Node::Literal('a'), Node::CharClass(cc.clone())]);
        assert_eq!(
            coalesce_literals(tree),
            Node::Concat(vec![Node::Literal('a'), Node::CharClass(cc)])
        );
    }

    #[test]
    fn merges_runs_either_side_of_a_non_literal() {
        let tree = Node::Concat(vec![
            Node::Literal('a'),
            Node::Literal('b'),
            Node::CharClass(CharClass::digit()),
            Node::Literal('c'),
            Node::Literal('d'),
        ]);
        assert_eq!(
            coalesce_literals(tree),
            Node::Concat(vec![
                Node::LiteralString("ab".to_string()),
                Node::CharClass(CharClass::digit()),
                Node::LiteralString("cd".to_string()),
            ])
        );
    }

    #[test]
    fn recurses_into_groups_and_repeats() {
        let tree = Node::Repeat {
            child: Box::new(Node::Group {
                kind: GroupKind::NonCapturing,
                index: None,
                name: None,
                child: Box::new(Node::Concat(vec![Node::Literal('x'), Node::Literal('y')])),
            }),
            min: 1,
            max: None,
            lazy: false,
        };
        let coalesced = coalesce_literals(tree);
        match coalesced {
            Node::Repeat { child, .. } => match *child {
                Node::Group { child, .. } => {
                    assert_eq!(*child, Node::LiteralString("xy".to_string()));
                }
                other => panic!("expected group, got {:?}", other),
            },
            other => panic!("expected repeat, got {:?}", other),
        }
    }
}
