// Copyright 2014-2015 The Rust Project Developers. See the COPYRIGHT
// file at the top-level directory of this distribution and at
// http://rust-lang.org/COPYRIGHT.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The outer search loop: slide a candidate start position across the
//! input, fast-forwarding past positions the program's anchors, Boyer-
//! Moore prefix or first-character set rule out before ever invoking
//! the interpreter.

use crate::error::Result;
use crate::interp::{self, RawMatch, Scratch};
use crate::program::Program;
use crate::timeout::Deadline;

/// A successful anchored attempt, translated out of `RawMatch`'s
/// internal capture bookkeeping into the public span shape the rest of
/// the crate builds on.
#[derive(Debug)]
pub struct ScanMatch {
    pub start: usize,
    pub end: usize,
    pub captures: crate::captures::Captures,
}

/// `scan(program, input, range, start_pos, prev_match_len, quick,
/// deadline)`. `range` bounds the candidate positions the scan is
/// allowed to try; `start_pos` is the first one attempted. Returns
/// `Ok(None)` on ordinary exhaustion (no match anywhere in range), and
/// propagates interpreter errors (chiefly timeout) unchanged.
pub fn scan(
    prog: &Program,
    text: &[char],
    range: (usize, usize),
    start_pos: usize,
    prev_match_len: usize,
    quick: bool,
    deadline: Deadline,
    scratch: &mut Scratch,
) -> Result<Option<ScanMatch>> {
    let (text_beg, text_end) = range;
    let rtl = prog.right_to_left;
    let mut pos = start_pos;

    // Resuming after an empty (or failed-to-advance) prior match must
    // step once before searching again, or a zero-width match at the
    // same spot would be found forever.
    if prev_match_len == 0 {
        if rtl {
            if pos == text_beg {
                return Ok(None);
            }
            pos -= 1;
        } else {
            if pos >= text_end {
                return Ok(None);
            }
            pos += 1;
        }
    }

    loop {
        let candidate = match find_first_char(prog, text, text_beg, text_end, start_pos, pos) {
            Some(p) => p,
            None => return Ok(None),
        };
        pos = candidate;

        match interp::interpret(prog, text, pos, start_pos, deadline, scratch)? {
            Some(m) => {
                if quick {
                    return Ok(Some(ScanMatch { start: m.start, end: m.end, captures: m.captures }));
                }
                return Ok(Some(to_scan_match(m)));
            }
            None => {
                if rtl {
                    if pos == text_beg {
                        return Ok(None);
                    }
                    pos -= 1;
                } else {
                    if pos >= text_end {
                        return Ok(None);
                    }
                    pos += 1;
                }
            }
        }
    }
}

fn to_scan_match(m: RawMatch) -> ScanMatch {
    ScanMatch { start: m.start, end: m.end, captures: m.captures }
}

/// Fast-forward `pos` to the next position the program's anchors, BM
/// prefix or first-char set allow, or report that no candidate
/// remains in `[text_beg, text_end)`.
fn find_first_char(
    prog: &Program,
    text: &[char],
    text_beg: usize,
    text_end: usize,
    start_pos: usize,
    mut pos: usize,
) -> Option<usize> {
    let rtl = prog.right_to_left;

    if prog.is_anchored_begin() {
        if rtl {
            if pos < text_end {
                return None;
            }
        } else if pos > text_beg {
            return None;
        }
    }

    if prog.anchors.contains(crate::program::Anchors::START) {
        if rtl {
            if pos < start_pos {
                return None;
            }
        } else if pos > start_pos {
            return None;
        }
    }

    if prog.anchors.contains(crate::program::Anchors::END) {
        if rtl {
            if pos > text_beg {
                pos = text_beg;
            }
        } else if pos < text_end {
            pos = text_end;
        }
    } else if prog.anchors.contains(crate::program::Anchors::ENDZ) {
        let endz = if text_end > text_beg { text_end - 1 } else { text_beg };
        if rtl {
            if pos > endz {
                pos = endz;
            }
        } else if pos < endz {
            pos = endz;
        }
    }

    if let Some(bm) = &prog.bm_prefix {
        return if rtl {
            find_bm_rtl(bm, text, text_beg, pos)
        } else {
            bm.find(text, pos)
        };
    }

    if let Some(fc) = prog.first_char_prefix {
        let class = &prog.classes[fc.class_id];
        if rtl {
            let mut p = pos;
            loop {
                if p <= text_beg {
                    return None;
                }
                if class.matches(text[p - 1], fc.case_insensitive) {
                    return Some(p);
                }
                p -= 1;
            }
        } else {
            let mut p = pos;
            loop {
                if p >= text_end {
                    return None;
                }
                if class.matches(text[p], fc.case_insensitive) {
                    return Some(p);
                }
                p += 1;
            }
        }
    }

    if rtl {
        if pos < text_beg || pos > text_end {
            return None;
        }
    } else if pos < text_beg || pos > text_end {
        return None;
    }
    Some(pos)
}

/// The Boyer-Moore-Horspool automaton is built left-to-right; right-to-
/// left scans run it from each decreasing candidate instead of
/// reversing the table, since the prefix itself is short and the table
/// is reused across the whole scan either way.
fn find_bm_rtl(
    bm: &crate::program::BmPrefix,
    text: &[char],
    text_beg: usize,
    from: usize,
) -> Option<usize> {
    let m = bm.pattern.len();
    let mut end = from;
    while end >= text_beg + m {
        if let Some(start) = bm.find(&text[..end], end - m) {
            return Some(start + m);
        }
        end -= 1;
    }
    None
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

    #[test]
    fn finds_literal_prefix_match() {
        let prog = program("bar", Options::new());
        let text: Vec<char> = "foo bar baz".chars().collect();
        let mut scratch = Scratch::new(&prog);
        let m = scan(&prog, &text, (0, text.len()), 0, 1, false, Deadline::none(), &mut scratch)
            .unwrap()
            .unwrap();
        assert_eq!((m.start, m.end), (4, 7));
    }

    #[test]
    fn empty_match_advances_next_attempt() {
        let prog = program("a*", Options::new());
        let text: Vec<char> = "bbb".chars().collect();
        let mut scratch = Scratch::new(&prog);
        let first = scan(&prog, &text, (0, text.len()), 0, 1, false, Deadline::none(), &mut scratch)
            .unwrap()
            .unwrap();
        assert_eq!((first.start, first.end), (0, 0));
        let second = scan(&prog, &text, (0, text.len()), 0, 0, false, Deadline::none(), &mut scratch)
            .unwrap()
            .unwrap();
        assert_eq!((second.start, second.end), (1, 1));
    }

    #[test]
    fn anchored_begin_rejects_interior_start() {
        let prog = program(r"\Afoo", Options::new());
        let text: Vec<char> = "xfoo".chars().collect();
        let mut scratch = Scratch::new(&prog);
        let m = scan(&prog, &text, (0, text.len()), 1, 1, false, Deadline::none(), &mut scratch).unwrap();
        assert!(m.is_none());
    }
}
