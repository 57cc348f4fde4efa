// Copyright 2014-2015 The Rust Project Developers. See the COPYRIGHT
// file at the top-level directory of this distribution and at
// http://rust-lang.org/COPYRIGHT.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! A backtracking bytecode interpreter for regular expressions.
//!
//! [`Regex`] compiles a pattern into an immutable opcode stream plus
//! the anchor/prefix analysis the Scanner uses to skip candidate start
//! positions, then drives it with the three-stack backtracking VM in
//! `interp`. The public surface below —
//! `is_match`, `find`/`find_iter`, `captures`/`captures_iter`,
//! `replace*` and `split*` — is a thin convenience layer over the
//! Scanner and the replacement mini-language; none of it participates
//! in the match semantics, which live entirely in `interp`, `captures`
//! and `compile`.

mod captures;
mod charclass;
mod compile;
mod error;
mod interp;
mod opcode;
mod options;
mod parse;
mod pool;
mod program;
mod replace;
mod scanner;
mod timeout;
mod tree;

pub use crate::error::{Error, ParseError, Result};
pub use crate::options::Options;

use crate::captures::Captures as RawCaptures;
use crate::pool::Pool;
use crate::program::Program;
use crate::replace::Replacement;
use crate::timeout::Deadline;

use std::time::Duration;

/// A compiled regular expression.
///
/// Cloning a `Regex` is cheap relative to compiling one: the immutable
/// [`Program`] is shared (`Program` derives `Clone` but carries no
/// interior mutability), while the reusable-interpreter [`Pool`] starts
/// out empty for the clone rather than sharing the original's cached
/// `Scratch`.
#[derive(Clone, Debug)]
pub struct Regex {
    prog: Program,
    pool: Pool,
    timeout: Option<Duration>,
}

impl Regex {
    /// Compiles `pattern` with default options.
    pub fn new(pattern: &str) -> Result<Regex> {
        Regex::with_options(pattern, Options::new())
    }

    /// Compiles `pattern` under the given [`Options`].
    pub fn with_options(pattern: &str, options: Options) -> Result<Regex> {
        let prog = Program::new(pattern, options)?;
        Ok(Regex { prog, pool: Pool::new(), timeout: None })
    }

    /// Returns a clone of this regex whose scans fail with
    /// [`Error::Timeout`] if a single anchored attempt runs longer than
    /// `budget`. Unset by default (scans never time out on their own).
    pub fn with_timeout(mut self, budget: Duration) -> Regex {
        self.timeout = Some(budget);
        self
    }

    /// The original pattern text this regex was compiled from.
    pub fn as_str(&self) -> &str {
        &self.prog.original
    }

    /// Number of capture groups, including the implicit group 0 (the
    /// whole match).
    pub fn captures_len(&self) -> usize {
        self.prog.num_captures()
    }

    fn deadline(&self) -> Deadline {
        match self.timeout {
            Some(d) => Deadline::after(d),
            None => Deadline::none(),
        }
    }

    /// `is_match`: true iff the pattern matches anywhere in `text`.
    pub fn is_match(&self, text: &str) -> bool {
        self.is_match_at(text, 0)
    }

    /// `is_match`, starting the search no earlier than byte offset
    /// `start`.
    pub fn is_match_at(&self, text: &str, start: usize) -> bool {
        match self.find_at(text, start) {
            Ok(m) => m.is_some(),
            Err(_) => false,
        }
    }

    /// `match_first`: the leftmost (rightmost, under `RightToLeft`)
    /// match in `text`, or `None` if the pattern doesn't match
    /// anywhere.
    pub fn find<'t>(&self, text: &'t str) -> Option<Match<'t>> {
        self.find_at(text, self.default_start(text)).ok().flatten()
    }

    /// `match_first`, starting the search no earlier than byte offset
    /// `start`. Returns `Err` only on a timeout or an internal
    /// invariant violation; an ordinary non-match is `Ok(None)`.
    ///
    /// `range` (the candidate positions `\A`/`\z` anchor against) is
    /// always the whole buffer; only `start` (the first candidate, and
    /// `\G`'s reference point) varies. Under `RightToLeft`, `start`
    /// still names the position the scan begins retreating from.
    pub fn find_at<'t>(&self, text: &'t str, start: usize) -> Result<Option<Match<'t>>> {
        let ct = CharText::new(text);
        let begin = ct.char_index_at_or_after(start);
        let mut guard = self.pool.acquire(&self.prog);
        let sm = scanner::scan(
            &self.prog,
            &ct.chars,
            (0, ct.chars.len()),
            begin,
            1,
            false,
            self.deadline(),
            guard.scratch(),
        )?;
        Ok(sm.map(|m| ct.to_match(text, m.start, m.end)))
    }

    /// The default starting position a zero-argument search begins
    /// from: the front of the text left-to-right, the end of it under
    /// `RightToLeft`.
    fn default_start(&self, text: &str) -> usize {
        if self.prog.right_to_left {
            text.len()
        } else {
            0
        }
    }

    /// `match_all`: every non-overlapping match in `text`, in left-to-
    /// right (or right-to-left, under `RightToLeft`) order.
    pub fn find_iter<'r, 't>(&'r self, text: &'t str) -> Matches<'r, 't> {
        Matches::new(self, text)
    }

    /// The first match's captures, or `None` if the pattern doesn't
    /// match anywhere in `text`.
    pub fn captures<'r, 't>(&'r self, text: &'t str) -> Option<Captures<'r, 't>> {
        self.captures_at(text, self.default_start(text))
    }

    /// `captures`, starting the search no earlier than byte offset
    /// `start`.
    pub fn captures_at<'r, 't>(&'r self, text: &'t str, start: usize) -> Option<Captures<'r, 't>> {
        let ct = CharText::new(text);
        let begin = ct.char_index_at_or_after(start);
        let mut guard = self.pool.acquire(&self.prog);
        let sm = scanner::scan(
            &self.prog,
            &ct.chars,
            (0, ct.chars.len()),
            begin,
            1,
            false,
            self.deadline(),
            guard.scratch(),
        )
        .ok()
        .flatten()?;
        Some(Captures { prog: &self.prog, ct, raw: sm.captures })
    }

    /// Every non-overlapping match's captures, in scan order.
    pub fn captures_iter<'r, 't>(&'r self, text: &'t str) -> CaptureMatches<'r, 't> {
        CaptureMatches(Matches::new(self, text))
    }

    /// Replaces the first match with `rep`'s rendering of the
    /// replacement mini-language (`$1`, `${name}`, `$&`, `` $` ``,
    /// `$'`, `$+`, `$_`, `$$`).
    pub fn replace(&self, text: &str, rep: &str) -> String {
        self.replacen(text, 1, rep)
    }

    /// Replaces every match.
    pub fn replace_all(&self, text: &str, rep: &str) -> String {
        self.replacen(text, 0, rep)
    }

    /// Replaces at most `limit` matches (`0` means unbounded).
    pub fn replacen(&self, text: &str, limit: usize, rep: &str) -> String {
        let template = Replacement::parse(rep, &self.prog);
        let ct = CharText::new(text);
        // `raw_matches` walks in scan order, which under `RightToLeft`
        // finds the rightmost match first; `limit` selects *which*
        // matches are replaced in that order (mirroring the direction
        // the pattern scans in), but the matches must still be applied
        // left-to-right to build the output string.
        let mut matches = self.raw_matches(&ct);
        if limit != 0 && matches.len() > limit {
            matches.truncate(limit);
        }
        matches.sort_by_key(|m| m.start);

        let mut out = String::with_capacity(text.len());
        let mut last_end = 0usize;
        for m in &matches {
            out.push_str(&ct.text[last_end..ct.byte_of(m.start)]);
            out.push_str(&template.render(&ct.chars, m.start, m.end, &m.captures));
            last_end = ct.byte_of(m.end);
        }
        out.push_str(&ct.text[last_end..]);
        out
    }

    /// `split`: the pieces of `text` between every match.
    pub fn split<'r, 't>(&'r self, text: &'t str) -> Split<'r, 't> {
        Split { matches: self.find_iter(text), last_end: 0, text }
    }

    /// `split`, keeping at most `limit` pieces (the last piece absorbs
    /// whatever remains unsplit; `0` means unbounded).
    pub fn splitn<'r, 't>(&'r self, text: &'t str, limit: usize) -> SplitN<'r, 't> {
        let remaining = if limit == 0 { None } else { Some(limit) };
        SplitN { inner: self.split(text), remaining }
    }

    fn raw_matches<'t>(&self, ct: &CharText<'t>) -> Vec<scanner::ScanMatch> {
        let mut guard = self.pool.acquire(&self.prog);
        let mut out = Vec::new();
        let rtl = self.prog.right_to_left;
        let mut pos = if rtl { ct.chars.len() } else { 0 };
        let mut prev_len = 1usize;
        loop {
            let found = scanner::scan(
                &self.prog,
                &ct.chars,
                (0, ct.chars.len()),
                pos,
                prev_len,
                false,
                self.deadline(),
                guard.scratch(),
            );
            match found {
                Ok(Some(m)) => {
                    prev_len = m.end.saturating_sub(m.start);
                    pos = if rtl { m.start } else { m.end };
                    out.push(m);
                }
                _ => break,
            }
        }
        out
    }
}

/// Decoded text plus the char-index <-> byte-offset tables every
/// public entry point needs: the interpreter works over `&[char]`,
/// while the public API reports byte offsets into the original
/// `&str`, matching ordinary Rust string-slicing idiom.
struct CharText<'t> {
    text: &'t str,
    chars: Vec<char>,
    byte_of: Vec<usize>,
}

impl<'t> CharText<'t> {
    fn new(text: &'t str) -> CharText<'t> {
        let mut chars = Vec::with_capacity(text.len());
        let mut byte_of = Vec::with_capacity(text.len() + 1);
        for (i, c) in text.char_indices() {
            chars.push(c);
            byte_of.push(i);
        }
        byte_of.push(text.len());
        CharText { text, chars, byte_of }
    }

    fn byte_of(&self, char_idx: usize) -> usize {
        self.byte_of[char_idx]
    }

    /// The char index of the first char boundary at or after byte
    /// offset `byte`, clamped to the end of the text.
    fn char_index_at_or_after(&self, byte: usize) -> usize {
        match self.byte_of.binary_search(&byte) {
            Ok(i) => i,
            Err(i) => i.min(self.chars.len()),
        }
    }

    fn to_match(&self, text: &'t str, start: usize, end: usize) -> Match<'t> {
        Match { text, start: self.byte_of(start), end: self.byte_of(end) }
    }
}

/// A single match's span, reported as byte offsets into the text it
/// was found in (always on `char` boundaries).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Match<'t> {
    text: &'t str,
    start: usize,
    end: usize,
}

impl<'t> Match<'t> {
    pub fn start(&self) -> usize {
        self.start
    }

    pub fn end(&self) -> usize {
        self.end
    }

    pub fn range(&self) -> std::ops::Range<usize> {
        self.start..self.end
    }

    pub fn as_str(&self) -> &'t str {
        &self.text[self.start..self.end]
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// One match's full capture-group bookkeeping: every group, numbered
/// or named, that completed along the winning backtracking path.
pub struct Captures<'r, 't> {
    prog: &'r Program,
    ct: CharText<'t>,
    raw: RawCaptures,
}

impl<'r, 't> Captures<'r, 't> {
    /// Group `i`'s match (`i == 0` is the whole match), or `None` if
    /// that group didn't participate in this match.
    pub fn get(&self, i: usize) -> Option<Match<'t>> {
        if !self.raw.is_matched(i) {
            return None;
        }
        let start = self.raw.match_index(i) as usize;
        let len = self.raw.match_length(i) as usize;
        Some(self.ct.to_match(self.ct.text, start, start + len))
    }

    /// The named group `name`'s match, or `None` if the name is
    /// undeclared or didn't participate.
    pub fn name(&self, name: &str) -> Option<Match<'t>> {
        let slot = self.prog.caps.group_for_name(name)?;
        self.get(self.prog.caps.slot(slot)?)
    }

    /// Number of declared groups, including group 0.
    pub fn len(&self) -> usize {
        self.raw.cap_size()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// An iterator over every group's match in declaration order,
    /// `None` for groups that didn't participate.
    pub fn iter(&self) -> CapturesIter<'_, 'r, 't> {
        CapturesIter { caps: self, idx: 0 }
    }
}

impl<'r, 't> std::ops::Index<usize> for Captures<'r, 't> {
    type Output = str;
    fn index(&self, i: usize) -> &str {
        self.get(i)
            .map(|m| m.as_str())
            .unwrap_or_else(|| panic!("no group at index {}", i))
    }
}

impl<'r, 't> std::ops::Index<&str> for Captures<'r, 't> {
    type Output = str;
    fn index(&self, name: &str) -> &str {
        self.name(name)
            .map(|m| m.as_str())
            .unwrap_or_else(|| panic!("no group named {:?}", name))
    }
}

pub struct CapturesIter<'c, 'r, 't> {
    caps: &'c Captures<'r, 't>,
    idx: usize,
}

impl<'c, 'r, 't> Iterator for CapturesIter<'c, 'r, 't> {
    type Item = Option<Match<'t>>;
    fn next(&mut self) -> Option<Option<Match<'t>>> {
        if self.idx >= self.caps.len() {
            return None;
        }
        let m = self.caps.get(self.idx);
        self.idx += 1;
        Some(m)
    }
}

/// An iterator over every non-overlapping match in a text, as produced
/// by [`Regex::find_iter`].
pub struct Matches<'r, 't> {
    re: &'r Regex,
    ct: CharText<'t>,
    pos: usize,
    prev_len: usize,
    exhausted: bool,
}

impl<'r, 't> Matches<'r, 't> {
    fn new(re: &'r Regex, text: &'t str) -> Matches<'r, 't> {
        let ct = CharText::new(text);
        let pos = if re.prog.right_to_left { ct.chars.len() } else { 0 };
        Matches { re, ct, pos, prev_len: 1, exhausted: false }
    }
}

impl<'r, 't> Iterator for Matches<'r, 't> {
    type Item = Match<'t>;

    fn next(&mut self) -> Option<Match<'t>> {
        if self.exhausted {
            return None;
        }
        let rtl = self.re.prog.right_to_left;
        let mut guard = self.re.pool.acquire(&self.re.prog);
        let found = scanner::scan(
            &self.re.prog,
            &self.ct.chars,
            (0, self.ct.chars.len()),
            self.pos,
            self.prev_len,
            false,
            self.re.deadline(),
            guard.scratch(),
        );
        drop(guard);
        match found {
            Ok(Some(m)) => {
                self.prev_len = m.end.saturating_sub(m.start);
                self.pos = if rtl { m.start } else { m.end };
                Some(self.ct.to_match(self.ct.text, m.start, m.end))
            }
            _ => {
                self.exhausted = true;
                None
            }
        }
    }
}

/// [`Regex::captures_iter`]'s iterator.
pub struct CaptureMatches<'r, 't>(Matches<'r, 't>);

impl<'r, 't> Iterator for CaptureMatches<'r, 't> {
    type Item = Captures<'r, 't>;

    fn next(&mut self) -> Option<Captures<'r, 't>> {
        let m = self.0.next()?;
        // Re-run the anchored attempt at the match's own start to
        // recover its capture bookkeeping; `find_iter` only needed the
        // span. A scan is deterministic for a fixed starting position,
        // so this reproduces the same match and its captures.
        self.0.re.captures_at(self.0.ct.text, m.start())
    }
}

/// [`Regex::split`]'s iterator.
pub struct Split<'r, 't> {
    matches: Matches<'r, 't>,
    last_end: usize,
    text: &'t str,
}

impl<'r, 't> Iterator for Split<'r, 't> {
    type Item = &'t str;

    fn next(&mut self) -> Option<&'t str> {
        match self.matches.next() {
            Some(m) => {
                let piece = &self.text[self.last_end..m.start()];
                self.last_end = m.end();
                Some(piece)
            }
            None => {
                if self.last_end > self.text.len() {
                    None
                } else {
                    let piece = &self.text[self.last_end..];
                    self.last_end = self.text.len() + 1;
                    Some(piece)
                }
            }
        }
    }
}

/// [`Regex::splitn`]'s iterator.
pub struct SplitN<'r, 't> {
    inner: Split<'r, 't>,
    /// Pieces left to emit; `None` means unbounded (`limit == 0`).
    remaining: Option<usize>,
}

impl<'r, 't> Iterator for SplitN<'r, 't> {
    type Item = &'t str;

    fn next(&mut self) -> Option<&'t str> {
        match self.remaining {
            None => self.inner.next(),
            Some(0) => None,
            Some(1) => {
                self.remaining = Some(0);
                if self.inner.last_end > self.inner.text.len() {
                    return None;
                }
                let rest = &self.inner.text[self.inner.last_end..];
                self.inner.last_end = self.inner.text.len() + 1;
                Some(rest)
            }
            Some(n) => {
                self.remaining = Some(n - 1);
                self.inner.next()
            }
        }
    }
}

/// Escapes every regex metacharacter in `text` so it can be spliced
/// into a pattern and matched literally.
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if is_meta_char(c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn is_meta_char(c: char) -> bool {
    matches!(
        c,
        '\\' | '.' | '+' | '*' | '?' | '(' | ')' | '|' | '[' | ']' | '{' | '}' | '^' | '$' | '#' | '&' | '-' | '~'
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_match_basic() {
        let re = Regex::new(r"a*b").unwrap();
        assert!(re.is_match("aaab"));
        assert!(!re.is_match("ccc"));
    }

    #[test]
    fn find_reports_byte_span() {
        let re = Regex::new(r"bar").unwrap();
        let m = re.find("foo bar baz").unwrap();
        assert_eq!(m.range(), 4..7);
        assert_eq!(m.as_str(), "bar");
    }

    #[test]
    fn find_handles_multibyte_prefix() {
        let re = Regex::new(r"b").unwrap();
        // "café " is 6 bytes (é is 2 bytes) before the "b".
        let m = re.find("café bar").unwrap();
        assert_eq!(m.as_str(), "b");
        assert_eq!(&"café bar"[m.start()..m.end()], "b");
    }

    #[test]
    fn captures_numbered_and_named() {
        let re = Regex::new(r"(?<user>\w+)@(\w+)").unwrap();
        let caps = re.captures("user@host").unwrap();
        assert_eq!(&caps[0], "user@host");
        assert_eq!(&caps[1], "user");
        assert_eq!(&caps[2], "host");
        assert_eq!(&caps["user"], "user");
    }

    #[test]
    fn find_iter_collects_every_match() {
        let re = Regex::new(r"\d+").unwrap();
        let got: Vec<&str> = re.find_iter("a1 bb22 c333").map(|m| m.as_str()).collect();
        assert_eq!(got, vec!["1", "22", "333"]);
    }

    #[test]
    fn find_iter_does_not_loop_on_empty_matches() {
        let re = Regex::new(r"a*").unwrap();
        let got: Vec<&str> = re.find_iter("baab").map(|m| m.as_str()).collect();
        assert_eq!(got, vec!["", "aa", "", ""]);
    }

    #[test]
    fn captures_iter_matches_find_iter_spans() {
        let re = Regex::new(r"(\w)(\d)").unwrap();
        let spans: Vec<_> = re.captures_iter("a1 b2").map(|c| c.get(0).unwrap().range()).collect();
        let direct: Vec<_> = re.find_iter("a1 b2").map(|m| m.range()).collect();
        assert_eq!(spans, direct);
    }

    #[test]
    fn replace_all_substitutes_every_match() {
        let re = Regex::new(r"\d+").unwrap();
        assert_eq!(re.replace_all("a1 b22 c333", "#"), "a# b# c#");
    }

    #[test]
    fn replace_only_first() {
        let re = Regex::new(r"\d+").unwrap();
        assert_eq!(re.replace("a1 b22", "#"), "a# b22");
    }

    #[test]
    fn replace_uses_capture_reference() {
        let re = Regex::new(r"(\w+)@(\w+)").unwrap();
        assert_eq!(re.replace("user@host", "$2:$1"), "host:user");
    }

    #[test]
    fn split_on_whitespace_runs() {
        let re = Regex::new(r"\s+").unwrap();
        let got: Vec<&str> = re.split("one  two\tthree").collect();
        assert_eq!(got, vec!["one", "two", "three"]);
    }

    #[test]
    fn splitn_keeps_remainder_in_last_piece() {
        let re = Regex::new(r",").unwrap();
        let got: Vec<&str> = re.splitn("a,b,c,d", 2).collect();
        assert_eq!(got, vec!["a", "b,c,d"]);
    }

    #[test]
    fn escape_quotes_metacharacters() {
        assert_eq!(escape("a.b*c"), r"a\.b\*c");
    }

    #[test]
    fn rtl_scan_finds_rightmost_occurrence_first() {
        let re = Regex::with_options("foo", Options::new().right_to_left(true)).unwrap();
        let m = re.find("foo foo").unwrap();
        assert_eq!(m.range(), 4..7);
    }

    #[test]
    fn timeout_surfaces_as_error() {
        let re = Regex::new("(a+)+$").unwrap().with_timeout(Duration::from_millis(5));
        let input = "a".repeat(40) + "!";
        match re.find_at(&input, 0) {
            Err(Error::Timeout { .. }) => {}
            other => assert!(other.unwrap_or(None).is_none(), "expected timeout or no match"),
        }
    }

    #[test]
    fn randomized_matches_stay_in_bounds_and_deterministic() {
        use rand::Rng;
        let re = Regex::new(r"(a|ab)*c?").unwrap();
        let mut rng = rand::thread_rng();
        let alphabet = ['a', 'b', 'c'];
        for _ in 0..200 {
            let len = rng.gen_range(0, 12);
            let text: String =
                (0..len).map(|_| alphabet[rng.gen_range(0, alphabet.len())]).collect();
            let first = re.find(&text);
            let second = re.find(&text);
            assert_eq!(first, second, "scan must be deterministic for {:?}", text);
            if let Some(m) = first {
                assert!(m.start() <= m.end());
                assert!(m.end() <= text.len());
            }
        }
    }

    #[test]
    fn clone_does_not_share_pool_slot() {
        let re = Regex::new("a+").unwrap();
        assert!(re.is_match("aaa"));
        let cloned = re.clone();
        assert!(cloned.is_match("aaa"));
    }
}
