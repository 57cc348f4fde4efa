// Copyright 2014-2015 The Rust Project Developers. See the COPYRIGHT
// file at the top-level directory of this distribution and at
// http://rust-lang.org/COPYRIGHT.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The mutable Match record a scan builds up and, on success, finalizes
//! ("Tidy") before handing it to the caller.

/// Sentinel length marking a group entry that has been fully balanced
/// out (pushed by a balanced match instead of a literal interval).
const BALANCED_OUT_LEN: i32 = -2;

/// Sentinel index field on a balanced-out entry that closed nothing
/// (an unmatched `(?<-g>...)` with no corresponding open still on
/// `open[g2]`). Distinct from every `encode_ref` output, which is
/// always `<= -3`.
const NO_PARTNER: i32 = -1;

/// Per-group capture bookkeeping plus the balanced-match negative-index
/// involution. `open[g]` is a stack of
/// pair-indices into `matches[g]` that are real captures not yet closed
/// by a balanced match; it's what lets `TransferCapture` find the right
/// partner to close (and `Tidy` later drop) instead of always just the
/// group's trailing entry.
#[derive(Clone, Debug, Default)]
pub struct Captures {
    match_count: Vec<u32>,
    matches: Vec<Vec<i32>>,
    open: Vec<Vec<usize>>,
    balancing: bool,
}

impl Captures {
    pub fn new(cap_size: usize) -> Captures {
        Captures {
            match_count: vec![0; cap_size],
            matches: vec![Vec::new(); cap_size],
            open: vec![Vec::new(); cap_size],
            balancing: false,
        }
    }

    pub fn reset(&mut self) {
        for c in &mut self.match_count {
            *c = 0;
        }
        for m in &mut self.matches {
            m.clear();
        }
        for o in &mut self.open {
            o.clear();
        }
        self.balancing = false;
    }

    pub fn cap_size(&self) -> usize {
        self.match_count.len()
    }

    pub fn match_count(&self, g: usize) -> u32 {
        self.match_count.get(g).copied().unwrap_or(0)
    }

    /// `Capture(g, start, end)`: normalize then append a literal
    /// interval and crawl-push `g`. Returns the value the crawl stack
    /// should record.
    pub fn capture(&mut self, g: usize, start: usize, end: usize) {
        let (start, end) = if start <= end { (start, end) } else { (end, start) };
        let pair = self.matches[g].len() / 2;
        self.matches[g].push(start as i32);
        self.matches[g].push((end - start) as i32);
        self.match_count[g] += 1;
        self.open[g].push(pair);
    }

    /// Undo the most recent capture recorded for `g` (the `Uncapture`
    /// operation, driven by popping the crawl stack). Distinguishes a
    /// literal interval from a balanced-out entry by its length field
    /// and restores `open[g]` accordingly, so a later redo (forward
    /// re-execution after further backtracking) sees the same state a
    /// fresh run would have produced.
    pub fn uncapture(&mut self, g: usize) {
        let n = self.matches[g].len();
        debug_assert!(n >= 2);
        let idx_field = self.matches[g][n - 2];
        let len_field = self.matches[g][n - 1];
        self.matches[g].truncate(n - 2);
        self.match_count[g] -= 1;
        if len_field == BALANCED_OUT_LEN {
            if idx_field != NO_PARTNER {
                self.open[g].push(decode_ref(idx_field));
            }
        } else {
            self.open[g].pop();
        }
    }

    /// `TransferCapture(g, g2, start, end)`: balanced match. Pops
    /// `g2`'s innermost still-open real capture (if any) as the
    /// "partner" being closed, appends a balanced-out entry to `g2`
    /// referencing it, and — if `g != -1`/`None` — appends a literal
    /// interval to `g` (clamped to the partner's interval if the new
    /// span doesn't overlap it).
    pub fn transfer_capture(
        &mut self,
        g: Option<usize>,
        g2: usize,
        start: usize,
        end: usize,
    ) {
        let (start, end) = if start <= end { (start, end) } else { (end, start) };
        self.balancing = true;

        let partner = self.open[g2].pop();
        let (cstart, cend) = match partner {
            Some(p) => {
                let prev_start = self.matches[g2][2 * p] as usize;
                let prev_end = prev_start + self.matches[g2][2 * p + 1] as usize;
                if end < prev_start || start > prev_end {
                    (prev_start, prev_end)
                } else {
                    (start, end)
                }
            }
            None => (start, end),
        };

        self.matches[g2].push(partner.map(encode_ref).unwrap_or(NO_PARTNER));
        self.matches[g2].push(BALANCED_OUT_LEN);
        self.match_count[g2] += 1;

        if let Some(g) = g {
            let pair = self.matches[g].len() / 2;
            self.matches[g].push(cstart as i32);
            self.matches[g].push((cend - cstart) as i32);
            self.match_count[g] += 1;
            self.open[g].push(pair);
        }
    }

    pub fn is_balancing(&self) -> bool {
        self.balancing
    }

    /// `IsMatched(g)`: true iff `g` has a completed capture whose last
    /// entry isn't the "fully balanced out" sentinel length.
    pub fn is_matched(&self, g: usize) -> bool {
        self.match_count(g) > 0 && *self.matches[g].last().unwrap() != BALANCED_OUT_LEN
    }

    /// Resolves through a balanced-out entry to the real pair it
    /// shadows, if any (pre-`Tidy` only — a matched group never ends
    /// on a balanced-out entry).
    pub fn match_index(&self, g: usize) -> i32 {
        let e = &self.matches[g];
        let raw = e[e.len() - 2];
        if raw >= 0 {
            raw
        } else if raw == NO_PARTNER {
            0
        } else {
            e[decode_ref(raw) * 2]
        }
    }

    pub fn match_length(&self, g: usize) -> i32 {
        let e = &self.matches[g];
        let raw = e[e.len() - 2];
        if raw >= 0 {
            e[e.len() - 1]
        } else if raw == NO_PARTNER {
            0
        } else {
            e[decode_ref(raw) * 2 + 1]
        }
    }

    /// Finalize the record: every balanced-out entry and the real pair
    /// it closed are both dropped, so a group that closed every open it
    /// ever recorded ends up with `match_count == 0`; any interval left
    /// unclosed survives. Remaining real entries shift down to stay
    /// contiguous.
    pub fn tidy(&mut self) {
        if !self.balancing {
            return;
        }
        for g in 0..self.matches.len() {
            let total_pairs = self.match_count[g] as usize;
            let mut remove = vec![false; total_pairs];
            for p in 0..total_pairs {
                if self.matches[g][2 * p + 1] == BALANCED_OUT_LEN {
                    remove[p] = true;
                    let idx_field = self.matches[g][2 * p];
                    if idx_field != NO_PARTNER {
                        let partner = decode_ref(idx_field);
                        if partner < total_pairs {
                            remove[partner] = true;
                        }
                    }
                }
            }
            let entries = &mut self.matches[g];
            let mut target = 0usize;
            for p in 0..total_pairs {
                if !remove[p] {
                    if target != p {
                        entries[2 * target] = entries[2 * p];
                        entries[2 * target + 1] = entries[2 * p + 1];
                    }
                    target += 1;
                }
            }
            entries.truncate(2 * target);
            self.match_count[g] = target as u32;
            self.open[g].clear();
        }
    }
}

/// Involution used to mark a balanced-out entry as a reference to the
/// real pair it closed: `index = -3 - v`, `v = -3 - index`. Never
/// collides with `NO_PARTNER` (`-1`) or `BALANCED_OUT_LEN` (`-2`),
/// since it only ever produces values `<= -3`.
pub fn encode_ref(index: usize) -> i32 {
    -3 - index as i32
}

pub fn decode_ref(v: i32) -> usize {
    (-3 - v) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn involution_round_trips() {
        for v in [0usize, 1, 5, 100] {
            let enc = encode_ref(v);
            assert!(enc <= -3);
            assert_eq!(decode_ref(enc), v);
        }
    }

    #[test]
    fn simple_capture() {
        let mut c = Captures::new(2);
        c.capture(1, 0, 3);
        assert_eq!(c.match_count(1), 1);
        assert!(c.is_matched(1));
        assert_eq!(c.match_index(1), 0);
        assert_eq!(c.match_length(1), 3);
    }

    #[test]
    fn uncapture_undoes() {
        let mut c = Captures::new(2);
        c.capture(1, 0, 3);
        c.uncapture(1);
        assert_eq!(c.match_count(1), 0);
    }

    #[test]
    fn balanced_transfer_cancels_after_tidy() {
        // Mirrors `^(?:(?<o>\()|(?<-o>\)))+$` against "(())": two opens
        // each closed by a later balanced match, nothing left unclosed.
        let mut c = Captures::new(1);
        c.capture(0, 0, 1);
        c.capture(0, 1, 2);
        c.transfer_capture(None, 0, 2, 3);
        c.transfer_capture(None, 0, 3, 4);
        assert_eq!(c.match_count(0), 4);
        c.tidy();
        assert_eq!(c.match_count(0), 0);
    }

    #[test]
    fn balanced_transfer_leaves_unclosed_open() {
        // "((" against the same pattern idea: two opens, only one close.
        let mut c = Captures::new(1);
        c.capture(0, 0, 1);
        c.capture(0, 1, 2);
        c.transfer_capture(None, 0, 2, 3);
        c.tidy();
        assert_eq!(c.match_count(0), 1);
        assert_eq!(c.match_index(0), 0);
        assert_eq!(c.match_length(0), 1);
    }

    #[test]
    fn transfer_populates_outer_group() {
        let mut c = Captures::new(2);
        c.capture(1, 0, 1);
        c.transfer_capture(Some(0), 1, 0, 1);
        assert!(c.is_matched(0));
        assert_eq!(c.match_index(0), 0);
        assert_eq!(c.match_length(0), 1);
    }
}
