// Copyright 2014-2015 The Rust Project Developers. See the COPYRIGHT
// file at the top-level directory of this distribution and at
// http://rust-lang.org/COPYRIGHT.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The replacement mini-language: `$1`, `${name}`, `$&`, `` $` ``, `$'`,
//! `$+`, `$_`, `$$`, parsed once into a rule list and then replayed for
//! every match a scan produces.

use crate::captures::Captures;
use crate::program::Program;

/// Number of sentinel rule values, below the non-negative literal-table
/// indices: `LeftPortion`, `RightPortion`, `LastGroup`, `WholeString`.
const SPECIALS: i32 = 4;

const LEFT_PORTION: i32 = -1;
const RIGHT_PORTION: i32 = -2;
const LAST_GROUP: i32 = -3;
const WHOLE_STRING: i32 = -4;

fn encode_group(group: u32) -> i32 {
    -SPECIALS - 1 - group as i32
}

fn decode_group(rule: i32) -> u32 {
    (-SPECIALS - 1 - rule) as u32
}

/// A parsed replacement template: literal runs interned into a table,
/// referenced (alongside group/sentinel rules) from a flat rule list in
/// emission order.
#[derive(Clone, Debug)]
pub struct Replacement {
    literals: Vec<String>,
    rules: Vec<i32>,
    right_to_left: bool,
}

impl Replacement {
    /// Parse `template` against `prog`'s capture map so named-group
    /// references (`${name}`) resolve at parse time rather than per
    /// match.
    pub fn parse(template: &str, prog: &Program) -> Replacement {
        let chars: Vec<char> = template.chars().collect();
        let mut literals = Vec::new();
        let mut rules = Vec::new();
        let mut literal = String::new();
        let mut i = 0usize;

        macro_rules! flush_literal {
            () => {
                if !literal.is_empty() {
                    literals.push(std::mem::take(&mut literal));
                    rules.push((literals.len() - 1) as i32);
                }
            };
        }

        while i < chars.len() {
            let c = chars[i];
            if c != '$' || i + 1 >= chars.len() {
                literal.push(c);
                i += 1;
                continue;
            }
            let next = chars[i + 1];
            match next {
                '$' => {
                    literal.push('$');
                    i += 2;
                }
                '&' => {
                    flush_literal!();
                    rules.push(encode_group(0));
                    i += 2;
                }
                '`' => {
                    flush_literal!();
                    rules.push(LEFT_PORTION);
                    i += 2;
                }
                '\'' => {
                    flush_literal!();
                    rules.push(RIGHT_PORTION);
                    i += 2;
                }
                '+' => {
                    flush_literal!();
                    rules.push(LAST_GROUP);
                    i += 2;
                }
                '_' => {
                    flush_literal!();
                    rules.push(WHOLE_STRING);
                    i += 2;
                }
                '{' => {
                    if let Some((group, consumed)) = parse_braced(&chars[i + 2..], prog) {
                        flush_literal!();
                        rules.push(encode_group(group));
                        i += 2 + consumed;
                    } else {
                        literal.push('$');
                        i += 1;
                    }
                }
                d if d.is_ascii_digit() => {
                    let (group, consumed) = parse_digits(&chars[i + 1..], prog);
                    flush_literal!();
                    rules.push(encode_group(group));
                    i += 1 + consumed;
                }
                _ => {
                    literal.push('$');
                    i += 1;
                }
            }
        }
        flush_literal!();

        Replacement { literals, rules, right_to_left: prog.right_to_left }
    }

    /// Render this template for a single match: `text` is the entire
    /// scanned input, `start`/`end` the match's span, `captures` its
    /// group bookkeeping, `caps_size` the dense capture-slot count.
    pub fn render(&self, text: &[char], start: usize, end: usize, captures: &Captures) -> String {
        let mut out = String::new();
        let emit = |piece: &str, out: &mut String| {
            if self.right_to_left {
                out.extend(piece.chars().rev());
            } else {
                out.push_str(piece);
            }
        };

        let rule_order: Box<dyn Iterator<Item = &i32>> = if self.right_to_left {
            Box::new(self.rules.iter().rev())
        } else {
            Box::new(self.rules.iter())
        };

        for &rule in rule_order {
            if rule >= 0 {
                emit(&self.literals[rule as usize], &mut out);
                continue;
            }
            match rule {
                LEFT_PORTION => emit(&chars_to_string(&text[..start]), &mut out),
                RIGHT_PORTION => emit(&chars_to_string(&text[end..]), &mut out),
                WHOLE_STRING => emit(&chars_to_string(text), &mut out),
                LAST_GROUP => emit(&last_group_text(text, captures), &mut out),
                _ => {
                    let g = decode_group(rule) as usize;
                    if captures.is_matched(g) {
                        let s = captures.match_index(g) as usize;
                        let l = captures.match_length(g) as usize;
                        emit(&chars_to_string(&text[s..s + l]), &mut out);
                    }
                }
            }
        }

        if self.right_to_left {
            out.chars().rev().collect()
        } else {
            out
        }
    }
}

fn chars_to_string(cs: &[char]) -> String {
    cs.iter().collect()
}

fn last_group_text(text: &[char], captures: &Captures) -> String {
    for g in (1..captures.cap_size()).rev() {
        if captures.is_matched(g) {
            let s = captures.match_index(g) as usize;
            let l = captures.match_length(g) as usize;
            return chars_to_string(&text[s..s + l]);
        }
    }
    String::new()
}

/// Parse the longest run of ASCII digits at the front of `rest` that
/// names a declared group, backing off one digit at a time (matching
/// the `$1` vs. `$10` ambiguity resolution of taking the longest valid
/// group number). Falls back to group 0 (an empty insertion) if no
/// prefix names a real group, still consuming exactly one digit.
fn parse_digits(rest: &[char], prog: &Program) -> (u32, usize) {
    let mut len = 0;
    while len < rest.len() && rest[len].is_ascii_digit() && len < 9 {
        len += 1;
    }
    while len > 0 {
        let s: String = rest[..len].iter().collect();
        if let Ok(n) = s.parse::<u32>() {
            if prog.caps.slot(n).is_some() {
                return (n, len);
            }
        }
        len -= 1;
    }
    (0, 1)
}

/// Parse a `{name}` or `{number}` up to the closing brace. Returns the
/// group number and how many characters (including the trailing `}`)
/// were consumed, or `None` if there's no closing brace or the name
/// doesn't resolve to a declared group.
fn parse_braced(rest: &[char], prog: &Program) -> Option<(u32, usize)> {
    let close = rest.iter().position(|&c| c == '}')?;
    let body: String = rest[..close].iter().collect();
    let group = if let Ok(n) = body.parse::<u32>() {
        if prog.caps.slot(n).is_some() {
            Some(n)
        } else {
            None
        }
    } else {
        prog.caps.group_for_name(&body)
    }?;
    Some((group, close + 1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::compile;
    use crate::options::Options;
    use crate::parse::parse;

    fn program(pattern: &str) -> Program {
        let parsed = parse(pattern, Options::new()).unwrap();
        compile(pattern, &parsed, Options::new()).unwrap()
    }

    #[test]
    fn whole_match_round_trips() {
        let prog = program(r"(\w+)");
        let text: Vec<char> = "hello".chars().collect();
        let mut caps = Captures::new(prog.num_captures());
        caps.capture(0, 0, 5);
        caps.capture(1, 0, 5);
        let r = Replacement::parse("$0", &prog);
        assert_eq!(r.render(&text, 0, 5, &caps), "hello");
    }

    #[test]
    fn group_and_literal_mix() {
        let prog = program(r"(\w+)@(\w+)");
        let text: Vec<char> = "user@host".chars().collect();
        let mut caps = Captures::new(prog.num_captures());
        caps.capture(0, 0, 9);
        caps.capture(1, 0, 4);
        caps.capture(2, 5, 9);
        let r = Replacement::parse("$2 at $1", &prog);
        assert_eq!(r.render(&text, 0, 9, &caps), "host at user");
    }

    #[test]
    fn dollar_sign_escapes() {
        let prog = program(r"x");
        let text: Vec<char> = "x".chars().collect();
        let caps = Captures::new(prog.num_captures());
        let r = Replacement::parse("$$5", &prog);
        assert_eq!(r.render(&text, 0, 1, &caps), "$5");
    }

    #[test]
    fn named_group_braced() {
        let prog = program(r"(?<word>\w+)");
        let text: Vec<char> = "hi".chars().collect();
        let mut caps = Captures::new(prog.num_captures());
        caps.capture(0, 0, 2);
        caps.capture(1, 0, 2);
        let r = Replacement::parse("${word}!", &prog);
        assert_eq!(r.render(&text, 0, 2, &caps), "hi!");
    }

    #[test]
    fn left_and_right_portion() {
        let prog = program(r"b");
        let text: Vec<char> = "abc".chars().collect();
        let caps = Captures::new(prog.num_captures());
        let r = Replacement::parse("[$`|$']", &prog);
        assert_eq!(r.render(&text, 1, 2, &caps), "[a|c]");
    }
}
