//! Argument parser: one raw argument token → a sequence of literal and tag
//! bits.
//!
//! Tag syntax: `<base[modifier].segment[modifier]...||fallback>`.  Modifiers
//! and fallbacks are themselves arguments, so tags nest freely.  Inside a tag
//! region the characters `< > . [ ] |` are structural; use the escape codes
//! ([`unescape_tag_text`]) to write them literally.

use std::fmt;

/// One piece of an [`Argument`].
#[derive(Debug, Clone, PartialEq)]
pub enum ArgumentBit {
    Text(String),
    Tag(TagExpr),
}

/// A parsed argument: concatenation of its bits.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Argument {
    pub bits: Vec<ArgumentBit>,
    /// The token was written in quotes (never an operator or `--named`).
    pub quoted: bool,
}

/// `segment.segment...||fallback`
#[derive(Debug, Clone, PartialEq)]
pub struct TagExpr {
    pub segments: Vec<TagSegment>,
    pub fallback: Option<Box<Argument>>,
    /// Original text between `<` and `>`, for diagnostics.
    pub source: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TagSegment {
    pub key: String,
    pub modifier: Option<Argument>,
}

impl Argument {
    pub fn literal(text: impl Into<String>) -> Self {
        let text = text.into();
        Argument {
            bits: if text.is_empty() {
                Vec::new()
            } else {
                vec![ArgumentBit::Text(text)]
            },
            quoted: false,
        }
    }

    pub fn has_tags(&self) -> bool {
        self.bits.iter().any(|b| matches!(b, ArgumentBit::Tag(_)))
    }

    /// The argument's text when it contains no tags.
    pub fn literal_text(&self) -> Option<String> {
        let mut out = String::new();
        for bit in &self.bits {
            match bit {
                ArgumentBit::Text(t) => out.push_str(t),
                ArgumentBit::Tag(_) => return None,
            }
        }
        Some(out)
    }

    /// Unquoted literal equal (case-insensitively) to `word`.
    pub fn is_word(&self, word: &str) -> bool {
        !self.quoted
            && self
                .literal_text()
                .is_some_and(|t| t.eq_ignore_ascii_case(word))
    }
}

impl fmt::Display for Argument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for bit in &self.bits {
            match bit {
                ArgumentBit::Text(t) => f.write_str(t)?,
                ArgumentBit::Tag(tag) => write!(f, "<{}>", tag.source)?,
            }
        }
        Ok(())
    }
}

// ── Parsing ───────────────────────────────────────────────────────────────────

/// Parse one argument token.  Top-level literal text is kept verbatim.
pub fn parse_argument(text: &str) -> Result<Argument, String> {
    let chars: Vec<char> = text.chars().collect();
    parse_bits(&chars, false)
}

/// Does `<` followed by `next` open a tag region?
pub fn opens_tag(next: Option<char>) -> bool {
    matches!(next, Some(c) if c.is_alphanumeric() || c == '_' || c == '[' || c == '{')
}

fn parse_bits(chars: &[char], unescape: bool) -> Result<Argument, String> {
    let mut bits = Vec::new();
    let mut text = String::new();
    let mut i = 0;
    while i < chars.len() {
        if chars[i] == '<' && opens_tag(chars.get(i + 1).copied()) {
            let end = find_tag_end(chars, i)
                .ok_or_else(|| format!("unclosed tag in '{}'", collect(chars)))?;
            if !text.is_empty() {
                bits.push(ArgumentBit::Text(finish_text(&text, unescape)));
                text.clear();
            }
            bits.push(ArgumentBit::Tag(parse_tag(&chars[i + 1..end])?));
            i = end + 1;
        } else {
            text.push(chars[i]);
            i += 1;
        }
    }
    if !text.is_empty() {
        bits.push(ArgumentBit::Text(finish_text(&text, unescape)));
    }
    Ok(Argument { bits, quoted: false })
}

fn finish_text(text: &str, unescape: bool) -> String {
    if unescape {
        unescape_tag_text(text)
    } else {
        text.to_owned()
    }
}

fn collect(chars: &[char]) -> String {
    chars.iter().collect()
}

/// Index of the `>` matching the `<` at `start`.
fn find_tag_end(chars: &[char], start: usize) -> Option<usize> {
    let mut depth = 0usize;
    for i in start..chars.len() {
        match chars[i] {
            '<' if opens_tag(chars.get(i + 1).copied()) => depth += 1,
            '>' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Tracks `[...]` and nested `<...>` depth so splitting only happens at the
/// top level of a tag.
#[derive(Default)]
struct Depth {
    brackets: usize,
    tags: usize,
}

impl Depth {
    fn step(&mut self, chars: &[char], i: usize) {
        match chars[i] {
            '[' => self.brackets += 1,
            ']' => self.brackets = self.brackets.saturating_sub(1),
            '<' if opens_tag(chars.get(i + 1).copied()) => self.tags += 1,
            '>' if self.tags > 0 => self.tags -= 1,
            _ => {}
        }
    }

    fn top(&self) -> bool {
        self.brackets == 0 && self.tags == 0
    }
}

fn parse_tag(inner: &[char]) -> Result<TagExpr, String> {
    let source = collect(inner);

    // `||` fallback
    let mut depth = Depth::default();
    let mut split = None;
    let mut i = 0;
    while i < inner.len() {
        if depth.top() && inner[i] == '|' && inner.get(i + 1) == Some(&'|') {
            split = Some(i);
            break;
        }
        depth.step(inner, i);
        i += 1;
    }
    let (chain, fallback) = match split {
        Some(at) => {
            let fb = &inner[at + 2..];
            if collect(fb).trim().is_empty() {
                return Err(format!("empty fallback in '<{source}>'"));
            }
            (&inner[..at], Some(Box::new(parse_bits(fb, true)?)))
        }
        None => (inner, None),
    };

    // `.` segments
    let mut pieces = Vec::new();
    let mut depth = Depth::default();
    let mut start = 0;
    for i in 0..chain.len() {
        if depth.top() && chain[i] == '.' {
            pieces.push(&chain[start..i]);
            start = i + 1;
        }
        depth.step(chain, i);
    }
    pieces.push(&chain[start..]);

    let segments = pieces
        .into_iter()
        .enumerate()
        .map(|(pos, piece)| parse_segment(piece, pos, &source))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(TagExpr {
        segments,
        fallback,
        source,
    })
}

fn parse_segment(piece: &[char], position: usize, source: &str) -> Result<TagSegment, String> {
    let mut depth = Depth::default();
    let mut open = None;
    for i in 0..piece.len() {
        if depth.tags == 0 && piece[i] == '[' {
            open = Some(i);
            break;
        }
        depth.step(piece, i);
    }

    let (key, modifier) = match open {
        None => (collect(piece), None),
        Some(open) => {
            let mut level = 0usize;
            let mut depth = Depth::default();
            let mut close = None;
            for i in open..piece.len() {
                if depth.tags == 0 {
                    match piece[i] {
                        '[' => level += 1,
                        ']' => {
                            level -= 1;
                            if level == 0 {
                                close = Some(i);
                                break;
                            }
                        }
                        _ => {}
                    }
                }
                if piece[i] != '[' && piece[i] != ']' {
                    depth.step(piece, i);
                }
            }
            let close = close.ok_or_else(|| format!("unclosed modifier in '<{source}>'"))?;
            if close + 1 != piece.len() {
                return Err(format!(
                    "unexpected text '{}' after modifier in '<{source}>'",
                    collect(&piece[close + 1..])
                ));
            }
            (
                collect(&piece[..open]),
                Some(parse_bits(&piece[open + 1..close], true)?),
            )
        }
    };

    let key = key.trim().to_lowercase();
    let key = if key.is_empty() {
        if position == 0 { "var" } else { "get" }.to_owned()
    } else {
        key
    };
    Ok(TagSegment { key, modifier })
}

// ── Escapes ───────────────────────────────────────────────────────────────────

const ESCAPES: &[(&str, char)] = &[
    ("&amp", '&'),
    ("&lt", '<'),
    ("&gt", '>'),
    ("&dot", '.'),
    ("&lb", '['),
    ("&rb", ']'),
    ("&pipe", '|'),
    ("&sc", ';'),
    ("&nl", '\n'),
    ("&quot", '"'),
    ("&sq", '\''),
    ("&lc", '{'),
    ("&rc", '}'),
];

/// Replace characters that are structural inside tags with escape codes.
pub fn escape_tag_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ESCAPES.iter().find(|(_, c)| *c == ch) {
            Some((code, _)) => out.push_str(code),
            None => out.push(ch),
        }
    }
    out
}

/// Restore escape codes to the characters they stand for.
pub fn unescape_tag_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(at) = rest.find('&') {
        out.push_str(&rest[..at]);
        rest = &rest[at..];
        match ESCAPES.iter().find(|(code, _)| rest.starts_with(code)) {
            Some((code, ch)) => {
                out.push(*ch);
                rest = &rest[code.len()..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn tag(arg: &Argument, i: usize) -> &TagExpr {
        match &arg.bits[i] {
            ArgumentBit::Tag(t) => t,
            other => panic!("expected tag, got {other:?}"),
        }
    }

    #[test]
    fn plain_text_is_kept_verbatim() {
        let arg = parse_argument("hello&lt.world[x]").unwrap();
        assert_eq!(arg.literal_text().as_deref(), Some("hello&lt.world[x]"));
        assert!(!arg.has_tags());
    }

    #[test]
    fn less_than_without_tag_is_text() {
        let arg = parse_argument("a < b <= c").unwrap();
        assert_eq!(arg.literal_text().as_deref(), Some("a < b <= c"));
    }

    #[test]
    fn mixed_bits() {
        let arg = parse_argument("hp=<player.hp>!").unwrap();
        assert_eq!(arg.bits.len(), 3);
        let t = tag(&arg, 1);
        assert_eq!(t.segments.len(), 2);
        assert_eq!(t.segments[0].key, "player");
        assert_eq!(t.segments[1].key, "hp");
    }

    #[test]
    fn modifiers_and_nested_tags() {
        let arg = parse_argument("<text[<x.add[1]>].to_upper>").unwrap();
        let t = tag(&arg, 0);
        assert_eq!(t.segments.len(), 2);
        let m = t.segments[0].modifier.as_ref().unwrap();
        let inner = tag(m, 0);
        assert_eq!(inner.segments[1].key, "add");
    }

    #[test]
    fn dots_inside_modifier_do_not_split() {
        let arg = parse_argument("<number[1.5].add[2.25]>").unwrap();
        let t = tag(&arg, 0);
        assert_eq!(t.segments.len(), 2);
        assert_eq!(
            t.segments[0].modifier.as_ref().unwrap().literal_text().as_deref(),
            Some("1.5")
        );
    }

    #[test]
    fn empty_keys_default() {
        let arg = parse_argument("<[name].[2]>").unwrap();
        let t = tag(&arg, 0);
        assert_eq!(t.segments[0].key, "var");
        assert_eq!(t.segments[1].key, "get");
    }

    #[test]
    fn fallback_parsed() {
        let arg = parse_argument("<cvar[name]||<text[anon]>>").unwrap();
        let t = tag(&arg, 0);
        let fb = t.fallback.as_ref().unwrap();
        assert!(fb.has_tags());
    }

    #[test]
    fn pipes_in_modifier_are_not_fallback() {
        let arg = parse_argument("<list[a|b||c]>").unwrap();
        let t = tag(&arg, 0);
        assert!(t.fallback.is_none());
    }

    #[test]
    fn modifier_escapes_restored() {
        let arg = parse_argument("<text[a&dotb&lt&gt&amp]>").unwrap();
        let t = tag(&arg, 0);
        assert_eq!(
            t.segments[0].modifier.as_ref().unwrap().literal_text().as_deref(),
            Some("a.b<>&")
        );
    }

    #[test]
    fn keys_are_lowercased() {
        let arg = parse_argument("<Text[X].To_Upper>").unwrap();
        let t = tag(&arg, 0);
        assert_eq!(t.segments[0].key, "text");
        assert_eq!(t.segments[1].key, "to_upper");
    }

    #[test]
    fn errors() {
        assert!(parse_argument("<text[a]").is_err());
        assert!(parse_argument("<text[a>").is_err());
        assert!(parse_argument("<text[a]b>").is_err());
        assert!(parse_argument("<text[a]||>").is_err());
    }

    #[test]
    fn display_round_trips_source() {
        let src = "x<text[a].length>y";
        assert_eq!(parse_argument(src).unwrap().to_string(), src);
    }

    #[test]
    fn escape_then_unescape() {
        let raw = "a<b>.c[d]|e;f\n\"g'h{i}&";
        let escaped = escape_tag_text(raw);
        assert!(!escaped.contains('<'));
        assert_eq!(unescape_tag_text(&escaped), raw);
        assert_eq!(unescape_tag_text("a&b"), "a&b");
    }
}
