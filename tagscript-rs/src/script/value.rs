//! Runtime value type for tag evaluation.
//!
//! Every value has a string form (its [`Display`](fmt::Display)), which is
//! what multi-bit arguments concatenate and what `echo` prints.  The typed
//! variants let handlers skip re-parsing numbers and collections.

use std::collections::BTreeMap;
use std::fmt;

/// A runtime tag value.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum TagValue {
    #[default]
    Null,
    Text(String),
    Integer(i64),
    Number(f64),
    Boolean(bool),
    List(Vec<TagValue>),
    Map(BTreeMap<String, TagValue>),
}

impl fmt::Display for TagValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TagValue::Null => write!(f, "null"),
            TagValue::Text(s) => write!(f, "{s}"),
            TagValue::Integer(n) => write!(f, "{n}"),
            TagValue::Number(x) => {
                if x.fract() == 0.0 && x.abs() < 1e15 {
                    write!(f, "{:.1}", x)
                } else {
                    write!(f, "{x}")
                }
            }
            TagValue::Boolean(b) => write!(f, "{b}"),
            TagValue::List(items) => {
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str("|")?;
                    }
                    write!(f, "{item}")?;
                }
                Ok(())
            }
            TagValue::Map(map) => {
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        f.write_str("|")?;
                    }
                    write!(f, "{k}:{v}")?;
                }
                Ok(())
            }
        }
    }
}

impl TagValue {
    pub fn text(s: impl Into<String>) -> Self {
        TagValue::Text(s.into())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, TagValue::Null)
    }

    /// Name of the tag type this value naturally belongs to.
    pub fn type_name(&self) -> &'static str {
        match self {
            TagValue::Null => "null",
            TagValue::Text(_) => "text",
            TagValue::Integer(_) => "integer",
            TagValue::Number(_) => "number",
            TagValue::Boolean(_) => "boolean",
            TagValue::List(_) => "list",
            TagValue::Map(_) => "map",
        }
    }

    /// Truth value for conditions.  `None` for values that are neither
    /// boolean-like nor numeric (e.g. arbitrary text, collections).
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            TagValue::Null => Some(false),
            TagValue::Boolean(b) => Some(*b),
            TagValue::Integer(n) => Some(*n != 0),
            TagValue::Number(x) => Some(*x != 0.0),
            TagValue::Text(s) => parse_bool(s),
            TagValue::List(_) | TagValue::Map(_) => None,
        }
    }

    /// Strict integer view: integers, whole numbers and integer text.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            TagValue::Integer(n) => Some(*n),
            TagValue::Number(x) if x.fract() == 0.0 && x.abs() < 9.0e15 => Some(*x as i64),
            TagValue::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Numeric view: integers, finite numbers and numeric text.  `nan` and
    /// `inf` are not numbers here.
    pub fn as_number(&self) -> Option<f64> {
        let x = match self {
            TagValue::Integer(n) => *n as f64,
            TagValue::Number(x) => *x,
            TagValue::Text(s) => s.trim().parse().ok()?,
            _ => return None,
        };
        x.is_finite().then_some(x)
    }

    /// List view: lists as-is, text split on `|` (empty text is an empty list).
    pub fn as_list(&self) -> Option<Vec<TagValue>> {
        match self {
            TagValue::List(items) => Some(items.clone()),
            TagValue::Text(s) if s.is_empty() => Some(Vec::new()),
            TagValue::Text(s) => Some(s.split('|').map(TagValue::text).collect()),
            _ => None,
        }
    }

    /// Map view: maps as-is, text of the form `k:v|k2:v2`.
    pub fn as_map(&self) -> Option<BTreeMap<String, TagValue>> {
        match self {
            TagValue::Map(map) => Some(map.clone()),
            TagValue::Text(s) if s.is_empty() => Some(BTreeMap::new()),
            TagValue::Text(s) => {
                let mut map = BTreeMap::new();
                for pair in s.split('|') {
                    let (k, v) = pair.split_once(':')?;
                    map.insert(k.trim().to_lowercase(), TagValue::text(v));
                }
                Some(map)
            }
            _ => None,
        }
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    if s.eq_ignore_ascii_case("true") {
        Some(true)
    } else if s.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}

impl From<i64> for TagValue {
    fn from(n: i64) -> Self {
        TagValue::Integer(n)
    }
}

impl From<f64> for TagValue {
    fn from(x: f64) -> Self {
        TagValue::Number(x)
    }
}

impl From<bool> for TagValue {
    fn from(b: bool) -> Self {
        TagValue::Boolean(b)
    }
}

impl From<String> for TagValue {
    fn from(s: String) -> Self {
        TagValue::Text(s)
    }
}

impl From<&str> for TagValue {
    fn from(s: &str) -> Self {
        TagValue::Text(s.to_owned())
    }
}

impl From<Vec<TagValue>> for TagValue {
    fn from(items: Vec<TagValue>) -> Self {
        TagValue::List(items)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
