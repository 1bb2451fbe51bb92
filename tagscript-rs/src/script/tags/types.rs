//! Standard tag types and their segment handlers.
//!
//! ```text
//! object ─┬─ text ─┬─ number ── integer
//!         │        └─ boolean
//!         ├─ list
//!         ├─ map
//!         └─ null
//! dynamic (resolved at runtime)
//! ```

use std::collections::BTreeMap;

use regex::Regex;

use super::{coerce_error, HandlerCall, ModifierUse, SpecialSite, TagRegistry, TagType, TypeId};
use crate::error::TagError;
use crate::script::args::{escape_tag_text, unescape_tag_text};
use crate::script::value::TagValue;

const NO_MOD: ModifierUse = ModifierUse::None;
const TEXT_MOD: ModifierUse = ModifierUse::Required("text");
const NUMBER_MOD: ModifierUse = ModifierUse::Required("number");
const INTEGER_MOD: ModifierUse = ModifierUse::Required("integer");
const BOOLEAN_MOD: ModifierUse = ModifierUse::Required("boolean");

/// Longest text a handler may build, in bytes.
const MAX_TEXT_LEN: usize = 1 << 24;

pub fn register(registry: &mut TagRegistry) {
    registry.register_type(object());
    registry.register_type(TagType::new("null", Some("object"), coerce_null));
    registry.register_type(text());
    registry.register_type(number());
    registry.register_type(integer());
    registry.register_type(boolean());
    registry.register_type(list());
    registry.register_type(map());
}

// ── Coercion ──────────────────────────────────────────────────────────────────

pub fn coerce_null(v: &TagValue) -> Option<TagValue> {
    v.is_null().then_some(TagValue::Null)
}

pub fn coerce_text(v: &TagValue) -> Option<TagValue> {
    match v {
        TagValue::Text(_) => Some(v.clone()),
        other => Some(TagValue::Text(other.to_string())),
    }
}

fn coerce_number(v: &TagValue) -> Option<TagValue> {
    match v {
        TagValue::Integer(_) | TagValue::Number(_) => Some(v.clone()),
        TagValue::Text(_) => v.as_number().map(TagValue::Number),
        _ => None,
    }
}

fn coerce_integer(v: &TagValue) -> Option<TagValue> {
    match v {
        TagValue::Boolean(_) | TagValue::Null => None,
        other => other.as_integer().map(TagValue::Integer),
    }
}

fn coerce_boolean(v: &TagValue) -> Option<TagValue> {
    match v {
        TagValue::Boolean(_) => Some(v.clone()),
        TagValue::Text(_) => v.as_bool().map(TagValue::Boolean),
        _ => None,
    }
}

fn coerce_list(v: &TagValue) -> Option<TagValue> {
    match v {
        TagValue::Map(_) | TagValue::Null => None,
        TagValue::Integer(_) | TagValue::Number(_) | TagValue::Boolean(_) => {
            Some(TagValue::List(vec![v.clone()]))
        }
        other => other.as_list().map(TagValue::List),
    }
}

fn coerce_map(v: &TagValue) -> Option<TagValue> {
    v.as_map().map(TagValue::Map)
}

// ── object ────────────────────────────────────────────────────────────────────

/// `as[type]` returns the type named by its (literal) modifier.
fn as_result_type(site: &SpecialSite<'_>) -> Result<TypeId, String> {
    let name = site
        .modifier
        .ok_or_else(|| "'as' needs a literal type name".to_owned())?;
    site.registry
        .id(name.trim())
        .ok_or_else(|| format!("unknown type '{name}'"))
}

fn object() -> TagType {
    TagType::new("object", None, |v| Some(v.clone()))
        .handler("type", NO_MOD, "text", |c| {
            Ok(TagValue::text(c.registry.name(c.registry.runtime_type(c.value))))
        })
        .handler("to_text", NO_MOD, "text", |c| Ok(TagValue::Text(c.text())))
        .handler("is_null", NO_MOD, "boolean", |c| Ok(TagValue::Boolean(c.value.is_null())))
        .special("as", TEXT_MOD, as_result_type, |c| {
            let name = c.modifier_text()?;
            let ty = c
                .registry
                .id(name.trim())
                .ok_or_else(|| TagError::Handler(format!("unknown type '{name}'")))?;
            c.registry.coerce_to(ty, c.value.clone())
        })
}

// ── text ──────────────────────────────────────────────────────────────────────

fn char_index_of(haystack: &str, needle: &str) -> i64 {
    match haystack.find(needle) {
        Some(byte) => haystack[..byte].chars().count() as i64 + 1,
        None => -1,
    }
}

fn text() -> TagType {
    TagType::new("text", Some("object"), coerce_text)
        .handler("length", NO_MOD, "integer", |c| {
            Ok(TagValue::Integer(c.text().chars().count() as i64))
        })
        .handler("to_upper", NO_MOD, "text", |c| Ok(TagValue::Text(c.text().to_uppercase())))
        .handler("to_lower", NO_MOD, "text", |c| Ok(TagValue::Text(c.text().to_lowercase())))
        .handler("trim", NO_MOD, "text", |c| Ok(TagValue::text(c.text().trim())))
        .handler("contains", TEXT_MOD, "boolean", |c| {
            Ok(TagValue::Boolean(c.text().contains(&c.modifier_text()?)))
        })
        .handler("starts_with", TEXT_MOD, "boolean", |c| {
            Ok(TagValue::Boolean(c.text().starts_with(&c.modifier_text()?)))
        })
        .handler("ends_with", TEXT_MOD, "boolean", |c| {
            Ok(TagValue::Boolean(c.text().ends_with(&c.modifier_text()?)))
        })
        .handler("equals", TEXT_MOD, "boolean", |c| {
            Ok(TagValue::Boolean(c.text() == c.modifier_text()?))
        })
        .handler("index_of", TEXT_MOD, "integer", |c| {
            Ok(TagValue::Integer(char_index_of(&c.text(), &c.modifier_text()?)))
        })
        .handler("get", INTEGER_MOD, "text", |c| {
            let n = c.modifier_integer()?;
            if n < 1 {
                return Ok(TagValue::Null);
            }
            Ok(c.text()
                .chars()
                .nth(n as usize - 1)
                .map_or(TagValue::Null, |ch| TagValue::Text(ch.to_string())))
        })
        .handler("split", TEXT_MOD, "list", |c| {
            let sep = c.modifier_text()?;
            let text = c.text();
            if sep.is_empty() {
                return Ok(TagValue::List(
                    text.chars().map(|ch| TagValue::Text(ch.to_string())).collect(),
                ));
            }
            Ok(TagValue::List(text.split(sep.as_str()).map(TagValue::text).collect()))
        })
        .handler("matches", TEXT_MOD, "boolean", |c| {
            let pattern = c.modifier_text()?;
            let re = Regex::new(&pattern)
                .map_err(|e| TagError::Handler(format!("bad pattern '{pattern}': {e}")))?;
            Ok(TagValue::Boolean(re.is_match(&c.text())))
        })
        .handler("repeat", INTEGER_MOD, "text", |c| {
            let n = c.modifier_integer()?;
            if n < 0 {
                return Err(TagError::Handler(format!("cannot repeat {n} times")));
            }
            let text = c.text();
            let fits = usize::try_from(n)
                .ok()
                .and_then(|n| text.len().checked_mul(n))
                .is_some_and(|len| len <= MAX_TEXT_LEN);
            if !fits {
                return Err(TagError::Handler(format!("repeating {n} times is too long")));
            }
            Ok(TagValue::Text(text.repeat(n as usize)))
        })
        .handler("escaped", NO_MOD, "text", |c| Ok(TagValue::Text(escape_tag_text(&c.text()))))
        .handler("unescaped", NO_MOD, "text", |c| {
            Ok(TagValue::Text(unescape_tag_text(&c.text())))
        })
        .handler("as_number", NO_MOD, "number", |c| {
            Ok(c.value.as_number().map_or(TagValue::Null, TagValue::Number))
        })
        .handler("as_integer", NO_MOD, "integer", |c| {
            Ok(c.value.as_integer().map_or(TagValue::Null, TagValue::Integer))
        })
        .handler("as_boolean", NO_MOD, "boolean", |c| {
            Ok(c.value.as_bool().map_or(TagValue::Null, TagValue::Boolean))
        })
}

// ── number / integer ──────────────────────────────────────────────────────────

fn finite(x: f64) -> Result<TagValue, TagError> {
    if x.is_finite() {
        Ok(TagValue::Number(x))
    } else {
        Err(TagError::Handler(format!("arithmetic result {x} is not finite")))
    }
}

fn whole(x: f64) -> Result<TagValue, TagError> {
    if x.is_finite() && x.abs() < 9.0e15 {
        Ok(TagValue::Integer(x as i64))
    } else {
        Err(TagError::Handler(format!("{x} is out of integer range")))
    }
}

fn number() -> TagType {
    TagType::new("number", Some("text"), coerce_number)
        .handler("add", NUMBER_MOD, "number", |c| finite(c.number()? + c.modifier_number()?))
        .handler("subtract", NUMBER_MOD, "number", |c| {
            finite(c.number()? - c.modifier_number()?)
        })
        .handler("multiply", NUMBER_MOD, "number", |c| {
            finite(c.number()? * c.modifier_number()?)
        })
        .handler("divide", NUMBER_MOD, "number", |c| {
            let d = c.modifier_number()?;
            if d == 0.0 {
                return Err(TagError::Handler("division by zero".into()));
            }
            finite(c.number()? / d)
        })
        .handler("is_greater_than", NUMBER_MOD, "boolean", |c| {
            Ok(TagValue::Boolean(c.number()? > c.modifier_number()?))
        })
        .handler("is_less_than", NUMBER_MOD, "boolean", |c| {
            Ok(TagValue::Boolean(c.number()? < c.modifier_number()?))
        })
        .handler("equals", NUMBER_MOD, "boolean", |c| {
            Ok(TagValue::Boolean(c.number()? == c.modifier_number()?))
        })
        .handler("round", NO_MOD, "integer", |c| whole(c.number()?.round()))
        .handler("floor", NO_MOD, "integer", |c| whole(c.number()?.floor()))
        .handler("ceiling", NO_MOD, "integer", |c| whole(c.number()?.ceil()))
        .handler("absolute_value", NO_MOD, "number", |c| finite(c.number()?.abs()))
}

fn checked(result: Option<i64>, op: &str) -> Result<TagValue, TagError> {
    result
        .map(TagValue::Integer)
        .ok_or_else(|| TagError::Handler(format!("integer {op} overflow or division by zero")))
}

fn integer() -> TagType {
    TagType::new("integer", Some("number"), coerce_integer)
        .handler("add", INTEGER_MOD, "integer", |c| {
            checked(c.integer()?.checked_add(c.modifier_integer()?), "add")
        })
        .handler("subtract", INTEGER_MOD, "integer", |c| {
            checked(c.integer()?.checked_sub(c.modifier_integer()?), "subtract")
        })
        .handler("multiply", INTEGER_MOD, "integer", |c| {
            checked(c.integer()?.checked_mul(c.modifier_integer()?), "multiply")
        })
        .handler("divide", INTEGER_MOD, "integer", |c| {
            checked(c.integer()?.checked_div(c.modifier_integer()?), "divide")
        })
        .handler("modulo", INTEGER_MOD, "integer", |c| {
            checked(c.integer()?.checked_rem_euclid(c.modifier_integer()?), "modulo")
        })
        .handler("to_number", NO_MOD, "number", |c| Ok(TagValue::Number(c.number()?)))
}

// ── boolean ───────────────────────────────────────────────────────────────────

fn truth(c: &HandlerCall<'_>) -> Result<bool, TagError> {
    c.value.as_bool().ok_or_else(|| coerce_error(c.value, "boolean"))
}

fn boolean() -> TagType {
    TagType::new("boolean", Some("text"), coerce_boolean)
        .handler("not", NO_MOD, "boolean", |c| Ok(TagValue::Boolean(!truth(c)?)))
        .handler("and", BOOLEAN_MOD, "boolean", |c| {
            Ok(TagValue::Boolean(truth(c)? && c.modifier_bool()?))
        })
        .handler("or", BOOLEAN_MOD, "boolean", |c| {
            Ok(TagValue::Boolean(truth(c)? || c.modifier_bool()?))
        })
        .handler("xor", BOOLEAN_MOD, "boolean", |c| {
            Ok(TagValue::Boolean(truth(c)? ^ c.modifier_bool()?))
        })
}

// ── list ──────────────────────────────────────────────────────────────────────

fn items(c: &HandlerCall<'_>) -> Result<Vec<TagValue>, TagError> {
    c.value.as_list().ok_or_else(|| coerce_error(c.value, "list"))
}

fn list() -> TagType {
    TagType::new("list", Some("object"), coerce_list)
        .handler("size", NO_MOD, "integer", |c| Ok(TagValue::Integer(items(c)?.len() as i64)))
        .handler("is_empty", NO_MOD, "boolean", |c| Ok(TagValue::Boolean(items(c)?.is_empty())))
        .handler("first", NO_MOD, "dynamic", |c| {
            Ok(items(c)?.into_iter().next().unwrap_or_default())
        })
        .handler("last", NO_MOD, "dynamic", |c| Ok(items(c)?.pop().unwrap_or_default()))
        .handler("get", INTEGER_MOD, "dynamic", |c| {
            let n = c.modifier_integer()?;
            if n < 1 {
                return Ok(TagValue::Null);
            }
            Ok(items(c)?.into_iter().nth(n as usize - 1).unwrap_or_default())
        })
        .handler("contains", TEXT_MOD, "boolean", |c| {
            let needle = c.modifier_text()?;
            Ok(TagValue::Boolean(items(c)?.iter().any(|v| v.to_string() == needle)))
        })
        .handler("join", TEXT_MOD, "text", |c| {
            let sep = c.modifier_text()?;
            let parts: Vec<String> = items(c)?.iter().map(ToString::to_string).collect();
            Ok(TagValue::Text(parts.join(&sep)))
        })
        .handler("reversed", NO_MOD, "list", |c| {
            let mut list = items(c)?;
            list.reverse();
            Ok(TagValue::List(list))
        })
        .handler("include", TEXT_MOD, "list", |c| {
            let mut list = items(c)?;
            list.push(c.modifier()?.clone());
            Ok(TagValue::List(list))
        })
}

// ── map ───────────────────────────────────────────────────────────────────────

fn entries(c: &HandlerCall<'_>) -> Result<BTreeMap<String, TagValue>, TagError> {
    c.value.as_map().ok_or_else(|| coerce_error(c.value, "map"))
}

fn map() -> TagType {
    TagType::new("map", Some("object"), coerce_map)
        .handler("size", NO_MOD, "integer", |c| Ok(TagValue::Integer(entries(c)?.len() as i64)))
        .handler("keys", NO_MOD, "list", |c| {
            Ok(TagValue::List(entries(c)?.into_keys().map(TagValue::Text).collect()))
        })
        .handler("values", NO_MOD, "list", |c| {
            Ok(TagValue::List(entries(c)?.into_values().collect()))
        })
        .handler("contains", TEXT_MOD, "boolean", |c| {
            let key = c.modifier_text()?.to_lowercase();
            Ok(TagValue::Boolean(entries(c)?.contains_key(&key)))
        })
        .handler("get", TEXT_MOD, "dynamic", |c| {
            let key = c.modifier_text()?.to_lowercase();
            Ok(entries(c)?.remove(&key).unwrap_or_default())
        })
        .handler("_", NO_MOD, "dynamic", |c| {
            Ok(entries(c)?.remove(&c.key.to_lowercase()).unwrap_or_default())
        })
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn call(registry: &TagRegistry, value: TagValue, key: &str, modifier: Option<TagValue>) -> Result<TagValue, TagError> {
        let ty = registry.runtime_type(&value);
        let (_, handler) = registry.find_handler(ty, key).expect("handler");
        let modifier = match (modifier, handler.modifier.type_name()) {
            (Some(m), Some(t)) => Some(registry.coerce_to(registry.id(t).unwrap(), m)?),
            (m, _) => m,
        };
        (handler.func)(&HandlerCall {
            value: &value,
            modifier: modifier.as_ref(),
            key,
            registry,
        })
    }

    #[test]
    fn text_handlers() {
        let r = TagRegistry::standard();
        let hello = TagValue::text("Hello");
        assert_eq!(call(&r, hello.clone(), "length", None), Ok(TagValue::Integer(5)));
        assert_eq!(call(&r, hello.clone(), "to_upper", None), Ok(TagValue::text("HELLO")));
        assert_eq!(call(&r, hello.clone(), "get", Some("2".into())), Ok(TagValue::text("e")));
        assert_eq!(call(&r, hello.clone(), "get", Some("9".into())), Ok(TagValue::Null));
        assert_eq!(call(&r, hello.clone(), "index_of", Some("llo".into())), Ok(TagValue::Integer(3)));
        assert_eq!(call(&r, hello.clone(), "index_of", Some("z".into())), Ok(TagValue::Integer(-1)));
        assert_eq!(call(&r, hello, "matches", Some("^H.*o$".into())), Ok(TagValue::Boolean(true)));
    }

    #[test]
    fn text_get_bounds() {
        let r = TagRegistry::standard();
        let hello = TagValue::text("Hello");
        assert_eq!(call(&r, hello.clone(), "get", Some("0".into())), Ok(TagValue::Null));
        assert_eq!(call(&r, hello.clone(), "get", Some("-1".into())), Ok(TagValue::Null));
        assert_eq!(call(&r, hello.clone(), "get", Some("5".into())), Ok(TagValue::text("o")));
        assert_eq!(call(&r, hello.clone(), "get", Some("6".into())), Ok(TagValue::Null));
        assert_eq!(call(&r, hello, "get", Some(i64::MAX.into())), Ok(TagValue::Null));
    }

    #[test]
    fn repeat_is_bounded() {
        let r = TagRegistry::standard();
        let xy = TagValue::text("xy");
        assert_eq!(call(&r, xy.clone(), "repeat", Some("3".into())), Ok(TagValue::text("xyxyxy")));
        assert_eq!(call(&r, xy.clone(), "repeat", Some("0".into())), Ok(TagValue::text("")));
        assert!(call(&r, xy.clone(), "repeat", Some("-1".into())).is_err());
        assert!(matches!(
            call(&r, xy.clone(), "repeat", Some(i64::MAX.into())),
            Err(TagError::Handler(_))
        ));
        assert!(call(&r, xy, "repeat", Some(((MAX_TEXT_LEN / 2 + 1) as i64).into())).is_err());
        assert_eq!(call(&r, TagValue::text(""), "repeat", Some(i64::MAX.into())), Ok(TagValue::text("")));
    }

    #[test]
    fn bad_regex_is_handler_error() {
        let r = TagRegistry::standard();
        assert!(call(&r, TagValue::text("x"), "matches", Some("(".into())).is_err());
    }

    #[test]
    fn split_and_join() {
        let r = TagRegistry::standard();
        let parts = call(&r, TagValue::text("a,b,c"), "split", Some(",".into())).unwrap();
        assert_eq!(parts, TagValue::List(vec!["a".into(), "b".into(), "c".into()]));
        assert_eq!(call(&r, parts, "join", Some("-".into())), Ok(TagValue::text("a-b-c")));
    }

    #[test]
    fn integer_arithmetic_and_overflow() {
        let r = TagRegistry::standard();
        assert_eq!(call(&r, TagValue::Integer(7), "modulo", Some("3".into())), Ok(TagValue::Integer(1)));
        assert_eq!(call(&r, TagValue::Integer(-7), "modulo", Some("3".into())), Ok(TagValue::Integer(2)));
        assert!(call(&r, TagValue::Integer(i64::MAX), "add", Some("1".into())).is_err());
        assert!(call(&r, TagValue::Integer(i64::MIN), "add", Some("-1".into())).is_err());
        assert!(call(&r, TagValue::Integer(i64::MAX), "multiply", Some("2".into())).is_err());
        assert!(call(&r, TagValue::Integer(i64::MIN), "multiply", Some("-1".into())).is_err());
        assert!(call(&r, TagValue::Integer(1), "divide", Some("0".into())).is_err());
    }

    #[test]
    fn integer_modifier_rejects_fraction() {
        let r = TagRegistry::standard();
        let err = call(&r, TagValue::Integer(1), "add", Some("1.5".into())).unwrap_err();
        assert!(matches!(err, TagError::Coerce { .. }));
    }

    #[test]
    fn number_inherited_by_integer() {
        let r = TagRegistry::standard();
        assert_eq!(call(&r, TagValue::Integer(3), "is_greater_than", Some("2.5".into())), Ok(TagValue::Boolean(true)));
        assert_eq!(call(&r, TagValue::Number(2.5), "round", None), Ok(TagValue::Integer(3)));
        assert_eq!(call(&r, TagValue::Number(1.0), "divide", Some("4".into())), Ok(TagValue::Number(0.25)));
    }

    #[test]
    fn boolean_handlers() {
        let r = TagRegistry::standard();
        assert_eq!(call(&r, TagValue::Boolean(true), "not", None), Ok(TagValue::Boolean(false)));
        assert_eq!(call(&r, TagValue::Boolean(true), "xor", Some("true".into())), Ok(TagValue::Boolean(false)));
        assert!(call(&r, TagValue::Boolean(true), "and", Some("yes".into())).is_err());
    }

    #[test]
    fn list_handlers() {
        let r = TagRegistry::standard();
        let list = TagValue::List(vec!["x".into(), "y".into()]);
        assert_eq!(call(&r, list.clone(), "size", None), Ok(TagValue::Integer(2)));
        assert_eq!(call(&r, list.clone(), "last", None), Ok(TagValue::text("y")));
        assert_eq!(call(&r, list.clone(), "get", Some("1".into())), Ok(TagValue::text("x")));
        assert_eq!(call(&r, list.clone(), "get", Some("0".into())), Ok(TagValue::Null));
        assert_eq!(call(&r, list.clone(), "get", Some("2".into())), Ok(TagValue::text("y")));
        assert_eq!(call(&r, list.clone(), "get", Some("3".into())), Ok(TagValue::Null));
        assert_eq!(call(&r, list.clone(), "get", Some(i64::MAX.into())), Ok(TagValue::Null));
        assert_eq!(call(&r, list.clone(), "contains", Some("y".into())), Ok(TagValue::Boolean(true)));
        let grown = call(&r, list, "include", Some("z".into())).unwrap();
        assert_eq!(grown.to_string(), "x|y|z");
    }

    #[test]
    fn map_handlers() {
        let r = TagRegistry::standard();
        let map = coerce_map(&TagValue::text("hp:10|name:bob")).unwrap();
        assert_eq!(call(&r, map.clone(), "size", None), Ok(TagValue::Integer(2)));
        assert_eq!(call(&r, map.clone(), "hp", None), Ok(TagValue::text("10")));
        assert_eq!(call(&r, map.clone(), "missing", None), Ok(TagValue::Null));
        assert_eq!(call(&r, map.clone(), "keys", None).unwrap().to_string(), "hp|name");
        assert_eq!(call(&r, map, "contains", Some("NAME".into())), Ok(TagValue::Boolean(true)));
    }

    #[test]
    fn object_handlers() {
        let r = TagRegistry::standard();
        assert_eq!(call(&r, TagValue::Integer(1), "type", None), Ok(TagValue::text("integer")));
        assert_eq!(call(&r, TagValue::Null, "is_null", None), Ok(TagValue::Boolean(true)));
        assert_eq!(call(&r, TagValue::text("42"), "as", Some("integer".into())), Ok(TagValue::Integer(42)));
        assert!(call(&r, TagValue::text("x"), "as", Some("integer".into())).is_err());
    }

    #[test]
    fn coercions() {
        assert_eq!(coerce_integer(&TagValue::Number(4.0)), Some(TagValue::Integer(4)));
        assert_eq!(coerce_integer(&TagValue::Boolean(true)), None);
        assert_eq!(coerce_number(&TagValue::text("x")), None);
        assert_eq!(coerce_boolean(&TagValue::text("True")), Some(TagValue::Boolean(true)));
        assert_eq!(coerce_list(&TagValue::Integer(3)), Some(TagValue::List(vec![TagValue::Integer(3)])));
        assert_eq!(coerce_null(&TagValue::text("")), None);
        assert_eq!(coerce_text(&TagValue::Integer(3)), Some(TagValue::text("3")));
    }
}
