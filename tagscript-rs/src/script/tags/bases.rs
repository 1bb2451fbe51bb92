//! Standard chain bases.  `var` is handled by the binder itself
//! ([`VAR_BASE`](super::bind::VAR_BASE)); every other base lives here.

use tracing::debug;

use super::{ModifierUse, Returns, TagBase, TagContext, TagRegistry};
use crate::error::TagError;
use crate::script::value::TagValue;

fn required(modifier: Option<TagValue>, base: &str) -> Result<TagValue, TagError> {
    modifier.ok_or_else(|| TagError::Handler(format!("'{base}' requires a modifier")))
}

pub fn register(registry: &mut TagRegistry) {
    registry.register_base(TagBase {
        name: "text",
        modifier: ModifierUse::Optional("text"),
        returns: Returns::Type("text"),
        func: |m, _| Ok(m.unwrap_or_else(|| TagValue::text(""))),
    });
    registry.register_base(TagBase {
        name: "number",
        modifier: ModifierUse::Required("number"),
        returns: Returns::Type("number"),
        func: |m, _| required(m, "number"),
    });
    registry.register_base(TagBase {
        name: "integer",
        modifier: ModifierUse::Required("integer"),
        returns: Returns::Type("integer"),
        func: |m, _| required(m, "integer"),
    });
    registry.register_base(TagBase {
        name: "boolean",
        modifier: ModifierUse::Required("boolean"),
        returns: Returns::Type("boolean"),
        func: |m, _| required(m, "boolean"),
    });
    registry.register_base(TagBase {
        name: "list",
        modifier: ModifierUse::Optional("list"),
        returns: Returns::Type("list"),
        func: |m, _| Ok(m.unwrap_or(TagValue::List(Vec::new()))),
    });
    registry.register_base(TagBase {
        name: "map",
        modifier: ModifierUse::Optional("map"),
        returns: Returns::Type("map"),
        func: |m, _| Ok(m.unwrap_or_else(|| TagValue::Map(Default::default()))),
    });
    registry.register_base(TagBase {
        name: "null",
        modifier: ModifierUse::None,
        returns: Returns::Type("null"),
        func: |_, _| Ok(TagValue::Null),
    });
    registry.register_base(TagBase {
        name: "cvar",
        modifier: ModifierUse::Required("text"),
        returns: Returns::Type("text"),
        func: cvar,
    });
    registry.register_base(TagBase {
        name: "function",
        modifier: ModifierUse::Required("text"),
        returns: Returns::Type("dynamic"),
        func: function,
    });
}

/// `<cvar[name]>`: host configuration variable, null when unset.
fn cvar(modifier: Option<TagValue>, ctx: &mut TagContext<'_>) -> Result<TagValue, TagError> {
    let name = required(modifier, "cvar")?.to_string();
    Ok(ctx
        .env
        .host
        .cvar(name.trim())
        .map_or(TagValue::Null, TagValue::Text))
}

/// `<function[script]>`: run a script synchronously and use what it
/// determined.  None → null, one → that value, several → a list.
fn function(modifier: Option<TagValue>, ctx: &mut TagContext<'_>) -> Result<TagValue, TagError> {
    let name = required(modifier, "function")?.to_string();
    let mut determinations = ctx.env.call_script(name.trim())?;
    debug!(script = %name, count = determinations.len(), "function call returned");
    Ok(match determinations.len() {
        0 => TagValue::Null,
        1 => determinations.remove(0),
        _ => TagValue::List(determinations),
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{BufferHost, DebugMode};
    use crate::script::engine::Environment;
    use crate::var::CVarStore;

    fn run_base(env: &mut Environment, name: &str, modifier: Option<TagValue>) -> Result<TagValue, TagError> {
        let base = *env.tags.base(name).unwrap();
        let mut ctx = TagContext {
            env,
            locals: &[],
            script: "t",
            line: 1,
            debug: DebugMode::None,
        };
        (base.func)(modifier, &mut ctx)
    }

    #[test]
    fn literal_bases() {
        let mut env = Environment::standard();
        assert_eq!(run_base(&mut env, "text", None), Ok(TagValue::text("")));
        assert_eq!(run_base(&mut env, "list", None), Ok(TagValue::List(vec![])));
        assert_eq!(run_base(&mut env, "null", None), Ok(TagValue::Null));
        assert!(run_base(&mut env, "integer", None).is_err());
    }

    #[test]
    fn cvar_reads_host() {
        let mut cvars = CVarStore::new();
        cvars.set("player", "bob").unwrap();
        let mut env = Environment::with_host(Box::new(BufferHost::with_cvars(cvars)));
        assert_eq!(run_base(&mut env, "cvar", Some("PLAYER".into())), Ok(TagValue::text("bob")));
        assert_eq!(run_base(&mut env, "cvar", Some("other".into())), Ok(TagValue::Null));
    }

    #[test]
    fn function_shapes_determinations() {
        let mut env = Environment::standard();
        env.compile_and_register("none", "echo nothing").unwrap();
        env.compile_and_register("one", "determine 5").unwrap();
        env.compile_and_register("two", "determine a; determine b").unwrap();
        assert_eq!(run_base(&mut env, "function", Some("none".into())), Ok(TagValue::Null));
        assert_eq!(run_base(&mut env, "function", Some("one".into())), Ok(TagValue::text("5")));
        assert_eq!(
            run_base(&mut env, "function", Some("two".into())),
            Ok(TagValue::List(vec!["a".into(), "b".into()]))
        );
        assert!(matches!(
            run_base(&mut env, "function", Some("missing".into())),
            Err(TagError::UnknownScript(_))
        ));
    }
}
