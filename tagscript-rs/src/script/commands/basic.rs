//! `echo`, `var`, `determine`, `stop`, `error`, `debug`.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::ExecError;
use crate::host::{DebugMode, Severity};
use crate::script::block::CommandEntry;
use crate::script::command::{validate_meta, Command, CommandMeta, ExecContext};
use crate::script::compiler::{BoundEntry, ScopeBuilder};
use crate::script::tags::{BoundArgument, TagRegistry, TypeId, VariableScope, OBJECT, TEXT};

// ── echo ──────────────────────────────────────────────────────────────────────

pub struct EchoCommand;

impl Command for EchoCommand {
    fn name(&self) -> &'static str {
        "echo"
    }

    fn execute(&self, ctx: &mut ExecContext<'_>) -> Result<(), ExecError> {
        let text = ctx.joined_args(0)?;
        ctx.env.output(Severity::Plain, &text);
        Ok(())
    }
}

// ── var ───────────────────────────────────────────────────────────────────────

/// `var <name> = <value>` / `var <name> as <type> = <value>`.
pub struct VarCommand;

fn valid_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_alphanumeric() || c == '_')
}

/// Static type of an assigned value.  Unquoted numeric literals are typed
/// as numbers so their handlers bind.
fn inferred_type(registry: &TagRegistry, value: &BoundArgument) -> TypeId {
    let Some(text) = value.literal_text().filter(|_| !value.quoted) else {
        return value.value_type;
    };
    let numeric = if text.parse::<i64>().is_ok() {
        registry.id("integer")
    } else if text.parse::<f64>().is_ok_and(f64::is_finite) {
        registry.id("number")
    } else {
        None
    };
    numeric.unwrap_or(TEXT)
}

impl Command for VarCommand {
    fn name(&self) -> &'static str {
        "var"
    }

    fn meta(&self) -> CommandMeta {
        CommandMeta {
            min_args: 3,
            max_args: Some(5),
            ..CommandMeta::default()
        }
    }

    fn validate(&self, entry: &CommandEntry) -> Result<(), String> {
        validate_meta(&self.meta(), entry)?;
        let a = &entry.arguments;
        let shape_ok = match a.len() {
            3 => a[1].is_word("="),
            5 => a[1].is_word("as") && a[3].is_word("="),
            _ => false,
        };
        if !shape_ok {
            return Err("expected 'var <name> = <value>' or 'var <name> as <type> = <value>'".into());
        }
        match a[0].literal_text() {
            Some(name) if valid_name(&name) => Ok(()),
            _ => Err(format!("invalid variable name '{}'", a[0])),
        }
    }

    fn adapt(&self, entry: &mut BoundEntry, scope: &mut ScopeBuilder<'_>) -> Result<(), String> {
        let name = entry.args[0]
            .literal_text()
            .ok_or("variable name must be literal")?
            .to_lowercase();
        let declared = if entry.args.len() == 5 {
            let type_name = entry.args[2]
                .literal_text()
                .ok_or("type must be a literal name")?
                .to_lowercase();
            let ty = scope
                .registry()
                .id(&type_name)
                .ok_or_else(|| format!("unknown type '{type_name}'"))?;
            Some(ty)
        } else {
            None
        };
        let value = entry.args.last().ok_or("missing value")?;
        let value_type = declared.unwrap_or_else(|| inferred_type(scope.registry(), value));

        // A visible variable is reassigned unless `as` names another type.
        let (slot, ty) = match scope.lookup(&name) {
            Some((slot, ty)) if declared.map_or(true, |d| d == ty) => (slot, ty),
            _ => (scope.declare(&name, value_type), value_type),
        };
        entry.step.slot = Some(slot);
        entry.step.value_type = Some(ty);
        debug!(var = %name, slot, ty = scope.registry().name(ty), "variable bound");
        Ok(())
    }

    fn execute(&self, ctx: &mut ExecContext<'_>) -> Result<(), ExecError> {
        let entry = ctx.entry;
        let slot = entry
            .step
            .slot
            .ok_or_else(|| ExecError::Failed("var without slot".into()))?;
        let value = ctx.arg(entry.args.len() - 1)?;
        let tags = Arc::clone(&ctx.env.tags);
        let value = tags.coerce_to(entry.step.value_type.unwrap_or(OBJECT), value)?;
        ctx.report(
            Severity::Info,
            &format!("Set '{}' to '{value}'.", entry.args[0].source),
        );
        ctx.queue.runnable_mut().set_local(slot, value);
        Ok(())
    }
}

// ── determine ─────────────────────────────────────────────────────────────────

pub struct DetermineCommand;

impl Command for DetermineCommand {
    fn name(&self) -> &'static str {
        "determine"
    }

    fn meta(&self) -> CommandMeta {
        CommandMeta {
            min_args: 1,
            max_args: Some(1),
            ..CommandMeta::default()
        }
    }

    fn execute(&self, ctx: &mut ExecContext<'_>) -> Result<(), ExecError> {
        let value = ctx.arg(0)?;
        ctx.report(Severity::Info, &format!("Determined '{value}'."));
        ctx.queue.determine(value);
        Ok(())
    }
}

// ── stop ──────────────────────────────────────────────────────────────────────

pub struct StopCommand;

impl Command for StopCommand {
    fn name(&self) -> &'static str {
        "stop"
    }

    fn meta(&self) -> CommandMeta {
        CommandMeta {
            max_args: Some(0),
            ..CommandMeta::default()
        }
    }

    fn execute(&self, ctx: &mut ExecContext<'_>) -> Result<(), ExecError> {
        ctx.report(Severity::Info, "Stopping queue.");
        ctx.queue.stop();
        Ok(())
    }
}

// ── error ─────────────────────────────────────────────────────────────────────

/// Intentional script failure: report and halt the queue.
pub struct ErrorCommand;

impl Command for ErrorCommand {
    fn name(&self) -> &'static str {
        "error"
    }

    fn meta(&self) -> CommandMeta {
        CommandMeta {
            min_args: 1,
            ..CommandMeta::default()
        }
    }

    fn execute(&self, ctx: &mut ExecContext<'_>) -> Result<(), ExecError> {
        let message = ctx.joined_args(0)?;
        warn!(
            queue = ctx.queue.id(),
            script = %ctx.queue.name(),
            line = ctx.entry.entry.line,
            %message,
            "script error"
        );
        ctx.report(Severity::Bad, &message);
        ctx.queue.stop();
        Ok(())
    }
}

// ── debug ─────────────────────────────────────────────────────────────────────

pub struct DebugCommand;

impl Command for DebugCommand {
    fn name(&self) -> &'static str {
        "debug"
    }

    fn meta(&self) -> CommandMeta {
        CommandMeta {
            min_args: 1,
            max_args: Some(1),
            ..CommandMeta::default()
        }
    }

    fn validate(&self, entry: &CommandEntry) -> Result<(), String> {
        validate_meta(&self.meta(), entry)?;
        match entry.arguments[0].literal_text() {
            Some(text) => text.parse::<DebugMode>().map(|_| ()),
            None => Ok(()),
        }
    }

    fn execute(&self, ctx: &mut ExecContext<'_>) -> Result<(), ExecError> {
        let mode = ctx
            .arg(0)?
            .to_string()
            .parse::<DebugMode>()
            .map_err(ExecError::InvalidArgument)?;
        ctx.queue.set_debug(mode);
        ctx.report(Severity::Info, &format!("Debug mode set to {mode}."));
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use crate::host::{Severity, SharedBuffer};
    use crate::script::value::TagValue;
    use crate::script::Engine;

    fn run(src: &str) -> (Engine, SharedBuffer) {
        let out = SharedBuffer::default();
        let mut engine = Engine::new(Box::new(out.clone()));
        engine.run_source("t", src).unwrap();
        (engine, out)
    }

    #[test]
    fn echo_joins_arguments() {
        let (_, out) = run("echo hello \"big world\" <integer[3]>");
        assert_eq!(out.plain(), vec!["hello big world 3"]);
    }

    #[test]
    fn echo_with_no_arguments_prints_empty_line() {
        let (_, out) = run("echo");
        assert_eq!(out.plain(), vec![""]);
    }

    #[test]
    fn var_declares_and_reassigns() {
        let (_, out) = run("var n = 1; var n = <n.add[41]>; echo <n>");
        assert_eq!(out.plain(), vec!["42"]);
    }

    #[test]
    fn var_with_declared_type_coerces() {
        let (_, out) = run("var f as number = 2; echo <f>; var l as list = a|b; echo <l.size>");
        assert_eq!(out.plain(), vec!["2.0", "2"]);
    }

    #[test]
    fn var_coercion_failure_is_runtime_fault() {
        let (_, out) = run("var n as integer = <text[abc]>; echo after");
        assert_eq!(out.plain(), vec!["after"]);
        assert_eq!(out.of(Severity::Bad).len(), 1);
    }

    #[test]
    fn var_shape_is_checked() {
        let mut engine = Engine::new(Box::new(SharedBuffer::default()));
        assert!(engine.compile("t", "var x 1 2").is_err());
        assert!(engine.compile("t", "var x as = 1 2").is_err());
        assert!(engine.compile("t", "var <text[x]> = 1").is_err());
        assert!(engine.compile("t", "var x as widget = 1").is_err());
    }

    #[test]
    fn quoted_number_stays_text() {
        let (_, out) = run("var s = \"12\"; echo <s.length>");
        assert_eq!(out.plain(), vec!["2"]);
    }

    #[test]
    fn determine_collects() {
        let out = SharedBuffer::default();
        let mut engine = Engine::new(Box::new(out));
        engine.try_load_script("d", "determine <integer[1]>; determine two").unwrap();
        assert_eq!(
            engine.call("d").unwrap(),
            vec![TagValue::Integer(1), TagValue::text("two")]
        );
    }

    #[test]
    fn stop_halts_queue() {
        let (engine, out) = run("echo a; stop; echo b");
        assert!(engine.is_idle());
        assert_eq!(out.plain(), vec!["a"]);
    }

    #[test]
    fn error_reports_and_halts() {
        let (engine, out) = run("echo a; error something broke; echo b");
        assert!(engine.is_idle());
        assert_eq!(out.plain(), vec!["a"]);
        assert_eq!(out.of(Severity::Bad), vec!["something broke"]);
    }

    #[test]
    fn debug_none_silences_errors() {
        let (_, out) = run("debug none; error quiet failure");
        assert!(out.of(Severity::Bad).is_empty());
    }

    #[test]
    fn debug_full_traces() {
        let (_, out) = run("debug full; var x = 1");
        assert!(out.of(Severity::Info).iter().any(|l| l == "Set 'x' to '1'."));
    }

    #[test]
    fn debug_mode_checked_when_literal() {
        let mut engine = Engine::new(Box::new(SharedBuffer::default()));
        assert!(engine.compile("t", "debug loud").is_err());
        assert!(engine.compile("t", "debug <text[full]>").is_ok());
    }
}
