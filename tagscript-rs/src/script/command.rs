//! The `Command` trait: the only surface the compiler and the queue know
//! about.  Every script command (and the synthetic block closer) implements
//! it.
//!
//! Lifecycle of one entry:
//!
//! 1. `validate`: right after block assembly, on the raw entry.
//! 2. `pre_adapt`: during compilation, with access to the whole entry
//!    array (wires jump targets of this entry and following ones).
//! 3. `adapt`: during compilation, emits the entry's [`Step`](crate::script::compiler::Step) and may
//!    declare variables in the current scope.
//! 4. `execute`: at runtime, once each time the entry is reached.
//! 5. `on_block_end`: at runtime, when the entry's block closer is reached.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{ExecError, TagError};
use crate::host::{DebugMode, Severity};
use crate::script::block::{CommandEntry, CommandPrefix};
use crate::script::compiler::{BoundEntry, CompiledRoutine, ScopeBuilder};
use crate::script::engine::Environment;
use crate::script::queue::CommandQueue;
use crate::script::tags::{BoundArgument, TagContext, OBJECT};
use crate::script::value::TagValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockUse {
    Forbidden,
    Optional,
    Required,
}

/// Static description of a command.
#[derive(Debug, Clone, Copy)]
pub struct CommandMeta {
    pub min_args: usize,
    pub max_args: Option<usize>,
    /// Declared type per positional argument; missing positions accept any.
    pub arg_types: &'static [&'static str],
    pub block: BlockUse,
    /// May be prefixed with `&` (the queue waits for it to complete).
    pub waitable: bool,
    /// Could run off the scheduler thread.  Not used by the scheduler yet.
    pub asyncable: bool,
    /// `break`/`continue` target.
    pub is_loop: bool,
}

impl Default for CommandMeta {
    fn default() -> Self {
        CommandMeta {
            min_args: 0,
            max_args: None,
            arg_types: &[],
            block: BlockUse::Forbidden,
            waitable: false,
            asyncable: false,
            is_loop: false,
        }
    }
}

pub trait Command: Send + Sync {
    fn name(&self) -> &'static str;

    fn meta(&self) -> CommandMeta {
        CommandMeta::default()
    }

    fn validate(&self, entry: &CommandEntry) -> Result<(), String> {
        validate_meta(&self.meta(), entry)
    }

    fn pre_adapt(&self, _entries: &mut [BoundEntry], _index: usize) -> Result<(), String> {
        Ok(())
    }

    fn adapt(&self, _entry: &mut BoundEntry, _scope: &mut ScopeBuilder<'_>) -> Result<(), String> {
        Ok(())
    }

    fn execute(&self, ctx: &mut ExecContext<'_>) -> Result<(), ExecError>;

    /// Called by the block closer of this command's block.  `ctx.entry` is
    /// the closer; `owner` is this command's entry index.
    fn on_block_end(&self, _ctx: &mut ExecContext<'_>, _owner: usize) -> Result<(), ExecError> {
        Ok(())
    }
}

/// The checks every command shares: argument count, block use, `&` prefix.
pub fn validate_meta(meta: &CommandMeta, entry: &CommandEntry) -> Result<(), String> {
    let n = entry.arguments.len();
    if n < meta.min_args {
        return Err(format!(
            "expects at least {} argument{}, got {n}",
            meta.min_args,
            if meta.min_args == 1 { "" } else { "s" }
        ));
    }
    if let Some(max) = meta.max_args {
        if n > max {
            return Err(format!("expects at most {max} argument{}, got {n}", if max == 1 { "" } else { "s" }));
        }
    }
    match (meta.block, entry.block.is_some()) {
        (BlockUse::Required, false) => return Err("requires a block".into()),
        (BlockUse::Forbidden, true) => return Err("does not take a block".into()),
        _ => {}
    }
    if entry.prefix == CommandPrefix::Wait && !meta.waitable {
        return Err("cannot be waited on with '&'".into());
    }
    Ok(())
}

// ── Registry ──────────────────────────────────────────────────────────────────

/// Name → command.
#[derive(Default)]
pub struct CommandRegistry {
    commands: HashMap<String, Arc<dyn Command>>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The standard command library.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        crate::script::commands::register_standard(&mut registry);
        registry
    }

    /// Register (or replace) a command under its own name.
    pub fn register(&mut self, command: Arc<dyn Command>) {
        self.commands.insert(command.name().to_lowercase(), command);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Command>> {
        self.commands.get(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.commands.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

// ── Execution context ─────────────────────────────────────────────────────────

/// What a command sees while executing.
pub struct ExecContext<'a> {
    pub entry: &'a BoundEntry,
    pub index: usize,
    pub queue: &'a mut CommandQueue,
    pub env: &'a mut Environment,
}

impl ExecContext<'_> {
    pub fn routine(&self) -> Arc<CompiledRoutine> {
        Arc::clone(self.queue.runnable().routine())
    }

    /// Effective verbosity: the entry's override, else the queue's.
    pub fn debug(&self) -> DebugMode {
        self.entry.entry.debug.unwrap_or(self.queue.debug())
    }

    pub fn report(&mut self, severity: Severity, text: &str) {
        if severity.visible_at(self.debug()) {
            self.env.host.output(severity, text);
        }
    }

    pub fn arg_count(&self) -> usize {
        self.entry.args.len()
    }

    pub fn evaluate(&mut self, arg: &BoundArgument) -> Result<TagValue, TagError> {
        let debug = self.debug();
        let routine = self.routine();
        let mut ctx = TagContext {
            env: &mut *self.env,
            locals: self.queue.runnable().locals(),
            script: &routine.name,
            line: self.entry.entry.line,
            debug,
        };
        arg.evaluate(&mut ctx)
    }

    /// Evaluate positional argument `i`.
    pub fn arg(&mut self, i: usize) -> Result<TagValue, ExecError> {
        let entry = self.entry;
        let arg = entry
            .args
            .get(i)
            .ok_or_else(|| ExecError::InvalidArgument(format!("missing argument {}", i + 1)))?;
        Ok(self.evaluate(arg)?)
    }

    /// Evaluate positional argument `i` and coerce it to `type_name`.
    pub fn arg_as(&mut self, i: usize, type_name: &str) -> Result<TagValue, ExecError> {
        let value = self.arg(i)?;
        let tags = Arc::clone(&self.env.tags);
        let ty = tags.id(type_name).unwrap_or(OBJECT);
        Ok(tags.coerce_to(ty, value)?)
    }

    /// Evaluate arguments `from..` and join their string forms with spaces.
    pub fn joined_args(&mut self, from: usize) -> Result<String, ExecError> {
        let mut parts = Vec::new();
        for i in from..self.arg_count() {
            parts.push(self.arg(i)?.to_string());
        }
        Ok(parts.join(" "))
    }

    /// Evaluate a named argument, if given.
    pub fn named(&mut self, key: &str) -> Result<Option<TagValue>, ExecError> {
        let entry = self.entry;
        match entry.named.get(key) {
            Some(arg) => Ok(Some(self.evaluate(arg)?)),
            None => Ok(None),
        }
    }

    /// Continue execution at resumption label `label`.
    pub fn jump(&mut self, label: usize) {
        self.queue.runnable_mut().jump(label);
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::args::Argument;
    use crate::script::block::BlockRange;

    fn entry(args: usize) -> CommandEntry {
        CommandEntry::new("x", (0..args).map(|_| Argument::literal("a")).collect(), 7)
    }

    #[test]
    fn argument_bounds() {
        let meta = CommandMeta {
            min_args: 1,
            max_args: Some(2),
            ..CommandMeta::default()
        };
        assert_eq!(
            validate_meta(&meta, &entry(0)).unwrap_err(),
            "expects at least 1 argument, got 0"
        );
        assert!(validate_meta(&meta, &entry(2)).is_ok());
        assert!(validate_meta(&meta, &entry(3)).is_err());
    }

    #[test]
    fn block_use() {
        let required = CommandMeta {
            block: BlockUse::Required,
            ..CommandMeta::default()
        };
        assert_eq!(validate_meta(&required, &entry(0)).unwrap_err(), "requires a block");
        let mut with_block = entry(0);
        with_block.block = Some(BlockRange { start: 1, end: 1 });
        assert!(validate_meta(&required, &with_block).is_ok());
        assert!(validate_meta(&CommandMeta::default(), &with_block).is_err());
    }

    #[test]
    fn wait_prefix_needs_waitable() {
        let mut e = entry(0);
        e.prefix = CommandPrefix::Wait;
        assert!(validate_meta(&CommandMeta::default(), &e).is_err());
        let waitable = CommandMeta {
            waitable: true,
            ..CommandMeta::default()
        };
        assert!(validate_meta(&waitable, &e).is_ok());
    }

    #[test]
    fn standard_registry_has_library() {
        let registry = CommandRegistry::standard();
        for name in [
            "echo", "var", "if", "else", "while", "repeat", "foreach", "break", "continue", "wait",
            "run", "determine", "stop", "error", "debug",
        ] {
            assert!(registry.get(name).is_some(), "missing {name}");
        }
    }
}
