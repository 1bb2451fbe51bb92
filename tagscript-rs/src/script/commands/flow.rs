//! Control flow: `if`/`else`, `while`, `repeat`, `foreach`, `break`,
//! `continue`.
//!
//! None of these are scheduler concepts.  Each one moves the queue's
//! resumption index: skipping its block, jumping back to its start from the
//! closer, or leaving it early.
//!
//! ```text
//!   [0] if <a> { … }      target → 3 (next branch)
//!   [2] }                 target → 6 (chain end)
//!   [3] else { … }
//!   [5] }                 target → 6
//!   [6] …
//! ```

use tracing::trace;

use super::{block_of, target};
use crate::error::ExecError;
use crate::script::block::CommandEntry;
use crate::script::command::{validate_meta, BlockUse, Command, CommandMeta, ExecContext};
use crate::script::compiler::{BoundEntry, ScopeBuilder};
use crate::script::condition;
use crate::script::runnable::EntryState;
use crate::script::tags::DYNAMIC;
use crate::script::value::TagValue;

// ── Shared helpers ────────────────────────────────────────────────────────────

fn holds(ctx: &mut ExecContext<'_>) -> Result<bool, ExecError> {
    let entry = ctx.entry;
    let cond = entry
        .step
        .condition
        .as_ref()
        .ok_or_else(|| ExecError::Failed(format!("'{}' has no condition", entry.entry.name)))?;
    cond.holds(ctx)
}

/// Evaluate the entry's condition and jump to its target unless it holds.
/// A condition that cannot be evaluated also skips the block.
fn enter_if_holds(ctx: &mut ExecContext<'_>) -> Result<(), ExecError> {
    let result = holds(ctx);
    if !matches!(result, Ok(true)) {
        let next = target(ctx)?;
        trace!(index = ctx.index, next, "condition not met");
        ctx.jump(next);
    }
    result.map(|_| ())
}

fn is_branch(entry: &BoundEntry) -> bool {
    matches!(entry.entry.name.as_str(), "if" | "else")
}

fn is_final_else(entry: &BoundEntry) -> bool {
    entry.entry.name == "else" && entry.entry.arguments.is_empty()
}

/// Index just past the last `else` chained after the closer at `closer`.
fn chain_end(entries: &[BoundEntry], closer: usize) -> usize {
    let mut pos = closer + 1;
    while let Some(next) = entries.get(pos) {
        match next.entry.block {
            Some(block) if next.entry.name == "else" => pos = block.closer() + 1,
            _ => break,
        }
    }
    pos
}

/// Wire a branch: on false skip to the next branch, and from the closer
/// skip the rest of the chain.
fn wire_branch(entries: &mut [BoundEntry], index: usize) -> Result<(), String> {
    let closer = block_of(&entries[index])?.closer();
    entries[index].step.target = Some(closer + 1);
    let end = chain_end(entries, closer);
    entries
        .get_mut(closer)
        .ok_or("block closer out of range")?
        .step
        .target = Some(end);
    Ok(())
}

/// Innermost loop whose block contains `index`.
fn enclosing_loop(entries: &[BoundEntry], index: usize) -> Option<usize> {
    (0..index).rev().find(|&i| {
        let e = &entries[i];
        e.command.meta().is_loop && e.entry.block.is_some_and(|b| b.contains(index))
    })
}

// ── if / else ─────────────────────────────────────────────────────────────────

pub struct IfCommand;

impl Command for IfCommand {
    fn name(&self) -> &'static str {
        "if"
    }

    fn meta(&self) -> CommandMeta {
        CommandMeta {
            min_args: 1,
            block: BlockUse::Required,
            ..CommandMeta::default()
        }
    }

    fn pre_adapt(&self, entries: &mut [BoundEntry], index: usize) -> Result<(), String> {
        wire_branch(entries, index)
    }

    fn adapt(&self, entry: &mut BoundEntry, _scope: &mut ScopeBuilder<'_>) -> Result<(), String> {
        entry.step.condition = Some(condition::parse(&entry.args, 0)?);
        Ok(())
    }

    fn execute(&self, ctx: &mut ExecContext<'_>) -> Result<(), ExecError> {
        enter_if_holds(ctx)
    }

    fn on_block_end(&self, ctx: &mut ExecContext<'_>, _owner: usize) -> Result<(), ExecError> {
        let end = target(ctx)?;
        ctx.jump(end);
        Ok(())
    }
}

/// `else { … }` or `else if <cond> { … }`.
pub struct ElseCommand;

impl Command for ElseCommand {
    fn name(&self) -> &'static str {
        "else"
    }

    fn meta(&self) -> CommandMeta {
        CommandMeta {
            block: BlockUse::Required,
            ..CommandMeta::default()
        }
    }

    fn validate(&self, entry: &CommandEntry) -> Result<(), String> {
        validate_meta(&self.meta(), entry)?;
        match entry.arguments.first() {
            None => Ok(()),
            Some(first) if first.is_word("if") && entry.arguments.len() > 1 => Ok(()),
            Some(_) => Err("expected 'else' or 'else if <condition>'".into()),
        }
    }

    fn pre_adapt(&self, entries: &mut [BoundEntry], index: usize) -> Result<(), String> {
        let previous = index
            .checked_sub(1)
            .and_then(|i| entries[i].entry.owner)
            .map(|owner| (is_branch(&entries[owner]), is_final_else(&entries[owner])));
        match previous {
            Some((true, false)) => wire_branch(entries, index),
            Some((true, true)) => Err("'else' after a final 'else'".into()),
            _ => Err("must follow an 'if' or 'else' block".into()),
        }
    }

    fn adapt(&self, entry: &mut BoundEntry, _scope: &mut ScopeBuilder<'_>) -> Result<(), String> {
        if !entry.args.is_empty() {
            entry.step.condition = Some(condition::parse(&entry.args, 1)?);
        }
        Ok(())
    }

    fn execute(&self, ctx: &mut ExecContext<'_>) -> Result<(), ExecError> {
        // Reached only when every earlier branch failed.
        if ctx.entry.step.condition.is_none() {
            return Ok(());
        }
        enter_if_holds(ctx)
    }

    fn on_block_end(&self, ctx: &mut ExecContext<'_>, _owner: usize) -> Result<(), ExecError> {
        let end = target(ctx)?;
        ctx.jump(end);
        Ok(())
    }
}

// ── while ─────────────────────────────────────────────────────────────────────

pub struct WhileCommand;

impl Command for WhileCommand {
    fn name(&self) -> &'static str {
        "while"
    }

    fn meta(&self) -> CommandMeta {
        CommandMeta {
            min_args: 1,
            block: BlockUse::Required,
            is_loop: true,
            ..CommandMeta::default()
        }
    }

    fn pre_adapt(&self, entries: &mut [BoundEntry], index: usize) -> Result<(), String> {
        entries[index].step.target = Some(block_of(&entries[index])?.closer() + 1);
        Ok(())
    }

    fn adapt(&self, entry: &mut BoundEntry, _scope: &mut ScopeBuilder<'_>) -> Result<(), String> {
        entry.step.condition = Some(condition::parse(&entry.args, 0)?);
        Ok(())
    }

    fn execute(&self, ctx: &mut ExecContext<'_>) -> Result<(), ExecError> {
        enter_if_holds(ctx)
    }

    fn on_block_end(&self, ctx: &mut ExecContext<'_>, owner: usize) -> Result<(), ExecError> {
        ctx.jump(owner);
        Ok(())
    }
}

// ── repeat ────────────────────────────────────────────────────────────────────

pub struct RepeatCommand;

impl Command for RepeatCommand {
    fn name(&self) -> &'static str {
        "repeat"
    }

    fn meta(&self) -> CommandMeta {
        CommandMeta {
            min_args: 1,
            max_args: Some(1),
            arg_types: &["integer"],
            block: BlockUse::Required,
            is_loop: true,
            ..CommandMeta::default()
        }
    }

    fn pre_adapt(&self, entries: &mut [BoundEntry], index: usize) -> Result<(), String> {
        entries[index].step.target = Some(block_of(&entries[index])?.closer() + 1);
        Ok(())
    }

    fn execute(&self, ctx: &mut ExecContext<'_>) -> Result<(), ExecError> {
        let total = ctx
            .arg_as(0, "integer")?
            .as_integer()
            .ok_or_else(|| ExecError::InvalidArgument("repeat count".into()))?;
        if total <= 0 {
            let exit = target(ctx)?;
            ctx.jump(exit);
            return Ok(());
        }
        let index = ctx.index;
        ctx.queue
            .runnable_mut()
            .set_aux(index, EntryState::Counter { current: 1, total });
        Ok(())
    }

    fn on_block_end(&self, ctx: &mut ExecContext<'_>, owner: usize) -> Result<(), ExecError> {
        let routine = ctx.routine();
        let block = block_of(&routine.entries[owner]).map_err(ExecError::Failed)?;
        let runnable = ctx.queue.runnable_mut();
        match runnable.aux_mut(owner) {
            Some(EntryState::Counter { current, total }) if *current < *total => {
                *current += 1;
                runnable.jump(block.start);
            }
            _ => runnable.clear_aux(owner),
        }
        Ok(())
    }
}

// ── foreach ───────────────────────────────────────────────────────────────────

/// `foreach <list> as <name> { … }`; `<name>` is visible inside the block.
pub struct ForeachCommand;

impl Command for ForeachCommand {
    fn name(&self) -> &'static str {
        "foreach"
    }

    fn meta(&self) -> CommandMeta {
        CommandMeta {
            min_args: 3,
            max_args: Some(3),
            arg_types: &["list"],
            block: BlockUse::Required,
            is_loop: true,
            ..CommandMeta::default()
        }
    }

    fn validate(&self, entry: &CommandEntry) -> Result<(), String> {
        validate_meta(&self.meta(), entry)?;
        if !entry.arguments[1].is_word("as") {
            return Err("expected 'foreach <list> as <name>'".into());
        }
        match entry.arguments[2].literal_text() {
            Some(name) if !name.is_empty() => Ok(()),
            _ => Err("loop variable must be a literal name".into()),
        }
    }

    fn pre_adapt(&self, entries: &mut [BoundEntry], index: usize) -> Result<(), String> {
        entries[index].step.target = Some(block_of(&entries[index])?.closer() + 1);
        Ok(())
    }

    fn adapt(&self, entry: &mut BoundEntry, scope: &mut ScopeBuilder<'_>) -> Result<(), String> {
        let name = entry.args[2].literal_text().ok_or("loop variable must be literal")?;
        entry.step.slot = Some(scope.declare(&name, DYNAMIC));
        entry.step.value_type = Some(DYNAMIC);
        Ok(())
    }

    fn execute(&self, ctx: &mut ExecContext<'_>) -> Result<(), ExecError> {
        let items = match ctx.arg_as(0, "list")? {
            TagValue::List(items) => items,
            other => vec![other],
        };
        let slot = ctx
            .entry
            .step
            .slot
            .ok_or_else(|| ExecError::Failed("foreach without slot".into()))?;
        let Some(first) = items.first().cloned() else {
            let exit = target(ctx)?;
            ctx.jump(exit);
            return Ok(());
        };
        let index = ctx.index;
        let runnable = ctx.queue.runnable_mut();
        runnable.set_local(slot, first);
        runnable.set_aux(index, EntryState::Iteration { items, position: 0 });
        Ok(())
    }

    fn on_block_end(&self, ctx: &mut ExecContext<'_>, owner: usize) -> Result<(), ExecError> {
        let routine = ctx.routine();
        let owner_entry = &routine.entries[owner];
        let block = block_of(owner_entry).map_err(ExecError::Failed)?;
        let slot = owner_entry
            .step
            .slot
            .ok_or_else(|| ExecError::Failed("foreach without slot".into()))?;
        let runnable = ctx.queue.runnable_mut();
        let next = match runnable.aux_mut(owner) {
            Some(EntryState::Iteration { items, position }) if *position + 1 < items.len() => {
                *position += 1;
                Some(items[*position].clone())
            }
            _ => None,
        };
        match next {
            Some(value) => {
                runnable.set_local(slot, value);
                runnable.jump(block.start);
            }
            None => runnable.clear_aux(owner),
        }
        Ok(())
    }
}

// ── break / continue ──────────────────────────────────────────────────────────

pub struct BreakCommand;

impl Command for BreakCommand {
    fn name(&self) -> &'static str {
        "break"
    }

    fn meta(&self) -> CommandMeta {
        CommandMeta {
            max_args: Some(0),
            ..CommandMeta::default()
        }
    }

    fn pre_adapt(&self, entries: &mut [BoundEntry], index: usize) -> Result<(), String> {
        let owner = enclosing_loop(entries, index).ok_or("'break' outside a loop")?;
        let exit = block_of(&entries[owner])?.closer() + 1;
        entries[index].step.owner = Some(owner);
        entries[index].step.target = Some(exit);
        Ok(())
    }

    fn execute(&self, ctx: &mut ExecContext<'_>) -> Result<(), ExecError> {
        let exit = target(ctx)?;
        if let Some(owner) = ctx.entry.step.owner {
            ctx.queue.runnable_mut().clear_aux(owner);
        }
        ctx.jump(exit);
        Ok(())
    }
}

pub struct ContinueCommand;

impl Command for ContinueCommand {
    fn name(&self) -> &'static str {
        "continue"
    }

    fn meta(&self) -> CommandMeta {
        CommandMeta {
            max_args: Some(0),
            ..CommandMeta::default()
        }
    }

    fn pre_adapt(&self, entries: &mut [BoundEntry], index: usize) -> Result<(), String> {
        let owner = enclosing_loop(entries, index).ok_or("'continue' outside a loop")?;
        entries[index].step.owner = Some(owner);
        entries[index].step.target = Some(block_of(&entries[owner])?.closer());
        Ok(())
    }

    fn execute(&self, ctx: &mut ExecContext<'_>) -> Result<(), ExecError> {
        let closer = target(ctx)?;
        ctx.jump(closer);
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
