//! The standard command library.
//!
//! | Module | Commands |
//! |--------|----------|
//! | [`basic`] | `echo`, `var`, `determine`, `stop`, `error`, `debug` |
//! | [`flow`] | `if`, `else`, `while`, `repeat`, `foreach`, `break`, `continue` |
//! | [`run`] | `wait`, `run` |
//!
//! plus [`BlockEndCommand`], the synthetic command bound to block closers.

pub mod basic;
pub mod flow;
pub mod run;

use std::sync::Arc;

use crate::error::ExecError;
use crate::script::block::{BlockRange, BLOCK_END};
use crate::script::command::{Command, CommandRegistry, ExecContext};
use crate::script::compiler::BoundEntry;

/// Register every standard command.
pub fn register_standard(registry: &mut CommandRegistry) {
    registry.register(Arc::new(basic::EchoCommand));
    registry.register(Arc::new(basic::VarCommand));
    registry.register(Arc::new(basic::DetermineCommand));
    registry.register(Arc::new(basic::StopCommand));
    registry.register(Arc::new(basic::ErrorCommand));
    registry.register(Arc::new(basic::DebugCommand));
    registry.register(Arc::new(flow::IfCommand));
    registry.register(Arc::new(flow::ElseCommand));
    registry.register(Arc::new(flow::WhileCommand));
    registry.register(Arc::new(flow::RepeatCommand));
    registry.register(Arc::new(flow::ForeachCommand));
    registry.register(Arc::new(flow::BreakCommand));
    registry.register(Arc::new(flow::ContinueCommand));
    registry.register(Arc::new(run::WaitCommand));
    registry.register(Arc::new(run::RunCommand));
}

/// Bound to every block closer: hands control back to the command owning
/// the block.
pub struct BlockEndCommand;

impl Command for BlockEndCommand {
    fn name(&self) -> &'static str {
        BLOCK_END
    }

    fn execute(&self, ctx: &mut ExecContext<'_>) -> Result<(), ExecError> {
        let owner = ctx
            .entry
            .entry
            .owner
            .ok_or_else(|| ExecError::Failed("block closer without owner".into()))?;
        let routine = ctx.routine();
        let command = routine
            .entries
            .get(owner)
            .map(|e| Arc::clone(&e.command))
            .ok_or_else(|| ExecError::Failed(format!("block owner {owner} out of range")))?;
        command.on_block_end(ctx, owner)
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

pub(crate) fn block_of(entry: &BoundEntry) -> Result<BlockRange, String> {
    entry
        .entry
        .block
        .ok_or_else(|| format!("'{}' has no block", entry.entry.name))
}

/// The jump label `pre_adapt` stored on the executing entry.
pub(crate) fn target(ctx: &ExecContext<'_>) -> Result<usize, ExecError> {
    ctx.entry
        .step
        .target
        .ok_or_else(|| ExecError::Failed(format!("'{}' has no jump target", ctx.entry.entry.name)))
}
