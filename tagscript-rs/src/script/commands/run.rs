//! `wait` and `run`: the commands that suspend a queue or start another.

use tracing::debug;

use crate::error::{ExecError, TagError};
use crate::script::block::CommandPrefix;
use crate::script::command::{Command, CommandMeta, ExecContext};
use crate::script::queue::WaitHandle;
use crate::script::runnable::Runnable;

// ── wait ──────────────────────────────────────────────────────────────────────

/// `wait [seconds]`.  Without an argument the queue yields for one tick.
pub struct WaitCommand;

impl Command for WaitCommand {
    fn name(&self) -> &'static str {
        "wait"
    }

    fn meta(&self) -> CommandMeta {
        CommandMeta {
            max_args: Some(1),
            arg_types: &["number"],
            ..CommandMeta::default()
        }
    }

    fn execute(&self, ctx: &mut ExecContext<'_>) -> Result<(), ExecError> {
        let seconds = if ctx.arg_count() == 0 {
            0.0
        } else {
            ctx.arg_as(0, "number")?
                .as_number()
                .ok_or_else(|| ExecError::InvalidArgument("wait duration".into()))?
        };
        if seconds < 0.0 || !seconds.is_finite() {
            return Err(ExecError::InvalidArgument(format!("cannot wait {seconds} seconds")));
        }
        ctx.queue.set_wait(seconds);
        Ok(())
    }
}

// ── run ───────────────────────────────────────────────────────────────────────

/// `run <script>` starts a script in its own queue; `&run <script>` also
/// suspends this queue until that one completes.
pub struct RunCommand;

impl Command for RunCommand {
    fn name(&self) -> &'static str {
        "run"
    }

    fn meta(&self) -> CommandMeta {
        CommandMeta {
            min_args: 1,
            max_args: Some(1),
            waitable: true,
            ..CommandMeta::default()
        }
    }

    fn execute(&self, ctx: &mut ExecContext<'_>) -> Result<(), ExecError> {
        let name = ctx.arg(0)?.to_string();
        let routine = ctx
            .env
            .script(name.trim())
            .ok_or_else(|| TagError::UnknownScript(name.clone()))?;
        let handle = (ctx.entry.entry.prefix == CommandPrefix::Wait).then(WaitHandle::new);

        let id = ctx.env.start(Runnable::new(routine), handle.clone())?;
        debug!(parent = ctx.queue.id(), child = id, script = %name, waiting = handle.is_some(), "run");
        if let Some(handle) = handle {
            ctx.queue.wait_for(handle);
        }
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
