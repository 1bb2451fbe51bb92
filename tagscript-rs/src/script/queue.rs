//! Command queue: the cooperative scheduler for one running routine.
//!
//! ```text
//!   Idle ──execute──▶ Running ──wait / &run──▶ Waiting
//!                        ▲                        │
//!                        └──────── tick ──────────┘
//!                        │
//!                        └── entries exhausted / stop ──▶ Finished
//! ```
//!
//! The engine owns the queues and calls [`CommandQueue::tick`] on each of
//! them once per pass.  A queue only ever suspends between entries.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{info, trace, warn};

use crate::host::{DebugMode, Severity};
use crate::script::command::ExecContext;
use crate::script::compiler::BoundEntry;
use crate::script::engine::Environment;
use crate::script::runnable::{CompletionCallback, Runnable};
use crate::script::value::TagValue;

pub type QueueId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueState {
    Idle,
    Running,
    Waiting,
    Finished,
}

/// Completion flag shared between a waiting queue and whatever it waits on.
#[derive(Debug, Clone, Default)]
pub struct WaitHandle(Arc<AtomicBool>);

impl WaitHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn finish(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_finished(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[derive(Debug)]
pub struct CommandQueue {
    id: QueueId,
    runnable: Runnable,
    state: QueueState,
    /// Seconds left on the wait timer.
    wait: Option<f64>,
    waiting_on: Option<WaitHandle>,
    last_executed: Option<usize>,
    determinations: Vec<TagValue>,
    debug: DebugMode,
    stopped: bool,
}

impl CommandQueue {
    pub fn new(id: QueueId, runnable: Runnable, debug: DebugMode) -> Self {
        CommandQueue {
            id,
            runnable,
            state: QueueState::Idle,
            wait: None,
            waiting_on: None,
            last_executed: None,
            determinations: Vec::new(),
            debug,
            stopped: false,
        }
    }

    pub fn id(&self) -> QueueId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.runnable.routine().name
    }

    pub fn state(&self) -> QueueState {
        self.state
    }

    pub fn is_finished(&self) -> bool {
        self.state == QueueState::Finished
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    pub fn runnable(&self) -> &Runnable {
        &self.runnable
    }

    pub fn runnable_mut(&mut self) -> &mut Runnable {
        &mut self.runnable
    }

    pub fn debug(&self) -> DebugMode {
        self.debug
    }

    pub fn set_debug(&mut self, mode: DebugMode) {
        self.debug = mode;
    }

    pub fn last_executed(&self) -> Option<usize> {
        self.last_executed
    }

    // ── Variables & results ───────────────────────────────────────────────────

    /// Current value of a named local.
    pub fn variable(&self, name: &str) -> Option<&TagValue> {
        let slot = self.runnable.slot_of(name)?;
        self.runnable.local(slot)
    }

    /// Seed a named local (before `execute`).  Returns `false` if the
    /// routine has no such variable.
    pub fn set_variable(&mut self, name: &str, value: TagValue) -> bool {
        match self.runnable.slot_of(name) {
            Some(slot) => {
                self.runnable.set_local(slot, value);
                true
            }
            None => false,
        }
    }

    pub fn determine(&mut self, value: TagValue) {
        self.determinations.push(value);
    }

    pub fn determinations(&self) -> &[TagValue] {
        &self.determinations
    }

    /// Read and clear the determinations.
    pub fn take_determinations(&mut self) -> Vec<TagValue> {
        std::mem::take(&mut self.determinations)
    }

    pub fn on_complete(&mut self, callback: CompletionCallback) {
        self.runnable.on_complete(callback);
    }

    // ── Suspension ────────────────────────────────────────────────────────────

    /// Suspend for `seconds` of accumulated tick time.  `0` yields for one
    /// tick.
    pub fn set_wait(&mut self, seconds: f64) {
        self.wait = Some(seconds.max(0.0));
    }

    pub fn wait_remaining(&self) -> Option<f64> {
        self.wait
    }

    /// Suspend until `handle` is finished.
    pub fn wait_for(&mut self, handle: WaitHandle) {
        self.waiting_on = Some(handle);
    }

    fn blocked(&self) -> bool {
        self.wait.is_some() || self.waiting_on.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Skip every remaining entry.  Takes effect at the next scheduling
    /// point; the completion callback still fires.
    pub fn stop(&mut self) {
        self.stopped = true;
        self.wait = None;
        self.waiting_on = None;
        let terminal = self.runnable.routine().terminal();
        self.runnable.set_index(terminal);
    }

    // ── Driving ───────────────────────────────────────────────────────────────

    /// Start the queue: one synchronous tick with no elapsed time.
    pub fn execute(&mut self, env: &mut Environment) {
        if self.state != QueueState::Idle {
            return;
        }
        info!(queue = self.id, script = %self.name(), "queue started");
        self.state = QueueState::Running;
        self.tick(env, 0.0);
    }

    /// Advance by `delta` seconds and run entries until the routine ends or
    /// something suspends it.
    pub fn tick(&mut self, env: &mut Environment, delta: f64) {
        match self.state {
            QueueState::Finished => return,
            QueueState::Idle => {
                info!(queue = self.id, script = %self.name(), "queue started");
            }
            _ => {}
        }

        if let Some(handle) = &self.waiting_on {
            if !handle.is_finished() {
                self.state = QueueState::Waiting;
                return;
            }
            self.waiting_on = None;
        }
        if let Some(remaining) = self.wait {
            let remaining = remaining - delta;
            if remaining > 0.0 {
                self.wait = Some(remaining);
                self.state = QueueState::Waiting;
                return;
            }
            self.wait = None;
        }

        self.state = QueueState::Running;
        let routine = Arc::clone(self.runnable.routine());
        loop {
            let index = self.runnable.index();
            let Some(entry) = routine.entries.get(index) else {
                self.complete();
                return;
            };
            self.runnable.set_index(index + 1);
            self.last_executed = Some(index);
            self.dispatch(env, entry, index);
            if self.blocked() {
                self.state = QueueState::Waiting;
                trace!(queue = self.id, index, "queue suspended");
                return;
            }
        }
    }

    /// Run one entry, containing any failure.
    fn dispatch(&mut self, env: &mut Environment, entry: &BoundEntry, index: usize) {
        let debug = entry.entry.debug.unwrap_or(self.debug);
        if Severity::Info.visible_at(debug) && !entry.entry.is_closer() {
            env.host.output(
                Severity::Info,
                &format!("Executing '{}' ({}:{})", entry.entry.source, self.name(), entry.entry.line),
            );
        }
        trace!(queue = self.id, index, command = entry.command.name(), "dispatch");

        let command = Arc::clone(&entry.command);
        let result = {
            let mut ctx = ExecContext {
                entry,
                index,
                queue: &mut *self,
                env: &mut *env,
            };
            command.execute(&mut ctx)
        };
        if let Err(err) = result {
            warn!(
                queue = self.id,
                script = %self.name(),
                line = entry.entry.line,
                command = %entry.entry.name,
                error = %err,
                "command failed"
            );
            if Severity::Bad.visible_at(debug) {
                env.host.output(
                    Severity::Bad,
                    &format!(
                        "Error in {}:{} '{}': {err}",
                        self.name(),
                        entry.entry.line,
                        entry.entry.name
                    ),
                );
            }
        }
    }

    fn complete(&mut self) {
        if self.state == QueueState::Finished {
            return;
        }
        self.state = QueueState::Finished;
        if let Some(callback) = self.runnable.take_callback() {
            callback(&self.determinations);
        }
        info!(
            queue = self.id,
            script = %self.name(),
            stopped = self.stopped,
            determinations = self.determinations.len(),
            "queue finished"
        );
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;
    use crate::host::{BufferHost, SharedBuffer};

    fn env_with_output() -> (Environment, SharedBuffer) {
        let shared = SharedBuffer::new(BufferHost::new());
        (Environment::with_host(Box::new(shared.clone())), shared)
    }

    fn queue(env: &mut Environment, src: &str) -> CommandQueue {
        let routine = env.compile_and_register("q", src).unwrap();
        env.new_queue(Runnable::new(routine))
    }

    #[test]
    fn runs_to_completion_without_waits() {
        let (mut env, out) = env_with_output();
        let mut q = queue(&mut env, "echo a; echo b; echo c");
        q.execute(&mut env);
        assert!(q.is_finished());
        assert_eq!(out.plain(), vec!["a", "b", "c"]);
        assert_eq!(q.last_executed(), Some(2));
    }

    #[test]
    fn wait_suspends_until_time_accumulates() {
        let (mut env, out) = env_with_output();
        let mut q = queue(&mut env, "echo hi; wait 1; echo bye");
        q.execute(&mut env);
        assert_eq!(q.state(), QueueState::Waiting);
        assert_eq!(out.plain(), vec!["hi"]);
        q.tick(&mut env, 0.4);
        q.tick(&mut env, 0.4);
        assert_eq!(out.plain(), vec!["hi"]);
        q.tick(&mut env, 0.4);
        assert!(q.is_finished());
        assert_eq!(out.plain(), vec!["hi", "bye"]);
    }

    #[test]
    fn bare_wait_yields_one_tick() {
        let (mut env, out) = env_with_output();
        let mut q = queue(&mut env, "echo a; wait; echo b");
        q.execute(&mut env);
        assert_eq!(out.plain(), vec!["a"]);
        q.tick(&mut env, 0.0);
        assert_eq!(out.plain(), vec!["a", "b"]);
    }

    #[test]
    fn completion_fires_once() {
        let (mut env, _) = env_with_output();
        let mut q = queue(&mut env, "determine 1; wait 1; determine 2");
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        q.on_complete(Box::new(move |dets| {
            assert_eq!(dets.len(), 2);
            seen.fetch_add(1, Ordering::SeqCst);
        }));
        q.execute(&mut env);
        for _ in 0..5 {
            q.tick(&mut env, 1.0);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn stop_skips_rest_and_still_completes() {
        let (mut env, out) = env_with_output();
        let mut q = queue(&mut env, "echo a; wait 10; echo b");
        let fired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fired);
        q.on_complete(Box::new(move |_| flag.store(true, Ordering::SeqCst)));
        q.execute(&mut env);
        q.stop();
        q.tick(&mut env, 0.0);
        assert!(q.is_finished());
        assert!(q.is_stopped());
        assert!(fired.load(Ordering::SeqCst));
        assert_eq!(out.plain(), vec!["a"]);
    }

    #[test]
    fn failing_entry_does_not_stop_queue() {
        let (mut env, out) = env_with_output();
        let mut q = queue(&mut env, "echo <integer[1].divide[0]>; echo after");
        q.execute(&mut env);
        assert!(q.is_finished());
        assert_eq!(out.plain(), vec!["after"]);
        let errors = out.of(Severity::Bad);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("q:1"), "{}", errors[0]);
    }

    #[test]
    fn quiet_prefix_silences_failures() {
        let (mut env, out) = env_with_output();
        let mut q = queue(&mut env, "@echo <integer[1].divide[0]>");
        q.execute(&mut env);
        assert!(out.of(Severity::Bad).is_empty());
    }

    #[test]
    fn full_debug_traces_execution() {
        let (mut env, out) = env_with_output();
        let mut q = queue(&mut env, "echo a");
        q.set_debug(DebugMode::Full);
        q.execute(&mut env);
        assert!(out.of(Severity::Info).iter().any(|l| l.starts_with("Executing 'echo a'")));
    }

    #[test]
    fn wait_handle_blocks_until_finished() {
        let (mut env, out) = env_with_output();
        let mut q = queue(&mut env, "echo a; echo b");
        let handle = WaitHandle::new();
        q.wait_for(handle.clone());
        q.execute(&mut env);
        assert_eq!(q.state(), QueueState::Waiting);
        assert!(out.plain().is_empty());
        handle.finish();
        q.tick(&mut env, 0.0);
        assert!(q.is_finished());
    }

    #[test]
    fn determinations_take_clears() {
        let (mut env, _) = env_with_output();
        let mut q = queue(&mut env, "determine x; determine <integer[2]>");
        q.execute(&mut env);
        assert_eq!(q.determinations().len(), 2);
        let dets = q.take_determinations();
        assert_eq!(dets, vec![TagValue::text("x"), TagValue::Integer(2)]);
        assert!(q.determinations().is_empty());
    }
}
