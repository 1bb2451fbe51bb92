//! The engine: owns the registries, the host, loaded scripts, events and the
//! active queue list.
//!
//! Split in two so commands and tag bases can reach shared state while the
//! engine iterates its queues:
//!
//! - [`Environment`] is everything a running entry may touch (registries,
//!   host, script table, queues spawned this pass).
//! - [`Engine`] adds the active queue list and the event table, and is the
//!   public API.
//!
//! # Driving the engine
//!
//! Nothing runs in the background.  The embedder calls [`Engine::tick`] at
//! its own pace with the elapsed time:
//!
//! ```no_run
//! use tagscript::host::ConsoleHost;
//! use tagscript::script::Engine;
//! use tagscript::var::CVarStore;
//!
//! let mut engine = Engine::new(Box::new(ConsoleHost::new(CVarStore::new())));
//! engine.run_source("hello", "echo hi; wait 1; echo bye").unwrap();
//! while !engine.is_idle() {
//!     std::thread::sleep(std::time::Duration::from_millis(50));
//!     engine.tick(0.05);
//! }
//! ```

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::error::{EngineError, ScriptError, TagError};
use crate::host::{BufferHost, ScriptHost, Severity};
use crate::script::args::Argument;
use crate::script::block::CommandEntry;
use crate::script::command::CommandRegistry;
use crate::script::compiler::{compile_source, CompiledRoutine, Compiler};
use crate::script::events::{EventHandler, EventTable};
use crate::script::queue::{CommandQueue, QueueId, WaitHandle};
use crate::script::runnable::Runnable;
use crate::script::tags::{TagRegistry, TypeId};
use crate::script::value::TagValue;

// ── Environment ───────────────────────────────────────────────────────────────

pub struct Environment {
    pub tags: Arc<TagRegistry>,
    pub commands: Arc<CommandRegistry>,
    pub host: Box<dyn ScriptHost>,
    pub config: EngineConfig,
    scripts: HashMap<String, Arc<CompiledRoutine>>,
    /// Queues started during the current pass that did not finish
    /// synchronously.  The engine adopts them.
    spawned: Vec<CommandQueue>,
    next_queue_id: QueueId,
    call_depth: usize,
}

impl Environment {
    pub fn new(
        tags: TagRegistry,
        commands: CommandRegistry,
        host: Box<dyn ScriptHost>,
        config: EngineConfig,
    ) -> Self {
        Environment {
            tags: Arc::new(tags),
            commands: Arc::new(commands),
            host,
            config,
            scripts: HashMap::new(),
            spawned: Vec::new(),
            next_queue_id: 1,
            call_depth: 0,
        }
    }

    /// Standard libraries, a [`BufferHost`] and default settings.
    pub fn standard() -> Self {
        Self::with_host(Box::new(BufferHost::new()))
    }

    /// Standard libraries and default settings over `host`.
    pub fn with_host(host: Box<dyn ScriptHost>) -> Self {
        Environment::new(
            TagRegistry::standard(),
            CommandRegistry::standard(),
            host,
            EngineConfig::default(),
        )
    }

    // -- scripts ----------------------------------------------------------------

    pub fn script(&self, name: &str) -> Option<Arc<CompiledRoutine>> {
        self.scripts.get(&name.to_lowercase()).cloned()
    }

    /// Register (or replace) a routine under its own name.
    pub fn register_script(&mut self, routine: Arc<CompiledRoutine>) {
        debug!(script = %routine.name, "registered script");
        self.scripts.insert(routine.name.to_lowercase(), routine);
    }

    pub fn script_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.scripts.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Compile `source`, registering any hoisted anonymous scripts.  The
    /// returned routine itself is not registered.
    pub fn compile(&mut self, name: &str, source: &str) -> Result<Arc<CompiledRoutine>, ScriptError> {
        self.compile_with_params(name, source, &[])
    }

    pub fn compile_with_params(
        &mut self,
        name: &str,
        source: &str,
        params: &[(String, TypeId)],
    ) -> Result<Arc<CompiledRoutine>, ScriptError> {
        let output = compile_source(&self.tags, &self.commands, name, source, params)?;
        for nested in output.nested {
            self.register_script(nested);
        }
        Ok(output.routine)
    }

    /// Compile and register under `name`.
    pub fn compile_and_register(&mut self, name: &str, source: &str) -> Result<Arc<CompiledRoutine>, ScriptError> {
        let routine = self.compile(name, source)?;
        self.register_script(Arc::clone(&routine));
        Ok(routine)
    }

    // -- queues -----------------------------------------------------------------

    /// A fresh idle queue at the configured verbosity.
    pub fn new_queue(&mut self, runnable: Runnable) -> CommandQueue {
        let id = self.next_queue_id;
        self.next_queue_id += 1;
        CommandQueue::new(id, runnable, self.config.debug)
    }

    /// Hand an unfinished queue to the engine's active list.
    pub fn spawn(&mut self, queue: CommandQueue) {
        self.spawned.push(queue);
    }

    pub fn take_spawned(&mut self) -> Vec<CommandQueue> {
        std::mem::take(&mut self.spawned)
    }

    fn enter_call(&mut self) -> Result<(), TagError> {
        if self.call_depth >= self.config.max_call_depth {
            warn!(depth = self.call_depth, "call depth limit reached");
            return Err(TagError::CallDepth(self.config.max_call_depth));
        }
        self.call_depth += 1;
        Ok(())
    }

    /// Start `runnable` in a new queue and execute its first tick.  `handle`
    /// is finished when the queue completes.  Unfinished queues are spawned.
    pub fn start(&mut self, runnable: Runnable, handle: Option<WaitHandle>) -> Result<QueueId, TagError> {
        self.enter_call()?;
        let mut queue = self.new_queue(runnable);
        if let Some(handle) = handle {
            queue.on_complete(Box::new(move |_| handle.finish()));
        }
        queue.execute(self);
        self.call_depth -= 1;

        let id = queue.id();
        if !queue.is_finished() {
            self.spawn(queue);
        }
        Ok(id)
    }

    /// Run a registered script synchronously and return what it determined
    /// before its first suspension.  The rest of it, if any, keeps running
    /// on the active list.
    pub fn call_script(&mut self, name: &str) -> Result<Vec<TagValue>, TagError> {
        let routine = self
            .script(name)
            .ok_or_else(|| TagError::UnknownScript(name.to_owned()))?;
        self.call_routine(routine)
    }

    pub fn call_routine(&mut self, routine: Arc<CompiledRoutine>) -> Result<Vec<TagValue>, TagError> {
        self.enter_call()?;
        let mut queue = self.new_queue(Runnable::new(routine));
        queue.execute(self);
        self.call_depth -= 1;

        let determinations = queue.take_determinations();
        if !queue.is_finished() {
            self.spawn(queue);
        }
        Ok(determinations)
    }

    pub fn output(&mut self, severity: Severity, text: &str) {
        self.host.output(severity, text);
    }
}

// ── Engine ────────────────────────────────────────────────────────────────────

/// Script name for a file path: its stem.
pub fn script_name(path: &str) -> String {
    Path::new(path)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_owned())
}

pub struct Engine {
    env: Environment,
    active: Vec<CommandQueue>,
    events: EventTable,
}

impl Engine {
    pub fn new(host: Box<dyn ScriptHost>) -> Self {
        Self::with_config(host, EngineConfig::default())
    }

    pub fn with_config(host: Box<dyn ScriptHost>, config: EngineConfig) -> Self {
        Self::with_registries(TagRegistry::standard(), CommandRegistry::standard(), host, config)
    }

    /// Custom tag types/bases or commands.
    pub fn with_registries(
        tags: TagRegistry,
        commands: CommandRegistry,
        host: Box<dyn ScriptHost>,
        config: EngineConfig,
    ) -> Self {
        Engine {
            env: Environment::new(tags, commands, host, config),
            active: Vec::new(),
            events: EventTable::new(),
        }
    }

    pub fn env(&self) -> &Environment {
        &self.env
    }

    pub fn env_mut(&mut self) -> &mut Environment {
        &mut self.env
    }

    pub fn events(&self) -> &EventTable {
        &self.events
    }

    // -- loading ----------------------------------------------------------------

    /// Compile without registering (hoisted anonymous scripts are registered).
    pub fn compile(&mut self, name: &str, source: &str) -> Result<Arc<CompiledRoutine>, ScriptError> {
        self.env.compile(name, source)
    }

    /// Compile and register, failing on any compile error.
    pub fn try_load_script(&mut self, name: &str, source: &str) -> Result<Arc<CompiledRoutine>, ScriptError> {
        self.env.compile_and_register(name, source)
    }

    /// Compile and register.  A script that fails to compile is reported to
    /// the host and replaced by a routine whose only entry reports the
    /// diagnostic when run.
    pub fn load_script(&mut self, name: &str, source: &str) -> Arc<CompiledRoutine> {
        match self.env.compile_and_register(name, source) {
            Ok(routine) => routine,
            Err(err) => {
                warn!(script = name, line = err.line(), error = %err, "script failed to compile");
                self.env.output(Severity::Bad, &err.to_string());
                let routine = Arc::new(self.error_routine(name, &err));
                self.env.register_script(Arc::clone(&routine));
                routine
            }
        }
    }

    fn error_routine(&self, name: &str, err: &ScriptError) -> CompiledRoutine {
        let entry = CommandEntry::new("error", vec![Argument::literal(&err.to_string())], err.line());
        Compiler::new(&self.env.tags, &self.env.commands)
            .compile(name, vec![entry], &[])
            .unwrap_or_else(|_| CompiledRoutine::empty(name))
    }

    /// Read a script through the host and load it under its file stem.
    pub fn load_script_file(&mut self, path: &str) -> Result<Arc<CompiledRoutine>, EngineError> {
        let source = self.env.host.read_script(path).map_err(|message| EngineError::Read {
            path: path.to_owned(),
            message,
        })?;
        Ok(self.load_script(&script_name(path), &source))
    }

    pub fn script(&self, name: &str) -> Option<Arc<CompiledRoutine>> {
        self.env.script(name)
    }

    // -- running ----------------------------------------------------------------

    /// Start a registered script.  Returns the queue id; the queue is on the
    /// active list only if it did not finish synchronously.
    pub fn run(&mut self, name: &str) -> Result<QueueId, EngineError> {
        let routine = self
            .env
            .script(name)
            .ok_or_else(|| EngineError::UnknownScript(name.to_owned()))?;
        self.run_routine(routine)
    }

    pub fn run_routine(&mut self, routine: Arc<CompiledRoutine>) -> Result<QueueId, EngineError> {
        info!(script = %routine.name, "run");
        let id = self.env.start(Runnable::new(routine), None)?;
        self.adopt_spawned();
        Ok(id)
    }

    /// Compile, register and start.
    pub fn run_source(&mut self, name: &str, source: &str) -> Result<QueueId, EngineError> {
        let routine = self.env.compile_and_register(name, source)?;
        self.run_routine(routine)
    }

    /// Run a registered script synchronously and return its determinations.
    pub fn call(&mut self, name: &str) -> Result<Vec<TagValue>, EngineError> {
        let routine = self
            .env
            .script(name)
            .ok_or_else(|| EngineError::UnknownScript(name.to_owned()))?;
        let determinations = self.env.call_routine(routine)?;
        self.adopt_spawned();
        Ok(determinations)
    }

    fn adopt_spawned(&mut self) {
        let spawned = self.env.take_spawned();
        if !spawned.is_empty() {
            debug!(count = spawned.len(), "adopting queues");
            self.active.extend(spawned);
        }
    }

    // -- scheduling -------------------------------------------------------------

    /// One scheduling pass: tick every active queue once with `delta`
    /// seconds, drop finished queues, adopt queues started during the pass.
    pub fn tick(&mut self, delta: f64) {
        let mut active = std::mem::take(&mut self.active);
        for queue in active.iter_mut() {
            queue.tick(&mut self.env, delta);
        }
        active.retain(|q| !q.is_finished());
        active.extend(self.env.take_spawned());
        self.active = active;
    }

    pub fn queue(&self, id: QueueId) -> Option<&CommandQueue> {
        self.active.iter().find(|q| q.id() == id)
    }

    /// Stop an active queue.  Returns `false` if no such queue is active.
    pub fn stop(&mut self, id: QueueId) -> bool {
        match self.active.iter_mut().find(|q| q.id() == id) {
            Some(queue) => {
                queue.stop();
                true
            }
            None => false,
        }
    }

    pub fn stop_all(&mut self) {
        for queue in &mut self.active {
            queue.stop();
        }
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn is_idle(&self) -> bool {
        self.active.is_empty()
    }

    // -- events -----------------------------------------------------------------

    /// Declare an event with `(name, type)` parameters.
    pub fn register_event(&mut self, name: &str, params: &[(&str, &str)]) -> Result<(), EngineError> {
        let mut resolved = Vec::with_capacity(params.len());
        for (param, type_name) in params {
            let ty = self
                .env
                .tags
                .id(type_name)
                .ok_or_else(|| EngineError::UnknownType((*type_name).to_owned()))?;
            resolved.push((param.to_lowercase(), ty));
        }
        if self.events.register(name, resolved) {
            debug!(event = name, "event redeclared");
        }
        Ok(())
    }

    /// Compile `source` as a handler of `event`, with the event's parameters
    /// visible as variables.
    pub fn add_event_handler(
        &mut self,
        event: &str,
        name: &str,
        source: &str,
    ) -> Result<Arc<CompiledRoutine>, EngineError> {
        let params = self
            .events
            .get(event)
            .ok_or_else(|| EngineError::UnknownEvent(event.to_owned()))?
            .params
            .clone();
        let routine = self.env.compile_with_params(name, source, &params)?;
        self.events.add_handler(
            event,
            EventHandler {
                name: name.to_owned(),
                routine: Arc::clone(&routine),
            },
        );
        Ok(routine)
    }

    /// Run every handler of `event` with `values` as its parameters.  Returns
    /// the determinations made before each handler's first suspension.
    pub fn fire_event(&mut self, event: &str, values: Vec<TagValue>) -> Result<Vec<TagValue>, EngineError> {
        let ev = self
            .events
            .get(event)
            .ok_or_else(|| EngineError::UnknownEvent(event.to_owned()))?;
        if ev.params.len() != values.len() {
            return Err(EngineError::EventArity {
                event: event.to_owned(),
                expected: ev.params.len(),
                got: values.len(),
            });
        }

        let mut seeded = Vec::with_capacity(values.len());
        for ((_, ty), value) in ev.params.iter().zip(values) {
            seeded.push(self.env.tags.coerce_to(*ty, value)?);
        }
        let handlers: Vec<Arc<CompiledRoutine>> = ev.handlers.iter().map(|h| Arc::clone(&h.routine)).collect();
        debug!(event, handlers = handlers.len(), "firing event");

        let mut determinations = Vec::new();
        for routine in handlers {
            let mut runnable = Runnable::new(routine);
            for (slot, value) in seeded.iter().enumerate() {
                runnable.set_local(slot, value.clone());
            }
            let mut queue = self.env.new_queue(runnable);
            queue.execute(&mut self.env);
            determinations.extend(queue.take_determinations());
            if !queue.is_finished() {
                self.active.push(queue);
            }
        }
        self.adopt_spawned();
        Ok(determinations)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
