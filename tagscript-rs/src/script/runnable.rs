//! One invocation's mutable state over a shared [`CompiledRoutine`].

use std::fmt;
use std::sync::Arc;

use crate::script::compiler::CompiledRoutine;
use crate::script::value::TagValue;

/// Invoked once when the owning queue finishes (or is stopped), with the
/// queue's determinations.
pub type CompletionCallback = Box<dyn FnOnce(&[TagValue]) + Send>;

/// Per-entry state kept between ticks by loop commands.
#[derive(Debug, Clone, PartialEq)]
pub enum EntryState {
    /// `repeat`: 1-based pass number out of `total`.
    Counter { current: i64, total: i64 },
    /// `foreach`: remaining items and the current position.
    Iteration { items: Vec<TagValue>, position: usize },
}

pub struct Runnable {
    routine: Arc<CompiledRoutine>,
    locals: Vec<TagValue>,
    index: usize,
    aux: Vec<Option<EntryState>>,
    on_complete: Option<CompletionCallback>,
}

impl fmt::Debug for Runnable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runnable")
            .field("routine", &self.routine.name)
            .field("index", &self.index)
            .field("locals", &self.locals)
            .field("has_callback", &self.on_complete.is_some())
            .finish()
    }
}

impl Runnable {
    pub fn new(routine: Arc<CompiledRoutine>) -> Self {
        Runnable {
            locals: routine.new_locals(),
            aux: vec![None; routine.len()],
            index: 0,
            on_complete: None,
            routine,
        }
    }

    /// An independent copy: locals cloned by value, fresh auxiliary state,
    /// index at label 0, no callback.
    pub fn duplicate(&self) -> Self {
        Runnable {
            routine: Arc::clone(&self.routine),
            locals: self.locals.clone(),
            index: 0,
            aux: vec![None; self.routine.len()],
            on_complete: None,
        }
    }

    pub fn routine(&self) -> &Arc<CompiledRoutine> {
        &self.routine
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn set_index(&mut self, label: usize) {
        self.index = label.min(self.routine.terminal());
    }

    /// Alias of [`set_index`](Self::set_index), as used by control flow.
    pub fn jump(&mut self, label: usize) {
        self.set_index(label);
    }

    pub fn is_done(&self) -> bool {
        self.index >= self.routine.terminal()
    }

    pub fn locals(&self) -> &[TagValue] {
        &self.locals
    }

    pub fn local(&self, slot: usize) -> Option<&TagValue> {
        self.locals.get(slot)
    }

    pub fn set_local(&mut self, slot: usize, value: TagValue) {
        if let Some(cell) = self.locals.get_mut(slot) {
            *cell = value;
        }
    }

    pub fn slot_of(&self, name: &str) -> Option<usize> {
        self.routine.slots.slot_of(name)
    }

    pub fn aux(&self, entry: usize) -> Option<&EntryState> {
        self.aux.get(entry)?.as_ref()
    }

    pub fn aux_mut(&mut self, entry: usize) -> Option<&mut EntryState> {
        self.aux.get_mut(entry)?.as_mut()
    }

    pub fn set_aux(&mut self, entry: usize, state: EntryState) {
        if let Some(cell) = self.aux.get_mut(entry) {
            *cell = Some(state);
        }
    }

    pub fn clear_aux(&mut self, entry: usize) {
        if let Some(cell) = self.aux.get_mut(entry) {
            *cell = None;
        }
    }

    pub fn on_complete(&mut self, callback: CompletionCallback) {
        self.on_complete = Some(callback);
    }

    pub fn take_callback(&mut self) -> Option<CompletionCallback> {
        self.on_complete.take()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
