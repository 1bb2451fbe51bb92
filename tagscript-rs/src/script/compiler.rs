//! Compiler: validated entries → [`CompiledRoutine`].
//!
//! Two passes over the flat entry array:
//!
//! 1. bind every entry to its [`Command`] (closers bind to the block-end
//!    command);
//! 2. in source order, resolve each argument's tag chains against the
//!    variable scope built so far, check argument types, then run the
//!    command's `pre_adapt` and `adapt` hooks.
//!
//! Variables are visible strictly after the entry that declares them, up to
//! the end of the enclosing block.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::error::ScriptError;
use crate::script::block::{self, CommandEntry};
use crate::script::command::{Command, CommandRegistry};
use crate::script::commands::BlockEndCommand;
use crate::script::lexer;
use crate::script::tags::{Binder, BoundArgument, TagRegistry, TypeId, VariableScope, DYNAMIC, OBJECT, TEXT};
use crate::script::value::TagValue;

// ── Output types ──────────────────────────────────────────────────────────────

/// What an entry does at runtime beyond calling its command: slots, jump
/// targets and declared types filled in by `pre_adapt`/`adapt`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Step {
    /// Local slot the entry writes (`var`, `foreach`).
    pub slot: Option<usize>,
    /// Jump label (skip past a block, loop exit, else-chain end).
    pub target: Option<usize>,
    /// Related entry (enclosing loop for `break`/`continue`).
    pub owner: Option<usize>,
    pub value_type: Option<TypeId>,
    /// Parsed condition for `if`/`else if`/`while`.
    pub condition: Option<crate::script::condition::Condition>,
}

/// An entry bound to its command with resolved arguments.
#[derive(Clone)]
pub struct BoundEntry {
    pub entry: CommandEntry,
    pub command: Arc<dyn Command>,
    pub args: Vec<BoundArgument>,
    pub named: BTreeMap<String, BoundArgument>,
    pub step: Step,
}

impl fmt::Debug for BoundEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundEntry")
            .field("index", &self.entry.index)
            .field("command", &self.command.name())
            .field("line", &self.entry.line)
            .field("block", &self.entry.block)
            .field("step", &self.step)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slot {
    pub name: String,
    pub value_type: TypeId,
}

/// Local variable slots of a routine, in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SlotTable {
    slots: Vec<Slot>,
}

impl SlotTable {
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn get(&self, slot: usize) -> Option<&Slot> {
        self.slots.get(slot)
    }

    /// Last slot declared with this name.
    pub fn slot_of(&self, name: &str) -> Option<usize> {
        let name = name.to_lowercase();
        self.slots.iter().rposition(|s| s.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Slot> {
        self.slots.iter()
    }
}

/// An immutable, shareable executable script.
#[derive(Debug)]
pub struct CompiledRoutine {
    pub name: String,
    pub entries: Vec<BoundEntry>,
    pub slots: SlotTable,
    /// Resumption labels: `labels[i] == i` for every entry, plus the
    /// terminal label `N`.
    pub labels: Vec<usize>,
}

impl CompiledRoutine {
    /// A routine with no entries.
    pub fn empty(name: &str) -> Self {
        CompiledRoutine {
            name: name.to_owned(),
            entries: Vec::new(),
            slots: SlotTable::default(),
            labels: vec![0],
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn terminal(&self) -> usize {
        self.entries.len()
    }

    /// Fresh local storage for one invocation.
    pub fn new_locals(&self) -> Vec<TagValue> {
        vec![TagValue::Null; self.slots.len()]
    }
}

// ── Scope ─────────────────────────────────────────────────────────────────────

struct Frame {
    /// Last entry index inside the block; `None` for the routine scope.
    end: Option<usize>,
    names: Vec<(String, usize)>,
}

/// Incrementally built variable scope, handed to `Command::adapt`.
pub struct ScopeBuilder<'a> {
    tags: &'a TagRegistry,
    slots: Vec<Slot>,
    frames: Vec<Frame>,
}

impl<'a> ScopeBuilder<'a> {
    pub fn new(tags: &'a TagRegistry) -> Self {
        ScopeBuilder {
            tags,
            slots: Vec::new(),
            frames: vec![Frame {
                end: None,
                names: Vec::new(),
            }],
        }
    }

    pub fn registry(&self) -> &TagRegistry {
        self.tags
    }

    /// Declare a new slot in the innermost scope.
    pub fn declare(&mut self, name: &str, value_type: TypeId) -> usize {
        let name = name.to_lowercase();
        let slot = self.slots.len();
        self.slots.push(Slot {
            name: name.clone(),
            value_type,
        });
        if let Some(frame) = self.frames.last_mut() {
            frame.names.push((name, slot));
        }
        slot
    }

    fn enter(&mut self, end: usize) {
        self.frames.push(Frame {
            end: Some(end),
            names: Vec::new(),
        });
    }

    /// Drop block scopes that ended before `index`.
    fn leave_finished(&mut self, index: usize) {
        while self.frames.len() > 1 {
            match self.frames.last().and_then(|f| f.end) {
                Some(end) if end < index => {
                    self.frames.pop();
                }
                _ => break,
            }
        }
    }

    fn finish(self) -> SlotTable {
        SlotTable { slots: self.slots }
    }
}

impl VariableScope for ScopeBuilder<'_> {
    fn lookup(&self, name: &str) -> Option<(usize, TypeId)> {
        let name = name.to_lowercase();
        self.frames.iter().rev().find_map(|frame| {
            frame
                .names
                .iter()
                .rev()
                .find(|(n, _)| *n == name)
                .map(|(_, slot)| (*slot, self.slots[*slot].value_type))
        })
    }
}

// ── Compiler ──────────────────────────────────────────────────────────────────

pub struct Compiler<'a> {
    tags: &'a TagRegistry,
    commands: &'a CommandRegistry,
}

impl<'a> Compiler<'a> {
    pub fn new(tags: &'a TagRegistry, commands: &'a CommandRegistry) -> Self {
        Compiler { tags, commands }
    }

    /// Compile validated entries.  `params` are pre-declared as slots
    /// `0..params.len()`, visible to every entry.
    pub fn compile(
        &self,
        name: &str,
        entries: Vec<CommandEntry>,
        params: &[(String, TypeId)],
    ) -> Result<CompiledRoutine, ScriptError> {
        let block_end: Arc<dyn Command> = Arc::new(BlockEndCommand);

        // Pass 1: bind commands.
        let mut bound = Vec::with_capacity(entries.len());
        for entry in entries {
            let command = if entry.is_closer() {
                Arc::clone(&block_end)
            } else {
                Arc::clone(self.commands.get(&entry.name).ok_or_else(|| {
                    ScriptError::command(name, entry.line, &entry.name, "unknown command")
                })?)
            };
            bound.push(BoundEntry {
                entry,
                command,
                args: Vec::new(),
                named: BTreeMap::new(),
                step: Step::default(),
            });
        }

        // Pass 2: resolve, check, adapt.
        let mut scope = ScopeBuilder::new(self.tags);
        for (param, ty) in params {
            scope.declare(param, *ty);
        }
        for i in 0..bound.len() {
            scope.leave_finished(i);

            let line = bound[i].entry.line;
            let command_name = bound[i].entry.name.clone();
            let fail = |msg: String| ScriptError::command(name, line, &command_name, msg);

            let binder = Binder {
                registry: self.tags,
                scope: &scope,
                script: name,
                line,
            };
            let args = bound[i]
                .entry
                .arguments
                .iter()
                .map(|a| binder.bind_argument(a))
                .collect::<Result<Vec<_>, _>>()?;
            let mut named = BTreeMap::new();
            for (key, arg) in &bound[i].entry.named {
                named.insert(key.clone(), binder.bind_argument(arg)?);
            }
            self.check_types(&bound[i], &args).map_err(&fail)?;
            bound[i].args = args;
            bound[i].named = named;

            let command = Arc::clone(&bound[i].command);
            command.pre_adapt(&mut bound, i).map_err(&fail)?;
            if let Some(range) = bound[i].entry.block {
                scope.enter(range.end);
            }
            command.adapt(&mut bound[i], &mut scope).map_err(&fail)?;
        }

        let labels = (0..=bound.len()).collect();
        let routine = CompiledRoutine {
            name: name.to_owned(),
            entries: bound,
            slots: scope.finish(),
            labels,
        };
        debug!(
            script = name,
            entries = routine.entries.len(),
            slots = routine.slots.len(),
            "compiled routine"
        );
        Ok(routine)
    }

    /// Positional arguments against `CommandMeta::arg_types`.  A value whose
    /// static type is text (or dynamic) is checked at runtime instead, except
    /// literals, which are checked now.
    fn check_types(&self, entry: &BoundEntry, args: &[BoundArgument]) -> Result<(), String> {
        let meta = entry.command.meta();
        for (i, (arg, wanted)) in args.iter().zip(meta.arg_types.iter()).enumerate() {
            let Some(want) = self.tags.id(wanted) else {
                return Err(format!("declares unknown argument type {wanted}"));
            };
            if want == OBJECT || self.tags.is_subtype(arg.value_type, want) {
                continue;
            }
            if let Some(text) = arg.literal_text() {
                if self.tags.coerce(want, &TagValue::Text(text.clone())).is_none() {
                    return Err(format!("argument {} ('{text}') is not a valid {wanted}", i + 1));
                }
                continue;
            }
            if arg.value_type == TEXT || arg.value_type == DYNAMIC {
                continue;
            }
            return Err(format!(
                "argument {} is {} but {wanted} is required",
                i + 1,
                self.tags.name(arg.value_type)
            ));
        }
        Ok(())
    }
}

/// Everything produced by compiling one source text: hoisted anonymous
/// scripts first, the main routine last.
#[derive(Debug)]
pub struct CompileOutput {
    pub routine: Arc<CompiledRoutine>,
    pub nested: Vec<Arc<CompiledRoutine>>,
}

/// Full pipeline: lex → hoist → assemble → validate → compile.
pub fn compile_source(
    tags: &TagRegistry,
    commands: &CommandRegistry,
    name: &str,
    source: &str,
    params: &[(String, TypeId)],
) -> Result<CompileOutput, ScriptError> {
    compile_source_at(tags, commands, name, source, params, 1)
}

fn compile_source_at(
    tags: &TagRegistry,
    commands: &CommandRegistry,
    name: &str,
    source: &str,
    params: &[(String, TypeId)],
    first_line: usize,
) -> Result<CompileOutput, ScriptError> {
    let lexed = lexer::lex_from(name, source, first_line)?;

    let mut nested = Vec::new();
    for hoisted in &lexed.hoisted {
        let inner = compile_source_at(tags, commands, &hoisted.name, &hoisted.source, &[], hoisted.line)?;
        nested.extend(inner.nested);
        nested.push(inner.routine);
    }

    let entries = block::assemble(name, &lexed.statements)?;
    block::validate(name, &entries, commands)?;
    let routine = Compiler::new(tags, commands).compile(name, entries, params)?;
    Ok(CompileOutput {
        routine: Arc::new(routine),
        nested,
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────
