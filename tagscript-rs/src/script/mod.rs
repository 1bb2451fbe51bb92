//! The tagscript language.
//!
//! A script is compiled once and then run any number of times, each run in
//! its own [`CommandQueue`]:
//!
//! - [`lexer`] splits source into statements and hoists anonymous `<{ … }>`
//!   scripts into `<function[name__anonN]>` calls
//! - [`block`] parses statements into command entries and flattens blocks
//! - [`args`] parses arguments and the `<base.key[modifier]>` tags in them
//! - [`tags`] holds the type registry and binds tags to handlers
//! - [`compiler`] binds everything into a [`CompiledRoutine`]
//! - [`queue`] and [`engine`] run routines cooperatively, one tick at a time
//!
//! # Quick start
//!
//! ```rust
//! use tagscript::host::SharedBuffer;
//! use tagscript::script::Engine;
//!
//! let out = SharedBuffer::default();
//! let mut engine = Engine::new(Box::new(out.clone()));
//! engine.run_source("demo", "var x = 6; echo <x.multiply[7]>").unwrap();
//! assert_eq!(out.plain(), vec!["42"]);
//! ```

pub mod args;
pub mod block;
pub mod command;
pub mod commands;
pub mod compiler;
pub mod condition;
pub mod engine;
pub mod events;
pub mod lexer;
pub mod queue;
pub mod runnable;
pub mod tags;
pub mod value;

// Re-exports for convenience.
pub use command::{Command, CommandMeta, CommandRegistry, ExecContext};
pub use compiler::CompiledRoutine;
pub use engine::{Engine, Environment};
pub use queue::{CommandQueue, QueueId, QueueState, WaitHandle};
pub use runnable::Runnable;
pub use tags::TagRegistry;
pub use value::TagValue;
