//! tagscript: an embeddable command scripting language built around
//! `<base.key[modifier]>` tag expressions, with a cooperative tick-driven
//! scheduler.

pub mod cli;
pub mod config;
pub mod error;
pub mod host;
pub mod script;
pub mod var;
