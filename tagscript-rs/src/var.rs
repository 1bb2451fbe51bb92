//! Host configuration variable (CVar) store.
//!
//! CVars are string-valued, case-insensitive, and carry flags.  The script
//! core only ever reads them by name (through [`ScriptHost::cvar`]); writes
//! come from the rc file or the embedding application.
//!
//! [`ScriptHost::cvar`]: crate::host::ScriptHost::cvar

use std::collections::HashMap;

/// Per-variable flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CVarFlags {
    /// Rejects [`CVarStore::set`]; only [`CVarStore::define`] may change it.
    pub read_only: bool,
    /// Hidden from listings.
    pub internal: bool,
}

impl CVarFlags {
    pub const READ_ONLY: CVarFlags = CVarFlags { read_only: true, internal: false };
    pub const INTERNAL: CVarFlags = CVarFlags { read_only: false, internal: true };
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CVar {
    pub value: String,
    pub flags: CVarFlags,
}

/// Name → value store with flags.
#[derive(Debug, Clone, Default)]
pub struct CVarStore {
    vars: HashMap<String, CVar>,
}

impl CVarStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set an existing or new variable.  Fails if it is read-only.
    pub fn set(&mut self, name: &str, value: impl Into<String>) -> Result<(), String> {
        let key = name.to_lowercase();
        match self.vars.get_mut(&key) {
            Some(var) if var.flags.read_only => Err(format!("cvar '{name}' is read-only")),
            Some(var) => {
                var.value = value.into();
                Ok(())
            }
            None => {
                self.vars.insert(
                    key,
                    CVar {
                        value: value.into(),
                        flags: CVarFlags::default(),
                    },
                );
                Ok(())
            }
        }
    }

    /// Create or replace a variable with explicit flags, ignoring read-only.
    pub fn define(&mut self, name: &str, value: impl Into<String>, flags: CVarFlags) {
        self.vars.insert(
            name.to_lowercase(),
            CVar {
                value: value.into(),
                flags,
            },
        );
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(&name.to_lowercase()).map(|v| v.value.as_str())
    }

    /// Get the value of a variable parsed as an integer.
    pub fn get_int(&self, name: &str) -> Option<i64> {
        self.get(name)?.trim().parse().ok()
    }

    pub fn flags(&self, name: &str) -> Option<CVarFlags> {
        self.vars.get(&name.to_lowercase()).map(|v| v.flags)
    }

    /// Remove a variable.  Returns `true` if it existed.
    pub fn unset(&mut self, name: &str) -> bool {
        self.vars.remove(&name.to_lowercase()).is_some()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.vars.contains_key(&name.to_lowercase())
    }

    /// Visible (non-internal) variables, sorted by name.
    pub fn visible(&self) -> Vec<(&str, &str)> {
        let mut out: Vec<(&str, &str)> = self
            .vars
            .iter()
            .filter(|(_, v)| !v.flags.internal)
            .map(|(k, v)| (k.as_str(), v.value.as_str()))
            .collect();
        out.sort_unstable();
        out
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
