//! Named script events.
//!
//! An event declares typed parameters; each handler is a routine compiled
//! with those parameters pre-declared as its first local slots.  Firing an
//! event runs every handler in registration order, each in its own queue.
//!
//! Event names are case-insensitive.

use std::collections::HashMap;
use std::sync::Arc;

use crate::script::compiler::CompiledRoutine;
use crate::script::tags::TypeId;

/// One registered handler.
#[derive(Debug, Clone)]
pub struct EventHandler {
    pub name: String,
    pub routine: Arc<CompiledRoutine>,
}

#[derive(Debug, Clone)]
pub struct Event {
    pub name: String,
    pub params: Vec<(String, TypeId)>,
    pub handlers: Vec<EventHandler>,
}

/// Event name → definition and handlers.
#[derive(Debug, Default)]
pub struct EventTable {
    events: HashMap<String, Event>,
}

impl EventTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare an event.  Redeclaring replaces the parameter list and drops
    /// existing handlers (they were compiled against the old parameters).
    /// Returns `true` if the event already existed.
    pub fn register(&mut self, name: &str, params: Vec<(String, TypeId)>) -> bool {
        let key = name.to_ascii_lowercase();
        let event = Event {
            name: key.clone(),
            params,
            handlers: Vec::new(),
        };
        self.events.insert(key, event).is_some()
    }

    pub fn get(&self, name: &str) -> Option<&Event> {
        self.events.get(&name.to_ascii_lowercase())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Append a handler.  A handler with the same name is replaced in place.
    /// Returns `false` if the event does not exist.
    pub fn add_handler(&mut self, event: &str, handler: EventHandler) -> bool {
        let Some(ev) = self.events.get_mut(&event.to_ascii_lowercase()) else {
            return false;
        };
        match ev.handlers.iter_mut().find(|h| h.name == handler.name) {
            Some(existing) => *existing = handler,
            None => ev.handlers.push(handler),
        }
        true
    }

    /// Remove a handler by name.  Returns `true` if one was removed.
    pub fn remove_handler(&mut self, event: &str, name: &str) -> bool {
        let Some(ev) = self.events.get_mut(&event.to_ascii_lowercase()) else {
            return false;
        };
        let before = ev.handlers.len();
        ev.handlers.retain(|h| h.name != name);
        ev.handlers.len() != before
    }

    /// Registered event names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.events.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::tags::TEXT;

    fn handler(name: &str) -> EventHandler {
        EventHandler {
            name: name.to_owned(),
            routine: Arc::new(CompiledRoutine::empty(name)),
        }
    }

    #[test]
    fn case_insensitive_names() {
        let mut t = EventTable::new();
        assert!(!t.register("Player_Joins", vec![("who".into(), TEXT)]));
        assert!(t.contains("PLAYER_JOINS"));
        assert_eq!(t.names(), vec!["player_joins"]);
    }

    #[test]
    fn handlers_keep_registration_order() {
        let mut t = EventTable::new();
        t.register("tick", Vec::new());
        assert!(t.add_handler("tick", handler("b")));
        assert!(t.add_handler("tick", handler("a")));
        assert!(t.add_handler("tick", handler("b")));
        let names: Vec<&str> = t.get("tick").unwrap().handlers.iter().map(|h| h.name.as_str()).collect();
        assert_eq!(names, vec!["b", "a"]);
    }

    #[test]
    fn unknown_event_rejects_handler() {
        let mut t = EventTable::new();
        assert!(!t.add_handler("nope", handler("x")));
        assert!(!t.remove_handler("nope", "x"));
    }

    #[test]
    fn redeclare_drops_handlers() {
        let mut t = EventTable::new();
        t.register("e", Vec::new());
        t.add_handler("e", handler("h"));
        assert!(t.register("e", vec![("x".into(), TEXT)]));
        assert!(t.get("e").unwrap().handlers.is_empty());
    }

    #[test]
    fn remove_handler() {
        let mut t = EventTable::new();
        t.register("e", Vec::new());
        t.add_handler("e", handler("h"));
        assert!(t.remove_handler("e", "h"));
        assert!(!t.remove_handler("e", "h"));
    }
}
