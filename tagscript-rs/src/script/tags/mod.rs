//! Tag type system.
//!
//! A [`TagRegistry`] holds the statically registered [`TagType`]s (each with a
//! parent link, a coercion function and a table of named segment
//! [`Handler`]s) and the [`TagBase`]s that may start a chain.  Chains are
//! bound against it at compile time ([`bind`]) and evaluated at runtime.
//!
//! Handler lookup for a key on type `T`: `T.key`, then `T._`, then the same
//! two on `T`'s parent, and so on up to `object`.

pub mod bases;
pub mod bind;
pub mod types;

use std::collections::HashMap;
use std::fmt;

use crate::error::TagError;
use crate::script::value::TagValue;

pub use bind::{Binder, BoundArgument, BoundTag, TagContext, VariableScope};

pub type TypeId = usize;

/// Root of the hierarchy; accepts any value.
pub const OBJECT: TypeId = 0;
/// Placeholder for "resolved at runtime from the actual value".
pub const DYNAMIC: TypeId = 1;
pub const NULL: TypeId = 2;
pub const TEXT: TypeId = 3;

/// Converts a value into a type, or refuses.
pub type CoerceFn = fn(&TagValue) -> Option<TagValue>;
/// A segment handler: `value.key[modifier]` → new value.
pub type HandlerFn = fn(&HandlerCall<'_>) -> Result<TagValue, TagError>;
/// A base: `base[modifier]` → initial chain value.
pub type BaseFn = fn(Option<TagValue>, &mut TagContext<'_>) -> Result<TagValue, TagError>;
/// Computes a special handler's result type from its binding site.
pub type SpecialFn = fn(&SpecialSite<'_>) -> Result<TypeId, String>;

/// What a handler or base returns.
#[derive(Clone, Copy)]
pub enum Returns {
    Type(&'static str),
    Special(SpecialFn),
}

/// Whether a handler takes a `[modifier]`, and which type it is coerced to.
/// The type `"object"` means no coercion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModifierUse {
    None,
    Optional(&'static str),
    Required(&'static str),
}

impl ModifierUse {
    pub fn type_name(&self) -> Option<&'static str> {
        match self {
            ModifierUse::None => None,
            ModifierUse::Optional(t) | ModifierUse::Required(t) => Some(t),
        }
    }
}

/// Arguments passed to a [`HandlerFn`].  The modifier has already been
/// coerced to the handler's declared modifier type.
pub struct HandlerCall<'a> {
    pub value: &'a TagValue,
    pub modifier: Option<&'a TagValue>,
    pub key: &'a str,
    pub registry: &'a TagRegistry,
}

impl HandlerCall<'_> {
    pub fn modifier(&self) -> Result<&TagValue, TagError> {
        self.modifier
            .ok_or_else(|| TagError::Handler(format!("'{}' requires a modifier", self.key)))
    }

    pub fn modifier_text(&self) -> Result<String, TagError> {
        Ok(self.modifier()?.to_string())
    }

    pub fn modifier_integer(&self) -> Result<i64, TagError> {
        let m = self.modifier()?;
        m.as_integer().ok_or_else(|| coerce_error(m, "integer"))
    }

    pub fn modifier_number(&self) -> Result<f64, TagError> {
        let m = self.modifier()?;
        m.as_number().ok_or_else(|| coerce_error(m, "number"))
    }

    pub fn modifier_bool(&self) -> Result<bool, TagError> {
        let m = self.modifier()?;
        match m {
            TagValue::Boolean(b) => Ok(*b),
            other => other.as_bool().ok_or_else(|| coerce_error(other, "boolean")),
        }
    }

    pub fn text(&self) -> String {
        self.value.to_string()
    }

    pub fn number(&self) -> Result<f64, TagError> {
        self.value
            .as_number()
            .ok_or_else(|| coerce_error(self.value, "number"))
    }

    pub fn integer(&self) -> Result<i64, TagError> {
        self.value
            .as_integer()
            .ok_or_else(|| coerce_error(self.value, "integer"))
    }
}

pub fn coerce_error(value: &TagValue, type_name: &str) -> TagError {
    TagError::Coerce {
        value: value.to_string(),
        type_name: type_name.to_owned(),
    }
}

/// Binding-time view handed to a [`SpecialFn`].
pub struct SpecialSite<'a> {
    pub registry: &'a TagRegistry,
    /// The modifier's text, when it is a literal.
    pub modifier: Option<&'a str>,
}

/// A named segment handler.
#[derive(Clone, Copy)]
pub struct Handler {
    pub name: &'static str,
    pub modifier: ModifierUse,
    pub returns: Returns,
    pub func: HandlerFn,
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handler")
            .field("name", &self.name)
            .field("modifier", &self.modifier)
            .finish()
    }
}

/// A chain-starting base.
#[derive(Clone, Copy)]
pub struct TagBase {
    pub name: &'static str,
    pub modifier: ModifierUse,
    pub returns: Returns,
    pub func: BaseFn,
}

/// A type: parent, coercion, handler table.
pub struct TagType {
    pub name: &'static str,
    pub parent: Option<&'static str>,
    pub coerce: CoerceFn,
    handlers: HashMap<&'static str, Handler>,
}

impl TagType {
    pub fn new(name: &'static str, parent: Option<&'static str>, coerce: CoerceFn) -> Self {
        TagType {
            name,
            parent,
            coerce,
            handlers: HashMap::new(),
        }
    }

    /// Add a handler with a fixed result type.
    pub fn handler(
        mut self,
        name: &'static str,
        modifier: ModifierUse,
        returns: &'static str,
        func: HandlerFn,
    ) -> Self {
        self.handlers.insert(
            name,
            Handler {
                name,
                modifier,
                returns: Returns::Type(returns),
                func,
            },
        );
        self
    }

    /// Add a handler whose result type is computed at the binding site.
    pub fn special(
        mut self,
        name: &'static str,
        modifier: ModifierUse,
        returns: SpecialFn,
        func: HandlerFn,
    ) -> Self {
        self.handlers.insert(
            name,
            Handler {
                name,
                modifier,
                returns: Returns::Special(returns),
                func,
            },
        );
        self
    }

    pub fn get(&self, key: &str) -> Option<&Handler> {
        self.handlers.get(key)
    }

    pub fn handler_names(&self) -> impl Iterator<Item = &&'static str> {
        self.handlers.keys()
    }
}

// ── Registry ──────────────────────────────────────────────────────────────────

/// All known types and bases.  Built once per engine, then shared read-only.
pub struct TagRegistry {
    types: Vec<TagType>,
    ids: HashMap<&'static str, TypeId>,
    bases: HashMap<&'static str, TagBase>,
}

impl Default for TagRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TagRegistry {
    /// A registry holding only the core types (`object`, `dynamic`, `null`,
    /// `text`) with no handlers.
    pub fn new() -> Self {
        let mut registry = TagRegistry {
            types: Vec::new(),
            ids: HashMap::new(),
            bases: HashMap::new(),
        };
        registry.register_type(TagType::new("object", None, |v| Some(v.clone())));
        registry.register_type(TagType::new("dynamic", None, |v| Some(v.clone())));
        registry.register_type(TagType::new("null", Some("object"), types::coerce_null));
        registry.register_type(TagType::new("text", Some("object"), types::coerce_text));
        registry
    }

    /// The standard tag library.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        types::register(&mut registry);
        bases::register(&mut registry);
        registry
    }

    /// Register a type, replacing (and keeping the id of) one with the same name.
    pub fn register_type(&mut self, ty: TagType) -> TypeId {
        match self.ids.get(ty.name) {
            Some(&id) => {
                self.types[id] = ty;
                id
            }
            None => {
                let id = self.types.len();
                self.ids.insert(ty.name, id);
                self.types.push(ty);
                id
            }
        }
    }

    pub fn register_base(&mut self, base: TagBase) {
        self.bases.insert(base.name, base);
    }

    pub fn id(&self, name: &str) -> Option<TypeId> {
        self.ids.get(name.to_lowercase().as_str()).copied()
    }

    pub fn name(&self, id: TypeId) -> &'static str {
        self.types.get(id).map_or("object", |t| t.name)
    }

    pub fn tag_type(&self, id: TypeId) -> Option<&TagType> {
        self.types.get(id)
    }

    pub fn base(&self, name: &str) -> Option<&TagBase> {
        self.bases.get(name)
    }

    pub fn parent(&self, id: TypeId) -> Option<TypeId> {
        self.types.get(id)?.parent.and_then(|p| self.ids.get(p).copied())
    }

    /// Handler lookup walk; returns the type that owns the handler.
    pub fn find_handler(&self, ty: TypeId, key: &str) -> Option<(TypeId, Handler)> {
        let mut current = Some(ty);
        for _ in 0..=self.types.len() {
            let id = current?;
            let tag_type = self.types.get(id)?;
            if let Some(h) = tag_type.get(key).or_else(|| tag_type.get("_")) {
                return Some((id, *h));
            }
            current = self.parent(id);
        }
        None
    }

    /// Does `ty` equal `of` or descend from it?  Everything is an `object`.
    pub fn is_subtype(&self, ty: TypeId, of: TypeId) -> bool {
        if of == OBJECT {
            return true;
        }
        let mut current = Some(ty);
        for _ in 0..=self.types.len() {
            match current {
                Some(id) if id == of => return true,
                Some(id) => current = self.parent(id),
                None => return false,
            }
        }
        false
    }

    /// Type a runtime value naturally belongs to.
    pub fn runtime_type(&self, value: &TagValue) -> TypeId {
        self.id(value.type_name()).unwrap_or(OBJECT)
    }

    pub fn coerce(&self, ty: TypeId, value: &TagValue) -> Option<TagValue> {
        if ty == OBJECT || ty == DYNAMIC {
            return Some(value.clone());
        }
        (self.types.get(ty)?.coerce)(value)
    }

    /// [`coerce`](Self::coerce), failing with a [`TagError::Coerce`].
    pub fn coerce_to(&self, ty: TypeId, value: TagValue) -> Result<TagValue, TagError> {
        if ty == OBJECT || ty == DYNAMIC {
            return Ok(value);
        }
        self.coerce(ty, &value)
            .ok_or_else(|| coerce_error(&value, self.name(ty)))
    }

    /// Is `key` a named handler on any registered type?  The universal `_`
    /// handler does not count.
    pub fn any_type_has(&self, key: &str) -> bool {
        key != "_" && self.types.iter().any(|t| t.get(key).is_some())
    }

    /// Check every handler's declared result and modifier type names.
    pub fn check(&self) -> Result<(), String> {
        let known = |name: &str| self.id(name).is_some();
        for ty in &self.types {
            if let Some(parent) = ty.parent {
                if !known(parent) {
                    return Err(format!("type {} has unknown parent {parent}", ty.name));
                }
            }
            for h in ty.handlers.values() {
                if let Returns::Type(r) = h.returns {
                    if !known(r) {
                        return Err(format!("{}.{} returns unknown type {r}", ty.name, h.name));
                    }
                }
                if let Some(m) = h.modifier.type_name() {
                    if !known(m) {
                        return Err(format!("{}.{} takes unknown type {m}", ty.name, h.name));
                    }
                }
            }
        }
        for base in self.bases.values() {
            if let Returns::Type(r) = base.returns {
                if !known(r) {
                    return Err(format!("base {} returns unknown type {r}", base.name));
                }
            }
        }
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
