//! Binding tag chains at compile time and evaluating them at runtime.

use std::sync::Arc;

use tracing::trace;

use super::{
    BaseFn, Handler, ModifierUse, Returns, SpecialSite, TagRegistry, TypeId, DYNAMIC, NULL, OBJECT,
    TEXT,
};
use crate::error::{ScriptError, TagError};
use crate::host::{DebugMode, Severity};
use crate::script::args::{Argument, ArgumentBit, TagExpr, TagSegment};
use crate::script::engine::Environment;
use crate::script::value::TagValue;

/// Base key that reads a local variable: `<var[name]>`.
pub const VAR_BASE: &str = "var";

/// Variables visible at a binding site.
pub trait VariableScope {
    /// Slot and declared type of a visible variable.
    fn lookup(&self, name: &str) -> Option<(usize, TypeId)>;
}

// ── Bound forms ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub enum BoundBit {
    Text(String),
    Tag(BoundTag),
}

/// An [`Argument`] with every tag chain resolved.
#[derive(Debug, Clone)]
pub struct BoundArgument {
    pub bits: Vec<BoundBit>,
    /// Static type: a lone tag's type, `text` otherwise.
    pub value_type: TypeId,
    pub quoted: bool,
    pub source: String,
}

#[derive(Debug, Clone)]
pub struct BoundModifier {
    pub arg: BoundArgument,
    /// Type to coerce to; [`DYNAMIC`] defers to the runtime-resolved handler.
    pub type_id: TypeId,
}

#[derive(Clone)]
pub enum BoundBase {
    Local {
        slot: usize,
        name: String,
    },
    Base {
        name: &'static str,
        func: BaseFn,
        modifier: Option<Box<BoundModifier>>,
    },
}

impl std::fmt::Debug for BoundBase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BoundBase::Local { slot, name } => write!(f, "Local({name}@{slot})"),
            BoundBase::Base { name, .. } => write!(f, "Base({name})"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BoundSegment {
    pub key: String,
    pub index: usize,
    /// `None` when the input type is [`DYNAMIC`].
    pub handler: Option<Handler>,
    /// Type that owns `handler`.
    pub owner: TypeId,
    pub modifier: Option<BoundModifier>,
    pub result: TypeId,
}

#[derive(Debug, Clone)]
pub struct BoundTag {
    pub base: BoundBase,
    pub segments: Vec<BoundSegment>,
    pub fallback: Option<Box<BoundArgument>>,
    pub value_type: TypeId,
    pub source: String,
}

impl BoundArgument {
    /// A plain literal (synthetic entries).
    pub fn literal(text: &str) -> Self {
        BoundArgument {
            bits: vec![BoundBit::Text(text.to_owned())],
            value_type: TEXT,
            quoted: false,
            source: text.to_owned(),
        }
    }

    pub fn literal_text(&self) -> Option<String> {
        let mut out = String::new();
        for bit in &self.bits {
            match bit {
                BoundBit::Text(t) => out.push_str(t),
                BoundBit::Tag(_) => return None,
            }
        }
        Some(out)
    }

    pub fn is_literal(&self) -> bool {
        self.bits.iter().all(|b| matches!(b, BoundBit::Text(_)))
    }

    /// Unquoted literal equal (case-insensitively) to `word`.
    pub fn is_word(&self, word: &str) -> bool {
        !self.quoted
            && self
                .literal_text()
                .is_some_and(|t| t.eq_ignore_ascii_case(word))
    }
}

// ── Binding ───────────────────────────────────────────────────────────────────

/// Resolves the chains of one entry's arguments.
pub struct Binder<'a> {
    pub registry: &'a TagRegistry,
    pub scope: &'a dyn VariableScope,
    pub script: &'a str,
    pub line: usize,
}

impl Binder<'_> {
    fn error(&self, segment: usize, key: &str, message: impl Into<String>) -> ScriptError {
        ScriptError::Tag {
            script: self.script.to_owned(),
            line: self.line,
            segment,
            key: key.to_owned(),
            message: message.into(),
        }
    }

    pub fn bind_argument(&self, arg: &Argument) -> Result<BoundArgument, ScriptError> {
        let mut bits = Vec::with_capacity(arg.bits.len());
        for bit in &arg.bits {
            bits.push(match bit {
                ArgumentBit::Text(t) => BoundBit::Text(t.clone()),
                ArgumentBit::Tag(tag) => BoundBit::Tag(self.bind_tag(tag)?),
            });
        }
        let value_type = match bits.as_slice() {
            [BoundBit::Tag(tag)] => tag.value_type,
            _ => TEXT,
        };
        Ok(BoundArgument {
            bits,
            value_type,
            quoted: arg.quoted,
            source: arg.to_string(),
        })
    }

    pub fn bind_tag(&self, tag: &TagExpr) -> Result<BoundTag, ScriptError> {
        let Some(first) = tag.segments.first() else {
            return Err(self.error(0, "", "empty tag"));
        };
        let (base, mut current) = self.bind_base(first)?;

        let mut segments = Vec::with_capacity(tag.segments.len() - 1);
        for (i, seg) in tag.segments.iter().enumerate().skip(1) {
            let bound = self.bind_segment(i, seg, current)?;
            current = bound.result;
            segments.push(bound);
        }

        let fallback = match &tag.fallback {
            Some(fb) => Some(Box::new(self.bind_argument(fb)?)),
            None => None,
        };
        let value_type = match &fallback {
            Some(fb) if !self.registry.is_subtype(fb.value_type, current) => DYNAMIC,
            _ => current,
        };
        trace!(tag = %tag.source, ty = self.registry.name(value_type), "bound tag");

        Ok(BoundTag {
            base,
            segments,
            fallback,
            value_type,
            source: tag.source.clone(),
        })
    }

    fn bind_base(&self, first: &TagSegment) -> Result<(BoundBase, TypeId), ScriptError> {
        if first.key == VAR_BASE {
            let name = first
                .modifier
                .as_ref()
                .and_then(Argument::literal_text)
                .ok_or_else(|| self.error(0, VAR_BASE, "needs a literal variable name"))?
                .trim()
                .to_lowercase();
            let (slot, ty) = self
                .scope
                .lookup(&name)
                .ok_or_else(|| self.error(0, VAR_BASE, format!("unknown variable '{name}'")))?;
            return Ok((BoundBase::Local { slot, name }, ty));
        }

        if let Some(base) = self.registry.base(&first.key) {
            let modifier =
                self.bind_modifier(0, &first.key, base.modifier, first.modifier.as_ref())?;
            let ty = self.result_type(0, &first.key, base.returns, first.modifier.as_ref())?;
            return Ok((
                BoundBase::Base {
                    name: base.name,
                    func: base.func,
                    modifier: modifier.map(Box::new),
                },
                ty,
            ));
        }

        if let Some((slot, ty)) = self.scope.lookup(&first.key) {
            if first.modifier.is_some() {
                return Err(self.error(0, &first.key, "a variable takes no modifier"));
            }
            return Ok((
                BoundBase::Local {
                    slot,
                    name: first.key.clone(),
                },
                ty,
            ));
        }

        Err(self.error(0, &first.key, "unknown tag base or variable"))
    }

    fn bind_segment(&self, index: usize, seg: &TagSegment, current: TypeId) -> Result<BoundSegment, ScriptError> {
        if current == DYNAMIC {
            if !self.registry.any_type_has(&seg.key) {
                return Err(self.error(index, &seg.key, "no type has this handler"));
            }
            let modifier = match &seg.modifier {
                Some(m) => Some(BoundModifier {
                    arg: self.bind_argument(m)?,
                    type_id: DYNAMIC,
                }),
                None => None,
            };
            return Ok(BoundSegment {
                key: seg.key.clone(),
                index,
                handler: None,
                owner: DYNAMIC,
                modifier,
                result: DYNAMIC,
            });
        }

        let (owner, handler) = self.registry.find_handler(current, &seg.key).ok_or_else(|| {
            self.error(
                index,
                &seg.key,
                format!("type {} has no handler '{}'", self.registry.name(current), seg.key),
            )
        })?;
        let modifier = self.bind_modifier(index, &seg.key, handler.modifier, seg.modifier.as_ref())?;
        let result = self.result_type(index, &seg.key, handler.returns, seg.modifier.as_ref())?;
        Ok(BoundSegment {
            key: seg.key.clone(),
            index,
            handler: Some(handler),
            owner,
            modifier,
            result,
        })
    }

    fn bind_modifier(
        &self,
        index: usize,
        key: &str,
        usage: ModifierUse,
        given: Option<&Argument>,
    ) -> Result<Option<BoundModifier>, ScriptError> {
        let type_name = match (usage, given) {
            (ModifierUse::None, Some(_)) => return Err(self.error(index, key, "takes no modifier")),
            (ModifierUse::Required(_), None) => return Err(self.error(index, key, "requires a modifier")),
            (_, None) => return Ok(None),
            (ModifierUse::Optional(t) | ModifierUse::Required(t), Some(_)) => t,
        };
        let Some(arg) = given else { return Ok(None) };
        let type_id = self
            .registry
            .id(type_name)
            .ok_or_else(|| self.error(index, key, format!("unknown modifier type {type_name}")))?;
        let bound = self.bind_argument(arg)?;
        if let Some(text) = bound.literal_text() {
            if self.registry.coerce(type_id, &TagValue::Text(text.clone())).is_none() {
                return Err(self.error(index, key, format!("modifier '{text}' is not a valid {type_name}")));
            }
        }
        Ok(Some(BoundModifier { arg: bound, type_id }))
    }

    fn result_type(
        &self,
        index: usize,
        key: &str,
        returns: Returns,
        modifier: Option<&Argument>,
    ) -> Result<TypeId, ScriptError> {
        match returns {
            Returns::Type(name) => self
                .registry
                .id(name)
                .ok_or_else(|| self.error(index, key, format!("unknown result type {name}"))),
            Returns::Special(compute) => {
                let literal = modifier.and_then(Argument::literal_text);
                compute(&SpecialSite {
                    registry: self.registry,
                    modifier: literal.as_deref(),
                })
                .map_err(|msg| self.error(index, key, msg))
            }
        }
    }
}

// ── Evaluation ────────────────────────────────────────────────────────────────

/// Runtime context for evaluating bound arguments.
pub struct TagContext<'a> {
    pub env: &'a mut Environment,
    pub locals: &'a [TagValue],
    pub script: &'a str,
    pub line: usize,
    pub debug: DebugMode,
}

impl TagContext<'_> {
    pub fn report(&mut self, severity: Severity, text: &str) {
        if severity.visible_at(self.debug) {
            self.env.host.output(severity, text);
        }
    }
}

impl BoundArgument {
    /// Zero bits → empty text; one bit → its native value; several bits →
    /// their string forms concatenated.
    pub fn evaluate(&self, ctx: &mut TagContext<'_>) -> Result<TagValue, TagError> {
        match self.bits.as_slice() {
            [] => Ok(TagValue::Text(String::new())),
            [BoundBit::Text(t)] => Ok(TagValue::Text(t.clone())),
            [BoundBit::Tag(tag)] => tag.evaluate(ctx),
            bits => {
                let mut out = String::new();
                for bit in bits {
                    match bit {
                        BoundBit::Text(t) => out.push_str(t),
                        BoundBit::Tag(tag) => out.push_str(&tag.evaluate(ctx)?.to_string()),
                    }
                }
                Ok(TagValue::Text(out))
            }
        }
    }
}

impl BoundModifier {
    fn evaluate(
        &self,
        ctx: &mut TagContext<'_>,
        registry: &TagRegistry,
        declared: ModifierUse,
    ) -> Result<TagValue, TagError> {
        let value = self.arg.evaluate(ctx)?;
        let ty = if self.type_id == DYNAMIC {
            declared
                .type_name()
                .and_then(|name| registry.id(name))
                .unwrap_or(OBJECT)
        } else {
            self.type_id
        };
        registry.coerce_to(ty, value)
    }
}

impl BoundTag {
    pub fn evaluate(&self, ctx: &mut TagContext<'_>) -> Result<TagValue, TagError> {
        let chain = self.evaluate_chain(ctx);
        let result = match (chain, &self.fallback) {
            (Ok(v), Some(fallback)) if v.is_null() => fallback.evaluate(ctx),
            (Err(e), Some(fallback)) => {
                trace!(tag = %self.source, error = %e, "tag failed, using fallback");
                fallback.evaluate(ctx)
            }
            (result, _) => result,
        };
        if let Ok(value) = &result {
            trace!(tag = %self.source, %value, "filled tag");
            ctx.report(Severity::Info, &format!("Filled tag <{}> with '{}'.", self.source, value));
        }
        result
    }

    fn evaluate_chain(&self, ctx: &mut TagContext<'_>) -> Result<TagValue, TagError> {
        let registry = Arc::clone(&ctx.env.tags);
        let mut value = match &self.base {
            BoundBase::Local { slot, .. } => ctx.locals.get(*slot).cloned().unwrap_or_default(),
            BoundBase::Base { func, modifier, .. } => {
                let modifier = match modifier {
                    Some(m) => Some(m.evaluate(ctx, &registry, ModifierUse::None)?),
                    None => None,
                };
                func(modifier, ctx)?
            }
        };

        for seg in &self.segments {
            let (owner, handler) = match seg.handler {
                Some(h) => (seg.owner, h),
                None => {
                    let ty = registry.runtime_type(&value);
                    match registry.find_handler(ty, &seg.key) {
                        Some(found) => found,
                        None if value.is_null() => return Ok(TagValue::Null),
                        None => {
                            return Err(TagError::NoHandler {
                                key: seg.key.clone(),
                                type_name: registry.name(ty).to_owned(),
                            })
                        }
                    }
                }
            };
            if value.is_null() && !registry.is_subtype(NULL, owner) {
                return Ok(TagValue::Null);
            }
            let modifier = match &seg.modifier {
                Some(m) => Some(m.evaluate(ctx, &registry, handler.modifier)?),
                None => None,
            };
            value = (handler.func)(&super::HandlerCall {
                value: &value,
                modifier: modifier.as_ref(),
                key: &seg.key,
                registry: &registry,
            })?;
        }
        Ok(value)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::script::args::parse_argument;
    use crate::script::engine::Environment;

    struct Vars(HashMap<String, (usize, TypeId)>);

    impl VariableScope for Vars {
        fn lookup(&self, name: &str) -> Option<(usize, TypeId)> {
            self.0.get(name).copied()
        }
    }

    fn vars(registry: &TagRegistry, decls: &[(&str, &str)]) -> Vars {
        Vars(
            decls
                .iter()
                .enumerate()
                .map(|(slot, (name, ty))| (name.to_string(), (slot, registry.id(ty).unwrap())))
                .collect(),
        )
    }

    fn bind(registry: &TagRegistry, scope: &Vars, src: &str) -> Result<BoundArgument, ScriptError> {
        let binder = Binder {
            registry,
            scope,
            script: "t",
            line: 3,
        };
        binder.bind_argument(&parse_argument(src).unwrap())
    }

    fn eval(src: &str, decls: &[(&str, &str)], locals: &[TagValue]) -> Result<TagValue, TagError> {
        let mut env = Environment::standard();
        let registry = Arc::clone(&env.tags);
        let scope = vars(&registry, decls);
        let arg = bind(&registry, &scope, src).expect("binds");
        let mut ctx = TagContext {
            env: &mut env,
            locals,
            script: "t",
            line: 1,
            debug: DebugMode::Minimal,
        };
        arg.evaluate(&mut ctx)
    }

    #[test]
    fn literal_argument_unchanged() {
        assert_eq!(eval("plain text", &[], &[]), Ok(TagValue::text("plain text")));
        assert_eq!(eval("", &[], &[]), Ok(TagValue::text("")));
    }

    #[test]
    fn chain_types_flow() {
        let r = TagRegistry::standard();
        let scope = vars(&r, &[]);
        let arg = bind(&r, &scope, "<text[hello].length>").unwrap();
        assert_eq!(arg.value_type, r.id("integer").unwrap());
        let arg = bind(&r, &scope, "x<text[hello].length>").unwrap();
        assert_eq!(arg.value_type, TEXT);
    }

    #[test]
    fn evaluates_chains() {
        assert_eq!(eval("<text[hello].to_upper.length>", &[], &[]), Ok(TagValue::Integer(5)));
        assert_eq!(eval("n=<integer[4].add[3]>!", &[], &[]), Ok(TagValue::text("n=7!")));
        assert_eq!(eval("<list[a|b|c].get[2].to_upper>", &[], &[]), Ok(TagValue::text("B")));
    }

    #[test]
    fn variables_by_name_and_var_base() {
        let locals = [TagValue::text("bob")];
        assert_eq!(eval("<name.length>", &[("name", "text")], &locals), Ok(TagValue::Integer(3)));
        assert_eq!(eval("<var[name]>", &[("name", "text")], &locals), Ok(TagValue::text("bob")));
        assert_eq!(eval("<[name]>", &[("name", "text")], &locals), Ok(TagValue::text("bob")));
    }

    #[test]
    fn unknown_base_names_segment_zero() {
        let r = TagRegistry::standard();
        let err = bind(&r, &vars(&r, &[]), "<nothing.length>").unwrap_err();
        match err {
            ScriptError::Tag { segment, key, line, .. } => {
                assert_eq!(segment, 0);
                assert_eq!(key, "nothing");
                assert_eq!(line, 3);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn unknown_segment_names_index() {
        let r = TagRegistry::standard();
        let err = bind(&r, &vars(&r, &[]), "<text[a].length.bogus>").unwrap_err();
        assert!(matches!(err, ScriptError::Tag { segment: 2, .. }));
    }

    #[test]
    fn modifier_arity_checked() {
        let r = TagRegistry::standard();
        let scope = vars(&r, &[]);
        assert!(bind(&r, &scope, "<text[a].length[1]>").is_err());
        assert!(bind(&r, &scope, "<text[a].contains>").is_err());
        assert!(bind(&r, &scope, "<integer[x]>").is_err());
        assert!(bind(&r, &scope, "<integer[4].add[1.5]>").is_err());
    }

    #[test]
    fn fallback_does_not_hide_binding_errors() {
        let r = TagRegistry::standard();
        assert!(bind(&r, &vars(&r, &[]), "<nope||default>").is_err());
    }

    #[test]
    fn fallback_on_null_and_failure() {
        assert_eq!(eval("<cvar[unset]||anon>", &[], &[]), Ok(TagValue::text("anon")));
        assert_eq!(eval("<text[x].as[integer]||0>", &[], &[]), Ok(TagValue::text("0")));
        assert_eq!(eval("<null||<text[a]>>", &[], &[]), Ok(TagValue::text("a")));
    }

    #[test]
    fn handler_failure_without_fallback_is_error() {
        assert!(eval("<integer[1].divide[0]>", &[], &[]).is_err());
    }

    #[test]
    fn null_ends_chain() {
        assert_eq!(eval("<list[].first.to_upper>", &[], &[]), Ok(TagValue::Null));
        assert_eq!(eval("<list[].first.is_null>", &[], &[]), Ok(TagValue::Boolean(true)));
    }

    #[test]
    fn dynamic_segments_resolve_at_runtime() {
        assert_eq!(eval("<list[5|6].last.as[integer].add[1]>", &[], &[]), Ok(TagValue::Integer(7)));
        let r = TagRegistry::standard();
        let arg = bind(&r, &vars(&r, &[]), "<list[a].first.length>").unwrap();
        assert_eq!(arg.value_type, DYNAMIC);
    }

    #[test]
    fn dynamic_segment_needs_some_real_handler() {
        let r = TagRegistry::standard();
        let scope = vars(&r, &[("d", "dynamic")]);
        let err = bind(&r, &scope, "<d.no_such_key_anywhere>").unwrap_err();
        assert!(matches!(err, ScriptError::Tag { segment: 1, .. }));
        assert!(bind(&r, &scope, "<d.size>").is_ok());
    }

    #[test]
    fn base_equals_direct_handler_call() {
        let mut env = Environment::standard();
        let registry = Arc::clone(&env.tags);
        for (base, modifier) in [("text", "hi"), ("integer", "12"), ("list", "a|b"), ("boolean", "true")] {
            let src = format!("<{base}[{modifier}]>");
            let bound = bind(&registry, &vars(&registry, &[]), &src).unwrap();
            let tag_base = *registry.base(base).unwrap();
            let ty = registry.id(tag_base.modifier.type_name().unwrap()).unwrap();
            let coerced = registry.coerce_to(ty, TagValue::text(modifier)).unwrap();
            let mut ctx = TagContext {
                env: &mut env,
                locals: &[],
                script: "t",
                line: 1,
                debug: DebugMode::None,
            };
            let direct = (tag_base.func)(Some(coerced), &mut ctx).unwrap();
            let via_tag = bound.evaluate(&mut ctx).unwrap();
            assert_eq!(direct, via_tag, "{src}");
        }
    }
}
