//! Foreign references
//!
//! A `ForeignHandle` pairs an embedded value with the bridge that minted it
//! and offers one method per boundary operation. Every operation is a
//! protected call made inside a host entry, so metamethods on the value may
//! call back into the host; embedded failures come back as host exceptions
//! carrying the converted error value.

use crate::context::BridgeInner;
use crate::convert;
use crate::error::BridgeError;
use crate::iter::ForeignIterator;
use mlua::{Function, Value as LuaValue};
use rquickjs::{Ctx, Value};
use std::rc::{Rc, Weak};

pub struct ForeignHandle {
    bridge: Weak<BridgeInner>,
    value: LuaValue,
}

impl ForeignHandle {
    pub(crate) fn new(bridge: &Rc<BridgeInner>, value: LuaValue) -> Self {
        Self {
            bridge: Rc::downgrade(bridge),
            value,
        }
    }

    pub fn value(&self) -> &LuaValue {
        &self.value
    }

    /// Whether the embedded runtime behind this handle has been dropped.
    pub fn is_closed(&self) -> bool {
        self.bridge.strong_count() == 0
    }

    pub(crate) fn open(&self) -> Result<Rc<BridgeInner>, BridgeError> {
        self.bridge.upgrade().ok_or(BridgeError::Closed)
    }

    /// Protected call of shim function `name` with the value first.
    fn through_shim<'js>(&self, ctx: &Ctx<'js>, name: &str, args: &[Value<'js>]) -> Result<Vec<LuaValue>, BridgeError> {
        let bridge = self.open()?;
        tracing::trace!(operation = name, "foreign reference operation");
        let function = bridge.shim_function(name)?;
        let mut params = vec![self.value.clone()];
        params.extend(convert::push_all(&bridge, ctx, args.iter().cloned())?);
        bridge.call_or_throw(ctx, LuaValue::Function(function), params)
    }

    fn first<'js>(&self, ctx: &Ctx<'js>, results: Vec<LuaValue>) -> Result<Value<'js>, BridgeError> {
        let bridge = self.open()?;
        let first = results.into_iter().next().unwrap_or(LuaValue::Nil);
        convert::to_host(&bridge, ctx, &first)
    }

    fn call_all<'js>(&self, ctx: &Ctx<'js>, this: Value<'js>, args: Vec<Value<'js>>) -> Result<Vec<LuaValue>, BridgeError> {
        let bridge = self.open()?;
        tracing::trace!(args = args.len(), "calling embedded value");
        let mut params = Vec::with_capacity(args.len() + 1);
        params.push(convert::push(&bridge, ctx, this)?);
        params.extend(convert::push_all(&bridge, ctx, args)?);
        bridge.call_or_throw(ctx, self.value.clone(), params)
    }

    /// Call the value with `this` first; the first result, `undefined` if none.
    pub fn call<'js>(&self, ctx: &Ctx<'js>, this: Value<'js>, args: Vec<Value<'js>>) -> Result<Value<'js>, BridgeError> {
        let results = self.call_all(ctx, this, args)?;
        self.first(ctx, results)
    }

    /// Like [`call`](Self::call), returning every result as a host array.
    pub fn invoke<'js>(&self, ctx: &Ctx<'js>, this: Value<'js>, args: Vec<Value<'js>>) -> Result<Value<'js>, BridgeError> {
        let results = self.call_all(ctx, this, args)?;
        let bridge = self.open()?;
        let array = rquickjs::Array::new(ctx.clone())?;
        for (index, result) in results.iter().enumerate() {
            array.set(index, convert::to_host(&bridge, ctx, result)?)?;
        }
        Ok(array.into_value())
    }

    /// `value[key]`, honoring `__index`.
    pub fn get<'js>(&self, ctx: &Ctx<'js>, key: Value<'js>) -> Result<Value<'js>, BridgeError> {
        let results = self.through_shim(ctx, "index", &[key])?;
        self.first(ctx, results)
    }

    /// `value[key] = item`, honoring `__newindex`.
    pub fn set<'js>(&self, ctx: &Ctx<'js>, key: Value<'js>, item: Value<'js>) -> Result<(), BridgeError> {
        self.through_shim(ctx, "newindex", &[key, item])?;
        Ok(())
    }

    /// Whether `value[key]` is present (not nil).
    pub fn has<'js>(&self, ctx: &Ctx<'js>, key: Value<'js>) -> Result<bool, BridgeError> {
        let results = self.through_shim(ctx, "index", &[key])?;
        Ok(!matches!(results.first(), None | Some(LuaValue::Nil)))
    }

    /// `value[key] = nil`
    pub fn delete<'js>(&self, ctx: &Ctx<'js>, key: Value<'js>) -> Result<(), BridgeError> {
        self.set(ctx, key, Value::new_undefined(ctx.clone()))
    }

    /// Embedded stringification, `__tostring` and `__name` aware.
    pub fn to_string<'js>(&self, ctx: &Ctx<'js>) -> Result<String, BridgeError> {
        let results = self.through_shim(ctx, "tostring", &[])?;
        match results.first() {
            Some(LuaValue::String(text)) => Ok(text.to_string_lossy().to_string()),
            other => Err(BridgeError::Type(format!(
                "'__tostring' must return a string, got {}",
                other.map_or("no value", LuaValue::type_name)
            ))),
        }
    }

    /// Start an embedded `pairs` traversal over the value.
    pub fn pairs<'js>(&self, ctx: &Ctx<'js>) -> Result<ForeignIterator, BridgeError> {
        let bridge = self.open()?;
        tracing::trace!("starting foreign pairs iteration");
        let mut results = self.through_shim(ctx, "pairs", &[])?.into_iter();
        let iterator = results.next().unwrap_or(LuaValue::Nil);
        let invariant = results.next().unwrap_or(LuaValue::Nil);
        let control = results.next().unwrap_or(LuaValue::Nil);
        Ok(ForeignIterator::new(&bridge, iterator, invariant, control))
    }

    /// Call the metafield `name` as `handler(value, args...)`, `None` when absent.
    ///
    /// The first result is returned unconverted.
    pub fn call_metafield_raw<'js>(
        &self,
        ctx: &Ctx<'js>,
        name: &str,
        args: Vec<Value<'js>>,
    ) -> Result<Option<LuaValue>, BridgeError> {
        let bridge = self.open()?;
        let metafield: Function = bridge.shim_function("metafield")?;
        let handler: LuaValue = metafield.call((self.value.clone(), name))?;
        if handler.is_nil() {
            return Ok(None);
        }
        tracing::trace!(metafield = name, "calling embedded metafield");
        let mut params = Vec::with_capacity(args.len() + 1);
        params.push(self.value.clone());
        params.extend(convert::push_all(&bridge, ctx, args)?);
        let results = bridge.call_or_throw(ctx, handler, params)?;
        Ok(Some(results.into_iter().next().unwrap_or(LuaValue::Nil)))
    }

    /// Like [`call_metafield_raw`](Self::call_metafield_raw), converted to a host value.
    pub fn call_metafield<'js>(
        &self,
        ctx: &Ctx<'js>,
        name: &str,
        args: Vec<Value<'js>>,
    ) -> Result<Option<Value<'js>>, BridgeError> {
        match self.call_metafield_raw(ctx, name, args)? {
            Some(result) => Ok(Some(convert::to_host(&self.open()?, ctx, &result)?)),
            None => Ok(None),
        }
    }

    /// `construct` metafield, else a `TypeError`.
    pub fn construct<'js>(&self, ctx: &Ctx<'js>, args: Vec<Value<'js>>) -> Result<Value<'js>, BridgeError> {
        self.call_metafield(ctx, "construct", args)?
            .ok_or_else(|| BridgeError::Type("not a constructor".to_string()))
    }
}

impl std::fmt::Debug for ForeignHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ForeignHandle")
            .field("type", &self.value.type_name())
            .field("closed", &self.is_closed())
            .finish()
    }
}
