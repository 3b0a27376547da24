//! Iteration and length capabilities of host objects
//!
//! A host object opts into embedded `pairs` and `#` through the reserved
//! symbols `Symbol.for("__pairs")` and `Symbol.for("__len")`. Without one,
//! indexed values (arrays, typed arrays) iterate by index and report their
//! length, and other objects iterate their own enumerable keys in property
//! order. Anything else raises an argument error.

use crate::context::BridgeInner;
use crate::convert;
use crate::error::BridgeError;
use crate::facade;
use mlua::{UserData, Value as LuaValue};
use rquickjs::{Ctx, Persistent, Value};
use std::cell::Cell;
use std::rc::Rc;

/// Own keys snapshot of a plain object, advanced one key per step.
pub struct KeyCursor {
    object: Persistent<Value<'static>>,
    keys: Vec<String>,
    next: Cell<usize>,
}

impl UserData for KeyCursor {}

pub(crate) fn pairs<'js>(bridge: &Rc<BridgeInner>, ctx: &Ctx<'js>, object: Value<'js>) -> Result<Vec<LuaValue>, BridgeError> {
    let Some(capability) = capability(bridge, ctx, &object, "pairs")? else {
        return Err(BridgeError::argument(1, "pairs", "host object has no pairs capability"));
    };
    if !capability.is_undefined() {
        return explicit_pairs(bridge, ctx, object, capability);
    }

    if bridge.prelude_call(ctx, "isIndexed", (object.clone(),))? {
        let step = bridge.through("arraystep")?;
        return Ok(vec![step, convert::push(bridge, ctx, object)?, LuaValue::Nil]);
    }

    let keys: Vec<String> = bridge.prelude_call(ctx, "keys", (object.clone(),))?;
    let cursor = KeyCursor {
        object: Persistent::save(ctx, object),
        keys,
        next: Cell::new(0),
    };
    let step = bridge.through("keystep")?;
    let state = LuaValue::UserData(bridge.lua.create_userdata(cursor)?);
    Ok(vec![step, state, LuaValue::Nil])
}

/// The reserved capability `name` of `object`, `None` for non-objects.
fn capability<'js>(
    bridge: &Rc<BridgeInner>,
    ctx: &Ctx<'js>,
    object: &Value<'js>,
    name: &str,
) -> Result<Option<Value<'js>>, BridgeError> {
    if !bridge.prelude_call::<_, bool>(ctx, "isObject", (object.clone(),))? {
        return Ok(None);
    }
    let symbol: Value = bridge.prelude(ctx)?.get(name)?;
    Ok(Some(bridge.prelude_call(ctx, "get", (object.clone(), symbol))?))
}

fn explicit_pairs<'js>(
    bridge: &Rc<BridgeInner>,
    ctx: &Ctx<'js>,
    object: Value<'js>,
    capability: Value<'js>,
) -> Result<Vec<LuaValue>, BridgeError> {
    let result: Value = bridge.prelude_call(ctx, "apply", (capability, object, Vec::<Value>::new()))?;
    let Some(result) = result.as_object() else {
        return Err(BridgeError::Protocol(
            "bad '__pairs' result (object with keys 'iter', 'state', 'first' expected)".to_string(),
        ));
    };
    let iter: Value = result.get("iter")?;
    if iter.is_undefined() {
        return Err(BridgeError::Protocol("bad '__pairs' result (object.iter is missing)".to_string()));
    }
    let state: Value = result.get("state")?;
    let first: Value = result.get("first")?;
    let step = bridge.bound("step", convert::push(bridge, ctx, iter)?)?;
    Ok(vec![step, convert::push(bridge, ctx, state)?, convert::push(bridge, ctx, first)?])
}

/// Step of an explicit capability: `iter.call(state, last)`.
pub(crate) fn step<'js>(bridge: &Rc<BridgeInner>, ctx: &Ctx<'js>, args: &[LuaValue]) -> Result<Vec<LuaValue>, BridgeError> {
    let iter = facade::check(ctx, args, 1, "step")?;
    let state = convert::to_host(bridge, ctx, &facade::arg(args, 2))?;
    let last = convert::to_host(bridge, ctx, &facade::arg(args, 3))?;
    let result: Value = bridge.prelude_call(ctx, "apply", (iter, state, vec![last]))?;
    if result.is_undefined() {
        return Ok(Vec::new());
    }
    if !bridge.prelude_call::<_, bool>(ctx, "isArray", (result.clone(),))? {
        return Err(BridgeError::Protocol(
            "bad iterator result (Array or undefined expected)".to_string(),
        ));
    }
    let items: Vec<Value> = rquickjs::FromJs::from_js(ctx, result)?;
    convert::push_all(bridge, ctx, items)
}

/// Default step over an indexed value: `(index, value)` from 0 upwards.
pub(crate) fn array_step<'js>(bridge: &Rc<BridgeInner>, ctx: &Ctx<'js>, args: &[LuaValue]) -> Result<Vec<LuaValue>, BridgeError> {
    let array = facade::check(ctx, args, 1, "arraystep")?;
    let length = length_of(bridge, ctx, array.clone())?;
    let Some(index) = next_index(&facade::arg(args, 2), length) else {
        return Ok(Vec::new());
    };
    let item: Value = bridge.prelude_call(ctx, "get", (array, index as f64))?;
    Ok(vec![LuaValue::Integer(index as i64), convert::push(bridge, ctx, item)?])
}

/// Default step over own keys; the position lives in the cursor.
pub(crate) fn key_step<'js>(bridge: &Rc<BridgeInner>, ctx: &Ctx<'js>, args: &[LuaValue]) -> Result<Vec<LuaValue>, BridgeError> {
    let LuaValue::UserData(userdata) = facade::arg(args, 1) else {
        return Err(BridgeError::argument(1, "keystep", "key cursor expected"));
    };
    let cursor = userdata.borrow::<KeyCursor>()?;
    let position = cursor.next.get();
    let Some(key) = cursor.keys.get(position) else {
        return Ok(Vec::new());
    };
    cursor.next.set(position + 1);
    let object = cursor.object.clone().restore(ctx)?;
    let value: Value = bridge.prelude_call(ctx, "get", (object, key.as_str()))?;
    Ok(vec![
        LuaValue::String(bridge.lua.create_string(key)?),
        convert::push(bridge, ctx, value)?,
    ])
}

/// The index after control value `last`, if it is below `length`.
///
/// `nil` starts at 0. Any other control must be a finite non-negative
/// integer; out-of-range and fractional controls end the iteration.
pub(crate) fn next_index(last: &LuaValue, length: u64) -> Option<u64> {
    let next = match *last {
        LuaValue::Nil => 0,
        LuaValue::Integer(index) => u64::try_from(index).ok()?.checked_add(1)?,
        LuaValue::Number(index) => {
            if !index.is_finite() || index < 0.0 || index.fract() != 0.0 || index >= length as f64 {
                return None;
            }
            (index as u64).checked_add(1)?
        }
        _ => return None,
    };
    (next < length).then_some(next)
}

pub(crate) fn len<'js>(bridge: &Rc<BridgeInner>, ctx: &Ctx<'js>, object: Value<'js>) -> Result<Vec<LuaValue>, BridgeError> {
    let Some(capability) = capability(bridge, ctx, &object, "len")? else {
        return Err(BridgeError::argument(1, "__len", "host object has no length capability"));
    };
    if !capability.is_undefined() {
        let result: Value = bridge.prelude_call(ctx, "apply", (capability, object, Vec::<Value>::new()))?;
        return Ok(vec![convert::push(bridge, ctx, result)?]);
    }
    if bridge.prelude_call(ctx, "isIndexed", (object.clone(),))? {
        let length = length_of(bridge, ctx, object)?;
        return Ok(vec![LuaValue::Integer(length as i64)]);
    }
    Err(BridgeError::argument(1, "__len", "host object has no length capability"))
}

fn length_of<'js>(bridge: &Rc<BridgeInner>, ctx: &Ctx<'js>, object: Value<'js>) -> Result<u64, BridgeError> {
    let length: Value = bridge.prelude_call(ctx, "get", (object, "length"))?;
    let length = length.as_number().unwrap_or(0.0);
    if length.is_finite() && length > 0.0 {
        Ok(length as u64)
    } else {
        Ok(0)
    }
}
