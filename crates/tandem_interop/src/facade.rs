//! Host object facade
//!
//! Host values reach embedded code as `Facade` userdata. The metatable is
//! shared by every facade; each metamethod is a shim closure that forwards
//! to the innermost host entry, so traps always run with a live host
//! context and host exceptions surface as raised embedded values.

use crate::capability;
use crate::context::{BridgeInner, SHIM_KEY};
use crate::convert;
use crate::error::BridgeError;
use mlua::{Function, Lua, Table, UserData, UserDataFields, Value as LuaValue};
use rquickjs::{Ctx, Persistent, Value};
use std::rc::Rc;

/// Type name used in argument errors.
pub const FACADE_TYPE: &str = "host object";

/// Metamethods installed on every facade, with the host operation each runs.
const METAMETHODS: &[(&str, &str)] = &[
    ("__index", "index"),
    ("__newindex", "newindex"),
    ("__call", "call"),
    ("__tostring", "tostring"),
    ("__pairs", "pairs"),
    ("__len", "len"),
];

/// Embedded userdata holding one host value.
pub struct Facade {
    value: Persistent<Value<'static>>,
}

impl Facade {
    pub(crate) fn new<'js>(ctx: &Ctx<'js>, value: Value<'js>) -> Self {
        Self {
            value: Persistent::save(ctx, value),
        }
    }

    pub(crate) fn restore<'js>(&self, ctx: &Ctx<'js>) -> rquickjs::Result<Value<'js>> {
        self.value.clone().restore(ctx)
    }
}

impl UserData for Facade {
    fn add_fields<F: UserDataFields<Self>>(fields: &mut F) {
        for &(metamethod, op) in METAMETHODS {
            fields.add_meta_field_with(metamethod, move |lua| through(lua, op));
        }
    }
}

/// A shim function that runs host operation `op`.
pub(crate) fn through(lua: &Lua, op: &str) -> mlua::Result<Function> {
    let shim: Table = lua.named_registry_value(SHIM_KEY)?;
    let through: Function = shim.get("through")?;
    through.call(op)
}

/// The host value of the facade at argument `position` (1-based).
pub(crate) fn check<'js>(
    ctx: &Ctx<'js>,
    args: &[LuaValue],
    position: usize,
    function: &'static str,
) -> Result<Value<'js>, BridgeError> {
    match arg(args, position) {
        LuaValue::UserData(userdata) if userdata.is::<Facade>() => {
            let facade = userdata.borrow::<Facade>()?;
            Ok(facade.restore(ctx)?)
        }
        other => Err(BridgeError::argument(
            position,
            function,
            format!("{FACADE_TYPE} expected, got {}", other.type_name()),
        )),
    }
}

pub(crate) fn arg(args: &[LuaValue], position: usize) -> LuaValue {
    args.get(position - 1).cloned().unwrap_or(LuaValue::Nil)
}

// ============================================================================
// Traps
// ============================================================================

pub(crate) fn index<'js>(bridge: &Rc<BridgeInner>, ctx: &Ctx<'js>, args: &[LuaValue]) -> Result<Vec<LuaValue>, BridgeError> {
    let object = check(ctx, args, 1, "__index")?;
    let key = convert::to_host(bridge, ctx, &arg(args, 2))?;
    let value: Value = bridge.prelude_call(ctx, "get", (object, key))?;
    Ok(vec![convert::push(bridge, ctx, value)?])
}

/// Assigning nil deletes: embedded code cannot tell undefined from absent.
pub(crate) fn new_index<'js>(bridge: &Rc<BridgeInner>, ctx: &Ctx<'js>, args: &[LuaValue]) -> Result<Vec<LuaValue>, BridgeError> {
    let object = check(ctx, args, 1, "__newindex")?;
    let key = convert::to_host(bridge, ctx, &arg(args, 2))?;
    let value = convert::to_host(bridge, ctx, &arg(args, 3))?;
    if value.is_undefined() {
        bridge.prelude_call::<_, Value>(ctx, "remove", (object, key))?;
    } else {
        bridge.prelude_call::<_, Value>(ctx, "set", (object, key, value))?;
    }
    Ok(Vec::new())
}

/// The first argument after the facade is the receiver.
pub(crate) fn call<'js>(bridge: &Rc<BridgeInner>, ctx: &Ctx<'js>, args: &[LuaValue]) -> Result<Vec<LuaValue>, BridgeError> {
    let function = check(ctx, args, 1, "__call")?;
    let receiver = convert::to_host(bridge, ctx, &arg(args, 2))?;
    let rest = convert::to_host_all(bridge, ctx, args.get(2..).unwrap_or_default())?;
    let result: Value = bridge.prelude_call(ctx, "apply", (function, receiver, rest))?;
    Ok(vec![convert::push(bridge, ctx, result)?])
}

pub(crate) fn to_string<'js>(bridge: &Rc<BridgeInner>, ctx: &Ctx<'js>, args: &[LuaValue]) -> Result<Vec<LuaValue>, BridgeError> {
    let value = check(ctx, args, 1, "__tostring")?;
    let text: String = bridge.prelude_call(ctx, "toString", (value,))?;
    Ok(vec![LuaValue::String(bridge.lua.create_string(&text)?)])
}

pub(crate) fn pairs<'js>(bridge: &Rc<BridgeInner>, ctx: &Ctx<'js>, args: &[LuaValue]) -> Result<Vec<LuaValue>, BridgeError> {
    let object = check(ctx, args, 1, "__pairs")?;
    capability::pairs(bridge, ctx, object)
}

pub(crate) fn len<'js>(bridge: &Rc<BridgeInner>, ctx: &Ctx<'js>, args: &[LuaValue]) -> Result<Vec<LuaValue>, BridgeError> {
    let object = check(ctx, args, 1, "__len")?;
    capability::len(bridge, ctx, object)
}
