//! Value converter
//!
//! `push` gives the embedded counterpart of a host value and `to_host` the
//! host counterpart of an embedded one. Scalars are copied; compound values
//! cross as facades or wrappers from the identity cache.

use crate::context::BridgeInner;
use crate::error::BridgeError;
use crate::facade::Facade;
use crate::foreign;
use mlua::{LightUserData, Value as LuaValue};
use rquickjs::{Ctx, IntoJs, Type, Undefined, Value};
use std::ffi::c_void;
use std::rc::Rc;

pub(crate) fn push<'js>(bridge: &Rc<BridgeInner>, ctx: &Ctx<'js>, value: Value<'js>) -> Result<LuaValue, BridgeError> {
    let pushed = match value.type_of() {
        Type::Uninitialized | Type::Undefined => LuaValue::Nil,
        Type::Null => bridge.null_facade()?,
        Type::Bool => LuaValue::Boolean(value.as_bool().unwrap_or_default()),
        Type::Int => LuaValue::Integer(value.as_int().map(i64::from).unwrap_or_default()),
        Type::Float => LuaValue::Number(value.as_float().unwrap_or(f64::NAN)),
        Type::String => {
            let text = match value.as_string() {
                Some(text) => text.to_string()?,
                None => String::new(),
            };
            LuaValue::String(bridge.lua.create_string(&text)?)
        }
        Type::Symbol => {
            let token: f64 = bridge.prelude_call(ctx, "symbolToken", (value,))?;
            LuaValue::LightUserData(LightUserData(token as usize as *mut c_void))
        }
        _ if value.is_object() => push_object(bridge, ctx, value)?,
        other => {
            tracing::warn!(kind = ?other, "host value crosses as a number");
            let number: f64 = bridge.prelude_call(ctx, "toNumber", (value,))?;
            LuaValue::Number(number)
        }
    };
    Ok(pushed)
}

fn push_object<'js>(bridge: &Rc<BridgeInner>, ctx: &Ctx<'js>, object: Value<'js>) -> Result<LuaValue, BridgeError> {
    let id = bridge.id_of(ctx, object.clone())?;
    if let Some(value) = bridge.cache.borrow().unwrap_id(id) {
        tracing::trace!(id, "wrapper unwrapped");
        return Ok(value);
    }
    if let Some(facade) = bridge.cache.borrow_mut().facade_for(id)? {
        return Ok(facade);
    }
    let facade = LuaValue::UserData(bridge.lua.create_userdata(Facade::new(ctx, object))?);
    bridge.cache.borrow_mut().insert_facade(&bridge.lua, id, &facade)?;
    Ok(facade)
}

pub(crate) fn push_all<'js>(
    bridge: &Rc<BridgeInner>,
    ctx: &Ctx<'js>,
    values: impl IntoIterator<Item = Value<'js>>,
) -> Result<Vec<LuaValue>, BridgeError> {
    values.into_iter().map(|value| push(bridge, ctx, value)).collect()
}

pub(crate) fn to_host<'js>(bridge: &Rc<BridgeInner>, ctx: &Ctx<'js>, value: &LuaValue) -> Result<Value<'js>, BridgeError> {
    let converted = match value {
        LuaValue::Nil => Undefined.into_js(ctx)?,
        LuaValue::Boolean(flag) => (*flag).into_js(ctx)?,
        LuaValue::Integer(integer) => match i32::try_from(*integer) {
            Ok(small) => small.into_js(ctx)?,
            Err(_) => (*integer as f64).into_js(ctx)?,
        },
        LuaValue::Number(number) => (*number).into_js(ctx)?,
        LuaValue::String(text) => String::from(text.to_string_lossy()).into_js(ctx)?,
        LuaValue::LightUserData(pointer) => {
            let token = pointer.0 as usize as f64;
            let symbol: Value = bridge.prelude_call(ctx, "symbolOf", (token,))?;
            if symbol.is_undefined() {
                tracing::warn!(token, "unknown light pointer crosses as undefined");
            }
            symbol
        }
        LuaValue::UserData(userdata) if userdata.is::<Facade>() => {
            let facade = userdata.borrow::<Facade>()?;
            facade.restore(ctx)?
        }
        LuaValue::Error(err) => err.to_string().into_js(ctx)?,
        other => foreign::wrap(bridge, ctx, other.clone())?,
    };
    Ok(converted)
}

pub(crate) fn to_host_all<'js>(
    bridge: &Rc<BridgeInner>,
    ctx: &Ctx<'js>,
    values: &[LuaValue],
) -> Result<Vec<Value<'js>>, BridgeError> {
    values.iter().map(|value| to_host(bridge, ctx, value)).collect()
}
