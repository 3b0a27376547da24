//! Transparent host proxies over embedded values
//!
//! Property access, calls and membership go through the foreign reference.
//! The reflective traps look up a metafield of the same name on the embedded
//! value and fall back to the host's empty answer when it is missing. A
//! proxy is an ordinary host object to the converter: pushing it back yields
//! a facade, not the proxied value.

use crate::context::BridgeInner;
use crate::convert;
use crate::error::{BridgeError, OrThrow};
use crate::handle::ForeignHandle;
use mlua::Value as LuaValue;
use rquickjs::function::IntoJsFunc;
use rquickjs::{Ctx, FromJs, Function, Object, Value};
use std::rc::Rc;

/// Shape of the proxy target, which decides `typeof` and callability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProxyShape {
    #[default]
    Function,
    Object,
}

impl ProxyShape {
    pub const NAMES: &'static [&'static str] = &["function", "object"];

    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "function" => Some(Self::Function),
            "object" => Some(Self::Object),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        Self::NAMES[self as usize]
    }
}

fn install<'js, P, F>(handler: &Object<'js>, name: &str, trap: F) -> rquickjs::Result<()>
where
    F: IntoJsFunc<'js, P> + 'js,
{
    handler.set(name, Function::new(handler.ctx().clone(), trap)?)
}

fn truthy(value: Option<LuaValue>) -> bool {
    !matches!(value, None | Some(LuaValue::Nil) | Some(LuaValue::Boolean(false)))
}

/// `ownKeys` result: an embedded sequence becomes a host array.
fn own_keys<'js>(handle: &ForeignHandle, ctx: &Ctx<'js>) -> Result<Vec<Value<'js>>, BridgeError> {
    let bridge = handle.open()?;
    match handle.call_metafield_raw(ctx, "ownKeys", Vec::new())? {
        None | Some(LuaValue::Nil) => Ok(Vec::new()),
        Some(LuaValue::Table(keys)) => keys
            .sequence_values::<LuaValue>()
            .map(|key| convert::to_host(&bridge, ctx, &key?))
            .collect(),
        Some(other) => {
            let keys = convert::to_host(&bridge, ctx, &other)?;
            Ok(Vec::<Value>::from_js(ctx, keys)?)
        }
    }
}

fn handler<'js>(ctx: &Ctx<'js>, handle: Rc<ForeignHandle>) -> rquickjs::Result<Object<'js>> {
    let handler = Object::new(ctx.clone())?;

    let h = Rc::clone(&handle);
    install(&handler, "get", move |ctx: Ctx<'js>, _target: Value<'js>, key: Value<'js>| {
        h.get(&ctx, key).or_throw(&ctx)
    })?;

    let h = Rc::clone(&handle);
    install(&handler, "set", move |ctx: Ctx<'js>, _target: Value<'js>, key: Value<'js>, value: Value<'js>| {
        h.set(&ctx, key, value).or_throw(&ctx).map(|()| true)
    })?;

    let h = Rc::clone(&handle);
    install(&handler, "has", move |ctx: Ctx<'js>, _target: Value<'js>, key: Value<'js>| {
        h.has(&ctx, key).or_throw(&ctx)
    })?;

    let h = Rc::clone(&handle);
    install(&handler, "deleteProperty", move |ctx: Ctx<'js>, _target: Value<'js>, key: Value<'js>| {
        h.delete(&ctx, key).or_throw(&ctx).map(|()| true)
    })?;

    let h = Rc::clone(&handle);
    install(&handler, "apply", move |ctx: Ctx<'js>, _target: Value<'js>, this: Value<'js>, args: Vec<Value<'js>>| {
        h.call(&ctx, this, args).or_throw(&ctx)
    })?;

    let h = Rc::clone(&handle);
    install(&handler, "construct", move |ctx: Ctx<'js>, _target: Value<'js>, args: Vec<Value<'js>>| {
        h.construct(&ctx, args).or_throw(&ctx)
    })?;

    let h = Rc::clone(&handle);
    install(&handler, "defineProperty", move |ctx: Ctx<'js>, _target: Value<'js>, key: Value<'js>, descriptor: Value<'js>| {
        let defined = h.call_metafield_raw(&ctx, "defineProperty", vec![key, descriptor]).or_throw(&ctx)?;
        Ok::<_, rquickjs::Error>(truthy(defined))
    })?;

    let h = Rc::clone(&handle);
    install(&handler, "getOwnPropertyDescriptor", move |ctx: Ctx<'js>, target: Value<'js>, key: Value<'js>| {
        match h.call_metafield(&ctx, "getOwnPropertyDescriptor", vec![key.clone()]).or_throw(&ctx)? {
            Some(descriptor) => Ok(descriptor),
            None => {
                let bridge = h.open().or_throw(&ctx)?;
                bridge.prelude_call::<_, Value>(&ctx, "descriptorOf", (target, key))
            }
        }
    })?;

    let h = Rc::clone(&handle);
    install(&handler, "getPrototypeOf", move |ctx: Ctx<'js>, _target: Value<'js>| {
        match h.call_metafield(&ctx, "getPrototypeOf", Vec::new()).or_throw(&ctx)? {
            Some(prototype) => Ok::<_, rquickjs::Error>(prototype),
            None => Ok(Value::new_null(ctx.clone())),
        }
    })?;

    let h = Rc::clone(&handle);
    install(&handler, "setPrototypeOf", move |ctx: Ctx<'js>, _target: Value<'js>, prototype: Value<'js>| {
        let updated = h.call_metafield_raw(&ctx, "setPrototypeOf", vec![prototype]).or_throw(&ctx)?;
        Ok::<_, rquickjs::Error>(truthy(updated))
    })?;

    let h = handle;
    install(&handler, "ownKeys", move |ctx: Ctx<'js>, target: Value<'js>| {
        let keys = own_keys(&h, &ctx).or_throw(&ctx)?;
        let bridge = h.open().or_throw(&ctx)?;
        bridge.prelude_call::<_, Value>(&ctx, "requiredKeys", (target, keys))
    })?;

    Ok(handler)
}

/// Build a transparent host proxy over `value`.
pub(crate) fn create_proxy<'js>(
    bridge: &Rc<BridgeInner>,
    ctx: &Ctx<'js>,
    value: LuaValue,
    shape: ProxyShape,
) -> Result<Value<'js>, BridgeError> {
    tracing::debug!(shape = shape.name(), kind = value.type_name(), "creating interop proxy");
    let handle = Rc::new(ForeignHandle::new(bridge, value));
    let handler = handler(ctx, handle)?;
    Ok(bridge.prelude_call(ctx, "proxy", (shape.name(), handler))?)
}
