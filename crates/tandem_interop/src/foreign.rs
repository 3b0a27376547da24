//! Host wrappers for embedded values
//!
//! A wrapper is a host function that calls the embedded value with its
//! `this` and arguments. It also carries an explicit `get`/`set`/`has`/
//! `delete`/`invoke`/`apply` surface and is iterable with `for..of`, which
//! runs an embedded `pairs` traversal and yields each step as an array.
//!
//! The prelude builds the wrapper around a single Rust dispatch function;
//! every method on it names the operation it wants.

use crate::context::BridgeInner;
use crate::error::{BridgeError, OrThrow};
use crate::handle::ForeignHandle;
use crate::iter::ForeignIterator;
use mlua::Value as LuaValue;
use rquickjs::function::Rest;
use rquickjs::{Ctx, FromJs, Function, IntoJs, Object, Value};
use std::rc::Rc;

fn arg<'js>(ctx: &Ctx<'js>, args: &[Value<'js>], index: usize) -> Value<'js> {
    args.get(index)
        .cloned()
        .unwrap_or_else(|| Value::new_undefined(ctx.clone()))
}

/// `(thisArg, argsArray)` into a receiver and positional arguments.
fn spread<'js>(ctx: &Ctx<'js>, args: &[Value<'js>]) -> rquickjs::Result<(Value<'js>, Vec<Value<'js>>)> {
    let list = arg(ctx, args, 1);
    let list = if list.is_undefined() || list.is_null() {
        Vec::new()
    } else {
        Vec::<Value>::from_js(ctx, list)?
    };
    Ok((arg(ctx, args, 0), list))
}

fn dispatch<'js>(handle: &ForeignHandle, ctx: &Ctx<'js>, op: &str, args: &[Value<'js>]) -> Result<Value<'js>, BridgeError> {
    let value = match op {
        "apply" => {
            let (this, list) = spread(ctx, args)?;
            handle.call(ctx, this, list)?
        }
        "invoke" => {
            let (this, list) = spread(ctx, args)?;
            handle.invoke(ctx, this, list)?
        }
        "get" => handle.get(ctx, arg(ctx, args, 0))?,
        "set" => {
            handle.set(ctx, arg(ctx, args, 0), arg(ctx, args, 1))?;
            Value::new_undefined(ctx.clone())
        }
        "has" => handle.has(ctx, arg(ctx, args, 0))?.into_js(ctx)?,
        "delete" => {
            handle.delete(ctx, arg(ctx, args, 0))?;
            true.into_js(ctx)?
        }
        "tostring" => handle.to_string(ctx)?.into_js(ctx)?,
        "iterate" => host_iterator(ctx, handle.pairs(ctx)?)?,
        other => return Err(BridgeError::Type(format!("unknown wrapper operation '{other}'"))),
    };
    Ok(value)
}

/// The `next` function of a host iterator over an embedded traversal.
fn host_iterator<'js>(ctx: &Ctx<'js>, cursor: ForeignIterator) -> rquickjs::Result<Value<'js>> {
    let next = Function::new(ctx.clone(), move |ctx: Ctx<'js>| -> rquickjs::Result<Object<'js>> {
        let result = Object::new(ctx.clone())?;
        match cursor.next(&ctx).or_throw(&ctx)? {
            Some(values) => {
                result.set("done", false)?;
                result.set("value", values)?;
            }
            None => {
                result.set("done", true)?;
                result.set("value", Value::new_undefined(ctx.clone()))?;
            }
        }
        Ok(result)
    })?;
    Ok(next.into_value())
}

/// The host wrapper for `value`, reusing the cached one when alive.
pub(crate) fn wrap<'js>(bridge: &Rc<BridgeInner>, ctx: &Ctx<'js>, value: LuaValue) -> Result<Value<'js>, BridgeError> {
    if let Some(wrapper) = bridge.cache.borrow_mut().wrapper_for(ctx, &value)? {
        return Ok(wrapper);
    }

    let handle = Rc::new(ForeignHandle::new(bridge, value.clone()));
    let dispatcher = Function::new(
        ctx.clone(),
        move |ctx: Ctx<'js>, op: String, args: Rest<Value<'js>>| -> rquickjs::Result<Value<'js>> {
            tracing::trace!(op = %op, "wrapper operation");
            dispatch(&handle, &ctx, &op, &args.0).or_throw(&ctx)
        },
    )?;
    let wrapper: Value = bridge.prelude_call(ctx, "wrapper", (dispatcher,))?;

    let id = bridge.id_of(ctx, wrapper.clone())?;
    tracing::debug!(kind = value.type_name(), id, "wrapped embedded value");
    bridge.cache.borrow_mut().insert_wrapper(ctx, value, wrapper.clone(), id);
    Ok(wrapper)
}
