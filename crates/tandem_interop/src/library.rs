//! Host library table exposed to embedded code

use crate::context::BridgeInner;
use crate::convert;
use crate::error::BridgeError;
use crate::facade;
use crate::iter;
use crate::proxy::{self, ProxyShape};
use mlua::Value as LuaValue;
use rquickjs::{Ctx, Value};
use std::rc::Rc;

/// Registry slot holding the library table.
pub(crate) const LIBRARY_KEY: &str = "tandem.library";

const FUNCTIONS: &[&str] = &["new", "of", "createproxy", "tonumber", "instanceof", "typeof"];

/// Build the library table, store it in the registry and optionally as a global.
pub(crate) fn open<'js>(bridge: &Rc<BridgeInner>, ctx: &Ctx<'js>) -> Result<(), BridgeError> {
    let lua = &bridge.lua;
    let library = lua.create_table()?;
    for name in FUNCTIONS {
        library.raw_set(*name, bridge.through(name)?)?;
    }

    library.raw_set("null", bridge.null_facade()?)?;
    if bridge.config.expose_global {
        let global = convert::push(bridge, ctx, ctx.globals().into_value())?;
        library.raw_set("global", global)?;
    }

    lua.set_named_registry_value(LIBRARY_KEY, library.clone())?;
    if bridge.config.register_global {
        lua.globals().raw_set(bridge.config.library_name.as_str(), library)?;
    }
    tracing::debug!(
        name = %bridge.config.library_name,
        global = bridge.config.register_global,
        "host library opened"
    );
    Ok(())
}

/// Run library function `name`.
pub(crate) fn call<'js>(
    bridge: &Rc<BridgeInner>,
    ctx: &Ctx<'js>,
    name: &str,
    args: &[LuaValue],
) -> Result<Vec<LuaValue>, BridgeError> {
    match name {
        "new" => new(bridge, ctx, args),
        "of" => {
            check_any(args, 1, "of")?;
            iter::of(bridge, ctx, args)
        }
        "createproxy" => create_proxy(bridge, ctx, args),
        "tonumber" => to_number(bridge, ctx, args),
        "instanceof" => instance_of(bridge, ctx, args),
        "typeof" => type_of(bridge, ctx, args),
        other => Err(BridgeError::Protocol(format!("unknown host operation '{other}'"))),
    }
}

fn check_any(args: &[LuaValue], position: usize, function: &'static str) -> Result<(), BridgeError> {
    if args.len() < position {
        return Err(BridgeError::argument(position, function, "value expected"));
    }
    Ok(())
}

fn host<'js>(bridge: &Rc<BridgeInner>, ctx: &Ctx<'js>, args: &[LuaValue], position: usize) -> Result<Value<'js>, BridgeError> {
    convert::to_host(bridge, ctx, &facade::arg(args, position))
}

fn new<'js>(bridge: &Rc<BridgeInner>, ctx: &Ctx<'js>, args: &[LuaValue]) -> Result<Vec<LuaValue>, BridgeError> {
    check_any(args, 1, "new")?;
    let constructor = host(bridge, ctx, args, 1)?;
    let rest = convert::to_host_all(bridge, ctx, args.get(1..).unwrap_or_default())?;
    let object: Value = bridge.prelude_call(ctx, "construct", (constructor, rest))?;
    Ok(vec![convert::push(bridge, ctx, object)?])
}

fn create_proxy<'js>(bridge: &Rc<BridgeInner>, ctx: &Ctx<'js>, args: &[LuaValue]) -> Result<Vec<LuaValue>, BridgeError> {
    check_any(args, 1, "createproxy")?;
    let shape = match facade::arg(args, 2) {
        LuaValue::Nil => ProxyShape::default(),
        LuaValue::String(name) => {
            let name = name.to_string_lossy().to_string();
            ProxyShape::parse(&name)
                .ok_or_else(|| BridgeError::argument(2, "createproxy", format!("invalid option '{name}'")))?
        }
        other => {
            return Err(BridgeError::argument(
                2,
                "createproxy",
                format!("string expected, got {}", other.type_name()),
            ))
        }
    };
    let proxy = proxy::create_proxy(bridge, ctx, facade::arg(args, 1), shape)?;
    Ok(vec![convert::push(bridge, ctx, proxy)?])
}

/// Host numeric conversion, so hex and exponent forms follow host rules.
fn to_number<'js>(bridge: &Rc<BridgeInner>, ctx: &Ctx<'js>, args: &[LuaValue]) -> Result<Vec<LuaValue>, BridgeError> {
    check_any(args, 1, "tonumber")?;
    let value = host(bridge, ctx, args, 1)?;
    let number: f64 = bridge.prelude_call(ctx, "toNumber", (value,))?;
    Ok(vec![LuaValue::Number(number)])
}

fn instance_of<'js>(bridge: &Rc<BridgeInner>, ctx: &Ctx<'js>, args: &[LuaValue]) -> Result<Vec<LuaValue>, BridgeError> {
    check_any(args, 1, "instanceof")?;
    check_any(args, 2, "instanceof")?;
    let value = host(bridge, ctx, args, 1)?;
    let constructor = host(bridge, ctx, args, 2)?;
    let result: bool = bridge.prelude_call(ctx, "instanceOf", (value, constructor))?;
    Ok(vec![LuaValue::Boolean(result)])
}

fn type_of<'js>(bridge: &Rc<BridgeInner>, ctx: &Ctx<'js>, args: &[LuaValue]) -> Result<Vec<LuaValue>, BridgeError> {
    check_any(args, 1, "typeof")?;
    let value = host(bridge, ctx, args, 1)?;
    let name: String = bridge.prelude_call(ctx, "typeOf", (value,))?;
    Ok(vec![LuaValue::String(bridge.lua.create_string(&name)?)])
}
