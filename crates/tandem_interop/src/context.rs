//! Bridge context
//!
//! One bridge exists per embedded runtime instance. It is recorded in the
//! instance's app data, so opening again finds the same identity cache, and
//! host-side wrappers hold it only weakly: once the bridge is dropped they
//! throw `embedded runtime is closed`.
//!
//! Embedded code reaches host values only while a host entry is active.
//! [`Bridge::enter`] runs its body inside a Lua scope whose hook captures the
//! caller's host context; the hook is what facade traps and library functions
//! call, and the [`HookGuard`] puts the enclosing entry's hook back on exit.

use crate::cache::{CacheStats, IdentityCache};
use crate::capability;
use crate::config::InteropConfig;
use crate::convert;
use crate::error::{self, BridgeError, OrThrow};
use crate::facade::{self, Facade};
use crate::foreign;
use crate::guard::HookGuard;
use crate::iter;
use crate::library;
use crate::proxy::{self, ProxyShape};
use mlua::{Function, Lua, MultiValue, Table, Value as LuaValue};
use rquickjs::function::IntoArgs;
use rquickjs::{Context, Ctx, FromJs, Object, Persistent, Runtime, Value};
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

const PRELUDE: &str = include_str!("prelude.js");
const SHIM: &str = include_str!("shim.lua");

/// Registry slot holding the shim table.
pub(crate) const SHIM_KEY: &str = "tandem.shim";
/// Registry slot holding the facade of host `null`.
pub(crate) const NULL_KEY: &str = "tandem.null";

pub struct BridgeInner {
    pub(crate) lua: Lua,
    prelude: Persistent<Object<'static>>,
    pub(crate) shim: Table,
    /// Holds the innermost entry's hook.
    pub(crate) slot: Table,
    pub(crate) cache: RefCell<IdentityCache>,
    pub(crate) depth: Cell<usize>,
    pub(crate) config: InteropConfig,
}

impl BridgeInner {
    pub(crate) fn prelude<'js>(&self, ctx: &Ctx<'js>) -> rquickjs::Result<Object<'js>> {
        self.prelude.clone().restore(ctx)
    }

    /// Call prelude function `name`.
    pub(crate) fn prelude_call<'js, A, R>(&self, ctx: &Ctx<'js>, name: &str, args: A) -> rquickjs::Result<R>
    where
        A: IntoArgs<'js>,
        R: FromJs<'js>,
    {
        let function: rquickjs::Function = self.prelude(ctx)?.get(name)?;
        function.call(args)
    }

    /// The prelude's weak id for a host object.
    pub(crate) fn id_of<'js>(&self, ctx: &Ctx<'js>, object: Value<'js>) -> rquickjs::Result<u64> {
        let id: f64 = self.prelude_call(ctx, "idOf", (object,))?;
        Ok(id as u64)
    }

    pub(crate) fn null_facade(&self) -> mlua::Result<LuaValue> {
        self.lua.named_registry_value(NULL_KEY)
    }

    pub(crate) fn through(&self, op: &str) -> mlua::Result<LuaValue> {
        facade::through(&self.lua, op).map(LuaValue::Function)
    }

    pub(crate) fn bound(&self, op: &str, value: LuaValue) -> mlua::Result<LuaValue> {
        let bound: Function = self.shim.get("bound")?;
        bound.call((op, value))
    }

    pub(crate) fn shim_function(&self, name: &str) -> mlua::Result<Function> {
        self.shim.get(name)
    }

    /// Run `body` with this host context active for embedded code.
    pub(crate) fn enter<'js, R>(
        self: &Rc<Self>,
        ctx: &Ctx<'js>,
        body: impl FnOnce() -> mlua::Result<R>,
    ) -> mlua::Result<R> {
        self.lua.scope(|scope| {
            let bridge = Rc::clone(self);
            let hook_ctx = ctx.clone();
            let hook = scope.create_function(move |_, (op, args): (String, MultiValue)| {
                Ok(dispatch(&bridge, &hook_ctx, &op, args))
            })?;
            let _guard = HookGuard::install(self, hook)?;
            body()
        })
    }

    /// Protected call of `function` with `args`.
    ///
    /// The outer result fails only when the bridge itself does; the inner one
    /// carries the embedded results or the raised error value.
    pub(crate) fn protected_call<'js>(
        self: &Rc<Self>,
        ctx: &Ctx<'js>,
        function: LuaValue,
        args: Vec<LuaValue>,
    ) -> Result<Result<Vec<LuaValue>, LuaValue>, BridgeError> {
        let pcall = self.shim_function("pcall")?;
        let mut params = Vec::with_capacity(args.len() + 1);
        params.push(function);
        params.extend(args);
        let results: MultiValue = self.enter(ctx, || pcall.call(MultiValue::from_vec(params)))?;
        let mut results = results.into_vec().into_iter();
        match results.next() {
            Some(LuaValue::Boolean(true)) => Ok(Ok(results.collect())),
            _ => {
                let error = results.next().unwrap_or(LuaValue::Nil);
                tracing::debug!(error = ?error.type_name(), "embedded call failed");
                Ok(Err(error))
            }
        }
    }

    /// Protected call whose raised error is rethrown on the host side.
    pub(crate) fn call_or_throw<'js>(
        self: &Rc<Self>,
        ctx: &Ctx<'js>,
        function: LuaValue,
        args: Vec<LuaValue>,
    ) -> Result<Vec<LuaValue>, BridgeError> {
        match self.protected_call(ctx, function, args)? {
            Ok(results) => Ok(results),
            Err(raised) => {
                let thrown = convert::to_host(self, ctx, &raised)?;
                Err(BridgeError::Host(ctx.throw(thrown)))
            }
        }
    }
}

/// Run host operation `op` for embedded code.
///
/// Answers `true, results...` or `false, error value`; the shim raises the
/// latter so embedded `pcall` sees the value itself.
fn dispatch<'js>(bridge: &Rc<BridgeInner>, ctx: &Ctx<'js>, op: &str, args: MultiValue) -> MultiValue {
    tracing::trace!(op, "host operation");
    let args = args.into_vec();
    let outcome = match op {
        "index" => facade::index(bridge, ctx, &args),
        "newindex" => facade::new_index(bridge, ctx, &args),
        "call" => facade::call(bridge, ctx, &args),
        "tostring" => facade::to_string(bridge, ctx, &args),
        "pairs" => facade::pairs(bridge, ctx, &args),
        "len" => facade::len(bridge, ctx, &args),
        "step" => capability::step(bridge, ctx, &args),
        "arraystep" => capability::array_step(bridge, ctx, &args),
        "keystep" => capability::key_step(bridge, ctx, &args),
        "next" => iter::next(bridge, ctx, &args),
        other => library::call(bridge, ctx, other, &args),
    };
    let mut answer = Vec::new();
    match outcome {
        Ok(results) => {
            answer.push(LuaValue::Boolean(true));
            answer.extend(results);
        }
        Err(err) => {
            answer.push(LuaValue::Boolean(false));
            answer.push(error::raised_value(bridge, ctx, err));
        }
    }
    MultiValue::from_vec(answer)
}

/// Handle to the bridge between one host context and one embedded runtime.
#[derive(Clone)]
pub struct Bridge {
    inner: Rc<BridgeInner>,
}

impl Bridge {
    /// Open the bridge on `lua`.
    ///
    /// Opening again on the same instance returns the existing bridge;
    /// `config` is then ignored.
    pub fn open<'js>(ctx: &Ctx<'js>, lua: &Lua, config: InteropConfig) -> Result<Bridge, BridgeError> {
        if let Some(bridge) = Self::of(lua) {
            tracing::debug!("bridge already open on this runtime");
            return Ok(bridge);
        }

        let prelude: Object = ctx.eval(PRELUDE)?;
        let slot = lua.create_table()?;
        let shim: Table = lua.load(SHIM).set_name("=tandem").call(slot.clone())?;
        lua.set_named_registry_value(SHIM_KEY, shim.clone())?;
        let facades: Table = shim.get("facades")?;

        let inner = Rc::new(BridgeInner {
            lua: lua.clone(),
            prelude: Persistent::save(ctx, prelude),
            shim,
            slot,
            cache: RefCell::new(IdentityCache::new(facades, config.cache_sweep_threshold)),
            depth: Cell::new(0),
            config,
        });
        lua.set_app_data(Rc::downgrade(&inner));

        let null = lua.create_userdata(Facade::new(ctx, Value::new_null(ctx.clone())))?;
        lua.set_named_registry_value(NULL_KEY, null)?;

        library::open(&inner, ctx)?;
        tracing::info!(library = %inner.config.library_name, "bridge opened");
        Ok(Self { inner })
    }

    /// The bridge already open on `lua`.
    pub fn of(lua: &Lua) -> Option<Bridge> {
        let weak = lua.app_data_ref::<Weak<BridgeInner>>()?;
        weak.upgrade().map(|inner| Self { inner })
    }

    pub fn lua(&self) -> &Lua {
        &self.inner.lua
    }

    pub fn config(&self) -> &InteropConfig {
        &self.inner.config
    }

    pub fn ptr_eq(&self, other: &Bridge) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Nesting depth of active host entries.
    pub fn depth(&self) -> usize {
        self.inner.depth.get()
    }

    /// Run `body` with `ctx` active for embedded code.
    ///
    /// Embedded code touching host values outside any entry fails with
    /// `host context is not active`.
    pub fn enter<'js, R>(&self, ctx: &Ctx<'js>, body: impl FnOnce(&Lua) -> mlua::Result<R>) -> mlua::Result<R> {
        let lua = self.inner.lua.clone();
        self.inner.enter(ctx, || body(&lua))
    }

    /// Run an embedded chunk; returns its first result.
    ///
    /// Compile and runtime errors are thrown as host exceptions.
    pub fn eval<'js>(&self, ctx: &Ctx<'js>, source: &str) -> rquickjs::Result<Value<'js>> {
        let chunk = match self.inner.lua.load(source).set_name("=eval").into_function() {
            Ok(chunk) => chunk,
            Err(err) => {
                let message = rquickjs::String::from_str(ctx.clone(), &err.to_string())?;
                return Err(ctx.throw(message.into()));
            }
        };
        let results = self.inner.call_or_throw(ctx, LuaValue::Function(chunk), Vec::new()).or_throw(ctx)?;
        let first = results.into_iter().next().unwrap_or(LuaValue::Nil);
        convert::to_host(&self.inner, ctx, &first).or_throw(ctx)
    }

    // ========================================================================
    // Conversion
    // ========================================================================

    /// The embedded counterpart of a host value.
    pub fn push<'js>(&self, ctx: &Ctx<'js>, value: Value<'js>) -> Result<LuaValue, BridgeError> {
        convert::push(&self.inner, ctx, value)
    }

    /// The host counterpart of an embedded value.
    pub fn to_host<'js>(&self, ctx: &Ctx<'js>, value: &LuaValue) -> Result<Value<'js>, BridgeError> {
        convert::to_host(&self.inner, ctx, value)
    }

    /// The host wrapper for an embedded value.
    pub fn wrap<'js>(&self, ctx: &Ctx<'js>, value: LuaValue) -> Result<Value<'js>, BridgeError> {
        foreign::wrap(&self.inner, ctx, value)
    }

    pub fn create_proxy<'js>(&self, ctx: &Ctx<'js>, value: LuaValue, shape: ProxyShape) -> Result<Value<'js>, BridgeError> {
        proxy::create_proxy(&self.inner, ctx, value, shape)
    }

    /// The embedded value behind a wrapper minted by this bridge.
    pub fn unwrap<'js>(&self, ctx: &Ctx<'js>, wrapper: &Value<'js>) -> Result<Option<LuaValue>, BridgeError> {
        if !wrapper.is_function() {
            return Ok(None);
        }
        let id = self.inner.id_of(ctx, wrapper.clone())?;
        Ok(self.inner.cache.borrow().unwrap_id(id))
    }

    /// Release this bridge's hold on a wrapper.
    ///
    /// Wrapping the same embedded value afterwards mints a new wrapper.
    pub fn release<'js>(&self, ctx: &Ctx<'js>, wrapper: &Value<'js>) -> Result<bool, BridgeError> {
        if !wrapper.is_function() {
            return Ok(false);
        }
        let id = self.inner.id_of(ctx, wrapper.clone())?;
        Ok(self.inner.cache.borrow_mut().release(id))
    }

    /// Forget the token of a symbol that crossed as a light pointer.
    ///
    /// Embedded copies of the old token convert to `undefined` afterwards.
    pub fn release_symbol<'js>(&self, ctx: &Ctx<'js>, symbol: Value<'js>) -> Result<bool, BridgeError> {
        Ok(self.inner.prelude_call(ctx, "releaseSymbol", (symbol,))?)
    }

    pub fn symbol_count<'js>(&self, ctx: &Ctx<'js>) -> Result<usize, BridgeError> {
        let count: f64 = self.inner.prelude_call(ctx, "symbolCount", ())?;
        Ok(count as usize)
    }

    // ========================================================================
    // Identity cache
    // ========================================================================

    pub fn cache_stats(&self) -> CacheStats {
        self.inner.cache.borrow().stats()
    }

    /// Collect unreferenced facades; returns how many cache entries went away.
    pub fn sweep_cache(&self) -> Result<usize, BridgeError> {
        Ok(self.inner.cache.borrow_mut().sweep(&self.inner.lua)?)
    }
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("library", &self.inner.config.library_name)
            .field("depth", &self.depth())
            .field("cache", &self.cache_stats())
            .finish()
    }
}

/// Both runtimes plus the bridge between them.
///
/// Fields drop in declaration order: the bridge releases its host handles
/// first, then the embedded runtime releases its facades, and the host
/// runtime goes last.
pub struct Session {
    bridge: Bridge,
    lua: Lua,
    context: Context,
    #[allow(dead_code)] // Kept alive for context lifetime
    runtime: Runtime,
}

impl Session {
    pub fn new(config: InteropConfig) -> Result<Self, BridgeError> {
        let runtime = Runtime::new()?;
        let lua = Lua::new();
        if let Some(limit) = config.runtime.memory_limit {
            runtime.set_memory_limit(limit);
            lua.set_memory_limit(limit)?;
        }
        if let Some(size) = config.runtime.max_stack_size {
            runtime.set_max_stack_size(size);
        }
        let context = Context::full(&runtime)?;
        let bridge = context.with(|ctx| Bridge::open(&ctx, &lua, config))?;
        Ok(Self {
            bridge,
            lua,
            context,
            runtime,
        })
    }

    pub fn bridge(&self) -> &Bridge {
        &self.bridge
    }

    pub fn lua(&self) -> &Lua {
        &self.lua
    }

    /// Run `f` with the host context and the bridge.
    pub fn with<F, R>(&self, f: F) -> R
    where
        F: for<'js> FnOnce(Ctx<'js>, &Bridge) -> R,
    {
        self.context.with(|ctx| f(ctx, &self.bridge))
    }
}
