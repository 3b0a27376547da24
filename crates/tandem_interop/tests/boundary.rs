//! End-to-end behaviour of the boundary between a QuickJS context and a Lua
//! state sharing one thread.

use mlua::{FromLuaMulti, Value as LuaValue};
use rquickjs::{Ctx, FromJs, Value};
use tandem_interop::{Bridge, BridgeError, InteropConfig, Session};

fn session() -> Session {
    Session::new(InteropConfig::default()).unwrap()
}

/// Run a Lua chunk inside a host entry.
fn exec(bridge: &Bridge, ctx: &Ctx<'_>, source: &str) {
    bridge.enter(ctx, |lua| lua.load(source).exec()).unwrap();
}

/// Evaluate a Lua chunk inside a host entry.
fn lua<R: FromLuaMulti>(bridge: &Bridge, ctx: &Ctx<'_>, source: &str) -> R {
    bridge.enter(ctx, |lua| lua.load(source).eval::<R>()).unwrap()
}

fn js<'js, R: FromJs<'js>>(ctx: &Ctx<'js>, source: &str) -> R {
    ctx.eval(source).unwrap()
}

/// Expose the Lua global `name` to the host under the same name.
fn share(bridge: &Bridge, ctx: &Ctx<'_>, name: &str) {
    let value: LuaValue = bridge.lua().globals().get(name).unwrap();
    let wrapper = bridge.wrap(ctx, value).unwrap();
    ctx.globals().set(name, wrapper).unwrap();
}

// ============================================================================
// Identity
// ============================================================================

#[test]
fn host_object_round_trip_preserves_identity() {
    let session = session();
    session.with(|ctx, bridge| {
        let object: Value = js(&ctx, "globalThis.shared = {}; shared");
        let first = bridge.push(&ctx, object.clone()).unwrap();
        let second = bridge.push(&ctx, object).unwrap();
        bridge.lua().globals().set("first", first.clone()).unwrap();
        bridge.lua().globals().set("second", second).unwrap();
        assert!(lua::<bool>(bridge, &ctx, "return rawequal(first, second)"));
        assert!(lua::<bool>(bridge, &ctx, "return rawequal(first, js.global.shared)"));

        let back = bridge.to_host(&ctx, &first).unwrap();
        ctx.globals().set("back", back).unwrap();
        assert!(js::<bool>(&ctx, "back === shared"));
    });
}

#[test]
fn embedded_round_trip_and_idempotent_wrapping() {
    let session = session();
    session.with(|ctx, bridge| {
        exec(bridge, &ctx, "t = {}");
        let table: LuaValue = bridge.lua().globals().get("t").unwrap();
        let first = bridge.wrap(&ctx, table.clone()).unwrap();
        let second = bridge.wrap(&ctx, table.clone()).unwrap();
        ctx.globals().set("first", first.clone()).unwrap();
        ctx.globals().set("second", second).unwrap();
        assert!(js::<bool>(&ctx, "first === second && typeof first === 'function'"));

        let back = bridge.push(&ctx, first.clone()).unwrap();
        bridge.lua().globals().set("back", back).unwrap();
        assert!(lua::<bool>(bridge, &ctx, "return rawequal(back, t)"));

        let converted = bridge.to_host(&ctx, &table).unwrap();
        ctx.globals().set("converted", converted).unwrap();
        assert!(js::<bool>(&ctx, "converted === first"));
        assert!(bridge.unwrap(&ctx, &first).unwrap().is_some());
    });
}

#[test]
fn symbols_cross_as_light_pointers() {
    let session = session();
    session.with(|ctx, bridge| {
        let symbol: Value = js(&ctx, "globalThis.tag = Symbol('tag'); tag");
        let pushed = bridge.push(&ctx, symbol.clone()).unwrap();
        assert!(matches!(pushed, LuaValue::LightUserData(_)));
        assert_eq!(bridge.push(&ctx, symbol.clone()).unwrap(), pushed);

        let back = bridge.to_host(&ctx, &pushed).unwrap();
        ctx.globals().set("back", back).unwrap();
        assert!(js::<bool>(&ctx, "back === tag"));
        assert_eq!(bridge.symbol_count(&ctx).unwrap(), 1);
    });
}

#[test]
fn released_symbols_leave_the_symbol_table() {
    let session = session();
    session.with(|ctx, bridge| {
        let before = bridge.symbol_count(&ctx).unwrap();
        let mut tokens = Vec::new();
        for index in 0..16 {
            let symbol: Value = ctx.eval(format!("Symbol('s{index}')")).unwrap();
            tokens.push((symbol.clone(), bridge.push(&ctx, symbol).unwrap()));
        }
        assert_eq!(bridge.symbol_count(&ctx).unwrap(), before + 16);

        for (symbol, _) in &tokens {
            assert!(bridge.release_symbol(&ctx, symbol.clone()).unwrap());
        }
        assert_eq!(bridge.symbol_count(&ctx).unwrap(), before);
        assert!(!bridge.release_symbol(&ctx, tokens[0].0.clone()).unwrap());

        let stale = bridge.to_host(&ctx, &tokens[0].1).unwrap();
        assert!(stale.is_undefined());
    });
}

#[test]
fn null_is_a_singleton_distinct_from_nil() {
    let session = session();
    session.with(|ctx, bridge| {
        let null = bridge.push(&ctx, Value::new_null(ctx.clone())).unwrap();
        assert!(matches!(null, LuaValue::UserData(_)));
        assert_eq!(bridge.push(&ctx, Value::new_null(ctx.clone())).unwrap(), null);
        assert!(lua::<bool>(bridge, &ctx, "return js.null ~= nil and rawequal(js.null, js.global.Object:getPrototypeOf(js.global.Object.prototype))"));

        let back = bridge.to_host(&ctx, &null).unwrap();
        assert!(back.is_null());
        let nil = bridge.push(&ctx, Value::new_undefined(ctx.clone())).unwrap();
        assert_eq!(nil, LuaValue::Nil);
    });
}

#[test]
fn unreferenced_facades_are_swept() {
    let session = session();
    session.with(|ctx, bridge| {
        let baseline = bridge.cache_stats().facades;
        bridge.lua().gc_stop();
        exec(
            bridge,
            &ctx,
            "for i = 1, 50 do local _ = js.new(js.global.Object) end",
        );
        // 50 instances plus the constructor
        assert_eq!(bridge.cache_stats().facades, baseline + 51);
        bridge.lua().gc_restart();
        bridge.sweep_cache().unwrap();
        assert_eq!(bridge.cache_stats().facades, baseline);
    });
}

#[test]
fn released_wrappers_are_minted_afresh() {
    let session = session();
    session.with(|ctx, bridge| {
        exec(bridge, &ctx, "t = {}");
        let table: LuaValue = bridge.lua().globals().get("t").unwrap();
        let first = bridge.wrap(&ctx, table.clone()).unwrap();
        assert_eq!(bridge.cache_stats().wrappers, 1);

        assert!(bridge.release(&ctx, &first).unwrap());
        assert!(!bridge.release(&ctx, &first).unwrap());
        assert_eq!(bridge.cache_stats().wrappers, 0);
        assert!(bridge.unwrap(&ctx, &first).unwrap().is_none());

        let second = bridge.wrap(&ctx, table).unwrap();
        ctx.globals().set("first", first).unwrap();
        ctx.globals().set("second", second).unwrap();
        assert!(js::<bool>(&ctx, "first !== second"));
    });
}

// ============================================================================
// Calls and errors
// ============================================================================

#[test]
fn invoke_returns_every_result_in_order() {
    let session = session();
    session.with(|ctx, bridge| {
        exec(bridge, &ctx, "function calc(_, a, b) return a + b, a * b, a - b end");
        share(bridge, &ctx, "calc");
        let all: Vec<f64> = js(&ctx, "calc.invoke(null, [6, 3])");
        assert_eq!(all, vec![9.0, 18.0, 3.0]);

        let single: f64 = js(&ctx, "calc(6, 3)");
        assert_eq!(single, 9.0);
        assert!(js::<bool>(&ctx, "calc.apply(null, [6, 3]) === 9 && !Array.isArray(calc(6, 3))"));
        assert!(js::<bool>(&ctx, "calc.invoke(null, [6, 3]).length === 3"));
    });
}

#[test]
fn apply_passes_the_receiver_first() {
    let session = session();
    session.with(|ctx, bridge| {
        exec(bridge, &ctx, "function whoami(self, extra) return self.name .. extra end");
        share(bridge, &ctx, "whoami");
        let text: String = js(&ctx, "whoami.apply({ name: 'host' }, ['!'])");
        assert_eq!(text, "host!");
        let method: String = js(&ctx, "({ name: 'method', whoami }).whoami('?')");
        assert_eq!(method, "method?");
    });
}

#[test]
fn embedded_errors_reach_the_host_as_thrown_values() {
    let session = session();
    session.with(|ctx, bridge| {
        exec(
            bridge,
            &ctx,
            "function boom() error('boom', 0) end
             function raise_table() error({ code = 7 }) end",
        );
        share(bridge, &ctx, "boom");
        share(bridge, &ctx, "raise_table");
        let message: String = js(&ctx, "try { boom(); 'no error' } catch (e) { e }");
        assert_eq!(message, "boom");
        let code: i32 = js(&ctx, "try { raise_table(); -1 } catch (e) { e.get('code') }");
        assert_eq!(code, 7);
        assert_eq!(bridge.depth(), 0);
    });
}

#[test]
fn host_exceptions_round_trip_through_embedded_code() {
    let session = session();
    session.with(|ctx, bridge| {
        js::<()>(
            &ctx,
            "globalThis.failure = new Error('bad'); globalThis.fail = () => { throw failure; };",
        );
        exec(bridge, &ctx, "ok, err = pcall(js.global.fail)");
        assert!(!lua::<bool>(bridge, &ctx, "return ok"));
        assert!(lua::<bool>(bridge, &ctx, "return rawequal(err, js.global.failure)"));
        assert_eq!(lua::<String>(bridge, &ctx, "return err.message"), "bad");

        exec(bridge, &ctx, "function rethrow() js.global.fail() end");
        share(bridge, &ctx, "rethrow");
        assert!(js::<bool>(&ctx, "try { rethrow(); false } catch (e) { e === failure }"));
        assert_eq!(bridge.depth(), 0);
    });
}

#[test]
fn syntax_errors_are_thrown_by_eval() {
    let session = session();
    session.with(|ctx, bridge| {
        assert!(bridge.eval(&ctx, "return (").is_err());
        let message: String = ctx.catch().get().unwrap();
        assert!(message.contains("eval"), "{message}");

        let value = bridge.eval(&ctx, "return 40 + 2").unwrap();
        assert_eq!(value.as_int(), Some(42));
    });
}

fn install_bouncer(bridge: &Bridge, ctx: &Ctx<'_>, fail_at_bottom: bool) {
    exec(
        bridge,
        ctx,
        "function bounce(_, n)
           if n == 0 then return 0 end
           return js.global:bounceHost(n - 1) + 1
         end",
    );
    share(bridge, ctx, "bounce");
    let bottom = if fail_at_bottom {
        "throw new Error('bottom')"
    } else {
        "return 0"
    };
    js::<()>(
        ctx,
        &format!("globalThis.bounceHost = function (n) {{ if (n === 0) {{ {bottom}; }} return bounce(n - 1) + 1; }};"),
    );
}

#[test]
fn depth_is_restored_after_reentrant_calls() {
    let session = session();
    session.with(|ctx, bridge| {
        install_bouncer(bridge, &ctx, false);
        let total: i32 = js(&ctx, "bounce(10)");
        assert_eq!(total, 10);
        assert_eq!(bridge.depth(), 0);
    });
}

#[test]
fn depth_is_restored_after_failing_reentrant_calls() {
    let session = session();
    session.with(|ctx, bridge| {
        install_bouncer(bridge, &ctx, true);
        let message: String = js(&ctx, "try { bounce(9); 'no error' } catch (e) { e.message }");
        assert_eq!(message, "bottom");
        assert_eq!(bridge.depth(), 0);

        js::<()>(&ctx, "globalThis.bounceHost = (n) => n");
        let total: i32 = js(&ctx, "bounce(3)");
        assert_eq!(total, 3);
    });
}

#[test]
fn host_values_need_an_active_host_entry() {
    let session = session();
    session.with(|ctx, bridge| exec(bridge, &ctx, "kept = js.global"));
    let err = session
        .lua()
        .load("return kept.Object")
        .exec()
        .unwrap_err();
    assert!(err.to_string().contains("host context is not active"), "{err}");
    let err = session.lua().load("return js.typeof(1)").exec().unwrap_err();
    assert!(err.to_string().contains("host context is not active"), "{err}");
}

#[test]
fn wrappers_of_a_closed_bridge_throw() {
    let runtime = rquickjs::Runtime::new().unwrap();
    let context = rquickjs::Context::full(&runtime).unwrap();
    context.with(|ctx| {
        {
            let lua = mlua::Lua::new();
            let bridge = Bridge::open(&ctx, &lua, InteropConfig::default()).unwrap();
            exec(&bridge, &ctx, "function noop() end");
            share(&bridge, &ctx, "noop");
        }
        let message: String = js(&ctx, "try { noop(); 'no error' } catch (e) { e.message }");
        assert_eq!(message, "embedded runtime is closed");
        ctx.globals().remove("noop").unwrap();
    });
}

// ============================================================================
// Property semantics
// ============================================================================

#[test]
fn wrapper_property_surface() {
    let session = session();
    session.with(|ctx, bridge| {
        exec(bridge, &ctx, "t = { a = 1 }");
        share(bridge, &ctx, "t");
        assert_eq!(js::<i32>(&ctx, "t.get('a')"), 1);
        assert!(js::<bool>(&ctx, "t.has('a') && !t.has('b')"));
        js::<()>(&ctx, "t.set('b', 'two')");
        assert_eq!(lua::<String>(bridge, &ctx, "return t.b"), "two");
        assert!(js::<bool>(&ctx, "t.delete('a')"));
        assert!(lua::<bool>(bridge, &ctx, "return t.a == nil"));
        assert!(js::<bool>(&ctx, "String(t).startsWith('table: ')"));
        assert!(js::<bool>(&ctx, "Object.prototype.toString.call(t) === '[object Tandem object]'"));
    });
}

#[test]
fn wrapper_get_honors_index_metamethods() {
    let session = session();
    session.with(|ctx, bridge| {
        exec(
            bridge,
            &ctx,
            "proxied = setmetatable({}, { __index = function(_, key) return key .. '!' end, __tostring = function() return 'custom' end })",
        );
        share(bridge, &ctx, "proxied");
        assert_eq!(js::<String>(&ctx, "proxied.get('hey')"), "hey!");
        assert_eq!(js::<String>(&ctx, "`${proxied}`"), "custom");
    });
}

#[test]
fn facade_forwards_property_access_and_undefined_deletes() {
    let session = session();
    session.with(|ctx, bridge| {
        js::<()>(&ctx, "globalThis.target = { keep: 1, drop: 2 };");
        exec(
            bridge,
            &ctx,
            "local t = js.global.target
             t.drop = nil
             t.added = 'yes'
             kept = t.keep",
        );
        assert!(js::<bool>(&ctx, "!('drop' in target) && target.added === 'yes'"));
        assert_eq!(lua::<i64>(bridge, &ctx, "return kept"), 1);
    });
}

#[test]
fn facade_calls_pass_the_receiver_first() {
    let session = session();
    session.with(|ctx, bridge| {
        assert_eq!(lua::<i64>(bridge, &ctx, "return js.global.Math:max(1, 5, 3)"), 5);
        js::<()>(&ctx, "globalThis.counter = { n: 0, bump(by) { this.n += by; return this.n; } };");
        assert_eq!(lua::<i64>(bridge, &ctx, "local c = js.global.counter; c:bump(2); return c:bump(3)"), 5);
    });
}

#[test]
fn facade_tostring_uses_host_stringification() {
    let session = session();
    session.with(|ctx, bridge| {
        js::<()>(&ctx, "globalThis.list = [1, 2];");
        assert_eq!(lua::<String>(bridge, &ctx, "return tostring(js.global.list)"), "1,2");
        assert_eq!(lua::<String>(bridge, &ctx, "return tostring(js.new(js.global.Object))"), "[object Object]");
    });
}

// ============================================================================
// Iteration and length
// ============================================================================

#[test]
fn host_arrays_iterate_in_order_from_embedded_code() {
    let session = session();
    session.with(|ctx, bridge| {
        js::<()>(&ctx, "globalThis.list = [10, 20, 30];");
        let joined: String = lua(
            bridge,
            &ctx,
            "local out = {}
             for i, v in pairs(js.global.list) do out[#out + 1] = i .. ':' .. v end
             return table.concat(out, ',')",
        );
        assert_eq!(joined, "0:10,1:20,2:30");
        assert_eq!(lua::<i64>(bridge, &ctx, "return #js.global.list"), 3);
        assert_eq!(lua::<i64>(bridge, &ctx, "return #js.new(js.global.Uint8Array, 4)"), 4);
    });
}

#[test]
fn array_steps_reject_unusable_controls() {
    let session = session();
    session.with(|ctx, bridge| {
        js::<()>(&ctx, "globalThis.list = [10, 20];");
        let counts: (i64, i64, i64) = lua(
            bridge,
            &ctx,
            "local step, state = pairs(js.global.list)
             return select('#', step(state, 1e300)), select('#', step(state, -1)), select('#', step(state, 0.5))",
        );
        assert_eq!(counts, (0, 0, 0));
        let (index, value): (i64, i64) = lua(
            bridge,
            &ctx,
            "local step, state = pairs(js.global.list) return step(state, 0)",
        );
        assert_eq!((index, value), (1, 20));
        assert_eq!(
            lua::<i64>(bridge, &ctx, "local step, state = pairs(js.global.list) return select('#', step(state, 1))"),
            0
        );
    });
}

#[test]
fn host_objects_iterate_their_own_keys() {
    let session = session();
    session.with(|ctx, bridge| {
        js::<()>(&ctx, "globalThis.record = { b: 1, a: 2, c: 3 };");
        let joined: String = lua(
            bridge,
            &ctx,
            "local out = {}
             for k, v in pairs(js.global.record) do out[#out + 1] = k .. '=' .. v end
             return table.concat(out, ',')",
        );
        assert_eq!(joined, "b=1,a=2,c=3");
    });
}

#[test]
fn large_objects_iterate_every_key_once() {
    let session = session();
    session.with(|ctx, bridge| {
        js::<()>(
            &ctx,
            "globalThis.big = {}; for (let i = 0; i < 2000; i++) big['k' + i] = i;",
        );
        let (count, sum): (i64, i64) = lua(
            bridge,
            &ctx,
            "local count, sum = 0, 0
             for _, v in pairs(js.global.big) do count = count + 1; sum = sum + v end
             return count, sum",
        );
        assert_eq!(count, 2000);
        assert_eq!(sum, 1999 * 2000 / 2);
    });
}

#[test]
fn explicit_capabilities_drive_pairs_and_length() {
    let session = session();
    session.with(|ctx, bridge| {
        js::<()>(
            &ctx,
            r#"globalThis.custom = {
                 [Symbol.for("__pairs")]() {
                   return { iter(last) { return last === undefined ? ["x", this.value] : undefined; }, state: { value: 42 } };
                 },
                 [Symbol.for("__len")]() { return 7; },
               };"#,
        );
        let joined: String = lua(
            bridge,
            &ctx,
            "local out = {}
             for k, v in pairs(js.global.custom) do out[#out + 1] = k .. '=' .. v end
             return table.concat(out, ',')",
        );
        assert_eq!(joined, "x=42");
        assert_eq!(lua::<i64>(bridge, &ctx, "return #js.global.custom"), 7);
    });
}

#[test]
fn embedded_tables_iterate_from_the_host() {
    let session = session();
    session.with(|ctx, bridge| {
        exec(bridge, &ctx, "seq = { 'a', 'b', 'c' }");
        share(bridge, &ctx, "seq");
        let joined: String = js(
            &ctx,
            "const out = []; for (const [k, v] of seq) out.push(k + '=' + v); out.sort().join(',')",
        );
        assert_eq!(joined, "1=a,2=b,3=c");
        assert_eq!(bridge.depth(), 0);
    });
}

#[test]
fn missing_capabilities_are_argument_errors() {
    let session = session();
    session.with(|ctx, bridge| {
        let pairs_error: String = lua(bridge, &ctx, "local ok, err = pcall(pairs, js.null) return err");
        assert!(pairs_error.contains("host object has no pairs capability"), "{pairs_error}");
        let len_error: String = lua(bridge, &ctx, "local ok, err = pcall(function() return #js.global end) return err");
        assert!(len_error.contains("host object has no length capability"), "{len_error}");
    });
}

#[test]
fn bad_pairs_results_are_embedded_errors() {
    let session = session();
    session.with(|ctx, bridge| {
        js::<()>(
            &ctx,
            r#"globalThis.noIter = { [Symbol.for("__pairs")]() { return {}; } };
               globalThis.notObject = { [Symbol.for("__pairs")]() { return 1; } };
               globalThis.badStep = { [Symbol.for("__pairs")]() { return { iter: () => 5 }; } };"#,
        );
        let missing: String = lua(bridge, &ctx, "local ok, err = pcall(pairs, js.global.noIter) return err");
        assert_eq!(missing, "bad '__pairs' result (object.iter is missing)");
        let shape: String = lua(bridge, &ctx, "local ok, err = pcall(pairs, js.global.notObject) return err");
        assert!(shape.starts_with("bad '__pairs' result"), "{shape}");
        let step: String = lua(
            bridge,
            &ctx,
            "local ok, err = pcall(function() for _ in pairs(js.global.badStep) do end end) return err",
        );
        assert_eq!(step, "bad iterator result (Array or undefined expected)");
    });
}

// ============================================================================
// Interop proxies
// ============================================================================

#[test]
fn proxies_without_metafields_use_the_host_defaults() {
    let session = session();
    session.with(|ctx, bridge| {
        exec(bridge, &ctx, "plain = { a = 1 }");
        let plain: LuaValue = bridge.lua().globals().get("plain").unwrap();
        let function = bridge
            .create_proxy(&ctx, plain.clone(), tandem_interop::ProxyShape::Function)
            .unwrap();
        let object = bridge
            .create_proxy(&ctx, plain, tandem_interop::ProxyShape::Object)
            .unwrap();
        ctx.globals().set("fp", function).unwrap();
        ctx.globals().set("op", object).unwrap();

        assert!(js::<bool>(&ctx, "typeof fp === 'function' && typeof op === 'object'"));
        assert!(js::<bool>(&ctx, "fp.a === 1 && 'a' in op && !('b' in op)"));
        assert!(js::<bool>(&ctx, "Object.getPrototypeOf(op) === null"));
        assert!(js::<bool>(&ctx, "Object.keys(op).length === 0 && Object.keys(fp).length === 0"));
        assert!(js::<bool>(&ctx, "Object.getOwnPropertyDescriptor(op, 'a') === undefined"));
        assert!(js::<bool>(&ctx, "Reflect.defineProperty(op, 'x', { value: 1 }) === false"));
        assert!(js::<bool>(&ctx, "Reflect.setPrototypeOf(op, {}) === false"));
        let message: String = js(&ctx, "try { new fp(); 'constructed' } catch (e) { e.message }");
        assert_eq!(message, "not a constructor");

        js::<()>(&ctx, "op.b = 2; delete op.a;");
        assert!(lua::<bool>(bridge, &ctx, "return plain.a == nil and plain.b == 2"));
    });
}

#[test]
fn proxies_dispatch_to_metafields() {
    let session = session();
    session.with(|ctx, bridge| {
        js::<()>(
            &ctx,
            "globalThis.describe = (value) => ({ value, enumerable: true, configurable: true });",
        );
        exec(
            bridge,
            &ctx,
            "made = setmetatable({}, {
               construct = function(self, x) return { built = x } end,
               ownKeys = function() return { 'one', 'two' } end,
               getOwnPropertyDescriptor = function(self, key) return js.global:describe(key) end,
               getPrototypeOf = function() return js.global.Array.prototype end,
               __call = function(self, this, a) return a * 2 end,
             })",
        );
        let made: LuaValue = bridge.lua().globals().get("made").unwrap();
        let proxy = bridge
            .create_proxy(&ctx, made, tandem_interop::ProxyShape::Function)
            .unwrap();
        ctx.globals().set("made", proxy).unwrap();

        assert_eq!(js::<i32>(&ctx, "made(21)"), 42);
        assert_eq!(js::<i32>(&ctx, "new made(5).get('built')"), 5);
        assert!(js::<bool>(&ctx, "Object.getPrototypeOf(made) === Array.prototype"));
        let keys: Vec<String> = js(&ctx, "Reflect.ownKeys(made).filter(k => k !== 'prototype')");
        assert_eq!(keys, vec!["one".to_string(), "two".to_string()]);
        assert_eq!(js::<String>(&ctx, "Object.getOwnPropertyDescriptor(made, 'one').value"), "one");
    });
}

#[test]
fn proxies_cross_back_as_facades() {
    let session = session();
    session.with(|ctx, bridge| {
        exec(bridge, &ctx, "plain = {}");
        let pushed: LuaValue = lua(bridge, &ctx, "return js.createproxy(plain, 'object')");
        assert!(matches!(pushed, LuaValue::UserData(_)));
        let proxy = bridge.to_host(&ctx, &pushed).unwrap();
        ctx.globals().set("p", proxy).unwrap();
        assert!(js::<bool>(&ctx, "typeof p === 'object'"));
        assert!(lua::<bool>(bridge, &ctx, "local p = js.createproxy(plain, 'object') return not rawequal(p, plain)"));
    });
}

// ============================================================================
// Host library
// ============================================================================

#[test]
fn library_constructs_and_tests_host_objects() {
    let session = session();
    session.with(|ctx, bridge| {
        let size: i64 = lua(
            bridge,
            &ctx,
            "local map = js.new(js.global.Map)
             map:set('a', 1)
             map:set('b', 2)
             return map.size",
        );
        assert_eq!(size, 2);
        assert!(lua::<bool>(bridge, &ctx, "return js.instanceof(js.new(js.global.Map), js.global.Map)"));
        assert!(!lua::<bool>(bridge, &ctx, "return js.instanceof(js.new(js.global.Object), js.global.Map)"));
        assert_eq!(lua::<String>(bridge, &ctx, "return js.typeof(js.global.Map)"), "function");
        assert_eq!(lua::<String>(bridge, &ctx, "return js.typeof(nil)"), "undefined");
        assert_eq!(lua::<String>(bridge, &ctx, "return js.typeof(js.null)"), "object");
        assert_eq!(lua::<String>(bridge, &ctx, "return js.typeof('s')"), "string");
    });
}

#[test]
fn library_new_rejects_non_constructors() {
    let session = session();
    session.with(|ctx, bridge| {
        let message: String = lua(
            bridge,
            &ctx,
            "local ok, err = pcall(js.new, js.global.Math) return tostring(err.message or err)",
        );
        assert!(message.contains("not a constructor"), "{message}");
        let missing: String = lua(bridge, &ctx, "local ok, err = pcall(js.new) return err");
        assert_eq!(missing, "bad argument #1 to 'new' (value expected)");
    });
}

#[test]
fn library_of_steps_through_host_iterables() {
    let session = session();
    session.with(|ctx, bridge| {
        js::<()>(&ctx, "globalThis.numbers = new Set([1, 2, 3, 4]);");
        let sum: i64 = lua(
            bridge,
            &ctx,
            "local sum = 0 for v in js.of(js.global.numbers) do sum = sum + v end return sum",
        );
        assert_eq!(sum, 10);
        let text: String = lua(
            bridge,
            &ctx,
            "local out = {} for ch in js.of('héllo') do out[#out + 1] = ch end return table.concat(out, '|')",
        );
        assert_eq!(text, "h|é|l|l|o");
    });
}

#[test]
fn library_of_rejects_non_iterables() {
    let session = session();
    session.with(|ctx, bridge| {
        js::<()>(&ctx, "globalThis.broken = { [Symbol.iterator]() { return 1; } };");
        let plain: String = lua(bridge, &ctx, "local ok, err = pcall(js.of, js.new(js.global.Object)) return err");
        assert_eq!(plain, "bad argument #1 to 'of' (object not iterable)");
        let undefined: String = lua(bridge, &ctx, "local ok, err = pcall(js.of, nil) return err");
        assert_eq!(undefined, "bad argument #1 to 'of' (object not iterable)");
        let broken: String = lua(bridge, &ctx, "local ok, err = pcall(js.of, js.global.broken) return err");
        assert_eq!(
            broken,
            "bad argument #1 to 'of' (Result of the Symbol.iterator method is not an object)"
        );
    });
}

#[test]
fn library_createproxy_validates_the_shape() {
    let session = session();
    session.with(|ctx, bridge| {
        assert_eq!(lua::<String>(bridge, &ctx, "return js.typeof(js.createproxy({}))"), "function");
        assert_eq!(lua::<String>(bridge, &ctx, "return js.typeof(js.createproxy({}, 'object'))"), "object");
        let invalid: String = lua(bridge, &ctx, "local ok, err = pcall(js.createproxy, {}, 'table') return err");
        assert_eq!(invalid, "bad argument #2 to 'createproxy' (invalid option 'table')");
        let wrong: String = lua(bridge, &ctx, "local ok, err = pcall(js.createproxy, {}, true) return err");
        assert_eq!(wrong, "bad argument #2 to 'createproxy' (string expected, got boolean)");
    });
}

#[test]
fn library_tonumber_follows_host_rules() {
    let session = session();
    session.with(|ctx, bridge| {
        assert_eq!(lua::<f64>(bridge, &ctx, "return js.tonumber('0x10')"), 16.0);
        assert_eq!(lua::<f64>(bridge, &ctx, "return js.tonumber(' 1e3 ')"), 1000.0);
        assert!(lua::<bool>(bridge, &ctx, "return js.tonumber('0x1ffffffffffffffff') == 2.0^65"));
        assert!(lua::<bool>(bridge, &ctx, "local n = js.tonumber('nope') return n ~= n"));
        assert_eq!(lua::<f64>(bridge, &ctx, "return js.tonumber(true)"), 1.0);
    });
}

// ============================================================================
// Configuration and lifecycle
// ============================================================================

#[test]
fn opening_twice_returns_the_same_bridge() {
    let session = session();
    session.with(|ctx, bridge| {
        let again = Bridge::open(&ctx, bridge.lua(), InteropConfig::default()).unwrap();
        assert!(again.ptr_eq(bridge));
        let found = Bridge::of(bridge.lua()).unwrap();
        assert!(found.ptr_eq(bridge));
    });
}

#[test]
fn library_name_and_registration_follow_the_config() {
    let config = InteropConfig {
        library_name: "host".to_string(),
        expose_global: false,
        ..InteropConfig::default()
    };
    let session = Session::new(config).unwrap();
    session.with(|ctx, bridge| {
        assert!(lua::<bool>(bridge, &ctx, "return js == nil and host ~= nil and host.global == nil"));
        assert_eq!(bridge.config().library_name, "host");
    });

    let hidden = Session::new(InteropConfig {
        register_global: false,
        ..InteropConfig::default()
    })
    .unwrap();
    hidden.with(|ctx, bridge| {
        assert!(lua::<bool>(bridge, &ctx, "return js == nil"));
    });
}

#[test]
fn malformed_config_is_rejected() {
    assert!(matches!(
        InteropConfig::from_json_str("{"),
        Err(BridgeError::Config(_))
    ));
    assert!(matches!(
        InteropConfig::from_json_str("[]"),
        Err(BridgeError::Config(_))
    ));
}
