//! Iteration across the boundary
//!
//! Two adapters live here: the host-side cursor over an embedded `pairs`
//! traversal, and the stepper `js.of` hands to a generic `for` over a host
//! iterable. Facade `__pairs` lives with the capabilities.

use crate::context::BridgeInner;
use crate::convert;
use crate::error::BridgeError;
use crate::facade;
use mlua::{UserData, Value as LuaValue};
use rquickjs::{Ctx, FromJs, Persistent, Value};
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

// ============================================================================
// Embedded pairs, driven from the host
// ============================================================================

/// Host-side cursor over an embedded `pairs` traversal.
pub struct ForeignIterator {
    bridge: Weak<BridgeInner>,
    iterator: LuaValue,
    invariant: LuaValue,
    last: RefCell<LuaValue>,
    done: Cell<bool>,
}

impl ForeignIterator {
    pub(crate) fn new(bridge: &Rc<BridgeInner>, iterator: LuaValue, invariant: LuaValue, control: LuaValue) -> Self {
        Self {
            bridge: Rc::downgrade(bridge),
            iterator,
            invariant,
            last: RefCell::new(control),
            done: Cell::new(false),
        }
    }

    pub fn is_done(&self) -> bool {
        self.done.get()
    }

    /// Advance the traversal; `None` once the first result comes back nil.
    pub fn next<'js>(&self, ctx: &Ctx<'js>) -> Result<Option<Vec<Value<'js>>>, BridgeError> {
        if self.done.get() {
            return Ok(None);
        }
        let bridge = self.bridge.upgrade().ok_or(BridgeError::Closed)?;
        let last = self.last.borrow().clone();
        let step = bridge.call_or_throw(ctx, self.iterator.clone(), vec![self.invariant.clone(), last]);

        let results = match step {
            Ok(results) => results,
            Err(err) => {
                self.done.set(true);
                return Err(err);
            }
        };
        match results.first() {
            None | Some(LuaValue::Nil) => {
                self.done.set(true);
                Ok(None)
            }
            Some(first) => {
                *self.last.borrow_mut() = first.clone();
                Ok(Some(convert::to_host_all(&bridge, ctx, &results)?))
            }
        }
    }
}

// ============================================================================
// Host iterables, driven from embedded code
// ============================================================================

/// The iterator object of a `js.of` loop and its `next` method.
pub struct IterationRecord {
    iterator: Persistent<Value<'static>>,
    next: Persistent<Value<'static>>,
}

impl UserData for IterationRecord {}

/// `js.of(iterable)`: `(stepper, iterator)` for a generic `for`.
pub(crate) fn of<'js>(bridge: &Rc<BridgeInner>, ctx: &Ctx<'js>, args: &[LuaValue]) -> Result<Vec<LuaValue>, BridgeError> {
    let iterable = convert::to_host(bridge, ctx, &facade::arg(args, 1))?;
    let method = if iterable.is_undefined() || iterable.is_null() {
        iterable.clone()
    } else {
        let symbol: Value = bridge.prelude(ctx)?.get("iterator")?;
        bridge.prelude_call(ctx, "get", (iterable.clone(), symbol))?
    };
    if !bridge.prelude_call::<_, bool>(ctx, "isCallable", (method.clone(),))? {
        return Err(BridgeError::argument(1, "of", "object not iterable"));
    }

    let iterator: Value = bridge.prelude_call(ctx, "apply", (method, iterable, Vec::<Value>::new()))?;
    if !bridge.prelude_call::<_, bool>(ctx, "isObject", (iterator.clone(),))? {
        return Err(BridgeError::argument(
            1,
            "of",
            "Result of the Symbol.iterator method is not an object",
        ));
    }
    let next: Value = bridge.prelude_call(ctx, "get", (iterator.clone(), "next"))?;
    let record = IterationRecord {
        iterator: Persistent::save(ctx, iterator.clone()),
        next: Persistent::save(ctx, next),
    };

    let record = LuaValue::UserData(bridge.lua.create_userdata(record)?);
    let stepper = bridge.bound("next", record)?;
    Ok(vec![stepper, convert::push(bridge, ctx, iterator)?])
}

/// One `js.of` step: the iterator's next value, nothing once it is done.
pub(crate) fn next<'js>(bridge: &Rc<BridgeInner>, ctx: &Ctx<'js>, args: &[LuaValue]) -> Result<Vec<LuaValue>, BridgeError> {
    let LuaValue::UserData(userdata) = facade::arg(args, 1) else {
        return Err(BridgeError::argument(1, "next", "iteration record expected"));
    };
    let (iterator, next) = {
        let record = userdata.borrow::<IterationRecord>()?;
        (record.iterator.clone().restore(ctx)?, record.next.clone().restore(ctx)?)
    };
    let step: Value = bridge.prelude_call(ctx, "step", (iterator, next))?;
    let values = Vec::<Value>::from_js(ctx, step)?;
    convert::push_all(bridge, ctx, values)
}
