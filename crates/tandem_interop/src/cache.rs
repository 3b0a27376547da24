//! Identity cache
//!
//! Keeps one facade per host object and one wrapper per embedded value so
//! that crossing the boundary repeatedly yields the same object.
//!
//! Host objects are keyed by the id the prelude assigns through a host
//! `WeakMap`, so the key never keeps the object alive. The facade side is a
//! weak-valued embedded table: once embedded code drops a facade the
//! collector clears its entry and releases the host object with it.
//!
//! Wrappers hold their embedded value, and the host engine offers no weak
//! handle to hold the wrapper by, so wrapper entries live until the host
//! side releases them explicitly ([`crate::Bridge::release`]) or the bridge
//! closes.

use mlua::{Lua, Table, Value as LuaValue};
use rquickjs::{Ctx, Persistent, Value};
use std::collections::HashMap;

struct WrapperEntry {
    value: LuaValue,
    wrapper: Persistent<Value<'static>>,
    id: u64,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub facades: usize,
    pub wrappers: usize,
    pub hits: u64,
    pub misses: u64,
    pub swept: u64,
}

pub struct IdentityCache {
    /// Host object id to facade userdata, weak values.
    facades: Table,
    /// Embedded value address to its host wrapper.
    wrappers: HashMap<usize, WrapperEntry>,
    /// Host id of each wrapper to its embedded value address.
    wrapper_ids: HashMap<u64, usize>,
    threshold: usize,
    inserted: usize,
    hits: u64,
    misses: u64,
    swept: u64,
}

impl IdentityCache {
    pub(crate) fn new(facades: Table, threshold: usize) -> Self {
        Self {
            facades,
            wrappers: HashMap::new(),
            wrapper_ids: HashMap::new(),
            threshold: threshold.max(1),
            inserted: 0,
            hits: 0,
            misses: 0,
            swept: 0,
        }
    }

    pub fn facade_count(&self) -> usize {
        self.facades.clone().pairs::<LuaValue, LuaValue>().count()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            facades: self.facade_count(),
            wrappers: self.wrappers.len(),
            hits: self.hits,
            misses: self.misses,
            swept: self.swept,
        }
    }

    /// The live facade already minted for the host object with `id`.
    pub(crate) fn facade_for(&mut self, id: u64) -> mlua::Result<Option<LuaValue>> {
        let found: LuaValue = self.facades.raw_get(id)?;
        let found = match found {
            LuaValue::UserData(_) => Some(found),
            _ => None,
        };
        self.record(id, found.is_some(), "facade");
        Ok(found)
    }

    pub(crate) fn insert_facade(&mut self, lua: &Lua, id: u64, facade: &LuaValue) -> mlua::Result<()> {
        self.facades.raw_set(id, facade.clone())?;
        self.inserted += 1;
        if self.inserted >= self.threshold {
            self.sweep(lua)?;
        }
        Ok(())
    }

    /// The wrapper already created for `value`.
    pub(crate) fn wrapper_for<'js>(&mut self, ctx: &Ctx<'js>, value: &LuaValue) -> rquickjs::Result<Option<Value<'js>>> {
        let key = value.to_pointer() as usize;
        let found = match self.wrappers.get(&key) {
            Some(entry) => Some(entry.wrapper.clone().restore(ctx)?),
            None => None,
        };
        self.record(key as u64, found.is_some(), "wrapper");
        Ok(found)
    }

    pub(crate) fn insert_wrapper<'js>(&mut self, ctx: &Ctx<'js>, value: LuaValue, wrapper: Value<'js>, id: u64) {
        let key = value.to_pointer() as usize;
        self.wrapper_ids.insert(id, key);
        self.wrappers.insert(
            key,
            WrapperEntry {
                value,
                wrapper: Persistent::save(ctx, wrapper),
                id,
            },
        );
    }

    /// The embedded value behind the wrapper with host id `id`.
    pub(crate) fn unwrap_id(&self, id: u64) -> Option<LuaValue> {
        let key = self.wrapper_ids.get(&id)?;
        self.wrappers.get(key).map(|entry| entry.value.clone())
    }

    /// Forget the wrapper with host id `id`.
    pub(crate) fn release(&mut self, id: u64) -> bool {
        let Some(key) = self.wrapper_ids.remove(&id) else {
            return false;
        };
        if let Some(entry) = self.wrappers.remove(&key) {
            tracing::debug!(id = entry.id, "wrapper released");
        }
        true
    }

    fn record(&mut self, key: u64, hit: bool, direction: &'static str) {
        if hit {
            self.hits += 1;
            tracing::debug!(key = format_args!("{:#x}", key), direction, "identity cache hit");
        } else {
            self.misses += 1;
            tracing::debug!(key = format_args!("{:#x}", key), direction, "identity cache miss");
        }
    }

    /// Collect dead facades now; returns how many entries went away.
    pub fn sweep(&mut self, lua: &Lua) -> mlua::Result<usize> {
        let before = self.facade_count();
        // Finalizers run in the first cycle, weak entries clear in the second.
        lua.gc_collect()?;
        lua.gc_collect()?;
        let removed = before.saturating_sub(self.facade_count());
        self.inserted = 0;
        self.swept += removed as u64;
        tracing::debug!(removed, remaining = self.facade_count(), "identity cache swept");
        Ok(removed)
    }
}
