use crate::context::BridgeInner;
use mlua::{Function, Value as LuaValue};

/// Slot field holding the innermost entry's hook.
pub(crate) const HOOK_FIELD: &str = "hook";

/// Installs a host entry's hook and puts the previous one back when dropped.
///
/// Every call from the host into embedded code takes one, so nested entries
/// unwind to the enclosing entry's hook on success, on trapped failure and
/// when an error propagates out of a re-entrant callback.
pub struct HookGuard<'a> {
    bridge: &'a BridgeInner,
    previous: LuaValue,
}

impl<'a> HookGuard<'a> {
    pub(crate) fn install(bridge: &'a BridgeInner, hook: Function) -> mlua::Result<Self> {
        let previous: LuaValue = bridge.slot.raw_get(HOOK_FIELD)?;
        bridge.slot.raw_set(HOOK_FIELD, hook)?;
        let depth = bridge.depth.get() + 1;
        bridge.depth.set(depth);
        tracing::trace!(depth, "host entry");
        Ok(Self { bridge, previous })
    }

    pub fn depth(&self) -> usize {
        self.bridge.depth.get()
    }
}

impl Drop for HookGuard<'_> {
    fn drop(&mut self) {
        let previous = std::mem::replace(&mut self.previous, LuaValue::Nil);
        if let Err(err) = self.bridge.slot.raw_set(HOOK_FIELD, previous) {
            tracing::warn!(%err, "failed to restore the enclosing host entry");
        }
        let depth = self.bridge.depth.get().saturating_sub(1);
        self.bridge.depth.set(depth);
        tracing::trace!(depth, "host exit");
    }
}
