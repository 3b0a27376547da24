//! Error channel between the two runtimes
//!
//! Embedded failures trapped by a protected call are rethrown on the host
//! side as the converted error value. Host exceptions raised while embedded
//! code runs a host operation become first-class embedded values: the hook
//! answers `false, value` and the shim raises `value` unchanged, so `pcall`
//! observes the same facade the identity cache hands out everywhere else.

use crate::context::BridgeInner;
use crate::convert;
use mlua::Value as LuaValue;
use rquickjs::{Ctx, Exception};
use std::rc::Rc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("host runtime error: {0}")]
    Host(#[from] rquickjs::Error),

    #[error("embedded runtime error: {0}")]
    Embedded(#[from] mlua::Error),

    /// A boundary call received an unusable argument.
    #[error("bad argument #{position} to '{function}' ({message})")]
    Argument {
        position: usize,
        function: &'static str,
        message: String,
    },

    /// A host value broke the iteration or capability protocol.
    #[error("{0}")]
    Protocol(String),

    #[error("{0}")]
    Type(String),

    #[error("embedded runtime is closed")]
    Closed,

    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),

    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    pub(crate) fn argument(position: usize, function: &'static str, message: impl Into<String>) -> Self {
        Self::Argument {
            position,
            function,
            message: message.into(),
        }
    }

    /// Rethrow on the host side.
    ///
    /// A pending host exception is left in place; everything else becomes a
    /// fresh host error object.
    pub(crate) fn throw<'js>(self, ctx: &Ctx<'js>) -> rquickjs::Error {
        match self {
            BridgeError::Host(err) => err,
            BridgeError::Closed | BridgeError::Type(_) | BridgeError::Argument { .. } => {
                Exception::throw_type(ctx, &self.to_string())
            }
            other => Exception::throw_internal(ctx, &other.to_string()),
        }
    }
}

/// Rethrow a bridge failure from a host callback.
pub(crate) trait OrThrow<T> {
    fn or_throw(self, ctx: &Ctx<'_>) -> rquickjs::Result<T>;
}

impl<T> OrThrow<T> for Result<T, BridgeError> {
    fn or_throw(self, ctx: &Ctx<'_>) -> rquickjs::Result<T> {
        self.map_err(|err| err.throw(ctx))
    }
}

/// The embedded value a failed host operation raises.
pub(crate) fn raised_value<'js>(bridge: &Rc<BridgeInner>, ctx: &Ctx<'js>, error: BridgeError) -> LuaValue {
    let message = match error {
        BridgeError::Host(rquickjs::Error::Exception) => {
            let thrown = ctx.catch();
            match convert::push(bridge, ctx, thrown) {
                Ok(value) => return value,
                Err(err) => err.to_string(),
            }
        }
        other => other.to_string(),
    };
    tracing::debug!(%message, "host operation failed");
    match bridge.lua.create_string(&message) {
        Ok(text) => LuaValue::String(text),
        Err(err) => {
            tracing::warn!(%err, "could not raise host failure as a string");
            LuaValue::Nil
        }
    }
}
