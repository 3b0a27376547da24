//! Tandem Runtime
//!
//! Opens a session pairing a QuickJS context with a Lua state, walks a few
//! values across the bridge in both directions and optionally runs a Lua
//! script with the host library loaded.

use anyhow::{anyhow, Context as _, Result};
use clap::Parser;
use rquickjs::{CatchResultExt, Ctx};
use std::path::PathBuf;
use tandem_interop::{Bridge, InteropConfig, Session};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "tandem", version, about = "Host/embedded runtime bridge")]
struct Args {
    /// JSON bridge configuration; defaults apply to missing fields.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Lua script to run after the walkthrough.
    script: Option<PathBuf>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => InteropConfig::load(path)
            .map_err(|e| anyhow!("loading {}: {}", path.display(), e))?,
        None => InteropConfig::default(),
    };
    let script = match &args.script {
        Some(path) => Some(
            std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?,
        ),
        None => None,
    };

    tracing::info!("Tandem v{}", tandem_interop::VERSION);
    let session = Session::new(config).map_err(|e| anyhow!("opening session: {}", e))?;

    session.with(|ctx, bridge| -> Result<()> {
        host_to_embedded(&ctx, bridge)?;
        embedded_to_host(&ctx, bridge)?;
        if let Some(source) = &script {
            let result = bridge.eval(&ctx, source).catch(&ctx).map_err(|e| anyhow!("script failed: {}", e))?;
            tracing::info!(result = ?result.type_of(), "script finished");
        }
        Ok(())
    })?;

    let stats = session.bridge().cache_stats();
    tracing::info!(
        facades = stats.facades,
        wrappers = stats.wrappers,
        hits = stats.hits,
        misses = stats.misses,
        "walkthrough finished"
    );
    Ok(())
}

// Host errors borrow the context, so they are flattened to text before
// reaching anyhow.
fn flatten<T>(ctx: &Ctx<'_>, result: rquickjs::Result<T>) -> Result<T> {
    result.catch(ctx).map_err(|e| anyhow!("{}", e))
}

/// Host code calling an embedded function that answers several values.
fn host_to_embedded(ctx: &Ctx<'_>, bridge: &Bridge) -> Result<()> {
    bridge
        .enter(ctx, |lua| {
            lua.load("function measure(_, a, b) return a + b, a * b end").exec()
        })
        .map_err(|e| anyhow!("embedded runtime error: {}", e))?;
    let measure: mlua::Value = bridge
        .lua()
        .globals()
        .get("measure")
        .map_err(|e| anyhow!("embedded runtime error: {}", e))?;
    let wrapper = bridge.wrap(ctx, measure).map_err(|e| anyhow!("{}", e))?;
    flatten(ctx, ctx.globals().set("measure", wrapper))?;

    let results: Vec<f64> = flatten(ctx, ctx.eval("measure.invoke(null, [6, 7])"))?;
    tracing::info!(?results, "embedded function returned");
    Ok(())
}

/// Embedded code iterating a host array through its facade.
fn embedded_to_host(ctx: &Ctx<'_>, bridge: &Bridge) -> Result<()> {
    let config = bridge.config();
    if !config.register_global || !config.expose_global {
        tracing::info!("library or host global not exposed, skipping");
        return Ok(());
    }
    flatten(ctx, ctx.eval::<(), _>("globalThis.names = ['alpha', 'beta', 'gamma'];"))?;
    let library = &config.library_name;
    let source = format!(
        "local steps = {{}}
         for i, name in pairs({library}.global.names) do steps[#steps + 1] = i .. '=' .. name end
         return table.concat(steps, ', '), {library}.typeof({library}.null)"
    );
    let (steps, kind): (String, String) = bridge
        .enter(ctx, |lua| lua.load(source.as_str()).eval())
        .map_err(|e| anyhow!("embedded runtime error: {}", e))?;
    tracing::info!(steps = %steps, "host array steps");
    tracing::info!(kind = %kind, "typeof null across the bridge");
    Ok(())
}
