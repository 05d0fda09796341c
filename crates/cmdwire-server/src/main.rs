//! cmdwire relay server.
//!
//! Forwards every command and raw payload a client sends to the other
//! clients of the same group (or to everyone else when the sender has no
//! group).
//!
//! ```text
//! cmdwire-server [config.toml]
//! ```
//!
//! A missing config file means defaults: `0.0.0.0:5000`, 16-byte headers,
//! marker grammar.  Log level follows `RUST_LOG` (default `info`).

use anyhow::Context;
use cmdwire_core::{Handler, Shape, WILDCARD};
use cmdwire_server::{relay, Server, ServerConfig, ServerCore, ServerEvent};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG_PATH: &str = "cmdwire-server.toml";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise structured logging.  Level is overridden by `RUST_LOG`.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let config = ServerConfig::load(&path).with_context(|| format!("loading {path}"))?;
    let background = config.background;

    let mut server = Server::bind(config).await?;
    server.on_event(
        ServerEvent::Join,
        Handler::with_identity(|core: &mut ServerCore, who| {
            info!(client = %who, online = core.clients().len(), "joined");
            Ok(())
        }),
    )?;
    server.on_event(
        ServerEvent::Leave,
        Handler::with_identity(|core: &mut ServerCore, who| {
            info!(client = %who, online = core.clients().len(), "left");
            Ok(())
        }),
    )?;
    server.register(WILDCARD, Handler::inline(Shape::IdentityPayload, None, relay))?;

    info!(addr = %server.local_addr(), "cmdwire relay ready.  Press Ctrl-C to exit.");

    if background {
        // ── Background runner ─────────────────────────────────────────────────
        let (handle, task) = server.spawn();
        tokio::signal::ctrl_c().await?;
        info!("shutdown signal received");
        handle.close()?;
        task.await??;
    } else {
        // ── Foreground loop ───────────────────────────────────────────────────
        loop {
            tokio::select! {
                result = server.run() => match result {
                    Ok(()) => break,
                    Err(e) => warn!(error = %e, "frame rejected"),
                },
                signal = tokio::signal::ctrl_c() => {
                    signal?;
                    info!("shutdown signal received");
                    server.close()?;
                    break;
                }
            }
        }
    }

    info!("cmdwire relay stopped");
    Ok(())
}
