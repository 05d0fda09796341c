//! # cmdwire-server
//!
//! TCP server endpoint for the cmdwire protocol.
//!
//! ```no_run
//! use cmdwire_core::{Handler, PayloadType};
//! use cmdwire_server::{Server, ServerConfig, ServerCore, ServerEvent};
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let mut server = Server::bind(ServerConfig::default()).await?;
//!
//! // Greet every client as soon as it has joined.
//! server.on_event(
//!     ServerEvent::Join,
//!     Handler::with_identity(|core: &mut ServerCore, who| {
//!         core.send_to(&who, "greet", "hi")?;
//!         Ok(())
//!     }),
//! )?;
//!
//! // Echo `shout` back to the whole group of the sender.
//! server.register(
//!     "shout",
//!     Handler::with_identity_payload(PayloadType::Text, |core: &mut ServerCore, who, text| {
//!         if let Some(group) = &who.group {
//!             core.send_group(group, "shout", text)?;
//!         }
//!         Ok(())
//!     }),
//! )?;
//!
//! server.run().await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Module map
//!
//! - **`config`** – [`ServerConfig`], loaded from TOML.
//! - **`server`** – [`Server`]: accept loop, poll loop, reserved events.
//! - **`connections`** – [`ServerCore`]: the registry plus every send and
//!   disconnect operation that inline handlers call.
//! - **`relay`** – [`relay()`]: the group-scoped forwarding handler the
//!   binary installs on the wildcard.
//! - **`handle`** – [`ServerHandle`]: the same operations as messages, for
//!   threaded handlers and other tasks.

pub mod config;
pub mod connections;
pub mod handle;
pub mod relay;
pub mod server;

pub use config::ServerConfig;
pub use connections::ServerCore;
pub use handle::ServerHandle;
pub use relay::relay;
pub use server::{Server, ServerError, ServerEvent, ServerHandler, SERVER_EVENTS};
