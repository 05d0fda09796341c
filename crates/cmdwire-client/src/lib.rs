//! # cmdwire-client
//!
//! TCP client endpoint for the cmdwire protocol.
//!
//! ```no_run
//! use cmdwire_client::{Client, ClientConfig, ClientCore, ClientEvent};
//! use cmdwire_core::{Handler, PayloadType};
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let config = ClientConfig::new("127.0.0.1", 5000).with_name("alice").with_group("g1");
//! let mut client = Client::connect(config).await?;
//!
//! client.on_event(
//!     ClientEvent::Connect,
//!     Handler::with_identity(|_: &mut ClientCore, peer| {
//!         println!("{peer} joined");
//!         Ok(())
//!     }),
//! )?;
//!
//! client.send("hello", "everyone")?;
//! let greeting = client.recv(Some("greet"), &PayloadType::Text).await?;
//! println!("server says {greeting:?}");
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod connection;
pub mod handle;

pub use client::{Client, ClientError, ClientEvent, ClientHandler, CLIENT_EVENTS};
pub use config::ClientConfig;
pub use connection::ClientCore;
pub use handle::ClientHandle;
