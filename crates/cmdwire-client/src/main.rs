//! Interactive cmdwire client.
//!
//! Reads commands from stdin and prints everything the server sends.
//!
//! ```text
//! cmdwire-client [config.toml]
//!
//! > greet hello there      send command `greet` with payload "hello there"
//! > ping                   send command `ping` without payload
//! > /raw some bytes        send a payload without a command
//! > /name bob              rename;   `/name` alone clears the name
//! > /group g2              regroup;  `/group` alone leaves the group
//! > /who bob               look up clients by name or ip:port
//! > /quit
//! ```

use anyhow::Context;
use cmdwire_client::{Client, ClientConfig, ClientCore, ClientEvent};
use cmdwire_core::{Event, Handler, Shape, Value, WILDCARD};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG_PATH: &str = "cmdwire-client.toml";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise structured logging.  Level is overridden by `RUST_LOG`.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let config = ClientConfig::load(&path).with_context(|| format!("loading {path}"))?;
    let mut client = Client::connect(config).await?;

    client.register(
        WILDCARD,
        Handler::inline(Shape::Payload, None, |_: &mut ClientCore, event: Event| {
            let text = match event.payload {
                Some(Value::Bytes(bytes)) => String::from_utf8_lossy(&bytes).into_owned(),
                _ => String::new(),
            };
            match event.command {
                Some(command) => println!("[{command}] {text}"),
                None => println!("[raw] {text}"),
            }
            Ok(())
        }),
    )?;
    for (event, verb) in [(ClientEvent::Connect, "joined"), (ClientEvent::Disconnect, "left")] {
        client.on_event(
            event,
            Handler::with_identity(move |_: &mut ClientCore, peer| {
                println!("* {peer} {verb}");
                Ok(())
            }),
        )?;
    }
    client.on_event(
        ClientEvent::ForceDisconnect,
        Handler::bare(|_: &mut ClientCore| {
            println!("* kicked by server");
            Ok(())
        }),
    )?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            result = client.run() => {
                result?;
                break;
            }
            line = lines.next_line() => {
                let Some(line) = line? else {
                    client.close();
                    break;
                };
                if !execute(&mut client, line.trim()).await? {
                    client.close();
                    break;
                }
            }
        }
    }

    info!("bye");
    Ok(())
}

/// Runs one input line.  Returns `false` when the user asked to quit.
async fn execute(client: &mut Client, line: &str) -> anyhow::Result<bool> {
    let (head, rest) = match line.split_once(' ') {
        Some((head, rest)) => (head, rest.trim()),
        None => (line, ""),
    };
    let optional = |text: &str| (!text.is_empty()).then(|| text.to_string());

    match head {
        "" => {}
        "/quit" => return Ok(false),
        "/raw" => client.send_raw(rest.as_bytes())?,
        "/name" => client.change_name(optional(rest))?,
        "/group" => client.change_group(optional(rest))?,
        "/who" => {
            for peer in client.lookup(rest).await? {
                println!("* {peer} group={}", peer.group.as_deref().unwrap_or("-"));
            }
        }
        command if rest.is_empty() => client.send(command, ())?,
        command => client.send(command, rest)?,
    }
    Ok(true)
}
