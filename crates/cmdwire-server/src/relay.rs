//! Peer relay: the wildcard handler the `cmdwire-server` binary installs.

use cmdwire_core::{Event, HandlerResult, Value};

use crate::connections::ServerCore;

/// Forwards one frame to the sender's peers: its group, or every other
/// client when the sender has no group.
///
/// The payload is passed through as the router delivered it, so a command
/// sent without a payload is forwarded without one.  Register it untyped:
///
/// ```no_run
/// # use cmdwire_core::{Handler, Shape, WILDCARD};
/// # fn demo(server: &mut cmdwire_server::Server) -> anyhow::Result<()> {
/// server.register(WILDCARD, Handler::inline(Shape::IdentityPayload, None, cmdwire_server::relay))?;
/// # Ok(())
/// # }
/// ```
pub fn relay(core: &mut ServerCore, event: Event) -> HandlerResult {
    let Some(sender) = event.identity else {
        return Ok(());
    };
    let payload = event.payload.unwrap_or(Value::Null);
    let peers: Vec<_> = core
        .clients()
        .into_iter()
        .filter(|peer| peer.addr != sender.addr)
        .filter(|peer| sender.group.is_none() || peer.group == sender.group)
        .collect();

    match event.command.as_deref() {
        Some(command) => {
            for peer in &peers {
                core.send_to(peer, command, payload.clone())?;
            }
        }
        None => {
            let bytes = payload.to_payload()?.unwrap_or_default();
            for peer in &peers {
                core.send_raw(peer, &bytes)?;
            }
        }
    }
    Ok(())
}
