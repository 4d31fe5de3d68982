//! Protocol upgrade hand-off (e.g. WebSocket).
//!
//! # Responsibilities
//! - Check the upstream switched to the protocol the client asked for
//! - Take over both upgraded connections
//! - Pump bytes in both directions until one side finishes
//!
//! # Data Flow
//! ```text
//! Client ←──── raw bytes ────→ Proxy ←──── raw bytes ────→ Upstream
//! ```
//!
//! # Design Decisions
//! - The 101 response is sent unchanged; hyper completes both upgrades
//!   only after it has been written
//! - The first pump to finish ends the tunnel; its error is logged
//! - Cancellation closes both sides

use axum::body::Body;
use axum::http::Response;
use hyper::upgrade::OnUpgrade;
use hyper_util::rt::TokioIo;
use tokio::io::{self, AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;

use crate::error::ProxyError;
use crate::http::request::upgrade_type;

/// Hand a 101 response back to the client and start the tunnel.
///
/// `inbound` is the client's pending upgrade and `requested` the protocol
/// it asked for.
pub fn switch_protocols(
    inbound: Option<OnUpgrade>,
    requested: Option<&str>,
    res: Response<Body>,
    upstream: &str,
    cancel: CancellationToken,
) -> Result<Response<Body>, ProxyError> {
    let (mut parts, _body) = res.into_parts();

    let offered = upgrade_type(&parts.headers);
    if offered.as_deref() != requested {
        return Err(ProxyError::ProxyProtocolSwitch {
            reason: format!(
                "upstream switched to {:?} when {:?} was requested",
                offered.unwrap_or_default(),
                requested.unwrap_or_default()
            ),
        });
    }

    let Some(backend) = parts.extensions.remove::<OnUpgrade>() else {
        return Err(ProxyError::ProxyProtocolSwitch {
            reason: "upstream response is not a full-duplex stream".to_string(),
        });
    };
    let Some(client) = inbound else {
        return Err(ProxyError::ProxyProtocolSwitch {
            reason: "client connection cannot be taken over".to_string(),
        });
    };

    let upstream = upstream.to_string();
    tokio::spawn(async move {
        let (client, backend) = match tokio::try_join!(client, backend) {
            Ok(pair) => pair,
            Err(e) => {
                log_pump_error(ProxyError::ProxyBidirectionalCom {
                    upstream,
                    source: io::Error::other(e),
                });
                return;
            }
        };

        tracing::debug!(upstream = %upstream, "Upgraded tunnel established");
        if let Err(source) = tunnel(TokioIo::new(client), TokioIo::new(backend), cancel).await {
            log_pump_error(ProxyError::ProxyBidirectionalCom { upstream, source });
        }
    });

    Ok(Response::from_parts(parts, Body::empty()))
}

/// Copy in both directions until either side finishes or `cancel` fires.
pub async fn tunnel<C, B>(client: C, backend: B, cancel: CancellationToken) -> io::Result<()>
where
    C: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    let (mut client_read, mut client_write) = io::split(client);
    let (mut backend_read, mut backend_write) = io::split(backend);

    tokio::select! {
        r = io::copy(&mut client_read, &mut backend_write) => r.map(|_| ()),
        r = io::copy(&mut backend_read, &mut client_write) => r.map(|_| ()),
        _ = cancel.cancelled() => Ok(()),
    }
}

fn log_pump_error(err: ProxyError) {
    tracing::warn!(
        kind = err.kind().as_str(),
        error = %err,
        cause = std::error::Error::source(&err).map(tracing::field::display),
        "Upgraded tunnel failed"
    );
}
