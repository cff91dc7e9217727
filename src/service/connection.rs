//! # Connection Actors
//!
//! One tokio task per socket. The actor owns the framed stream and its
//! session, and `select!`s over inbound frames, a housekeeping tick and the
//! shutdown signal. Session actions are executed strictly in order, so a
//! cipher switch never overtakes the reply negotiating it.
//!
//! Errors never escape an actor: transient disconnects end it quietly,
//! everything else is logged once.

use std::time::{Duration, Instant};

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::watch;
use tokio_util::codec::Framed;
use tracing::{debug, error, info, instrument, warn};

use crate::config::ServerConfig;
use crate::core::codec::FrameCodec;
use crate::error::ProtocolError;
use crate::protocol::session::{
    ConnectionState, Session, SessionAction, SessionContext, SessionServices,
};
use crate::sts::codec::StsCodec;
use crate::sts::session::{StsAction, StsSession};
use crate::utils::metrics::Metrics;
use crate::utils::timeout::TIMER_TICK;

/// Log an error that ends or disrupts a connection, once.
fn report(connection_id: u64, metrics: &Metrics, error: &ProtocolError) {
    if error.is_transient_disconnect() {
        debug!(connection_id, error = %error, "Peer went away");
        return;
    }
    match error {
        ProtocolError::Decode(_)
        | ProtocolError::UnexpectedEof { .. }
        | ProtocolError::OversizedFrame(_)
        | ProtocolError::Sts(_) => {
            metrics.decode_error();
            warn!(connection_id, error = %error, "Malformed input, disconnecting");
        }
        ProtocolError::Timeout => {
            metrics.timeout();
            warn!(connection_id, "Login deadline passed, disconnecting");
        }
        ProtocolError::ConnectionTimeout => {
            metrics.timeout();
            info!(connection_id, "Idle timeout");
        }
        ProtocolError::KeyTooShort(_) | ProtocolError::KeyIndexOutOfBounds(_) => {
            metrics.cipher_error();
            error!(connection_id, error = %error, "Cipher failure");
        }
        _ => {
            metrics.connection_error();
            error!(connection_id, error = %error, "Connection error");
        }
    }
}

/// Deadline check run on every timer tick.
///
/// A peer still logging in past `handshake_timeout` gets `Timeout`; any peer
/// silent for longer than `idle_timeout` gets `ConnectionTimeout`.
fn check_timeouts(
    logging_in: bool,
    since_accept: Duration,
    since_activity: Duration,
    server: &ServerConfig,
) -> Result<(), ProtocolError> {
    if logging_in && since_accept > server.handshake_timeout {
        return Err(ProtocolError::Timeout);
    }
    if since_activity > server.idle_timeout {
        return Err(ProtocolError::ConnectionTimeout);
    }
    Ok(())
}

/// Execute session actions in order.
///
/// Returns `false` once the connection should end. A cipher failure drops
/// the rest of the batch (so no key switch follows an unsent reply) but
/// keeps the connection.
async fn execute<S>(
    framed: &mut Framed<S, FrameCodec>,
    session: &mut Session,
    actions: Vec<SessionAction>,
    metrics: &Metrics,
) -> bool
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let connection_id = session.context().connection_id;
    for action in actions {
        match action {
            SessionAction::Send(frame) => {
                let opcode = frame.opcode;
                let wire = match session.seal(frame) {
                    Ok(wire) => wire,
                    Err(e) => {
                        report(connection_id, metrics, &e);
                        warn!(connection_id, opcode, "Send aborted, remaining actions dropped");
                        return true;
                    }
                };
                let len = wire.wire_len() as u64;
                if let Err(e) = framed.send(wire).await {
                    report(connection_id, metrics, &e);
                    session.transition(ConnectionState::Disconnected);
                    return false;
                }
                metrics.frame_sent(len);
            }
            SessionAction::InstallCipher(pair) => session.install_cipher(pair),
            SessionAction::Transition(state) => session.transition(state),
            SessionAction::Close(reason) => {
                info!(connection_id, reason = %reason, "Closing connection");
                session.transition(ConnectionState::Disconnected);
                return false;
            }
        }
    }
    true
}

/// Drive one binary-protocol connection until it ends.
#[instrument(skip_all, fields(connection_id = ctx.connection_id, role = %ctx.role))]
pub async fn run_connection<S>(
    stream: S,
    ctx: SessionContext,
    services: SessionServices,
    mut shutdown: watch::Receiver<bool>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let metrics = services.metrics.clone();
    let server = services.config.server.clone();
    let connection_id = ctx.connection_id;

    let mut framed = Framed::new(stream, FrameCodec::new(server.max_frame_size));
    let mut session = Session::new(ctx, services);
    metrics.connection_established();
    debug!("Connection accepted");

    let greeting = match session.on_connect() {
        Ok(actions) => actions,
        Err(e) => {
            report(connection_id, &metrics, &e);
            metrics.connection_closed();
            return;
        }
    };

    let accepted_at = Instant::now();
    let mut last_activity = Instant::now();
    let mut tick = tokio::time::interval(TIMER_TICK);

    if execute(&mut framed, &mut session, greeting, &metrics).await {
        loop {
            tokio::select! {
                inbound = framed.next() => {
                    let frame = match inbound {
                        Some(Ok(frame)) => frame,
                        Some(Err(e)) => {
                            report(connection_id, &metrics, &e);
                            break;
                        }
                        None => {
                            debug!("Peer closed the connection");
                            break;
                        }
                    };
                    last_activity = Instant::now();
                    metrics.frame_received(frame.wire_len() as u64);

                    match session.handle_frame(frame) {
                        Ok(actions) => {
                            if !execute(&mut framed, &mut session, actions, &metrics).await {
                                break;
                            }
                        }
                        Err(e) if e.is_fatal() => {
                            report(connection_id, &metrics, &e);
                            break;
                        }
                        Err(e) => report(connection_id, &metrics, &e),
                    }
                }
                _ = tick.tick() => {
                    if let Err(e) = check_timeouts(
                        session.state() == ConnectionState::Authenticating,
                        accepted_at.elapsed(),
                        last_activity.elapsed(),
                        &server,
                    ) {
                        report(connection_id, &metrics, &e);
                        break;
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        debug!("Shutdown requested");
                        break;
                    }
                }
            }
        }
    }

    session.transition(ConnectionState::Disconnected);
    metrics.connection_closed();
    debug!("Connection finished");
}

/// Drive one bootstrap-channel connection until it ends.
#[instrument(skip_all, fields(connection_id = connection_id))]
pub async fn run_sts_connection<S>(
    stream: S,
    connection_id: u64,
    services: SessionServices,
    mut shutdown: watch::Receiver<bool>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let metrics = services.metrics.clone();
    let server = services.config.server.clone();
    let mut framed = Framed::new(stream, StsCodec::new());
    let mut session = StsSession::new(connection_id, services);
    metrics.connection_established();

    let accepted_at = Instant::now();
    let mut last_activity = Instant::now();
    let mut tick = tokio::time::interval(TIMER_TICK);

    'conn: loop {
        tokio::select! {
            inbound = framed.next() => {
                let request = match inbound {
                    Some(Ok(request)) => request,
                    Some(Err(e)) => {
                        report(connection_id, &metrics, &e);
                        break;
                    }
                    None => break,
                };
                last_activity = Instant::now();

                let actions = match session.handle(&request) {
                    Ok(actions) => actions,
                    Err(e) => {
                        report(connection_id, &metrics, &e);
                        break;
                    }
                };
                for action in actions {
                    match action {
                        StsAction::Reply(reply) => {
                            if let Err(e) = framed.send(reply).await {
                                report(connection_id, &metrics, &e);
                                break 'conn;
                            }
                        }
                        StsAction::EnableCipher(cipher) => framed.codec_mut().enable_cipher(cipher),
                        StsAction::Close(reason) => {
                            info!(connection_id, reason = %reason, "Closing bootstrap connection");
                            break 'conn;
                        }
                    }
                }
            }
            _ = tick.tick() => {
                if let Err(e) = check_timeouts(
                    session.identity().is_none(),
                    accepted_at.elapsed(),
                    last_activity.elapsed(),
                    &server,
                ) {
                    report(connection_id, &metrics, &e);
                    break;
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    metrics.connection_closed();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server() -> ServerConfig {
        ServerConfig {
            handshake_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(30),
            ..ServerConfig::default()
        }
    }

    #[test]
    fn test_login_deadline_only_while_logging_in() {
        let server = server();
        let late = Duration::from_secs(6);
        let recent = Duration::from_secs(1);

        assert!(matches!(
            check_timeouts(true, late, recent, &server),
            Err(ProtocolError::Timeout)
        ));
        assert!(check_timeouts(false, late, recent, &server).is_ok());
        assert!(check_timeouts(true, recent, recent, &server).is_ok());
    }

    #[test]
    fn test_idle_deadline_reports_connection_timeout() {
        let server = server();
        let idle = Duration::from_secs(31);

        assert!(matches!(
            check_timeouts(false, idle, idle, &server),
            Err(ProtocolError::ConnectionTimeout)
        ));
    }

    #[test]
    fn test_timeouts_are_counted() {
        let metrics = Metrics::new();
        report(1, &metrics, &ProtocolError::Timeout);
        report(1, &metrics, &ProtocolError::ConnectionTimeout);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.timeouts, 2);
        assert_eq!(snapshot.connection_errors, 0);
    }
}
