//! Per-accepted-connection session loop (§4.B, §4.C): pairs one `Session`
//! with a reader that decodes frames and feeds the dispatcher, and a writer
//! task that drains the session's outbound channel onto the socket. The
//! two run concurrently so a server-originated push (§4.F.2 streaming an
//! initialization snapshot) never blocks behind an in-flight client
//! request's response, or vice versa.

use std::net::SocketAddr;
use std::sync::Arc;

use log::{debug, warn};
use profile_core::dispatcher;
use profile_core::session::{Session, KEEP_ALIVE_TIMEOUT};
use profile_core::Core;
use profile_protocol::codec::{read_envelope, write_envelope};
use profile_protocol::envelope::{Envelope, EnvelopeKind};
use tokio::io::{split, AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, watch};

/// Drives one connection until the peer disconnects, a read/write fails, a
/// handler marks the session force-disconnected (§4.B "a malformed frame or
/// signature failure force-disconnects the whole connection"), or the
/// server starts shutting down.
pub async fn run<S>(stream: S, remote_addr: SocketAddr, role: u32, core: Core)
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (reader, writer) = split(stream);
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let session = Arc::new(Session::new(remote_addr, role, outbound_tx));
    let shutdown = core.shutdown.clone();

    let writer_task = tokio::spawn(run_writer(writer, outbound_rx));
    run_reader(reader, session.clone(), core, shutdown).await;
    writer_task.abort();

    debug!("connection {} closed", remote_addr);
}

async fn run_writer<W: AsyncWrite + Unpin>(mut writer: W, mut outbound_rx: mpsc::UnboundedReceiver<Envelope>) {
    while let Some(envelope) = outbound_rx.recv().await {
        if let Err(e) = write_envelope(&mut writer, &envelope).await {
            warn!("write failed, closing connection: {}", e);
            return;
        }
    }
}

async fn run_reader<R: AsyncRead + Unpin>(
    mut reader: R,
    session: Arc<Session>,
    core: Core,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let envelope = tokio::select! {
            result = tokio::time::timeout(KEEP_ALIVE_TIMEOUT, read_envelope(&mut reader)) => {
                match result {
                    Ok(Ok(Some(e))) => e,
                    Ok(Ok(None)) => return,
                    Ok(Err(e)) => {
                        warn!("{}: frame read error: {}", session.remote_addr, e);
                        return;
                    }
                    Err(_) => {
                        debug!("{}: idle past keep-alive timeout, disconnecting", session.remote_addr);
                        return;
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    debug!("{}: server shutting down, disconnecting", session.remote_addr);
                    return;
                }
                continue;
            }
        };
        session.touch();

        match envelope.kind {
            Some(EnvelopeKind::Request(frame)) => {
                if let Some(response) = dispatcher::dispatch(&core, &session, frame).await {
                    if session.send(Envelope::response(response)).is_err() {
                        return;
                    }
                }
            }
            Some(EnvelopeKind::Response(frame)) => {
                dispatcher::handle_incoming_response(&core, &session, frame).await;
            }
            None => {
                warn!("{}: empty envelope, disconnecting", session.remote_addr);
                return;
            }
        }

        if session.is_force_disconnected() {
            return;
        }
    }
}
