//! Composition root (§9 "replace the process-wide registry with an
//! explicit composition root"): binds one listener per role port, hands
//! every accepted connection to [`crate::connection::run`], and drives the
//! neighborhood engine's scheduling loop alongside them until shutdown.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};
use profile_core::config::RolePorts;
use profile_core::Core;
use profile_protocol::roles::role;
use tokio::net::TcpListener;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;

use crate::connection;

/// §9 "drain in-flight connections before exiting": once shutdown fires,
/// `run` gives existing connections this long to notice and close before
/// returning anyway.
const CONNECTION_DRAIN_TIMEOUT: Duration = Duration::from_secs(65);

/// One role's listening socket plus whether it terminates TLS.
struct RoleListener {
    role_bit: u32,
    port: u16,
    tls: bool,
}

fn role_listeners(ports: &RolePorts) -> Vec<RoleListener> {
    vec![
        RoleListener { role_bit: role::PRIMARY, port: ports.primary, tls: false },
        RoleListener { role_bit: role::CL_CUSTOMER, port: ports.cl_customer, tls: true },
        RoleListener { role_bit: role::CL_NON_CUSTOMER, port: ports.cl_non_customer, tls: true },
        RoleListener { role_bit: role::CL_APP_SERVICE, port: ports.cl_app_service, tls: true },
        RoleListener { role_bit: role::SR_NEIGHBOR, port: ports.sr_neighbor, tls: true },
    ]
}

/// Binds every role port and serves connections until `shutdown` is set to
/// `true`, then stops accepting and waits up to [`CONNECTION_DRAIN_TIMEOUT`]
/// for in-flight connections to close on their own (each selects on the
/// same `shutdown` in its reader loop, so they notice immediately) before
/// returning anyway.
pub async fn run(
    core: Core,
    role_ports: RolePorts,
    tls_acceptor: Option<TlsAcceptor>,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    let neighborhood = core.neighborhood.clone();
    let neighborhood_task = tokio::spawn(neighborhood.run());

    let connection_tasks: Arc<Mutex<Vec<JoinHandle<()>>>> = Arc::new(Mutex::new(Vec::new()));

    let mut listener_tasks = Vec::new();
    for listener in role_listeners(&role_ports) {
        if listener.tls && tls_acceptor.is_none() {
            error!("role {:#x} on port {} requires TLS but no certificate was configured", listener.role_bit, listener.port);
            continue;
        }
        let addr: SocketAddr = ([0, 0, 0, 0], listener.port).into();
        let tcp_listener = TcpListener::bind(addr).await?;
        info!("listening on {} for role {:#x} (tls={})", addr, listener.role_bit, listener.tls);

        let core = core.clone();
        let acceptor = tls_acceptor.clone();
        let mut shutdown = shutdown.clone();
        let role_bit = listener.role_bit;
        let tls = listener.tls;
        let connection_tasks = connection_tasks.clone();
        listener_tasks.push(tokio::spawn(async move {
            loop {
                tokio::select! {
                    accepted = tcp_listener.accept() => {
                        let (stream, remote_addr) = match accepted {
                            Ok(pair) => pair,
                            Err(e) => { error!("accept failed on {}: {}", addr, e); continue; }
                        };
                        let core = core.clone();
                        let acceptor = acceptor.clone();
                        let task = tokio::spawn(async move {
                            if tls {
                                match acceptor.expect("tls role always has an acceptor").accept(stream).await {
                                    Ok(tls_stream) => connection::run(tls_stream, remote_addr, role_bit, core).await,
                                    Err(e) => error!("{}: TLS handshake failed: {}", remote_addr, e),
                                }
                            } else {
                                connection::run(stream, remote_addr, role_bit, core).await;
                            }
                        });
                        connection_tasks.lock().await.push(task);
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            info!("{} no longer accepting new connections", addr);
                            return;
                        }
                    }
                }
            }
        }));
    }

    let _ = shutdown.changed().await;
    for task in listener_tasks {
        let _ = task.await;
    }

    let tasks = std::mem::take(&mut *connection_tasks.lock().await);
    info!("draining {} in-flight connection(s)", tasks.len());
    if tokio::time::timeout(CONNECTION_DRAIN_TIMEOUT, futures::future::join_all(tasks)).await.is_err() {
        warn!("connection drain timed out after {:?}, aborting remaining connections", CONNECTION_DRAIN_TIMEOUT);
    }

    neighborhood_task.abort();
    Ok(())
}
