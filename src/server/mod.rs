//! Live viewer server.
//!
//! # Architecture
//!
//! ```text
//! acceptor thread ──attach──▶ Registry ◀──poll_reads── reader thread
//!                                │
//!                     deliver (every 10 ms)
//!                                │
//!            tokio: delivery actor, script watcher, shutdown wait
//!
//! tiny_http (port + 1): GET /message, POST /upload
//! ```
//!
//! Viewers connect over WebSocket on `port`. The first one claims the
//! session preheated at startup; later ones get fresh sessions.

mod client;
mod delivery;
mod http;
mod protocol;

use client::Registry;
use delivery::Delivery;
use http::HttpState;

use anyhow::{Context, Result, anyhow};
use crossbeam::channel::{self, Receiver};
use std::net::{IpAddr, SocketAddr, TcpListener};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tiny_http::Server;

use crate::{
    cache::MessageCache,
    config::Config,
    core::{is_shutdown, register_shutdown_signal},
    debug, log,
    session::SessionContext,
    source::{FileSource, ScriptWatcher},
    storage::FileStorage,
    uploads::UploadedFileStore,
};

/// Maximum number of port binding attempts.
const MAX_PORT_RETRIES: u16 = 10;

const DELIVERY_INTERVAL: Duration = Duration::from_millis(10);
const READ_INTERVAL: Duration = Duration::from_millis(20);
const ACCEPT_INTERVAL: Duration = Duration::from_millis(50);

/// Serve `config.script` until Ctrl+C.
pub fn serve(config: Arc<Config>) -> Result<()> {
    let ctx = SessionContext {
        cache: Arc::new(MessageCache::new(config.cache.max_cached_message_age)),
        uploads: Arc::new(UploadedFileStore::new()),
        storage: Arc::new(FileStorage::new(&config.storage.dir)),
        config: Arc::clone(&config),
    };
    let source = Arc::new(FileSource::new(&config.script));
    let registry = Arc::new(Registry::new(ctx.clone(), source));

    let (listener, ws_addr) = try_bind_port(config.server.interface, config.server.port)?;
    listener.set_nonblocking(true)?;
    let (server, http_addr) = bind_with_retry(config.server.interface, ws_addr.port().saturating_add(1))?;
    let server = Arc::new(server);

    log!("serve"; "ws://{}", ws_addr);
    debug!("serve"; "side channel http://{}", http_addr);
    log!("serve"; "running {}", config.script_display());

    registry.preheat();

    let (shutdown_tx, shutdown_rx) = channel::unbounded::<()>();
    register_shutdown_signal(shutdown_tx);

    spawn_acceptor(listener, Arc::clone(&registry))?;
    spawn_reader(Arc::clone(&registry))?;

    let http_state = HttpState {
        cache: Arc::clone(&ctx.cache),
        registry: Arc::clone(&registry),
        max_upload_size: config.server.max_message_size,
    };
    let http_server = Arc::clone(&server);
    let http_handle = thread::Builder::new()
        .name("http".into())
        .spawn(move || http::run(&http_server, &http_state))
        .context("failed to start http thread")?;

    let delivery = Delivery::new(Arc::clone(&ctx.cache), &config);
    run_actors(&config, Arc::clone(&registry), delivery, shutdown_rx)?;

    registry.close_all();
    server.unblock();
    let _ = http_handle.join();
    Ok(())
}

/// Delivery actor and script watcher; returns once shutdown is requested.
fn run_actors(
    config: &Config,
    registry: Arc<Registry>,
    delivery: Delivery,
    shutdown_rx: Receiver<()>,
) -> Result<()> {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .context("failed to create tokio runtime")?;

    rt.block_on(async {
        let (stop_tx, stop_rx) = tokio::sync::watch::channel(false);

        let delivery_registry = Arc::clone(&registry);
        let mut delivery_stop = stop_rx.clone();
        let delivery_handle = tokio::spawn(async move {
            let mut tick = tokio::time::interval(DELIVERY_INTERVAL);
            loop {
                tokio::select! {
                    biased;
                    _ = delivery_stop.changed() => break,
                    _ = tick.tick() => delivery_registry.deliver(&delivery),
                }
            }
            // Last flush so shutdown output reaches viewers
            delivery_registry.deliver(&delivery);
        });

        match ScriptWatcher::new(&config.script) {
            Ok(watcher) => {
                let watch_registry = Arc::clone(&registry);
                tokio::spawn(watcher.run(
                    move || {
                        for session in watch_registry.sessions() {
                            session.on_script_changed();
                        }
                        true
                    },
                    stop_rx,
                ));
            }
            Err(e) => log!("watch"; "cannot watch {}: {}", config.script.display(), e),
        }

        // crossbeam is sync-only; poll it
        loop {
            if shutdown_rx.try_recv().is_ok() || is_shutdown() {
                debug!("serve"; "shutdown signal received");
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        let _ = stop_tx.send(true);
        let _ = tokio::time::timeout(Duration::from_millis(500), delivery_handle).await;
    });

    Ok(())
}

fn spawn_acceptor(listener: TcpListener, registry: Arc<Registry>) -> Result<()> {
    thread::Builder::new()
        .name("ws-accept".into())
        .spawn(move || {
            while !is_shutdown() {
                match listener.accept() {
                    Ok((stream, addr)) => {
                        debug!("ws"; "connection from {}", addr);
                        // Blocking handshake, non-blocking afterwards
                        let _ = stream.set_nonblocking(false);
                        match tungstenite::accept(stream) {
                            Ok(ws) => {
                                let _ = ws.get_ref().set_nonblocking(true);
                                let session = registry.attach(ws);
                                session.handle_rerun_request(None, false);
                            }
                            Err(e) => log!("ws"; "handshake failed: {}", e),
                        }
                    }
                    Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                        thread::sleep(ACCEPT_INTERVAL);
                    }
                    Err(e) => {
                        log!("ws"; "accept error: {}", e);
                        thread::sleep(ACCEPT_INTERVAL);
                    }
                }
            }
        })
        .context("failed to start acceptor thread")?;
    Ok(())
}

fn spawn_reader(registry: Arc<Registry>) -> Result<()> {
    thread::Builder::new()
        .name("ws-read".into())
        .spawn(move || {
            while !is_shutdown() {
                registry.poll_reads();
                thread::sleep(READ_INTERVAL);
            }
        })
        .context("failed to start reader thread")?;
    Ok(())
}

/// Bind the viewer socket, moving to the next port while one is taken.
fn try_bind_port(interface: IpAddr, base_port: u16) -> Result<(TcpListener, SocketAddr)> {
    let mut last_error = None;

    for offset in 0..MAX_PORT_RETRIES {
        let port = base_port.saturating_add(offset);
        match TcpListener::bind(SocketAddr::new(interface, port)) {
            Ok(listener) => {
                let addr = listener.local_addr()?;
                if offset > 0 {
                    log!("serve"; "port {} in use, using {} instead", base_port, addr.port());
                }
                return Ok((listener, addr));
            }
            Err(e) => last_error = Some(e),
        }
    }

    Err(anyhow!(
        "failed to bind viewer socket after {} attempts: {}",
        MAX_PORT_RETRIES,
        last_error.map(|e| e.to_string()).unwrap_or_default()
    ))
}

/// Bind the HTTP side channel with the same retry policy.
fn bind_with_retry(interface: IpAddr, base_port: u16) -> Result<(Server, SocketAddr)> {
    let mut last_error = None;

    for offset in 0..MAX_PORT_RETRIES {
        let addr = SocketAddr::new(interface, base_port.saturating_add(offset));
        match Server::http(addr) {
            Ok(server) => return Ok((server, addr)),
            Err(e) => last_error = Some(e),
        }
    }

    Err(anyhow!(
        "failed to bind http side channel after {} attempts (ports {}-{}): {}",
        MAX_PORT_RETRIES,
        base_port,
        base_port.saturating_add(MAX_PORT_RETRIES - 1),
        last_error.map(|e| e.to_string()).unwrap_or_default()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

    #[test]
    fn test_try_bind_port_skips_taken_port() {
        let (taken, addr) = try_bind_port(LOCALHOST, 0).unwrap();
        let (_next, next_addr) = try_bind_port(LOCALHOST, addr.port()).unwrap();
        assert_ne!(next_addr.port(), addr.port());
        drop(taken);
    }

    #[test]
    fn test_bind_with_retry_skips_taken_port() {
        let (_taken, addr) = try_bind_port(LOCALHOST, 0).unwrap();
        let (_server, http_addr) = bind_with_retry(LOCALHOST, addr.port()).unwrap();
        assert!(http_addr.port() > addr.port());
    }
}
