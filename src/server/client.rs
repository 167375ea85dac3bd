//! Connected viewers.
//!
//! Each viewer is a WebSocket paired with its [`Session`]. Sockets switch to
//! non-blocking mode after the handshake so that one reader thread and the
//! delivery actor can poll every viewer without blocking on a slow one.
//!
//! A preheated client has a session but no socket yet. Its output stays
//! queued and is delivered to the first viewer that connects.

use parking_lot::Mutex;
use std::io::ErrorKind;
use std::net::TcpStream;
use std::sync::Arc;
use tungstenite::WebSocket;
use tungstenite::protocol::Message;

use super::delivery::{Delivery, SessionInfo};
use super::protocol::{BackMsg, ProtocolError};
use crate::{
    core::SessionId,
    debug, log,
    session::{Session, SessionContext},
    source::ScriptSource,
};

struct Client {
    session: Arc<Session>,
    info: SessionInfo,
    /// `None` until a viewer claims a preheated session.
    ws: Option<WebSocket<TcpStream>>,
}

impl Client {
    fn new(session: Arc<Session>, ws: Option<WebSocket<TcpStream>>) -> Self {
        let info = SessionInfo::new(Arc::clone(session.key()));
        Self { session, info, ws }
    }
}

/// Every live session, with its viewer socket.
pub struct Registry {
    ctx: SessionContext,
    source: Arc<dyn ScriptSource>,
    clients: Mutex<Vec<Client>>,
}

impl Registry {
    pub fn new(ctx: SessionContext, source: Arc<dyn ScriptSource>) -> Self {
        Self {
            ctx,
            source,
            clients: Mutex::new(Vec::new()),
        }
    }

    /// Create a session without a viewer and run the script once, so the
    /// first viewer sees output immediately.
    pub fn preheat(&self) -> Arc<Session> {
        let session = Session::new(self.ctx.clone(), Arc::clone(&self.source));
        session.handle_rerun_request(None, true);
        debug!("ws"; "preheated session {}", session.id().short());
        self.clients.lock().push(Client::new(Arc::clone(&session), None));
        session
    }

    /// Bind a connected viewer to the preheated session if one is waiting,
    /// otherwise to a new session.
    pub fn attach(&self, ws: WebSocket<TcpStream>) -> Arc<Session> {
        let mut clients = self.clients.lock();

        if let Some(client) = clients.iter_mut().find(|c| c.ws.is_none()) {
            client.ws = Some(ws);
            debug!("ws"; "viewer claimed preheated session {}", client.session.id().short());
            return Arc::clone(&client.session);
        }

        let session = Session::new(self.ctx.clone(), Arc::clone(&self.source));
        debug!("ws"; "viewer connected: session {} (total: {})", session.id().short(), clients.len() + 1);
        clients.push(Client::new(Arc::clone(&session), Some(ws)));
        session
    }

    pub fn find(&self, id: SessionId) -> Option<Arc<Session>> {
        self.clients
            .lock()
            .iter()
            .find(|c| c.session.id() == id)
            .map(|c| Arc::clone(&c.session))
    }

    pub fn sessions(&self) -> Vec<Arc<Session>> {
        self.clients
            .lock()
            .iter()
            .map(|c| Arc::clone(&c.session))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.clients.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.lock().is_empty()
    }

    /// Drop a session and close its viewer.
    pub fn remove(&self, id: SessionId) {
        let mut clients = self.clients.lock();
        let Some(index) = clients.iter().position(|c| c.session.id() == id) else {
            return;
        };
        let client = clients.remove(index);
        disconnect(client);
    }

    /// Read every pending viewer message and apply it to its session.
    pub fn poll_reads(&self) {
        let mut clients = self.clients.lock();

        clients.retain_mut(|client| {
            let Some(ws) = client.ws.as_mut() else {
                return true;
            };
            loop {
                match ws.read() {
                    Ok(Message::Text(text)) => match BackMsg::parse(text.as_str()) {
                        Ok(msg) => {
                            debug!("ws"; "{}: {:?}", client.session.id().short(), msg);
                            msg.dispatch(&client.session);
                        }
                        Err(e) => log!("ws"; "{}: {}", client.session.id().short(), e),
                    },
                    Ok(Message::Binary(_)) => {
                        let e = ProtocolError::UnsupportedFrame("binary");
                        log!("ws"; "{}: {}", client.session.id().short(), e);
                    }
                    Ok(Message::Close(_)) => {
                        debug!("ws"; "viewer closed session {}", client.session.id().short());
                        client.session.shutdown();
                        return false;
                    }
                    Ok(_) => {}
                    Err(ref e) if is_would_block(e) => return true,
                    Err(e) => {
                        debug!("ws"; "viewer dropped session {}: {}", client.session.id().short(), e);
                        client.session.shutdown();
                        return false;
                    }
                }
            }
        });
    }

    /// Flush every viewer's outbound queue onto its socket.
    pub fn deliver(&self, delivery: &Delivery) {
        let mut clients = self.clients.lock();

        clients.retain_mut(|client| {
            let Some(ws) = client.ws.as_mut() else {
                return true;
            };

            for msg in client.session.flush_outbound_queue() {
                let Some(text) = delivery.prepare(&mut client.info, &msg) else {
                    continue;
                };
                match ws.send(Message::Text(text.into())) {
                    Ok(()) => {}
                    // Frame is buffered; later flushes push it out
                    Err(ref e) if is_would_block(e) => {}
                    Err(e) => {
                        debug!("ws"; "send to {} failed: {}", client.session.id().short(), e);
                        client.session.shutdown();
                        return false;
                    }
                }
            }

            match ws.flush() {
                Ok(()) => true,
                Err(ref e) if is_would_block(e) => true,
                Err(e) => {
                    debug!("ws"; "flush to {} failed: {}", client.session.id().short(), e);
                    client.session.shutdown();
                    false
                }
            }
        });
    }

    /// Shut down every session and close every viewer.
    pub fn close_all(&self) {
        let clients: Vec<_> = self.clients.lock().drain(..).collect();
        debug!("ws"; "closing {} sessions", clients.len());
        for client in clients {
            disconnect(client);
        }
    }
}

fn disconnect(client: Client) {
    client.session.shutdown();
    if let Some(mut ws) = client.ws {
        let _ = ws.close(None);
        let _ = ws.flush();
    }
}

fn is_would_block(e: &tungstenite::Error) -> bool {
    matches!(e, tungstenite::Error::Io(io) if io.kind() == ErrorKind::WouldBlock)
}
