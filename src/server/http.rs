//! HTTP side channel.
//!
//! Served next to the viewer socket, on `port + 1`:
//!
//! | Route                                          | Effect                              |
//! |------------------------------------------------|-------------------------------------|
//! | `GET /message?hash=<hex>`                      | cached message as JSON              |
//! | `POST /upload?session=<id>&widget=<id>&name=<n>` | store the body as an upload, rerun |
//!
//! Viewers fetch `/message` when they receive a `ref` for a payload they
//! no longer hold.

use anyhow::Result;
use std::io::Read;
use std::sync::Arc;
use tiny_http::{Header, Method, Request, Response, Server, StatusCode};
use url::Url;

use super::client::Registry;
use crate::{
    cache::MessageCache,
    core::{SessionId, is_shutdown},
    debug, log,
    message::ContentHash,
    uploads::UploadedFile,
};

const JSON: &str = "application/json";
const PLAIN: &str = "text/plain; charset=utf-8";

/// What the side channel needs to answer requests.
pub struct HttpState {
    pub cache: Arc<MessageCache>,
    pub registry: Arc<Registry>,
    pub max_upload_size: usize,
}

/// A response, before it is written to the socket.
#[derive(Debug, PartialEq, Eq)]
pub struct Reply {
    pub status: u16,
    pub content_type: &'static str,
    pub body: Vec<u8>,
}

impl Reply {
    fn json(body: Vec<u8>) -> Self {
        Self {
            status: 200,
            content_type: JSON,
            body,
        }
    }

    fn text(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            content_type: PLAIN,
            body: body.into().into_bytes(),
        }
    }
}

/// Serve requests until the server is unblocked.
pub fn run(server: &Server, state: &HttpState) {
    for request in server.incoming_requests() {
        if let Err(e) = handle_request(request, state) {
            log!("http"; "request error: {e}");
        }
    }
}

fn handle_request(mut request: Request, state: &HttpState) -> Result<()> {
    if is_shutdown() {
        return respond(request, Reply::text(503, "503 Service Unavailable"));
    }

    // One byte over the limit is enough to reject the upload.
    let limit = state.max_upload_size.saturating_add(1) as u64;
    let mut body = Vec::new();
    request.as_reader().take(limit).read_to_end(&mut body)?;

    let reply = handle(request.method(), request.url(), &body, state);
    debug!("http"; "{} {} -> {}", request.method(), request.url(), reply.status);
    respond(request, reply)
}

fn respond(request: Request, reply: Reply) -> Result<()> {
    let mut response = Response::from_data(reply.body).with_status_code(StatusCode(reply.status));
    for (key, value) in [
        ("Content-Type", reply.content_type),
        ("Access-Control-Allow-Origin", "*"),
    ] {
        if let Ok(header) = Header::from_bytes(key, value) {
            response.add_header(header);
        }
    }
    request.respond(response)?;
    Ok(())
}

/// Route a request. `url` is the raw request target (path and query).
pub fn handle(method: &Method, url: &str, body: &[u8], state: &HttpState) -> Reply {
    let Ok(parsed) = Url::parse(&format!("http://localhost{url}")) else {
        return Reply::text(400, "malformed request target");
    };
    let query = |key: &str| {
        parsed
            .query_pairs()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.into_owned())
    };

    match (method, parsed.path()) {
        (Method::Get, "/message") => get_message(query("hash"), state),
        (Method::Post, "/upload") => {
            match (query("session"), query("widget"), query("name")) {
                (Some(session), Some(widget), Some(name)) => {
                    upload(&session, &widget, name, body, state)
                }
                (None, _, _) => Reply::text(400, "missing 'session'"),
                (_, None, _) => Reply::text(400, "missing 'widget'"),
                (_, _, None) => Reply::text(400, "missing 'name'"),
            }
        }
        (Method::Options, _) => Reply::text(204, ""),
        _ => Reply::text(404, "404 Not Found"),
    }
}

fn get_message(hash: Option<String>, state: &HttpState) -> Reply {
    let Some(hash) = hash else {
        return Reply::text(400, "missing 'hash'");
    };
    let Some(hash) = ContentHash::from_hex(&hash) else {
        return Reply::text(400, "invalid hash");
    };
    let Some(msg) = state.cache.get_message(&hash) else {
        return Reply::text(404, "message not cached");
    };
    match serde_json::to_vec(msg.as_ref()) {
        Ok(body) => Reply::json(body),
        Err(e) => Reply::text(500, format!("failed to encode message: {e}")),
    }
}

fn upload(session: &str, widget: &str, name: String, body: &[u8], state: &HttpState) -> Reply {
    let Ok(id) = session.parse::<SessionId>() else {
        return Reply::text(400, "invalid session id");
    };
    let Some(session) = state.registry.find(id) else {
        return Reply::text(404, "unknown session");
    };

    if body.len() > state.max_upload_size {
        let message = format!(
            "`{}` exceeds the upload limit of {:.1} MB",
            name,
            state.max_upload_size as f64 / 1e6
        );
        session.enqueue_exception("UploadError", message.clone());
        return Reply::text(413, message);
    }

    session.add_upload(
        widget,
        UploadedFile {
            name,
            data: body.to_vec(),
        },
    );
    Reply::text(200, "ok")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::Config,
        message::{Container, Element, OutputMessage, Payload},
        session::{Session, SessionContext},
        source::MemorySource,
        storage::FileStorage,
        uploads::UploadedFileStore,
    };
    use std::time::Duration;

    const UPLOAD_SCRIPT: &str = r#"
        local file = ui.file_uploader("img")
        if file then ui.text(file.name) end
    "#;

    fn state(max_upload_size: usize) -> HttpState {
        let mut config = Config::default();
        config.runner.checkpoint_interval = 100;
        let ctx = SessionContext {
            cache: Arc::new(MessageCache::new(config.cache.max_cached_message_age)),
            config: Arc::new(config),
            uploads: Arc::new(UploadedFileStore::new()),
            storage: Arc::new(FileStorage::new(std::env::temp_dir())),
        };
        HttpState {
            cache: Arc::clone(&ctx.cache),
            registry: Arc::new(Registry::new(ctx, MemorySource::new(UPLOAD_SCRIPT))),
            max_upload_size,
        }
    }

    fn session(state: &HttpState) -> Arc<Session> {
        let session = state.registry.preheat();
        assert!(session.wait_until_idle(Duration::from_secs(10)));
        session.flush_outbound_queue();
        session
    }

    fn text(reply: &Reply) -> &str {
        std::str::from_utf8(&reply.body).unwrap()
    }

    #[test]
    fn test_get_cached_message() {
        let state = state(1024);
        let s = session(&state);
        let msg = OutputMessage::delta(Element::Text { body: "x".into() }, Container::Main, 0);
        state.cache.add_message(&msg, s.key(), 0);

        let url = format!("/message?hash={}", msg.hash().to_hex());
        let reply = handle(&Method::Get, &url, &[], &state);
        assert_eq!(reply.status, 200);
        assert_eq!(reply.content_type, JSON);

        let value: serde_json::Value = serde_json::from_slice(&reply.body).unwrap();
        assert_eq!(value["payload"]["element"]["body"], "x");
    }

    #[test]
    fn test_get_message_errors() {
        let state = state(1024);
        let absent = ContentHash::of(b"absent").to_hex();

        let reply = handle(&Method::Get, &format!("/message?hash={absent}"), &[], &state);
        assert_eq!(reply.status, 404);
        assert_eq!(handle(&Method::Get, "/message?hash=zz", &[], &state).status, 400);
        assert_eq!(handle(&Method::Get, "/message", &[], &state).status, 400);
    }

    #[test]
    fn test_upload_reruns_session() {
        let state = state(1024);
        let s = session(&state);

        let url = format!("/upload?session={}&widget=file_uploader:img&name=cat%20photo.png", s.id());
        let reply = handle(&Method::Post, &url, b"bytes", &state);
        assert_eq!(reply.status, 200, "{}", text(&reply));
        assert!(s.wait_until_idle(Duration::from_secs(10)));

        let bodies: Vec<_> = s
            .flush_outbound_queue()
            .into_iter()
            .filter_map(|m| match m.payload {
                Payload::Delta {
                    element: Element::Text { body },
                } => Some(body),
                _ => None,
            })
            .collect();
        assert_eq!(bodies, vec!["cat photo.png"]);
    }

    #[test]
    fn test_upload_argument_errors() {
        let state = state(1024);
        let s = session(&state);

        let reply = handle(&Method::Post, "/upload?widget=w&name=n", &[], &state);
        assert_eq!((reply.status, text(&reply)), (400, "missing 'session'"));

        let url = format!("/upload?session={}&name=n", s.id());
        let reply = handle(&Method::Post, &url, &[], &state);
        assert_eq!((reply.status, text(&reply)), (400, "missing 'widget'"));

        let url = format!("/upload?session={}&widget=w&name=n", SessionId::new());
        assert_eq!(handle(&Method::Post, &url, &[], &state).status, 404);

        let reply = handle(&Method::Post, "/upload?session=nope&widget=w&name=n", &[], &state);
        assert_eq!(reply.status, 400);
    }

    #[test]
    fn test_oversized_upload_rejected() {
        let state = state(4);
        let s = session(&state);

        let url = format!("/upload?session={}&widget=file_uploader:img&name=big.bin", s.id());
        let reply = handle(&Method::Post, &url, b"too large", &state);
        assert_eq!(reply.status, 413);

        let out = s.flush_outbound_queue();
        assert!(matches!(
            out.last().and_then(OutputMessage::element),
            Some(Element::Exception { kind, .. }) if kind == "UploadError"
        ));
    }

    #[test]
    fn test_unknown_route() {
        let state = state(1024);
        assert_eq!(handle(&Method::Get, "/nope", &[], &state).status, 404);
        assert_eq!(handle(&Method::Post, "/message", &[], &state).status, 404);
        assert_eq!(handle(&Method::Options, "/upload", &[], &state).status, 204);
    }
}
