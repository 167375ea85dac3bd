//! `reflux run`: one headless run, printed as JSON lines.

use anyhow::{Context, Result, bail};
use std::io::{self, BufWriter, Write};
use std::sync::Arc;
use std::time::Duration;

use crate::{
    cache::MessageCache,
    config::Config,
    debug,
    message::{Payload, RunStatus},
    session::{Session, SessionContext},
    source::FileSource,
    storage::FileStorage,
    uploads::UploadedFileStore,
    widgets::WidgetStates,
};

/// Output is streamed at this interval while the script runs.
const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Run `config.script` once and print every output message to stdout.
pub fn run_script(config: Arc<Config>, widgets: Option<&str>) -> Result<()> {
    let widgets = widgets.map(parse_widgets).transpose()?;

    let ctx = SessionContext {
        cache: Arc::new(MessageCache::new(config.cache.max_cached_message_age)),
        uploads: Arc::new(UploadedFileStore::new()),
        storage: Arc::new(FileStorage::new(&config.storage.dir)),
        config: Arc::clone(&config),
    };
    let session = Session::new(ctx, Arc::new(FileSource::new(&config.script)));

    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    let status = run_session(&session, widgets, &mut out);
    session.shutdown();

    if status? == Some(RunStatus::CompileError) {
        bail!("{} failed to compile", config.script_display());
    }
    Ok(())
}

/// Parse `--widgets`: a JSON object keyed by widget id.
pub fn parse_widgets(json: &str) -> Result<WidgetStates> {
    serde_json::from_str(json).context("--widgets must be a JSON object of widget values")
}

/// Request one run and write its messages as they arrive. Returns how the
/// last run finished.
fn run_session(
    session: &Session,
    widgets: Option<WidgetStates>,
    out: &mut impl Write,
) -> Result<Option<RunStatus>> {
    let mut status = None;
    session.request_rerun(widgets);

    loop {
        let idle = session.wait_until_idle(POLL_INTERVAL);
        for msg in session.flush_outbound_queue() {
            if let Payload::RunFinished { status: s } = msg.payload {
                status = Some(s);
            }
            serde_json::to_writer(&mut *out, &msg)?;
            writeln!(out)?;
        }
        out.flush()?;

        if idle {
            debug!("run"; "finished: {:?}", status);
            return Ok(status);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{source::MemorySource, widgets::WidgetValue};

    fn session(script: &str) -> Arc<Session> {
        let mut config = Config::default();
        config.runner.checkpoint_interval = 100;
        let ctx = SessionContext {
            cache: Arc::new(MessageCache::new(config.cache.max_cached_message_age)),
            config: Arc::new(config),
            uploads: Arc::new(UploadedFileStore::new()),
            storage: Arc::new(FileStorage::new(std::env::temp_dir())),
        };
        Session::new(ctx, MemorySource::new(script))
    }

    fn lines(out: &[u8]) -> Vec<serde_json::Value> {
        std::str::from_utf8(out)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[test]
    fn test_run_prints_json_lines() {
        let s = session(r#"ui.text("size " .. ui.slider("size", 0, 10, 1))"#);
        let mut out = Vec::new();

        let widgets = parse_widgets(r#"{"slider:size": 4}"#).unwrap();
        let status = run_session(&s, Some(widgets), &mut out).unwrap();
        assert_eq!(status, Some(RunStatus::Success));

        let lines = lines(&out);
        assert_eq!(lines[0]["payload"]["type"], "initialize");
        let texts: Vec<_> = lines
            .iter()
            .filter(|l| l["payload"]["element"]["kind"] == "text")
            .map(|l| l["payload"]["element"]["body"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(texts, vec!["size 4.0"]);
    }

    #[test]
    fn test_run_reports_compile_error() {
        let s = session("ui.text(");
        let mut out = Vec::new();
        let status = run_session(&s, None, &mut out).unwrap();
        assert_eq!(status, Some(RunStatus::CompileError));
    }

    #[test]
    fn test_parse_widgets() {
        let w = parse_widgets(r#"{"checkbox:on": true, "text_input:name": "x"}"#).unwrap();
        assert_eq!(w.get("checkbox:on"), Some(&WidgetValue::Bool(true)));
        assert_eq!(w.get("text_input:name"), Some(&WidgetValue::Text("x".into())));
        assert!(parse_widgets("[1, 2]").is_err());
    }
}
