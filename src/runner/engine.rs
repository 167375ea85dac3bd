//! Compile and execute one script attempt in a fresh Lua state.

use mlua::{Function, HookTriggers, Lua, MultiValue, VmState};
use std::path::Path;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use super::api::{self, ScriptApi};
use super::event::{ControlSignal, ScriptError, ScriptInterrupted};
use super::{RerunData, RunnerContext, RunnerShared};
use crate::{debug, message::Container, source::ScriptSource, widgets::WidgetStates};

/// How an attempt ended.
#[derive(Debug)]
pub(super) enum Outcome {
    Completed,
    Stopped,
    /// The script raised; an exception element was emitted.
    Failed,
    Rerun(RerunData),
}

/// Load the script text and compile it without running it.
pub(super) fn load(lua: &Lua, source: &dyn ScriptSource) -> Result<Function, ScriptError> {
    let text = source.load()?;
    compile(lua, &text, source.path())
}

fn compile(lua: &Lua, text: &str, path: &Path) -> Result<Function, ScriptError> {
    lua.load(text)
        .set_name(format!("@{}", path.display()))
        .into_function()
        .map_err(|err| ScriptError::Compile {
            path: path.to_path_buf(),
            message: match err {
                mlua::Error::SyntaxError { message, .. } => message,
                other => other.to_string(),
            },
        })
}

/// Compile a script without running it (`reflux check`).
pub fn check_script(source: &dyn ScriptSource) -> Result<(), ScriptError> {
    let lua = Lua::new();
    load(&lua, source).map(|_| ())
}

/// Run the compiled body with the `ui` API installed.
///
/// Consumes the Lua state so no script closure outlives the attempt, and
/// hands back the widget state the script left behind.
pub(super) fn execute(
    lua: Lua,
    func: Function,
    shared: &Arc<RunnerShared>,
    ctx: &RunnerContext,
    widgets: WidgetStates,
) -> (Outcome, WidgetStates) {
    let api = Rc::new(ScriptApi::new(Arc::clone(shared), ctx, widgets));

    if let Err(err) = api::install(&lua, &api).and_then(|()| guard_protected_calls(&lua, shared)) {
        api.push(Container::Main, ScriptError::from_lua(&err).to_element());
        drop(func);
        drop(lua);
        return (Outcome::Failed, api.take_widgets());
    }

    if ctx.config.install_tracer {
        install_tracer(&lua, shared, ctx.config.checkpoint_interval);
    }

    shared.execing.store(true, Ordering::Release);
    let result = func.call::<()>(());
    shared.execing.store(false, Ordering::Release);

    let signal = shared.pending.lock().take();
    let outcome = match (result, signal) {
        (_, Some(ControlSignal::Stop)) => Outcome::Stopped,
        (_, Some(ControlSignal::Rerun(data))) => Outcome::Rerun(data),
        (Ok(()), None) => Outcome::Completed,
        (Err(err), None) => {
            let err = ScriptError::from_lua(&err);
            debug!("runner"; "script raised: {}", err);
            api.push(Container::Main, err.to_element());
            Outcome::Failed
        }
    };

    drop(func);
    drop(lua);
    (outcome, api.take_widgets())
}

/// Checkpoint every `interval` VM instructions.
fn install_tracer(lua: &Lua, shared: &Arc<RunnerShared>, interval: u32) {
    let shared = Arc::clone(shared);
    lua.set_hook(
        HookTriggers::new().every_nth_instruction(interval),
        move |_, _| {
            shared
                .request_interrupt_check()
                .map_err(mlua::Error::external)?;
            Ok(VmState::Continue)
        },
    );
}

/// Wrap `pcall`/`xpcall` so a pending stop or rerun escapes them.
fn guard_protected_calls(lua: &Lua, shared: &Arc<RunnerShared>) -> mlua::Result<()> {
    let globals = lua.globals();
    for name in ["pcall", "xpcall"] {
        let original: Function = globals.get(name)?;
        let shared = Arc::clone(shared);
        let guarded = lua.create_function(move |_, args: MultiValue| {
            let results = original.call::<MultiValue>(args)?;
            if shared.has_pending_signal() {
                return Err(mlua::Error::external(ScriptInterrupted));
            }
            Ok(results)
        })?;
        globals.set(name, guarded)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemorySource;

    #[test]
    fn test_compile_error_reports_path() {
        let source = MemorySource::new("local x = = 1");
        let err = check_script(source.as_ref()).unwrap_err();
        let ScriptError::Compile { path, message } = err else {
            panic!("expected compile error, got {err:?}");
        };
        assert_eq!(path, Path::new("test.lua"));
        assert!(message.contains("test.lua"));
    }

    #[test]
    fn test_valid_script_compiles() {
        let source = MemorySource::new("local x = 1\nui.text(tostring(x))");
        assert!(check_script(source.as_ref()).is_ok());
    }
}
