//! The `ui` global exposed to scripts.
//!
//! ```lua
//! ui.title("Resize")
//! local size = ui.slider("size", 1, 10, 3)
//! local file = ui.file_uploader("image")
//! if file then ui.image(file.data, file.name) end
//! ui.sidebar.text("size = " .. size)
//! ```
//!
//! Every call is a checkpoint. Widgets read their value from the current
//! widget state, falling back to the given default, and record the value
//! they returned so the final state reflects what the script saw.

use mlua::{Function, Lua, LuaSerdeExt, Table, Value};
use rustc_hash::FxHashSet;
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use super::event::{ControlSignal, ScriptError};
use super::{OutputSink, RerunData, RunnerContext, RunnerShared};
use crate::{
    core::SessionId,
    message::{Container, Element, OutputMessage, WidgetSpec},
    uploads::UploadedFileStore,
    widgets::{WidgetStates, WidgetValue},
};

/// Per-attempt transient state.
struct RunState {
    widgets: WidgetStates,
    /// Widget ids registered during this attempt.
    seen: FxHashSet<String>,
    /// Next delta id per container.
    cursors: [usize; 2],
}

pub(super) struct ScriptApi {
    shared: Arc<RunnerShared>,
    output: Arc<dyn OutputSink>,
    uploads: Arc<UploadedFileStore>,
    session_id: SessionId,
    state: RefCell<RunState>,
}

impl ScriptApi {
    pub(super) fn new(shared: Arc<RunnerShared>, ctx: &RunnerContext, widgets: WidgetStates) -> Self {
        Self {
            shared,
            output: Arc::clone(&ctx.output),
            uploads: Arc::clone(&ctx.uploads),
            session_id: ctx.session_id,
            state: RefCell::new(RunState {
                widgets,
                seen: FxHashSet::default(),
                cursors: [0; 2],
            }),
        }
    }

    pub(super) fn take_widgets(&self) -> WidgetStates {
        std::mem::take(&mut self.state.borrow_mut().widgets)
    }

    fn checkpoint(&self) -> mlua::Result<()> {
        self.shared
            .request_interrupt_check()
            .map_err(mlua::Error::external)
    }

    /// Append an element without a checkpoint.
    pub(super) fn push(&self, container: Container, element: Element) {
        let delta_id = {
            let mut state = self.state.borrow_mut();
            let cursor = &mut state.cursors[container.index()];
            let id = *cursor;
            *cursor += 1;
            id
        };
        self.output
            .enqueue(OutputMessage::delta(element, container, delta_id));
    }

    fn emit(&self, container: Container, element: Element) -> mlua::Result<()> {
        self.checkpoint()?;
        self.push(container, element);
        Ok(())
    }

    /// Claim `kind:label` for this attempt.
    fn register(&self, spec: &WidgetSpec, label: &str) -> mlua::Result<String> {
        self.checkpoint()?;
        let id = format!("{}:{}", spec.kind(), label);
        if !self.state.borrow_mut().seen.insert(id.clone()) {
            return Err(mlua::Error::external(ScriptError::DuplicateWidgetId(id)));
        }
        Ok(id)
    }

    /// Register a stateful widget, resolve its value and draw it.
    fn widget(
        &self,
        container: Container,
        label: String,
        spec: WidgetSpec,
        resolve: impl FnOnce(Option<&WidgetValue>) -> WidgetValue,
    ) -> mlua::Result<WidgetValue> {
        let id = self.register(&spec, &label)?;
        let value = {
            let mut state = self.state.borrow_mut();
            let value = resolve(state.widgets.get(&id));
            state.widgets.set(id.clone(), value.clone());
            value
        };
        let json = serde_json::to_value(&value).unwrap_or(serde_json::Value::Null);
        self.push(
            container,
            Element::Widget {
                id,
                label,
                spec,
                value: json,
            },
        );
        Ok(value)
    }

    fn file_uploader(&self, lua: &Lua, container: Container, label: String) -> mlua::Result<Option<Table>> {
        let spec = WidgetSpec::FileUploader;
        let id = self.register(&spec, &label)?;
        let file = self.uploads.get(self.session_id, &id);
        let value = file
            .as_ref()
            .map_or(serde_json::Value::Null, |f| serde_json::Value::from(f.name.clone()));
        self.push(
            container,
            Element::Widget {
                id,
                label,
                spec,
                value,
            },
        );

        let Some(file) = file else {
            return Ok(None);
        };
        let table = lua.create_table()?;
        table.set("name", file.name.as_str())?;
        table.set("data", lua.create_string(&file.data)?)?;
        Ok(Some(table))
    }
}

/// Install `ui` (main container) and `ui.sidebar` into the globals.
pub(super) fn install(lua: &Lua, api: &Rc<ScriptApi>) -> mlua::Result<()> {
    let ui = container_table(lua, api, Container::Main)?;
    ui.set("sidebar", container_table(lua, api, Container::Sidebar)?)?;

    let a = Rc::clone(api);
    ui.set(
        "stop",
        lua.create_function(move |_, ()| -> mlua::Result<()> {
            Err(mlua::Error::external(a.shared.raise(ControlSignal::Stop)))
        })?,
    )?;

    let a = Rc::clone(api);
    ui.set(
        "rerun",
        lua.create_function(move |_, ()| -> mlua::Result<()> {
            let signal = ControlSignal::Rerun(RerunData::default());
            Err(mlua::Error::external(a.shared.raise(signal)))
        })?,
    )?;

    lua.globals().set("ui", ui)
}

fn container_table(lua: &Lua, api: &Rc<ScriptApi>, container: Container) -> mlua::Result<Table> {
    let t = lua.create_table()?;

    t.set("title", text_fn(lua, api, container, |body| Element::Title { body })?)?;
    t.set("header", text_fn(lua, api, container, |body| Element::Header { body })?)?;
    t.set("text", text_fn(lua, api, container, |body| Element::Text { body })?)?;
    t.set("markdown", text_fn(lua, api, container, |body| Element::Markdown { body })?)?;
    t.set("error", text_fn(lua, api, container, |body| Element::Error { body })?)?;

    let a = Rc::clone(api);
    t.set(
        "write",
        lua.create_function(move |lua, value: Value| {
            let element = write_element(lua, value)?;
            a.emit(container, element)
        })?,
    )?;

    let a = Rc::clone(api);
    t.set(
        "image",
        lua.create_function(move |_, (bytes, caption): (mlua::String, Option<String>)| {
            a.emit(container, Element::image(&bytes.as_bytes(), caption))
        })?,
    )?;

    let a = Rc::clone(api);
    t.set(
        "slider",
        lua.create_function(
            move |_, (label, min, max, default): (String, f64, f64, Option<f64>)| {
                let spec = WidgetSpec::Slider { min, max };
                let value = a.widget(container, label, spec, |current| {
                    let v = current.and_then(WidgetValue::as_f64).or(default).unwrap_or(min);
                    WidgetValue::Float(v.max(min).min(max))
                })?;
                Ok(value.as_f64().unwrap_or(min))
            },
        )?,
    )?;

    let a = Rc::clone(api);
    t.set(
        "checkbox",
        lua.create_function(move |_, (label, default): (String, Option<bool>)| {
            let value = a.widget(container, label, WidgetSpec::Checkbox, |current| {
                WidgetValue::Bool(current.and_then(WidgetValue::as_bool).or(default).unwrap_or(false))
            })?;
            Ok(value.as_bool().unwrap_or(false))
        })?,
    )?;

    t.set("selectbox", choice_fn(lua, api, container, |options| WidgetSpec::Selectbox { options })?)?;
    t.set("radio", choice_fn(lua, api, container, |options| WidgetSpec::Radio { options })?)?;

    let a = Rc::clone(api);
    t.set(
        "text_input",
        lua.create_function(move |_, (label, default): (String, Option<String>)| {
            let value = a.widget(container, label, WidgetSpec::TextInput, |current| {
                let text = current.and_then(WidgetValue::as_str).map(str::to_string);
                WidgetValue::Text(text.or(default).unwrap_or_default())
            })?;
            Ok(value.as_str().unwrap_or_default().to_string())
        })?,
    )?;

    let a = Rc::clone(api);
    t.set(
        "button",
        lua.create_function(move |_, label: String| {
            let value = a.widget(container, label, WidgetSpec::Button, |current| {
                WidgetValue::Trigger {
                    trigger: current.and_then(WidgetValue::as_bool).unwrap_or(false),
                }
            })?;
            Ok(value.as_bool().unwrap_or(false))
        })?,
    )?;

    let a = Rc::clone(api);
    t.set(
        "file_uploader",
        lua.create_function(move |lua, label: String| a.file_uploader(lua, container, label))?,
    )?;

    Ok(t)
}

fn text_fn(
    lua: &Lua,
    api: &Rc<ScriptApi>,
    container: Container,
    make: fn(String) -> Element,
) -> mlua::Result<Function> {
    let api = Rc::clone(api);
    lua.create_function(move |_, body: String| api.emit(container, make(body)))
}

/// `selectbox` / `radio`: `(label, options, index?)` with a 1-based default
/// index. The widget state stores the 0-based index.
fn choice_fn(
    lua: &Lua,
    api: &Rc<ScriptApi>,
    container: Container,
    make: fn(Vec<String>) -> WidgetSpec,
) -> mlua::Result<Function> {
    let api = Rc::clone(api);
    lua.create_function(
        move |_, (label, options, index): (String, Vec<String>, Option<usize>)| {
            let len = options.len();
            let value = api.widget(container, label, make(options.clone()), |current| {
                let selected = current
                    .and_then(WidgetValue::as_index)
                    .filter(|i| *i < len)
                    .or(index.map(|i| i.saturating_sub(1)))
                    .unwrap_or(0);
                WidgetValue::Int(selected as i64)
            })?;
            Ok(value.as_index().and_then(|i| options.get(i).cloned()))
        },
    )
}

/// `ui.write`: strings render as markdown, tables as JSON, anything else
/// as plain text.
fn write_element(lua: &Lua, value: Value) -> mlua::Result<Element> {
    Ok(match value {
        Value::String(s) => Element::Markdown {
            body: s.to_string_lossy().to_string(),
        },
        Value::Table(t) => Element::json(lua.from_value(Value::Table(t))?),
        Value::Nil => Element::Text { body: "nil".into() },
        Value::Boolean(b) => Element::Text { body: b.to_string() },
        Value::Integer(i) => Element::Text { body: i.to_string() },
        Value::Number(n) => Element::Text { body: n.to_string() },
        other => Element::Text {
            body: format!("<{}>", other.type_name()),
        },
    })
}
