//! Elements a script draws, and the widget descriptions viewers render.

use serde::Serialize;
use serde_json::{Map, Value};

/// Where an element is drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Container {
    Main,
    Sidebar,
}

impl Container {
    #[inline]
    pub const fn index(self) -> usize {
        match self {
            Self::Main => 0,
            Self::Sidebar => 1,
        }
    }
}

/// A single drawable element.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Element {
    Title { body: String },
    Header { body: String },
    Text { body: String },
    Markdown { body: String },
    /// `ui.error(...)` called by the script.
    Error { body: String },
    /// Structured value passed to `ui.write`.
    Json { value: serde_json::Value },
    /// Raw image bytes, hex encoded.
    Image {
        data: String,
        caption: Option<String>,
    },
    Widget {
        id: String,
        label: String,
        spec: WidgetSpec,
        value: serde_json::Value,
    },
    /// A failure raised by the script body or by the session itself.
    Exception {
        #[serde(rename = "error_type")]
        kind: String,
        message: String,
    },
}

impl Element {
    pub fn image(bytes: &[u8], caption: Option<String>) -> Self {
        Self::Image {
            data: hex::encode(bytes),
            caption,
        }
    }

    /// A structured value with object keys sorted, so equal values encode alike.
    pub fn json(value: Value) -> Self {
        Self::Json {
            value: sort_keys(value),
        }
    }

    pub fn exception(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Exception {
            kind: kind.into(),
            message: message.into(),
        }
    }
}

fn sort_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.into_iter().collect();
            entries.sort_by(|(a, _), (b, _)| a.cmp(b));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, sort_keys(v)))
                    .collect::<Map<_, _>>(),
            )
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sort_keys).collect()),
        other => other,
    }
}

/// Widget kind plus whatever the viewer needs to draw it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "widget", rename_all = "snake_case")]
pub enum WidgetSpec {
    Slider { min: f64, max: f64 },
    Checkbox,
    Selectbox { options: Vec<String> },
    Radio { options: Vec<String> },
    TextInput,
    Button,
    FileUploader,
}

impl WidgetSpec {
    /// Prefix used in widget ids (`kind:label`).
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Slider { .. } => "slider",
            Self::Checkbox => "checkbox",
            Self::Selectbox { .. } => "selectbox",
            Self::Radio { .. } => "radio",
            Self::TextInput => "text_input",
            Self::Button => "button",
            Self::FileUploader => "file_uploader",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_element_wire_shape() {
        let el = Element::Text {
            body: "hi".into(),
        };
        assert_eq!(
            serde_json::to_value(&el).unwrap(),
            json!({"kind": "text", "body": "hi"})
        );
    }

    #[test]
    fn test_widget_wire_shape() {
        let el = Element::Widget {
            id: "slider:size".into(),
            label: "size".into(),
            spec: WidgetSpec::Slider { min: 0.0, max: 10.0 },
            value: json!(3.0),
        };
        assert_eq!(
            serde_json::to_value(&el).unwrap(),
            json!({
                "kind": "widget",
                "id": "slider:size",
                "label": "size",
                "spec": {"widget": "slider", "min": 0.0, "max": 10.0},
                "value": 3.0
            })
        );
    }

    #[test]
    fn test_json_keys_are_sorted() {
        let mut forward = Map::new();
        forward.insert("alpha".into(), json!(1));
        forward.insert("beta".into(), json!({"y": 1, "x": 2}));
        let mut backward = Map::new();
        backward.insert("beta".into(), json!({"x": 2, "y": 1}));
        backward.insert("alpha".into(), json!(1));

        let a = serde_json::to_string(&Element::json(Value::Object(forward))).unwrap();
        let b = serde_json::to_string(&Element::json(Value::Object(backward))).unwrap();
        assert_eq!(a, b);
        assert_eq!(a, r#"{"kind":"json","value":{"alpha":1,"beta":{"x":2,"y":1}}}"#);
    }

    #[test]
    fn test_image_is_hex_encoded() {
        let Element::Image { data, .. } = Element::image(&[0xff, 0x01], None) else {
            unreachable!()
        };
        assert_eq!(data, "ff01");
    }
}
