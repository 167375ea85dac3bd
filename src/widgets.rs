//! Widget input state threaded through every rerun.
//!
//! Viewers send the full widget state with each rerun request, keyed by
//! widget id (`kind:label`). Values are plain JSON scalars except triggers
//! (buttons), which are `{"trigger": bool}` and read `true` for exactly one
//! run after a press.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single widget value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WidgetValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Trigger { trigger: bool },
}

impl WidgetValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) | Self::Trigger { trigger: v } => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_index(&self) -> Option<usize> {
        match self {
            Self::Int(v) => usize::try_from(*v).ok(),
            _ => None,
        }
    }

    #[inline]
    pub const fn is_trigger(&self) -> bool {
        matches!(self, Self::Trigger { .. })
    }
}

/// Snapshot of every widget value, ordered by id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WidgetStates(BTreeMap<String, WidgetValue>);

impl WidgetStates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<&WidgetValue> {
        self.0.get(id)
    }

    pub fn set(&mut self, id: impl Into<String>, value: WidgetValue) {
        self.0.insert(id.into(), value);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &WidgetValue)> {
        self.0.iter()
    }

    /// Merge a newer snapshot over an older queued one.
    ///
    /// The newer snapshot wins, except that a pressed trigger in `old` stays
    /// pressed when `new` still carries that id as a trigger. Without this a
    /// button press followed quickly by a slider move would be lost.
    pub fn coalesce(old: &WidgetStates, new: WidgetStates) -> WidgetStates {
        let mut merged = new;
        for (id, value) in &old.0 {
            if matches!(value, WidgetValue::Trigger { trigger: true })
                && let Some(slot) = merged.0.get_mut(id)
                && slot.is_trigger()
            {
                *slot = WidgetValue::Trigger { trigger: true };
            }
        }
        merged
    }

    /// Release every pressed trigger.
    pub fn reset_triggers(&mut self) {
        for value in self.0.values_mut() {
            if let WidgetValue::Trigger { trigger } = value {
                *trigger = false;
            }
        }
    }
}

impl FromIterator<(String, WidgetValue)> for WidgetStates {
    fn from_iter<I: IntoIterator<Item = (String, WidgetValue)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn states(pairs: &[(&str, WidgetValue)]) -> WidgetStates {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_parse_from_viewer_json() {
        let parsed: WidgetStates = serde_json::from_str(
            r#"{"slider:n": 3, "slider:f": 2.5, "checkbox:c": true,
                "text_input:t": "hi", "button:go": {"trigger": true}}"#,
        )
        .unwrap();
        assert_eq!(parsed.get("slider:n"), Some(&WidgetValue::Int(3)));
        assert_eq!(parsed.get("slider:f"), Some(&WidgetValue::Float(2.5)));
        assert_eq!(parsed.get("checkbox:c"), Some(&WidgetValue::Bool(true)));
        assert_eq!(parsed.get("text_input:t").and_then(|v| v.as_str()), Some("hi"));
        assert_eq!(
            parsed.get("button:go"),
            Some(&WidgetValue::Trigger { trigger: true })
        );
    }

    #[test]
    fn test_coalesce_newer_wins() {
        let old = states(&[("slider:a", WidgetValue::Int(1))]);
        let new = states(&[("slider:a", WidgetValue::Int(2))]);
        let merged = WidgetStates::coalesce(&old, new);
        assert_eq!(merged.get("slider:a"), Some(&WidgetValue::Int(2)));
    }

    #[test]
    fn test_coalesce_keeps_pressed_trigger() {
        let old = states(&[
            ("button:go", WidgetValue::Trigger { trigger: true }),
            ("slider:a", WidgetValue::Int(1)),
        ]);
        let new = states(&[
            ("button:go", WidgetValue::Trigger { trigger: false }),
            ("slider:a", WidgetValue::Int(5)),
        ]);
        let merged = WidgetStates::coalesce(&old, new);
        assert_eq!(
            merged.get("button:go"),
            Some(&WidgetValue::Trigger { trigger: true })
        );
        assert_eq!(merged.get("slider:a"), Some(&WidgetValue::Int(5)));
    }

    #[test]
    fn test_coalesce_drops_trigger_missing_from_new() {
        let old = states(&[("button:go", WidgetValue::Trigger { trigger: true })]);
        let merged = WidgetStates::coalesce(&old, WidgetStates::new());
        assert!(merged.get("button:go").is_none());
    }

    #[test]
    fn test_reset_triggers() {
        let mut s = states(&[
            ("button:go", WidgetValue::Trigger { trigger: true }),
            ("checkbox:c", WidgetValue::Bool(true)),
        ]);
        s.reset_triggers();
        assert_eq!(
            s.get("button:go"),
            Some(&WidgetValue::Trigger { trigger: false })
        );
        assert_eq!(s.get("checkbox:c"), Some(&WidgetValue::Bool(true)));
    }
}
