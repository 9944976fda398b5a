//! In-memory store of decoded controller registers
//!
//! The updater fills it through the protocol engine; publishers read it.
//! Values are kept as decoded, without interpretation.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::protocol::Value;

/// One stored register value
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegisterValue {
    /// Name the register is published under
    pub name: String,
    /// Last decoded value
    pub value: Value,
    /// When the value was last read
    pub updated_at: DateTime<Utc>,
}

/// Register values of one controller, keyed by register code
#[derive(Debug, Clone, Default, Serialize)]
pub struct ControllerRepo {
    registers: BTreeMap<u16, RegisterValue>,
    last_full_update: Option<DateTime<Utc>>,
    last_state_update: Option<DateTime<Utc>>,
}

impl ControllerRepo {
    /// Creates an empty repository
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a freshly read value
    pub fn set(&mut self, code: u16, name: impl Into<String>, value: Value) {
        self.registers.insert(
            code,
            RegisterValue {
                name: name.into(),
                value,
                updated_at: Utc::now(),
            },
        );
    }

    /// Value of a register, if it has been read
    pub fn get(&self, code: u16) -> Option<&RegisterValue> {
        self.registers.get(&code)
    }

    /// Value of a register by its published name
    pub fn by_name(&self, name: &str) -> Option<&RegisterValue> {
        self.registers.values().find(|r| r.name == name)
    }

    /// All stored registers in code order
    pub fn iter(&self) -> impl Iterator<Item = (u16, &RegisterValue)> {
        self.registers.iter().map(|(code, value)| (*code, value))
    }

    pub fn len(&self) -> usize {
        self.registers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registers.is_empty()
    }

    /// Records the completion of a refresh
    pub fn mark_updated(&mut self, full: bool) {
        let now = Utc::now();
        if full {
            self.last_full_update = Some(now);
        }
        self.last_state_update = Some(now);
    }

    /// Completion time of the last full refresh
    pub fn last_full_update(&self) -> Option<DateTime<Utc>> {
        self.last_full_update
    }

    /// Completion time of the last refresh of any kind
    pub fn last_state_update(&self) -> Option<DateTime<Utc>> {
        self.last_state_update
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_lookup() {
        let mut repo = ControllerRepo::new();
        repo.set(42, "temperature", Value::Scalar(251));
        repo.set(7, "name", Value::Text("Reef".to_string()));

        assert_eq!(repo.len(), 2);
        assert_eq!(repo.get(42).unwrap().value, Value::Scalar(251));
        assert_eq!(repo.by_name("name").unwrap().value, Value::Text("Reef".to_string()));
        assert_eq!(repo.iter().map(|(code, _)| code).collect::<Vec<_>>(), vec![7, 42]);
    }

    #[test]
    fn test_overwrite_keeps_one_entry() {
        let mut repo = ControllerRepo::new();
        repo.set(42, "temperature", Value::Scalar(251));
        repo.set(42, "temperature", Value::Scalar(252));
        assert_eq!(repo.len(), 1);
        assert_eq!(repo.get(42).unwrap().value, Value::Scalar(252));
    }

    #[test]
    fn test_mark_updated() {
        let mut repo = ControllerRepo::new();
        repo.mark_updated(false);
        assert!(repo.last_full_update().is_none());
        assert!(repo.last_state_update().is_some());

        repo.mark_updated(true);
        assert!(repo.last_full_update().is_some());
    }

    #[test]
    fn test_serializes_to_json() {
        let mut repo = ControllerRepo::new();
        repo.set(1, "ph", Value::Scalar(820));
        let json = serde_json::to_value(&repo).unwrap();
        assert_eq!(json["registers"]["1"]["name"], "ph");
        assert_eq!(json["registers"]["1"]["value"], 820);
    }
}
