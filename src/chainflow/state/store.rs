// SPDX-License-Identifier: MIT

//! Unit variable storage

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One bound variable
///
/// Set-variable steps may bind a literal value, a link to redirect to, or
/// both. Pull-variable steps only look at `link`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UnitVariable {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
}

impl UnitVariable {
    pub fn value(value: impl Into<String>) -> Self {
        Self {
            value: Some(value.into()),
            link: None,
        }
    }

    pub fn link(link: impl Into<String>) -> Self {
        Self {
            value: None,
            link: Some(link.into()),
        }
    }
}

/// A processing unit's variable namespace
///
/// Each unit owns exactly one of these, so bindings never leak between
/// units. Writes replace the previous binding for the name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnitVariables {
    bindings: BTreeMap<String, UnitVariable>,
}

impl UnitVariables {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `name`, replacing any earlier binding
    pub fn set(&mut self, name: impl Into<String>, variable: UnitVariable) {
        self.bindings.insert(name.into(), variable);
    }

    /// The binding for `name`, or `None` when unset
    pub fn get(&self, name: &str) -> Option<&UnitVariable> {
        self.bindings.get(name)
    }

    /// The link bound to `name`, if any
    pub fn link(&self, name: &str) -> Option<&str> {
        self.bindings.get(name).and_then(|v| v.link.as_deref())
    }

    pub fn clear(&mut self) {
        self.bindings.clear();
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &UnitVariable)> {
        self.bindings.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unset_is_none() {
        let vars = UnitVariables::new();
        assert!(vars.get("anything").is_none());
        assert!(vars.link("anything").is_none());
    }

    #[test]
    fn test_last_write_wins() {
        let mut vars = UnitVariables::new();
        vars.set("x", UnitVariable::value("first"));
        vars.set("x", UnitVariable::value("second"));
        assert_eq!(vars.get("x"), Some(&UnitVariable::value("second")));
        assert_eq!(vars.len(), 1);

        // A later write without a link drops the earlier link
        vars.set("y", UnitVariable::link("l1"));
        vars.set("y", UnitVariable::value("v"));
        assert!(vars.link("y").is_none());
    }

    #[test]
    fn test_namespaces_are_independent() {
        let mut unit_a = UnitVariables::new();
        let unit_b = UnitVariables::new();
        unit_a.set("x", UnitVariable::value("v"));
        assert!(unit_b.get("x").is_none());
    }

    #[test]
    fn test_serializes_as_plain_map() {
        let mut vars = UnitVariables::new();
        vars.set("x", UnitVariable::link("l1"));
        let json = serde_json::to_value(&vars).unwrap();
        assert_eq!(json, serde_json::json!({"x": {"link": "l1"}}));

        let back: UnitVariables = serde_json::from_value(json).unwrap();
        assert_eq!(back, vars);
    }

    #[test]
    fn test_clear() {
        let mut vars = UnitVariables::new();
        vars.set("x", UnitVariable::value("v"));
        vars.clear();
        assert!(vars.is_empty());
    }
}
