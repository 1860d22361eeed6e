//! Resource scoping: which subset of a vendor's resources a tool call covers.
//!
//! A connector declares its selection axes as [`ScopeTargetDefinition`]s and
//! enumerates the live values for each axis as [`ScopeTargetSelector`]s. The
//! caller records its choices in a [`TargetSelection`] and converts it into
//! the connector's typed [`Target`].

use std::collections::BTreeMap;
use std::fmt::Debug;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// One selectable scoping axis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeTargetDefinition {
    pub name: String,
    pub multiselect: bool,
}

impl ScopeTargetDefinition {
    /// An axis that accepts exactly one value.
    pub fn single(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            multiselect: false,
        }
    }

    /// An axis that accepts any number of values.
    pub fn multi(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            multiselect: true,
        }
    }
}

/// The live set of legal values for one axis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeTargetSelector {
    #[serde(rename = "type")]
    pub target_type: String,
    pub values: Vec<String>,
}

impl ScopeTargetSelector {
    pub fn new(target_type: impl Into<String>, values: Vec<String>) -> Self {
        Self {
            target_type: target_type.into(),
            values,
        }
    }
}

/// Definitions plus the selectors queried from the vendor for them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryTargetOptions {
    pub definitions: Vec<ScopeTargetDefinition>,
    pub selectors: Vec<ScopeTargetSelector>,
}

impl QueryTargetOptions {
    pub fn new(
        definitions: Vec<ScopeTargetDefinition>,
        selectors: Vec<ScopeTargetSelector>,
    ) -> Self {
        Self {
            definitions,
            selectors,
        }
    }

    /// Options for a connector without scoping axes.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn definition(&self, name: &str) -> Option<&ScopeTargetDefinition> {
        self.definitions.iter().find(|d| d.name == name)
    }

    pub fn selector(&self, target_type: &str) -> Option<&ScopeTargetSelector> {
        self.selectors.iter().find(|s| s.target_type == target_type)
    }

    /// Returns the first selector whose type is not a declared definition name.
    pub fn undeclared_selector(&self) -> Option<&ScopeTargetSelector> {
        self.selectors
            .iter()
            .find(|s| self.definition(&s.target_type).is_none())
    }
}

/// Marker for a connector's concrete scoping selection.
///
/// The framework never inspects a target; it only builds one from a
/// [`TargetSelection`] and hands it to the connector.
pub trait Target: DeserializeOwned + Debug + Send + Sync + 'static {}

/// Target for connectors that have no scoping axes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoTarget {}

impl Target for NoTarget {}

/// Errors converting a selection into a typed target.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TargetError {
    #[error("unknown target type '{0}'")]
    UnknownType(String),

    #[error("target type '{target_type}' accepts one value, got {count}")]
    NotMultiselect { target_type: String, count: usize },

    #[error("invalid target: {0}")]
    Invalid(String),
}

/// A caller's choices: axis name to chosen values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TargetSelection(BTreeMap<String, Vec<String>>);

impl TargetSelection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `values` under `target_type`, replacing any earlier choice.
    pub fn select<I, S>(mut self, target_type: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.0.insert(
            target_type.into(),
            values.into_iter().map(Into::into).collect(),
        );
        self
    }

    /// Selects every offered value on multiselect axes and the first value on
    /// single-select axes.
    pub fn from_options_all(options: &QueryTargetOptions) -> Self {
        let mut selection = BTreeMap::new();
        for selector in &options.selectors {
            let multiselect = options
                .definition(&selector.target_type)
                .map(|d| d.multiselect)
                .unwrap_or(false);
            let values = if multiselect {
                selector.values.clone()
            } else {
                selector.values.iter().take(1).cloned().collect()
            };
            selection.insert(selector.target_type.clone(), values);
        }
        Self(selection)
    }

    pub fn get(&self, target_type: &str) -> Option<&[String]> {
        self.0.get(target_type).map(Vec::as_slice)
    }

    pub fn target_types(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Builds the JSON object a typed target deserializes from.
    ///
    /// Multiselect axes become arrays (empty when nothing was chosen).
    /// Single-select axes become a string, or are omitted when unchosen.
    pub fn to_target_value(
        &self,
        definitions: &[ScopeTargetDefinition],
    ) -> Result<Value, TargetError> {
        if let Some(unknown) = self
            .0
            .keys()
            .find(|name| !definitions.iter().any(|d| &d.name == *name))
        {
            return Err(TargetError::UnknownType(unknown.clone()));
        }

        let mut object = Map::new();
        for definition in definitions {
            let chosen = self.0.get(&definition.name);
            if definition.multiselect {
                let values = chosen
                    .map(|v| v.iter().cloned().map(Value::String).collect())
                    .unwrap_or_default();
                object.insert(definition.name.clone(), Value::Array(values));
                continue;
            }

            match chosen.map(Vec::as_slice) {
                None | Some([]) => {}
                Some([value]) => {
                    object.insert(definition.name.clone(), Value::String(value.clone()));
                }
                Some(values) => {
                    return Err(TargetError::NotMultiselect {
                        target_type: definition.name.clone(),
                        count: values.len(),
                    });
                }
            }
        }
        Ok(Value::Object(object))
    }

    /// Converts this selection into the connector's typed target.
    pub fn into_target<T: Target>(
        &self,
        definitions: &[ScopeTargetDefinition],
    ) -> Result<T, TargetError> {
        let value = self.to_target_value(definitions)?;
        serde_json::from_value(value).map_err(|e| TargetError::Invalid(e.to_string()))
    }
}
