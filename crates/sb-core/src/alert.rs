//! Alert feed and data dictionary types for connectors that offer them.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Default cap on alerts returned by one feed call.
pub const DEFAULT_ALERT_LIMIT: usize = 100;

/// A normalized alert pulled from a vendor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    /// Alert ID from the source system.
    pub id: String,
    pub title: String,
    pub description: String,
    pub severity: String,
    pub timestamp: DateTime<Utc>,
    /// Connector id of the source system.
    pub source: String,
    /// Vendor payload as returned.
    #[serde(default)]
    pub raw_data: HashMap<String, serde_json::Value>,
}

/// Restricts which alerts a feed call returns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertFilter {
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    /// Lowercase severity names; empty means all.
    pub severities: Vec<String>,
    pub limit: usize,
}

impl Default for AlertFilter {
    fn default() -> Self {
        Self {
            since: None,
            until: None,
            severities: Vec::new(),
            limit: DEFAULT_ALERT_LIMIT,
        }
    }
}

impl AlertFilter {
    /// Alerts raised during the last `hours` hours.
    pub fn last_hours(hours: i64) -> Self {
        Self {
            since: Some(Utc::now() - Duration::hours(hours)),
            ..Default::default()
        }
    }

    pub fn with_severities<I, S>(mut self, severities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.severities = severities
            .into_iter()
            .map(|s| s.into().to_lowercase())
            .collect();
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Returns true if `alert` passes the time window and severity filters.
    pub fn matches(&self, alert: &Alert) -> bool {
        if self.since.is_some_and(|since| alert.timestamp < since) {
            return false;
        }
        if self.until.is_some_and(|until| alert.timestamp > until) {
            return false;
        }
        self.severities.is_empty()
            || self
                .severities
                .iter()
                .any(|s| s.eq_ignore_ascii_case(&alert.severity))
    }
}

/// Documentation for one field a connector can return.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataDictionaryEntry {
    pub description: String,
    #[serde(rename = "type")]
    pub field_type: String,
    /// Connector id that contributed the entry.
    pub source: String,
}

/// Field name to field documentation, merged across connectors.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DataDictionary {
    entries: BTreeMap<String, DataDictionaryEntry>,
}

impl DataDictionary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an entry unless the field is already documented.
    ///
    /// Returns true if the entry was added.
    pub fn insert(&mut self, field: impl Into<String>, entry: DataDictionaryEntry) -> bool {
        match self.entries.entry(field.into()) {
            std::collections::btree_map::Entry::Occupied(_) => false,
            std::collections::btree_map::Entry::Vacant(slot) => {
                slot.insert(entry);
                true
            }
        }
    }

    /// Merges `other` into this dictionary; existing entries win.
    pub fn merge(&mut self, other: DataDictionary) -> usize {
        other
            .entries
            .into_iter()
            .filter(|(field, entry)| self.insert(field.clone(), entry.clone()))
            .count()
    }

    pub fn get(&self, field: &str) -> Option<&DataDictionaryEntry> {
        self.entries.get(field)
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alert(severity: &str, hours_ago: i64) -> Alert {
        Alert {
            id: "a-1".to_string(),
            title: "Suspicious login".to_string(),
            description: String::new(),
            severity: severity.to_string(),
            timestamp: Utc::now() - Duration::hours(hours_ago),
            source: "elastic".to_string(),
            raw_data: HashMap::new(),
        }
    }

    fn entry(description: &str, source: &str) -> DataDictionaryEntry {
        DataDictionaryEntry {
            description: description.to_string(),
            field_type: "keyword".to_string(),
            source: source.to_string(),
        }
    }

    #[test]
    fn test_filter_defaults() {
        let filter = AlertFilter::default();
        assert_eq!(filter.limit, DEFAULT_ALERT_LIMIT);
        assert!(filter.matches(&alert("low", 1000)));
    }

    #[test]
    fn test_filter_window_and_severity() {
        let filter = AlertFilter::last_hours(24).with_severities(["High", "critical"]);
        assert!(filter.matches(&alert("high", 2)));
        assert!(!filter.matches(&alert("low", 2)));
        assert!(!filter.matches(&alert("critical", 48)));
    }

    #[test]
    fn test_dictionary_merge_keeps_existing() {
        let mut dictionary = DataDictionary::new();
        dictionary.insert("host.name", entry("Host name", "core"));

        let mut other = DataDictionary::new();
        other.insert("host.name", entry("Name of the host", "elastic"));
        other.insert("source.ip", entry("Source address", "elastic"));

        assert_eq!(dictionary.merge(other), 1);
        assert_eq!(dictionary.len(), 2);
        assert_eq!(dictionary.get("host.name").unwrap().source, "core");
        assert_eq!(dictionary.get("source.ip").unwrap().source, "elastic");
    }
}
