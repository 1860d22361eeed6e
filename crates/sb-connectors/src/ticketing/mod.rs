//! Ticketing connectors.

pub mod jira;
pub mod jql;

pub use jira::{JiraConfig, JiraDescriptor, JiraTarget};
