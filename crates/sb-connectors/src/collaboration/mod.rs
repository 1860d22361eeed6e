//! Collaboration and messaging connectors.

pub mod slack;

pub use slack::{SlackConfig, SlackDescriptor, SlackTarget};
