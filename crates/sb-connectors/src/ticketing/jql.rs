//! JQL building with injection-safe value handling.
//!
//! User text only ever reaches JQL through [`escape_text_value`], which
//! rejects wildcards, reserved words, and function syntax before escaping.
//! Project keys are validated against Jira's key alphabet.

use sb_core::{ConnectorError, ConnectorResult};
use thiserror::Error;

/// Reference: https://support.atlassian.com/jira-software-cloud/docs/search-syntax-for-text-fields/
const SPECIAL_CHARS: &[char] = &[
    '+', '-', '&', '|', '!', '(', ')', '{', '}', '[', ']', '^', '"', '~', ':', '\\',
];

/// Rejected rather than escaped.
const FORBIDDEN_CHARS: &[char] = &['*', '?'];

/// Matched case-insensitively against whitespace-separated tokens.
const RESERVED_WORDS: &[&str] = &[
    "AND",
    "OR",
    "NOT",
    "IN",
    "IS",
    "WAS",
    "CHANGED",
    "BY",
    "DURING",
    "ON",
    "BEFORE",
    "AFTER",
    "FROM",
    "TO",
    "EMPTY",
    "NULL",
    "ORDER",
    "ASC",
    "DESC",
    "currentUser",
    "membersOf",
    "now",
    "issueHistory",
    "linkedIssues",
    "watchedIssues",
    "updatedBy",
];

pub const MAX_QUERY_LENGTH: usize = 1000;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JqlError {
    #[error("wildcard character '{0}' is not allowed in search queries")]
    ForbiddenWildcard(char),

    #[error("JQL reserved word '{0}' is not allowed in search values")]
    ReservedWord(String),

    #[error("function syntax '{0}' is not allowed in search values")]
    FunctionSyntax(String),

    #[error("search query too long ({0} chars, max {max})", max = MAX_QUERY_LENGTH)]
    InputTooLong(usize),

    #[error("search query contains control characters")]
    ControlCharacter,

    #[error("invalid project key '{0}': must contain only alphanumeric characters and underscores")]
    InvalidProjectKey(String),
}

impl From<JqlError> for ConnectorError {
    fn from(err: JqlError) -> Self {
        ConnectorError::InvalidRequest(err.to_string())
    }
}

fn check_reserved_words(value: &str) -> Result<(), JqlError> {
    for token in value.split_whitespace() {
        if RESERVED_WORDS.iter().any(|rw| rw.eq_ignore_ascii_case(token)) {
            return Err(JqlError::ReservedWord(token.to_string()));
        }
    }
    Ok(())
}

/// Rejects `word(` sequences.
fn check_function_syntax(value: &str) -> Result<(), JqlError> {
    let mut current_word = String::new();
    for c in value.chars() {
        if c.is_alphanumeric() || c == '_' {
            current_word.push(c);
        } else {
            if c == '(' && !current_word.is_empty() {
                return Err(JqlError::FunctionSyntax(format!("{}()", current_word)));
            }
            current_word.clear();
        }
    }
    Ok(())
}

/// Validates and escapes a value for use inside a quoted text-search operand.
pub fn escape_text_value(value: &str) -> Result<String, JqlError> {
    if value.len() > MAX_QUERY_LENGTH {
        return Err(JqlError::InputTooLong(value.len()));
    }
    if value
        .chars()
        .any(|c| c.is_control() && !matches!(c, '\t' | '\n' | '\r'))
    {
        return Err(JqlError::ControlCharacter);
    }
    if let Some(c) = value.chars().find(|c| FORBIDDEN_CHARS.contains(c)) {
        return Err(JqlError::ForbiddenWildcard(c));
    }
    check_reserved_words(value)?;
    check_function_syntax(value)?;

    let mut escaped = String::with_capacity(value.len() * 2);
    for c in value.chars() {
        if SPECIAL_CHARS.contains(&c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    Ok(escaped)
}

pub fn validate_project_key(key: &str) -> Result<(), JqlError> {
    if key.is_empty() || !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(JqlError::InvalidProjectKey(key.to_string()));
    }
    Ok(())
}

/// Builds the search JQL over `projects`.
///
/// The free-text `query` is matched against summary and description; an
/// optional `status` narrows the result.
pub fn build_search(
    projects: &[String],
    query: &str,
    status: Option<&str>,
) -> ConnectorResult<String> {
    if projects.is_empty() {
        return Err(ConnectorError::InvalidRequest(
            "no Jira projects are selected".to_string(),
        ));
    }
    for key in projects {
        validate_project_key(key)?;
    }

    let quoted: Vec<String> = projects.iter().map(|k| format!("\"{}\"", k)).collect();
    let mut clauses = vec![format!("project IN ({})", quoted.join(", "))];

    let query = query.trim();
    if !query.is_empty() {
        let escaped = escape_text_value(query)?;
        clauses.push(format!(
            "(summary ~ \"{}\" OR description ~ \"{}\")",
            escaped, escaped
        ));
    }
    if let Some(status) = status.map(str::trim).filter(|s| !s.is_empty()) {
        clauses.push(format!("status = \"{}\"", escape_text_value(status)?));
    }

    Ok(format!("{} ORDER BY updated DESC", clauses.join(" AND ")))
}

/// Project key of an issue key such as `SEC-42`.
pub fn project_of(issue_key: &str) -> Option<&str> {
    let (project, number) = issue_key.rsplit_once('-')?;
    (!project.is_empty() && !number.is_empty() && number.chars().all(|c| c.is_ascii_digit()))
        .then_some(project)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_string_unchanged() {
        assert_eq!(escape_text_value("simple search").unwrap(), "simple search");
    }

    #[test]
    fn test_special_chars_escaped() {
        assert_eq!(escape_text_value("test+value").unwrap(), "test\\+value");
        assert_eq!(escape_text_value("test:value").unwrap(), "test\\:value");
        assert_eq!(escape_text_value("test (value)").unwrap(), "test \\(value\\)");
    }

    #[test]
    fn test_quote_escape_attempt() {
        let escaped = escape_text_value("x\" ~ \"y").unwrap();
        assert_eq!(escaped, "x\\\" \\~ \\\"y");
    }

    #[test]
    fn test_rejects_wildcards() {
        assert_eq!(
            escape_text_value("admin*").unwrap_err(),
            JqlError::ForbiddenWildcard('*')
        );
        assert_eq!(
            escape_text_value("adm?n").unwrap_err(),
            JqlError::ForbiddenWildcard('?')
        );
    }

    #[test]
    fn test_rejects_reserved_words() {
        assert!(matches!(
            escape_text_value("phishing or project = HR").unwrap_err(),
            JqlError::ReservedWord(w) if w == "or"
        ));
        assert!(matches!(
            escape_text_value("x ORDER BY created").unwrap_err(),
            JqlError::ReservedWord(_)
        ));
        // Substrings of reserved words are fine.
        assert!(escape_text_value("android border").is_ok());
    }

    #[test]
    fn test_rejects_function_syntax() {
        assert_eq!(
            escape_text_value("assignee=currentUser()").unwrap_err(),
            JqlError::FunctionSyntax("currentUser()".to_string())
        );
    }

    #[test]
    fn test_rejects_length_and_control() {
        let long = "a".repeat(MAX_QUERY_LENGTH + 1);
        assert_eq!(
            escape_text_value(&long).unwrap_err(),
            JqlError::InputTooLong(MAX_QUERY_LENGTH + 1)
        );
        assert!(escape_text_value(&"a".repeat(MAX_QUERY_LENGTH)).is_ok());
        assert_eq!(
            escape_text_value("bad\u{0000}value").unwrap_err(),
            JqlError::ControlCharacter
        );
        assert!(escape_text_value("tab\there\n").is_ok());
    }

    #[test]
    fn test_project_key_validation() {
        assert!(validate_project_key("SEC").is_ok());
        assert!(validate_project_key("IT_SUPPORT").is_ok());
        assert!(validate_project_key("").is_err());
        assert!(validate_project_key("SEC\" OR 1=1").is_err());
    }

    #[test]
    fn test_build_search() {
        let projects = vec!["SEC".to_string(), "IR".to_string()];
        let jql = build_search(&projects, "phishing", Some("Open")).unwrap();
        assert_eq!(
            jql,
            "project IN (\"SEC\", \"IR\") AND \
             (summary ~ \"phishing\" OR description ~ \"phishing\") \
             AND status = \"Open\" ORDER BY updated DESC"
        );

        let jql = build_search(&projects[..1], "  ", None).unwrap();
        assert_eq!(jql, "project IN (\"SEC\") ORDER BY updated DESC");
    }

    #[test]
    fn test_build_search_requires_projects() {
        let err = build_search(&[], "phishing", None).unwrap_err();
        assert!(matches!(err, ConnectorError::InvalidRequest(_)));
    }

    #[test]
    fn test_build_search_maps_validation_errors() {
        let err = build_search(&["SEC".to_string()], "a AND b", None).unwrap_err();
        assert!(matches!(err, ConnectorError::InvalidRequest(msg) if msg.contains("AND")));
    }

    #[test]
    fn test_project_of() {
        assert_eq!(project_of("SEC-42"), Some("SEC"));
        assert_eq!(project_of("IT_OPS-7"), Some("IT_OPS"));
        assert_eq!(project_of("SEC"), None);
        assert_eq!(project_of("SEC-"), None);
        assert_eq!(project_of("-42"), None);
        assert_eq!(project_of("SEC-4a"), None);
    }
}
