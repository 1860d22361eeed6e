//! JQL Injection Prevention Tests
//!
//! Feeds known JQL injection payloads through the search builder used by the
//! Jira connector and checks that none of them can widen the project scope.
//! Reference: https://support.atlassian.com/jira-software-cloud/docs/search-syntax-for-text-fields/

use sb_connectors::ticketing::jql::{build_search, escape_text_value, JqlError};
use sb_core::ConnectorError;

/// Real-world JQL injection payloads.
mod attack_payloads {
    /// Quote escapes that smuggle a boolean operator.
    pub const QUOTE_ESCAPES: &[&str] = &[
        "test\" OR project = \"SECRET",
        "test' OR project = 'SECRET",
        "test\\\" OR 1=1--",
        "\\\" OR project != project OR \\\"",
        "test\u{201C} OR 1=1",
    ];

    pub const OPERATOR_INJECTIONS: &[&str] = &[
        "foo AND bar",
        "foo OR bar",
        "NOT something",
        "value IN (1,2,3)",
        "status IS EMPTY",
        "assignee WAS admin",
        "status CHANGED BY admin",
        "created DURING (2024-01-01, 2024-12-31)",
        "updated ON 2024-01-01",
        "created BEFORE 2024-01-01",
        "created AFTER 2024-01-01",
    ];

    pub const FUNCTION_INJECTIONS: &[&str] = &[
        "currentUser()",
        "currentLogin()",
        "membersOf(administrators)",
        "now()",
        "startOfMonth()",
        "issueHistory()",
        "linkedIssues(ABC-123)",
        "watchedIssues()",
        "updatedBy(admin)",
        "projectsWhereUserHasPermission(admin)",
    ];

    pub const ORDER_INJECTIONS: &[&str] = &[
        "test\" ORDER BY created ASC",
        "test ORDER BY priority DESC",
        "\" ORDER BY assignee",
    ];

    pub const WILDCARD_ABUSE: &[&str] = &["test*", "*admin*", "????", "test?", "*"];

    pub const COMPLEX_ATTACKS: &[&str] = &[
        "test\" OR project IN projectsWhereUserHasPermission(\"BROWSE\")",
        "\" OR assignee IN membersOf(\"administrators\") AND \"",
        "test\" OR (status = Done AND reporter = currentUser())",
        "\" OR updated >= startOfMonth(-12) ORDER BY updated DESC --",
        "(test\" OR \"1\"=\"1\") AND project = SECRET",
    ];

    /// Harmless text that only needs escaping.
    pub const SPECIAL_CHAR_SEQUENCES: &[&str] = &[
        "test+value",
        "test-value",
        "test&value",
        "test|value",
        "test!value",
        "test{value}",
        "test[value]",
        "test^value",
        "test~value",
        "test:value",
        "test\\value",
        "foo + bar & baz | qux",
        "{{{nested}}}",
        "evil.example.com\" quoted",
    ];
}

/// Reverses the backslash escaping, failing on a dangling escape.
fn unescape(escaped: &str) -> Option<String> {
    let mut out = String::with_capacity(escaped.len());
    let mut chars = escaped.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            out.push(chars.next()?);
        } else {
            out.push(c);
        }
    }
    Some(out)
}

/// Every double quote in `escaped` is preceded by an escaping backslash.
fn quotes_are_escaped(escaped: &str) -> bool {
    let mut backslashes = 0usize;
    for c in escaped.chars() {
        if c == '"' && backslashes % 2 == 0 {
            return false;
        }
        backslashes = if c == '\\' { backslashes + 1 } else { 0 };
    }
    true
}

fn assert_all_rejected(payloads: &[&str]) {
    for payload in payloads {
        assert!(
            escape_text_value(payload).is_err(),
            "payload was accepted: {:?}",
            payload
        );
    }
}

#[test]
fn test_quote_escape_injections_blocked() {
    assert_all_rejected(attack_payloads::QUOTE_ESCAPES);
}

#[test]
fn test_operator_injections_blocked() {
    for payload in attack_payloads::OPERATOR_INJECTIONS {
        assert!(matches!(
            escape_text_value(payload),
            Err(JqlError::ReservedWord(_))
        ), "payload was accepted: {:?}", payload);
    }
}

#[test]
fn test_function_injections_blocked() {
    for payload in attack_payloads::FUNCTION_INJECTIONS {
        assert!(matches!(
            escape_text_value(payload),
            Err(JqlError::FunctionSyntax(_))
        ), "payload was accepted: {:?}", payload);
    }
}

#[test]
fn test_order_injections_blocked() {
    assert_all_rejected(attack_payloads::ORDER_INJECTIONS);
}

#[test]
fn test_wildcard_abuse_blocked() {
    for payload in attack_payloads::WILDCARD_ABUSE {
        assert!(matches!(
            escape_text_value(payload),
            Err(JqlError::ForbiddenWildcard(_))
        ));
    }
}

#[test]
fn test_complex_attacks_blocked() {
    assert_all_rejected(attack_payloads::COMPLEX_ATTACKS);
}

#[test]
fn test_special_chars_escaped_losslessly() {
    for payload in attack_payloads::SPECIAL_CHAR_SEQUENCES {
        let escaped = escape_text_value(payload).unwrap();
        assert_ne!(escaped.as_str(), *payload);
        assert!(quotes_are_escaped(&escaped), "unescaped quote in {:?}", escaped);
        assert_eq!(unescape(&escaped).as_deref(), Some(*payload));
    }
}

#[test]
fn test_search_stays_within_projects() {
    let projects = vec!["SEC".to_string()];
    let all_payloads = attack_payloads::QUOTE_ESCAPES
        .iter()
        .chain(attack_payloads::OPERATOR_INJECTIONS)
        .chain(attack_payloads::FUNCTION_INJECTIONS)
        .chain(attack_payloads::ORDER_INJECTIONS)
        .chain(attack_payloads::COMPLEX_ATTACKS);

    for payload in all_payloads {
        let err = build_search(&projects, payload, None).unwrap_err();
        assert!(matches!(err, ConnectorError::InvalidRequest(_)));

        let err = build_search(&projects, "phishing", Some(*payload)).unwrap_err();
        assert!(matches!(err, ConnectorError::InvalidRequest(_)));
    }
}

#[test]
fn test_escaped_text_cannot_close_the_operand() {
    let projects = vec!["SEC".to_string()];
    let jql = build_search(&projects, "evil.example.com\" quoted", None).unwrap();
    assert_eq!(
        jql,
        "project IN (\"SEC\") AND (summary ~ \"evil.example.com\\\" quoted\" OR \
         description ~ \"evil.example.com\\\" quoted\") ORDER BY updated DESC"
    );
}

#[test]
fn test_project_keys_cannot_inject() {
    for key in ["SEC\") OR project IN (\"HR", "SEC OR 1=1", "SEC,HR", ""] {
        let err = build_search(&[key.to_string()], "phishing", None).unwrap_err();
        assert!(matches!(err, ConnectorError::InvalidRequest(_)), "{:?}", key);
    }
}
