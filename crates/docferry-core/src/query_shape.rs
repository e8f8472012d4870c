//! Eligibility rules for queries used as change-notification subscriptions.
//!
//! A subscribed query must describe a deterministic row set with an explicit
//! column list, otherwise "the result set changed" has no stable meaning.
//! The rules mirror the restrictions database notification services put on
//! subscribed commands.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{Error, Result};

static STRING_LITERAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"'(?:[^']|'')*'").expect("valid regex"));

static SELECT_FROM: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)^\s*select\s+(?P<columns>.+?)\s+from\s+(?P<relation>[A-Za-z_][\w.]*)")
        .expect("valid regex")
});

static FORBIDDEN_KEYWORDS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(distinct|top|limit|offset|fetch|union|intersect|except|into|group\s+by|having)\b",
    )
    .expect("valid regex")
});

static AGGREGATES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(count|sum|avg|min|max|string_agg|array_agg|bool_and|bool_or)\s*\(")
        .expect("valid regex")
});

static NON_DETERMINISTIC: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(now|random|clock_timestamp|statement_timestamp|timeofday|gen_random_uuid)\s*\(|\b(current_timestamp|current_date|current_time|localtimestamp|localtime)\b",
    )
    .expect("valid regex")
});

/// A query that passed [`validate_subscription_query`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryShape {
    /// Selected column expressions, in order.
    pub columns: Vec<String>,
    /// First relation named after `FROM`.
    pub relation: String,
}

/// Check that `query` can back a change-notification subscription.
pub fn validate_subscription_query(query: &str) -> Result<QueryShape> {
    let trimmed = query.trim().trim_end_matches(';').trim();
    if trimmed.is_empty() {
        return Err(Error::UnsupportedQuery("query is empty".to_string()));
    }

    // Literals may legitimately contain anything; judge the shape without them.
    let bare = STRING_LITERAL.replace_all(trimmed, "''");

    if bare.contains(';') {
        return Err(Error::UnsupportedQuery(
            "only a single statement can be subscribed".to_string(),
        ));
    }
    if bare.contains('*') {
        return Err(Error::UnsupportedQuery(
            "wildcards are not allowed; list columns explicitly".to_string(),
        ));
    }

    let caps = SELECT_FROM.captures(&bare).ok_or_else(|| {
        Error::UnsupportedQuery("expected SELECT <columns> FROM <relation>".to_string())
    })?;

    if let Some(m) = FORBIDDEN_KEYWORDS.find(&bare) {
        return Err(Error::UnsupportedQuery(format!(
            "'{}' does not yield a deterministic row set",
            m.as_str().to_uppercase()
        )));
    }
    if let Some(m) = AGGREGATES.find(&bare) {
        return Err(Error::UnsupportedQuery(format!(
            "aggregate '{}' is not allowed",
            m.as_str().trim_end_matches('(').trim()
        )));
    }
    if let Some(m) = NON_DETERMINISTIC.find(&bare) {
        return Err(Error::UnsupportedQuery(format!(
            "non-deterministic function '{}' is not allowed",
            m.as_str().trim_end_matches('(').trim()
        )));
    }

    let columns: Vec<String> = caps["columns"]
        .split(',')
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .collect();
    if columns.is_empty() {
        return Err(Error::UnsupportedQuery("no columns selected".to_string()));
    }

    Ok(QueryShape {
        columns,
        relation: caps["relation"].to_string(),
    })
}
