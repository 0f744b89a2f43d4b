//! Firmware-command notification rules.
//!
//! Rules are written one per line as `{CODE}{TEXT}`. When a firmware command
//! sent to the printer starts with `CODE`, `TEXT` is sent as a notification.
//!
//! ```text
//! # filament change
//! {M600}{Filament change requested}
//! {M0}{Print paused}
//! ```
//!
//! The set is rebuilt wholesale whenever configuration changes and swapped
//! in behind an `Arc`, so readers never see a half-built set.

use parking_lot::RwLock;
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::{Arc, LazyLock};
use tracing::{debug, info, warn};

static RULE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\{([^{}]*)\}\{(.*)\}$").unwrap());

/// A trigger-code / notification-text pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    /// Prefix matched against the start of a firmware command.
    pub code: String,
    /// Message body sent when the rule matches.
    pub text: String,
}

impl Rule {
    /// Whether this rule fires for the given firmware command.
    pub fn matches(&self, command: &str) -> bool {
        command.starts_with(&self.code)
    }
}

/// A rule line that could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleParseError {
    /// 1-based line number in the raw text.
    pub line_number: usize,
    /// The offending line, trimmed.
    pub line: String,
}

impl std::fmt::Display for RuleParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "line {}: expected {{CODE}}{{TEXT}}, got {:?}",
            self.line_number, self.line
        )
    }
}

impl std::error::Error for RuleParseError {}

/// An immutable set of rules keyed by code.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleSet {
    rules: BTreeMap<String, Rule>,
}

impl RuleSet {
    /// Parse raw rule text.
    ///
    /// Blank lines and lines starting with `#` are skipped. Malformed lines
    /// are returned as errors and skipped; they never abort the parse. A
    /// later rule with the same code replaces the earlier one.
    pub fn parse(raw: &str) -> (Self, Vec<RuleParseError>) {
        let mut rules = BTreeMap::new();
        let mut errors = Vec::new();

        for (index, line) in raw.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            match parse_line(line) {
                Some(rule) => {
                    if let Some(previous) = rules.insert(rule.code.clone(), rule) {
                        debug!(code = %previous.code, "Rule redefined, keeping the later one");
                    }
                }
                None => errors.push(RuleParseError {
                    line_number: index + 1,
                    line: line.to_string(),
                }),
            }
        }

        (Self { rules }, errors)
    }

    /// All rules whose code is a prefix of `command`, in code order.
    ///
    /// Overlapping prefixes all fire; an empty command matches nothing.
    pub fn matching<'a>(&'a self, command: &'a str) -> impl Iterator<Item = &'a Rule> + 'a {
        self.rules
            .values()
            .filter(move |rule| !command.is_empty() && rule.matches(command))
    }

    /// Look up the text for an exact code.
    pub fn get(&self, code: &str) -> Option<&str> {
        self.rules.get(code).map(|rule| rule.text.as_str())
    }

    /// Iterate over all rules in code order.
    pub fn iter(&self) -> impl Iterator<Item = &Rule> {
        self.rules.values()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

fn parse_line(line: &str) -> Option<Rule> {
    let captures = RULE_REGEX.captures(line)?;
    let code = captures.get(1)?.as_str().trim();
    let text = captures.get(2)?.as_str().trim();

    if code.is_empty() {
        return None;
    }

    Some(Rule {
        code: code.to_string(),
        text: text.to_string(),
    })
}

/// Read access to the current rule set.
pub trait RuleSource: Send + Sync {
    /// Snapshot of the rules in effect right now.
    fn current(&self) -> Arc<RuleSet>;
}

/// Holds the active rule set and replaces it on reconfiguration.
#[derive(Debug, Default)]
pub struct RuleStore {
    current: RwLock<Arc<RuleSet>>,
}

impl RuleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `raw` and swap the result in as the active set.
    ///
    /// Malformed lines are logged and skipped.
    pub fn rebuild(&self, raw: &str) -> Arc<RuleSet> {
        let (rules, errors) = RuleSet::parse(raw);

        for error in &errors {
            warn!(
                line_number = error.line_number,
                line = %error.line,
                "Skipping malformed notification rule"
            );
        }

        let rules = Arc::new(rules);
        *self.current.write() = rules.clone();

        info!(
            rules = rules.len(),
            rejected = errors.len(),
            "Notification rules rebuilt"
        );

        rules
    }
}

impl RuleSource for RuleStore {
    fn current(&self) -> Arc<RuleSet> {
        self.current.read().clone()
    }
}
