//! Panel data model: rules, panel configurations, and count results.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::backend::ThreadCounts;

/// Which message field a rule matches against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleField {
    From,
    To,
    Cc,
    Bcc,
    Subject,
    Body,
    List,
    Label,
}

impl RuleField {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::From => "from",
            Self::To => "to",
            Self::Cc => "cc",
            Self::Bcc => "bcc",
            Self::Subject => "subject",
            Self::Body => "body",
            Self::List => "list",
            Self::Label => "label",
        }
    }
}

impl fmt::Display for RuleField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a matching message is claimed by or excluded from the panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleAction {
    Accept,
    Reject,
}

/// A single field/pattern/action triple.
///
/// `pattern` is written by the user in a regex-like syntax. It is never
/// pre-escaped; the compiler translates it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub field: RuleField,
    pub pattern: String,
    pub action: RuleAction,
}

impl Rule {
    pub fn accept(field: RuleField, pattern: impl Into<String>) -> Self {
        Self {
            field,
            pattern: pattern.into(),
            action: RuleAction::Accept,
        }
    }

    pub fn reject(field: RuleField, pattern: impl Into<String>) -> Self {
        Self {
            field,
            pattern: pattern.into(),
            action: RuleAction::Reject,
        }
    }
}

/// What a panel selects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PanelKind {
    /// Messages matching the rules. Empty rules select the whole inbox.
    Filter { rules: Vec<Rule> },
    /// Messages matched by none of the sibling filter panels.
    CatchAll,
}

/// A named, user-defined view of the inbox.
///
/// On the wire: `{ "name": "...", "kind": "filter" | "catchAll", "rules": [...] }`.
/// `kind` defaults to `filter` and `rules` to empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawPanel", into = "RawPanel")]
pub struct PanelConfig {
    pub name: String,
    pub kind: PanelKind,
}

impl PanelConfig {
    pub fn filter(name: impl Into<String>, rules: Vec<Rule>) -> Self {
        Self {
            name: name.into(),
            kind: PanelKind::Filter { rules },
        }
    }

    pub fn catch_all(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: PanelKind::CatchAll,
        }
    }

    /// The panel's rules; catch-alls have none.
    pub fn rules(&self) -> &[Rule] {
        match &self.kind {
            PanelKind::Filter { rules } => rules,
            PanelKind::CatchAll => &[],
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
enum KindTag {
    #[default]
    Filter,
    CatchAll,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawPanel {
    name: String,
    #[serde(default)]
    kind: KindTag,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    rules: Vec<Rule>,
}

impl TryFrom<RawPanel> for PanelConfig {
    type Error = String;

    fn try_from(raw: RawPanel) -> Result<Self, Self::Error> {
        match raw.kind {
            KindTag::Filter => Ok(Self::filter(raw.name, raw.rules)),
            KindTag::CatchAll if raw.rules.is_empty() => Ok(Self::catch_all(raw.name)),
            KindTag::CatchAll => Err(format!(
                "catch-all panel {:?} must not define rules",
                raw.name
            )),
        }
    }
}

impl From<PanelConfig> for RawPanel {
    fn from(panel: PanelConfig) -> Self {
        match panel.kind {
            PanelKind::Filter { rules } => Self {
                name: panel.name,
                kind: KindTag::Filter,
                rules,
            },
            PanelKind::CatchAll => Self {
                name: panel.name,
                kind: KindTag::CatchAll,
                rules: Vec::new(),
            },
        }
    }
}

/// Thread counts reported for one panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CountResult {
    pub total: u64,
    pub unread: u64,
    pub is_estimate: bool,
}

impl CountResult {
    /// Build a result, clamping `unread` to `total`.
    pub fn new(total: u64, unread: u64, is_estimate: bool) -> Self {
        Self {
            total,
            unread: unread.min(total),
            is_estimate,
        }
    }

    /// Result from the authoritative label statistic.
    pub fn exact(counts: ThreadCounts) -> Self {
        Self::new(counts.total, counts.unread, false)
    }

    /// Result from a search-size estimate.
    pub fn estimate(counts: ThreadCounts) -> Self {
        Self::new(counts.total, counts.unread, true)
    }
}
