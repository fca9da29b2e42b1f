//! Panel categorizer.

use crate::panels::model::{PanelConfig, PanelKind};

/// How the orchestrator treats a panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PanelCategory {
    /// Filter panel with at least one rule.
    Filtered,
    /// Filter panel with no rules: the shared inbox (or search) view.
    Unfiltered,
    /// Everything not claimed by the filtered panels.
    CatchAll,
}

impl PanelCategory {
    pub fn has_rules(self) -> bool {
        self == Self::Filtered
    }
}

/// Classify each panel. Output order matches input order.
pub fn categorize(panels: &[PanelConfig]) -> Vec<PanelCategory> {
    panels
        .iter()
        .map(|panel| match &panel.kind {
            PanelKind::Filter { rules } if rules.is_empty() => PanelCategory::Unfiltered,
            PanelKind::Filter { .. } => PanelCategory::Filtered,
            PanelKind::CatchAll => PanelCategory::CatchAll,
        })
        .collect()
}

/// Per-panel "has rules" flags.
pub fn has_rules(panels: &[PanelConfig]) -> Vec<bool> {
    categorize(panels)
        .into_iter()
        .map(PanelCategory::has_rules)
        .collect()
}
