//! Panels: named rule lists over the inbox, and their thread counts.
//!
//! A request flows through:
//! 1. `categorize()`: which panels have rules, which are catch-alls
//! 2. `compile()`: rules → Gmail search query
//! 3. `CountPlan::new()`: validation and slot assignment, no I/O
//! 4. `CountPlan::fetch()`: at most two backend calls for all panels

pub mod categorize;
pub mod compiler;
pub mod counts;
pub mod model;
pub mod routes;

pub use categorize::{PanelCategory, categorize, has_rules};
pub use compiler::{compile, compile_panels, negate_all};
pub use counts::{CountPlan, effective_queries, estimate_counts};
pub use model::{CountResult, PanelConfig, PanelKind, Rule, RuleAction, RuleField};
pub use routes::{PanelRouteState, panel_routes};
