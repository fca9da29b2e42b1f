//! Count estimation orchestrator.
//!
//! Every request costs at most two backend calls, however many panels are
//! configured:
//!
//! 1. one **shared** lookup for all panels without rules: an exact label
//!    statistic, or a search-only estimate when a search is active;
//! 2. one **batched** estimate lookup for all rule panels and catch-alls.
//!
//! Both are issued concurrently. Results are reassembled in input order.

use secrecy::SecretString;
use tracing::debug;

use crate::backend::MailBackend;
use crate::error::{BackendError, Error};
use crate::panels::categorize::{PanelCategory, categorize};
use crate::panels::compiler::{compile_panels, conjoin_search};
use crate::panels::model::{CountResult, PanelConfig};

/// Where a panel's result comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Shared,
    Batch(usize),
}

/// A trimmed, non-empty search query, if any.
pub fn active_search(search_query: Option<&str>) -> Option<&str> {
    search_query.map(str::trim).filter(|s| !s.is_empty())
}

/// The query each panel is counted against, search included.
///
/// Panels served by the shared lookup get the search alone (or `""`).
pub fn effective_queries(
    panels: &[PanelConfig],
    search_query: Option<&str>,
) -> Result<Vec<String>, Error> {
    let search = active_search(search_query);
    Ok(compile_panels(panels)?
        .iter()
        .map(|query| conjoin_search(query, search))
        .collect())
}

/// Validated, compiled lookups for one count request.
///
/// Built without touching the backend, so bad input is rejected before a
/// token is minted or a request is sent.
#[derive(Debug, Clone)]
pub struct CountPlan {
    slots: Vec<Slot>,
    batch: Vec<String>,
    search: Option<String>,
}

impl CountPlan {
    /// Validate and compile `panels`, assigning each to the shared lookup or
    /// a batch position.
    pub fn new(panels: &[PanelConfig], search_query: Option<&str>) -> Result<Self, Error> {
        if panels.is_empty() {
            return Err(Error::validation("panels must be a non-empty array"));
        }

        let search = active_search(search_query);
        let categories = categorize(panels);
        let compiled = compile_panels(panels)?;

        let mut slots = Vec::with_capacity(panels.len());
        let mut batch = Vec::new();
        for (category, query) in categories.iter().zip(&compiled) {
            let shared = match category {
                PanelCategory::Unfiltered => true,
                PanelCategory::CatchAll => query.is_empty(),
                PanelCategory::Filtered => false,
            };
            if shared {
                slots.push(Slot::Shared);
            } else {
                slots.push(Slot::Batch(batch.len()));
                batch.push(conjoin_search(query, search));
            }
        }

        Ok(Self {
            slots,
            batch,
            search: search.map(str::to_string),
        })
    }

    /// Queries sent in the single batched lookup, in batch order.
    pub fn batch(&self) -> &[String] {
        &self.batch
    }

    fn needs_shared(&self) -> bool {
        self.slots.contains(&Slot::Shared)
    }

    /// Run the shared and batched lookups concurrently and reassemble the
    /// results in panel order. Any backend failure fails the whole call.
    pub async fn fetch(
        &self,
        backend: &dyn MailBackend,
        token: &SecretString,
    ) -> Result<Vec<CountResult>, Error> {
        let needs_shared = self.needs_shared();
        let batch = &self.batch;

        debug!(
            panels = self.slots.len(),
            batched = batch.len(),
            shared = needs_shared,
            search = self.search.is_some(),
            "Estimating panel counts"
        );

        let shared_lookup = async {
            let result = match (needs_shared, &self.search) {
                (false, _) => None,
                (true, Some(search)) => {
                    let counts = backend
                        .fetch_estimated_counts(token, std::slice::from_ref(search))
                        .await?;
                    let first = counts.first().copied().ok_or_else(|| {
                        BackendError::InvalidResponse {
                            reason: "no estimate returned for search".into(),
                        }
                    })?;
                    Some(CountResult::estimate(first))
                }
                (true, None) => {
                    let counts = backend.fetch_exact_folder_counts(token).await?;
                    Some(CountResult::exact(counts))
                }
            };
            Ok::<_, BackendError>(result)
        };

        let batch_lookup = async {
            let counts = if batch.is_empty() {
                Vec::new()
            } else {
                backend.fetch_estimated_counts(token, batch).await?
            };
            if counts.len() != batch.len() {
                return Err(BackendError::InvalidResponse {
                    reason: format!(
                        "expected {} estimates, backend returned {}",
                        batch.len(),
                        counts.len()
                    ),
                });
            }
            Ok::<_, BackendError>(
                counts
                    .into_iter()
                    .map(CountResult::estimate)
                    .collect::<Vec<_>>(),
            )
        };

        let (shared, batched) = tokio::try_join!(shared_lookup, batch_lookup)?;

        self.slots
            .iter()
            .map(|slot| match *slot {
                Slot::Shared => shared.ok_or_else(|| {
                    Error::from(BackendError::InvalidResponse {
                        reason: "shared lookup was skipped".into(),
                    })
                }),
                Slot::Batch(i) => Ok(batched[i]),
            })
            .collect()
    }
}

/// Count threads per panel.
///
/// Fails before any backend call when `panels` is empty or a panel does not
/// compile. Any backend failure fails the whole call.
pub async fn estimate_counts(
    backend: &dyn MailBackend,
    token: &SecretString,
    panels: &[PanelConfig],
    search_query: Option<&str>,
) -> Result<Vec<CountResult>, Error> {
    CountPlan::new(panels, search_query)?
        .fetch(backend, token)
        .await
}
