//! Mail backend abstraction.
//!
//! The orchestrator needs two lookups from the backend: an authoritative
//! total/unread statistic for the inbox, and batched search-size estimates.

pub mod gmail;

pub use gmail::{GmailBackend, GmailConfig};

use async_trait::async_trait;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::error::BackendError;

/// Raw thread counts as reported by the backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadCounts {
    pub total: u64,
    pub unread: u64,
}

/// A search-capable mail backend.
#[async_trait]
pub trait MailBackend: Send + Sync {
    /// Exact total/unread counts for the default inbox view.
    async fn fetch_exact_folder_counts(
        &self,
        token: &SecretString,
    ) -> Result<ThreadCounts, BackendError>;

    /// Estimated counts for each query, in submission order.
    async fn fetch_estimated_counts(
        &self,
        token: &SecretString,
        queries: &[String],
    ) -> Result<Vec<ThreadCounts>, BackendError>;
}
