//! Inbox Panels: per-panel thread counts over a search-capable mail backend.

pub mod auth;
pub mod backend;
pub mod config;
pub mod error;
pub mod panels;
