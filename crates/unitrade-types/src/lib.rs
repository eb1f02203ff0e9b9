//! Shared domain types for UniTrade: persisted models, HTTP payloads,
//! realtime gateway frames and the pure marketplace rules (search filters,
//! purchase requests, route gating, message grouping, moderation search).

pub mod api;
pub mod conversation;
pub mod events;
pub mod filters;
pub mod gate;
pub mod models;
pub mod moderation;
pub mod purchase;

use std::collections::BTreeMap;

/// Per-field validation messages, keyed by the form field name.
pub type FieldErrors = BTreeMap<String, String>;
