//! Bridge daemon between a telephony switch and per-tenant agency backends.
//!
//! Drains buffered call-detail records and recording jobs to the tenant
//! APIs, classifies raw channel legs into call directions, keeps every
//! tenant's inner-number set fresh, and reconciles queue availability
//! against the switch.

pub mod alert;
pub mod classify;
pub mod config;
pub mod daemon;
pub mod media;
pub mod pipeline;
pub mod reconcile;
pub mod registry;
pub mod retry;
pub mod store;
pub mod switch;
pub mod transport;

pub use daemon::{Collaborators, Daemon};
