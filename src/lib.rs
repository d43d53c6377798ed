//! Feed-polling relay engine: watches issue-tracker syndication feeds and
//! hands new, label-matched entries to subscribed destinations exactly once,
//! with durable seen-tracking across restarts.

pub mod api;
pub mod config;
pub mod engine;
pub mod error;
pub mod feed;
pub mod sink;
pub mod store;
