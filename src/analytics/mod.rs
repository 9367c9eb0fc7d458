//! Daily per-video analytics dump.
//! Discovers the account's videos, fetches one report per video on a pool of
//! workers and stores the results in SQLite.

pub(crate) mod api;
pub(crate) mod backoff;
pub(crate) mod discovery;
pub(crate) mod io;
pub(crate) mod models;
pub(crate) mod queue;
pub(crate) mod sender;
pub(crate) mod store;
pub(crate) mod worker;
