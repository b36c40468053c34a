//! Background removal of expired documents from per-tenant change collections.
//!
//! Every tenant with change streams enabled owns a change collection whose
//! documents carry the wall-clock time they were captured. The
//! [`retention::ExpiredChangeRemover`] periodically deletes the documents
//! older than the retention window configured in the `changeStreams` cluster
//! parameter, one tenant at a time and in bounded batches.

pub mod config;
pub mod db;
pub mod models;
pub mod observability;
pub mod retention;

#[cfg(test)]
mod tests;
