//! Shared database repository test infrastructure
//!
//! The same test logic runs against every `ChangeCollectionRepo`
//! implementation. Each repository has a test module containing:
//!
//! - Shared test functions that take `&dyn XxxRepo`
//! - In-memory backend setup
//! - SQLite-specific setup using in-memory databases with real migrations
