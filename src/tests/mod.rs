//! Consolidated test modules.
//!
//! This module contains end-to-end tests that drive the remover loop against
//! each storage backend.
