//! Shared helpers for the Lynx trust-layer integration tests.

pub mod helpers;
