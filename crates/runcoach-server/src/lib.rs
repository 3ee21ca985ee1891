//! Shared library surface for the exposure optimizer server and its tests.

pub mod api;
pub mod backoff;
pub mod budget;
pub mod cache;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod optimizer;
pub mod persistence;
pub mod providers;
pub mod scoring;
pub mod state;
pub mod windows;
