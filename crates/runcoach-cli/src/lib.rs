//! Command line tools for the exposure optimizer server.

pub mod auth;
pub mod client;

pub use auth::issue_token;
pub use client::{parse_waypoints, RunCoachClient};
