//! HTTP handlers for the admin gate.

pub mod admin;
pub mod challenge;
pub mod metrics;
pub mod view;

pub use admin::*;
pub use challenge::*;
