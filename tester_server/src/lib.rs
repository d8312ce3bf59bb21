//! Compiler Tester: GitHub App backed compilation-test badge service.
//!
//! Receives tag webhooks, decides whether each tag is a new release of a
//! configured grading version, runs the language runner container for
//! admitted releases and serves per-version status badges.

pub mod config;
pub mod metrics;
pub mod migration;
pub mod models;
pub mod routes;
pub mod schema;
pub mod services;
pub mod store;
