//! Tester services: admission policy, GitHub integration, builds, setup and badges.

pub mod admission;
pub mod badge_service;
pub mod github_service;
pub mod installation_service;
pub mod ledger;
pub mod runner;
pub mod setup_service;
pub mod tag_event;
pub mod version_resolver;
