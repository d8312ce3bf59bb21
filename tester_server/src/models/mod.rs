//! Tester data models.

pub mod release_tag;
pub mod repository;
pub mod semester;
pub mod test_result;
pub mod user;
pub mod version;
