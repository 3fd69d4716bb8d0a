//! Core data models for the object storage service.
//!
//! These entities describe groups, objects, their metadata and access log.
//! They map to database tables via `sqlx::FromRow` and serialize as JSON via
//! `serde`.

pub mod group;
pub mod metadata;
pub mod object;
