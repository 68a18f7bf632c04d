//! Core data model types: header maps and decoded parts.

pub mod headers;
pub mod part;
