//! Byte-level building blocks: the bounded pushback source and the spillover sink.

pub mod pushback;
pub mod spool;
