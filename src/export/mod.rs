//! Output side: the multipart encoder and saving decoded parts to files.

pub mod files;
pub mod multipart;
