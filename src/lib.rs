//! `mimespool` — streaming `multipart/related` decoding and encoding.
//!
//! The decoder splits one byte stream into a root part and a lazily produced
//! sequence of attachments while holding only a small lookahead buffer.
//! Bodies of parts the caller moves past are drained into spill buffers that
//! switch from memory to temp files above a size threshold.
//!
//! ```no_run
//! use std::io::Read;
//!
//! let file = std::fs::File::open("message.bin")?;
//! let config = mimespool::config::Config::default();
//! let mut message = mimespool::decode(file, "multipart/related; boundary=b1", &config)?;
//!
//! let mut root = String::new();
//! message.root.body().read_to_string(&mut root)?;
//! for part in message.attachments.iter() {
//!     let part = part?;
//!     println!("{} {}", part.id(), part.content_type());
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod config;
pub mod error;
pub mod export;
pub mod model;
pub mod parser;
pub mod stream;

pub use error::{MimeError, Result};
pub use export::multipart::{MultipartWriter, OutgoingPart};
pub use model::headers::HeaderMap;
pub use model::part::{Part, PartBody};
pub use parser::deserializer::PartReader;
pub use parser::lazy::LazyParts;
pub use parser::{decode, Message};
pub use stream::spool::{SpoolHold, SpoolInput, SpoolSink};
