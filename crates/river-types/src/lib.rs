//! # river-types
//!
//! Shared domain types for the CouchDB river.
//!
//! This crate defines the data structures used throughout the connector:
//! - [`Seq`]: the opaque feed position token and its checkpoint string form
//! - [`ParsedEvent`]: the decoded form of one `_changes` line
//! - [`RiverSettings`]: layered configuration for source, sink and river
//!
//! ## Usage
//!
//! ```rust
//! use river_types::{decode_line, FeedLine};
//!
//! let line = r#"{"seq":1,"id":"doc-1","doc":{"_id":"doc-1"}}"#;
//! match decode_line(line).unwrap() {
//!     FeedLine::Change(event) => assert_eq!(event.id, "doc-1"),
//!     FeedLine::Error(_) => unreachable!(),
//! }
//! ```

pub mod config;
pub mod error;
pub mod event;
pub mod seq;

pub use config::{
    CouchdbSettings, IndexSettings, RetrySettings, RiverSection, RiverSettings, MAX_QUEUE_CAPACITY,
};
pub use error::ConfigError;
pub use event::{decode_line, FeedLine, ParsedEvent, DESIGN_DOC_PREFIX};
pub use seq::Seq;
