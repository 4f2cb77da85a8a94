//! Document core of a Blood on the Clocktower script editor.
//!
//! [`document::ScriptDocument`] is the entry point: it owns the observable
//! [`model`] records, reads and writes the zip [`archive`] and resolves token
//! art through [`images`]. Application-wide services live in
//! [`context::AppContext`].

pub mod archive;
pub mod config;
pub mod context;
pub mod document;
pub mod error;
pub mod images;
pub mod logging;
pub mod model;
pub mod repository;
pub mod snapshot;
pub mod util;

pub use context::AppContext;
pub use document::{DocumentState, LoadOutcome, ScriptDocument};
pub use error::{Result, ScriptError};
pub use snapshot::{ScriptSnapshot, ValidationIssue};
