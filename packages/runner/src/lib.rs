//! clipsrules runner - Command-line front end for the clipsrules bridge.
//!
//! Loads construct documents into a session, resets and runs it, and prints
//! the routed engine output to the terminal.
//!
//! # Example
//!
//! ```
//! use clipsrules::Session;
//! use clipsrules_runner::document::RunnerDocument;
//!
//! let doc: RunnerDocument =
//!     serde_json::from_str(r#"{"comment": "", "body": "(deffacts start (ready))"}"#).unwrap();
//! let mut session = Session::new();
//! doc.load_into(&mut session).unwrap();
//! session.reset();
//! assert_eq!(session.facts().count(), 1);
//! ```
//!
//! # Architecture
//!
//! - [`cli`]: Command-line interface
//! - [`document`]: Runner document reading
//! - [`output`]: Terminal output handler
//! - [`error`]: Error types and Result alias

pub mod cli;
pub mod document;
pub mod error;
pub mod output;

pub use error::{Result, RunnerError};
