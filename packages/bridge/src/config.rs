//! Configuration for the clipsrules bridge
//!
//! Centralized values used throughout the bridge for:
//! - Reserved logical names and the router registration
//! - The external address type installed by every session
//! - Resource limits enforced by the reference engine
//!
//! Compile-time constants cover what the native engine fixes; the
//! [`SessionOptions`] builder covers choices a host makes per session.

use crate::watch::Watch;

/// Logical name of standard output.
pub const STDOUT: &str = "stdout";

/// Logical name of standard error.
pub const STDERR: &str = "stderr";

/// Logical name of the warning channel.
pub const STDWRN: &str = "stdwrn";

/// Channels every session router accepts from the start.
pub const RESERVED_CHANNELS: [&str; 3] = [STDOUT, STDERR, STDWRN];

/// Name under which the session router is registered with the engine.
pub const ROUTER_NAME: &str = "clipsrules-router";

/// Router priority.
///
/// Above the engine's own file and terminal routers (which sit at 0..=40)
/// so host output wins over the built-in terminal.
pub const ROUTER_PRIORITY: i32 = 1000;

/// Name of the external address type used for wrapped host objects.
pub const EXTERNAL_TYPE_NAME: &str = "rust";

/// Text of the symbol the engine uses for boolean true.
pub const TRUE_SYMBOL: &str = "TRUE";

/// Text of the symbol the engine uses for boolean false.
pub const FALSE_SYMBOL: &str = "FALSE";

/// Slot name of the single multislot of an ordered (implied) fact.
pub const IMPLIED_SLOT_NAME: &str = "implied";

/// Name of the module every environment starts in.
pub const MAIN_MODULE: &str = "MAIN";

/// Run limit meaning "fire until the agenda is empty".
pub const RUN_UNLIMITED: i64 = -1;

/// Maximum nesting depth for expression evaluation in the reference engine.
///
/// Prevents stack overflow from runaway recursive deffunctions.
pub const MAX_EVAL_DEPTH: usize = 256;

/// Maximum list nesting accepted by the reader.
///
/// Reading, compiling and dropping a form all recurse once per level.
pub const MAX_NESTING_DEPTH: usize = 128;

/// Maximum source size accepted by `load`, `build` and `eval` (4 MB).
pub const MAX_SOURCE_SIZE: usize = 4 * 1024 * 1024;

/// Runtime options for a new [`crate::Session`].
///
/// # Example
///
/// ```
/// use clipsrules::{Session, SessionOptions, Watch};
///
/// let options = SessionOptions::new()
///     .with_channel("trace")
///     .with_watch(Watch::Facts);
/// let session = Session::with_options(options);
/// assert!(session.is_watching(Watch::Facts));
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionOptions {
    /// Custom logical names registered with the router on creation
    pub channels: Vec<String>,
    /// Whether duplicate facts may be asserted
    pub duplicate_facts: bool,
    /// Watch items enabled on creation
    pub watch: Vec<Watch>,
}

impl SessionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an additional logical output channel.
    pub fn with_channel(mut self, name: impl Into<String>) -> Self {
        self.channels.push(name.into());
        self
    }

    /// Allow or forbid duplicate facts.
    pub fn with_duplicate_facts(mut self, allowed: bool) -> Self {
        self.duplicate_facts = allowed;
        self
    }

    /// Enable a watch item.
    pub fn with_watch(mut self, item: Watch) -> Self {
        self.watch.push(item);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constants_are_reasonable() {
        assert!(ROUTER_PRIORITY > 40, "Must outrank the engine's own routers");

        assert!(MAX_EVAL_DEPTH >= 64, "Should allow reasonable recursion");
        assert!(MAX_EVAL_DEPTH <= 10_000, "Should limit runaway recursion");

        assert!(MAX_NESTING_DEPTH >= 32, "Should allow ordinary construct nesting");
        assert!(MAX_NESTING_DEPTH <= MAX_EVAL_DEPTH, "Should stay within evaluation depth");

        assert!(MAX_SOURCE_SIZE >= 100_000, "Should allow at least 100KB");
        assert!(MAX_SOURCE_SIZE <= 64 * 1024 * 1024, "Should not allow 64MB+");
    }

    #[test]
    fn test_reserved_channels() {
        assert_eq!(RESERVED_CHANNELS, ["stdout", "stderr", "stdwrn"]);
    }

    #[test]
    fn test_options_builder() {
        let options = SessionOptions::new()
            .with_channel("zebra")
            .with_duplicate_facts(true)
            .with_watch(Watch::Rules);

        assert_eq!(options.channels, vec!["zebra".to_string()]);
        assert!(options.duplicate_facts);
        assert_eq!(options.watch, vec![Watch::Rules]);
    }
}
