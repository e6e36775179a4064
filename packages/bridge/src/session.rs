//! Engine session handle
//!
//! A [`Session`] owns one native engine together with the router and the
//! external object registry registered with it. There is no process-wide
//! default engine: every operation goes through an explicit session.
//!
//! Collection checkpoints happen at the start of `eval`, `call`, `run`,
//! `build` and `load`, and on [`Session::gc`]. Values returned by a call
//! stay valid until the next checkpoint. Dropping a session forces a final
//! collection.
//!
//! # Example
//!
//! ```
//! use clipsrules::{Session, Value};
//!
//! let mut session = Session::new();
//! let value = session.eval("(+ 1 2)").unwrap();
//! assert_eq!(value, Value::Integer(3));
//! ```

use crate::config::{SessionOptions, MAX_SOURCE_SIZE, ROUTER_NAME, ROUTER_PRIORITY, RUN_UNLIMITED};
use crate::error::{BuildError, EvalError, LoadError, Result, RouterError};
use crate::external::ExternalBridge;
use crate::marshal::{from_foreign, to_foreign};
use crate::memory::MemoryEngine;
use crate::native::{ForeignValue, NativeEngine};
use crate::router::{OutputHandler, Router, TracingOutputHandler};
use crate::value::{ExternalAddress, Value};
use crate::watch::Watch;
use std::any::Any;
use std::path::Path;
use std::rc::Rc;

/// An engine environment and the bridge state attached to it
pub struct Session {
    native: Box<dyn NativeEngine>,
    router: Rc<Router>,
    externals: ExternalBridge,
}

impl Session {
    /// Create a session on the in-process engine, logging output via `tracing`.
    pub fn new() -> Self {
        Self::with_options(SessionOptions::default())
    }

    /// Create a session that delivers output lines to `handler`.
    pub fn with_handler(handler: impl OutputHandler + 'static) -> Self {
        Self::with_engine(
            Box::new(MemoryEngine::new()),
            Box::new(handler),
            SessionOptions::default(),
        )
    }

    /// Create a session with runtime options.
    pub fn with_options(options: SessionOptions) -> Self {
        Self::with_engine(
            Box::new(MemoryEngine::new()),
            Box::new(TracingOutputHandler),
            options,
        )
    }

    /// Create a session on any engine implementation.
    ///
    /// Registers the router, installs the external address type and applies
    /// the options.
    pub fn with_engine(
        mut native: Box<dyn NativeEngine>,
        handler: Box<dyn OutputHandler>,
        options: SessionOptions,
    ) -> Self {
        let router = Rc::new(Router::new(handler));
        for channel in &options.channels {
            router.add_channel(channel);
        }
        if !native.add_router(ROUTER_NAME, ROUTER_PRIORITY, router.clone()) {
            tracing::warn!(router = ROUTER_NAME, "Engine refused router registration");
        }

        let externals = ExternalBridge::install(native.as_mut());

        native.set_fact_duplication(options.duplicate_facts);
        for item in &options.watch {
            native.set_watch_state(*item, true);
        }

        tracing::debug!(
            channels = options.channels.len(),
            watch = options.watch.len(),
            "Session created"
        );

        Self {
            native,
            router,
            externals,
        }
    }

    pub(crate) fn native(&self) -> &dyn NativeEngine {
        self.native.as_ref()
    }

    pub(crate) fn native_mut(&mut self) -> &mut dyn NativeEngine {
        self.native.as_mut()
    }

    pub(crate) fn externals(&self) -> &ExternalBridge {
        &self.externals
    }

    /// Marshal a host value into the engine.
    pub(crate) fn to_foreign(&mut self, value: &Value) -> Result<ForeignValue> {
        to_foreign(self.native.as_mut(), value)
    }

    /// Marshal an engine value back to the host.
    pub(crate) fn from_foreign(&self, foreign: &ForeignValue) -> Value {
        from_foreign(self.native.as_ref(), foreign)
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Reset the environment: remove facts and instances, assert deffacts and
    /// create definstances.
    pub fn reset(&mut self) {
        tracing::debug!("Reset");
        self.native.reset();
    }

    /// Remove every construct and all working memory.
    pub fn clear(&mut self) -> bool {
        tracing::debug!("Clear");
        self.native.clear()
    }

    /// Force a collection checkpoint.
    pub fn gc(&mut self) {
        self.native.collect_garbage();
    }

    /// Print the engine banner to `stdout`.
    pub fn print_banner(&mut self) {
        self.native.print_banner();
    }

    // ========================================================================
    // Loading
    // ========================================================================

    /// Load constructs from a file.
    pub fn load(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        tracing::debug!(path = %path.display(), "Loading constructs");
        self.native.load(path).map_err(LoadError::from_code)?;
        Ok(())
    }

    /// Load constructs from source text.
    pub fn load_from_str(&mut self, source: &str) -> Result<()> {
        if source.len() > MAX_SOURCE_SIZE {
            return Err(LoadError::Parsing.into());
        }
        self.native
            .load_from_string(source)
            .map_err(LoadError::from_code)?;
        Ok(())
    }

    /// Load a binary image saved with [`Session::save_binary`].
    pub fn load_binary(&mut self, path: impl AsRef<Path>) -> Result<()> {
        self.native
            .bload(path.as_ref())
            .map_err(LoadError::from_code)?;
        Ok(())
    }

    /// Save the current constructs as a binary image.
    pub fn save_binary(&mut self, path: impl AsRef<Path>) -> Result<()> {
        self.native
            .bsave(path.as_ref())
            .map_err(LoadError::from_code)?;
        Ok(())
    }

    /// Execute a command file.
    pub fn load_batch(&mut self, path: impl AsRef<Path>) -> Result<()> {
        self.native
            .batch_star(path.as_ref())
            .map_err(LoadError::from_code)?;
        Ok(())
    }

    // ========================================================================
    // Evaluation
    // ========================================================================

    /// Evaluate an expression and return its value.
    ///
    /// # Errors
    ///
    /// [`EvalError::Parsing`] for malformed text or unknown functions,
    /// [`EvalError::Processing`] for failures while evaluating.
    pub fn eval(&mut self, expression: &str) -> Result<Value> {
        if expression.len() > MAX_SOURCE_SIZE {
            return Err(EvalError::Parsing.into());
        }
        let foreign = self
            .native
            .eval(expression)
            .map_err(EvalError::from_code)?;
        Ok(self.from_foreign(&foreign))
    }

    /// Build a single construct.
    pub fn build(&mut self, construct: &str) -> Result<()> {
        if construct.len() > MAX_SOURCE_SIZE {
            return Err(BuildError::Parsing.into());
        }
        self.native.build(construct).map_err(BuildError::from_code)?;
        Ok(())
    }

    /// Fire rules. `None` runs until the agenda is empty.
    ///
    /// # Returns
    ///
    /// The number of rules fired.
    pub fn run(&mut self, limit: Option<i64>) -> i64 {
        let fired = self.native.run(limit.unwrap_or(RUN_UNLIMITED));
        tracing::debug!(fired, "Run finished");
        fired
    }

    // ========================================================================
    // Output
    // ========================================================================

    /// Accept output on an additional logical name.
    pub fn add_channel(&mut self, name: &str) {
        self.router.add_channel(name);
    }

    /// Whether the router accepts a logical name
    pub fn has_channel(&self, name: &str) -> bool {
        self.router.query(name)
    }

    /// Write text to a logical name through the engine's router chain.
    pub fn write(&mut self, channel: &str, text: &str) -> Result<()> {
        if !self.router.query(channel) {
            return Err(RouterError::UnknownChannel(channel.to_string()).into());
        }
        self.native.write_string(channel, text);
        Ok(())
    }

    /// Text written to a channel since its last newline
    pub fn pending_output(&self, channel: &str) -> Option<String> {
        self.router.pending(channel)
    }

    /// Deliver every pending partial line.
    pub fn flush_output(&self) {
        self.router.flush();
    }

    // ========================================================================
    // Watch
    // ========================================================================

    pub fn watch(&mut self, item: Watch, on: bool) {
        self.native.set_watch_state(item, on);
    }

    pub fn is_watching(&self, item: Watch) -> bool {
        self.native.watch_state(item)
    }

    /// Turn every watch item on or off.
    pub fn watch_all(&mut self, on: bool) {
        for item in Watch::ALL {
            self.native.set_watch_state(item, on);
        }
    }

    // ========================================================================
    // External objects
    // ========================================================================

    /// Wrap a host object so the engine can hold it.
    ///
    /// The address is collected at the next checkpoint unless it is stored
    /// in working memory or retained.
    pub fn create_external_address<T: Any>(&mut self, object: Rc<T>) -> ExternalAddress {
        self.externals.wrap(self.native.as_mut(), object)
    }

    /// The host object behind an address, if it has type `T`.
    pub fn external_object<T: Any>(&self, addr: &ExternalAddress) -> Option<Rc<T>> {
        self.externals.object(self.native.as_ref(), addr)
    }

    pub fn retain_external(&mut self, addr: &ExternalAddress) {
        self.externals.retain(self.native.as_mut(), addr);
    }

    /// Undo one [`Session::retain_external`]. Releasing without a matching
    /// retain is a caller error.
    pub fn release_external(&mut self, addr: &ExternalAddress) {
        self.externals.release(self.native.as_mut(), addr);
    }

    /// Number of host objects still claimed by the registry
    pub fn live_external_objects(&self) -> usize {
        self.externals.live()
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("router", &self.router)
            .field("externals", &self.externals)
            .finish_non_exhaustive()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.native.collect_garbage();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BridgeError;
    use crate::router::OutputLine;
    use pretty_assertions::assert_eq;
    use std::cell::RefCell;

    fn capturing_session() -> (Session, Rc<RefCell<Vec<OutputLine>>>) {
        let lines = Rc::new(RefCell::new(Vec::new()));
        let sink = lines.clone();
        let session = Session::with_handler(move |line: OutputLine| sink.borrow_mut().push(line));
        (session, lines)
    }

    mod evaluation {
        use super::*;
        use pretty_assertions::assert_eq;

        #[test]
        fn test_eval_arithmetic() {
            let mut session = Session::new();
            assert_eq!(session.eval("(+ 1 2)").unwrap(), Value::Integer(3));
            assert_eq!(session.eval("(* 2 1.5)").unwrap(), Value::Float(3.0));
        }

        #[test]
        fn test_eval_multifield() {
            let mut session = Session::new();
            let value = session.eval("(create$ 1 FALSE foo \"hello\" 9.1)").unwrap();
            assert_eq!(
                value,
                Value::Multifield(vec![
                    Value::Integer(1),
                    Value::Boolean(false),
                    Value::symbol("foo"),
                    Value::string("hello"),
                    Value::Float(9.1),
                ])
            );
        }

        #[test]
        fn test_eval_parse_error() {
            let mut session = Session::new();
            let err = session.eval("(+ 1").unwrap_err();
            assert!(matches!(err, BridgeError::Eval(EvalError::Parsing)));
        }

        #[test]
        fn test_build_parse_error() {
            let mut session = Session::new();
            let err = session.build("(deftemplate").unwrap_err();
            assert!(matches!(err, BridgeError::Build(_)));
        }

        #[test]
        fn test_deeply_nested_text_is_a_parse_error() {
            let mut session = Session::new();
            let nested = format!("{}{}", "(".repeat(5000), ")".repeat(5000));

            let err = session.eval(&nested).unwrap_err();
            assert!(matches!(err, BridgeError::Eval(EvalError::Parsing)));
            assert!(matches!(session.build(&nested), Err(BridgeError::Build(_))));
            assert!(matches!(session.load_from_str(&nested), Err(BridgeError::Load(_))));
            assert_eq!(session.eval("(+ 1 2)").unwrap(), Value::Integer(3));
        }

        #[test]
        fn test_run_fires_nothing_without_rules() {
            let mut session = Session::new();
            assert_eq!(session.run(None), 0);
            assert_eq!(session.run(Some(10)), 0);
        }
    }

    mod output {
        use super::*;
        use pretty_assertions::assert_eq;

        #[test]
        fn test_printout_reaches_handler() {
            let (mut session, lines) = capturing_session();
            session.eval("(printout t \"hello\" crlf)").unwrap();
            assert_eq!(*lines.borrow(), vec![OutputLine::Stdout("hello".into())]);
        }

        #[test]
        fn test_write_to_unregistered_channel_fails() {
            let (mut session, _) = capturing_session();
            let err = session.write("trace", "x\n").unwrap_err();
            assert!(matches!(err, BridgeError::Router(_)));
        }

        #[test]
        fn test_custom_channel() {
            let (mut session, lines) = capturing_session();
            session.add_channel("trace");
            session.write("trace", "a").unwrap();
            assert_eq!(session.pending_output("trace"), Some("a".to_string()));
            session.write("trace", "b\n").unwrap();
            assert_eq!(
                *lines.borrow(),
                vec![OutputLine::Named {
                    name: "trace".into(),
                    line: "ab".into()
                }]
            );
        }
    }

    mod options {
        use super::*;

        #[test]
        fn test_options_applied() {
            let session = Session::with_options(
                SessionOptions::new()
                    .with_channel("audit")
                    .with_duplicate_facts(true)
                    .with_watch(Watch::Facts),
            );
            assert!(session.has_channel("audit"));
            assert!(session.duplicate_facts_allowed());
            assert!(session.is_watching(Watch::Facts));
            assert!(!session.is_watching(Watch::Rules));
        }

        #[test]
        fn test_watch_all() {
            let mut session = Session::new();
            session.watch_all(true);
            assert!(Watch::ALL.iter().all(|w| session.is_watching(*w)));
            session.watch_all(false);
            assert!(Watch::ALL.iter().all(|w| !session.is_watching(*w)));
        }
    }
}
