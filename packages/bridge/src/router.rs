//! Output routing
//!
//! The engine writes text in arbitrary chunks to logical names. The
//! [`Router`] buffers each channel until a newline arrives and hands complete
//! lines, without their terminator, to an [`OutputHandler`].
//!
//! `stdout`, `stderr` and `stdwrn` are accepted from the start. Any other
//! logical name must be registered with [`Router::add_channel`] first.
//! Reading is not supported on any channel.

use crate::config::{RESERVED_CHANNELS, STDERR, STDOUT, STDWRN};
use crate::error::{Result, RouterError};
use crate::native::{codes, NativeRouter};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};

/// A complete line of engine output
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputLine {
    Stdout(String),
    Error(String),
    Warning(String),
    /// Output on a host-registered channel
    Named { name: String, line: String },
}

impl OutputLine {
    fn new(channel: &str, line: String) -> Self {
        match channel {
            STDOUT => OutputLine::Stdout(line),
            STDERR => OutputLine::Error(line),
            STDWRN => OutputLine::Warning(line),
            name => OutputLine::Named {
                name: name.to_string(),
                line,
            },
        }
    }

    /// Logical name the line was written to
    pub fn channel(&self) -> &str {
        match self {
            OutputLine::Stdout(_) => STDOUT,
            OutputLine::Error(_) => STDERR,
            OutputLine::Warning(_) => STDWRN,
            OutputLine::Named { name, .. } => name,
        }
    }

    /// Line text without terminator
    pub fn text(&self) -> &str {
        match self {
            OutputLine::Stdout(line)
            | OutputLine::Error(line)
            | OutputLine::Warning(line)
            | OutputLine::Named { line, .. } => line,
        }
    }
}

/// Receives complete output lines
pub trait OutputHandler {
    fn handle(&self, line: OutputLine);
}

impl<F: Fn(OutputLine)> OutputHandler for F {
    fn handle(&self, line: OutputLine) {
        self(line)
    }
}

/// Default handler: forwards lines to `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingOutputHandler;

impl OutputHandler for TracingOutputHandler {
    fn handle(&self, line: OutputLine) {
        match &line {
            OutputLine::Stdout(text) => tracing::info!(channel = STDOUT, "{text}"),
            OutputLine::Error(text) => tracing::error!(channel = STDERR, "{text}"),
            OutputLine::Warning(text) => tracing::warn!(channel = STDWRN, "{text}"),
            OutputLine::Named { name, line } => tracing::info!(channel = %name, "{line}"),
        }
    }
}

/// Per-session line router
pub struct Router {
    names: RefCell<HashSet<String>>,
    buffers: RefCell<HashMap<String, String>>,
    handler: Box<dyn OutputHandler>,
}

impl Router {
    pub fn new(handler: Box<dyn OutputHandler>) -> Self {
        let names = RESERVED_CHANNELS.iter().map(|s| s.to_string()).collect();
        Self {
            names: RefCell::new(names),
            buffers: RefCell::new(HashMap::new()),
            handler,
        }
    }

    /// Accept output on an additional logical name.
    pub fn add_channel(&self, name: &str) {
        if self.names.borrow_mut().insert(name.to_string()) {
            tracing::debug!(channel = %name, "Registered output channel");
        }
    }

    /// Whether output to the logical name is accepted
    pub fn query(&self, name: &str) -> bool {
        self.names.borrow().contains(name)
    }

    /// Append a chunk to a channel and deliver every line it completes.
    ///
    /// # Errors
    ///
    /// [`RouterError::UnknownChannel`] if the name was never registered; the
    /// chunk is dropped.
    pub fn write(&self, name: &str, chunk: &str) -> Result<()> {
        if !self.query(name) {
            return Err(RouterError::UnknownChannel(name.to_string()).into());
        }

        let complete = {
            let mut buffers = self.buffers.borrow_mut();
            let buffer = buffers.entry(name.to_string()).or_default();
            buffer.push_str(chunk);

            let mut parts: Vec<String> = buffer.split('\n').map(str::to_string).collect();
            // split always yields at least one element: the unterminated tail
            let tail = parts.pop().unwrap_or_default();
            *buffer = tail;
            parts
        };

        // Deliver outside the borrow so handlers may write again
        for line in complete {
            self.handler.handle(OutputLine::new(name, line));
        }
        Ok(())
    }

    /// Reading is never supported.
    pub fn read(&self, name: &str) -> Result<char> {
        Err(RouterError::ReadUnsupported(name.to_string()).into())
    }

    /// Text written to a channel since its last newline
    pub fn pending(&self, name: &str) -> Option<String> {
        self.buffers
            .borrow()
            .get(name)
            .filter(|b| !b.is_empty())
            .cloned()
    }

    /// Deliver every pending partial line as if it had been terminated.
    pub fn flush(&self) {
        let pending: Vec<(String, String)> = self
            .buffers
            .borrow_mut()
            .iter_mut()
            .filter(|(_, b)| !b.is_empty())
            .map(|(name, b)| (name.clone(), std::mem::take(b)))
            .collect();
        for (name, line) in pending {
            self.handler.handle(OutputLine::new(&name, line));
        }
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("names", &self.names.borrow())
            .field("buffers", &self.buffers.borrow())
            .finish_non_exhaustive()
    }
}

impl NativeRouter for Router {
    fn query(&self, logical_name: &str) -> bool {
        Router::query(self, logical_name)
    }

    fn write(&self, logical_name: &str, chunk: &str) {
        if let Err(e) = Router::write(self, logical_name, chunk) {
            tracing::warn!(channel = %logical_name, error = %e, "Dropped router output");
        }
    }

    fn read(&self, logical_name: &str) -> i32 {
        if let Err(e) = Router::read(self, logical_name) {
            tracing::warn!(channel = %logical_name, error = %e, "Router read requested");
        }
        codes::EOF
    }

    fn unread(&self, logical_name: &str, _ch: i32) -> i32 {
        tracing::warn!(channel = %logical_name, "Router unread requested");
        codes::EOF
    }

    fn exit(&self, code: i32) {
        tracing::info!(code, "Engine exit requested");
        self.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::rc::Rc;

    fn collecting_router() -> (Router, Rc<RefCell<Vec<OutputLine>>>) {
        let lines = Rc::new(RefCell::new(Vec::new()));
        let sink = lines.clone();
        let router = Router::new(Box::new(move |line: OutputLine| sink.borrow_mut().push(line)));
        (router, lines)
    }

    mod buffering {
        use super::*;
        use pretty_assertions::assert_eq;

        #[test]
        fn test_partial_lines_are_buffered() {
            let (router, lines) = collecting_router();
            router.write(STDOUT, "ab").unwrap();
            router.write(STDOUT, "c\nd").unwrap();

            assert_eq!(*lines.borrow(), vec![OutputLine::Stdout("abc".into())]);
            assert_eq!(router.pending(STDOUT), Some("d".to_string()));
        }

        #[test]
        fn test_multiple_lines_in_one_chunk() {
            let (router, lines) = collecting_router();
            router.write(STDERR, "one\ntwo\n\nthree\n").unwrap();

            assert_eq!(
                *lines.borrow(),
                vec![
                    OutputLine::Error("one".into()),
                    OutputLine::Error("two".into()),
                    OutputLine::Error("".into()),
                    OutputLine::Error("three".into()),
                ]
            );
            assert_eq!(router.pending(STDERR), None);
        }

        #[test]
        fn test_channels_buffer_independently() {
            let (router, lines) = collecting_router();
            router.write(STDOUT, "out").unwrap();
            router.write(STDWRN, "warn\n").unwrap();
            router.write(STDOUT, "put\n").unwrap();

            assert_eq!(
                *lines.borrow(),
                vec![
                    OutputLine::Warning("warn".into()),
                    OutputLine::Stdout("output".into()),
                ]
            );
        }

        #[test]
        fn test_flush_delivers_tail() {
            let (router, lines) = collecting_router();
            router.write(STDOUT, "no newline").unwrap();
            router.flush();
            assert_eq!(*lines.borrow(), vec![OutputLine::Stdout("no newline".into())]);
            assert_eq!(router.pending(STDOUT), None);
        }
    }

    mod channels {
        use super::*;
        use pretty_assertions::assert_eq;

        #[test]
        fn test_reserved_channels_accepted() {
            let (router, _) = collecting_router();
            for name in RESERVED_CHANNELS {
                assert!(router.query(name));
            }
        }

        #[test]
        fn test_unknown_channel_rejected() {
            let (router, lines) = collecting_router();
            let err = router.write("trace", "x\n").unwrap_err();
            assert_eq!(err.to_string(), "Router error: Unknown output channel: trace");
            assert!(lines.borrow().is_empty());
        }

        #[test]
        fn test_registered_channel_delivers_named_lines() {
            let (router, lines) = collecting_router();
            router.add_channel("trace");
            router.write("trace", "hello\n").unwrap();
            assert_eq!(
                *lines.borrow(),
                vec![OutputLine::Named {
                    name: "trace".into(),
                    line: "hello".into()
                }]
            );
            assert_eq!(lines.borrow()[0].channel(), "trace");
            assert_eq!(lines.borrow()[0].text(), "hello");
        }

        #[test]
        fn test_read_fails_distinctly() {
            let (router, _) = collecting_router();
            let err = router.read(STDOUT).unwrap_err();
            assert!(err.to_string().contains("not supported"));
            assert_eq!(NativeRouter::read(&router, STDOUT), codes::EOF);
            assert_eq!(NativeRouter::unread(&router, STDOUT, 'a' as i32), codes::EOF);
        }
    }
}
