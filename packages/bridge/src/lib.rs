//! clipsrules
//!
//! A typed Rust bridge over a CLIPS-style expert system rule engine.
//! This library provides:
//! - Marshaling between host [`Value`]s and the engine's native values
//! - Translation of native error codes into typed errors
//! - Lifetime management for host objects handed to the engine as external addresses
//! - Routing of the engine's text output to a host [`OutputHandler`]
//! - Fact, instance and function call builders
//!
//! The engine is reached through the [`native::NativeEngine`] call interface.
//! [`MemoryEngine`] is an in-process implementation of that interface.
//!
//! # Example
//!
//! ```
//! use clipsrules::{Session, Value};
//!
//! let mut session = Session::new();
//! session.build("(deftemplate point (slot x) (slot y))")?;
//! let fact = session.assert_string("(point (x 1) (y 2))")?;
//! assert_eq!(session.fact_slot(fact, "x")?, Value::Integer(1));
//! assert_eq!(session.eval("(+ 1 2)")?, Value::Integer(3));
//! # Ok::<(), clipsrules::BridgeError>(())
//! ```

pub mod builders;
pub mod config;
pub mod constructs;
pub mod error;
pub mod external;
pub mod facts;
pub mod instances;
pub mod marshal;
pub mod memory;
pub mod modules;
pub mod native;
pub mod router;
pub mod session;
pub mod udf;
pub mod value;
pub mod watch;

// Re-export commonly used items
pub use builders::{FactBuilder, FunctionCallBuilder, InstanceBuilder};
pub use config::SessionOptions;
pub use constructs::FactTemplateModel;
pub use error::{
    AddUdfError, AssertStringError, BridgeError, BuildError, ErrorKind, EvalError, FactBuilderError,
    FunctionCallError, GetSlotError, InstanceBuilderError, LoadError, MakeInstanceError, PutSlotError, Result,
    RetractError, RouterError, UnmakeInstanceError,
};
pub use external::ExternalBridge;
pub use facts::{FactAndSlots, FactTemplate};
pub use instances::{ClassDefinition, InstanceAndSlots};
pub use marshal::{from_foreign, to_foreign, MultifieldBuilder};
pub use memory::MemoryEngine;
pub use modules::Module;
pub use native::SaveScope;
pub use router::{OutputHandler, OutputLine, Router, TracingOutputHandler};
pub use session::Session;
pub use udf::{ArgumentTypes, FunctionSignature, Invocation, UserDefinedType};
pub use value::{ExternalAddress, Fact, Instance, Value};
pub use watch::Watch;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
