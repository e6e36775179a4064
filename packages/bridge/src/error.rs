//! Error types for the clipsrules bridge
//!
//! Every native call family reports failures as a small integer code. Each
//! family gets its own enum here, with one variant per documented code and
//! an `Other(code)` fallback so an unrecognized code is never lost.
//! [`BridgeError`] wraps them all, and [`BridgeError::kind`] folds them into
//! the coarse [`ErrorKind`] taxonomy hosts usually branch on.

use crate::native::codes::*;
use crate::native::ErrorCode;
use thiserror::Error;

/// Declares a native error enum with `from_code`/`code` translation.
macro_rules! native_error {
    (
        $(#[$meta:meta])*
        $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident = $code:path => $msg:literal, )*
        }
    ) => {
        $(#[$meta])*
        #[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
        pub enum $name {
            $( $(#[$vmeta])* #[error($msg)] $variant, )*
            /// Code not documented for this call family
            #[error("unrecognized native error code {0}")]
            Other(ErrorCode),
        }

        impl $name {
            /// Translate a native code. Unknown codes are kept as `Other`.
            pub fn from_code(code: ErrorCode) -> Self {
                match code {
                    $( $code => Self::$variant, )*
                    other => Self::Other(other),
                }
            }

            /// The native code this error was translated from.
            pub fn code(&self) -> ErrorCode {
                match self {
                    $( Self::$variant => $code, )*
                    Self::Other(code) => *code,
                }
            }
        }
    };
}

native_error! {
    /// Failure loading constructs from a file or string
    LoadError {
        OpenFile = LE_OPEN_FILE_ERROR => "could not open file",
        Parsing = LE_PARSING_ERROR => "parse error while loading constructs",
    }
}

native_error! {
    /// Failure evaluating an expression
    EvalError {
        Parsing = EE_PARSING_ERROR => "parse error in expression",
        Processing = EE_PROCESSING_ERROR => "error while evaluating expression",
    }
}

native_error! {
    /// Failure building a construct
    BuildError {
        CouldNotBuild = BE_COULD_NOT_BUILD_ERROR => "construct could not be built",
        ConstructNotFound = BE_CONSTRUCT_NOT_FOUND_ERROR => "no construct found in input",
        Parsing = BE_PARSING_ERROR => "parse error in construct",
    }
}

native_error! {
    /// Failure asserting a fact from its text form
    AssertStringError {
        NullPointer = ASE_NULL_POINTER_ERROR => "no fact text given",
        Parsing = ASE_PARSING_ERROR => "parse error in fact text",
        CouldNotAssert = ASE_COULD_NOT_ASSERT_ERROR => "fact could not be asserted",
        RuleNetwork = ASE_RULE_NETWORK_ERROR => "rule network error while asserting fact",
    }
}

native_error! {
    /// Failure retracting a fact
    RetractError {
        NullPointer = RE_NULL_POINTER_ERROR => "no fact given",
        CouldNotRetract = RE_COULD_NOT_RETRACT_ERROR => "fact could not be retracted",
        RuleNetwork = RE_RULE_NETWORK_ERROR => "rule network error while retracting fact",
    }
}

native_error! {
    /// Failure reading a slot
    GetSlotError {
        NullPointer = GSE_NULL_POINTER_ERROR => "no slot owner given",
        InvalidTarget = GSE_INVALID_TARGET_ERROR => "slot owner is no longer valid",
        SlotNotFound = GSE_SLOT_NOT_FOUND_ERROR => "slot not found",
    }
}

native_error! {
    /// Failure writing a slot
    PutSlotError {
        NullPointer = PSE_NULL_POINTER_ERROR => "no slot owner given",
        InvalidTarget = PSE_INVALID_TARGET_ERROR => "slot owner is no longer valid",
        SlotNotFound = PSE_SLOT_NOT_FOUND_ERROR => "slot not found",
        Type = PSE_TYPE_ERROR => "value type not allowed for slot",
        Range = PSE_RANGE_ERROR => "value outside the slot's range",
        AllowedValues = PSE_ALLOWED_VALUES_ERROR => "value not among the slot's allowed values",
        Cardinality = PSE_CARDINALITY_ERROR => "value violates the slot's cardinality",
        AllowedClasses = PSE_ALLOWED_CLASSES_ERROR => "instance class not allowed for slot",
        Evaluation = PSE_EVALUATION_ERROR => "error evaluating slot value",
        RuleNetwork = PSE_RULE_NETWORK_ERROR => "rule network error while setting slot",
    }
}

native_error! {
    /// Failure in the fact builder
    FactBuilderError {
        NullPointer = FBE_NULL_POINTER_ERROR => "fact builder has no template",
        DeftemplateNotFound = FBE_DEFTEMPLATE_NOT_FOUND_ERROR => "deftemplate not found",
        ImpliedDeftemplate = FBE_IMPLIED_DEFTEMPLATE_ERROR => "implied deftemplates cannot be used with a fact builder",
        CouldNotAssert = FBE_COULD_NOT_ASSERT_ERROR => "fact could not be asserted",
        RuleNetwork = FBE_RULE_NETWORK_ERROR => "rule network error while asserting fact",
    }
}

native_error! {
    /// Failure in the instance builder
    InstanceBuilderError {
        NullPointer = IBE_NULL_POINTER_ERROR => "instance builder has no class",
        DefclassNotFound = IBE_DEFCLASS_NOT_FOUND_ERROR => "defclass not found",
        CouldNotCreate = IBE_COULD_NOT_CREATE_ERROR => "instance could not be created",
        RuleNetwork = IBE_RULE_NETWORK_ERROR => "rule network error while creating instance",
    }
}

native_error! {
    /// Failure creating an instance from its text form
    MakeInstanceError {
        NullPointer = MIE_NULL_POINTER_ERROR => "no instance text given",
        Parsing = MIE_PARSING_ERROR => "parse error in instance text",
        CouldNotCreate = MIE_COULD_NOT_CREATE_ERROR => "instance could not be created",
        RuleNetwork = MIE_RULE_NETWORK_ERROR => "rule network error while creating instance",
    }
}

native_error! {
    /// Failure unmaking or deleting an instance
    UnmakeInstanceError {
        NullPointer = UIE_NULL_POINTER_ERROR => "no instance given",
        CouldNotDelete = UIE_COULD_NOT_DELETE_ERROR => "instance could not be deleted",
        Deleted = UIE_DELETED_ERROR => "instance was already deleted",
        RuleNetwork = UIE_RULE_NETWORK_ERROR => "rule network error while deleting instance",
    }
}

native_error! {
    /// Failure in the function call builder
    FunctionCallError {
        NullPointer = FCBE_NULL_POINTER_ERROR => "function call builder has no function",
        FunctionNotFound = FCBE_FUNCTION_NOT_FOUND_ERROR => "function not found",
        InvalidFunction = FCBE_INVALID_FUNCTION_ERROR => "name does not refer to a callable function",
        ArgumentCount = FCBE_ARGUMENT_COUNT_ERROR => "wrong number of arguments",
        ArgumentType = FCBE_ARGUMENT_TYPE_ERROR => "argument of wrong type",
        Processing = FCBE_PROCESSING_ERROR => "error while calling function",
    }
}

native_error! {
    /// Failure registering a user-defined function
    AddUdfError {
        MinExceedsMax = AUE_MIN_EXCEEDS_MAX_ERROR => "minimum argument count exceeds maximum",
        FunctionNameInUse = AUE_FUNCTION_NAME_IN_USE_ERROR => "function name already in use",
        InvalidArgumentType = AUE_INVALID_ARGUMENT_TYPE_ERROR => "invalid argument type string",
        InvalidReturnType = AUE_INVALID_RETURN_TYPE_ERROR => "invalid return type string",
    }
}

/// Router failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RouterError {
    /// Output sent to a logical name that was never registered
    #[error("Unknown output channel: {0}")]
    UnknownChannel(String),

    /// Reads are not supported on any channel
    #[error("Reading from channel '{0}' is not supported")]
    ReadUnsupported(String),
}

/// Coarse classification of bridge errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed construct or expression text
    Parse,
    /// Evaluation-time failure distinct from parsing
    Processing,
    /// Unknown template, class, function, slot or channel
    TargetNotFound,
    /// Type, range, allowed-value or cardinality violation
    Constraint,
    /// Operation on a retracted fact or deleted instance
    Lifecycle,
    /// Duplicate registration
    RegistrationConflict,
    /// File access
    Io,
    /// Unmapped native code or anything else
    Other,
}

/// Main error type for bridge operations
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Load failed: {0}")]
    Load(#[from] LoadError),

    #[error("Eval failed: {0}")]
    Eval(#[from] EvalError),

    #[error("Build failed: {0}")]
    Build(#[from] BuildError),

    #[error("Assert failed: {0}")]
    AssertString(#[from] AssertStringError),

    #[error("Retract failed: {0}")]
    Retract(#[from] RetractError),

    #[error("Get slot failed: {0}")]
    GetSlot(#[from] GetSlotError),

    #[error("Put slot failed: {0}")]
    PutSlot(#[from] PutSlotError),

    #[error("Fact builder failed: {0}")]
    FactBuilder(#[from] FactBuilderError),

    #[error("Instance builder failed: {0}")]
    InstanceBuilder(#[from] InstanceBuilderError),

    #[error("Make instance failed: {0}")]
    MakeInstance(#[from] MakeInstanceError),

    #[error("Unmake instance failed: {0}")]
    UnmakeInstance(#[from] UnmakeInstanceError),

    #[error("Function call failed: {0}")]
    FunctionCall(#[from] FunctionCallError),

    #[error("Function registration failed: {0}")]
    AddUdf(#[from] AddUdfError),

    /// A host symbol collides with a boolean sentinel
    #[error("Symbol '{0}' is reserved for booleans")]
    ReservedSymbol(String),

    /// Module name not known to the engine
    #[error("Module not found: {0}")]
    ModuleNotFound(String),

    /// Construct model that cannot be rendered
    #[error("Invalid construct model: {0}")]
    InvalidModel(String),

    #[error("Router error: {0}")]
    Router(#[from] RouterError),

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl BridgeError {
    /// Classify this error into the coarse taxonomy.
    pub fn kind(&self) -> ErrorKind {
        use ErrorKind::*;
        match self {
            BridgeError::Load(e) => match e {
                LoadError::OpenFile => Io,
                LoadError::Parsing => Parse,
                LoadError::Other(_) => Other,
            },
            BridgeError::Eval(e) => match e {
                EvalError::Parsing => Parse,
                EvalError::Processing => Processing,
                EvalError::Other(_) => Other,
            },
            BridgeError::Build(e) => match e {
                BuildError::CouldNotBuild => Processing,
                BuildError::ConstructNotFound => TargetNotFound,
                BuildError::Parsing => Parse,
                BuildError::Other(_) => Other,
            },
            BridgeError::AssertString(e) => match e {
                AssertStringError::NullPointer => Lifecycle,
                AssertStringError::Parsing => Parse,
                AssertStringError::CouldNotAssert | AssertStringError::RuleNetwork => Processing,
                AssertStringError::Other(_) => Other,
            },
            BridgeError::Retract(e) => match e {
                RetractError::NullPointer | RetractError::CouldNotRetract => Lifecycle,
                RetractError::RuleNetwork => Processing,
                RetractError::Other(_) => Other,
            },
            BridgeError::GetSlot(e) => match e {
                GetSlotError::NullPointer | GetSlotError::InvalidTarget => Lifecycle,
                GetSlotError::SlotNotFound => TargetNotFound,
                GetSlotError::Other(_) => Other,
            },
            BridgeError::PutSlot(e) => match e {
                PutSlotError::NullPointer | PutSlotError::InvalidTarget => Lifecycle,
                PutSlotError::SlotNotFound => TargetNotFound,
                PutSlotError::Type
                | PutSlotError::Range
                | PutSlotError::AllowedValues
                | PutSlotError::Cardinality
                | PutSlotError::AllowedClasses => Constraint,
                PutSlotError::Evaluation | PutSlotError::RuleNetwork => Processing,
                PutSlotError::Other(_) => Other,
            },
            BridgeError::FactBuilder(e) => match e {
                FactBuilderError::NullPointer | FactBuilderError::DeftemplateNotFound => {
                    TargetNotFound
                }
                FactBuilderError::ImpliedDeftemplate => Constraint,
                FactBuilderError::CouldNotAssert | FactBuilderError::RuleNetwork => Processing,
                FactBuilderError::Other(_) => Other,
            },
            BridgeError::InstanceBuilder(e) => match e {
                InstanceBuilderError::NullPointer | InstanceBuilderError::DefclassNotFound => {
                    TargetNotFound
                }
                InstanceBuilderError::CouldNotCreate | InstanceBuilderError::RuleNetwork => {
                    Processing
                }
                InstanceBuilderError::Other(_) => Other,
            },
            BridgeError::MakeInstance(e) => match e {
                MakeInstanceError::NullPointer => Lifecycle,
                MakeInstanceError::Parsing => Parse,
                MakeInstanceError::CouldNotCreate | MakeInstanceError::RuleNetwork => Processing,
                MakeInstanceError::Other(_) => Other,
            },
            BridgeError::UnmakeInstance(e) => match e {
                UnmakeInstanceError::NullPointer | UnmakeInstanceError::Deleted => Lifecycle,
                UnmakeInstanceError::CouldNotDelete | UnmakeInstanceError::RuleNetwork => {
                    Processing
                }
                UnmakeInstanceError::Other(_) => Other,
            },
            BridgeError::FunctionCall(e) => match e {
                FunctionCallError::NullPointer
                | FunctionCallError::FunctionNotFound
                | FunctionCallError::InvalidFunction => TargetNotFound,
                FunctionCallError::ArgumentCount | FunctionCallError::ArgumentType => Constraint,
                FunctionCallError::Processing => Processing,
                FunctionCallError::Other(_) => Other,
            },
            BridgeError::AddUdf(e) => match e {
                AddUdfError::FunctionNameInUse => RegistrationConflict,
                AddUdfError::MinExceedsMax
                | AddUdfError::InvalidArgumentType
                | AddUdfError::InvalidReturnType => Constraint,
                AddUdfError::Other(_) => Other,
            },
            BridgeError::ReservedSymbol(_) => Constraint,
            BridgeError::ModuleNotFound(_) => TargetNotFound,
            BridgeError::InvalidModel(_) => Parse,
            BridgeError::Router(RouterError::UnknownChannel(_)) => TargetNotFound,
            BridgeError::Router(RouterError::ReadUnsupported(_)) => Other,
            BridgeError::Io(_) => Io,
            BridgeError::Json(_) => Parse,
        }
    }
}

/// Result type alias for bridge operations
pub type Result<T> = std::result::Result<T, BridgeError>;
