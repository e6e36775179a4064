//! Native error codes
//!
//! Numeric codes returned by the engine's call interface, grouped by the
//! call family that produces them. Every family reserves `0` for success.
//! The bridge translates these into typed errors in [`crate::error`].

use super::ErrorCode;

// Load
pub const LE_NO_ERROR: ErrorCode = 0;
pub const LE_OPEN_FILE_ERROR: ErrorCode = 1;
pub const LE_PARSING_ERROR: ErrorCode = 2;

// Eval
pub const EE_NO_ERROR: ErrorCode = 0;
pub const EE_PARSING_ERROR: ErrorCode = 1;
pub const EE_PROCESSING_ERROR: ErrorCode = 2;

// Build
pub const BE_NO_ERROR: ErrorCode = 0;
pub const BE_COULD_NOT_BUILD_ERROR: ErrorCode = 1;
pub const BE_CONSTRUCT_NOT_FOUND_ERROR: ErrorCode = 2;
pub const BE_PARSING_ERROR: ErrorCode = 3;

// AssertString
pub const ASE_NO_ERROR: ErrorCode = 0;
pub const ASE_NULL_POINTER_ERROR: ErrorCode = 1;
pub const ASE_PARSING_ERROR: ErrorCode = 2;
pub const ASE_COULD_NOT_ASSERT_ERROR: ErrorCode = 3;
pub const ASE_RULE_NETWORK_ERROR: ErrorCode = 4;

// Retract
pub const RE_NO_ERROR: ErrorCode = 0;
pub const RE_NULL_POINTER_ERROR: ErrorCode = 1;
pub const RE_COULD_NOT_RETRACT_ERROR: ErrorCode = 2;
pub const RE_RULE_NETWORK_ERROR: ErrorCode = 3;

// GetSlot
pub const GSE_NO_ERROR: ErrorCode = 0;
pub const GSE_NULL_POINTER_ERROR: ErrorCode = 1;
pub const GSE_INVALID_TARGET_ERROR: ErrorCode = 2;
pub const GSE_SLOT_NOT_FOUND_ERROR: ErrorCode = 3;

// PutSlot
pub const PSE_NO_ERROR: ErrorCode = 0;
pub const PSE_NULL_POINTER_ERROR: ErrorCode = 1;
pub const PSE_INVALID_TARGET_ERROR: ErrorCode = 2;
pub const PSE_SLOT_NOT_FOUND_ERROR: ErrorCode = 3;
pub const PSE_TYPE_ERROR: ErrorCode = 4;
pub const PSE_RANGE_ERROR: ErrorCode = 5;
pub const PSE_ALLOWED_VALUES_ERROR: ErrorCode = 6;
pub const PSE_CARDINALITY_ERROR: ErrorCode = 7;
pub const PSE_ALLOWED_CLASSES_ERROR: ErrorCode = 8;
pub const PSE_EVALUATION_ERROR: ErrorCode = 9;
pub const PSE_RULE_NETWORK_ERROR: ErrorCode = 10;

// FactBuilder
pub const FBE_NO_ERROR: ErrorCode = 0;
pub const FBE_NULL_POINTER_ERROR: ErrorCode = 1;
pub const FBE_DEFTEMPLATE_NOT_FOUND_ERROR: ErrorCode = 2;
pub const FBE_IMPLIED_DEFTEMPLATE_ERROR: ErrorCode = 3;
pub const FBE_COULD_NOT_ASSERT_ERROR: ErrorCode = 4;
pub const FBE_RULE_NETWORK_ERROR: ErrorCode = 5;

// InstanceBuilder
pub const IBE_NO_ERROR: ErrorCode = 0;
pub const IBE_NULL_POINTER_ERROR: ErrorCode = 1;
pub const IBE_DEFCLASS_NOT_FOUND_ERROR: ErrorCode = 2;
pub const IBE_COULD_NOT_CREATE_ERROR: ErrorCode = 3;
pub const IBE_RULE_NETWORK_ERROR: ErrorCode = 4;

// MakeInstance
pub const MIE_NO_ERROR: ErrorCode = 0;
pub const MIE_NULL_POINTER_ERROR: ErrorCode = 1;
pub const MIE_PARSING_ERROR: ErrorCode = 2;
pub const MIE_COULD_NOT_CREATE_ERROR: ErrorCode = 3;
pub const MIE_RULE_NETWORK_ERROR: ErrorCode = 4;

// UnmakeInstance / DeleteInstance
pub const UIE_NO_ERROR: ErrorCode = 0;
pub const UIE_NULL_POINTER_ERROR: ErrorCode = 1;
pub const UIE_COULD_NOT_DELETE_ERROR: ErrorCode = 2;
pub const UIE_DELETED_ERROR: ErrorCode = 3;
pub const UIE_RULE_NETWORK_ERROR: ErrorCode = 4;

// FunctionCallBuilder
pub const FCBE_NO_ERROR: ErrorCode = 0;
pub const FCBE_NULL_POINTER_ERROR: ErrorCode = 1;
pub const FCBE_FUNCTION_NOT_FOUND_ERROR: ErrorCode = 2;
pub const FCBE_INVALID_FUNCTION_ERROR: ErrorCode = 3;
pub const FCBE_ARGUMENT_COUNT_ERROR: ErrorCode = 4;
pub const FCBE_ARGUMENT_TYPE_ERROR: ErrorCode = 5;
pub const FCBE_PROCESSING_ERROR: ErrorCode = 6;

// AddUDF
pub const AUE_NO_ERROR: ErrorCode = 0;
pub const AUE_MIN_EXCEEDS_MAX_ERROR: ErrorCode = 1;
pub const AUE_FUNCTION_NAME_IN_USE_ERROR: ErrorCode = 2;
pub const AUE_INVALID_ARGUMENT_TYPE_ERROR: ErrorCode = 3;
pub const AUE_INVALID_RETURN_TYPE_ERROR: ErrorCode = 4;

/// Value returned by router read callbacks when no character is available.
pub const EOF: i32 = -1;
