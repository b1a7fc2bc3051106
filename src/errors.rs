//! Transform pipeline errors.
//!
//! Two recoverable kinds exist, both of which abort the whole pass
//! sequence at the failing pass:
//! - Configuration: the caller-supplied pass config does not match the
//!   module (e.g. a missing multiplanar binding-point entry).
//! - Validation: the module entering (or leaving) a pass is malformed.
//!
//! Programming invariant violations (destroying an instruction whose
//! result still has uses, an unexpected instruction kind in a rewrite)
//! are pass bugs, not bad input, and panic instead of returning here.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Configuration,
    Validation,
}

#[derive(Debug, Clone)]
pub struct TransformError {
    pub kind: ErrorKind,
    pub msg: String,
}

impl TransformError {
    pub fn configuration(msg: impl Into<String>) -> TransformError {
        TransformError {
            kind: ErrorKind::Configuration,
            msg: msg.into(),
        }
    }

    pub fn validation(msg: impl Into<String>) -> TransformError {
        TransformError {
            kind: ErrorKind::Validation,
            msg: msg.into(),
        }
    }
}

impl fmt::Display for TransformError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ErrorKind::Configuration => write!(f, "configuration error: {}", self.msg),
            ErrorKind::Validation => write!(f, "validation error: {}", self.msg),
        }
    }
}

impl std::error::Error for TransformError {}

/// Convenience macro for returning configuration errors.
///
/// Usage:
/// ```ignore
/// return_config_error!("no binding mapping for {:?}", point);
/// ```
#[macro_export]
macro_rules! return_config_error {
    ($($arg:tt)*) => {
        return Err($crate::errors::TransformError::configuration(format!($($arg)*)))
    };
}

/// Convenience macro for returning validation errors.
#[macro_export]
macro_rules! return_validation_error {
    ($($arg:tt)*) => {
        return Err($crate::errors::TransformError::validation(format!($($arg)*)))
    };
}
