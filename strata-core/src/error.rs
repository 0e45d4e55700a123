//! The zero-allocation error type shared by every HAL operation.
//!
//! A `HalError` is four machine words of plain data: a category, a numeric
//! code and two `&'static str`s. It is `Copy`, so modules declare their
//! errors once as `pub const` values and hand them out by value.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// Result type returned by every fallible operation in the core.
pub type HalResult<T> = Result<T, HalError>;

/// Coarse error taxonomy. The category decides who recovers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum ErrorCategory {
    /// Device absent or faulted. Fatal to that driver, not to the process.
    Hardware,
    /// Incompatible or missing implementation. Triggers registry fallback.
    Driver,
    /// Bad parameter or budget. Rejected at the boundary, never clamped.
    Configuration,
    /// Exhaustion, lock conflict, deadlock refusal or timeout.
    Resource,
    /// Orchestrator state violation.
    Platform,
    /// Link down or peer unreachable. Usually transient.
    Network,
    /// Malformed input.
    Validation,
    /// Invariant violation inside the core itself.
    Internal,
}

impl ErrorCategory {
    pub const fn as_str(self) -> &'static str {
        match self {
            ErrorCategory::Hardware => "Hardware",
            ErrorCategory::Driver => "Driver",
            ErrorCategory::Configuration => "Configuration",
            ErrorCategory::Resource => "Resource",
            ErrorCategory::Platform => "Platform",
            ErrorCategory::Network => "Network",
            ErrorCategory::Validation => "Validation",
            ErrorCategory::Internal => "Internal",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A structured, immutable HAL error.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[error("{category} error {code}: {message}{}", ContextSuffix(.context))]
pub struct HalError {
    category: ErrorCategory,
    code: u32,
    message: &'static str,
    context: Option<&'static str>,
}

impl HalError {
    pub const fn new(category: ErrorCategory, code: u32, message: &'static str) -> Self {
        Self { category, code, message, context: None }
    }

    /// Returns a copy carrying additional static context (an interface name, a key).
    pub const fn with_context(self, context: &'static str) -> Self {
        Self { context: Some(context), ..self }
    }

    pub const fn hardware(code: u32, message: &'static str) -> Self {
        Self::new(ErrorCategory::Hardware, code, message)
    }

    pub const fn driver(code: u32, message: &'static str) -> Self {
        Self::new(ErrorCategory::Driver, code, message)
    }

    pub const fn configuration(code: u32, message: &'static str) -> Self {
        Self::new(ErrorCategory::Configuration, code, message)
    }

    pub const fn resource(code: u32, message: &'static str) -> Self {
        Self::new(ErrorCategory::Resource, code, message)
    }

    pub const fn platform(code: u32, message: &'static str) -> Self {
        Self::new(ErrorCategory::Platform, code, message)
    }

    pub const fn network(code: u32, message: &'static str) -> Self {
        Self::new(ErrorCategory::Network, code, message)
    }

    pub const fn validation(code: u32, message: &'static str) -> Self {
        Self::new(ErrorCategory::Validation, code, message)
    }

    pub const fn internal(code: u32, message: &'static str) -> Self {
        Self::new(ErrorCategory::Internal, code, message)
    }

    pub const fn category(&self) -> ErrorCategory {
        self.category
    }

    pub const fn code(&self) -> u32 {
        self.code
    }

    pub const fn message(&self) -> &'static str {
        self.message
    }

    pub const fn context(&self) -> Option<&'static str> {
        self.context
    }

    /// Whether a caller can reasonably retry or fall back.
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self.category,
            ErrorCategory::Resource | ErrorCategory::Driver | ErrorCategory::Hardware | ErrorCategory::Network
        )
    }

    /// Same category and code, ignoring message and context.
    pub fn is(&self, other: &HalError) -> bool {
        self.category == other.category && self.code == other.code
    }
}

struct ContextSuffix<'a>(&'a Option<&'static str>);

impl fmt::Display for ContextSuffix<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(ctx) => write!(f, " ({})", ctx),
            None => Ok(()),
        }
    }
}

/// Wraps a value as a successful result.
pub fn success<T>(value: T) -> HalResult<T> {
    Ok(value)
}

/// Wraps an error as a failed result.
pub fn failure<T>(error: HalError) -> HalResult<T> {
    Err(error)
}

/// Poisoned locks mean a thread panicked while mutating shared tables.
pub const LOCK_POISONED: HalError = HalError::internal(1, "internal lock poisoned by a panicking thread");
