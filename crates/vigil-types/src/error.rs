//! Unified error interface for Vigil crates.
//!
//! All Vigil error types implement [`ErrorCode`] so the bus, the
//! orchestrator, and dashboards can handle failures uniformly:
//!
//! - **Machine-readable codes** for contract diagnostics on
//!   `status.contract`
//! - **Recoverability info** for retry and quarantine decisions
//!
//! # Example
//!
//! ```
//! use vigil_types::ErrorCode;
//!
//! #[derive(Debug)]
//! enum StageError {
//!     MissingKey(String),
//!     Backpressure,
//! }
//!
//! impl ErrorCode for StageError {
//!     fn code(&self) -> &'static str {
//!         match self {
//!             Self::MissingKey(_) => "STAGE_MISSING_KEY",
//!             Self::Backpressure => "STAGE_BACKPRESSURE",
//!         }
//!     }
//!
//!     fn is_recoverable(&self) -> bool {
//!         matches!(self, Self::Backpressure)
//!     }
//! }
//!
//! assert!(StageError::Backpressure.is_recoverable());
//! ```

/// Unified error code interface.
///
/// # Code Format
///
/// - **UPPER_SNAKE_CASE**: e.g. `"BUS_PUBLISH_TIMEOUT"`
/// - **Namespace-prefixed**: `"BUS_"`, `"CONFIG_"`, `"MODULE_"`
/// - **Stable**: codes are an API contract and must not change
///
/// # Recoverability
///
/// An error is recoverable when retrying may succeed (timeouts,
/// transient backpressure) or when an operator can fix it at runtime
/// (config update). Invalid input and contract violations are not.
pub trait ErrorCode {
    /// Returns a machine-readable error code.
    fn code(&self) -> &'static str;

    /// Returns whether retrying the operation may succeed.
    fn is_recoverable(&self) -> bool;
}

/// Validates that an error code follows Vigil conventions.
///
/// # Panics
///
/// Panics with a descriptive message if the code is empty, not
/// UPPER_SNAKE_CASE, or missing the expected prefix.
///
/// # Example
///
/// ```
/// use vigil_types::{assert_error_code, ErrorCode};
///
/// #[derive(Debug)]
/// struct Timeout;
///
/// impl ErrorCode for Timeout {
///     fn code(&self) -> &'static str { "BUS_TIMEOUT" }
///     fn is_recoverable(&self) -> bool { true }
/// }
///
/// assert_error_code(&Timeout, "BUS_");
/// ```
pub fn assert_error_code<E: ErrorCode>(err: &E, expected_prefix: &str) {
    let code = err.code();

    assert!(!code.is_empty(), "Error code must not be empty");

    assert!(
        code.starts_with(expected_prefix),
        "Error code '{}' must start with prefix '{}'",
        code,
        expected_prefix
    );

    assert!(
        is_upper_snake_case(code),
        "Error code '{}' must be UPPER_SNAKE_CASE",
        code
    );
}

/// Validates every variant of an error enum at once.
pub fn assert_error_codes<E: ErrorCode>(errors: &[E], expected_prefix: &str) {
    for err in errors {
        assert_error_code(err, expected_prefix);
    }
}

/// Checks if a string is UPPER_SNAKE_CASE.
fn is_upper_snake_case(s: &str) -> bool {
    if s.is_empty() || s.starts_with('_') || s.ends_with('_') || s.contains("__") {
        return false;
    }
    s.chars()
        .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
}
