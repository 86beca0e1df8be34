use std::fmt;

/// Uniform result code shared by every component
///
/// Each error type in this crate maps onto one of these codes so that callers which only care
/// about the class of failure (or have to put it on the wire) do not need to know about the
/// concrete error types. Codes are reported as negative integers, `0` is reserved for success.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Generic failure
    Failed,
    /// Operation is not supported in the current role or configuration
    Unsupported,
    /// Target is not in a state that permits the operation
    InvalidState,
    /// Malformed or out-of-range argument
    InvalidArg,
    /// Required value was absent
    NullPointer,
    /// Expected response did not arrive in time
    Timeout,
    /// Resource is occupied
    Busy,
    /// Allocation or capacity exhausted
    NoMemory,
}

impl ErrorCode {
    /// Signed numeric representation of the code
    pub fn code(&self) -> i32 {
        match self {
            ErrorCode::Failed => -1,
            ErrorCode::Unsupported => -2,
            ErrorCode::InvalidState => -3,
            ErrorCode::InvalidArg => -4,
            ErrorCode::NullPointer => -5,
            ErrorCode::Timeout => -6,
            ErrorCode::Busy => -7,
            ErrorCode::NoMemory => -8,
        }
    }

    /// Reverse lookup of [`ErrorCode::code`]
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            -1 => Some(ErrorCode::Failed),
            -2 => Some(ErrorCode::Unsupported),
            -3 => Some(ErrorCode::InvalidState),
            -4 => Some(ErrorCode::InvalidArg),
            -5 => Some(ErrorCode::NullPointer),
            -6 => Some(ErrorCode::Timeout),
            -7 => Some(ErrorCode::Busy),
            -8 => Some(ErrorCode::NoMemory),
            _ => None,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} ({})", self, self.code())
    }
}

#[cfg(test)]
mod does {
    use super::*;

    #[test]
    fn reserve_zero_for_success() {
        for code in -16..16 {
            if let Some(error) = ErrorCode::from_code(code) {
                assert_ne!(error.code(), 0);
                assert_eq!(error.code(), code);
            }
        }

        assert_eq!(ErrorCode::from_code(0), None);
    }
}
