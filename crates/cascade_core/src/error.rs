//! Core error types for cascade.

use std::fmt;

/// Core result type
pub type CoreResult<T> = Result<T, CoreError>;

/// Core error type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// Payload is not valid JSON or does not have the transaction shape
    InvalidEncoding {
        /// Decoder message
        message: String,
    },

    /// A required field is absent
    MissingField {
        /// Field name on the wire
        field: String,
    },

    /// A call refers to a data operation the transaction does not define
    UnresolvedDataOp {
        /// Transaction id
        tid: String,
        /// Referenced op id
        op_id: i64,
    },

    /// Malformed transaction content
    Malformed {
        /// Transaction id, when known
        tid: String,
        /// What is wrong
        reason: String,
    },

    /// Unknown data-op type
    UnknownOpType {
        /// Name as given on the wire
        name: String,
    },

    /// Unknown data-store kind
    UnknownStoreKind {
        /// Name as given on the wire
        name: String,
    },
}

impl CoreError {
    /// Shorthand for a malformed-transaction error
    pub fn malformed(tid: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Malformed {
            tid: tid.into(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidEncoding { message } => write!(f, "Invalid encoding: {}", message),
            Self::MissingField { field } => write!(f, "Missing field: {}", field),
            Self::UnresolvedDataOp { tid, op_id } => {
                write!(f, "Transaction {} references unknown data op {}", tid, op_id)
            }
            Self::Malformed { tid, reason } => {
                write!(f, "Malformed transaction {}: {}", tid, reason)
            }
            Self::UnknownOpType { name } => write!(f, "Unknown operation type: {}", name),
            Self::UnknownStoreKind { name } => write!(f, "Unknown store kind: {}", name),
        }
    }
}

impl std::error::Error for CoreError {}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidEncoding {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CoreError::MissingField {
            field: "tid".to_string(),
        };
        assert_eq!(format!("{}", err), "Missing field: tid");

        let err = CoreError::UnresolvedDataOp {
            tid: "t1".to_string(),
            op_id: 7,
        };
        assert_eq!(
            format!("{}", err),
            "Transaction t1 references unknown data op 7"
        );
    }

    #[test]
    fn test_malformed_shorthand() {
        let err = CoreError::malformed("t9", "bad call");
        let s = err.to_string();
        assert!(s.contains("t9"));
        assert!(s.contains("bad call"));
    }

    #[test]
    fn test_from_json_error() {
        let err: CoreError = serde_json::from_str::<u32>("nope").unwrap_err().into();
        assert!(matches!(err, CoreError::InvalidEncoding { .. }));
    }
}
