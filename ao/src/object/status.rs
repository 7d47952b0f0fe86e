//! Request status and object state

use serde::{Deserialize, Serialize};

/// Raw code stored while a request is outstanding
pub const REQUEST_PENDING: i32 = i32::MAX;

/// Outcome of an active object's outstanding request
///
/// Application codes other than the reserved ones travel as `Code`. Build
/// values from raw codes with [`RequestStatus::from_code`] so that the
/// reserved codes always map to their named variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestStatus {
    #[default]
    None,
    Pending,
    Cancelled,
    GeneralError,
    Code(i32),
}

impl RequestStatus {
    pub const fn from_code(code: i32) -> Self {
        match code {
            0 => RequestStatus::None,
            -1 => RequestStatus::Cancelled,
            -2 => RequestStatus::GeneralError,
            REQUEST_PENDING => RequestStatus::Pending,
            other => RequestStatus::Code(other),
        }
    }

    pub const fn code(self) -> i32 {
        match self {
            RequestStatus::None => 0,
            RequestStatus::Pending => REQUEST_PENDING,
            RequestStatus::Cancelled => -1,
            RequestStatus::GeneralError => -2,
            RequestStatus::Code(code) => code,
        }
    }

    /// Negative codes are errors; the pending sentinel is not
    pub const fn is_error(self) -> bool {
        self.code() < 0
    }
}

impl From<i32> for RequestStatus {
    fn from(code: i32) -> Self {
        Self::from_code(code)
    }
}

impl std::fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestStatus::None => write!(f, "none"),
            RequestStatus::Pending => write!(f, "pending"),
            RequestStatus::Cancelled => write!(f, "cancelled"),
            RequestStatus::GeneralError => write!(f, "error"),
            RequestStatus::Code(code) => write!(f, "code {}", code),
        }
    }
}

/// Lifecycle state of an active object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectState {
    #[default]
    Idle,
    Pending,
    Ready,
    Running,
}

impl ObjectState {
    /// Pending or Ready: a request is outstanding
    pub const fn is_busy(self) -> bool {
        matches!(self, ObjectState::Pending | ObjectState::Ready)
    }
}

impl std::fmt::Display for ObjectState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ObjectState::Idle => write!(f, "idle"),
            ObjectState::Pending => write!(f, "pending"),
            ObjectState::Ready => write!(f, "ready"),
            ObjectState::Running => write!(f, "running"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserved_codes() {
        assert_eq!(RequestStatus::from_code(0), RequestStatus::None);
        assert_eq!(RequestStatus::from_code(-1), RequestStatus::Cancelled);
        assert_eq!(RequestStatus::from_code(-2), RequestStatus::GeneralError);
        assert_eq!(RequestStatus::from_code(REQUEST_PENDING), RequestStatus::Pending);
        assert_eq!(RequestStatus::from_code(17), RequestStatus::Code(17));
    }

    #[test]
    fn test_code_mapping_is_stable() {
        for code in [-7, -2, -1, 0, 1, 99, REQUEST_PENDING] {
            assert_eq!(RequestStatus::from_code(code).code(), code);
        }
    }

    #[test]
    fn test_is_error() {
        assert!(RequestStatus::Cancelled.is_error());
        assert!(RequestStatus::Code(-9).is_error());
        assert!(!RequestStatus::Pending.is_error());
        assert!(!RequestStatus::None.is_error());
    }

    #[test]
    fn test_state_is_busy() {
        assert!(ObjectState::Pending.is_busy());
        assert!(ObjectState::Ready.is_busy());
        assert!(!ObjectState::Idle.is_busy());
        assert!(!ObjectState::Running.is_busy());
    }
}
