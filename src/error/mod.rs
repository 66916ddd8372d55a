use crate::instance::LifecycleState;
use std::{error::Error, fmt};

const ERR_MSG_UNSUPPORTED_TYPE: &str = "unsupported type tag";
const ERR_MSG_OUT_OF_RANGE: &str = "element index out of range";
const ERR_MSG_LAYOUT_MISMATCH: &str = "layout mismatch";
const ERR_MSG_LIFECYCLE: &str = "lifecycle violation";
const ERR_MSG_USER_LOGIC: &str = "model logic failure";

/// Failure of a typed field or port access.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessError {
    /// Raw tag is unknown, or disagrees with the field's declared type.
    UnsupportedType { tag: u32 },
    /// Element index is not below the declared element count,
    /// or the element would fall outside the owning buffer.
    OutOfRange { index: usize, count: usize },
    /// Buffer size or descriptor table disagrees with the declared layout.
    LayoutMismatch(String),
}

impl AccessError {
    pub fn layout(msg: impl Into<String>) -> Self {
        AccessError::LayoutMismatch(msg.into())
    }
}

impl fmt::Display for AccessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessError::UnsupportedType { tag } => {
                write!(f, "{ERR_MSG_UNSUPPORTED_TYPE}: {tag}")
            }
            AccessError::OutOfRange { index, count } => {
                write!(f, "{ERR_MSG_OUT_OF_RANGE}: {index} >= {count}")
            }
            AccessError::LayoutMismatch(msg) => write!(f, "{ERR_MSG_LAYOUT_MISMATCH}: {msg}"),
        }
    }
}

impl Error for AccessError {}

/// Failure of a lifecycle entry point.
#[derive(Debug)]
pub enum ModelError {
    Access(AccessError),
    /// Operation invoked from a state that does not allow it.
    LifecycleViolation {
        op: &'static str,
        state: LifecycleState,
    },
    /// The user transfer logic reported an error.
    UserLogicFailure(anyhow::Error),
}

impl ModelError {
    pub(crate) fn lifecycle(op: &'static str, state: LifecycleState) -> Self {
        ModelError::LifecycleViolation { op, state }
    }

    /// Configuration errors that must stop the model rather than be retried.
    pub fn is_fatal(&self) -> bool {
        match self {
            ModelError::Access(AccessError::LayoutMismatch(_)) => true,
            ModelError::LifecycleViolation { .. } => true,
            _ => false,
        }
    }
}

impl fmt::Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelError::Access(err) => write!(f, "{err}"),
            ModelError::LifecycleViolation { op, state } => {
                write!(f, "{ERR_MSG_LIFECYCLE}: {op} not allowed in {state:?}")
            }
            ModelError::UserLogicFailure(err) => write!(f, "{ERR_MSG_USER_LOGIC}: {err:#}"),
        }
    }
}

impl Error for ModelError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ModelError::Access(err) => Some(err),
            ModelError::UserLogicFailure(err) => Some(err.as_ref()),
            ModelError::LifecycleViolation { .. } => None,
        }
    }
}

impl From<AccessError> for ModelError {
    fn from(err: AccessError) -> Self {
        ModelError::Access(err)
    }
}

/// Status code returned across the host boundary.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
#[repr(i32)]
pub enum StatusCode {
    Ok = 0,
    Error = 1,
}

impl StatusCode {
    #[inline]
    pub fn of<T, E>(res: &Result<T, E>) -> Self {
        match res {
            Ok(_) => StatusCode::Ok,
            Err(_) => StatusCode::Error,
        }
    }

    #[inline]
    pub fn is_ok(self) -> bool {
        self == StatusCode::Ok
    }
}

impl From<StatusCode> for i32 {
    fn from(code: StatusCode) -> Self {
        code as i32
    }
}
