use std::fmt;

use ulid::Ulid;

use crate::model::LockCodeStatus;

/// Failure reported by a collaborator behind one of the ports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortError {
    message: String,
}

impl PortError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for PortError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for PortError {}

impl From<std::io::Error> for PortError {
    fn from(e: std::io::Error) -> Self {
        Self::new(e.to_string())
    }
}

#[derive(Debug)]
pub enum ReconcileError {
    /// Two relevant reservations of one unit share an `ID`.
    DuplicateReservation {
        unit_id: Ulid,
        reservation_id: String,
    },
    MalformedReservation {
        reservation_id: String,
        reason: &'static str,
    },
    /// A lock state the convergence table does not resolve.
    Invariant {
        device_id: Ulid,
        code: String,
        reason: &'static str,
    },
    InvalidTransition {
        from: LockCodeStatus,
        to: LockCodeStatus,
    },
    InvalidLockCode(&'static str),
    ConflictingLockCode {
        device_id: Ulid,
        code: String,
    },
    NotFound(Ulid),
    Collaborator {
        op: &'static str,
        source: PortError,
    },
}

impl ReconcileError {
    pub(crate) fn collaborator(op: &'static str) -> impl FnOnce(PortError) -> Self {
        move |source| ReconcileError::Collaborator { op, source }
    }
}

impl fmt::Display for ReconcileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReconcileError::DuplicateReservation {
                unit_id,
                reservation_id,
            } => write!(
                f,
                "duplicate reservation found for unit {unit_id}, reservation ID: {reservation_id}"
            ),
            ReconcileError::MalformedReservation {
                reservation_id,
                reason,
            } => write!(f, "malformed reservation {reservation_id:?}: {reason}"),
            ReconcileError::Invariant {
                device_id,
                code,
                reason,
            } => write!(f, "unresolved lock state on device {device_id} for code {code}: {reason}"),
            ReconcileError::InvalidTransition { from, to } => {
                write!(f, "invalid lock code transition {from} -> {to}")
            }
            ReconcileError::InvalidLockCode(msg) => write!(f, "invalid lock code: {msg}"),
            ReconcileError::ConflictingLockCode { device_id, code } => {
                write!(f, "lock code {code} conflicts with an existing code on device {device_id}")
            }
            ReconcileError::NotFound(id) => write!(f, "not found: {id}"),
            ReconcileError::Collaborator { op, source } => write!(f, "error {op}: {source}"),
        }
    }
}

impl std::error::Error for ReconcileError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ReconcileError::Collaborator { source, .. } => Some(source),
            _ => None,
        }
    }
}
