use thiserror::Error;

/// Classified node API failure. The kinds mirror the gRPC status codes the
/// node OS uses; controllers branch on the kind, never on message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MachineErrorKind {
    /// The request is wrong (e.g. a config document the node rejects).
    InvalidArgument,
    /// The node is not in a state where the operation applies.
    FailedPrecondition,
    /// The node OS version predates this operation.
    Unimplemented,
    NotFound,
    /// Transient transport failure.
    Unavailable,
    /// The per-call deadline expired.
    DeadlineExceeded,
    Unauthenticated,
    /// Connection establishment failed before any RPC was issued.
    Connection,
    Internal,
}

#[derive(Debug, Clone, Error)]
#[error("{kind:?}: {message}")]
pub struct MachineError {
    pub kind: MachineErrorKind,
    pub message: String,
}

impl MachineError {
    pub fn new(kind: MachineErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(MachineErrorKind::Connection, message)
    }

    pub fn deadline() -> Self {
        Self::new(MachineErrorKind::DeadlineExceeded, "deadline exceeded")
    }

    pub fn is_invalid_argument(&self) -> bool {
        self.kind == MachineErrorKind::InvalidArgument
    }

    pub fn is_failed_precondition(&self) -> bool {
        self.kind == MachineErrorKind::FailedPrecondition
    }

    pub fn is_unimplemented(&self) -> bool {
        self.kind == MachineErrorKind::Unimplemented
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == MachineErrorKind::NotFound
    }

    /// Transient failures are retried with backoff by the runtime.
    pub fn is_transient(&self) -> bool {
        matches!(
            self.kind,
            MachineErrorKind::Unavailable
                | MachineErrorKind::DeadlineExceeded
                | MachineErrorKind::Connection
        )
    }
}

impl From<tonic::Status> for MachineError {
    fn from(status: tonic::Status) -> Self {
        use tonic::Code;
        let kind = match status.code() {
            Code::InvalidArgument => MachineErrorKind::InvalidArgument,
            Code::FailedPrecondition => MachineErrorKind::FailedPrecondition,
            Code::Unimplemented => MachineErrorKind::Unimplemented,
            Code::NotFound => MachineErrorKind::NotFound,
            Code::Unavailable => MachineErrorKind::Unavailable,
            Code::DeadlineExceeded => MachineErrorKind::DeadlineExceeded,
            Code::Unauthenticated => MachineErrorKind::Unauthenticated,
            _ => MachineErrorKind::Internal,
        };
        Self::new(kind, status.message().to_string())
    }
}
