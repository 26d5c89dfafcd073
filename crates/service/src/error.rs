use std::{fmt, io};

/// Failures from the allocation manager that don't map to a STUN/TURN wire
/// error on their own — callers translate these into the right ERROR-CODE.
#[derive(Debug)]
pub enum Error {
    /// An allocation already exists for this 5-tuple.
    AllocationMismatch,
    /// The relay port range has nothing free.
    PortsExhausted,
    /// Binding the relay UDP socket failed.
    Bind(io::Error),
}

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AllocationMismatch => write!(f, "allocation already exists for this 5-tuple"),
            Self::PortsExhausted => write!(f, "no relay ports available"),
            Self::Bind(e) => write!(f, "failed to bind relay socket: {e}"),
        }
    }
}

impl From<io::Error> for Error {
    fn from(value: io::Error) -> Self {
        Self::Bind(value)
    }
}
