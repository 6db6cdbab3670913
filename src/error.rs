use std::io;
use thiserror::Error;

/// why a program could not be loaded into a fresh machine
#[derive(Debug, Error)]
#[error("failed to load program {name:?}: {reason}")]
pub struct LoadError {
    pub name: String,
    pub reason: LoadFailure,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadFailure {
    #[error("program not found")]
    NotFound,
    #[error("program is malformed")]
    Malformed,
    #[error("program name is not representable: {0}")]
    BadName(String),
    #[error("machine reported status {0}")]
    Status(i32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FaultKind {
    #[error("invalid or unsupported opcode")]
    InvalidOpcode,
    #[error("stack overflow")]
    StackOverflow,
    #[error("stack underflow")]
    StackUnderflow,
    #[error("machine reported status {0}")]
    Other(i32),
}

/// a step the machine refused to complete
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("execution fault ({kind}) after {completed} step(s) this tick{}", opcode_suffix(.opcode))]
pub struct ExecutionFault {
    pub kind: FaultKind,
    /// the offending opcode, when the machine reports one
    pub opcode: Option<u16>,
    /// steps that completed in the tick before the fault
    pub completed: u64,
}

fn opcode_suffix(opcode: &Option<u16>) -> String {
    match opcode {
        Some(op) => format!(" at opcode {op:#06x}"),
        None => String::new(),
    }
}

#[derive(Debug, Error)]
pub enum AudioError {
    #[error("no audio output device")]
    NoDevice,
    #[error("audio device error: {0}")]
    Device(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config: {0}")]
    Io(#[from] io::Error),
    #[error("could not parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
    #[error("bad command line: {0}")]
    Usage(String),
}

/// everything the drive layer can surface to its host
#[derive(Debug, Error)]
pub enum DriveError {
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error(transparent)]
    Fault(#[from] ExecutionFault),
    /// a frame callback or read that outlived the session it belonged to
    #[error("stale resource: {0}")]
    ResourceStale(&'static str),
    #[error("could not create machine: {0}")]
    Create(String),
    #[error("presentation failed: {0}")]
    Present(#[from] io::Error),
    #[error(transparent)]
    Audio(#[from] AudioError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub type DriveResult<T> = Result<T, DriveError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fault_message_with_opcode() {
        let f = ExecutionFault {
            kind: FaultKind::StackUnderflow,
            opcode: Some(0x00ee),
            completed: 3,
        };
        assert_eq!(
            f.to_string(),
            "execution fault (stack underflow) after 3 step(s) this tick at opcode 0x00ee"
        );
    }

    #[test]
    fn test_load_error_converts() {
        let e: DriveError = LoadError {
            name: "pong".into(),
            reason: LoadFailure::NotFound,
        }
        .into();
        assert!(matches!(e, DriveError::Load(_)));
        assert_eq!(
            e.to_string(),
            "failed to load program \"pong\": program not found"
        );
    }
}
