use thiserror::Error;
use voxline_bus::BusError;

#[derive(Error, Debug)]
pub enum VoiceError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Invalid session state: {0}")]
    InvalidState(String),

    #[error("Recognizer error: {0}")]
    Recognizer(String),

    #[error("Synthesis error: {0}")]
    Synthesis(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Event bus error: {0}")]
    Bus(#[from] BusError),
}
