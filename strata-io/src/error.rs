use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("sysconf({0}) failed: {1}")]
    Sysconf(&'static str, std::io::Error),
    #[error("memory topology is not readable on {0}")]
    Unsupported(&'static str),
    #[error("benchmark buffer of {0} bytes is below the {1} byte minimum")]
    BufferTooSmall(usize, usize),
    #[error("benchmark finished too quickly to be measured")]
    Unmeasurable,
}
