//! CLI error type and exit-code mapping.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Engine(#[from] cachemux::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AppError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// A batch that ran exits 0 even with per-title failures; only
    /// configuration-level problems are non-zero.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) => 2,
            Self::Engine(e) if e.is_fatal() => 2,
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configuration_errors_exit_2() {
        assert_eq!(AppError::config("bad").exit_code(), 2);
        assert_eq!(
            AppError::Engine(cachemux::Error::config("no backend")).exit_code(),
            2
        );
    }

    #[test]
    fn other_errors_exit_1() {
        let err = AppError::Io(std::io::Error::other("disk"));
        assert_eq!(err.exit_code(), 1);
    }
}
