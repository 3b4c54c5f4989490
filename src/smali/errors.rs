use thiserror::Error;

#[derive(Error, Debug)]
pub enum SmaliError {
    #[error("{file}:{line}: {message}")]
    Parse {
        file: String,
        line: usize,
        message: String,
    },

    #[error("invalid method descriptor '{0}'")]
    BadDescriptor(String),

    #[error("invalid type descriptor '{0}'")]
    BadTypeDescriptor(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SmaliError {
    pub(crate) fn parse(file: &str, line: usize, message: impl Into<String>) -> Self {
        SmaliError::Parse {
            file: file.to_string(),
            line,
            message: message.into(),
        }
    }
}
