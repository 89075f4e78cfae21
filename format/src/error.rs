use {
    std::{io, path::PathBuf},
    thiserror::Error,
};

/// Failures that callers need to tell apart.
///
/// Functions return `anyhow::Result`; these values travel inside `anyhow::Error`
/// (or inside `io::Error` when raised from a reader or writer adapter).
/// Use [`ErrorKind::of`] to classify an error.
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// Truncated or adversarial container data.
    #[error("malformed archive: {0}")]
    Format(String),

    /// Integrity or authentication check failed. Wrong key and corrupted data
    /// cannot be told apart.
    #[error("incorrect key or corrupted data: {0}")]
    IncorrectKey(String),

    #[error("file is locked: {}", .0.display())]
    Locked(PathBuf),

    #[error("archive cannot hold more than {max} entries")]
    Capacity { max: usize },

    #[error("cipher `{0}` is not allowed for this key")]
    CipherNotAllowed(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("not enough memory: {0}")]
    NotEnoughMemory(String),

    #[error("archive is busy with another command")]
    Busy,
}

impl ArchiveError {
    #[inline]
    pub fn format(message: impl Into<String>) -> Self {
        Self::Format(message.into())
    }

    #[inline]
    pub fn incorrect_key(message: impl Into<String>) -> Self {
        Self::IncorrectKey(message.into())
    }

    /// Wraps the error so that it can be returned from `Read` or `Write` implementations.
    #[must_use]
    #[inline]
    pub fn into_io(self) -> io::Error {
        io::Error::other(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Format,
    Key,
    Io,
    Capacity,
    Cancelled,
    NotEnoughMemory,
    Busy,
    Other,
}

impl ErrorKind {
    /// Classifies an error by the first typed cause found in its chain.
    #[must_use]
    #[inline]
    pub fn of(err: &anyhow::Error) -> Self {
        for cause in err.chain() {
            if let Some(err) = cause.downcast_ref::<ArchiveError>() {
                return Self::from_archive_error(err);
            }
            if let Some(err) = cause.downcast_ref::<io::Error>() {
                return match err.get_ref().and_then(|inner| inner.downcast_ref::<ArchiveError>()) {
                    Some(inner) => Self::from_archive_error(inner),
                    None => Self::Io,
                };
            }
        }
        Self::Other
    }

    fn from_archive_error(err: &ArchiveError) -> Self {
        match err {
            ArchiveError::Format(_) => Self::Format,
            ArchiveError::IncorrectKey(_) => Self::Key,
            ArchiveError::Locked(_) => Self::Io,
            ArchiveError::Capacity { .. } => Self::Capacity,
            ArchiveError::Cancelled => Self::Cancelled,
            ArchiveError::NotEnoughMemory(_) => Self::NotEnoughMemory,
            ArchiveError::Busy => Self::Busy,
            ArchiveError::CipherNotAllowed(_) => Self::Other,
        }
    }
}

#[cfg(test)]
mod tests {
    use {super::*, anyhow::Context};

    #[test]
    fn classify_direct() {
        let err = anyhow::Error::from(ArchiveError::format("bad header"));
        assert_eq!(ErrorKind::of(&err), ErrorKind::Format);
        let err = anyhow::Error::from(ArchiveError::Cancelled);
        assert_eq!(ErrorKind::of(&err), ErrorKind::Cancelled);
    }

    #[test]
    fn classify_with_context() {
        let result: anyhow::Result<()> = Err(ArchiveError::incorrect_key("hmac mismatch").into());
        let err = result.context("failed to open archive").unwrap_err();
        assert_eq!(ErrorKind::of(&err), ErrorKind::Key);
    }

    #[test]
    fn classify_inside_io() {
        let err = anyhow::Error::from(ArchiveError::Cancelled.into_io());
        assert_eq!(ErrorKind::of(&err), ErrorKind::Cancelled);
        let err = anyhow::Error::from(io::Error::from(io::ErrorKind::NotFound));
        assert_eq!(ErrorKind::of(&err), ErrorKind::Io);
        let err = anyhow::anyhow!("something else");
        assert_eq!(ErrorKind::of(&err), ErrorKind::Other);
    }
}
