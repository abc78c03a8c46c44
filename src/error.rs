use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ModError {
    #[error("network failure: {0}")]
    Network(String),
    #[error("package does not contain a manifest (mod.json)")]
    ManifestMissing,
    #[error("invalid manifest: {0}")]
    InvalidManifest(String),
    #[error("invalid package: {0}")]
    InvalidPackage(String),
    #[error("{context}: {source}")]
    FileSystem {
        context: String,
        #[source]
        source: io::Error,
    },
    #[error("cancelled")]
    UserCancelled,
    #[error("{0} has not been downloaded")]
    NotDownloaded(String),
    #[error("unknown mod: {0}")]
    UnknownMod(String),
    #[error("game directory not configured")]
    GameNotFound,
}

impl From<zip::result::ZipError> for ModError {
    fn from(err: zip::result::ZipError) -> Self {
        match err {
            zip::result::ZipError::Io(source) => ModError::FileSystem {
                context: "read archive".to_string(),
                source,
            },
            other => ModError::InvalidPackage(other.to_string()),
        }
    }
}

impl From<ureq::Error> for ModError {
    fn from(err: ureq::Error) -> Self {
        ModError::Network(err.to_string())
    }
}

pub type ModResult<T> = Result<T, ModError>;

pub trait FsContext<T> {
    fn fs_context<C: Into<String>>(self, context: C) -> ModResult<T>;

    fn with_fs_context<C: Into<String>, F: FnOnce() -> C>(self, f: F) -> ModResult<T>;
}

impl<T> FsContext<T> for io::Result<T> {
    fn fs_context<C: Into<String>>(self, context: C) -> ModResult<T> {
        self.map_err(|source| ModError::FileSystem {
            context: context.into(),
            source,
        })
    }

    fn with_fs_context<C: Into<String>, F: FnOnce() -> C>(self, f: F) -> ModResult<T> {
        self.map_err(|source| ModError::FileSystem {
            context: f().into(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fs_context_keeps_source_and_message() {
        let err: io::Result<()> = Err(io::Error::new(io::ErrorKind::NotFound, "gone"));
        let err = err.fs_context("copy Foo.dll").unwrap_err();
        assert_eq!(err.to_string(), "copy Foo.dll: gone");
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn zip_format_errors_map_to_invalid_package() {
        let err: ModError = zip::result::ZipError::FileNotFound.into();
        assert!(matches!(err, ModError::InvalidPackage(_)));
    }
}
