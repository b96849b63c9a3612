//! Context helpers for `Result` and `Option`.

use super::{MigrateError, Result};

/// Attach human-readable context to a fallible operation.
pub trait ResultExt<T> {
    /// Wrap the error with a static context message.
    ///
    /// # Errors
    ///
    /// Returns [`MigrateError::WithContext`] when `self` is an error.
    fn context(self, context: &str) -> Result<T>;

    /// Wrap the error with a lazily built context message.
    ///
    /// # Errors
    ///
    /// Returns [`MigrateError::WithContext`] when `self` is an error.
    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T>;
}

impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn context(self, context: &str) -> Result<T> {
        self.map_err(|source| MigrateError::WithContext {
            context: context.to_string(),
            source: Box::new(source),
        })
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.map_err(|source| MigrateError::WithContext {
            context: f(),
            source: Box::new(source),
        })
    }
}

/// Convert a missing value into a typed error.
pub trait OptionExt<T> {
    /// # Errors
    ///
    /// Returns the error built by `f` when `self` is `None`.
    fn ok_or_migrate<F: FnOnce() -> MigrateError>(self, f: F) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_migrate<F: FnOnce() -> MigrateError>(self, f: F) -> Result<T> {
        self.ok_or_else(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_wraps_source() {
        let res: std::result::Result<(), std::io::Error> =
            Err(std::io::Error::other("disk on fire"));
        let err = res.context("writing snapshot").unwrap_err();
        assert_eq!(err.to_string(), "writing snapshot: disk on fire");
    }

    #[test]
    fn option_maps_to_error() {
        let missing: Option<u8> = None;
        let err = missing
            .ok_or_migrate(|| MigrateError::PolicyNotFound { id: "p".into() })
            .unwrap_err();
        assert!(matches!(err, MigrateError::PolicyNotFound { .. }));
    }
}
