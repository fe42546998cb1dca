use std::io;

use thiserror::Error;

/// Errors that can occur when starting the worker thread of an event loop.
///
/// Everything else the event loop does is either infallible or a documented no-op, such as
/// posting an event to a handler that is being removed.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// [`WorkerThread::run()`][crate::WorkerThread::run] was called while the previously
    /// started thread had not yet been joined.
    #[error("worker thread '{name}' is already running")]
    ThreadAlreadyRunning {
        /// Name of the worker thread.
        name: String,
    },

    /// The operating system refused to create the worker thread.
    #[error("failed to spawn worker thread '{name}'")]
    ThreadSpawn {
        /// Name of the worker thread.
        name: String,

        /// The underlying error reported by the platform.
        #[source]
        source: io::Error,
    },
}

/// A specialized `Result` type for switchyard operations, returning the crate's
/// [`Error`] type as the error value.
pub(crate) type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::error::Error as _;
    use std::fmt::Debug;

    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(Error: Send, Sync, Debug);

    #[test]
    fn spawn_error_exposes_source() {
        let error = Error::ThreadSpawn {
            name: "worker".to_string(),
            source: io::Error::other("out of threads"),
        };

        let source = error.source().expect("spawn error must carry its cause");
        assert_eq!(source.to_string(), "out of threads");
    }

    #[test]
    fn already_running_has_no_source() {
        let error = Error::ThreadAlreadyRunning {
            name: "worker".to_string(),
        };

        assert!(error.source().is_none());
    }
}
