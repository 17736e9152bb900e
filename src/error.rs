//! Unified error type.

use thiserror::Error as ThisError;

/// Boxed error returned by caller-supplied callbacks (record builders and
/// observers).
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The error type returned by xstats' fallible operations.
///
/// Application-level errors (404, 422, etc.) are expressed as HTTP
/// [`Response`](crate::Response) values, not as `Error`s. This type surfaces
/// two kinds of failure:
///
/// - infrastructure failures in the host server: binding to a port or
///   accepting a connection;
/// - instrumentation failures: a record builder or an observer that returned
///   an error or panicked. The metrics interceptor logs and discards these, so
///   they never reach the client.
#[derive(Debug, ThisError)]
pub enum Error {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    /// The record builder returned an error.
    #[error("record builder failed: {0}")]
    Builder(#[source] BoxError),

    /// An observer returned an error. Observers registered after it were not
    /// called for that record.
    #[error("observer failed: {0}")]
    Observer(#[source] BoxError),

    /// A record builder or an observer panicked.
    #[error("instrumentation panicked: {0}")]
    Panicked(String),
}
