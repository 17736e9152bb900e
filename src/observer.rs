//! Observer registry and record fan-out.
//!
//! Observers are plain functions that receive every finished [`Record`].
//! They are registered once, usually at startup, and live for as long as the
//! registry does. There is no de-duplication and no unregistration.
//!
//! ```rust
//! use xstats::Registry;
//!
//! let registry = Registry::new();
//! registry.on_record(|record| {
//!     let json = serde_json::to_string(record)?;
//!     tracing::info!(%json, "request finished");
//!     Ok(())
//! });
//! ```
//!
//! A [`Registry`] is a cheap handle: clones share the same observer list.
//! Build one, hand clones to the interceptors that should feed it, and keep
//! one to register observers on. [`Registry::global`] is a process-wide
//! instance for code that cannot thread a handle through.

use std::fmt;
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;

use crate::error::{BoxError, Error};
use crate::record::Record;

/// A registered observer.
pub type Observer = dyn Fn(&Record) -> Result<(), BoxError> + Send + Sync + 'static;

/// Copy-on-write list: `notify` takes a snapshot by cloning the outer `Arc`,
/// `on_record` clones the `Vec` only while a snapshot is alive.
type ObserverList = Arc<Vec<Arc<Observer>>>;

/// Ordered list of observers, shared by every clone of the handle.
#[derive(Clone, Default)]
pub struct Registry {
    observers: Arc<RwLock<ObserverList>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry used by [`on_record`](crate::on_record).
    pub fn global() -> &'static Registry {
        static GLOBAL: OnceLock<Registry> = OnceLock::new();
        GLOBAL.get_or_init(Registry::new)
    }

    /// Appends `observer`. Registration order is notification order.
    pub fn on_record<F>(&self, observer: F)
    where
        F: Fn(&Record) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        let mut observers = self.observers.write();
        Arc::make_mut(&mut observers).push(Arc::new(observer));
    }

    pub fn len(&self) -> usize {
        self.observers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.read().is_empty()
    }

    /// Calls every observer, in registration order, with `record`.
    ///
    /// Stops at the first observer that returns an error and returns it;
    /// observers after it are not called for this record.
    ///
    /// Observers run after the lock is released, so an observer may register
    /// further observers. Those take effect from the next record on.
    pub fn notify(&self, record: &Record) -> Result<(), Error> {
        let observers = Arc::clone(&self.observers.read());

        for observer in observers.iter() {
            observer(record).map_err(Error::Observer)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry").field("observers", &self.len()).finish()
    }
}
