//! Store error observer
//!
//! Repositories can be given a [`StoreErrorObserver`] through
//! [`crate::RepositoryConfig::with_observer`]. It is called synchronously,
//! on the calling thread, for every store error a repository operation is
//! about to return. The error is returned to the caller either way.

use kvrepo_core::StoreError;

/// Callback for store failures surfaced by a repository
pub trait StoreErrorObserver: Send + Sync {
    /// Called with the failing repository operation and the store error
    fn on_store_error(&self, operation: &'static str, error: &StoreError);
}

impl<F> StoreErrorObserver for F
where
    F: Fn(&'static str, &StoreError) + Send + Sync,
{
    fn on_store_error(&self, operation: &'static str, error: &StoreError) {
        self(operation, error)
    }
}
