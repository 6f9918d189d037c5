//! Lazily initialized, shared oracle handle
//!
//! The cache is the only state shared between pipeline invocations. It is
//! written at most once and read-only afterwards.

use crate::error::{BgCutError, Result};
use crate::inference::OracleLoader;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

type LoadOutcome<O> = std::result::Result<Arc<O>, Arc<BgCutError>>;

/// One initialization attempt, awaited by every caller that joined it
struct InFlight<O> {
    attempt: usize,
    load: Shared<BoxFuture<'static, LoadOutcome<O>>>,
}

/// Single-initialization cache around an [`OracleLoader`]
///
/// Concurrent callers racing the first `get_model` all await the same
/// initialization and all observe its outcome, failure included. A failed
/// initialization leaves the cache empty, so only a call arriving after the
/// failure starts a fresh attempt; nothing is retried automatically.
pub struct ModelCache<L: OracleLoader> {
    loader: Arc<L>,
    cell: OnceCell<Arc<L::Oracle>>,
    in_flight: Mutex<Option<InFlight<L::Oracle>>>,
    attempts: AtomicUsize,
}

impl<L: OracleLoader> ModelCache<L> {
    #[must_use]
    pub fn new(loader: L) -> Self {
        Self {
            loader: Arc::new(loader),
            cell: OnceCell::new(),
            in_flight: Mutex::new(None),
            attempts: AtomicUsize::new(0),
        }
    }

    /// Get the oracle handle, initializing it on first use
    ///
    /// # Errors
    /// - Whatever the loader returned; the cache is not poisoned by it
    pub async fn get_model(&self) -> Result<Arc<L::Oracle>> {
        if let Some(oracle) = self.cell.get() {
            return Ok(Arc::clone(oracle));
        }

        let (attempt, load) = {
            let mut slot = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(oracle) = self.cell.get() {
                return Ok(Arc::clone(oracle));
            }
            match slot.as_ref() {
                Some(in_flight) => {
                    debug!(
                        attempt = in_flight.attempt,
                        "Joining pending oracle initialization"
                    );
                    (in_flight.attempt, in_flight.load.clone())
                },
                None => {
                    let in_flight = self.start_attempt();
                    let joined = (in_flight.attempt, in_flight.load.clone());
                    *slot = Some(in_flight);
                    joined
                },
            }
        };

        let outcome = load.await;

        let mut slot = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if let Ok(oracle) = &outcome {
            // Ignored when another caller of the same attempt stored it first
            let _ = self.cell.set(Arc::clone(oracle));
        }
        if slot.as_ref().is_some_and(|pending| pending.attempt == attempt) {
            *slot = None;
        }
        drop(slot);

        outcome.map_err(unshare_error)
    }

    fn start_attempt(&self) -> InFlight<L::Oracle> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        let loader = Arc::clone(&self.loader);

        let load = async move {
            debug!(attempt, "Initializing segmentation oracle");
            match loader.load().await {
                Ok(oracle) => {
                    info!(attempt, "Segmentation oracle ready");
                    Ok(Arc::new(oracle))
                },
                Err(e) => {
                    warn!(attempt, error = %e, "Segmentation oracle initialization failed");
                    Err(Arc::new(e))
                },
            }
        }
        .boxed()
        .shared();

        InFlight { attempt, load }
    }

    /// Whether an initialized handle is available
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.cell.initialized()
    }

    /// Number of initialization attempts started
    #[must_use]
    pub fn initialization_attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// The loader backing this cache
    pub fn loader(&self) -> &L {
        &self.loader
    }
}

/// Hand a failure shared by several callers back as an owned error
fn unshare_error(error: Arc<BgCutError>) -> BgCutError {
    Arc::try_unwrap(error).unwrap_or_else(|shared| match shared.as_ref() {
        BgCutError::Oracle { operation, message } => {
            BgCutError::oracle(operation.as_str(), message.as_str())
        },
        other => BgCutError::oracle("load", other.to_string()),
    })
}
