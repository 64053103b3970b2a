//! Keyed single-flight registry
//!
//! At most one operation runs per key. Callers arriving while it is in flight
//! await the same shared future and all receive a clone of its outcome. The
//! slot is released when the operation completes, successfully or not.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tracing::trace;

use crate::errors::AutoCertError;

type Flight<T> = Shared<BoxFuture<'static, Result<T, AutoCertError>>>;

pub(crate) struct Flights<T> {
    inflight: Arc<Mutex<HashMap<String, Flight<T>>>>,
}

impl<T> Flights<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub(crate) fn new() -> Self {
        Self {
            inflight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Join the flight for `key`, starting it with `start` if none is running
    pub(crate) async fn run<S, F>(&self, key: &str, start: S) -> Result<T, AutoCertError>
    where
        S: FnOnce() -> F,
        F: Future<Output = Result<T, AutoCertError>> + Send + 'static,
    {
        let flight = {
            let mut inflight = self.inflight.lock();
            match inflight.get(key) {
                Some(existing) => {
                    trace!(key = %key, "Joining in-flight operation");
                    existing.clone()
                }
                None => {
                    let registry = Arc::clone(&self.inflight);
                    let owned_key = key.to_string();
                    let operation = start();
                    let flight = async move {
                        let result = operation.await;
                        registry.lock().remove(&owned_key);
                        result
                    }
                    .boxed()
                    .shared();
                    inflight.insert(key.to_string(), flight.clone());
                    flight
                }
            }
        };

        flight.await
    }

    /// Number of operations currently in flight
    pub(crate) fn len(&self) -> usize {
        self.inflight.lock().len()
    }
}
