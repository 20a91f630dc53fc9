use std::collections::HashMap;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use log::trace;
use parking_lot::Mutex;

use crate::cache::{normalize, StatusCache};
use crate::remote::StatusStore;
use crate::status::StatusCode;

type InFlight = Shared<BoxFuture<'static, Option<StatusCode>>>;

/// Cache-first status resolution.
///
/// Concurrent misses for the same player share one remote fetch. A failed
/// fetch is not cached so the next lookup retries.
#[derive(Clone)]
pub struct StatusLookup {
    cache: Arc<StatusCache>,
    store: Arc<dyn StatusStore>,
    in_flight: Arc<Mutex<HashMap<String, InFlight>>>,
}

impl StatusLookup {
    pub fn new(cache: Arc<StatusCache>, store: Arc<dyn StatusStore>) -> Self {
        Self {
            cache,
            store,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn cache(&self) -> &Arc<StatusCache> {
        &self.cache
    }

    pub async fn status_of(&self, username: &str) -> Option<StatusCode> {
        if let Some(status) = self.cache.get(username) {
            return Some(status);
        }

        let key = normalize(username);
        let fetch = {
            let mut in_flight = self.in_flight.lock();
            match in_flight.get(&key) {
                Some(pending) => {
                    trace!("joining in-flight lookup for {}", key);
                    pending.clone()
                }
                None => {
                    let store = Arc::clone(&self.store);
                    let cache = Arc::clone(&self.cache);
                    let registry = Arc::clone(&self.in_flight);
                    let name = key.clone();
                    let fut = async move {
                        let result = store.resolve(&name).await;
                        if let Some(status) = result {
                            cache.put(&name, status);
                        }
                        registry.lock().remove(&name);
                        result
                    }
                    .boxed()
                    .shared();
                    in_flight.insert(key, fut.clone());
                    fut
                }
            }
        };
        fetch.await
    }
}
