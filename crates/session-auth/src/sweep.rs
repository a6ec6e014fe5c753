//! Background pruning of expired sessions
//!
//! Browsers drop expired cookies on their own; server-held credentials need an
//! explicit sweep or abandoned sessions accumulate forever. The task runs
//! independently of the request path.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::credentials::now_millis;
use crate::store::SessionStore;

/// Spawn a background task that purges fully expired sessions every `interval`.
///
/// Store errors are logged and the next tick tries again.
pub fn spawn_sweeper(
    store: Arc<dyn SessionStore>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // Skip the immediate first tick; nothing has had time to expire
        ticker.tick().await;

        loop {
            ticker.tick().await;
            sweep_once(store.as_ref()).await;
        }
    })
}

async fn sweep_once(store: &dyn SessionStore) {
    match store.purge_expired(now_millis()).await {
        Ok(0) => debug!(backend = store.kind(), "no expired sessions"),
        Ok(purged) => info!(backend = store.kind(), purged, "purged expired sessions"),
        Err(e) => warn!(backend = store.kind(), error = %e, "session sweep failed, will retry next cycle"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::{Credential, SessionId};
    use crate::store::MemoryStore;
    use common::Secret;

    #[tokio::test(start_paused = true)]
    async fn sweeper_purges_after_first_interval() {
        let memory = Arc::new(MemoryStore::new());
        memory
            .save(
                &SessionId::generate(),
                Credential {
                    access_token: Secret::new("at".into()),
                    refresh_token: Secret::new("rt".into()),
                    access_expires_at: 1,
                    refresh_expires_at: 1,
                },
            )
            .await
            .unwrap();

        let handle = spawn_sweeper(memory.clone(), Duration::from_secs(60));

        // Nothing happens on the skipped first tick
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(memory.len().await, 1);

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert!(memory.is_empty().await);

        handle.abort();
    }
}
