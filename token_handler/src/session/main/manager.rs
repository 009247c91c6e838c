use std::sync::Arc;

use http::HeaderMap;
use tokio_util::sync::CancellationToken;

use super::{cookie::CookieCodec, keys::KeyPairSet, session::Session, sweeper::Sweeper};
use crate::oidc::OidcProvider;
use crate::session::{
    config::{SessionConfig, whole_secs},
    errors::SessionError,
    types::CookiePayload,
};
use crate::storage::SessionStore;

/// Collaborators every [`Session`] of a manager shares.
pub(crate) struct SessionContext {
    pub(super) store: Arc<dyn SessionStore>,
    pub(super) codec: CookieCodec,
    pub(super) oidc: Arc<dyn OidcProvider>,
}

/// Process-lifetime owner of the cookie keys, the store handle and the
/// background sweep. The only factory for [`Session`] handles.
///
/// Cloning is cheap and clones share the same sweeper.
#[derive(Clone)]
pub struct SessionManager {
    context: Arc<SessionContext>,
    sweeper: Arc<Sweeper>,
}

impl SessionManager {
    /// Validates the configuration and key sizes, then starts the sweeper.
    ///
    /// Fails with [`SessionError::Configuration`] outside a Tokio runtime.
    /// The sweeper stops when `shutdown` is cancelled,
    /// [`SessionManager::shutdown`] is called, or the last clone is dropped.
    pub fn new(
        config: SessionConfig,
        store: Arc<dyn SessionStore>,
        oidc: Arc<dyn OidcProvider>,
        shutdown: CancellationToken,
    ) -> Result<Self, SessionError> {
        config.validate()?;
        let keys = KeyPairSet::new(config.current_keys.clone(), config.previous_keys.clone())?;
        let codec = CookieCodec::new(
            &config.cookie_name,
            &config.cookie_domain,
            &keys,
            whole_secs(config.login_timeout),
            whole_secs(config.session_timeout),
        );
        let sweeper = Sweeper::new(
            store.clone(),
            config.sweep_interval,
            config.session_timeout,
            shutdown.child_token(),
        );

        let manager = Self {
            context: Arc::new(SessionContext { store, codec, oidc }),
            sweeper: Arc::new(sweeper),
        };
        manager.start_sweeper()?;

        tracing::info!(
            cookie = %config.cookie_name,
            previous_keys = keys.previous().is_some(),
            "Session manager ready"
        );
        Ok(manager)
    }

    /// A handle with no cookie behind it. Never reuses request state.
    pub fn new_session(&self) -> Session {
        Session::new(self.context.clone(), None)
    }

    /// Opens the session named by the request's cookie.
    ///
    /// Without a cookie the handle is anonymous. A pending-login cookie is
    /// returned without a store lookup; an authenticated one has its record
    /// loaded.
    pub async fn get_session(&self, headers: &HeaderMap) -> Result<Session, SessionError> {
        let codec = &self.context.codec;
        let Some(value) = codec.read(headers) else {
            tracing::debug!("No session cookie in request");
            return Ok(self.new_session());
        };

        let payload = codec
            .decode(&value, chrono::Utc::now())
            .map_err(SessionError::CookieRead)?;

        let authenticated = matches!(payload, CookiePayload::Authenticated { .. });
        let mut session = Session::new(self.context.clone(), Some(payload));
        if authenticated {
            session.data_from_store().await?;
        }
        Ok(session)
    }

    pub fn oidc(&self) -> &Arc<dyn OidcProvider> {
        &self.context.oidc
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.context.store
    }

    pub fn cookie_name(&self) -> &str {
        self.context.codec.name()
    }

    /// `Set-Cookie` headers that make the browser drop the session cookie,
    /// for requests whose cookie no longer names a live session.
    pub fn expired_cookie(&self) -> Result<HeaderMap, SessionError> {
        self.context
            .codec
            .set_cookie_header("", -1)
            .map_err(SessionError::CookieWrite)
    }

    /// Starts the sweep loop unless it already runs. Returns whether this
    /// call started it; fails outside a Tokio runtime.
    pub fn start_sweeper(&self) -> Result<bool, SessionError> {
        self.sweeper.start()
    }

    /// Blocks until the sweep loop has exited. Any clone may wait, and all
    /// of them return only once a purge in flight has finished.
    pub async fn wait_sweeper(&self) {
        self.sweeper.wait().await;
    }

    /// Stops the sweep loop and waits for it.
    pub async fn shutdown(&self) {
        self.sweeper.stop();
        self.sweeper.wait().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{AuthState, KeyError, KeyPair, KeySlot, errors::CookieError};
    use crate::test_utils::{MockOidcProvider, memory_store, test_config};
    use crate::storage::{SessionRecord, StoreError};
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use http::header::{COOKIE, SET_COOKIE};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    /// Store whose purge takes a while, reporting whether one is running.
    #[derive(Default)]
    struct SlowPurgeStore {
        purging: AtomicBool,
        finished: AtomicUsize,
    }

    #[async_trait]
    impl SessionStore for SlowPurgeStore {
        async fn add(&self, _: &SessionRecord) -> Result<String, StoreError> {
            unimplemented!()
        }
        async fn get(&self, _: &str) -> Result<SessionRecord, StoreError> {
            Err(StoreError::NotFound)
        }
        async fn update(&self, _: &str, _: &SessionRecord) -> Result<(), StoreError> {
            unimplemented!()
        }
        async fn delete(&self, _: &str) -> Result<(), StoreError> {
            Ok(())
        }
        async fn purge(&self, _: DateTime<Utc>) -> Result<u64, StoreError> {
            self.purging.store(true, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(500)).await;
            self.purging.store(false, Ordering::SeqCst);
            self.finished.fetch_add(1, Ordering::SeqCst);
            Ok(0)
        }
        async fn close(&self) {}
    }

    async fn manager_with(config: SessionConfig) -> Result<SessionManager, SessionError> {
        SessionManager::new(
            config,
            memory_store().await,
            Arc::new(MockOidcProvider::new()),
            CancellationToken::new(),
        )
    }

    fn request_with_cookie(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, value.parse().unwrap());
        headers
    }

    fn cookie_pair(headers: &HeaderMap) -> String {
        let set_cookie = headers.get(SET_COOKIE).unwrap().to_str().unwrap();
        set_cookie.split(';').next().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_invalid_keys_fail_at_startup() {
        let mut config = test_config();
        config.current_keys = KeyPair::new(vec![0u8; 20], Vec::new());
        assert!(matches!(
            manager_with(config).await,
            Err(SessionError::InvalidKeySize(KeyError::WrongAuthSecretSize {
                slot: KeySlot::Current,
                len: 20
            }))
        ));

        let mut config = test_config();
        config.previous_keys = Some(KeyPair::new(vec![0u8; 32], vec![0u8; 10]));
        assert!(matches!(
            manager_with(config).await,
            Err(SessionError::InvalidKeySize(KeyError::WrongEncSecretSize {
                slot: KeySlot::Previous,
                len: 10
            }))
        ));
    }

    #[tokio::test]
    async fn test_get_session_without_cookie_is_anonymous() {
        let manager = manager_with(test_config()).await.unwrap();
        let mut session = manager.get_session(&HeaderMap::new()).await.unwrap();

        assert_eq!(session.state(), AuthState::Anonymous);
        assert!(matches!(
            session.data_from_store().await,
            Err(SessionError::SessionInvalid)
        ));
    }

    #[tokio::test]
    async fn test_expired_cookie_clears_named_cookie() {
        let manager = manager_with(test_config()).await.unwrap();

        let headers = manager.expired_cookie().unwrap();

        let set_cookie = headers.get(SET_COOKIE).unwrap().to_str().unwrap();
        assert!(set_cookie.starts_with("session=;"));
        assert!(set_cookie.contains("Max-Age=-1"));
    }

    #[tokio::test]
    async fn test_get_session_with_garbage_cookie_is_cookie_read() {
        let manager = manager_with(test_config()).await.unwrap();
        let result = manager
            .get_session(&request_with_cookie("session=forged.value.here"))
            .await;
        assert!(matches!(result, Err(SessionError::CookieRead(_))));

        // Other cookies do not matter
        let session = manager
            .get_session(&request_with_cookie("theme=dark"))
            .await
            .unwrap();
        assert_eq!(session.state(), AuthState::Anonymous);
    }

    #[tokio::test]
    async fn test_new_session_never_reuses_cookie_state() {
        let manager = manager_with(test_config()).await.unwrap();
        let mut pending = manager.new_session();
        let headers = pending.save_state("abc").unwrap();
        let request = request_with_cookie(&cookie_pair(&headers));

        let existing = manager.get_session(&request).await.unwrap();
        assert_eq!(existing.get_state(), "abc");

        let fresh = manager.new_session();
        assert_eq!(fresh.state(), AuthState::Anonymous);
        assert_eq!(fresh.get_state(), "");
    }

    #[tokio::test]
    async fn test_cookies_survive_key_rotation() {
        // Given a session created under the old keys
        let old_keys = KeyPair::new(vec![1u8; 32], vec![1u8; 32]);
        let new_keys = KeyPair::new(vec![2u8; 64], vec![2u8; 16]);
        let store = memory_store().await;
        let oidc = Arc::new(MockOidcProvider::new());

        let mut config = test_config();
        config.current_keys = old_keys.clone();
        let before =
            SessionManager::new(config, store.clone(), oidc.clone(), CancellationToken::new())
                .unwrap();
        let mut session = before.new_session();
        let headers = session
            .save(&MockOidcProvider::token_set("alice", 3600))
            .await
            .unwrap();
        let request = request_with_cookie(&cookie_pair(&headers));

        // When the keys are rotated
        let mut config = test_config();
        config.current_keys = new_keys.clone();
        config.previous_keys = Some(old_keys);
        let after =
            SessionManager::new(config, store.clone(), oidc.clone(), CancellationToken::new())
                .unwrap();

        // Then the old cookie still opens the session
        let reopened = after.get_session(&request).await.unwrap();
        assert_eq!(reopened.data().unwrap().subject, "alice");

        // But not once the old pair is retired
        let mut config = test_config();
        config.current_keys = new_keys;
        let retired =
            SessionManager::new(config, store, oidc, CancellationToken::new()).unwrap();
        assert!(matches!(
            retired.get_session(&request).await,
            Err(SessionError::CookieRead(CookieError::InvalidSignature))
        ));
    }

    #[tokio::test]
    async fn test_expired_login_cookie_is_rejected() {
        let mut config = test_config();
        config.login_timeout = Duration::from_secs(1);
        let manager = manager_with(config).await.unwrap();

        let mut session = manager.new_session();
        let headers = session.save_state("abc").unwrap();
        tokio::time::sleep(Duration::from_millis(2100)).await;

        assert!(matches!(
            manager
                .get_session(&request_with_cookie(&cookie_pair(&headers)))
                .await,
            Err(SessionError::CookieRead(CookieError::Expired))
        ));
    }

    #[tokio::test]
    async fn test_single_sweeper_per_manager() {
        let manager = manager_with(test_config()).await.unwrap();
        assert!(!manager.start_sweeper().unwrap());
        assert!(!manager.clone().start_sweeper().unwrap());

        tokio::time::timeout(Duration::from_secs(5), manager.shutdown())
            .await
            .expect("sweeper stops");
    }

    #[tokio::test]
    async fn test_process_cancellation_stops_sweeper() {
        let shutdown = CancellationToken::new();
        let manager = SessionManager::new(
            test_config(),
            memory_store().await,
            Arc::new(MockOidcProvider::new()),
            shutdown.clone(),
        )
        .unwrap();

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(5), manager.wait_sweeper())
            .await
            .expect("sweeper stops on process cancellation");
        manager.store().close().await;
    }

    #[test]
    fn test_new_outside_runtime_is_configuration_error() {
        let result = SessionManager::new(
            test_config(),
            Arc::new(SlowPurgeStore::default()),
            Arc::new(MockOidcProvider::new()),
            CancellationToken::new(),
        );

        assert!(matches!(result, Err(SessionError::Configuration(_))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_every_clone_waits_for_purge_in_flight() {
        // Given a manager whose sweeper is inside a slow purge
        let store = Arc::new(SlowPurgeStore::default());
        let mut config = test_config();
        config.sweep_interval = Duration::from_secs(1);
        let first = SessionManager::new(
            config,
            store.clone(),
            Arc::new(MockOidcProvider::new()),
            CancellationToken::new(),
        )
        .unwrap();
        let second = first.clone();
        tokio::time::timeout(Duration::from_secs(5), async {
            while !store.purging.load(Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("purge starts");

        // When one clone shuts down while another waits
        tokio::time::timeout(Duration::from_secs(5), async {
            tokio::join!(first.shutdown(), second.wait_sweeper());
        })
        .await
        .expect("sweeper stops");

        // Then neither returned before the purge finished
        assert!(!store.purging.load(Ordering::SeqCst));
        assert_eq!(store.finished.load(Ordering::SeqCst), 1);

        // And later waits return at once
        tokio::time::timeout(Duration::from_millis(100), second.wait_sweeper())
            .await
            .expect("already stopped");
    }

    #[tokio::test]
    async fn test_dropping_last_clone_stops_sweeper() {
        // Given a manager and a clone, with the process token never cancelled
        let store = memory_store().await;
        let manager = SessionManager::new(
            test_config(),
            store.clone(),
            Arc::new(MockOidcProvider::new()),
            CancellationToken::new(),
        )
        .unwrap();
        let clone = manager.clone();

        // When every owner is dropped
        drop(manager);
        drop(clone);

        // Then the sweep task lets go of the store
        tokio::time::timeout(Duration::from_secs(5), async {
            while Arc::strong_count(&store) > 1 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("sweep task released the store");
    }
}
