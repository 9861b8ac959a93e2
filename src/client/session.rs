/**
 * Session Module
 *
 * A `Session` is an explicit value created at login and invalidated at
 * logout. The sync façade and mutation coordinator receive it at
 * construction and refuse to operate once it has been invalidated.
 *
 * Login reads the login entity `ZQM_LOG_PR(bname='..',password='..')`. When
 * the login service cannot be reached or has no entity for the pair (404),
 * the configured offline credentials are checked instead and a match is
 * marked `Offline`.
 */

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::client::remote::{BasicAuth, RemoteServiceClient, RequestContext};
use crate::shared::collection::CollectionName;
use crate::shared::config::{AppConfig, CollectionConfig, DerivedRules};
use crate::shared::error::{SyncError, SyncResult};

/// How the session was established
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMode {
    /// Verified by the login service
    Remote,
    /// Accepted from offline credentials while the login service was down
    Offline,
    /// Demo session without credentials
    Demo,
}

#[derive(Debug)]
struct SessionInner {
    id: Uuid,
    username: String,
    display_name: String,
    mode: SessionMode,
    created_at: DateTime<Utc>,
    auth: Option<BasicAuth>,
    active: AtomicBool,
}

/// Authenticated user session. Clones share their lifecycle.
#[derive(Debug, Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    pub fn new(
        username: impl Into<String>,
        display_name: impl Into<String>,
        mode: SessionMode,
        auth: Option<BasicAuth>,
    ) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                id: Uuid::new_v4(),
                username: username.into(),
                display_name: display_name.into(),
                mode,
                created_at: Utc::now(),
                auth,
                active: AtomicBool::new(true),
            }),
        }
    }

    /// Session for the demo user
    pub fn demo() -> Self {
        Self::new("demo", "Demo User", SessionMode::Demo, None)
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn username(&self) -> &str {
        &self.inner.username
    }

    pub fn display_name(&self) -> &str {
        &self.inner.display_name
    }

    pub fn mode(&self) -> SessionMode {
        self.inner.mode
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.inner.created_at
    }

    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::SeqCst)
    }

    /// Fail with `NotAuthenticated` once the session has ended
    pub fn ensure_active(&self) -> SyncResult<()> {
        if self.is_active() {
            Ok(())
        } else {
            Err(SyncError::NotAuthenticated)
        }
    }

    /// Request settings carrying this session's credentials
    pub fn request(&self, deadline: Duration) -> RequestContext {
        RequestContext::new(deadline).with_auth(self.inner.auth.clone())
    }

    fn invalidate(&self) {
        self.inner.active.store(false, Ordering::SeqCst);
    }
}

/// Creates and ends sessions
pub struct SessionManager {
    config: AppConfig,
    client: Arc<dyn RemoteServiceClient>,
    current: RwLock<Option<Session>>,
}

impl SessionManager {
    pub fn new(config: AppConfig, client: Arc<dyn RemoteServiceClient>) -> Self {
        Self {
            config,
            client,
            current: RwLock::new(None),
        }
    }

    fn login_target(&self) -> CollectionConfig {
        CollectionConfig {
            name: CollectionName::new("login"),
            service: self.config.login.service.clone(),
            entity_set: self.config.login.entity_set.clone(),
            key_field: "bname".to_string(),
            base_url: None,
            decimal_fields: Vec::new(),
            date_fields: Vec::new(),
            derived: DerivedRules::None,
            quantity: None,
            required_on_insert: Vec::new(),
            fallback: false,
            fallback_count: None,
        }
    }

    /// Log in against the login service, falling back to offline
    /// credentials when the service cannot be reached or does not know the
    /// pair.
    pub async fn login(&self, username: &str, password: &str, deadline: Duration) -> SyncResult<Session> {
        if username.trim().is_empty() || password.is_empty() {
            return Err(SyncError::validation(
                "credentials",
                "Please enter both username and password",
            ));
        }

        let auth = BasicAuth {
            username: username.to_string(),
            password: password.to_string(),
        };
        let keys = vec![
            ("bname".to_string(), username.to_string()),
            ("password".to_string(), password.to_string()),
        ];
        let ctx = RequestContext::new(deadline).with_auth(Some(auth.clone()));

        let session = match self.client.read_entity(&self.login_target(), &keys, &ctx).await {
            Ok(Some(record)) => match record.text("bname").filter(|b| !b.trim().is_empty()) {
                Some(bname) => {
                    tracing::info!("[Session] Login successful for {}", bname);
                    Session::new(bname, bname, SessionMode::Remote, Some(auth))
                }
                None => return Err(SyncError::validation("credentials", "Invalid credentials")),
            },
            // The login entity answers 404 for an unknown pair; like an
            // unreachable service it falls through to the offline list
            Ok(None) => {
                tracing::info!("[Session] No login entity for {}, trying offline credentials", username);
                self.offline_login(username, auth)?
            }
            Err(err) => {
                tracing::warn!("[Session] Login service unavailable ({}), trying offline credentials", err);
                self.offline_login(username, auth)?
            }
        };

        self.replace(session.clone()).await;
        Ok(session)
    }

    fn offline_login(&self, username: &str, auth: BasicAuth) -> SyncResult<Session> {
        let known = self
            .config
            .login
            .offline_users
            .iter()
            .any(|u| u.username == username && u.password == auth.password);
        if !known {
            return Err(SyncError::validation(
                "credentials",
                "Authentication failed. Please check your credentials.",
            ));
        }
        Ok(Session::new(username, username, SessionMode::Offline, Some(auth)))
    }

    /// Start a demo session without contacting the login service
    pub async fn demo_login(&self) -> Session {
        let session = Session::demo();
        self.replace(session.clone()).await;
        tracing::info!("[Session] Demo login");
        session
    }

    /// End the current session
    pub async fn logout(&self) {
        if let Some(session) = self.current.write().await.take() {
            session.invalidate();
            tracing::info!("[Session] {} logged out", session.username());
        }
    }

    pub async fn current(&self) -> Option<Session> {
        self.current.read().await.clone()
    }

    async fn replace(&self, session: Session) {
        if let Some(previous) = self.current.write().await.replace(session) {
            previous.invalidate();
        }
    }
}
