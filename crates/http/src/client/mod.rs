//! Authenticated client for the Upkeep REST backend
//!
//! [`SessionManager`] owns the token pair, attaches it to every call and
//! hides access-token expiry from callers: a `401` triggers one shared
//! refresh and a single retry of the original request.

pub mod auth;
pub mod error;
pub mod events;
pub mod request;
pub mod resources;
pub mod response;
pub mod single_flight;

use error::ClientError;
use events::SessionEvent;
use request::{RequestBody, RequestOptions};
use response::ParsedBody;
use single_flight::SingleFlight;

use reqwest::{Client, ClientBuilder, StatusCode, header};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, warn};
use upkeep_core::{
    ClientConfig, CredentialPair, CredentialStore, EndpointConfig, MemoryStore, SessionProfile,
    SessionState, store,
};

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_REFRESH_TIMEOUT: Duration = Duration::from_secs(10);
const EVENT_CAPACITY: usize = 16;

/// Session-owning API client.
///
/// Construct once at startup and hand clones to whatever needs the backend;
/// all clones share one session.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

pub(crate) struct Inner {
    http: Client,
    base_url: String,
    endpoints: EndpointConfig,
    request_timeout: Duration,
    refresh_timeout: Duration,
    store: Arc<dyn CredentialStore>,
    session: RwLock<Session>,
    refresh: SingleFlight<Option<String>>,
    events: broadcast::Sender<SessionEvent>,
}

#[derive(Default)]
struct Session {
    credentials: Option<CredentialPair>,
    profile: Option<SessionProfile>,
    state: SessionState,
    /// Bumped on login and logout; work started under an older epoch must
    /// not write its results back
    epoch: u64,
}

impl SessionManager {
    /// Create a new client builder
    pub fn builder() -> SessionManagerBuilder {
        SessionManagerBuilder::default()
    }

    /// Create a client from loaded configuration
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if the configuration is invalid or the HTTP
    /// client cannot be built
    pub fn from_config(
        config: &ClientConfig,
        store: Arc<dyn CredentialStore>,
    ) -> Result<Self, ClientError> {
        config
            .validate()
            .map_err(|e| ClientError::Configuration(e.to_string()))?;
        Self::builder()
            .base_url(&config.base_url)
            .endpoints(config.endpoints.clone())
            .request_timeout(config.request_timeout())
            .refresh_timeout(config.refresh_timeout())
            .user_agent(&config.user_agent)
            .store(store)
            .build()
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        &self.inner.base_url
    }

    pub fn state(&self) -> SessionState {
        self.inner.read().state
    }

    /// Cached profile of the signed-in user
    pub fn profile(&self) -> Option<SessionProfile> {
        self.inner.read().profile.clone()
    }

    /// Presentation-only permission check against the cached profile
    pub fn has_permission(&self, permission: &str) -> bool {
        self.inner
            .read()
            .profile
            .as_ref()
            .is_some_and(|p| p.has_permission(permission))
    }

    /// Receive login, refresh and logout notifications
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    /// Current access token, rehydrating from the credential store if the
    /// in-memory copy is absent
    ///
    /// # Errors
    ///
    /// Returns `Storage` if the credential store cannot be read
    pub async fn access_token(&self) -> Result<Option<String>, ClientError> {
        self.inner.resolve_access_token().await
    }

    /// Rehydrate a persisted session, typically once at startup
    ///
    /// # Errors
    ///
    /// Returns `Storage` if the credential store cannot be read
    pub async fn restore(&self) -> Result<bool, ClientError> {
        Ok(self.inner.resolve_access_token().await?.is_some())
    }

    /// Issue an authenticated request.
    ///
    /// A `401` response triggers the shared refresh and exactly one retry.
    /// Connectivity failures and every other status are returned as is.
    ///
    /// # Errors
    ///
    /// - `NotAuthenticated` if no credentials are held
    /// - `SessionEnded` if the refresh failed and the session was cleared
    /// - `Connectivity`, `Timeout` or `Cancelled` if no response arrived
    /// - a status-derived error carrying the server's message otherwise
    pub async fn request(
        &self,
        path: &str,
        options: RequestOptions,
    ) -> Result<ParsedBody, ClientError> {
        match options.cancel.clone() {
            Some(cancel) => tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    debug!(path, "request cancelled by caller");
                    Err(ClientError::Cancelled)
                }
                result = self.inner.authenticated(path, &options) => result,
            },
            None => self.inner.authenticated(path, &options).await,
        }
    }

    /// Authenticated GET
    ///
    /// # Errors
    ///
    /// See [`SessionManager::request`]
    pub async fn get(&self, path: &str) -> Result<ParsedBody, ClientError> {
        self.request(path, RequestOptions::get()).await
    }
}

impl Inner {
    fn read(&self) -> RwLockReadGuard<'_, Session> {
        self.session.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Session> {
        self.session.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    fn current_access_token(&self) -> Option<String> {
        self.read()
            .credentials
            .as_ref()
            .map(|c| c.access_token.clone())
    }

    fn set_state(&self, state: SessionState) {
        self.write().state = state;
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    async fn resolve_access_token(&self) -> Result<Option<String>, ClientError> {
        if let Some(token) = self.current_access_token() {
            return Ok(Some(token));
        }

        let epoch = self.read().epoch;
        let Some(credentials) = store::load_credentials(self.store.as_ref()).await? else {
            return Ok(None);
        };
        let profile = store::load_profile(self.store.as_ref())
            .await
            .unwrap_or_else(|err| {
                warn!(error = %err, "ignoring unreadable cached profile");
                None
            });

        let mut session = self.write();
        if session.epoch == epoch && session.credentials.is_none() {
            debug!("restored session from credential store");
            session.credentials = Some(credentials);
            session.profile = profile;
            session.state = SessionState::Authenticated;
        }
        Ok(session
            .credentials
            .as_ref()
            .map(|c| c.access_token.clone()))
    }

    async fn authenticated(
        self: &Arc<Self>,
        path: &str,
        options: &RequestOptions,
    ) -> Result<ParsedBody, ClientError> {
        let token = self
            .resolve_access_token()
            .await?
            .ok_or(ClientError::NotAuthenticated)?;

        let timeout = self.timeout_for(options);
        let response = self.send(path, options, Some(&token)).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Self::into_body(response, timeout).await;
        }

        debug!(path, "access token rejected, refreshing session");
        let fresh = self
            .refresh_after(&token)
            .await
            .ok_or(ClientError::SessionEnded)?;
        let retry = self.send(path, options, Some(&fresh)).await?;
        Self::into_body(retry, timeout).await
    }

    /// Send one request; never refreshes
    async fn send(
        &self,
        path: &str,
        options: &RequestOptions,
        token: Option<&str>,
    ) -> Result<reqwest::Response, ClientError> {
        let timeout = self.timeout_for(options);
        let mut request = self
            .http
            .request(options.method.clone(), self.url(path))
            .headers(options.headers.clone())
            .timeout(timeout);

        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        if options.needs_json_content_type() {
            request = request.header(header::CONTENT_TYPE, "application/json");
        }
        request = match &options.body {
            RequestBody::Empty => request,
            RequestBody::Json(value) => request.body(serde_json::to_vec(value)?),
            RequestBody::Text(text) => request.body(text.clone()),
            RequestBody::Multipart(form) => request.multipart(form.to_form()?),
        };

        let response = request
            .send()
            .await
            .map_err(|err| transport_error(err, timeout))?;
        debug!(method = %options.method, path, status = %response.status(), "request completed");
        Ok(response)
    }

    fn timeout_for(&self, options: &RequestOptions) -> Duration {
        options.timeout.unwrap_or(self.request_timeout)
    }

    /// Read the body, or turn a failure status into an error.
    /// `timeout` is the bound the request was sent with.
    async fn into_body(
        response: reqwest::Response,
        timeout: Duration,
    ) -> Result<ParsedBody, ClientError> {
        let status = response.status();
        if status.is_success() {
            let bytes = response
                .bytes()
                .await
                .map_err(|err| transport_error(err, timeout))?;
            Ok(ParsedBody::from_bytes(status, &bytes))
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(ClientError::from_response_body(status, &body))
        }
    }
}

fn transport_error(err: reqwest::Error, timeout: Duration) -> ClientError {
    if err.is_timeout() {
        ClientError::Timeout(timeout)
    } else {
        ClientError::Connectivity(err)
    }
}

/// Builder for [`SessionManager`]
#[derive(Default)]
pub struct SessionManagerBuilder {
    base_url: Option<String>,
    store: Option<Arc<dyn CredentialStore>>,
    endpoints: Option<EndpointConfig>,
    request_timeout: Option<Duration>,
    refresh_timeout: Option<Duration>,
    user_agent: Option<String>,
}

impl SessionManagerBuilder {
    /// Set the base URL
    #[must_use]
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Durable credential store; defaults to a process-local [`MemoryStore`]
    #[must_use]
    pub fn store(mut self, store: Arc<dyn CredentialStore>) -> Self {
        self.store = Some(store);
        self
    }

    #[must_use]
    pub fn endpoints(mut self, endpoints: EndpointConfig) -> Self {
        self.endpoints = Some(endpoints);
        self
    }

    /// Set the default per-request timeout
    #[must_use]
    pub const fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Upper bound on one refresh; exceeding it ends the session
    #[must_use]
    pub const fn refresh_timeout(mut self, timeout: Duration) -> Self {
        self.refresh_timeout = Some(timeout);
        self
    }

    /// Set the user agent
    #[must_use]
    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = Some(agent.into());
        self
    }

    /// Build the client
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if no base URL was given, or `Connectivity`
    /// if the underlying HTTP client cannot be initialized
    pub fn build(self) -> Result<SessionManager, ClientError> {
        let base_url = self
            .base_url
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| ClientError::Configuration("base_url is required".into()))?;

        // Ensure base_url ends without a trailing slash
        let base_url = base_url.trim_end_matches('/').to_string();

        let user_agent = self
            .user_agent
            .unwrap_or_else(|| concat!("upkeep-client/", env!("CARGO_PKG_VERSION")).to_string());
        let http = ClientBuilder::new().user_agent(user_agent).build()?;

        let store = self.store.unwrap_or_else(|| {
            debug!("no credential store configured, session will not persist");
            Arc::new(MemoryStore::new())
        });
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Ok(SessionManager {
            inner: Arc::new(Inner {
                http,
                base_url,
                endpoints: self.endpoints.unwrap_or_default(),
                request_timeout: self.request_timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT),
                refresh_timeout: self.refresh_timeout.unwrap_or(DEFAULT_REFRESH_TIMEOUT),
                store,
                session: RwLock::new(Session::default()),
                refresh: SingleFlight::new(),
                events,
            }),
        })
    }
}
