//! Login, logout and token refresh

use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tracing::{debug, info, warn};
use upkeep_core::{CredentialPair, SessionProfile, SessionState, StoreKeys, store};

use super::error::ClientError;
use super::events::{LogoutReason, SessionEvent};
use super::request::RequestOptions;
use super::response::{ParsedBody, unwrap_envelope};
use super::{Inner, SessionManager};

#[derive(Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

/// Token grant returned by the login and refresh endpoints
#[derive(Deserialize)]
struct TokenResponse {
    #[serde(alias = "accessToken", alias = "access_token")]
    token: String,
    #[serde(default, rename = "refreshToken", alias = "refresh_token")]
    refresh_token: Option<String>,
    #[serde(default)]
    user: Option<SessionProfile>,
}

impl TokenResponse {
    fn parse(value: JsonValue) -> Result<Self, ClientError> {
        Ok(serde_json::from_value(unwrap_envelope(value))?)
    }

    /// Split into the credential pair and any profile the server included.
    /// A grant without a refresh token keeps `previous`.
    fn into_parts(self, previous: Option<&str>) -> (CredentialPair, Option<SessionProfile>) {
        let refresh_token = self
            .refresh_token
            .filter(|t| !t.is_empty())
            .or_else(|| previous.map(str::to_string))
            .unwrap_or_default();
        (CredentialPair::new(self.token, refresh_token), self.user)
    }
}

impl SessionManager {
    /// Exchange a username and password for a token pair.
    ///
    /// On success the pair is persisted, the profile is loaded and
    /// [`SessionEvent::LoggedIn`] is broadcast.
    ///
    /// # Errors
    ///
    /// Returns the server's rejection (`AuthenticationFailed` for bad
    /// credentials), a connectivity error, or `Storage` if the pair could
    /// not be persisted
    pub async fn login(&self, username: &str, password: &str) -> Result<(), ClientError> {
        self.inner.login(username, password).await
    }

    /// End the session. Never fails and is safe to call repeatedly.
    ///
    /// The server is notified best-effort while a token is held; local
    /// state is cleared regardless of its answer.
    pub async fn logout(&self) {
        self.inner.end_session(LogoutReason::UserRequested).await;
    }

    /// Force a refresh, joining one already in flight.
    ///
    /// Returns the new access token, or `None` if the refresh failed and
    /// the session was ended.
    pub async fn refresh(&self) -> Option<String> {
        let inner = Arc::clone(&self.inner);
        self.inner
            .refresh
            .run(move || inner.run_refresh())
            .await
            .flatten()
    }
}

impl Inner {
    async fn login(&self, username: &str, password: &str) -> Result<(), ClientError> {
        self.set_state(SessionState::Authenticating);
        match self.begin_session(username, password).await {
            Ok(()) => {
                info!(username, "logged in");
                self.emit(SessionEvent::LoggedIn);
                Ok(())
            }
            Err(err) => {
                warn!(username, error = %err, "login failed");
                let mut session = self.write();
                session.state = if session.credentials.is_some() {
                    SessionState::Authenticated
                } else {
                    SessionState::Anonymous
                };
                Err(err)
            }
        }
    }

    async fn begin_session(&self, username: &str, password: &str) -> Result<(), ClientError> {
        let options = RequestOptions::post_json(&LoginRequest { username, password })?;
        let response = self.send(&self.endpoints.login, &options, None).await?;
        let (credentials, profile) = self.read_grant(response).await?.into_parts(None);
        if credentials.refresh_token.is_empty() {
            warn!("login grant has no refresh token; session ends when the access token expires");
        }

        store::save_credentials(self.store.as_ref(), &credentials).await?;
        let access_token = credentials.access_token.clone();
        let epoch = {
            let mut session = self.write();
            session.epoch = session.epoch.wrapping_add(1);
            session.credentials = Some(credentials);
            session.profile = profile;
            session.state = SessionState::Authenticated;
            session.epoch
        };

        self.rebuild_profile(&access_token, epoch).await;
        Ok(())
    }

    /// Refresh unless the token that failed has already been replaced.
    ///
    /// Joins a refresh in flight. Returns the token to retry with, or
    /// `None` if the session is gone.
    pub(super) async fn refresh_after(self: &Arc<Self>, stale: &str) -> Option<String> {
        let inner = Arc::clone(self);
        self.refresh
            .join_or(
                || match self.current_access_token() {
                    None => Some(None),
                    Some(current) if current != stale => Some(Some(current)),
                    Some(_) => None,
                },
                move || inner.run_refresh(),
            )
            .outcome()
            .await
            .flatten()
    }

    async fn run_refresh(self: Arc<Self>) -> Option<String> {
        let epoch = {
            let mut session = self.write();
            session.state = SessionState::Refreshing;
            session.epoch
        };
        debug!("refreshing session");

        let exchanged = tokio::time::timeout(self.refresh_timeout, self.exchange_refresh_token())
            .await
            .unwrap_or(Err(ClientError::Timeout(self.refresh_timeout)));
        let credentials = match exchanged {
            Ok(credentials) => credentials,
            Err(err) => {
                let unchanged = self.read().epoch == epoch;
                if unchanged {
                    warn!(error = %err, "token refresh failed, ending session");
                    self.end_session_detached(LogoutReason::RefreshFailed).await;
                    return None;
                }
                debug!(error = %err, "refresh failed after the session changed");
                return self.current_access_token();
            }
        };

        if self.read().epoch != epoch {
            debug!("session changed during refresh, discarding grant");
            return self.current_access_token();
        }
        if let Err(err) = store::save_credentials(self.store.as_ref(), &credentials).await {
            warn!(error = %err, "could not persist refreshed tokens, ending session");
            self.end_session_detached(LogoutReason::RefreshFailed).await;
            return None;
        }

        let access_token = credentials.access_token.clone();
        let committed = {
            let mut session = self.write();
            if session.epoch == epoch {
                session.credentials = Some(credentials);
                session.state = SessionState::Authenticated;
                true
            } else {
                false
            }
        };
        if !committed {
            debug!("session changed while persisting refresh, restoring store");
            self.resync_store().await;
            return self.current_access_token();
        }

        info!("session refreshed");
        self.emit(SessionEvent::Refreshed);

        // Waiters resume with the new token; the profile catches up behind them
        let inner = Arc::clone(&self);
        let token = access_token.clone();
        tokio::spawn(async move { inner.rebuild_profile(&token, epoch).await });
        Some(access_token)
    }

    async fn exchange_refresh_token(&self) -> Result<CredentialPair, ClientError> {
        let held = self
            .read()
            .credentials
            .as_ref()
            .map(|c| c.refresh_token.clone());
        let refresh_token = match held {
            Some(token) => Some(token),
            None => store::load_credentials(self.store.as_ref())
                .await?
                .map(|c| c.refresh_token),
        }
        .filter(|token| !token.is_empty())
        .ok_or(ClientError::SessionEnded)?;

        let options = RequestOptions::post_json(&RefreshRequest {
            refresh_token: &refresh_token,
        })?;
        let response = self.send(&self.endpoints.refresh, &options, None).await?;
        let (credentials, _) = self
            .read_grant(response)
            .await?
            .into_parts(Some(&refresh_token));
        Ok(credentials)
    }

    async fn read_grant(&self, response: reqwest::Response) -> Result<TokenResponse, ClientError> {
        match Self::into_body(response, self.request_timeout).await? {
            ParsedBody::Json(value) => TokenResponse::parse(value),
            _ => Err(ClientError::AuthenticationFailed(
                "response carried no token".into(),
            )),
        }
    }

    /// Reload the cached profile; on failure the previous copy stays
    async fn rebuild_profile(&self, access_token: &str, epoch: u64) {
        let fetched = self.fetch_profile(access_token).await;
        let profile = {
            let mut session = self.write();
            if session.epoch != epoch {
                return;
            }
            match fetched {
                Ok(profile) => {
                    session.profile = Some(profile.clone());
                    profile
                }
                Err(err) => {
                    warn!(error = %err, "could not load profile, keeping cached copy");
                    match session.profile.clone() {
                        Some(profile) => profile,
                        None => return,
                    }
                }
            }
        };
        if let Err(err) = store::save_profile(self.store.as_ref(), &profile).await {
            warn!(error = %err, "could not persist profile");
        }
    }

    async fn fetch_profile(&self, access_token: &str) -> Result<SessionProfile, ClientError> {
        let response = self
            .send(&self.endpoints.profile, &RequestOptions::get(), Some(access_token))
            .await?;
        let value: JsonValue = Self::into_body(response, self.request_timeout)
            .await?
            .unwrap()?;
        let value = match value {
            JsonValue::Object(mut map) if map.get("user").is_some_and(JsonValue::is_object) => {
                map.remove("user").unwrap_or(JsonValue::Null)
            }
            other => other,
        };
        Ok(serde_json::from_value(value)?)
    }

    /// Clear the session everywhere and notify the server if a token is held
    pub(super) async fn end_session(&self, reason: LogoutReason) {
        if let Some(token) = self.clear_session(reason).await {
            self.notify_logout(&token).await;
        }
    }

    /// Like [`Inner::end_session`], but the server notice runs on its own
    /// task so refresh waiters are released as soon as local state is gone
    async fn end_session_detached(self: &Arc<Self>, reason: LogoutReason) {
        if let Some(token) = self.clear_session(reason).await {
            let inner = Arc::clone(self);
            tokio::spawn(async move { inner.notify_logout(&token).await });
        }
    }

    /// Drop the session from memory and durable storage.
    ///
    /// Returns the access token that was held, if any, so the caller can
    /// tell the server.
    async fn clear_session(&self, reason: LogoutReason) -> Option<String> {
        let held = {
            let mut session = self.write();
            session.epoch = session.epoch.wrapping_add(1);
            session.state = SessionState::Anonymous;
            session.profile = None;
            session.credentials.take()
        };
        let token = match held {
            Some(credentials) => Some(credentials.access_token),
            None => match store::load_credentials(self.store.as_ref()).await {
                Ok(stored) => stored.map(|c| c.access_token),
                Err(err) => {
                    warn!(error = %err, "could not read stored credentials during logout");
                    None
                }
            },
        };

        self.clear_store().await;
        if token.is_some() {
            info!(?reason, "session ended");
            self.emit(SessionEvent::LoggedOut { reason });
        }
        token
    }

    /// Wipe the store, falling back to removing the credential keys one by
    /// one so a failed wipe cannot resurrect the session on the next start
    async fn clear_store(&self) {
        let Err(err) = self.store.clear().await else {
            return;
        };
        warn!(error = %err, "could not clear credential store, removing credentials");
        for key in [
            StoreKeys::ACCESS_TOKEN,
            StoreKeys::REFRESH_TOKEN,
            StoreKeys::PROFILE,
        ] {
            if let Err(err) = self.store.remove(key).await {
                warn!(key, error = %err, "could not remove stored credential");
            }
        }
    }

    async fn notify_logout(&self, token: &str) {
        let options = RequestOptions::new(Method::POST);
        match self.send(&self.endpoints.logout, &options, Some(token)).await {
            Ok(response) if response.status().is_success() => {
                debug!("server acknowledged logout");
            }
            Ok(response) => {
                debug!(status = %response.status(), "server did not acknowledge logout");
            }
            Err(err) => {
                warn!(error = %err, "could not notify server of logout");
            }
        }
    }

    /// Make the store match memory after a refresh lost a race
    async fn resync_store(&self) {
        let held = self.read().credentials.clone();
        let result = match held {
            Some(credentials) => store::save_credentials(self.store.as_ref(), &credentials).await,
            None => {
                self.clear_store().await;
                Ok(())
            }
        };
        if let Err(err) = result {
            warn!(error = %err, "could not resync credential store");
        }
    }
}
