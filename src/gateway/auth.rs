//! Auth provider client.
//!
//! Wraps the hosted provider's credential endpoints and re-publishes
//! session transitions on a broadcast channel, the same way the provider's
//! own SDKs push auth events at their host application. Consumers mirror
//! state from two directions: the return value of an explicit action, and
//! the event channel — which can also fire on its own when the background
//! refresh task rotates the token.

use std::sync::{Arc, Mutex, Weak};

use chrono::Utc;
use serde_json::json;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{BearerToken, decode};
use crate::config::Config;
use crate::errors::GatewayError;
use crate::models::{Session, User};

/// How long before token expiry the background refresh fires.
const REFRESH_MARGIN_SECS: i64 = 60;

#[derive(Debug, Clone)]
pub enum AuthEvent {
    SignedIn { session: Session },
    SignedOut,
    TokenRefreshed { session: Session },
}

pub struct AuthClient {
    client: reqwest::Client,
    base_url: String,
    service_key: String,
    bearer: Arc<BearerToken>,
    events: broadcast::Sender<AuthEvent>,
    refresh_task: Mutex<Option<JoinHandle<()>>>,
    weak: Weak<Self>,
}

impl AuthClient {
    pub fn new(config: &Config, bearer: Arc<BearerToken>) -> Arc<Self> {
        let (events, _) = broadcast::channel(16);
        Arc::new_cyclic(|weak| Self {
            client: reqwest::Client::new(),
            base_url: config.service_url.clone(),
            service_key: config.service_key.clone(),
            bearer,
            events,
            refresh_task: Mutex::new(None),
            weak: weak.clone(),
        })
    }

    /// Subscribe to provider auth events (sign-in, sign-out, token refresh).
    pub fn events(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }

    /// Register a new account. The returned user may still need email
    /// confirmation before it can sign in; no session is created here.
    pub async fn sign_up(
        &self,
        email: &str,
        password: &str,
        full_name: Option<&str>,
    ) -> Result<User, GatewayError> {
        let resp = self
            .client
            .post(format!("{}/auth/signup", self.base_url))
            .header("apikey", &self.service_key)
            .json(&json!({
                "email": email,
                "password": password,
                "full_name": full_name,
            }))
            .send()
            .await?;
        decode(resp).await
    }

    /// Exchange credentials for a session (password grant). On success the
    /// session is installed: the bearer slot is updated, a background
    /// refresh is scheduled, and `SignedIn` is published.
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Session, GatewayError> {
        let resp = self
            .client
            .post(format!("{}/auth/token", self.base_url))
            .header("apikey", &self.service_key)
            .form(&[
                ("grant_type", "password"),
                ("email", email),
                ("password", password),
            ])
            .send()
            .await?;
        let session: Session = decode(resp).await?;
        self.install_session(&session, AuthEvent::SignedIn {
            session: session.clone(),
        });
        Ok(session)
    }

    /// Revoke the current session. State is cleared only on success —
    /// a failed sign-out leaves the session installed, mirroring the
    /// provider's behavior.
    pub async fn sign_out(&self) -> Result<(), GatewayError> {
        let mut request = self
            .client
            .post(format!("{}/auth/logout", self.base_url))
            .header("apikey", &self.service_key);
        if let Some(token) = self.bearer.get() {
            request = request.bearer_auth(token);
        }
        let resp = request.send().await?;
        if !resp.status().is_success() {
            return Err(super::backend_error(resp).await);
        }
        self.clear_session();
        let _ = self.events.send(AuthEvent::SignedOut);
        Ok(())
    }

    /// Request a password-reset mail. A single round trip; no local state
    /// changes.
    pub async fn reset_password(&self, email: &str) -> Result<(), GatewayError> {
        let resp = self
            .client
            .post(format!("{}/auth/recover", self.base_url))
            .header("apikey", &self.service_key)
            .json(&json!({ "email": email }))
            .send()
            .await?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(super::backend_error(resp).await)
        }
    }

    /// Validate an access token against the provider and return its user.
    pub async fn current_user(&self, access_token: &str) -> Result<User, GatewayError> {
        let resp = self
            .client
            .get(format!("{}/auth/user", self.base_url))
            .header("apikey", &self.service_key)
            .bearer_auth(access_token)
            .send()
            .await?;
        decode(resp).await
    }

    /// Exchange a refresh token for a fresh session. Endpoint call only;
    /// callers decide whether to install the result.
    pub async fn refresh(&self, refresh_token: &str) -> Result<Session, GatewayError> {
        let resp = self
            .client
            .post(format!("{}/auth/token", self.base_url))
            .header("apikey", &self.service_key)
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
            ])
            .send()
            .await?;
        decode(resp).await
    }

    /// Install a session: update the shared bearer slot, (re)schedule the
    /// background refresh, publish the given event.
    pub fn install_session(&self, session: &Session, event: AuthEvent) {
        self.bearer.set(Some(session.access_token.clone()));
        self.schedule_refresh(session.clone());
        let _ = self.events.send(event);
    }

    /// Drop the installed session without a provider round trip.
    pub fn clear_session(&self) {
        self.bearer.set(None);
        if let Some(task) = self.refresh_task.lock().expect("refresh task lock").take() {
            task.abort();
        }
    }

    /// Background token rotation. Runs until refresh fails or the client is
    /// gone; each successful rotation publishes `TokenRefreshed`
    /// independently of any store-initiated action.
    fn schedule_refresh(&self, session: Session) {
        let weak = self.weak.clone();
        let handle = tokio::spawn(async move {
            let mut current = session;
            loop {
                let secs = (current.expires_at - Utc::now()).num_seconds() - REFRESH_MARGIN_SECS;
                tokio::time::sleep(std::time::Duration::from_secs(secs.max(1) as u64)).await;
                let Some(auth) = weak.upgrade() else { break };
                match auth.refresh(&current.refresh_token).await {
                    Ok(next) => {
                        debug!("Refreshed access token");
                        auth.bearer.set(Some(next.access_token.clone()));
                        let _ = auth.events.send(AuthEvent::TokenRefreshed {
                            session: next.clone(),
                        });
                        current = next;
                    }
                    Err(err) => {
                        warn!(error = %err, "Token refresh failed; stopping rotation");
                        break;
                    }
                }
            }
        });
        if let Some(old) = self
            .refresh_task
            .lock()
            .expect("refresh task lock")
            .replace(handle)
        {
            old.abort();
        }
    }
}

impl Drop for AuthClient {
    fn drop(&mut self) {
        if let Some(task) = self.refresh_task.lock().expect("refresh task lock").take() {
            task.abort();
        }
    }
}
