//! Auth session store: a mirror of the provider's session, user, and
//! profile state.
//!
//! Two call sites drive the same state: explicit actions (sign-in, sign-up,
//! sign-out, initialize) and the provider's auth-event channel, which can
//! fire on its own when the background refresh rotates the token. Both
//! funnel through the store's locked state, so neither can tear the other's
//! writes.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use chrono::Utc;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::warn;

use crate::config::Config;
use crate::errors::{AuthError, GatewayError};
use crate::gateway::Gateway;
use crate::gateway::auth::{AuthClient, AuthEvent};
use crate::models::{Profile, ProfilePatch, Session, User};

/// Sessions this close to expiry are refreshed instead of validated.
const EXPIRY_SLACK_SECS: i64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthPhase {
    #[default]
    Uninitialized,
    Loading,
    Authenticated,
    Unauthenticated,
}

#[derive(Debug, Clone, Default)]
pub struct AuthState {
    pub phase: AuthPhase,
    pub user: Option<User>,
    pub session: Option<Session>,
    pub profile: Option<Profile>,
    /// Orthogonal to the phase: a failed action records here without
    /// necessarily changing the phase.
    pub error: Option<String>,
}

pub struct AuthStore {
    auth: Arc<AuthClient>,
    gateway: Arc<Gateway>,
    session_file: PathBuf,
    state: RwLock<AuthState>,
    version: watch::Sender<u64>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl AuthStore {
    /// Build the store and attach it to the provider's event channel.
    pub fn new(auth: Arc<AuthClient>, gateway: Arc<Gateway>, config: &Config) -> Arc<Self> {
        let (version, _) = watch::channel(0);
        let store = Arc::new(Self {
            auth,
            gateway,
            session_file: config.session_file.clone(),
            state: RwLock::new(AuthState::default()),
            version,
            listener: Mutex::new(None),
        });

        let mut events = store.auth.events();
        let weak = Arc::downgrade(&store);
        let handle = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        let Some(store) = weak.upgrade() else { break };
                        store.apply_event(event).await;
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Auth event channel lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        *store.listener.lock().expect("listener lock") = Some(handle);
        store
    }

    pub fn snapshot(&self) -> AuthState {
        self.state.read().expect("auth state lock").clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.snapshot().phase == AuthPhase::Authenticated
    }

    pub fn changed(&self) -> watch::Receiver<u64> {
        self.version.subscribe()
    }

    fn bump(&self) {
        self.version.send_modify(|v| *v += 1);
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut AuthState) -> R) -> R {
        let result = f(&mut self.state.write().expect("auth state lock"));
        self.bump();
        result
    }

    pub fn clear_error(&self) {
        self.with_state(|s| s.error = None);
    }

    /// Detach from the provider event channel. Only needed when tearing a
    /// store down before process exit.
    pub fn shutdown(&self) {
        if let Some(task) = self.listener.lock().expect("listener lock").take() {
            task.abort();
        }
    }

    // ── Actions ───────────────────────────────────────────────────────

    /// Look for an existing session and settle into Authenticated or
    /// Unauthenticated. Loading always ends, whatever the outcome.
    pub async fn initialize(&self) -> Result<(), AuthError> {
        self.with_state(|s| s.phase = AuthPhase::Loading);

        let saved = match load_session(&self.session_file) {
            Ok(saved) => saved,
            Err(err) => {
                self.with_state(|s| {
                    s.error = Some(err.to_string());
                    s.phase = AuthPhase::Unauthenticated;
                });
                return Err(err);
            }
        };
        let Some(saved) = saved else {
            self.with_state(|s| s.phase = AuthPhase::Unauthenticated);
            return Ok(());
        };

        let near_expiry =
            saved.expires_at <= Utc::now() + chrono::Duration::seconds(EXPIRY_SLACK_SECS);
        let result = if near_expiry {
            self.auth.refresh(&saved.refresh_token).await
        } else {
            match self.auth.current_user(&saved.access_token).await {
                Ok(user) => Ok(Session { user, ..saved }),
                Err(err) => Err(err),
            }
        };

        match result {
            Ok(session) => {
                if let Err(err) = save_session(&self.session_file, &session) {
                    warn!(error = %err, "Could not persist session");
                }
                self.auth.install_session(
                    &session,
                    AuthEvent::SignedIn {
                        session: session.clone(),
                    },
                );
                self.with_state(|s| {
                    s.user = Some(session.user.clone());
                    s.session = Some(session);
                    s.phase = AuthPhase::Authenticated;
                });
                self.fetch_profile().await;
                Ok(())
            }
            // A rejected token just means no session; that is the normal
            // signed-out path, not a fault.
            Err(GatewayError::Backend { status: 401, .. })
            | Err(GatewayError::Backend { status: 403, .. }) => {
                remove_session(&self.session_file);
                self.with_state(|s| s.phase = AuthPhase::Unauthenticated);
                Ok(())
            }
            Err(err) => {
                self.with_state(|s| {
                    s.error = Some(err.to_string());
                    s.phase = AuthPhase::Unauthenticated;
                });
                Err(err.into())
            }
        }
    }

    /// Password sign-in. Success mirrors the session and fetches the
    /// profile; failure records the error and leaves previously-mirrored
    /// fields untouched.
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<(), AuthError> {
        self.with_state(|s| {
            s.phase = AuthPhase::Loading;
            s.error = None;
        });

        match self.auth.sign_in(email, password).await {
            Ok(session) => {
                if let Err(err) = save_session(&self.session_file, &session) {
                    warn!(error = %err, "Could not persist session");
                }
                self.with_state(|s| {
                    s.user = Some(session.user.clone());
                    s.session = Some(session);
                    s.phase = AuthPhase::Authenticated;
                });
                self.fetch_profile().await;
                Ok(())
            }
            Err(err) => {
                self.with_state(|s| {
                    s.error = Some(err.to_string());
                    s.phase = AuthPhase::Unauthenticated;
                });
                Err(err.into())
            }
        }
    }

    /// Register a new account. The account may need email confirmation
    /// before it can sign in, so this mirrors the user without
    /// authenticating.
    pub async fn sign_up(
        &self,
        email: &str,
        password: &str,
        full_name: Option<&str>,
    ) -> Result<User, AuthError> {
        let prev = self.snapshot().phase;
        self.with_state(|s| {
            s.phase = AuthPhase::Loading;
            s.error = None;
        });

        match self.auth.sign_up(email, password, full_name).await {
            Ok(user) => {
                self.with_state(|s| {
                    s.user = Some(user.clone());
                    s.phase = prev;
                });
                Ok(user)
            }
            Err(err) => {
                self.with_state(|s| {
                    s.error = Some(err.to_string());
                    s.phase = prev;
                });
                Err(err.into())
            }
        }
    }

    /// Revoke the session with the provider, then clear the mirror. A
    /// failed round trip leaves everything in place.
    pub async fn sign_out(&self) -> Result<(), AuthError> {
        let prev = self.snapshot().phase;
        self.with_state(|s| {
            s.phase = AuthPhase::Loading;
            s.error = None;
        });

        match self.auth.sign_out().await {
            Ok(()) => {
                remove_session(&self.session_file);
                self.with_state(|s| {
                    s.user = None;
                    s.session = None;
                    s.profile = None;
                    s.phase = AuthPhase::Unauthenticated;
                });
                Ok(())
            }
            Err(err) => {
                self.with_state(|s| {
                    s.error = Some(err.to_string());
                    s.phase = prev;
                });
                Err(err.into())
            }
        }
    }

    /// Ask the provider to send a password-reset mail. No local state
    /// changes beyond the error slot.
    pub async fn reset_password(&self, email: &str) -> Result<(), AuthError> {
        self.with_state(|s| s.error = None);
        match self.auth.reset_password(email).await {
            Ok(()) => Ok(()),
            Err(err) => {
                self.with_state(|s| s.error = Some(err.to_string()));
                Err(err.into())
            }
        }
    }

    /// Load the signed-in user's profile row. Zero rows is not an error —
    /// a fresh account may not have one yet.
    pub async fn fetch_profile(&self) {
        let Some(user_id) = self.snapshot().user.as_ref().map(|u| u.id) else {
            return;
        };
        match self.gateway.get_profile(user_id).await {
            Ok(Some(profile)) => self.with_state(|s| s.profile = Some(profile)),
            Ok(None) => {}
            Err(err) => self.with_state(|s| s.error = Some(err.to_string())),
        }
    }

    pub async fn update_profile(&self, patch: ProfilePatch) -> Result<Profile, AuthError> {
        self.with_state(|s| s.error = None);
        let Some(user_id) = self.snapshot().user.as_ref().map(|u| u.id) else {
            return Err(GatewayError::Backend {
                status: 401,
                message: "Not signed in".to_string(),
            }
            .into());
        };
        match self.gateway.update_profile(user_id, &patch).await {
            Ok(profile) => {
                self.with_state(|s| s.profile = Some(profile.clone()));
                Ok(profile)
            }
            Err(err) => {
                self.with_state(|s| s.error = Some(err.to_string()));
                Err(err.into())
            }
        }
    }

    // ── Provider event channel ────────────────────────────────────────

    /// Mirror one provider event. The channel can fire independently of any
    /// action this store initiated; re-applying a state we already hold is
    /// harmless.
    async fn apply_event(&self, event: AuthEvent) {
        match event {
            AuthEvent::SignedIn { session } => {
                if let Err(err) = save_session(&self.session_file, &session) {
                    warn!(error = %err, "Could not persist session");
                }
                self.with_state(|s| {
                    s.user = Some(session.user.clone());
                    s.session = Some(session);
                    s.phase = AuthPhase::Authenticated;
                });
                self.fetch_profile().await;
            }
            AuthEvent::SignedOut => {
                remove_session(&self.session_file);
                self.with_state(|s| {
                    s.user = None;
                    s.session = None;
                    s.profile = None;
                    s.phase = AuthPhase::Unauthenticated;
                });
            }
            AuthEvent::TokenRefreshed { session } => {
                if let Err(err) = save_session(&self.session_file, &session) {
                    warn!(error = %err, "Could not persist refreshed session");
                }
                self.with_state(|s| s.session = Some(session));
            }
        }
    }
}

impl Drop for AuthStore {
    fn drop(&mut self) {
        if let Some(task) = self.listener.lock().expect("listener lock").take() {
            task.abort();
        }
    }
}

// ── Session persistence ───────────────────────────────────────────────

fn load_session(path: &Path) -> Result<Option<Session>, AuthError> {
    match std::fs::read_to_string(path) {
        // A file we cannot parse is treated as absent rather than fatal;
        // the user just signs in again.
        Ok(raw) => Ok(serde_json::from_str(&raw).ok()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(AuthError::SessionRead {
            path: path.to_path_buf(),
            source: err,
        }),
    }
}

fn save_session(path: &Path, session: &Session) -> Result<(), AuthError> {
    let write = || -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(session).expect("session serializes");
        std::fs::write(path, json)
    };
    write().map_err(|err| AuthError::SessionWrite {
        path: path.to_path_buf(),
        source: err,
    })
}

fn remove_session(path: &Path) {
    let _ = std::fs::remove_file(path);
}
