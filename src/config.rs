use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};

/// Runtime configuration for the tasklane client.
///
/// Two settings are required and have no defaults: the backend service URL
/// and the service access key. Refusing to start without them is deliberate —
/// a client with null connectivity can only fail later and more confusingly.
#[derive(Debug, Clone)]
pub struct Config {
    pub service_url: String,
    pub service_key: String,
    /// Where the signed-in session is persisted between invocations.
    pub session_file: PathBuf,
}

impl Config {
    /// Load configuration from `.env` (if present) and the process
    /// environment. `TASKLANE_URL` and `TASKLANE_KEY` are required.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let service_url = std::env::var("TASKLANE_URL")
            .map_err(|_| anyhow!("TASKLANE_URL is not set. Point it at your backend service."))?;
        let service_key = std::env::var("TASKLANE_KEY")
            .map_err(|_| anyhow!("TASKLANE_KEY is not set. Use your service access key."))?;

        let session_file = match std::env::var("TASKLANE_SESSION_FILE") {
            Ok(path) => PathBuf::from(path),
            Err(_) => default_session_file()?,
        };

        Ok(Self::from_parts(service_url, service_key, session_file))
    }

    /// Build a config directly; used by tests and anything embedding the
    /// library without environment plumbing.
    pub fn from_parts(
        service_url: impl Into<String>,
        service_key: impl Into<String>,
        session_file: PathBuf,
    ) -> Self {
        let service_url = service_url.into().trim_end_matches('/').to_string();
        Self {
            service_url,
            service_key: service_key.into(),
            session_file,
        }
    }
}

fn default_session_file() -> Result<PathBuf> {
    let config_dir = dirs::config_dir().context("Could not determine the user config directory")?;
    Ok(config_dir.join("tasklane").join("session.json"))
}
