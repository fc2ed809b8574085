//! Session credentials: env vars, then `.env` in the working directory.
//!
//! The [`Session`] handed to collaborators refreshes itself through a [`CredentialRefresher`]
//! once the current credentials expire, so long phases never see a stale token.

use anyhow::{Context, Result, anyhow};
use log::{debug, info};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::utils::config::PackagePaths;

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub access_key: String,
    pub secret_key: String,
    pub session_token: Option<String>,
    /// `None` never expires.
    pub expires_at: Option<Instant>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key", &self.access_key)
            .field("secret_key", &"***")
            .field("session_token", &self.session_token.as_ref().map(|_| "***"))
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl Credentials {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|t| now >= t)
    }
}

/// Produces fresh credentials for one account.
pub trait CredentialRefresher: Send + Sync {
    fn refresh(&self, account_id: &str) -> Result<Credentials>;
}

struct SessionInner {
    account_id: String,
    current: Mutex<Option<Credentials>>,
    refresher: Arc<dyn CredentialRefresher>,
}

/// Cheap-to-clone authenticated session for one account.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    pub fn new(account_id: &str, refresher: Arc<dyn CredentialRefresher>) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                account_id: account_id.to_string(),
                current: Mutex::new(None),
                refresher,
            }),
        }
    }

    pub fn account_id(&self) -> &str {
        &self.inner.account_id
    }

    /// Current credentials, refreshed first when missing or expired.
    pub fn credentials(&self) -> Result<Credentials> {
        let mut current = self
            .inner
            .current
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if let Some(ref c) = *current
            && !c.is_expired(Instant::now())
        {
            return Ok(c.clone());
        }
        debug!("{}: refreshing credentials", self.inner.account_id);
        let fresh = self
            .inner
            .refresher
            .refresh(&self.inner.account_id)
            .with_context(|| format!("{}: refresh credentials", self.inner.account_id))?;
        *current = Some(fresh.clone());
        Ok(fresh)
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Reads `<PREFIX>_ACCESS_KEY`, `<PREFIX>_SECRET_KEY`, `<PREFIX>_SESSION_TOKEN` from the
/// environment, loading `.env` from `dir` when the keys are not set.
pub struct EnvCredentials {
    prefix: String,
    dir: std::path::PathBuf,
    lifetime: Option<Duration>,
}

impl EnvCredentials {
    pub fn new(dir: &Path) -> Self {
        Self {
            prefix: PackagePaths::get().env_prefix(),
            dir: dir.to_path_buf(),
            lifetime: None,
        }
    }

    /// Treat loaded credentials as expiring after `lifetime`, forcing a reload.
    pub fn with_lifetime(mut self, lifetime: Duration) -> Self {
        self.lifetime = Some(lifetime);
        self
    }

    fn lookup(&self) -> Option<(String, String, Option<String>)> {
        let access = env_var(&format!("{}_ACCESS_KEY", self.prefix))?;
        let secret = env_var(&format!("{}_SECRET_KEY", self.prefix))?;
        let token = env_var(&format!("{}_SESSION_TOKEN", self.prefix));
        Some((access, secret, token))
    }

    fn try_env_then_dotenv(&self) -> Option<(String, String, Option<String>)> {
        if let Some(found) = self.lookup() {
            return Some(found);
        }
        let env_path = self.dir.join(".env");
        if env_path.is_file() {
            let _ = dotenvy::from_path(&env_path);
            return self.lookup();
        }
        None
    }
}

impl CredentialRefresher for EnvCredentials {
    fn refresh(&self, account_id: &str) -> Result<Credentials> {
        let (access_key, secret_key, session_token) =
            self.try_env_then_dotenv().ok_or_else(|| {
                anyhow!(
                    "no credentials: set {}_ACCESS_KEY and {}_SECRET_KEY or add them to .env",
                    self.prefix,
                    self.prefix
                )
            })?;
        info!("{}: credentials found in environment", account_id);
        Ok(Credentials {
            access_key,
            secret_key,
            session_token,
            expires_at: self.lifetime.map(|l| Instant::now() + l),
        })
    }
}

/// Fixed credentials, for offline runs and tests.
pub struct StaticCredentials(pub Credentials);

impl StaticCredentials {
    pub fn anonymous() -> Self {
        Self(Credentials {
            access_key: "anonymous".to_string(),
            secret_key: String::new(),
            session_token: None,
            expires_at: None,
        })
    }
}

impl CredentialRefresher for StaticCredentials {
    fn refresh(&self, _account_id: &str) -> Result<Credentials> {
        Ok(self.0.clone())
    }
}
