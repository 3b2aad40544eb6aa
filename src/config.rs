//! Runtime settings and the persisted user configuration.
//!
//! The user configuration lives at `<config dir>/config.json`, where the config dir is
//! `$WITAN_CONFIG_DIR`, else `$XDG_CONFIG_HOME/witan`, else `~/.config/witan`. It only holds the
//! session token of a signed-in user.

use crate::api::RetryPolicy;
use crate::args::Common;
use crate::{session, utils, Result};
use anyhow::{anyhow, Context};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use url::Url;

pub const DEFAULT_API_URL: &str = "https://api.witanlabs.com";
pub const DEFAULT_MANAGEMENT_API_URL: &str = "https://management-api.witanlabs.com";

const APP_DIR: &str = "witan";
const CONFIG_JSON: &str = "config.json";

/// The `Config` object is everything a command needs to know about where and how to talk to the
/// service: API endpoints, credentials, and whether to run stateless.
#[derive(Debug, Clone)]
pub struct Config {
    api_url: String,
    management_api_url: String,
    api_key: Option<String>,
    stateless_requested: bool,
    config_path: PathBuf,
    config_file: ConfigFile,
    retry_policy: RetryPolicy,
}

impl Config {
    /// Resolves settings from the command line (and the environment variables behind it) and
    /// loads the user configuration file.
    ///
    /// An unreadable configuration file is logged and treated as empty, which means the CLI runs
    /// stateless unless an API key was given.
    pub async fn load(common: &Common) -> Result<Self> {
        let config_dir = match common.config_dir() {
            Some(dir) => dir.to_path_buf(),
            None => default_config_dir()?,
        };
        let config_path = config_dir.join(CONFIG_JSON);
        let config_file = match ConfigFile::load(&config_path).await {
            Ok(config_file) => config_file,
            Err(e) => {
                warn!("Ignoring the configuration file: {e:#}");
                ConfigFile::default()
            }
        };
        debug!("Using configuration file {}", config_path.display());

        let api_url = common.api_url().trim_end_matches('/').to_string();
        Url::parse(&api_url).with_context(|| format!("invalid API URL '{api_url}'"))?;

        Ok(Self {
            api_url,
            management_api_url: common
                .management_api_url()
                .trim_end_matches('/')
                .to_string(),
            api_key: common
                .api_key()
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .map(str::to_string),
            stateless_requested: common.stateless(),
            config_path,
            config_file,
            retry_policy: RetryPolicy::default(),
        })
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    pub fn management_api_url(&self) -> &str {
        &self.management_api_url
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry_policy
    }

    pub fn session_token(&self) -> Option<&str> {
        self.config_file.session_token()
    }

    /// True when an API key was given or a session token is stored.
    pub fn has_credentials(&self) -> bool {
        self.api_key.is_some() || self.session_token().is_some()
    }

    /// Stateless mode sends workbook bytes with every request and keeps nothing on the server.
    /// It is used when requested, and whenever there are no credentials.
    pub fn stateless(&self) -> bool {
        self.stateless_requested || !self.has_credentials()
    }

    /// The bearer token for API requests: the explicit API key, or a short-lived token exchanged
    /// for the stored session. `None` means requests go out unauthenticated (stateless only).
    ///
    /// # Errors
    /// - When the session exchange fails.
    pub async fn api_key(&self) -> Result<Option<String>> {
        if let Some(key) = &self.api_key {
            return Ok(Some(key.clone()));
        }
        let Some(session_token) = self.session_token() else {
            return Ok(None);
        };
        let token = session::exchange_session_token(&self.management_api_url, session_token)
            .await
            .map_err(|e| {
                anyhow!("authentication failed ({e:#}): sign in again or set --api-key / WITAN_API_KEY")
            })?;
        Ok(Some(token))
    }

    #[cfg(test)]
    pub(crate) fn for_test(api_url: &str, api_key: Option<&str>, config_dir: &Path) -> Self {
        Self {
            api_url: api_url.to_string(),
            management_api_url: api_url.to_string(),
            api_key: api_key.map(str::to_string),
            stateless_requested: false,
            config_path: config_dir.join(CONFIG_JSON),
            config_file: ConfigFile::default(),
            retry_policy: RetryPolicy::default(),
        }
    }

    #[cfg(test)]
    pub(crate) fn with_config_file(mut self, config_file: ConfigFile) -> Self {
        self.config_file = config_file;
        self
    }
}

/// `$WITAN_CONFIG_DIR` is handled by the `--config-dir` flag. This resolves the fallbacks.
pub fn default_config_dir() -> Result<PathBuf> {
    resolve_config_dir(
        std::env::var("XDG_CONFIG_HOME").ok(),
        dirs::home_dir(),
    )
}

fn resolve_config_dir(xdg_config_home: Option<String>, home: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(xdg) = xdg_config_home.filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(xdg).join(APP_DIR));
    }
    let home = home.context("Unable to determine the home directory")?;
    Ok(home.join(".config").join(APP_DIR))
}

/// Represents the serialization and deserialization format of the configuration file.
///
/// Example configuration:
/// ```json
/// {
///   "session_token": "ses_2fd7c1..."
/// }
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
pub struct ConfigFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    session_token: Option<String>,
}

impl ConfigFile {
    pub fn new(session_token: Option<String>) -> Self {
        Self { session_token }
    }

    /// Loads a ConfigFile from `path`. A missing file is an empty configuration.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            return Ok(Self::default());
        }
        utils::deserialize(path).await
    }

    /// Saves the ConfigFile to `path` by writing a temporary file and renaming it into place.
    /// On unix the file is only readable by its owner.
    ///
    /// # Errors
    /// Returns an error if the file cannot be written.
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .with_context(|| format!("Unable to create directory {}", dir.display()))?;
        }
        let mut data = serde_json::to_string_pretty(self).context("Unable to serialize config")?;
        data.push('\n');
        let tmp = path.with_extension("json.tmp");
        utils::write(&tmp, data)
            .await
            .context("Unable to write config file")?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600))
                .await
                .context("Unable to restrict config file permissions")?;
        }
        if let Err(e) = utils::rename(&tmp, path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e);
        }
        Ok(())
    }

    /// Removes the file at `path`. Succeeds when there is nothing to remove.
    pub async fn delete(path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Unable to delete {}", path.display())),
        }
    }

    pub fn session_token(&self) -> Option<&str> {
        self.session_token.as_deref().filter(|t| !t.is_empty())
    }
}
