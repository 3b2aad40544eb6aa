//! Command handlers for the witan CLI.
//!
//! This module contains implementations for all CLI subcommands.

mod auth;
mod calc;
mod edit;
mod exec;
mod lint;
mod read;
mod render;

use crate::api::Client;
use crate::cache::ContentCache;
use crate::sync::SyncCoordinator;
use crate::{fixext, utils, Config, Result};
use anyhow::{bail, Context};
use base64::prelude::{Engine, BASE64_STANDARD};
use serde::Serialize;
use std::fmt::Debug;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::debug;

pub use auth::logout;
pub use calc::calc;
pub use edit::{edit, parse_edit_cell};
pub use exec::exec;
pub use lint::lint;
pub use read::{read, ReadOutput};
pub use render::{auto_dpr, render};

/// Exit code for a command that ran but found problems: formula errors, lint findings, or
/// changes under `--verify`.
pub const EXIT_FINDINGS: u8 = 2;

/// The output type for a command. This allows the command to return a consistent message and,
/// optionally, structured data for `--json`, along with the exit code the process should use.
#[derive(Debug, Clone, Serialize)]
pub struct Out<T>
where
    T: Serialize + Clone + Debug,
{
    /// A message that can be printed to the user regarding the outcome of the command execution.
    message: String,

    /// Any structured data that needs to be output from the call.
    structure: Option<T>,

    /// A status line for stderr, kept apart from the message so stdout stays pipeable.
    #[serde(skip)]
    notice: Option<String>,

    #[serde(skip)]
    exit_code: u8,
}

impl<T, S> From<S> for Out<T>
where
    T: Debug + Clone + Serialize,
    S: Into<String>,
{
    fn from(value: S) -> Self {
        Out::new_message(value)
    }
}

impl<T> Out<T>
where
    T: Serialize + Clone + Debug,
{
    /// Create a new `Out` object that has `Some(structure)`.
    pub fn new<S>(message: S, structure: T) -> Self
    where
        S: Into<String>,
    {
        Self {
            message: message.into(),
            structure: Some(structure),
            notice: None,
            exit_code: 0,
        }
    }

    /// Create a new `Out` object that has `None` for `structure`.
    pub fn new_message<S>(message: S) -> Self
    where
        S: Into<String>,
    {
        Self {
            message: message.into(),
            structure: None,
            notice: None,
            exit_code: 0,
        }
    }

    pub fn with_exit_code(mut self, exit_code: u8) -> Self {
        self.exit_code = exit_code;
        self
    }

    pub fn with_notice<S>(mut self, notice: S) -> Self
    where
        S: Into<String>,
    {
        self.notice = Some(notice.into());
        self
    }

    /// Get the `message`.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Get the structured data stored in `structure`.
    pub fn structure(&self) -> Option<&T> {
        self.structure.as_ref()
    }

    pub fn notice(&self) -> Option<&str> {
        self.notice.as_deref()
    }

    pub fn exit_code(&self) -> u8 {
        self.exit_code
    }

    /// Print the structured data as JSON when `json` is set and there is any, otherwise the
    /// message followed by the notice on stderr.
    ///
    /// # Errors
    /// - When the structure cannot be serialized.
    pub fn print(&self, json: bool) -> Result<()> {
        if json {
            if let Some(structure) = self.structure() {
                let json = serde_json::to_string_pretty(structure)
                    .context("Unable to serialize the command output")?;
                println!("{json}");
                return Ok(());
            }
        }
        if !self.message.is_empty() {
            println!("{}", self.message);
        }
        if let Some(notice) = &self.notice {
            eprintln!("{notice}");
        }
        Ok(())
    }

    /// Prints the output and returns the process exit code.
    pub fn finish(&self, json: bool) -> Result<ExitCode> {
        self.print(json)?;
        Ok(ExitCode::from(self.exit_code))
    }
}

/// How workbook operations reach the service.
#[derive(Debug)]
pub(crate) enum Backend {
    /// Workbook bytes go with every request.
    Stateless(Client),
    /// Workbooks are uploaded once and referenced by file and revision.
    Files(SyncCoordinator),
}

impl Backend {
    /// Builds the backend `config` asks for. Files-backed mode gets a content cache in the first
    /// writable cache directory.
    ///
    /// # Errors
    /// - When credentials cannot be resolved.
    /// - When the HTTP client cannot be built.
    pub(crate) async fn connect(config: &Config) -> Result<Self> {
        let api_key = config.api_key().await?;
        if config.stateless() {
            debug!("Running stateless against {}", config.api_url());
            let client = Client::new(config.api_url(), api_key, config.retry_policy())?;
            return Ok(Backend::Stateless(client));
        }
        if api_key.is_none() {
            bail!("not authenticated: set --api-key or WITAN_API_KEY, or pass --stateless");
        }
        let client = Client::new(config.api_url(), api_key, config.retry_policy())?;
        let cache = ContentCache::probe();
        debug!(
            "Using files-backed mode against {} with cache {:?}",
            config.api_url(),
            cache.dir()
        );
        Ok(Backend::Files(SyncCoordinator::new(client, cache)))
    }
}

/// Downloads `revision_id` of `file_id` over the workbook at `path` and records it, so the next
/// command on this file needs no upload. Returns the path the workbook ended up at.
pub(crate) async fn write_back_revision(
    sync: &SyncCoordinator,
    path: &Path,
    file_id: &str,
    revision_id: &str,
) -> Result<PathBuf> {
    let bytes = sync
        .client()
        .download_file_content(file_id, revision_id)
        .await
        .context("downloading updated file")?;
    utils::write(path, &bytes)
        .await
        .context("writing updated file")?;
    let path = fixext::fix_writeback_extension(path)?;
    sync.record_new_revision(&path, file_id, revision_id)
        .context("updating local cache")?;
    Ok(path)
}

/// Writes a base64 workbook returned by a stateless call over `path`.
pub(crate) async fn write_back_encoded(path: &Path, encoded: &str) -> Result<PathBuf> {
    let bytes = BASE64_STANDARD
        .decode(encoded)
        .context("decoding updated file")?;
    utils::write(path, bytes)
        .await
        .context("writing updated file")?;
    fixext::fix_writeback_extension(path)
}

/// `1 error`, `2 errors`.
pub(crate) fn plural(count: usize, noun: &str) -> String {
    if count == 1 {
        format!("{count} {noun}")
    } else {
        format!("{count} {noun}s")
    }
}
