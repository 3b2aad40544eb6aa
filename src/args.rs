//! These structs provide the CLI interface for the witan CLI.

use crate::config::{DEFAULT_API_URL, DEFAULT_MANAGEMENT_API_URL};
use clap::builder::BoolishValueParser;
use clap::{ArgGroup, Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing_subscriber::filter::LevelFilter;

/// witan: spreadsheet tools for agents.
///
/// Recalculate formulas, lint them, render ranges as images, edit cells and run scripts against
/// Excel workbooks through the Witan API.
///
/// When authenticated, workbooks are uploaded once and later commands reuse the uploaded revision
/// for as long as the local file is unchanged. With --stateless (or without credentials) the
/// workbook is sent with every request and nothing is kept on the server.
#[derive(Debug, Parser, Clone)]
#[command(name = "witan", version)]
pub struct Args {
    #[clap(flatten)]
    common: Common,

    #[command(subcommand)]
    command: Command,
}

impl Args {
    pub fn new(common: Common, command: Command) -> Self {
        Self { common, command }
    }

    pub fn common(&self) -> &Common {
        &self.common
    }

    pub fn command(&self) -> &Command {
        &self.command
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Manage the signed-in session.
    Auth(AuthArgs),
    /// Recalculate, lint, render, edit and script Excel workbooks.
    Xlsx(XlsxArgs),
    /// Extract text from documents (PDF, DOCX, PPTX, HTML, text).
    ///
    /// Use --outline to get the document structure first, then target specific sections with
    /// --pages, --slides or --offset/--limit. An HTTP(S) URL is downloaded first, and its
    /// Content-Type decides how it is read.
    Read(ReadArgs),
}

/// Arguments common to all subcommands.
#[derive(Debug, Parser, Clone)]
pub struct Common {
    /// The logging verbosity. One of, from least to most verbose:
    /// off, error, warn, info, debug, trace
    ///
    /// This can be overridden by RUST_LOG.
    #[arg(long, global = true, default_value_t = LevelFilter::WARN)]
    log_level: LevelFilter,

    /// API key for Witan requests.
    #[arg(long, global = true, env = "WITAN_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// The Witan API base URL.
    #[arg(long, global = true, env = "WITAN_API_URL", default_value = DEFAULT_API_URL)]
    api_url: String,

    /// The Witan management API base URL, used for session handling.
    #[arg(
        long,
        global = true,
        env = "WITAN_MANAGEMENT_API_URL",
        default_value = DEFAULT_MANAGEMENT_API_URL,
        hide = true
    )]
    management_api_url: String,

    /// Send workbook bytes on every request and do not reuse uploaded revisions.
    #[arg(long, global = true, env = "WITAN_STATELESS", value_parser = BoolishValueParser::new())]
    stateless: bool,

    /// The directory holding config.json. Defaults to $XDG_CONFIG_HOME/witan or ~/.config/witan.
    #[arg(long, global = true, env = "WITAN_CONFIG_DIR")]
    config_dir: Option<PathBuf>,

    /// Print machine-readable JSON instead of text.
    #[arg(long, global = true)]
    json: bool,
}

impl Common {
    pub fn log_level(&self) -> LevelFilter {
        self.log_level
    }

    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref()
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    pub fn management_api_url(&self) -> &str {
        &self.management_api_url
    }

    pub fn stateless(&self) -> bool {
        self.stateless
    }

    pub fn config_dir(&self) -> Option<&Path> {
        self.config_dir.as_deref()
    }

    pub fn json(&self) -> bool {
        self.json
    }
}

/// Args for the `witan auth` command.
#[derive(Debug, Parser, Clone)]
pub struct AuthArgs {
    #[command(subcommand)]
    command: AuthSubcommand,
}

impl AuthArgs {
    pub fn command(&self) -> &AuthSubcommand {
        &self.command
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum AuthSubcommand {
    /// Sign out on this machine: revoke the session (best effort) and remove saved credentials.
    Logout,
}

/// Args for the `witan xlsx` command.
#[derive(Debug, Parser, Clone)]
pub struct XlsxArgs {
    #[command(subcommand)]
    command: XlsxSubcommand,
}

impl XlsxArgs {
    pub fn command(&self) -> &XlsxSubcommand {
        &self.command
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum XlsxSubcommand {
    /// Recalculate formulas and write the recalculated workbook back.
    ///
    /// Exits with 2 when formula errors exist, or with --verify when any value changed.
    Calc(CalcArgs),
    /// Check formulas for common mistakes.
    ///
    /// Exits with 2 when any error or warning is reported.
    Lint(LintArgs),
    /// Render a sheet-qualified range as a PNG or WebP image.
    Render(RenderArgs),
    /// Run JavaScript against a workbook.
    ///
    /// Exactly one of --code, --script, --stdin or --expr supplies the script. Exits with 1 when
    /// the script fails.
    Exec(ExecArgs),
    /// Set cell values, formulas or number formats and write the workbook back.
    ///
    /// Each edit is ADDRESS=VALUE. A value starting with = is a formula (e.g. "Sheet1!A1==SUM(B1:B3)"),
    /// otherwise it is read as a number, true/false, null (clears the cell) or text.
    Edit(EditArgs),
}

/// Args for the `witan xlsx calc` command.
#[derive(Debug, Parser, Clone)]
pub struct CalcArgs {
    /// The workbook.
    file: PathBuf,

    /// Sheet-qualified range to seed recalculation from (repeatable).
    #[arg(short, long = "range")]
    ranges: Vec<String>,

    /// Print touched cells with formulas and computed values.
    #[arg(long)]
    show_touched: bool,

    /// Check consistency only: do not overwrite the workbook and exit with 2 if anything changed.
    #[arg(long)]
    verify: bool,
}

impl CalcArgs {
    pub fn new(file: impl Into<PathBuf>, ranges: Vec<String>, show_touched: bool, verify: bool) -> Self {
        Self {
            file: file.into(),
            ranges,
            show_touched,
            verify,
        }
    }

    pub fn file(&self) -> &Path {
        &self.file
    }

    pub fn ranges(&self) -> &[String] {
        &self.ranges
    }

    pub fn show_touched(&self) -> bool {
        self.show_touched
    }

    pub fn verify(&self) -> bool {
        self.verify
    }
}

/// Args for the `witan xlsx lint` command.
#[derive(Debug, Parser, Clone)]
pub struct LintArgs {
    /// The workbook.
    file: PathBuf,

    /// Sheet-qualified range to lint (repeatable).
    #[arg(short, long = "range")]
    ranges: Vec<String>,

    /// Rule ID to skip (repeatable).
    #[arg(short, long = "skip-rule")]
    skip_rules: Vec<String>,

    /// Run only these rule IDs (repeatable).
    #[arg(long = "only-rule")]
    only_rules: Vec<String>,
}

impl LintArgs {
    pub fn new(file: impl Into<PathBuf>) -> Self {
        Self {
            file: file.into(),
            ranges: Vec::new(),
            skip_rules: Vec::new(),
            only_rules: Vec::new(),
        }
    }

    pub fn file(&self) -> &Path {
        &self.file
    }

    pub fn ranges(&self) -> &[String] {
        &self.ranges
    }

    pub fn skip_rules(&self) -> &[String] {
        &self.skip_rules
    }

    pub fn only_rules(&self) -> &[String] {
        &self.only_rules
    }
}

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderFormat {
    #[default]
    Png,
    Webp,
}

serde_plain::derive_display_from_serialize!(RenderFormat);
serde_plain::derive_fromstr_from_deserialize!(RenderFormat);

/// Args for the `witan xlsx render` command.
#[derive(Debug, Parser, Clone)]
pub struct RenderArgs {
    /// The workbook.
    file: PathBuf,

    /// Sheet-qualified range, e.g. "Sheet1!A1:Z50" or "'My Sheet'!A1:Z50".
    #[arg(short, long)]
    range: String,

    /// Device pixel ratio (1-3). Chosen from the range size by default.
    #[arg(long)]
    dpr: Option<u8>,

    /// Image format: png or webp.
    #[arg(long, default_value_t = RenderFormat::Png)]
    format: RenderFormat,

    /// Output file path. Defaults to a new temporary file.
    #[arg(short, long)]
    output: Option<PathBuf>,
}

impl RenderArgs {
    pub fn new(file: impl Into<PathBuf>, range: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            range: range.into(),
            dpr: None,
            format: RenderFormat::Png,
            output: None,
        }
    }

    pub fn with_dpr(mut self, dpr: u8) -> Self {
        self.dpr = Some(dpr);
        self
    }

    pub fn with_output(mut self, output: impl Into<PathBuf>) -> Self {
        self.output = Some(output.into());
        self
    }

    pub fn file(&self) -> &Path {
        &self.file
    }

    pub fn range(&self) -> &str {
        &self.range
    }

    pub fn dpr(&self) -> Option<u8> {
        self.dpr
    }

    pub fn format(&self) -> RenderFormat {
        self.format
    }

    pub fn output(&self) -> Option<&Path> {
        self.output.as_deref()
    }
}

/// Args for the `witan xlsx exec` command.
#[derive(Debug, Parser, Clone, Default)]
#[command(group(
    ArgGroup::new("source")
        .required(true)
        .args(["code", "script", "stdin", "expr"])
))]
pub struct ExecArgs {
    /// The workbook.
    file: PathBuf,

    /// Inline JavaScript source.
    #[arg(long)]
    code: Option<String>,

    /// Path to a JavaScript file.
    #[arg(long)]
    script: Option<PathBuf>,

    /// Read JavaScript source from stdin.
    #[arg(long)]
    stdin: bool,

    /// Single-expression shorthand, run as `return (<expr>);`.
    #[arg(long)]
    expr: Option<String>,

    /// JSON value passed as `input` to the script. Defaults to {}.
    #[arg(long)]
    input_json: Option<String>,

    /// Execution timeout in milliseconds.
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    timeout_ms: Option<u32>,

    /// Maximum stdout characters to capture.
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    max_output_chars: Option<u32>,

    /// Persist writes made by the script and overwrite the local workbook.
    #[arg(long)]
    save: bool,
}

impl ExecArgs {
    pub fn new(file: impl Into<PathBuf>) -> Self {
        Self {
            file: file.into(),
            ..Default::default()
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_expr(mut self, expr: impl Into<String>) -> Self {
        self.expr = Some(expr.into());
        self
    }

    pub fn with_input_json(mut self, input_json: impl Into<String>) -> Self {
        self.input_json = Some(input_json.into());
        self
    }

    pub fn with_save(mut self, save: bool) -> Self {
        self.save = save;
        self
    }

    pub fn file(&self) -> &Path {
        &self.file
    }

    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }

    pub fn script(&self) -> Option<&Path> {
        self.script.as_deref()
    }

    pub fn stdin(&self) -> bool {
        self.stdin
    }

    pub fn expr(&self) -> Option<&str> {
        self.expr.as_deref()
    }

    pub fn input_json(&self) -> Option<&str> {
        self.input_json.as_deref()
    }

    pub fn timeout_ms(&self) -> Option<u32> {
        self.timeout_ms
    }

    pub fn max_output_chars(&self) -> Option<u32> {
        self.max_output_chars
    }

    pub fn save(&self) -> bool {
        self.save
    }
}

/// Args for the `witan xlsx edit` command.
#[derive(Debug, Parser, Clone)]
pub struct EditArgs {
    /// The workbook.
    file: PathBuf,

    /// Edits as ADDRESS=VALUE, e.g. "Sheet1!A1=42".
    edits: Vec<String>,

    /// Excel number format applied to every edited cell. Bare addresses become format-only edits.
    #[arg(short, long, conflicts_with = "cells")]
    format: Option<String>,

    /// JSON array of cell edits for full per-cell control.
    #[arg(long, conflicts_with = "edits")]
    cells: Option<String>,
}

impl EditArgs {
    pub fn new(file: impl Into<PathBuf>, edits: Vec<String>) -> Self {
        Self {
            file: file.into(),
            edits,
            format: None,
            cells: None,
        }
    }

    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }

    pub fn with_cells(mut self, cells: impl Into<String>) -> Self {
        self.cells = Some(cells.into());
        self
    }

    pub fn file(&self) -> &Path {
        &self.file
    }

    pub fn edits(&self) -> &[String] {
        &self.edits
    }

    pub fn format(&self) -> Option<&str> {
        self.format.as_deref()
    }

    pub fn cells(&self) -> Option<&str> {
        self.cells.as_deref()
    }
}

/// Args for the `witan read` command.
#[derive(Debug, Parser, Clone)]
pub struct ReadArgs {
    /// A local document or an http(s) URL.
    input: String,

    /// PDF page range, e.g. 1-5 or 1,3,5.
    #[arg(long)]
    pages: Option<String>,

    /// Presentation slide range, e.g. 1-3.
    #[arg(long)]
    slides: Option<String>,

    /// First line to return (1-based).
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    offset: Option<u32>,

    /// Maximum number of lines to return.
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    limit: Option<u32>,

    /// Show the document structure instead of its content.
    #[arg(long)]
    outline: bool,
}

impl ReadArgs {
    pub fn new(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            pages: None,
            slides: None,
            offset: None,
            limit: None,
            outline: false,
        }
    }

    pub fn with_pages(mut self, pages: impl Into<String>) -> Self {
        self.pages = Some(pages.into());
        self
    }

    pub fn with_window(mut self, offset: u32, limit: u32) -> Self {
        self.offset = Some(offset);
        self.limit = Some(limit);
        self
    }

    pub fn with_outline(mut self, outline: bool) -> Self {
        self.outline = outline;
        self
    }

    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn pages(&self) -> Option<&str> {
        self.pages.as_deref()
    }

    pub fn slides(&self) -> Option<&str> {
        self.slides.as_deref()
    }

    pub fn offset(&self) -> Option<u32> {
        self.offset
    }

    pub fn limit(&self) -> Option<u32> {
        self.limit
    }

    pub fn outline(&self) -> bool {
        self.outline
    }
}
