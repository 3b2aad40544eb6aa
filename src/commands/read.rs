use crate::api::{ReadOutlineResponse, ReadResponse, RemoteFile};
use crate::args::ReadArgs;
use crate::commands::{Backend, Out};
use crate::{utils, Config, Result};
use anyhow::{bail, Context};
use reqwest::header::{CONTENT_TYPE, USER_AGENT};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::NamedTempFile;
use tracing::debug;

const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(60);

/// What `witan read` produced: extracted text or an outline.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ReadOutput {
    Content(ReadResponse),
    Outline(ReadOutlineResponse),
}

/// Implementation of `witan read`.
pub async fn read(config: Config, args: ReadArgs) -> Result<Out<ReadOutput>> {
    let source = Source::resolve(args.input()).await?;
    let backend = Backend::connect(&config).await?;
    run(&backend, &args, source.path()).await
}

/// The document to read. A downloaded URL lives in a temp file that is removed on drop.
#[derive(Debug)]
enum Source {
    Local(PathBuf),
    Downloaded(NamedTempFile),
}

impl Source {
    async fn resolve(input: &str) -> Result<Self> {
        if !is_url(input) {
            let path = PathBuf::from(input);
            tokio::fs::metadata(&path)
                .await
                .with_context(|| format!("cannot access file {input}"))?;
            return Ok(Source::Local(path));
        }
        download(input).await.map(Source::Downloaded)
    }

    fn path(&self) -> &Path {
        match self {
            Source::Local(path) => path,
            Source::Downloaded(file) => file.path(),
        }
    }
}

fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

async fn download(input: &str) -> Result<NamedTempFile> {
    let url = url::Url::parse(input).with_context(|| format!("invalid URL {input}"))?;
    let client = reqwest::Client::builder()
        .timeout(DOWNLOAD_TIMEOUT)
        .build()
        .context("Unable to create the HTTP client")?;
    let response = client
        .get(url.clone())
        .header(USER_AGENT, format!("witan-cli/{}", env!("CARGO_PKG_VERSION")))
        .send()
        .await
        .context("downloading URL")?;
    let status = response.status();
    if status != reqwest::StatusCode::OK {
        bail!("downloading URL: HTTP {}", status.as_u16());
    }

    let extension = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(extension_for_content_type)
        .map(str::to_string)
        .or_else(|| utils::extension(Path::new(url.path())).map(|ext| format!(".{ext}")))
        .unwrap_or_else(|| ".bin".to_string());
    let bytes = response.bytes().await.context("downloading URL")?;

    let file = tempfile::Builder::new()
        .prefix("witan-read-")
        .suffix(&extension)
        .tempfile()
        .context("creating temp file")?;
    utils::write(file.path(), &bytes).await?;
    debug!("Downloaded {} bytes from {url} to {}", bytes.len(), file.path().display());
    Ok(file)
}

/// The file extension that makes the API read a download the way its server described it.
fn extension_for_content_type(content_type: &str) -> Option<&'static str> {
    let media_type = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    let extension = match media_type.as_str() {
        "application/pdf" => ".pdf",
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => ".docx",
        "application/msword" => ".doc",
        "application/vnd.openxmlformats-officedocument.presentationml.presentation" => ".pptx",
        "application/vnd.ms-powerpoint" => ".ppt",
        "text/html" => ".html",
        "text/markdown" => ".md",
        "text/csv" => ".csv",
        "application/json" => ".json",
        "application/xml" | "text/xml" => ".xml",
        other if other.starts_with("text/") => ".txt",
        _ => return None,
    };
    Some(extension)
}

fn read_query(args: &ReadArgs) -> Vec<(&'static str, String)> {
    let mut query = Vec::new();
    if let Some(pages) = args.pages() {
        query.push(("pages", pages.to_string()));
    }
    if let Some(slides) = args.slides() {
        query.push(("slides", slides.to_string()));
    }
    if let Some(offset) = args.offset() {
        query.push(("offset", offset.to_string()));
    }
    if let Some(limit) = args.limit() {
        query.push(("limit", limit.to_string()));
    }
    query
}

pub(crate) async fn run(backend: &Backend, args: &ReadArgs, path: &Path) -> Result<Out<ReadOutput>> {
    let query = read_query(args);
    let query = query.as_slice();

    if args.outline() {
        let outline = match backend {
            Backend::Stateless(client) => client.read_outline(path, query).await?,
            Backend::Files(sync) => {
                let (_, outline) = sync
                    .with_remote_file(path, |remote: RemoteFile| async move {
                        sync.client().files_read_outline(&remote, query).await
                    })
                    .await?;
                outline
            }
        };
        return Ok(outline_out(outline));
    }

    let content = match backend {
        Backend::Stateless(client) => client.read(path, query).await?,
        Backend::Files(sync) => {
            let (_, content) = sync
                .with_remote_file(path, |remote: RemoteFile| async move {
                    sync.client().files_read(&remote, query).await
                })
                .await?;
            content
        }
    };
    Ok(content_out(content))
}

/// Numbered lines on stdout, a summary such as `pdf  [12 pages, 2 read, 80 lines total]` on
/// stderr.
fn content_out(response: ReadResponse) -> Out<ReadOutput> {
    let meta = &response.metadata;
    let lines: Vec<&str> = if response.content.is_empty() {
        Vec::new()
    } else {
        response.content.split('\n').collect()
    };
    let offset = meta.offset;
    let message = lines
        .iter()
        .zip(offset..)
        .map(|(line, number)| format!("{number:>6}\t{line}"))
        .collect::<Vec<_>>()
        .join("\n");

    let mut parts = Vec::new();
    if let Some(total) = meta.total_pages {
        let read = meta.read_pages.map(|n| format!(", {n} read")).unwrap_or_default();
        parts.push(format!("{total} pages{read}"));
    }
    if let Some(total) = meta.total_slides {
        let read = meta.read_slides.map(|n| format!(", {n} read")).unwrap_or_default();
        parts.push(format!("{total} slides{read}"));
    }
    parts.push(format!("{} lines total", meta.total_lines));
    if !lines.is_empty() {
        let last = offset + lines.len() as u64 - 1;
        parts.push(format!("showing {offset}-{last}"));
    }
    let notice = format!("{}  [{}]", response.format, parts.join(", "));

    Out::new(message, ReadOutput::Content(response)).with_notice(notice)
}

fn outline_out(response: ReadOutlineResponse) -> Out<ReadOutput> {
    let message = if response.outline.is_empty() {
        "(no outline)".to_string()
    } else {
        response
            .outline
            .iter()
            .map(|entry| {
                let reference = if let Some(pages) = &entry.pages {
                    format!("  [pages {pages}]")
                } else if let Some(slides) = &entry.slides {
                    format!("  [slide {slides}]")
                } else if let Some(line) = entry.offset {
                    format!("  [line {line}]")
                } else {
                    String::new()
                };
                format!("{}{}{reference}", "  ".repeat(entry.level), entry.title)
            })
            .collect::<Vec<_>>()
            .join("\n")
    };

    let meta = &response.metadata;
    let parts: Vec<String> = [
        meta.total_pages.map(|n| format!("{n} pages")),
        meta.total_slides.map(|n| format!("{n} slides")),
        meta.total_lines.map(|n| format!("{n} lines")),
    ]
    .into_iter()
    .flatten()
    .collect();

    let out = Out::new(message, ReadOutput::Outline(response));
    if parts.is_empty() {
        out
    } else {
        out.with_notice(format!("[{}]", parts.join(", ")))
    }
}
