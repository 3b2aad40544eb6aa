use crate::api::retry::{RequestExecutor, RetryPolicy};
use crate::api::transport::RawResponse;
use crate::api::types::{
    CalcResponse, EditCell, EditRequest, EditResponse, ExecRequest, ExecResponse, FileResponse,
    LintResponse, ReadOutlineResponse, ReadResponse, RemoteFile, RenderedImage,
};
use crate::error::ApiError;
use crate::{utils, Result};
use anyhow::Context;
use bytes::Bytes;
use reqwest::header::{CONTENT_TYPE, USER_AGENT};
use reqwest::multipart::{Form, Part};
use reqwest::{Method, RequestBuilder};
use serde::de::DeserializeOwned;
use std::path::Path;

const XLSX_CONTENT_TYPE: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";
const XLS_CONTENT_TYPE: &str = "application/vnd.ms-excel";
const XLSM_CONTENT_TYPE: &str = "application/vnd.ms-excel.sheet.macroEnabled.12";
const OCTET_STREAM: &str = "application/octet-stream";
const PLAIN_TEXT: &str = "text/plain";

/// Query parameters, in order. Keys may repeat.
pub type Query = [(&'static str, String)];

/// The content type the API expects for an upload, chosen by file extension.
pub fn content_type_for(path: &Path) -> &'static str {
    match utils::extension(path).as_deref() {
        Some("xlsx") => XLSX_CONTENT_TYPE,
        Some("xls") => XLS_CONTENT_TYPE,
        Some("xlsm") => XLSM_CONTENT_TYPE,
        _ => document_content_type(path).unwrap_or(OCTET_STREAM),
    }
}

/// The content type sent to `/v0/read`. Unknown extensions are read as plain text.
pub fn read_content_type_for(path: &Path) -> &'static str {
    document_content_type(path).unwrap_or(PLAIN_TEXT)
}

fn document_content_type(path: &Path) -> Option<&'static str> {
    let content_type = match utils::extension(path)?.as_str() {
        "pdf" => "application/pdf",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "doc" => "application/msword",
        "pptx" => "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        "ppt" => "application/vnd.ms-powerpoint",
        "html" | "htm" => "text/html",
        "md" => "text/markdown",
        "csv" => "text/csv",
        "tsv" => "text/tab-separated-values",
        "json" => "application/json",
        "jsonl" | "ndjson" => "application/x-ndjson",
        "xml" => "application/xml",
        "yaml" | "yml" => "text/yaml",
        "toml" => "text/x-toml",
        "txt" => PLAIN_TEXT,
        _ => return None,
    };
    Some(content_type)
}

/// A local file read into memory once, so its bytes can be re-sent on every retry.
#[derive(Debug, Clone)]
struct LocalFile {
    filename: String,
    content_type: &'static str,
    bytes: Bytes,
}

impl LocalFile {
    async fn read(path: &Path) -> Result<Self> {
        Self::read_as(path, content_type_for(path)).await
    }

    async fn read_as(path: &Path, content_type: &'static str) -> Result<Self> {
        let bytes = utils::read(path)
            .await
            .with_context(|| format!("Cannot open file {}", path.display()))?;
        Ok(Self {
            filename: utils::file_name(path),
            content_type,
            bytes: Bytes::from(bytes),
        })
    }

    /// A fresh multipart part named `file`.
    fn part(&self) -> Result<Part> {
        Part::stream(self.bytes.clone())
            .file_name(self.filename.clone())
            .mime_str(self.content_type)
            .context("Unable to build the multipart file part")
    }
}

/// The Witan API client. Every call goes through the retrying [`RequestExecutor`], and every
/// non-success response becomes an [`ApiError`].
#[derive(Debug, Clone)]
pub struct Client {
    base_url: String,
    api_key: Option<String>,
    user_agent: String,
    executor: RequestExecutor,
}

impl Client {
    /// Creates a client for `base_url`.
    ///
    /// # Errors
    /// - When the HTTP client cannot be constructed (e.g. TLS initialization fails).
    pub fn new(base_url: &str, api_key: Option<String>, policy: RetryPolicy) -> Result<Self> {
        let http = reqwest::Client::builder()
            .build()
            .context("Unable to create the HTTP client")?;
        Ok(Self::with_executor(
            base_url,
            api_key,
            RequestExecutor::new(http, policy),
        ))
    }

    pub(crate) fn with_executor(
        base_url: &str,
        api_key: Option<String>,
        executor: RequestExecutor,
    ) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            user_agent: format!("witan-cli/{}", env!("CARGO_PKG_VERSION")),
            executor,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.executor.policy()
    }

    fn request(&self, client: &reqwest::Client, method: Method, path: &str) -> RequestBuilder {
        let builder = client
            .request(method, format!("{}{path}", self.base_url))
            .header(USER_AGENT, &self.user_agent);
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    /// Sends with retries and turns a non-success response into an [`ApiError`].
    async fn send<F>(&self, build: F) -> Result<RawResponse>
    where
        F: FnMut(&reqwest::Client) -> Result<RequestBuilder> + Send,
    {
        let response = self.executor.send(build).await?;
        if response.is_success() {
            Ok(response)
        } else {
            Err(ApiError::from_response(
                response.status(),
                response.body(),
                response.retry_after(),
            )
            .into())
        }
    }

    async fn send_json<T, F>(&self, what: &str, build: F) -> Result<T>
    where
        T: DeserializeOwned,
        F: FnMut(&reqwest::Client) -> Result<RequestBuilder> + Send,
    {
        let response = self.send(build).await?;
        serde_json::from_slice(response.body())
            .with_context(|| format!("Unable to parse the {what} response"))
    }

    async fn send_image<F>(&self, build: F) -> Result<RenderedImage>
    where
        F: FnMut(&reqwest::Client) -> Result<RequestBuilder> + Send,
    {
        let response = self.send(build).await?;
        let content_type = response.content_type().unwrap_or("image/png").to_string();
        Ok(RenderedImage {
            content_type,
            bytes: response.into_body(),
        })
    }

    fn revision_query(remote: &RemoteFile, query: &Query) -> Vec<(&'static str, String)> {
        let mut all = vec![("revision", remote.revision_id().to_string())];
        all.extend(query.iter().cloned());
        all
    }

    // Files

    /// Uploads a workbook as a new remote file.
    pub async fn upload_file(&self, path: &Path) -> Result<FileResponse> {
        let workbook = LocalFile::read(path).await?;
        self.send_json("upload", |client| {
            let form = Form::new().part("file", workbook.part()?);
            Ok(self
                .request(client, Method::POST, "/v0/files")
                .multipart(form))
        })
        .await
    }

    /// Uploads a workbook as a new revision of an existing remote file.
    pub async fn upload_file_version(&self, file_id: &str, path: &Path) -> Result<FileResponse> {
        let workbook = LocalFile::read(path).await?;
        let endpoint = format!("/v0/files/{file_id}");
        self.send_json("upload", |client| {
            let form = Form::new().part("file", workbook.part()?);
            Ok(self
                .request(client, Method::PUT, &endpoint)
                .multipart(form))
        })
        .await
    }

    /// Downloads the bytes of one revision of a remote file.
    pub async fn download_file_content(&self, file_id: &str, revision_id: &str) -> Result<Bytes> {
        let endpoint = format!("/v0/files/{file_id}/content");
        let response = self
            .send(|client| {
                Ok(self
                    .request(client, Method::GET, &endpoint)
                    .query(&[("revision", revision_id)]))
            })
            .await?;
        Ok(response.into_body())
    }

    pub async fn files_calc(&self, remote: &RemoteFile, query: &Query) -> Result<CalcResponse> {
        let endpoint = format!("/v0/files/{}/xlsx/calc", remote.file_id());
        let query = Self::revision_query(remote, query);
        self.send_json("calc", |client| {
            Ok(self
                .request(client, Method::GET, &endpoint)
                .query(&query))
        })
        .await
    }

    pub async fn files_lint(&self, remote: &RemoteFile, query: &Query) -> Result<LintResponse> {
        let endpoint = format!("/v0/files/{}/xlsx/lint", remote.file_id());
        let query = Self::revision_query(remote, query);
        self.send_json("lint", |client| {
            Ok(self
                .request(client, Method::GET, &endpoint)
                .query(&query))
        })
        .await
    }

    pub async fn files_render(&self, remote: &RemoteFile, query: &Query) -> Result<RenderedImage> {
        let endpoint = format!("/v0/files/{}/xlsx/render", remote.file_id());
        let query = Self::revision_query(remote, query);
        self.send_image(|client| {
            Ok(self
                .request(client, Method::GET, &endpoint)
                .query(&query))
        })
        .await
    }

    pub async fn files_exec(
        &self,
        remote: &RemoteFile,
        request: &ExecRequest,
        save: bool,
    ) -> Result<ExecResponse> {
        let endpoint = format!("/v0/files/{}/xlsx/exec", remote.file_id());
        let mut query = Self::revision_query(remote, &[]);
        if save {
            query.push(("save", "true".to_string()));
        }
        self.send_json("exec", |client| {
            Ok(self
                .request(client, Method::POST, &endpoint)
                .query(&query)
                .json(request))
        })
        .await
    }

    pub async fn files_edit(&self, remote: &RemoteFile, cells: &[EditCell]) -> Result<EditResponse> {
        let endpoint = format!("/v0/files/{}/xlsx/edit", remote.file_id());
        let query = Self::revision_query(remote, &[]);
        let body = EditRequest { cells };
        self.send_json("edit", |client| {
            Ok(self
                .request(client, Method::POST, &endpoint)
                .query(&query)
                .json(&body))
        })
        .await
    }

    pub async fn files_read(&self, remote: &RemoteFile, query: &Query) -> Result<ReadResponse> {
        self.files_read_json("read", remote, query, false).await
    }

    pub async fn files_read_outline(
        &self,
        remote: &RemoteFile,
        query: &Query,
    ) -> Result<ReadOutlineResponse> {
        self.files_read_json("read outline", remote, query, true)
            .await
    }

    async fn files_read_json<T: DeserializeOwned>(
        &self,
        what: &str,
        remote: &RemoteFile,
        query: &Query,
        outline: bool,
    ) -> Result<T> {
        let endpoint = format!("/v0/files/{}/read", remote.file_id());
        let mut query = Self::revision_query(remote, query);
        if outline {
            query.push(("outline", "true".to_string()));
        }
        self.send_json(what, |client| {
            Ok(self
                .request(client, Method::GET, &endpoint)
                .query(&query))
        })
        .await
    }

    // Stateless: the workbook travels with every request and nothing is retained.

    fn raw_workbook_request(
        &self,
        client: &reqwest::Client,
        endpoint: &str,
        workbook: &LocalFile,
        query: &Query,
    ) -> RequestBuilder {
        self.request(client, Method::POST, endpoint)
            .query(query)
            .header(CONTENT_TYPE, workbook.content_type)
            .body(workbook.bytes.clone())
    }

    pub async fn calc(&self, path: &Path, query: &Query) -> Result<CalcResponse> {
        let workbook = LocalFile::read(path).await?;
        self.send_json("calc", |client| {
            Ok(self.raw_workbook_request(client, "/v0/xlsx/calc", &workbook, query))
        })
        .await
    }

    pub async fn lint(&self, path: &Path, query: &Query) -> Result<LintResponse> {
        let workbook = LocalFile::read(path).await?;
        self.send_json("lint", |client| {
            Ok(self.raw_workbook_request(client, "/v0/xlsx/lint", &workbook, query))
        })
        .await
    }

    pub async fn render(&self, path: &Path, query: &Query) -> Result<RenderedImage> {
        let workbook = LocalFile::read(path).await?;
        self.send_image(|client| {
            Ok(self.raw_workbook_request(client, "/v0/xlsx/render", &workbook, query))
        })
        .await
    }

    pub async fn exec(&self, path: &Path, request: &ExecRequest, save: bool) -> Result<ExecResponse> {
        let workbook = LocalFile::read(path).await?;
        let exec = serde_json::to_string(request).context("Unable to serialize the exec request")?;
        let query: Vec<(&str, &str)> = if save { vec![("save", "true")] } else { vec![] };
        self.send_json("exec", |client| {
            let form = Form::new()
                .part("file", workbook.part()?)
                .text("exec", exec.clone());
            Ok(self
                .request(client, Method::POST, "/v0/xlsx/exec")
                .query(&query)
                .multipart(form))
        })
        .await
    }

    /// Extracts text from a document by sending its bytes to `/v0/read`.
    pub async fn read(&self, path: &Path, query: &Query) -> Result<ReadResponse> {
        self.read_json("read", path, query, false).await
    }

    /// Like [`Client::read`], but asks for the document outline instead of its text.
    pub async fn read_outline(&self, path: &Path, query: &Query) -> Result<ReadOutlineResponse> {
        self.read_json("read outline", path, query, true).await
    }

    async fn read_json<T: DeserializeOwned>(
        &self,
        what: &str,
        path: &Path,
        query: &Query,
        outline: bool,
    ) -> Result<T> {
        let document = LocalFile::read_as(path, read_content_type_for(path)).await?;
        let mut query = query.to_vec();
        if outline {
            query.push(("outline", "true".to_string()));
        }
        self.send_json(what, |client| {
            Ok(self.raw_workbook_request(client, "/v0/read", &document, &query))
        })
        .await
    }

    pub async fn edit(&self, path: &Path, cells: &[EditCell]) -> Result<EditResponse> {
        let workbook = LocalFile::read(path).await?;
        let cells = serde_json::to_string(cells).context("Unable to serialize the edit cells")?;
        self.send_json("edit", |client| {
            let form = Form::new()
                .part("file", workbook.part()?)
                .text("cells", cells.clone());
            Ok(self
                .request(client, Method::POST, "/v0/xlsx/edit")
                .multipart(form))
        })
        .await
    }
}
