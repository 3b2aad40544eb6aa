//! In-memory transports and a recording sleeper used by tests throughout the crate.

use crate::api::retry::Sleeper;
use crate::api::transport::{RawResponse, Transport, TransportError};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

/// A request as seen by a test transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RecordedRequest {
    pub(crate) method: String,
    pub(crate) path: String,
    pub(crate) query: Option<String>,
    pub(crate) authorization: Option<String>,
    pub(crate) user_agent: Option<String>,
    pub(crate) content_type: Option<String>,
}

impl RecordedRequest {
    fn from_request(request: &reqwest::Request) -> Self {
        let header = |name: &str| {
            request
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        Self {
            method: request.method().to_string(),
            path: request.url().path().to_string(),
            query: request.url().query().map(str::to_string),
            authorization: header("authorization"),
            user_agent: header("user-agent"),
            content_type: header("content-type"),
        }
    }

    /// `"METHOD /path"`, handy for asserting call sequences.
    pub(crate) fn line(&self) -> String {
        format!("{} {}", self.method, self.path)
    }
}

fn response(status: u16, headers: &[(&'static str, String)], body: &str) -> RawResponse {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            map.insert(name, value);
        }
    }
    RawResponse::new(status, map, body.as_bytes().to_vec())
}

fn json(status: u16, body: &str) -> RawResponse {
    response(status, &[("content-type", "application/json".to_string())], body)
}

/// One scripted outcome.
#[derive(Debug, Clone)]
pub(crate) enum Scripted {
    Respond {
        status: u16,
        headers: Vec<(&'static str, String)>,
        body: String,
    },
    Timeout,
    Fail(&'static str),
}

impl Scripted {
    pub(crate) fn status(status: u16) -> Self {
        Scripted::Respond {
            status,
            headers: Vec::new(),
            body: String::new(),
        }
    }

    pub(crate) fn json(status: u16, body: &str) -> Self {
        Scripted::Respond {
            status,
            headers: vec![("content-type", "application/json".to_string())],
            body: body.to_string(),
        }
    }

    pub(crate) fn with_header(mut self, name: &'static str, value: &str) -> Self {
        if let Scripted::Respond { headers, .. } = &mut self {
            headers.push((name, value.to_string()));
        }
        self
    }

    fn outcome(&self) -> Result<RawResponse, TransportError> {
        match self {
            Scripted::Respond {
                status,
                headers,
                body,
            } => Ok(response(*status, headers, body)),
            Scripted::Timeout => Err(TransportError::Timeout),
            Scripted::Fail(message) => Err(TransportError::Failed((*message).into())),
        }
    }
}

/// Plays back a fixed list of outcomes in order, repeating the last one when the list runs out.
#[derive(Debug, Default)]
pub(crate) struct ScriptedTransport {
    script: Vec<Scripted>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl ScriptedTransport {
    pub(crate) fn new(script: Vec<Scripted>) -> Self {
        Self {
            script,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub(crate) fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn execute(&self, request: reqwest::Request) -> Result<RawResponse, TransportError> {
        let index = {
            let mut requests = self.requests.lock().unwrap();
            requests.push(RecordedRequest::from_request(&request));
            requests.len() - 1
        };
        let step = self
            .script
            .get(index)
            .or(self.script.last())
            .expect("the script must not be empty");
        step.outcome()
    }
}

#[derive(Debug, Default)]
struct FakeState {
    next_file: u32,
    next_revision: u32,
    files: BTreeMap<String, Vec<String>>,
    overrides: BTreeMap<(String, String), (u16, String)>,
    requests: Vec<RecordedRequest>,
}

impl FakeState {
    fn new_revision(&mut self) -> String {
        self.next_revision += 1;
        format!("r{}", self.next_revision)
    }

    fn has_revision(&self, file_id: &str, query: Option<&str>) -> bool {
        let revision = query
            .into_iter()
            .flat_map(|q| q.split('&'))
            .find_map(|pair| pair.strip_prefix("revision="));
        match (self.files.get(file_id), revision) {
            (Some(revisions), Some(revision)) => revisions.iter().any(|r| r == revision),
            (Some(_), None) => true,
            _ => false,
        }
    }
}

fn file_json(id: &str, revision: &str) -> String {
    serde_json::json!({
        "id": id,
        "object": "file",
        "filename": "book.xlsx",
        "bytes": 10,
        "revision_id": revision,
        "status": "processed",
    })
    .to_string()
}

fn not_found() -> RawResponse {
    json(
        404,
        r#"{"error":{"code":"NOT_FOUND","message":"file not found"}}"#,
    )
}

/// A small stand-in for the file-backed API.
///
/// `POST /v0/files` creates `f1`, `f2`, ... and `PUT /v0/files/{id}` adds a revision to a known
/// file. Revisions are numbered globally: `r1`, `r2`, ... Operations under `/v0/files/{id}/` are
/// answered with a minimal success body when the file (and requested revision) exists, and with
/// 404 otherwise. Any route can be overridden with a fixed response.
#[derive(Debug, Default)]
pub(crate) struct FakeFileServer {
    state: Mutex<FakeState>,
}

impl FakeFileServer {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Answers `method path` with a fixed response from now on.
    pub(crate) fn override_route(&self, method: &str, path: &str, status: u16, body: &str) {
        self.state.lock().unwrap().overrides.insert(
            (method.to_string(), path.to_string()),
            (status, body.to_string()),
        );
    }

    /// Drops a file, as if the service had purged it.
    pub(crate) fn forget(&self, file_id: &str) {
        self.state.lock().unwrap().files.remove(file_id);
    }

    pub(crate) fn requests(&self) -> Vec<RecordedRequest> {
        self.state.lock().unwrap().requests.clone()
    }

    /// The recorded call sequence as `"METHOD /path"` lines.
    pub(crate) fn lines(&self) -> Vec<String> {
        self.requests().iter().map(RecordedRequest::line).collect()
    }

    pub(crate) fn clear_requests(&self) {
        self.state.lock().unwrap().requests.clear();
    }

    fn handle(&self, request: &RecordedRequest) -> RawResponse {
        let mut state = self.state.lock().unwrap();
        state.requests.push(request.clone());

        let route = (request.method.clone(), request.path.clone());
        if let Some((status, body)) = state.overrides.get(&route) {
            return json(*status, body);
        }

        let segments: Vec<&str> = request
            .path
            .trim_start_matches('/')
            .split('/')
            .collect();
        match (request.method.as_str(), segments.as_slice()) {
            ("POST", ["v0", "files"]) => {
                state.next_file += 1;
                let id = format!("f{}", state.next_file);
                let revision = state.new_revision();
                state.files.insert(id.clone(), vec![revision.clone()]);
                json(200, &file_json(&id, &revision))
            }
            ("PUT", ["v0", "files", id]) => {
                if !state.files.contains_key(*id) {
                    return not_found();
                }
                let revision = state.new_revision();
                if let Some(revisions) = state.files.get_mut(*id) {
                    revisions.push(revision.clone());
                }
                json(200, &file_json(id, &revision))
            }
            (_, ["v0", "files", id, rest @ ..]) => {
                if !state.has_revision(id, request.query.as_deref()) {
                    return not_found();
                }
                match rest {
                    ["content"] => RawResponse::new(200, HeaderMap::new(), b"updated".to_vec()),
                    ["xlsx", "calc"] => json(200, r#"{"touched":{},"errors":[]}"#),
                    ["xlsx", "lint"] => json(200, r#"{"diagnostics":[],"total":0}"#),
                    _ => json(200, "{}"),
                }
            }
            _ => json(
                400,
                r#"{"error":{"code":"INVALID_ARG","message":"unexpected route"}}"#,
            ),
        }
    }
}

#[async_trait]
impl Transport for FakeFileServer {
    async fn execute(&self, request: reqwest::Request) -> Result<RawResponse, TransportError> {
        Ok(self.handle(&RecordedRequest::from_request(&request)))
    }
}

/// Records requested sleeps instead of sleeping.
#[derive(Debug, Default)]
pub(crate) struct RecordingSleeper {
    sleeps: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub(crate) fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap().clone()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.sleeps.lock().unwrap().push(duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(method: &str, path: &str, query: Option<&str>) -> RecordedRequest {
        RecordedRequest {
            method: method.to_string(),
            path: path.to_string(),
            query: query.map(str::to_string),
            authorization: None,
            user_agent: None,
            content_type: None,
        }
    }

    #[test]
    fn test_fake_server_lifecycle() {
        let server = FakeFileServer::new();
        let created = server.handle(&request("POST", "/v0/files", None));
        assert_eq!(created.status(), 200);
        let body: serde_json::Value = serde_json::from_slice(created.body()).unwrap();
        assert_eq!(body["id"], "f1");
        assert_eq!(body["revision_id"], "r1");

        let updated = server.handle(&request("PUT", "/v0/files/f1", None));
        let body: serde_json::Value = serde_json::from_slice(updated.body()).unwrap();
        assert_eq!(body["revision_id"], "r2");

        let calc = server.handle(&request("GET", "/v0/files/f1/xlsx/calc", Some("revision=r2")));
        assert_eq!(calc.status(), 200);
        let stale = server.handle(&request("GET", "/v0/files/f1/xlsx/calc", Some("revision=r9")));
        assert_eq!(stale.status(), 404);

        server.forget("f1");
        assert_eq!(server.handle(&request("PUT", "/v0/files/f1", None)).status(), 404);
        assert_eq!(server.lines().len(), 5);
    }
}
