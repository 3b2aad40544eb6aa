//! Calls to the management API on behalf of a signed-in user.

use crate::api::TokenResponse;
use crate::Result;
use anyhow::{bail, Context};
use reqwest::header::USER_AGENT;
use std::time::Duration;

const SESSION_TIMEOUT: Duration = Duration::from_secs(10);

fn user_agent() -> String {
    format!("witan-cli/{}", env!("CARGO_PKG_VERSION"))
}

fn http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(SESSION_TIMEOUT)
        .build()
        .context("Unable to create the HTTP client")
}

/// Exchanges a stored session token for a short-lived API bearer token.
///
/// # Errors
/// - When the request fails, the status is not 200, or the response carries no token.
pub(crate) async fn exchange_session_token(
    management_api_url: &str,
    session_token: &str,
) -> Result<String> {
    let response = http_client()?
        .get(format!("{management_api_url}/v0/auth/token"))
        .header(USER_AGENT, user_agent())
        .bearer_auth(session_token)
        .send()
        .await
        .context("Unable to reach the management API")?;
    let status = response.status();
    if status != reqwest::StatusCode::OK {
        bail!("HTTP {}", status.as_u16());
    }
    let body: TokenResponse = response
        .json()
        .await
        .context("Unable to parse the token response")?;
    if body.token.is_empty() {
        bail!("empty token in response");
    }
    Ok(body.token)
}

/// Revokes the session on the server.
pub(crate) async fn revoke_session(management_api_url: &str, session_token: &str) -> Result<()> {
    http_client()?
        .post(format!("{management_api_url}/v0/auth/sign-out"))
        .header(USER_AGENT, user_agent())
        .bearer_auth(session_token)
        .send()
        .await
        .context("Unable to reach the management API")?;
    Ok(())
}
