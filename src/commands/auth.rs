use crate::commands::Out;
use crate::config::ConfigFile;
use crate::{session, Config, Result};
use tracing::{debug, warn};

/// Implementation of `witan auth logout`.
///
/// Revokes the stored session on the server (best effort) and deletes the saved configuration.
pub async fn logout(config: Config) -> Result<Out<()>> {
    let Some(session_token) = config.session_token() else {
        return Ok(Out::new_message("Not logged in."));
    };

    match session::revoke_session(config.management_api_url(), session_token).await {
        Ok(()) => debug!("Revoked the session"),
        Err(e) => warn!("Could not revoke session: {e:#}"),
    }

    ConfigFile::delete(config.config_path()).await?;
    Ok(Out::new_message("Logged out"))
}
