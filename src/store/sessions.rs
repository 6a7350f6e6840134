//! Session reads/writes the backend needs directly; the full session
//! logic (device reuse, sliding expiry) lives in
//! `pan_bagnat_common::sessions` and is shared with the page proxy.

use pan_bagnat_common::error::{Error, Result};
use pan_bagnat_common::sessions;
use pan_bagnat_common::types::Session;

use super::Store;

impl Store {
    pub async fn get_session(&self, session_id: &str) -> Result<Session> {
        sessions::get_session(self.pool(), session_id)
            .await
            .map_err(Error::from)?
            .ok_or_else(|| Error::NotFound(format!("session {session_id}")))
    }

    /// Revoke every session a user owns; returns the number deleted.
    pub async fn delete_user_sessions(&self, ft_login: &str) -> Result<u64> {
        Ok(sessions::delete_user_sessions(self.pool(), ft_login).await?)
    }
}
