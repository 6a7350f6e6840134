//! SSH key rows and their append-only audit events.
//!
//! Deletion is blocked by the `modules.ssh_key_id` foreign key while any
//! module still references the key; the 23503 violation surfaces as a
//! `Conflict` sentinel. Inserting an event touches the key's
//! `last_used_at` in the same transaction.

use pan_bagnat_common::error::{Error, Result};
use pan_bagnat_common::id::{KIND_SSH_KEY, new_id};
use pan_bagnat_common::types::{SshKey, SshKeyEvent};

use super::Store;

const KEY_COLUMNS: &str =
    "id, name, public_key, private_key, user_id, module_id, created_at, updated_at, last_used_at";

#[derive(Debug, Clone)]
pub struct NewSshKey {
    pub name: String,
    pub public_key: String,
    pub private_key: String,
    pub user_id: Option<String>,
    pub module_id: Option<String>,
}

impl Store {
    pub async fn create_ssh_key(&self, new: NewSshKey) -> Result<SshKey> {
        if new.name.is_empty() {
            return Err(Error::InvalidInput("key name is required".to_string()));
        }
        // Ownership is user XOR module.
        if new.user_id.is_some() == new.module_id.is_some() {
            return Err(Error::InvalidInput(
                "a key is owned by exactly one of user or module".to_string(),
            ));
        }
        let id = new_id(KIND_SSH_KEY);
        let sql = format!(
            "INSERT INTO ssh_keys (id, name, public_key, private_key, user_id, module_id) \
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING {KEY_COLUMNS}"
        );
        let key = sqlx::query_as::<_, SshKey>(&sql)
            .bind(&id)
            .bind(&new.name)
            .bind(&new.public_key)
            .bind(&new.private_key)
            .bind(&new.user_id)
            .bind(&new.module_id)
            .fetch_one(self.pool())
            .await?;
        Ok(key)
    }

    pub async fn get_ssh_key(&self, id: &str) -> Result<SshKey> {
        let sql = format!("SELECT {KEY_COLUMNS} FROM ssh_keys WHERE id = $1");
        sqlx::query_as::<_, SshKey>(&sql)
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| Error::NotFound(format!("ssh key {id}")))
    }

    pub async fn list_ssh_keys(&self) -> Result<Vec<SshKey>> {
        let sql = format!("SELECT {KEY_COLUMNS} FROM ssh_keys ORDER BY name");
        Ok(sqlx::query_as::<_, SshKey>(&sql)
            .fetch_all(self.pool())
            .await?)
    }

    /// Delete a key. While any module references it the FK violation comes
    /// back as `Conflict` ("still referenced").
    pub async fn delete_ssh_key(&self, id: &str) -> Result<()> {
        let done = sqlx::query("DELETE FROM ssh_keys WHERE id = $1")
            .bind(id)
            .execute(self.pool())
            .await
            .map_err(|e| match Error::from(e) {
                Error::Conflict(_) => {
                    Error::Conflict(format!("ssh key {id} is still referenced by a module"))
                }
                other => other,
            })?;
        if done.rows_affected() == 0 {
            return Err(Error::NotFound(format!("ssh key {id}")));
        }
        Ok(())
    }

    /// Append an audit event and touch the key's `last_used_at` atomically.
    pub async fn insert_ssh_key_event(
        &self,
        ssh_key_id: &str,
        message: &str,
        actor_user: Option<&str>,
        actor_module: Option<&str>,
    ) -> Result<SshKeyEvent> {
        let mut tx = self.pool().begin().await.map_err(Error::from)?;
        let event = sqlx::query_as::<_, SshKeyEvent>(
            "INSERT INTO ssh_key_events (ssh_key_id, message, actor_user, actor_module) \
             VALUES ($1, $2, $3, $4) \
             RETURNING id, ssh_key_id, message, actor_user, actor_module, created_at",
        )
        .bind(ssh_key_id)
        .bind(message)
        .bind(actor_user)
        .bind(actor_module)
        .fetch_one(&mut *tx)
        .await
        .map_err(Error::from)?;
        sqlx::query("UPDATE ssh_keys SET last_used_at = now() WHERE id = $1")
            .bind(ssh_key_id)
            .execute(&mut *tx)
            .await
            .map_err(Error::from)?;
        tx.commit().await.map_err(Error::from)?;
        Ok(event)
    }

    pub async fn list_ssh_key_events(&self, ssh_key_id: &str) -> Result<Vec<SshKeyEvent>> {
        Ok(sqlx::query_as::<_, SshKeyEvent>(
            "SELECT id, ssh_key_id, message, actor_user, actor_module, created_at \
             FROM ssh_key_events WHERE ssh_key_id = $1 ORDER BY id DESC LIMIT 200",
        )
        .bind(ssh_key_id)
        .fetch_all(self.pool())
        .await?)
    }
}
