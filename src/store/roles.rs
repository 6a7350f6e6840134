//! Role rows. The rules DSL itself is evaluated elsewhere; the store only
//! persists the JSON blob.

use pan_bagnat_common::error::{Error, Result};

use super::Store;

impl Store {
    pub async fn update_role_rules_json(
        &self,
        role_id: &str,
        rules: serde_json::Value,
    ) -> Result<()> {
        let done = sqlx::query("UPDATE roles SET rules = $2, updated_at = now() WHERE id = $1")
            .bind(role_id)
            .bind(rules)
            .execute(self.pool())
            .await?;
        if done.rows_affected() == 0 {
            return Err(Error::NotFound(format!("role {role_id}")));
        }
        Ok(())
    }
}
