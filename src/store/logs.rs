//! Append-only module log stream.

use pan_bagnat_common::error::{Error, Result};
use pan_bagnat_common::pagination::{Cursor, Page};
use pan_bagnat_common::types::{LogLevel, ModuleLog};

use super::Store;

const LOG_COLUMNS: &str = "id, module_id, level, message, meta, created_at";

impl Store {
    pub async fn insert_module_log(
        &self,
        module_id: &str,
        level: LogLevel,
        message: &str,
        meta: serde_json::Value,
    ) -> Result<ModuleLog> {
        let sql = format!(
            "INSERT INTO module_logs (module_id, level, message, meta) \
             VALUES ($1, $2, $3, $4) RETURNING {LOG_COLUMNS}"
        );
        let log = sqlx::query_as::<_, ModuleLog>(&sql)
            .bind(module_id)
            .bind(level.as_str())
            .bind(message)
            .bind(meta)
            .fetch_one(self.pool())
            .await?;
        Ok(log)
    }

    /// Newest-first keyset pagination over one module's logs; the cursor
    /// anchors on the last row's id.
    pub async fn list_module_logs(
        &self,
        module_id: &str,
        cursor: &Cursor,
    ) -> Result<Page<ModuleLog>> {
        let limit = cursor.limit.clamp(1, 1000);
        let last_id: Option<i64> = match &cursor.last {
            Some(entity) => Some(
                entity
                    .get("id")
                    .and_then(|v| v.as_i64())
                    .ok_or(Error::PaginationTokenInvalid)?,
            ),
            None => None,
        };

        let mut sql = format!(
            "SELECT {LOG_COLUMNS} FROM module_logs \
             WHERE module_id = $1 AND ($2 = '' OR message ILIKE '%' || $2 || '%')"
        );
        if last_id.is_some() {
            sql.push_str(" AND id < $3");
        }
        sql.push_str(&format!(" ORDER BY id DESC LIMIT {}", limit + 1));

        let mut query = sqlx::query_as::<_, ModuleLog>(&sql)
            .bind(module_id)
            .bind(cursor.filter.clone());
        if let Some(id) = last_id {
            query = query.bind(id);
        }
        let mut items = query.fetch_all(self.pool()).await.map_err(Error::from)?;

        let next_page_token = if items.len() as i64 > limit {
            items.truncate(limit as usize);
            items
                .last()
                .map(|last| cursor.next_with(serde_json::json!({"id": last.id})).encode())
        } else {
            None
        };
        Ok(Page {
            items,
            next_page_token,
        })
    }
}
