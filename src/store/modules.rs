//! Module rows: CRUD, keyset-paginated listing, the deploy mutex flag and
//! git snapshot writes.

use chrono::{DateTime, Utc};
use sqlx::Row;

use pan_bagnat_common::error::{Error, Result};
use pan_bagnat_common::id::{KIND_MODULE, new_id};
use pan_bagnat_common::pagination::{Cursor, Page};
use pan_bagnat_common::slug::is_valid_slug;
use pan_bagnat_common::types::{Module, ModuleStatus};

use super::Store;

const MODULE_COLUMNS: &str = "id, slug, name, git_url, git_branch, ssh_key_id, status, \
     is_deploying, last_deploy, last_deploy_status, current_commit_hash, \
     current_commit_subject, latest_commit_hash, latest_commit_subject, \
     late_commits, git_last_fetch, git_last_pull, last_update, created_at, updated_at";

#[derive(Debug, Clone)]
pub struct NewModule {
    pub slug: String,
    pub name: String,
    pub git_url: String,
    pub git_branch: String,
    pub ssh_key_id: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ModulePatch {
    pub name: Option<String>,
    pub git_branch: Option<String>,
    /// `Some(None)` clears the key reference.
    pub ssh_key_id: Option<Option<String>>,
    pub status: Option<ModuleStatus>,
}

/// Fields recomputed after every git operation.
#[derive(Debug, Clone, Default)]
pub struct GitSnapshot {
    pub current_commit_hash: Option<String>,
    pub current_commit_subject: Option<String>,
    pub latest_commit_hash: Option<String>,
    pub latest_commit_subject: Option<String>,
    pub late_commits: i32,
    pub git_last_fetch: Option<DateTime<Utc>>,
    pub git_last_pull: Option<DateTime<Utc>>,
}

impl Store {
    pub async fn create_module(&self, new: NewModule) -> Result<Module> {
        if !is_valid_slug(&new.slug) {
            return Err(Error::InvalidInput(format!(
                "slug must match [a-z0-9-]+: {:?}",
                new.slug
            )));
        }
        if new.git_url.is_empty() || new.git_branch.is_empty() {
            return Err(Error::InvalidInput(
                "git_url and git_branch are required".to_string(),
            ));
        }
        let id = new_id(KIND_MODULE);
        let sql = format!(
            "INSERT INTO modules (id, slug, name, git_url, git_branch, ssh_key_id, status) \
             VALUES ($1, $2, $3, $4, $5, $6, 'cloning') RETURNING {MODULE_COLUMNS}"
        );
        let module = sqlx::query_as::<_, Module>(&sql)
            .bind(&id)
            .bind(&new.slug)
            .bind(&new.name)
            .bind(&new.git_url)
            .bind(&new.git_branch)
            .bind(&new.ssh_key_id)
            .fetch_one(self.pool())
            .await?;
        Ok(module)
    }

    pub async fn get_module(&self, id: &str) -> Result<Module> {
        let sql = format!("SELECT {MODULE_COLUMNS} FROM modules WHERE id = $1");
        sqlx::query_as::<_, Module>(&sql)
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| Error::NotFound(format!("module {id}")))
    }

    pub async fn get_module_by_slug(&self, slug: &str) -> Result<Module> {
        let sql = format!("SELECT {MODULE_COLUMNS} FROM modules WHERE slug = $1");
        sqlx::query_as::<_, Module>(&sql)
            .bind(slug)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| Error::NotFound(format!("module slug {slug}")))
    }

    /// Keyset-paginated module listing.
    ///
    /// The caller's cursor names an order column (whitelisted), a direction,
    /// a substring filter and a limit; `limit+1` rows are fetched and the
    /// next-page token is derived from the last returned row.
    pub async fn list_modules(&self, cursor: &Cursor) -> Result<Page<Module>> {
        let order_col = match cursor.order_by.as_str() {
            "" | "name" => "name",
            "slug" => "slug",
            "id" => "id",
            other => {
                return Err(Error::InvalidInput(format!("cannot order by {other:?}")));
            }
        };
        let limit = cursor.limit.clamp(1, 500);
        let dir = cursor.direction;

        let mut sql = format!(
            "SELECT {MODULE_COLUMNS} FROM modules \
             WHERE ($1 = '' OR name ILIKE '%' || $1 || '%' OR slug ILIKE '%' || $1 || '%')"
        );
        let (last_value, last_id) = match &cursor.last {
            Some(entity) => {
                let value = entity
                    .get(order_col)
                    .and_then(|v| v.as_str())
                    .ok_or(Error::PaginationTokenInvalid)?;
                let id = entity
                    .get("id")
                    .and_then(|v| v.as_str())
                    .ok_or(Error::PaginationTokenInvalid)?;
                (Some(value.to_string()), Some(id.to_string()))
            }
            None => (None, None),
        };
        if last_value.is_some() {
            sql.push_str(&format!(
                " AND ({order_col}, id) {} ($2, $3)",
                dir.as_cmp()
            ));
        }
        sql.push_str(&format!(
            " ORDER BY {order_col} {0}, id {0} LIMIT {1}",
            dir.as_sql(),
            limit + 1
        ));

        let mut query = sqlx::query_as::<_, Module>(&sql).bind(cursor.filter.clone());
        if let (Some(value), Some(id)) = (last_value, last_id) {
            query = query.bind(value).bind(id);
        }
        let mut items = query.fetch_all(self.pool()).await.map_err(Error::from)?;

        let next_page_token = if items.len() as i64 > limit {
            items.truncate(limit as usize);
            items.last().map(|last| {
                cursor
                    .next_with(serde_json::json!({
                        "id": last.id,
                        "name": last.name,
                        "slug": last.slug,
                    }))
                    .encode()
            })
        } else {
            None
        };
        Ok(Page {
            items,
            next_page_token,
        })
    }

    pub async fn patch_module(&self, id: &str, patch: ModulePatch) -> Result<Module> {
        // `cloning` is the creation-only state; nothing moves back into it.
        if patch.status == Some(ModuleStatus::Cloning) {
            return Err(Error::Conflict(
                "a module cannot transition back to cloning".to_string(),
            ));
        }
        let (set_key, key_value) = match patch.ssh_key_id {
            Some(value) => (true, value),
            None => (false, None),
        };
        let sql = format!(
            "UPDATE modules SET \
               name = COALESCE($2, name), \
               git_branch = COALESCE($3, git_branch), \
               ssh_key_id = CASE WHEN $4 THEN $5 ELSE ssh_key_id END, \
               status = COALESCE($6, status), \
               updated_at = now() \
             WHERE id = $1 RETURNING {MODULE_COLUMNS}"
        );
        sqlx::query_as::<_, Module>(&sql)
            .bind(id)
            .bind(patch.name)
            .bind(patch.git_branch)
            .bind(set_key)
            .bind(key_value)
            .bind(patch.status.map(|s| s.as_str().to_string()))
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| Error::NotFound(format!("module {id}")))
    }

    pub async fn set_module_status(&self, id: &str, status: ModuleStatus) -> Result<()> {
        let done = sqlx::query(
            "UPDATE modules SET status = $2, updated_at = now() WHERE id = $1",
        )
        .bind(id)
        .bind(status.as_str())
        .execute(self.pool())
        .await?;
        if done.rows_affected() == 0 {
            return Err(Error::NotFound(format!("module {id}")));
        }
        Ok(())
    }

    /// Clone finished: the module leaves `cloning` and gets its first
    /// `last_update` stamp.
    pub async fn mark_module_cloned(&self, id: &str) -> Result<()> {
        let done = sqlx::query(
            "UPDATE modules SET status = 'disabled', last_update = now(), updated_at = now() \
             WHERE id = $1",
        )
        .bind(id)
        .execute(self.pool())
        .await?;
        if done.rows_affected() == 0 {
            return Err(Error::NotFound(format!("module {id}")));
        }
        Ok(())
    }

    /// Take the per-module deploy mutex in a single UPDATE. Of two
    /// concurrent callers exactly one observes the flag flip.
    pub async fn try_begin_deploy(&self, id: &str) -> Result<bool> {
        let done = sqlx::query(
            "UPDATE modules SET is_deploying = TRUE, last_deploy_status = 'pending', \
               updated_at = now() \
             WHERE id = $1 AND is_deploying = FALSE",
        )
        .bind(id)
        .execute(self.pool())
        .await?;
        Ok(done.rows_affected() == 1)
    }

    /// Release the deploy mutex and record the outcome. Success also
    /// enables the module; failure leaves `status` untouched.
    pub async fn finish_deploy(&self, id: &str, success: bool) -> Result<()> {
        let sql = if success {
            "UPDATE modules SET is_deploying = FALSE, last_deploy = now(), \
               last_deploy_status = 'success', status = 'enabled', updated_at = now() \
             WHERE id = $1"
        } else {
            "UPDATE modules SET is_deploying = FALSE, last_deploy_status = 'failed', \
               updated_at = now() \
             WHERE id = $1"
        };
        sqlx::query(sql).bind(id).execute(self.pool()).await?;
        Ok(())
    }

    pub async fn set_git_branch(&self, id: &str, branch: &str) -> Result<()> {
        sqlx::query("UPDATE modules SET git_branch = $2, updated_at = now() WHERE id = $1")
            .bind(id)
            .bind(branch)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Persist the recomputed git snapshot. Fetch/pull stamps are only
    /// advanced when the snapshot carries them.
    pub async fn update_git_snapshot(&self, id: &str, snap: &GitSnapshot) -> Result<()> {
        sqlx::query(
            "UPDATE modules SET \
               current_commit_hash = $2, current_commit_subject = $3, \
               latest_commit_hash = $4, latest_commit_subject = $5, \
               late_commits = $6, \
               git_last_fetch = COALESCE($7, git_last_fetch), \
               git_last_pull = COALESCE($8, git_last_pull), \
               last_update = now(), updated_at = now() \
             WHERE id = $1",
        )
        .bind(id)
        .bind(&snap.current_commit_hash)
        .bind(&snap.current_commit_subject)
        .bind(&snap.latest_commit_hash)
        .bind(&snap.latest_commit_subject)
        .bind(snap.late_commits)
        .bind(snap.git_last_fetch)
        .bind(snap.git_last_pull)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn delete_module(&self, id: &str) -> Result<()> {
        let done = sqlx::query("DELETE FROM modules WHERE id = $1")
            .bind(id)
            .execute(self.pool())
            .await?;
        if done.rows_affected() == 0 {
            return Err(Error::NotFound(format!("module {id}")));
        }
        Ok(())
    }

    /// Resolve a module slug to its id, used by the event fabric cache.
    pub async fn module_id_for_slug(&self, slug: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT id FROM modules WHERE slug = $1")
            .bind(slug)
            .fetch_optional(self.pool())
            .await?;
        Ok(row.map(|r| r.get::<String, _>("id")))
    }
}
