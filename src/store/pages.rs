//! Module page rows. Every INSERT/UPDATE/DELETE fires the
//! `module_page_changed` NOTIFY through a table trigger (see migrations),
//! which both the gateway controller and the page proxy listen on.

use pan_bagnat_common::error::{Error, Result};
use pan_bagnat_common::id::{KIND_PAGE, new_id};
use pan_bagnat_common::slug::is_valid_slug;
use pan_bagnat_common::types::ModulePage;

use super::Store;

const PAGE_COLUMNS: &str = "id, module_id, slug, url, is_public, target_container, \
     target_port, network_name, icon_url, created_at, updated_at";

#[derive(Debug, Clone)]
pub struct NewModulePage {
    pub module_id: String,
    pub slug: String,
    pub url: String,
    pub is_public: bool,
    pub target_container: Option<String>,
    pub target_port: Option<i32>,
    pub network_name: Option<String>,
    pub icon_url: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ModulePagePatch {
    pub url: Option<String>,
    pub is_public: Option<bool>,
    pub target_container: Option<Option<String>>,
    pub target_port: Option<Option<i32>>,
    pub network_name: Option<Option<String>>,
    pub icon_url: Option<Option<String>>,
}

impl Store {
    pub async fn create_page(&self, new: NewModulePage) -> Result<ModulePage> {
        if !is_valid_slug(&new.slug) {
            return Err(Error::InvalidInput(format!(
                "page slug must match [a-z0-9-]+: {:?}",
                new.slug
            )));
        }
        if let Some(port) = new.target_port
            && !(1..=65535).contains(&port)
        {
            return Err(Error::InvalidInput(format!("invalid target port {port}")));
        }
        let id = new_id(KIND_PAGE);
        let sql = format!(
            "INSERT INTO module_pages \
               (id, module_id, slug, url, is_public, target_container, target_port, \
                network_name, icon_url) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) RETURNING {PAGE_COLUMNS}"
        );
        let page = sqlx::query_as::<_, ModulePage>(&sql)
            .bind(&id)
            .bind(&new.module_id)
            .bind(&new.slug)
            .bind(&new.url)
            .bind(new.is_public)
            .bind(&new.target_container)
            .bind(new.target_port)
            .bind(&new.network_name)
            .bind(&new.icon_url)
            .fetch_one(self.pool())
            .await?;
        Ok(page)
    }

    pub async fn get_page_by_slug(&self, slug: &str) -> Result<ModulePage> {
        let sql = format!("SELECT {PAGE_COLUMNS} FROM module_pages WHERE slug = $1");
        sqlx::query_as::<_, ModulePage>(&sql)
            .bind(slug)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| Error::NotFound(format!("page {slug}")))
    }

    pub async fn list_pages_for_module(&self, module_id: &str) -> Result<Vec<ModulePage>> {
        let sql =
            format!("SELECT {PAGE_COLUMNS} FROM module_pages WHERE module_id = $1 ORDER BY slug");
        Ok(sqlx::query_as::<_, ModulePage>(&sql)
            .bind(module_id)
            .fetch_all(self.pool())
            .await?)
    }

    pub async fn patch_page(&self, slug: &str, patch: ModulePagePatch) -> Result<ModulePage> {
        if let Some(Some(port)) = patch.target_port
            && !(1..=65535).contains(&port)
        {
            return Err(Error::InvalidInput(format!("invalid target port {port}")));
        }
        let (set_container, container) = opt_pair(patch.target_container);
        let (set_port, port) = opt_pair(patch.target_port);
        let (set_network, network) = opt_pair(patch.network_name);
        let (set_icon, icon) = opt_pair(patch.icon_url);
        let sql = format!(
            "UPDATE module_pages SET \
               url = COALESCE($2, url), \
               is_public = COALESCE($3, is_public), \
               target_container = CASE WHEN $4 THEN $5 ELSE target_container END, \
               target_port = CASE WHEN $6 THEN $7 ELSE target_port END, \
               network_name = CASE WHEN $8 THEN $9 ELSE network_name END, \
               icon_url = CASE WHEN $10 THEN $11 ELSE icon_url END, \
               updated_at = now() \
             WHERE slug = $1 RETURNING {PAGE_COLUMNS}"
        );
        sqlx::query_as::<_, ModulePage>(&sql)
            .bind(slug)
            .bind(patch.url)
            .bind(patch.is_public)
            .bind(set_container)
            .bind(container)
            .bind(set_port)
            .bind(port)
            .bind(set_network)
            .bind(network)
            .bind(set_icon)
            .bind(icon)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| Error::NotFound(format!("page {slug}")))
    }

    pub async fn delete_page(&self, slug: &str) -> Result<()> {
        let done = sqlx::query("DELETE FROM module_pages WHERE slug = $1")
            .bind(slug)
            .execute(self.pool())
            .await?;
        if done.rows_affected() == 0 {
            return Err(Error::NotFound(format!("page {slug}")));
        }
        Ok(())
    }
}

fn opt_pair<T>(field: Option<Option<T>>) -> (bool, Option<T>) {
    match field {
        Some(value) => (true, value),
        None => (false, None),
    }
}
