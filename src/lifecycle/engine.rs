//! Module state machine and operation orchestration.
//!
//! State flow: `cloning` (on creation) → `disabled` (clone finished) →
//! `enabled` (deploy succeeded) → `disabled` (cleanup). The deploy mutex is
//! the `is_deploying` flag flipped in a single UPDATE; git operations
//! require a cloned tree (`last_update IS NOT NULL`) and recompute the DB
//! snapshot when they finish.

use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info};

use pan_bagnat_common::error::{Error, Result};
use pan_bagnat_common::token;
use pan_bagnat_common::topics::module_topic;
use pan_bagnat_common::types::{
    CommitInfo, Event, GitStatus, Module, ModuleStatus,
};

use crate::config::Config;
use crate::store::Store;
use crate::store::modules::NewModule;
use crate::ws::WsRegistry;

use super::docker::{ComposeProject, ContainerAction, ModuleContainer};
use super::fs::ModuleFiles;
use super::git::GitRepo;
use super::logger::{LogSink, ModuleLogger};

#[derive(Clone)]
pub struct ModuleEngine {
    store: Store,
    registry: Arc<WsRegistry>,
    config: Arc<Config>,
}

/// Which timestamps a finished git op advances in the snapshot.
#[derive(Clone, Copy, PartialEq)]
enum Stamp {
    None,
    Fetch,
    FetchAndPull,
}

impl ModuleEngine {
    pub fn new(store: Store, registry: Arc<WsRegistry>, config: Arc<Config>) -> Self {
        Self {
            store,
            registry,
            config,
        }
    }

    fn logger(&self, module_id: &str) -> Arc<ModuleLogger> {
        ModuleLogger::new(self.store.clone(), self.registry.clone(), module_id)
    }

    fn repo(&self, module: &Module, private_key: Option<String>) -> GitRepo {
        GitRepo::new(self.config.repo_dir(&module.slug), private_key)
    }

    fn compose(&self, module: &Module) -> ComposeProject {
        ComposeProject::new(&module.slug, self.config.repo_dir(&module.slug))
    }

    pub fn files(&self, module: &Module) -> ModuleFiles {
        ModuleFiles::new(self.config.repo_dir(&module.slug))
    }

    fn publish(&self, event_type: &str, module_id: &str, topic: Option<String>, payload: serde_json::Value) {
        let mut event = Event::new(event_type, topic, payload);
        event.module_id = Some(module_id.to_string());
        self.registry.push(event);
    }

    /// Fetch the module's SSH private key and log the use as a key event.
    async fn key_material(&self, module: &Module, op: &str) -> Result<Option<String>> {
        let Some(key_id) = &module.ssh_key_id else {
            return Ok(None);
        };
        let key = self.store.get_ssh_key(key_id).await?;
        self.store
            .insert_ssh_key_event(key_id, &format!("git {op}"), None, Some(module.id.as_str()))
            .await?;
        Ok(Some(key.private_key))
    }

    fn require_cloned(module: &Module) -> Result<()> {
        if module.last_update.is_none() {
            return Err(Error::ModuleNotCloned);
        }
        Ok(())
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    pub async fn create(&self, new: NewModule) -> Result<Module> {
        let module = self.store.create_module(new).await?;
        info!(module = %module.id, slug = %module.slug, "module registered");
        self.publish(
            "module_created",
            &module.id,
            None,
            serde_json::to_value(&module).unwrap_or_default(),
        );
        Ok(module)
    }

    /// Validate and launch a clone in the background. Allowed exactly
    /// once: a module with `last_update` set is already cloned.
    pub async fn start_clone(&self, module_id: &str) -> Result<()> {
        let module = self.store.get_module(module_id).await?;
        if module.last_update.is_some() {
            return Err(Error::ModuleAlreadyCloned);
        }
        let engine = self.clone();
        tokio::spawn(async move {
            if let Err(e) = engine.run_clone(module).await {
                error!("clone failed: {e}");
            }
        });
        Ok(())
    }

    async fn run_clone(&self, module: Module) -> Result<()> {
        let sink = self.logger(&module.id);
        let key = self.key_material(&module, "clone").await?;
        let repo = self.repo(&module, key);

        sink.info(&format!(
            "Cloning repo {} (branch {})",
            module.git_url, module.git_branch
        ))
        .await;

        if let Err(e) = repo
            .clone_repo(&module.git_url, &module.git_branch, sink.clone())
            .await
        {
            // State stays `cloning`; the operator can retry.
            sink.error(&format!("clone failed: {e}")).await;
            return Err(e);
        }

        self.store.mark_module_cloned(&module.id).await?;
        self.refresh_snapshot(&module, &repo, Stamp::Fetch).await?;
        sink.info("Clone finished").await;
        self.publish(
            "module_status_changed",
            &module.id,
            None,
            serde_json::json!({"id": module.id, "status": ModuleStatus::Disabled}),
        );
        Ok(())
    }

    /// Take the deploy mutex and launch the deploy in the background.
    /// Of two concurrent requests exactly one proceeds; the other gets a
    /// `Conflict` here, before any docker work starts.
    pub async fn start_deploy(&self, module_id: &str) -> Result<()> {
        let module = self.store.get_module(module_id).await?;
        Self::require_cloned(&module)?;
        if !self.store.try_begin_deploy(&module.id).await? {
            return Err(Error::Conflict(format!(
                "a deploy is already running for module {}",
                module.slug
            )));
        }
        let engine = self.clone();
        tokio::spawn(async move {
            if let Err(e) = engine.run_deploy(module).await {
                error!("deploy failed: {e}");
            }
        });
        Ok(())
    }

    /// `compose build` then `compose up -d`. Failure records
    /// `last_deploy_status = failed` and leaves the module status
    /// untouched; the flag is cleared on every path.
    async fn run_deploy(&self, module: Module) -> Result<()> {
        let sink = self.logger(&module.id);
        sink.info("Deploy started").await;
        self.publish(
            "module_status_changed",
            &module.id,
            None,
            serde_json::json!({"id": module.id, "is_deploying": true}),
        );

        let compose = self.compose(&module);
        let result = async {
            compose.build(sink.clone()).await?;
            compose.up(sink.clone()).await?;
            Ok::<(), Error>(())
        }
        .await;

        match result {
            Ok(()) => {
                self.store.finish_deploy(&module.id, true).await?;
                sink.info("Deploy finished").await;
                self.broadcast_containers(&module).await;
                self.publish(
                    "module_status_changed",
                    &module.id,
                    None,
                    serde_json::json!({
                        "id": module.id,
                        "status": ModuleStatus::Enabled,
                        "is_deploying": false,
                    }),
                );
                Ok(())
            }
            Err(e) => {
                self.store.finish_deploy(&module.id, false).await?;
                sink.error(&format!("deploy failed: {e}")).await;
                self.publish(
                    "module_status_changed",
                    &module.id,
                    None,
                    serde_json::json!({
                        "id": module.id,
                        "last_deploy_status": "failed",
                        "is_deploying": false,
                    }),
                );
                Err(e)
            }
        }
    }

    /// Tear the compose project down (volumes, orphans, images) and prune.
    pub async fn cleanup(&self, module_id: &str) -> Result<()> {
        let module = self.store.get_module(module_id).await?;
        Self::require_cloned(&module)?;
        let sink = self.logger(&module.id);
        sink.info("Cleanup started").await;

        let compose = self.compose(&module);
        compose.down_full(sink.clone()).await?;
        compose.image_prune(sink.clone()).await?;

        self.store
            .set_module_status(&module.id, ModuleStatus::Disabled)
            .await?;
        sink.info("Cleanup finished").await;
        self.broadcast_containers(&module).await;
        self.publish(
            "module_status_changed",
            &module.id,
            None,
            serde_json::json!({"id": module.id, "status": ModuleStatus::Disabled}),
        );
        Ok(())
    }

    /// Best-effort teardown, then drop the row.
    pub async fn delete_module(&self, module_id: &str) -> Result<()> {
        let module = self.store.get_module(module_id).await?;
        if module.last_update.is_some() {
            let sink = self.logger(&module.id);
            if let Err(e) = self.compose(&module).down_full(sink.clone()).await {
                error!(module = %module.id, "teardown during delete failed: {e}");
            }
        }
        self.store.delete_module(&module.id).await?;
        self.publish(
            "module_deleted",
            &module.id,
            None,
            serde_json::json!({"id": module.id}),
        );
        Ok(())
    }

    // ── Git operations ───────────────────────────────────────────────

    pub async fn pull(&self, module_id: &str) -> Result<GitStatus> {
        let (module, repo, sink) = self.git_context(module_id, "pull").await?;
        repo.pull(&module.git_branch, sink.clone()).await?;
        self.refresh_snapshot(&module, &repo, Stamp::FetchAndPull)
            .await?;
        self.emit_git_status(&module, &repo).await
    }

    pub async fn fetch(&self, module_id: &str) -> Result<GitStatus> {
        let (module, repo, sink) = self.git_context(module_id, "fetch").await?;
        repo.fetch_all(sink.clone()).await?;
        self.refresh_snapshot(&module, &repo, Stamp::Fetch).await?;
        self.emit_git_status(&module, &repo).await
    }

    /// Check out a commit or branch; persists `git_branch` when the tree
    /// lands on a branch.
    pub async fn checkout(&self, module_id: &str, reference: &str) -> Result<GitStatus> {
        if reference.trim().is_empty() {
            return Err(Error::InvalidInput("ref is required".into()));
        }
        let (module, repo, sink) = self.git_context(module_id, "checkout").await?;
        if let Some(branch) = repo.checkout(reference, sink.clone()).await? {
            self.store.set_git_branch(&module.id, &branch).await?;
        }
        self.refresh_snapshot(&module, &repo, Stamp::Fetch).await?;
        self.emit_git_status(&module, &repo).await
    }

    pub async fn create_branch(
        &self,
        module_id: &str,
        name: &str,
        from: Option<&str>,
    ) -> Result<GitStatus> {
        let (module, repo, sink) = self.git_context(module_id, "branch").await?;
        repo.create_branch(name, from, sink.clone()).await?;
        self.store.set_git_branch(&module.id, name).await?;
        self.refresh_snapshot(&module, &repo, Stamp::None).await?;
        self.emit_git_status(&module, &repo).await
    }

    pub async fn delete_branch(&self, module_id: &str, name: &str) -> Result<GitStatus> {
        let (module, repo, sink) = self.git_context(module_id, "branch -D").await?;
        repo.delete_branch(name, sink.clone()).await?;
        self.refresh_snapshot(&module, &repo, Stamp::None).await?;
        self.emit_git_status(&module, &repo).await
    }

    pub async fn merge_continue(&self, module_id: &str) -> Result<GitStatus> {
        let (module, repo, sink) = self.git_context(module_id, "merge continue").await?;
        repo.merge_continue(sink.clone()).await?;
        self.refresh_snapshot(&module, &repo, Stamp::None).await?;
        self.emit_git_status(&module, &repo).await
    }

    pub async fn merge_abort(&self, module_id: &str) -> Result<GitStatus> {
        let (module, repo, sink) = self.git_context(module_id, "merge abort").await?;
        repo.merge_abort(sink.clone()).await?;
        self.refresh_snapshot(&module, &repo, Stamp::None).await?;
        self.emit_git_status(&module, &repo).await
    }

    pub async fn checkout_file(&self, module_id: &str, path: &str) -> Result<GitStatus> {
        let (module, repo, sink) = self.git_context(module_id, "checkout file").await?;
        repo.checkout_file(path, sink.clone()).await?;
        self.refresh_snapshot(&module, &repo, Stamp::None).await?;
        self.emit_git_status(&module, &repo).await
    }

    pub async fn resolve(&self, module_id: &str, path: &str, ours: bool) -> Result<GitStatus> {
        let (module, repo, sink) = self.git_context(module_id, "resolve").await?;
        repo.resolve_path(path, ours, sink.clone()).await?;
        self.refresh_snapshot(&module, &repo, Stamp::None).await?;
        self.emit_git_status(&module, &repo).await
    }

    pub async fn list_commits(
        &self,
        module_id: &str,
        reference: Option<&str>,
        limit: usize,
    ) -> Result<Vec<CommitInfo>> {
        let module = self.store.get_module(module_id).await?;
        Self::require_cloned(&module)?;
        let key = self.key_material(&module, "log").await?;
        let repo = self.repo(&module, key);
        repo.list_commits(reference, limit).await
    }

    /// Compose `GitStatus`: DB snapshot first, runtime fallback.
    pub async fn git_status(&self, module_id: &str) -> Result<GitStatus> {
        let module = self.store.get_module(module_id).await?;
        Self::require_cloned(&module)?;
        let repo = self.repo(&module, None);

        let mut status = GitStatus {
            branch: module.git_branch.clone(),
            head: module.current_commit_hash.clone().unwrap_or_default(),
            head_subject: module.current_commit_subject.clone().unwrap_or_default(),
            latest_hash: module.latest_commit_hash.clone().unwrap_or_default(),
            latest_subject: module.latest_commit_subject.clone().unwrap_or_default(),
            behind: module.late_commits,
            last_fetch: module.git_last_fetch,
            last_pull: module.git_last_pull,
            ..GitStatus::default()
        };

        if repo.exists() {
            let runtime = repo.runtime_status().await?;
            if status.head.is_empty() {
                status.head = runtime.head;
                status.head_subject = runtime.head_subject;
            }
            if status.branch.is_empty() {
                status.branch = runtime.branch;
            }
            if !runtime.latest_hash.is_empty() {
                status.latest_hash = runtime.latest_hash;
                status.latest_subject = runtime.latest_subject;
                status.behind = runtime.behind;
            }
            status.is_merging = runtime.is_merging;
            status.conflicts = runtime.conflicts;
            status.modified = runtime.modified;
        }
        Ok(status)
    }

    async fn git_context(
        &self,
        module_id: &str,
        op: &str,
    ) -> Result<(Module, GitRepo, Arc<ModuleLogger>)> {
        let module = self.store.get_module(module_id).await?;
        Self::require_cloned(&module)?;
        let key = self.key_material(&module, op).await?;
        let repo = self.repo(&module, key);
        let sink = self.logger(&module.id);
        Ok((module, repo, sink))
    }

    async fn refresh_snapshot(&self, module: &Module, repo: &GitRepo, stamp: Stamp) -> Result<()> {
        let mut snapshot = repo.snapshot().await?;
        let now = Utc::now();
        match stamp {
            Stamp::None => {}
            Stamp::Fetch => snapshot.git_last_fetch = Some(now),
            Stamp::FetchAndPull => {
                snapshot.git_last_fetch = Some(now);
                snapshot.git_last_pull = Some(now);
            }
        }
        self.store.update_git_snapshot(&module.id, &snapshot).await
    }

    async fn emit_git_status(&self, module: &Module, _repo: &GitRepo) -> Result<GitStatus> {
        let status = self.git_status(&module.id).await?;
        self.publish(
            "git_status",
            &module.id,
            Some(module_topic(&module.id)),
            serde_json::to_value(&status).unwrap_or_default(),
        );
        Ok(status)
    }

    // ── Containers ───────────────────────────────────────────────────

    pub async fn containers(&self, module_id: &str) -> Result<Vec<ModuleContainer>> {
        let module = self.store.get_module(module_id).await?;
        Self::require_cloned(&module)?;
        self.compose(&module).containers().await
    }

    /// Run a container action and broadcast the refreshed listing.
    pub async fn container_action(
        &self,
        module_id: &str,
        service: &str,
        action: ContainerAction,
    ) -> Result<Vec<ModuleContainer>> {
        let module = self.store.get_module(module_id).await?;
        Self::require_cloned(&module)?;
        let sink = self.logger(&module.id);
        self.compose(&module)
            .container_action(service, action, sink)
            .await?;
        let containers = self.broadcast_containers(&module).await;
        Ok(containers)
    }

    /// Refresh the container list and publish `containers_updated` on the
    /// module topic. Errors degrade to an empty listing.
    async fn broadcast_containers(&self, module: &Module) -> Vec<ModuleContainer> {
        let containers = self
            .compose(module)
            .containers()
            .await
            .unwrap_or_else(|e| {
                error!(module = %module.id, "container listing failed: {e}");
                Vec::new()
            });
        self.publish(
            "containers_updated",
            &module.id,
            Some(module_topic(&module.id)),
            serde_json::to_value(&containers).unwrap_or_default(),
        );
        containers
    }

    // ── Access token ─────────────────────────────────────────────────

    /// Short-lived handoff token for the page proxy.
    pub fn access_token(&self, session_id: &str, slug: &str) -> Result<String> {
        token::generate(
            &self.config.session_secret,
            session_id,
            slug,
            self.config.session_token_ttl,
        )
    }
}
