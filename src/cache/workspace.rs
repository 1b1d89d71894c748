// SPDX-License-Identifier: MIT
//! Workspace metadata cache — read-through id↔name maps per workspace.
//!
//! Snapshots are immutable and swapped wholesale behind an `Arc` on every
//! load, so readers never observe a half-built map. A per-workspace lock
//! keeps at most one load/refresh in flight: concurrent cold-miss callers
//! await the in-progress load instead of issuing duplicate API calls.
//!
//! There is no automatic expiry — refresh is operator-triggered. Task
//! enumeration walks projects × task pages and caps total items; a capped
//! dataset is flagged `truncated` and counted, never silently passed off as
//! complete.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::{Mutex as AsyncMutex, RwLock};
use tracing::{info, warn};

use crate::client::{ApiError, TrackerApi, PAGE_SIZE};
use crate::config::CacheCaps;
use crate::metrics::SharedMetrics;

/// Normalized lookup key for name maps: trimmed, lowercased.
pub fn norm(s: &str) -> String {
    s.trim().to_lowercase()
}

/// Per-dataset truncation markers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TruncationFlags {
    pub tags: bool,
    pub projects: bool,
    pub clients: bool,
    pub users: bool,
    pub tasks: bool,
}

impl TruncationFlags {
    pub fn any(&self) -> bool {
        self.tags || self.projects || self.clients || self.users || self.tasks
    }
}

/// Immutable view of one workspace's metadata.
#[derive(Debug, Default)]
pub struct WorkspaceSnapshot {
    pub tags_by_id: HashMap<String, String>,
    /// Normalized tag name → id.
    pub tags_by_name: HashMap<String, String>,
    pub projects_by_id: HashMap<String, String>,
    pub projects_by_name: HashMap<String, String>,
    pub clients_by_id: HashMap<String, String>,
    pub clients_by_name: HashMap<String, String>,
    pub users_by_id: HashMap<String, String>,
    /// Normalized user name or email → id.
    pub users_by_name: HashMap<String, String>,
    /// Normalized project name → (normalized task name → task id).
    pub tasks_by_project: HashMap<String, HashMap<String, String>>,
    pub task_names_by_id: HashMap<String, String>,
    pub loaded_at: Option<DateTime<Utc>>,
    pub truncated: TruncationFlags,
}

impl WorkspaceSnapshot {
    /// Empty snapshot used when metadata could not be loaded. Lookups miss;
    /// features that need names degrade instead of failing the event.
    pub fn empty() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn project_name(&self, project_id: &str) -> Option<&str> {
        self.projects_by_id.get(project_id).map(String::as_str)
    }

    pub fn client_name(&self, client_id: &str) -> Option<&str> {
        self.clients_by_id.get(client_id).map(String::as_str)
    }

    pub fn user_name(&self, user_id: &str) -> Option<&str> {
        self.users_by_id.get(user_id).map(String::as_str)
    }

    pub fn tag_id_by_name(&self, name: &str) -> Option<&str> {
        self.tags_by_name.get(&norm(name)).map(String::as_str)
    }

    pub fn project_id_by_name(&self, name: &str) -> Option<&str> {
        self.projects_by_name.get(&norm(name)).map(String::as_str)
    }

    /// Task lookup scoped to a project name; falls back to scanning every
    /// project when the scoped lookup misses.
    pub fn task_id_by_name(&self, project_name: Option<&str>, task_name: &str) -> Option<&str> {
        let task_key = norm(task_name);
        if let Some(pname) = project_name {
            if let Some(tasks) = self.tasks_by_project.get(&norm(pname)) {
                if let Some(id) = tasks.get(&task_key) {
                    return Some(id);
                }
            }
        }
        self.tasks_by_project
            .values()
            .find_map(|tasks| tasks.get(&task_key))
            .map(String::as_str)
    }
}

struct WorkspaceEntry {
    snapshot: RwLock<Option<Arc<WorkspaceSnapshot>>>,
    /// Held for the duration of a load/refresh — the single-flight guard.
    load_lock: AsyncMutex<()>,
}

impl WorkspaceEntry {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            snapshot: RwLock::new(None),
            load_lock: AsyncMutex::new(()),
        })
    }
}

/// Read-through cache of workspace metadata snapshots.
pub struct WorkspaceCache {
    api: Arc<dyn TrackerApi>,
    caps: CacheCaps,
    metrics: SharedMetrics,
    entries: Mutex<HashMap<String, Arc<WorkspaceEntry>>>,
}

enum Listing {
    Tags,
    Projects,
    Clients,
    Users,
}

impl WorkspaceCache {
    pub fn new(api: Arc<dyn TrackerApi>, caps: CacheCaps, metrics: SharedMetrics) -> Self {
        Self {
            api,
            caps,
            metrics,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn entry(&self, workspace_id: &str) -> Arc<WorkspaceEntry> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries
            .entry(workspace_id.to_string())
            .or_insert_with(WorkspaceEntry::new)
            .clone()
    }

    /// Current snapshot for a workspace, loading synchronously on cold miss.
    pub async fn get(
        &self,
        workspace_id: &str,
        token: &str,
    ) -> Result<Arc<WorkspaceSnapshot>, ApiError> {
        let entry = self.entry(workspace_id);
        if let Some(snap) = entry.snapshot.read().await.clone() {
            return Ok(snap);
        }
        let _guard = entry.load_lock.lock().await;
        // A concurrent caller may have finished the load while we waited.
        if let Some(snap) = entry.snapshot.read().await.clone() {
            return Ok(snap);
        }
        let snap = Arc::new(self.load(workspace_id, token).await?);
        *entry.snapshot.write().await = Some(snap.clone());
        Ok(snap)
    }

    /// Force a reload and swap the snapshot. On failure the previous
    /// snapshot (if any) stays in place.
    pub async fn refresh(
        &self,
        workspace_id: &str,
        token: &str,
    ) -> Result<Arc<WorkspaceSnapshot>, ApiError> {
        let entry = self.entry(workspace_id);
        let _guard = entry.load_lock.lock().await;
        let snap = Arc::new(self.load(workspace_id, token).await?);
        *entry.snapshot.write().await = Some(snap.clone());
        Ok(snap)
    }

    /// Snapshot without triggering a load.
    pub async fn peek(&self, workspace_id: &str) -> Option<Arc<WorkspaceSnapshot>> {
        let entry = self.entry(workspace_id);
        let snap = entry.snapshot.read().await.clone();
        snap
    }

    /// Record a tag created after the snapshot was taken, so later events
    /// resolve it without another API round-trip.
    pub async fn insert_tag(&self, workspace_id: &str, tag_id: &str, name: &str) {
        let entry = self.entry(workspace_id);
        let mut guard = entry.snapshot.write().await;
        if let Some(current) = guard.as_ref() {
            // Copy-on-write: clone the maps, add the tag, swap the snapshot.
            let mut next = clone_snapshot(current);
            next.tags_by_id.insert(tag_id.to_string(), name.to_string());
            next.tags_by_name.insert(norm(name), tag_id.to_string());
            *guard = Some(Arc::new(next));
        }
    }

    async fn load(&self, workspace_id: &str, token: &str) -> Result<WorkspaceSnapshot, ApiError> {
        let mut snap = WorkspaceSnapshot {
            loaded_at: Some(Utc::now()),
            ..WorkspaceSnapshot::default()
        };

        let (tags, tags_truncated) = self
            .load_listing(workspace_id, token, Listing::Tags, self.caps.tags)
            .await?;
        for item in &tags {
            if let Some((id, name)) = id_and_name(item) {
                snap.tags_by_name.insert(norm(&name), id.clone());
                snap.tags_by_id.insert(id, name);
            }
        }

        let (projects, projects_truncated) = self
            .load_listing(workspace_id, token, Listing::Projects, self.caps.projects)
            .await?;
        for item in &projects {
            if let Some((id, name)) = id_and_name(item) {
                snap.projects_by_name.insert(norm(&name), id.clone());
                snap.projects_by_id.insert(id, name);
            }
        }

        let (clients, clients_truncated) = self
            .load_listing(workspace_id, token, Listing::Clients, self.caps.clients)
            .await?;
        for item in &clients {
            if let Some((id, name)) = id_and_name(item) {
                snap.clients_by_name.insert(norm(&name), id.clone());
                snap.clients_by_id.insert(id, name);
            }
        }

        let (users, users_truncated) = self
            .load_listing(workspace_id, token, Listing::Users, self.caps.users)
            .await?;
        for item in &users {
            let Some(id) = item.get("id").and_then(Value::as_str) else {
                continue;
            };
            let name = item.get("name").and_then(Value::as_str).unwrap_or("");
            let email = item.get("email").and_then(Value::as_str).unwrap_or("");
            snap.users_by_id
                .insert(id.to_string(), if name.is_empty() { email } else { name }.to_string());
            if !name.is_empty() {
                snap.users_by_name.insert(norm(name), id.to_string());
            }
            if !email.is_empty() {
                snap.users_by_name.insert(norm(email), id.to_string());
            }
        }

        let tasks_truncated = self.load_tasks(workspace_id, token, &mut snap).await?;

        snap.truncated = TruncationFlags {
            tags: tags_truncated,
            projects: projects_truncated,
            clients: clients_truncated,
            users: users_truncated,
            tasks: tasks_truncated,
        };
        for (flag, dataset) in [
            (tags_truncated, "tags"),
            (projects_truncated, "projects"),
            (clients_truncated, "clients"),
            (users_truncated, "users"),
            (tasks_truncated, "tasks"),
        ] {
            if flag {
                warn!(workspace = workspace_id, dataset, "workspace cache dataset hit item cap");
                self.metrics.record_cache_truncated(dataset);
            }
        }

        info!(
            workspace = workspace_id,
            tags = snap.tags_by_id.len(),
            projects = snap.projects_by_id.len(),
            clients = snap.clients_by_id.len(),
            users = snap.users_by_id.len(),
            tasks = snap.task_names_by_id.len(),
            truncated = snap.truncated.any(),
            "workspace cache loaded"
        );
        Ok(snap)
    }

    async fn load_listing(
        &self,
        workspace_id: &str,
        token: &str,
        listing: Listing,
        cap: usize,
    ) -> Result<(Vec<Value>, bool), ApiError> {
        let mut items = Vec::new();
        let mut truncated = false;
        let mut page = 1usize;
        loop {
            let batch = match listing {
                Listing::Tags => self.api.list_tags(workspace_id, page, token).await?,
                Listing::Projects => self.api.list_projects(workspace_id, page, token).await?,
                Listing::Clients => self.api.list_clients(workspace_id, page, token).await?,
                Listing::Users => self.api.list_users(workspace_id, page, token).await?,
            };
            let batch_len = batch.len();
            for item in batch {
                if items.len() >= cap {
                    truncated = true;
                    break;
                }
                items.push(item);
            }
            if truncated || batch_len < PAGE_SIZE {
                break;
            }
            page += 1;
        }
        Ok((items, truncated))
    }

    /// Walk projects × task pages; stop at the total-item cap.
    async fn load_tasks(
        &self,
        workspace_id: &str,
        token: &str,
        snap: &mut WorkspaceSnapshot,
    ) -> Result<bool, ApiError> {
        let mut total = 0usize;
        let projects: Vec<(String, String)> = snap
            .projects_by_id
            .iter()
            .map(|(id, name)| (id.clone(), name.clone()))
            .collect();

        for (project_id, project_name) in projects {
            let mut project_tasks = HashMap::new();
            let mut page = 1usize;
            loop {
                let batch = self
                    .api
                    .list_tasks(workspace_id, &project_id, page, token)
                    .await?;
                let batch_len = batch.len();
                for item in batch {
                    if total >= self.caps.tasks {
                        snap.tasks_by_project.insert(norm(&project_name), project_tasks);
                        return Ok(true);
                    }
                    if let Some((id, name)) = id_and_name(&item) {
                        project_tasks.insert(norm(&name), id.clone());
                        snap.task_names_by_id.insert(id, name);
                        total += 1;
                    }
                }
                if batch_len < PAGE_SIZE {
                    break;
                }
                page += 1;
            }
            snap.tasks_by_project.insert(norm(&project_name), project_tasks);
        }
        Ok(false)
    }
}

fn id_and_name(item: &Value) -> Option<(String, String)> {
    let id = item.get("id").and_then(Value::as_str)?;
    let name = item.get("name").and_then(Value::as_str)?;
    Some((id.to_string(), name.to_string()))
}

fn clone_snapshot(snap: &WorkspaceSnapshot) -> WorkspaceSnapshot {
    WorkspaceSnapshot {
        tags_by_id: snap.tags_by_id.clone(),
        tags_by_name: snap.tags_by_name.clone(),
        projects_by_id: snap.projects_by_id.clone(),
        projects_by_name: snap.projects_by_name.clone(),
        clients_by_id: snap.clients_by_id.clone(),
        clients_by_name: snap.clients_by_name.clone(),
        users_by_id: snap.users_by_id.clone(),
        users_by_name: snap.users_by_name.clone(),
        tasks_by_project: snap.tasks_by_project.clone(),
        task_names_by_id: snap.task_names_by_id.clone(),
        loaded_at: snap.loaded_at,
        truncated: snap.truncated,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::CallMethod;
    use crate::metrics::EngineMetrics;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Scripted API returning fixed listings; counts load traffic.
    struct StubApi {
        tags: Vec<Value>,
        projects: Vec<Value>,
        tasks_per_project: usize,
        list_calls: AtomicUsize,
        load_delay: Duration,
    }

    impl Default for StubApi {
        fn default() -> Self {
            Self {
                tags: vec![json!({"id": "t1", "name": "Urgent"})],
                projects: vec![json!({"id": "p1", "name": "Apollo"})],
                tasks_per_project: 1,
                list_calls: AtomicUsize::new(0),
                load_delay: Duration::ZERO,
            }
        }
    }

    #[async_trait]
    impl TrackerApi for StubApi {
        async fn get_time_entry(&self, _: &str, _: &str, _: &str) -> Result<Value, ApiError> {
            Ok(json!({}))
        }
        async fn update_time_entry(
            &self,
            _: &str,
            _: &str,
            patch: &Value,
            _: &str,
        ) -> Result<Value, ApiError> {
            Ok(patch.clone())
        }
        async fn list_tags(&self, _: &str, page: usize, _: &str) -> Result<Vec<Value>, ApiError> {
            self.list_calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.load_delay).await;
            Ok(if page == 1 { self.tags.clone() } else { vec![] })
        }
        async fn create_tag(&self, _: &str, name: &str, _: &str) -> Result<Value, ApiError> {
            Ok(json!({"id": "new-tag", "name": name}))
        }
        async fn list_projects(
            &self,
            _: &str,
            page: usize,
            _: &str,
        ) -> Result<Vec<Value>, ApiError> {
            Ok(if page == 1 { self.projects.clone() } else { vec![] })
        }
        async fn list_clients(&self, _: &str, _: usize, _: &str) -> Result<Vec<Value>, ApiError> {
            Ok(vec![])
        }
        async fn list_users(&self, _: &str, _: usize, _: &str) -> Result<Vec<Value>, ApiError> {
            Ok(vec![])
        }
        async fn list_tasks(
            &self,
            _: &str,
            project_id: &str,
            page: usize,
            _: &str,
        ) -> Result<Vec<Value>, ApiError> {
            if page > 1 {
                return Ok(vec![]);
            }
            Ok((0..self.tasks_per_project)
                .map(|i| json!({"id": format!("{project_id}-task-{i}"), "name": format!("Task {i}")}))
                .collect())
        }
        async fn call(
            &self,
            _: CallMethod,
            _: &str,
            _: Option<&Value>,
            _: &str,
        ) -> Result<String, ApiError> {
            Ok(String::new())
        }
    }

    fn cache_with(api: StubApi, caps: CacheCaps) -> Arc<WorkspaceCache> {
        Arc::new(WorkspaceCache::new(
            Arc::new(api),
            caps,
            Arc::new(EngineMetrics::new()),
        ))
    }

    #[tokio::test]
    async fn cold_miss_loads_and_populates_maps() {
        let cache = cache_with(StubApi::default(), CacheCaps::default());
        let snap = cache.get("ws1", "tok").await.unwrap();
        assert_eq!(snap.tag_id_by_name("urgent"), Some("t1"));
        assert_eq!(snap.project_id_by_name("Apollo"), Some("p1"));
        assert_eq!(snap.task_id_by_name(Some("Apollo"), "Task 0"), Some("p1-task-0"));
        assert!(!snap.truncated.any());
    }

    #[tokio::test]
    async fn concurrent_cold_misses_load_once() {
        let api = Arc::new(StubApi {
            load_delay: Duration::from_millis(30),
            ..StubApi::default()
        });
        let cache = Arc::new(WorkspaceCache::new(
            api.clone(),
            CacheCaps::default(),
            Arc::new(EngineMetrics::new()),
        ));

        let (a, b) = tokio::join!(cache.get("ws1", "tok"), cache.get("ws1", "tok"));
        let (a, b) = (a.unwrap(), b.unwrap());

        // list_tags is hit once per load; the second caller awaited the
        // first load instead of starting its own.
        assert_eq!(api.list_calls.load(Ordering::SeqCst), 1);
        assert!(Arc::ptr_eq(&a, &b), "both callers share one snapshot");
    }

    #[tokio::test]
    async fn refresh_swaps_the_snapshot() {
        let cache = cache_with(StubApi::default(), CacheCaps::default());
        let first = cache.get("ws1", "tok").await.unwrap();
        let second = cache.refresh("ws1", "tok").await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second), "refresh produces a new snapshot");
        // The old snapshot is still usable by in-flight readers.
        assert_eq!(first.tag_id_by_name("urgent"), Some("t1"));
    }

    #[tokio::test]
    async fn task_cap_marks_dataset_truncated() {
        let api = StubApi {
            projects: vec![
                json!({"id": "p1", "name": "Apollo"}),
                json!({"id": "p2", "name": "Gemini"}),
            ],
            tasks_per_project: 3,
            ..StubApi::default()
        };
        let caps = CacheCaps {
            tasks: 4,
            ..CacheCaps::default()
        };
        let metrics = Arc::new(EngineMetrics::new());
        let cache = WorkspaceCache::new(Arc::new(api), caps, metrics.clone());

        let snap = cache.get("ws1", "tok").await.unwrap();
        assert!(snap.truncated.tasks);
        assert_eq!(snap.task_names_by_id.len(), 4);
        assert_eq!(
            metrics
                .cache_truncated_tasks
                .load(std::sync::atomic::Ordering::Relaxed),
            1
        );
    }

    #[tokio::test]
    async fn inserted_tag_is_visible_to_later_lookups() {
        let cache = cache_with(StubApi::default(), CacheCaps::default());
        cache.get("ws1", "tok").await.unwrap();
        cache.insert_tag("ws1", "t-new", "Meetings").await;
        let snap = cache.peek("ws1").await.unwrap();
        assert_eq!(snap.tag_id_by_name("meetings"), Some("t-new"));
    }
}
