//! On-disk `Store` implementation. Layout per agent root:
//!
//! ```text
//! <root>/<agentId>/
//!   meta.json(.wal)
//!   runtime/{messages,tool-calls,todos,skills}.json(.wal)
//!   events/{progress,control,monitor}.log
//!   history/{windows,compressions,recovered}/<name>_<ts>.json
//!   snapshots/<id>.json
//! ```
//!
//! Runtime files are whole-object-replace: write to `<path>.wal`, fsync,
//! atomically rename over `<path>`. A crash between the two leaves a stale
//! `.wal` that the next load promotes if `<path>` itself is missing or
//! unreadable. Event logs are append-only, one JSON object per line, never
//! pretty-printed, so a reader can always skip a torn trailing line.

use super::{
    legacy, HistoryArtifactKind, Store, StoreError, StoreResult, APPEND_RETRY_ATTEMPTS, APPEND_RETRY_BASE_MS,
};
use crate::protocol::{AgentInfo, Channel, Snapshot, SkillsState, Timeline, ToolCallRecord, TodoSnapshot};
use async_trait::async_trait;
use atrium_provider::ChatMessage;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn agent_dir(&self, agent_id: &str) -> PathBuf {
        self.root.join(agent_id)
    }

    fn meta_path(&self, agent_id: &str) -> PathBuf {
        self.agent_dir(agent_id).join("meta.json")
    }

    fn runtime_path(&self, agent_id: &str, name: &str) -> PathBuf {
        self.agent_dir(agent_id).join("runtime").join(format!("{name}.json"))
    }

    fn events_path(&self, agent_id: &str, channel: Channel) -> PathBuf {
        self.agent_dir(agent_id)
            .join("events")
            .join(format!("{}.log", channel.as_str()))
    }

    fn snapshots_dir(&self, agent_id: &str) -> PathBuf {
        self.agent_dir(agent_id).join("snapshots")
    }

    fn history_dir(&self, agent_id: &str, kind: HistoryArtifactKind) -> PathBuf {
        self.agent_dir(agent_id).join("history").join(kind.dir_name())
    }

    async fn write_whole_object(path: &Path, bytes: &[u8]) -> StoreResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|source| io_err(parent, source))?;
        }
        let wal_path = wal_path_for(path);
        {
            let mut file = fs::File::create(&wal_path)
                .await
                .map_err(|source| io_err(&wal_path, source))?;
            file.write_all(bytes)
                .await
                .map_err(|source| io_err(&wal_path, source))?;
            file.sync_all().await.map_err(|source| io_err(&wal_path, source))?;
        }
        fs::rename(&wal_path, path)
            .await
            .map_err(|source| io_err(path, source))?;
        Ok(())
    }

    /// Loads a whole-object-replace file, promoting a surviving `.wal` left
    /// behind by a crash between the WAL write and the rename.
    async fn read_whole_object(path: &Path) -> StoreResult<Vec<u8>> {
        match fs::read(path).await {
            Ok(bytes) => Ok(bytes),
            Err(_) => {
                let wal_path = wal_path_for(path);
                let bytes = fs::read(&wal_path)
                    .await
                    .map_err(|source| io_err(path, source))?;
                let _ = fs::rename(&wal_path, path).await;
                Ok(bytes)
            }
        }
    }

    async fn save_json<T: serde::Serialize>(path: &Path, value: &T) -> StoreResult<()> {
        let bytes = serde_json::to_vec_pretty(value)?;
        Self::write_whole_object(path, &bytes).await
    }

    async fn load_json<T: serde::de::DeserializeOwned>(path: &Path) -> StoreResult<T> {
        let bytes = Self::read_whole_object(path).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

fn wal_path_for(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".wal");
    PathBuf::from(name)
}

fn io_err(path: &Path, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[async_trait]
impl Store for FileStore {
    async fn exists(&self, agent_id: &str) -> StoreResult<bool> {
        Ok(fs::metadata(self.meta_path(agent_id)).await.is_ok())
    }

    async fn save_info(&self, agent_id: &str, info: &AgentInfo) -> StoreResult<()> {
        Self::save_json(&self.meta_path(agent_id), info).await
    }

    async fn load_info(&self, agent_id: &str) -> StoreResult<AgentInfo> {
        if !self.exists(agent_id).await? {
            return Err(StoreError::AgentNotFound(agent_id.to_string()));
        }
        Self::load_json(&self.meta_path(agent_id)).await
    }

    async fn save_messages(&self, agent_id: &str, messages: &[ChatMessage]) -> StoreResult<()> {
        Self::save_json(&self.runtime_path(agent_id, "messages"), &messages).await
    }

    async fn load_messages(&self, agent_id: &str) -> StoreResult<Vec<ChatMessage>> {
        let path = self.runtime_path(agent_id, "messages");
        if fs::metadata(&path).await.is_err() && fs::metadata(wal_path_for(&path)).await.is_err() {
            return Ok(Vec::new());
        }
        Self::load_json(&path).await
    }

    async fn save_tool_call_records(&self, agent_id: &str, records: &[ToolCallRecord]) -> StoreResult<()> {
        Self::save_json(&self.runtime_path(agent_id, "tool-calls"), &records).await
    }

    async fn load_tool_call_records(&self, agent_id: &str) -> StoreResult<Vec<ToolCallRecord>> {
        let path = self.runtime_path(agent_id, "tool-calls");
        if fs::metadata(&path).await.is_err() && fs::metadata(wal_path_for(&path)).await.is_err() {
            return Ok(Vec::new());
        }
        let bytes = Self::read_whole_object(&path).await?;
        match serde_json::from_slice::<Vec<ToolCallRecord>>(&bytes) {
            Ok(records) => Ok(records),
            Err(current_schema_error) => {
                let raw: Vec<serde_json::Value> = serde_json::from_slice(&bytes)
                    .map_err(|_| StoreError::Serialization(current_schema_error))?;
                let total = raw.len();
                let records: Vec<ToolCallRecord> =
                    raw.into_iter().filter_map(legacy::convert_tool_call_record).collect();
                let discarded = total - records.len();
                if discarded > 0 {
                    tracing::warn!(
                        agent_id,
                        discarded,
                        total,
                        "discarded tool-call records matching neither the current nor legacy schema"
                    );
                }
                Ok(records)
            }
        }
    }

    async fn save_todos(&self, agent_id: &str, todos: &TodoSnapshot) -> StoreResult<()> {
        Self::save_json(&self.runtime_path(agent_id, "todos"), todos).await
    }

    async fn load_todos(&self, agent_id: &str) -> StoreResult<TodoSnapshot> {
        let path = self.runtime_path(agent_id, "todos");
        if fs::metadata(&path).await.is_err() && fs::metadata(wal_path_for(&path)).await.is_err() {
            return Ok(TodoSnapshot::default());
        }
        Self::load_json(&path).await
    }

    async fn save_skills_state(&self, agent_id: &str, state: &SkillsState) -> StoreResult<()> {
        Self::save_json(&self.runtime_path(agent_id, "skills"), state).await
    }

    async fn load_skills_state(&self, agent_id: &str) -> StoreResult<SkillsState> {
        let path = self.runtime_path(agent_id, "skills");
        if fs::metadata(&path).await.is_err() && fs::metadata(wal_path_for(&path)).await.is_err() {
            return Ok(SkillsState::default());
        }
        Self::load_json(&path).await
    }

    async fn append_event(&self, agent_id: &str, channel: Channel, timeline: &Timeline) -> StoreResult<()> {
        let path = self.events_path(agent_id, channel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(|source| io_err(parent, source))?;
        }
        let mut line = serde_json::to_vec(timeline)?;
        line.push(b'\n');

        let mut attempt = 0u32;
        loop {
            let result = async {
                let mut file = fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&path)
                    .await
                    .map_err(|source| io_err(&path, source))?;
                file.write_all(&line).await.map_err(|source| io_err(&path, source))?;
                file.sync_all().await.map_err(|source| io_err(&path, source))
            }
            .await;

            match result {
                Ok(()) => return Ok(()),
                Err(io_error) if attempt + 1 < APPEND_RETRY_ATTEMPTS => {
                    attempt += 1;
                    let backoff_ms = APPEND_RETRY_BASE_MS * 2u64.pow(attempt - 1);
                    tokio::time::sleep(std::time::Duration::from_millis(backoff_ms)).await;
                    let _ = io_error;
                }
                Err(StoreError::Io { source, .. }) => {
                    return Err(StoreError::AppendContention {
                        path,
                        attempts: attempt + 1,
                        source,
                    })
                }
                Err(other) => return Err(other),
            }
        }
    }

    async fn read_events(
        &self,
        agent_id: &str,
        channel: Channel,
        since_seq: Option<u64>,
    ) -> StoreResult<Vec<Timeline>> {
        let path = self.events_path(agent_id, channel);
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(io_err(&path, source)),
        };
        let floor = since_seq.unwrap_or(0);
        let mut events = Vec::new();
        for line in bytes.split(|b| *b == b'\n') {
            if line.is_empty() {
                continue;
            }
            match serde_json::from_slice::<Timeline>(line) {
                Ok(timeline) => {
                    if timeline.bookmark.seq > floor {
                        events.push(timeline);
                    }
                }
                Err(e) => {
                    tracing::warn!(agent_id, channel = channel.as_str(), error = %e, "skipping malformed event line");
                }
            }
        }
        Ok(events)
    }

    async fn save_snapshot(&self, agent_id: &str, snapshot: &Snapshot) -> StoreResult<()> {
        let path = self.snapshots_dir(agent_id).join(format!("{}.json", snapshot.id));
        Self::save_json(&path, snapshot).await
    }

    async fn load_snapshot(&self, agent_id: &str, snapshot_id: &str) -> StoreResult<Snapshot> {
        let path = self.snapshots_dir(agent_id).join(format!("{snapshot_id}.json"));
        Self::load_json(&path).await
    }

    async fn list_snapshots(&self, agent_id: &str) -> StoreResult<Vec<String>> {
        let dir = self.snapshots_dir(agent_id);
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(io_err(&dir, source)),
        };
        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|source| io_err(&dir, source))? {
            if let Some(stem) = entry.path().file_stem().and_then(|s| s.to_str()) {
                if entry.path().extension().and_then(|e| e.to_str()) == Some("json") {
                    ids.push(stem.to_string());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }

    async fn delete_snapshot(&self, agent_id: &str, snapshot_id: &str) -> StoreResult<()> {
        let path = self.snapshots_dir(agent_id).join(format!("{snapshot_id}.json"));
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(io_err(&path, source)),
        }
    }

    async fn save_history_artifact(
        &self,
        agent_id: &str,
        kind: HistoryArtifactKind,
        name: &str,
        value: &serde_json::Value,
    ) -> StoreResult<String> {
        let safe_name = super::sanitize_file_name(name);
        let ts = time::OffsetDateTime::now_utc().unix_timestamp();
        let file_name = format!("{safe_name}_{ts}");
        let path = self.history_dir(agent_id, kind).join(format!("{file_name}.json"));
        Self::save_json(&path, value).await?;
        Ok(file_name)
    }

    async fn delete_agent(&self, agent_id: &str) -> StoreResult<()> {
        let dir = self.agent_dir(agent_id);
        match fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(io_err(&dir, source)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Bookmark, DomainEvent};

    fn sample_info(agent_id: &str) -> AgentInfo {
        let now = time::OffsetDateTime::now_utc();
        AgentInfo {
            agent_id: agent_id.to_string(),
            template_id: None,
            model: "test-model".into(),
            created_at: now,
            last_active_at: now,
            runtime_config: serde_json::json!({}),
        }
    }

    #[tokio::test]
    async fn save_then_load_info_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        let info = sample_info("agent-1");
        store.save_info("agent-1", &info).await.unwrap();
        let loaded = store.load_info("agent-1").await.unwrap();
        assert_eq!(loaded.agent_id, "agent-1");
        assert!(store.exists("agent-1").await.unwrap());
    }

    #[tokio::test]
    async fn load_info_for_missing_agent_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        let err = store.load_info("ghost").await.unwrap_err();
        assert!(matches!(err, StoreError::AgentNotFound(_)));
    }

    #[tokio::test]
    async fn crash_between_wal_write_and_rename_is_recovered_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        let info = sample_info("agent-2");
        store.save_info("agent-2", &info).await.unwrap();

        // Simulate a crash: leave a `.wal` with newer content and delete the
        // promoted file, as would happen if the process died right after the
        // WAL write but before the rename.
        let path = store.meta_path("agent-2");
        let wal = wal_path_for(&path);
        fs::copy(&path, &wal).await.unwrap();
        fs::remove_file(&path).await.unwrap();

        let loaded = store.load_info("agent-2").await.unwrap();
        assert_eq!(loaded.agent_id, "agent-2");
        assert!(fs::metadata(&path).await.is_ok());
    }

    #[tokio::test]
    async fn read_events_filters_by_since_seq_and_skips_malformed_lines() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());

        for seq in 1..=3u64 {
            let timeline = Timeline {
                cursor: seq,
                bookmark: Bookmark {
                    seq,
                    timestamp: seq as i64,
                },
                event: DomainEvent::TextDelta {
                    text: format!("chunk-{seq}"),
                },
            };
            store.append_event("agent-3", Channel::Progress, &timeline).await.unwrap();
        }

        let path = store.events_path("agent-3", Channel::Progress);
        let mut bytes = fs::read(&path).await.unwrap();
        bytes.extend_from_slice(b"not json\n");
        fs::write(&path, &bytes).await.unwrap();

        let all = store.read_events("agent-3", Channel::Progress, None).await.unwrap();
        assert_eq!(all.len(), 3);

        let since_one = store
            .read_events("agent-3", Channel::Progress, Some(1))
            .await
            .unwrap();
        assert_eq!(since_one.len(), 2);
        assert_eq!(since_one[0].bookmark.seq, 2);
    }

    #[tokio::test]
    async fn snapshots_list_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        let info = sample_info("agent-4");
        let snapshot = Snapshot {
            id: "snap-1".into(),
            timestamp: time::OffsetDateTime::now_utc(),
            messages: Vec::new(),
            tool_call_records: Vec::new(),
            todos: TodoSnapshot::default(),
            skills_state: SkillsState::default(),
            info,
        };
        store.save_snapshot("agent-4", &snapshot).await.unwrap();
        assert_eq!(store.list_snapshots("agent-4").await.unwrap(), vec!["snap-1"]);
        store.delete_snapshot("agent-4", "snap-1").await.unwrap();
        assert!(store.list_snapshots("agent-4").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn history_artifact_name_is_sanitized() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        let file_name = store
            .save_history_artifact(
                "agent-5",
                HistoryArtifactKind::Recovered,
                "some/weird name.txt",
                &serde_json::json!({"content": "x"}),
            )
            .await
            .unwrap();
        assert!(!file_name.contains('/'));
        assert!(!file_name.contains(' '));
    }

    #[tokio::test]
    async fn tool_call_records_fall_back_to_legacy_integer_state_schema() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        let path = store.runtime_path("agent-6", "tool-calls");
        fs::create_dir_all(path.parent().unwrap()).await.unwrap();

        // Pre-rename on-disk shape: integer-coded `state` instead of the
        // current snake_case name, plus one record with a state code that
        // matches neither schema and must be discarded.
        let approval = serde_json::json!({
            "required": false, "approval_id": null, "decided_by": null,
            "decided_at": null, "note": null,
        });
        let legacy = serde_json::json!([
            {
                "id": "c1", "name": "fs_list", "input": {}, "state": 5,
                "approval": approval, "result": "ok", "error": null,
                "is_error": false, "started_at": null, "completed_at": null,
                "duration_ms": null, "created_at": "2024-01-01T00:00:00Z",
                "updated_at": "2024-01-01T00:00:00Z", "audit_trail": [],
            },
            {
                "id": "c2", "name": "fs_list", "input": {}, "state": 255,
                "approval": approval, "result": null, "error": null,
                "is_error": false, "started_at": null, "completed_at": null,
                "duration_ms": null, "created_at": "2024-01-01T00:00:00Z",
                "updated_at": "2024-01-01T00:00:00Z", "audit_trail": [],
            },
        ]);
        fs::write(&path, serde_json::to_vec(&legacy).unwrap()).await.unwrap();

        let records = store.load_tool_call_records("agent-6").await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, "c1");
        assert_eq!(records[0].state, crate::protocol::ToolCallState::Completed);
    }
}
