//! JSON-file [`ContentStore`].
//!
//! Layout under the root directory:
//!
//! ```text
//! items/<id>.json     one pretty-printed document per item
//! audits/<id>.jsonl   one audit record per line, version order
//! ```
//!
//! Item writes and audit appends both go through a temp file and a rename
//! under a per-item lock, so a crash or a failed write leaves either the
//! old file or the new one, never a torn line. A torn trailing line left by
//! an older writer is skipped on read and dropped by the next append.

use super::{ContentFilter, ContentStore, StoreError};
use crate::content::{AuditRecord, ContentId, ContentItem};
use async_trait::async_trait;
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// Directory-backed store.
#[derive(Clone)]
pub struct FileStore {
    root: PathBuf,
    locks: Arc<DashMap<ContentId, Arc<Mutex<()>>>>,
}

impl FileStore {
    /// Open (and create if needed) a store rooted at `root`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] if the directories cannot be created.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        tokio::fs::create_dir_all(root.join("items")).await?;
        tokio::fs::create_dir_all(root.join("audits")).await?;
        Ok(Self {
            root,
            locks: Arc::new(DashMap::new()),
        })
    }

    /// Root directory of the store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn item_path(&self, id: &ContentId) -> Result<PathBuf, StoreError> {
        validate_id(id)?;
        Ok(self.root.join("items").join(format!("{}.json", id.as_str())))
    }

    fn audit_path(&self, id: &ContentId) -> Result<PathBuf, StoreError> {
        validate_id(id)?;
        Ok(self.root.join("audits").join(format!("{}.jsonl", id.as_str())))
    }

    fn lock_for(&self, id: &ContentId) -> Arc<Mutex<()>> {
        self.locks
            .entry(id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn read_history(&self, id: &ContentId) -> Result<Vec<AuditRecord>, StoreError> {
        let path = self.audit_path(id)?;
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let complete = content.ends_with('\n');
        let lines: Vec<&str> = content.lines().filter(|l| !l.trim().is_empty()).collect();
        let mut records = Vec::with_capacity(lines.len());
        for (i, line) in lines.iter().enumerate() {
            match serde_json::from_str(line) {
                Ok(record) => records.push(record),
                Err(e) if !complete && i + 1 == lines.len() => {
                    tracing::warn!(content_id = %id, error = %e, "skipping torn trailing audit line");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(records)
    }

    /// Replace `path` with `contents` via a synced temp file.
    async fn write_atomic(path: &Path, tmp: &Path, contents: &[u8]) -> Result<(), StoreError> {
        let result: std::io::Result<()> = async {
            let mut file = tokio::fs::File::create(tmp).await?;
            file.write_all(contents).await?;
            file.sync_data().await?;
            tokio::fs::rename(tmp, path).await
        }
        .await;
        if let Err(e) = result {
            if let Err(cleanup) = tokio::fs::remove_file(tmp).await {
                tracing::debug!(path = %tmp.display(), error = %cleanup, "temp file not removed");
            }
            return Err(e.into());
        }
        Ok(())
    }
}

/// Ids become file names, so only a conservative character set is allowed.
fn validate_id(id: &ContentId) -> Result<(), StoreError> {
    let s = id.as_str();
    let ok = !s.is_empty()
        && s.len() <= 128
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if ok {
        Ok(())
    } else {
        Err(StoreError::InvalidId(s.to_string()))
    }
}

#[async_trait]
impl ContentStore for FileStore {
    async fn get_content_item(&self, id: &ContentId) -> Result<ContentItem, StoreError> {
        let path = self.item_path(id)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(id.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn save_content_item(&self, item: &ContentItem) -> Result<(), StoreError> {
        let path = self.item_path(&item.id)?;
        let json = serde_json::to_string_pretty(item)?;
        let lock = self.lock_for(&item.id);
        let _guard = lock.lock().await;

        Self::write_atomic(&path, &path.with_extension("json.tmp"), json.as_bytes()).await?;
        tracing::debug!(content_id = %item.id, revision = item.current_revision, "item saved");
        Ok(())
    }

    async fn append_audit_record(&self, record: &AuditRecord) -> Result<(), StoreError> {
        let path = self.audit_path(&record.content_id)?;

        let lock = self.lock_for(&record.content_id);
        let _guard = lock.lock().await;

        let history = self.read_history(&record.content_id).await?;
        let expected = history.last().map_or(1, |r| r.audit_version + 1);
        if record.audit_version != expected {
            return Err(StoreError::VersionConflict {
                content_id: record.content_id.clone(),
                expected,
                attempted: record.audit_version,
            });
        }

        // Rewritten whole so a failed write never leaves a partial line
        // behind, and an error always means the record was not stored.
        let mut contents = String::new();
        for existing in history.iter().chain(std::iter::once(record)) {
            contents.push_str(&serde_json::to_string(existing)?);
            contents.push('\n');
        }
        Self::write_atomic(&path, &path.with_extension("jsonl.tmp"), contents.as_bytes()).await?;
        tracing::debug!(
            content_id = %record.content_id,
            audit_version = record.audit_version,
            "audit record appended"
        );
        Ok(())
    }

    async fn get_latest_audit_record(
        &self,
        content_id: &ContentId,
    ) -> Result<Option<AuditRecord>, StoreError> {
        Ok(self.read_history(content_id).await?.pop())
    }

    async fn list_audit_records(
        &self,
        content_id: &ContentId,
    ) -> Result<Vec<AuditRecord>, StoreError> {
        self.read_history(content_id).await
    }

    async fn list_content_items(
        &self,
        filter: &ContentFilter,
    ) -> Result<Vec<ContentItem>, StoreError> {
        let mut dir = tokio::fs::read_dir(self.root.join("items")).await?;
        let mut items = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let content = tokio::fs::read_to_string(&path).await?;
            let item: ContentItem = serde_json::from_str(&content)?;
            if filter.matches(&item) {
                items.push(item);
            }
        }
        items.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::{ContentStatus, Section};
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn record(id: &str, version: u32) -> AuditRecord {
        AuditRecord {
            content_id: ContentId::new(id),
            audit_version: version,
            audited_at: Utc::now(),
            mode: "quick".into(),
            content_revision: 1,
            overall_score: 8.25,
            category_scores: BTreeMap::from([(crate::content::ReviewCategory::Seo, 8.25)]),
            rationales: BTreeMap::new(),
            issues: vec!["thin intro".into()],
            missing_elements: vec![],
            recommendations: vec![],
            unavailable: vec![],
            needs_fix: false,
        }
    }

    #[tokio::test]
    async fn test_item_round_trip_with_sections() {
        let dir = tempfile::tempdir().expect("test: tempdir");
        let store = FileStore::open(dir.path()).await.expect("test: open");
        let mut item = ContentItem::new_draft(ContentId::new("long-1"), "Title", "guide");
        item.sections.push(Section {
            id: "s0".into(),
            order: 0,
            title: "Intro".into(),
            target_words: 300,
            body: "body text".into(),
            keywords: vec!["retry".into()],
            related_entities: vec!["Kafka".into()],
            frozen: false,
        });
        item.status = ContentStatus::Published;
        store.save_content_item(&item).await.expect("test: save");
        let back = store.get_content_item(&item.id).await.expect("test: get");
        assert_eq!(back, item);
    }

    #[tokio::test]
    async fn test_rejects_path_like_ids() {
        let dir = tempfile::tempdir().expect("test: tempdir");
        let store = FileStore::open(dir.path()).await.expect("test: open");
        let result = store.get_content_item(&ContentId::new("../etc/passwd")).await;
        assert!(matches!(result, Err(StoreError::InvalidId(_))));
    }

    #[tokio::test]
    async fn test_audit_history_persists_across_reopen() {
        let dir = tempfile::tempdir().expect("test: tempdir");
        {
            let store = FileStore::open(dir.path()).await.expect("test: open");
            store.append_audit_record(&record("a", 1)).await.expect("test: v1");
            store.append_audit_record(&record("a", 2)).await.expect("test: v2");
        }
        let store = FileStore::open(dir.path()).await.expect("test: reopen");
        let history = store
            .list_audit_records(&ContentId::new("a"))
            .await
            .expect("test: list");
        assert_eq!(
            history.iter().map(|r| r.audit_version).collect::<Vec<_>>(),
            vec![1, 2]
        );
        assert_eq!(history[0], record_with_time(&history[0]));
    }

    fn record_with_time(r: &AuditRecord) -> AuditRecord {
        AuditRecord {
            audited_at: r.audited_at,
            ..record("a", 1)
        }
    }

    #[tokio::test]
    async fn test_append_conflict_leaves_history_unchanged() {
        let dir = tempfile::tempdir().expect("test: tempdir");
        let store = FileStore::open(dir.path()).await.expect("test: open");
        store.append_audit_record(&record("a", 1)).await.expect("test: v1");
        let result = store.append_audit_record(&record("a", 5)).await;
        assert!(matches!(result, Err(StoreError::VersionConflict { .. })));
        let history = store
            .list_audit_records(&ContentId::new("a"))
            .await
            .expect("test: list");
        assert_eq!(history.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_append_stores_nothing_and_version_is_reusable() {
        let dir = tempfile::tempdir().expect("test: tempdir");
        let store = FileStore::open(dir.path()).await.expect("test: open");
        store.append_audit_record(&record("a", 1)).await.expect("test: v1");
        let before = tokio::fs::read(dir.path().join("audits/a.jsonl"))
            .await
            .expect("test: read file");

        // A directory in the temp file's place makes the write fail.
        let blocker = dir.path().join("audits/a.jsonl.tmp");
        tokio::fs::create_dir(&blocker).await.expect("test: blocker");
        let result = store.append_audit_record(&record("a", 2)).await;
        assert!(matches!(result, Err(StoreError::Io(_))), "{result:?}");
        let after = tokio::fs::read(dir.path().join("audits/a.jsonl"))
            .await
            .expect("test: read file");
        assert_eq!(after, before);

        tokio::fs::remove_dir(&blocker).await.expect("test: unblock");
        store.append_audit_record(&record("a", 2)).await.expect("test: v2 retried");
        let versions: Vec<u32> = store
            .list_audit_records(&ContentId::new("a"))
            .await
            .expect("test: list")
            .iter()
            .map(|r| r.audit_version)
            .collect();
        assert_eq!(versions, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_torn_trailing_line_is_skipped_and_repaired() {
        let dir = tempfile::tempdir().expect("test: tempdir");
        let store = FileStore::open(dir.path()).await.expect("test: open");
        store.append_audit_record(&record("a", 1)).await.expect("test: v1");
        let path = dir.path().join("audits/a.jsonl");
        let mut torn = tokio::fs::read_to_string(&path).await.expect("test: read");
        torn.push_str(r#"{"content_id":"a","audit_ver"#);
        tokio::fs::write(&path, torn).await.expect("test: tear");

        let latest = store
            .get_latest_audit_record(&ContentId::new("a"))
            .await
            .expect("test: readable")
            .expect("test: present");
        assert_eq!(latest.audit_version, 1);

        store.append_audit_record(&record("a", 2)).await.expect("test: v2");
        let repaired = tokio::fs::read_to_string(&path).await.expect("test: read");
        assert_eq!(repaired.lines().count(), 2);
        assert!(!repaired.contains("audit_ver\""));
    }

    #[tokio::test]
    async fn test_corrupt_middle_line_is_an_error() {
        let dir = tempfile::tempdir().expect("test: tempdir");
        let store = FileStore::open(dir.path()).await.expect("test: open");
        store.append_audit_record(&record("a", 1)).await.expect("test: v1");
        let path = dir.path().join("audits/a.jsonl");
        let mut contents = tokio::fs::read_to_string(&path).await.expect("test: read");
        contents.insert_str(0, "not json\n");
        tokio::fs::write(&path, contents).await.expect("test: corrupt");
        let result = store.list_audit_records(&ContentId::new("a")).await;
        assert!(matches!(result, Err(StoreError::Serialization(_))), "{result:?}");
    }

    #[tokio::test]
    async fn test_list_filters_by_category() {
        let dir = tempfile::tempdir().expect("test: tempdir");
        let store = FileStore::open(dir.path()).await.expect("test: open");
        for (id, cat) in [("a", "guide"), ("b", "tutorial"), ("c", "guide")] {
            let item = ContentItem::new_draft(ContentId::new(id), "t", cat);
            store.save_content_item(&item).await.expect("test: save");
        }
        let guides = store
            .list_content_items(&ContentFilter {
                status: None,
                category: Some("guide".into()),
            })
            .await
            .expect("test: list");
        assert_eq!(
            guides.iter().map(|i| i.id.as_str()).collect::<Vec<_>>(),
            vec!["a", "c"]
        );
    }
}
