//! 検証済みパターンの永続ストア。
//!
//! シグネチャ文字列をキーにした順序付きマップをJSON文書として保存する。
//! 書き込みは単一ライターで直列化し、一時ファイルへの書き出しとリネームで置き換える。
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use super::model::{PatternMatch, VerifiedPattern};
use super::signature::ContentSignature;
use crate::util::persist::write_atomic;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("pattern store I/O failed at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize pattern store: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreMetadata {
    pub total_patterns: usize,
    pub total_verifications: u64,
    pub created_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
}

impl Default for StoreMetadata {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            total_patterns: 0,
            total_verifications: 0,
            created_at: now,
            last_updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct StoreDocument {
    #[serde(default)]
    patterns: BTreeMap<String, VerifiedPattern>,
    #[serde(default)]
    metadata: StoreMetadata,
}

/// 自己学習の統計。
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStats {
    pub enabled: bool,
    pub total_patterns: usize,
    pub total_verifications: u64,
    pub total_usage: u64,
    pub last_updated_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct VerifiedPatternStore {
    path: Option<PathBuf>,
    document: RwLock<StoreDocument>,
    writer: Mutex<()>,
}

impl VerifiedPatternStore {
    /// Store that never touches the filesystem.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// `path` から読み込む。存在しない・壊れている場合は空のストアで開始する。
    pub async fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let document = match tokio::fs::read(&path).await {
            Ok(bytes) => match serde_json::from_slice::<StoreDocument>(&bytes) {
                Ok(mut document) => {
                    document.metadata.total_patterns = document.patterns.len();
                    info!(
                        path = %path.display(),
                        total_patterns = document.metadata.total_patterns,
                        "loaded verified pattern store"
                    );
                    document
                }
                Err(error) => {
                    warn!(
                        path = %path.display(),
                        error = %error,
                        "verified pattern store is corrupt, starting empty"
                    );
                    StoreDocument::default()
                }
            },
            Err(error) if error.kind() == ErrorKind::NotFound => {
                info!(path = %path.display(), "no verified pattern store yet, starting empty");
                StoreDocument::default()
            }
            Err(error) => {
                warn!(
                    path = %path.display(),
                    error = %error,
                    "failed to read verified pattern store, starting empty"
                );
                StoreDocument::default()
            }
        };

        Self {
            path: Some(path),
            document: RwLock::new(document),
            writer: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub async fn get(&self, signature: &str) -> Option<VerifiedPattern> {
        self.document.read().await.patterns.get(signature).cloned()
    }

    pub async fn len(&self) -> usize {
        self.document.read().await.patterns.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.document.read().await.patterns.is_empty()
    }

    /// 全パターンのスナップショット。
    pub async fn patterns(&self) -> BTreeMap<String, VerifiedPattern> {
        self.document.read().await.patterns.clone()
    }

    /// 同一プラットフォームで最も類似度の高いパターンを探す。
    ///
    /// 類似度が `min_similarity` 以上の候補のみ対象。同率の場合はキー順で先のものを採る。
    pub async fn find_similar(
        &self,
        query: &ContentSignature,
        min_similarity: f64,
    ) -> Option<PatternMatch> {
        let document = self.document.read().await;
        let mut best: Option<(&String, &VerifiedPattern, f64)> = None;

        for (key, pattern) in &document.patterns {
            let Ok(candidate) = key.parse::<ContentSignature>() else {
                debug!(signature = %key, "skipping unparsable stored signature");
                continue;
            };
            if candidate.platform() != query.platform() {
                continue;
            }
            let similarity = query.similarity(&candidate);
            if similarity < min_similarity {
                continue;
            }
            if best.is_none_or(|(_, _, top)| similarity > top) {
                best = Some((key, pattern, similarity));
            }
        }

        best.map(|(key, pattern, similarity)| PatternMatch {
            signature: key.clone(),
            pattern: pattern.clone(),
            similarity,
        })
    }

    /// パターンを挿入または上書きし、永続化が終わるまで待つ。
    ///
    /// 上書き時は既存の `created_at`・`usage_count`・`last_used_at` を引き継ぐ。
    ///
    /// # Errors
    /// シリアライズまたはファイル書き込みに失敗した場合。メモリ上の更新は保持される。
    pub async fn put(&self, signature: &str, mut pattern: VerifiedPattern) -> Result<(), StoreError> {
        let _writer = self.writer.lock().await;
        let bytes = {
            let mut document = self.document.write().await;
            if let Some(existing) = document.patterns.get(signature) {
                pattern.created_at = existing.created_at;
                pattern.usage_count = existing.usage_count;
                pattern.last_used_at = existing.last_used_at;
            }
            document.patterns.insert(signature.to_string(), pattern);
            document.metadata.total_patterns = document.patterns.len();
            document.metadata.total_verifications += 1;
            document.metadata.last_updated_at = Utc::now();
            serde_json::to_vec_pretty(&*document)?
        };
        self.persist(&bytes).await
    }

    /// 再利用の記録。存在しないシグネチャでは何もしない。
    ///
    /// Returns the new usage count when the signature exists.
    pub async fn touch(&self, signature: &str) -> Option<u64> {
        let mut document = self.document.write().await;
        let pattern = document.patterns.get_mut(signature)?;
        pattern.usage_count += 1;
        pattern.last_used_at = Utc::now();
        Some(pattern.usage_count)
    }

    /// # Errors
    /// シリアライズまたはファイル書き込みに失敗した場合。
    pub async fn flush(&self) -> Result<(), StoreError> {
        let _writer = self.writer.lock().await;
        let bytes = serde_json::to_vec_pretty(&*self.document.read().await)?;
        self.persist(&bytes).await
    }

    pub async fn stats(&self) -> StoreStats {
        let document = self.document.read().await;
        StoreStats {
            enabled: true,
            total_patterns: document.patterns.len(),
            total_verifications: document.metadata.total_verifications,
            total_usage: document
                .patterns
                .values()
                .map(|pattern| pattern.usage_count)
                .sum(),
            last_updated_at: document.metadata.last_updated_at,
        }
    }

    async fn persist(&self, bytes: &[u8]) -> Result<(), StoreError> {
        let Some(path) = self.path.as_deref() else {
            return Ok(());
        };
        write_atomic(path, bytes)
            .await
            .map_err(|source| StoreError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        debug!(path = %path.display(), bytes = bytes.len(), "persisted verified pattern store");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::learning::model::fixtures::pattern;

    fn signature(raw: &str) -> ContentSignature {
        raw.parse().expect("valid signature")
    }

    #[tokio::test]
    async fn find_similar_respects_threshold_and_platform() {
        let store = VerifiedPatternStore::in_memory();
        store
            .put("youtube:fps,game,ranked", pattern("Gaming > Action", 0.7))
            .await
            .expect("put");
        store
            .put("tiktok:fps,game,ranked", pattern("Entertainment", 0.7))
            .await
            .expect("put");

        // {fps,game,ranked} vs {fps,game,tips,tricks}: 2/5 = 0.4
        let query = signature("youtube:fps,game,tips,tricks");
        let hit = store.find_similar(&query, 0.4).await.expect("0.4 >= 0.4");
        assert_eq!(hit.signature, "youtube:fps,game,ranked");
        assert!((hit.similarity - 0.4).abs() < 1e-9);

        assert!(store.find_similar(&query, 0.41).await.is_none());
        assert!(
            store
                .find_similar(&signature("vimeo:fps,game,ranked"), 0.1)
                .await
                .is_none()
        );
    }

    #[tokio::test]
    async fn find_similar_prefers_highest_then_first_key() {
        let store = VerifiedPatternStore::in_memory();
        for key in ["youtube:aa,bb", "youtube:aa,cc", "youtube:aa,bb,cc,dd"] {
            store.put(key, pattern("Gaming", 0.5)).await.expect("put");
        }
        let hit = store
            .find_similar(&signature("youtube:aa,bb,cc"), 0.1)
            .await
            .expect("hit");
        // 0.75 for the four-keyword pattern beats 0.667 for the pairs
        assert_eq!(hit.signature, "youtube:aa,bb,cc,dd");

        let tie = store
            .find_similar(&signature("youtube:aa"), 0.1)
            .await
            .expect("hit");
        assert_eq!(tie.signature, "youtube:aa,bb");
    }

    #[tokio::test]
    async fn touch_tracks_usage_and_ignores_missing() {
        let store = VerifiedPatternStore::in_memory();
        store.put("youtube:aa", pattern("Gaming", 0.5)).await.expect("put");
        assert_eq!(store.touch("youtube:aa").await, Some(1));
        assert_eq!(store.touch("youtube:aa").await, Some(2));
        assert_eq!(store.touch("youtube:zz").await, None);
        assert_eq!(store.len().await, 1);
        assert_eq!(store.stats().await.total_usage, 2);
    }

    #[tokio::test]
    async fn overwrite_keeps_creation_and_usage() {
        let store = VerifiedPatternStore::in_memory();
        let first = pattern("Gaming", 0.5);
        let created_at = first.created_at;
        store.put("youtube:aa", first).await.expect("put");
        store.touch("youtube:aa").await;

        store
            .put("youtube:aa", pattern("Gaming > Action", 0.9))
            .await
            .expect("overwrite");
        let stored = store.get("youtube:aa").await.expect("present");
        assert_eq!(stored.verified_category.full_path(), "Gaming > Action");
        assert_eq!(stored.created_at, created_at);
        assert_eq!(stored.usage_count, 1);

        let stats = store.stats().await;
        assert_eq!(stats.total_patterns, 1);
        assert_eq!(stats.total_verifications, 2);
    }

    #[tokio::test]
    async fn flush_then_load_reproduces_patterns() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested/verified-categories.json");

        let store = VerifiedPatternStore::load(&path).await;
        assert!(store.is_empty().await);
        store.put("youtube:aa,bb", pattern("Gaming > Action", 0.6)).await.expect("put");
        store.put("tiktok:dance", pattern("Performance", 0.8)).await.expect("put");
        store.touch("tiktok:dance").await;
        store.flush().await.expect("flush");

        let reloaded = VerifiedPatternStore::load(&path).await;
        assert_eq!(reloaded.patterns().await, store.patterns().await);
        assert_eq!(reloaded.stats().await.total_patterns, 2);
        assert!(!path.with_file_name("verified-categories.json.tmp").exists());
    }

    #[tokio::test]
    async fn persisted_document_uses_camel_case_metadata() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("store.json");
        let store = VerifiedPatternStore::load(&path).await;
        store.put("youtube:aa", pattern("Gaming", 0.5)).await.expect("put");

        let raw = std::fs::read_to_string(&path).expect("written by put");
        let value: serde_json::Value = serde_json::from_str(&raw).expect("json");
        assert_eq!(value["metadata"]["totalPatterns"], 1);
        assert_eq!(value["metadata"]["totalVerifications"], 1);
        assert!(value["metadata"]["lastUpdatedAt"].is_string());
        assert_eq!(
            value["patterns"]["youtube:aa"]["verifiedCategory"]["fullPath"],
            "Gaming"
        );
    }

    #[tokio::test]
    async fn corrupt_file_loads_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("store.json");
        std::fs::write(&path, b"{ not json").expect("write");
        let store = VerifiedPatternStore::load(&path).await;
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn failed_persist_keeps_in_memory_pattern() {
        let dir = tempfile::tempdir().expect("tempdir");
        // a directory where the file should be makes the rename fail
        let path = dir.path().join("occupied");
        std::fs::create_dir_all(path.join("child")).expect("mkdir");
        let store = VerifiedPatternStore::load(&path).await;

        let error = store
            .put("youtube:aa", pattern("Gaming", 0.5))
            .await
            .expect_err("cannot replace a directory");
        assert!(matches!(error, StoreError::Io { .. }));
        assert!(store.get("youtube:aa").await.is_some());
        assert_eq!(store.stats().await.total_patterns, 1);
    }

    #[tokio::test]
    async fn concurrent_puts_keep_counters_consistent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Arc::new(VerifiedPatternStore::load(dir.path().join("store.json")).await);
        let handles: Vec<_> = (0..16)
            .map(|index| {
                let store = Arc::clone(&store);
                tokio::spawn(async move {
                    store
                        .put(&format!("youtube:key{index:02}"), pattern("Gaming", 0.5))
                        .await
                })
            })
            .collect();
        for handle in futures::future::join_all(handles).await {
            handle.expect("join").expect("put");
        }

        let reloaded = VerifiedPatternStore::load(dir.path().join("store.json")).await;
        assert_eq!(reloaded.len().await, 16);
        assert_eq!(reloaded.stats().await.total_verifications, 16);
    }
}
