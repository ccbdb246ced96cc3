//! 学習済み同義語規則とカテゴリ使用統計のファイル保存。
//!
//! どちらも検証済みパターンストアと同じ方式（一時ファイル書き出し + リネーム）で
//! 置き換える。読み込み時にファイルが無い・壊れている場合は空の状態で始める。
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::normalize::PathNormalizer;
use super::usage::CategoryUsageStats;
use crate::util::persist::write_atomic;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("taxonomy state I/O failed at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize taxonomy state: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Learned synonym rules, `variant -> preferred`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LearnedRulesDocument {
    #[serde(default)]
    preferred: BTreeMap<String, String>,
    updated_at: DateTime<Utc>,
}

impl Default for LearnedRulesDocument {
    fn default() -> Self {
        Self {
            preferred: BTreeMap::new(),
            updated_at: Utc::now(),
        }
    }
}

/// パスが `None` の側は読み書きしない。
#[derive(Debug, Default)]
pub struct TaxonomyStateFiles {
    learned_rules: Option<PathBuf>,
    usage: Option<PathBuf>,
    writer: Mutex<()>,
}

impl TaxonomyStateFiles {
    #[must_use]
    pub fn new(learned_rules: impl Into<PathBuf>, usage: impl Into<PathBuf>) -> Self {
        Self {
            learned_rules: Some(learned_rules.into()),
            usage: Some(usage.into()),
            writer: Mutex::new(()),
        }
    }

    /// State that never touches the filesystem.
    #[must_use]
    pub fn disabled() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn learned_rules_path(&self) -> Option<&Path> {
        self.learned_rules.as_deref()
    }

    #[must_use]
    pub fn usage_path(&self) -> Option<&Path> {
        self.usage.as_deref()
    }

    pub async fn load_learned(&self) -> BTreeMap<String, String> {
        let Some(path) = self.learned_rules.as_deref() else {
            return BTreeMap::new();
        };
        let document: LearnedRulesDocument = read_document(path, "learned synonym rules").await;
        info!(
            path = %path.display(),
            rules = document.preferred.len(),
            "loaded learned synonym rules"
        );
        document.preferred
    }

    pub async fn load_usage(&self) -> CategoryUsageStats {
        let Some(path) = self.usage.as_deref() else {
            return CategoryUsageStats::default();
        };
        let stats: CategoryUsageStats = read_document(path, "category usage stats").await;
        info!(
            path = %path.display(),
            categories = stats.len(),
            total = stats.total(),
            "loaded category usage stats"
        );
        stats
    }

    /// 正規化器が学習した同義語規則をすべて書き出す。
    ///
    /// # Errors
    /// シリアライズまたはファイル書き込みに失敗した場合。
    pub async fn save_learned(&self, normalizer: &PathNormalizer) -> Result<(), StateError> {
        let Some(path) = self.learned_rules.as_deref() else {
            return Ok(());
        };
        let _writer = self.writer.lock().await;
        let document = LearnedRulesDocument {
            preferred: normalizer.learned_synonyms(),
            updated_at: Utc::now(),
        };
        persist(path, &serde_json::to_vec_pretty(&document)?).await
    }

    /// # Errors
    /// シリアライズまたはファイル書き込みに失敗した場合。
    pub async fn save_usage(&self, normalizer: &PathNormalizer) -> Result<(), StateError> {
        let Some(path) = self.usage.as_deref() else {
            return Ok(());
        };
        let _writer = self.writer.lock().await;
        let bytes = serde_json::to_vec_pretty(&normalizer.usage_snapshot())?;
        persist(path, &bytes).await
    }
}

async fn read_document<T>(path: &Path, label: &'static str) -> T
where
    T: DeserializeOwned + Default,
{
    match tokio::fs::read(path).await {
        Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|error| {
            warn!(
                path = %path.display(),
                error = %error,
                document = label,
                "taxonomy state file is corrupt, starting empty"
            );
            T::default()
        }),
        Err(error) if error.kind() == ErrorKind::NotFound => {
            debug!(path = %path.display(), document = label, "no taxonomy state file yet");
            T::default()
        }
        Err(error) => {
            warn!(
                path = %path.display(),
                error = %error,
                document = label,
                "failed to read taxonomy state file, starting empty"
            );
            T::default()
        }
    }
}

async fn persist(path: &Path, bytes: &[u8]) -> Result<(), StateError> {
    write_atomic(path, bytes)
        .await
        .map_err(|source| StateError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    debug!(path = %path.display(), bytes = bytes.len(), "persisted taxonomy state");
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::taxonomy::{StaticCategoryRegistry, SynonymDictionary};

    fn normalizer() -> PathNormalizer {
        PathNormalizer::new(
            Arc::new(StaticCategoryRegistry::builtin()),
            SynonymDictionary::default(),
        )
    }

    fn files(dir: &Path) -> TaxonomyStateFiles {
        TaxonomyStateFiles::new(
            dir.join("learned-synonyms.json"),
            dir.join("category-usage.json"),
        )
    }

    #[tokio::test]
    async fn learned_rules_survive_a_reload() {
        let dir = tempfile::tempdir().expect("tempdir");
        let state = files(dir.path());
        let normalizer = normalizer();
        assert!(normalizer.learn_from_feedback("Gaming > Shooter Games", "Gaming > FPS"));

        state.save_learned(&normalizer).await.expect("save");

        let reloaded = files(dir.path()).load_learned().await;
        assert_eq!(
            reloaded,
            BTreeMap::from([("Shooter Games".to_string(), "FPS".to_string())])
        );
        let raw = std::fs::read_to_string(dir.path().join("learned-synonyms.json")).expect("read");
        let value: serde_json::Value = serde_json::from_str(&raw).expect("json");
        assert_eq!(value["preferred"]["Shooter Games"], "FPS");
        assert!(value["updatedAt"].is_string());
    }

    #[tokio::test]
    async fn usage_stats_survive_a_reload() {
        let dir = tempfile::tempdir().expect("tempdir");
        let state = files(dir.path());
        let normalizer = normalizer();
        for _ in 0..3 {
            normalizer
                .normalize("Gaming > Horror", "youtube")
                .expect("normalizes");
        }
        normalizer
            .normalize("Music > Cover", "youtube")
            .expect("normalizes");

        state.save_usage(&normalizer).await.expect("save");

        let stats = files(dir.path()).load_usage().await;
        assert_eq!(stats.total(), 4);
        assert_eq!(stats.popular(1)[0].path, "Gaming > Horror");
    }

    #[tokio::test]
    async fn missing_or_corrupt_files_start_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let state = files(dir.path());
        assert!(state.load_learned().await.is_empty());
        assert!(state.load_usage().await.is_empty());

        std::fs::write(dir.path().join("learned-synonyms.json"), "{not json").expect("write");
        std::fs::write(dir.path().join("category-usage.json"), "[]").expect("write");
        assert!(state.load_learned().await.is_empty());
        assert!(state.load_usage().await.is_empty());
    }

    #[tokio::test]
    async fn disabled_state_is_a_no_op() {
        let state = TaxonomyStateFiles::disabled();
        let normalizer = normalizer();
        normalizer.learn_from_feedback("Gaming > Shooter Games", "Gaming > FPS");

        state.save_learned(&normalizer).await.expect("no-op");
        state.save_usage(&normalizer).await.expect("no-op");
        assert!(state.learned_rules_path().is_none());
        assert!(state.load_learned().await.is_empty());
    }

    #[tokio::test]
    async fn blocked_target_reports_io_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let blocked = dir.path().join("occupied");
        std::fs::create_dir_all(blocked.join("child")).expect("mkdir");
        let state = TaxonomyStateFiles::new(&blocked, dir.path().join("usage.json"));

        let error = state
            .save_learned(&normalizer())
            .await
            .expect_err("rename onto a directory fails");
        assert!(matches!(error, StateError::Io { path, .. } if path == blocked));
    }
}
