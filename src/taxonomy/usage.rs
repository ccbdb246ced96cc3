//! カテゴリ使用統計（正規化に成功したパスごとの使用回数）。
//!
//! 人気カテゴリの一覧と、キーワードからのカテゴリ推薦に使う。
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{CategoryPath, PATH_SEPARATOR};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryUsage {
    pub count: u64,
    pub first_used: DateTime<Utc>,
    pub last_used: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PopularCategory {
    pub path: String,
    pub count: u64,
    pub last_used: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryRecommendation {
    pub path: String,
    /// Matched segment/keyword pairs multiplied by the usage count.
    pub score: u64,
    pub count: u64,
}

/// Usage counters keyed by normalized full path, persisted as camelCase JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryUsageStats {
    #[serde(default)]
    usage: BTreeMap<String, CategoryUsage>,
    created: DateTime<Utc>,
    last_updated: DateTime<Utc>,
}

impl Default for CategoryUsageStats {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            usage: BTreeMap::new(),
            created: now,
            last_updated: now,
        }
    }
}

impl CategoryUsageStats {
    pub fn record(&mut self, path: &CategoryPath) {
        let now = Utc::now();
        let entry = self
            .usage
            .entry(path.full_path())
            .or_insert_with(|| CategoryUsage {
                count: 0,
                first_used: now,
                last_used: now,
            });
        entry.count += 1;
        entry.last_used = now;
        self.last_updated = now;
    }

    #[must_use]
    pub fn get(&self, full_path: &str) -> Option<&CategoryUsage> {
        self.usage.get(full_path)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.usage.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.usage.is_empty()
    }

    /// 全パスの使用回数の合計。
    #[must_use]
    pub fn total(&self) -> u64 {
        self.usage.values().map(|usage| usage.count).sum()
    }

    #[must_use]
    pub fn last_updated(&self) -> DateTime<Utc> {
        self.last_updated
    }

    /// 使用回数の多い順。同数はパスの辞書順。
    #[must_use]
    pub fn popular(&self, limit: usize) -> Vec<PopularCategory> {
        let mut ranked: Vec<(&String, &CategoryUsage)> = self.usage.iter().collect();
        ranked.sort_by(|(_, left), (_, right)| right.count.cmp(&left.count));
        ranked
            .into_iter()
            .take(limit)
            .map(|(path, usage)| PopularCategory {
                path: path.clone(),
                count: usage.count,
                last_used: usage.last_used,
            })
            .collect()
    }

    /// キーワードに部分一致するセグメントを持つパスを推薦する。
    ///
    /// 各キーワードと各セグメントの組で、どちらかがもう一方を（大文字小文字を無視して）
    /// 含めば1点。スコアは `点数 × 使用回数` で、高い順に `limit` 件返す。
    #[must_use]
    pub fn recommend<S: AsRef<str>>(
        &self,
        keywords: &[S],
        limit: usize,
    ) -> Vec<CategoryRecommendation> {
        let keywords: Vec<String> = keywords
            .iter()
            .map(|keyword| keyword.as_ref().trim().to_lowercase())
            .filter(|keyword| !keyword.is_empty())
            .collect();

        let mut recommendations: Vec<CategoryRecommendation> = self
            .usage
            .iter()
            .filter_map(|(path, usage)| {
                let matches: u64 = path
                    .split(PATH_SEPARATOR)
                    .map(str::to_lowercase)
                    .map(|segment| {
                        keywords
                            .iter()
                            .filter(|keyword| {
                                segment.contains(keyword.as_str()) || keyword.contains(&segment)
                            })
                            .count() as u64
                    })
                    .sum();
                (matches > 0).then(|| CategoryRecommendation {
                    path: path.clone(),
                    score: matches * usage.count,
                    count: usage.count,
                })
            })
            .collect();
        recommendations.sort_by(|left, right| right.score.cmp(&left.score));
        recommendations.truncate(limit);
        recommendations
    }
}
