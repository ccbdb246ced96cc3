//! 分類結果と検証済みパターンのデータモデル。
use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::taxonomy::{CategoryPath, ConsistencyLevel};

/// 分類器1回分の解析結果。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    pub category_path: CategoryPath,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub hashtags: Vec<String>,
    #[serde(default)]
    pub summary: String,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consistency_level: Option<ConsistencyLevel>,
}

/// 合意形成で確定し、シグネチャをキーに永続化されるパターン。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifiedPattern {
    pub verified_category: CategoryPath,
    pub analysis_count: usize,
    pub total_votes: usize,
    pub vote_ratio: f64,
    pub confidence: f64,
    #[serde(default)]
    pub examples: Vec<AnalysisResult>,
    pub created_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
    #[serde(default)]
    pub usage_count: u64,
}

impl VerifiedPattern {
    /// 保持している例から一貫性レベルを決める。
    ///
    /// Most frequent level among the examples, ties resolved towards the more
    /// conservative level. `None` when no example reported one.
    #[must_use]
    pub fn consistency_level(&self) -> Option<ConsistencyLevel> {
        let mut tally: FxHashMap<ConsistencyLevel, usize> = FxHashMap::default();
        for level in self.examples.iter().filter_map(|example| example.consistency_level) {
            *tally.entry(level).or_default() += 1;
        }
        tally
            .into_iter()
            .max_by(|(left_level, left_count), (right_level, right_count)| {
                left_count
                    .cmp(right_count)
                    .then_with(|| right_level.cmp(left_level))
            })
            .map(|(level, _)| level)
    }
}

/// `find_similar` のヒット。
#[derive(Debug, Clone, PartialEq)]
pub struct PatternMatch {
    pub signature: String,
    pub pattern: VerifiedPattern,
    pub similarity: f64,
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub(crate) fn analysis(path: &str, confidence: f64) -> AnalysisResult {
        AnalysisResult {
            category_path: CategoryPath::parse(path).expect("valid fixture path"),
            keywords: vec!["fixture".to_string()],
            hashtags: Vec::new(),
            summary: format!("summary for {path}"),
            confidence,
            consistency_level: None,
        }
    }

    pub(crate) fn pattern(path: &str, confidence: f64) -> VerifiedPattern {
        let now = Utc::now();
        VerifiedPattern {
            verified_category: CategoryPath::parse(path).expect("valid fixture path"),
            analysis_count: 20,
            total_votes: 15,
            vote_ratio: 0.75,
            confidence,
            examples: vec![analysis(path, 0.9)],
            created_at: now,
            last_used_at: now,
            usage_count: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::{analysis, pattern};
    use super::*;

    fn with_levels(levels: &[Option<ConsistencyLevel>]) -> VerifiedPattern {
        let mut verified = pattern("Gaming > Action", 0.6);
        verified.examples = levels
            .iter()
            .map(|level| AnalysisResult {
                consistency_level: *level,
                ..analysis("Gaming > Action", 0.8)
            })
            .collect();
        verified
    }

    #[test]
    fn consistency_level_is_the_mode_with_conservative_ties() {
        use ConsistencyLevel::{High, Low, Medium};
        assert_eq!(
            with_levels(&[Some(High), Some(High), Some(Medium)]).consistency_level(),
            Some(High)
        );
        assert_eq!(
            with_levels(&[Some(High), Some(Low), None]).consistency_level(),
            Some(Low)
        );
        assert_eq!(with_levels(&[None, None]).consistency_level(), None);
    }

    #[test]
    fn serializes_with_camel_case_fields() {
        let value = serde_json::to_value(pattern("Gaming > Action > FPS", 0.5)).expect("serializes");
        assert_eq!(value["verifiedCategory"]["fullPath"], "Gaming > Action > FPS");
        assert_eq!(value["verifiedCategory"]["mainCategory"], "Gaming");
        assert_eq!(value["analysisCount"], 20);
        assert_eq!(value["usageCount"], 0);
        assert!(value["examples"][0].get("consistencyLevel").is_none());

        let back: VerifiedPattern = serde_json::from_value(value).expect("deserializes");
        assert_eq!(back.verified_category.depth(), 3);
    }
}
