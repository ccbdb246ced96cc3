//! 生のカテゴリパスの検証と同義語正規化。
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use thiserror::Error;
use tracing::{debug, info};

use super::usage::{CategoryRecommendation, CategoryUsageStats, PopularCategory};
use super::{CategoryPath, CategoryRegistry, SynonymDictionary};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NormalizationError {
    #[error("category path is empty or malformed: {0:?}")]
    Malformed(String),
    #[error("main category {main:?} is not registered for platform {platform:?}")]
    UnknownMainCategory { platform: String, main: String },
}

/// Validates paths against the platform registry and rewrites synonyms.
///
/// Every successful normalization is counted in the usage statistics.
/// Depth bounds are not enforced here; see [`super::apply_depth_policy`].
#[derive(Debug)]
pub struct PathNormalizer {
    registry: Arc<dyn CategoryRegistry>,
    synonyms: RwLock<SynonymDictionary>,
    usage: Mutex<CategoryUsageStats>,
}

impl PathNormalizer {
    #[must_use]
    pub fn new(registry: Arc<dyn CategoryRegistry>, synonyms: SynonymDictionary) -> Self {
        Self {
            registry,
            synonyms: RwLock::new(synonyms),
            usage: Mutex::new(CategoryUsageStats::default()),
        }
    }

    /// 保存済みの使用統計から再開する。
    #[must_use]
    pub fn with_usage_stats(self, stats: CategoryUsageStats) -> Self {
        Self {
            usage: Mutex::new(stats),
            ..self
        }
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<dyn CategoryRegistry> {
        &self.registry
    }

    /// カテゴリパスを正規化する。
    ///
    /// 先頭セグメントがプラットフォームの大カテゴリ集合に含まれることを確認し、
    /// 各セグメントを優先語に置換する。大カテゴリの置換は、置換後も登録済みの場合のみ行う。
    ///
    /// # Errors
    /// 空・不正なパス、または未登録の大カテゴリの場合は [`NormalizationError`] を返す。
    pub fn normalize(
        &self,
        raw_path: &str,
        platform: &str,
    ) -> Result<CategoryPath, NormalizationError> {
        let parsed = CategoryPath::parse(raw_path)
            .ok_or_else(|| NormalizationError::Malformed(raw_path.to_string()))?;
        let main = parsed.main_category();
        if !self.registry.contains(platform, main) {
            debug!(platform, main, raw_path, "rejected unregistered main category");
            return Err(NormalizationError::UnknownMainCategory {
                platform: platform.to_string(),
                main: main.to_string(),
            });
        }

        let synonyms = self
            .synonyms
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let normalized: Vec<&str> = parsed
            .parts()
            .iter()
            .enumerate()
            .map(|(index, segment)| {
                let preferred = synonyms.preferred(segment);
                if index == 0 && !self.registry.contains(platform, preferred) {
                    segment.as_str()
                } else {
                    preferred
                }
            })
            .collect();

        let path = CategoryPath::from_parts(normalized)
            .ok_or_else(|| NormalizationError::Malformed(raw_path.to_string()))?;
        drop(synonyms);
        self.usage
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .record(&path);
        Ok(path)
    }

    /// Learns a synonym from a user correction; returns whether a rule was added.
    pub fn learn_from_feedback(&self, original_path: &str, corrected_path: &str) -> bool {
        let learned = self
            .synonyms
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .learn(original_path, corrected_path);
        match learned {
            Some((synonym, preferred)) => {
                info!(%synonym, %preferred, "learned category synonym from feedback");
                true
            }
            None => false,
        }
    }

    /// 学習で追加された同義語規則のスナップショット。
    #[must_use]
    pub fn learned_synonyms(&self) -> BTreeMap<String, String> {
        self.synonyms
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .learned()
            .clone()
    }

    #[must_use]
    pub fn usage_snapshot(&self) -> CategoryUsageStats {
        self.usage
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[must_use]
    pub fn usage_total(&self) -> u64 {
        self.usage
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .total()
    }

    #[must_use]
    pub fn popular_categories(&self, limit: usize) -> Vec<PopularCategory> {
        self.usage
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .popular(limit)
    }

    #[must_use]
    pub fn recommend_categories<S: AsRef<str>>(
        &self,
        keywords: &[S],
        limit: usize,
    ) -> Vec<CategoryRecommendation> {
        self.usage
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .recommend(keywords, limit)
    }

    #[must_use]
    pub fn synonym_count(&self) -> usize {
        self.synonyms
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::taxonomy::StaticCategoryRegistry;

    fn normalizer() -> PathNormalizer {
        let groups = BTreeMap::from([
            (
                "Horror".to_string(),
                vec!["Scary Games".to_string(), "Horror Games".to_string()],
            ),
            ("Playthrough".to_string(), vec!["Let's Play".to_string()]),
        ]);
        PathNormalizer::new(
            Arc::new(StaticCategoryRegistry::builtin()),
            SynonymDictionary::from_groups(&groups),
        )
    }

    #[test]
    fn substitutes_synonyms_in_every_segment() {
        let path = normalizer()
            .normalize("Gaming > Scary Games > Let's Play", "youtube")
            .expect("normalizes");
        assert_eq!(path.full_path(), "Gaming > Horror > Playthrough");
        assert_eq!(path.depth(), 3);
    }

    #[test]
    fn rejects_main_category_outside_platform_set() {
        let error = normalizer()
            .normalize("Talent > Dance", "youtube")
            .expect_err("Talent is a tiktok category");
        assert_eq!(
            error,
            NormalizationError::UnknownMainCategory {
                platform: "youtube".to_string(),
                main: "Talent".to_string(),
            }
        );
        assert!(normalizer().normalize("Talent > Dance", "instagram").is_ok());
    }

    #[test]
    fn rejects_malformed_paths() {
        assert!(matches!(
            normalizer().normalize("  ", "youtube"),
            Err(NormalizationError::Malformed(_))
        ));
        assert!(matches!(
            normalizer().normalize("Gaming > > FPS", "youtube"),
            Err(NormalizationError::Malformed(_))
        ));
    }

    #[test]
    fn does_not_bound_depth() {
        let path = normalizer()
            .normalize("Music > A > B > C > D > E > F > G", "youtube")
            .expect("normalizes");
        assert_eq!(path.depth(), 8);
    }

    #[test]
    fn feedback_changes_later_normalizations() {
        let normalizer = normalizer();
        assert!(normalizer.learn_from_feedback("Gaming > Speedrun Attempt", "Gaming > Speedrun"));
        let path = normalizer
            .normalize("Gaming > Speedrun Attempt", "youtube")
            .expect("normalizes");
        assert_eq!(path.full_path(), "Gaming > Speedrun");
        assert!(!normalizer.learn_from_feedback("Gaming > Speedrun", "Gaming > Speedrun"));
        assert_eq!(
            normalizer.learned_synonyms(),
            BTreeMap::from([("Speedrun Attempt".to_string(), "Speedrun".to_string())])
        );
    }

    #[test]
    fn successful_normalizations_feed_usage_stats() {
        let normalizer = normalizer();
        normalizer
            .normalize("Gaming > Scary Games", "youtube")
            .expect("normalizes");
        normalizer
            .normalize("Gaming > Horror", "youtube")
            .expect("normalizes");
        normalizer
            .normalize("Music > Cover", "youtube")
            .expect("normalizes");
        assert!(normalizer.normalize("Talent > Dance", "youtube").is_err());

        assert_eq!(normalizer.usage_total(), 3);
        let popular = normalizer.popular_categories(1);
        assert_eq!(popular[0].path, "Gaming > Horror");
        assert_eq!(popular[0].count, 2);

        let recommended = normalizer.recommend_categories(&["horror"], 5);
        assert_eq!(recommended.len(), 1);
        assert_eq!(recommended[0].score, 2);
    }

    #[test]
    fn restored_usage_stats_keep_counting() {
        let mut saved = CategoryUsageStats::default();
        saved.record(&CategoryPath::parse("Music > Cover").expect("valid"));
        let normalizer = normalizer().with_usage_stats(saved);
        normalizer
            .normalize("Music > Cover", "youtube")
            .expect("normalizes");
        assert_eq!(
            normalizer
                .usage_snapshot()
                .get("Music > Cover")
                .map(|usage| usage.count),
            Some(2)
        );
    }
}
