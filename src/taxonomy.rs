//! プラットフォーム別カテゴリ体系。
//!
//! カテゴリパスの表現、プラットフォームごとの大カテゴリ登録、
//! 同義語による正規化、一貫性レベルに応じた深さ制御を提供します。
pub mod depth;
pub mod normalize;
pub mod registry;
pub mod state;
pub mod synonyms;
pub mod usage;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use depth::{ConsistencyLevel, apply_depth_policy};
pub use normalize::{NormalizationError, PathNormalizer};
pub use registry::{CategoryRegistry, CategoryRules, RulesError, StaticCategoryRegistry};
pub use state::{StateError, TaxonomyStateFiles};
pub use synonyms::SynonymDictionary;
pub use usage::{CategoryRecommendation, CategoryUsage, CategoryUsageStats, PopularCategory};

/// Separator used when rendering a path as a single string.
pub const PATH_SEPARATOR: &str = " > ";

/// Filler segment for missing middle/detail levels.
pub const UNSPECIFIED_SEGMENT: &str = "Unspecified";

/// Deepest path the engine will ever hand back to a caller.
pub const MAX_DEPTH: usize = 6;

/// 階層カテゴリパス（1段以上）。
///
/// 先頭要素が大カテゴリ、2番目が中カテゴリ。空のパスは構築できない。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "CategoryPathRecord", into = "CategoryPathRecord")]
pub struct CategoryPath {
    parts: Vec<String>,
}

impl CategoryPath {
    /// Builds a path from segments, trimming each one.
    ///
    /// Returns `None` when there are no segments or any segment is blank.
    #[must_use]
    pub fn from_parts<I, S>(parts: I) -> Option<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let parts: Vec<String> = parts
            .into_iter()
            .map(|part| part.as_ref().trim().to_string())
            .collect();
        if parts.is_empty() || parts.iter().any(String::is_empty) {
            return None;
        }
        Some(Self { parts })
    }

    /// `"Gaming > Action > FPS"` 形式の文字列を分解する。
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        if raw.trim().is_empty() {
            return None;
        }
        Self::from_parts(raw.split('>'))
    }

    #[must_use]
    pub fn parts(&self) -> &[String] {
        &self.parts
    }

    #[must_use]
    pub fn full_path(&self) -> String {
        self.parts.join(PATH_SEPARATOR)
    }

    #[must_use]
    pub fn main_category(&self) -> &str {
        &self.parts[0]
    }

    #[must_use]
    pub fn middle_category(&self) -> &str {
        self.parts
            .get(1)
            .map_or(UNSPECIFIED_SEGMENT, String::as_str)
    }

    #[must_use]
    pub fn depth(&self) -> usize {
        self.parts.len()
    }

    /// Keeps at most `depth` leading segments (never fewer than one).
    #[must_use]
    pub fn truncated(&self, depth: usize) -> Self {
        let keep = depth.max(1).min(self.parts.len());
        Self {
            parts: self.parts[..keep].to_vec(),
        }
    }

    /// Appends [`UNSPECIFIED_SEGMENT`] until the path is at least `depth` deep.
    #[must_use]
    pub fn padded(&self, depth: usize) -> Self {
        let mut parts = self.parts.clone();
        while parts.len() < depth {
            parts.push(UNSPECIFIED_SEGMENT.to_string());
        }
        Self { parts }
    }
}

impl fmt::Display for CategoryPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full_path())
    }
}

/// Persisted shape of a [`CategoryPath`]; derived fields are ignored on read.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CategoryPathRecord {
    parts: Vec<String>,
    #[serde(default)]
    full_path: String,
    #[serde(default)]
    main_category: String,
    #[serde(default)]
    middle_category: String,
    #[serde(default)]
    depth: usize,
}

impl From<CategoryPath> for CategoryPathRecord {
    fn from(path: CategoryPath) -> Self {
        Self {
            full_path: path.full_path(),
            main_category: path.main_category().to_string(),
            middle_category: path.middle_category().to_string(),
            depth: path.depth(),
            parts: path.parts,
        }
    }
}

impl TryFrom<CategoryPathRecord> for CategoryPath {
    type Error = &'static str;

    fn try_from(record: CategoryPathRecord) -> Result<Self, Self::Error> {
        Self::from_parts(record.parts).ok_or("category path needs at least one non-empty segment")
    }
}
