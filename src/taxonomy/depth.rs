//! 一貫性レベルに基づく深さ制御。
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::{CategoryPath, MAX_DEPTH};

/// Shallowest path accepted under `high` consistency.
pub const HIGH_CONSISTENCY_MIN_DEPTH: usize = 3;

/// 分類器が自己申告するコンテンツの一貫性。
///
/// 順序は `Low < Medium < High`（保守的な方が小さい）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsistencyLevel {
    Low,
    Medium,
    High,
}

impl ConsistencyLevel {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl fmt::Display for ConsistencyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConsistencyLevel {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            other => Err(format!("unknown consistency level: {other}")),
        }
    }
}

/// 呼び出し元へ返すパスの深さを一貫性レベルで制限する。
///
/// - `low`: 大カテゴリのみ（深さ1）
/// - `medium`: ちょうど深さ2（不足分は埋める）
/// - `high` または未指定: 深さ3〜6に収める
#[must_use]
pub fn apply_depth_policy(path: &CategoryPath, level: Option<ConsistencyLevel>) -> CategoryPath {
    match level.unwrap_or(ConsistencyLevel::High) {
        ConsistencyLevel::Low => path.truncated(1),
        ConsistencyLevel::Medium => path.truncated(2).padded(2),
        ConsistencyLevel::High => path
            .truncated(MAX_DEPTH)
            .padded(HIGH_CONSISTENCY_MIN_DEPTH),
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::taxonomy::UNSPECIFIED_SEGMENT;

    fn five_deep() -> CategoryPath {
        CategoryPath::parse("Gaming > Action > FPS > Tactical > Ranked").expect("valid path")
    }

    #[rstest]
    #[case(Some(ConsistencyLevel::Low), 1)]
    #[case(Some(ConsistencyLevel::Medium), 2)]
    #[case(Some(ConsistencyLevel::High), 5)]
    #[case(None, 5)]
    fn five_segment_path_is_bounded_by_level(
        #[case] level: Option<ConsistencyLevel>,
        #[case] expected_depth: usize,
    ) {
        let bounded = apply_depth_policy(&five_deep(), level);
        assert_eq!(bounded.depth(), expected_depth);
        assert_eq!(bounded.main_category(), "Gaming");
    }

    #[test]
    fn low_forces_unspecified_middle() {
        let bounded = apply_depth_policy(&five_deep(), Some(ConsistencyLevel::Low));
        assert_eq!(bounded.middle_category(), UNSPECIFIED_SEGMENT);
    }

    #[test]
    fn medium_pads_single_segment_to_two() {
        let path = CategoryPath::parse("Music").expect("valid path");
        let bounded = apply_depth_policy(&path, Some(ConsistencyLevel::Medium));
        assert_eq!(bounded.parts(), ["Music", UNSPECIFIED_SEGMENT]);
    }

    #[test]
    fn high_pads_shallow_and_clamps_deep_paths() {
        let shallow = CategoryPath::parse("Music > Cover").expect("valid path");
        let padded = apply_depth_policy(&shallow, Some(ConsistencyLevel::High));
        assert_eq!(padded.parts(), ["Music", "Cover", UNSPECIFIED_SEGMENT]);

        let deep = CategoryPath::parse("A > B > C > D > E > F > G > H").expect("valid path");
        let clamped = apply_depth_policy(&deep, None);
        assert_eq!(clamped.depth(), MAX_DEPTH);
        assert_eq!(clamped.full_path(), "A > B > C > D > E > F");
    }

    #[test]
    fn parses_levels_case_insensitively() {
        assert_eq!("HIGH".parse::<ConsistencyLevel>(), Ok(ConsistencyLevel::High));
        assert_eq!(" low ".parse::<ConsistencyLevel>(), Ok(ConsistencyLevel::Low));
        assert!("extreme".parse::<ConsistencyLevel>().is_err());
        assert!(ConsistencyLevel::Low < ConsistencyLevel::Medium);
    }
}
