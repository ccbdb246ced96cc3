//! Platform top-level category registry.
//!
//! Each platform owns a fixed set of valid main categories. Rules may be
//! loaded from a YAML document; any section it omits falls back to the
//! built-in tables.
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use rustc_hash::FxHashMap;
use serde::Deserialize;

const BUILTIN_DEFAULT_PLATFORM: &str = "youtube";

const YOUTUBE_CATEGORIES: [&str; 15] = [
    "Gaming",
    "Science & Technology",
    "Education",
    "Howto & Style",
    "News & Politics",
    "Nonprofits & Activism",
    "Sports",
    "Pets & Animals",
    "Entertainment",
    "Travel & Events",
    "Film & Animation",
    "Music",
    "People & Blogs",
    "Autos & Vehicles",
    "Comedy",
];

const TIKTOK_CATEGORIES: [&str; 12] = [
    "Entertainment",
    "Beauty & Style",
    "Performance",
    "Sports & Outdoors",
    "Society",
    "Lifestyle",
    "Vehicles & Transportation",
    "Talent",
    "Nature",
    "Culture, Education & Technology",
    "Family & Relationships",
    "Paranormal & Horror",
];

const BUILTIN_ALIASES: [(&str, &str); 3] =
    [("instagram", "tiktok"), ("ig", "tiktok"), ("tt", "tiktok")];

const BUILTIN_SYNONYMS: [(&str, &[&str]); 9] = [
    ("Horror", &["Horror Games", "Scary Games", "Scary"]),
    ("Playthrough", &["Let's Play", "Streaming", "Live", "Gameplay"]),
    ("Korean Food", &["Korean Cuisine", "Korean Dishes"]),
    ("Programming", &["Coding", "Development", "Programming Languages"]),
    ("Python", &["Python Language"]),
    ("Cooking", &["Cookbang", "Recipes", "Food"]),
    ("Vlog", &["Daily Life", "Daily", "Everyday"]),
    ("Beauty", &["Makeup", "Cosmetics"]),
    ("Fitness", &["Workout", "Gym", "Home Training", "Training"]),
];

/// プラットフォームごとの大カテゴリ集合を提供する。
pub trait CategoryRegistry: Send + Sync + fmt::Debug {
    /// 指定プラットフォームで有効な大カテゴリ一覧（登録順）。
    fn top_categories(&self, platform: &str) -> &[String];

    fn contains(&self, platform: &str, category: &str) -> bool {
        self.top_categories(platform)
            .iter()
            .any(|candidate| candidate == category)
    }

    /// First registered category; used for fallback classifications.
    fn default_category(&self, platform: &str) -> Option<&str> {
        self.top_categories(platform).first().map(String::as_str)
    }
}

/// Category rules as read from a YAML rules file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct CategoryRules {
    #[serde(default = "builtin_default_platform")]
    pub default_platform: String,
    #[serde(default = "builtin_platforms")]
    pub platforms: BTreeMap<String, Vec<String>>,
    #[serde(default = "builtin_aliases")]
    pub aliases: BTreeMap<String, String>,
    /// Preferred term → synonyms that should be rewritten to it.
    #[serde(default = "builtin_synonyms")]
    pub synonyms: BTreeMap<String, Vec<String>>,
}

impl Default for CategoryRules {
    fn default() -> Self {
        Self {
            default_platform: builtin_default_platform(),
            platforms: builtin_platforms(),
            aliases: builtin_aliases(),
            synonyms: builtin_synonyms(),
        }
    }
}

impl CategoryRules {
    /// YAMLファイルからルールを読み込む。
    ///
    /// # Errors
    /// ファイルの読み込みまたはパースに失敗した場合は [`RulesError`] を返す。
    pub fn load_from_path(path: &Path) -> Result<Self, RulesError> {
        let contents = fs::read_to_string(path).map_err(|source| RulesError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_yaml::from_str(&contents).map_err(|source| RulesError::Deserialize {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Loads from `path` when given, otherwise returns the built-in rules.
    ///
    /// # Errors
    /// Propagates [`CategoryRules::load_from_path`] failures.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, RulesError> {
        match path {
            Some(path) => Self::load_from_path(path),
            None => Ok(Self::default()),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RulesError {
    #[error("failed to read category rules at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse category rules at {path}: {source}")]
    Deserialize {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("default platform {0:?} has no registered categories")]
    UnknownDefaultPlatform(String),
    #[error("platform {0:?} has an empty category set")]
    EmptyPlatform(String),
    #[error("alias {alias:?} points at unregistered platform {target:?}")]
    DanglingAlias { alias: String, target: String },
}

/// In-memory registry built from [`CategoryRules`].
#[derive(Debug, Clone)]
pub struct StaticCategoryRegistry {
    platforms: FxHashMap<String, Vec<String>>,
    aliases: FxHashMap<String, String>,
    default_platform: String,
}

impl StaticCategoryRegistry {
    #[must_use]
    pub fn builtin() -> Self {
        Self::assemble(&CategoryRules::default())
    }

    /// ルールを検証してレジストリを構築する。
    ///
    /// # Errors
    /// 既定プラットフォームや別名の参照先が未登録、またはカテゴリ集合が空の場合。
    pub fn from_rules(rules: &CategoryRules) -> Result<Self, RulesError> {
        if let Some((platform, _)) = rules
            .platforms
            .iter()
            .find(|(_, categories)| categories.is_empty())
        {
            return Err(RulesError::EmptyPlatform(platform.clone()));
        }
        let default_key = platform_key(&rules.default_platform);
        if !rules
            .platforms
            .keys()
            .any(|platform| platform_key(platform) == default_key)
        {
            return Err(RulesError::UnknownDefaultPlatform(
                rules.default_platform.clone(),
            ));
        }
        for (alias, target) in &rules.aliases {
            if !rules
                .platforms
                .keys()
                .any(|platform| platform_key(platform) == platform_key(target))
            {
                return Err(RulesError::DanglingAlias {
                    alias: alias.clone(),
                    target: target.clone(),
                });
            }
        }
        Ok(Self::assemble(rules))
    }

    fn assemble(rules: &CategoryRules) -> Self {
        let platforms = rules
            .platforms
            .iter()
            .map(|(platform, categories)| (platform_key(platform), categories.clone()))
            .collect();
        let aliases = rules
            .aliases
            .iter()
            .map(|(alias, target)| (platform_key(alias), platform_key(target)))
            .collect();
        Self {
            platforms,
            aliases,
            default_platform: platform_key(&rules.default_platform),
        }
    }

    /// Maps a raw platform name onto the key whose category set applies.
    #[must_use]
    pub fn resolve_platform<'a>(&'a self, platform: &str) -> &'a str {
        let key = platform_key(platform);
        if let Some((known, _)) = self.platforms.get_key_value(&key) {
            return known;
        }
        if let Some(target) = self.aliases.get(&key) {
            return target;
        }
        &self.default_platform
    }
}

impl CategoryRegistry for StaticCategoryRegistry {
    fn top_categories(&self, platform: &str) -> &[String] {
        let resolved = self.resolve_platform(platform);
        self.platforms
            .get(resolved)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}

fn platform_key(platform: &str) -> String {
    platform.trim().to_lowercase()
}

fn builtin_default_platform() -> String {
    BUILTIN_DEFAULT_PLATFORM.to_string()
}

fn builtin_platforms() -> BTreeMap<String, Vec<String>> {
    BTreeMap::from([
        (
            "youtube".to_string(),
            YOUTUBE_CATEGORIES.iter().map(ToString::to_string).collect(),
        ),
        (
            "tiktok".to_string(),
            TIKTOK_CATEGORIES.iter().map(ToString::to_string).collect(),
        ),
    ])
}

fn builtin_aliases() -> BTreeMap<String, String> {
    BUILTIN_ALIASES
        .iter()
        .map(|(alias, target)| ((*alias).to_string(), (*target).to_string()))
        .collect()
}

fn builtin_synonyms() -> BTreeMap<String, Vec<String>> {
    BUILTIN_SYNONYMS
        .iter()
        .map(|(preferred, synonyms)| {
            (
                (*preferred).to_string(),
                synonyms.iter().map(ToString::to_string).collect(),
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixtures_path() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("config/categories.local.yaml")
    }

    #[test]
    fn builtin_sets_have_expected_sizes() {
        let registry = StaticCategoryRegistry::builtin();
        assert_eq!(registry.top_categories("youtube").len(), 15);
        assert_eq!(registry.top_categories("tiktok").len(), 12);
    }

    #[test]
    fn aliases_and_unknown_platforms_resolve() {
        let registry = StaticCategoryRegistry::builtin();
        assert_eq!(registry.resolve_platform("Instagram"), "tiktok");
        assert_eq!(registry.resolve_platform(" IG "), "tiktok");
        assert_eq!(registry.resolve_platform("vimeo"), "youtube");
        assert!(registry.contains("instagram", "Talent"));
        assert!(!registry.contains("youtube", "Talent"));
        assert_eq!(registry.default_category("youtube"), Some("Gaming"));
    }

    #[test]
    fn load_from_path_reads_yaml_and_fills_missing_sections() {
        let rules = CategoryRules::load_from_path(&fixtures_path()).expect("fixture parses");
        assert_eq!(rules.default_platform, "youtube");
        assert_eq!(rules.aliases, builtin_aliases());

        let registry = StaticCategoryRegistry::from_rules(&rules).expect("fixture is valid");
        assert!(registry.contains("youtube", "Gaming"));
        assert!(registry.contains("shorts", "Clips"));
    }

    #[test]
    fn load_from_path_errors_for_missing_file() {
        let missing = fixtures_path().with_file_name("does-not-exist.yaml");
        match CategoryRules::load_from_path(&missing) {
            Err(RulesError::Io { path, .. }) => assert!(path.ends_with("does-not-exist.yaml")),
            other => panic!("expected Io error, got {other:?}"),
        }
    }

    #[test]
    fn from_rules_rejects_dangling_references() {
        let mut rules = CategoryRules {
            default_platform: "nowhere".to_string(),
            ..CategoryRules::default()
        };
        assert!(matches!(
            StaticCategoryRegistry::from_rules(&rules),
            Err(RulesError::UnknownDefaultPlatform(_))
        ));

        rules.default_platform = "youtube".to_string();
        rules
            .aliases
            .insert("fb".to_string(), "facebook".to_string());
        assert!(matches!(
            StaticCategoryRegistry::from_rules(&rules),
            Err(RulesError::DanglingAlias { .. })
        ));
    }
}
