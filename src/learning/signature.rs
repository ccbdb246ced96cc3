//! コンテンツシグネチャ（キャッシュキー兼類似検索の基準点）。
use std::fmt;
use std::str::FromStr;

use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use unicode_normalization::UnicodeNormalization;
use unicode_segmentation::UnicodeSegmentation;

use crate::clients::MediaFrame;

/// Platform assumed when metadata does not name one.
pub const DEFAULT_PLATFORM: &str = "youtube";

/// Upper bound on keywords kept in a signature.
pub const MAX_SIGNATURE_KEYWORDS: usize = 10;

const DEFAULT_MIN_TOKEN_CHARS: usize = 2;

const STOP_WORDS: &[&str] = &[
    // English
    "an", "and", "are", "as", "at", "be", "but", "by", "for", "from", "has", "have", "in", "is",
    "it", "its", "my", "of", "on", "or", "so", "that", "the", "this", "to", "was", "we", "with",
    "you", "your",
    // Korean particles and fillers
    "그리고", "그런데", "하지만", "그래서", "이거", "저거", "그거", "정말", "진짜", "너무",
];

/// 分類対象のメタデータ。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContentMetadata {
    pub platform: String,
    #[serde(default)]
    pub caption: String,
    #[serde(default)]
    pub hashtags: Vec<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(skip)]
    pub media: Vec<MediaFrame>,
}

impl ContentMetadata {
    #[must_use]
    pub fn new(platform: impl Into<String>, caption: impl Into<String>) -> Self {
        Self {
            platform: platform.into(),
            caption: caption.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_hashtags<I, S>(mut self, hashtags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.hashtags = hashtags.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    #[must_use]
    pub fn with_media(mut self, media: Vec<MediaFrame>) -> Self {
        self.media = media;
        self
    }

    /// 小文字化・前後空白除去したプラットフォーム名。空なら既定値。
    #[must_use]
    pub fn platform_key(&self) -> String {
        let key = self.platform.trim().to_lowercase();
        if key.is_empty() {
            DEFAULT_PLATFORM.to_string()
        } else {
            key
        }
    }
}

/// `"{platform}:{kw,kw,...}"` で直列化される決定的なフィンガープリント。
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentSignature {
    platform: String,
    keywords: Vec<String>,
}

impl ContentSignature {
    #[must_use]
    pub fn platform(&self) -> &str {
        &self.platform
    }

    #[must_use]
    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }

    /// Jaccard similarity of the keyword sets; `0.0` when both are empty.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn similarity(&self, other: &Self) -> f64 {
        let left: FxHashSet<&str> = self.keywords.iter().map(String::as_str).collect();
        let right: FxHashSet<&str> = other.keywords.iter().map(String::as_str).collect();
        let union = left.union(&right).count();
        if union == 0 {
            return 0.0;
        }
        left.intersection(&right).count() as f64 / union as f64
    }
}

impl fmt::Display for ContentSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.platform, self.keywords.join(","))
    }
}

impl FromStr for ContentSignature {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let (platform, keywords) = raw
            .split_once(':')
            .ok_or_else(|| format!("signature without platform separator: {raw}"))?;
        if platform.is_empty() {
            return Err(format!("signature without platform: {raw}"));
        }
        Ok(Self {
            platform: platform.to_string(),
            keywords: keywords
                .split(',')
                .filter(|keyword| !keyword.is_empty())
                .map(ToString::to_string)
                .collect(),
        })
    }
}

/// キャプションとハッシュタグからシグネチャを生成する（純粋関数）。
#[derive(Debug, Clone, Copy)]
pub struct SignatureGenerator {
    min_token_chars: usize,
}

impl Default for SignatureGenerator {
    fn default() -> Self {
        Self {
            min_token_chars: DEFAULT_MIN_TOKEN_CHARS,
        }
    }
}

impl SignatureGenerator {
    #[must_use]
    pub fn with_min_token_chars(min_token_chars: usize) -> Self {
        Self { min_token_chars }
    }

    /// トークン化して重複除去・辞書順ソートし、先頭10語を採る。
    ///
    /// 頻度ではなくソート順で切り詰めるため、同じ語集合からは常に同じ結果になる。
    #[must_use]
    pub fn generate(&self, metadata: &ContentMetadata) -> ContentSignature {
        let mut text = String::with_capacity(
            metadata.caption.len() + metadata.hashtags.iter().map(String::len).sum::<usize>() + 8,
        );
        text.push_str(&metadata.caption);
        for hashtag in &metadata.hashtags {
            text.push(' ');
            text.push_str(hashtag);
        }

        let normalized: String = text.nfc().collect::<String>().to_lowercase();
        let mut keywords: Vec<String> = normalized
            .unicode_words()
            .filter(|token| token.chars().count() >= self.min_token_chars)
            .filter(|token| !STOP_WORDS.contains(token))
            .map(ToString::to_string)
            .collect();
        keywords.sort_unstable();
        keywords.dedup();
        keywords.truncate(MAX_SIGNATURE_KEYWORDS);

        ContentSignature {
            platform: metadata.platform_key(),
            keywords,
        }
    }
}
