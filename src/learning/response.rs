//! 分類器レスポンスの厳密なパース。
//!
//! 失敗は [`ParseFailure`] として返し、パース境界の外へパニックや未型付けJSONを漏らさない。
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use super::model::AnalysisResult;
use crate::schema::classifier::CLASSIFIER_RESPONSE_SCHEMA;
use crate::schema::validate_json;
use crate::taxonomy::{ConsistencyLevel, NormalizationError, PATH_SEPARATOR, PathNormalizer};
use crate::util::json::extract_json_object;

/// Keywords and hashtags kept per analysis.
pub const MAX_TAGS_PER_ANALYSIS: usize = 5;

/// Confidence assumed when the classifier omits one.
pub const DEFAULT_CONFIDENCE: f64 = 0.7;

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct ParsedResponse {
    #[serde(default)]
    pub full_path: Option<String>,
    #[serde(default)]
    pub main_category: Option<String>,
    #[serde(default)]
    pub middle_category: Option<String>,
    #[serde(default, deserialize_with = "string_items")]
    pub keywords: Vec<String>,
    #[serde(default, deserialize_with = "string_items")]
    pub hashtags: Vec<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub consistency_level: Option<String>,
    #[serde(default)]
    pub consistency_reason: Option<String>,
}

impl ParsedResponse {
    /// `full_path` を優先し、無ければ `main_category [> middle_category]` を組み立てる。
    #[must_use]
    pub fn raw_path(&self) -> Option<String> {
        if let Some(full_path) = non_blank(self.full_path.as_deref()) {
            return Some(full_path.to_string());
        }
        let main = non_blank(self.main_category.as_deref())?;
        Some(match non_blank(self.middle_category.as_deref()) {
            Some(middle) => format!("{main}{PATH_SEPARATOR}{middle}"),
            None => main.to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseFailure {
    #[error("response contained no JSON object")]
    NoJson,
    #[error("response JSON is invalid: {0}")]
    InvalidJson(String),
    #[error("response violates the classifier schema: {}", .0.join("; "))]
    SchemaViolation(Vec<String>),
    #[error("response names no category")]
    MissingCategory,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ResponseError {
    #[error(transparent)]
    Parse(#[from] ParseFailure),
    #[error(transparent)]
    Normalization(#[from] NormalizationError),
}

/// 自由記述テキストからJSONを抽出し、スキーマ検証した上で型付けする。
///
/// # Errors
/// JSONが見つからない・壊れている・スキーマ違反・カテゴリ欠落の場合は [`ParseFailure`]。
pub fn parse_response(raw: &str) -> Result<ParsedResponse, ParseFailure> {
    let candidate = extract_json_object(raw).ok_or(ParseFailure::NoJson)?;
    let value: Value = serde_json::from_str(candidate)
        .map_err(|error| ParseFailure::InvalidJson(error.to_string()))?;

    let validation = validate_json(&CLASSIFIER_RESPONSE_SCHEMA, &value);
    if !validation.valid {
        return Err(ParseFailure::SchemaViolation(validation.errors));
    }

    let parsed: ParsedResponse = serde_json::from_value(value)
        .map_err(|error| ParseFailure::InvalidJson(error.to_string()))?;
    if parsed.raw_path().is_none() {
        return Err(ParseFailure::MissingCategory);
    }
    Ok(parsed)
}

/// レスポンスをパース・正規化して [`AnalysisResult`] にする。
///
/// # Errors
/// パース失敗は [`ResponseError::Parse`]、正規化失敗は [`ResponseError::Normalization`]。
pub fn analyze(
    raw: &str,
    normalizer: &PathNormalizer,
    platform: &str,
) -> Result<AnalysisResult, ResponseError> {
    let parsed = parse_response(raw)?;
    let raw_path = parsed.raw_path().ok_or(ParseFailure::MissingCategory)?;
    let category_path = normalizer.normalize(&raw_path, platform)?;

    let consistency_level = parsed.consistency_level.as_deref().and_then(|level| {
        level
            .parse::<ConsistencyLevel>()
            .map_err(|error| warn!(%error, "ignoring unknown consistency level"))
            .ok()
    });
    if let Some(reason) = parsed.consistency_reason.as_deref() {
        debug!(
            consistency_level = consistency_level.map(ConsistencyLevel::as_str),
            consistency_reason = reason,
            full_path = %category_path,
            "classifier consistency assessment"
        );
    }

    Ok(AnalysisResult {
        category_path,
        keywords: bounded_tags(parsed.keywords),
        hashtags: bounded_tags(parsed.hashtags),
        summary: parsed.summary.unwrap_or_default(),
        confidence: parsed
            .confidence
            .unwrap_or(DEFAULT_CONFIDENCE)
            .clamp(0.0, 1.0),
        consistency_level,
    })
}

/// 配列の文字列要素だけを残す。配列以外（`null` や単一文字列）は空として扱う。
fn string_items<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| match item {
                Value::String(tag) => Some(tag),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    })
}

fn bounded_tags(tags: Vec<String>) -> Vec<String> {
    tags.into_iter()
        .map(|tag| tag.trim().to_string())
        .filter(|tag| !tag.is_empty())
        .take(MAX_TAGS_PER_ANALYSIS)
        .collect()
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}
