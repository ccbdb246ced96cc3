/// 分類器の自由記述テキストからJSONオブジェクト部分を取り出す。
use once_cell::sync::Lazy;
use regex::Regex;

static FENCED_OBJECT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)```(?:json|JSON)?\s*(\{.*?\})\s*```").expect("compile fenced JSON regex")
});

/// Returns the most likely JSON object text inside `raw`.
///
/// Order of preference: a fenced code block, then the span from the first
/// `{` to the last `}`, then the whole trimmed text. `None` for blank input.
pub(crate) fn extract_json_object(raw: &str) -> Option<&str> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Some(object) = FENCED_OBJECT
        .captures(trimmed)
        .and_then(|captures| captures.get(1))
    {
        return Some(object.as_str());
    }
    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if start < end {
            return Some(&trimmed[start..=end]);
        }
    }
    Some(trimmed)
}
