/// 分類器レスポンス（カテゴリ判定JSON）のスキーマ。
use once_cell::sync::Lazy;
use serde_json::{Value, json};

pub(crate) static CLASSIFIER_RESPONSE_SCHEMA: Lazy<Value> = Lazy::new(|| {
    json!({
        "$schema": "https://json-schema.org/draft/2020-12/schema",
        "title": "Category Classifier Response",
        "type": "object",
        "properties": {
            "full_path": { "type": ["string", "null"] },
            "main_category": { "type": ["string", "null"] },
            "middle_category": { "type": ["string", "null"] },
            // タグ配列は形を問わず受け入れ、パース時に文字列要素だけを残す。
            "keywords": true,
            "hashtags": true,
            "summary": { "type": ["string", "null"] },
            "confidence": {
                "type": ["number", "null"],
                "minimum": 0,
                "maximum": 1
            },
            "consistency_level": { "type": ["string", "null"] },
            "consistency_reason": { "type": ["string", "null"] }
        },
        "anyOf": [
            { "required": ["full_path"] },
            { "required": ["main_category"] }
        ]
    })
});
