//! 分類器へ送るプロンプトの組み立て。
use std::fmt::Write as _;
use std::sync::Arc;

use super::model::PatternMatch;
use super::signature::ContentMetadata;
use crate::taxonomy::{CategoryRegistry, MAX_DEPTH};

const RESPONSE_FORMAT: &str = r##"Respond with a single JSON object:
{
  "full_path": "Main > Middle > Detail [> ...]",
  "main_category": "Main",
  "middle_category": "Middle",
  "keywords": ["keyword1", "keyword2", "keyword3"],
  "hashtags": ["#tag1", "#tag2"],
  "summary": "one or two sentence summary",
  "confidence": 0.85,
  "consistency_level": "low | medium | high",
  "consistency_reason": "why the content is or is not coherent"
}"##;

#[derive(Debug, Clone)]
pub struct PromptBuilder {
    registry: Arc<dyn CategoryRegistry>,
}

impl PromptBuilder {
    #[must_use]
    pub fn new(registry: Arc<dyn CategoryRegistry>) -> Self {
        Self { registry }
    }

    /// メタデータと大カテゴリ一覧、応答形式を含む基本プロンプト。
    #[must_use]
    pub fn base_prompt(&self, metadata: &ContentMetadata) -> String {
        let platform = metadata.platform_key();
        let categories = self.registry.top_categories(&platform);

        let mut prompt = format!(
            "You classify short-form {platform} videos into a hierarchical category path.\n\n"
        );
        let _ = writeln!(
            prompt,
            "Pick the main category from these {} options:",
            categories.len()
        );
        for (index, category) in categories.iter().enumerate() {
            let _ = writeln!(prompt, "{}. {category}", index + 1);
        }
        let _ = write!(
            prompt,
            "\nBuild 3 to {MAX_DEPTH} levels only when the content supports them. \
             If the frames or text cover unrelated topics, report a low consistency_level.\n\n"
        );

        prompt.push_str("Content metadata:\n");
        if let Some(title) = metadata.title.as_deref().filter(|title| !title.trim().is_empty()) {
            let _ = writeln!(prompt, "- title: {}", title.trim());
        }
        if !metadata.caption.trim().is_empty() {
            let _ = writeln!(prompt, "- caption: {}", metadata.caption.trim());
        }
        if !metadata.hashtags.is_empty() {
            let _ = writeln!(prompt, "- hashtags: {}", metadata.hashtags.join(" "));
        }
        prompt.push('\n');
        prompt.push_str(RESPONSE_FORMAT);
        prompt
    }

    /// 類似の検証済みパターンを参考情報として示すセクション。
    #[must_use]
    pub fn reference_section(reference: &PatternMatch) -> String {
        let pattern = &reference.pattern;
        format!(
            "\n\nVerified reference from similar content (similarity {:.1}%):\n\
             - verified category: \"{}\"\n\
             - confidence: {:.1}% across {} analyses\n\
             Use this as guidance, but choose a better category if the current content fits one.",
            reference.similarity * 100.0,
            pattern.verified_category.full_path(),
            pattern.confidence * 100.0,
            pattern.analysis_count,
        )
    }

    #[must_use]
    pub fn reference_prompt(&self, metadata: &ContentMetadata, reference: &PatternMatch) -> String {
        let mut prompt = self.base_prompt(metadata);
        prompt.push_str(&Self::reference_section(reference));
        prompt
    }
}
