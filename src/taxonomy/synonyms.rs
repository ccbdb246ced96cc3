//! 同義語辞書（多対一の優先語マッピング）。
use std::collections::BTreeMap;

use rustc_hash::FxHashMap;

use super::CategoryPath;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SynonymDictionary {
    preferred: FxHashMap<String, String>,
    /// Rules added from feedback, kept apart so they can be saved and replayed.
    learned: BTreeMap<String, String>,
}

impl SynonymDictionary {
    /// Builds the dictionary from `preferred term → synonyms` groups.
    #[must_use]
    pub fn from_groups(groups: &BTreeMap<String, Vec<String>>) -> Self {
        let mut dictionary = Self::default();
        for (preferred, synonyms) in groups {
            for synonym in synonyms {
                dictionary.insert(synonym, preferred);
            }
        }
        dictionary
    }

    /// 完全一致（大文字小文字を区別）で優先語を引く。未登録ならそのまま返す。
    #[must_use]
    pub fn preferred<'a>(&'a self, segment: &'a str) -> &'a str {
        self.preferred
            .get(segment)
            .map_or(segment, String::as_str)
    }

    pub fn insert(&mut self, synonym: &str, preferred: &str) {
        if synonym != preferred {
            self.preferred
                .insert(synonym.to_string(), preferred.to_string());
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.preferred.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.preferred.is_empty()
    }

    /// ユーザー修正から末尾セグメントの言い換えを学習する。
    ///
    /// Returns the learned `(synonym, preferred)` pair, or `None` when the
    /// leaf segments already agree or either path is malformed.
    pub fn learn(&mut self, original_path: &str, corrected_path: &str) -> Option<(String, String)> {
        let original = CategoryPath::parse(original_path)?;
        let corrected = CategoryPath::parse(corrected_path)?;
        let synonym = original.parts().last()?.clone();
        // Resolve through existing rules so lookups stay one hop deep.
        let preferred = self
            .preferred(corrected.parts().last()?)
            .to_string();
        if synonym == preferred || self.preferred.get(&synonym) == Some(&preferred) {
            return None;
        }
        self.insert(&synonym, &preferred);
        self.learned.insert(synonym.clone(), preferred.clone());
        Some((synonym, preferred))
    }

    /// 学習済みの規則（`synonym → preferred`）。
    #[must_use]
    pub fn learned(&self) -> &BTreeMap<String, String> {
        &self.learned
    }

    /// 保存済みの学習規則を取り込む。ルールファイル由来の規則より優先する。
    pub fn merge_learned(&mut self, rules: &BTreeMap<String, String>) {
        for (synonym, preferred) in rules {
            if synonym != preferred {
                self.insert(synonym, preferred);
                self.learned.insert(synonym.clone(), preferred.clone());
            }
        }
    }
}
