use std::collections::{HashMap, HashSet};

use crate::citations::CitationCode;
use crate::models::ArticleMetadata;

/// Maps citation codes to article metadata. Duplicates keep their first
/// position; codes with no matching article are skipped.
pub fn resolve(codes: &[CitationCode], corpus: &[ArticleMetadata]) -> Vec<ArticleMetadata> {
    if corpus.is_empty() {
        return vec![];
    }

    let mut seen = HashSet::new();
    let mut sources = Vec::new();

    for code in codes {
        if !seen.insert(*code) {
            continue;
        }
        let Some(article) = code.index().and_then(|idx| corpus.get(idx)) else {
            continue;
        };
        sources.push(article.clone());
    }

    sources
}

/// Sources per turn id. While a turn streams, entries only get replaced by
/// another non-empty list; `replace` is for turns that have settled.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceMap {
    entries: HashMap<String, Vec<ArticleMetadata>>,
}

impl SourceMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` and leaves the map untouched when `sources` is empty.
    pub fn record(&mut self, turn_id: &str, sources: Vec<ArticleMetadata>) -> bool {
        if sources.is_empty() {
            return false;
        }
        self.entries.insert(turn_id.to_string(), sources);
        true
    }

    /// Overwrites the entry for a turn whose text is final. An empty list
    /// removes it.
    pub fn replace(&mut self, turn_id: &str, sources: Vec<ArticleMetadata>) {
        if sources.is_empty() {
            self.entries.remove(turn_id);
        } else {
            self.entries.insert(turn_id.to_string(), sources);
        }
    }

    pub fn get(&self, turn_id: &str) -> &[ArticleMetadata] {
        self.entries
            .get(turn_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn contains(&self, turn_id: &str) -> bool {
        self.entries.contains_key(turn_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
