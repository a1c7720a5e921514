use crate::citations;
use crate::models::{ArticleMetadata, ConversationTurn, ProcessedTurn, Role};
use crate::sources::{self, SourceMap};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Projection {
    pub turns: Vec<ProcessedTurn>,
    pub sources: SourceMap,
}

/// Re-derives every turn from its full buffer. Assistant text is always
/// cleaned from scratch because an earlier partial buffer may not contain the
/// trailing citation run yet.
pub fn project(
    raw_turns: &[ConversationTurn],
    corpus: &[ArticleMetadata],
    previous_sources: &SourceMap,
) -> Projection {
    let mut sources = previous_sources.clone();
    let turns = raw_turns
        .iter()
        .map(|turn| match turn.role {
            Role::Assistant => {
                let extraction = citations::extract(&turn.raw_content);
                if !extraction.codes.is_empty() && !corpus.is_empty() {
                    sources.record(&turn.id, sources::resolve(&extraction.codes, corpus));
                }
                ProcessedTurn {
                    id: turn.id.clone(),
                    role: turn.role,
                    display_content: extraction.clean_text,
                }
            }
            _ => ProcessedTurn {
                id: turn.id.clone(),
                role: turn.role,
                display_content: turn.raw_content.clone(),
            },
        })
        .collect();

    Projection { turns, sources }
}

/// Holds the article metadata and per-turn sources for one conversation.
#[derive(Debug, Clone, Default)]
pub struct MessageStreamProcessor {
    corpus: Vec<ArticleMetadata>,
    sources: SourceMap,
}

impl MessageStreamProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_corpus(corpus: Vec<ArticleMetadata>) -> Self {
        Self {
            corpus,
            sources: SourceMap::new(),
        }
    }

    pub fn set_corpus(&mut self, corpus: Vec<ArticleMetadata>) {
        self.corpus = corpus;
    }

    pub fn corpus(&self) -> &[ArticleMetadata] {
        &self.corpus
    }

    pub fn sources(&self) -> &SourceMap {
        &self.sources
    }

    pub fn update(&mut self, raw_turns: &[ConversationTurn]) -> Vec<ProcessedTurn> {
        let projection = project(raw_turns, &self.corpus, &self.sources);
        self.sources = projection.sources;
        projection.turns
    }

    /// Re-resolves the sources of a turn whose text will not change anymore.
    /// Unlike `update`, this may shrink or drop an entry that an earlier
    /// partial buffer wrote, e.g. `ARTIKEL 1` that went on to become
    /// `ARTIKEL 12`. Without metadata the entry is left as it is.
    pub fn settle(&mut self, raw_turns: &[ConversationTurn], turn_id: &str) {
        if self.corpus.is_empty() {
            return;
        }
        let Some(turn) = raw_turns
            .iter()
            .find(|turn| turn.id == turn_id && turn.role == Role::Assistant)
        else {
            return;
        };
        let codes = citations::extract_codes(&turn.raw_content);
        self.sources
            .replace(turn_id, sources::resolve(&codes, &self.corpus));
    }
}
