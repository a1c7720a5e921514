use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use rand::seq::SliceRandom;
use rand::Rng;

use crate::models::{Article, ArticleMetadata, QuestionEntry};
use crate::prompt;

/// The fixed article set. Positions are stable for the life of the process,
/// so prompt numbering and metadata indices always line up.
#[derive(Clone, Debug)]
pub struct NewsCorpus {
    articles: Arc<Vec<Article>>,
    context: Arc<str>,
}

impl NewsCorpus {
    pub fn new(articles: Vec<Article>) -> Self {
        let context = prompt::build_news_context(&articles);
        Self {
            articles: Arc::new(articles),
            context: Arc::from(context),
        }
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed reading news corpus {}", path.display()))?;
        let articles: Vec<Article> = serde_json::from_str(&raw)
            .with_context(|| format!("invalid news corpus JSON in {}", path.display()))?;
        tracing::info!("loaded {} articles from {}", articles.len(), path.display());
        Ok(Self::new(articles))
    }

    pub fn len(&self) -> usize {
        self.articles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.articles.is_empty()
    }

    pub fn articles(&self) -> &[Article] {
        &self.articles
    }

    pub fn metadata(&self) -> Vec<ArticleMetadata> {
        self.articles.iter().map(Article::metadata).collect()
    }

    pub fn context(&self) -> &str {
        &self.context
    }
}

#[derive(Clone, Debug, Default)]
pub struct QuestionBank {
    questions: Arc<Vec<String>>,
}

impl QuestionBank {
    pub fn new(questions: Vec<String>) -> Self {
        Self {
            questions: Arc::new(questions),
        }
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed reading question bank {}", path.display()))?;
        let entries: Vec<QuestionEntry> = serde_json::from_str(&raw)
            .with_context(|| format!("invalid question bank JSON in {}", path.display()))?;
        Ok(Self::new(entries.into_iter().map(|e| e.questions).collect()))
    }

    /// Missing file is not fatal: suggestions are optional.
    pub async fn load_or_empty(path: &Path) -> Self {
        match Self::load(path).await {
            Ok(bank) => bank,
            Err(err) => {
                tracing::warn!("question suggestions disabled: {err:#}");
                Self::default()
            }
        }
    }

    pub fn len(&self) -> usize {
        self.questions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }

    pub fn sample<R: Rng + ?Sized>(&self, count: usize, rng: &mut R) -> Vec<String> {
        self.questions
            .choose_multiple(rng, count)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashSet;
    use std::io::Write;

    #[tokio::test]
    async fn loads_corpus_and_builds_context() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[{{"title":"A","url":"u1","full_text":"satu"}},{{"title":"B","url":"u2","full_text":"dua"}}]"#
        )
        .unwrap();

        let corpus = NewsCorpus::load(file.path()).await.unwrap();
        assert_eq!(corpus.len(), 2);
        assert_eq!(corpus.metadata()[1], ArticleMetadata::new("B", "u2"));
        assert!(corpus.context().starts_with("ARTIKEL 1:\nJUDUL: A"));
        assert!(corpus.context().contains("ARTIKEL 2:\nJUDUL: B"));
    }

    #[tokio::test]
    async fn invalid_corpus_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert!(NewsCorpus::load(file.path()).await.is_err());
    }

    #[tokio::test]
    async fn missing_question_bank_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let bank = QuestionBank::load_or_empty(&dir.path().join("questions.json")).await;
        assert!(bank.is_empty());
    }

    #[tokio::test]
    async fn samples_distinct_questions() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[{{"questions":"q1"}},{{"questions":"q2"}},{{"questions":"q3"}},{{"questions":"q4"}}]"#
        )
        .unwrap();

        let bank = QuestionBank::load(file.path()).await.unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        let picked = bank.sample(3, &mut rng);
        assert_eq!(picked.len(), 3);
        assert_eq!(picked.iter().collect::<HashSet<_>>().len(), 3);

        assert_eq!(bank.sample(10, &mut rng).len(), 4);
    }
}
