use std::sync::Arc;

use anyhow::Result;
use tokio::sync::Semaphore;
use tracing_subscriber::EnvFilter;

use newschat::chat::ChatService;
use newschat::corpus::{NewsCorpus, QuestionBank};
use newschat::ollama::OllamaClient;
use newschat::{run_server, AppConfig};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = AppConfig::from_env();

    let corpus = NewsCorpus::load(&config.news_path).await?;
    let questions = QuestionBank::load_or_empty(&config.questions_path).await;
    let ollama = OllamaClient::new(config.ollama_base_url.clone());

    let generation_limit = Arc::new(Semaphore::new(config.generation_concurrency));

    let chat = ChatService::new(config.clone(), &corpus, ollama, generation_limit);

    run_server(config, corpus, questions, chat).await
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
