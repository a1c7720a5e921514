use std::env;
use std::path::PathBuf;

#[derive(Clone, Debug)]
pub struct ModelConfig {
    pub answer_model: String,
    pub temperature: f32,
    pub max_output_tokens: usize,
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub bind_addr: String,
    pub news_path: PathBuf,
    pub questions_path: PathBuf,
    pub static_dir: PathBuf,
    pub ollama_base_url: String,
    pub models: ModelConfig,
    pub suggested_questions: usize,
    pub generation_concurrency: usize,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            bind_addr: env::var("NEWSCHAT_BIND").unwrap_or_else(|_| "127.0.0.1:8080".to_string()),
            news_path: env::var("NEWSCHAT_NEWS_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./news.json")),
            questions_path: env::var("NEWSCHAT_QUESTIONS_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./questions.json")),
            static_dir: env::var("NEWSCHAT_STATIC_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("static")),
            ollama_base_url: env::var("OLLAMA_BASE_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:11434".to_string()),
            models: ModelConfig {
                answer_model: env::var("ANSWER_MODEL")
                    .unwrap_or_else(|_| "qwen2.5:14b-instruct".to_string()),
                temperature: parse_env("ANSWER_TEMPERATURE").unwrap_or(0.7),
                max_output_tokens: parse_env("MAX_OUTPUT_TOKENS").unwrap_or(1_024),
            },
            suggested_questions: parse_env("SUGGESTED_QUESTIONS").unwrap_or(3),
            generation_concurrency: parse_env::<usize>("GENERATION_CONCURRENCY")
                .unwrap_or(1)
                .max(1),
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.trim().parse().ok())
}
