use std::fs::File;
use std::io::{BufRead, BufReader};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;
use tokio::sync::Semaphore;

use newschat::chat::ChatService;
use newschat::citations;
use newschat::config::AppConfig;
use newschat::corpus::NewsCorpus;
use newschat::models::{ChatMessage, Role};
use newschat::ollama::OllamaClient;
use newschat::prompt::REFUSAL_MESSAGE;
use newschat::sources;

#[derive(Parser, Debug)]
#[command(name = "eval")]
#[command(about = "Run a prompt set and check answers and their citations")]
struct Cli {
    #[arg(long, default_value = "eval/prompts.jsonl")]
    file: String,
    #[arg(long, default_value_t = false)]
    verbose: bool,
}

#[derive(Debug, Deserialize)]
struct EvalPrompt {
    id: String,
    question: String,
    #[serde(default)]
    expect_contains: Vec<String>,
    #[serde(default)]
    expect_refusal: Option<bool>,
    #[serde(default)]
    expect_sources: Vec<u32>,
    #[serde(default)]
    expect_any_source: Option<bool>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::from_env();

    let corpus = NewsCorpus::load(&config.news_path).await?;
    let metadata = corpus.metadata();
    let ollama = OllamaClient::new(config.ollama_base_url.clone());
    let chat = ChatService::new(config, &corpus, ollama, Arc::new(Semaphore::new(1)));

    let prompts = load_prompts(&cli.file)?;
    if prompts.is_empty() {
        anyhow::bail!("no prompts found in {}", cli.file);
    }

    let mut total = 0usize;
    let mut pass = 0usize;
    let mut refusals = 0usize;
    let mut with_sources = 0usize;
    let mut leaked_markers = 0usize;
    let mut source_expectations = 0usize;
    let mut source_hits = 0usize;

    for prompt in prompts {
        total += 1;
        let raw = chat
            .answer(vec![ChatMessage::new(Role::User, prompt.question.clone())])
            .await
            .with_context(|| format!("failed eval prompt {}", prompt.id))?;

        let extraction = citations::extract(&raw);
        let resolved = sources::resolve(&extraction.codes, &metadata);
        let answer = extraction.clean_text.trim();
        let answer_lower = answer.to_lowercase();

        let is_refusal = answer_lower.contains(&REFUSAL_MESSAGE.to_lowercase());
        if is_refusal {
            refusals += 1;
        }
        if !resolved.is_empty() {
            with_sources += 1;
        }
        if citations::contains_marker(answer) {
            leaked_markers += 1;
        }

        let mut passed = prompt
            .expect_contains
            .iter()
            .all(|needle| answer_lower.contains(&needle.to_lowercase()));

        if let Some(expect_refusal) = prompt.expect_refusal {
            passed &= expect_refusal == is_refusal;
        }
        if let Some(expect_any) = prompt.expect_any_source {
            passed &= expect_any == !resolved.is_empty();
        }
        if !prompt.expect_sources.is_empty() {
            source_expectations += 1;
            let expected = expected_urls(&prompt.expect_sources, &metadata);
            let all_cited = expected
                .iter()
                .all(|url| resolved.iter().any(|source| &source.url == url));
            if all_cited {
                source_hits += 1;
            } else {
                passed = false;
            }
        }

        if passed {
            pass += 1;
        }

        if cli.verbose {
            println!("--- {} ---", prompt.id);
            println!("Q: {}", prompt.question);
            println!("A: {}", answer.replace('\n', " "));
            println!("Codes: {:?}", extraction.codes);
            println!("Sources: {}", resolved.len());
            println!();
        }
    }

    println!("Eval prompts: {}", total);
    println!("Expectation accuracy: {:.1}%", ratio(pass, total) * 100.0);
    println!("Answers with sources: {:.1}%", ratio(with_sources, total) * 100.0);
    println!("Refusal rate: {:.1}%", ratio(refusals, total) * 100.0);
    println!("Answers leaking citation markers: {}", leaked_markers);
    if source_expectations > 0 {
        println!(
            "Expected-source hit-rate: {:.1}% ({}/{})",
            ratio(source_hits, source_expectations) * 100.0,
            source_hits,
            source_expectations
        );
    }

    Ok(())
}

fn load_prompts(path: &str) -> Result<Vec<EvalPrompt>> {
    let file = File::open(path).with_context(|| format!("failed opening {}", path))?;
    let reader = BufReader::new(file);
    let mut prompts = Vec::new();

    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let parsed: EvalPrompt = serde_json::from_str(trimmed)
            .with_context(|| format!("invalid JSON at {} line {}", path, idx + 1))?;
        prompts.push(parsed);
    }

    Ok(prompts)
}

fn expected_urls(positions: &[u32], metadata: &[newschat::models::ArticleMetadata]) -> Vec<String> {
    let codes: Vec<citations::CitationCode> =
        positions.iter().copied().map(citations::CitationCode).collect();
    sources::resolve(&codes, metadata)
        .into_iter()
        .map(|source| source.url)
        .collect()
}

fn ratio(n: usize, d: usize) -> f32 {
    if d == 0 {
        return 0.0;
    }
    n as f32 / d as f32
}
