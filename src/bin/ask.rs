use std::io::{Stdout, Write};

use anyhow::Result;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use newschat::composing::ComposingState;
use newschat::embed::ChannelNotifier;
use newschat::models::Role;
use newschat::session::{ChatSession, RenderFrame, Renderer, SubmitOutcome};
use newschat::transport::HttpTransport;

#[derive(Parser, Debug)]
#[command(name = "ask")]
#[command(about = "Chat with a running newschat server from the terminal")]
struct Cli {
    #[arg(long, default_value = "http://127.0.0.1:8080")]
    server: String,
    /// Ask a single question and exit.
    #[arg(long)]
    question: Option<String>,
    /// Print embed host messages (ready/resize) as JSON on stderr.
    #[arg(long, default_value_t = false)]
    embed: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let transport = HttpTransport::new(cli.server.clone());
    let mut session = ChatSession::new(transport.clone());

    if cli.embed {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                if let Ok(json) = serde_json::to_string(&message) {
                    eprintln!("{json}");
                }
            }
        });
        session = session.with_notifier(Box::new(ChannelNotifier::new(tx)));
    }

    let articles = session.load_metadata().await;
    tracing::info!("{articles} articles available for citation");

    let mut renderer = TerminalRenderer::new(std::io::stdout());

    if let Some(question) = cli.question {
        ask(&mut session, &mut renderer, &question).await?;
        return Ok(());
    }

    match transport.fetch_questions().await {
        Ok(questions) if !questions.is_empty() => {
            println!("Saran pertanyaan:");
            for question in questions {
                println!("  - {question}");
            }
            println!();
        }
        Ok(_) => {}
        Err(err) => tracing::warn!("failed to fetch suggested questions: {err:#}"),
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    prompt_marker()?;
    while let Some(line) = lines.next_line().await? {
        ask(&mut session, &mut renderer, &line).await?;
        prompt_marker()?;
    }

    Ok(())
}

async fn ask(
    session: &mut ChatSession<HttpTransport>,
    renderer: &mut TerminalRenderer<Stdout>,
    question: &str,
) -> Result<()> {
    let cancel = CancellationToken::new();
    let watcher = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        })
    };

    let outcome = session.submit(question, &cancel, renderer).await;
    watcher.abort();

    match outcome? {
        SubmitOutcome::Ignored | SubmitOutcome::Completed => {}
        SubmitOutcome::Cancelled => println!("[dibatalkan]"),
        SubmitOutcome::Failed(message) => eprintln!("Gagal mendapatkan jawaban: {message}"),
    }
    Ok(())
}

fn prompt_marker() -> Result<()> {
    print!("> ");
    std::io::stdout().flush()?;
    Ok(())
}

/// Prints whole lines while the answer streams and the remainder once the
/// turn settles, so a half-received citation run never reaches the terminal.
struct TerminalRenderer<W> {
    out: W,
    assistant_id: Option<String>,
    printed: usize,
    settled: bool,
    indicator_for: Option<String>,
}

impl<W: Write> TerminalRenderer<W> {
    fn new(out: W) -> Self {
        Self {
            out,
            assistant_id: None,
            printed: 0,
            settled: false,
            indicator_for: None,
        }
    }

    fn write(&mut self, text: &str) {
        let _ = self.out.write_all(text.as_bytes());
        let _ = self.out.flush();
    }
}

impl<W: Write + Send> Renderer for TerminalRenderer<W> {
    fn render(&mut self, frame: &RenderFrame<'_>) {
        let Some(last) = frame.turns.last() else {
            return;
        };

        if frame.scroll.is_some() {
            tracing::debug!("auto-scroll requested");
        }

        if last.role == Role::User {
            if frame.composing.shows_indicator()
                && self.indicator_for.as_deref() != Some(last.id.as_str())
            {
                self.indicator_for = Some(last.id.clone());
                self.write("Sedang menyusun jawaban...\n");
            }
            return;
        }

        if self.assistant_id.as_deref() != Some(last.id.as_str()) {
            self.assistant_id = Some(last.id.clone());
            self.printed = 0;
            self.settled = false;
        }
        if self.settled {
            return;
        }

        let text = last.display_content.as_str();
        if frame.composing == ComposingState::Idle {
            let rest = text.get(self.printed..).unwrap_or("");
            self.write(&format!("{rest}\n"));
            let sources = frame.sources.get(&last.id);
            if !sources.is_empty() {
                let mut block = String::from("\nSumber:\n");
                for source in sources {
                    block.push_str(&format!("  - {} <{}>\n", source.title, source.url));
                }
                self.write(&block);
            }
            self.printed = text.len();
            self.settled = true;
            return;
        }

        if let Some(end) = text.rfind('\n').map(|idx| idx + 1) {
            if end > self.printed {
                if let Some(lines) = text.get(self.printed..end) {
                    self.write(lines);
                }
                self.printed = end;
            }
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
