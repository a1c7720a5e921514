use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::Path;

use anyhow::Result;
use askama::Template;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{Html, IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use futures::{Stream, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::chat::ChatService;
use crate::config::AppConfig;
use crate::corpus::{NewsCorpus, QuestionBank};
use crate::embed;
use crate::models::{
    ChatRequest, ContextResponse, MetadataResponse, QuestionsResponse, Role, StreamEvent,
};

#[derive(Clone)]
pub struct AppState {
    pub corpus: NewsCorpus,
    pub questions: QuestionBank,
    pub chat: ChatService,
    pub suggested_questions: usize,
}

pub async fn run_server(
    config: AppConfig,
    corpus: NewsCorpus,
    questions: QuestionBank,
    chat_service: ChatService,
) -> Result<()> {
    let state = AppState {
        corpus,
        questions,
        chat: chat_service,
        suggested_questions: config.suggested_questions,
    };

    let app = router(state, &config.static_dir);

    let addr: SocketAddr = config.bind_addr.parse()?;
    tracing::info!("listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

pub fn router(state: AppState, static_dir: &Path) -> Router {
    Router::new()
        .route("/", get(index_page))
        .route("/api/chat", post(chat_handler))
        .route("/api/news/metadata", get(news_metadata))
        .route("/api/questions", get(suggested_questions))
        .route("/api/context", get(news_context))
        .nest_service("/static", ServeDir::new(static_dir))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct IndexQuery {
    embed: Option<String>,
}

async fn index_page(
    State(state): State<AppState>,
    Query(query): Query<IndexQuery>,
) -> Result<Html<String>, ApiError> {
    let template = IndexTemplate {
        embed: embed::is_embed_mode(query.embed.as_deref()),
        article_count: state.corpus.len(),
    };
    let body = template.render().map_err(ApiError::from)?;

    Ok(Html(body))
}

async fn chat_handler(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    if !request.messages.iter().any(|m| m.role == Role::User) {
        return Err(ApiError::bad_request(
            "messages must contain at least one user message".to_string(),
        ));
    }

    let mut upstream = state.chat.stream_answer(request.messages).await?;
    let (tx, rx) = mpsc::channel::<Result<Event, Infallible>>(64);

    tokio::spawn(async move {
        while let Some(delta) = upstream.next().await {
            let (event, failed) = match delta {
                Ok(text) => (StreamEvent::Delta { text }, false),
                Err(err) => {
                    tracing::error!("chat generation failed: {err:#}");
                    (
                        StreamEvent::Error {
                            message: err.to_string(),
                        },
                        true,
                    )
                }
            };

            if tx.send(Ok(sse_event(&event))).await.is_err() {
                tracing::info!("chat client disconnected; stopping generation");
                return;
            }
            if failed {
                return;
            }
        }
        let _ = tx.send(Ok(sse_event(&StreamEvent::Done))).await;
    });

    Ok(Sse::new(ReceiverStream::new(rx)).keep_alive(KeepAlive::default()))
}

fn sse_event(event: &StreamEvent) -> Event {
    Event::default().json_data(event).unwrap_or_else(|err| {
        tracing::error!("failed to encode stream event: {err}");
        Event::default().data(r#"{"type":"error","message":"encoding failed"}"#)
    })
}

async fn news_metadata(State(state): State<AppState>) -> Json<MetadataResponse> {
    Json(MetadataResponse {
        metadata: state.corpus.metadata(),
    })
}

async fn suggested_questions(State(state): State<AppState>) -> Json<QuestionsResponse> {
    let questions = state
        .questions
        .sample(state.suggested_questions, &mut rand::thread_rng());
    Json(QuestionsResponse { questions })
}

async fn news_context(State(state): State<AppState>) -> Json<ContextResponse> {
    Json(ContextResponse {
        context: state.corpus.context().to_string(),
    })
}

#[derive(Template)]
#[template(path = "index.html")]
struct IndexTemplate {
    embed: bool,
    article_count: usize,
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: String) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message,
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(value: anyhow::Error) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: format!("{value:#}"),
        }
    }
}

impl From<askama::Error> for ApiError {
    fn from(value: askama::Error) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: value.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let body = serde_json::json!({ "error": self.message });
        (self.status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelConfig;
    use crate::models::{Article, ArticleMetadata};
    use crate::ollama::OllamaClient;
    use crate::session::{ChatSession, RenderFrame, Renderer, SubmitOutcome};
    use crate::transport::{ChatTransport, HttpTransport};
    use std::path::PathBuf;
    use std::sync::Arc;
    use tokio::sync::Semaphore;
    use tokio_util::sync::CancellationToken;

    fn config(ollama: &str) -> AppConfig {
        AppConfig {
            bind_addr: "127.0.0.1:0".to_string(),
            news_path: PathBuf::from("news.json"),
            questions_path: PathBuf::from("questions.json"),
            static_dir: PathBuf::from("static"),
            ollama_base_url: ollama.to_string(),
            models: ModelConfig {
                answer_model: "test-model".to_string(),
                temperature: 0.7,
                max_output_tokens: 128,
            },
            suggested_questions: 2,
            generation_concurrency: 1,
        }
    }

    async fn spawn_app(ollama: &str) -> String {
        let config = config(ollama);
        let corpus = NewsCorpus::new(vec![
            Article {
                title: "Banjir Jakarta".to_string(),
                url: "https://kompas.id/banjir".to_string(),
                full_text: "Banjir melanda Jakarta.".to_string(),
            },
            Article {
                title: "Harga Beras".to_string(),
                url: "https://kompas.id/beras".to_string(),
                full_text: "Harga beras naik.".to_string(),
            },
        ]);
        let chat = ChatService::new(
            config.clone(),
            &corpus,
            OllamaClient::new(ollama),
            Arc::new(Semaphore::new(1)),
        );
        let state = AppState {
            corpus,
            questions: QuestionBank::new(vec![
                "Apa kabar banjir?".to_string(),
                "Berapa harga beras?".to_string(),
                "Siapa menteri?".to_string(),
            ]),
            chat,
            suggested_questions: config.suggested_questions,
        };

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = router(state, &config.static_dir);
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    async fn mock_ollama(lines: &[&str]) -> wiremock::MockServer {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("POST"))
            .and(wiremock::matchers::path("/api/chat"))
            .respond_with(
                wiremock::ResponseTemplate::new(200)
                    .set_body_raw(lines.join("\n"), "application/x-ndjson"),
            )
            .mount(&server)
            .await;
        server
    }

    struct NullRenderer;

    impl Renderer for NullRenderer {
        fn render(&mut self, _frame: &RenderFrame<'_>) {}
    }

    #[tokio::test]
    async fn serves_metadata_context_and_questions() {
        let base = spawn_app("http://127.0.0.1:1").await;
        let transport = HttpTransport::new(base.clone());

        let metadata = transport.fetch_metadata().await.unwrap();
        assert_eq!(
            metadata,
            vec![
                ArticleMetadata::new("Banjir Jakarta", "https://kompas.id/banjir"),
                ArticleMetadata::new("Harga Beras", "https://kompas.id/beras"),
            ]
        );

        let questions = transport.fetch_questions().await.unwrap();
        assert_eq!(questions.len(), 2);

        let context: ContextResponse = reqwest::get(format!("{base}/api/context"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert!(context.context.contains("ARTIKEL 2:\nJUDUL: Harga Beras"));
        assert!(context.context.contains("\n\n---\n\n"));
    }

    #[tokio::test]
    async fn chat_without_user_message_is_rejected() {
        let base = spawn_app("http://127.0.0.1:1").await;
        let response = reqwest::Client::new()
            .post(format!("{base}/api/chat"))
            .json(&serde_json::json!({ "messages": [] }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn session_streams_through_the_server() {
        let ollama = mock_ollama(&[
            r#"{"message":{"role":"assistant","content":"Harga beras "},"done":false}"#,
            r#"{"message":{"role":"assistant","content":"naik.\n\nARTIKEL 2"},"done":false}"#,
            r#"{"message":{"role":"assistant","content":" ARTIKEL 5"},"done":false}"#,
            r#"{"message":{"role":"assistant","content":""},"done":true}"#,
        ])
        .await;
        let base = spawn_app(&ollama.uri()).await;

        let mut session = ChatSession::new(HttpTransport::new(base));
        assert_eq!(session.load_metadata().await, 2);
        let outcome = session
            .submit("Berapa harga beras?", &CancellationToken::new(), &mut NullRenderer)
            .await
            .unwrap();

        assert_eq!(outcome, SubmitOutcome::Completed);
        assert_eq!(session.processed()[1].display_content, "Harga beras naik.");
        assert_eq!(
            session.sources().get(&session.turns()[1].id),
            &[ArticleMetadata::new("Harga Beras", "https://kompas.id/beras")]
        );
    }

    #[tokio::test]
    async fn model_failure_surfaces_as_request_error() {
        let ollama = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("POST"))
            .and(wiremock::matchers::path("/api/chat"))
            .respond_with(wiremock::ResponseTemplate::new(500))
            .mount(&ollama)
            .await;
        let base = spawn_app(&ollama.uri()).await;

        let mut session = ChatSession::new(HttpTransport::new(base));
        let outcome = session
            .submit("Halo", &CancellationToken::new(), &mut NullRenderer)
            .await
            .unwrap();
        assert!(matches!(outcome, SubmitOutcome::Failed(_)));
        assert_eq!(session.turns().len(), 1);
    }

    #[tokio::test]
    async fn index_page_hides_footer_in_embed_mode() {
        let base = spawn_app("http://127.0.0.1:1").await;

        let page = reqwest::get(format!("{base}/")).await.unwrap().text().await.unwrap();
        assert!(page.contains("Halo, Sahabat Kompas"));
        assert!(page.contains("Chatbot bisa salah"));

        let embedded = reqwest::get(format!("{base}/?embed=true"))
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert!(embedded.contains("data-embed=\"true\""));
        assert!(!embedded.contains("Chatbot bisa salah"));
    }
}
