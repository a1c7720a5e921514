//! One conversation as seen by a chat client.
//!
//! The session owns the raw turns coming off the transport and re-projects
//! them after every event. Stream chunks, viewport samples and cancellation
//! are handled in a single `select!` loop on the owning task, so every handler
//! works on current state.

use anyhow::Result;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::composing::{ComposingState, ComposingTracker};
use crate::embed::EmbedNotifier;
use crate::models::{ConversationTurn, ProcessedTurn};
use crate::processor::MessageStreamProcessor;
use crate::scroll::{ScrollCommand, ScrollController, Viewport};
use crate::sources::SourceMap;
use crate::transport::ChatTransport;

pub struct RenderFrame<'a> {
    pub turns: &'a [ProcessedTurn],
    pub sources: &'a SourceMap,
    pub composing: ComposingState,
    pub scroll: Option<ScrollCommand>,
}

impl RenderFrame<'_> {
    /// Rough height in text lines, used for embed resize messages.
    pub fn content_height(&self) -> f64 {
        let turn_lines: usize = self
            .turns
            .iter()
            .map(|turn| {
                let sources = self.sources.get(&turn.id).len();
                let header = usize::from(sources > 0);
                turn.display_content.lines().count().max(1) + header + sources
            })
            .sum();
        let indicator = usize::from(self.composing.shows_indicator());
        (turn_lines + indicator) as f64
    }
}

pub trait Renderer: Send {
    fn render(&mut self, frame: &RenderFrame<'_>);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Blank input, or a generation is already running.
    Ignored,
    Completed,
    Cancelled,
    Failed(String),
}

pub struct ChatSession<T> {
    transport: T,
    turns: Vec<ConversationTurn>,
    processed: Vec<ProcessedTurn>,
    processor: MessageStreamProcessor,
    composing: ComposingTracker,
    scroll: ScrollController,
    viewport_rx: Option<mpsc::UnboundedReceiver<Viewport>>,
    notifier: Option<Box<dyn EmbedNotifier>>,
}

impl<T: ChatTransport> ChatSession<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            turns: Vec::new(),
            processed: Vec::new(),
            processor: MessageStreamProcessor::new(),
            composing: ComposingTracker::new(),
            scroll: ScrollController::default(),
            viewport_rx: None,
            notifier: None,
        }
    }

    pub fn with_viewport_events(mut self, rx: mpsc::UnboundedReceiver<Viewport>) -> Self {
        self.viewport_rx = Some(rx);
        self
    }

    pub fn with_scroll_controller(mut self, scroll: ScrollController) -> Self {
        self.scroll = scroll;
        self
    }

    pub fn with_notifier(mut self, mut notifier: Box<dyn EmbedNotifier>) -> Self {
        notifier.ready();
        self.notifier = Some(notifier);
        self
    }

    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    pub fn processed(&self) -> &[ProcessedTurn] {
        &self.processed
    }

    pub fn sources(&self) -> &SourceMap {
        self.processor.sources()
    }

    pub fn composing_state(&self) -> ComposingState {
        self.composing.state()
    }

    /// Fetches article metadata once. Failure leaves the corpus empty; sources
    /// then stay empty but answers still render.
    pub async fn load_metadata(&mut self) -> usize {
        match self.transport.fetch_metadata().await {
            Ok(metadata) => {
                let count = metadata.len();
                self.processor.set_corpus(metadata);
                self.processed = self.processor.update(&self.turns);
                tracing::debug!("loaded metadata for {count} articles");
                count
            }
            Err(err) => {
                tracing::warn!("failed to fetch news metadata: {err:#}");
                0
            }
        }
    }

    pub fn on_viewport(&mut self, viewport: Viewport) {
        self.scroll.on_viewport(viewport);
    }

    fn drain_viewport_events(&mut self) {
        let Some(rx) = self.viewport_rx.as_mut() else {
            return;
        };
        while let Ok(viewport) = rx.try_recv() {
            self.scroll.on_viewport(viewport);
        }
    }

    fn refresh(&mut self, renderer: &mut dyn Renderer) {
        self.drain_viewport_events();
        self.processed = self.processor.update(&self.turns);
        let composing = self.composing.observe(&self.turns);
        let scroll = self.scroll.on_turns_updated(&self.processed);

        let frame = RenderFrame {
            turns: &self.processed,
            sources: self.processor.sources(),
            composing,
            scroll,
        };
        renderer.render(&frame);

        if let Some(notifier) = self.notifier.as_mut() {
            notifier.rendered(frame.content_height());
        }
    }

    fn append_delta(&mut self, pending_id: &mut Option<String>, delta: &str) {
        if delta.is_empty() {
            return;
        }
        if let Some(id) = pending_id.as_deref() {
            if let Some(turn) = self.turns.iter_mut().rev().find(|turn| turn.id == id) {
                turn.raw_content.push_str(delta);
                return;
            }
        }
        let turn = ConversationTurn::assistant(delta);
        *pending_id = Some(turn.id.clone());
        self.turns.push(turn);
    }

    /// Sends `input` with the whole running conversation and consumes the
    /// reply until it completes, fails, or `cancel` fires. Partial replies are
    /// kept in every case.
    pub async fn submit(
        &mut self,
        input: &str,
        cancel: &CancellationToken,
        renderer: &mut dyn Renderer,
    ) -> Result<SubmitOutcome> {
        if input.trim().is_empty() || self.composing.state().is_busy() {
            return Ok(SubmitOutcome::Ignored);
        }

        self.turns.push(ConversationTurn::user(input));
        self.composing.begin_send();
        self.refresh(renderer);

        let messages = self.turns.iter().map(ConversationTurn::to_message).collect();
        let opened = tokio::select! {
            _ = cancel.cancelled() => None,
            opened = self.transport.stream_chat(messages) => Some(opened),
        };

        let mut stream = match opened {
            None => return Ok(self.settle(SubmitOutcome::Cancelled, None, renderer)),
            Some(Err(err)) => {
                tracing::warn!("chat request failed: {err:#}");
                return Ok(self.settle(
                    SubmitOutcome::Failed(format!("{err:#}")),
                    None,
                    renderer,
                ));
            }
            Some(Ok(stream)) => stream,
        };

        let mut pending_id = None;
        let outcome = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break SubmitOutcome::Cancelled,
                viewport = next_viewport(&mut self.viewport_rx) => match viewport {
                    Some(viewport) => {
                        self.scroll.on_viewport(viewport);
                    }
                    None => self.viewport_rx = None,
                },
                delta = stream.next() => match delta {
                    Some(Ok(delta)) => {
                        self.append_delta(&mut pending_id, &delta);
                        self.refresh(renderer);
                    }
                    Some(Err(err)) => {
                        tracing::warn!("chat stream failed: {err:#}");
                        break SubmitOutcome::Failed(format!("{err:#}"));
                    }
                    None => break SubmitOutcome::Completed,
                },
            }
        };
        drop(stream);

        Ok(self.settle(outcome, pending_id.as_deref(), renderer))
    }

    fn settle(
        &mut self,
        outcome: SubmitOutcome,
        reply_id: Option<&str>,
        renderer: &mut dyn Renderer,
    ) -> SubmitOutcome {
        match outcome {
            SubmitOutcome::Cancelled => self.composing.cancel(),
            _ => self.composing.finish(),
        };
        if let Some(id) = reply_id {
            self.processor.settle(&self.turns, id);
        }
        self.refresh(renderer);
        outcome
    }
}

async fn next_viewport(rx: &mut Option<mpsc::UnboundedReceiver<Viewport>>) -> Option<Viewport> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
