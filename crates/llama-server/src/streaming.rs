//! Server-Sent Events for model loading and streamed predictions.
//!
//! Blocking runtime calls run on the blocking pool and feed an unbounded channel;
//! the SSE stream drains it. Every stream ends with a terminal event:
//! - load: `loaded` or `error`
//! - predict: `done` or `error`, then `data: [DONE]`
//!
//! A predict stream owns a `DropGuard` on the generation's cancellation token, so
//! a client disconnect stops generation at the next token.

use std::sync::Arc;

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use llama_engine::DynModel;
use llama_runtime::{PredictionPermit, ProgressSink, StreamChunk};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::ServerError;
use crate::models::{LoadProgress, LoadedModel, PredictChunk, PredictRequest, PredictSummary};
use crate::state::AppState;

type SseResult = Result<Event, axum::Error>;

enum LoadEvent {
    Progress(f32),
    Loaded(LoadedModel),
    Failed(ServerError),
}

impl LoadEvent {
    fn is_terminal(&self) -> bool {
        !matches!(self, LoadEvent::Progress(_))
    }

    fn into_sse(self) -> SseResult {
        match self {
            LoadEvent::Progress(progress) => json_event("progress", &LoadProgress { progress }),
            LoadEvent::Loaded(model) => json_event("loaded", &model),
            LoadEvent::Failed(err) => json_event("error", &err.body()),
        }
    }
}

enum PredictEvent {
    Chunk(PredictChunk),
    Done(PredictSummary),
    Failed(ServerError),
}

impl PredictEvent {
    fn is_terminal(&self) -> bool {
        !matches!(self, PredictEvent::Chunk(_))
    }

    fn into_sse(self) -> SseResult {
        match self {
            PredictEvent::Chunk(chunk) => json_event("chunk", &chunk),
            PredictEvent::Done(summary) => json_event("done", &summary),
            PredictEvent::Failed(err) => json_event("error", &err.body()),
        }
    }
}

fn json_event<T: Serialize>(name: &str, value: &T) -> SseResult {
    Event::default().event(name).json_data(value)
}

/// Load `path` through the registry, streaming throttled progress.
///
/// Disconnecting does not abort the load: other callers may be waiting on it,
/// and the result is cached either way.
pub fn stream_model_load(state: AppState, path: String) -> Sse<impl Stream<Item = SseResult>> {
    let (tx, mut rx) = mpsc::unbounded_channel();

    let progress_tx = tx.clone();
    let sink: ProgressSink = Arc::new(move |progress: f32| {
        let _ = progress_tx.send(LoadEvent::Progress(progress));
    });

    let registry = Arc::clone(&state.registry);
    tokio::task::spawn_blocking(move || {
        let event = match registry.acquire(&path, Some(sink)) {
            Ok(model) => LoadEvent::Loaded(LoadedModel::new(path, model.info())),
            Err(err) => LoadEvent::Failed(err.into()),
        };
        let _ = tx.send(event);
    });

    let stream = async_stream::stream! {
        while let Some(event) = rx.recv().await {
            let terminal = event.is_terminal();
            yield event.into_sse();
            if terminal {
                break;
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// Run a prediction on the blocking pool, streaming each piece as it is produced.
///
/// `permit` is held until generation returns, so shutdown drains this request.
pub fn stream_prediction(
    state: AppState,
    model: Arc<DynModel>,
    request: PredictRequest,
    permit: PredictionPermit,
) -> Sse<impl Stream<Item = SseResult>> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let cancel = CancellationToken::new();
    let guard = cancel.clone().drop_guard();
    let params = request.to_params(state.config.context);
    let generator = state.generator.clone();

    tokio::task::spawn_blocking(move || {
        let _permit = permit;
        let chunk_tx = tx.clone();
        let mut sink = |chunk: &StreamChunk| -> Result<(), String> {
            chunk_tx
                .send(PredictEvent::Chunk(chunk.into()))
                .map_err(|_| "client disconnected".to_string())
        };
        let result = generator.run(&**model, &request.prompt, &params, &cancel, Some(&mut sink));
        let event = match result {
            Ok(generation) => PredictEvent::Done(PredictSummary::new(&request.model, &generation)),
            Err(err) => PredictEvent::Failed(err.into()),
        };
        let _ = tx.send(event);
    });

    let stream = async_stream::stream! {
        let _guard = guard;
        while let Some(event) = rx.recv().await {
            let terminal = event.is_terminal();
            yield event.into_sse();
            if terminal {
                break;
            }
        }
        yield Ok(Event::default().data("[DONE]"));
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}
