//! Voxline server library logic.
//!
//! Owns the WebSocket transport, the per-client [`SessionRegistry`], and the
//! one-time wiring of the event bus that connects transport, recognition
//! sessions, and the synthesizer.

pub mod api_ws;
pub mod config;
pub mod registry;

use axum::{routing::get, Extension, Json, Router};
use config::Config;
use registry::SessionRegistry;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use voxline_bus::{handler_fn, BusError, EventBus};
use voxline_types::{Event, Topic};
use voxline_voice::{
    OrderedPrefetchSynthesizer, PrefetchSettings, Recognizer, SpeechSynthesizer,
};

/// Application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Loaded configuration.
    pub config: Arc<Config>,
    /// Event bus every pipeline component publishes to.
    pub bus: EventBus,
    /// Connected clients and their recognition sessions.
    pub registry: SessionRegistry,
    /// Streaming recognizer used for every new session.
    pub recognizer: Arc<dyn Recognizer>,
    /// Ordered prefetch synthesizer, subscribed to `response.text`.
    pub synthesizer: Arc<OrderedPrefetchSynthesizer>,
}

/// Builds the shared state and wires the event pipeline.
///
/// # Errors
///
/// Returns `BusError` if a subscription is rejected, which only happens when
/// the pipeline is wired twice.
pub fn build_state(
    config: Config,
    recognizer: Arc<dyn Recognizer>,
    speech: Arc<dyn SpeechSynthesizer>,
) -> Result<AppState, BusError> {
    let bus = EventBus::new();
    let registry = SessionRegistry::new();
    let synthesizer = Arc::new(OrderedPrefetchSynthesizer::new(
        speech,
        bus.clone(),
        PrefetchSettings::from(&config.synthesis),
    ));

    wire_pipeline(&bus, &registry, &synthesizer)?;

    Ok(AppState {
        config: Arc::new(config),
        bus,
        registry,
        recognizer,
        synthesizer,
    })
}

/// Registers every pipeline subscriber, in order:
///
/// 1. `client.audio` into the client's recognition session
/// 2. `response.text` into the synthesizer
/// 3. transcripts and synthesized audio back out to the client's connection
pub fn wire_pipeline(
    bus: &EventBus,
    registry: &SessionRegistry,
    synthesizer: &Arc<OrderedPrefetchSynthesizer>,
) -> Result<(), BusError> {
    let audio_registry = registry.clone();
    let route_audio = handler_fn("audio-router", move |event: Event| {
        let registry = audio_registry.clone();
        async move {
            if let Event::ClientAudio(audio) = event {
                registry.push_audio(audio.client_id, audio.chunk).await;
            }
            Ok(())
        }
    });
    bus.subscribe(Topic::ClientAudio, route_audio)?;

    bus.subscribe(Topic::ResponseText, synthesizer.handler())?;

    let transcript_registry = registry.clone();
    let transcripts = handler_fn("transport-transcripts", move |event: Event| {
        let registry = transcript_registry.clone();
        async move {
            if let Some(frame) = api_ws::outbound_frame(&event) {
                registry.send(event.client_id(), frame).await;
            }
            Ok(())
        }
    });
    bus.subscribe(Topic::TranscriptPartial, transcripts.clone())?;
    bus.subscribe(Topic::TranscriptFinal, transcripts)?;

    // Audio waits for queue space; the synthesizer races each publish
    // against cancellation, so a stalled client cannot wedge it.
    let audio_out_registry = registry.clone();
    let audio_out = handler_fn("transport-audio", move |event: Event| {
        let registry = audio_out_registry.clone();
        async move {
            if let Some(frame) = api_ws::outbound_frame(&event) {
                registry.send_async(event.client_id(), frame).await;
            }
            Ok(())
        }
    });
    bus.subscribe(Topic::AudioChunk, audio_out.clone())?;
    bus.subscribe(Topic::AudioEnd, audio_out)?;

    tracing::debug!("event pipeline wired");
    Ok(())
}

/// Health check handler.
async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Builds the application router with all routes.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ws/{client_id}", get(api_ws::ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(Extension(Arc::new(state)))
}
