//! Extension pour exposer le flux de la radio sur un `echoserver::Server`
//!
//! Routes créées :
//! - `GET /echo` : flux audio continu (`audio/mpeg`, chunked)
//! - `GET /echo/now-playing` : piste en cours et nombre d'auditeurs (JSON)

use crate::broadcaster::Broadcaster;
use crate::playback::NowPlayingReceiver;
use crate::track::NowPlaying;
use anyhow::Result;
use async_trait::async_trait;
use axum::{
    Json, Router,
    body::Body,
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use futures::StreamExt;
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

pub const STREAM_PATH: &str = "/echo";
pub const NOW_PLAYING_PATH: &str = "/echo/now-playing";
pub const CONTENT_TYPE: &str = "audio/mpeg";

/// État partagé des routes de streaming
#[derive(Clone)]
pub struct RadioStreamingState {
    pub broadcaster: Arc<Broadcaster>,
    pub now_playing: NowPlayingReceiver,
    /// Termine les flux `/echo` en cours lorsqu'il est annulé
    pub shutdown: CancellationToken,
}

/// Réponse de `/echo/now-playing`
#[derive(Debug, Serialize)]
pub struct NowPlayingResponse {
    pub track: Option<NowPlaying>,
    pub listeners: usize,
}

/// Extension trait pour brancher la radio sur le serveur HTTP
#[async_trait]
pub trait RadioStreamingExt {
    /// Ajoute les routes `/echo` et `/echo/now-playing`
    ///
    /// # Exemples
    ///
    /// ```ignore
    /// use echoradio::RadioStreamingExt;
    ///
    /// server.init_radio_streaming(broadcaster, playback.now_playing()).await?;
    /// ```
    async fn init_radio_streaming(
        &mut self,
        broadcaster: Arc<Broadcaster>,
        now_playing: NowPlayingReceiver,
    ) -> Result<()>;
}

#[async_trait]
impl RadioStreamingExt for echoserver::Server {
    async fn init_radio_streaming(
        &mut self,
        broadcaster: Arc<Broadcaster>,
        now_playing: NowPlayingReceiver,
    ) -> Result<()> {
        info!("🌐 Registering radio streaming routes...");

        let state = RadioStreamingState {
            broadcaster,
            now_playing,
            shutdown: self.shutdown_token(),
        };
        self.add_router("/", radio_router(state)).await;

        info!("  ✅ {} - live stream ({})", STREAM_PATH, CONTENT_TYPE);
        info!("  ✅ {} - current track", NOW_PLAYING_PATH);
        Ok(())
    }
}

/// Router des routes de streaming, utilisable sans `echoserver`
pub fn radio_router(state: RadioStreamingState) -> Router {
    Router::new()
        .route(STREAM_PATH, get(stream_echo))
        .route(NOW_PLAYING_PATH, get(now_playing))
        .with_state(state)
}

// ============================================================================
// Handlers
// ============================================================================

async fn stream_echo(State(state): State<RadioStreamingState>) -> Response {
    let (guard, rx) = state.broadcaster.subscribe().await;
    debug!("New stream for listener {}", guard.id());

    // le guard vit aussi longtemps que le corps de la réponse ;
    // le flux se termine à la fermeture du broadcaster ou à l'arrêt du serveur
    let stream = futures::stream::unfold((rx, guard), |(mut rx, guard)| async move {
        rx.recv()
            .await
            .map(|chunk| (Ok::<_, std::io::Error>(chunk), (rx, guard)))
    })
    .take_until(state.shutdown.clone().cancelled_owned());

    match Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, CONTENT_TYPE)
        .header(header::CONNECTION, "keep-alive")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(stream))
    {
        Ok(response) => response,
        Err(e) => {
            error!("Failed to build stream response: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn now_playing(State(state): State<RadioStreamingState>) -> impl IntoResponse {
    let track = state.now_playing.borrow().clone();
    Json(NowPlayingResponse {
        track,
        listeners: state.broadcaster.listener_count().await,
    })
}
