//! Audio streaming handlers.
//!
//! Separated from the REST handlers due to its distinct concerns: infinite
//! response bodies, per-client encoder lifecycle, and real-time pacing for
//! the legacy one-off theme stream.

use std::net::SocketAddr;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{connect_info::ConnectInfo, Path, State},
    http::header,
    response::Response,
};
use bytes::Bytes;

use crate::audio::mp3::Mp3Encoder;
use crate::audio::Chunk;
use crate::channel::client::ChannelClient;
use crate::engine::{SharedGain, ThemeStream};
use crate::error::{SonoriumError, SonoriumResult};

use super::AppState;

/// Poll interval for a caught-up channel client (~half a chunk).
const CLIENT_IDLE_SLEEP: Duration = Duration::from_millis(10);

/// GET `/stream/{target}`.
///
/// `channel{n}` targets attach to a broadcast channel; anything else is
/// treated as a theme id and served as a one-off stream not bound to any
/// channel (legacy behavior).
pub(super) async fn stream_audio(
    Path(target): Path<String>,
    State(state): State<AppState>,
    ConnectInfo(remote_addr): ConnectInfo<SocketAddr>,
) -> SonoriumResult<Response> {
    if let Some(channel_id) = target
        .strip_prefix("channel")
        .and_then(|rest| rest.parse::<u32>().ok())
    {
        return stream_channel(state, channel_id, remote_addr).await;
    }
    stream_theme_once(state, &target, remote_addr).await
}

/// Attaches one HTTP client to a channel's broadcast ring.
async fn stream_channel(
    state: AppState,
    channel_id: u32,
    remote_addr: SocketAddr,
) -> SonoriumResult<Response> {
    let channel = state
        .channels
        .get_channel(channel_id)
        .ok_or_else(|| SonoriumError::NotFound(format!("channel {channel_id}")))?;

    log::info!(
        "[Stream] New connection: client={}, channel={}",
        remote_addr.ip(),
        channel_id
    );

    let client = ChannelClient::connect(channel)?;
    let body = async_stream::stream! {
        // The client's Drop runs when this stream is dropped (normal end,
        // error, or the socket closing), decrementing the listener count
        // and closing the encoder on every exit path.
        let mut client = client;
        loop {
            let polled = client.poll();
            if !polled.bytes.is_empty() {
                yield Ok::<Bytes, std::io::Error>(polled.bytes);
            }
            if polled.caught_up {
                tokio::time::sleep(CLIENT_IDLE_SLEEP).await;
            }
        }
    };

    mp3_response(Body::from_stream(body))
}

/// Serves a theme as a one-off paced stream, not bound to any channel.
async fn stream_theme_once(
    state: AppState,
    theme_id: &str,
    remote_addr: SocketAddr,
) -> SonoriumResult<Response> {
    let theme = state.library.require(theme_id)?;
    log::info!(
        "[Stream] One-off theme stream: client={}, theme='{}'",
        remote_addr.ip(),
        theme.name()
    );

    let mut stream = ThemeStream::new(theme, state.config.output_gain, SharedGain::default());
    let mut encoder = Mp3Encoder::new()?;

    let body = async_stream::stream! {
        let start = tokio::time::Instant::now();
        let mut audio_time = 0.0f64;
        loop {
            let chunk = stream.next_chunk();
            let bytes = encoder.encode_chunk(&chunk);
            if !bytes.is_empty() {
                yield Ok::<Bytes, std::io::Error>(bytes);
            }

            // Pace at the PCM boundary, exactly like a channel generator.
            audio_time += Chunk::duration_secs();
            let ahead = audio_time - start.elapsed().as_secs_f64();
            if ahead > 0.0 {
                tokio::time::sleep(Duration::from_secs_f64(ahead)).await;
            }
        }
    };

    mp3_response(Body::from_stream(body))
}

fn mp3_response(body: Body) -> SonoriumResult<Response> {
    Response::builder()
        .header(header::CONTENT_TYPE, "audio/mpeg")
        .header(header::CACHE_CONTROL, "no-cache, no-store")
        .header(header::CONNECTION, "keep-alive")
        .body(body)
        .map_err(|e| SonoriumError::Internal(e.to_string()))
}
