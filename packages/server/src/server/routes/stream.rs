//! SSE streaming endpoint.
//!
//! GET /api/streams/:topic
//!
//! Topics: `control` for pause changes, `chat:{chat_id}` for the activity of
//! one chat (published messages and typing indicators).

use std::convert::Infallible;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::{self, StreamExt};
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};

use crate::common::ChatId;
use crate::kernel::stream_hub::{chat_topic, CONTROL_TOPIC};
use crate::server::app::AppState;

/// SSE stream handler.
///
/// Emits a `connected` event first, then one event per hub value named after
/// its `type` field. Slow clients get a `lagged` event with the missed count.
pub async fn stream_handler(
    Extension(state): Extension<AppState>,
    Path(topic): Path<String>,
) -> Result<Sse<impl futures::Stream<Item = Result<Event, Infallible>>>, StatusCode> {
    let subscribe_topic = resolve_topic(&topic).ok_or(StatusCode::NOT_FOUND)?;

    let rx = state.stream_hub.subscribe(&subscribe_topic).await;

    let connected =
        stream::once(async { Ok::<_, Infallible>(Event::default().event("connected").data("ok")) });

    let events = BroadcastStream::new(rx).filter_map(|result| async {
        match result {
            Ok(value) => {
                let event_name = value
                    .get("type")
                    .and_then(|t| t.as_str())
                    .unwrap_or("message");
                Event::default()
                    .event(event_name)
                    .json_data(&value)
                    .ok()
                    .map(Ok)
            }
            Err(BroadcastStreamRecvError::Lagged(n)) => Event::default()
                .event("lagged")
                .json_data(&serde_json::json!({"missed": n}))
                .ok()
                .map(Ok),
        }
    });

    Ok(Sse::new(connected.chain(events)).keep_alive(KeepAlive::default()))
}

/// Map a path topic onto a hub topic. Chat ids are normalized.
fn resolve_topic(topic: &str) -> Option<String> {
    if topic == CONTROL_TOPIC {
        return Some(CONTROL_TOPIC.to_string());
    }
    let chat_id = ChatId::parse(topic.strip_prefix("chat:")?).ok()?;
    Some(chat_topic(chat_id))
}
