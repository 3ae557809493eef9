//! Server-Sent Events stream of import progress.

use std::time::Duration;

use actix_web::http::header;
use actix_web::web::Bytes;
use actix_web::{HttpRequest, HttpResponse, get, web};
use futures_util::{Stream, StreamExt, stream};
use tokio::time::{Instant, interval_at};
use tracing::debug;

use crate::models::ProgressEvent;
use crate::services::{ImportPipeline, Subscription};

pub const LAST_EVENT_ID_HEADER: &str = "Last-Event-ID";

const KEEP_ALIVE: Duration = Duration::from_secs(15);
const RETRY_HINT_MS: u64 = 1000;

/// Resume point from the `Last-Event-ID` header or `last_event_id` query parameter.
pub fn last_event_id(req: &HttpRequest) -> Option<u64> {
    let from_header = req
        .headers()
        .get(LAST_EVENT_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok());

    from_header.or_else(|| {
        web::Query::<std::collections::HashMap<String, String>>::from_query(req.query_string())
            .ok()
            .and_then(|q| q.get("last_event_id").and_then(|v| v.parse().ok()))
    })
}

/// One SSE frame.
pub fn format_event(event: &ProgressEvent) -> Result<Bytes, actix_web::Error> {
    let data = serde_json::to_string(event).map_err(actix_web::error::ErrorInternalServerError)?;
    Ok(Bytes::from(format!(
        "id: {}\nevent: {}\ndata: {}\n\n",
        event.id,
        event.event_type.as_str(),
        data
    )))
}

/// Retry hint, then events interleaved with keep-alive comments.
pub fn sse_stream(
    subscription: Subscription,
    keep_alive: Duration,
) -> impl Stream<Item = Result<Bytes, actix_web::Error>> {
    let hello = stream::once(async { Ok(Bytes::from(format!("retry: {}\n\n", RETRY_HINT_MS))) });
    let ticker = interval_at(Instant::now() + keep_alive, keep_alive);

    let events = stream::unfold((subscription, ticker), |(mut sub, mut ticker)| async move {
        tokio::select! {
            event = sub.next() => {
                let event = event?;
                Some((format_event(&event), (sub, ticker)))
            }
            _ = ticker.tick() => {
                Some((Ok(Bytes::from_static(b": keep-alive\n\n")), (sub, ticker)))
            }
        }
    });

    hello.chain(events)
}

/// Subscribe to progress events. Reconnecting clients resume after their last id.
#[get("/imports/events")]
async fn event_stream(req: HttpRequest, pipeline: web::Data<ImportPipeline>) -> HttpResponse {
    let last_seen = last_event_id(&req);
    let subscription = pipeline.bus().subscribe(last_seen);
    debug!(
        last_seen = ?last_seen,
        subscribers = pipeline.bus().subscriber_count(),
        "Event stream opened"
    );

    HttpResponse::Ok()
        .content_type("text/event-stream")
        .insert_header((header::CACHE_CONTROL, "no-cache"))
        .insert_header(("X-Accel-Buffering", "no"))
        .streaming(sse_stream(subscription, KEEP_ALIVE))
}

pub fn configure_event_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(event_stream);
}
