//! Inbound HTTP surface
//!
//! | Route                        | Purpose                                      |
//! |------------------------------|----------------------------------------------|
//! | `POST /notifications`        | Push notifications from the store (always 200) |
//! | `POST /watch/files/{id}`     | Watch one document                           |
//! | `POST /watch/folders/{id}`   | Watch a folder's change feed                 |
//! | `DELETE /watch/files/{id}`   | Stop a document watch                        |
//! | `DELETE /watch/folder`       | Stop the folder watch                        |
//! | `GET /events[?document=id]`  | Server-Sent Events stream of document events |
//! | `GET /health`                | Liveness and counters                        |
//!
//! Notifications are acknowledged before they are reconciled; the
//! reconciliation runs on a tracked task that shutdown cancels.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::stream::{self, Stream, StreamExt};
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Full, StreamBody};
use hyper::body::{Bytes, Frame};
use hyper::header::{HeaderValue, CACHE_CONTROL, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{HeaderMap, Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use docwatch_core::domain::{DocumentId, FolderId, WatchTarget};
use docwatch_core::ports::DocumentEvent;
use docwatch_monitor::hub::SubscriberHub;
use docwatch_monitor::{ChangeReconciler, MonitorError, Notification};

/// Header carrying the resource reference of a push notification
pub const HEADER_RESOURCE_URI: &str = "x-goog-resource-uri";
/// Header carrying the channel identifier of a push notification
pub const HEADER_CHANNEL_ID: &str = "x-goog-channel-id";
/// Header carrying the resource state of a push notification
pub const HEADER_RESOURCE_STATE: &str = "x-goog-resource-state";

pub type ResponseBody = UnsyncBoxBody<Bytes, Infallible>;

/// Everything a request handler needs
pub struct AppState {
    pub reconciler: Arc<ChangeReconciler>,
    pub hub: Arc<SubscriberHub>,
    /// In-flight notification cycles
    pub tasks: TaskTracker,
    pub shutdown: CancellationToken,
}

// ============================================================================
// Server
// ============================================================================

/// HTTP/1 server for notifications, watch control and event streams
pub struct NotificationServer {
    state: Arc<AppState>,
    listener: TcpListener,
}

impl NotificationServer {
    /// Binds `endpoint`, e.g. `"127.0.0.1:8080"`
    pub async fn bind(state: Arc<AppState>, endpoint: &str) -> anyhow::Result<Self> {
        let addr: SocketAddr = endpoint.parse()?;
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { state, listener })
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serves connections until the shutdown token is cancelled
    pub async fn run(self) -> anyhow::Result<()> {
        info!(addr = %self.local_addr()?, "Notification server listening");
        let shutdown = self.state.shutdown.clone();

        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    let (stream, _) = result?;
                    let io = TokioIo::new(stream);
                    let state = Arc::clone(&self.state);

                    tokio::spawn(async move {
                        let service = service_fn(move |req| {
                            let state = Arc::clone(&state);
                            async move { Ok::<_, Infallible>(handle_request(req, state).await) }
                        });

                        if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                            error!(error = %e, "HTTP connection error");
                        }
                    });
                }
                _ = shutdown.cancelled() => {
                    info!("Notification server shutting down");
                    break;
                }
            }
        }

        Ok(())
    }
}

// ============================================================================
// Routing
// ============================================================================

/// Routes one request; request bodies are never read
pub async fn handle_request<B>(req: Request<B>, state: Arc<AppState>) -> Response<ResponseBody> {
    let path = req.uri().path().to_string();
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

    match (req.method(), segments.as_slice()) {
        (&Method::POST, ["notifications"]) => accept_notification(req.headers(), &state),
        (&Method::POST, ["watch", "files", id]) => watch_file(id, &state).await,
        (&Method::POST, ["watch", "folders", id]) => watch_folder(id, &state).await,
        (&Method::DELETE, ["watch", "files", id]) => stop_file(id, &state).await,
        (&Method::DELETE, ["watch", "folder"]) => stop_folder(&state).await,
        (&Method::GET, ["events"]) => open_event_stream(req.uri().query(), &state),
        (&Method::GET, ["health"]) => health(&state).await,
        (_, ["notifications"] | ["events"] | ["health"] | ["watch", ..]) => {
            json_response(StatusCode::METHOD_NOT_ALLOWED, json!({"error": "method not allowed"}))
        }
        _ => json_response(StatusCode::NOT_FOUND, json!({"error": "not found"})),
    }
}

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn accept_notification(headers: &HeaderMap, state: &AppState) -> Response<ResponseBody> {
    let Some(resource_uri) = header(headers, HEADER_RESOURCE_URI) else {
        warn!("Notification without resource reference; acknowledged and dropped");
        return empty_response(StatusCode::OK);
    };

    let notification = Notification {
        resource_uri,
        channel_id: header(headers, HEADER_CHANNEL_ID),
        resource_state: header(headers, HEADER_RESOURCE_STATE),
    };
    debug!(
        resource = %notification.resource_uri,
        channel_id = ?notification.channel_id,
        state = ?notification.resource_state,
        "Notification received"
    );

    let reconciler = Arc::clone(&state.reconciler);
    let shutdown = state.shutdown.clone();
    state.tasks.spawn(async move {
        tokio::select! {
            report = reconciler.handle_notification(&notification) => {
                debug!(?report, "Notification reconciled");
            }
            _ = shutdown.cancelled() => {
                debug!(resource = %notification.resource_uri, "Reconciliation cancelled by shutdown");
            }
        }
    });

    empty_response(StatusCode::OK)
}

async fn watch_file(raw_id: &str, state: &AppState) -> Response<ResponseBody> {
    let id = match DocumentId::new(raw_id.to_string()) {
        Ok(id) => id,
        Err(e) => return bad_request(e),
    };
    match state.reconciler.register_file_watch(&id).await {
        Ok(channel) => json_response(StatusCode::OK, json!({ "channel": channel })),
        Err(e) => monitor_error_response(&e),
    }
}

async fn watch_folder(raw_id: &str, state: &AppState) -> Response<ResponseBody> {
    let folder_id = match FolderId::new(raw_id.to_string()) {
        Ok(id) => id,
        Err(e) => return bad_request(e),
    };
    match state.reconciler.register_folder_watch(&folder_id).await {
        Ok(registration) => json_response(
            StatusCode::OK,
            json!({
                "channel": registration.channel,
                "cursor": registration.cursor,
                "replaced": registration.replaced,
                "initialScan": {
                    "dispatched": registration.initial_scan.dispatched,
                    "noContent": registration.initial_scan.no_content,
                    "failed": registration.initial_scan.failed,
                },
            }),
        ),
        Err(e) => monitor_error_response(&e),
    }
}

async fn stop_file(raw_id: &str, state: &AppState) -> Response<ResponseBody> {
    let id = match DocumentId::new(raw_id.to_string()) {
        Ok(id) => id,
        Err(e) => return bad_request(e),
    };
    match state.reconciler.stop(&WatchTarget::File(id)).await {
        Ok(channel) => json_response(StatusCode::OK, json!({ "stopped": channel })),
        Err(e) => monitor_error_response(&e),
    }
}

async fn stop_folder(state: &AppState) -> Response<ResponseBody> {
    match state.reconciler.stop_folder().await {
        Ok(channel) => json_response(StatusCode::OK, json!({ "stopped": channel })),
        Err(e) => monitor_error_response(&e),
    }
}

async fn health(state: &AppState) -> Response<ResponseBody> {
    let reconciler = &state.reconciler;
    let folder = reconciler.folder_watch().map(|watch| {
        let status = reconciler.state(&WatchTarget::Folder(watch.folder_id.clone()));
        json!({
            "folderId": watch.folder_id,
            "cursor": watch.cursor,
            "state": status.to_string(),
        })
    });

    json_response(
        StatusCode::OK,
        json!({
            "status": "ok",
            "channels": reconciler.channels().len(),
            "trackedDocuments": reconciler.tracked_documents(),
            "documentLocks": reconciler.lock_count(),
            "subscribers": state.hub.subscriber_count(),
            "lastSequence": reconciler.last_sequence().await,
            "folder": folder,
        }),
    )
}

// ============================================================================
// Event stream
// ============================================================================

/// Parses `document=` query parameters into room memberships
fn requested_rooms(query: Option<&str>) -> Result<Vec<DocumentId>, String> {
    url::form_urlencoded::parse(query.unwrap_or_default().as_bytes())
        .filter(|(key, _)| key == "document")
        .map(|(_, value)| DocumentId::new(value.into_owned()).map_err(|e| e.to_string()))
        .collect()
}

fn open_event_stream(query: Option<&str>, state: &AppState) -> Response<ResponseBody> {
    let rooms = match requested_rooms(query) {
        Ok(rooms) => rooms,
        Err(e) => return bad_request(e),
    };

    let subscription = state.hub.subscribe();
    for room in &rooms {
        state.hub.join(subscription.id, room.clone());
    }
    info!(subscriber = %subscription.id, rooms = rooms.len(), "Event stream opened");

    let events = EventStream {
        hub: Arc::clone(&state.hub),
        id: subscription.id,
        events: subscription.events,
        shutdown: state.shutdown.clone(),
    };

    let mut response = Response::new(StreamBody::new(sse_stream(events)).boxed_unsync());
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    response
}

/// Receiving side of one stream; leaves the hub when dropped
struct EventStream {
    hub: Arc<SubscriberHub>,
    id: Uuid,
    events: mpsc::Receiver<DocumentEvent>,
    shutdown: CancellationToken,
}

impl Drop for EventStream {
    fn drop(&mut self) {
        self.hub.unsubscribe(self.id);
        debug!(subscriber = %self.id, "Event stream closed");
    }
}

fn sse_stream(events: EventStream) -> impl Stream<Item = Result<Frame<Bytes>, Infallible>> + Send {
    let opening = stream::once(async { Ok::<_, Infallible>(Frame::data(Bytes::from_static(b": connected\n\n"))) });

    let events = stream::unfold(events, |mut state| async move {
        let next = tokio::select! {
            _ = state.shutdown.cancelled() => None,
            event = state.events.recv() => event,
        };
        next.map(|event| (Ok::<_, Infallible>(Frame::data(sse_frame(&event))), state))
    });

    opening.chain(events)
}

/// Encodes one event as an SSE message
pub fn sse_frame(event: &DocumentEvent) -> Bytes {
    let data = serde_json::to_string(event).unwrap_or_default();
    Bytes::from(format!(
        "id: {}\nevent: document\ndata: {}\n\n",
        event.sequence_number, data
    ))
}

// ============================================================================
// Responses
// ============================================================================

fn monitor_error_response(error: &MonitorError) -> Response<ResponseBody> {
    let status = match error {
        MonitorError::Auth(_) => StatusCode::UNAUTHORIZED,
        MonitorError::Registration { .. } => StatusCode::BAD_GATEWAY,
        MonitorError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        MonitorError::NotWatched(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    warn!(status = status.as_u16(), error = %error, "Watch request failed");
    json_response(status, json!({ "error": error.to_string() }))
}

fn bad_request(error: impl std::fmt::Display) -> Response<ResponseBody> {
    json_response(StatusCode::BAD_REQUEST, json!({ "error": error.to_string() }))
}

fn json_response(status: StatusCode, body: serde_json::Value) -> Response<ResponseBody> {
    let mut response = Response::new(Full::new(Bytes::from(body.to_string())).boxed_unsync());
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

fn empty_response(status: StatusCode) -> Response<ResponseBody> {
    let mut response = Response::new(Full::new(Bytes::new()).boxed_unsync());
    *response.status_mut() = status;
    response
}
