use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{Method, StatusCode},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use parley_net::Publisher;
use parley_shared::protocol::{Author, ChatEvent, Message, MessageRef, MessageUpdate, TypingSignal};
use parley_shared::schema::ChatNamespace;
use parley_shared::{ChannelId, MessageId, Nonce};

use crate::config::ServerConfig;
use crate::error::ServerError;

#[derive(Clone)]
pub struct AppState {
    pub publisher: Publisher,
    pub config: Arc<ServerConfig>,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/info", get(server_info))
        .route("/api/publish", post(publish))
        .route("/api/channels/:channel_id/messages", post(post_message))
        .route(
            "/api/channels/:channel_id/messages/:message_id",
            axum::routing::patch(edit_message).delete(delete_message),
        )
        .route("/api/channels/:channel_id/typing", post(typing))
        .route("/api/channels/:channel_id/read", post(acknowledge_read))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Serialize)]
struct ServerInfoResponse {
    name: String,
    version: &'static str,
    namespaces: Vec<&'static str>,
}

#[derive(Deserialize)]
struct PublishRequest {
    namespace: String,
    #[serde(default)]
    args: Vec<String>,
    event: String,
    data: Value,
}

#[derive(Serialize)]
struct PublishResponse {
    address: String,
}

#[derive(Deserialize)]
struct PostMessageRequest {
    content: String,
    #[serde(default)]
    nonce: Option<Nonce>,
    #[serde(default)]
    reply_to: Option<MessageId>,
    author: Author,
}

#[derive(Deserialize)]
struct EditMessageRequest {
    content: String,
}

#[derive(Deserialize)]
struct TypingRequest {
    user: Author,
}

#[derive(Deserialize)]
struct ReadRequest {
    message_id: MessageId,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn server_info(State(state): State<AppState>) -> Json<ServerInfoResponse> {
    Json(ServerInfoResponse {
        name: state.config.instance_name.clone(),
        version: env!("CARGO_PKG_VERSION"),
        namespaces: state.publisher.registry().namespaces().collect(),
    })
}

/// Publish any registered event, validated against the schema registry.
async fn publish(
    State(state): State<AppState>,
    Json(req): Json<PublishRequest>,
) -> Result<Json<PublishResponse>, ServerError> {
    let address = state
        .publisher
        .publish_raw(&req.namespace, &req.args, &req.event, req.data)
        .await?;
    Ok(Json(PublishResponse {
        address: address.to_string(),
    }))
}

/// Confirm a new message: assign its id and timestamp, then publish it with
/// the sender's nonce echoed back.
async fn post_message(
    State(state): State<AppState>,
    Path(channel_id): Path<ChannelId>,
    Json(req): Json<PostMessageRequest>,
) -> Result<(StatusCode, Json<Message>), ServerError> {
    let message = Message {
        id: MessageId::generate(),
        channel_id: channel_id.clone(),
        author: Some(req.author),
        content: req.content,
        reply_to: req.reply_to,
        timestamp: Utc::now(),
        nonce: req.nonce,
        edited_at: None,
    };

    state
        .publisher
        .publish::<ChatNamespace>(&channel_id, &ChatEvent::MessageSent(message.clone()))
        .await?;
    info!(channel = %channel_id, id = %message.id, "Message confirmed");
    Ok((StatusCode::CREATED, Json(message)))
}

async fn edit_message(
    State(state): State<AppState>,
    Path((channel_id, message_id)): Path<(ChannelId, MessageId)>,
    Json(req): Json<EditMessageRequest>,
) -> Result<Json<MessageUpdate>, ServerError> {
    let update = MessageUpdate {
        id: message_id,
        channel_id: channel_id.clone(),
        content: Some(req.content),
        edited_at: Some(Utc::now()),
    };
    state
        .publisher
        .publish::<ChatNamespace>(&channel_id, &ChatEvent::MessageUpdated(update.clone()))
        .await?;
    Ok(Json(update))
}

async fn delete_message(
    State(state): State<AppState>,
    Path((channel_id, message_id)): Path<(ChannelId, MessageId)>,
) -> Result<StatusCode, ServerError> {
    let deleted = ChatEvent::MessageDeleted(MessageRef {
        id: message_id,
        channel_id: channel_id.clone(),
    });
    state
        .publisher
        .publish::<ChatNamespace>(&channel_id, &deleted)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn typing(
    State(state): State<AppState>,
    Path(channel_id): Path<ChannelId>,
    Json(req): Json<TypingRequest>,
) -> Result<StatusCode, ServerError> {
    let signal = ChatEvent::Typing(TypingSignal {
        channel_id: channel_id.clone(),
        user: req.user,
    });
    state
        .publisher
        .publish::<ChatNamespace>(&channel_id, &signal)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Read markers are not persisted by the gateway.
async fn acknowledge_read(
    Path(channel_id): Path<ChannelId>,
    Json(req): Json<ReadRequest>,
) -> Result<StatusCode, ServerError> {
    if req.message_id.as_str().trim().is_empty() {
        return Err(ServerError::BadRequest("message_id must not be empty".into()));
    }
    info!(channel = %channel_id, message = %req.message_id, "Read acknowledged");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %addr, "HTTP API listening");
    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use parley_net::{MemoryHub, NotificationRx, Transport, TransportNotification};
    use parley_shared::protocol::Envelope;
    use parley_shared::{Address, SchemaRegistry};
    use serde_json::json;
    use tower::util::ServiceExt;

    struct Fixture {
        app: Router,
        // Keeps the listening connection alive.
        _listener: parley_net::MemoryTransport,
        rx: NotificationRx,
    }

    async fn fixture(listen_on: &str) -> Fixture {
        let hub = MemoryHub::new();
        let (publisher_transport, _) = hub.connect();
        let (listener, rx) = hub.connect();
        listener.subscribe(&Address::from(listen_on)).await.unwrap();

        let state = AppState {
            publisher: Publisher::new(
                Arc::new(publisher_transport),
                Arc::new(SchemaRegistry::standard()),
            ),
            config: Arc::new(ServerConfig::default()),
        };
        Fixture {
            app: build_router(state),
            _listener: listener,
            rx,
        }
    }

    fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn next_envelope(rx: &mut NotificationRx) -> Envelope {
        match rx.recv().await.unwrap() {
            TransportNotification::Message(inbound) => Envelope::from_bytes(&inbound.payload).unwrap(),
            other => panic!("unexpected notification: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_health() {
        let f = fixture("chat:c1").await;
        let resp = f
            .app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
    }

    #[tokio::test]
    async fn test_post_message_echoes_nonce() {
        let mut f = fixture("chat:c1").await;
        let resp = f
            .app
            .oneshot(json_request(
                "POST",
                "/api/channels/c1/messages",
                json!({ "content": "hello", "nonce": 42, "author": { "id": "alice", "name": "Alice" } }),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);

        let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let message: Message = serde_json::from_slice(&body).unwrap();
        assert_eq!(message.nonce, Some(Nonce(42)));

        let envelope = next_envelope(&mut f.rx).await;
        assert_eq!(envelope.name, "message_sent");
        assert_eq!(envelope.data["id"], message.id.as_str());
        assert_eq!(envelope.data["nonce"], 42);
    }

    #[tokio::test]
    async fn test_empty_content_rejected() {
        let f = fixture("chat:c1").await;
        let resp = f
            .app
            .oneshot(json_request(
                "POST",
                "/api/channels/c1/messages",
                json!({ "content": "  ", "author": { "id": "alice", "name": "Alice" } }),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let value: Value = serde_json::from_slice(&body).unwrap();
        assert!(value["error"].as_str().unwrap().contains("content"));
    }

    #[tokio::test]
    async fn test_edit_and_delete() {
        let mut f = fixture("chat:c1").await;
        let resp = f
            .app
            .clone()
            .oneshot(json_request(
                "PATCH",
                "/api/channels/c1/messages/m1",
                json!({ "content": "edited" }),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        assert_eq!(next_envelope(&mut f.rx).await.name, "message_updated");

        let resp = f
            .app
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri("/api/channels/c1/messages/m1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
        let envelope = next_envelope(&mut f.rx).await;
        assert_eq!(envelope.name, "message_deleted");
        assert_eq!(envelope.data["id"], "m1");
    }

    #[tokio::test]
    async fn test_raw_publish() {
        let mut f = fixture("group:g1").await;
        let resp = f
            .app
            .clone()
            .oneshot(json_request(
                "POST",
                "/api/publish",
                json!({
                    "namespace": "group",
                    "args": ["g1"],
                    "event": "channel_created",
                    "data": { "id": "c9", "group_id": "g1", "name": "general" }
                }),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        assert_eq!(next_envelope(&mut f.rx).await.name, "channel_created");

        let resp = f
            .app
            .oneshot(json_request(
                "POST",
                "/api/publish",
                json!({ "namespace": "nope", "args": [], "event": "x", "data": {} }),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}
