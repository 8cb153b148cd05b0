use crate::codec::EVENT_STREAM;
use crate::error::RelayError;
use crate::models::chat::{
    ChatRequest,
    HealthResponse,
    NewConversationResponse,
    ProviderInfo,
    StatusMessage,
};
use crate::relay::{ RelaySession, RelayStream };
use std::sync::Arc;
use axum::{
    body::Body,
    extract::{ rejection::JsonRejection, Path, Request, State },
    http::{ header, Method, StatusCode },
    middleware::{ self, Next },
    response::{ IntoResponse, Response },
    routing::{ delete, get, post },
    Json,
    Router,
};
use tower::ServiceBuilder;
use tower_http::cors::{ Any, CorsLayer };
use log::{ info, warn };

#[derive(Clone)]
struct AppState {
    relay: Arc<RelaySession>,
}

pub fn router(relay: Arc<RelaySession>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers(Any);

    let api = Router::new()
        .route("/chat", post(chat_handler))
        .route("/chat/new", post(new_conversation_handler))
        .route("/chat/provider", get(provider_handler))
        .route("/chat/{conversation_id}", delete(clear_conversation_handler))
        .route("/health", get(health_handler));

    Router::new()
        .nest("/api", api)
        .layer(ServiceBuilder::new().layer(middleware::from_fn(log_request)).layer(cors))
        .with_state(AppState { relay })
}

async fn log_request(req: Request, next: Next) -> Response {
    info!("{} {}", req.method(), req.uri().path());
    next.run(req).await
}

async fn chat_handler(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>
) -> Response {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => {
            warn!("Invalid chat request body: {}", rejection.body_text());
            return RelayError::Validation(
                "Message is required and must be a string".to_string()
            ).into_response();
        }
    };

    match state.relay.handle(request).await {
        Ok(stream) => event_stream_response(stream),
        Err(e) => e.into_response(),
    }
}

fn event_stream_response(stream: RelayStream) -> Response {
    let body = Body::from_stream(stream.into_body_stream());
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, EVENT_STREAM)
        .header(header::CACHE_CONTROL, "no-cache, no-transform")
        .header(header::CONNECTION, "keep-alive")
        .header("x-accel-buffering", "no")
        .body(body)
        .unwrap_or_else(|e| RelayError::Internal(e.to_string()).into_response())
}

async fn new_conversation_handler(State(state): State<AppState>) -> impl IntoResponse {
    let conversation_id = state.relay.store().create().await;
    info!("Created new conversation {}", conversation_id);
    Json(NewConversationResponse { conversation_id })
}

async fn clear_conversation_handler(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>
) -> impl IntoResponse {
    state.relay.store().delete(&conversation_id).await;
    info!("Cleared conversation {}", conversation_id);
    Json(StatusMessage { message: "Conversation cleared".to_string() })
}

async fn provider_handler(State(state): State<AppState>) -> impl IntoResponse {
    let client = state.relay.chat_client();
    Json(ProviderInfo {
        provider: client.provider(),
        model: client.get_model(),
        has_api_key: client.has_api_key(),
    })
}

async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        message: "Chat relay is running".to_string(),
    })
}
