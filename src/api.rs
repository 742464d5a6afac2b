use axum::{
    extract::{Json, State},
    http::StatusCode,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info};

use crate::{app_state::AppState, models::ConversationTurn, rag::IndexStatus};

// --- Payloads y Respuestas de la API ---

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatPayload {
    pub user_input: String,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub response: String,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub index: IndexStatus,
    pub turns: usize,
}

// --- Router ---

pub fn create_router(app_state: AppState) -> Router {
    Router::new()
        .route("/chat", post(chat_handler))
        .route("/api/history", get(history_handler))
        .route("/api/status", get(status_handler))
        .with_state(app_state)
}

// --- Handlers ---

/// El detalle del error sólo va a los logs; el cliente recibe un mensaje genérico.
#[axum::debug_handler]
async fn chat_handler(
    State(state): State<AppState>,
    Json(payload): Json<ChatPayload>,
) -> Result<Json<ChatResponse>, (StatusCode, Json<serde_json::Value>)> {
    info!("Pregunta recibida: {}", payload.user_input);

    match state.answerer.answer(&payload.user_input).await {
        Ok(response) => {
            info!("Respuesta generada: {}", response);
            Ok(Json(ChatResponse { response }))
        }
        Err(e) => {
            error!("Error al procesar la pregunta: {}", e);
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "An error occurred"})),
            ))
        }
    }
}

#[axum::debug_handler]
async fn history_handler(State(state): State<AppState>) -> Json<Vec<ConversationTurn>> {
    Json(state.answerer.history())
}

#[axum::debug_handler]
async fn status_handler(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        index: state.answerer.index_status(),
        turns: state.answerer.history().len(),
    })
}
