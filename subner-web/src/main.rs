//! Servidor web Axum com WebSocket para predição de entidades em tempo real.
//!
//! | Rota             | Descrição                                             |
//! |------------------|-------------------------------------------------------|
//! | `GET /`          | página de demonstração                                |
//! | `POST /predict`  | `{texts, top_n?}` → uma predição por texto            |
//! | `GET /labels`    | vocabulário de labels do modelo carregado             |
//! | `GET /demo-texts`| textos de exemplo                                     |
//! | `GET /ws`        | mesmo pedido do `/predict`, com eventos do pipeline   |
//!
//! Configuração por variáveis de ambiente: `SUBNER_ADDR` (padrão `0.0.0.0:3000`),
//! `SUBNER_MODEL_DIR` (diretório com gazetteer; sem ela usa o modelo de
//! demonstração) e `RUST_LOG`.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::StatusCode,
    response::{Html, IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use subner_core::{
    corpus::demo_texts, ModelDirectory, NerError, NerPipeline, PipelineEvent, Prediction, Record,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_ADDR: &str = "0.0.0.0:3000";

/// Estado compartilhado da aplicação
struct AppState {
    pipeline: NerPipeline,
}

#[derive(Deserialize)]
struct PredictRequest {
    texts: Vec<String>,
    #[serde(default)]
    top_n: Option<usize>,
}

impl PredictRequest {
    fn records(&self) -> Vec<Record> {
        self.texts.iter().map(Record::free_text).collect()
    }
}

/// Uma predição ou o erro local do registro.
#[derive(Serialize)]
#[serde(untagged)]
enum PredictionItem {
    Ok(Prediction),
    Failed { error: String },
}

#[derive(Serialize)]
struct PredictResponse {
    predictions: Vec<PredictionItem>,
    processing_ms: u64,
}

/// Configuração do servidor lida do ambiente.
struct ServerConfig {
    addr: String,
    model_dir: Option<ModelDirectory>,
}

impl ServerConfig {
    fn from_env() -> Self {
        Self {
            addr: std::env::var("SUBNER_ADDR").unwrap_or_else(|_| DEFAULT_ADDR.to_string()),
            model_dir: std::env::var_os("SUBNER_MODEL_DIR").map(ModelDirectory::new),
        }
    }

    fn pipeline(&self) -> subner_core::Result<NerPipeline> {
        match &self.model_dir {
            Some(dir) => {
                info!(root = %dir.root().display(), "loading lexicon model");
                NerPipeline::lexicon_from_model_dir(dir)
            }
            None => {
                info!("SUBNER_MODEL_DIR not set, using the demo model");
                NerPipeline::demo()
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug")),
        )
        .init();

    let config = ServerConfig::from_env();
    let state = Arc::new(AppState {
        pipeline: config.pipeline()?,
    });

    let listener = tokio::net::TcpListener::bind(&config.addr).await?;
    info!("🚀 Servidor subner iniciado em http://{}", config.addr);
    axum::serve(listener, app(state)).await?;
    Ok(())
}

fn app(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(index_handler))
        .route("/predict", post(predict_handler))
        .route("/labels", get(labels_handler))
        .route("/demo-texts", get(demo_texts_handler))
        .route("/ws", get(ws_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({ "error": message.into() }))).into_response()
}

fn status_for(err: &NerError) -> StatusCode {
    match err {
        NerError::EmptyBatch => StatusCode::BAD_REQUEST,
        NerError::Alignment(_) | NerError::UnknownLabel(_) => StatusCode::UNPROCESSABLE_ENTITY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Retorna a página principal HTML
async fn index_handler() -> impl IntoResponse {
    Html(include_str!("templates/index.html"))
}

/// Predição via HTTP POST (sem streaming)
async fn predict_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<PredictRequest>,
) -> Response {
    if req.top_n == Some(0) {
        return error_response(StatusCode::BAD_REQUEST, "top_n must be at least 1");
    }
    let top_n = req.top_n.unwrap_or(state.pipeline.config().top_n);
    let records = req.records();
    let start = Instant::now();

    let worker = Arc::clone(&state);
    let joined =
        tokio::task::spawn_blocking(move || worker.pipeline.predict(&records, top_n)).await;
    let results = match joined {
        Ok(Ok(results)) => results,
        Ok(Err(e)) => {
            warn!(error = %e, "prediction failed");
            return error_response(status_for(&e), e.to_string());
        }
        Err(e) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    };

    let predictions = results
        .into_iter()
        .map(|result| match result {
            Ok(prediction) => PredictionItem::Ok(prediction),
            Err(e) => PredictionItem::Failed { error: e.to_string() },
        })
        .collect();
    Json(PredictResponse {
        predictions,
        processing_ms: start.elapsed().as_millis() as u64,
    })
    .into_response()
}

/// Vocabulário de labels e tipos de entidade
async fn labels_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let labels = state.pipeline.labels();
    Json(serde_json::json!({
        "labels": labels.labels(),
        "entity_types": labels.entity_types(),
    }))
}

/// Retorna textos de demonstração
async fn demo_texts_handler() -> impl IntoResponse {
    let texts: Vec<serde_json::Value> = demo_texts()
        .iter()
        .map(|(domain, text)| serde_json::json!({ "domain": domain, "text": text }))
        .collect();
    Json(texts)
}

/// Upgrade HTTP → WebSocket
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_websocket(socket, state))
}

/// Recebe pedidos e repassa os eventos do pipeline à medida que são emitidos
async fn handle_websocket(mut socket: WebSocket, state: Arc<AppState>) {
    info!("WebSocket conectado");

    while let Some(Ok(msg)) = socket.recv().await {
        match msg {
            Message::Text(text) => {
                // JSON {texts, top_n} ou texto puro
                let req = serde_json::from_str::<PredictRequest>(&text).unwrap_or_else(|_| {
                    PredictRequest {
                        texts: vec![text.trim().to_string()],
                        top_n: None,
                    }
                });
                let top_n = req.top_n.unwrap_or(state.pipeline.config().top_n).max(1);
                let records = req.records();
                info!(records = records.len(), top_n, "predicting via WebSocket");

                let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<PipelineEvent>();
                let worker = Arc::clone(&state);
                tokio::task::spawn_blocking(move || {
                    let (tx_std, rx_std) = std::sync::mpsc::channel();
                    std::thread::scope(|scope| {
                        scope.spawn(|| worker.pipeline.predict_streaming(&records, top_n, tx_std));
                        for event in rx_std {
                            if tx.send(event).is_err() {
                                break;
                            }
                        }
                    });
                });

                while let Some(event) = rx.recv().await {
                    let Ok(json) = serde_json::to_string(&event) else {
                        continue;
                    };
                    if socket.send(Message::Text(json)).await.is_err() {
                        return; // cliente desconectou
                    }
                }
            }
            Message::Close(_) => {
                info!("WebSocket desconectado");
                return;
            }
            Message::Ping(payload) => {
                let _ = socket.send(Message::Pong(payload)).await;
            }
            _ => {}
        }
    }
}
