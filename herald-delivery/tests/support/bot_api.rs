//! Mock bot API server
#![allow(dead_code)] // Not every test uses every accessor
//!
//! Records every request it receives and answers with a configurable status
//! and body.

use std::{net::SocketAddr, sync::Arc};

use axum::{
    Json, Router,
    extract::{Multipart, Path, State},
    http::StatusCode,
    routing::post,
};
use tokio::{sync::Mutex, task::JoinHandle};

/// A request as seen by the mock server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BotRequest {
    Message {
        token: String,
        body: serde_json::Value,
    },
    Upload {
        token: String,
        method: String,
        fields: Vec<(String, String)>,
        file: Option<UploadedFile>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    pub field: String,
    pub filename: Option<String>,
    pub content_type: Option<String>,
    pub data: Vec<u8>,
}

#[derive(Clone)]
struct Shared {
    status: StatusCode,
    body: &'static str,
    requests: Arc<Mutex<Vec<BotRequest>>>,
}

pub struct MockBotApi {
    addr: SocketAddr,
    requests: Arc<Mutex<Vec<BotRequest>>>,
    handle: JoinHandle<()>,
}

impl MockBotApi {
    /// A server that accepts everything.
    pub async fn start() -> Self {
        Self::start_with(StatusCode::OK, r#"{"ok":true}"#).await
    }

    /// A server that answers every request with `status` and `body`.
    pub async fn start_with(status: StatusCode, body: &'static str) -> Self {
        let requests = Arc::new(Mutex::new(Vec::new()));
        let shared = Shared {
            status,
            body,
            requests: Arc::clone(&requests),
        };

        let app = Router::new()
            .route("/{bot}/sendMessage", post(send_message))
            .route("/{bot}/{method}", post(upload))
            .with_state(shared);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr,
            requests,
            handle,
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub async fn requests(&self) -> Vec<BotRequest> {
        self.requests.lock().await.clone()
    }

    pub fn shutdown(self) {
        self.handle.abort();
    }
}

fn token(bot: &str) -> String {
    bot.strip_prefix("bot").unwrap_or(bot).to_string()
}

async fn send_message(
    State(shared): State<Shared>,
    Path(bot): Path<String>,
    Json(body): Json<serde_json::Value>,
) -> (StatusCode, &'static str) {
    shared.requests.lock().await.push(BotRequest::Message {
        token: token(&bot),
        body,
    });

    (shared.status, shared.body)
}

async fn upload(
    State(shared): State<Shared>,
    Path((bot, method)): Path<(String, String)>,
    mut multipart: Multipart,
) -> (StatusCode, &'static str) {
    let mut fields = Vec::new();
    let mut file = None;

    while let Some(field) = multipart.next_field().await.unwrap() {
        let name = field.name().unwrap_or_default().to_string();
        let filename = field.file_name().map(ToString::to_string);
        let content_type = field.content_type().map(ToString::to_string);
        let data = field.bytes().await.unwrap().to_vec();

        if filename.is_some() {
            file = Some(UploadedFile {
                field: name,
                filename,
                content_type,
                data,
            });
        } else {
            fields.push((name, String::from_utf8(data).unwrap()));
        }
    }

    shared.requests.lock().await.push(BotRequest::Upload {
        token: token(&bot),
        method,
        fields,
        file,
    });

    (shared.status, shared.body)
}
