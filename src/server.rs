//! HTTP surface: upload page, multipart conversion endpoint, archive
//! download, health check.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::http::{header, Method, StatusCode};
use axum::response::{Html, IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use tokio_util::io::ReaderStream;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::config::Config;
use crate::error::ConvertError;
use crate::pipeline::{self, UploadedFile};
use crate::storage::JobStore;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<JobStore>,
}

impl IntoResponse for ConvertError {
    fn into_response(self) -> Response {
        let status = match &self {
            ConvertError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            ConvertError::NotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (
            status,
            Json(serde_json::json!({ "error": self.to_string() })),
        )
            .into_response()
    }
}

/// Upload page
async fn index() -> impl IntoResponse {
    Html(INDEX_HTML)
}

/// Health check endpoint
async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "tdms2csv",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Accepts a multipart batch of TDMS files and converts it on a blocking
/// worker, responding with the download URL of the produced archive.
async fn convert(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<serde_json::Value>, ConvertError> {
    let mut batch = Vec::new();
    while let Some(field) = multipart.next_field().await.map_err(bad_multipart)? {
        let Some(file_name) = field.file_name().map(str::to_string) else {
            continue;
        };
        let content = field.bytes().await.map_err(bad_multipart)?;
        batch.push(UploadedFile::new(file_name, content.to_vec()));
    }

    let store = state.store.clone();
    let archive = tokio::task::spawn_blocking(move || pipeline::convert_batch(&store, &batch))
        .await
        .map_err(|e| ConvertError::Conversion(format!("conversion task failed: {e}")))??;

    Ok(Json(serde_json::json!({
        "url": archive.download_url(),
        "files": archive.entries
    })))
}

fn bad_multipart(err: axum::extract::multipart::MultipartError) -> ConvertError {
    ConvertError::InvalidInput(format!("malformed multipart request: {err}"))
}

/// Streams a produced archive back as a download attachment. The file is
/// never buffered whole, so large archives cost a fixed amount of memory.
async fn download(
    State(state): State<AppState>,
    Path((job_id, file_name)): Path<(String, String)>,
) -> Result<Response, ConvertError> {
    let path = state.store.resolve_download(&job_id, &file_name)?;
    let file = tokio::fs::File::open(&path).await?;
    let headers = [
        (header::CONTENT_TYPE, "application/zip".to_string()),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{file_name}\""),
        ),
    ];
    Ok((headers, Body::from_stream(ReaderStream::new(file))).into_response())
}

/// Create the HTTP server with all routes
pub fn create_router(state: AppState, max_upload_bytes: usize) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/convert", post(convert))
        .route("/download/:job_id/:file_name", get(download))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(ServiceBuilder::new().layer(cors))
        .with_state(state)
}

/// Start the HTTP server and the stale-job reaper.
pub async fn start_server(config: &Config) -> crate::error::Result<()> {
    let store = Arc::new(JobStore::new(&config.storage.data_dir)?);

    let ttl = Duration::from_secs(config.storage.archive_ttl_minutes * 60);
    let interval = Duration::from_secs(config.storage.sweep_interval_minutes.max(1) * 60);
    let sweeper = store.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            match sweeper.sweep_stale(ttl) {
                Ok(0) => {}
                Ok(removed) => info!(removed, "reaped stale job directories"),
                Err(e) => warn!(error = %e, "stale job sweep failed"),
            }
        }
    });

    let app = create_router(AppState { store }, config.max_upload_bytes());
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;

    println!("🚀 TDMS conversion server on http://localhost:{}", config.server.port);
    println!("💚 Health check: http://localhost:{}/health", config.server.port);

    axum::serve(listener, app).await?;
    Ok(())
}

const INDEX_HTML: &str = r#"<!doctype html>
<html lang="en">
<head>
  <meta charset="UTF-8">
  <meta name="viewport" content="width=device-width, initial-scale=1.0">
  <title>Convert TDMS to CSV</title>
  <style>
    body, html {
        height: 100%;
        margin: 0;
        font-family: Arial, sans-serif;
        display: flex;
        justify-content: center;
        align-items: center;
        flex-direction: column;
        text-align: center;
    }
    .button {
        background-color: #0052d4;
        border: none;
        color: white;
        padding: 20px 54px;
        font-size: 16px;
        margin: 4px 2px;
        cursor: pointer;
        border-radius: 5px;
        display: inline-block;
    }
    .button:disabled {
        background-color: #cccccc;
        cursor: not-allowed;
    }
    #status { min-height: 1.5em; margin: 10px 0; }
    #status.error { color: #b00020; }
  </style>
</head>
<body>
<div>
  <h1>Convert Your TDMS Files To CSV</h1>
  <form id="upload-form">
    <input type="file" name="files" multiple required id="file-input"
           style="display: none;" accept=".tdms" onchange="checkFiles()">
    <label for="file-input" class="button">Choose files</label>
    <button type="button" class="button" id="upload-btn" disabled onclick="uploadFiles()">
      Upload and Convert
    </button>
  </form>
  <div id="status"></div>
  <a id="download-link" style="display: none;">
    <button class="button">Download Converted Files</button>
  </a>
</div>

<script>
function checkFiles() {
  const files = document.getElementById('file-input').files;
  const allTdms = Array.from(files).every(f => f.name.endsWith('.tdms'));
  document.getElementById('upload-btn').disabled = !allTdms || files.length === 0;
}

async function uploadFiles() {
  const status = document.getElementById('status');
  const link = document.getElementById('download-link');
  const button = document.getElementById('upload-btn');
  status.className = '';
  status.textContent = 'Converting…';
  link.style.display = 'none';
  button.disabled = true;

  const form = new FormData();
  for (const f of document.getElementById('file-input').files) {
    form.append('files', f);
  }

  try {
    const resp = await fetch('/convert', { method: 'POST', body: form });
    const body = await resp.json();
    if (!resp.ok) {
      throw new Error(body.error || 'conversion failed');
    }
    status.textContent = 'Done!';
    link.href = body.url;
    link.style.display = 'inline-block';
  } catch (e) {
    status.className = 'error';
    status.textContent = 'Error: ' + e.message;
  } finally {
    button.disabled = false;
  }
}
</script>
</body>
</html>
"#;
