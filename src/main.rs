//! Invoice Extractor - PDF/text invoice extraction server with editable grids and CSV/XLSX export.

mod batch_store;
mod config;
mod error;
mod export;
mod extractor;
mod grid;
mod llm;
mod pdf;
mod pipeline;
mod schema;
mod supabase;

use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, patch, post},
    Router,
};
use batch_store::{Batch, BatchColumns, BatchStore};
use config::Settings;
use error::ApiError;
use export::{ExportFile, ExportFormat};
use extractor::Extractor;
use grid::{DocumentRow, LineItemRow};
use llm::openrouter::OpenRouterClient;
use pipeline::{HistoryStatus, ParseInput, ParseService, UploadedFile};
use schema::ExtractedDocument;
use serde::{Deserialize, Serialize};
use supabase::{HistoryItem, HistoryStore, SupabaseClient};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Application state shared across handlers.
#[derive(Clone)]
struct AppState {
    batches: BatchStore,
    parser: Arc<ParseService>,
    history: Option<Arc<dyn HistoryStore>>,
    default_export: ExportFormat,
}

impl AppState {
    fn new(
        extractor: Extractor,
        history: Option<Arc<dyn HistoryStore>>,
        default_export: ExportFormat,
        max_batches: usize,
    ) -> Self {
        Self {
            batches: BatchStore::new(max_batches),
            parser: Arc::new(ParseService::new(extractor, history.clone())),
            history,
            default_export,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "invoice_extractor=debug,tower_http=debug".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = Settings::from_env()?;

    let model = Arc::new(OpenRouterClient::new(&settings.llm));
    info!("OpenRouter client initialized (model={})", settings.llm.model);

    let history: Option<Arc<dyn HistoryStore>> = settings.supabase.as_ref().map(|s| {
        info!("History enabled ({})", s.url);
        Arc::new(SupabaseClient::new(s)) as Arc<dyn HistoryStore>
    });

    let state = AppState::new(
        Extractor::new(model, settings.llm.char_limit),
        history,
        settings.default_export,
        settings.max_batches,
    );

    let app = router(state, settings.max_upload_bytes);

    let listener = tokio::net::TcpListener::bind(&settings.bind_addr).await?;
    info!("Server listening on http://{}", settings.bind_addr);
    axum::serve(listener, app).await?;

    Ok(())
}

fn router(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/parse", post(parse_documents))
        .route("/history", get(get_history))
        .route("/export", post(export_rows))
        .route("/batches/{id}", get(get_batch).delete(delete_batch))
        .route("/batches/{id}/export", get(export_batch))
        .route("/batches/{id}/{table}", post(add_row))
        .route("/batches/{id}/{table}/{index}", patch(edit_row).delete(remove_row))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ============================================================================
// Handlers
// ============================================================================

/// Health check endpoint.
async fn health() -> &'static str {
    "ok"
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ParseResponse {
    batch_id: String,
    documents: Vec<ExtractedDocument>,
    #[serde(skip_serializing_if = "Option::is_none")]
    history: Option<HistoryStatus>,
}

/// Upload PDFs (`files`) or paste text (`text`) and extract invoice fields.
async fn parse_documents(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Json<ParseResponse>, ApiError> {
    let mut text: Option<String> = None;
    let mut files = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Multipart error: {}", e)))?
    {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("text") => {
                text = Some(field.text().await.map_err(|e| {
                    ApiError::BadRequest(format!("Failed to read text: {}", e))
                })?);
            }
            Some("files") => {
                let filename = field.file_name().map(str::to_string);
                let content_type = field.content_type().map(str::to_string);
                let data = field.bytes().await.map_err(|e| {
                    ApiError::BadRequest(format!("Failed to read file: {}", e))
                })?;
                files.push(UploadedFile {
                    filename,
                    content_type,
                    data: data.to_vec(),
                });
            }
            _ => {}
        }
    }

    let input = match text.filter(|t| !t.trim().is_empty()) {
        Some(text) => ParseInput::Text(text),
        None if files.is_empty() => {
            return Err(ApiError::BadRequest("No files uploaded.".to_string()))
        }
        None => ParseInput::Files(files),
    };

    let user_id = state.parser.resolve_user(bearer_token(&headers)).await;
    let outcome = state.parser.process(input, user_id.as_deref()).await;

    let batch_id = state.batches.insert(Batch::from_documents(&outcome.documents));
    info!(
        "Batch {} ready ({} documents, {} batches held)",
        batch_id,
        outcome.documents.len(),
        state.batches.len()
    );

    Ok(Json(ParseResponse {
        batch_id,
        documents: outcome.documents,
        history: outcome.history,
    }))
}

#[derive(Serialize)]
struct HistoryResponse {
    history: Vec<HistoryItem>,
}

/// Most recent scans of the signed-in user.
async fn get_history(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<HistoryResponse>, ApiError> {
    let store = state
        .history
        .as_ref()
        .ok_or_else(|| ApiError::Internal("History storage is not configured.".to_string()))?;

    let token = bearer_token(&headers).ok_or(ApiError::Unauthorized)?;
    let user_id = store.resolve_user(token).await.ok_or(ApiError::Unauthorized)?;

    let history = store
        .list(&user_id)
        .await
        .map_err(|e| ApiError::Internal(format!("Failed to load history: {}", e)))?;

    Ok(Json(HistoryResponse { history }))
}

#[derive(Serialize)]
struct BatchView {
    #[serde(flatten)]
    batch: Batch,
    columns: BatchColumns,
}

async fn get_batch(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<BatchView>, ApiError> {
    let batch = state.batches.get(&id).ok_or_else(|| batch_not_found(&id))?;
    Ok(Json(BatchView {
        batch,
        columns: BatchColumns::default(),
    }))
}

async fn delete_batch(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    if state.batches.remove(&id) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(batch_not_found(&id))
    }
}

/// The two editable tables of a batch.
#[derive(Debug, Clone, Copy)]
enum Table {
    Invoices,
    LineItems,
}

impl Table {
    fn parse(value: &str) -> Result<Self, ApiError> {
        match value {
            "invoices" => Ok(Self::Invoices),
            "line-items" => Ok(Self::LineItems),
            other => Err(ApiError::NotFound(format!("Unknown table: {}", other))),
        }
    }
}

#[derive(Serialize)]
#[serde(untagged)]
enum RowView {
    Invoice(DocumentRow),
    LineItem(LineItemRow),
}

#[derive(Serialize)]
#[serde(untagged)]
enum TableView {
    Invoices(Vec<DocumentRow>),
    LineItems(Vec<LineItemRow>),
}

impl TableView {
    fn of(batch: &Batch, table: Table) -> Self {
        match table {
            Table::Invoices => Self::Invoices(batch.invoices.clone()),
            Table::LineItems => Self::LineItems(batch.line_items.clone()),
        }
    }
}

#[derive(Deserialize)]
struct CellEdit {
    field: String,
    value: String,
}

/// Set one cell of a row.
async fn edit_row(
    State(state): State<AppState>,
    Path((id, table, index)): Path<(String, String, String)>,
    Json(edit): Json<CellEdit>,
) -> Result<Json<RowView>, ApiError> {
    let table = Table::parse(&table)?;
    let index = parse_index(&index)?;
    let row = state
        .batches
        .update(&id, |batch| match table {
            Table::Invoices => grid::edit_cell(&mut batch.invoices, index, &edit.field, edit.value)
                .map(|r| RowView::Invoice(r.clone())),
            Table::LineItems => grid::edit_cell(&mut batch.line_items, index, &edit.field, edit.value)
                .map(|r| RowView::LineItem(r.clone())),
        })
        .ok_or_else(|| batch_not_found(&id))??;
    Ok(Json(row))
}

/// Append an empty row.
async fn add_row(
    State(state): State<AppState>,
    Path((id, table)): Path<(String, String)>,
) -> Result<Json<TableView>, ApiError> {
    let table = Table::parse(&table)?;
    let view = state
        .batches
        .update(&id, |batch| {
            match table {
                Table::Invoices => grid::add_row(&mut batch.invoices),
                Table::LineItems => grid::add_row(&mut batch.line_items),
            }
            TableView::of(batch, table)
        })
        .ok_or_else(|| batch_not_found(&id))?;
    Ok(Json(view))
}

/// Remove a row.
async fn remove_row(
    State(state): State<AppState>,
    Path((id, table, index)): Path<(String, String, String)>,
) -> Result<Json<TableView>, ApiError> {
    let table = Table::parse(&table)?;
    let index = parse_index(&index)?;
    let view = state
        .batches
        .update(&id, |batch| {
            let removed = match table {
                Table::Invoices => grid::remove_row(&mut batch.invoices, index).map(|_| ()),
                Table::LineItems => grid::remove_row(&mut batch.line_items, index).map(|_| ()),
            };
            removed.map(|_| TableView::of(batch, table))
        })
        .ok_or_else(|| batch_not_found(&id))??;
    Ok(Json(view))
}

#[derive(Deserialize)]
struct ExportQuery {
    format: Option<String>,
}

impl ExportQuery {
    fn resolve(&self, default: ExportFormat) -> Result<ExportFormat, ApiError> {
        match &self.format {
            Some(f) => ExportFormat::parse(f)
                .ok_or_else(|| ApiError::BadRequest(format!("Unknown export format: {}", f))),
            None => Ok(default),
        }
    }
}

/// Download a batch as CSV or XLSX.
async fn export_batch(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<ExportQuery>,
) -> Result<Response, ApiError> {
    let format = query.resolve(state.default_export)?;
    let batch = state.batches.get(&id).ok_or_else(|| batch_not_found(&id))?;
    let file = export::export(format, &batch.invoices, &batch.line_items)?;
    Ok(file_response(file))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExportRequest {
    #[serde(default)]
    invoices: Vec<DocumentRow>,
    #[serde(default)]
    line_items: Vec<LineItemRow>,
}

/// Export rows held by the client.
async fn export_rows(
    State(state): State<AppState>,
    Query(query): Query<ExportQuery>,
    Json(request): Json<ExportRequest>,
) -> Result<Response, ApiError> {
    let format = query.resolve(state.default_export)?;
    let file = export::export(format, &request.invoices, &request.line_items)?;
    Ok(file_response(file))
}

// ============================================================================
// Helper functions
// ============================================================================

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

fn parse_index(index: &str) -> Result<usize, ApiError> {
    index
        .parse()
        .map_err(|_| ApiError::NotFound(format!("Row not found: {}", index)))
}

fn batch_not_found(id: &str) -> ApiError {
    ApiError::NotFound(format!("Batch not found: {}", id))
}

fn file_response(file: ExportFile) -> Response {
    info!("Exporting {} ({} bytes)", file.format.filename(), file.bytes.len());
    (
        [
            (header::CONTENT_TYPE, file.format.content_type().to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", file.format.filename()),
            ),
        ],
        file.bytes,
    )
        .into_response()
}
