//! Upload/paste orchestration: text extraction, LLM extraction and history.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::extractor::Extractor;
use crate::pdf::{extract_pdf_text, normalize_text};
use crate::schema::ExtractedDocument;
use crate::supabase::{HistoryStore, ScanSource};

/// Filename recorded for pasted text.
pub const PASTED_TEXT_FILENAME: &str = "pasted-text";

/// A `files` part of the upload form.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub filename: Option<String>,
    pub content_type: Option<String>,
    pub data: Vec<u8>,
}

impl UploadedFile {
    fn is_pdf(&self) -> bool {
        match &self.content_type {
            Some(ct) => ct.to_lowercase().contains("pdf"),
            None => self
                .filename
                .as_deref()
                .map(|f| f.to_lowercase().ends_with(".pdf"))
                .unwrap_or(false),
        }
    }
}

/// What the user submitted.
#[derive(Debug, Clone)]
pub enum ParseInput {
    Text(String),
    Files(Vec<UploadedFile>),
}

/// Outcome of persisting a request's documents.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryStatus {
    pub saved: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ParseOutcome {
    pub documents: Vec<ExtractedDocument>,
    /// Present only when the request belonged to a signed-in user.
    pub history: Option<HistoryStatus>,
}

/// Runs each input through extraction and, for signed-in users, history.
pub struct ParseService {
    extractor: Extractor,
    history: Option<Arc<dyn HistoryStore>>,
}

impl ParseService {
    pub fn new(extractor: Extractor, history: Option<Arc<dyn HistoryStore>>) -> Self {
        Self { extractor, history }
    }

    /// Resolve the owning user of a bearer token, if history is enabled.
    pub async fn resolve_user(&self, token: Option<&str>) -> Option<String> {
        match (&self.history, token) {
            (Some(store), Some(token)) => store.resolve_user(token).await,
            _ => None,
        }
    }

    pub async fn process(&self, input: ParseInput, user_id: Option<&str>) -> ParseOutcome {
        let mut documents = Vec::new();
        let mut history_error: Option<String> = None;

        let jobs: Vec<(ExtractedDocument, ScanSource)> = match input {
            ParseInput::Text(text) => {
                let text = normalize_text(&text);
                let doc = self.extractor.extract(PASTED_TEXT_FILENAME, &text).await;
                vec![(doc, ScanSource::Text)]
            }
            ParseInput::Files(files) => {
                let mut jobs = Vec::with_capacity(files.len());
                for file in files {
                    jobs.push((self.process_file(file).await, ScanSource::Pdf));
                }
                jobs
            }
        };

        for (doc, source) in jobs {
            if let (Some(store), Some(user_id)) = (&self.history, user_id) {
                if let Err(e) = store.save(user_id, &doc, source).await {
                    warn!("Failed to save history for {}: {:#}", doc.filename, e);
                    history_error = Some(e.to_string());
                }
            }
            documents.push(doc);
        }

        info!(
            "Processed {} document(s), {} failed",
            documents.len(),
            documents.iter().filter(|d| d.is_failed()).count()
        );

        let history = user_id.filter(|_| self.history.is_some()).map(|_| HistoryStatus {
            saved: history_error.is_none(),
            error: history_error,
        });

        ParseOutcome { documents, history }
    }

    async fn process_file(&self, file: UploadedFile) -> ExtractedDocument {
        let Some(filename) = file.filename.clone() else {
            return ExtractedDocument::failed("unknown", "Unsupported file type");
        };

        if !file.is_pdf() {
            info!("Rejecting {} ({:?})", filename, file.content_type);
            return ExtractedDocument::failed(filename, "Unsupported file type");
        }

        info!("Received file: {} ({} bytes)", filename, file.data.len());

        let raw = match extract_pdf_text(&file.data) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("PDF extraction failed for {}: {}", filename, e);
                return ExtractedDocument::failed(filename, format!("Failed to read PDF: {}", e));
            }
        };

        let text = normalize_text(&raw);
        if text.is_empty() {
            return ExtractedDocument::failed(filename, "No extractable text found in PDF.");
        }

        self.extractor.extract(&filename, &text).await
    }
}
