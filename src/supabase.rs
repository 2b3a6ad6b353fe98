//! Supabase client for user resolution and scan history.
//!
//! Every processed document is stored as two related rows: a `scans` header
//! and an `invoice_results` row pointing at it.

use anyhow::{anyhow, Context, Result};
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::config::SupabaseSettings;
use crate::schema::ExtractedDocument;

/// Number of scans returned by a history listing.
pub const HISTORY_LIMIT: usize = 20;

const HISTORY_SELECT: &str =
    "id,filename,created_at,invoice_results(id,vendor,invoice_number,total,currency,document_type)";

/// Where a document's text came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanSource {
    Pdf,
    Text,
}

impl ScanSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Text => "text",
        }
    }
}

/// One scan in the user's history, with its (abbreviated) results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryItem {
    pub id: String,
    pub filename: Option<String>,
    pub created_at: String,
    pub invoice_results: Option<Vec<InvoiceResultSummary>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceResultSummary {
    pub id: String,
    pub vendor: Option<String>,
    pub invoice_number: Option<String>,
    pub total: Option<String>,
    pub currency: Option<String>,
    #[serde(default)]
    pub document_type: Option<String>,
}

/// Persistence seam for scan history.
#[async_trait::async_trait]
pub trait HistoryStore: Send + Sync {
    /// Resolve a user id from a bearer token. `None` when the token is not valid.
    async fn resolve_user(&self, token: &str) -> Option<String>;

    /// Persist one processed document for `user_id`.
    async fn save(&self, user_id: &str, document: &ExtractedDocument, source: ScanSource) -> Result<()>;

    /// Most recent scans of `user_id`, newest first.
    async fn list(&self, user_id: &str) -> Result<Vec<HistoryItem>>;
}

/// Supabase REST (PostgREST + GoTrue) client using the service role key.
#[derive(Clone)]
pub struct SupabaseClient {
    client: Client,
    base_url: String,
    service_role_key: String,
}

impl SupabaseClient {
    pub fn new(settings: &SupabaseSettings) -> Self {
        Self {
            client: Client::new(),
            base_url: settings.url.clone(),
            service_role_key: settings.service_role_key.clone(),
        }
    }

    fn rest(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header("apikey", &self.service_role_key)
            .bearer_auth(&self.service_role_key)
    }

    /// Insert the scan header and return its id.
    async fn insert_scan(
        &self,
        user_id: &str,
        document: &ExtractedDocument,
        source: ScanSource,
    ) -> Result<String> {
        let url = format!("{}/rest/v1/scans?select=id", self.base_url);

        let resp = self
            .rest(self.client.post(&url))
            .header("Prefer", "return=representation")
            .json(&scan_row(user_id, document, source))
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(anyhow!("{}", error_message(&text, status)));
        }

        let rows: Vec<IdRow> = resp.json().await.context("Failed to save scan.")?;
        rows.into_iter()
            .next()
            .map(|r| r.id)
            .ok_or_else(|| anyhow!("Failed to save scan."))
    }

    /// Insert the extracted result linked to `scan_id`.
    async fn insert_result(&self, scan_id: &str, document: &ExtractedDocument) -> Result<()> {
        let url = format!("{}/rest/v1/invoice_results", self.base_url);

        let resp = self
            .rest(self.client.post(&url))
            .header("Prefer", "return=minimal")
            .json(&result_row(scan_id, document))
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(anyhow!("{}", error_message(&text, status)));
        }

        Ok(())
    }

    /// Newest scans of `user_id` with their results embedded.
    fn history_request(&self, user_id: &str) -> Result<reqwest::Request> {
        let url = format!("{}/rest/v1/scans", self.base_url);
        let request = self
            .rest(self.client.get(&url))
            .query(&[
                ("select", HISTORY_SELECT.to_string()),
                ("user_id", format!("eq.{}", user_id)),
                ("order", "created_at.desc".to_string()),
                ("limit", HISTORY_LIMIT.to_string()),
            ])
            .build()?;
        Ok(request)
    }
}

#[async_trait::async_trait]
impl HistoryStore for SupabaseClient {
    async fn resolve_user(&self, token: &str) -> Option<String> {
        let url = format!("{}/auth/v1/user", self.base_url);

        let resp = match self
            .client
            .get(&url)
            .header("apikey", &self.service_role_key)
            .bearer_auth(token)
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) => {
                debug!("User lookup failed: {}", e);
                return None;
            }
        };

        if !resp.status().is_success() {
            debug!("User lookup rejected: {}", resp.status());
            return None;
        }

        resp.json::<IdRow>().await.ok().map(|user| user.id)
    }

    async fn save(&self, user_id: &str, document: &ExtractedDocument, source: ScanSource) -> Result<()> {
        let scan_id = self.insert_scan(user_id, document, source).await?;
        self.insert_result(&scan_id, document).await?;

        info!(
            "Saved scan {} for {} ({})",
            scan_id,
            document.filename,
            source.as_str()
        );
        Ok(())
    }

    async fn list(&self, user_id: &str) -> Result<Vec<HistoryItem>> {
        let request = self.history_request(user_id)?;
        let resp = self.client.execute(request).await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(anyhow!("{}", error_message(&text, status)));
        }

        Ok(resp.json().await?)
    }
}

// ============================================================================
// Supabase row types
// ============================================================================

/// Body of a `scans` insert.
fn scan_row(user_id: &str, document: &ExtractedDocument, source: ScanSource) -> Value {
    json!({
        "user_id": user_id,
        "source": source.as_str(),
        "filename": document.filename,
        "status": if document.is_failed() { "failed" } else { "parsed" },
        "content_hash": document.content_hash,
    })
}

/// Body of an `invoice_results` insert.
fn result_row(scan_id: &str, document: &ExtractedDocument) -> Value {
    json!({
        "scan_id": scan_id,
        "vendor": document.vendor,
        "invoice_number": document.invoice_number,
        "po_number": document.po_number,
        "date": document.date,
        "due_date": document.due_date,
        "total": document.total,
        "currency": document.currency,
        "bill_to": document.bill_to,
        "raw_text_summary": document.raw_text_preview,
        "document_type": document.document_type.as_str(),
        "line_items": document.line_items,
    })
}

#[derive(Debug, Deserialize)]
struct IdRow {
    id: String,
}

#[derive(Debug, Deserialize)]
struct PostgrestError {
    message: String,
}

/// Prefer PostgREST's `message` over the raw body.
fn error_message(body: &str, status: reqwest::StatusCode) -> String {
    match serde_json::from_str::<PostgrestError>(body) {
        Ok(err) => err.message,
        Err(_) if body.trim().is_empty() => format!("Supabase request failed ({})", status),
        Err(_) => format!("Supabase request failed ({}): {}", status, body.trim()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{DocumentType, LineItem};
    use reqwest::StatusCode;

    fn client() -> SupabaseClient {
        SupabaseClient::new(&SupabaseSettings {
            url: "https://abc.supabase.co".to_string(),
            service_role_key: "service".to_string(),
        })
    }

    #[test]
    fn test_scan_row_for_failed_document() {
        let doc = ExtractedDocument::failed("notes.txt", "Unsupported file type");
        let row = scan_row("user-1", &doc, ScanSource::Pdf);
        assert_eq!(
            row,
            json!({
                "user_id": "user-1",
                "source": "pdf",
                "filename": "notes.txt",
                "status": "failed",
                "content_hash": null,
            })
        );
    }

    #[test]
    fn test_rows_for_parsed_document() {
        let doc = ExtractedDocument {
            vendor: "Acme Corp".to_string(),
            invoice_number: "INV-1001".to_string(),
            total: "1250.00".to_string(),
            document_type: DocumentType::CreditNote,
            raw_text_preview: "Credit for widgets.".to_string(),
            content_hash: Some("abc123".to_string()),
            line_items: vec![LineItem {
                description: "Widget".to_string(),
                quantity: "10".to_string(),
                unit_price: "125.00".to_string(),
                amount: "1250.00".to_string(),
            }],
            ..ExtractedDocument::new("pasted-text")
        };

        let scan = scan_row("user-1", &doc, ScanSource::Text);
        assert_eq!(scan["status"], "parsed");
        assert_eq!(scan["source"], "text");
        assert_eq!(scan["content_hash"], "abc123");

        let result = result_row("scan-9", &doc);
        assert_eq!(result["scan_id"], "scan-9");
        assert_eq!(result["invoice_number"], "INV-1001");
        assert_eq!(result["raw_text_summary"], "Credit for widgets.");
        assert_eq!(result["document_type"], "credit_note");
        assert_eq!(
            result["line_items"],
            json!([{"description": "Widget", "quantity": "10", "unitPrice": "125.00", "amount": "1250.00"}])
        );
        assert_eq!(result.as_object().unwrap().len(), 12);
    }

    #[test]
    fn test_history_request_encodes_user_id() {
        let request = client().history_request("a&b=c").unwrap();
        let pairs: Vec<(String, String)> = request
            .url()
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();

        assert_eq!(request.url().path(), "/rest/v1/scans");
        assert!(pairs.contains(&("user_id".to_string(), "eq.a&b=c".to_string())));
        assert!(pairs.contains(&("order".to_string(), "created_at.desc".to_string())));
        assert!(pairs.contains(&("limit".to_string(), "20".to_string())));
        assert!(!pairs.iter().any(|(k, _)| k == "b"));
        assert_eq!(request.headers()["apikey"], "service");
    }

    #[test]
    fn test_error_message_prefers_postgrest_message() {
        let body = r#"{"code":"23505","message":"duplicate key value","details":null}"#;
        assert_eq!(error_message(body, StatusCode::CONFLICT), "duplicate key value");
    }

    #[test]
    fn test_error_message_fallbacks() {
        assert_eq!(
            error_message("", StatusCode::BAD_GATEWAY),
            "Supabase request failed (502 Bad Gateway)"
        );
        assert_eq!(
            error_message("boom", StatusCode::INTERNAL_SERVER_ERROR),
            "Supabase request failed (500 Internal Server Error): boom"
        );
    }

    #[test]
    fn test_history_item_from_postgrest() {
        let body = r#"[{
            "id": "s1",
            "filename": "acme.pdf",
            "created_at": "2024-03-01T10:00:00+00:00",
            "invoice_results": [{"id": "r1", "vendor": "Acme", "invoice_number": "INV-1", "total": "10", "currency": null}]
        }]"#;
        let items: Vec<HistoryItem> = serde_json::from_str(body).unwrap();
        let results = items[0].invoice_results.as_ref().unwrap();
        assert_eq!(results[0].vendor.as_deref(), Some("Acme"));
        assert!(results[0].currency.is_none());
        assert!(results[0].document_type.is_none());
    }
}
