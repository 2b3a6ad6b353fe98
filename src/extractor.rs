//! Invoice field extraction via an LLM with a fixed JSON schema.

use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::llm::{ChatModel, Message, ResponseSchema};
use crate::pdf::{content_hash, truncate_for_context};
use crate::schema::{DocumentType, ExtractedDocument, LineItem};

const SYSTEM_PROMPT: &str =
    "You extract invoice fields from raw text. Return only JSON that matches the schema.";

/// Extraction pipeline step: normalized text in, [`ExtractedDocument`] out.
pub struct Extractor {
    model: Arc<dyn ChatModel>,
    char_limit: usize,
    schema: ResponseSchema,
}

impl Extractor {
    pub fn new(model: Arc<dyn ChatModel>, char_limit: usize) -> Self {
        Self {
            model,
            char_limit,
            schema: invoice_schema(),
        }
    }

    /// Extract invoice fields from already-normalized text.
    ///
    /// Never fails: model and parse errors are recorded on the document.
    pub async fn extract(&self, filename: &str, text: &str) -> ExtractedDocument {
        info!(
            "Starting extraction for: {} ({} chars, model={})",
            filename,
            text.chars().count(),
            self.model.name()
        );

        let messages = vec![
            Message::system(SYSTEM_PROMPT),
            Message::user(format!(
                "Filename: {}\n\nInvoice text:\n{}",
                filename,
                truncate_for_context(text, self.char_limit)
            )),
        ];

        let mut document = match self.model.complete_json(messages, &self.schema).await {
            Ok(Some(output)) => match parse_llm_json::<ModelInvoice>(&output) {
                Ok(invoice) => invoice.into_document(filename),
                Err(e) => {
                    warn!("Failed to parse model response for {}: {:#}", filename, e);
                    ExtractedDocument::failed(filename, "Failed to parse model response.")
                }
            },
            Ok(None) => {
                warn!("Model returned no output for {}", filename);
                ExtractedDocument::failed(filename, "No output from model.")
            }
            Err(e) => {
                warn!("Extraction request failed for {}: {:#}", filename, e);
                ExtractedDocument::failed(filename, format!("Extraction request failed: {}", e))
            }
        };

        document.content_hash = Some(content_hash(text));

        debug!(
            "Extraction finished for {}: type={}, {} line item(s), error={:?}",
            filename,
            document.document_type,
            document.line_items.len(),
            document.error
        );

        document
    }
}

/// The strict response schema sent with every extraction request.
pub fn invoice_schema() -> ResponseSchema {
    let text = json!({ "type": "string" });
    ResponseSchema {
        name: "invoice_extraction".to_string(),
        schema: json!({
            "type": "object",
            "properties": {
                "vendor": text,
                "invoiceNumber": text,
                "poNumber": text,
                "date": text,
                "dueDate": text,
                "total": text,
                "currency": text,
                "billTo": text,
                "documentType": text,
                "rawTextSummary": text,
                "lineItems": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "description": text,
                            "quantity": text,
                            "unitPrice": text,
                            "amount": text
                        },
                        "required": ["description", "quantity", "unitPrice", "amount"],
                        "additionalProperties": false
                    }
                }
            },
            "required": [
                "vendor",
                "invoiceNumber",
                "poNumber",
                "date",
                "dueDate",
                "total",
                "currency",
                "billTo",
                "documentType",
                "rawTextSummary",
                "lineItems"
            ],
            "additionalProperties": false
        }),
    }
}

// ============================================================================
// Model response parsing
// ============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ModelInvoice {
    #[serde(deserialize_with = "lenient_string")]
    vendor: String,
    #[serde(deserialize_with = "lenient_string")]
    invoice_number: String,
    #[serde(deserialize_with = "lenient_string")]
    po_number: String,
    #[serde(deserialize_with = "lenient_string")]
    date: String,
    #[serde(deserialize_with = "lenient_string")]
    due_date: String,
    #[serde(deserialize_with = "lenient_string")]
    total: String,
    #[serde(deserialize_with = "lenient_string")]
    currency: String,
    #[serde(deserialize_with = "lenient_string")]
    bill_to: String,
    #[serde(deserialize_with = "lenient_string")]
    document_type: String,
    #[serde(deserialize_with = "lenient_string")]
    raw_text_summary: String,
    #[serde(deserialize_with = "lenient_items")]
    line_items: Vec<ModelLineItem>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ModelLineItem {
    #[serde(deserialize_with = "lenient_string")]
    description: String,
    #[serde(deserialize_with = "lenient_string")]
    quantity: String,
    #[serde(deserialize_with = "lenient_string")]
    unit_price: String,
    #[serde(deserialize_with = "lenient_string")]
    amount: String,
}

impl ModelInvoice {
    fn into_document(self, filename: &str) -> ExtractedDocument {
        ExtractedDocument {
            document_type: DocumentType::classify(&self.document_type),
            vendor: self.vendor,
            invoice_number: self.invoice_number,
            po_number: self.po_number,
            date: self.date,
            due_date: self.due_date,
            total: self.total,
            currency: self.currency,
            bill_to: self.bill_to,
            raw_text_preview: self.raw_text_summary,
            line_items: self
                .line_items
                .into_iter()
                .map(|item| LineItem {
                    description: item.description,
                    quantity: item.quantity,
                    unit_price: item.unit_price,
                    amount: item.amount,
                })
                .collect(),
            ..ExtractedDocument::new(filename)
        }
    }
}

/// Accept strings, numbers, booleans or null; anything missing becomes "".
fn lenient_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => s.trim().to_string(),
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::Bool(b) => b.to_string(),
        _ => String::new(),
    })
}

fn lenient_items<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<ModelLineItem>, D::Error> {
    Ok(Option::<Vec<ModelLineItem>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Parse JSON from a model response. Markdown code fences are only stripped
/// when the response is not JSON as-is.
fn parse_llm_json<T: serde::de::DeserializeOwned>(response: &str) -> Result<T> {
    let trimmed = response.trim();
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Ok(value);
    }

    let json_str = if trimmed.contains("```json") {
        trimmed
            .split("```json")
            .nth(1)
            .and_then(|s| s.split("```").next())
            .unwrap_or(trimmed)
            .trim()
    } else if trimmed.contains("```") {
        trimmed.split("```").nth(1).unwrap_or(trimmed).trim()
    } else {
        trimmed
    };

    serde_json::from_str(json_str).context(format!(
        "Invalid model JSON: {}",
        &json_str.chars().take(200).collect::<String>()
    ))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Chat model that replays a canned response and records prompts.
    pub(crate) struct ScriptedModel {
        response: Result<Option<String>, String>,
        pub prompts: Mutex<Vec<Vec<Message>>>,
    }

    impl ScriptedModel {
        pub fn replying(output: &str) -> Self {
            Self {
                response: Ok(Some(output.to_string())),
                prompts: Mutex::new(Vec::new()),
            }
        }

        pub fn silent() -> Self {
            Self {
                response: Ok(None),
                prompts: Mutex::new(Vec::new()),
            }
        }

        pub fn failing(message: &str) -> Self {
            Self {
                response: Err(message.to_string()),
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait::async_trait]
    impl ChatModel for ScriptedModel {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn complete_json(
            &self,
            messages: Vec<Message>,
            _schema: &ResponseSchema,
        ) -> Result<Option<String>> {
            self.prompts.lock().unwrap().push(messages);
            self.response.clone().map_err(|e| anyhow::anyhow!(e))
        }
    }

    pub(crate) const ACME_INVOICE: &str = r#"{
        "vendor": "Acme Corp",
        "invoiceNumber": "INV-1001",
        "poNumber": "PO-77",
        "date": "2024-03-01",
        "dueDate": "2024-03-31",
        "total": "1,250.00",
        "currency": "USD",
        "billTo": "Globex Ltd",
        "documentType": "Tax Invoice",
        "rawTextSummary": "Invoice from Acme for widgets.",
        "lineItems": [
            {"description": "Widget", "quantity": "10", "unitPrice": "125.00", "amount": "1250.00"}
        ]
    }"#;

    fn extractor(model: ScriptedModel) -> (Extractor, Arc<ScriptedModel>) {
        let model = Arc::new(model);
        (Extractor::new(model.clone(), 12_000), model)
    }

    #[tokio::test]
    async fn test_extract_full_response() {
        let (extractor, model) = extractor(ScriptedModel::replying(ACME_INVOICE));
        let doc = extractor.extract("acme.pdf", "Invoice INV-1001").await;

        assert_eq!(doc.filename, "acme.pdf");
        assert_eq!(doc.vendor, "Acme Corp");
        assert_eq!(doc.invoice_number, "INV-1001");
        assert_eq!(doc.document_type, DocumentType::Invoice);
        assert_eq!(doc.raw_text_preview, "Invoice from Acme for widgets.");
        assert_eq!(doc.line_items.len(), 1);
        assert_eq!(doc.line_items[0].unit_price, "125.00");
        assert!(doc.error.is_none());
        assert_eq!(doc.content_hash, Some(content_hash("Invoice INV-1001")));

        let prompts = model.prompts.lock().unwrap();
        assert_eq!(prompts[0][0].content, SYSTEM_PROMPT);
        assert_eq!(
            prompts[0][1].content,
            "Filename: acme.pdf\n\nInvoice text:\nInvoice INV-1001"
        );
    }

    #[tokio::test]
    async fn test_missing_fields_become_empty() {
        let (extractor, _) = extractor(ScriptedModel::replying(
            "```json\n{\"vendor\": \"Acme\", \"total\": 99.5, \"dueDate\": null}\n```",
        ));
        let doc = extractor.extract("a.pdf", "text").await;

        assert_eq!(doc.vendor, "Acme");
        assert_eq!(doc.total, "99.5");
        assert_eq!(doc.due_date, "");
        assert_eq!(doc.invoice_number, "");
        assert_eq!(doc.document_type, DocumentType::Other);
        assert!(doc.line_items.is_empty());
        assert!(doc.error.is_none());
    }

    #[tokio::test]
    async fn test_backticks_inside_string_values() {
        let (extractor, _) = extractor(ScriptedModel::replying(
            r#"{"vendor":"Acme","rawTextSummary":"Notes mention ```code``` block"}"#,
        ));
        let doc = extractor.extract("a.pdf", "text").await;

        assert!(doc.error.is_none());
        assert_eq!(doc.vendor, "Acme");
        assert_eq!(doc.raw_text_preview, "Notes mention ```code``` block");
    }

    #[test]
    fn test_parse_llm_json_fences() {
        let plain: serde_json::Value = parse_llm_json("```\n{\"a\": 1}\n```").unwrap();
        assert_eq!(plain["a"], 1);
        let tagged: serde_json::Value =
            parse_llm_json("Here you go:\n```json\n{\"a\": 2}\n```").unwrap();
        assert_eq!(tagged["a"], 2);
        assert!(parse_llm_json::<serde_json::Value>("no json here").is_err());
    }

    #[tokio::test]
    async fn test_unparseable_response() {
        let (extractor, _) = extractor(ScriptedModel::replying("Sorry, I cannot help."));
        let doc = extractor.extract("a.pdf", "text").await;
        assert_eq!(doc.error.as_deref(), Some("Failed to parse model response."));
        assert_eq!(doc.vendor, "");
    }

    #[tokio::test]
    async fn test_no_output() {
        let (extractor, _) = extractor(ScriptedModel::silent());
        let doc = extractor.extract("a.pdf", "text").await;
        assert_eq!(doc.error.as_deref(), Some("No output from model."));
    }

    #[tokio::test]
    async fn test_request_failure_is_recorded() {
        let (extractor, _) = extractor(ScriptedModel::failing("connection refused"));
        let doc = extractor.extract("a.pdf", "text").await;
        assert_eq!(
            doc.error.as_deref(),
            Some("Extraction request failed: connection refused")
        );
    }

    #[tokio::test]
    async fn test_text_is_truncated() {
        let model = Arc::new(ScriptedModel::replying("{}"));
        let extractor = Extractor::new(model.clone(), 5);
        extractor.extract("pasted-text", "abcdefghij").await;

        let prompts = model.prompts.lock().unwrap();
        assert!(prompts[0][1].content.ends_with("Invoice text:\nabcde"));
    }

    #[test]
    fn test_schema_requires_every_property() {
        let schema = invoice_schema().schema;
        let properties = schema["properties"].as_object().unwrap();
        let required = schema["required"].as_array().unwrap();
        assert_eq!(properties.len(), required.len());
        assert_eq!(schema["additionalProperties"], false);
    }
}
