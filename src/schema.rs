//! Extracted document types returned by `/parse`.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single processed invoice (or a failed attempt at one).
///
/// Every text field is always present; fields the model could not fill are
/// empty strings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedDocument {
    pub id: String,
    pub filename: String,
    pub document_type: DocumentType,
    pub vendor: String,
    pub invoice_number: String,
    pub po_number: String,
    pub date: String,
    pub due_date: String,
    pub total: String,
    pub currency: String,
    pub bill_to: String,
    #[serde(default)]
    pub line_items: Vec<LineItem>,
    pub raw_text_preview: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExtractedDocument {
    /// An empty document for `filename` with a fresh id.
    pub fn new(filename: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            filename: filename.into(),
            ..Default::default()
        }
    }

    /// A document that carries only an error message.
    pub fn failed(filename: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::new(filename)
        }
    }

    pub fn is_failed(&self) -> bool {
        self.error.is_some()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItem {
    pub description: String,
    pub quantity: String,
    pub unit_price: String,
    pub amount: String,
}

/// Fixed set of document kinds the model's free-text guess is mapped onto.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    Invoice,
    Receipt,
    PurchaseOrder,
    CreditNote,
    Quote,
    Statement,
    #[default]
    Other,
}

impl DocumentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Invoice => "invoice",
            Self::Receipt => "receipt",
            Self::PurchaseOrder => "purchase_order",
            Self::CreditNote => "credit_note",
            Self::Quote => "quote",
            Self::Statement => "statement",
            Self::Other => "other",
        }
    }

    /// Classify a free-text guess such as "Tax Invoice" or "Credit memo".
    ///
    /// Matching is word based and case-insensitive; the first rule that
    /// matches wins, so "credit note invoice" is a credit note.
    pub fn classify(guess: &str) -> Self {
        let lowered = guess.to_lowercase();
        let words: Vec<&str> = lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();
        let has = |w: &str| words.iter().any(|x| *x == w);
        let has_pair = |a: &str, b: &str| words.windows(2).any(|p| p[0] == a && p[1] == b);

        if has_pair("credit", "note") || has_pair("credit", "memo") || has("creditnote") {
            Self::CreditNote
        } else if has_pair("purchase", "order") || has("po") {
            Self::PurchaseOrder
        } else if has("receipt") {
            Self::Receipt
        } else if ["quote", "quotation", "estimate", "proposal"].iter().any(|w| has(*w)) {
            Self::Quote
        } else if has("statement") {
            Self::Statement
        } else if has("invoice") || has("bill") {
            Self::Invoice
        } else {
            Self::Other
        }
    }
}

impl std::fmt::Display for DocumentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_keywords() {
        assert_eq!(DocumentType::classify("Tax Invoice"), DocumentType::Invoice);
        assert_eq!(DocumentType::classify("utility BILL"), DocumentType::Invoice);
        assert_eq!(DocumentType::classify("Sales receipt"), DocumentType::Receipt);
        assert_eq!(DocumentType::classify("Purchase Order"), DocumentType::PurchaseOrder);
        assert_eq!(DocumentType::classify("PO"), DocumentType::PurchaseOrder);
        assert_eq!(DocumentType::classify("Quotation"), DocumentType::Quote);
        assert_eq!(DocumentType::classify("Account statement"), DocumentType::Statement);
    }

    #[test]
    fn test_classify_precedence() {
        assert_eq!(DocumentType::classify("credit note for invoice 42"), DocumentType::CreditNote);
        assert_eq!(DocumentType::classify("Credit-Memo"), DocumentType::CreditNote);
        assert_eq!(DocumentType::classify("invoice for purchase order"), DocumentType::PurchaseOrder);
    }

    #[test]
    fn test_classify_fallback() {
        assert_eq!(DocumentType::classify(""), DocumentType::Other);
        assert_eq!(DocumentType::classify("letter"), DocumentType::Other);
        // "report" must not match "po" by substring
        assert_eq!(DocumentType::classify("report"), DocumentType::Other);
    }

    #[test]
    fn test_document_serialization() {
        let doc = ExtractedDocument::failed("scan.pdf", "Unsupported file type");
        let value = serde_json::to_value(&doc).unwrap();
        assert_eq!(value["filename"], "scan.pdf");
        assert_eq!(value["documentType"], "other");
        assert_eq!(value["invoiceNumber"], "");
        assert_eq!(value["error"], "Unsupported file type");
        assert!(value.get("contentHash").is_none());
        assert!(doc.is_failed());
    }
}
