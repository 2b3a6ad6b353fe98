//! Editable grid rows for reviewing extracted documents.
//!
//! Rows are flat string records keyed by column. Both tables (invoices and
//! line items) implement [`GridRow`] so edits and exports work the same way.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::schema::ExtractedDocument;

/// A grid column: its stable key (used in JSON and export headers) and display label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Column {
    pub key: &'static str,
    pub label: &'static str,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GridError {
    #[error("Unknown column: {0}")]
    UnknownColumn(String),
    #[error("Row {index} out of range ({len} rows)")]
    RowOutOfRange { index: usize, len: usize },
}

/// A row type that can be shown and edited in the grid.
pub trait GridRow: Default + Clone + Serialize {
    const COLUMNS: &'static [Column];

    fn get(&self, key: &str) -> Option<&str>;

    fn get_mut(&mut self, key: &str) -> Option<&mut String>;

    fn set(&mut self, key: &str, value: impl Into<String>) -> Result<(), GridError> {
        let cell = self
            .get_mut(key)
            .ok_or_else(|| GridError::UnknownColumn(key.to_string()))?;
        *cell = value.into();
        Ok(())
    }

    /// Cell values in column order.
    fn values(&self) -> Vec<&str> {
        Self::COLUMNS
            .iter()
            .map(|c| self.get(c.key).unwrap_or(""))
            .collect()
    }
}

/// One invoice per row.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DocumentRow {
    pub filename: String,
    pub document_type: String,
    pub vendor: String,
    pub invoice_number: String,
    pub po_number: String,
    pub date: String,
    pub due_date: String,
    pub total: String,
    pub currency: String,
    pub bill_to: String,
    pub notes: String,
}

impl From<&ExtractedDocument> for DocumentRow {
    fn from(doc: &ExtractedDocument) -> Self {
        Self {
            filename: doc.filename.clone(),
            document_type: doc.document_type.as_str().to_string(),
            vendor: doc.vendor.clone(),
            invoice_number: doc.invoice_number.clone(),
            po_number: doc.po_number.clone(),
            date: doc.date.clone(),
            due_date: doc.due_date.clone(),
            total: doc.total.clone(),
            currency: doc.currency.clone(),
            bill_to: doc.bill_to.clone(),
            notes: match &doc.error {
                Some(error) => format!("Error: {}", error),
                None => doc.raw_text_preview.clone(),
            },
        }
    }
}

impl GridRow for DocumentRow {
    const COLUMNS: &'static [Column] = &[
        Column { key: "filename", label: "Filename" },
        Column { key: "documentType", label: "Type" },
        Column { key: "vendor", label: "Vendor" },
        Column { key: "invoiceNumber", label: "Invoice #" },
        Column { key: "poNumber", label: "PO #" },
        Column { key: "date", label: "Date" },
        Column { key: "dueDate", label: "Due Date" },
        Column { key: "total", label: "Total" },
        Column { key: "currency", label: "Currency" },
        Column { key: "billTo", label: "Bill To" },
        Column { key: "notes", label: "Notes" },
    ];

    fn get(&self, key: &str) -> Option<&str> {
        let value = match key {
            "filename" => &self.filename,
            "documentType" => &self.document_type,
            "vendor" => &self.vendor,
            "invoiceNumber" => &self.invoice_number,
            "poNumber" => &self.po_number,
            "date" => &self.date,
            "dueDate" => &self.due_date,
            "total" => &self.total,
            "currency" => &self.currency,
            "billTo" => &self.bill_to,
            "notes" => &self.notes,
            _ => return None,
        };
        Some(value.as_str())
    }

    fn get_mut(&mut self, key: &str) -> Option<&mut String> {
        Some(match key {
            "filename" => &mut self.filename,
            "documentType" => &mut self.document_type,
            "vendor" => &mut self.vendor,
            "invoiceNumber" => &mut self.invoice_number,
            "poNumber" => &mut self.po_number,
            "date" => &mut self.date,
            "dueDate" => &mut self.due_date,
            "total" => &mut self.total,
            "currency" => &mut self.currency,
            "billTo" => &mut self.bill_to,
            "notes" => &mut self.notes,
            _ => return None,
        })
    }
}

/// One invoice line per row, tagged with the file it came from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LineItemRow {
    pub filename: String,
    pub description: String,
    pub quantity: String,
    pub unit_price: String,
    pub amount: String,
}

impl LineItemRow {
    /// Flatten the line items of every document into rows.
    pub fn from_documents(documents: &[ExtractedDocument]) -> Vec<Self> {
        documents
            .iter()
            .flat_map(|doc| {
                doc.line_items.iter().map(move |item| Self {
                    filename: doc.filename.clone(),
                    description: item.description.clone(),
                    quantity: item.quantity.clone(),
                    unit_price: item.unit_price.clone(),
                    amount: item.amount.clone(),
                })
            })
            .collect()
    }
}

impl GridRow for LineItemRow {
    const COLUMNS: &'static [Column] = &[
        Column { key: "filename", label: "Filename" },
        Column { key: "description", label: "Description" },
        Column { key: "quantity", label: "Qty" },
        Column { key: "unitPrice", label: "Unit Price" },
        Column { key: "amount", label: "Amount" },
    ];

    fn get(&self, key: &str) -> Option<&str> {
        let value = match key {
            "filename" => &self.filename,
            "description" => &self.description,
            "quantity" => &self.quantity,
            "unitPrice" => &self.unit_price,
            "amount" => &self.amount,
            _ => return None,
        };
        Some(value.as_str())
    }

    fn get_mut(&mut self, key: &str) -> Option<&mut String> {
        Some(match key {
            "filename" => &mut self.filename,
            "description" => &mut self.description,
            "quantity" => &mut self.quantity,
            "unitPrice" => &mut self.unit_price,
            "amount" => &mut self.amount,
            _ => return None,
        })
    }
}

// ============================================================================
// Row operations
// ============================================================================

/// Set one cell and return the updated row.
pub fn edit_cell<'a, R: GridRow>(
    rows: &'a mut [R],
    index: usize,
    key: &str,
    value: impl Into<String>,
) -> Result<&'a R, GridError> {
    let len = rows.len();
    let row = rows
        .get_mut(index)
        .ok_or(GridError::RowOutOfRange { index, len })?;
    row.set(key, value)?;
    Ok(row)
}

/// Append an empty row.
pub fn add_row<R: GridRow>(rows: &mut Vec<R>) {
    rows.push(R::default());
}

/// Remove the row at `index`.
pub fn remove_row<R: GridRow>(rows: &mut Vec<R>, index: usize) -> Result<R, GridError> {
    if index >= rows.len() {
        return Err(GridError::RowOutOfRange {
            index,
            len: rows.len(),
        });
    }
    Ok(rows.remove(index))
}
