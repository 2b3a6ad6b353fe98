//! CSV and XLSX serialization of grid rows.

use rust_xlsxwriter::{Format, Workbook, Worksheet, XlsxError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::grid::{DocumentRow, GridRow, LineItemRow};

pub const INVOICES_SHEET: &str = "Invoices";
pub const LINE_ITEMS_SHEET: &str = "Line Items";

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("No data to export.")]
    Empty,
    #[error("Failed to write CSV: {0}")]
    Csv(#[from] csv::Error),
    #[error("Failed to write workbook: {0}")]
    Xlsx(#[from] XlsxError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Csv,
    Xlsx,
}

impl ExportFormat {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "csv" => Some(Self::Csv),
            "xlsx" | "excel" => Some(Self::Xlsx),
            _ => None,
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Csv => "text/csv; charset=utf-8",
            Self::Xlsx => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        }
    }

    pub fn filename(&self) -> &'static str {
        match self {
            Self::Csv => "invoices.csv",
            Self::Xlsx => "invoices.xlsx",
        }
    }
}

/// A rendered export ready to be sent as a download.
#[derive(Debug, Clone)]
pub struct ExportFile {
    pub format: ExportFormat,
    pub bytes: Vec<u8>,
}

/// Render invoices (and, for workbooks, line items) in `format`.
pub fn export(
    format: ExportFormat,
    invoices: &[DocumentRow],
    line_items: &[LineItemRow],
) -> Result<ExportFile, ExportError> {
    let bytes = match format {
        ExportFormat::Csv => to_csv(invoices)?.into_bytes(),
        ExportFormat::Xlsx => to_xlsx(invoices, line_items)?,
    };
    Ok(ExportFile { format, bytes })
}

/// Header of column keys, then one line per row with every value quoted.
/// Lines are `\n`-separated with no trailing newline.
pub fn to_csv<R: GridRow>(rows: &[R]) -> Result<String, ExportError> {
    if rows.is_empty() {
        return Err(ExportError::Empty);
    }

    let header: Vec<&str> = R::COLUMNS.iter().map(|c| c.key).collect();

    let mut writer = csv::WriterBuilder::new()
        .quote_style(csv::QuoteStyle::Always)
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(Vec::new());

    for row in rows {
        writer.write_record(row.values())?;
    }

    let body = writer
        .into_inner()
        .map_err(|e| ExportError::Csv(e.into_error().into()))?;
    let body = String::from_utf8_lossy(&body);

    Ok(format!("{}\n{}", header.join(","), body.trim_end_matches('\n')))
}

/// Workbook with an `Invoices` sheet, plus a `Line Items` sheet when there are any.
pub fn to_xlsx(invoices: &[DocumentRow], line_items: &[LineItemRow]) -> Result<Vec<u8>, ExportError> {
    if invoices.is_empty() {
        return Err(ExportError::Empty);
    }

    let mut workbook = Workbook::new();
    let header_format = Format::new().set_bold();

    write_sheet(workbook.add_worksheet(), INVOICES_SHEET, invoices, &header_format)?;
    if !line_items.is_empty() {
        write_sheet(workbook.add_worksheet(), LINE_ITEMS_SHEET, line_items, &header_format)?;
    }

    Ok(workbook.save_to_buffer()?)
}

fn write_sheet<R: GridRow>(
    sheet: &mut Worksheet,
    name: &str,
    rows: &[R],
    header_format: &Format,
) -> Result<(), XlsxError> {
    sheet.set_name(name)?;

    for (col, column) in R::COLUMNS.iter().enumerate() {
        sheet.write_string_with_format(0, col as u16, column.key, header_format)?;
    }

    for (i, row) in rows.iter().enumerate() {
        for (col, value) in row.values().into_iter().enumerate() {
            if !value.is_empty() {
                sheet.write_string(i as u32 + 1, col as u16, value)?;
            }
        }
    }

    sheet.autofit();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use calamine::{open_workbook_from_rs, Data, Reader, Xlsx};
    use std::io::Cursor;

    fn invoice(vendor: &str, notes: &str) -> DocumentRow {
        DocumentRow {
            filename: "a.pdf".to_string(),
            vendor: vendor.to_string(),
            total: "10.00".to_string(),
            notes: notes.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_csv_layout() {
        let csv = to_csv(&[invoice("Acme", "")]).unwrap();
        let lines: Vec<&str> = csv.split('\n').collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(
            lines[0],
            "filename,documentType,vendor,invoiceNumber,poNumber,date,dueDate,total,currency,billTo,notes"
        );
        assert_eq!(
            lines[1],
            r#""a.pdf","","Acme","","","","","10.00","","","""#
        );
    }

    #[test]
    fn test_csv_escapes_quotes_and_newlines() {
        let csv = to_csv(&[invoice("Acme \"Widgets\", Inc", "line one\nline two")]).unwrap();
        assert!(csv.contains(r#""Acme ""Widgets"", Inc""#));
        assert!(csv.ends_with("\"line one\nline two\""));
    }

    #[test]
    fn test_csv_line_items() {
        let rows = vec![LineItemRow {
            description: "Widget".to_string(),
            ..Default::default()
        }];
        let csv = to_csv(&rows).unwrap();
        assert!(csv.starts_with("filename,description,quantity,unitPrice,amount\n"));
    }

    #[test]
    fn test_empty_export_is_rejected() {
        assert!(matches!(to_csv::<DocumentRow>(&[]), Err(ExportError::Empty)));
        assert!(matches!(to_xlsx(&[], &[]), Err(ExportError::Empty)));
        assert_eq!(ExportError::Empty.to_string(), "No data to export.");
    }

    #[test]
    fn test_xlsx_round_trip_through_calamine() {
        let items = vec![LineItemRow {
            filename: "a.pdf".to_string(),
            description: "Widget".to_string(),
            quantity: "2".to_string(),
            unit_price: "5.00".to_string(),
            amount: "10.00".to_string(),
        }];
        let bytes = to_xlsx(&[invoice("Acme", "ok")], &items).unwrap();

        let mut workbook: Xlsx<_> = open_workbook_from_rs(Cursor::new(bytes)).unwrap();
        assert_eq!(workbook.sheet_names(), vec![INVOICES_SHEET, LINE_ITEMS_SHEET]);

        let range = workbook.worksheet_range(INVOICES_SHEET).unwrap();
        assert_eq!(range.get((0, 0)), Some(&Data::String("filename".to_string())));
        assert_eq!(range.get((1, 2)), Some(&Data::String("Acme".to_string())));

        let range = workbook.worksheet_range(LINE_ITEMS_SHEET).unwrap();
        assert_eq!(range.get((1, 1)), Some(&Data::String("Widget".to_string())));
    }

    #[test]
    fn test_xlsx_without_line_items_has_one_sheet() {
        let bytes = to_xlsx(&[invoice("Acme", "")], &[]).unwrap();
        let workbook: Xlsx<_> = open_workbook_from_rs(Cursor::new(bytes)).unwrap();
        assert_eq!(workbook.sheet_names(), vec![INVOICES_SHEET]);
    }

    #[test]
    fn test_format_parsing() {
        assert_eq!(ExportFormat::parse("CSV"), Some(ExportFormat::Csv));
        assert_eq!(ExportFormat::parse("excel"), Some(ExportFormat::Xlsx));
        assert_eq!(ExportFormat::parse("pdf"), None);
        assert_eq!(ExportFormat::Xlsx.filename(), "invoices.xlsx");
    }
}
