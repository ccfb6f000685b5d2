//! CSV export of an order's items.
//!
//! Two groupings: one row per item sorted by person (handing each
//! participant their share), or one row per distinct product line (placing
//! the actual vendor order). Quantities are free text, so product totals sum
//! the integral ones and carry the rest verbatim.

use std::collections::HashMap;

use serde::Deserialize;
use thiserror::Error;

use cartpool_core::{Item, Order};

/// How export rows are grouped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportGroup {
    /// One row per item, sorted by the person who added it.
    #[default]
    Person,
    /// Identical product lines merged, with contributors listed.
    Product,
}

impl ExportGroup {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Person => "person",
            Self::Product => "product",
        }
    }
}

/// A rendered CSV download.
#[derive(Debug, Clone)]
pub struct CsvExport {
    /// Suggested download filename.
    pub filename: String,
    /// CSV body including the header row.
    pub body: String,
}

/// Errors that can occur while rendering an export.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("csv write error: {0}")]
    Csv(#[from] csv::Error),
    #[error("csv produced invalid utf-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// Render an order's items as CSV.
///
/// # Errors
///
/// Returns `ExportError` if CSV serialization fails.
pub fn export_csv(
    order: &Order,
    items: &[Item],
    group: ExportGroup,
) -> Result<CsvExport, ExportError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    match group {
        ExportGroup::Person => write_person_rows(&mut writer, items)?,
        ExportGroup::Product => write_product_rows(&mut writer, items)?,
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| ExportError::Csv(e.into_error().into()))?;
    let body = String::from_utf8(bytes)?;

    let id = order.id.to_string();
    let short = id.get(..8).unwrap_or(&id);
    Ok(CsvExport {
        filename: format!("order-{short}-{}.csv", group.as_str()),
        body,
    })
}

fn write_person_rows<W: std::io::Write>(
    writer: &mut csv::Writer<W>,
    items: &[Item],
) -> Result<(), csv::Error> {
    writer.write_record(["person", "product", "sku", "quantity", "note", "url"])?;

    // Stable sort: items keep their add order within each person.
    let mut sorted: Vec<&Item> = items.iter().collect();
    sorted.sort_by(|a, b| a.owner_name.cmp(&b.owner_name));

    for item in sorted {
        writer.write_record([
            item.owner_name.as_str(),
            item.product_name.as_str(),
            item.product_sku.as_deref().unwrap_or(""),
            item.quantity.as_str(),
            item.note.as_deref().unwrap_or(""),
            item.product_url.as_deref().unwrap_or(""),
        ])?;
    }
    Ok(())
}

type LineKey = (String, String, String, String);

struct ProductLine {
    product: String,
    sku: String,
    url: String,
    note: String,
    total: i64,
    extras: Vec<String>,
    contributors: Vec<String>,
}

impl ProductLine {
    fn from_key(key: &LineKey) -> Self {
        Self {
            product: key.0.clone(),
            sku: key.1.clone(),
            url: key.2.clone(),
            note: key.3.clone(),
            total: 0,
            extras: Vec::new(),
            contributors: Vec::new(),
        }
    }

    fn add(&mut self, item: &Item) {
        match item.quantity.trim().parse::<i64>() {
            Ok(n) => self.total += n,
            Err(_) => self.extras.push(item.quantity.clone()),
        }
        self.contributors
            .push(format!("{}\u{d7}{}", item.owner_name, item.quantity));
    }

    fn quantity(&self) -> String {
        if self.extras.is_empty() {
            self.total.to_string()
        } else {
            format!("{}+{}", self.total, self.extras.join("+"))
        }
    }
}

fn write_product_rows<W: std::io::Write>(
    writer: &mut csv::Writer<W>,
    items: &[Item],
) -> Result<(), csv::Error> {
    writer.write_record(["product", "sku", "total_quantity", "contributors", "url", "note"])?;

    // Lines merge only when product name, SKU, URL and note all match.
    let mut seen: Vec<LineKey> = Vec::new();
    let mut lines: HashMap<LineKey, ProductLine> = HashMap::new();
    for item in items {
        let key: LineKey = (
            item.product_name.clone(),
            item.product_sku.clone().unwrap_or_default(),
            item.product_url.clone().unwrap_or_default(),
            item.note.clone().unwrap_or_default(),
        );
        lines
            .entry(key.clone())
            .or_insert_with(|| {
                seen.push(key.clone());
                ProductLine::from_key(&key)
            })
            .add(item);
    }

    let mut rows: Vec<ProductLine> = seen.iter().filter_map(|k| lines.remove(k)).collect();
    rows.sort_by(|a, b| a.product.cmp(&b.product));

    for row in rows {
        writer.write_record([
            row.product.as_str(),
            row.sku.as_str(),
            row.quantity().as_str(),
            row.contributors.join("; ").as_str(),
            row.url.as_str(),
            row.note.as_str(),
        ])?;
    }
    Ok(())
}
