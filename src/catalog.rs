//! Catalog of historical transactions read from a CSV export of the deal
//! spreadsheet.
//!
//! Headers are trimmed and the spreadsheet's "(Target/Issuer)" suffix is
//! dropped, cells are trimmed, and rows missing a required field are skipped.

use std::collections::{HashMap, HashSet};
use std::io::Read;
use std::path::Path;
use std::time::Instant;

use serde::Serialize;

pub const COL_ID: &str = "MI Transaction ID";
pub const COL_NAME: &str = "Target/Issuer Name";
pub const COL_DESCRIPTION: &str = "Business Description";
pub const COL_INDUSTRY: &str = "Primary Industry";
pub const COL_MULTIPLE: &str = "Implied Enterprise Value/ EBITDA (x)";
pub const COL_WEBSITE: &str = "Web page";

const HEADER_SUFFIX: &str = "(Target/Issuer)";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CatalogRecord {
    pub id: String,
    pub name: String,
    pub description: String,
    pub industry: String,
    /// EV/EBITDA multiple
    pub multiple: f64,
    pub website: Option<String>,
    /// Text scraped from `website`, attached after loading
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scraped_text: Option<String>,
}

/// A row that cannot become a catalog record.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum DataIntegrityError {
    #[error("row {row}: missing {field}")]
    MissingField { row: usize, field: &'static str },

    #[error("row {row}: invalid multiple {value:?}")]
    InvalidMultiple { row: usize, value: String },
}

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("catalog has no {0:?} column")]
    MissingColumn(&'static str),

    #[error("duplicate transaction id {id} at row {row}")]
    DuplicateId { id: String, row: usize },
}

#[derive(Debug, Default)]
pub struct Catalog {
    records: Vec<CatalogRecord>,
    skipped: Vec<DataIntegrityError>,
}

struct Columns {
    id: usize,
    name: usize,
    description: usize,
    industry: usize,
    multiple: usize,
    website: Option<usize>,
}

impl Columns {
    fn locate(headers: &csv::StringRecord) -> Result<Self, CatalogError> {
        let by_name: HashMap<String, usize> = headers
            .iter()
            .enumerate()
            .map(|(idx, h)| (normalize_header(h), idx))
            .collect();

        let find = |name: &'static str| {
            by_name
                .get(name)
                .copied()
                .ok_or(CatalogError::MissingColumn(name))
        };

        Ok(Self {
            id: find(COL_ID)?,
            name: find(COL_NAME)?,
            description: find(COL_DESCRIPTION)?,
            industry: find(COL_INDUSTRY)?,
            multiple: find(COL_MULTIPLE)?,
            website: by_name.get(COL_WEBSITE).copied(),
        })
    }
}

/// "Business Description\n(Target/Issuer)" -> "Business Description"
fn normalize_header(header: &str) -> String {
    let header = header.trim();
    header
        .strip_suffix(HEADER_SUFFIX)
        .map(str::trim_end)
        .unwrap_or(header)
        .to_string()
}

impl Catalog {
    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let now = Instant::now();
        let reader = csv::ReaderBuilder::new().flexible(true).from_path(path)?;
        let catalog = Self::from_csv(reader)?;

        log::debug!(
            "took {}ms to read catalog",
            now.elapsed().as_micros() as f64 / 1000.0
        );

        Ok(catalog)
    }

    #[cfg(test)]
    pub fn from_reader<R: Read>(rdr: R) -> Result<Self, CatalogError> {
        Self::from_csv(csv::ReaderBuilder::new().flexible(true).from_reader(rdr))
    }

    fn from_csv<R: Read>(mut reader: csv::Reader<R>) -> Result<Self, CatalogError> {
        let columns = Columns::locate(reader.headers()?)?;

        let mut records = vec![];
        let mut skipped = vec![];
        let mut seen = HashSet::new();

        for (idx, row) in reader.records().enumerate() {
            // header is row 1
            let row_no = idx + 2;
            let row = row?;

            match parse_row(&row, &columns, row_no) {
                Ok(record) => {
                    if !seen.insert(record.id.clone()) {
                        return Err(CatalogError::DuplicateId {
                            id: record.id,
                            row: row_no,
                        });
                    }
                    records.push(record);
                }
                Err(err) => {
                    log::warn!("skipping catalog {err}");
                    skipped.push(err);
                }
            }
        }

        log::info!(
            "Loaded {} catalog records ({} skipped)",
            records.len(),
            skipped.len()
        );

        Ok(Self { records, skipped })
    }

    #[cfg(test)]
    pub fn from_records(records: Vec<CatalogRecord>) -> Self {
        Self {
            records,
            skipped: vec![],
        }
    }

    pub fn records(&self) -> &[CatalogRecord] {
        &self.records
    }

    pub fn records_mut(&mut self) -> &mut [CatalogRecord] {
        &mut self.records
    }

    pub fn get(&self, id: &str) -> Option<&CatalogRecord> {
        self.records.iter().find(|r| r.id == id)
    }

    pub fn skipped(&self) -> &[DataIntegrityError] {
        &self.skipped
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

fn parse_row(
    row: &csv::StringRecord,
    columns: &Columns,
    row_no: usize,
) -> Result<CatalogRecord, DataIntegrityError> {
    let cell = |idx: usize| row.get(idx).map(str::trim).unwrap_or_default();
    let required = |idx: usize, field: &'static str| {
        let value = cell(idx);
        if value.is_empty() {
            Err(DataIntegrityError::MissingField { row: row_no, field })
        } else {
            Ok(value.to_string())
        }
    };

    let id = required(columns.id, COL_ID)?;
    let name = required(columns.name, COL_NAME)?;
    let description = required(columns.description, COL_DESCRIPTION)?;
    let industry = required(columns.industry, COL_INDUSTRY)?;
    let multiple_raw = required(columns.multiple, COL_MULTIPLE)?;
    let multiple = parse_multiple(&multiple_raw).ok_or(DataIntegrityError::InvalidMultiple {
        row: row_no,
        value: multiple_raw,
    })?;

    let website = columns
        .website
        .map(cell)
        .filter(|w| !w.is_empty())
        .map(str::to_string);

    Ok(CatalogRecord {
        id,
        name,
        description,
        industry,
        multiple,
        website,
        scraped_text: None,
    })
}

/// Accepts "8.2", "8.2x" and "1,234.5".
fn parse_multiple(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .trim_end_matches(['x', 'X'])
        .chars()
        .filter(|c| *c != ',')
        .collect();
    cleaned.trim().parse::<f64>().ok().filter(|m| m.is_finite())
}
