//! Tabular export of ranked matches.

use std::io::Write;

use serde::Serialize;

use crate::catalog::{
    Catalog, COL_DESCRIPTION, COL_ID, COL_INDUSTRY, COL_MULTIPLE, COL_NAME, COL_WEBSITE,
};
use crate::semantic::MatchResult;

/// Column names of the export, in `MatchRow` field order.
pub const EXPORT_COLUMNS: [&str; 8] = [
    COL_NAME,
    COL_ID,
    COL_MULTIPLE,
    COL_DESCRIPTION,
    COL_INDUSTRY,
    COL_WEBSITE,
    "Similarity Score",
    "Reason for Match",
];

/// A match joined with its catalog record, as shown to the reviewer.
#[derive(Debug, Clone, Serialize)]
pub struct MatchRow<'a> {
    #[serde(rename = "Target/Issuer Name")]
    pub name: &'a str,
    #[serde(rename = "MI Transaction ID")]
    pub id: &'a str,
    #[serde(rename = "Implied Enterprise Value/ EBITDA (x)")]
    pub multiple: f64,
    #[serde(rename = "Business Description")]
    pub description: &'a str,
    #[serde(rename = "Primary Industry")]
    pub industry: &'a str,
    #[serde(rename = "Web page")]
    pub website: &'a str,
    #[serde(rename = "Similarity Score")]
    pub score: f32,
    #[serde(rename = "Reason for Match")]
    pub rationale: &'a str,
}

/// Join results with the catalog. Results whose id is not in the catalog are dropped.
pub fn match_rows<'a>(catalog: &'a Catalog, results: &'a [MatchResult]) -> Vec<MatchRow<'a>> {
    results
        .iter()
        .filter_map(|m| {
            let record = catalog.get(&m.id)?;
            Some(MatchRow {
                name: &record.name,
                id: &record.id,
                multiple: record.multiple,
                description: &record.description,
                industry: &record.industry,
                website: record.website.as_deref().unwrap_or_default(),
                score: m.score,
                rationale: m.rationale,
            })
        })
        .collect()
}

pub fn write_matches<W: Write>(
    writer: W,
    catalog: &Catalog,
    results: &[MatchResult],
) -> anyhow::Result<()> {
    // header is written up front so an empty result still names its columns
    let mut csv_wrt = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(writer);
    csv_wrt.write_record(EXPORT_COLUMNS)?;
    for row in match_rows(catalog, results) {
        csv_wrt.serialize(row)?;
    }
    csv_wrt.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CatalogRecord;
    use crate::semantic::MATCH_RATIONALE;

    fn catalog() -> Catalog {
        Catalog::from_records(vec![CatalogRecord {
            id: "T1".into(),
            name: "Acme, Inc.".into(),
            description: "software analytics firm".into(),
            industry: "Tech".into(),
            multiple: 8.2,
            website: Some("acme.io".into()),
            scraped_text: None,
        }])
    }

    #[test]
    fn test_write_matches() {
        let results = vec![
            MatchResult {
                id: "T1".into(),
                score: 0.5,
                rationale: MATCH_RATIONALE,
            },
            MatchResult {
                id: "gone".into(),
                score: 0.1,
                rationale: MATCH_RATIONALE,
            },
        ];

        let mut out = vec![];
        write_matches(&mut out, &catalog(), &results).unwrap();
        let text = String::from_utf8(out).unwrap();

        let mut lines = text.lines();
        assert_eq!(
            lines.next().unwrap(),
            "Target/Issuer Name,MI Transaction ID,Implied Enterprise Value/ EBITDA (x),Business Description,Primary Industry,Web page,Similarity Score,Reason for Match"
        );
        assert_eq!(
            lines.next().unwrap(),
            "\"Acme, Inc.\",T1,8.2,software analytics firm,Tech,acme.io,0.5,semantic + content + industry similarity"
        );
        assert!(lines.next().is_none());
    }

    #[test]
    fn test_empty_results_still_have_header() {
        let mut out = vec![];
        write_matches(&mut out, &catalog(), &[]).unwrap();

        let text = String::from_utf8(out).unwrap();
        assert_eq!(text, format!("{}\n", EXPORT_COLUMNS.join(",")));
    }
}
