//! CSV ingestion into an untyped table of trimmed cells.
//!
//! Spreadsheet exports carry artifacts: trailing separator columns with no
//! header, `Unnamed: N` placeholders, ragged rows. They are normalized here so
//! the core only ever sees named columns and rectangular rows.

use std::io::Read;
use std::path::Path;

/// A rectangular table of optional string cells.
///
/// `None` marks an empty (or whitespace-only) cell.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
    /// Header text of columns removed during ingestion (blank or placeholder names).
    pub dropped: Vec<String>,
}

impl RawTable {
    /// Build a table directly from header and row literals. Empty strings become `None`.
    pub fn from_rows(headers: &[&str], rows: &[&[&str]]) -> Self {
        let headers: Vec<String> = headers.iter().map(|h| h.trim().to_string()).collect();
        let width = headers.len();
        let rows = rows
            .iter()
            .map(|r| {
                let mut cells: Vec<Option<String>> = r.iter().map(|c| cell(c)).collect();
                cells.resize(width, None);
                cells
            })
            .collect();
        Self {
            headers,
            rows,
            dropped: Vec::new(),
        }
    }

    pub fn width(&self) -> usize {
        self.headers.len()
    }

    pub fn height(&self) -> usize {
        self.rows.len()
    }

    /// Cells of column `idx`, top to bottom.
    pub fn column(&self, idx: usize) -> impl Iterator<Item = Option<&str>> + '_ {
        self.rows
            .iter()
            .map(move |r| r.get(idx).and_then(|c| c.as_deref()))
    }

    /// Position of the first header equal to `name`.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }
}

fn cell(raw: &str) -> Option<String> {
    let t = raw.trim();
    if t.is_empty() {
        None
    } else {
        Some(t.to_string())
    }
}

fn is_placeholder_header(h: &str) -> bool {
    let t = h.trim();
    t.is_empty() || t.starts_with("Unnamed:")
}

/// Parse CSV text (with a header row) from any reader.
pub fn parse_table_csv<R: Read>(reader: R) -> eyre::Result<RawTable> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(reader);

    let headers: Vec<String> = rdr
        .headers()
        .map_err(|e| eyre::eyre!("read CSV headers: {}", e))?
        .iter()
        .map(|s| s.trim().to_string())
        .collect();
    if headers.is_empty() {
        eyre::bail!("CSV has no header row");
    }

    let mut rows = Vec::new();
    for (idx, rec) in rdr.records().enumerate() {
        let rec = rec.map_err(|e| eyre::eyre!("invalid CSV row {}: {}", idx + 2, e))?;
        if rec.len() > headers.len() && rec.iter().skip(headers.len()).any(|c| !c.trim().is_empty())
        {
            eyre::bail!(
                "invalid CSV row {}: {} cells but only {} headers",
                idx + 2,
                rec.len(),
                headers.len()
            );
        }
        let mut cells: Vec<Option<String>> = rec.iter().take(headers.len()).map(cell).collect();
        cells.resize(headers.len(), None);
        rows.push(cells);
    }

    // Trailing rows with no data at all are export padding.
    while rows
        .last()
        .is_some_and(|r: &Vec<Option<String>>| r.iter().all(Option::is_none))
    {
        rows.pop();
    }

    let keep: Vec<usize> = (0..headers.len())
        .filter(|&i| !is_placeholder_header(&headers[i]))
        .collect();
    let dropped: Vec<String> = (0..headers.len())
        .filter(|&i| is_placeholder_header(&headers[i]))
        .map(|i| headers[i].clone())
        .collect();

    let table = RawTable {
        headers: keep.iter().map(|&i| headers[i].clone()).collect(),
        rows: rows
            .into_iter()
            .map(|r| keep.iter().map(|&i| r[i].clone()).collect())
            .collect(),
        dropped,
    };
    Ok(table)
}

/// Load a CSV file into a `RawTable`.
pub fn load_table_csv(path: &Path) -> eyre::Result<RawTable> {
    let file = std::fs::File::open(path)
        .map_err(|e| eyre::eyre!("open table CSV {:?}: {}", path, e))?;
    parse_table_csv(file).map_err(|e| eyre::eyre!("{:?}: {}", path, e))
}
