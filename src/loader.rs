// 📂 Record Loader - delimited text → RawTable
// One loader for every source; per-source differences live in config.

use crate::anomaly::LoadAnomaly;
use crate::error::LoadError;
use crate::table::RawTable;
use crate::value::Value;
use csv::ReaderBuilder;
use encoding_rs::{Encoding, UTF_8};
use sha2::{Digest, Sha256};
use std::borrow::Cow;
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

// ============================================================================
// LOADED TABLE
// ============================================================================

/// A parsed table plus a fingerprint of the bytes it came from.
#[derive(Debug, Clone)]
pub struct LoadedTable {
    pub table: RawTable,
    /// SHA-256 of the raw file bytes, hex encoded
    pub sha256: String,
    /// Cells (or header names) not valid in the source encoding
    pub decode_errors: usize,
    pub anomalies: Vec<LoadAnomaly>,
}

// ============================================================================
// LOADER
// ============================================================================

pub struct DelimitedLoader {
    delimiter: u8,
    encoding: &'static Encoding,
}

impl DelimitedLoader {
    pub fn new(delimiter: u8) -> Self {
        DelimitedLoader {
            delimiter,
            encoding: UTF_8,
        }
    }

    pub fn comma() -> Self {
        Self::new(b',')
    }

    pub fn tab() -> Self {
        Self::new(b'\t')
    }

    /// Decode cells with `encoding` instead of UTF-8. A byte-order mark still wins.
    pub fn with_encoding(mut self, encoding: &'static Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    /// Read and parse a file.
    pub fn load(&self, source_name: &str, file_path: &Path) -> Result<LoadedTable, LoadError> {
        let bytes = fs::read(file_path).map_err(|e| LoadError::Unreadable {
            source_name: source_name.to_string(),
            path: file_path.to_path_buf(),
            source: e,
        })?;

        let loaded = self.parse_bytes(source_name, file_path, &bytes)?;
        debug!(
            source = source_name,
            path = %file_path.display(),
            rows = loaded.table.len(),
            columns = loaded.table.columns().len(),
            "Loaded source file"
        );

        Ok(loaded)
    }

    /// Parse already-read bytes. `file_path` is only used in errors and anomalies.
    pub fn parse_bytes(
        &self,
        source_name: &str,
        file_path: &Path,
        bytes: &[u8],
    ) -> Result<LoadedTable, LoadError> {
        let (encoding, body) = match Encoding::for_bom(bytes) {
            Some((encoding, bom_length)) => (encoding, &bytes[bom_length..]),
            None => (self.encoding, bytes),
        };

        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .delimiter(self.delimiter)
            .flexible(true)
            .from_reader(body);

        let headers = reader.byte_headers().map_err(|e| LoadError::Malformed {
            source_name: source_name.to_string(),
            path: file_path.to_path_buf(),
            line: 1,
            source: e,
        })?;

        let mut decode_errors = 0;
        let columns: Vec<String> = headers
            .iter()
            .map(|h| decode_cell(h, encoding, &mut decode_errors).into_owned())
            .collect();

        if columns.iter().all(|c| c.trim().is_empty()) {
            return Err(LoadError::MissingHeader {
                source_name: source_name.to_string(),
                path: file_path.to_path_buf(),
            });
        }

        let width = columns.len();
        let mut table = RawTable::new(source_name, columns);
        let mut anomalies = Vec::new();

        for (idx, result) in reader.byte_records().enumerate() {
            let record = result.map_err(|e| LoadError::Malformed {
                source_name: source_name.to_string(),
                path: file_path.to_path_buf(),
                line: idx + 2,
                source: e,
            })?;

            // Multi-line quoted cells shift physical lines; the reader knows the truth
            let line = record
                .position()
                .map(|p| p.line() as usize)
                .unwrap_or(idx + 2);

            if record.len() > width {
                warn!(source = source_name, line, cells = record.len(), width, "Row longer than header");
                anomalies.push(LoadAnomaly::ExtraCells {
                    source: source_name.to_string(),
                    line,
                    expected: width,
                    found: record.len(),
                });
            }

            let values = record
                .iter()
                .map(|cell| Value::infer(&decode_cell(cell, encoding, &mut decode_errors)))
                .collect();

            table.push_row(line, values);
        }

        if decode_errors > 0 {
            warn!(
                source = source_name,
                path = %file_path.display(),
                encoding = encoding.name(),
                cells = decode_errors,
                "Cells not valid in source encoding"
            );
            anomalies.push(LoadAnomaly::UndecodableCells {
                source: source_name.to_string(),
                path: file_path.to_path_buf(),
                encoding: encoding.name().to_string(),
                cells: decode_errors,
            });
        }

        Ok(LoadedTable {
            table,
            sha256: fingerprint(bytes),
            decode_errors,
            anomalies,
        })
    }
}

impl Default for DelimitedLoader {
    fn default() -> Self {
        Self::comma()
    }
}

/// Strict decode first; on failure count it and fall back to replacement characters.
fn decode_cell<'b>(bytes: &'b [u8], encoding: &'static Encoding, errors: &mut usize) -> Cow<'b, str> {
    match encoding.decode_without_bom_handling_and_without_replacement(bytes) {
        Some(text) => text,
        None => {
            *errors += 1;
            encoding.decode_without_bom_handling(bytes).0
        }
    }
}

fn fingerprint(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

// ============================================================================
// TESTS
// ============================================================================
