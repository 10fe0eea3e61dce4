// THEORY:
// The `ResultsTable` is the single piece of shared mutable state in a batch. It is
// created at batch start, grows by one row per (image, class), and is finalized
// exactly once before it is persisted.
//
// Key architectural principles:
// 1.  **Fixed Row Shape**: Every row is an `AreaStatistics` plus the file it came
//     from. Columns cannot be added or dropped mid-batch.
// 2.  **Raw Names Until Finalize**: The particle columns start out under the names
//     a particle analyzer reports (`Count`, `Total Area`, ...), which are easy to
//     confuse with the complete-area columns. `finalize` applies a versioned
//     rename map once, at batch end, and never per row. A finalized table refuses
//     further rows.
// 3.  **Settings Are Not Rows**: The optional settings block is a separate
//     key/value section written after the table, not extra rows of the schema.
// 4.  **All-or-Nothing Persistence**: The CSV is written to a sibling temporary
//     file and renamed into place, so a failed write never leaves a half-written
//     result file behind.

use log::debug;
use std::fmt::Write as _;
use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use crate::config::RunConfig;
use crate::error::{CensusError, Result};

/// Version of `RENAME_MAP`. Bump when the public column names change.
pub const SCHEMA_VERSION: u32 = 1;

/// Raw analyzer column name to public column name.
pub const RENAME_MAP: [(&str, &str); 5] = [
    ("Slice", "Class Label"),
    ("Total Area", "Particle Total Area"),
    ("Average Size", "Particle Average Size"),
    ("%Area", "Particle %Area"),
    ("Count", "Particle Count"),
];

/// Column order of the written table, by raw name.
const RAW_COLUMNS: [&str; 8] = [
    "Slice",
    "Count",
    "Total Area",
    "Average Size",
    "%Area",
    "File",
    "Complete Area",
    "Complete %Area",
];

/// Area measurements of one class in one image.
#[derive(Debug, Clone, PartialEq)]
pub struct AreaStatistics {
    pub class_label: String,
    /// Every pixel of the class, including blobs below the minimum area.
    pub full_area_pixels: u64,
    pub full_area_percent: f64,
    pub particle_count: u64,
    /// Pixels in blobs at or above the minimum area. Never exceeds `full_area_pixels`.
    pub particle_total_area: u64,
    pub particle_avg_size: f64,
    pub particle_percent_area: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResultsRow {
    pub file_name: String,
    pub stats: AreaStatistics,
}

impl ResultsRow {
    fn cells(&self) -> [String; 8] {
        let s = &self.stats;
        [
            s.class_label.clone(),
            s.particle_count.to_string(),
            s.particle_total_area.to_string(),
            format_decimal(s.particle_avg_size),
            format_decimal(s.particle_percent_area),
            self.file_name.clone(),
            s.full_area_pixels.to_string(),
            format_decimal(s.full_area_percent),
        ]
    }
}

/// Key/value pairs written after the table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettingsBlock {
    pub entries: Vec<(String, String)>,
}

impl SettingsBlock {
    pub fn from_config(config: &RunConfig) -> Self {
        Self {
            entries: vec![
                ("Classifier file".to_string(), config.classifier_path.display().to_string()),
                ("Minimum blob area".to_string(), config.min_particle_area.to_string()),
            ],
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResultsTable {
    headers: Vec<String>,
    rows: Vec<ResultsRow>,
    finalized: bool,
    settings: Option<SettingsBlock>,
}

impl Default for ResultsTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ResultsTable {
    pub fn new() -> Self {
        Self {
            headers: RAW_COLUMNS.iter().map(|c| c.to_string()).collect(),
            rows: Vec::new(),
            finalized: false,
            settings: None,
        }
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn rows(&self) -> &[ResultsRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    pub fn settings(&self) -> Option<&SettingsBlock> {
        self.settings.as_ref()
    }

    pub fn append_row(&mut self, file_name: &str, stats: AreaStatistics) -> Result<()> {
        if self.finalized {
            return Err(CensusError::TableFinalized);
        }
        self.rows.push(ResultsRow {
            file_name: file_name.to_string(),
            stats,
        });
        Ok(())
    }

    /// Appends a batch of rows produced for one image, keeping their order.
    pub fn append_rows(&mut self, rows: Vec<ResultsRow>) -> Result<()> {
        if self.finalized {
            return Err(CensusError::TableFinalized);
        }
        self.rows.extend(rows);
        Ok(())
    }

    /// Renames the raw particle columns to the public schema. Idempotent.
    pub fn finalize(&mut self) -> &mut Self {
        if self.finalized {
            return self;
        }
        for header in &mut self.headers {
            if let Some((_, canonical)) = RENAME_MAP.iter().find(|(raw, _)| *raw == header.as_str()) {
                *header = canonical.to_string();
            }
        }
        self.finalized = true;
        debug!("Finalized results table with schema version {}", SCHEMA_VERSION);
        self
    }

    /// Attaches the settings block when `config.append_settings` is set.
    pub fn optionally_append_settings(&mut self, config: &RunConfig) {
        if config.append_settings {
            self.settings = Some(SettingsBlock::from_config(config));
        }
    }

    /// Index of a column by its current header name.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    /// Renders the table, followed by the settings block if any, as CSV.
    pub fn to_csv(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "{}", join_csv(self.headers.iter().map(String::as_str)));
        for row in &self.rows {
            let cells = row.cells();
            let _ = writeln!(out, "{}", join_csv(cells.iter().map(String::as_str)));
        }
        if let Some(settings) = &self.settings {
            out.push('\n');
            let _ = writeln!(out, "\"Setting\",\"Value\"");
            for (key, value) in &settings.entries {
                let _ = writeln!(out, "\"{}\",\"{}\"", escape_quotes(key), escape_quotes(value));
            }
        }
        out
    }

    /// Writes the CSV to `path`, atomically with respect to the final file name.
    pub fn write_csv(&self, path: &Path) -> Result<()> {
        let temp_path = temp_sibling(path);
        let persist = |source: std::io::Error| CensusError::Persistence {
            path: path.to_path_buf(),
            source,
        };

        let write_result = fs::File::create(&temp_path).and_then(|mut file| {
            file.write_all(self.to_csv().as_bytes())?;
            file.sync_all()
        });
        if let Err(source) = write_result {
            let _ = fs::remove_file(&temp_path);
            return Err(persist(source));
        }
        if let Err(source) = fs::rename(&temp_path, path) {
            let _ = fs::remove_file(&temp_path);
            return Err(persist(source));
        }
        Ok(())
    }
}

fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".partial");
    path.with_file_name(name)
}

fn format_decimal(value: f64) -> String {
    format!("{:.3}", value)
}

fn escape_quotes(value: &str) -> String {
    value.replace('"', "\"\"")
}

fn join_csv<'a>(cells: impl Iterator<Item = &'a str>) -> String {
    cells
        .map(|cell| {
            if cell.contains([',', '"', '\n']) {
                format!("\"{}\"", escape_quotes(cell))
            } else {
                cell.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}
