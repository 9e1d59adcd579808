use anyhow::{bail, Context, Result};
use glob::glob;
use polars::prelude::*;
use std::fs::File;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument};

/// Where a table comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum Source {
    /// `http://` or `https://` URL serving CSV.
    Url(String),
    /// Files matched by a path or glob pattern, in sorted order.
    Files(Vec<PathBuf>),
}

/// DataLoader reads CSV or parquet tables from disk or over HTTP
pub struct DataLoader {
    source: Source,
    null_values: Vec<String>,
}

impl DataLoader {
    /// Resolves `source` as a URL, a glob pattern or a single path
    pub fn new(source: &str) -> Result<Self> {
        let source = if source.starts_with("http://") || source.starts_with("https://") {
            Source::Url(source.to_string())
        } else {
            let mut paths: Vec<PathBuf> = glob(source)
                .with_context(|| format!("Failed to read glob pattern {source}"))?
                .filter_map(std::result::Result::ok)
                .collect();
            if paths.is_empty() {
                bail!("No files found matching pattern: {source}");
            }
            paths.sort();
            debug!(n_files = paths.len(), "Resolved input files");
            Source::Files(paths)
        };

        Ok(Self {
            source,
            null_values: vec!["NA".to_string(), String::new()],
        })
    }

    /// Replaces the CSV markers read as missing values (default `"NA"` and `""`)
    pub fn with_null_values(mut self, null_values: Vec<String>) -> Self {
        self.null_values = null_values;
        self
    }

    pub fn source(&self) -> &Source {
        &self.source
    }

    /// Reads every input and stacks them into one frame
    #[instrument(skip(self), fields(source = ?self.source))]
    pub fn load(&self) -> Result<DataFrame> {
        let df = match &self.source {
            Source::Url(url) => self.load_url(url)?,
            Source::Files(paths) => {
                let mut frames = paths.iter().map(|path| self.load_file(path));
                let mut df = match frames.next() {
                    Some(first) => first?,
                    None => bail!("No input files"),
                };
                for frame in frames {
                    df.vstack_mut(&frame?).context("Input files have different schemas")?;
                }
                df
            }
        };
        info!(rows = df.height(), columns = df.width(), "Loaded data");
        Ok(df)
    }

    fn csv_options(&self) -> CsvReadOptions {
        let null_values = self.null_values.iter().map(|value| value.as_str().into()).collect();
        CsvReadOptions::default()
            .with_has_header(true)
            .with_infer_schema_length(Some(1000))
            .with_parse_options(
                CsvParseOptions::default().with_null_values(Some(NullValues::AllColumns(null_values))),
            )
    }

    fn load_file(&self, path: &Path) -> Result<DataFrame> {
        let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase);
        let df = match extension.as_deref() {
            Some("parquet") => ParquetReader::new(file).finish(),
            Some("csv") | Some("txt") => self.csv_options().into_reader_with_file_handle(file).finish(),
            _ => bail!("Unsupported file type: {}", path.display()),
        }
        .with_context(|| format!("Failed to read {}", path.display()))?;
        debug!(path = %path.display(), shape = ?df.shape(), "Read file");
        Ok(df)
    }

    fn load_url(&self, url: &str) -> Result<DataFrame> {
        let response = ureq::get(url)
            .call()
            .with_context(|| format!("Failed to fetch {url}"))?;
        let mut bytes = Vec::new();
        response
            .into_reader()
            .read_to_end(&mut bytes)
            .with_context(|| format!("Failed to read response body from {url}"))?;
        debug!(bytes = bytes.len(), "Downloaded table");
        self.csv_options()
            .into_reader_with_file_handle(Cursor::new(bytes))
            .finish()
            .with_context(|| format!("Failed to parse CSV from {url}"))
    }
}
