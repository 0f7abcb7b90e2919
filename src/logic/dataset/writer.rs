use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::logic::features::{FeatureLayout, FeatureVector};

/// Column holding the training label
pub const LABEL_COLUMN: &str = "label";

/// Generated datasets kept on disk
const MAX_DATASET_FILES: usize = 5;

/// A written dataset
#[derive(Debug, Clone)]
pub struct DatasetFile {
    pub path: PathBuf,
    pub rows: usize,
    pub malicious: usize,
    /// Rows copied from the baseline dataset (included in `rows`)
    pub baseline_rows: usize,
}

pub struct DatasetWriter {
    base_dir: PathBuf,
    baseline: Option<PathBuf>,
}

impl DatasetWriter {
    pub fn from_path(base_dir: PathBuf) -> Self {
        Self { base_dir, baseline: None }
    }

    /// Append the rows of an existing CSV (same header) to every dataset
    pub fn with_baseline(mut self, baseline: Option<PathBuf>) -> Self {
        self.baseline = baseline;
        self
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Write labelled rows as CSV (header = layout keys + `label`)
    ///
    /// Rows built for another layout are skipped.
    pub fn write_csv(&self, layout: &FeatureLayout, rows: &[FeatureVector]) -> io::Result<DatasetFile> {
        fs::create_dir_all(&self.base_dir)?;
        let (path, file) = self.create_new_file()?;
        let mut out = BufWriter::new(file);

        let mut header = layout.names().join(",");
        header.push(',');
        header.push_str(LABEL_COLUMN);
        writeln!(out, "{}", header)?;

        let mut written = 0;
        let mut malicious = 0;
        for row in rows {
            if row.layout().hash != layout.hash {
                log::warn!("Skipping dataset row with foreign layout {:08x}", row.layout().hash);
                continue;
            }
            let label = row.label().unwrap_or(0);
            let values: Vec<String> = row.values().iter().map(u32::to_string).collect();
            writeln!(out, "{},{}", values.join(","), label)?;

            written += 1;
            if label == 1 {
                malicious += 1;
            }
        }

        let mut baseline_rows = 0;
        if let Some(baseline) = &self.baseline {
            let (rows, bad) = append_baseline(&mut out, &header, baseline)?;
            baseline_rows = rows;
            written += rows;
            malicious += bad;
        }
        out.flush()?;

        log::info!(
            "Dataset written: {} ({} rows, {} malicious, {} from baseline)",
            path.display(),
            written,
            malicious,
            baseline_rows
        );
        if let Err(e) = self.prune(MAX_DATASET_FILES) {
            log::warn!("Dataset cleanup failed: {}", e);
        }

        Ok(DatasetFile {
            path,
            rows: written,
            malicious,
            baseline_rows,
        })
    }

    /// Keep only the newest `keep` dataset files
    pub fn prune(&self, keep: usize) -> io::Result<usize> {
        let mut paths = self.dataset_files()?;
        if paths.len() <= keep {
            return Ok(0);
        }
        // Sort by filename (timestamp ensures order)
        paths.sort();
        let excess = paths.len() - keep;
        for path in paths.iter().take(excess) {
            fs::remove_file(path)?;
        }
        Ok(excess)
    }

    fn dataset_files(&self) -> io::Result<Vec<PathBuf>> {
        Ok(fs::read_dir(&self.base_dir)?
            .filter_map(|res| res.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().map_or(false, |ext| ext == "csv"))
            .collect())
    }

    fn create_new_file(&self) -> io::Result<(PathBuf, File)> {
        let now = Utc::now();
        // timestamp format: YYYY-MM-DD-HHMMSS-micros
        let filename = format!("dataset-{}.csv", now.format("%Y-%m-%d-%H%M%S-%6f"));
        let path = self.base_dir.join(filename);
        let file = File::create(&path)?;
        Ok((path, file))
    }
}

/// Copy baseline rows; a missing file or a different header is skipped
fn append_baseline(out: &mut impl Write, header: &str, baseline: &Path) -> io::Result<(usize, usize)> {
    let file = match File::open(baseline) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            log::warn!("Baseline dataset not found: {}", baseline.display());
            return Ok((0, 0));
        }
        Err(e) => return Err(e),
    };

    let mut lines = BufReader::new(file).lines();
    match lines.next().transpose()? {
        Some(first) if first.trim() == header => {}
        _ => {
            log::warn!("Baseline dataset {} has a different header, ignored", baseline.display());
            return Ok((0, 0));
        }
    }

    let columns = header.split(',').count();
    let mut rows = 0;
    let mut malicious = 0;
    for line in lines {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line.split(',').count() != columns {
            log::debug!("Skipping malformed baseline row");
            continue;
        }
        writeln!(out, "{}", line)?;
        rows += 1;
        if line.rsplit(',').next() == Some("1") {
            malicious += 1;
        }
    }
    Ok((rows, malicious))
}
