//! Append-only trial log on disk.
//!
//! Three files live in the output directory:
//!
//! - `trials.jsonl`: one [`TrialLogEntry`] per line, the restart source
//! - `site_metrics.csv`: the metric panel of every site in every trial
//! - `parameters.csv`: candidate values and the incumbent score per trial
//!
//! Only the JSON log is read back; the CSV tables are for inspection.

use csv::{Writer, WriterBuilder};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};

use hc_optimizer::{Checkpoint, TrialLogEntry, TrialSink};
use hc_types::{invalid_input, CalibResult};

use crate::csv_error;

pub const TRIALS_FILE: &str = "trials.jsonl";
pub const SITE_METRICS_FILE: &str = "site_metrics.csv";
pub const PARAMETERS_FILE: &str = "parameters.csv";

const SITE_METRICS_HEADER: [&str; 13] = [
    "iteration",
    "gauge_id",
    "feature_id",
    "n",
    "nse",
    "nselog",
    "nsewt",
    "pearson",
    "rmse",
    "pbias",
    "kge",
    "f_x",
    "accepted",
];

/// File-backed [`TrialSink`]. Every record is flushed before `record` returns.
pub struct TrialLog {
    dir: PathBuf,
    trials: File,
    site_metrics: Writer<File>,
    parameters: Writer<File>,
    site_header_pending: bool,
    params_header_pending: bool,
}

impl std::fmt::Debug for TrialLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrialLog").field("dir", &self.dir).finish()
    }
}

impl TrialLog {
    /// Open (or create) the log files in `dir`, appending to existing ones.
    pub fn create<P: AsRef<Path>>(dir: P) -> CalibResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;

        let trials_path = dir.join(TRIALS_FILE);
        drop_partial_line(&trials_path)?;
        let trials = append(&trials_path)?;

        let (site_metrics, site_header_pending) = csv_appender(&dir.join(SITE_METRICS_FILE))?;
        let (parameters, params_header_pending) = csv_appender(&dir.join(PARAMETERS_FILE))?;

        tracing::info!("Recording trials to {}", dir.display());
        Ok(Self {
            dir,
            trials,
            site_metrics,
            parameters,
            site_header_pending,
            params_header_pending,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn write_site_metrics(&mut self, entry: &TrialLogEntry) -> CalibResult<()> {
        if self.site_header_pending {
            self.site_metrics
                .write_record(SITE_METRICS_HEADER)
                .map_err(|e| csv_error(SITE_METRICS_FILE, e))?;
            self.site_header_pending = false;
        }

        let trial = &entry.trial;
        for score in &trial.site_scores {
            let m = &score.metrics;
            let row = [
                trial.iteration.to_string(),
                score.site.gauge_id.clone(),
                score.site.feature_id.clone(),
                m.n.to_string(),
                m.nse.to_string(),
                m.nse_log.to_string(),
                m.nse_weighted.to_string(),
                m.pearson.to_string(),
                m.rmse.to_string(),
                m.pbias.to_string(),
                m.kge.to_string(),
                trial.objective.to_string(),
                u8::from(trial.accepted()).to_string(),
            ];
            self.site_metrics
                .write_record(&row)
                .map_err(|e| csv_error(SITE_METRICS_FILE, e))?;
        }
        self.site_metrics.flush()?;
        Ok(())
    }

    fn write_parameters(&mut self, entry: &TrialLogEntry) -> CalibResult<()> {
        let trial = &entry.trial;
        if self.params_header_pending {
            let mut header = vec!["iteration".to_string(), "acceptance".to_string()];
            header.extend(trial.candidate.names().map(str::to_string));
            header.extend(["f_x", "f_best", "id_best"].map(str::to_string));
            self.parameters
                .write_record(&header)
                .map_err(|e| csv_error(PARAMETERS_FILE, e))?;
            self.params_header_pending = false;
        }

        let mut row = vec![
            trial.iteration.to_string(),
            format!("{:?}", trial.acceptance),
        ];
        row.extend(trial.candidate.values().iter().map(f64::to_string));
        row.push(trial.objective.to_string());
        row.push(entry.incumbent.score.to_string());
        row.push(entry.incumbent.iteration.to_string());
        self.parameters
            .write_record(&row)
            .map_err(|e| csv_error(PARAMETERS_FILE, e))?;
        self.parameters.flush()?;
        Ok(())
    }
}

impl TrialSink for TrialLog {
    fn record(&mut self, entry: &TrialLogEntry) -> CalibResult<()> {
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');
        self.trials.write_all(line.as_bytes())?;
        self.trials.flush()?;

        self.write_site_metrics(entry)?;
        self.write_parameters(entry)?;
        tracing::debug!("Recorded iteration {}", entry.trial.iteration);
        Ok(())
    }
}

/// Every complete entry of the trial log in `dir`, oldest first.
///
/// A missing log reads as empty. A truncated final line, left behind by an
/// interrupted write, is skipped.
pub fn read_entries<P: AsRef<Path>>(dir: P) -> CalibResult<Vec<TrialLogEntry>> {
    let path = dir.as_ref().join(TRIALS_FILE);
    if !path.exists() {
        return Ok(Vec::new());
    }

    let lines: Vec<String> = BufReader::new(File::open(&path)?)
        .lines()
        .collect::<Result<_, _>>()?;
    let last = lines.len().saturating_sub(1);

    let mut entries = Vec::with_capacity(lines.len());
    for (idx, line) in lines.iter().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<TrialLogEntry>(line) {
            Ok(entry) => entries.push(entry),
            Err(e) if idx == last => {
                tracing::warn!(
                    "Ignoring incomplete final line of {}: {}",
                    path.display(),
                    e
                );
            }
            Err(e) => {
                return Err(invalid_input!(
                    "{} line {} is corrupt: {}",
                    path.display(),
                    idx + 1,
                    e
                ))
            }
        }
    }

    for pair in entries.windows(2) {
        if pair[1].trial.iteration <= pair[0].trial.iteration {
            return Err(invalid_input!(
                "{} is out of order: iteration {} follows {}",
                path.display(),
                pair[1].trial.iteration,
                pair[0].trial.iteration
            ));
        }
    }
    Ok(entries)
}

/// Checkpoint of the last complete iteration in `dir`, if any ran.
pub fn load_checkpoint<P: AsRef<Path>>(dir: P) -> CalibResult<Option<Checkpoint>> {
    let checkpoint = read_entries(&dir)?.last().map(TrialLogEntry::checkpoint);
    match &checkpoint {
        Some(c) => tracing::info!(
            "Found checkpoint after iteration {} (incumbent {:.6} from iteration {})",
            c.last_iteration,
            c.incumbent.score,
            c.incumbent.iteration
        ),
        None => tracing::info!("No trial log in {}", dir.as_ref().display()),
    }
    Ok(checkpoint)
}

fn append(path: &Path) -> CalibResult<File> {
    Ok(OpenOptions::new().create(true).append(true).open(path)?)
}

/// Returns the writer and whether the file still needs its header.
fn csv_appender(path: &Path) -> CalibResult<(Writer<File>, bool)> {
    let file = append(path)?;
    let empty = file.metadata()?.len() == 0;
    let writer = WriterBuilder::new().has_headers(false).from_writer(file);
    Ok((writer, empty))
}

/// Make sure new entries start on a fresh line.
///
/// An unterminated last line that still parses is a complete entry whose
/// newline never reached the disk, so it gets one. Anything else is cut.
fn drop_partial_line(path: &Path) -> CalibResult<()> {
    if !path.exists() {
        return Ok(());
    }
    let mut file = OpenOptions::new().read(true).write(true).open(path)?;
    let mut content = Vec::new();
    file.read_to_end(&mut content)?;
    if content.is_empty() || content.ends_with(b"\n") {
        return Ok(());
    }

    let keep = content
        .iter()
        .rposition(|b| *b == b'\n')
        .map_or(0, |pos| pos + 1);
    if serde_json::from_slice::<TrialLogEntry>(&content[keep..]).is_ok() {
        tracing::info!("Terminating the complete final entry of {}", path.display());
        // The read left the cursor at the end of the file
        file.write_all(b"\n")?;
        file.flush()?;
        return Ok(());
    }

    tracing::warn!(
        "Discarding {} bytes of an incomplete entry at the end of {}",
        content.len() - keep,
        path.display()
    );
    file.set_len(keep as u64)?;
    Ok(())
}
