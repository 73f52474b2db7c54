//! Modeled/observed series extraction from CSV files.
//!
//! The modeled file of an iteration holds one column per channel feature;
//! each gauge has its own observed discharge file. Observed records are read
//! once and cached for the rest of the run.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use csv::{ReaderBuilder, StringRecord, Trim};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use hc_optimizer::ObservationSource;
use hc_types::{
    config_error, invalid_input, CalibError, CalibResult, IterationTag, MonitoringSite,
    SiteSeries, TimeSeriesPair,
};

use crate::csv_error;

/// A timestamped series keyed in chronological order.
pub type Series = BTreeMap<NaiveDateTime, f64>;

/// File naming and column layout of the extraction CSVs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservationLayout {
    /// Modeled file relative to the working directory; `{tag}` is the iteration tag.
    pub modeled_pattern: String,
    /// Observed file relative to the working directory; `{gauge}` is the gauge id.
    pub observed_pattern: String,
    pub timestamp_column: String,
    pub observed_column: String,
}

impl Default for ObservationLayout {
    fn default() -> Self {
        Self {
            modeled_pattern: "output_chanobs_sim_{tag}.csv".to_string(),
            observed_pattern: "usgs_{gauge}_discharge.csv".to_string(),
            timestamp_column: "datetime_utc".to_string(),
            observed_column: "discharge_cms".to_string(),
        }
    }
}

impl ObservationLayout {
    pub fn modeled_file(&self, tag: &IterationTag) -> String {
        self.modeled_pattern.replace("{tag}", &tag.to_string())
    }

    pub fn observed_file(&self, site: &MonitoringSite) -> String {
        self.observed_pattern.replace("{gauge}", &site.gauge_id)
    }
}

/// Reads modeled output and gauge records from CSV files under one directory.
#[derive(Debug, Clone)]
pub struct CsvObservationSource {
    root: PathBuf,
    layout: ObservationLayout,
    observed_cache: Arc<Mutex<HashMap<String, Arc<Series>>>>,
}

impl CsvObservationSource {
    pub fn new<P: AsRef<Path>>(root: P, layout: ObservationLayout) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            layout,
            observed_cache: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn observed_series(&self, site: &MonitoringSite) -> CalibResult<Arc<Series>> {
        if let Some(series) = self.observed_cache.lock().get(&site.gauge_id) {
            return Ok(Arc::clone(series));
        }

        let path = self.root.join(self.layout.observed_file(site));
        if !path.exists() {
            return Err(config_error!(
                "observed record for gauge {} not found at {}",
                site.gauge_id,
                path.display()
            ));
        }
        let series = load_all_columns(&path, &self.layout.timestamp_column)?
            .remove(&self.layout.observed_column)
            .ok_or_else(|| {
                invalid_input!(
                    "{} has no {} column",
                    path.display(),
                    self.layout.observed_column
                )
            })?;
        tracing::info!(
            "Loaded {} observed values for gauge {}",
            series.len(),
            site.gauge_id
        );

        let series = Arc::new(series);
        self.observed_cache
            .lock()
            .insert(site.gauge_id.clone(), Arc::clone(&series));
        Ok(series)
    }
}

#[async_trait]
impl ObservationSource for CsvObservationSource {
    async fn extract(
        &self,
        tag: &IterationTag,
        sites: &[MonitoringSite],
    ) -> CalibResult<Vec<SiteSeries>> {
        let path = self.root.join(self.layout.modeled_file(tag));
        if !path.exists() {
            return Err(CalibError::SimulationFailure {
                iteration: tag.iteration,
                message: format!("modeled output {} was not produced", path.display()),
            });
        }
        let mut modeled = load_all_columns(&path, &self.layout.timestamp_column)?;

        sites
            .iter()
            .map(|site| -> CalibResult<SiteSeries> {
                let modeled_series =
                    modeled
                        .remove(&site.feature_id)
                        .ok_or_else(|| CalibError::SimulationFailure {
                            iteration: tag.iteration,
                            message: format!(
                                "modeled output {} has no column for feature {}",
                                path.display(),
                                site.feature_id
                            ),
                        })?;
                let observed = self.observed_series(site)?;
                let pair = TimeSeriesPair::align(&modeled_series, &observed)?;
                tracing::debug!(
                    "Site {}: {} aligned steps for iteration {}",
                    site,
                    pair.len(),
                    tag
                );
                Ok(SiteSeries {
                    site: site.clone(),
                    pair,
                })
            })
            .collect()
    }
}

/// Read every value column of a timestamped CSV.
///
/// Empty cells are gaps and skipped; unparseable cells are errors.
pub fn load_all_columns(
    path: &Path,
    timestamp_column: &str,
) -> CalibResult<HashMap<String, Series>> {
    let mut rdr = ReaderBuilder::new()
        .trim(Trim::All)
        .from_path(path)
        .map_err(|e| csv_error(format!("failed to open {}", path.display()), e))?;

    let headers = rdr
        .headers()
        .map_err(|e| csv_error(format!("failed to read headers of {}", path.display()), e))?
        .clone();
    let time_idx = headers
        .iter()
        .position(|h| h == timestamp_column)
        .ok_or_else(|| invalid_input!("{} has no {} column", path.display(), timestamp_column))?;

    let mut columns: Vec<(usize, String, Series)> = headers
        .iter()
        .enumerate()
        .filter(|(idx, _)| *idx != time_idx)
        .map(|(idx, name)| (idx, name.to_string(), Series::new()))
        .collect();

    let mut record = StringRecord::new();
    let mut line_num = 1;
    while rdr
        .read_record(&mut record)
        .map_err(|e| csv_error(format!("{} line {}", path.display(), line_num + 1), e))?
    {
        line_num += 1;
        let raw_time = record.get(time_idx).unwrap_or_default();
        let timestamp = parse_timestamp(raw_time).ok_or_else(|| {
            invalid_input!(
                "{} line {}: unrecognized timestamp {:?}",
                path.display(),
                line_num,
                raw_time
            )
        })?;

        for (idx, name, series) in columns.iter_mut() {
            let cell = record.get(*idx).unwrap_or_default();
            if cell.is_empty() {
                continue;
            }
            let value: f64 = cell.parse().map_err(|_| {
                invalid_input!(
                    "{} line {}: column {} holds non-numeric value {:?}",
                    path.display(),
                    line_num,
                    name,
                    cell
                )
            })?;
            series.insert(timestamp, value);
        }
    }

    Ok(columns
        .into_iter()
        .map(|(_, name, series)| (name, series))
        .collect())
}

/// Parse the timestamp formats written by the extraction scripts.
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    const FORMATS: [&str; 3] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"];

    FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .or_else(|| {
            DateTime::parse_from_rfc3339(raw)
                .ok()
                .map(|dt| dt.naive_utc())
        })
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, content: &str) {
        fs::write(dir.path().join(name), content).unwrap();
    }

    fn sites() -> Vec<MonitoringSite> {
        vec![MonitoringSite::new("1", "02322500"), MonitoringSite::new("4", "02323500")]
    }

    fn seed_observed(dir: &TempDir) {
        write(
            dir,
            "usgs_02322500_discharge.csv",
            "datetime_utc,discharge_cms\n\
             2020-07-01 00:00:00,1.5\n\
             2020-07-01 01:00:00,2.4\n\
             2020-07-01 02:00:00,\n\
             2020-07-01 03:00:00,5.7\n",
        );
        write(
            dir,
            "usgs_02323500_discharge.csv",
            "datetime_utc,discharge_cms\n\
             2020-07-01 01:00:00,3.0\n\
             2020-07-01 02:00:00,3.5\n\
             2020-07-01 03:00:00,4.5\n",
        );
    }

    #[test]
    fn timestamp_formats() {
        let expected = NaiveDate::from_ymd_opt(2020, 7, 1)
            .unwrap()
            .and_hms_opt(6, 0, 0)
            .unwrap();
        assert_eq!(parse_timestamp("2020-07-01 06:00:00"), Some(expected));
        assert_eq!(parse_timestamp("2020-07-01T06:00:00"), Some(expected));
        assert_eq!(parse_timestamp("2020-07-01T06:00:00+00:00"), Some(expected));
        assert_eq!(parse_timestamp("2020-07-01 06:00"), Some(expected));
        assert_eq!(parse_timestamp("not a time"), None);
    }

    #[tokio::test]
    async fn extracts_aligned_pairs_per_site() {
        let dir = TempDir::new().unwrap();
        seed_observed(&dir);
        write(
            &dir,
            "output_chanobs_sim_03.csv",
            "datetime_utc,1,4\n\
             2020-07-01 00:00:00,1.0,2.0\n\
             2020-07-01 01:00:00,2.0,3.1\n\
             2020-07-01 02:00:00,4.0,3.3\n\
             2020-07-01 03:00:00,5.0,4.2\n",
        );

        let source = CsvObservationSource::new(dir.path(), ObservationLayout::default());
        let tag = IterationTag::new(3, 50);
        let series = source.extract(&tag, &sites()).await.unwrap();

        assert_eq!(series.len(), 2);
        // The observed gap at 02:00 drops that step for the first gauge
        assert_eq!(series[0].pair.modeled(), &[1.0, 2.0, 5.0]);
        assert_eq!(series[0].pair.observed(), &[1.5, 2.4, 5.7]);
        // The second gauge starts an hour later
        assert_eq!(series[1].pair.modeled(), &[3.1, 3.3, 4.2]);
        assert_eq!(series[1].pair.observed(), &[3.0, 3.5, 4.5]);
        assert_eq!(series[1].site.feature_id, "4");
    }

    #[tokio::test]
    async fn missing_modeled_output_is_simulation_failure() {
        let dir = TempDir::new().unwrap();
        seed_observed(&dir);
        let source = CsvObservationSource::new(dir.path(), ObservationLayout::default());
        let err = source
            .extract(&IterationTag::new(4, 50), &sites())
            .await
            .unwrap_err();
        assert!(matches!(err, CalibError::SimulationFailure { iteration: 4, .. }));
    }

    #[tokio::test]
    async fn missing_feature_column_is_simulation_failure() {
        let dir = TempDir::new().unwrap();
        seed_observed(&dir);
        write(
            &dir,
            "output_chanobs_sim_05.csv",
            "datetime_utc,1\n2020-07-01 01:00:00,2.0\n",
        );
        let source = CsvObservationSource::new(dir.path(), ObservationLayout::default());
        let err = source
            .extract(&IterationTag::new(5, 50), &sites())
            .await
            .unwrap_err();
        assert!(matches!(err, CalibError::SimulationFailure { .. }));
    }

    #[tokio::test]
    async fn missing_observed_record_is_configuration_error() {
        let dir = TempDir::new().unwrap();
        write(
            &dir,
            "output_chanobs_sim_01.csv",
            "datetime_utc,1,4\n2020-07-01 01:00:00,2.0,3.0\n",
        );
        let source = CsvObservationSource::new(dir.path(), ObservationLayout::default());
        let err = source
            .extract(&IterationTag::new(1, 50), &sites())
            .await
            .unwrap_err();
        assert!(matches!(err, CalibError::Configuration(_)));
    }

    #[test]
    fn custom_layout_patterns() {
        let layout = ObservationLayout {
            modeled_pattern: "runs/{tag}/flow.csv".into(),
            observed_pattern: "gauges/{gauge}.csv".into(),
            ..ObservationLayout::default()
        };
        assert_eq!(layout.modeled_file(&IterationTag::new(12, 100)), "runs/012/flow.csv");
        assert_eq!(
            layout.observed_file(&MonitoringSite::new("1", "42")),
            "gauges/00000042.csv"
        );
    }

    #[test]
    fn non_numeric_cell_rejected() {
        let dir = TempDir::new().unwrap();
        write(&dir, "bad.csv", "datetime_utc,1\n2020-07-01 01:00:00,abc\n");
        let err = load_all_columns(&dir.path().join("bad.csv"), "datetime_utc").unwrap_err();
        assert!(matches!(err, CalibError::InvalidInput(_)));
    }
}
