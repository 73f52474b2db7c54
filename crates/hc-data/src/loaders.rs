//! Loaders for the decision-variable and monitoring-site tables.

use csv::{ReaderBuilder, Trim};
use serde::Deserialize;
use std::io::Read;
use std::path::Path;

use hc_types::{
    config_error, CalibResult, DecisionVariable, DecisionVariableSet, MonitoringSite,
    VariableKind,
};

use crate::csv_error;

#[derive(Debug, Deserialize)]
struct DecisionVariableRow {
    x_names: String,
    x_min: f64,
    x_max: f64,
    x_ini: f64,
    /// 0 = drop, anything else = calibrate
    x_flag: i64,
    x_type: i64,
}

#[derive(Debug, Deserialize)]
struct SiteRow {
    #[serde(rename = "FID")]
    feature_id: String,
    #[serde(rename = "USGS_ID")]
    gauge_id: String,
}

/// Load the decision-variable table (`x_names,x_min,x_max,x_ini,x_flag,x_type`).
pub fn load_decision_variables<P: AsRef<Path>>(path: P) -> CalibResult<DecisionVariableSet> {
    let path = path.as_ref();
    tracing::info!("Loading decision variables from: {}", path.display());
    let file = std::fs::File::open(path)?;
    read_decision_variables(file)
}

pub fn read_decision_variables<R: Read>(reader: R) -> CalibResult<DecisionVariableSet> {
    let mut rdr = ReaderBuilder::new().trim(Trim::All).from_reader(reader);
    let mut variables = Vec::new();

    for (line_num, result) in rdr.deserialize::<DecisionVariableRow>().enumerate() {
        let row = result
            .map_err(|e| csv_error(format!("decision variable row {}", line_num + 2), e))?;
        if row.x_flag == 0 {
            tracing::debug!("Excluding decision variable {}", row.x_names);
            continue;
        }
        let kind = VariableKind::from_tag(row.x_type)?;
        variables.push(DecisionVariable::new(
            row.x_names,
            row.x_min,
            row.x_max,
            row.x_ini,
            kind,
        )?);
    }

    let set = DecisionVariableSet::new(variables)?;
    tracing::info!("Calibrating {} decision variables", set.len());
    Ok(set)
}

/// Load the monitoring-site table (`FID,USGS_ID`).
pub fn load_sites<P: AsRef<Path>>(path: P) -> CalibResult<Vec<MonitoringSite>> {
    let path = path.as_ref();
    tracing::info!("Loading monitoring sites from: {}", path.display());
    let file = std::fs::File::open(path)?;
    read_sites(file)
}

pub fn read_sites<R: Read>(reader: R) -> CalibResult<Vec<MonitoringSite>> {
    let mut rdr = ReaderBuilder::new().trim(Trim::All).from_reader(reader);
    let mut sites = Vec::new();

    for (line_num, result) in rdr.deserialize::<SiteRow>().enumerate() {
        let row = result.map_err(|e| csv_error(format!("site row {}", line_num + 2), e))?;
        sites.push(MonitoringSite::new(row.feature_id, row.gauge_id));
    }

    if sites.is_empty() {
        return Err(config_error!("site table lists no monitoring sites"));
    }
    Ok(sites)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hc_types::CalibError;

    const DVARS: &str = "\
x_names,x_min,x_max,x_ini,x_flag,x_type
bexp,2.0,12.0,5.0,1,0
smcmax,0.3,0.6,0.44,0,0
refkdt,0.5,5.0,3.0,1,1
";

    #[test]
    fn flagged_rows_are_dropped() {
        let set = read_decision_variables(DVARS.as_bytes()).unwrap();
        assert_eq!(set.len(), 2);
        let refkdt = set.get(1).unwrap();
        assert_eq!(refkdt.name, "refkdt");
        assert_eq!(refkdt.kind, VariableKind::Persist);
        assert_eq!(set.get(0).unwrap().kind, VariableKind::Reset);
    }

    #[test]
    fn invalid_initial_value_rejected() {
        let table = "x_names,x_min,x_max,x_ini,x_flag,x_type\nbexp,2.0,12.0,15.0,1,0\n";
        assert!(matches!(
            read_decision_variables(table.as_bytes()),
            Err(CalibError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn malformed_number_is_csv_error() {
        let table = "x_names,x_min,x_max,x_ini,x_flag,x_type\nbexp,two,12.0,5.0,1,0\n";
        assert!(matches!(
            read_decision_variables(table.as_bytes()),
            Err(CalibError::Csv(_))
        ));
    }

    #[test]
    fn unknown_type_tag_rejected() {
        let table = "x_names,x_min,x_max,x_ini,x_flag,x_type\nbexp,2.0,12.0,5.0,1,3\n";
        assert!(matches!(
            read_decision_variables(table.as_bytes()),
            Err(CalibError::InvalidInput(_))
        ));
    }

    #[test]
    fn site_ids_are_padded() {
        let table = "FID,USGS_ID\n1,2322500\n4,02323500\n";
        let sites = read_sites(table.as_bytes()).unwrap();
        assert_eq!(
            sites,
            vec![
                MonitoringSite::new("1", "02322500"),
                MonitoringSite::new("4", "02323500"),
            ]
        );
        assert_eq!(sites[0].gauge_id, "02322500");
    }

    #[test]
    fn empty_site_table_is_configuration_error() {
        assert!(matches!(
            read_sites("FID,USGS_ID\n".as_bytes()),
            Err(CalibError::Configuration(_))
        ));
    }
}
