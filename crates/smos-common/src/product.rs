//! SMOS L2C dataset identifiers and granule records.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::attrs::{AttrValue, Attrs};
use crate::dtype::Scalar;
use crate::error::{CommonError, CommonResult};
use crate::time::{parse_raw_time, TimeBounds};

const SM_VAR_NAMES: &[&str] = &[
    "Mean_acq_time",
    "Soil_Moisture",
    "Soil_Moisture_DQX",
    "Chi_2",
    "Chi_2_P",
    "N_RFI_X",
    "N_RFI_Y",
    "RFI_Prob",
    "X_swath",
];

const OS_VAR_NAMES: &[&str] = &[
    "Mean_acq_time",
    "SSS_corr",
    "Sigma_SSS_corr",
    "SSS_anom",
    "Sigma_SSS_anom",
    "Dg_chi2_corr",
    "Dg_quality_SSS_corr",
    "Dg_quality_SSS_anom",
    "Coast_distance",
    "Dg_RFI_X",
    "Dg_RFI_Y",
    "X_swath",
];

/// A cube dataset offered for one SMOS L2 product type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DatasetId {
    #[serde(rename = "SMOS-L2C-SM")]
    SoilMoisture,
    #[serde(rename = "SMOS-L2C-OS")]
    OceanSalinity,
}

impl DatasetId {
    /// All supported datasets.
    pub const ALL: [DatasetId; 2] = [DatasetId::SoilMoisture, DatasetId::OceanSalinity];

    /// Dataset identifier, e.g. "SMOS-L2C-SM".
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SoilMoisture => "SMOS-L2C-SM",
            Self::OceanSalinity => "SMOS-L2C-OS",
        }
    }

    /// Short product type used for catalog queries.
    pub fn product_type(&self) -> &'static str {
        match self {
            Self::SoilMoisture => "SM",
            Self::OceanSalinity => "OS",
        }
    }

    /// File type identifier of the source granules.
    pub fn file_type(&self) -> &'static str {
        match self {
            Self::SoilMoisture => "MIR_SMUDP2",
            Self::OceanSalinity => "MIR_OSUDP2",
        }
    }

    /// Source variables that become cube variables.
    pub fn variable_names(&self) -> &'static [&'static str] {
        match self {
            Self::SoilMoisture => SM_VAR_NAMES,
            Self::OceanSalinity => OS_VAR_NAMES,
        }
    }

    /// Whether `name` is one of this dataset's cube variables.
    pub fn has_variable(&self, name: &str) -> bool {
        self.variable_names().contains(&name)
    }

    /// Global attributes of one cube level.
    ///
    /// `lat_max` and `spatial_res` describe the level the attributes are
    /// written with, so every level carries its own resolution.
    pub fn attributes(&self, lat_max: f64, spatial_res: f64) -> Attrs {
        let title = match self {
            Self::SoilMoisture => "SMOS Level-2C Soil Moisture",
            Self::OceanSalinity => "SMOS Level-2C Ocean Salinity",
        };
        let mut attrs = Attrs::new();
        attrs.insert("title".into(), AttrValue::from(title));
        attrs.insert("dataset_id".into(), AttrValue::from(self.as_str()));
        attrs.insert("coordinates".into(), AttrValue::from("lon lat time time_bnds"));
        attrs.insert(
            "geospatial_bounds".into(),
            AttrValue::List(
                [-180.0, -lat_max, 180.0, lat_max]
                    .into_iter()
                    .map(Scalar::Float)
                    .collect(),
            ),
        );
        attrs.insert(
            "spatial_resolution".into(),
            AttrValue::Scalar(Scalar::Float(spatial_res)),
        );
        attrs
    }
}

impl fmt::Display for DatasetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DatasetId {
    type Err = CommonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "SMOS-L2C-SM" | "SM" | "L2SM" | "MIR_SMUDP2" => Ok(Self::SoilMoisture),
            "SMOS-L2C-OS" | "OS" | "L2OS" | "MIR_OSUDP2" => Ok(Self::OceanSalinity),
            _ => Err(CommonError::UnknownDataset(s.to_string())),
        }
    }
}

/// One granule as returned by a catalog: path plus validity period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GranuleRecord {
    pub path: String,
    pub start: DateTime<Utc>,
    pub stop: DateTime<Utc>,
}

impl GranuleRecord {
    pub fn new(path: impl Into<String>, start: DateTime<Utc>, stop: DateTime<Utc>) -> Self {
        Self {
            path: path.into(),
            start,
            stop,
        }
    }

    /// Build a record from a standard granule file name such as
    /// `SM_OPER_MIR_SMUDP2_20230401T111510_20230401T124520_700_001_1.nc`.
    pub fn from_path(dataset_id: DatasetId, path: &str) -> CommonResult<Self> {
        let name = path.rsplit('/').next().unwrap_or(path);
        let stem = name.split('.').next().unwrap_or(name);

        let invalid = || CommonError::invalid_time(format!("unexpected granule name '{name}'"));

        let rest = stem.strip_prefix("SM_").ok_or_else(invalid)?;
        let rest = rest
            .strip_prefix("OPER_")
            .or_else(|| rest.strip_prefix("REPR_"))
            .ok_or_else(invalid)?;
        let rest = rest
            .strip_prefix(dataset_id.file_type())
            .and_then(|r| r.strip_prefix('_'))
            .ok_or_else(invalid)?;

        let mut parts = rest.split('_');
        let start = parts.next().ok_or_else(invalid)?;
        let stop = parts.next().ok_or_else(invalid)?;
        let start = parse_raw_time(&start.replace('T', ""))?;
        let stop = parse_raw_time(&stop.replace('T', ""))?;

        Ok(Self::new(path, start, stop))
    }

    pub fn time_bounds(&self) -> TimeBounds {
        TimeBounds::new(self.start, self.stop)
    }
}
