use crate::error::{DashboardError, Result};
use crate::export::DEFAULT_SHEET_NAME;
use crate::schema::TierThresholds;
use crate::store::DEFAULT_PAGE_SIZE;
use log::debug;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const PREDEFINED_TAGS: &[&str] = &[
    "Angela",
    "Mariana",
    "Nanette",
    "Business",
    "Individual",
    "Commercial",
    "Airbnb",
    "VIP",
    "New",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct DashboardConfig {
    #[schemars(
        description = "Path of the JSON registry document. When absent the registry lives in memory and is lost on exit."
    )]
    pub store_path: Option<PathBuf>,

    #[schemars(description = "Rows requested per registry page when loading whole tables.")]
    pub page_size: usize,

    #[schemars(description = "Maximum number of bookings sent in one registry upsert.")]
    pub upsert_chunk_size: usize,

    #[schemars(
        description = "Appointment status kept for the daily MPI report. Other statuses (cancelled, no-show) are ignored."
    )]
    pub confirmed_status: String,

    #[schemars(
        description = "Zero-based row of the header in every payroll employee sheet. Rows above it hold the export banner."
    )]
    pub payroll_header_row: usize,

    #[schemars(description = "MPI ($/h) lower bounds of the Top and Good performance tiers.")]
    pub tier_thresholds: TierThresholds,

    #[schemars(
        description = "Tags offered when editing clients. Tags outside this list are still accepted."
    )]
    pub tag_vocabulary: Vec<String>,

    #[schemars(description = "Worksheet name used for exported MPI workbooks.")]
    pub export_sheet_name: String,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            store_path: None,
            page_size: DEFAULT_PAGE_SIZE,
            upsert_chunk_size: 500,
            confirmed_status: "Confirmed".to_string(),
            payroll_header_row: 5,
            tier_thresholds: TierThresholds::DEFAULT,
            tag_vocabulary: PREDEFINED_TAGS.iter().map(|t| t.to_string()).collect(),
            export_sheet_name: DEFAULT_SHEET_NAME.to_string(),
        }
    }
}

impl DashboardConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path)?;
        debug!("Loading dashboard config from {}", path.display());
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0 {
            return Err(DashboardError::InvalidConfig(
                "page_size must be at least 1".to_string(),
            ));
        }
        if self.upsert_chunk_size == 0 {
            return Err(DashboardError::InvalidConfig(
                "upsert_chunk_size must be at least 1".to_string(),
            ));
        }
        validate_thresholds(&self.tier_thresholds)?;
        if self.export_sheet_name.trim().is_empty() || self.export_sheet_name.chars().count() > 31 {
            return Err(DashboardError::InvalidConfig(format!(
                "export_sheet_name '{}' must be 1 to 31 characters",
                self.export_sheet_name
            )));
        }
        Ok(())
    }

    pub fn generate_json_schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(DashboardConfig)
    }

    pub fn schema_as_json() -> std::result::Result<String, serde_json::Error> {
        let schema = Self::generate_json_schema();
        serde_json::to_string_pretty(&schema)
    }
}

pub fn validate_thresholds(thresholds: &TierThresholds) -> Result<()> {
    let TierThresholds { top, good } = *thresholds;
    if !top.is_finite() || !good.is_finite() || good < 0.0 {
        return Err(DashboardError::InvalidConfig(format!(
            "tier thresholds must be finite and non-negative (top {}, good {})",
            top, good
        )));
    }
    if good > top {
        return Err(DashboardError::InvalidConfig(format!(
            "good threshold {} is above top threshold {}",
            good, top
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = DashboardConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.page_size, 1000);
        assert_eq!(config.tier_thresholds, TierThresholds::DEFAULT);
        assert!(config.tag_vocabulary.contains(&"VIP".to_string()));
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config = DashboardConfig::from_json_str(
            r#"{ "store_path": "registry.json", "tier_thresholds": { "top": 50.0, "good": 30.0 } }"#,
        )
        .unwrap();
        assert_eq!(config.store_path, Some(PathBuf::from("registry.json")));
        assert_eq!(config.tier_thresholds.top, 50.0);
        assert_eq!(config.confirmed_status, "Confirmed");
        assert_eq!(config.payroll_header_row, 5);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dashboard.json");
        fs::write(
            &path,
            r#"{ "confirmed_status": "Completed", "upsert_chunk_size": 250 }"#,
        )
        .unwrap();

        let config = DashboardConfig::from_json_file(&path).unwrap();
        assert_eq!(config.confirmed_status, "Completed");
        assert_eq!(config.upsert_chunk_size, 250);
        assert_eq!(config.page_size, DEFAULT_PAGE_SIZE);

        fs::write(&path, r#"{ "upsert_chunk_size": 0 }"#).unwrap();
        let err = DashboardConfig::from_json_file(&path).unwrap_err();
        assert!(matches!(err, DashboardError::InvalidConfig(_)));

        let err = DashboardConfig::from_json_file(dir.path().join("missing.json")).unwrap_err();
        assert!(matches!(err, DashboardError::IoError(_)));
    }

    #[test]
    fn test_invalid_configs_rejected() {
        let err = DashboardConfig::from_json_str(r#"{ "page_size": 0 }"#).unwrap_err();
        assert!(matches!(err, DashboardError::InvalidConfig(_)));

        let inverted = TierThresholds {
            top: 30.0,
            good: 40.0,
        };
        assert!(validate_thresholds(&inverted).is_err());

        let config = DashboardConfig {
            export_sheet_name: String::new(),
            ..DashboardConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_schema_generation() {
        let schema_json = DashboardConfig::schema_as_json().unwrap();
        assert!(schema_json.contains("tier_thresholds"));
        assert!(schema_json.contains("payroll_header_row"));
        assert!(schema_json.contains("confirmed_status"));
    }
}
