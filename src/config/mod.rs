use serde::{Deserialize, Serialize};
use std::{
    fs::{self, File},
    io::Write,
    path::{Path, PathBuf},
};

use crate::{
    errors::{EngineError, StoreError},
    utils::{app_data_dir, ensure_dir},
};

const CONFIG_DIR: &str = "config";
const CONFIG_FILE: &str = "engine.json";
const STORE_DIR: &str = "store";
const TMP_SUFFIX: &str = "tmp";

/// Tunable thresholds for the scheduler, forecast, and alert rules.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EngineConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub forecast: ForecastConfig,
    #[serde(default)]
    pub alerts: AlertConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Days ahead of today included in the upcoming view.
    pub upcoming_horizon_days: i64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            upcoming_horizon_days: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ForecastConfig {
    /// Forecast above `limit * over_forecast_ratio` classifies as over.
    pub over_forecast_ratio: f64,
    /// Forecast above `limit * warning_forecast_ratio` classifies as warning.
    pub warning_forecast_ratio: f64,
    /// Spent-to-expected ratio above this classifies as warning.
    pub warning_pace_ratio: f64,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            over_forecast_ratio: 1.05,
            warning_forecast_ratio: 0.95,
            warning_pace_ratio: 1.2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AlertConfig {
    pub first_week_last_day: u32,
    pub first_week_expense_ratio: f64,
    pub mid_month_day: u32,
    pub mid_month_remaining_ratio: f64,
    pub low_balance_ratio: f64,
    pub spike_income_ratio: f64,
    pub spike_window_minutes: i64,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            first_week_last_day: 7,
            first_week_expense_ratio: 0.30,
            mid_month_day: 15,
            mid_month_remaining_ratio: 0.50,
            low_balance_ratio: 0.20,
            spike_income_ratio: 0.20,
            spike_window_minutes: 60,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.scheduler.upcoming_horizon_days < 0 {
            return Err(EngineError::Validation(
                "upcoming horizon must not be negative".into(),
            ));
        }
        let ratios = [
            ("over_forecast_ratio", self.forecast.over_forecast_ratio),
            ("warning_forecast_ratio", self.forecast.warning_forecast_ratio),
            ("warning_pace_ratio", self.forecast.warning_pace_ratio),
            ("first_week_expense_ratio", self.alerts.first_week_expense_ratio),
            ("mid_month_remaining_ratio", self.alerts.mid_month_remaining_ratio),
            ("low_balance_ratio", self.alerts.low_balance_ratio),
            ("spike_income_ratio", self.alerts.spike_income_ratio),
        ];
        for (name, value) in ratios {
            if !value.is_finite() || value <= 0.0 {
                return Err(EngineError::Validation(format!(
                    "{name} must be a positive number"
                )));
            }
        }
        if self.alerts.spike_window_minutes < 0 {
            return Err(EngineError::Validation(
                "spike window must not be negative".into(),
            ));
        }
        Ok(())
    }
}

/// Loads and saves [`EngineConfig`] beneath an engine base directory.
#[derive(Debug, Clone)]
pub struct ConfigManager {
    base: PathBuf,
    path: PathBuf,
}

impl ConfigManager {
    pub fn new() -> Result<Self, StoreError> {
        Self::with_base_dir(app_data_dir())
    }

    pub fn with_base_dir(base: PathBuf) -> Result<Self, StoreError> {
        ensure_dir(&base)?;
        let config_root = base.join(CONFIG_DIR);
        ensure_dir(&config_root)?;
        Ok(Self {
            path: config_root.join(CONFIG_FILE),
            base,
        })
    }

    pub fn load(&self) -> Result<EngineConfig, EngineError> {
        let config = if self.path.exists() {
            let data = fs::read_to_string(&self.path).map_err(StoreError::from)?;
            serde_json::from_str(&data).map_err(StoreError::from)?
        } else {
            EngineConfig::default()
        };
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, config: &EngineConfig) -> Result<(), EngineError> {
        config.validate()?;
        let json = serde_json::to_string_pretty(config).map_err(StoreError::from)?;
        let tmp = tmp_path(&self.path);
        write_atomic(&tmp, &json)?;
        fs::rename(&tmp, &self.path).map_err(StoreError::from)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Directory handed to the default [`crate::storage::JsonFileStore`].
    pub fn store_dir(&self) -> PathBuf {
        self.base.join(STORE_DIR)
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut tmp = path.to_path_buf();
    let ext = match path.extension().and_then(|ext| ext.to_str()) {
        Some(existing) => format!("{}.{}", existing, TMP_SUFFIX),
        None => TMP_SUFFIX.to_string(),
    };
    tmp.set_extension(ext);
    tmp
}

fn write_atomic(path: &Path, data: &str) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }
    let mut file = File::create(path)?;
    file.write_all(data.as_bytes())?;
    file.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_loads_defaults() {
        let dir = tempdir().unwrap();
        let manager = ConfigManager::with_base_dir(dir.path().to_path_buf()).unwrap();
        let config = manager.load().expect("load defaults");
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.scheduler.upcoming_horizon_days, 3);
        assert_eq!(config.alerts.spike_window_minutes, 60);
    }

    #[test]
    fn save_and_reload_roundtrip() {
        let dir = tempdir().unwrap();
        let manager = ConfigManager::with_base_dir(dir.path().to_path_buf()).unwrap();
        let mut config = EngineConfig::default();
        config.alerts.low_balance_ratio = 0.25;
        manager.save(&config).expect("save config");
        assert_eq!(manager.load().unwrap(), config);
    }

    #[test]
    fn partial_documents_fill_defaults() {
        let dir = tempdir().unwrap();
        let manager = ConfigManager::with_base_dir(dir.path().to_path_buf()).unwrap();
        fs::write(manager.path(), r#"{ "alerts": { "spike_window_minutes": 30 } }"#).unwrap();
        let config = manager.load().unwrap();
        assert_eq!(config.alerts.spike_window_minutes, 30);
        assert_eq!(config.alerts.spike_income_ratio, 0.20);
        assert_eq!(config.forecast, ForecastConfig::default());
    }

    #[test]
    fn rejects_non_positive_ratios() {
        let mut config = EngineConfig::default();
        config.forecast.warning_pace_ratio = 0.0;
        let err = config.validate().expect_err("zero ratio must fail");
        assert!(matches!(err, EngineError::Validation(ref m) if m.contains("warning_pace_ratio")));
    }
}
