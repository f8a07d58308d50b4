//! Engine settings read and validated from configuration.
//!
//! Both policy knobs (freshness threshold and the known-bad repair target)
//! are configuration, never constants in the engine.

use crate::domain::calendar::{FreshnessPolicy, TradingCalendar};
use crate::domain::error::CascadeError;
use crate::domain::instrument::Classification;
use crate::domain::repair::RepairTarget;
use crate::domain::source::{SourceId, SourcePriority};
use crate::domain::throttle::GateLimits;
use crate::ports::config_port::ConfigPort;
use chrono::NaiveDate;
use std::time::Duration;

pub const DEFAULT_WORKERS: usize = 4;
pub const DEFAULT_HISTORY_START: &str = "2000-01-01";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_MIN_INTERVAL_MS: u64 = 500;
pub const DEFAULT_HTTP_CONCURRENCY: usize = 4;

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub priority: SourcePriority,
    /// Sources left out of default runs.
    pub slow: Vec<SourceId>,
    pub freshness: FreshnessPolicy,
    pub history_start: NaiveDate,
    pub workers: usize,
    pub include_empty: bool,
    /// Sync also queues instruments holding less history than this, in
    /// years. Zero turns the check off.
    pub min_years: f64,
    pub repair: Option<RepairTarget>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            priority: SourcePriority::default_order(),
            slow: vec![SourceId::Iol],
            freshness: FreshnessPolicy::default(),
            history_start: NaiveDate::from_ymd_opt(2000, 1, 1).unwrap_or_default(),
            workers: DEFAULT_WORKERS,
            include_empty: true,
            min_years: 0.0,
            repair: None,
        }
    }
}

impl EngineSettings {
    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, CascadeError> {
        let priority = match config.get_string("sources", "order") {
            Some(list) => SourcePriority::parse_list(&list)?,
            None => SourcePriority::default_order(),
        };
        if priority.sources().is_empty() {
            return Err(invalid("sources", "order", "at least one source is required"));
        }

        let slow = match config.get_string("sources", "slow") {
            Some(_) => parse_sources(config.get_list("sources", "slow"))?,
            None => vec![SourceId::Iol],
        };

        let workers = config.get_int("run", "workers", DEFAULT_WORKERS as i64);
        if workers < 1 {
            return Err(invalid("run", "workers", "workers must be at least 1"));
        }

        let history_start = match config.get_string("run", "history_start") {
            Some(s) => parse_date(&s, "run", "history_start")?,
            None => parse_date(DEFAULT_HISTORY_START, "run", "history_start")?,
        };

        let lag = config.get_int("freshness", "max_lag_trading_days", 1);
        if lag < 0 {
            return Err(invalid(
                "freshness",
                "max_lag_trading_days",
                "max_lag_trading_days must be non-negative",
            ));
        }
        let holidays = config
            .get_list("freshness", "holidays")
            .iter()
            .map(|s| parse_date(s, "freshness", "holidays"))
            .collect::<Result<Vec<_>, _>>()?;

        let min_years = config.get_double("sync", "min_years", 0.0);
        if !min_years.is_finite() || min_years < 0.0 {
            return Err(invalid("sync", "min_years", "min_years must be a non-negative number"));
        }

        let repair = repair_target(config)?;

        Ok(Self {
            priority,
            slow,
            freshness: FreshnessPolicy {
                max_lag_trading_days: lag as u32,
                calendar: TradingCalendar::new(holidays),
            },
            history_start,
            workers: workers as usize,
            include_empty: config.get_bool("sync", "include_empty", true),
            min_years,
            repair,
        })
    }

    pub fn is_slow(&self, id: SourceId) -> bool {
        self.slow.contains(&id)
    }
}

fn repair_target(config: &dyn ConfigPort) -> Result<Option<RepairTarget>, CascadeError> {
    let source = config.get_string("repair", "source");
    let classification = config.get_string("repair", "classification");
    match (source, classification) {
        (None, None) => Ok(None),
        (Some(s), Some(c)) => Ok(Some(RepairTarget {
            source: s.parse()?,
            classification: c.parse()?,
        })),
        (Some(_), None) => Err(CascadeError::ConfigMissing {
            section: "repair".to_string(),
            key: "classification".to_string(),
        }),
        (None, Some(_)) => Err(CascadeError::ConfigMissing {
            section: "repair".to_string(),
            key: "source".to_string(),
        }),
    }
}

/// Connection and throttling settings for one source, from `[source.<id>]`.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceSettings {
    pub id: SourceId,
    pub base_url: Option<String>,
    pub timeout: Duration,
    pub limits: GateLimits,
    /// External driver for browser-backed sources.
    pub command: Option<String>,
}

impl SourceSettings {
    pub fn from_config(
        config: &dyn ConfigPort,
        id: SourceId,
        slow: bool,
    ) -> Result<Self, CascadeError> {
        let section = format!("source.{}", id.as_str());
        let default_concurrency = if slow { 1 } else { DEFAULT_HTTP_CONCURRENCY };

        let timeout = config.get_int(&section, "timeout_secs", DEFAULT_TIMEOUT_SECS as i64);
        if timeout <= 0 {
            return Err(invalid(&section, "timeout_secs", "timeout_secs must be positive"));
        }
        let concurrency = config.get_int(&section, "max_concurrency", default_concurrency as i64);
        if concurrency < 1 {
            return Err(invalid(
                &section,
                "max_concurrency",
                "max_concurrency must be at least 1",
            ));
        }
        let interval = config.get_int(&section, "min_interval_ms", DEFAULT_MIN_INTERVAL_MS as i64);
        if interval < 0 {
            return Err(invalid(
                &section,
                "min_interval_ms",
                "min_interval_ms must be non-negative",
            ));
        }

        Ok(Self {
            id,
            base_url: config.get_string(&section, "base_url"),
            timeout: Duration::from_secs(timeout as u64),
            limits: GateLimits::new(concurrency as usize, Duration::from_millis(interval as u64)),
            command: config.get_string(&section, "command"),
        })
    }
}

fn parse_sources(list: Vec<String>) -> Result<Vec<SourceId>, CascadeError> {
    list.iter().map(|s| s.parse()).collect()
}

pub fn parse_date(value: &str, section: &str, key: &str) -> Result<NaiveDate, CascadeError> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").map_err(|_| CascadeError::ConfigInvalid {
        section: section.to_string(),
        key: key.to_string(),
        reason: format!("invalid date '{}', expected YYYY-MM-DD", value.trim()),
    })
}

fn invalid(section: &str, key: &str, reason: &str) -> CascadeError {
    CascadeError::ConfigInvalid {
        section: section.to_string(),
        key: key.to_string(),
        reason: reason.to_string(),
    }
}

/// Used by the repair CLI flags, which override `[repair]`.
pub fn parse_repair_override(
    source: Option<&str>,
    classification: Option<&str>,
    configured: Option<&RepairTarget>,
) -> Result<RepairTarget, CascadeError> {
    let source = match (source, configured) {
        (Some(s), _) => s.parse::<SourceId>()?,
        (None, Some(t)) => t.source,
        (None, None) => {
            return Err(CascadeError::ConfigMissing {
                section: "repair".to_string(),
                key: "source".to_string(),
            });
        }
    };
    let classification = match (classification, configured) {
        (Some(c), _) => c.parse::<Classification>()?,
        (None, Some(t)) => t.classification,
        (None, None) => {
            return Err(CascadeError::ConfigMissing {
                section: "repair".to_string(),
                key: "classification".to_string(),
            });
        }
    };
    Ok(RepairTarget {
        source,
        classification,
    })
}
