use crate::calc::{AggregatePolicy, DivisionRule, PointsPolicy};
use crate::db;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const SETTINGS_KEY: &str = "engine.config";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ReportCardPoints {
    BestN,
    Full,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ReportCardDivision {
    Points,
    Average,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    pub best_of: usize,
    pub top_bottom_count: usize,
    pub report_card_points: ReportCardPoints,
    pub report_card_division: ReportCardDivision,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            best_of: 7,
            top_bottom_count: 10,
            report_card_points: ReportCardPoints::BestN,
            report_card_division: ReportCardDivision::Points,
        }
    }
}

impl EngineConfig {
    pub fn report_card_policy(&self) -> AggregatePolicy {
        let mut policy = AggregatePolicy::report_card(self.best_of);
        if self.report_card_points == ReportCardPoints::Full {
            policy.points = PointsPolicy::Full;
        }
        if self.report_card_division == ReportCardDivision::Average {
            policy.division = DivisionRule::FromAverage;
        }
        policy
    }

    /// Applies a camelCase patch. Unknown keys and out-of-range values are
    /// rejected without touching `self`.
    pub fn apply_patch(&mut self, patch: &Map<String, Value>) -> Result<(), String> {
        let mut next = self.clone();
        for (k, v) in patch {
            match k.as_str() {
                "bestOf" => next.best_of = parse_bounded(v, k, 1, 20)?,
                "topBottomCount" => next.top_bottom_count = parse_bounded(v, k, 1, 100)?,
                "reportCardPoints" => {
                    next.report_card_points = serde_json::from_value(v.clone())
                        .map_err(|_| "reportCardPoints must be one of: bestN, full".to_string())?
                }
                "reportCardDivision" => {
                    next.report_card_division = serde_json::from_value(v.clone())
                        .map_err(|_| "reportCardDivision must be one of: points, average".to_string())?
                }
                _ => return Err(format!("unknown config field: {}", k)),
            }
        }
        *self = next;
        Ok(())
    }
}

fn parse_bounded(v: &Value, key: &str, min: u64, max: u64) -> Result<usize, String> {
    match v.as_u64() {
        Some(n) if (min..=max).contains(&n) => Ok(n as usize),
        _ => Err(format!("{} must be an integer in {}..={}", key, min, max)),
    }
}

/// Saved override merged over defaults. A malformed stored value falls back
/// to defaults instead of blocking reports.
pub fn load(conn: &Connection) -> anyhow::Result<EngineConfig> {
    let mut cfg = EngineConfig::default();
    if let Some(saved) = db::settings_get_json(conn, SETTINGS_KEY)? {
        if let Some(obj) = saved.as_object() {
            if let Err(e) = cfg.apply_patch(obj) {
                tracing::warn!(error = %e, "ignoring malformed engine config override");
            }
        }
    }
    Ok(cfg)
}

pub fn save(conn: &Connection, cfg: &EngineConfig) -> anyhow::Result<()> {
    db::settings_set_json(conn, SETTINGS_KEY, &serde_json::to_value(cfg)?)
}

pub fn reset(conn: &Connection) -> anyhow::Result<()> {
    db::settings_delete(conn, SETTINGS_KEY)
}
