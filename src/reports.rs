//! Saved MPI reports.
//!
//! Report rows are stored inside a versioned envelope:
//!
//! ```json
//! { "schema_version": 2, "rows": [ { "date": "2025-11-03", "revenue": 470.0, ... } ] }
//! ```
//!
//! Payloads written before the envelope existed are bare arrays of column-labelled rows
//! (`"Date"` in epoch milliseconds, `"CA ($)"`, `"Heures payées"`, ...). They are treated as
//! version 1 and migrated on load.

use crate::engine::{aggregate_overview, OverviewRow};
use crate::error::{DashboardError, Result};
use crate::schema::{DailyRollup, ReportHeader, ReportSnapshot, Tier};
use crate::store::{RegistryStore, StoredReport};
use crate::utils::safe_ratio;
use chrono::{DateTime, NaiveDate};
use log::{debug, info, warn};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use uuid::Uuid;

pub const CURRENT_SCHEMA_VERSION: u64 = 2;

#[derive(Debug, Serialize, Deserialize)]
struct ReportEnvelope {
    schema_version: u64,
    rows: Vec<DailyRollup>,
}

/// Row layout of version 1 payloads.
#[derive(Debug, Deserialize)]
struct LegacyRow {
    #[serde(rename = "Date")]
    date: Value,
    #[serde(rename = "CA ($)", default)]
    revenue: Option<f64>,
    #[serde(rename = "Heures payées", default)]
    paid_hours: Option<f64>,
    #[serde(rename = "MPI ($/h)", default)]
    ratio: Option<f64>,
    #[serde(rename = "Jobs", default)]
    jobs: u32,
    #[serde(rename = "Employees", default)]
    employee_count: u32,
    #[serde(rename = "Employees List", default, deserialize_with = "legacy_list")]
    employees: Vec<String>,
    #[serde(rename = "Clients List", default, deserialize_with = "legacy_list")]
    clients: Vec<String>,
}

/// Lists in old payloads are either arrays or the "-" placeholder.
fn legacy_list<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|v| match v {
                Value::String(s) => Some(s),
                Value::Null => None,
                other => Some(other.to_string()),
            })
            .collect(),
        _ => Vec::new(),
    })
}

fn legacy_date(value: &Value) -> Result<NaiveDate> {
    match value {
        Value::Number(n) => {
            let millis = n
                .as_i64()
                .or_else(|| n.as_f64().map(|f| f as i64))
                .ok_or_else(|| DashboardError::MalformedReport(format!("bad date {}", n)))?;
            DateTime::from_timestamp_millis(millis)
                .map(|dt| dt.date_naive())
                .ok_or_else(|| DashboardError::MalformedReport(format!("bad date {}", millis)))
        }
        Value::String(s) => s
            .get(..10)
            .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
            .ok_or_else(|| DashboardError::MalformedReport(format!("bad date '{}'", s))),
        other => Err(DashboardError::MalformedReport(format!("bad date {}", other))),
    }
}

fn migrate_v1(rows: Vec<Value>) -> Result<Vec<DailyRollup>> {
    rows.into_iter()
        .map(|row| {
            let legacy: LegacyRow = serde_json::from_value(row)
                .map_err(|e| DashboardError::MalformedReport(e.to_string()))?;
            let revenue = legacy.revenue.unwrap_or(0.0);
            let paid_hours = legacy.paid_hours.unwrap_or(0.0);
            let ratio = legacy
                .ratio
                .unwrap_or_else(|| safe_ratio(revenue, paid_hours));
            Ok(DailyRollup {
                date: legacy_date(&legacy.date)?,
                revenue,
                paid_hours,
                ratio,
                jobs: legacy.jobs,
                employee_count: legacy.employee_count,
                employees: legacy.employees,
                clients: legacy.clients,
                tier: Tier::classify(ratio),
            })
        })
        .collect()
}

pub fn encode_rows(rows: &[DailyRollup]) -> Result<Value> {
    Ok(serde_json::to_value(ReportEnvelope {
        schema_version: CURRENT_SCHEMA_VERSION,
        rows: rows.to_vec(),
    })?)
}

/// Decodes a stored payload into current-version rows, migrating older layouts.
pub fn decode_rows(payload: Value) -> Result<Vec<DailyRollup>> {
    match payload {
        Value::Array(rows) => {
            debug!("Migrating {} legacy report rows", rows.len());
            migrate_v1(rows)
        }
        Value::Object(map) => {
            let version = map
                .get("schema_version")
                .and_then(Value::as_u64)
                .ok_or_else(|| {
                    DashboardError::MalformedReport("missing schema_version".to_string())
                })?;
            if version != CURRENT_SCHEMA_VERSION {
                return Err(DashboardError::UnsupportedSchemaVersion(version));
            }
            let envelope: ReportEnvelope = serde_json::from_value(Value::Object(map))?;
            Ok(envelope.rows)
        }
        other => Err(DashboardError::MalformedReport(format!(
            "expected an array or an envelope, found {}",
            other
        ))),
    }
}

fn snapshot_from(stored: StoredReport) -> Result<ReportSnapshot> {
    Ok(ReportSnapshot {
        id: stored.id,
        start_date: stored.start_date,
        end_date: stored.end_date,
        created_at: stored.created_at,
        rows: decode_rows(stored.report_data)?,
    })
}

/// Saves the rows for a period. A second save of the same (start, end) pair replaces the
/// first one's rows and keeps its id.
pub fn save_report<S: RegistryStore + ?Sized>(
    store: &mut S,
    start_date: NaiveDate,
    end_date: NaiveDate,
    rows: &[DailyRollup],
) -> Result<Uuid> {
    let id = store.upsert_report(start_date, end_date, encode_rows(rows)?)?;
    info!(
        "Saved report {} for {} to {} ({} days)",
        id,
        start_date,
        end_date,
        rows.len()
    );
    Ok(id)
}

pub fn load_report<S: RegistryStore + ?Sized>(
    store: &S,
    id: Uuid,
) -> Result<Option<ReportSnapshot>> {
    store.report(id)?.map(snapshot_from).transpose()
}

/// Headers of every saved report, most recent period first.
pub fn list_reports<S: RegistryStore + ?Sized>(store: &S) -> Result<Vec<ReportHeader>> {
    let mut headers: Vec<ReportHeader> = store
        .reports()?
        .into_iter()
        .map(|r| ReportHeader {
            id: r.id,
            start_date: r.start_date,
            end_date: r.end_date,
            created_at: r.created_at,
        })
        .collect();
    headers.sort_by(|a, b| b.start_date.cmp(&a.start_date));
    Ok(headers)
}

/// Deletes a report. Masters, links and appointments are left alone.
pub fn delete_report<S: RegistryStore + ?Sized>(store: &mut S, id: Uuid) -> Result<bool> {
    let deleted = store.delete_report(id)?;
    if deleted {
        info!("Deleted report {}", id);
    } else {
        debug!("Report {} was already gone", id);
    }
    Ok(deleted)
}

/// Cross-period comparison of the selected reports. Reports that are missing or cannot be
/// decoded are left out with a warning.
pub fn overview<S: RegistryStore + ?Sized>(store: &S, ids: &[Uuid]) -> Result<Vec<OverviewRow>> {
    let mut snapshots = Vec::with_capacity(ids.len());
    for id in ids {
        match load_report(store, *id) {
            Ok(Some(snapshot)) => snapshots.push(snapshot),
            Ok(None) => warn!("Report {} not found, skipping it in the overview", id),
            Err(DashboardError::Storage(msg)) => return Err(DashboardError::Storage(msg)),
            Err(e) => warn!("Report {} could not be decoded ({}), skipping it", id, e),
        }
    }
    Ok(aggregate_overview(&snapshots))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::FileRegistry;
    use serde_json::json;

    fn day(date: NaiveDate, revenue: f64, hours: f64) -> DailyRollup {
        let ratio = safe_ratio(revenue, hours);
        DailyRollup {
            date,
            revenue,
            paid_hours: hours,
            ratio,
            jobs: 3,
            employee_count: 2,
            employees: vec!["Angela".into(), "Mariana".into()],
            clients: vec!["Jo".into()],
            tier: Tier::classify(ratio),
        }
    }

    fn d(m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, m, day).unwrap()
    }

    #[test]
    fn test_save_same_period_overwrites() {
        let mut registry = FileRegistry::in_memory();
        let first = save_report(&mut registry, d(11, 3), d(11, 8), &[day(d(11, 3), 100.0, 4.0)])
            .unwrap();
        let second = save_report(&mut registry, d(11, 3), d(11, 8), &[day(d(11, 4), 500.0, 10.0)])
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(list_reports(&registry).unwrap().len(), 1);

        let snapshot = load_report(&registry, first).unwrap().unwrap();
        assert_eq!(snapshot.rows.len(), 1);
        assert_eq!(snapshot.rows[0].revenue, 500.0);
        assert_eq!(snapshot.rows[0].employees, vec!["Angela", "Mariana"]);
    }

    #[test]
    fn test_list_is_newest_period_first() {
        let mut registry = FileRegistry::in_memory();
        save_report(&mut registry, d(11, 3), d(11, 8), &[]).unwrap();
        save_report(&mut registry, d(11, 17), d(11, 22), &[]).unwrap();
        save_report(&mut registry, d(11, 10), d(11, 15), &[]).unwrap();

        let starts: Vec<NaiveDate> = list_reports(&registry)
            .unwrap()
            .iter()
            .map(|h| h.start_date)
            .collect();
        assert_eq!(starts, vec![d(11, 17), d(11, 10), d(11, 3)]);
    }

    #[test]
    fn test_legacy_payload_migrates_with_empty_lists() {
        // 2025-11-03T00:00:00Z
        let payload = json!([
            {
                "Date": 1762128000000i64,
                "CA ($)": 470.0,
                "Heures payées": 10.0,
                "MPI ($/h)": 47.0,
                "Jobs": 2,
                "Employees": 2,
                "Employees List": "-",
                "Tier": "Top Performing"
            },
            {
                "Date": 1762214400000i64,
                "CA ($)": 90.0,
                "Heures payées": 0.0,
                "MPI ($/h)": 0,
                "Jobs": 1,
                "Employees": 0
            }
        ]);

        let rows = decode_rows(payload).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].date, d(11, 3));
        assert_eq!(rows[0].tier, Tier::Top);
        assert!(rows[0].employees.is_empty());
        assert!(rows[0].clients.is_empty());
        assert_eq!(rows[1].date, d(11, 4));
        assert_eq!(rows[1].tier, Tier::Low);
    }

    #[test]
    fn test_legacy_null_amounts_read_as_zero() {
        let payload = json!([
            {
                "Date": 1762128000000i64,
                "CA ($)": null,
                "Heures payées": 8.0,
                "Jobs": 0,
                "Employees": 1
            },
            {
                "Date": 1762214400000i64,
                "CA ($)": 200.0,
                "Heures payées": null,
                "Jobs": 2
            }
        ]);

        let rows = decode_rows(payload).unwrap();
        assert_eq!(rows[0].revenue, 0.0);
        assert_eq!(rows[0].paid_hours, 8.0);
        assert_eq!(rows[0].ratio, 0.0);
        assert_eq!(rows[1].paid_hours, 0.0);
        assert_eq!(rows[1].ratio, 0.0);
        assert_eq!(rows[1].tier, Tier::Low);
    }

    #[test]
    fn test_unknown_schema_version_is_rejected() {
        let err = decode_rows(json!({"schema_version": 9, "rows": []})).unwrap_err();
        assert!(matches!(err, DashboardError::UnsupportedSchemaVersion(9)));

        let err = decode_rows(json!("oops")).unwrap_err();
        assert!(matches!(err, DashboardError::MalformedReport(_)));
    }

    #[test]
    fn test_overview_skips_reports_that_fail_to_load() {
        let mut registry = FileRegistry::in_memory();
        let w1 = save_report(&mut registry, d(11, 3), d(11, 8), &[day(d(11, 3), 100.0, 10.0)])
            .unwrap();
        let w2 = save_report(&mut registry, d(11, 10), d(11, 15), &[day(d(11, 10), 300.0, 20.0)])
            .unwrap();
        let broken = registry
            .upsert_report(d(11, 17), d(11, 22), json!({"schema_version": 7, "rows": []}))
            .unwrap();

        let rows = overview(&registry, &[w2, broken, Uuid::new_v4(), w1]).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].report_id, w1);
        assert_eq!(rows[1].report_id, w2);

        let revenue: f64 = rows.iter().map(|r| r.revenue).sum();
        let hours: f64 = rows.iter().map(|r| r.hours).sum();
        assert!((safe_ratio(revenue, hours) - 400.0 / 30.0).abs() < 1e-9);
    }

    #[test]
    fn test_delete_leaves_registry_alone() {
        let mut registry = FileRegistry::in_memory();
        let master = registry.insert_master_client("Jo", &[]).unwrap();
        let id = save_report(&mut registry, d(11, 3), d(11, 8), &[]).unwrap();

        assert!(delete_report(&mut registry, id).unwrap());
        assert!(!delete_report(&mut registry, id).unwrap());
        assert!(load_report(&registry, id).unwrap().is_none());
        assert_eq!(
            registry
                .master_clients(crate::store::PageRange::new(0, 10))
                .unwrap(),
            vec![master]
        );
    }
}
