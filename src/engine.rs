use crate::identity::{identifier_from_parts, ClientDirectory};
use crate::schema::{
    AppointmentRecord, DailyRollup, DateWindow, EntityKey, PayrollEntry, ReportSnapshot, Tier,
    TierThresholds,
};
use crate::utils::{month_key, safe_ratio};
use chrono::NaiveDate;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

/// Spend of one client (master or raw identifier) within a date window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRollup {
    pub key: EntityKey,
    pub client_name: String,
    pub tags: Vec<String>,
    pub total_spent: f64,
    pub visits: u32,
    pub avg_spent: f64,
    /// Spend per "YYYY-MM" month; every month of the table is present, zero-filled.
    pub monthly: BTreeMap<String, f64>,
}

/// The summary row under the client ranking. Its average is recomputed from the summed
/// totals, not averaged from the rows above it.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GrandTotal {
    pub total_spent: f64,
    pub visits: u32,
    pub avg_spent: f64,
    pub monthly: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientRollupTable {
    pub window: DateWindow,
    pub months: Vec<String>,
    /// Sorted by total spend, highest first.
    pub rows: Vec<EntityRollup>,
    pub grand_total: GrandTotal,
    /// In-window bookings with no email, phone or name to attribute them by.
    pub unresolved_visits: u32,
    pub unresolved_spend: f64,
}

/// Headline numbers above the client ranking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientSummary {
    pub total_revenue: f64,
    pub total_visits: u32,
    pub unique_clients: usize,
    pub avg_ticket: f64,
}

impl ClientRollupTable {
    pub fn summary(&self) -> ClientSummary {
        let total_revenue = self.grand_total.total_spent + self.unresolved_spend;
        let total_visits = self.grand_total.visits + self.unresolved_visits;
        ClientSummary {
            total_revenue,
            total_visits,
            unique_clients: self.rows.len(),
            avg_ticket: safe_ratio(total_revenue, total_visits as f64),
        }
    }

    pub fn row(&self, key: &EntityKey) -> Option<&EntityRollup> {
        self.rows.iter().find(|r| &r.key == key)
    }
}

#[derive(Default)]
struct EntityAccum {
    client_name: String,
    total: f64,
    visits: u32,
    monthly: BTreeMap<String, f64>,
}

/// Groups the bookings inside `window` by client and ranks clients by spend.
///
/// A booking belongs to its identifier's master client when the identifier is linked, and to
/// the identifier itself otherwise, so every attributable booking lands in exactly one row.
pub fn aggregate_by_entity(
    records: &[AppointmentRecord],
    directory: &ClientDirectory,
    window: &DateWindow,
) -> ClientRollupTable {
    let mut groups: BTreeMap<EntityKey, EntityAccum> = BTreeMap::new();
    let mut months: BTreeSet<String> = BTreeSet::new();
    let mut unresolved_visits = 0;
    let mut unresolved_spend = 0.0;

    for record in records.iter().filter(|r| window.contains(r.date())) {
        let identifier = if record.identifier.is_empty() {
            identifier_from_parts(&record.email, &record.phone, &record.customer_name)
        } else {
            record.identifier.clone()
        };
        if identifier.is_empty() {
            unresolved_visits += 1;
            unresolved_spend += record.cost;
            continue;
        }

        let month = month_key(record.date());
        months.insert(month.clone());

        let accum = groups.entry(directory.effective_key(&identifier)).or_default();
        if accum.client_name.is_empty() {
            accum.client_name = record.customer_name.clone();
        }
        accum.total += record.cost;
        accum.visits += 1;
        *accum.monthly.entry(month).or_insert(0.0) += record.cost;
    }

    let months: Vec<String> = months.into_iter().collect();
    let mut grand_total = GrandTotal {
        monthly: months.iter().map(|m| (m.clone(), 0.0)).collect(),
        ..GrandTotal::default()
    };

    let mut rows: Vec<EntityRollup> = groups
        .into_iter()
        .map(|(key, accum)| {
            let monthly: BTreeMap<String, f64> = months
                .iter()
                .map(|m| (m.clone(), accum.monthly.get(m).copied().unwrap_or(0.0)))
                .collect();

            grand_total.total_spent += accum.total;
            grand_total.visits += accum.visits;
            for (month, spent) in &monthly {
                *grand_total.monthly.entry(month.clone()).or_insert(0.0) += spent;
            }

            EntityRollup {
                tags: directory.tags_for(&key),
                key,
                client_name: accum.client_name,
                total_spent: accum.total,
                visits: accum.visits,
                avg_spent: safe_ratio(accum.total, accum.visits as f64),
                monthly,
            }
        })
        .collect();

    rows.sort_by(|a, b| b.total_spent.total_cmp(&a.total_spent));
    grand_total.avg_spent = safe_ratio(grand_total.total_spent, grand_total.visits as f64);

    debug!(
        "Client rollup {}..{}: {} clients over {} months, {} unattributed bookings",
        window.start,
        window.end,
        rows.len(),
        months.len(),
        unresolved_visits
    );

    ClientRollupTable {
        window: *window,
        months,
        rows,
        grand_total,
        unresolved_visits,
        unresolved_spend,
    }
}

#[derive(Default)]
struct LabourDay {
    hours: f64,
    employees: BTreeSet<String>,
}

#[derive(Default)]
struct SalesDay {
    revenue: f64,
    jobs: u32,
    clients: BTreeSet<String>,
}

pub fn aggregate_by_day(
    payroll: &[PayrollEntry],
    appointments: &[AppointmentRecord],
) -> Vec<DailyRollup> {
    aggregate_by_day_with(payroll, appointments, &TierThresholds::DEFAULT)
}

/// Daily revenue against paid hours. Produces exactly one row for every date seen in either
/// source, in date order; a side with no data for a date contributes zeros.
pub fn aggregate_by_day_with(
    payroll: &[PayrollEntry],
    appointments: &[AppointmentRecord],
    thresholds: &TierThresholds,
) -> Vec<DailyRollup> {
    let mut labour: BTreeMap<NaiveDate, LabourDay> = BTreeMap::new();
    for entry in payroll.iter().filter(|e| e.hours > 0.0) {
        let day = labour.entry(entry.date).or_default();
        day.hours += entry.hours;
        day.employees.insert(entry.employee.clone());
    }

    let mut sales: BTreeMap<NaiveDate, SalesDay> = BTreeMap::new();
    for appointment in appointments {
        let day = sales.entry(appointment.date()).or_default();
        day.revenue += appointment.cost;
        day.jobs += 1;
        if !appointment.customer_name.is_empty() {
            day.clients.insert(appointment.customer_name.clone());
        }
    }

    let dates: BTreeSet<NaiveDate> = labour.keys().chain(sales.keys()).copied().collect();

    dates
        .into_iter()
        .map(|date| {
            let (paid_hours, employees) = labour
                .remove(&date)
                .map(|d| (d.hours, d.employees.into_iter().collect::<Vec<_>>()))
                .unwrap_or_default();
            let (revenue, jobs, clients) = sales
                .remove(&date)
                .map(|d| (d.revenue, d.jobs, d.clients.into_iter().collect::<Vec<_>>()))
                .unwrap_or_default();

            let ratio = safe_ratio(revenue, paid_hours);
            DailyRollup {
                date,
                revenue,
                paid_hours,
                ratio,
                jobs,
                employee_count: employees.len() as u32,
                employees,
                clients,
                tier: Tier::classify_with(ratio, thresholds),
            }
        })
        .collect()
}

/// Single-report headline numbers.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PeriodSummary {
    pub total_revenue: f64,
    pub total_hours: f64,
    pub total_jobs: u32,
    /// Revenue over hours for the whole period.
    pub avg_ratio: f64,
    /// Mean of the daily jobs-per-employee figures; days without staff count as zero.
    pub avg_jobs_per_employee: f64,
    pub revenue_per_job: f64,
    pub max_employees: u32,
}

impl PeriodSummary {
    pub fn from_rows(rows: &[DailyRollup]) -> Self {
        if rows.is_empty() {
            return Self::default();
        }

        let total_revenue: f64 = rows.iter().map(|r| r.revenue).sum();
        let total_hours: f64 = rows.iter().map(|r| r.paid_hours).sum();
        let total_jobs: u32 = rows.iter().map(|r| r.jobs).sum();
        let daily_jobs_per_employee: f64 = rows
            .iter()
            .map(|r| safe_ratio(r.jobs as f64, r.employee_count as f64))
            .sum();

        Self {
            total_revenue,
            total_hours,
            total_jobs,
            avg_ratio: safe_ratio(total_revenue, total_hours),
            avg_jobs_per_employee: daily_jobs_per_employee / rows.len() as f64,
            revenue_per_job: safe_ratio(total_revenue, total_jobs as f64),
            max_employees: rows.iter().map(|r| r.employee_count).max().unwrap_or(0),
        }
    }
}

/// One saved period in the cross-period comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverviewRow {
    pub report_id: Uuid,
    pub period: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub revenue: f64,
    pub hours: f64,
    pub jobs: u32,
    /// Daily employee counts summed over the period, i.e. staffed employee-days.
    pub employee_days: u32,
    pub ratio: f64,
    pub jobs_per_employee: f64,
    pub revenue_per_job: f64,
    pub tier: Tier,
}

/// Re-aggregates each snapshot's daily rows into one line per period, oldest period first.
pub fn aggregate_overview(snapshots: &[ReportSnapshot]) -> Vec<OverviewRow> {
    let mut rows: Vec<OverviewRow> = snapshots
        .iter()
        .map(|snapshot| {
            let revenue: f64 = snapshot.rows.iter().map(|r| r.revenue).sum();
            let hours: f64 = snapshot.rows.iter().map(|r| r.paid_hours).sum();
            let jobs: u32 = snapshot.rows.iter().map(|r| r.jobs).sum();
            let employee_days: u32 = snapshot.rows.iter().map(|r| r.employee_count).sum();
            let ratio = safe_ratio(revenue, hours);

            OverviewRow {
                report_id: snapshot.id,
                period: snapshot.header().period_label(),
                start_date: snapshot.start_date,
                end_date: snapshot.end_date,
                revenue,
                hours,
                jobs,
                employee_days,
                ratio,
                jobs_per_employee: safe_ratio(jobs as f64, employee_days as f64),
                revenue_per_job: safe_ratio(revenue, jobs as f64),
                tier: Tier::classify(ratio),
            }
        })
        .collect();

    rows.sort_by_key(|r| r.start_date);
    rows
}
