use crate::error::{DashboardError, Result};
use crate::utils::parse_period_string;
use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// A spreadsheet cell after it has left the workbook reader.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Cell {
    #[default]
    Empty,
    Text(String),
    Number(f64),
    Bool(bool),
    DateTime(NaiveDateTime),
}

impl Cell {
    pub fn text(value: impl Into<String>) -> Self {
        Cell::Text(value.into())
    }

    pub fn is_blank(&self) -> bool {
        match self {
            Cell::Empty => true,
            Cell::Text(s) => s.trim().is_empty(),
            Cell::Number(n) => n.is_nan(),
            _ => false,
        }
    }

    /// Trimmed textual form. Whole numbers print without a fractional part so that phone
    /// numbers stored as numeric cells resolve to the same identifier as their text form.
    pub fn as_text(&self) -> String {
        match self {
            Cell::Empty => String::new(),
            Cell::Text(s) => s.trim().to_string(),
            Cell::Number(n) if n.is_nan() => String::new(),
            Cell::Number(n) if n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 => {
                format!("{:.0}", n)
            }
            Cell::Number(n) => n.to_string(),
            Cell::Bool(b) => b.to_string(),
            Cell::DateTime(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }

    /// Numeric value, if the cell holds one or holds text that parses as one.
    pub fn as_number(&self) -> Option<f64> {
        let value = match self {
            Cell::Number(n) => *n,
            Cell::Text(s) => s.trim().replace(',', "").parse::<f64>().ok()?,
            _ => return None,
        };
        value.is_finite().then_some(value)
    }
}

/// One spreadsheet row, addressed by column header.
///
/// Header lookups ignore case and surrounding whitespace, and an absent column reads as an
/// empty cell.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawRecord {
    columns: Vec<(String, Cell)>,
}

impl RawRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, column: impl Into<String>, cell: Cell) -> Self {
        self.insert(column, cell);
        self
    }

    pub fn insert(&mut self, column: impl Into<String>, cell: Cell) {
        let column = column.into().trim().to_string();
        match self
            .columns
            .iter_mut()
            .find(|(name, _)| name.eq_ignore_ascii_case(&column))
        {
            Some((_, existing)) => *existing = cell,
            None => self.columns.push((column, cell)),
        }
    }

    pub fn get(&self, column: &str) -> Option<&Cell> {
        let wanted = column.trim();
        self.columns
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(wanted))
            .map(|(_, cell)| cell)
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.get(column).is_some()
    }

    /// Trimmed text of the first of `columns` present in the row, or "".
    pub fn text(&self, columns: &[&str]) -> String {
        columns
            .iter()
            .find_map(|c| self.get(c))
            .map(Cell::as_text)
            .unwrap_or_default()
    }

    pub fn cell(&self, columns: &[&str]) -> Cell {
        columns
            .iter()
            .find_map(|c| self.get(c))
            .cloned()
            .unwrap_or_default()
    }

    pub fn is_blank(&self) -> bool {
        self.columns.iter().all(|(_, cell)| cell.is_blank())
    }
}

impl<S: Into<String>> FromIterator<(S, Cell)> for RawRecord {
    fn from_iter<I: IntoIterator<Item = (S, Cell)>>(iter: I) -> Self {
        let mut record = RawRecord::new();
        for (column, cell) in iter {
            record.insert(column, cell);
        }
        record
    }
}

/// A consolidated booking, one per booking id, as kept in `dashboard_appointments`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppointmentRecord {
    pub booking_id: String,
    pub appointment_date: NaiveDateTime,
    pub cost: f64,
    #[serde(default)]
    pub customer_name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub service_type: String,
    #[serde(default)]
    pub team_member: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub identifier: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl AppointmentRecord {
    pub fn date(&self) -> NaiveDate {
        self.appointment_date.date()
    }
}

/// One employee's paid time on one calendar day, from a payroll sheet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayrollEntry {
    pub employee: String,
    pub date: NaiveDate,
    pub hours: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MasterClient {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientLink {
    pub id: Uuid,
    pub identifier: String,
    pub master_client_id: Uuid,
    pub created_at: DateTime<Utc>,
}

/// The bucket a transaction is grouped under: its master client when linked, otherwise the
/// raw identifier standing in for a client that has not been committed to the registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum EntityKey {
    Master(Uuid),
    Identifier(String),
}

impl EntityKey {
    pub fn master_id(&self) -> Option<Uuid> {
        match self {
            EntityKey::Master(id) => Some(*id),
            EntityKey::Identifier(_) => None,
        }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKey::Master(id) => write!(f, "{}", id),
            EntityKey::Identifier(ident) => write!(f, "{}", ident),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TierThresholds {
    #[schemars(description = "Lowest MPI ($/h) classified as Top Performing")]
    pub top: f64,
    #[schemars(description = "Lowest MPI ($/h) classified as Good")]
    pub good: f64,
}

impl TierThresholds {
    pub const DEFAULT: TierThresholds = TierThresholds {
        top: 47.0,
        good: 35.0,
    };
}

impl Default for TierThresholds {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "PascalCase")]
pub enum Tier {
    Top,
    Good,
    Low,
}

impl Tier {
    pub fn classify(ratio: f64) -> Tier {
        Self::classify_with(ratio, &TierThresholds::DEFAULT)
    }

    pub fn classify_with(ratio: f64, thresholds: &TierThresholds) -> Tier {
        if ratio >= thresholds.top {
            Tier::Top
        } else if ratio >= thresholds.good {
            Tier::Good
        } else {
            Tier::Low
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Tier::Top => "Top Performing",
            Tier::Good => "Good",
            Tier::Low => "Low Performing",
        }
    }

    /// Chart colour for the band.
    pub fn color(&self) -> &'static str {
        match self {
            Tier::Top => "#2980b9",
            Tier::Good => "#2ecc71",
            Tier::Low => "#e74c3c",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Revenue and labour for one calendar day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct DailyRollup {
    pub date: NaiveDate,
    #[schemars(description = "Summed appointment cost for the day")]
    pub revenue: f64,
    #[schemars(description = "Summed paid hours across all employees")]
    pub paid_hours: f64,
    #[schemars(description = "Revenue divided by paid hours, 0 when no hours were paid")]
    pub ratio: f64,
    pub jobs: u32,
    pub employee_count: u32,
    pub employees: Vec<String>,
    pub clients: Vec<String>,
    pub tier: Tier,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportHeader {
    pub id: Uuid,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub created_at: DateTime<Utc>,
}

impl ReportHeader {
    pub fn period_label(&self) -> String {
        format!("{} to {}", self.start_date, self.end_date)
    }

    /// Sidebar label, prefixed with the ISO week of the start date.
    pub fn label(&self) -> String {
        format!(
            "[W{}] {}",
            self.start_date.iso_week().week(),
            self.period_label()
        )
    }
}

/// A saved reporting period. Snapshots are never edited in place; saving the same period
/// again replaces the rows wholesale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportSnapshot {
    pub id: Uuid,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub created_at: DateTime<Utc>,
    pub rows: Vec<DailyRollup>,
}

impl ReportSnapshot {
    pub fn header(&self) -> ReportHeader {
        ReportHeader {
            id: self.id,
            start_date: self.start_date,
            end_date: self.end_date,
            created_at: self.created_at,
        }
    }
}

/// Inclusive calendar-date window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateWindow {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self> {
        if end < start {
            return Err(DashboardError::DateError(format!(
                "Window end {} is before start {}",
                end, start
            )));
        }
        Ok(Self { start, end })
    }

    /// Window from a "YYYY-MM" or "YYYY-MM:YYYY-MM" period string.
    pub fn from_period(period: &str) -> Result<Self> {
        let (start, end) = parse_period_string(period)?;
        Self::new(start, end)
    }

    /// Smallest window holding every appointment, or `None` when there are none.
    pub fn covering(records: &[AppointmentRecord]) -> Option<Self> {
        let start = records.iter().map(AppointmentRecord::date).min()?;
        let end = records.iter().map(AppointmentRecord::date).max()?;
        Some(Self { start, end })
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_boundaries() {
        assert_eq!(Tier::classify(47.0), Tier::Top);
        assert_eq!(Tier::classify(46.999), Tier::Good);
        assert_eq!(Tier::classify(35.0), Tier::Good);
        assert_eq!(Tier::classify(34.999), Tier::Low);
        assert_eq!(Tier::classify(0.0), Tier::Low);
        assert_eq!(Tier::classify(120.0), Tier::Top);
    }

    #[test]
    fn test_tier_custom_thresholds() {
        let thresholds = TierThresholds {
            top: 60.0,
            good: 40.0,
        };
        assert_eq!(Tier::classify_with(50.0, &thresholds), Tier::Good);
        assert_eq!(Tier::classify_with(60.0, &thresholds), Tier::Top);
        assert_eq!(Tier::classify_with(39.9, &thresholds), Tier::Low);
    }

    #[test]
    fn test_raw_record_lookup_ignores_case_and_padding() {
        let record = RawRecord::new()
            .with(" Email ", Cell::text("a@x.com"))
            .with("Phone", Cell::Number(5551234.0));

        assert_eq!(record.text(&["email"]), "a@x.com");
        assert_eq!(record.text(&["PHONE"]), "5551234");
        assert_eq!(record.text(&["customer name"]), "");
        assert!(!record.has_column("Customer name"));
    }

    #[test]
    fn test_cell_numbers() {
        assert_eq!(Cell::text(" 12.50 ").as_number(), Some(12.5));
        assert_eq!(Cell::text("1,200").as_number(), Some(1200.0));
        assert_eq!(Cell::text("n/a").as_number(), None);
        assert_eq!(Cell::Empty.as_number(), None);
        assert!(Cell::text("   ").is_blank());
    }

    #[test]
    fn test_date_window() {
        let window = DateWindow::from_period("2025-02").unwrap();
        assert!(window.contains(NaiveDate::from_ymd_opt(2025, 2, 28).unwrap()));
        assert!(!window.contains(NaiveDate::from_ymd_opt(2025, 3, 1).unwrap()));

        let start = NaiveDate::from_ymd_opt(2025, 3, 2).unwrap();
        let end = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();
        assert!(DateWindow::new(start, end).is_err());
    }

    #[test]
    fn test_tier_colors_are_distinct() {
        assert_eq!(Tier::Top.color(), "#2980b9");
        assert_eq!(Tier::Good.color(), "#2ecc71");
        assert_eq!(Tier::Low.color(), "#e74c3c");
        assert_eq!(Tier::classify(20.0).color(), Tier::Low.color());
    }

    #[test]
    fn test_window_covering_bookings() {
        let booking = |day: u32, hour: u32| AppointmentRecord {
            booking_id: format!("B{}", day),
            appointment_date: NaiveDate::from_ymd_opt(2025, 11, day)
                .unwrap()
                .and_hms_opt(hour, 30, 0)
                .unwrap(),
            cost: 10.0,
            customer_name: String::new(),
            email: String::new(),
            phone: String::new(),
            service_type: String::new(),
            team_member: String::new(),
            status: String::new(),
            identifier: String::new(),
            created_at: None,
        };

        let window = DateWindow::covering(&[booking(7, 9), booking(3, 18), booking(5, 12)]).unwrap();
        assert_eq!(window.start, NaiveDate::from_ymd_opt(2025, 11, 3).unwrap());
        assert_eq!(window.end, NaiveDate::from_ymd_opt(2025, 11, 7).unwrap());

        let single = DateWindow::covering(&[booking(4, 23)]).unwrap();
        assert_eq!(single.start, single.end);

        assert!(DateWindow::covering(&[]).is_none());
    }

    #[test]
    fn test_report_label_uses_iso_week() {
        let header = ReportHeader {
            id: Uuid::new_v4(),
            start_date: NaiveDate::from_ymd_opt(2025, 11, 3).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2025, 11, 8).unwrap(),
            created_at: Utc::now(),
        };
        assert_eq!(header.label(), "[W45] 2025-11-03 to 2025-11-08");
    }
}
