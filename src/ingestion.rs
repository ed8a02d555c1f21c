//! Reading the weekly exports: the appointments workbook and the per-employee payroll
//! workbook. Cells are coerced one at a time and a bad cell costs at most its own row.

use crate::error::{DashboardError, Result};
use crate::identity::{
    identifier_from_parts, resolve_identifier, EMAIL_COLUMNS, NAME_COLUMNS, PHONE_COLUMNS,
};
use crate::schema::{AppointmentRecord, Cell, PayrollEntry, RawRecord};
use crate::utils::{
    excel_serial_to_datetime, parse_date_cell, parse_datetime_cell, parse_datetime_text,
    parse_hours_cell,
};
use calamine::{open_workbook_auto_from_rs, Data, Range, Reader};
use log::{debug, info, warn};
use std::collections::HashMap;
use std::io::Cursor;

pub const BOOKING_ID_COLUMNS: &[&str] = &["booking id", "booking_id"];
pub const APPOINTMENT_DATE_COLUMNS: &[&str] = &["appointment date", "appointment_date"];
pub const COST_COLUMNS: &[&str] = &["cost"];
pub const SERVICE_COLUMNS: &[&str] = &["service/class/event", "service_type"];
pub const TEAM_MEMBER_COLUMNS: &[&str] = &["team member", "team_member"];
pub const STATUS_COLUMNS: &[&str] = &["status"];

pub const PAYROLL_DATE_COLUMNS: &[&str] = &["start date"];
pub const PAYROLL_HOURS_COLUMNS: &[&str] = &["total hours", "length (hours & minutes)"];

/// One worksheet as a grid of cells. Row and column positions are absolute, so a header
/// offset counts from the top of the sheet even when the leading rows are empty.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SheetGrid {
    pub name: String,
    pub rows: Vec<Vec<Cell>>,
}

impl SheetGrid {
    pub fn new(name: impl Into<String>, rows: Vec<Vec<Cell>>) -> Self {
        Self {
            name: name.into(),
            rows,
        }
    }

    pub fn header(&self, header_row: usize) -> Vec<String> {
        self.rows
            .get(header_row)
            .map(|row| row.iter().map(Cell::as_text).collect())
            .unwrap_or_default()
    }

    pub fn first_non_blank_row(&self) -> Option<usize> {
        self.rows
            .iter()
            .position(|row| row.iter().any(|c| !c.is_blank()))
    }

    pub fn has_column(&self, header_row: usize, columns: &[&str]) -> bool {
        self.header(header_row)
            .iter()
            .any(|h| columns.iter().any(|c| h.eq_ignore_ascii_case(c)))
    }

    /// Rows below `header_row`, keyed by header text. Blank rows are dropped.
    pub fn records(&self, header_row: usize) -> Vec<RawRecord> {
        let header = self.header(header_row);
        self.rows
            .iter()
            .skip(header_row + 1)
            .map(|row| {
                header
                    .iter()
                    .enumerate()
                    .filter(|(_, name)| !name.is_empty())
                    .map(|(idx, name)| (name.clone(), row.get(idx).cloned().unwrap_or_default()))
                    .collect::<RawRecord>()
            })
            .filter(|record| !record.is_blank())
            .collect()
    }
}

/// Opens an `.xlsx`/`.xls`/`.ods` workbook from memory and returns every sheet in order.
pub fn read_workbook(bytes: &[u8]) -> Result<Vec<SheetGrid>> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes))
        .map_err(|e| DashboardError::Workbook(e.to_string()))?;

    let mut sheets = Vec::new();
    for name in workbook.sheet_names() {
        let range = workbook
            .worksheet_range(&name)
            .map_err(|e| DashboardError::Workbook(format!("sheet '{}': {}", name, e)))?;
        sheets.push(grid_from_range(name, &range));
    }

    debug!("Read workbook with {} sheets", sheets.len());
    Ok(sheets)
}

fn grid_from_range(name: String, range: &Range<Data>) -> SheetGrid {
    let (row0, col0) = range
        .start()
        .map(|(r, c)| (r as usize, c as usize))
        .unwrap_or((0, 0));

    let mut rows = vec![Vec::new(); row0];
    for row in range.rows() {
        let mut cells = vec![Cell::Empty; col0];
        cells.extend(row.iter().map(data_to_cell));
        rows.push(cells);
    }
    SheetGrid::new(name, rows)
}

fn data_to_cell(data: &Data) -> Cell {
    match data {
        Data::Empty => Cell::Empty,
        Data::String(s) => Cell::Text(s.clone()),
        Data::Float(f) => Cell::Number(*f),
        Data::Int(i) => Cell::Number(*i as f64),
        Data::Bool(b) => Cell::Bool(*b),
        Data::DateTime(dt) => excel_serial_to_datetime(dt.as_f64())
            .map(Cell::DateTime)
            .unwrap_or(Cell::Empty),
        Data::DateTimeIso(s) => parse_datetime_text(s)
            .map(Cell::DateTime)
            .unwrap_or_else(|| Cell::Text(s.clone())),
        Data::DurationIso(s) => Cell::Text(s.clone()),
        Data::Error(_) => Cell::Empty,
    }
}

/// Booking rows from an appointments export, one entry per line item.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AppointmentBatch {
    pub lines: Vec<AppointmentRecord>,
    /// Rows dropped because their appointment date could not be read.
    pub skipped_rows: usize,
}

/// Parses the first sheet of an appointments workbook.
pub fn read_appointments_workbook(bytes: &[u8]) -> Result<AppointmentBatch> {
    let sheets = read_workbook(bytes)?;
    let sheet = sheets
        .first()
        .ok_or_else(|| DashboardError::Workbook("appointments workbook has no sheets".into()))?;
    parse_appointment_sheet(sheet)
}

pub fn parse_appointment_sheet(sheet: &SheetGrid) -> Result<AppointmentBatch> {
    let Some(header_row) = sheet.first_non_blank_row() else {
        return Ok(AppointmentBatch::default());
    };

    for (columns, label) in [
        (BOOKING_ID_COLUMNS, "Booking ID"),
        (APPOINTMENT_DATE_COLUMNS, "Appointment date"),
    ] {
        if !sheet.has_column(header_row, columns) {
            return Err(DashboardError::MissingColumn {
                column: label.to_string(),
                source_name: format!("sheet '{}'", sheet.name),
            });
        }
    }

    Ok(parse_appointment_records(&sheet.records(header_row)))
}

pub fn parse_appointment_records(records: &[RawRecord]) -> AppointmentBatch {
    let mut batch = AppointmentBatch::default();

    for (idx, record) in records.iter().enumerate() {
        let Some(appointment_date) = parse_datetime_cell(&record.cell(APPOINTMENT_DATE_COLUMNS))
        else {
            debug!("Skipping appointment row {}: unreadable date", idx);
            batch.skipped_rows += 1;
            continue;
        };

        batch.lines.push(AppointmentRecord {
            booking_id: record.text(BOOKING_ID_COLUMNS),
            appointment_date,
            cost: record.cell(COST_COLUMNS).as_number().unwrap_or(0.0),
            customer_name: record.text(NAME_COLUMNS),
            email: record.text(EMAIL_COLUMNS),
            phone: record.text(PHONE_COLUMNS),
            service_type: record.text(SERVICE_COLUMNS),
            team_member: record.text(TEAM_MEMBER_COLUMNS),
            status: record.text(STATUS_COLUMNS),
            identifier: resolve_identifier(record),
            created_at: None,
        });
    }

    if batch.skipped_rows > 0 {
        warn!(
            "Skipped {} appointment rows with unreadable dates",
            batch.skipped_rows
        );
    }
    batch
}

/// Keeps the rows whose status matches `status`, ignoring case and padding.
pub fn filter_by_status(lines: Vec<AppointmentRecord>, status: &str) -> Vec<AppointmentRecord> {
    let status = status.trim();
    lines
        .into_iter()
        .filter(|line| line.status.trim().eq_ignore_ascii_case(status))
        .collect()
}

/// Folds line items into one record per booking id: costs are summed and each descriptive
/// field takes the first non-empty value in row order. Rows without a booking id cannot be
/// matched to anything and pass through unchanged.
pub fn consolidate_bookings(lines: Vec<AppointmentRecord>) -> Vec<AppointmentRecord> {
    let line_count = lines.len();
    let mut consolidated: Vec<AppointmentRecord> = Vec::new();
    let mut positions: HashMap<String, usize> = HashMap::new();

    for line in lines {
        if line.booking_id.is_empty() {
            consolidated.push(line);
            continue;
        }

        match positions.get(&line.booking_id) {
            Some(&pos) => {
                let booking = &mut consolidated[pos];
                booking.cost += line.cost;
                fill_if_empty(&mut booking.customer_name, line.customer_name);
                fill_if_empty(&mut booking.email, line.email);
                fill_if_empty(&mut booking.phone, line.phone);
                fill_if_empty(&mut booking.service_type, line.service_type);
                fill_if_empty(&mut booking.team_member, line.team_member);
                fill_if_empty(&mut booking.status, line.status);
                booking.identifier = identifier_from_parts(
                    &booking.email,
                    &booking.phone,
                    &booking.customer_name,
                );
            }
            None => {
                positions.insert(line.booking_id.clone(), consolidated.len());
                consolidated.push(line);
            }
        }
    }

    debug!(
        "Consolidated {} line items into {} bookings",
        line_count,
        consolidated.len()
    );
    consolidated
}

fn fill_if_empty(slot: &mut String, candidate: String) {
    if slot.is_empty() && !candidate.is_empty() {
        *slot = candidate;
    }
}

/// Lays freshly uploaded bookings over the stored ones; an upload wins for any booking id it
/// shares with the registry. Used to preview an upload before publishing it.
pub fn overlay_bookings(
    existing: Vec<AppointmentRecord>,
    incoming: Vec<AppointmentRecord>,
) -> Vec<AppointmentRecord> {
    let replaced: std::collections::HashSet<&str> = incoming
        .iter()
        .filter(|r| !r.booking_id.is_empty())
        .map(|r| r.booking_id.as_str())
        .collect();

    let mut merged: Vec<AppointmentRecord> = existing
        .into_iter()
        .filter(|r| !replaced.contains(r.booking_id.as_str()))
        .collect();
    merged.extend(incoming.iter().cloned());
    merged
}

pub fn is_payroll_sheet(sheet_name: &str) -> bool {
    sheet_name
        .trim_start()
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_digit())
}

/// Employee name from a payroll sheet title such as "1. Angela Batang".
pub fn employee_name(sheet_name: &str) -> String {
    match sheet_name.split_once('.') {
        Some((_, name)) => name.trim().to_string(),
        None => sheet_name.trim().to_string(),
    }
}

/// Paid hours from every employee sheet of a payroll workbook.
pub fn read_payroll_workbook(bytes: &[u8], header_row: usize) -> Result<Vec<PayrollEntry>> {
    let sheets = read_workbook(bytes)?;
    Ok(parse_payroll_sheets(&sheets, header_row))
}

pub fn parse_payroll_sheets(sheets: &[SheetGrid], header_row: usize) -> Vec<PayrollEntry> {
    let entries: Vec<PayrollEntry> = sheets
        .iter()
        .filter(|s| is_payroll_sheet(&s.name))
        .flat_map(|s| parse_payroll_sheet(s, header_row))
        .collect();

    info!(
        "Parsed {} payroll entries from {} sheets",
        entries.len(),
        sheets.iter().filter(|s| is_payroll_sheet(&s.name)).count()
    );
    entries
}

/// Entries with positive hours from one employee sheet. Sheets without a "Start date"
/// column produce nothing.
pub fn parse_payroll_sheet(sheet: &SheetGrid, header_row: usize) -> Vec<PayrollEntry> {
    if !sheet.has_column(header_row, PAYROLL_DATE_COLUMNS) {
        debug!("Sheet '{}' has no Start date column", sheet.name);
        return Vec::new();
    }

    let employee = employee_name(&sheet.name);
    sheet
        .records(header_row)
        .iter()
        .filter_map(|record| {
            let date = parse_date_cell(&record.cell(PAYROLL_DATE_COLUMNS))?;
            let hours = parse_hours_cell(&record.cell(PAYROLL_HOURS_COLUMNS));
            (hours > 0.0).then(|| PayrollEntry {
                employee: employee.clone(),
                date,
                hours,
            })
        })
        .collect()
}
