use crate::error::{DashboardError, Result};
use crate::schema::DailyRollup;
use log::debug;
use std::io::Cursor;

pub const DEFAULT_SHEET_NAME: &str = "MPI";

pub const EXPORT_HEADERS: [&str; 9] = [
    "Date",
    "Performance",
    "MPI ($/h)",
    "Revenue ($)",
    "Paid Hours",
    "Jobs",
    "Employees",
    "Employees List",
    "Clients List",
];

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Writes the daily rollup table to a single-sheet `.xlsx` workbook and returns its bytes.
/// Money, hours and ratios are rounded to cents here; stored rows keep full precision.
pub fn export_daily_rollups(rows: &[DailyRollup], sheet_name: &str) -> Result<Vec<u8>> {
    let mut book = umya_spreadsheet::new_file_empty_worksheet();
    let ws = book
        .new_sheet(sheet_name)
        .map_err(|e| DashboardError::Export(format!("sheet '{}': {}", sheet_name, e)))?;

    for (idx, header) in EXPORT_HEADERS.iter().enumerate() {
        ws.get_cell_mut((idx as u32 + 1, 1)).set_value_string(*header);
    }

    for (offset, row) in rows.iter().enumerate() {
        let r = offset as u32 + 2;
        ws.get_cell_mut((1, r))
            .set_value_string(row.date.format("%Y-%m-%d").to_string());
        ws.get_cell_mut((2, r)).set_value_string(row.tier.label());
        ws.get_cell_mut((3, r)).set_value_number(round2(row.ratio));
        ws.get_cell_mut((4, r)).set_value_number(round2(row.revenue));
        ws.get_cell_mut((5, r)).set_value_number(round2(row.paid_hours));
        ws.get_cell_mut((6, r)).set_value_number(row.jobs);
        ws.get_cell_mut((7, r)).set_value_number(row.employee_count);
        ws.get_cell_mut((8, r)).set_value_string(row.employees.join(", "));
        ws.get_cell_mut((9, r)).set_value_string(row.clients.join(", "));
    }

    let mut out = Cursor::new(Vec::new());
    umya_spreadsheet::writer::xlsx::write_writer(&book, &mut out)
        .map_err(|e| DashboardError::Export(e.to_string()))?;

    let bytes = out.into_inner();
    debug!(
        "Exported {} daily rows to sheet '{}' ({} bytes)",
        rows.len(),
        sheet_name,
        bytes.len()
    );
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingestion::read_workbook;
    use crate::schema::{Cell, Tier};
    use chrono::NaiveDate;

    #[test]
    fn test_export_reads_back_rounded() {
        let rows = vec![DailyRollup {
            date: NaiveDate::from_ymd_opt(2025, 11, 3).unwrap(),
            revenue: 470.004,
            paid_hours: 10.0,
            ratio: 47.0004,
            jobs: 2,
            employee_count: 2,
            employees: vec!["Angela".into(), "Mariana".into()],
            clients: vec!["Jo".into()],
            tier: Tier::Top,
        }];

        let bytes = export_daily_rollups(&rows, DEFAULT_SHEET_NAME).unwrap();
        let sheets = read_workbook(&bytes).unwrap();
        assert_eq!(sheets.len(), 1);
        assert_eq!(sheets[0].name, "MPI");
        assert_eq!(sheets[0].header(0), EXPORT_HEADERS.to_vec());

        let records = sheets[0].records(0);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].text(&["Date"]), "2025-11-03");
        assert_eq!(records[0].text(&["Performance"]), "Top Performing");
        assert_eq!(records[0].cell(&["Revenue ($)"]).as_number(), Some(470.0));
        assert_eq!(records[0].cell(&["Jobs"]), Cell::Number(2.0));
        assert_eq!(records[0].text(&["Employees List"]), "Angela, Mariana");
    }
}
