//! # MPI Dashboard
//!
//! Client identity reconciliation and performance reporting for a service business that
//! exports its bookings and payroll as spreadsheets.
//!
//! ## Core Concepts
//!
//! - **Identifier**: the first non-empty of email, phone and customer name on a booking row
//! - **Master Client**: a canonical client that any number of identifiers can be linked to
//! - **Client Rollup**: spend, visits and a month pivot per master client (or unlinked identifier)
//! - **MPI**: revenue per paid hour for a calendar day, classified into performance tiers
//! - **Report Snapshot**: the daily MPI rows of one period, saved once per (start, end) pair
//!
//! ## Example
//!
//! ```rust,ignore
//! use mpi_dashboard::*;
//!
//! let config = DashboardConfig {
//!     store_path: Some("registry.json".into()),
//!     ..DashboardConfig::default()
//! };
//! let mut dashboard = Dashboard::open(config)?;
//!
//! let rows = dashboard.build_daily_report(&payroll_xlsx, &appointments_xlsx)?;
//! let summary = PeriodSummary::from_rows(&rows);
//! println!("MPI {:.2} $/h over {} jobs", summary.avg_ratio, summary.total_jobs);
//!
//! let report_id = dashboard.save_report(&rows)?;
//! dashboard.close()?;
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod export;
pub mod identity;
pub mod ingestion;
pub mod reports;
pub mod schema;
pub mod store;
pub mod utils;
pub mod view;

pub use config::{DashboardConfig, PREDEFINED_TAGS};
pub use engine::{
    aggregate_by_day, aggregate_by_day_with, aggregate_by_entity, aggregate_overview,
    ClientRollupTable, ClientSummary, EntityRollup, GrandTotal, OverviewRow, PeriodSummary,
};
pub use error::{DashboardError, Result};
pub use export::export_daily_rollups;
pub use identity::{resolve_identifier, resolve_master, ClientDirectory, TagEdit};
pub use reports::CURRENT_SCHEMA_VERSION;
pub use schema::*;
pub use store::{FileRegistry, PageRange, RegistryStore};
pub use view::ViewState;

use ingestion::{consolidate_bookings, filter_by_status, overlay_bookings};
use log::{debug, info, warn};
use store::fetch_all;
use uuid::Uuid;

/// Outcome of publishing an appointments upload to the registry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PublishSummary {
    /// Bookings written after line items were consolidated.
    pub published: usize,
    /// Rows dropped because their appointment date could not be read.
    pub skipped_rows: usize,
    /// Consolidated rows left out because they carry no booking id to key them by.
    pub missing_booking_id: usize,
}

/// The operations a presentation layer calls, over one registry handle.
///
/// The handle is passed in (or opened from the config) and given back by
/// [`Dashboard::into_store`] or [`Dashboard::close`]; nothing here keeps a global connection.
pub struct Dashboard<S: RegistryStore> {
    config: DashboardConfig,
    store: S,
}

impl Dashboard<FileRegistry> {
    /// Opens the registry named by `config.store_path`, or an in-memory one when unset.
    pub fn open(config: DashboardConfig) -> Result<Self> {
        let store = match &config.store_path {
            Some(path) => FileRegistry::open(path)?,
            None => FileRegistry::in_memory(),
        };
        Self::new(config, store)
    }

    pub fn close(self) -> Result<()> {
        self.store.close()
    }
}

impl<S: RegistryStore> Dashboard<S> {
    pub fn new(config: DashboardConfig, store: S) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, store })
    }

    pub fn config(&self) -> &DashboardConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    pub fn directory(&self) -> Result<ClientDirectory> {
        ClientDirectory::load(&self.store, self.config.page_size)
    }

    /// Every stored booking.
    pub fn appointments(&self) -> Result<Vec<AppointmentRecord>> {
        fetch_all(self.config.page_size, |page| self.store.appointments(page))
    }

    /// Parses an appointments workbook, consolidates its line items per booking id and
    /// upserts the result in chunks.
    pub fn publish_appointments(&mut self, workbook: &[u8]) -> Result<PublishSummary> {
        let batch = ingestion::read_appointments_workbook(workbook)?;
        let (bookings, unkeyed): (Vec<_>, Vec<_>) = consolidate_bookings(batch.lines)
            .into_iter()
            .partition(|r| !r.booking_id.is_empty());

        if !unkeyed.is_empty() {
            warn!(
                "Leaving out {} appointment rows without a booking id",
                unkeyed.len()
            );
        }

        let mut published = 0;
        for chunk in bookings.chunks(self.config.upsert_chunk_size) {
            published += self.store.upsert_appointments(chunk)?;
            debug!("Upserted {} of {} bookings", published, bookings.len());
        }

        info!("Published {} bookings", published);
        Ok(PublishSummary {
            published,
            skipped_rows: batch.skipped_rows,
            missing_booking_id: unkeyed.len(),
        })
    }

    /// The stored bookings with an unpublished upload laid over them, for previewing the
    /// client report before publishing.
    pub fn preview_upload(&self, workbook: &[u8]) -> Result<Vec<AppointmentRecord>> {
        let batch = ingestion::read_appointments_workbook(workbook)?;
        let incoming = consolidate_bookings(batch.lines);
        debug!("Previewing {} uploaded bookings", incoming.len());
        Ok(overlay_bookings(self.appointments()?, incoming))
    }

    /// Client ranking over the stored bookings.
    pub fn client_report(&self, window: &DateWindow) -> Result<ClientRollupTable> {
        let records = self.appointments()?;
        self.client_report_over(&records, window)
    }

    /// Client ranking over the given bookings, resolved through the current registry links.
    pub fn client_report_over(
        &self,
        records: &[AppointmentRecord],
        window: &DateWindow,
    ) -> Result<ClientRollupTable> {
        let directory = self.directory()?;
        Ok(aggregate_by_entity(records, &directory, window))
    }

    /// Identifiers in the stored bookings that are not linked to a master client yet.
    pub fn unlinked_identifiers(&self) -> Result<Vec<String>> {
        let directory = self.directory()?;
        let records = self.appointments()?;
        Ok(directory.unlinked_identifiers(records.iter().map(|r| r.identifier.as_str())))
    }

    /// Daily MPI rows from a payroll workbook and an appointments workbook. Only lines with
    /// the configured status count, and every line of the export counts as one job.
    pub fn build_daily_report(
        &self,
        payroll_workbook: &[u8],
        appointments_workbook: &[u8],
    ) -> Result<Vec<DailyRollup>> {
        let payroll =
            ingestion::read_payroll_workbook(payroll_workbook, self.config.payroll_header_row)?;
        let batch = ingestion::read_appointments_workbook(appointments_workbook)?;
        let confirmed = filter_by_status(batch.lines, &self.config.confirmed_status);

        let rows = aggregate_by_day_with(&payroll, &confirmed, &self.config.tier_thresholds);
        info!(
            "Built daily report: {} days from {} payroll entries and {} appointment lines",
            rows.len(),
            payroll.len(),
            confirmed.len()
        );
        Ok(rows)
    }

    /// Saves rows under the period spanned by their dates. Returns `None` for an empty table.
    pub fn save_report(&mut self, rows: &[DailyRollup]) -> Result<Option<Uuid>> {
        let (Some(start), Some(end)) = (
            rows.iter().map(|r| r.date).min(),
            rows.iter().map(|r| r.date).max(),
        ) else {
            debug!("Nothing to save: the report has no rows");
            return Ok(None);
        };
        reports::save_report(&mut self.store, start, end, rows).map(Some)
    }

    pub fn load_report(&self, id: Uuid) -> Result<Option<ReportSnapshot>> {
        reports::load_report(&self.store, id)
    }

    pub fn list_reports(&self) -> Result<Vec<ReportHeader>> {
        reports::list_reports(&self.store)
    }

    pub fn delete_report(&mut self, id: Uuid) -> Result<bool> {
        reports::delete_report(&mut self.store, id)
    }

    pub fn overview(&self, ids: &[Uuid]) -> Result<Vec<OverviewRow>> {
        reports::overview(&self.store, ids)
    }

    pub fn export_report(&self, rows: &[DailyRollup]) -> Result<Vec<u8>> {
        export_daily_rollups(rows, &self.config.export_sheet_name)
    }

    pub fn save_tags(&mut self, edits: &[TagEdit]) -> Result<usize> {
        let unknown: Vec<&str> = edits
            .iter()
            .flat_map(|e| e.tags.iter())
            .filter(|t| !self.config.tag_vocabulary.contains(t))
            .map(String::as_str)
            .collect();
        if !unknown.is_empty() {
            debug!("Saving tags outside the vocabulary: {:?}", unknown);
        }
        identity::save_tags(&mut self.store, edits)
    }

    pub fn merge(&mut self, identifier: &str, master_id: Uuid) -> Result<ClientLink> {
        identity::merge(&mut self.store, identifier, master_id)
    }

    pub fn create_master(&mut self, name: &str, tags: &[String]) -> Result<MasterClient> {
        identity::create_master(&mut self.store, name, tags)
    }

    pub fn create_master_and_link(
        &mut self,
        name: &str,
        identifier: &str,
    ) -> Result<MasterClient> {
        identity::create_master_and_link(&mut self.store, name, identifier)
    }
}
