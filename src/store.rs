//! Registry storage: the four tables shared by the client dashboard and the MPI reports.
//!
//! The registry is reached through an explicitly constructed handle implementing
//! [`RegistryStore`]. [`FileRegistry`] keeps the tables in one JSON document and applies every
//! write as a transaction: the change is made on a copy, the copy is persisted, and only then
//! does it replace the live state.

use crate::error::{DashboardError, Result};
use crate::schema::{AppointmentRecord, ClientLink, MasterClient};
use chrono::{NaiveDate, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

pub const DEFAULT_PAGE_SIZE: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRange {
    pub offset: usize,
    pub limit: usize,
}

impl PageRange {
    pub fn new(offset: usize, limit: usize) -> Self {
        Self { offset, limit }
    }
}

/// A row of `mpi_reports`. `report_data` is opaque here; `reports` decodes and migrates it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredReport {
    pub id: Uuid,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub report_data: serde_json::Value,
    pub created_at: chrono::DateTime<Utc>,
}

pub trait RegistryStore {
    fn master_clients(&self, page: PageRange) -> Result<Vec<MasterClient>>;

    fn client_links(&self, page: PageRange) -> Result<Vec<ClientLink>>;

    fn appointments(&self, page: PageRange) -> Result<Vec<AppointmentRecord>>;

    fn insert_master_client(&mut self, name: &str, tags: &[String]) -> Result<MasterClient>;

    fn update_master_tags(&mut self, id: Uuid, tags: &[String]) -> Result<()>;

    /// Links `identifier` to `master_id`, replacing any previous link for the identifier.
    fn upsert_client_link(&mut self, identifier: &str, master_id: Uuid) -> Result<ClientLink>;

    /// Creates a master client and links `identifier` to it. Either both rows are written or
    /// neither is.
    fn create_master_with_link(
        &mut self,
        name: &str,
        identifier: &str,
        tags: &[String],
    ) -> Result<MasterClient>;

    /// Inserts or replaces bookings keyed by booking id. Returns the number written.
    fn upsert_appointments(&mut self, records: &[AppointmentRecord]) -> Result<usize>;

    /// Stores report data for a period, overwriting the report already saved for the same
    /// (start, end) pair. Returns the report id.
    fn upsert_report(
        &mut self,
        start_date: NaiveDate,
        end_date: NaiveDate,
        report_data: serde_json::Value,
    ) -> Result<Uuid>;

    fn report(&self, id: Uuid) -> Result<Option<StoredReport>>;

    fn reports(&self) -> Result<Vec<StoredReport>>;

    fn delete_report(&mut self, id: Uuid) -> Result<bool>;
}

/// Reads a whole table by requesting consecutive pages until a short page comes back.
pub fn fetch_all<T, F>(page_size: usize, mut fetch_page: F) -> Result<Vec<T>>
where
    F: FnMut(PageRange) -> Result<Vec<T>>,
{
    let page_size = page_size.max(1);
    let mut all = Vec::new();
    let mut offset = 0;

    loop {
        let page = fetch_page(PageRange::new(offset, page_size))?;
        let fetched = page.len();
        all.extend(page);
        if fetched < page_size {
            break;
        }
        offset += page_size;
    }

    debug!("Fetched {} rows in pages of {}", all.len(), page_size);
    Ok(all)
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct RegistryState {
    #[serde(default)]
    master_clients: Vec<MasterClient>,
    #[serde(default)]
    client_links: Vec<ClientLink>,
    #[serde(default)]
    dashboard_appointments: Vec<AppointmentRecord>,
    #[serde(default)]
    mpi_reports: Vec<StoredReport>,
}

impl RegistryState {
    fn ensure_master(&self, id: Uuid) -> Result<()> {
        if self.master_clients.iter().any(|m| m.id == id) {
            Ok(())
        } else {
            Err(DashboardError::MasterNotFound(id))
        }
    }

    fn link(&mut self, identifier: &str, master_id: Uuid) -> ClientLink {
        if let Some(existing) = self
            .client_links
            .iter_mut()
            .find(|l| l.identifier == identifier)
        {
            existing.master_client_id = master_id;
            return existing.clone();
        }

        let link = ClientLink {
            id: Uuid::new_v4(),
            identifier: identifier.to_string(),
            master_client_id: master_id,
            created_at: Utc::now(),
        };
        self.client_links.push(link.clone());
        link
    }

    fn new_master(&mut self, name: &str, tags: &[String]) -> MasterClient {
        let master = MasterClient {
            id: Uuid::new_v4(),
            name: name.to_string(),
            tags: tags.to_vec(),
            notes: None,
            created_at: Utc::now(),
        };
        self.master_clients.push(master.clone());
        master
    }
}

fn page_of<T: Clone>(rows: &[T], page: PageRange) -> Vec<T> {
    rows.iter().skip(page.offset).take(page.limit).cloned().collect()
}

/// JSON-document registry. Opened at startup, handed to whoever needs it, closed at shutdown.
#[derive(Debug)]
pub struct FileRegistry {
    path: Option<PathBuf>,
    state: RegistryState,
}

impl FileRegistry {
    /// Opens the registry at `path`, starting empty when the file does not exist yet. The
    /// parent directory must exist by the time the first write happens.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let state = if path.exists() {
            let bytes = fs::read(&path).map_err(|e| storage_error(&path, e))?;
            serde_json::from_slice(&bytes)?
        } else {
            RegistryState::default()
        };

        info!(
            "Opened registry {} ({} masters, {} links, {} appointments, {} reports)",
            path.display(),
            state.master_clients.len(),
            state.client_links.len(),
            state.dashboard_appointments.len(),
            state.mpi_reports.len()
        );

        Ok(Self {
            path: Some(path),
            state,
        })
    }

    /// A registry that lives only as long as the handle.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            state: RegistryState::default(),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Flushes the current state and releases the handle.
    pub fn close(self) -> Result<()> {
        self.persist(&self.state)?;
        if let Some(path) = &self.path {
            debug!("Closed registry {}", path.display());
        }
        Ok(())
    }

    fn transact<T>(&mut self, op: impl FnOnce(&mut RegistryState) -> Result<T>) -> Result<T> {
        let mut next = self.state.clone();
        let out = op(&mut next)?;
        self.persist(&next)?;
        self.state = next;
        Ok(out)
    }

    fn persist(&self, state: &RegistryState) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let bytes = serde_json::to_vec_pretty(state)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, bytes).map_err(|e| storage_error(&tmp, e))?;
        fs::rename(&tmp, path).map_err(|e| storage_error(path, e))?;
        Ok(())
    }
}

fn storage_error(path: &Path, err: std::io::Error) -> DashboardError {
    DashboardError::Storage(format!("{}: {}", path.display(), err))
}

impl RegistryStore for FileRegistry {
    fn master_clients(&self, page: PageRange) -> Result<Vec<MasterClient>> {
        Ok(page_of(&self.state.master_clients, page))
    }

    fn client_links(&self, page: PageRange) -> Result<Vec<ClientLink>> {
        Ok(page_of(&self.state.client_links, page))
    }

    fn appointments(&self, page: PageRange) -> Result<Vec<AppointmentRecord>> {
        Ok(page_of(&self.state.dashboard_appointments, page))
    }

    fn insert_master_client(&mut self, name: &str, tags: &[String]) -> Result<MasterClient> {
        self.transact(|state| Ok(state.new_master(name, tags)))
    }

    fn update_master_tags(&mut self, id: Uuid, tags: &[String]) -> Result<()> {
        self.transact(|state| {
            let master = state
                .master_clients
                .iter_mut()
                .find(|m| m.id == id)
                .ok_or(DashboardError::MasterNotFound(id))?;
            master.tags = tags.to_vec();
            Ok(())
        })
    }

    fn upsert_client_link(&mut self, identifier: &str, master_id: Uuid) -> Result<ClientLink> {
        self.transact(|state| {
            state.ensure_master(master_id)?;
            Ok(state.link(identifier, master_id))
        })
    }

    fn create_master_with_link(
        &mut self,
        name: &str,
        identifier: &str,
        tags: &[String],
    ) -> Result<MasterClient> {
        self.transact(|state| {
            let master = state.new_master(name, tags);
            state.link(identifier, master.id);
            Ok(master)
        })
    }

    fn upsert_appointments(&mut self, records: &[AppointmentRecord]) -> Result<usize> {
        self.transact(|state| {
            let now = Utc::now();
            for record in records {
                match state
                    .dashboard_appointments
                    .iter_mut()
                    .find(|a| a.booking_id == record.booking_id)
                {
                    Some(existing) => {
                        let created_at = existing.created_at.or(record.created_at);
                        *existing = record.clone();
                        existing.created_at = created_at.or(Some(now));
                    }
                    None => {
                        let mut fresh = record.clone();
                        fresh.created_at = fresh.created_at.or(Some(now));
                        state.dashboard_appointments.push(fresh);
                    }
                }
            }
            Ok(records.len())
        })
    }

    fn upsert_report(
        &mut self,
        start_date: NaiveDate,
        end_date: NaiveDate,
        report_data: serde_json::Value,
    ) -> Result<Uuid> {
        self.transact(|state| {
            if let Some(existing) = state
                .mpi_reports
                .iter_mut()
                .find(|r| r.start_date == start_date && r.end_date == end_date)
            {
                existing.report_data = report_data;
                return Ok(existing.id);
            }

            let id = Uuid::new_v4();
            state.mpi_reports.push(StoredReport {
                id,
                start_date,
                end_date,
                report_data,
                created_at: Utc::now(),
            });
            Ok(id)
        })
    }

    fn report(&self, id: Uuid) -> Result<Option<StoredReport>> {
        Ok(self.state.mpi_reports.iter().find(|r| r.id == id).cloned())
    }

    fn reports(&self) -> Result<Vec<StoredReport>> {
        Ok(self.state.mpi_reports.clone())
    }

    fn delete_report(&mut self, id: Uuid) -> Result<bool> {
        if !self.state.mpi_reports.iter().any(|r| r.id == id) {
            return Ok(false);
        }
        self.transact(|state| {
            state.mpi_reports.retain(|r| r.id != id);
            Ok(true)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_fetch_all_crosses_page_boundaries() {
        let rows: Vec<u32> = (0..2500).collect();
        let mut calls = 0;
        let fetched = fetch_all(1000, |page| {
            calls += 1;
            Ok(page_of(&rows, page))
        })
        .unwrap();

        assert_eq!(fetched, rows);
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_fetch_all_exact_multiple_needs_trailing_empty_page() {
        let rows: Vec<u32> = (0..20).collect();
        let mut calls = 0;
        let fetched = fetch_all(10, |page| {
            calls += 1;
            Ok(page_of(&rows, page))
        })
        .unwrap();

        assert_eq!(fetched.len(), 20);
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_link_upsert_reassigns_identifier() {
        let mut registry = FileRegistry::in_memory();
        let a = registry.insert_master_client("A", &[]).unwrap();
        let b = registry.insert_master_client("B", &[]).unwrap();

        let first = registry.upsert_client_link("a@x.com", a.id).unwrap();
        let second = registry.upsert_client_link("a@x.com", b.id).unwrap();

        assert_eq!(first.id, second.id);
        let links = registry.client_links(PageRange::new(0, 10)).unwrap();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].master_client_id, b.id);
    }

    #[test]
    fn test_link_to_unknown_master_fails() {
        let mut registry = FileRegistry::in_memory();
        let err = registry
            .upsert_client_link("a@x.com", Uuid::new_v4())
            .unwrap_err();
        assert!(matches!(err, DashboardError::MasterNotFound(_)));
    }

    #[test]
    fn test_report_upsert_keeps_one_row_per_period() {
        let mut registry = FileRegistry::in_memory();
        let start = NaiveDate::from_ymd_opt(2025, 11, 3).unwrap();
        let end = NaiveDate::from_ymd_opt(2025, 11, 8).unwrap();

        let first = registry
            .upsert_report(start, end, serde_json::json!({"v": 1}))
            .unwrap();
        let second = registry
            .upsert_report(start, end, serde_json::json!({"v": 2}))
            .unwrap();

        assert_eq!(first, second);
        let reports = registry.reports().unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].report_data, serde_json::json!({"v": 2}));
    }

    #[test]
    fn test_file_registry_round_trips_through_disk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("registry.json");

        let mut registry = FileRegistry::open(&path).unwrap();
        let master = registry
            .create_master_with_link("Jo", "jo@x.com", &["VIP".to_string()])
            .unwrap();
        registry.close().unwrap();

        let reopened = FileRegistry::open(&path).unwrap();
        let masters = reopened.master_clients(PageRange::new(0, 10)).unwrap();
        let links = reopened.client_links(PageRange::new(0, 10)).unwrap();
        assert_eq!(masters, vec![master.clone()]);
        assert_eq!(links[0].master_client_id, master.id);
    }

    #[test]
    fn test_failed_write_leaves_no_orphan_master() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing").join("registry.json");

        let mut registry = FileRegistry::open(&path).unwrap();
        let err = registry
            .create_master_with_link("Jo", "jo@x.com", &[])
            .unwrap_err();

        assert!(matches!(err, DashboardError::Storage(_)));
        assert!(registry
            .master_clients(PageRange::new(0, 10))
            .unwrap()
            .is_empty());
        assert!(registry
            .client_links(PageRange::new(0, 10))
            .unwrap()
            .is_empty());
    }
}
