//! Client identity: deriving an identifier for a booking row and resolving it to a master
//! client through the link table.

use crate::error::Result;
use crate::schema::{ClientLink, EntityKey, MasterClient, RawRecord};
use crate::store::{fetch_all, RegistryStore};
use log::{debug, info};
use std::collections::{BTreeSet, HashMap};
use uuid::Uuid;

pub const EMAIL_COLUMNS: &[&str] = &["email"];
pub const PHONE_COLUMNS: &[&str] = &["phone"];
pub const NAME_COLUMNS: &[&str] = &["customer name", "customer_name"];

/// The first non-empty of email, phone and customer name, or "" when the row carries none of
/// them. An empty identifier marks a row that cannot be attributed to a client.
pub fn resolve_identifier(record: &RawRecord) -> String {
    identifier_from_parts(
        &record.text(EMAIL_COLUMNS),
        &record.text(PHONE_COLUMNS),
        &record.text(NAME_COLUMNS),
    )
}

pub fn identifier_from_parts(email: &str, phone: &str, name: &str) -> String {
    [email, phone, name]
        .into_iter()
        .map(str::trim)
        .find(|v| !v.is_empty())
        .unwrap_or_default()
        .to_string()
}

pub fn resolve_master(identifier: &str, links: &HashMap<String, Uuid>) -> Option<Uuid> {
    links.get(identifier).copied()
}

/// Masters and links as fetched from the registry for one recomputation pass.
#[derive(Debug, Clone, Default)]
pub struct ClientDirectory {
    masters: HashMap<Uuid, MasterClient>,
    links: HashMap<String, Uuid>,
}

impl ClientDirectory {
    pub fn new(masters: Vec<MasterClient>, links: Vec<ClientLink>) -> Self {
        Self {
            masters: masters.into_iter().map(|m| (m.id, m)).collect(),
            links: links
                .into_iter()
                .map(|l| (l.identifier, l.master_client_id))
                .collect(),
        }
    }

    /// Loads every master and link, paging through the registry sequentially.
    pub fn load<S: RegistryStore + ?Sized>(store: &S, page_size: usize) -> Result<Self> {
        let masters = fetch_all(page_size, |page| store.master_clients(page))?;
        let links = fetch_all(page_size, |page| store.client_links(page))?;
        debug!(
            "Loaded client directory: {} masters, {} links",
            masters.len(),
            links.len()
        );
        Ok(Self::new(masters, links))
    }

    pub fn resolve_master(&self, identifier: &str) -> Option<Uuid> {
        resolve_master(identifier, &self.links)
    }

    pub fn effective_key(&self, identifier: &str) -> EntityKey {
        match self.resolve_master(identifier) {
            Some(id) => EntityKey::Master(id),
            None => EntityKey::Identifier(identifier.to_string()),
        }
    }

    pub fn master(&self, id: &Uuid) -> Option<&MasterClient> {
        self.masters.get(id)
    }

    pub fn masters(&self) -> impl Iterator<Item = &MasterClient> {
        self.masters.values()
    }

    /// Tags of the entity's master record; empty for raw identifiers and dangling links.
    pub fn tags_for(&self, key: &EntityKey) -> Vec<String> {
        key.master_id()
            .and_then(|id| self.masters.get(&id))
            .map(|m| m.tags.clone())
            .unwrap_or_default()
    }

    pub fn is_linked(&self, identifier: &str) -> bool {
        self.links.contains_key(identifier)
    }

    /// Identifiers from `identifiers` that have no link yet, deduplicated and sorted. These are
    /// the candidates offered when merging identities into a master.
    pub fn unlinked_identifiers<'a>(
        &self,
        identifiers: impl IntoIterator<Item = &'a str>,
    ) -> Vec<String> {
        identifiers
            .into_iter()
            .filter(|i| !i.is_empty() && !self.is_linked(i))
            .map(str::to_string)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

/// Points `identifier` at `master_id`. Repeating the call is a no-op; storage errors are
/// returned to the caller without retrying.
pub fn merge<S: RegistryStore + ?Sized>(
    store: &mut S,
    identifier: &str,
    master_id: Uuid,
) -> Result<ClientLink> {
    let link = store.upsert_client_link(identifier, master_id)?;
    info!("Linked identifier '{}' to master {}", identifier, master_id);
    Ok(link)
}

pub fn create_master<S: RegistryStore + ?Sized>(
    store: &mut S,
    name: &str,
    tags: &[String],
) -> Result<MasterClient> {
    let master = store.insert_master_client(name, tags)?;
    info!("Created master client '{}' ({})", master.name, master.id);
    Ok(master)
}

pub fn create_master_and_link<S: RegistryStore + ?Sized>(
    store: &mut S,
    name: &str,
    identifier: &str,
) -> Result<MasterClient> {
    let master = store.create_master_with_link(name, identifier, &[])?;
    info!(
        "Created master client '{}' ({}) for identifier '{}'",
        master.name, master.id, identifier
    );
    Ok(master)
}

/// A tag change made on one row of the client ranking table.
#[derive(Debug, Clone, PartialEq)]
pub struct TagEdit {
    pub key: EntityKey,
    pub client_name: String,
    pub tags: Vec<String>,
}

/// Applies tag edits. Rows still keyed by a raw identifier get a master client, a link and
/// the tags in a single registry write. Returns the number of edits applied.
pub fn save_tags<S: RegistryStore + ?Sized>(store: &mut S, edits: &[TagEdit]) -> Result<usize> {
    for edit in edits {
        match &edit.key {
            EntityKey::Master(id) => store.update_master_tags(*id, &edit.tags)?,
            EntityKey::Identifier(identifier) => {
                let master =
                    store.create_master_with_link(&edit.client_name, identifier, &edit.tags)?;
                debug!(
                    "Promoted identifier '{}' to master {} while saving tags",
                    identifier, master.id
                );
            }
        }
    }
    Ok(edits.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Cell;
    use crate::store::{FileRegistry, PageRange};

    #[test]
    fn test_identifier_priority() {
        let record = RawRecord::new()
            .with("Email", Cell::text(""))
            .with("Phone", Cell::text("555"))
            .with("Customer name", Cell::text("Jo"));
        assert_eq!(resolve_identifier(&record), "555");

        let record = RawRecord::new()
            .with("EMAIL", Cell::text("jo@x.com"))
            .with("Phone", Cell::text("555"));
        assert_eq!(resolve_identifier(&record), "jo@x.com");

        let record = RawRecord::new().with("customer_name", Cell::text(" Jo "));
        assert_eq!(resolve_identifier(&record), "Jo");
    }

    #[test]
    fn test_identifier_empty_when_nothing_usable() {
        let record = RawRecord::new()
            .with("Email", Cell::Empty)
            .with("Cost", Cell::Number(10.0));
        assert_eq!(resolve_identifier(&record), "");
    }

    #[test]
    fn test_directory_falls_back_to_identifier() {
        let mut registry = FileRegistry::in_memory();
        let master = create_master_and_link(&mut registry, "Jo", "jo@x.com").unwrap();
        let directory = ClientDirectory::load(&registry, 1000).unwrap();

        assert_eq!(
            directory.effective_key("jo@x.com"),
            EntityKey::Master(master.id)
        );
        assert_eq!(
            directory.effective_key("555"),
            EntityKey::Identifier("555".to_string())
        );
        assert!(directory
            .tags_for(&EntityKey::Identifier("555".to_string()))
            .is_empty());
    }

    #[test]
    fn test_merge_is_idempotent() {
        let mut registry = FileRegistry::in_memory();
        let master = create_master(&mut registry, "Jo", &[]).unwrap();

        merge(&mut registry, "555", master.id).unwrap();
        merge(&mut registry, "555", master.id).unwrap();

        let links = registry.client_links(PageRange::new(0, 10)).unwrap();
        assert_eq!(links.len(), 1);
    }

    #[test]
    fn test_save_tags_promotes_raw_identifier() {
        let mut registry = FileRegistry::in_memory();
        let edits = vec![TagEdit {
            key: EntityKey::Identifier("jo@x.com".to_string()),
            client_name: "Jo".to_string(),
            tags: vec!["VIP".to_string()],
        }];

        assert_eq!(save_tags(&mut registry, &edits).unwrap(), 1);

        let directory = ClientDirectory::load(&registry, 1000).unwrap();
        let key = directory.effective_key("jo@x.com");
        assert!(key.master_id().is_some());
        assert_eq!(directory.tags_for(&key), vec!["VIP".to_string()]);
    }

    #[test]
    fn test_unlinked_identifiers() {
        let mut registry = FileRegistry::in_memory();
        create_master_and_link(&mut registry, "Jo", "jo@x.com").unwrap();
        let directory = ClientDirectory::load(&registry, 1000).unwrap();

        let unlinked =
            directory.unlinked_identifiers(["b@x.com", "jo@x.com", "", "a@x.com", "b@x.com"]);
        assert_eq!(unlinked, vec!["a@x.com".to_string(), "b@x.com".to_string()]);
    }
}
