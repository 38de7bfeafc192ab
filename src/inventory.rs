//! Persistent inventory of banknotes and coins.
//!
//! Three denomination -> count tables are kept: banknotes in the stacker,
//! coins in payout tubes, and coins routed to the cashbox. Every mutation
//! is written through to a JSON document using write-to-temp plus atomic
//! rename, so a crash leaves either the old or the new document.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::Result;

/// Deep copy of the inventory tables at one point in time.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct InventorySnapshot {
    pub banknotes: BTreeMap<u32, u32>,
    pub coins: BTreeMap<u32, u32>,
    pub coins_in_cashbox: BTreeMap<u32, u32>,
    pub last_updated_utc: DateTime<Utc>,
}

#[derive(Clone, Debug)]
struct Tables {
    banknotes: BTreeMap<u32, u32>,
    coins: BTreeMap<u32, u32>,
    coins_in_cashbox: BTreeMap<u32, u32>,
    last_updated: DateTime<Utc>,
}

impl Tables {
    fn empty() -> Self {
        Self {
            banknotes: BTreeMap::new(),
            coins: BTreeMap::new(),
            coins_in_cashbox: BTreeMap::new(),
            last_updated: Utc::now(),
        }
    }
}

/// On-disk shape: denomination/count arrays, not maps, so the document
/// stays diffable and readable by hand.
#[derive(Debug, Serialize, Deserialize)]
struct Document {
    banknotes: Vec<Entry>,
    coins: Vec<Entry>,
    coins_in_cashbox: Vec<Entry>,
    last_updated_utc: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Entry {
    denomination: u32,
    count: u32,
}

fn entries(table: &BTreeMap<u32, u32>) -> Vec<Entry> {
    table
        .iter()
        .map(|(&denomination, &count)| Entry {
            denomination,
            count,
        })
        .collect()
}

fn table(entries: Vec<Entry>) -> BTreeMap<u32, u32> {
    entries
        .into_iter()
        .map(|entry| (entry.denomination, entry.count))
        .collect()
}

impl Document {
    fn from_tables(tables: &Tables) -> Self {
        Self {
            banknotes: entries(&tables.banknotes),
            coins: entries(&tables.coins),
            coins_in_cashbox: entries(&tables.coins_in_cashbox),
            last_updated_utc: tables.last_updated,
        }
    }

    fn into_tables(self) -> Tables {
        Tables {
            banknotes: table(self.banknotes),
            coins: table(self.coins),
            coins_in_cashbox: table(self.coins_in_cashbox),
            last_updated: self.last_updated_utc,
        }
    }
}

/// Inventory tables behind a single mutex, with write-through
/// persistence.
pub struct InventoryStore {
    state: Mutex<Tables>,
    path: Option<PathBuf>,
}

impl InventoryStore {
    /// Loads the inventory document, or starts empty when there is none.
    ///
    /// A document that fails to load is logged and replaced on the next
    /// write; the service must come up regardless.
    pub fn load(path: Option<PathBuf>) -> Self {
        let state = match path.as_deref() {
            Some(path) => match Self::read_document(path) {
                Ok(tables) => tables,
                Err(err) => {
                    if path.exists() {
                        log::warn!(
                            "Failed to load inventory from {}: {err}, starting empty",
                            path.display()
                        );
                    } else {
                        log::debug!(
                            "No inventory document at {}, starting empty",
                            path.display()
                        );
                    }
                    Tables::empty()
                }
            },
            None => Tables::empty(),
        };

        Self {
            state: Mutex::new(state),
            path,
        }
    }

    /// A store that is never persisted.
    pub fn in_memory() -> Self {
        Self::load(None)
    }

    fn read_document(path: &Path) -> Result<Tables> {
        let json = fs::read_to_string(path)?;
        let document: Document = serde_json::from_str(&json)?;
        Ok(document.into_tables())
    }

    pub fn register_banknote_accepted(&self, denomination: u32) {
        self.mutate(|tables| {
            *tables.banknotes.entry(denomination).or_insert(0) += 1;
        });
    }

    pub fn register_coin_accepted(&self, denomination: u32) {
        self.mutate(|tables| {
            *tables.coins.entry(denomination).or_insert(0) += 1;
        });
    }

    pub fn register_coin_to_cashbox_accepted(&self, denomination: u32) {
        self.mutate(|tables| {
            *tables.coins_in_cashbox.entry(denomination).or_insert(0) += 1;
        });
    }

    /// Records a coin paid out of a tube. Counts never go negative; a
    /// dispense with no recorded coins is logged and ignored.
    pub fn register_coin_dispensed(&self, denomination: u32) {
        self.mutate(|tables| match tables.coins.get_mut(&denomination) {
            Some(count) if *count > 1 => *count -= 1,
            Some(_) => {
                tables.coins.remove(&denomination);
            }
            None => log::warn!("Dispense of {denomination} with no recorded tube coins"),
        });
    }

    pub fn reset_banknotes(&self) {
        self.mutate(|tables| tables.banknotes.clear());
    }

    pub fn reset_coins(&self) {
        self.mutate(|tables| tables.coins.clear());
    }

    pub fn reset_coins_in_cashbox(&self) {
        self.mutate(|tables| tables.coins_in_cashbox.clear());
    }

    /// Deep copy of the current tables.
    pub fn snapshot(&self) -> InventorySnapshot {
        let tables = self.state.lock();
        InventorySnapshot {
            banknotes: tables.banknotes.clone(),
            coins: tables.coins.clone(),
            coins_in_cashbox: tables.coins_in_cashbox.clone(),
            last_updated_utc: tables.last_updated,
        }
    }

    /// Forces the current state onto disk.
    pub fn flush(&self) {
        let tables = self.state.lock();
        self.persist(&tables);
    }

    fn mutate(&self, apply: impl FnOnce(&mut Tables)) {
        let mut tables = self.state.lock();
        apply(&mut tables);
        tables.last_updated = Utc::now();
        self.persist(&tables);
    }

    fn persist(&self, tables: &Tables) {
        let Some(path) = self.path.as_deref() else {
            return;
        };

        if let Err(err) = Self::write_document(path, tables) {
            log::error!("Failed to persist inventory to {}: {err}", path.display());
        }
    }

    fn write_document(path: &Path, tables: &Tables) -> Result<()> {
        let json = serde_json::to_string_pretty(&Document::from_tables(tables))?;

        let tmp = path.with_extension("tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, path)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("mdb-inventory-{name}-{}.json", std::process::id()))
    }

    #[test]
    fn accepts_accumulate_per_denomination() {
        let store = InventoryStore::in_memory();

        store.register_banknote_accepted(1000);
        store.register_banknote_accepted(1000);
        store.register_coin_accepted(20);
        store.register_coin_to_cashbox_accepted(10);

        let snapshot = store.snapshot();
        assert_eq!(snapshot.banknotes.get(&1000), Some(&2));
        assert_eq!(snapshot.coins.get(&20), Some(&1));
        assert_eq!(snapshot.coins_in_cashbox.get(&10), Some(&1));
    }

    #[test]
    fn dispense_never_goes_negative() {
        let store = InventoryStore::in_memory();

        store.register_coin_accepted(50);
        store.register_coin_dispensed(50);
        // Tube is empty now; further dispenses are ignored.
        store.register_coin_dispensed(50);
        store.register_coin_dispensed(20);

        let snapshot = store.snapshot();
        assert!(snapshot.coins.is_empty());
    }

    #[test]
    fn resets_clear_one_table_only() {
        let store = InventoryStore::in_memory();

        store.register_banknote_accepted(1000);
        store.register_coin_accepted(20);
        store.reset_coins();

        let snapshot = store.snapshot();
        assert_eq!(snapshot.banknotes.get(&1000), Some(&1));
        assert!(snapshot.coins.is_empty());
    }

    #[test]
    fn persisted_document_matches_memory_after_each_mutation() {
        let path = scratch_path("write-through");
        let _ = fs::remove_file(&path);

        let store = InventoryStore::load(Some(path.clone()));
        store.register_banknote_accepted(2000);
        store.register_coin_accepted(50);
        store.register_coin_dispensed(50);

        let reloaded = InventoryStore::load(Some(path.clone()));
        let expected = store.snapshot();
        let loaded = reloaded.snapshot();
        assert_eq!(loaded.banknotes, expected.banknotes);
        assert_eq!(loaded.coins, expected.coins);
        assert_eq!(loaded.coins_in_cashbox, expected.coins_in_cashbox);
        assert_eq!(loaded.last_updated_utc, expected.last_updated_utc);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn corrupt_document_starts_empty() {
        let path = scratch_path("corrupt");
        fs::write(&path, "not json at all").expect("write scratch file");

        let store = InventoryStore::load(Some(path.clone()));
        assert!(store.snapshot().banknotes.is_empty());

        // First mutation replaces the broken document.
        store.register_banknote_accepted(1000);
        let reloaded = InventoryStore::load(Some(path.clone()));
        assert_eq!(reloaded.snapshot().banknotes.get(&1000), Some(&1));

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn missing_document_starts_empty() {
        let path = scratch_path("missing");
        let _ = fs::remove_file(&path);

        let store = InventoryStore::load(Some(path));
        assert!(store.snapshot().coins.is_empty());
    }
}
