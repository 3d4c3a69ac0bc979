//! Registry of open tables.

use std::collections::HashMap;
use std::sync::Arc;

use arbor_common::{ArborError, Result, Schema};
use parking_lot::RwLock;

use crate::btree::BTreeFile;

/// Maps table ids to their open tree files.
#[derive(Debug, Default)]
pub struct Catalog {
    tables: RwLock<HashMap<u32, Arc<BTreeFile>>>,
}

impl Catalog {
    /// Creates an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `file` under its table id. Each id registers once.
    pub fn register(&self, file: Arc<BTreeFile>) -> Result<()> {
        let mut tables = self.tables.write();
        if tables.contains_key(&file.table_id()) {
            return Err(ArborError::TableAlreadyRegistered(file.table_id()));
        }
        tables.insert(file.table_id(), file);
        Ok(())
    }

    /// Returns the tree file registered for `table_id`.
    pub fn get(&self, table_id: u32) -> Result<Arc<BTreeFile>> {
        self.tables
            .read()
            .get(&table_id)
            .cloned()
            .ok_or(ArborError::TableNotFound(table_id))
    }

    /// Returns the schema of `table_id`.
    pub fn schema(&self, table_id: u32) -> Result<Schema> {
        Ok(self.get(table_id)?.schema().clone())
    }

    /// Removes and returns the registration for `table_id`.
    pub fn unregister(&self, table_id: u32) -> Result<Arc<BTreeFile>> {
        self.tables
            .write()
            .remove(&table_id)
            .ok_or(ArborError::TableNotFound(table_id))
    }

    /// Ids of every registered table, in ascending order.
    pub fn table_ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.tables.read().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Number of registered tables.
    pub fn len(&self) -> usize {
        self.tables.read().len()
    }

    /// Returns true when no table is registered.
    pub fn is_empty(&self) -> bool {
        self.tables.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_common::{ColumnType, StorageConfig};
    use tempfile::TempDir;

    fn open_table(dir: &TempDir, table_id: u32) -> Arc<BTreeFile> {
        let schema = Schema::new(vec![ColumnType::Int, ColumnType::Str]);
        let path = dir.path().join(format!("table_{}.arbor", table_id));
        Arc::new(
            BTreeFile::open(path, table_id, schema, 0, &StorageConfig::default()).unwrap(),
        )
    }

    #[test]
    fn test_register_and_get() {
        let dir = TempDir::new().unwrap();
        let catalog = Catalog::new();
        assert!(catalog.is_empty());

        catalog.register(open_table(&dir, 1)).unwrap();
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.get(1).unwrap().table_id(), 1);
    }

    #[test]
    fn test_register_twice_fails() {
        let dir = TempDir::new().unwrap();
        let catalog = Catalog::new();
        catalog.register(open_table(&dir, 1)).unwrap();

        let err = catalog.register(open_table(&dir, 1)).unwrap_err();
        assert!(matches!(err, ArborError::TableAlreadyRegistered(1)));
        assert_eq!(catalog.len(), 1);
    }

    #[test]
    fn test_get_missing_table() {
        let catalog = Catalog::new();
        let err = catalog.get(42).unwrap_err();
        assert!(matches!(err, ArborError::TableNotFound(42)));
    }

    #[test]
    fn test_schema_lookup() {
        let dir = TempDir::new().unwrap();
        let catalog = Catalog::new();
        catalog.register(open_table(&dir, 1)).unwrap();

        let schema = catalog.schema(1).unwrap();
        assert_eq!(schema.columns(), &[ColumnType::Int, ColumnType::Str]);
    }

    #[test]
    fn test_unregister() {
        let dir = TempDir::new().unwrap();
        let catalog = Catalog::new();
        catalog.register(open_table(&dir, 1)).unwrap();

        let file = catalog.unregister(1).unwrap();
        assert_eq!(file.table_id(), 1);
        assert!(catalog.is_empty());
        assert!(matches!(
            catalog.unregister(1).unwrap_err(),
            ArborError::TableNotFound(1)
        ));
    }

    #[test]
    fn test_table_ids_sorted() {
        let dir = TempDir::new().unwrap();
        let catalog = Catalog::new();
        for table_id in [3, 1, 2] {
            catalog.register(open_table(&dir, table_id)).unwrap();
        }
        assert_eq!(catalog.table_ids(), vec![1, 2, 3]);
    }
}
