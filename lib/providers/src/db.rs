use rocksdb::{ColumnFamilyDescriptor, DB, Direction, IteratorMode, Options};
use std::marker::PhantomData;
use std::path::Path;

/// Column-family set of one database.
pub trait NamedColumnFamily: 'static + Copy + Send + Sync {
    /// Name of this database, used in log messages.
    const DB_NAME: &'static str;
    const ALL: &'static [Self];
    fn name(&self) -> &'static str;
}

/// Thin typed wrapper over a RocksDB handle: every read and write goes
/// through a declared column family.
pub struct TypedDb<CF> {
    inner: DB,
    _cf: PhantomData<CF>,
}

impl<CF: NamedColumnFamily> TypedDb<CF> {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let mut options = Options::default();
        options.create_if_missing(true);
        options.create_missing_column_families(true);
        let families = CF::ALL
            .iter()
            .map(|cf| ColumnFamilyDescriptor::new(cf.name(), Options::default()));
        let inner = DB::open_cf_descriptors(&options, path, families)?;
        tracing::debug!(db = CF::DB_NAME, path = %path.display(), "opened database");
        Ok(Self {
            inner,
            _cf: PhantomData,
        })
    }

    fn handle(&self, cf: CF) -> &rocksdb::ColumnFamily {
        self.inner
            .cf_handle(cf.name())
            .expect("column family registered at open")
    }

    pub fn get_cf(&self, cf: CF, key: &[u8]) -> anyhow::Result<Option<Vec<u8>>> {
        Ok(self.inner.get_cf(self.handle(cf), key)?)
    }

    pub fn put_cf(&self, cf: CF, key: &[u8], value: &[u8]) -> anyhow::Result<()> {
        Ok(self.inner.put_cf(self.handle(cf), key, value)?)
    }

    /// Key-value pairs of `cf` starting at the first key ≥ `start`, in key
    /// order.
    pub fn iter_from<'a>(
        &'a self,
        cf: CF,
        start: &[u8],
    ) -> impl Iterator<Item = anyhow::Result<(Box<[u8]>, Box<[u8]>)>> + 'a {
        self.inner
            .iterator_cf(self.handle(cf), IteratorMode::From(start, Direction::Forward))
            .map(|entry| entry.map_err(Into::into))
    }
}
