use std::any::TypeId;
use std::collections::HashMap;
use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use quarry_core::{Entity, EntityId, Shared};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use tracing::instrument;

use crate::cache::{AnyCache, EntityCache};
use crate::changeset::Changeset;
use crate::config::RepositoryConfig;
use crate::error::{StoreError, StoreResult};
use crate::handle::read;

use super::{MemoryRepository, Repository};

/// Row storage behind a [`FileRepository`].
pub trait Persister: Send + Sync {
    /// Every row of `table`; a table never written is empty.
    fn load(&self, table: &str) -> StoreResult<Vec<JsonValue>>;

    /// Replace the content of `table` with `rows`.
    fn dump(&self, table: &str, rows: &[JsonValue]) -> StoreResult<()>;
}

/// Stores each table as `<directory>/<table>.jsonl`, one JSON object per
/// line. Dumps go through a temporary file renamed over the old one.
#[derive(Debug, Clone)]
pub struct JsonLinesPersister {
    directory: PathBuf,
}

impl JsonLinesPersister {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    pub fn path(&self, table: &str) -> PathBuf {
        self.directory.join(format!("{table}.jsonl"))
    }
}

fn io_error(path: &Path, err: std::io::Error) -> StoreError {
    StoreError::persist(format!("{}: {err}", path.display()))
}

impl Persister for JsonLinesPersister {
    fn load(&self, table: &str) -> StoreResult<Vec<JsonValue>> {
        let path = self.path(table);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let text = fs::read_to_string(&path).map_err(|e| io_error(&path, e))?;
        text.lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(n, line)| {
                serde_json::from_str(line)
                    .map_err(|e| StoreError::persist(format!("{}:{}: {e}", path.display(), n + 1)))
            })
            .collect()
    }

    fn dump(&self, table: &str, rows: &[JsonValue]) -> StoreResult<()> {
        fs::create_dir_all(&self.directory).map_err(|e| io_error(&self.directory, e))?;
        let path = self.path(table);
        let tmp = path.with_extension("jsonl.tmp");

        let mut file = fs::File::create(&tmp).map_err(|e| io_error(&tmp, e))?;
        for row in rows {
            serde_json::to_writer(&mut file, row).map_err(|e| StoreError::persist(e.to_string()))?;
            file.write_all(b"\n").map_err(|e| io_error(&tmp, e))?;
        }
        file.sync_all().map_err(|e| io_error(&tmp, e))?;
        fs::rename(&tmp, &path).map_err(|e| io_error(&path, e))?;
        Ok(())
    }
}

type Dumper = fn(&dyn AnyCache) -> StoreResult<Vec<JsonValue>>;

fn dump_rows<E: Entity + Serialize>(cache: &dyn AnyCache) -> StoreResult<Vec<JsonValue>> {
    let cache = cache
        .as_any()
        .downcast_ref::<EntityCache<E>>()
        .ok_or_else(|| StoreError::WrongEntityType {
            expected: E::TYPE_NAME,
            found: cache.entity_type().name.to_string(),
        })?;
    cache
        .iter()
        .map(|e| serde_json::to_value(&*read(e)).map_err(|err| StoreError::persist(format!("{}: {err}", E::TYPE_NAME))))
        .collect()
}

/// Memory repository whose registered types are loaded from and dumped to
/// a [`Persister`].
///
/// Dumps run after the in-memory commit has released its lock, so reads
/// and id generation are not held up by file I/O. Commits themselves are
/// serialized end to end: tables are dumped in the order their commits were
/// applied. A dump that fails surfaces as [`StoreError::Persist`] although
/// the in-memory commit already took effect.
pub struct FileRepository {
    inner: MemoryRepository,
    persister: Arc<dyn Persister>,
    dumpers: HashMap<TypeId, (&'static str, Dumper)>,
    commits: Mutex<()>,
}

impl core::fmt::Debug for FileRepository {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FileRepository")
            .field("inner", &self.inner)
            .field("types", &self.dumpers.len())
            .finish_non_exhaustive()
    }
}

impl FileRepository {
    /// Repository storing JSON lines under `config.directory`.
    pub fn new(config: RepositoryConfig) -> Self {
        let persister = Arc::new(JsonLinesPersister::new(config.directory.clone()));
        Self::with_persister(config, persister)
    }

    pub fn with_persister(config: RepositoryConfig, persister: Arc<dyn Persister>) -> Self {
        Self {
            inner: MemoryRepository::new(config),
            persister,
            dumpers: HashMap::new(),
            commits: Mutex::new(()),
        }
    }

    /// Load and dump `E` through the persister, in table `E::TABLE`.
    pub fn register<E>(mut self) -> Self
    where
        E: Entity + Serialize + DeserializeOwned,
    {
        let persister = Arc::clone(&self.persister);
        self.inner = self.inner.with_loader::<E, _>(move || {
            persister
                .load(E::TABLE)?
                .into_iter()
                .map(|row| {
                    serde_json::from_value(row).map_err(|e| StoreError::persist(format!("{}: {e}", E::TABLE)))
                })
                .collect()
        });
        self.dumpers.insert(TypeId::of::<E>(), (E::TABLE, dump_rows::<E>));
        self
    }
}

impl Repository for FileRepository {
    fn config(&self) -> &RepositoryConfig {
        self.inner.config()
    }

    fn load<E: Entity>(&self) -> StoreResult<Vec<Shared<E>>> {
        self.inner.load::<E>()
    }

    fn new_id<E: Entity>(&self) -> StoreResult<EntityId> {
        self.inner.new_id::<E>()
    }

    #[instrument(skip(self, changeset), fields(repository = %self.config().name))]
    fn commit(&self, changeset: &Changeset) -> StoreResult<()> {
        let _serialized = self
            .commits
            .lock()
            .map_err(|_| StoreError::LockPoisoned("file commit"))?;
        let committed = self.inner.apply(changeset)?;
        for cache in committed {
            let entity_type = cache.entity_type();
            let Some((table, dump)) = self.dumpers.get(&entity_type.type_id) else {
                tracing::warn!(entity = entity_type.name, "type not registered for persistence, skipping dump");
                continue;
            };
            let rows = dump(cache.as_ref())?;
            self.persister.dump(table, &rows).inspect_err(|e| {
                tracing::error!(entity = entity_type.name, table, error = %e, "dump failed after commit");
            })?;
            tracing::debug!(entity = entity_type.name, table, rows = rows.len(), "table dumped");
        }
        Ok(())
    }

    fn rollback(&self, changeset: &Changeset) -> StoreResult<()> {
        self.inner.rollback(changeset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use crate::changeset::{Change, ChangeKind};
    use quarry_core::share;
    use quarry_core::testing::{Person, Tag};

    #[derive(Default)]
    struct RecordingPersister {
        tables: Mutex<HashMap<String, Vec<JsonValue>>>,
        fail: bool,
    }

    impl Persister for RecordingPersister {
        fn load(&self, table: &str) -> StoreResult<Vec<JsonValue>> {
            Ok(self.tables.lock().unwrap().get(table).cloned().unwrap_or_default())
        }

        fn dump(&self, table: &str, rows: &[JsonValue]) -> StoreResult<()> {
            if self.fail {
                return Err(StoreError::persist("disk full"));
            }
            self.tables.lock().unwrap().insert(table.to_string(), rows.to_vec());
            Ok(())
        }
    }

    fn add(entity: Tag) -> Changeset {
        let mut changeset = Changeset::new();
        changeset.push(Change::new(ChangeKind::Add, share(entity)));
        changeset
    }

    #[test]
    fn commit_dumps_registered_types() {
        let persister = Arc::new(RecordingPersister::default());
        let repo = FileRepository::with_persister(RepositoryConfig::default(), persister.clone()).register::<Tag>();

        repo.commit(&add(Tag::new("red", 1.5))).unwrap();

        let tables = persister.tables.lock().unwrap();
        assert_eq!(
            tables["tags"],
            vec![serde_json::json!({"id": 1, "name": "red", "weight": 1.5})]
        );
    }

    #[test]
    fn unregistered_types_stay_in_memory() {
        let persister = Arc::new(RecordingPersister::default());
        let repo = FileRepository::with_persister(RepositoryConfig::default(), persister.clone());

        let mut changeset = Changeset::new();
        changeset.push(Change::new(ChangeKind::Add, share(Person::new("Ann", 61))));
        repo.commit(&changeset).unwrap();

        assert!(persister.tables.lock().unwrap().is_empty());
        assert_eq!(repo.load::<Person>().unwrap().len(), 1);
    }

    #[test]
    fn dump_failure_is_reported_after_the_memory_commit() {
        let persister = Arc::new(RecordingPersister {
            fail: true,
            ..RecordingPersister::default()
        });
        let repo = FileRepository::with_persister(RepositoryConfig::default(), persister).register::<Tag>();

        let err = repo.commit(&add(Tag::new("red", 1.0))).unwrap_err();
        assert!(matches!(err, StoreError::Persist(_)));
        assert_eq!(repo.load::<Tag>().unwrap().len(), 1);
    }

    #[test]
    fn json_lines_round_trip_through_the_directory() {
        let dir = tempfile::tempdir().unwrap();
        let persister = JsonLinesPersister::new(dir.path());
        assert!(persister.load("tags").unwrap().is_empty());

        let rows = vec![serde_json::json!({"id": 1}), serde_json::json!({"id": 2})];
        persister.dump("tags", &rows).unwrap();
        assert_eq!(persister.load("tags").unwrap(), rows);
        assert!(!dir.path().join("tags.jsonl.tmp").exists());
    }

    #[test]
    fn malformed_lines_name_the_file_and_line() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("tags.jsonl"), "{\"id\":1}\nnot json\n").unwrap();
        let err = JsonLinesPersister::new(dir.path()).load("tags").unwrap_err();
        assert!(err.to_string().contains("tags.jsonl:2"));
    }
}
