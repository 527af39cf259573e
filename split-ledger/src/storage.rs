//! Storage layer using RocksDB
//!
//! A small document store: one column family per entity kind, values are
//! bincode, and a secondary index lists the entities of a group.
//!
//! # Column Families
//!
//! - `groups` - Groups (key: group_id)
//! - `members` - Members (key: member_id)
//! - `expenses` - Expenses (key: expense_id)
//! - `settlements` - Settlements (key: settlement_id)
//! - `users` - Registered identities (key: user_id)
//! - `indices` - Secondary indices (`collection|group_id||entity_id`,
//!   `user_email|email`)
//!
//! # Writes
//!
//! Every read-check-write sequence (insert-if-absent, compare-and-swap on the
//! version counter, filtered soft delete) runs under one store-wide write
//! mutex, so the check and the write are atomic with respect to each other.
//! Reads never take the mutex.

use crate::{
    error::{Error, Result},
    types::{Expense, Group, GroupId, Member, Settlement, User, UserId},
    Config,
};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rocksdb::{
    ColumnFamily, ColumnFamilyDescriptor, DBCompactionStyle, Direction, IteratorMode, Options,
    WriteBatch, DB,
};
use serde::{de::DeserializeOwned, Serialize};
use uuid::Uuid;

/// Column family names
const CF_GROUPS: &str = "groups";
const CF_MEMBERS: &str = "members";
const CF_EXPENSES: &str = "expenses";
const CF_SETTLEMENTS: &str = "settlements";
const CF_USERS: &str = "users";
const CF_INDICES: &str = "indices";

const IDX_USER_EMAIL: &[u8] = b"user_email|";

/// Versioned, soft-deletable record stored in its own column family
pub trait Document: Serialize + DeserializeOwned {
    /// Column family holding this kind
    const COLLECTION: &'static str;
    /// Kind name used in errors
    const KIND: &'static str;

    /// Primary key
    fn key(&self) -> [u8; 16];
    /// Group this record belongs to, if indexed by group
    fn group_key(&self) -> Option<[u8; 16]>;
    /// Current version
    fn version(&self) -> u64;
    /// Tombstone
    fn deleted_at(&self) -> Option<DateTime<Utc>>;
    /// Increment the version and touch `updated_at`
    fn bump_version(&mut self, now: DateTime<Utc>);
    /// Set the tombstone (never cleared) and bump the version
    fn tombstone(&mut self, now: DateTime<Utc>);
}

/// Record authored by an identity inside a group
pub trait Authored {
    /// Owning group
    fn group_id(&self) -> GroupId;
    /// Author identity
    fn created_by(&self) -> UserId;
}

macro_rules! document {
    ($ty:ty, $collection:expr, $kind:expr, |$doc:ident| $group:expr) => {
        impl Document for $ty {
            const COLLECTION: &'static str = $collection;
            const KIND: &'static str = $kind;

            fn key(&self) -> [u8; 16] {
                self.id.key()
            }

            fn group_key(&self) -> Option<[u8; 16]> {
                let $doc = self;
                $group
            }

            fn version(&self) -> u64 {
                self.version
            }

            fn deleted_at(&self) -> Option<DateTime<Utc>> {
                self.deleted_at
            }

            fn bump_version(&mut self, now: DateTime<Utc>) {
                self.version += 1;
                self.updated_at = now;
            }

            fn tombstone(&mut self, now: DateTime<Utc>) {
                if self.deleted_at.is_none() {
                    self.deleted_at = Some(now);
                }
                self.bump_version(now);
            }
        }
    };
}

document!(Group, CF_GROUPS, "group", |_group| None);
document!(Member, CF_MEMBERS, "member", |member| Some(member.group_id.key()));
document!(Expense, CF_EXPENSES, "expense", |expense| Some(expense.group_id.key()));
document!(Settlement, CF_SETTLEMENTS, "settlement", |settlement| Some(
    settlement.group_id.key()
));

impl Authored for Expense {
    fn group_id(&self) -> GroupId {
        self.group_id
    }

    fn created_by(&self) -> UserId {
        self.created_by
    }
}

impl Authored for Settlement {
    fn group_id(&self) -> GroupId {
        self.group_id
    }

    fn created_by(&self) -> UserId {
        self.created_by
    }
}

/// Storage wrapper for RocksDB
pub struct Storage {
    db: DB,
    write_lock: Mutex<()>,
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage").field("path", &self.db.path()).finish()
    }
}

impl Storage {
    /// Open or create database
    pub fn open(config: &Config) -> Result<Self> {
        let path = &config.data_dir;

        // Create directory if not exists
        std::fs::create_dir_all(path)?;

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        db_opts.set_write_buffer_size(config.rocksdb.write_buffer_size_mb * 1024 * 1024);
        db_opts.set_max_write_buffer_number(config.rocksdb.max_write_buffer_number);
        db_opts.set_max_background_jobs(config.rocksdb.max_background_jobs);
        db_opts.set_compaction_style(DBCompactionStyle::Level);

        if config.rocksdb.enable_statistics {
            db_opts.enable_statistics();
        }

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_GROUPS, Self::cf_options_documents()),
            ColumnFamilyDescriptor::new(CF_MEMBERS, Self::cf_options_documents()),
            ColumnFamilyDescriptor::new(CF_EXPENSES, Self::cf_options_documents()),
            ColumnFamilyDescriptor::new(CF_SETTLEMENTS, Self::cf_options_documents()),
            ColumnFamilyDescriptor::new(CF_USERS, Self::cf_options_documents()),
            ColumnFamilyDescriptor::new(CF_INDICES, Self::cf_options_indices()),
        ];

        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        tracing::info!("Opened RocksDB document store at {:?}", path);

        Ok(Self {
            db,
            write_lock: Mutex::new(()),
        })
    }

    // Column family options

    fn cf_options_documents() -> Options {
        let mut opts = Options::default();
        // Documents are read on every balance computation, use LZ4 for speed
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts
    }

    fn cf_options_indices() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        let mut block_opts = rocksdb::BlockBasedOptions::default();
        block_opts.set_bloom_filter(10.0, false); // 10 bits per key
        opts.set_block_based_table_factory(&block_opts);
        opts
    }

    fn cf_handle(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::Storage(format!("Column family {} not found", name)))
    }

    // Document reads

    /// Get document by key, tombstoned or not
    pub fn get<D: Document>(&self, key: [u8; 16]) -> Result<Option<D>> {
        let cf = self.cf_handle(D::COLLECTION)?;
        match self.db.get_cf(cf, key)? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }

    /// Get document, distinguishing "never stored" from "deleted"
    pub fn get_alive<D: Document>(&self, key: [u8; 16]) -> Result<D> {
        let id = Uuid::from_bytes(key).to_string();
        match self.get::<D>(key)? {
            None => Err(Error::NotFound { kind: D::KIND, id }),
            Some(doc) if doc.deleted_at().is_some() => Err(Error::Deleted { kind: D::KIND, id }),
            Some(doc) => Ok(doc),
        }
    }

    /// True if a document with this key was ever stored
    pub fn contains<D: Document>(&self, key: [u8; 16]) -> Result<bool> {
        let cf = self.cf_handle(D::COLLECTION)?;
        Ok(self.db.get_pinned_cf(cf, key)?.is_some())
    }

    /// All documents of a group (via index), including tombstoned ones
    pub fn list_by_group<D: Document>(&self, group_id: GroupId) -> Result<Vec<D>> {
        let cf_indices = self.cf_handle(CF_INDICES)?;
        let prefix = Self::index_key_group(D::COLLECTION, group_id.key(), None);

        let iter = self
            .db
            .iterator_cf(cf_indices, IteratorMode::From(&prefix, Direction::Forward));

        let mut docs = Vec::new();
        for item in iter {
            let (key, _) = item?;
            if !key.starts_with(&prefix) {
                break;
            }

            let entity_bytes: [u8; 16] = key[prefix.len()..]
                .try_into()
                .map_err(|_| Error::Storage("Malformed group index key".to_string()))?;

            match self.get::<D>(entity_bytes)? {
                Some(doc) => docs.push(doc),
                None => {
                    return Err(Error::Storage(format!(
                        "Dangling {} index entry {}",
                        D::KIND,
                        Uuid::from_bytes(entity_bytes)
                    )))
                }
            }
        }

        Ok(docs)
    }

    /// Full scan of one collection
    pub fn scan<D: Document>(&self) -> Result<Vec<D>> {
        let cf = self.cf_handle(D::COLLECTION)?;
        let mut docs = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_, value) = item?;
            docs.push(bincode::deserialize(&value)?);
        }
        Ok(docs)
    }

    // Document writes

    /// Write document and its group index entry (unconditional)
    pub fn put<D: Document>(&self, doc: &D) -> Result<()> {
        let _guard = self.write_lock.lock();
        self.write_document(doc)
    }

    /// Store the document only if its key is unused.
    ///
    /// Returns `false` (and writes nothing) when the key already exists,
    /// which makes replaying a create a no-op.
    pub fn insert_if_absent<D: Document>(&self, doc: &D) -> Result<bool> {
        let _guard = self.write_lock.lock();
        if self.contains::<D>(doc.key())? {
            return Ok(false);
        }
        self.write_document(doc)?;
        Ok(true)
    }

    /// Atomic compare-and-increment on the version counter.
    ///
    /// `mutate` sees the stored document only when it is alive and its
    /// version equals `expected_version`; the version is then bumped exactly
    /// once and the result persisted.
    pub fn compare_and_swap<D, F>(
        &self,
        key: [u8; 16],
        expected_version: u64,
        now: DateTime<Utc>,
        mutate: F,
    ) -> Result<D>
    where
        D: Document,
        F: FnOnce(&mut D) -> Result<()>,
    {
        let _guard = self.write_lock.lock();

        let mut doc = self.get_alive::<D>(key)?;
        if doc.version() != expected_version {
            return Err(Error::VersionConflict {
                kind: D::KIND,
                id: Uuid::from_bytes(key).to_string(),
                expected: expected_version,
                current: doc.version(),
            });
        }

        mutate(&mut doc)?;
        doc.bump_version(now);
        self.write_document(&doc)?;

        Ok(doc)
    }

    /// Tombstone the document if it is alive and matches `filter`.
    ///
    /// Returns whether anything was deleted.
    pub fn soft_delete_where<D, F>(&self, key: [u8; 16], now: DateTime<Utc>, filter: F) -> Result<bool>
    where
        D: Document,
        F: FnOnce(&D) -> bool,
    {
        let _guard = self.write_lock.lock();

        let mut doc = match self.get::<D>(key)? {
            Some(doc) if doc.deleted_at().is_none() && filter(&doc) => doc,
            _ => return Ok(false),
        };

        doc.tombstone(now);
        self.write_document(&doc)?;

        tracing::debug!(kind = D::KIND, id = %Uuid::from_bytes(key), "Soft-deleted");
        Ok(true)
    }

    fn write_document<D: Document>(&self, doc: &D) -> Result<()> {
        let mut batch = WriteBatch::default();

        let cf = self.cf_handle(D::COLLECTION)?;
        batch.put_cf(cf, doc.key(), bincode::serialize(doc)?);

        if let Some(group_key) = doc.group_key() {
            let cf_indices = self.cf_handle(CF_INDICES)?;
            let idx = Self::index_key_group(D::COLLECTION, group_key, Some(doc.key()));
            batch.put_cf(cf_indices, idx, b"");
        }

        self.db.write(batch)?;

        tracing::debug!(
            kind = D::KIND,
            id = %Uuid::from_bytes(doc.key()),
            version = doc.version(),
            "Document written"
        );

        Ok(())
    }

    // Users

    /// Store identity and its email index
    pub fn put_user(&self, user: &User) -> Result<()> {
        let _guard = self.write_lock.lock();

        let mut batch = WriteBatch::default();
        let cf_users = self.cf_handle(CF_USERS)?;
        batch.put_cf(cf_users, user.id.key(), bincode::serialize(user)?);

        let cf_indices = self.cf_handle(CF_INDICES)?;
        batch.put_cf(cf_indices, Self::index_key_email(&user.email), user.id.key());

        self.db.write(batch)?;
        Ok(())
    }

    /// Get identity by ID
    pub fn get_user(&self, user_id: UserId) -> Result<Option<User>> {
        let cf = self.cf_handle(CF_USERS)?;
        match self.db.get_cf(cf, user_id.key())? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }

    /// Look up identity by (lower-cased) email
    pub fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let cf_indices = self.cf_handle(CF_INDICES)?;
        let Some(id_bytes) = self.db.get_cf(cf_indices, Self::index_key_email(email))? else {
            return Ok(None);
        };

        let key: [u8; 16] = id_bytes
            .as_slice()
            .try_into()
            .map_err(|_| Error::Storage("Malformed email index value".to_string()))?;
        self.get_user(UserId::from_uuid(Uuid::from_bytes(key)))
    }

    // Index key helpers

    fn index_key_group(collection: &str, group_key: [u8; 16], entity: Option<[u8; 16]>) -> Vec<u8> {
        let mut key = collection.as_bytes().to_vec();
        key.push(b'|'); // Separator
        key.extend_from_slice(&group_key);
        if let Some(entity) = entity {
            key.extend_from_slice(&entity);
        }
        key
    }

    fn index_key_email(email: &str) -> Vec<u8> {
        let mut key = IDX_USER_EMAIL.to_vec();
        key.extend_from_slice(email.as_bytes());
        key
    }
}
