use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension};

use tripledger_core::{
    Collection, EntityKind, EntityRecord, MutationOp, OpId, PendingMutation, RecordId,
};

use crate::error::StorageError;
use crate::traits::{LocalStore, LocalWrite};

/// Convert Vec<u8> to fixed-size array with proper error handling.
fn to_array<const N: usize>(v: Vec<u8>, label: &str) -> Result<[u8; N], StorageError> {
    v.try_into()
        .map_err(|_| StorageError::Serialization(format!("invalid {label} length")))
}

/// Only entity collections live in `records`; the queue has its own table.
fn data_collection(collection: Collection) -> Result<&'static str, StorageError> {
    match collection {
        Collection::PendingChanges => Err(StorageError::NotADataCollection(
            collection.as_str().to_string(),
        )),
        other => Ok(other.as_str()),
    }
}

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &str) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        crate::schema::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        crate::schema::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn schema_version(&self) -> Result<i32, StorageError> {
        crate::schema::schema_version(&self.conn.lock())
    }
}

fn put_record(
    conn: &Connection,
    collection: &str,
    record: &EntityRecord,
) -> Result<(), StorageError> {
    conn.execute(
        "INSERT INTO records (collection, id, body, recency) VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(collection, id) DO UPDATE SET body = excluded.body, recency = excluded.recency",
        rusqlite::params![
            collection,
            record.id.as_str(),
            record.to_msgpack()?,
            record.recency() as i64,
        ],
    )?;
    Ok(())
}

fn remove_record(conn: &Connection, collection: &str, id: &RecordId) -> Result<bool, StorageError> {
    let n = conn.execute(
        "DELETE FROM records WHERE collection = ?1 AND id = ?2",
        rusqlite::params![collection, id.as_str()],
    )?;
    Ok(n > 0)
}

fn insert_mutation(conn: &Connection, mutation: &PendingMutation) -> Result<(), StorageError> {
    conn.execute(
        "INSERT INTO pending_changes (op_id, entity_kind, operation, target, payload, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        rusqlite::params![
            mutation.op_id.as_bytes().as_slice(),
            mutation.entity_kind.as_str(),
            mutation.operation.as_str(),
            mutation.target.as_str(),
            mutation.payload_to_msgpack()?,
            mutation.created_at as i64,
        ],
    )?;
    Ok(())
}

type MutationRow = (Vec<u8>, String, String, String, Option<Vec<u8>>, i64);

fn decode_mutation(row: MutationRow) -> Result<PendingMutation, StorageError> {
    let (op_id_bytes, kind, operation, target, payload_bytes, created_at) = row;
    let payload = payload_bytes
        .as_deref()
        .map(PendingMutation::payload_from_msgpack)
        .transpose()?;
    Ok(PendingMutation {
        op_id: OpId::from_bytes(to_array::<16>(op_id_bytes, "op_id")?),
        entity_kind: EntityKind::parse(&kind)?,
        operation: MutationOp::parse(&operation)?,
        target: RecordId::new(target),
        payload,
        created_at: created_at as u64,
    })
}

impl LocalStore for SqliteStore {
    fn init_db(&self) -> Result<(), StorageError> {
        crate::schema::init_schema(&self.conn.lock())
    }

    fn get_all(&self, collection: Collection) -> Result<Vec<EntityRecord>, StorageError> {
        let name = data_collection(collection)?;
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT body FROM records WHERE collection = ?1 ORDER BY recency DESC, id",
        )?;
        let rows = stmt.query_map(rusqlite::params![name], |row| row.get::<_, Vec<u8>>(0))?;

        let mut result = Vec::new();
        for row in rows {
            let body = row?;
            result.push(EntityRecord::from_msgpack(&body)?);
        }
        Ok(result)
    }

    fn get(
        &self,
        collection: Collection,
        id: &RecordId,
    ) -> Result<Option<EntityRecord>, StorageError> {
        let name = data_collection(collection)?;
        let conn = self.conn.lock();
        let body: Option<Vec<u8>> = conn
            .query_row(
                "SELECT body FROM records WHERE collection = ?1 AND id = ?2",
                rusqlite::params![name, id.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        match body {
            Some(bytes) => Ok(Some(EntityRecord::from_msgpack(&bytes)?)),
            None => Ok(None),
        }
    }

    fn put_many(
        &self,
        collection: Collection,
        records: &[EntityRecord],
    ) -> Result<(), StorageError> {
        let name = data_collection(collection)?;
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        for record in records {
            put_record(&tx, name, record)?;
        }
        tx.commit()?;
        Ok(())
    }

    fn delete(&self, collection: Collection, id: &RecordId) -> Result<bool, StorageError> {
        let name = data_collection(collection)?;
        remove_record(&self.conn.lock(), name, id)
    }

    fn commit_offline(
        &self,
        collection: Collection,
        write: LocalWrite<'_>,
        mutation: &PendingMutation,
    ) -> Result<(), StorageError> {
        let name = data_collection(collection)?;
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        match write {
            LocalWrite::Put(record) => put_record(&tx, name, record)?,
            LocalWrite::Remove(id) => {
                remove_record(&tx, name, id)?;
            }
        }
        insert_mutation(&tx, mutation)?;
        tx.commit()?;
        Ok(())
    }

    fn append_mutation(&self, mutation: &PendingMutation) -> Result<(), StorageError> {
        insert_mutation(&self.conn.lock(), mutation)
    }

    fn pending_mutations(&self) -> Result<Vec<PendingMutation>, StorageError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT op_id, entity_kind, operation, target, payload, created_at FROM pending_changes ORDER BY seq",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, Vec<u8>>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, Option<Vec<u8>>>(4)?,
                row.get::<_, i64>(5)?,
            ))
        })?;

        let mut result = Vec::new();
        for row in rows {
            result.push(decode_mutation(row?)?);
        }
        Ok(result)
    }

    fn remove_mutation(&self, op_id: OpId) -> Result<bool, StorageError> {
        let n = self.conn.lock().execute(
            "DELETE FROM pending_changes WHERE op_id = ?1",
            rusqlite::params![op_id.as_bytes().as_slice()],
        )?;
        Ok(n > 0)
    }

    fn pending_count(&self) -> Result<usize, StorageError> {
        let count: i64 =
            self.conn
                .lock()
                .query_row("SELECT COUNT(*) FROM pending_changes", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    fn reconcile_create(
        &self,
        collection: Collection,
        temp_id: &RecordId,
        record: &EntityRecord,
        op_id: OpId,
    ) -> Result<(), StorageError> {
        let name = data_collection(collection)?;
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        remove_record(&tx, name, temp_id)?;
        put_record(&tx, name, record)?;
        tx.execute(
            "INSERT INTO id_map (temp_id, server_id, collection) VALUES (?1, ?2, ?3)
             ON CONFLICT(temp_id) DO UPDATE SET server_id = excluded.server_id",
            rusqlite::params![temp_id.as_str(), record.id.as_str(), name],
        )?;
        tx.execute(
            "DELETE FROM pending_changes WHERE op_id = ?1",
            rusqlite::params![op_id.as_bytes().as_slice()],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn resolve_id(&self, temp_id: &RecordId) -> Result<Option<RecordId>, StorageError> {
        let server_id: Option<String> = self
            .conn
            .lock()
            .query_row(
                "SELECT server_id FROM id_map WHERE temp_id = ?1",
                rusqlite::params![temp_id.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(server_id.map(RecordId::new))
    }

    fn last_synced(&self, collection: Collection) -> Result<Option<u64>, StorageError> {
        let at: Option<i64> = self
            .conn
            .lock()
            .query_row(
                "SELECT last_synced FROM sync_meta WHERE collection = ?1",
                rusqlite::params![collection.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(at.map(|ms| ms as u64))
    }

    fn set_last_synced(&self, collection: Collection, at_ms: u64) -> Result<(), StorageError> {
        self.conn.lock().execute(
            "INSERT INTO sync_meta (collection, last_synced) VALUES (?1, ?2)
             ON CONFLICT(collection) DO UPDATE SET last_synced = excluded.last_synced",
            rusqlite::params![collection.as_str(), at_ms as i64],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rec(id: &str, updated: u64, amount: i64) -> EntityRecord {
        EntityRecord {
            id: RecordId::new(id),
            created_at: 1,
            updated_at: Some(updated),
            payload: json!({ "amount": amount }),
        }
    }

    #[test]
    fn put_many_upserts_without_recency_check() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .put_many(Collection::Transactions, &[rec("a", 10, 1), rec("b", 10, 2)])
            .unwrap();
        // Older timestamp still overwrites: writes are last-write, not last-timestamp.
        store
            .put_many(Collection::Transactions, &[rec("a", 5, 99)])
            .unwrap();

        let a = store
            .get(Collection::Transactions, &RecordId::new("a"))
            .unwrap()
            .unwrap();
        assert_eq!(a.payload["amount"], 99);
        assert_eq!(store.get_all(Collection::Transactions).unwrap().len(), 2);
    }

    #[test]
    fn collections_are_isolated() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.put_many(Collection::Trips, &[rec("x", 1, 0)]).unwrap();
        assert!(store.get_all(Collection::Accounts).unwrap().is_empty());
        assert!(store
            .get(Collection::Transactions, &RecordId::new("x"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn pending_changes_is_not_a_record_collection() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(matches!(
            store.get_all(Collection::PendingChanges),
            Err(StorageError::NotADataCollection(_))
        ));
    }

    #[test]
    fn delete_reports_whether_anything_was_removed() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.put_many(Collection::Accounts, &[rec("acc", 1, 0)]).unwrap();
        assert!(store.delete(Collection::Accounts, &RecordId::new("acc")).unwrap());
        assert!(!store.delete(Collection::Accounts, &RecordId::new("acc")).unwrap());
    }

    #[test]
    fn queue_preserves_insertion_order() {
        let store = SqliteStore::open_in_memory().unwrap();
        // created_at deliberately out of order: position is fixed by append order.
        let first = PendingMutation::update(
            EntityKind::Transaction,
            RecordId::new("t1"),
            json!({"amount": 1}),
            500,
        );
        let second = PendingMutation::update(
            EntityKind::Transaction,
            RecordId::new("t1"),
            json!({"amount": 2}),
            100,
        );
        store.append_mutation(&first).unwrap();
        store.append_mutation(&second).unwrap();

        let queued = store.pending_mutations().unwrap();
        assert_eq!(queued, vec![first.clone(), second.clone()]);
        assert_eq!(store.pending_count().unwrap(), 2);

        assert!(store.remove_mutation(first.op_id).unwrap());
        assert!(!store.remove_mutation(first.op_id).unwrap());
        assert_eq!(store.pending_mutations().unwrap(), vec![second]);
    }

    #[test]
    fn commit_offline_writes_record_and_queue_together() {
        let store = SqliteStore::open_in_memory().unwrap();
        let temp = RecordId::temporary(42);
        let record = EntityRecord::new(temp.clone(), 42, json!({"amount": 7}));
        let mutation =
            PendingMutation::create(EntityKind::Transaction, temp.clone(), record.payload.clone(), 42);

        store
            .commit_offline(Collection::Transactions, LocalWrite::Put(&record), &mutation)
            .unwrap();

        assert_eq!(
            store.get(Collection::Transactions, &temp).unwrap(),
            Some(record)
        );
        assert_eq!(store.pending_mutations().unwrap(), vec![mutation]);
    }

    #[test]
    fn reconcile_moves_record_maps_id_and_acks_create() {
        let store = SqliteStore::open_in_memory().unwrap();
        let temp = RecordId::temporary(7);
        let record = EntityRecord::new(temp.clone(), 7, json!({}));
        let create =
            PendingMutation::create(EntityKind::Transaction, temp.clone(), json!({}), 7);
        store
            .commit_offline(Collection::Transactions, LocalWrite::Put(&record), &create)
            .unwrap();

        let server = EntityRecord::new(RecordId::new("tx_100"), 9, json!({}));
        store
            .reconcile_create(Collection::Transactions, &temp, &server, create.op_id)
            .unwrap();

        assert_eq!(store.pending_count().unwrap(), 0);

        assert!(store.get(Collection::Transactions, &temp).unwrap().is_none());
        assert!(store
            .get(Collection::Transactions, &server.id)
            .unwrap()
            .is_some());
        assert_eq!(store.resolve_id(&temp).unwrap(), Some(server.id));
        assert_eq!(store.resolve_id(&RecordId::temporary(8)).unwrap(), None);
    }

    #[test]
    fn last_synced_round_trips_per_collection() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert_eq!(store.last_synced(Collection::Trips).unwrap(), None);
        store.set_last_synced(Collection::Trips, 1_000).unwrap();
        store.set_last_synced(Collection::Trips, 2_000).unwrap();
        assert_eq!(store.last_synced(Collection::Trips).unwrap(), Some(2_000));
        assert_eq!(store.last_synced(Collection::Accounts).unwrap(), None);
    }

    #[test]
    fn init_db_twice_keeps_data() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.put_many(Collection::Trips, &[rec("trip", 1, 0)]).unwrap();
        store.init_db().unwrap();
        store.init_db().unwrap();
        assert_eq!(store.get_all(Collection::Trips).unwrap().len(), 1);
        assert_eq!(store.schema_version().unwrap(), crate::schema::SCHEMA_VERSION);
    }

    #[test]
    fn reopening_a_file_keeps_records_and_queue() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.db");
        let path = path.to_str().unwrap();

        let mutation = PendingMutation::delete(EntityKind::Trip, RecordId::new("trip_1"), 3);
        {
            let store = SqliteStore::open(path).unwrap();
            store.put_many(Collection::Trips, &[rec("trip_2", 1, 0)]).unwrap();
            store.append_mutation(&mutation).unwrap();
        }

        let store = SqliteStore::open(path).unwrap();
        assert_eq!(store.get_all(Collection::Trips).unwrap().len(), 1);
        assert_eq!(store.pending_mutations().unwrap(), vec![mutation]);
    }
}
