use std::sync::{Mutex, MutexGuard};

use anyhow::Context;
use async_trait::async_trait;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, TransactionBehavior};
use serde_json::Value;

/// A stored document: its id within the collection plus the JSON body.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub data: Value,
}

impl Document {
    /// Decodes the body into `T`, filling in `id` from the document key when the body lacks one.
    pub fn decode<T: serde::de::DeserializeOwned>(self) -> anyhow::Result<T> {
        let mut data = self.data;
        if let Value::Object(map) = &mut data {
            map.entry("id").or_insert_with(|| Value::String(self.id.clone()));
        }
        serde_json::from_value(data).with_context(|| format!("failed to decode document {}", self.id))
    }
}

/// Writes applied all-or-nothing by [`DocumentStore::commit`].
#[derive(Debug, Default, Clone)]
pub struct WriteBatch {
    writes: Vec<(String, String, Value)>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, collection: impl Into<String>, id: impl Into<String>, data: Value) -> &mut Self {
        self.writes.push((collection.into(), id.into(), data));
        self
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }
}

/// The document-store primitives the adapters need. Collections are slash-separated
/// paths such as `businesses/{id}/bookings`.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, collection: &str, id: &str) -> anyhow::Result<Option<Document>>;

    async fn set(&self, collection: &str, id: &str, data: &Value) -> anyhow::Result<()>;

    /// Every document in the collection, in insertion order.
    async fn scan(&self, collection: &str) -> anyhow::Result<Vec<Document>>;

    /// Documents whose top-level fields equal every given value.
    async fn query_eq(&self, collection: &str, filters: &[(&str, Value)]) -> anyhow::Result<Vec<Document>>;

    async fn commit(&self, batch: WriteBatch) -> anyhow::Result<()>;

    /// Runs `query_eq` and applies `batch` in one transaction, but only when `accept` approves
    /// the matched documents. Returns whether the batch was written.
    async fn commit_if(
        &self,
        batch: WriteBatch,
        collection: &str,
        filters: &[(&str, Value)],
        accept: &(dyn for<'d> Fn(&'d [Document]) -> bool + Send + Sync),
    ) -> anyhow::Result<bool>;
}

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    pub fn open(path: &str) -> anyhow::Result<Self> {
        Ok(Self::new(super::init_db(path)?))
    }

    fn lock(&self) -> anyhow::Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow::anyhow!("database lock poisoned"))
    }
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn get(&self, collection: &str, id: &str) -> anyhow::Result<Option<Document>> {
        let conn = self.lock()?;
        let result = conn.query_row(
            "SELECT data FROM documents WHERE collection = ?1 AND id = ?2",
            params![collection, id],
            |row| row.get::<_, String>(0),
        );

        match result {
            Ok(data) => Ok(Some(Document {
                id: id.to_string(),
                data: serde_json::from_str(&data)?,
            })),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set(&self, collection: &str, id: &str, data: &Value) -> anyhow::Result<()> {
        let conn = self.lock()?;
        upsert(&conn, collection, id, data)
    }

    async fn scan(&self, collection: &str) -> anyhow::Result<Vec<Document>> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare("SELECT id, data FROM documents WHERE collection = ?1 ORDER BY rowid ASC")?;
        let rows = stmt.query_map(params![collection], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        collect_documents(rows)
    }

    async fn query_eq(&self, collection: &str, filters: &[(&str, Value)]) -> anyhow::Result<Vec<Document>> {
        let conn = self.lock()?;
        select_eq(&conn, collection, filters)
    }

    async fn commit(&self, batch: WriteBatch) -> anyhow::Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let mut conn = self.lock()?;
        let tx = conn.transaction().context("failed to begin transaction")?;
        for (collection, id, data) in &batch.writes {
            upsert(&tx, collection, id, data)?;
        }
        tx.commit().context("failed to commit write batch")?;
        Ok(())
    }

    async fn commit_if(
        &self,
        batch: WriteBatch,
        collection: &str,
        filters: &[(&str, Value)],
        accept: &(dyn for<'d> Fn(&'d [Document]) -> bool + Send + Sync),
    ) -> anyhow::Result<bool> {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("failed to begin transaction")?;
        let matched = select_eq(&tx, collection, filters)?;
        if !accept(&matched) {
            tx.rollback().context("failed to roll back write batch")?;
            return Ok(false);
        }
        for (collection, id, data) in &batch.writes {
            upsert(&tx, collection, id, data)?;
        }
        tx.commit().context("failed to commit write batch")?;
        Ok(true)
    }
}

fn select_eq(conn: &Connection, collection: &str, filters: &[(&str, Value)]) -> anyhow::Result<Vec<Document>> {
    let mut sql = "SELECT id, data FROM documents WHERE collection = ?1".to_string();
    let mut values = vec![SqlValue::Text(collection.to_string())];

    for (field, value) in filters {
        if field.is_empty() || !field.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            anyhow::bail!("invalid field name: {field}");
        }
        values.push(to_sql_value(value)?);
        sql.push_str(&format!(
            " AND json_extract(data, '$.{field}') = ?{}",
            values.len()
        ));
    }
    sql.push_str(" ORDER BY rowid ASC");

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(values), |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;
    collect_documents(rows)
}

fn upsert(conn: &Connection, collection: &str, id: &str, data: &Value) -> anyhow::Result<()> {
    let json = serde_json::to_string(data)?;
    conn.execute(
        "INSERT INTO documents (collection, id, data, updated_at)
         VALUES (?1, ?2, ?3, datetime('now'))
         ON CONFLICT(collection, id) DO UPDATE SET
           data = excluded.data,
           updated_at = excluded.updated_at",
        params![collection, id, json],
    )
    .with_context(|| format!("failed to write {collection}/{id}"))?;
    Ok(())
}

fn collect_documents<F>(rows: rusqlite::MappedRows<'_, F>) -> anyhow::Result<Vec<Document>>
where
    F: FnMut(&rusqlite::Row<'_>) -> rusqlite::Result<(String, String)>,
{
    let mut documents = vec![];
    for row in rows {
        let (id, data) = row?;
        documents.push(Document {
            id,
            data: serde_json::from_str(&data)?,
        });
    }
    Ok(documents)
}

fn to_sql_value(value: &Value) -> anyhow::Result<SqlValue> {
    match value {
        Value::String(s) => Ok(SqlValue::Text(s.clone())),
        Value::Bool(b) => Ok(SqlValue::Integer(i64::from(*b))),
        Value::Number(n) => match n.as_i64() {
            Some(i) => Ok(SqlValue::Integer(i)),
            None => n
                .as_f64()
                .map(SqlValue::Real)
                .ok_or_else(|| anyhow::anyhow!("unsupported number: {n}")),
        },
        other => Err(anyhow::anyhow!("unsupported filter value: {other}")),
    }
}
