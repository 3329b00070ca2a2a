use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;

use crate::error::PersistenceError;

/// The four persistent record families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordTable {
    Objects,
    Accounts,
    Scripts,
    Channels,
}

impl RecordTable {
    pub fn name(self) -> &'static str {
        match self {
            RecordTable::Objects => "objects",
            RecordTable::Accounts => "accounts",
            RecordTable::Scripts => "scripts",
            RecordTable::Channels => "channels",
        }
    }
}

/// Path-valued columns that may be rewritten in bulk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PathColumn {
    TypeclassPath,
    CmdsetStorage,
}

impl PathColumn {
    pub fn name(self) -> &'static str {
        match self {
            PathColumn::TypeclassPath => "typeclass_path",
            PathColumn::CmdsetStorage => "cmdset_storage",
        }
    }
}

/// A stored row: id, the two path columns and the JSON body.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
    pub id: i64,
    pub typeclass_path: String,
    pub cmdset_storage: Option<String>,
    pub body: Value,
}

/// Record access shared by objects, accounts, scripts and channels.
pub struct RecordRepo<'a> {
    conn: &'a Connection,
}

impl<'a> RecordRepo<'a> {
    pub(crate) fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Insert a new row and return its id.
    pub fn insert(
        &self,
        table: RecordTable,
        typeclass_path: &str,
        cmdset_storage: Option<&str>,
        body: &Value,
    ) -> Result<i64, PersistenceError> {
        let sql = format!(
            "INSERT INTO {} (typeclass_path, cmdset_storage, body) VALUES (?1, ?2, ?3)",
            table.name()
        );
        self.conn.execute(
            &sql,
            params![typeclass_path, cmdset_storage, serde_json::to_string(body)?],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Overwrite an existing row. Returns false if the id does not exist.
    pub fn update(&self, table: RecordTable, record: &StoredRecord) -> Result<bool, PersistenceError> {
        let sql = format!(
            "UPDATE {} SET typeclass_path = ?2, cmdset_storage = ?3, body = ?4 WHERE id = ?1",
            table.name()
        );
        let changed = self.conn.execute(
            &sql,
            params![
                record.id,
                record.typeclass_path,
                record.cmdset_storage,
                serde_json::to_string(&record.body)?
            ],
        )?;
        Ok(changed > 0)
    }

    pub fn load(&self, table: RecordTable, id: i64) -> Result<Option<StoredRecord>, PersistenceError> {
        let sql = format!(
            "SELECT id, typeclass_path, cmdset_storage, body FROM {} WHERE id = ?1",
            table.name()
        );
        let raw = self
            .conn
            .query_row(&sql, params![id], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })
            .optional()?;
        raw.map(|row| decode(table, row)).transpose()
    }

    /// All rows of a table in id order.
    pub fn load_all(&self, table: RecordTable) -> Result<Vec<StoredRecord>, PersistenceError> {
        let sql = format!(
            "SELECT id, typeclass_path, cmdset_storage, body FROM {} ORDER BY id",
            table.name()
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            out.push(decode(table, row?)?);
        }
        Ok(out)
    }

    pub fn delete(&self, table: RecordTable, id: i64) -> Result<bool, PersistenceError> {
        let sql = format!("DELETE FROM {} WHERE id = ?1", table.name());
        Ok(self.conn.execute(&sql, params![id])? > 0)
    }

    pub fn count(&self, table: RecordTable) -> Result<u64, PersistenceError> {
        let sql = format!("SELECT COUNT(*) FROM {}", table.name());
        let n: i64 = self.conn.query_row(&sql, [], |row| row.get(0))?;
        Ok(n as u64)
    }

    /// Ids of rows whose body carries a tag with this key and category.
    ///
    /// Tags live in the body as `tags: [{key, category}]`; a `None`
    /// category only matches tags stored without one.
    pub fn ids_with_tag(
        &self,
        table: RecordTable,
        key: &str,
        category: Option<&str>,
    ) -> Result<Vec<i64>, PersistenceError> {
        let sql = format!(
            "SELECT id FROM {t} WHERE EXISTS (
                 SELECT 1 FROM json_each({t}.body, '$.tags') AS tag
                 WHERE json_extract(tag.value, '$.key') = ?1
                   AND json_extract(tag.value, '$.category') IS ?2
             ) ORDER BY id",
            t = table.name()
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let ids = stmt
            .query_map(params![key, category], |row| row.get::<_, i64>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    /// Rewrite every row whose `column` equals `from` so it equals `to`.
    ///
    /// The body copy of the column is kept in step. Returns the number of
    /// rows changed.
    pub fn bulk_update(
        &self,
        table: RecordTable,
        column: PathColumn,
        from: &str,
        to: &str,
    ) -> Result<usize, PersistenceError> {
        let col = column.name();
        let sql = format!(
            "UPDATE {table} SET {col} = ?2, body = json_set(body, '$.{col}', ?2) WHERE {col} = ?1",
            table = table.name(),
        );
        let changed = self.conn.execute(&sql, params![from, to])?;
        if changed > 0 {
            tracing::info!(table = table.name(), column = col, from, to, changed, "Bulk path update");
        }
        Ok(changed)
    }
}

fn decode(
    table: RecordTable,
    (id, typeclass_path, cmdset_storage, body): (i64, String, Option<String>, String),
) -> Result<StoredRecord, PersistenceError> {
    let body = serde_json::from_str(&body).map_err(|e| PersistenceError::Corrupt {
        table: table.name(),
        reason: format!("row {id}: {e}"),
    })?;
    Ok(StoredRecord {
        id,
        typeclass_path,
        cmdset_storage,
        body,
    })
}
