// ==========================================
// 协作方主数据仓储
// ==========================================
// 职责: student / teacher / classroom 三张主数据表的名称查询
// 红线: 主数据的增删改由外部系统负责, 这里只做展示用的只读访问
// ==========================================

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use rusqlite::{params, params_from_iter, Connection, Result as SqliteResult};

use crate::repository::error::{RepositoryError, RepositoryResult};

pub struct MasterDataRepository {
    conn: Arc<Mutex<Connection>>,
}

impl MasterDataRepository {
    pub fn new(db_path: String) -> RepositoryResult<Self> {
        let conn = Connection::open(&db_path)
            .map_err(|e| RepositoryError::DatabaseQueryError(e.to_string()))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    fn name_of(&self, table: &str, id: i64) -> RepositoryResult<Option<String>> {
        let conn = self.get_conn()?;
        let sql = format!("SELECT name FROM {} WHERE id = ?1", table);
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| RepositoryError::DatabaseQueryError(e.to_string()))?;
        let name = stmt
            .query_map(params![id], |row| row.get::<_, String>(0))
            .map_err(|e| RepositoryError::DatabaseQueryError(e.to_string()))?
            .collect::<SqliteResult<Vec<_>>>()
            .map_err(|e| RepositoryError::DatabaseQueryError(e.to_string()))?
            .into_iter()
            .next();
        Ok(name)
    }

    fn names_of(&self, table: &str, ids: &[i64]) -> RepositoryResult<HashMap<i64, String>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let conn = self.get_conn()?;

        let placeholders = (1..=ids.len())
            .map(|i| format!("?{}", i))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!("SELECT id, name FROM {} WHERE id IN ({})", table, placeholders);
        let values: Vec<rusqlite::types::Value> =
            ids.iter().map(|id| rusqlite::types::Value::from(*id)).collect();

        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| RepositoryError::DatabaseQueryError(e.to_string()))?;
        let pairs = stmt
            .query_map(params_from_iter(values), |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(|e| RepositoryError::DatabaseQueryError(e.to_string()))?
            .collect::<SqliteResult<Vec<_>>>()
            .map_err(|e| RepositoryError::DatabaseQueryError(e.to_string()))?;

        Ok(pairs.into_iter().collect())
    }

    pub fn teacher_name(&self, id: i64) -> RepositoryResult<Option<String>> {
        self.name_of("teacher", id)
    }

    pub fn classroom_name(&self, id: i64) -> RepositoryResult<Option<String>> {
        self.name_of("classroom", id)
    }

    pub fn student_names_by_ids(&self, ids: &[i64]) -> RepositoryResult<HashMap<i64, String>> {
        self.names_of("student", ids)
    }
}
