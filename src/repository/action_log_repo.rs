// ==========================================
// 操作日志仓储
// ==========================================
// 职责: action_log 表的写入与查询
// 红线: Repository 不做业务逻辑, 只做数据映射
// ==========================================

use std::sync::{Arc, Mutex};

use chrono::Local;
use rusqlite::{params, Connection};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::domain::action_log::{ActionLog, ActionType};
use crate::repository::error::{RepositoryError, RepositoryResult};

pub struct ActionLogRepository {
    conn: Arc<Mutex<Connection>>,
}

impl ActionLogRepository {
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

    /// 插入操作日志
    ///
    /// # 返回
    /// - `Ok(action_id)`: 成功插入, 返回 action_id
    pub fn insert(&self, log: &ActionLog) -> RepositoryResult<String> {
        let conn = self.get_conn()?;
        conn.execute(
            "INSERT INTO action_log (action_id, action_type, operator, payload_json, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                log.action_id,
                log.action_type,
                log.operator,
                log.payload_json.as_ref().map(|v| v.to_string()),
                log.created_at,
            ],
        )?;
        Ok(log.action_id.clone())
    }

    /// 构造并插入一条操作日志, 自动生成 action_id 与时间戳
    pub fn log_action(
        &self,
        action_type: ActionType,
        operator: &str,
        payload: Option<JsonValue>,
    ) -> RepositoryResult<String> {
        let log = ActionLog {
            action_id: Uuid::new_v4().to_string(),
            action_type: action_type.to_db_str().to_string(),
            operator: operator.to_string(),
            payload_json: payload,
            created_at: Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        };
        self.insert(&log)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use serde_json::json;

    fn setup() -> (
        tempfile::NamedTempFile,
        Arc<Mutex<Connection>>,
        ActionLogRepository,
    ) {
        let file = tempfile::NamedTempFile::new().unwrap();
        let path = file.path().to_str().unwrap().to_string();
        let conn = db::open_sqlite_connection(&path).unwrap();
        db::init_schema(&conn).unwrap();
        let conn = Arc::new(Mutex::new(conn));
        let repo = ActionLogRepository::from_connection(conn.clone());
        (file, conn, repo)
    }

    // 测试: 写入后落表, payload 以 JSON 文本原样保存
    #[test]
    fn test_log_action_persists_payload() {
        let (_file, conn, repo) = setup();

        let id = repo
            .log_action(
                ActionType::BatchCreateSchedules,
                "admin",
                Some(json!({"batch_no": "BATCH-0000AAAA1111", "total": 4})),
            )
            .unwrap();
        assert!(!id.is_empty());

        repo.log_action(ActionType::AdjustHours, "admin", None)
            .unwrap();

        let conn = conn.lock().unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM action_log", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 2);

        let payload_str: String = conn
            .query_row(
                "SELECT payload_json FROM action_log WHERE action_type = 'BATCH_CREATE_SCHEDULES'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        let payload: serde_json::Value = serde_json::from_str(&payload_str).unwrap();
        assert_eq!(payload["total"], 4);
    }
}
