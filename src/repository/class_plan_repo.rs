// ==========================================
// 班级仓储
// ==========================================
// 职责: class_plan 表的只读访问
// 红线: 班级由外部教务系统维护, 引擎侧不提供写入口;
//       current_students/completed_lessons 仅读取展示
// ==========================================

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use rusqlite::{params, params_from_iter, Connection, Result as SqliteResult, Row};

use crate::domain::class_plan::ClassPlan;
use crate::domain::interval::parse_date;
use crate::repository::error::{RepositoryError, RepositoryResult};

const CLASS_PLAN_COLUMNS: &str = "id, name, course_id, campus_id, head_teacher_id, classroom_id, \
     current_students, max_students, total_lessons, completed_lessons, status, start_date, end_date";

pub struct ClassPlanRepository {
    conn: Arc<Mutex<Connection>>,
}

impl ClassPlanRepository {
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

    fn map_row(row: &Row) -> SqliteResult<ClassPlan> {
        let start_date: Option<String> = row.get(11)?;
        let end_date: Option<String> = row.get(12)?;

        Ok(ClassPlan {
            id: row.get(0)?,
            name: row.get(1)?,
            course_id: row.get(2)?,
            campus_id: row.get(3)?,
            head_teacher_id: row.get(4)?,
            classroom_id: row.get(5)?,
            current_students: row.get(6)?,
            max_students: row.get(7)?,
            total_lessons: row.get(8)?,
            completed_lessons: row.get(9)?,
            status: row.get(10)?,
            start_date: start_date.as_deref().and_then(parse_date),
            end_date: end_date.as_deref().and_then(parse_date),
        })
    }

    pub fn find_by_id(&self, id: i64) -> RepositoryResult<Option<ClassPlan>> {
        let conn = self.get_conn()?;
        let sql = format!("SELECT {} FROM class_plan WHERE id = ?1", CLASS_PLAN_COLUMNS);
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| RepositoryError::DatabaseQueryError(e.to_string()))?;
        let plan = stmt
            .query_map(params![id], Self::map_row)
            .map_err(|e| RepositoryError::DatabaseQueryError(e.to_string()))?
            .collect::<SqliteResult<Vec<_>>>()
            .map_err(|e| RepositoryError::DatabaseQueryError(e.to_string()))?
            .into_iter()
            .next();
        Ok(plan)
    }

    /// 批量取班级名称 (冲突提示拼接用, 避免逐条查询)
    pub fn names_by_ids(&self, ids: &[i64]) -> RepositoryResult<HashMap<i64, String>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let conn = self.get_conn()?;

        let placeholders = (1..=ids.len())
            .map(|i| format!("?{}", i))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT id, name FROM class_plan WHERE id IN ({})",
            placeholders
        );
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
}
