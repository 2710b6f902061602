// ==========================================
// 课时台账仓储
// ==========================================
// 职责: lesson_record 表的追加与查询
// 红线: 台账只追加不修改; 扣课时写正数, 返还写负数,
//       used_hours 始终等于台账按报名聚合的净和
// ==========================================

use std::sync::{Arc, Mutex};

use chrono::NaiveDate;
use rusqlite::{params, params_from_iter, Connection, Result as SqliteResult, Row};

use crate::domain::interval::{format_date, parse_date};
use crate::domain::lesson_record::LessonRecord;
use crate::domain::types::LessonRecordType;
use crate::repository::error::{RepositoryError, RepositoryResult};

const LESSON_RECORD_COLUMNS: &str = "id, enrollment_id, schedule_id, record_date, hours, \
     record_type, notes, created_by, created_at";

pub struct LessonRecordRepository {
    conn: Arc<Mutex<Connection>>,
}

impl LessonRecordRepository {
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

    fn map_row(row: &Row) -> SqliteResult<LessonRecord> {
        let date_str: String = row.get(3)?;
        let record_date = parse_date(&date_str).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                3,
                rusqlite::types::Type::Text,
                format!("无法解析台账日期: {}", date_str).into(),
            )
        })?;
        let type_str: String = row.get(5)?;
        let record_type = LessonRecordType::from_str(&type_str).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                5,
                rusqlite::types::Type::Text,
                format!("未知的台账类型: {}", type_str).into(),
            )
        })?;

        Ok(LessonRecord {
            id: row.get(0)?,
            enrollment_id: row.get(1)?,
            schedule_id: row.get(2)?,
            record_date,
            hours: row.get(4)?,
            record_type,
            notes: row.get(6)?,
            created_by: row.get(7)?,
            created_at: row.get(8)?,
        })
    }

    /// 追加一条台账记录, 返回新记录 id
    pub fn insert(&self, record: &LessonRecord) -> RepositoryResult<i64> {
        let conn = self.get_conn()?;
        Self::insert_with_conn(&conn, record)
            .map_err(|e| RepositoryError::DatabaseQueryError(e.to_string()))
    }

    pub(crate) fn insert_with_conn(conn: &Connection, record: &LessonRecord) -> SqliteResult<i64> {
        conn.execute(
            "INSERT INTO lesson_record (
                enrollment_id, schedule_id, record_date, hours,
                record_type, notes, created_by, created_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                record.enrollment_id,
                record.schedule_id,
                format_date(record.record_date),
                record.hours,
                record.record_type.to_db_str(),
                record.notes,
                record.created_by,
                record.created_at,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn find_by_enrollment(&self, enrollment_id: i64) -> RepositoryResult<Vec<LessonRecord>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM lesson_record WHERE enrollment_id = ?1 \
             ORDER BY created_at DESC, id DESC",
            LESSON_RECORD_COLUMNS
        );
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| RepositoryError::DatabaseQueryError(e.to_string()))?;
        let records = stmt
            .query_map(params![enrollment_id], Self::map_row)
            .map_err(|e| RepositoryError::DatabaseQueryError(e.to_string()))?
            .collect::<SqliteResult<Vec<_>>>()
            .map_err(|e| RepositoryError::DatabaseQueryError(e.to_string()))?;
        Ok(records)
    }

    /// 按日期范围查询某报名的台账 (对账单场景)
    pub fn find_by_enrollment_and_range(
        &self,
        enrollment_id: i64,
        start_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
    ) -> RepositoryResult<Vec<LessonRecord>> {
        let conn = self.get_conn()?;

        let mut sql = format!(
            "SELECT {} FROM lesson_record WHERE enrollment_id = ?1",
            LESSON_RECORD_COLUMNS
        );
        let mut values: Vec<rusqlite::types::Value> = vec![enrollment_id.into()];

        if let Some(start) = start_date {
            values.push(format_date(start).into());
            sql.push_str(&format!(" AND record_date >= ?{}", values.len()));
        }
        if let Some(end) = end_date {
            values.push(format_date(end).into());
            sql.push_str(&format!(" AND record_date <= ?{}", values.len()));
        }
        sql.push_str(" ORDER BY record_date, id");

        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| RepositoryError::DatabaseQueryError(e.to_string()))?;
        let records = stmt
            .query_map(params_from_iter(values), Self::map_row)
            .map_err(|e| RepositoryError::DatabaseQueryError(e.to_string()))?
            .collect::<SqliteResult<Vec<_>>>()
            .map_err(|e| RepositoryError::DatabaseQueryError(e.to_string()))?;
        Ok(records)
    }

    /// 台账净和, 对账时与 enrollment.used_hours 比对
    pub fn sum_hours_by_enrollment(&self, enrollment_id: i64) -> RepositoryResult<f64> {
        let conn = self.get_conn()?;
        let total: f64 = conn
            .query_row(
                "SELECT COALESCE(SUM(hours), 0.0) FROM lesson_record WHERE enrollment_id = ?1",
                params![enrollment_id],
                |row| row.get(0),
            )
            .map_err(|e| RepositoryError::DatabaseQueryError(e.to_string()))?;
        Ok(total)
    }

}
