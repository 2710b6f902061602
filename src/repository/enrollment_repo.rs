// ==========================================
// 教培排课与课时管理引擎 - 报名数据仓储
// ==========================================
// 红线: used_hours 变更必须走乐观锁接口, 不提供裸更新
// ==========================================

use crate::domain::enrollment::Enrollment;
use crate::domain::types::EnrollmentStatus;
use crate::domain::parse_date;
use crate::repository::error::{RepositoryError, RepositoryResult};
use chrono::Local;
use rusqlite::{params, Connection, OptionalExtension, Result as SqliteResult};
use std::sync::{Arc, Mutex};

const ENROLLMENT_COLUMNS: &str = r#"
    id, student_id, class_plan_id, status,
    purchased_hours, used_hours, enrollment_date, revision
"#;

// ==========================================
// EnrollmentRepository - 报名仓储
// ==========================================

/// 报名仓储
/// 职责: 管理 enrollment 表的读写与课时计数器的并发安全变更
pub struct EnrollmentRepository {
    conn: Arc<Mutex<Connection>>,
}

impl EnrollmentRepository {
    /// 创建新的报名仓储实例
    pub fn new(db_path: String) -> RepositoryResult<Self> {
        let conn = Connection::open(&db_path)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 从已有连接创建仓储实例
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// 获取数据库连接
    ///
    /// crate 内可见: 台账结算需要持有连接跨仓储开事务
    pub(crate) fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 映射数据库行到 Enrollment 对象
    fn map_row(row: &rusqlite::Row) -> rusqlite::Result<Enrollment> {
        let status_str: String = row.get(3)?;
        let date_str: Option<String> = row.get(6)?;

        Ok(Enrollment {
            id: row.get(0)?,
            student_id: row.get(1)?,
            class_plan_id: row.get(2)?,
            status: EnrollmentStatus::from_str(&status_str),
            purchased_hours: row.get(4)?,
            used_hours: row.get(5)?,
            enrollment_date: date_str.as_deref().and_then(parse_date),
            revision: row.get(7)?,
        })
    }

    /// 按ID查询报名
    pub fn find_by_id(&self, id: i64) -> RepositoryResult<Option<Enrollment>> {
        let conn = self.get_conn()?;
        Self::find_by_id_with_conn(&conn, id)
    }

    pub(crate) fn find_by_id_with_conn(
        conn: &Connection,
        id: i64,
    ) -> RepositoryResult<Option<Enrollment>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM enrollment WHERE id = ?1",
            ENROLLMENT_COLUMNS
        ))?;

        let enrollment = stmt.query_row(params![id], Self::map_row).optional()?;
        Ok(enrollment)
    }

    /// 查询班级的全部在读报名
    pub fn find_active_by_class_plan(&self, class_plan_id: i64) -> RepositoryResult<Vec<Enrollment>> {
        let conn = self.get_conn()?;

        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM enrollment WHERE class_plan_id = ?1 AND status = 'active' ORDER BY id",
            ENROLLMENT_COLUMNS
        ))?;

        let enrollments = stmt
            .query_map(params![class_plan_id], Self::map_row)?
            .collect::<SqliteResult<Vec<Enrollment>>>()?;

        Ok(enrollments)
    }

    /// 统计班级在读人数
    pub fn count_active_by_class_plan(&self, class_plan_id: i64) -> RepositoryResult<i64> {
        let conn = self.get_conn()?;

        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM enrollment WHERE class_plan_id = ?1 AND status = 'active'",
            params![class_plan_id],
            |row| row.get(0),
        )?;

        Ok(count)
    }

    /// 按 (学生, 班级) 查询在读报名 (请假申请入口用)
    pub fn find_active_by_student_and_plan(
        &self,
        student_id: i64,
        class_plan_id: i64,
    ) -> RepositoryResult<Option<Enrollment>> {
        let conn = self.get_conn()?;

        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM enrollment WHERE student_id = ?1 AND class_plan_id = ?2 AND status = 'active' LIMIT 1",
            ENROLLMENT_COLUMNS
        ))?;

        let enrollment = stmt
            .query_row(params![student_id, class_plan_id], Self::map_row)
            .optional()?;

        Ok(enrollment)
    }

    /// 课时计数器增量更新 (带乐观锁检查)
    ///
    /// # 并发控制
    /// 使用乐观锁 (revision字段) 防止并发扣减/退还互相覆盖
    ///
    /// # 参数
    /// - enrollment_id: 报名ID
    /// - delta: used_hours 的带符号增量
    /// - expected_revision: 调用方读到的 revision
    ///
    /// # 错误
    /// - `RepositoryError::OptimisticLockFailure`: revision 不匹配 (并发修改)
    /// - `RepositoryError::NotFound`: 报名不存在
    pub fn apply_hours_delta(
        &self,
        enrollment_id: i64,
        delta: f64,
        expected_revision: i64,
    ) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        Self::apply_hours_delta_with_conn(&conn, enrollment_id, delta, expected_revision)
    }

    pub(crate) fn apply_hours_delta_with_conn(
        conn: &Connection,
        enrollment_id: i64,
        delta: f64,
        expected_revision: i64,
    ) -> RepositoryResult<()> {
        let rows_affected = conn.execute(
            r#"UPDATE enrollment
               SET used_hours = used_hours + ?1, revision = revision + 1, updated_at = ?2
               WHERE id = ?3 AND revision = ?4"#,
            params![
                delta,
                Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
                enrollment_id,
                expected_revision,
            ],
        )?;

        if rows_affected == 0 {
            // 判断是记录不存在还是 revision 冲突
            let exists: Result<i64, _> = conn.query_row(
                "SELECT revision FROM enrollment WHERE id = ?1",
                params![enrollment_id],
                |row| row.get(0),
            );

            match exists {
                Ok(actual_revision) => {
                    return Err(RepositoryError::OptimisticLockFailure {
                        enrollment_id,
                        expected: expected_revision,
                        actual: actual_revision,
                    });
                }
                Err(_) => {
                    return Err(RepositoryError::NotFound {
                        entity: "Enrollment".to_string(),
                        id: enrollment_id.to_string(),
                    });
                }
            }
        }

        Ok(())
    }

    /// 对账重写 used_hours (无条件, 同样推进 revision)
    ///
    /// 仅供台账对账使用; 返回是否发生了改写
    pub fn overwrite_used_hours(&self, enrollment_id: i64, used_hours: f64) -> RepositoryResult<bool> {
        let conn = self.get_conn()?;

        let rows_affected = conn.execute(
            r#"UPDATE enrollment
               SET used_hours = ?1, revision = revision + 1, updated_at = ?2
               WHERE id = ?3"#,
            params![
                used_hours,
                Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
                enrollment_id,
            ],
        )?;

        if rows_affected == 0 {
            return Err(RepositoryError::NotFound {
                entity: "Enrollment".to_string(),
                id: enrollment_id.to_string(),
            });
        }
        Ok(true)
    }
}
