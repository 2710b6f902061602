// ==========================================
// 教培排课与课时管理引擎 - 考勤数据仓储
// ==========================================
// 红线: (enrollment_id, schedule_id) 唯一, 写入一律 upsert
// ==========================================

use crate::domain::attendance::StudentAttendance;
use crate::domain::types::AttendanceStatus;
use crate::repository::error::{RepositoryError, RepositoryResult};
use rusqlite::{params, Connection, OptionalExtension, Result as SqliteResult};
use std::sync::{Arc, Mutex};

const ATTENDANCE_COLUMNS: &str = r#"
    id, enrollment_id, schedule_id, student_id, class_plan_id,
    status, leave_reason, apply_time, deduct_hours,
    marked_by, marked_at, notes
"#;

// ==========================================
// AttendanceRepository - 考勤仓储
// ==========================================

/// 考勤仓储
/// 职责: 管理 student_attendance 表的 upsert 与查询
pub struct AttendanceRepository {
    conn: Arc<Mutex<Connection>>,
}

impl AttendanceRepository {
    /// 创建新的考勤仓储实例
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
    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 映射数据库行到 StudentAttendance 对象
    fn map_row(row: &rusqlite::Row) -> rusqlite::Result<StudentAttendance> {
        let status_str: String = row.get(5)?;
        let deduct: i64 = row.get(8)?;

        Ok(StudentAttendance {
            id: row.get(0)?,
            enrollment_id: row.get(1)?,
            schedule_id: row.get(2)?,
            student_id: row.get(3)?,
            class_plan_id: row.get(4)?,
            status: AttendanceStatus::from_str(&status_str),
            leave_reason: row.get(6)?,
            apply_time: row.get(7)?,
            deduct_hours: deduct != 0,
            marked_by: row.get(9)?,
            marked_at: row.get(10)?,
            notes: row.get(11)?,
        })
    }

    /// 按 (报名, 排课) 查询考勤记录
    pub fn find_by_enrollment_and_schedule(
        &self,
        enrollment_id: i64,
        schedule_id: i64,
    ) -> RepositoryResult<Option<StudentAttendance>> {
        let conn = self.get_conn()?;

        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM student_attendance WHERE enrollment_id = ?1 AND schedule_id = ?2",
            ATTENDANCE_COLUMNS
        ))?;

        let attendance = stmt
            .query_row(params![enrollment_id, schedule_id], Self::map_row)
            .optional()?;

        Ok(attendance)
    }

    /// 写入考勤记录 (存在则整行更新)
    ///
    /// # 返回
    /// - Ok(i64): 记录ID (复用已存在记录的ID)
    pub fn upsert(&self, attendance: &StudentAttendance) -> RepositoryResult<i64> {
        let conn = self.get_conn()?;
        Self::upsert_with_conn(&conn, attendance)
    }

    pub(crate) fn upsert_with_conn(
        conn: &Connection,
        attendance: &StudentAttendance,
    ) -> RepositoryResult<i64> {
        conn.execute(
            r#"
            INSERT INTO student_attendance (
                enrollment_id, schedule_id, student_id, class_plan_id,
                status, leave_reason, apply_time, deduct_hours,
                marked_by, marked_at, notes
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            ON CONFLICT (enrollment_id, schedule_id) DO UPDATE SET
                status = excluded.status,
                leave_reason = excluded.leave_reason,
                apply_time = excluded.apply_time,
                deduct_hours = excluded.deduct_hours,
                marked_by = excluded.marked_by,
                marked_at = excluded.marked_at,
                notes = excluded.notes
            "#,
            params![
                attendance.enrollment_id,
                attendance.schedule_id,
                attendance.student_id,
                attendance.class_plan_id,
                attendance.status.to_db_str(),
                attendance.leave_reason,
                attendance.apply_time,
                attendance.deduct_hours as i64,
                attendance.marked_by,
                attendance.marked_at,
                attendance.notes,
            ],
        )?;

        let id: i64 = conn.query_row(
            "SELECT id FROM student_attendance WHERE enrollment_id = ?1 AND schedule_id = ?2",
            params![attendance.enrollment_id, attendance.schedule_id],
            |row| row.get(0),
        )?;

        Ok(id)
    }

    /// 查询某次排课的全部考勤记录
    pub fn find_by_schedule(&self, schedule_id: i64) -> RepositoryResult<Vec<StudentAttendance>> {
        let conn = self.get_conn()?;

        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM student_attendance WHERE schedule_id = ?1 ORDER BY id",
            ATTENDANCE_COLUMNS
        ))?;

        let list = stmt
            .query_map(params![schedule_id], Self::map_row)?
            .collect::<SqliteResult<Vec<StudentAttendance>>>()?;

        Ok(list)
    }

    /// 查询某次排课里已扣课时的考勤记录 (删除排课时需先退还)
    pub fn find_deducting_by_schedule(
        &self,
        schedule_id: i64,
    ) -> RepositoryResult<Vec<StudentAttendance>> {
        let conn = self.get_conn()?;

        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM student_attendance WHERE schedule_id = ?1 AND deduct_hours = 1 ORDER BY id",
            ATTENDANCE_COLUMNS
        ))?;

        let list = stmt
            .query_map(params![schedule_id], Self::map_row)?
            .collect::<SqliteResult<Vec<StudentAttendance>>>()?;

        Ok(list)
    }

    /// 统计报名在班级 scheduled 状态排课上已扣课时的合计
    ///
    /// 这些课次已从"预占"转为"实耗", 计算排课预占量时要剔除
    pub fn sum_deducted_scheduled_hours(
        &self,
        enrollment_id: i64,
        class_plan_id: i64,
    ) -> RepositoryResult<f64> {
        let conn = self.get_conn()?;

        let total: f64 = conn.query_row(
            r#"
            SELECT COALESCE(SUM(s.lesson_hours), 0.0)
            FROM student_attendance a
            JOIN schedule s ON s.id = a.schedule_id
            WHERE a.enrollment_id = ?1
              AND a.deduct_hours = 1
              AND s.class_plan_id = ?2
              AND s.status = 'scheduled'
            "#,
            params![enrollment_id, class_plan_id],
            |row| row.get(0),
        )?;

        Ok(total)
    }

    /// 删除某次排课的全部考勤记录 (删除排课前清理)
    pub fn delete_by_schedule(&self, schedule_id: i64) -> RepositoryResult<usize> {
        let conn = self.get_conn()?;
        let deleted = conn.execute(
            "DELETE FROM student_attendance WHERE schedule_id = ?1",
            params![schedule_id],
        )?;
        Ok(deleted)
    }

}
