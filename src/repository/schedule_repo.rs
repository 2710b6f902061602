// ==========================================
// 教培排课与课时管理引擎 - 排课数据仓储
// ==========================================
// 红线: Repository 不含业务逻辑
// ==========================================

use crate::domain::schedule::Schedule;
use crate::domain::types::ScheduleStatus;
use crate::domain::{format_date, format_time, parse_date, parse_time};
use crate::repository::error::{RepositoryError, RepositoryResult};
use chrono::{Local, NaiveDate};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Result as SqliteResult};
use std::sync::{Arc, Mutex};

const SCHEDULE_COLUMNS: &str = r#"
    id, class_plan_id, teacher_id, classroom_id,
    schedule_date, start_time, end_time, lesson_hours,
    status, batch_no, title, notes,
    created_by, updated_by, created_at, updated_at
"#;

// ==========================================
// ScheduleRepository - 排课仓储
// ==========================================

/// 提交事务内的课时余量复核参数
///
/// 预检阶段的余量校验基于快照, 提交必须在事务内以库内当前数据再核一次
pub struct ReserveBudget {
    pub class_plan_id: i64,
    /// 本批新增的课时合计
    pub additional_hours: f64,
    pub epsilon: f64,
}

/// 排课仓储
/// 职责: 管理 schedule 表的读写
pub struct ScheduleRepository {
    conn: Arc<Mutex<Connection>>,
}

impl ScheduleRepository {
    /// 创建新的排课仓储实例
    ///
    /// # 参数
    /// - db_path: 数据库文件路径
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

    /// 映射数据库行到 Schedule 对象
    fn map_row(row: &rusqlite::Row) -> rusqlite::Result<Schedule> {
        let date_str: String = row.get(4)?;
        let start_str: String = row.get(5)?;
        let end_str: String = row.get(6)?;
        let status_str: String = row.get(8)?;

        Ok(Schedule {
            id: row.get(0)?,
            class_plan_id: row.get(1)?,
            teacher_id: row.get(2)?,
            classroom_id: row.get(3)?,
            schedule_date: parse_date(&date_str).ok_or_else(|| {
                rusqlite::Error::FromSqlConversionFailure(
                    4,
                    rusqlite::types::Type::Text,
                    format!("非法日期: {}", date_str).into(),
                )
            })?,
            start_time: parse_time(&start_str).ok_or_else(|| {
                rusqlite::Error::FromSqlConversionFailure(
                    5,
                    rusqlite::types::Type::Text,
                    format!("非法时间: {}", start_str).into(),
                )
            })?,
            end_time: parse_time(&end_str).ok_or_else(|| {
                rusqlite::Error::FromSqlConversionFailure(
                    6,
                    rusqlite::types::Type::Text,
                    format!("非法时间: {}", end_str).into(),
                )
            })?,
            lesson_hours: row.get(7)?,
            status: ScheduleStatus::from_str(&status_str),
            batch_no: row.get(9)?,
            title: row.get(10)?,
            notes: row.get(11)?,
            created_by: row.get(12)?,
            updated_by: row.get(13)?,
            created_at: row.get(14)?,
            updated_at: row.get(15)?,
        })
    }

    fn insert_with_conn(conn: &Connection, schedule: &Schedule) -> RepositoryResult<i64> {
        conn.execute(
            r#"
            INSERT INTO schedule (
                class_plan_id, teacher_id, classroom_id,
                schedule_date, start_time, end_time, lesson_hours,
                status, batch_no, title, notes,
                created_by, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            "#,
            params![
                schedule.class_plan_id,
                schedule.teacher_id,
                schedule.classroom_id,
                format_date(schedule.schedule_date),
                format_time(schedule.start_time),
                format_time(schedule.end_time),
                schedule.lesson_hours,
                schedule.status.to_db_str(),
                schedule.batch_no,
                schedule.title,
                schedule.notes,
                schedule.created_by,
                Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// 批量插入排课, 事务内逐条重查重叠并复核课时余量
    /// (预检与提交之间的并发窗口防护)
    ///
    /// 任意一条在库中已有重叠占用, 或班级在读报名承担不了本批新增课时,
    /// 整批回滚
    ///
    /// # 返回
    /// - Ok(Vec<i64>): 按输入顺序返回的新ID列表
    /// - Err(BusinessRuleViolation): 提交窗口内出现新冲突, 消息含"并发冲突"
    /// - Err(InsufficientHours): 提交窗口内余量被并发消耗, 列明承担不了的报名
    pub fn batch_insert_conflict_checked(
        &self,
        schedules: &[Schedule],
        budget: Option<&ReserveBudget>,
    ) -> RepositoryResult<Vec<i64>> {
        let conn = self.get_conn()?;

        conn.execute("BEGIN TRANSACTION", [])?;

        if let Some(budget) = budget {
            match Self::reserve_shortfall_with_conn(&conn, budget) {
                Ok(ids) if ids.is_empty() => {}
                Ok(ids) => {
                    let _ = conn.execute("ROLLBACK", []);
                    return Err(RepositoryError::InsufficientHours {
                        enrollment_ids: ids,
                    });
                }
                Err(e) => {
                    let _ = conn.execute("ROLLBACK", []);
                    return Err(e.into());
                }
            }
        }

        let mut ids = Vec::with_capacity(schedules.len());
        for schedule in schedules {
            match Self::has_overlap_with_conn(&conn, schedule) {
                Ok(false) => {}
                Ok(true) => {
                    let _ = conn.execute("ROLLBACK", []);
                    return Err(RepositoryError::BusinessRuleViolation(format!(
                        "提交时检测到并发冲突: {} {}-{} 时段已被占用",
                        format_date(schedule.schedule_date),
                        format_time(schedule.start_time),
                        format_time(schedule.end_time),
                    )));
                }
                Err(e) => {
                    let _ = conn.execute("ROLLBACK", []);
                    return Err(e.into());
                }
            }
            match Self::insert_with_conn(&conn, schedule) {
                Ok(id) => ids.push(id),
                Err(e) => {
                    let _ = conn.execute("ROLLBACK", []);
                    return Err(e);
                }
            }
        }

        conn.execute("COMMIT", [])?;
        Ok(ids)
    }

    /// 事务内重叠占用检查
    ///
    /// 时间为零填充的 "HH:MM" 文本, 字典序即时间序
    fn has_overlap_with_conn(conn: &Connection, schedule: &Schedule) -> SqliteResult<bool> {
        if schedule.teacher_id.is_none() && schedule.classroom_id.is_none() {
            return Ok(false);
        }

        let mut sql = String::from(
            "SELECT EXISTS(SELECT 1 FROM schedule \
             WHERE status != 'cancelled' AND schedule_date = ?1 \
             AND start_time < ?2 AND end_time > ?3 AND (",
        );
        let mut values: Vec<Value> = vec![
            Value::from(format_date(schedule.schedule_date)),
            Value::from(format_time(schedule.end_time)),
            Value::from(format_time(schedule.start_time)),
        ];
        let mut idx = 4;
        let mut first = true;

        if let Some(tid) = schedule.teacher_id {
            sql.push_str(&format!("teacher_id = ?{}", idx));
            values.push(Value::from(tid));
            idx += 1;
            first = false;
        }
        if let Some(cid) = schedule.classroom_id {
            if !first {
                sql.push_str(" OR ");
            }
            sql.push_str(&format!("classroom_id = ?{}", idx));
            values.push(Value::from(cid));
        }
        sql.push_str("))");

        conn.query_row(&sql, params_from_iter(values), |row| row.get(0))
    }

    /// 事务内课时余量复核
    ///
    /// 口径与预检一致: 可用 = 已购 - 已用 - (班级待上课时 - 该报名已提前扣费的待上课时),
    /// 可用 + 容差 < 新增课时 的在读报名即为承担不了
    fn reserve_shortfall_with_conn(
        conn: &Connection,
        budget: &ReserveBudget,
    ) -> SqliteResult<Vec<i64>> {
        let mut stmt = conn.prepare(
            r#"
            SELECT e.id FROM enrollment e
            WHERE e.class_plan_id = ?1 AND e.status = 'active'
              AND (e.purchased_hours - e.used_hours
                   - ((SELECT COALESCE(SUM(s.lesson_hours), 0.0) FROM schedule s
                       WHERE s.class_plan_id = ?1 AND s.status = 'scheduled')
                      - COALESCE((SELECT SUM(s2.lesson_hours)
                                  FROM student_attendance a
                                  JOIN schedule s2 ON s2.id = a.schedule_id
                                  WHERE a.enrollment_id = e.id AND a.deduct_hours = 1
                                    AND s2.class_plan_id = ?1 AND s2.status = 'scheduled'), 0.0)))
                  + ?3 < ?2
            ORDER BY e.id
            "#,
        )?;
        let ids = stmt
            .query_map(
                params![budget.class_plan_id, budget.additional_hours, budget.epsilon],
                |row| row.get::<_, i64>(0),
            )?
            .collect::<SqliteResult<Vec<i64>>>()?;
        Ok(ids)
    }

    /// 按ID查询排课
    pub fn find_by_id(&self, id: i64) -> RepositoryResult<Option<Schedule>> {
        let conn = self.get_conn()?;

        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM schedule WHERE id = ?1",
            SCHEDULE_COLUMNS
        ))?;

        let schedule = stmt.query_row(params![id], Self::map_row).optional()?;
        Ok(schedule)
    }

    /// 按班级查询排课, 可选日期范围过滤
    ///
    /// # 参数
    /// - class_plan_id: 班级ID
    /// - start_date / end_date: 可选日期范围(闭区间)
    pub fn find_by_class_plan(
        &self,
        class_plan_id: i64,
        start_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
    ) -> RepositoryResult<Vec<Schedule>> {
        let conn = self.get_conn()?;

        let mut sql = format!(
            "SELECT {} FROM schedule WHERE class_plan_id = ?1",
            SCHEDULE_COLUMNS
        );
        let mut values: Vec<Value> = vec![Value::from(class_plan_id)];
        let mut idx = 2;

        if let Some(from) = start_date {
            sql.push_str(&format!(" AND schedule_date >= ?{}", idx));
            values.push(Value::from(format_date(from)));
            idx += 1;
        }
        if let Some(to) = end_date {
            sql.push_str(&format!(" AND schedule_date <= ?{}", idx));
            values.push(Value::from(format_date(to)));
        }

        sql.push_str(" ORDER BY schedule_date, start_time");

        let mut stmt = conn.prepare(&sql)?;
        let schedules = stmt
            .query_map(params_from_iter(values), Self::map_row)?
            .collect::<SqliteResult<Vec<Schedule>>>()?;

        Ok(schedules)
    }

    /// 按批次号查询排课
    pub fn find_by_batch_no(&self, batch_no: &str) -> RepositoryResult<Vec<Schedule>> {
        let conn = self.get_conn()?;

        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM schedule WHERE batch_no = ?1 ORDER BY schedule_date, start_time",
            SCHEDULE_COLUMNS
        ))?;

        let schedules = stmt
            .query_map(params![batch_no], Self::map_row)?
            .collect::<SqliteResult<Vec<Schedule>>>()?;

        Ok(schedules)
    }

    /// 查询冲突判定候选集: 指定教师/教室在日期范围内的全部未取消排课
    ///
    /// 教师与教室条件取并集; 两者均为 None 时返回空集
    ///
    /// # 参数
    /// - teacher_id / classroom_id: 资源ID(至少一个)
    /// - start_date / end_date: 日期范围(闭区间)
    pub fn find_conflict_candidates(
        &self,
        teacher_id: Option<i64>,
        classroom_id: Option<i64>,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> RepositoryResult<Vec<Schedule>> {
        if teacher_id.is_none() && classroom_id.is_none() {
            return Ok(Vec::new());
        }

        let conn = self.get_conn()?;

        let mut sql = format!(
            "SELECT {} FROM schedule WHERE status != 'cancelled' AND schedule_date BETWEEN ?1 AND ?2 AND (",
            SCHEDULE_COLUMNS
        );
        let mut values: Vec<Value> = vec![
            Value::from(format_date(start_date)),
            Value::from(format_date(end_date)),
        ];
        let mut idx = 3;
        let mut first = true;

        if let Some(tid) = teacher_id {
            sql.push_str(&format!("teacher_id = ?{}", idx));
            values.push(Value::from(tid));
            idx += 1;
            first = false;
        }
        if let Some(cid) = classroom_id {
            if !first {
                sql.push_str(" OR ");
            }
            sql.push_str(&format!("classroom_id = ?{}", idx));
            values.push(Value::from(cid));
        }
        sql.push_str(") ORDER BY schedule_date, start_time");

        let mut stmt = conn.prepare(&sql)?;
        let schedules = stmt
            .query_map(params_from_iter(values), Self::map_row)?
            .collect::<SqliteResult<Vec<Schedule>>>()?;

        Ok(schedules)
    }

    /// 整行更新排课(按ID)
    pub fn update(&self, schedule: &Schedule) -> RepositoryResult<()> {
        let conn = self.get_conn()?;

        let rows_affected = conn.execute(
            r#"
            UPDATE schedule
            SET class_plan_id = ?1, teacher_id = ?2, classroom_id = ?3,
                schedule_date = ?4, start_time = ?5, end_time = ?6,
                lesson_hours = ?7, status = ?8, batch_no = ?9,
                title = ?10, notes = ?11, updated_by = ?12, updated_at = ?13
            WHERE id = ?14
            "#,
            params![
                schedule.class_plan_id,
                schedule.teacher_id,
                schedule.classroom_id,
                format_date(schedule.schedule_date),
                format_time(schedule.start_time),
                format_time(schedule.end_time),
                schedule.lesson_hours,
                schedule.status.to_db_str(),
                schedule.batch_no,
                schedule.title,
                schedule.notes,
                schedule.updated_by,
                Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
                schedule.id,
            ],
        )?;

        if rows_affected == 0 {
            return Err(RepositoryError::NotFound {
                entity: "Schedule".to_string(),
                id: schedule.id.to_string(),
            });
        }
        Ok(())
    }

    /// 部分字段更新(批量修改用), 只更新提供的字段
    ///
    /// # 返回
    /// - Ok(true): 有字段被更新
    /// - Ok(false): 未提供任何字段
    pub fn update_fields(
        &self,
        id: i64,
        teacher_id: Option<i64>,
        classroom_id: Option<i64>,
        notes: Option<&str>,
        updated_by: &str,
    ) -> RepositoryResult<bool> {
        let mut sets: Vec<String> = Vec::new();
        let mut values: Vec<Value> = Vec::new();
        let mut idx = 1;

        if let Some(tid) = teacher_id {
            sets.push(format!("teacher_id = ?{}", idx));
            values.push(Value::from(tid));
            idx += 1;
        }
        if let Some(cid) = classroom_id {
            sets.push(format!("classroom_id = ?{}", idx));
            values.push(Value::from(cid));
            idx += 1;
        }
        if let Some(n) = notes {
            sets.push(format!("notes = ?{}", idx));
            values.push(Value::from(n.to_string()));
            idx += 1;
        }

        if sets.is_empty() {
            return Ok(false);
        }

        sets.push(format!("updated_by = ?{}", idx));
        values.push(Value::from(updated_by.to_string()));
        idx += 1;
        sets.push(format!("updated_at = ?{}", idx));
        values.push(Value::from(
            Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        ));
        idx += 1;

        let sql = format!("UPDATE schedule SET {} WHERE id = ?{}", sets.join(", "), idx);
        values.push(Value::from(id));

        let conn = self.get_conn()?;
        let rows_affected = conn.execute(&sql, params_from_iter(values))?;

        if rows_affected == 0 {
            return Err(RepositoryError::NotFound {
                entity: "Schedule".to_string(),
                id: id.to_string(),
            });
        }
        Ok(true)
    }

    /// 更新排课状态
    pub fn update_status(
        &self,
        id: i64,
        status: ScheduleStatus,
        updated_by: &str,
    ) -> RepositoryResult<()> {
        let conn = self.get_conn()?;

        let rows_affected = conn.execute(
            "UPDATE schedule SET status = ?1, updated_by = ?2, updated_at = ?3 WHERE id = ?4",
            params![
                status.to_db_str(),
                updated_by,
                Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
                id,
            ],
        )?;

        if rows_affected == 0 {
            return Err(RepositoryError::NotFound {
                entity: "Schedule".to_string(),
                id: id.to_string(),
            });
        }
        Ok(())
    }

    /// 删除单条排课
    ///
    /// 已完成的排课由调用方先行拦截, 这里只负责执行
    pub fn delete(&self, id: i64) -> RepositoryResult<usize> {
        let conn = self.get_conn()?;
        let deleted = conn.execute("DELETE FROM schedule WHERE id = ?1", params![id])?;
        Ok(deleted)
    }

    /// 按批次号删除未完成的排课
    ///
    /// # 返回
    /// - Ok(usize): 实际删除的记录数(已完成的排课被跳过)
    pub fn delete_by_batch_no(&self, batch_no: &str) -> RepositoryResult<usize> {
        let conn = self.get_conn()?;
        let deleted = conn.execute(
            "DELETE FROM schedule WHERE batch_no = ?1 AND status != 'completed'",
            params![batch_no],
        )?;
        Ok(deleted)
    }

    /// 按ID列表删除未完成的排课
    pub fn delete_by_ids(&self, ids: &[i64]) -> RepositoryResult<usize> {
        if ids.is_empty() {
            return Ok(0);
        }

        let conn = self.get_conn()?;

        let placeholders = (1..=ids.len())
            .map(|i| format!("?{}", i))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "DELETE FROM schedule WHERE status != 'completed' AND id IN ({})",
            placeholders
        );
        let values: Vec<Value> = ids.iter().map(|id| Value::from(*id)).collect();

        let deleted = conn.execute(&sql, params_from_iter(values))?;
        Ok(deleted)
    }

    /// 查询过期未完成的排课 (schedule_date <= cutoff 且 status = scheduled)
    pub fn find_overdue(&self, cutoff: NaiveDate) -> RepositoryResult<Vec<Schedule>> {
        let conn = self.get_conn()?;

        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM schedule WHERE status = 'scheduled' AND schedule_date <= ?1 ORDER BY schedule_date, start_time",
            SCHEDULE_COLUMNS
        ))?;

        let schedules = stmt
            .query_map(params![format_date(cutoff)], Self::map_row)?
            .collect::<SqliteResult<Vec<Schedule>>>()?;

        Ok(schedules)
    }

    /// 统计班级处于 scheduled 状态的排课课时合计
    pub fn sum_scheduled_hours(&self, class_plan_id: i64) -> RepositoryResult<f64> {
        let conn = self.get_conn()?;

        let total: f64 = conn.query_row(
            "SELECT COALESCE(SUM(lesson_hours), 0.0) FROM schedule WHERE class_plan_id = ?1 AND status = 'scheduled'",
            params![class_plan_id],
            |row| row.get(0),
        )?;

        Ok(total)
    }
}
