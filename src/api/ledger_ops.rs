// ==========================================
// 教培排课与课时管理引擎 - 台账写入协议
// ==========================================
// 职责: 先写流水后改计数器的统一入口, 乐观锁冲突有界重试
// 红线: 流水是事实源, 必须先于计数器落库; 重试耗尽返回并发冲突而不是静默丢弃
// ==========================================

use crate::api::error::{ApiError, ApiResult};
use crate::domain::{LessonRecord, LessonRecordType, Schedule, StudentAttendance};
use crate::engine::EnrollmentHours;
use crate::repository::{
    AttendanceRepository, EnrollmentRepository, LessonRecordRepository, RepositoryError,
    ScheduleRepository,
};
use chrono::NaiveDate;
use rusqlite::Connection;

// ==========================================
// LedgerWrite - 一次台账写入的全部参数
// ==========================================
// hours 带符号: 消耗为正, 退还为负, 调整为任意符号
pub(crate) struct LedgerWrite<'a> {
    pub enrollment_id: i64,
    pub schedule_id: Option<i64>,
    pub record_date: NaiveDate,
    pub hours: f64,
    pub record_type: LessonRecordType,
    pub notes: Option<String>,
    pub operator: &'a str,
}

/// 写入一条课时流水并把带符号小时数累加到报名计数器
///
/// # 规则
/// - 流水行先落库, 计数器更新失败时流水仍然保留, 由对账操作修复
/// - 计数器走 revision 乐观锁, 冲突时重读重试, 最多 max_retry 次
/// - 重试耗尽返回 ConcurrencyConflict, 调用方自行决定是否告知用户重试
///
/// # 返回
/// 新流水行的ID
pub(crate) fn record_and_apply(
    enrollment_repo: &EnrollmentRepository,
    lesson_record_repo: &LessonRecordRepository,
    write: LedgerWrite<'_>,
    max_retry: u32,
) -> ApiResult<i64> {
    let record = build_record(&write);
    let record_id = lesson_record_repo.insert(&record)?;

    let mut attempt: u32 = 0;
    loop {
        let enrollment = enrollment_repo
            .find_by_id(write.enrollment_id)?
            .ok_or_else(|| {
                ApiError::NotFound(format!("报名记录不存在: {}", write.enrollment_id))
            })?;

        match enrollment_repo.apply_hours_delta(write.enrollment_id, write.hours, enrollment.revision)
        {
            Ok(()) => return Ok(record_id),
            Err(RepositoryError::OptimisticLockFailure { .. }) if attempt < max_retry => {
                attempt += 1;
                tracing::debug!(
                    "课时计数器revision冲突, 重读后第{}次重试: enrollment_id={}",
                    attempt,
                    write.enrollment_id
                );
            }
            Err(RepositoryError::OptimisticLockFailure { enrollment_id, .. }) => {
                return Err(ApiError::ConcurrencyConflict(format!(
                    "报名{}的课时更新重试{}次后仍然冲突, 请稍后重试",
                    enrollment_id, max_retry
                )));
            }
            Err(e) => return Err(e.into()),
        }
    }
}

fn build_record(write: &LedgerWrite<'_>) -> LessonRecord {
    LessonRecord {
        id: 0,
        enrollment_id: write.enrollment_id,
        schedule_id: write.schedule_id,
        record_date: write.record_date,
        hours: write.hours,
        record_type: write.record_type,
        notes: write.notes.clone(),
        created_by: write.operator.to_string(),
        created_at: chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
    }
}

/// 考勤写入与课时结算的单事务入口
///
/// # 规则
/// - 考勤 upsert、流水追加、计数器更新在同一个事务内落库, 任意一步失败整体回滚,
///   不会留下已改扣费标记却没有流水的考勤行
/// - 消耗在事务内以最新报名行复核余量, 并发消课不可能合计超出已购课时
/// - 事务持有共享连接期间其余写入全部排队, revision 在事务内不可能过期
///
/// # 返回
/// (考勤记录ID, 流水ID; 无台账影响时流水ID为 None)
pub(crate) fn settle_mark(
    enrollment_repo: &EnrollmentRepository,
    row: &StudentAttendance,
    ledger: Option<LedgerWrite<'_>>,
    epsilon: f64,
) -> ApiResult<(i64, Option<i64>)> {
    // 全部仓储共享同一连接, 经报名仓储取到的连接对考勤/流水表同样有效
    let conn = enrollment_repo.get_conn()?;
    conn.execute("BEGIN TRANSACTION", [])
        .map_err(|e| ApiError::DatabaseTransactionError(e.to_string()))?;

    let result = settle_mark_in_tx(&conn, row, ledger, epsilon);
    match result {
        Ok(ids) => {
            conn.execute("COMMIT", [])
                .map_err(|e| ApiError::DatabaseTransactionError(e.to_string()))?;
            Ok(ids)
        }
        Err(e) => {
            let _ = conn.execute("ROLLBACK", []);
            Err(e)
        }
    }
}

fn settle_mark_in_tx(
    conn: &Connection,
    row: &StudentAttendance,
    ledger: Option<LedgerWrite<'_>>,
    epsilon: f64,
) -> ApiResult<(i64, Option<i64>)> {
    let enrollment = EnrollmentRepository::find_by_id_with_conn(conn, row.enrollment_id)?
        .ok_or_else(|| ApiError::NotFound(format!("报名记录不存在: {}", row.enrollment_id)))?;

    if let Some(write) = &ledger {
        if write.record_type == LessonRecordType::Consume
            && write.hours > enrollment.remaining_hours() + epsilon
        {
            return Err(ApiError::InsufficientHours {
                enrollment_ids: vec![row.enrollment_id],
            });
        }
    }

    let attendance_id = AttendanceRepository::upsert_with_conn(conn, row)?;

    let record_id = match ledger {
        Some(write) => {
            let record = build_record(&write);
            let record_id = LessonRecordRepository::insert_with_conn(conn, &record)
                .map_err(|e| ApiError::DatabaseError(e.to_string()))?;
            EnrollmentRepository::apply_hours_delta_with_conn(
                conn,
                write.enrollment_id,
                write.hours,
                enrollment.revision,
            )?;
            Some(record_id)
        }
        None => None,
    };

    Ok((attendance_id, record_id))
}

/// 组装某班级全部在读报名的课时余量视图
///
/// # 规则
/// - scheduled 口径 = 班级待上课时总和 - 该报名已提前扣费的待上课时
///   (提前标记过扣费的课次已从"预占"变为"已用", 不能重复计)
///
/// # 返回
/// (班级待上课时总和, 每个在读报名一行)
pub(crate) fn enrollment_hours_rows(
    enrollment_repo: &EnrollmentRepository,
    schedule_repo: &ScheduleRepository,
    attendance_repo: &AttendanceRepository,
    class_plan_id: i64,
) -> ApiResult<(f64, Vec<EnrollmentHours>)> {
    let enrollments = enrollment_repo.find_active_by_class_plan(class_plan_id)?;
    let class_scheduled = schedule_repo.sum_scheduled_hours(class_plan_id)?;

    let mut rows = Vec::with_capacity(enrollments.len());
    for enrollment in enrollments {
        let consumed_scheduled =
            attendance_repo.sum_deducted_scheduled_hours(enrollment.id, class_plan_id)?;
        rows.push(EnrollmentHours {
            enrollment_id: enrollment.id,
            student_id: enrollment.student_id,
            purchased_hours: enrollment.purchased_hours,
            used_hours: enrollment.used_hours,
            scheduled_hours: class_scheduled - consumed_scheduled,
        });
    }
    Ok((class_scheduled, rows))
}

/// 排课消耗流水的备注文案
pub(crate) fn consume_notes(schedule: &Schedule) -> String {
    format!("排课消耗: {}", schedule.display_title())
}

/// 排课退还流水的备注文案
pub(crate) fn refund_notes(schedule: &Schedule) -> String {
    format!("排课退还: {}", schedule.display_title())
}
