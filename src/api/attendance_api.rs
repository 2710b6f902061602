// ==========================================
// 教培排课与课时管理引擎 - 考勤API
// ==========================================
// 职责: 考勤标记/请假/点名册查询, 以及排课完成与撤销的课时结算入口
// 红线: 一切课时变动必须经由转移函数计算, 不允许旁路直改计数器
// ==========================================

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::api::error::{ApiError, ApiResult};
use crate::api::ledger_ops;
use crate::config::ConfigManager;
use crate::domain::{
    ActionType, AttendanceStatus, Enrollment, LessonRecordType, Schedule, StudentAttendance,
};
use crate::engine::{AttendanceTransition, LedgerEffect};
use crate::repository::{
    ActionLogRepository, AttendanceRepository, EnrollmentRepository, LessonRecordRepository,
    MasterDataRepository, ScheduleRepository,
};

// ==========================================
// AttendanceApi - 考勤服务
// ==========================================
pub struct AttendanceApi {
    attendance_repo: Arc<AttendanceRepository>,
    enrollment_repo: Arc<EnrollmentRepository>,
    lesson_record_repo: Arc<LessonRecordRepository>,
    schedule_repo: Arc<ScheduleRepository>,
    master_repo: Arc<MasterDataRepository>,
    action_log_repo: Arc<ActionLogRepository>,
    config_manager: Arc<ConfigManager>,
}

impl AttendanceApi {
    pub fn new(
        attendance_repo: Arc<AttendanceRepository>,
        enrollment_repo: Arc<EnrollmentRepository>,
        lesson_record_repo: Arc<LessonRecordRepository>,
        schedule_repo: Arc<ScheduleRepository>,
        master_repo: Arc<MasterDataRepository>,
        action_log_repo: Arc<ActionLogRepository>,
        config_manager: Arc<ConfigManager>,
    ) -> Self {
        AttendanceApi {
            attendance_repo,
            enrollment_repo,
            lesson_record_repo,
            schedule_repo,
            master_repo,
            action_log_repo,
            config_manager,
        }
    }

    /// 标记单条考勤
    ///
    /// # 规则
    /// - 按 (enrollment_id, schedule_id) upsert, 重复标记覆盖旧状态
    /// - deduct_hours 缺省时按状态默认: normal 扣, leave 不扣, absent 看配置
    /// - 扣费标记 false->true 产生消耗, true->false 产生退还, 不变则无台账影响
    /// - 消耗会导致已用超出已购时拒绝 (InsufficientHours)
    #[instrument(skip(self, request), fields(enrollment_id = %request.enrollment_id, schedule_id = %request.schedule_id, operator = %operator))]
    pub fn mark(
        &self,
        request: MarkAttendanceRequest,
        operator: &str,
    ) -> ApiResult<MarkAttendanceResponse> {
        let enrollment = self
            .enrollment_repo
            .find_by_id(request.enrollment_id)?
            .ok_or_else(|| {
                ApiError::NotFound(format!("报名记录不存在: {}", request.enrollment_id))
            })?;
        let schedule = self
            .schedule_repo
            .find_by_id(request.schedule_id)?
            .ok_or_else(|| ApiError::NotFound(format!("排课不存在: {}", request.schedule_id)))?;
        if enrollment.class_plan_id != schedule.class_plan_id {
            return Err(ApiError::InvalidInput(format!(
                "学生未报名该班级: 报名{}属于班级{}, 排课属于班级{}",
                enrollment.id, enrollment.class_plan_id, schedule.class_plan_id
            )));
        }

        let absent_default = self
            .config_manager
            .get_absent_deduct_default()
            .map_err(|e| ApiError::InternalError(e.to_string()))?;
        let deduct = request
            .deduct_hours
            .unwrap_or_else(|| request.status.default_deduct(absent_default));

        self.write_mark(
            &enrollment,
            &schedule,
            request.status,
            deduct,
            None,
            None,
            request.notes,
            operator,
        )
    }

    /// 批量标记某次排课的考勤, 逐项独立处理互不阻塞
    #[instrument(skip(self, items), fields(schedule_id = %schedule_id, count = items.len(), operator = %operator))]
    pub fn batch_mark(
        &self,
        schedule_id: i64,
        items: Vec<BatchMarkItem>,
        operator: &str,
    ) -> ApiResult<BatchMarkResponse> {
        if items.is_empty() {
            return Err(ApiError::InvalidInput("考勤项列表不能为空".to_string()));
        }

        let mut success_count = 0usize;
        let mut failures: Vec<BatchMarkFailure> = Vec::new();
        for item in items {
            let enrollment_id = item.enrollment_id;
            let request = MarkAttendanceRequest {
                enrollment_id,
                schedule_id,
                status: item.status,
                deduct_hours: item.deduct_hours,
                notes: item.notes,
            };
            match self.mark(request, operator) {
                Ok(_) => success_count += 1,
                Err(e) => {
                    tracing::warn!(
                        "批量考勤单项失败: enrollment_id={}, 原因: {}",
                        enrollment_id,
                        e
                    );
                    failures.push(BatchMarkFailure {
                        enrollment_id,
                        error: e.to_string(),
                    });
                }
            }
        }

        let failed_count = failures.len();
        if let Err(e) = self.action_log_repo.log_action(
            ActionType::BatchMarkAttendance,
            operator,
            Some(serde_json::json!({
                "schedule_id": schedule_id,
                "success_count": success_count,
                "failed_count": failed_count,
            })),
        ) {
            tracing::warn!("记录操作日志失败: {}", e);
        }

        Ok(BatchMarkResponse {
            success_count,
            failed_count,
            failures,
        })
    }

    /// 学生请假
    ///
    /// # 规则
    /// - 按 (student_id, class_plan_id) 解析在读报名记录
    /// - leave_reason 必填, apply_time 记当前时间
    /// - 默认不扣课时, 管理员可显式覆盖
    #[instrument(skip(self, request), fields(student_id = %request.student_id, class_plan_id = %request.class_plan_id, operator = %operator))]
    pub fn apply_leave(
        &self,
        request: ApplyLeaveRequest,
        operator: &str,
    ) -> ApiResult<MarkAttendanceResponse> {
        let reason = request.leave_reason.trim();
        if reason.is_empty() {
            return Err(ApiError::InvalidInput("请假原因不能为空".to_string()));
        }

        let enrollment = self
            .enrollment_repo
            .find_active_by_student_and_plan(request.student_id, request.class_plan_id)?
            .ok_or_else(|| {
                ApiError::NotFound(format!(
                    "学生{}在班级{}下没有在读报名记录",
                    request.student_id, request.class_plan_id
                ))
            })?;
        let schedule = self
            .schedule_repo
            .find_by_id(request.schedule_id)?
            .ok_or_else(|| ApiError::NotFound(format!("排课不存在: {}", request.schedule_id)))?;
        if schedule.class_plan_id != request.class_plan_id {
            return Err(ApiError::InvalidInput(format!(
                "排课{}不属于班级{}",
                request.schedule_id, request.class_plan_id
            )));
        }

        let deduct = request.deduct_hours.unwrap_or(false);
        let now = chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
        self.write_mark(
            &enrollment,
            &schedule,
            AttendanceStatus::Leave,
            deduct,
            Some(reason.to_string()),
            Some(now),
            None,
            operator,
        )
    }

    /// 某次排课的点名册: 在读学生全集, 未标记的给出默认态
    pub fn list_by_schedule(&self, schedule_id: i64) -> ApiResult<Vec<AttendanceRosterItem>> {
        let schedule = self
            .schedule_repo
            .find_by_id(schedule_id)?
            .ok_or_else(|| ApiError::NotFound(format!("排课不存在: {}", schedule_id)))?;

        let enrollments = self
            .enrollment_repo
            .find_active_by_class_plan(schedule.class_plan_id)?;
        let marked: HashMap<i64, StudentAttendance> = self
            .attendance_repo
            .find_by_schedule(schedule_id)?
            .into_iter()
            .map(|r| (r.enrollment_id, r))
            .collect();
        let student_ids: Vec<i64> = enrollments.iter().map(|e| e.student_id).collect();
        let names = self.master_repo.student_names_by_ids(&student_ids)?;

        let roster = enrollments
            .into_iter()
            .map(|enrollment| match marked.get(&enrollment.id) {
                Some(row) => AttendanceRosterItem {
                    enrollment_id: enrollment.id,
                    student_id: enrollment.student_id,
                    student_name: names.get(&enrollment.student_id).cloned(),
                    status: row.status,
                    deduct_hours: row.deduct_hours,
                    marked: true,
                    leave_reason: row.leave_reason.clone(),
                    marked_at: row.marked_at.clone(),
                },
                None => AttendanceRosterItem {
                    enrollment_id: enrollment.id,
                    student_id: enrollment.student_id,
                    student_name: names.get(&enrollment.student_id).cloned(),
                    status: AttendanceStatus::Normal,
                    deduct_hours: true,
                    marked: false,
                    leave_reason: None,
                    marked_at: None,
                },
            })
            .collect();
        Ok(roster)
    }

    /// 排课完成时的课时结算: 给缺少考勤记录的在读学生补正常考勤并扣费
    ///
    /// 已有考勤记录的学生保留其原扣费标记不动。返回新建记录数。
    pub(crate) fn complete_for_schedule(
        &self,
        schedule: &Schedule,
        operator: &str,
    ) -> ApiResult<usize> {
        let enrollments = self
            .enrollment_repo
            .find_active_by_class_plan(schedule.class_plan_id)?;
        let mut created = 0usize;
        for enrollment in enrollments {
            let existing = self
                .attendance_repo
                .find_by_enrollment_and_schedule(enrollment.id, schedule.id)?;
            if existing.is_some() {
                continue;
            }
            self.write_mark(
                &enrollment,
                schedule,
                AttendanceStatus::Normal,
                true,
                None,
                None,
                None,
                operator,
            )?;
            created += 1;
        }
        Ok(created)
    }

    /// 撤销某次排课的全部课时消耗并清空其考勤记录
    ///
    /// 逐条对扣过费的记录追加退还流水(台账只追加不删), 然后删除考勤行。
    /// 返回退还条数。
    pub(crate) fn revoke_for_schedule(
        &self,
        schedule: &Schedule,
        operator: &str,
    ) -> ApiResult<usize> {
        let deducting = self.attendance_repo.find_deducting_by_schedule(schedule.id)?;
        let max_retry = self
            .config_manager
            .get_hours_max_retry()
            .map_err(|e| ApiError::InternalError(e.to_string()))?;

        let mut refunded = 0usize;
        for record in &deducting {
            let outcome = AttendanceTransition::plan_revoke(record, schedule.lesson_hours);
            if outcome.effect.is_none() {
                continue;
            }
            ledger_ops::record_and_apply(
                &self.enrollment_repo,
                &self.lesson_record_repo,
                ledger_ops::LedgerWrite {
                    enrollment_id: record.enrollment_id,
                    schedule_id: Some(schedule.id),
                    record_date: schedule.schedule_date,
                    hours: outcome.effect.signed_hours(),
                    record_type: LessonRecordType::Refund,
                    notes: Some(ledger_ops::refund_notes(schedule)),
                    operator,
                },
                max_retry,
            )?;
            refunded += 1;
        }

        self.attendance_repo.delete_by_schedule(schedule.id)?;
        Ok(refunded)
    }

    /// 考勤写入的统一路径: 转移计算 -> 单事务内复核余量并落账
    #[allow(clippy::too_many_arguments)]
    fn write_mark(
        &self,
        enrollment: &Enrollment,
        schedule: &Schedule,
        status: AttendanceStatus,
        deduct: bool,
        leave_reason: Option<String>,
        apply_time: Option<String>,
        notes: Option<String>,
        operator: &str,
    ) -> ApiResult<MarkAttendanceResponse> {
        let old = self
            .attendance_repo
            .find_by_enrollment_and_schedule(enrollment.id, schedule.id)?;
        let outcome = AttendanceTransition::plan(old.as_ref(), status, deduct, schedule.lesson_hours);

        // 请假字段只在前后都是请假时沿用, 其余转移一律清空
        let (leave_reason, apply_time) = if leave_reason.is_some() || apply_time.is_some() {
            (leave_reason, apply_time)
        } else {
            match &old {
                Some(prev)
                    if prev.status == AttendanceStatus::Leave
                        && outcome.status == AttendanceStatus::Leave =>
                {
                    (prev.leave_reason.clone(), prev.apply_time.clone())
                }
                _ => (None, None),
            }
        };

        let now = chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
        let row = StudentAttendance {
            id: old.as_ref().map(|r| r.id).unwrap_or(0),
            enrollment_id: enrollment.id,
            schedule_id: schedule.id,
            student_id: enrollment.student_id,
            class_plan_id: enrollment.class_plan_id,
            status: outcome.status,
            leave_reason,
            apply_time,
            deduct_hours: outcome.deduct_hours,
            marked_by: Some(operator.to_string()),
            marked_at: Some(now),
            notes,
        };
        let ledger_write = match outcome.effect {
            LedgerEffect::Consume(_) => Some((
                LessonRecordType::Consume,
                ledger_ops::consume_notes(schedule),
            )),
            LedgerEffect::Refund(_) => {
                Some((LessonRecordType::Refund, ledger_ops::refund_notes(schedule)))
            }
            LedgerEffect::None => None,
        };
        let ledger = ledger_write.map(|(record_type, record_notes)| ledger_ops::LedgerWrite {
            enrollment_id: enrollment.id,
            schedule_id: Some(schedule.id),
            record_date: schedule.schedule_date,
            hours: outcome.effect.signed_hours(),
            record_type,
            notes: Some(record_notes),
            operator,
        });
        let epsilon = self
            .config_manager
            .get_hours_epsilon()
            .map_err(|e| ApiError::InternalError(e.to_string()))?;
        let (attendance_id, _record_id) =
            ledger_ops::settle_mark(&self.enrollment_repo, &row, ledger, epsilon)?;

        Ok(MarkAttendanceResponse {
            attendance_id,
            enrollment_id: enrollment.id,
            schedule_id: schedule.id,
            status: outcome.status,
            deduct_hours: outcome.deduct_hours,
            hours_delta: outcome.effect.signed_hours(),
            changed: outcome.changed,
        })
    }
}

// ==========================================
// DTO 类型定义
// ==========================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkAttendanceRequest {
    pub enrollment_id: i64,
    pub schedule_id: i64,
    pub status: AttendanceStatus,
    pub deduct_hours: Option<bool>, // 缺省时按状态默认规则
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkAttendanceResponse {
    pub attendance_id: i64,
    pub enrollment_id: i64,
    pub schedule_id: i64,
    pub status: AttendanceStatus,
    pub deduct_hours: bool,
    pub hours_delta: f64, // 本次标记引起的带符号课时变动, 0 表示无台账影响
    pub changed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchMarkItem {
    pub enrollment_id: i64,
    pub status: AttendanceStatus,
    pub deduct_hours: Option<bool>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchMarkFailure {
    pub enrollment_id: i64,
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchMarkResponse {
    pub success_count: usize,
    pub failed_count: usize,
    pub failures: Vec<BatchMarkFailure>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplyLeaveRequest {
    pub student_id: i64,
    pub class_plan_id: i64,
    pub schedule_id: i64,
    pub leave_reason: String,
    pub deduct_hours: Option<bool>, // 缺省不扣, 管理员可覆盖
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttendanceRosterItem {
    pub enrollment_id: i64,
    pub student_id: i64,
    pub student_name: Option<String>,
    pub status: AttendanceStatus,
    pub deduct_hours: bool,
    pub marked: bool,
    pub leave_reason: Option<String>,
    pub marked_at: Option<String>,
}
