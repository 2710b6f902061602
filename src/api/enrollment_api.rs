// ==========================================
// 教培排课与课时管理引擎 - 课时API
// ==========================================
// 职责: 班级课时余量汇总、人工课时调整、计数器与台账对账
// 红线: available 不做截断, 负值以超排告警暴露; 对账以台账为准修计数器
// ==========================================

use std::sync::Arc;

use serde::Serialize;
use tracing::instrument;

use crate::api::error::{ApiError, ApiResult};
use crate::api::ledger_ops;
use crate::config::ConfigManager;
use crate::domain::{parse_date, ActionType, LessonRecord, LessonRecordType};
use crate::engine::{HoursLedger, StudentHoursView};
use crate::repository::{
    ActionLogRepository, AttendanceRepository, ClassPlanRepository, EnrollmentRepository,
    LessonRecordRepository, MasterDataRepository, ScheduleRepository,
};

// ==========================================
// EnrollmentApi - 课时服务
// ==========================================
pub struct EnrollmentApi {
    enrollment_repo: Arc<EnrollmentRepository>,
    lesson_record_repo: Arc<LessonRecordRepository>,
    schedule_repo: Arc<ScheduleRepository>,
    attendance_repo: Arc<AttendanceRepository>,
    class_plan_repo: Arc<ClassPlanRepository>,
    master_repo: Arc<MasterDataRepository>,
    action_log_repo: Arc<ActionLogRepository>,
    config_manager: Arc<ConfigManager>,
}

impl EnrollmentApi {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        enrollment_repo: Arc<EnrollmentRepository>,
        lesson_record_repo: Arc<LessonRecordRepository>,
        schedule_repo: Arc<ScheduleRepository>,
        attendance_repo: Arc<AttendanceRepository>,
        class_plan_repo: Arc<ClassPlanRepository>,
        master_repo: Arc<MasterDataRepository>,
        action_log_repo: Arc<ActionLogRepository>,
        config_manager: Arc<ConfigManager>,
    ) -> Self {
        EnrollmentApi {
            enrollment_repo,
            lesson_record_repo,
            schedule_repo,
            attendance_repo,
            class_plan_repo,
            master_repo,
            action_log_repo,
            config_manager,
        }
    }

    /// 班级课时余量汇总
    ///
    /// # 规则
    /// - 只统计在读报名
    /// - available = purchased - used - scheduled, 负值不截断, 置超排标记并告警
    #[instrument(skip(self), fields(class_plan_id = %class_plan_id))]
    pub fn hours_summary(&self, class_plan_id: i64) -> ApiResult<HoursSummaryResponse> {
        let plan = self
            .class_plan_repo
            .find_by_id(class_plan_id)?
            .ok_or_else(|| ApiError::NotFound(format!("班级计划ID {} 不存在", class_plan_id)))?;

        let (class_scheduled_hours, rows) = ledger_ops::enrollment_hours_rows(
            &self.enrollment_repo,
            &self.schedule_repo,
            &self.attendance_repo,
            class_plan_id,
        )?;
        let ledger = self.hours_ledger()?;

        let student_ids: Vec<i64> = rows.iter().map(|r| r.student_id).collect();
        let names = self.master_repo.student_names_by_ids(&student_ids)?;

        let students: Vec<StudentHoursView> = rows
            .iter()
            .map(|row| {
                let available = ledger.available_hours(
                    row.purchased_hours,
                    row.used_hours,
                    row.scheduled_hours,
                );
                StudentHoursView {
                    student_id: row.student_id,
                    student_name: names.get(&row.student_id).cloned(),
                    enrollment_id: row.enrollment_id,
                    purchased_hours: row.purchased_hours,
                    used_hours: row.used_hours,
                    scheduled_hours: row.scheduled_hours,
                    available_hours: available,
                }
            })
            .collect();

        let min_available_hours = ledger.min_available(&rows);
        let over_committed = students
            .iter()
            .any(|s| ledger.is_over_committed(s.available_hours));
        if over_committed {
            tracing::warn!(
                "班级{}存在超排: 最小可用课时 {:?}",
                class_plan_id,
                min_available_hours
            );
        }

        Ok(HoursSummaryResponse {
            class_plan_id,
            class_plan_name: plan.name,
            class_scheduled_hours,
            total_students: students.len(),
            min_available_hours,
            over_committed,
            students,
        })
    }

    /// 人工调整课时, 正数补扣负数返还
    ///
    /// # 规则
    /// - 调整后 used_hours 不得为负
    /// - 以 adjust 流水落账, 计数器走乐观锁重试
    #[instrument(skip(self, notes), fields(enrollment_id = %enrollment_id, hours = %hours, operator = %operator))]
    pub fn adjust_hours(
        &self,
        enrollment_id: i64,
        hours: f64,
        notes: Option<String>,
        operator: &str,
    ) -> ApiResult<AdjustHoursResponse> {
        if !hours.is_finite() || hours == 0.0 {
            return Err(ApiError::InvalidInput(format!(
                "调整课时数必须为非零数值: {}",
                hours
            )));
        }
        let enrollment = self
            .enrollment_repo
            .find_by_id(enrollment_id)?
            .ok_or_else(|| ApiError::NotFound(format!("报名记录不存在: {}", enrollment_id)))?;

        let ledger = self.hours_ledger()?;
        if enrollment.used_hours + hours < -ledger.epsilon() {
            return Err(ApiError::BusinessRuleViolation(format!(
                "调整后已用课时为负: 当前 {}, 调整 {}",
                enrollment.used_hours, hours
            )));
        }

        let max_retry = self
            .config_manager
            .get_hours_max_retry()
            .map_err(|e| ApiError::InternalError(e.to_string()))?;
        let record_id = ledger_ops::record_and_apply(
            &self.enrollment_repo,
            &self.lesson_record_repo,
            ledger_ops::LedgerWrite {
                enrollment_id,
                schedule_id: None,
                record_date: chrono::Local::now().date_naive(),
                hours,
                record_type: LessonRecordType::Adjust,
                notes,
                operator,
            },
            max_retry,
        )?;

        if let Err(e) = self.action_log_repo.log_action(
            ActionType::AdjustHours,
            operator,
            Some(serde_json::json!({
                "enrollment_id": enrollment_id,
                "hours": hours,
                "record_id": record_id,
            })),
        ) {
            tracing::warn!("记录操作日志失败: {}", e);
        }

        let after = self
            .enrollment_repo
            .find_by_id(enrollment_id)?
            .ok_or_else(|| ApiError::NotFound(format!("报名记录不存在: {}", enrollment_id)))?;
        tracing::info!(
            "人工调整课时: 报名{}, 调整{}, 调整后已用{}",
            enrollment_id,
            hours,
            after.used_hours
        );

        Ok(AdjustHoursResponse {
            enrollment_id,
            record_id,
            hours,
            used_hours: after.used_hours,
        })
    }

    /// 单报名对账: 台账净和与计数器不一致时按台账改写计数器
    #[instrument(skip(self), fields(enrollment_id = %enrollment_id))]
    pub fn reconcile(&self, enrollment_id: i64) -> ApiResult<ReconcileResponse> {
        let enrollment = self
            .enrollment_repo
            .find_by_id(enrollment_id)?
            .ok_or_else(|| ApiError::NotFound(format!("报名记录不存在: {}", enrollment_id)))?;

        let ledger_net = self.lesson_record_repo.sum_hours_by_enrollment(enrollment_id)?;
        let ledger = self.hours_ledger()?;

        match ledger.reconcile_drift(enrollment.used_hours, ledger_net) {
            None => Ok(ReconcileResponse {
                enrollment_id,
                stored_used_hours: enrollment.used_hours,
                ledger_net_hours: ledger_net,
                drift: 0.0,
                repaired: false,
            }),
            Some(drift) => {
                self.enrollment_repo
                    .overwrite_used_hours(enrollment_id, ledger_net)?;
                tracing::warn!(
                    "报名{}课时对账发现偏差{:.4}, 已按台账修复为{}",
                    enrollment_id,
                    drift,
                    ledger_net
                );
                Ok(ReconcileResponse {
                    enrollment_id,
                    stored_used_hours: enrollment.used_hours,
                    ledger_net_hours: ledger_net,
                    drift,
                    repaired: true,
                })
            }
        }
    }

    /// 对班级全部在读报名逐一对账
    #[instrument(skip(self), fields(class_plan_id = %class_plan_id))]
    pub fn reconcile_class_plan(&self, class_plan_id: i64) -> ApiResult<ReconcilePlanResponse> {
        let enrollments = self
            .enrollment_repo
            .find_active_by_class_plan(class_plan_id)?;

        let checked_count = enrollments.len();
        let mut repairs: Vec<ReconcileResponse> = Vec::new();
        for enrollment in &enrollments {
            let result = self.reconcile(enrollment.id)?;
            if result.repaired {
                repairs.push(result);
            }
        }

        if !repairs.is_empty() {
            tracing::warn!(
                "班级{}课时对账: 检查{}条, 修复{}条",
                class_plan_id,
                checked_count,
                repairs.len()
            );
        }

        Ok(ReconcilePlanResponse {
            checked_count,
            repaired_count: repairs.len(),
            repairs,
        })
    }

    /// 某报名的课时流水历史, 可选按记账日期过滤
    pub fn list_records(
        &self,
        enrollment_id: i64,
        start_date: Option<String>,
        end_date: Option<String>,
    ) -> ApiResult<Vec<LessonRecord>> {
        if self.enrollment_repo.find_by_id(enrollment_id)?.is_none() {
            return Err(ApiError::NotFound(format!(
                "报名记录不存在: {}",
                enrollment_id
            )));
        }
        let start = match start_date {
            Some(s) => Some(
                parse_date(&s)
                    .ok_or_else(|| ApiError::ValidationError(format!("日期格式无效: {}", s)))?,
            ),
            None => None,
        };
        let end = match end_date {
            Some(s) => Some(
                parse_date(&s)
                    .ok_or_else(|| ApiError::ValidationError(format!("日期格式无效: {}", s)))?,
            ),
            None => None,
        };
        Ok(self
            .lesson_record_repo
            .find_by_enrollment_and_range(enrollment_id, start, end)?)
    }

    fn hours_ledger(&self) -> ApiResult<HoursLedger> {
        let epsilon = self
            .config_manager
            .get_hours_epsilon()
            .map_err(|e| ApiError::InternalError(e.to_string()))?;
        Ok(HoursLedger::new(epsilon))
    }
}

// ==========================================
// DTO 类型定义
// ==========================================

#[derive(Debug, Clone, Serialize)]
pub struct HoursSummaryResponse {
    pub class_plan_id: i64,
    pub class_plan_name: String,
    pub class_scheduled_hours: f64,
    pub total_students: usize,
    /// 全班最紧的可用课时, 无在读报名时为 None
    pub min_available_hours: Option<f64>,
    pub over_committed: bool,
    pub students: Vec<StudentHoursView>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AdjustHoursResponse {
    pub enrollment_id: i64,
    pub record_id: i64,
    pub hours: f64,
    /// 调整后的已用课时
    pub used_hours: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReconcileResponse {
    pub enrollment_id: i64,
    pub stored_used_hours: f64,
    pub ledger_net_hours: f64,
    /// 修复前的偏差 (stored - ledger), 无偏差为 0
    pub drift: f64,
    pub repaired: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReconcilePlanResponse {
    pub checked_count: usize,
    pub repaired_count: usize,
    pub repairs: Vec<ReconcileResponse>,
}
