// ==========================================
// 教培排课与课时管理引擎 - 排课API
// ==========================================
// 职责: 批量排课预检/创建、单次排课维护、冲突校验、过期课次清扫
// 红线: 预检与创建共用同一条生成管线; 创建必须在事务内复检并发窗口
// ==========================================

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::api::attendance_api::AttendanceApi;
use crate::api::error::{
    validate_date_range, validate_lesson_hours, validate_time_slot, validate_weekdays, ApiError,
    ApiResult,
};
use crate::api::ledger_ops;
use crate::config::ConfigManager;
use crate::domain::{
    parse_date, parse_time, ActionType, ConflictKind, DatedInterval, Schedule, ScheduleStatus,
};
use crate::engine::{
    generate_batch_no, BatchConflictItem, BookedSlot, CandidateSlot, ConflictDetail,
    ConflictDetector, ConflictHit, ConflictNames, DateRange, HoursLedger, ScheduleGenerator,
    TimeSlotRule,
};
use crate::repository::{
    ActionLogRepository, AttendanceRepository, ClassPlanRepository, EnrollmentRepository,
    MasterDataRepository, ReserveBudget, ScheduleRepository,
};

/// 过期清扫写回排课行时使用的操作者标识
const SYSTEM_OPERATOR: &str = "system_scheduler";

// ==========================================
// ScheduleApi - 排课服务
// ==========================================
pub struct ScheduleApi {
    schedule_repo: Arc<ScheduleRepository>,
    class_plan_repo: Arc<ClassPlanRepository>,
    enrollment_repo: Arc<EnrollmentRepository>,
    attendance_repo: Arc<AttendanceRepository>,
    master_repo: Arc<MasterDataRepository>,
    action_log_repo: Arc<ActionLogRepository>,
    config_manager: Arc<ConfigManager>,
    attendance_api: Arc<AttendanceApi>,
    generator: ScheduleGenerator,
}

impl ScheduleApi {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        schedule_repo: Arc<ScheduleRepository>,
        class_plan_repo: Arc<ClassPlanRepository>,
        enrollment_repo: Arc<EnrollmentRepository>,
        attendance_repo: Arc<AttendanceRepository>,
        master_repo: Arc<MasterDataRepository>,
        action_log_repo: Arc<ActionLogRepository>,
        config_manager: Arc<ConfigManager>,
        attendance_api: Arc<AttendanceApi>,
    ) -> Self {
        ScheduleApi {
            schedule_repo,
            class_plan_repo,
            enrollment_repo,
            attendance_repo,
            master_repo,
            action_log_repo,
            config_manager,
            attendance_api,
            generator: ScheduleGenerator::new(),
        }
    }

    /// 批量排课预检: 展开候选并报告冲突, 不落库不占锁
    ///
    /// # 规则
    /// - 无在读学生时返回单条 no_students 冲突条目而不是报错, 便于前端一并展示
    /// - 预检不应用 max_count 截断, 展示的是规则的完整展开结果
    #[instrument(skip(self, request), fields(class_plan_id = %request.class_plan_id))]
    pub fn preview_batch(&self, request: BatchScheduleRequest) -> ApiResult<PreviewBatchResponse> {
        let (ranges, slots, _) = self.parse_request(&request)?;
        let plan = self
            .class_plan_repo
            .find_by_id(request.class_plan_id)?
            .ok_or_else(|| {
                ApiError::NotFound(format!("班级计划ID {} 不存在", request.class_plan_id))
            })?;

        let candidates = ScheduleGenerator::expand_candidates(&ranges, &slots);
        let total_count = candidates.len();
        if candidates.is_empty() {
            return Ok(PreviewBatchResponse {
                total_count: 0,
                conflict_count: 0,
                conflicts: Vec::new(),
            });
        }

        let active = self
            .enrollment_repo
            .count_active_by_class_plan(request.class_plan_id)?;
        if active == 0 {
            let mut names = ConflictNames::default();
            names.plans.insert(plan.id, plan.name.clone());
            let first = candidates[0].interval();
            let hit = ConflictHit {
                kind: ConflictKind::NoStudents,
                schedule_id: None,
                class_plan_id: request.class_plan_id,
                booked_interval: first,
            };
            let item = BatchConflictItem::build(
                &first,
                &hit,
                request.teacher_id,
                request.classroom_id,
                &names,
            );
            return Ok(PreviewBatchResponse {
                total_count,
                conflict_count: 1,
                conflicts: vec![item],
            });
        }

        let mut detector =
            self.build_detector(request.teacher_id, request.classroom_id, &candidates)?;
        let outcome = self.generator.generate(
            candidates,
            &mut detector,
            request.class_plan_id,
            request.teacher_id,
            request.classroom_id,
            None,
        );

        let mut plan_ids: Vec<i64> = outcome
            .conflicts
            .iter()
            .map(|(_, hit)| hit.class_plan_id)
            .collect();
        plan_ids.push(request.class_plan_id);
        plan_ids.sort_unstable();
        plan_ids.dedup();
        let names = self.conflict_names(&plan_ids, request.teacher_id, request.classroom_id)?;

        let conflicts: Vec<BatchConflictItem> = outcome
            .conflicts
            .iter()
            .map(|(candidate, hit)| {
                BatchConflictItem::build(
                    &candidate.interval(),
                    hit,
                    request.teacher_id,
                    request.classroom_id,
                    &names,
                )
            })
            .collect();

        Ok(PreviewBatchResponse {
            total_count,
            conflict_count: conflicts.len(),
            conflicts,
        })
    }

    /// 批量排课创建
    ///
    /// # 规则
    /// 1. 无在读学生的班级直接拒绝
    /// 2. max_count 截断先于冲突评估; hour_bounded 时上限再按最紧学生的余量收紧
    /// 3. 接受集整体做课时余量校验, 不足即整单拒绝 (hour_bounded 已收紧则天然通过)
    /// 4. 入库走事务内逐条复检, 预检与创建之间被并发占用的时段会让整单回滚
    #[instrument(skip(self, request), fields(class_plan_id = %request.class_plan_id, operator = %operator))]
    pub fn commit_batch(
        &self,
        request: BatchScheduleRequest,
        operator: &str,
    ) -> ApiResult<CommitBatchResponse> {
        let (ranges, slots, lesson_hours) = self.parse_request(&request)?;
        let plan = self
            .class_plan_repo
            .find_by_id(request.class_plan_id)?
            .ok_or_else(|| {
                ApiError::NotFound(format!("班级计划ID {} 不存在", request.class_plan_id))
            })?;

        let active = self
            .enrollment_repo
            .count_active_by_class_plan(request.class_plan_id)?;
        if active == 0 {
            return Err(ApiError::BusinessRuleViolation(format!(
                "班级【{}】没有在读学生，无法排课",
                plan.name
            )));
        }

        let candidates = ScheduleGenerator::expand_candidates(&ranges, &slots);
        let batch_no = generate_batch_no();
        if candidates.is_empty() {
            return Ok(CommitBatchResponse {
                created_count: 0,
                skipped_count: 0,
                batch_no,
                schedules: Vec::new(),
            });
        }

        let (_, hours_rows) = ledger_ops::enrollment_hours_rows(
            &self.enrollment_repo,
            &self.schedule_repo,
            &self.attendance_repo,
            request.class_plan_id,
        )?;
        let ledger = self.hours_ledger()?;

        let mut effective_cap = request.max_count;
        if request.hour_bounded {
            let min_available = ledger.min_available(&hours_rows).unwrap_or(0.0);
            let affordable = ledger.max_affordable_sessions(min_available, lesson_hours);
            effective_cap = Some(match request.max_count {
                Some(cap) => cap.min(affordable),
                None => affordable,
            });
        }

        let mut detector =
            self.build_detector(request.teacher_id, request.classroom_id, &candidates)?;
        let outcome = self.generator.generate(
            candidates,
            &mut detector,
            request.class_plan_id,
            request.teacher_id,
            request.classroom_id,
            effective_cap,
        );

        let additional = outcome.accepted.len() as f64 * lesson_hours;
        if let Err(enrollment_ids) = ledger.check_reserve(&hours_rows, additional) {
            return Err(ApiError::InsufficientHours { enrollment_ids });
        }

        let now = chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
        let rows: Vec<Schedule> = outcome
            .accepted
            .iter()
            .map(|c| Schedule {
                id: 0,
                class_plan_id: request.class_plan_id,
                teacher_id: request.teacher_id,
                classroom_id: request.classroom_id,
                schedule_date: c.schedule_date,
                start_time: c.start_time,
                end_time: c.end_time,
                lesson_hours,
                status: ScheduleStatus::Scheduled,
                batch_no: Some(batch_no.clone()),
                title: request.title.clone(),
                notes: request.notes.clone(),
                created_by: operator.to_string(),
                updated_by: None,
                created_at: now.clone(),
                updated_at: None,
            })
            .collect();
        // 余量预检跑在快照上, 提交窗口内可能被其他批次抢占, 事务内再按最新台账复核一遍
        self.schedule_repo.batch_insert_conflict_checked(
            &rows,
            Some(&ReserveBudget {
                class_plan_id: request.class_plan_id,
                additional_hours: additional,
                epsilon: ledger.epsilon(),
            }),
        )?;

        let schedules = self.schedule_repo.find_by_batch_no(&batch_no)?;
        let created_count = schedules.len();
        let skipped_count = outcome.skipped_count();

        if let Err(e) = self.action_log_repo.log_action(
            ActionType::BatchCreateSchedules,
            operator,
            Some(serde_json::json!({
                "class_plan_id": request.class_plan_id,
                "batch_no": batch_no,
                "created_count": created_count,
                "skipped_count": skipped_count,
            })),
        ) {
            tracing::warn!("记录操作日志失败: {}", e);
        }
        tracing::info!(
            "批量排课完成: 班级{}, 批次{}, 创建{}条, 跳过{}条",
            request.class_plan_id,
            batch_no,
            created_count,
            skipped_count
        );

        Ok(CommitBatchResponse {
            created_count,
            skipped_count,
            batch_no,
            schedules,
        })
    }

    /// 批量修改教师/教室/备注, 逐条改前重查冲突, 冲突项跳过并报告
    #[instrument(skip(self, request), fields(count = request.schedule_ids.len(), operator = %operator))]
    pub fn batch_update(
        &self,
        request: BatchUpdateRequest,
        operator: &str,
    ) -> ApiResult<BatchUpdateResponse> {
        if request.schedule_ids.is_empty() {
            return Err(ApiError::InvalidInput("排课ID列表不能为空".to_string()));
        }
        // 没有任何待改字段时整批视为零更新
        if request.teacher_id.is_none()
            && request.classroom_id.is_none()
            && request.notes.is_none()
        {
            return Ok(BatchUpdateResponse {
                updated_count: 0,
                failed_count: 0,
                failures: Vec::new(),
            });
        }

        let mut updated_count = 0usize;
        let mut failures: Vec<BatchUpdateFailure> = Vec::new();
        for &schedule_id in &request.schedule_ids {
            match self.update_one_for_batch(schedule_id, &request, operator) {
                Ok(()) => updated_count += 1,
                Err(e) => failures.push(BatchUpdateFailure {
                    schedule_id,
                    error: e.to_string(),
                }),
            }
        }

        let failed_count = failures.len();
        if let Err(e) = self.action_log_repo.log_action(
            ActionType::BatchUpdateSchedules,
            operator,
            Some(serde_json::json!({
                "schedule_ids": request.schedule_ids,
                "updated_count": updated_count,
                "failed_count": failed_count,
            })),
        ) {
            tracing::warn!("记录操作日志失败: {}", e);
        }

        Ok(BatchUpdateResponse {
            updated_count,
            failed_count,
            failures,
        })
    }

    /// 按批次号删除未完成的排课, 已扣课时先退还
    #[instrument(skip(self), fields(batch_no = %batch_no, operator = %operator))]
    pub fn delete_by_batch_no(
        &self,
        batch_no: &str,
        operator: &str,
    ) -> ApiResult<BatchDeleteResponse> {
        if batch_no.trim().is_empty() {
            return Err(ApiError::InvalidInput("批次号不能为空".to_string()));
        }

        let schedules = self.schedule_repo.find_by_batch_no(batch_no)?;
        for schedule in schedules.iter().filter(|s| !s.is_completed()) {
            self.attendance_api.revoke_for_schedule(schedule, operator)?;
        }
        let deleted_count = self.schedule_repo.delete_by_batch_no(batch_no)?;

        if let Err(e) = self.action_log_repo.log_action(
            ActionType::BatchDeleteSchedules,
            operator,
            Some(serde_json::json!({
                "batch_no": batch_no,
                "deleted_count": deleted_count,
            })),
        ) {
            tracing::warn!("记录操作日志失败: {}", e);
        }
        tracing::info!("按批次删除排课: 批次{}, 删除{}条", batch_no, deleted_count);

        Ok(BatchDeleteResponse { deleted_count })
    }

    /// 按ID列表删除未完成的排课, 已扣课时先退还
    #[instrument(skip(self, schedule_ids), fields(count = schedule_ids.len(), operator = %operator))]
    pub fn batch_delete(
        &self,
        schedule_ids: &[i64],
        operator: &str,
    ) -> ApiResult<BatchDeleteResponse> {
        if schedule_ids.is_empty() {
            return Err(ApiError::InvalidInput("排课ID列表不能为空".to_string()));
        }

        for &schedule_id in schedule_ids {
            if let Some(schedule) = self.schedule_repo.find_by_id(schedule_id)? {
                if !schedule.is_completed() {
                    self.attendance_api.revoke_for_schedule(&schedule, operator)?;
                }
            }
        }
        let deleted_count = self.schedule_repo.delete_by_ids(schedule_ids)?;

        if let Err(e) = self.action_log_repo.log_action(
            ActionType::BatchDeleteSchedules,
            operator,
            Some(serde_json::json!({
                "schedule_ids": schedule_ids,
                "deleted_count": deleted_count,
            })),
        ) {
            tracing::warn!("记录操作日志失败: {}", e);
        }

        Ok(BatchDeleteResponse { deleted_count })
    }

    /// 单候选冲突校验, 不落库
    ///
    /// 返回全部命中(教师+教室), 班级无在读学生时附带 no_students 条目。
    pub fn check_conflicts(&self, probe: ConflictProbe) -> ApiResult<CheckConflictsResponse> {
        let date = parse_date(&probe.schedule_date).ok_or_else(|| {
            ApiError::ValidationError(format!("日期格式无效: {}", probe.schedule_date))
        })?;
        let start = parse_time(&probe.start_time).ok_or_else(|| {
            ApiError::ValidationError(format!("时间格式无效: {}", probe.start_time))
        })?;
        let end = parse_time(&probe.end_time).ok_or_else(|| {
            ApiError::ValidationError(format!("时间格式无效: {}", probe.end_time))
        })?;
        validate_time_slot(start, end)?;

        let plan = self
            .class_plan_repo
            .find_by_id(probe.class_plan_id)?
            .ok_or_else(|| {
                ApiError::NotFound(format!("班级计划ID {} 不存在", probe.class_plan_id))
            })?;
        let interval = DatedInterval::new(date, start, end);

        let mut names = self.conflict_names(
            &[probe.class_plan_id],
            probe.teacher_id,
            probe.classroom_id,
        )?;
        names.plans.entry(plan.id).or_insert(plan.name);

        let mut conflicts: Vec<ConflictDetail> = Vec::new();
        let active = self
            .enrollment_repo
            .count_active_by_class_plan(probe.class_plan_id)?;
        if active == 0 {
            conflicts.push(ConflictDetail::no_students(
                probe.class_plan_id,
                &interval,
                &names,
            ));
        }

        let existing = self.schedule_repo.find_conflict_candidates(
            probe.teacher_id,
            probe.classroom_id,
            date,
            date,
        )?;
        let detector =
            ConflictDetector::from_slots(existing.iter().map(BookedSlot::from_schedule).collect());
        let hits = detector.check_all(
            probe.teacher_id,
            probe.classroom_id,
            &interval,
            probe.exclude_schedule_id,
        );
        if !hits.is_empty() {
            let missing: Vec<i64> = hits
                .iter()
                .map(|h| h.class_plan_id)
                .filter(|id| !names.plans.contains_key(id))
                .collect();
            if !missing.is_empty() {
                names.plans.extend(self.class_plan_repo.names_by_ids(&missing)?);
            }
            for hit in &hits {
                conflicts.push(ConflictDetail::from_hit(
                    hit,
                    probe.teacher_id,
                    probe.classroom_id,
                    &names,
                ));
            }
        }

        Ok(CheckConflictsResponse {
            has_conflict: !conflicts.is_empty(),
            conflicts,
        })
    }

    /// 修改单次排课
    ///
    /// # 规则
    /// - 时间或教师/教室变化时以新值重查冲突(排除自身)
    /// - 状态转入 completed 时结算课时; 从 completed 转出或转入 cancelled 时撤销消耗
    #[instrument(skip(self, update), fields(schedule_id = %schedule_id, operator = %operator))]
    pub fn update_schedule(
        &self,
        schedule_id: i64,
        update: ScheduleUpdate,
        operator: &str,
    ) -> ApiResult<Schedule> {
        let old = self
            .schedule_repo
            .find_by_id(schedule_id)?
            .ok_or_else(|| ApiError::NotFound(format!("排课不存在: {}", schedule_id)))?;

        let mut updated = old.clone();
        if let Some(tid) = update.teacher_id {
            updated.teacher_id = Some(tid);
        }
        if let Some(cid) = update.classroom_id {
            updated.classroom_id = Some(cid);
        }
        if let Some(ref s) = update.schedule_date {
            updated.schedule_date = parse_date(s)
                .ok_or_else(|| ApiError::ValidationError(format!("日期格式无效: {}", s)))?;
        }
        if let Some(ref s) = update.start_time {
            updated.start_time = parse_time(s)
                .ok_or_else(|| ApiError::ValidationError(format!("时间格式无效: {}", s)))?;
        }
        if let Some(ref s) = update.end_time {
            updated.end_time = parse_time(s)
                .ok_or_else(|| ApiError::ValidationError(format!("时间格式无效: {}", s)))?;
        }
        validate_time_slot(updated.start_time, updated.end_time)?;
        if let Some(h) = update.lesson_hours {
            validate_lesson_hours(h)?;
            updated.lesson_hours = h;
        }
        if let Some(title) = update.title {
            updated.title = Some(title);
        }
        if let Some(notes) = update.notes {
            updated.notes = Some(notes);
        }
        updated.status = update.status.unwrap_or(old.status);
        updated.updated_by = Some(operator.to_string());
        updated.updated_at = Some(chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string());

        let time_changed = updated.schedule_date != old.schedule_date
            || updated.start_time != old.start_time
            || updated.end_time != old.end_time;
        let resource_changed =
            updated.teacher_id != old.teacher_id || updated.classroom_id != old.classroom_id;
        if time_changed || resource_changed {
            self.ensure_no_conflict(
                updated.teacher_id,
                updated.classroom_id,
                &updated.interval(),
                Some(schedule_id),
            )?;
        }

        if updated.status == ScheduleStatus::Completed && !old.is_completed() {
            self.schedule_repo.update(&updated)?;
            let created = self
                .attendance_api
                .complete_for_schedule(&updated, operator)?;
            tracing::info!("排课{}标记完成, 补扣课时记录{}条", schedule_id, created);
        } else if old.is_completed() && updated.status != ScheduleStatus::Completed {
            let refunded = self.attendance_api.revoke_for_schedule(&old, operator)?;
            self.schedule_repo.update(&updated)?;
            tracing::info!("排课{}从已完成回退, 退还课时记录{}条", schedule_id, refunded);
        } else if updated.status == ScheduleStatus::Cancelled && !old.is_cancelled() {
            // 取消待上课次: 提前标记产生的扣费一并退掉
            let refunded = self.attendance_api.revoke_for_schedule(&old, operator)?;
            self.schedule_repo.update(&updated)?;
            if refunded > 0 {
                tracing::info!("排课{}取消, 退还课时记录{}条", schedule_id, refunded);
            }
        } else {
            self.schedule_repo.update(&updated)?;
        }

        self.schedule_repo
            .find_by_id(schedule_id)?
            .ok_or_else(|| ApiError::NotFound(format!("排课不存在: {}", schedule_id)))
    }

    /// 删除单次排课, 已完成的拒绝删除
    #[instrument(skip(self), fields(schedule_id = %schedule_id, operator = %operator))]
    pub fn delete_schedule(&self, schedule_id: i64, operator: &str) -> ApiResult<()> {
        let schedule = self
            .schedule_repo
            .find_by_id(schedule_id)?
            .ok_or_else(|| ApiError::NotFound(format!("排课不存在: {}", schedule_id)))?;
        if schedule.is_completed() {
            return Err(ApiError::BusinessRuleViolation(
                "已完成的排课不能删除".to_string(),
            ));
        }

        let refunded = self.attendance_api.revoke_for_schedule(&schedule, operator)?;
        self.schedule_repo.delete(schedule_id)?;
        if refunded > 0 {
            tracing::info!("删除排课{}, 退还课时记录{}条", schedule_id, refunded);
        }
        Ok(())
    }

    /// 查询班级的排课列表, 可选日期过滤
    pub fn list_by_class_plan(
        &self,
        class_plan_id: i64,
        start_date: Option<String>,
        end_date: Option<String>,
    ) -> ApiResult<Vec<Schedule>> {
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
        if let (Some(s), Some(e)) = (start, end) {
            validate_date_range(s, e)?;
        }
        Ok(self.schedule_repo.find_by_class_plan(class_plan_id, start, end)?)
    }

    /// 查询某批次的排课列表
    pub fn list_by_batch_no(&self, batch_no: &str) -> ApiResult<Vec<Schedule>> {
        if batch_no.trim().is_empty() {
            return Err(ApiError::InvalidInput("批次号不能为空".to_string()));
        }
        Ok(self.schedule_repo.find_by_batch_no(batch_no)?)
    }

    /// 过期课次清扫: 截止日之前仍为 scheduled 的课次补考勤并置为完成
    ///
    /// # 规则
    /// - 截止线 = as_of 前一天, 当天的课次不动
    /// - 逐条尽力而为, 单条失败不阻塞其余, 失败明细返回给调用方
    #[instrument(skip(self), fields(as_of = %as_of, operator = %operator))]
    pub fn complete_overdue(
        &self,
        as_of: &str,
        operator: &str,
    ) -> ApiResult<CompleteOverdueResponse> {
        let as_of_date = parse_date(as_of)
            .ok_or_else(|| ApiError::ValidationError(format!("日期格式无效: {}", as_of)))?;
        let cutoff = as_of_date - chrono::Duration::days(1);

        let overdue = self.schedule_repo.find_overdue(cutoff)?;
        let mut completed_count = 0usize;
        let mut records_created = 0usize;
        let mut failures: Vec<OverdueFailure> = Vec::new();
        for schedule in &overdue {
            match self.complete_one_overdue(schedule) {
                Ok(created) => {
                    completed_count += 1;
                    records_created += created;
                }
                Err(e) => {
                    tracing::warn!("过期排课{}自动完成失败: {}", schedule.id, e);
                    failures.push(OverdueFailure {
                        schedule_id: schedule.id,
                        error: e.to_string(),
                    });
                }
            }
        }

        if let Err(e) = self.action_log_repo.log_action(
            ActionType::OverdueSweep,
            operator,
            Some(serde_json::json!({
                "as_of": as_of,
                "completed_count": completed_count,
                "records_created": records_created,
                "failed_count": failures.len(),
            })),
        ) {
            tracing::warn!("记录操作日志失败: {}", e);
        }
        tracing::info!(
            "过期课次清扫完成: 截止{}, 完成{}条, 补扣记录{}条, 失败{}条",
            cutoff,
            completed_count,
            records_created,
            failures.len()
        );

        Ok(CompleteOverdueResponse {
            completed_count,
            records_created,
            failures,
        })
    }

    // ==========================================
    // 内部辅助
    // ==========================================

    /// 解析并校验批量排课请求, 返回展开用的规则与生效课时数
    fn parse_request(
        &self,
        request: &BatchScheduleRequest,
    ) -> ApiResult<(Vec<DateRange>, Vec<TimeSlotRule>, f64)> {
        if request.date_ranges.is_empty() {
            return Err(ApiError::InvalidInput("日期范围不能为空".to_string()));
        }
        if request.time_slots.is_empty() {
            return Err(ApiError::InvalidInput("时间段规则不能为空".to_string()));
        }

        let mut ranges = Vec::with_capacity(request.date_ranges.len());
        for r in &request.date_ranges {
            let start_date = parse_date(&r.start_date).ok_or_else(|| {
                ApiError::ValidationError(format!("日期格式无效: {}", r.start_date))
            })?;
            let end_date = parse_date(&r.end_date).ok_or_else(|| {
                ApiError::ValidationError(format!("日期格式无效: {}", r.end_date))
            })?;
            validate_date_range(start_date, end_date)?;
            ranges.push(DateRange {
                start_date,
                end_date,
            });
        }

        let mut slots = Vec::with_capacity(request.time_slots.len());
        for s in &request.time_slots {
            validate_weekdays(&s.weekdays)?;
            let start_time = parse_time(&s.start_time).ok_or_else(|| {
                ApiError::ValidationError(format!("时间格式无效: {}", s.start_time))
            })?;
            let end_time = parse_time(&s.end_time).ok_or_else(|| {
                ApiError::ValidationError(format!("时间格式无效: {}", s.end_time))
            })?;
            validate_time_slot(start_time, end_time)?;
            slots.push(TimeSlotRule {
                weekdays: s.weekdays.clone(),
                start_time,
                end_time,
            });
        }

        let lesson_hours = match request.lesson_hours {
            Some(h) => h,
            None => self
                .config_manager
                .get_default_lesson_hours()
                .map_err(|e| ApiError::InternalError(e.to_string()))?,
        };
        validate_lesson_hours(lesson_hours)?;

        Ok((ranges, slots, lesson_hours))
    }

    /// 以候选日期跨度内的既有排课构建冲突检测器
    fn build_detector(
        &self,
        teacher_id: Option<i64>,
        classroom_id: Option<i64>,
        candidates: &[CandidateSlot],
    ) -> ApiResult<ConflictDetector> {
        // expand_candidates 已按日期升序排好
        let min_date = candidates[0].schedule_date;
        let max_date = candidates[candidates.len() - 1].schedule_date;
        let existing = self.schedule_repo.find_conflict_candidates(
            teacher_id,
            classroom_id,
            min_date,
            max_date,
        )?;
        Ok(ConflictDetector::from_slots(
            existing.iter().map(BookedSlot::from_schedule).collect(),
        ))
    }

    fn conflict_names(
        &self,
        plan_ids: &[i64],
        teacher_id: Option<i64>,
        classroom_id: Option<i64>,
    ) -> ApiResult<ConflictNames> {
        let mut names = ConflictNames::default();
        names.plans = self.class_plan_repo.names_by_ids(plan_ids)?;
        if let Some(tid) = teacher_id {
            if let Some(name) = self.master_repo.teacher_name(tid)? {
                names.teachers.insert(tid, name);
            }
        }
        if let Some(cid) = classroom_id {
            if let Some(name) = self.master_repo.classroom_name(cid)? {
                names.classrooms.insert(cid, name);
            }
        }
        Ok(names)
    }

    /// 单时段占用校验, 命中即转成业务错误
    fn ensure_no_conflict(
        &self,
        teacher_id: Option<i64>,
        classroom_id: Option<i64>,
        interval: &DatedInterval,
        exclude_schedule_id: Option<i64>,
    ) -> ApiResult<()> {
        if teacher_id.is_none() && classroom_id.is_none() {
            return Ok(());
        }
        let existing = self.schedule_repo.find_conflict_candidates(
            teacher_id,
            classroom_id,
            interval.date,
            interval.date,
        )?;
        let detector =
            ConflictDetector::from_slots(existing.iter().map(BookedSlot::from_schedule).collect());
        if let Some(hit) = detector.check_first(teacher_id, classroom_id, interval, exclude_schedule_id)
        {
            let names = self.conflict_names(&[hit.class_plan_id], teacher_id, classroom_id)?;
            let detail = ConflictDetail::from_hit(&hit, teacher_id, classroom_id, &names);
            return Err(ApiError::BusinessRuleViolation(format!(
                "检测到排课冲突: {}",
                detail.message
            )));
        }
        Ok(())
    }

    fn update_one_for_batch(
        &self,
        schedule_id: i64,
        request: &BatchUpdateRequest,
        operator: &str,
    ) -> ApiResult<()> {
        let schedule = self
            .schedule_repo
            .find_by_id(schedule_id)?
            .ok_or_else(|| ApiError::NotFound(format!("排课不存在: {}", schedule_id)))?;

        // 改了教师或教室才需要重查冲突
        if request.teacher_id.is_some() || request.classroom_id.is_some() {
            let teacher_id = request.teacher_id.or(schedule.teacher_id);
            let classroom_id = request.classroom_id.or(schedule.classroom_id);
            self.ensure_no_conflict(
                teacher_id,
                classroom_id,
                &schedule.interval(),
                Some(schedule_id),
            )?;
        }

        self.schedule_repo.update_fields(
            schedule_id,
            request.teacher_id,
            request.classroom_id,
            request.notes.as_deref(),
            operator,
        )?;
        Ok(())
    }

    fn complete_one_overdue(&self, schedule: &Schedule) -> ApiResult<usize> {
        let created = self
            .attendance_api
            .complete_for_schedule(schedule, SYSTEM_OPERATOR)?;
        self.schedule_repo
            .update_status(schedule.id, ScheduleStatus::Completed, SYSTEM_OPERATOR)?;
        Ok(created)
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

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DateRangeInput {
    pub start_date: String,
    pub end_date: String,
}

/// 周几编码: 0=周一 ... 6=周日
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeSlotInput {
    pub weekdays: Vec<u8>,
    pub start_time: String,
    pub end_time: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchScheduleRequest {
    pub class_plan_id: i64,
    pub teacher_id: Option<i64>,
    pub classroom_id: Option<i64>,
    pub date_ranges: Vec<DateRangeInput>,
    pub time_slots: Vec<TimeSlotInput>,
    pub lesson_hours: Option<f64>, // 缺省走配置 schedule.default_lesson_hours
    pub max_count: Option<usize>,
    pub title: Option<String>,
    pub notes: Option<String>,
    /// 按最紧学生的课时余量收紧生成数量, 排不下时跳过而不是报错
    #[serde(default)]
    pub hour_bounded: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct PreviewBatchResponse {
    pub total_count: usize,
    pub conflict_count: usize,
    pub conflicts: Vec<BatchConflictItem>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CommitBatchResponse {
    pub created_count: usize,
    pub skipped_count: usize,
    pub batch_no: String,
    pub schedules: Vec<Schedule>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchUpdateRequest {
    pub schedule_ids: Vec<i64>,
    pub teacher_id: Option<i64>,
    pub classroom_id: Option<i64>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchUpdateFailure {
    pub schedule_id: i64,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchUpdateResponse {
    pub updated_count: usize,
    pub failed_count: usize,
    pub failures: Vec<BatchUpdateFailure>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchDeleteResponse {
    pub deleted_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictProbe {
    pub class_plan_id: i64,
    pub teacher_id: Option<i64>,
    pub classroom_id: Option<i64>,
    pub schedule_date: String,
    pub start_time: String,
    pub end_time: String,
    /// 编辑场景下排除自身
    pub exclude_schedule_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckConflictsResponse {
    pub has_conflict: bool,
    pub conflicts: Vec<ConflictDetail>,
}

/// 单次排课的可改字段, None 表示不动
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScheduleUpdate {
    pub teacher_id: Option<i64>,
    pub classroom_id: Option<i64>,
    pub schedule_date: Option<String>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub lesson_hours: Option<f64>,
    pub status: Option<ScheduleStatus>,
    pub title: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OverdueFailure {
    pub schedule_id: i64,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CompleteOverdueResponse {
    pub completed_count: usize,
    pub records_created: usize,
    pub failures: Vec<OverdueFailure>,
}
