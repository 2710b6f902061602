// ==========================================
// 冲突检测引擎
// ==========================================
// 职责: 候选时段与既有排课的教师/教室占用冲突判定
// 红线: 纯内存判定, 不访问数据库; 候选集由调用方提供
// 红线: 已取消的排课不参与冲突, 由调用方在取数时过滤
// ==========================================

use std::collections::HashMap;

use chrono::NaiveDate;
use serde::Serialize;

use crate::domain::interval::{format_date, format_time, DatedInterval};
use crate::domain::schedule::Schedule;
use crate::domain::types::ConflictKind;

// ==========================================
// BookedSlot - 已占用时段
// ==========================================
// schedule_id 为 None 表示本批次内已接受、尚未入库的候选
#[derive(Debug, Clone)]
pub struct BookedSlot {
    pub schedule_id: Option<i64>,
    pub class_plan_id: i64,
    pub teacher_id: Option<i64>,
    pub classroom_id: Option<i64>,
    pub interval: DatedInterval,
}

impl BookedSlot {
    pub fn from_schedule(schedule: &Schedule) -> Self {
        Self {
            schedule_id: Some(schedule.id),
            class_plan_id: schedule.class_plan_id,
            teacher_id: schedule.teacher_id,
            classroom_id: schedule.classroom_id,
            interval: schedule.interval(),
        }
    }
}

/// 一次命中: 候选时段与哪条占用、以何种方式相撞
#[derive(Debug, Clone)]
pub struct ConflictHit {
    pub kind: ConflictKind,
    pub schedule_id: Option<i64>,
    pub class_plan_id: i64,
    pub booked_interval: DatedInterval,
}

// ==========================================
// ConflictDetector - 冲突检测器
// ==========================================
// 按 (teacher_id, date) / (classroom_id, date) 建桶索引,
// 桶内线性比较, 避免对全量排课做 O(n^2) 扫描
pub struct ConflictDetector {
    slots: Vec<BookedSlot>,
    teacher_index: HashMap<(i64, NaiveDate), Vec<usize>>,
    classroom_index: HashMap<(i64, NaiveDate), Vec<usize>>,
}

impl ConflictDetector {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            teacher_index: HashMap::new(),
            classroom_index: HashMap::new(),
        }
    }

    pub fn from_slots(slots: Vec<BookedSlot>) -> Self {
        let mut detector = Self::new();
        for slot in slots {
            detector.insert(slot);
        }
        detector
    }

    /// 加入一条占用 (既有排课或本批次内已接受的候选)
    pub fn insert(&mut self, slot: BookedSlot) {
        let idx = self.slots.len();
        if let Some(teacher_id) = slot.teacher_id {
            self.teacher_index
                .entry((teacher_id, slot.interval.date))
                .or_default()
                .push(idx);
        }
        if let Some(classroom_id) = slot.classroom_id {
            self.classroom_index
                .entry((classroom_id, slot.interval.date))
                .or_default()
                .push(idx);
        }
        self.slots.push(slot);
    }

    fn scan_bucket(
        &self,
        index: &HashMap<(i64, NaiveDate), Vec<usize>>,
        key: (i64, NaiveDate),
        kind: ConflictKind,
        interval: &DatedInterval,
        exclude_schedule_id: Option<i64>,
        hits: &mut Vec<ConflictHit>,
        first_only: bool,
    ) {
        let Some(bucket) = index.get(&key) else {
            return;
        };
        for &idx in bucket {
            let slot = &self.slots[idx];
            if exclude_schedule_id.is_some() && slot.schedule_id == exclude_schedule_id {
                continue;
            }
            if interval.overlaps(&slot.interval) {
                hits.push(ConflictHit {
                    kind,
                    schedule_id: slot.schedule_id,
                    class_plan_id: slot.class_plan_id,
                    booked_interval: slot.interval,
                });
                if first_only {
                    return;
                }
            }
        }
    }

    /// 找第一个冲突, 教师冲突优先于教室冲突
    ///
    /// # 参数
    /// - exclude_schedule_id: 编辑场景下排除自身
    pub fn check_first(
        &self,
        teacher_id: Option<i64>,
        classroom_id: Option<i64>,
        interval: &DatedInterval,
        exclude_schedule_id: Option<i64>,
    ) -> Option<ConflictHit> {
        let mut hits = Vec::new();
        if let Some(tid) = teacher_id {
            self.scan_bucket(
                &self.teacher_index,
                (tid, interval.date),
                ConflictKind::Teacher,
                interval,
                exclude_schedule_id,
                &mut hits,
                true,
            );
            if let Some(hit) = hits.pop() {
                return Some(hit);
            }
        }
        if let Some(cid) = classroom_id {
            self.scan_bucket(
                &self.classroom_index,
                (cid, interval.date),
                ConflictKind::Classroom,
                interval,
                exclude_schedule_id,
                &mut hits,
                true,
            );
            if let Some(hit) = hits.pop() {
                return Some(hit);
            }
        }
        None
    }

    /// 找全部冲突 (单候选校验接口用), 先教师后教室, 同一排课同一类型不重复
    pub fn check_all(
        &self,
        teacher_id: Option<i64>,
        classroom_id: Option<i64>,
        interval: &DatedInterval,
        exclude_schedule_id: Option<i64>,
    ) -> Vec<ConflictHit> {
        let mut hits = Vec::new();
        if let Some(tid) = teacher_id {
            self.scan_bucket(
                &self.teacher_index,
                (tid, interval.date),
                ConflictKind::Teacher,
                interval,
                exclude_schedule_id,
                &mut hits,
                false,
            );
        }
        if let Some(cid) = classroom_id {
            self.scan_bucket(
                &self.classroom_index,
                (cid, interval.date),
                ConflictKind::Classroom,
                interval,
                exclude_schedule_id,
                &mut hits,
                false,
            );
        }
        hits
    }
}

impl Default for ConflictDetector {
    fn default() -> Self {
        Self::new()
    }
}

// ==========================================
// 冲突展示信息
// ==========================================

/// 展示用名称表, 查不到时回退为 "教师#id" 之类的占位
#[derive(Debug, Clone, Default)]
pub struct ConflictNames {
    pub teachers: HashMap<i64, String>,
    pub classrooms: HashMap<i64, String>,
    pub plans: HashMap<i64, String>,
}

impl ConflictNames {
    pub fn teacher_display(&self, id: i64) -> String {
        self.teachers
            .get(&id)
            .cloned()
            .unwrap_or_else(|| format!("教师#{}", id))
    }

    pub fn classroom_display(&self, id: i64) -> String {
        self.classrooms
            .get(&id)
            .cloned()
            .unwrap_or_else(|| format!("教室#{}", id))
    }

    pub fn plan_display(&self, id: i64) -> String {
        self.plans
            .get(&id)
            .cloned()
            .unwrap_or_else(|| "未知班级".to_string())
    }
}

/// 批量预检/创建响应里的冲突条目, 时段取候选自身
#[derive(Debug, Clone, Serialize)]
pub struct BatchConflictItem {
    pub schedule_date: String,
    pub start_time: String,
    pub end_time: String,
    pub conflict_type: ConflictKind,
    pub conflict_with: String,
}

impl BatchConflictItem {
    pub fn build(
        candidate: &DatedInterval,
        hit: &ConflictHit,
        teacher_id: Option<i64>,
        classroom_id: Option<i64>,
        names: &ConflictNames,
    ) -> Self {
        let plan_name = names.plan_display(hit.class_plan_id);
        let conflict_with = match hit.kind {
            ConflictKind::Teacher => format!(
                "教师【{}】已有排课：{}",
                names.teacher_display(teacher_id.unwrap_or_default()),
                plan_name
            ),
            ConflictKind::Classroom => format!(
                "教室【{}】已被占用：{}",
                names.classroom_display(classroom_id.unwrap_or_default()),
                plan_name
            ),
            ConflictKind::NoStudents => format!("班级【{}】没有在读学生，无法排课", plan_name),
        };
        Self {
            schedule_date: format_date(candidate.date),
            start_time: format_time(candidate.start),
            end_time: format_time(candidate.end),
            conflict_type: hit.kind,
            conflict_with,
        }
    }
}

/// 单候选校验接口的冲突条目, 时段取冲突方排课自身
#[derive(Debug, Clone, Serialize)]
pub struct ConflictDetail {
    #[serde(rename = "type")]
    pub conflict_type: ConflictKind,
    pub schedule_id: i64,
    pub class_plan_name: String,
    pub schedule_date: String,
    pub start_time: String,
    pub end_time: String,
    pub message: String,
}

impl ConflictDetail {
    pub fn from_hit(
        hit: &ConflictHit,
        teacher_id: Option<i64>,
        classroom_id: Option<i64>,
        names: &ConflictNames,
    ) -> Self {
        let plan_name = names.plan_display(hit.class_plan_id);
        let message = match hit.kind {
            ConflictKind::Teacher => format!(
                "教师【{}】在该时段已有排课：{}",
                names.teacher_display(teacher_id.unwrap_or_default()),
                plan_name
            ),
            ConflictKind::Classroom => format!(
                "教室【{}】在该时段已被占用：{}",
                names.classroom_display(classroom_id.unwrap_or_default()),
                plan_name
            ),
            ConflictKind::NoStudents => format!("班级【{}】没有在读学生，无法排课", plan_name),
        };
        Self {
            conflict_type: hit.kind,
            schedule_id: hit.schedule_id.unwrap_or(0),
            class_plan_name: plan_name,
            schedule_date: format_date(hit.booked_interval.date),
            start_time: format_time(hit.booked_interval.start),
            end_time: format_time(hit.booked_interval.end),
            message,
        }
    }

    /// 班级无在读学生的校验条目, 时段取候选自身
    pub fn no_students(class_plan_id: i64, candidate: &DatedInterval, names: &ConflictNames) -> Self {
        let plan_name = names
            .plans
            .get(&class_plan_id)
            .cloned()
            .unwrap_or_else(|| format!("班级#{}", class_plan_id));
        Self {
            conflict_type: ConflictKind::NoStudents,
            schedule_id: 0,
            class_plan_name: plan_name.clone(),
            schedule_date: format_date(candidate.date),
            start_time: format_time(candidate.start),
            end_time: format_time(candidate.end),
            message: format!("班级【{}】没有在读学生，无法排课", plan_name),
        }
    }
}
