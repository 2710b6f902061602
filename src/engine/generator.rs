// ==========================================
// 排课生成引擎
// ==========================================
// 职责: 把 (日期区间 x 周几/时段规则) 展开成具体候选课次,
//       逐条过冲突检测, 产出接受/跳过两个集合
// 红线: 纯内存计算, 不落库; 入库由 api 层负责
// 红线: 候选按 (日期, 开始时间) 升序处理, 保证结果可复现
// ==========================================

use std::collections::HashSet;

use chrono::{Datelike, Duration, NaiveDate, NaiveTime};
use uuid::Uuid;

use crate::domain::interval::DatedInterval;
use crate::engine::conflict::{BookedSlot, ConflictDetector, ConflictHit};

// ==========================================
// 生成请求的规则部分
// ==========================================

#[derive(Debug, Clone)]
pub struct DateRange {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

/// 周几编码: 0=周一 ... 6=周日
#[derive(Debug, Clone)]
pub struct TimeSlotRule {
    pub weekdays: Vec<u8>,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
}

/// 展开后的一条候选课次
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CandidateSlot {
    pub schedule_date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
}

impl CandidateSlot {
    pub fn interval(&self) -> DatedInterval {
        DatedInterval::new(self.schedule_date, self.start_time, self.end_time)
    }
}

// ==========================================
// 生成结果
// ==========================================

#[derive(Debug, Clone)]
pub struct GenerationOutcome {
    pub accepted: Vec<CandidateSlot>,
    pub conflicts: Vec<(CandidateSlot, ConflictHit)>,
    /// 因 max_count 截断而未评估的候选数
    pub skipped_by_cap: usize,
    pub total_candidates: usize,
}

impl GenerationOutcome {
    pub fn skipped_count(&self) -> usize {
        self.conflicts.len() + self.skipped_by_cap
    }
}

// ==========================================
// ScheduleGenerator - 排课生成器
// ==========================================
pub struct ScheduleGenerator;

impl ScheduleGenerator {
    pub fn new() -> Self {
        Self
    }

    /// 展开候选课次
    ///
    /// # 规则
    /// 1. 对每个日期区间逐日推进, 周几命中任一规则即产出候选
    /// 2. 跨区间/跨规则的重复候选按 (日期, 开始, 结束) 精确去重
    /// 3. 结果按 (日期, 开始时间) 升序排序
    pub fn expand_candidates(
        date_ranges: &[DateRange],
        time_slots: &[TimeSlotRule],
    ) -> Vec<CandidateSlot> {
        let mut seen: HashSet<(NaiveDate, NaiveTime, NaiveTime)> = HashSet::new();
        let mut candidates = Vec::new();

        for range in date_ranges {
            let mut current = range.start_date;
            while current <= range.end_date {
                let weekday = current.weekday().num_days_from_monday() as u8;
                for slot in time_slots {
                    if !slot.weekdays.contains(&weekday) {
                        continue;
                    }
                    let key = (current, slot.start_time, slot.end_time);
                    if seen.insert(key) {
                        candidates.push(CandidateSlot {
                            schedule_date: current,
                            start_time: slot.start_time,
                            end_time: slot.end_time,
                        });
                    }
                }
                current += Duration::days(1);
            }
        }

        candidates.sort_by_key(|c| (c.schedule_date, c.start_time));
        candidates
    }

    /// 对已展开的候选逐条做冲突判定与数量截断
    ///
    /// # 规则
    /// 1. 达到 max_count 后剩余候选不再评估冲突, 计入 skipped_by_cap
    /// 2. 冲突候选记录命中详情, 不进入接受集
    /// 3. 接受的候选立即写回检测器, 批次内自撞同样会被拦下
    pub fn generate(
        &self,
        candidates: Vec<CandidateSlot>,
        detector: &mut ConflictDetector,
        class_plan_id: i64,
        teacher_id: Option<i64>,
        classroom_id: Option<i64>,
        max_count: Option<usize>,
    ) -> GenerationOutcome {
        let total_candidates = candidates.len();
        let mut accepted = Vec::new();
        let mut conflicts = Vec::new();
        let mut skipped_by_cap = 0usize;

        for candidate in candidates {
            if let Some(cap) = max_count {
                if accepted.len() >= cap {
                    skipped_by_cap += 1;
                    continue;
                }
            }

            let interval = candidate.interval();
            if let Some(hit) = detector.check_first(teacher_id, classroom_id, &interval, None) {
                conflicts.push((candidate, hit));
                continue;
            }

            detector.insert(BookedSlot {
                schedule_id: None,
                class_plan_id,
                teacher_id,
                classroom_id,
                interval,
            });
            accepted.push(candidate);
        }

        GenerationOutcome {
            accepted,
            conflicts,
            skipped_by_cap,
            total_candidates,
        }
    }
}

impl Default for ScheduleGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// 生成批次号, 形如 BATCH-9F2C41D08A7B
pub fn generate_batch_no() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("BATCH-{}", hex[..12].to_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveTime};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn time(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    // 测试: 2024-06-03..06-14 周一/周三 09:00-10:30 展开为 4 个候选
    #[test]
    fn test_expand_mon_wed_two_weeks() {
        let candidates = ScheduleGenerator::expand_candidates(
            &[DateRange {
                start_date: date(2024, 6, 3),
                end_date: date(2024, 6, 14),
            }],
            &[TimeSlotRule {
                weekdays: vec![0, 2],
                start_time: time(9, 0),
                end_time: time(10, 30),
            }],
        );

        let dates: Vec<NaiveDate> = candidates.iter().map(|c| c.schedule_date).collect();
        assert_eq!(
            dates,
            vec![
                date(2024, 6, 3),
                date(2024, 6, 5),
                date(2024, 6, 10),
                date(2024, 6, 12),
            ]
        );
    }

    // 测试: 重叠区间与重复规则去重
    #[test]
    fn test_expand_deduplicates_overlapping_ranges() {
        let slot = TimeSlotRule {
            weekdays: vec![0],
            start_time: time(9, 0),
            end_time: time(10, 0),
        };
        let candidates = ScheduleGenerator::expand_candidates(
            &[
                DateRange {
                    start_date: date(2024, 6, 3),
                    end_date: date(2024, 6, 10),
                },
                DateRange {
                    start_date: date(2024, 6, 10),
                    end_date: date(2024, 6, 17),
                },
            ],
            &[slot.clone(), slot],
        );

        // 6/3, 6/10, 6/17 各一条
        assert_eq!(candidates.len(), 3);
    }

    // 测试: 多个时段按 (日期, 开始时间) 排序
    #[test]
    fn test_expand_sorted_by_date_then_start() {
        let candidates = ScheduleGenerator::expand_candidates(
            &[DateRange {
                start_date: date(2024, 6, 3),
                end_date: date(2024, 6, 4),
            }],
            &[
                TimeSlotRule {
                    weekdays: vec![0, 1],
                    start_time: time(14, 0),
                    end_time: time(15, 0),
                },
                TimeSlotRule {
                    weekdays: vec![0, 1],
                    start_time: time(9, 0),
                    end_time: time(10, 0),
                },
            ],
        );

        assert_eq!(candidates.len(), 4);
        assert_eq!(candidates[0].schedule_date, date(2024, 6, 3));
        assert_eq!(candidates[0].start_time, time(9, 0));
        assert_eq!(candidates[1].start_time, time(14, 0));
        assert_eq!(candidates[2].schedule_date, date(2024, 6, 4));
        assert_eq!(candidates[2].start_time, time(9, 0));
    }

    // 测试: 教师已被占用的候选被标记冲突, 总数不变
    #[test]
    fn test_generate_reports_conflicts() {
        let candidates = ScheduleGenerator::expand_candidates(
            &[DateRange {
                start_date: date(2024, 6, 3),
                end_date: date(2024, 6, 14),
            }],
            &[TimeSlotRule {
                weekdays: vec![0, 2],
                start_time: time(9, 0),
                end_time: time(10, 30),
            }],
        );
        assert_eq!(candidates.len(), 4);

        // 教师 7 在 6/5 (周三) 09:00-10:00 已有别的班排课
        let mut detector = ConflictDetector::from_slots(vec![BookedSlot {
            schedule_id: Some(99),
            class_plan_id: 20,
            teacher_id: Some(7),
            classroom_id: None,
            interval: DatedInterval::new(date(2024, 6, 5), time(9, 0), time(10, 0)),
        }]);

        let outcome = ScheduleGenerator::new().generate(
            candidates,
            &mut detector,
            10,
            Some(7),
            None,
            None,
        );

        assert_eq!(outcome.total_candidates, 4);
        assert_eq!(outcome.accepted.len(), 3);
        assert_eq!(outcome.conflicts.len(), 1);
        assert_eq!(outcome.conflicts[0].0.schedule_date, date(2024, 6, 5));
        assert_eq!(outcome.conflicts[0].1.schedule_id, Some(99));
    }

    // 测试: 批次内两条规则自撞, 后处理的一条被拦下
    #[test]
    fn test_generate_intra_batch_self_conflict() {
        let candidates = ScheduleGenerator::expand_candidates(
            &[DateRange {
                start_date: date(2024, 6, 3),
                end_date: date(2024, 6, 3),
            }],
            &[
                TimeSlotRule {
                    weekdays: vec![0],
                    start_time: time(9, 0),
                    end_time: time(10, 30),
                },
                TimeSlotRule {
                    weekdays: vec![0],
                    start_time: time(10, 0),
                    end_time: time(11, 0),
                },
            ],
        );
        assert_eq!(candidates.len(), 2);

        let mut detector = ConflictDetector::new();
        let outcome = ScheduleGenerator::new().generate(
            candidates,
            &mut detector,
            10,
            Some(7),
            Some(3),
            None,
        );

        assert_eq!(outcome.accepted.len(), 1);
        assert_eq!(outcome.accepted[0].start_time, time(9, 0));
        assert_eq!(outcome.conflicts.len(), 1);
        // 批次内冲突的命中方尚未入库
        assert_eq!(outcome.conflicts[0].1.schedule_id, None);
    }

    // 测试: max_count 截断计入 skipped_by_cap, 与冲突跳过分开统计
    #[test]
    fn test_generate_cap_distinguished_from_conflict() {
        let candidates = ScheduleGenerator::expand_candidates(
            &[DateRange {
                start_date: date(2024, 6, 3),
                end_date: date(2024, 6, 28),
            }],
            &[TimeSlotRule {
                weekdays: vec![0],
                start_time: time(9, 0),
                end_time: time(10, 0),
            }],
        );
        // 6/3, 6/10, 6/17, 6/24
        assert_eq!(candidates.len(), 4);

        // 6/10 已被同教师占用
        let mut detector = ConflictDetector::from_slots(vec![BookedSlot {
            schedule_id: Some(50),
            class_plan_id: 20,
            teacher_id: Some(7),
            classroom_id: None,
            interval: DatedInterval::new(date(2024, 6, 10), time(9, 30), time(10, 30)),
        }]);

        let outcome = ScheduleGenerator::new().generate(
            candidates,
            &mut detector,
            10,
            Some(7),
            None,
            Some(2),
        );

        // 6/3 接受, 6/10 冲突, 6/17 接受(达到2), 6/24 截断
        assert_eq!(outcome.accepted.len(), 2);
        assert_eq!(outcome.conflicts.len(), 1);
        assert_eq!(outcome.skipped_by_cap, 1);
        assert_eq!(outcome.skipped_count(), 2);
    }

    // 测试: 批次号格式
    #[test]
    fn test_batch_no_format() {
        let batch_no = generate_batch_no();
        assert!(batch_no.starts_with("BATCH-"));
        assert_eq!(batch_no.len(), 18);
        assert!(batch_no[6..]
            .chars()
            .all(|c| c.is_ascii_digit() || c.is_ascii_uppercase()));

        // 两次生成不相同
        assert_ne!(batch_no, generate_batch_no());
    }
}
