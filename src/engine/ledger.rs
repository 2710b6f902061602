// ==========================================
// 课时台账引擎
// ==========================================
// 职责: 已购/已用/已排/可用课时的派生计算与预占校验
// 红线: 不落库; enrollment.used_hours 的唯一真值来源是台账净和
// 红线: 可用课时为负不截断, 以超排告警的形式暴露
// ==========================================

use serde::Serialize;

/// 浮点课时比较的默认容差
pub const DEFAULT_EPSILON: f64 = 1e-6;

// ==========================================
// 输入/输出结构
// ==========================================

/// 单个报名的课时快照, 由 api 层从仓储组装
#[derive(Debug, Clone)]
pub struct EnrollmentHours {
    pub enrollment_id: i64,
    pub student_id: i64,
    pub purchased_hours: f64,
    pub used_hours: f64,
    pub scheduled_hours: f64,
}

/// 课时汇总里的单个学生视图
#[derive(Debug, Clone, Serialize)]
pub struct StudentHoursView {
    pub student_id: i64,
    pub student_name: Option<String>,
    pub enrollment_id: i64,
    pub purchased_hours: f64,
    pub used_hours: f64,
    pub scheduled_hours: f64,
    pub available_hours: f64,
}

// ==========================================
// HoursLedger - 课时台账引擎
// ==========================================
pub struct HoursLedger {
    epsilon: f64,
}

impl HoursLedger {
    pub fn new(epsilon: f64) -> Self {
        Self { epsilon }
    }

    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    /// 可用课时 = 已购 - 已用 - 已排, 不做下限截断
    pub fn available_hours(&self, purchased: f64, used: f64, scheduled: f64) -> f64 {
        purchased - used - scheduled
    }

    /// 可用课时是否已经为负 (超排)
    pub fn is_over_committed(&self, available: f64) -> bool {
        available < -self.epsilon
    }

    /// 给定可用课时, 能否再预占 hours
    ///
    /// 边界含容差: 可用恰好等于所需时允许
    pub fn can_reserve(&self, available: f64, hours: f64) -> bool {
        hours <= available + self.epsilon
    }

    /// 校验一批报名能否共同承担 additional 课时
    ///
    /// # 返回
    /// - `Ok(())`: 全部可承担
    /// - `Err(ids)`: 承担不了的报名 id 列表
    pub fn check_reserve(
        &self,
        rows: &[EnrollmentHours],
        additional: f64,
    ) -> Result<(), Vec<i64>> {
        let failed: Vec<i64> = rows
            .iter()
            .filter(|row| {
                let available = self.available_hours(
                    row.purchased_hours,
                    row.used_hours,
                    row.scheduled_hours,
                );
                !self.can_reserve(available, additional)
            })
            .map(|row| row.enrollment_id)
            .collect();

        if failed.is_empty() {
            Ok(())
        } else {
            Err(failed)
        }
    }

    /// 全体报名中最小的可用课时
    pub fn min_available(&self, rows: &[EnrollmentHours]) -> Option<f64> {
        rows.iter()
            .map(|row| {
                self.available_hours(row.purchased_hours, row.used_hours, row.scheduled_hours)
            })
            .fold(None, |acc, v| match acc {
                None => Some(v),
                Some(m) => Some(if v < m { v } else { m }),
            })
    }

    /// 课时受限场景下最多还能排几节课
    ///
    /// floor((min_available + eps) / lesson_hours), 负可用按 0 计
    pub fn max_affordable_sessions(&self, min_available: f64, lesson_hours: f64) -> usize {
        if lesson_hours <= 0.0 || min_available <= 0.0 {
            return 0;
        }
        ((min_available + self.epsilon) / lesson_hours).floor() as usize
    }

    /// 对账: used_hours 与台账净和的偏差
    ///
    /// # 返回
    /// - `None`: 一致
    /// - `Some(drift)`: 偏差值 (stored - ledger)
    pub fn reconcile_drift(&self, stored_used: f64, ledger_net: f64) -> Option<f64> {
        let drift = stored_used - ledger_net;
        if drift.abs() > self.epsilon {
            Some(drift)
        } else {
            None
        }
    }
}

impl Default for HoursLedger {
    fn default() -> Self {
        Self::new(DEFAULT_EPSILON)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(enrollment_id: i64, purchased: f64, used: f64, scheduled: f64) -> EnrollmentHours {
        EnrollmentHours {
            enrollment_id,
            student_id: enrollment_id * 100,
            purchased_hours: purchased,
            used_hours: used,
            scheduled_hours: scheduled,
        }
    }

    // 测试: 已购20已用5, 恰好 15 课时可预占, 再多 1.5 则不行
    #[test]
    fn test_reserve_boundary_exact() {
        let ledger = HoursLedger::default();
        let rows = vec![row(1, 20.0, 5.0, 0.0)];

        // 10 节 x 1.5h = 15h, 恰好用满
        assert!(ledger.check_reserve(&rows, 15.0).is_ok());
        // 第 11 节超出
        let failed = ledger.check_reserve(&rows, 16.5).unwrap_err();
        assert_eq!(failed, vec![1]);
    }

    // 测试: 浮点累加误差不会挡住恰好用满的边界
    #[test]
    fn test_reserve_boundary_tolerates_float_noise() {
        let ledger = HoursLedger::default();
        // 0.1 x 3 = 0.30000000000000004
        let noisy = 0.1 + 0.1 + 0.1;
        let rows = vec![row(1, noisy, 0.0, 0.0)];
        assert!(ledger.check_reserve(&rows, 0.3).is_ok());
    }

    // 测试: 多个报名时返回全部承担不了的 id
    #[test]
    fn test_check_reserve_reports_all_failing() {
        let ledger = HoursLedger::default();
        let rows = vec![
            row(1, 20.0, 0.0, 0.0),
            row(2, 5.0, 2.0, 0.0),
            row(3, 4.0, 0.0, 1.0),
        ];
        let failed = ledger.check_reserve(&rows, 4.0).unwrap_err();
        assert_eq!(failed, vec![2, 3]);
    }

    // 测试: 最小可用课时与可负值
    #[test]
    fn test_min_available_no_clamp() {
        let ledger = HoursLedger::default();
        let rows = vec![row(1, 10.0, 4.0, 2.0), row(2, 6.0, 5.0, 2.0)];

        let min = ledger.min_available(&rows).unwrap();
        assert!((min - (-1.0)).abs() < 1e-9);
        assert!(ledger.is_over_committed(min));

        assert!(ledger.min_available(&[]).is_none());
    }

    // 测试: 课时受限下的可排节数
    #[test]
    fn test_max_affordable_sessions() {
        let ledger = HoursLedger::default();
        assert_eq!(ledger.max_affordable_sessions(15.0, 1.5), 10);
        assert_eq!(ledger.max_affordable_sessions(14.9, 1.5), 9);
        assert_eq!(ledger.max_affordable_sessions(0.0, 1.5), 0);
        assert_eq!(ledger.max_affordable_sessions(-3.0, 1.5), 0);
        assert_eq!(ledger.max_affordable_sessions(10.0, 0.0), 0);
    }

    // 测试: 对账偏差判定
    #[test]
    fn test_reconcile_drift() {
        let ledger = HoursLedger::default();
        assert!(ledger.reconcile_drift(7.5, 7.5).is_none());
        assert!(ledger.reconcile_drift(7.5, 7.5 + 1e-9).is_none());

        let drift = ledger.reconcile_drift(8.0, 7.5).unwrap();
        assert!((drift - 0.5).abs() < 1e-9);
    }
}
