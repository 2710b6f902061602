// ==========================================
// 考勤状态机引擎
// ==========================================
// 职责: (旧记录, 新状态, 新扣课时标记) -> (写入动作, 台账副作用) 的纯转移函数
// 红线: 扣课时标记是消耗的唯一驱动; false->true 扣, true->false 返还, 不变则无副作用
// 红线: 状态机与台账写入解耦, 副作用由调用方落库
// ==========================================

use crate::domain::attendance::StudentAttendance;
use crate::domain::types::AttendanceStatus;

// ==========================================
// LedgerEffect - 台账副作用
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LedgerEffect {
    None,
    /// 扣减课时 (小时数为正)
    Consume(f64),
    /// 返还课时 (小时数为正, 落账时取负)
    Refund(f64),
}

impl LedgerEffect {
    /// 落账用的带符号小时数
    pub fn signed_hours(&self) -> f64 {
        match self {
            LedgerEffect::None => 0.0,
            LedgerEffect::Consume(h) => *h,
            LedgerEffect::Refund(h) => -*h,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, LedgerEffect::None)
    }
}

/// 一次转移的结论
#[derive(Debug, Clone)]
pub struct TransitionOutcome {
    pub status: AttendanceStatus,
    pub deduct_hours: bool,
    pub effect: LedgerEffect,
    /// 状态或扣课时标记有变化 (新记录恒为 true)
    pub changed: bool,
}

// ==========================================
// AttendanceTransition - 转移函数
// ==========================================
pub struct AttendanceTransition;

impl AttendanceTransition {
    /// 计算一次标记的写入结果与台账副作用
    ///
    /// # 规则
    /// 1. 旧记录不存在视同 未标记/不扣课时
    /// 2. 扣课时标记 false->true 产生 Consume, true->false 产生 Refund
    /// 3. 标记不变时无副作用, 重复标记任意次均安全
    ///
    /// # 参数
    /// - old: 既有考勤记录
    /// - new_status: 目标状态
    /// - new_deduct: 目标扣课时标记
    /// - lesson_hours: 该课次的课时数
    pub fn plan(
        old: Option<&StudentAttendance>,
        new_status: AttendanceStatus,
        new_deduct: bool,
        lesson_hours: f64,
    ) -> TransitionOutcome {
        let old_deduct = old.map(|r| r.deduct_hours).unwrap_or(false);

        let effect = match (old_deduct, new_deduct) {
            (false, true) => LedgerEffect::Consume(lesson_hours),
            (true, false) => LedgerEffect::Refund(lesson_hours),
            _ => LedgerEffect::None,
        };

        let changed = match old {
            None => true,
            Some(record) => record.status != new_status || record.deduct_hours != new_deduct,
        };

        TransitionOutcome {
            status: new_status,
            deduct_hours: new_deduct,
            effect,
            changed,
        }
    }

    /// 撤销一条记录的消耗 (取消完成/删除排课前调用)
    ///
    /// 已扣课时的记录产生 Refund, 未扣的无副作用
    pub fn plan_revoke(record: &StudentAttendance, lesson_hours: f64) -> TransitionOutcome {
        Self::plan(Some(record), record.status, false, lesson_hours)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(status: AttendanceStatus, deduct: bool) -> StudentAttendance {
        StudentAttendance {
            id: 1,
            enrollment_id: 1,
            schedule_id: 10,
            student_id: 100,
            class_plan_id: 5,
            status,
            leave_reason: None,
            apply_time: None,
            deduct_hours: deduct,
            marked_by: Some("admin".to_string()),
            marked_at: None,
            notes: None,
        }
    }

    // 测试: 首次标记正常出勤并扣课时
    #[test]
    fn test_unmarked_to_normal_consumes() {
        let outcome = AttendanceTransition::plan(None, AttendanceStatus::Normal, true, 1.5);
        assert_eq!(outcome.effect, LedgerEffect::Consume(1.5));
        assert!(outcome.changed);
        assert!((outcome.effect.signed_hours() - 1.5).abs() < 1e-9);
    }

    // 测试: 首次请假默认不扣, 无台账副作用
    #[test]
    fn test_unmarked_to_leave_no_effect() {
        let outcome = AttendanceTransition::plan(None, AttendanceStatus::Leave, false, 1.5);
        assert!(outcome.effect.is_none());
        assert!(outcome.changed);
    }

    // 测试: 请假改为缺勤并扣课时, 产生消耗
    #[test]
    fn test_leave_to_absent_with_deduct_consumes() {
        let old = record(AttendanceStatus::Leave, false);
        let outcome =
            AttendanceTransition::plan(Some(&old), AttendanceStatus::Absent, true, 2.0);
        assert_eq!(outcome.effect, LedgerEffect::Consume(2.0));
    }

    // 测试: 已扣课时的记录改为不扣, 产生返还
    #[test]
    fn test_deducting_to_non_deducting_refunds() {
        let old = record(AttendanceStatus::Normal, true);
        let outcome = AttendanceTransition::plan(Some(&old), AttendanceStatus::Leave, false, 1.5);
        assert_eq!(outcome.effect, LedgerEffect::Refund(1.5));
        assert!((outcome.effect.signed_hours() + 1.5).abs() < 1e-9);
    }

    // 测试: 状态变化但扣课时标记不变, 无台账副作用
    #[test]
    fn test_status_change_same_deduct_no_effect() {
        let old = record(AttendanceStatus::Normal, true);
        let outcome = AttendanceTransition::plan(Some(&old), AttendanceStatus::Absent, true, 1.5);
        assert!(outcome.effect.is_none());
        assert!(outcome.changed);
    }

    // 测试: 完全相同的重复标记既无副作用也无写入
    #[test]
    fn test_identical_remark_is_noop() {
        let old = record(AttendanceStatus::Normal, true);
        let outcome = AttendanceTransition::plan(Some(&old), AttendanceStatus::Normal, true, 1.5);
        assert!(outcome.effect.is_none());
        assert!(!outcome.changed);
    }

    // 测试: 往返标记的净副作用为零
    #[test]
    fn test_round_trip_nets_to_zero() {
        let first = AttendanceTransition::plan(None, AttendanceStatus::Normal, true, 1.5);
        let mut current = record(first.status, first.deduct_hours);

        let second =
            AttendanceTransition::plan(Some(&current), AttendanceStatus::Leave, false, 1.5);
        current.status = second.status;
        current.deduct_hours = second.deduct_hours;

        let third =
            AttendanceTransition::plan(Some(&current), AttendanceStatus::Normal, true, 1.5);

        let net = first.effect.signed_hours()
            + second.effect.signed_hours()
            + third.effect.signed_hours();
        assert!((net - 1.5).abs() < 1e-9);
    }

    // 测试: 撤销消耗
    #[test]
    fn test_revoke_refunds_only_deducting() {
        let deducting = record(AttendanceStatus::Normal, true);
        let outcome = AttendanceTransition::plan_revoke(&deducting, 1.5);
        assert_eq!(outcome.effect, LedgerEffect::Refund(1.5));

        let non_deducting = record(AttendanceStatus::Leave, false);
        let outcome = AttendanceTransition::plan_revoke(&non_deducting, 1.5);
        assert!(outcome.effect.is_none());
    }
}
