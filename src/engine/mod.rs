// ==========================================
// 教培排课与课时管理引擎 - 引擎层
// ==========================================
// 职责: 实现排课/冲突/课时/考勤的业务规则, 不拼 SQL
// 红线: Engine 不访问数据库, 候选集与快照由 api 层组装
// ==========================================

pub mod attendance;
pub mod conflict;
pub mod generator;
pub mod ledger;

// 重导出核心引擎
pub use attendance::{AttendanceTransition, LedgerEffect, TransitionOutcome};
pub use conflict::{
    BatchConflictItem, BookedSlot, ConflictDetail, ConflictDetector, ConflictHit, ConflictNames,
};
pub use generator::{
    generate_batch_no, CandidateSlot, DateRange, GenerationOutcome, ScheduleGenerator,
    TimeSlotRule,
};
pub use ledger::{EnrollmentHours, HoursLedger, StudentHoursView, DEFAULT_EPSILON};
