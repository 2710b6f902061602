// ==========================================
// 教培排课与课时管理引擎 - 领域模型层
// ==========================================
// 职责: 定义领域实体、类型、时间区间运算
// 红线: 不含数据访问逻辑, 不含引擎逻辑
// ==========================================

pub mod action_log;
pub mod attendance;
pub mod class_plan;
pub mod enrollment;
pub mod interval;
pub mod lesson_record;
pub mod schedule;
pub mod types;

// 重导出核心类型
pub use action_log::{ActionLog, ActionType};
pub use attendance::StudentAttendance;
pub use class_plan::ClassPlan;
pub use enrollment::Enrollment;
pub use interval::{format_date, format_time, parse_date, parse_time, DatedInterval};
pub use lesson_record::LessonRecord;
pub use schedule::Schedule;
pub use types::{
    AttendanceStatus, ConflictKind, EnrollmentStatus, LessonRecordType, ScheduleStatus,
};
