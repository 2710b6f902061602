// ==========================================
// 教培排课与课时管理引擎 - API 层
// ==========================================
// 职责: 面向调用方的服务编排, 入参校验与错误归一
// ==========================================

pub mod error;
mod ledger_ops;
pub mod attendance_api;
pub mod enrollment_api;
pub mod schedule_api;

// 重导出核心类型
pub use error::{ApiError, ApiResult};
pub use attendance_api::{
    ApplyLeaveRequest, AttendanceApi, AttendanceRosterItem, BatchMarkItem, BatchMarkResponse,
    MarkAttendanceRequest, MarkAttendanceResponse,
};
pub use enrollment_api::{
    AdjustHoursResponse, EnrollmentApi, HoursSummaryResponse, ReconcilePlanResponse,
    ReconcileResponse,
};
pub use schedule_api::{
    BatchDeleteResponse, BatchScheduleRequest, BatchUpdateRequest, BatchUpdateResponse,
    CheckConflictsResponse, CommitBatchResponse, CompleteOverdueResponse, ConflictProbe,
    DateRangeInput, PreviewBatchResponse, ScheduleApi, ScheduleUpdate, TimeSlotInput,
};
