// ==========================================
// 教培排课与课时管理引擎 - 数据仓储层
// ==========================================
// 职责: 提供数据访问接口, 屏蔽数据库细节
// 红线: Repository 不含业务逻辑
// 约束: 所有查询使用参数化, 防止 SQL 注入
// ==========================================

pub mod action_log_repo;
pub mod attendance_repo;
pub mod class_plan_repo;
pub mod enrollment_repo;
pub mod error;
pub mod lesson_record_repo;
pub mod master_repo;
pub mod schedule_repo;

// 重导出核心仓储
pub use action_log_repo::ActionLogRepository;
pub use attendance_repo::AttendanceRepository;
pub use class_plan_repo::ClassPlanRepository;
pub use enrollment_repo::EnrollmentRepository;
pub use error::{RepositoryError, RepositoryResult};
pub use lesson_record_repo::LessonRecordRepository;
pub use master_repo::MasterDataRepository;
pub use schedule_repo::{ReserveBudget, ScheduleRepository};

// TODO: schema_version 目前仅校验告警, 不自动迁移, 后续接入迁移工具
