// ==========================================
// 教培排课与课时管理引擎 - 核心库
// ==========================================
// 技术栈: Rust + SQLite
// 系统定位: 排课生成 / 冲突检测 / 课时台账
// ==========================================

// ==========================================
// 模块声明
// ==========================================

// 领域层 - 实体与类型
pub mod domain;

// 数据仓储层 - 数据访问
pub mod repository;

// 引擎层 - 业务规则
pub mod engine;

// 配置层 - 系统配置
pub mod config;

// 数据库基础设施（连接初始化/PRAGMA 统一）
pub mod db;

// 日志系统
pub mod logging;

// API 层 - 业务接口
pub mod api;

// 应用层 - 服务装配
pub mod app;

// ==========================================
// 重导出核心类型
// ==========================================

// 领域类型
pub use domain::types::{
    AttendanceStatus, ConflictKind, EnrollmentStatus, LessonRecordType, ScheduleStatus,
};

// 领域实体
pub use domain::{
    ActionLog, ClassPlan, DatedInterval, Enrollment, LessonRecord, Schedule, StudentAttendance,
};

// 引擎
pub use engine::{
    AttendanceTransition, ConflictDetector, HoursLedger, LedgerEffect, ScheduleGenerator,
};

// API
pub use api::{AttendanceApi, EnrollmentApi, ScheduleApi};

// ==========================================
// 常量定义
// ==========================================

// 系统版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// 系统名称
pub const APP_NAME: &str = "教培排课与课时管理引擎";

// 数据库版本
pub const DB_VERSION: &str = "v0.1";

// ==========================================
// 预编译检查
// ==========================================
