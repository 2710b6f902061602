// ==========================================
// 教培排课与课时管理引擎 - 应用状态
// ==========================================
// 职责: 管理应用级别的共享状态和API实例
// 红线: 全部仓储共用一条 SQLite 连接, 装配顺序先仓储后引擎再API
// ==========================================

use std::sync::{Arc, Mutex};

use crate::api::{AttendanceApi, EnrollmentApi, ScheduleApi};
use crate::config::ConfigManager;
use crate::db::{init_schema, open_sqlite_connection};
use crate::repository::{
    ActionLogRepository, AttendanceRepository, ClassPlanRepository, EnrollmentRepository,
    LessonRecordRepository, MasterDataRepository, ScheduleRepository,
};

/// 应用状态
///
/// 包含所有API实例和共享资源
pub struct AppState {
    /// 数据库路径
    pub db_path: String,

    /// 排课API
    pub schedule_api: Arc<ScheduleApi>,

    /// 考勤API
    pub attendance_api: Arc<AttendanceApi>,

    /// 课时API
    pub enrollment_api: Arc<EnrollmentApi>,

    /// 配置管理器
    pub config_manager: Arc<ConfigManager>,

    /// 操作日志仓储（用于审计追踪）
    pub action_log_repo: Arc<ActionLogRepository>,
}

impl AppState {
    /// 创建新的AppState实例
    ///
    /// # 参数
    /// - db_path: 数据库文件路径
    ///
    /// # 返回
    /// - Ok(AppState): 应用状态实例
    /// - Err(String): 初始化错误
    ///
    /// # 说明
    /// 该方法会：
    /// 1. 打开共享数据库连接并初始化表结构
    /// 2. 初始化所有Repository
    /// 3. 创建所有API实例
    pub fn new(db_path: String) -> Result<Self, String> {
        tracing::info!("初始化AppState，数据库路径: {}", db_path);

        let conn =
            open_sqlite_connection(&db_path).map_err(|e| format!("无法打开数据库: {}", e))?;
        init_schema(&conn).map_err(|e| format!("初始化数据库结构失败: {}", e))?;
        let conn = Arc::new(Mutex::new(conn));

        // ==========================================
        // 初始化Repository层
        // ==========================================

        let schedule_repo = Arc::new(ScheduleRepository::from_connection(conn.clone()));
        let class_plan_repo = Arc::new(ClassPlanRepository::from_connection(conn.clone()));
        let enrollment_repo = Arc::new(EnrollmentRepository::from_connection(conn.clone()));
        let attendance_repo = Arc::new(AttendanceRepository::from_connection(conn.clone()));
        let lesson_record_repo = Arc::new(LessonRecordRepository::from_connection(conn.clone()));
        let master_repo = Arc::new(MasterDataRepository::from_connection(conn.clone()));
        let action_log_repo = Arc::new(ActionLogRepository::from_connection(conn.clone()));

        // 配置管理器
        let config_manager = Arc::new(
            ConfigManager::from_connection(conn.clone())
                .map_err(|e| format!("无法创建ConfigManager: {}", e))?,
        );

        // ==========================================
        // 初始化API层
        // ==========================================

        // 考勤API（排课API的完成/撤销结算也经由它）
        let attendance_api = Arc::new(AttendanceApi::new(
            attendance_repo.clone(),
            enrollment_repo.clone(),
            lesson_record_repo.clone(),
            schedule_repo.clone(),
            master_repo.clone(),
            action_log_repo.clone(),
            config_manager.clone(),
        ));

        // 排课API
        let schedule_api = Arc::new(ScheduleApi::new(
            schedule_repo.clone(),
            class_plan_repo.clone(),
            enrollment_repo.clone(),
            attendance_repo.clone(),
            master_repo.clone(),
            action_log_repo.clone(),
            config_manager.clone(),
            attendance_api.clone(),
        ));

        // 课时API
        let enrollment_api = Arc::new(EnrollmentApi::new(
            enrollment_repo,
            lesson_record_repo,
            schedule_repo,
            attendance_repo,
            class_plan_repo,
            master_repo,
            action_log_repo.clone(),
            config_manager.clone(),
        ));

        tracing::info!("AppState初始化完成");

        Ok(Self {
            db_path,
            schedule_api,
            attendance_api,
            enrollment_api,
            config_manager,
            action_log_repo,
        })
    }

    /// 获取数据库路径
    pub fn get_db_path(&self) -> &str {
        &self.db_path
    }
}

// ==========================================
// 默认数据库路径辅助函数
// ==========================================

/// 获取默认数据库路径
///
/// # 返回
/// - 开发环境: 用户数据目录/class-schedule-engine-dev/class_schedule.db
/// - 生产环境: 用户数据目录/class-schedule-engine/class_schedule.db
pub fn get_default_db_path() -> String {
    use std::path::PathBuf;

    // 允许通过环境变量显式指定 DB 路径（便于调试/测试/CI）
    if let Ok(path) = std::env::var("CLASS_SCHEDULE_DB_PATH") {
        let trimmed = path.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }

    let mut path = PathBuf::from("./class_schedule.db");

    if let Some(data_dir) = dirs::data_dir() {
        // 开发环境使用独立目录，避免污染生产数据
        #[cfg(debug_assertions)]
        {
            path = data_dir.join("class-schedule-engine-dev");
        }

        #[cfg(not(debug_assertions))]
        {
            path = data_dir.join("class-schedule-engine");
        }

        // 确保目录存在
        std::fs::create_dir_all(&path).ok();
        path = path.join("class_schedule.db");
    }

    path.to_string_lossy().to_string()
}
