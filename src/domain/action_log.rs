// ==========================================
// 教培排课与课时管理引擎 - 操作日志领域模型
// ==========================================
// 职责: 批量写操作的审计记录
// 红线: 审计写入失败只告警, 不阻断业务操作
// ==========================================

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

// ==========================================
// ActionLog - 操作日志
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionLog {
    pub action_id: String,               // 日志ID (uuid)
    pub action_type: String,             // 操作类型 (存储为字符串)
    pub operator: String,                // 操作人
    pub payload_json: Option<JsonValue>, // 操作参数 (JSON)
    pub created_at: String,              // 操作时间
}

// ==========================================
// ActionType - 操作类型
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionType {
    BatchCreateSchedules, // 批量生成排课
    BatchUpdateSchedules, // 批量修改排课
    BatchDeleteSchedules, // 批量删除排课
    BatchMarkAttendance,  // 批量标记考勤
    AdjustHours,          // 人工调整课时
    OverdueSweep,         // 过期排课自动完成
}

impl ActionType {
    /// 转换为数据库存储的字符串
    pub fn to_db_str(&self) -> &'static str {
        match self {
            ActionType::BatchCreateSchedules => "BATCH_CREATE_SCHEDULES",
            ActionType::BatchUpdateSchedules => "BATCH_UPDATE_SCHEDULES",
            ActionType::BatchDeleteSchedules => "BATCH_DELETE_SCHEDULES",
            ActionType::BatchMarkAttendance => "BATCH_MARK_ATTENDANCE",
            ActionType::AdjustHours => "ADJUST_HOURS",
            ActionType::OverdueSweep => "OVERDUE_SWEEP",
        }
    }
}
