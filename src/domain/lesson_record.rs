// ==========================================
// 教培排课与课时管理引擎 - 课时流水领域模型
// ==========================================
// 职责: 课时台账流水实体定义
// 红线: 只追加不修改不删除; 带符号小时数求和必须等于 enrollment.used_hours
// ==========================================

use crate::domain::types::LessonRecordType;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

// ==========================================
// LessonRecord - 课时流水
// ==========================================
// consume 记正数, refund 记负数, adjust 记带符号修正值
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LessonRecord {
    pub id: i64,                     // 流水ID
    pub enrollment_id: i64,          // 关联报名
    pub schedule_id: Option<i64>,    // 关联排课(人工调整可为空)
    pub record_date: NaiveDate,      // 记账日期
    pub hours: f64,                  // 带符号课时数
    pub record_type: LessonRecordType, // 流水类型
    pub notes: Option<String>,       // 备注
    pub created_by: String,          // 记账人
    pub created_at: String,          // 记账时间
}
