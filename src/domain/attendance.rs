// ==========================================
// 教培排课与课时管理引擎 - 考勤领域模型
// ==========================================
// 职责: 考勤记录实体定义
// 红线: (enrollment_id, schedule_id) 唯一, 所有写入为 upsert
// ==========================================

use crate::domain::types::AttendanceStatus;
use serde::{Deserialize, Serialize};

// ==========================================
// StudentAttendance - 考勤记录
// ==========================================
// 无记录即"未标记"; deduct_hours 的翻转驱动课时台账
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudentAttendance {
    pub id: i64,                      // 考勤ID
    pub enrollment_id: i64,           // 关联报名
    pub schedule_id: i64,             // 关联排课
    pub student_id: i64,              // 学生ID(冗余, 查询用)
    pub class_plan_id: i64,           // 班级ID(冗余, 查询用)
    pub status: AttendanceStatus,     // 出勤状态
    pub leave_reason: Option<String>, // 请假原因
    pub apply_time: Option<String>,   // 请假申请时间
    pub deduct_hours: bool,           // 本次课是否扣课时
    pub marked_by: Option<String>,    // 标记人
    pub marked_at: Option<String>,    // 标记时间
    pub notes: Option<String>,        // 备注
}
