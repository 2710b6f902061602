// ==========================================
// 教培排课与课时管理引擎 - 领域类型定义
// ==========================================
// 序列化格式: snake_case (与数据库及前端契约一致)
// ==========================================

use serde::{Deserialize, Serialize};
use std::fmt;

// ==========================================
// 排课状态 (Schedule Status)
// ==========================================
// 状态流转: scheduled -> completed / cancelled, completed 可回退 scheduled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleStatus {
    Scheduled, // 已排课(待上课)
    Completed, // 已完成
    Cancelled, // 已取消
}

impl fmt::Display for ScheduleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_str())
    }
}

impl ScheduleStatus {
    /// 从字符串解析状态
    pub fn from_str(s: &str) -> Self {
        match s {
            "completed" => ScheduleStatus::Completed,
            "cancelled" => ScheduleStatus::Cancelled,
            _ => ScheduleStatus::Scheduled, // 默认值
        }
    }

    /// 转换为数据库存储的字符串
    pub fn to_db_str(&self) -> &'static str {
        match self {
            ScheduleStatus::Scheduled => "scheduled",
            ScheduleStatus::Completed => "completed",
            ScheduleStatus::Cancelled => "cancelled",
        }
    }
}

// ==========================================
// 报名状态 (Enrollment Status)
// ==========================================
// 只有 active 状态的报名参与课时预占与扣减
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrollmentStatus {
    Active,    // 在读
    Completed, // 结课
    Refunded,  // 已退费
    Cancelled, // 已取消
}

impl fmt::Display for EnrollmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_str())
    }
}

impl EnrollmentStatus {
    /// 从字符串解析状态
    pub fn from_str(s: &str) -> Self {
        match s {
            "completed" => EnrollmentStatus::Completed,
            "refunded" => EnrollmentStatus::Refunded,
            "cancelled" => EnrollmentStatus::Cancelled,
            _ => EnrollmentStatus::Active, // 默认值
        }
    }

    /// 转换为数据库存储的字符串
    pub fn to_db_str(&self) -> &'static str {
        match self {
            EnrollmentStatus::Active => "active",
            EnrollmentStatus::Completed => "completed",
            EnrollmentStatus::Refunded => "refunded",
            EnrollmentStatus::Cancelled => "cancelled",
        }
    }
}

// ==========================================
// 考勤状态 (Attendance Status)
// ==========================================
// 每个 (报名, 排课) 至多一条记录; 未建记录视为 unmarked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttendanceStatus {
    Normal, // 正常出勤
    Leave,  // 请假
    Absent, // 缺勤
}

impl fmt::Display for AttendanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_str())
    }
}

impl AttendanceStatus {
    /// 从字符串解析状态
    pub fn from_str(s: &str) -> Self {
        match s {
            "leave" => AttendanceStatus::Leave,
            "absent" => AttendanceStatus::Absent,
            _ => AttendanceStatus::Normal, // 默认值
        }
    }

    /// 转换为数据库存储的字符串
    pub fn to_db_str(&self) -> &'static str {
        match self {
            AttendanceStatus::Normal => "normal",
            AttendanceStatus::Leave => "leave",
            AttendanceStatus::Absent => "absent",
        }
    }

    /// 该状态的默认扣课时行为
    ///
    /// normal 默认扣课时, leave 默认不扣, absent 由配置决定(调用方传入)
    pub fn default_deduct(&self, absent_default: bool) -> bool {
        match self {
            AttendanceStatus::Normal => true,
            AttendanceStatus::Leave => false,
            AttendanceStatus::Absent => absent_default,
        }
    }
}

// ==========================================
// 课时流水类型 (Lesson Record Type)
// ==========================================
// 台账只追加不修改: consume 记正数, refund 记负数, adjust 记带符号修正
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LessonRecordType {
    Consume, // 消耗
    Refund,  // 退还
    Adjust,  // 人工调整
}

impl fmt::Display for LessonRecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_str())
    }
}

impl LessonRecordType {
    /// 从字符串解析类型
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "consume" => Some(LessonRecordType::Consume),
            "refund" => Some(LessonRecordType::Refund),
            "adjust" => Some(LessonRecordType::Adjust),
            _ => None,
        }
    }

    /// 转换为数据库存储的字符串
    pub fn to_db_str(&self) -> &'static str {
        match self {
            LessonRecordType::Consume => "consume",
            LessonRecordType::Refund => "refund",
            LessonRecordType::Adjust => "adjust",
        }
    }
}

// ==========================================
// 冲突类型 (Conflict Kind)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    Teacher,    // 教师时间冲突
    Classroom,  // 教室占用冲突
    NoStudents, // 班级无在读学生
}

impl fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_str())
    }
}

impl ConflictKind {
    /// 从字符串解析冲突类型
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "teacher" => Some(ConflictKind::Teacher),
            "classroom" => Some(ConflictKind::Classroom),
            "no_students" => Some(ConflictKind::NoStudents),
            _ => None,
        }
    }

    /// 转换为数据库存储的字符串
    pub fn to_db_str(&self) -> &'static str {
        match self {
            ConflictKind::Teacher => "teacher",
            ConflictKind::Classroom => "classroom",
            ConflictKind::NoStudents => "no_students",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_roundtrip() {
        assert_eq!(
            ScheduleStatus::from_str(ScheduleStatus::Completed.to_db_str()),
            ScheduleStatus::Completed
        );
        assert_eq!(
            EnrollmentStatus::from_str("refunded"),
            EnrollmentStatus::Refunded
        );
        assert_eq!(LessonRecordType::from_str("unknown"), None);
        assert_eq!(ConflictKind::from_str("no_students"), Some(ConflictKind::NoStudents));
    }

    #[test]
    fn test_serde_wire_format() {
        assert_eq!(
            serde_json::to_string(&ScheduleStatus::Scheduled).unwrap(),
            "\"scheduled\""
        );
        assert_eq!(
            serde_json::to_string(&ConflictKind::NoStudents).unwrap(),
            "\"no_students\""
        );
    }

    #[test]
    fn test_default_deduct() {
        assert!(AttendanceStatus::Normal.default_deduct(false));
        assert!(!AttendanceStatus::Leave.default_deduct(true));
        assert!(AttendanceStatus::Absent.default_deduct(true));
        assert!(!AttendanceStatus::Absent.default_deduct(false));
    }
}
