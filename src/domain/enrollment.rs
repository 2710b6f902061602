// ==========================================
// 教培排课与课时管理引擎 - 报名领域模型
// ==========================================
// 职责: 报名(学生-班级购课关系)实体定义
// 红线: used_hours 只能经课时台账流水变更, 并受 revision 乐观锁保护
// ==========================================

use crate::domain::types::EnrollmentStatus;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

// ==========================================
// Enrollment - 报名记录
// ==========================================
// 课时预算按报名个体持有; 排课按班级共享
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Enrollment {
    pub id: i64,                          // 报名ID
    pub student_id: i64,                  // 学生ID
    pub class_plan_id: i64,               // 班级ID
    pub status: EnrollmentStatus,         // 报名状态
    pub purchased_hours: f64,             // 购买课时数
    pub used_hours: f64,                  // 已消耗课时数(缓存, 与台账对账)
    pub enrollment_date: Option<NaiveDate>, // 报名日期
    pub revision: i64,                    // 乐观锁：课时变更修订号
}

impl Enrollment {
    pub fn is_active(&self) -> bool {
        self.status == EnrollmentStatus::Active
    }

    /// 未消耗额度(不含排课预占)
    pub fn remaining_hours(&self) -> f64 {
        self.purchased_hours - self.used_hours
    }
}
