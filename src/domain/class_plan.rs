// ==========================================
// 教培排课与课时管理引擎 - 班级领域模型
// ==========================================
// 职责: 班级(开班计划)实体定义
// 红线: current_students/completed_lessons 由外部教务 CRUD 维护, 本引擎只读
// ==========================================

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

// ==========================================
// ClassPlan - 开班计划
// ==========================================
// 排课挂在班级下; 班级的报名学生共享同一份课表
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassPlan {
    pub id: i64,                       // 班级ID
    pub name: String,                  // 班级名称
    pub course_id: Option<i64>,        // 关联课程产品
    pub campus_id: Option<i64>,        // 所属校区
    pub head_teacher_id: Option<i64>,  // 班主任/默认授课教师
    pub classroom_id: Option<i64>,     // 默认教室
    pub current_students: i64,         // 当前报名人数
    pub max_students: i64,             // 满班人数
    pub total_lessons: i64,            // 计划课次数
    pub completed_lessons: i64,        // 已完成课次数
    pub status: String,                // 班级状态(外部系统维护)
    pub start_date: Option<NaiveDate>, // 开班日期
    pub end_date: Option<NaiveDate>,   // 结班日期
}
