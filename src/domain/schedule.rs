// ==========================================
// 教培排课与课时管理引擎 - 排课领域模型
// ==========================================
// 职责: 单次课(排课记录)实体定义
// 红线: 已完成的排课不可删除; 取消的排课不参与冲突判定
// ==========================================

use crate::domain::interval::DatedInterval;
use crate::domain::types::ScheduleStatus;
use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

// ==========================================
// Schedule - 排课记录
// ==========================================
// 一条记录即某班级某日的一次具体课次
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schedule {
    pub id: i64,                    // 排课ID
    pub class_plan_id: i64,         // 所属班级
    pub teacher_id: Option<i64>,    // 授课教师
    pub classroom_id: Option<i64>,  // 教室
    pub schedule_date: NaiveDate,   // 上课日期
    pub start_time: NaiveTime,      // 开始时间
    pub end_time: NaiveTime,        // 结束时间
    pub lesson_hours: f64,          // 本次课消耗课时数
    pub status: ScheduleStatus,     // 状态
    pub batch_no: Option<String>,   // 批次号(批量生成时共享)
    pub title: Option<String>,      // 课次标题
    pub notes: Option<String>,      // 备注
    pub created_by: String,         // 创建人
    pub updated_by: Option<String>, // 最近修改人
    pub created_at: String,         // 创建时间
    pub updated_at: Option<String>, // 更新时间
}

impl Schedule {
    /// 本次课占用的时间区间
    pub fn interval(&self) -> DatedInterval {
        DatedInterval::new(self.schedule_date, self.start_time, self.end_time)
    }

    pub fn is_completed(&self) -> bool {
        self.status == ScheduleStatus::Completed
    }

    pub fn is_cancelled(&self) -> bool {
        self.status == ScheduleStatus::Cancelled
    }

    /// 课次显示名(流水备注用)
    pub fn display_title(&self) -> &str {
        self.title.as_deref().unwrap_or("课程")
    }
}
