// ==========================================
// 教培排课与课时管理引擎 - 时间区间模型
// ==========================================
// 职责: 单日左闭右开区间 [start, end) 的重叠判定与日期/时间解析
// 红线: 全系统按机构本地墙钟时间比较, 不做时区换算
// ==========================================

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

/// 挂靠在具体日期上的左闭右开时间区间
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatedInterval {
    pub date: NaiveDate,  // 上课日期
    pub start: NaiveTime, // 开始时间(含)
    pub end: NaiveTime,   // 结束时间(不含)
}

impl DatedInterval {
    pub fn new(date: NaiveDate, start: NaiveTime, end: NaiveTime) -> Self {
        Self { date, start, end }
    }

    /// 区间是否为空(零长或反向)
    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    /// 同日左闭右开重叠判定
    ///
    /// 零长区间与任何区间都不重叠
    pub fn overlaps(&self, other: &DatedInterval) -> bool {
        if self.is_empty() || other.is_empty() {
            return false;
        }
        self.date == other.date && self.start < other.end && other.start < self.end
    }
}

/// 解析日期, 仅接受 "%Y-%m-%d"
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()
}

/// 解析时间, 接受 "%H:%M" 与 "%H:%M:%S" 两种写法
///
/// 前端契约传 "09:00"; 历史数据可能带秒
pub fn parse_time(s: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(s, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M"))
        .ok()
}

/// 日期格式化为存储格式
pub fn format_date(d: NaiveDate) -> String {
    d.format("%Y-%m-%d").to_string()
}

/// 时间格式化为存储格式(不带秒, 与前端契约一致)
pub fn format_time(t: NaiveTime) -> String {
    t.format("%H:%M").to_string()
}
