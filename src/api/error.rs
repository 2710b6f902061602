// ==========================================
// 教培排课与课时管理引擎 - API层错误类型
// ==========================================
// 职责: 定义API层错误类型, 转换仓储错误为用户友好的错误消息
// 红线: 课时不足必须逐个报名列明, 不允许笼统报错
// ==========================================

use crate::repository::error::RepositoryError;
use thiserror::Error;

/// API层错误类型
#[derive(Error, Debug)]
pub enum ApiError {
    // ==========================================
    // 业务规则错误
    // ==========================================
    /// 课时不足, 拒绝整批排课
    #[error("部分学生课时不足, 无法完成排课: enrollment_ids={enrollment_ids:?}")]
    InsufficientHours { enrollment_ids: Vec<i64> },

    #[error("无效输入: {0}")]
    InvalidInput(String),

    #[error("资源未找到: {0}")]
    NotFound(String),

    #[error("业务规则违反: {0}")]
    BusinessRuleViolation(String),

    // ==========================================
    // 并发控制错误
    // ==========================================
    /// 预检与提交之间被他人抢占, 或乐观锁重试耗尽
    #[error("并发冲突: {0}")]
    ConcurrencyConflict(String),

    // ==========================================
    // 数据访问错误
    // ==========================================
    #[error("数据库错误: {0}")]
    DatabaseError(String),

    #[error("数据库连接失败: {0}")]
    DatabaseConnectionError(String),

    #[error("数据库事务失败: {0}")]
    DatabaseTransactionError(String),

    // ==========================================
    // 数据质量错误
    // ==========================================
    #[error("数据验证失败: {0}")]
    ValidationError(String),

    // ==========================================
    // 通用错误
    // ==========================================
    #[error("内部错误: {0}")]
    InternalError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

// ==========================================
// 从 RepositoryError 转换
// 目的: 将仓储层的技术错误转换为用户友好的业务错误
// ==========================================
impl From<RepositoryError> for ApiError {
    fn from(err: RepositoryError) -> Self {
        match err {
            // 并发控制错误
            RepositoryError::OptimisticLockFailure {
                enrollment_id,
                expected,
                actual,
            } => ApiError::ConcurrencyConflict(format!(
                "报名{}的课时已被其他操作修改（期望revision={}，实际revision={}）",
                enrollment_id, expected, actual
            )),

            // 数据库错误
            RepositoryError::NotFound { entity, id } => {
                ApiError::NotFound(format!("{}(id={})不存在", entity, id))
            }
            RepositoryError::LockError(msg) => {
                ApiError::DatabaseConnectionError(format!("数据库锁获取失败: {}", msg))
            }
            RepositoryError::DatabaseTransactionError(msg) => {
                ApiError::DatabaseTransactionError(msg)
            }
            RepositoryError::DatabaseQueryError(msg) => ApiError::DatabaseError(msg),
            RepositoryError::UniqueConstraintViolation(msg) => {
                ApiError::BusinessRuleViolation(format!("唯一约束违反: {}", msg))
            }
            RepositoryError::ForeignKeyViolation(msg) => {
                ApiError::BusinessRuleViolation(format!("外键约束违反: {}", msg))
            }

            // 业务规则错误
            RepositoryError::BusinessRuleViolation(msg) => {
                // 提交窗口内的抢占在仓储层以约定消息上报
                if msg.contains("并发冲突") {
                    ApiError::ConcurrencyConflict(msg)
                } else {
                    ApiError::BusinessRuleViolation(msg)
                }
            }

            RepositoryError::InsufficientHours { enrollment_ids } => {
                ApiError::InsufficientHours { enrollment_ids }
            }

            // 数据质量错误
            RepositoryError::ValidationError(msg) => ApiError::ValidationError(msg),

            // 通用错误
            RepositoryError::InternalError(msg) => ApiError::InternalError(msg),
            RepositoryError::Other(err) => ApiError::Other(err),
        }
    }
}

/// Result 类型别名
pub type ApiResult<T> = Result<T, ApiError>;

// ==========================================
// 入参校验辅助函数
// ==========================================

/// 验证日期区间 (闭区间, start <= end)
pub fn validate_date_range(
    start_date: chrono::NaiveDate,
    end_date: chrono::NaiveDate,
) -> ApiResult<()> {
    if start_date > end_date {
        return Err(ApiError::InvalidInput(format!(
            "日期区间无效: {} 晚于 {}",
            start_date, end_date
        )));
    }
    Ok(())
}

/// 验证单日时段 (左闭右开, start < end)
pub fn validate_time_slot(
    start_time: chrono::NaiveTime,
    end_time: chrono::NaiveTime,
) -> ApiResult<()> {
    if start_time >= end_time {
        return Err(ApiError::InvalidInput(format!(
            "时段无效: 开始时间 {} 不早于结束时间 {}",
            start_time.format("%H:%M"),
            end_time.format("%H:%M")
        )));
    }
    Ok(())
}

/// 验证周几编码列表 (0=周一 ... 6=周日, 非空)
pub fn validate_weekdays(weekdays: &[u8]) -> ApiResult<()> {
    if weekdays.is_empty() {
        return Err(ApiError::InvalidInput("未指定上课的星期".to_string()));
    }
    if let Some(bad) = weekdays.iter().find(|w| **w > 6) {
        return Err(ApiError::InvalidInput(format!(
            "周几编码超出范围: {} (允许 0-6, 0=周一)",
            bad
        )));
    }
    Ok(())
}

/// 验证课时数为正且不超过单日上限
pub fn validate_lesson_hours(lesson_hours: f64) -> ApiResult<()> {
    if !lesson_hours.is_finite() || lesson_hours <= 0.0 {
        return Err(ApiError::InvalidInput(format!(
            "课时数必须为正数: {}",
            lesson_hours
        )));
    }
    if lesson_hours > 24.0 {
        return Err(ApiError::InvalidInput(format!(
            "单次课时数超出上限 24.0: {}",
            lesson_hours
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveTime};

    #[test]
    fn test_date_range_validation() {
        let d1 = NaiveDate::from_ymd_opt(2024, 6, 3).unwrap();
        let d2 = NaiveDate::from_ymd_opt(2024, 6, 14).unwrap();
        assert!(validate_date_range(d1, d2).is_ok());
        // 单日区间允许
        assert!(validate_date_range(d1, d1).is_ok());
        assert!(validate_date_range(d2, d1).is_err());
    }

    #[test]
    fn test_time_slot_validation() {
        let t1 = NaiveTime::from_hms_opt(9, 0, 0).unwrap();
        let t2 = NaiveTime::from_hms_opt(10, 30, 0).unwrap();
        assert!(validate_time_slot(t1, t2).is_ok());
        assert!(validate_time_slot(t2, t1).is_err());
        // 零长时段拒绝
        assert!(validate_time_slot(t1, t1).is_err());
    }

    #[test]
    fn test_weekdays_validation() {
        assert!(validate_weekdays(&[0, 2, 4]).is_ok());
        assert!(validate_weekdays(&[]).is_err());
        assert!(validate_weekdays(&[7]).is_err());
    }

    #[test]
    fn test_lesson_hours_validation() {
        assert!(validate_lesson_hours(1.5).is_ok());
        assert!(validate_lesson_hours(24.0).is_ok());
        assert!(validate_lesson_hours(0.0).is_err());
        assert!(validate_lesson_hours(-2.0).is_err());
        assert!(validate_lesson_hours(24.5).is_err());
        assert!(validate_lesson_hours(f64::NAN).is_err());
    }

    #[test]
    fn test_repository_error_conversion() {
        // NotFound错误转换
        let repo_err = RepositoryError::NotFound {
            entity: "Schedule".to_string(),
            id: "42".to_string(),
        };
        let api_err: ApiError = repo_err.into();
        match api_err {
            ApiError::NotFound(msg) => {
                assert!(msg.contains("Schedule"));
                assert!(msg.contains("42"));
            }
            _ => panic!("Expected NotFound"),
        }

        // OptimisticLockFailure转换为并发冲突
        let repo_err = RepositoryError::OptimisticLockFailure {
            enrollment_id: 7,
            expected: 1,
            actual: 2,
        };
        let api_err: ApiError = repo_err.into();
        match api_err {
            ApiError::ConcurrencyConflict(msg) => {
                assert!(msg.contains("报名7"));
                assert!(msg.contains("已被其他操作修改"));
            }
            _ => panic!("Expected ConcurrencyConflict"),
        }

        // 提交窗口抢占转换为并发冲突
        let repo_err = RepositoryError::BusinessRuleViolation(
            "提交时检测到并发冲突: 2024-06-05 09:00-10:30 时段已被占用".to_string(),
        );
        let api_err: ApiError = repo_err.into();
        assert!(matches!(api_err, ApiError::ConcurrencyConflict(_)));

        // 事务内余量复核失败原样携带报名列表
        let repo_err = RepositoryError::InsufficientHours {
            enrollment_ids: vec![3, 7],
        };
        let api_err: ApiError = repo_err.into();
        match api_err {
            ApiError::InsufficientHours { enrollment_ids } => {
                assert_eq!(enrollment_ids, vec![3, 7]);
            }
            _ => panic!("Expected InsufficientHours"),
        }
    }
}
