// ==========================================
// 教培排课与课时管理引擎 - 配置管理器
// ==========================================
// 职责: 配置加载、查询、覆写管理
// 存储: config_kv 表 (key-value, 全局生效)
// ==========================================

use rusqlite::{params, Connection};
use std::error::Error;
use std::sync::{Arc, Mutex};

use crate::db::open_sqlite_connection;

// ==========================================
// ConfigManager - 配置管理器
// ==========================================
pub struct ConfigManager {
    conn: Arc<Mutex<Connection>>,
}

impl ConfigManager {
    /// 创建新的 ConfigManager 实例
    ///
    /// # 参数
    /// - db_path: 数据库文件路径
    pub fn new(db_path: &str) -> Result<Self, Box<dyn Error>> {
        let conn = open_sqlite_connection(db_path)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 从已有连接创建 ConfigManager
    ///
    /// 说明：为保证连接行为一致，会对传入连接再次应用统一 PRAGMA（幂等）。
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Result<Self, Box<dyn Error>> {
        {
            let conn_guard = conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;
            crate::db::configure_sqlite_connection(&conn_guard)?;
        }

        Ok(Self { conn })
    }

    /// 从 config_kv 表读取配置值
    ///
    /// # 返回
    /// - Some(String): 配置值
    /// - None: 配置不存在
    pub fn get_config_value(&self, key: &str) -> Result<Option<String>, Box<dyn Error>> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;

        let result = conn.query_row(
            "SELECT value FROM config_kv WHERE key = ?1",
            params![key],
            |row| row.get::<_, String>(0),
        );

        match result {
            Ok(value) => Ok(Some(value)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(Box::new(e)),
        }
    }

    /// 写入配置值 (UPSERT)
    pub fn set_config_value(&self, key: &str, value: &str) -> Result<(), Box<dyn Error>> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;

        conn.execute(
            "INSERT INTO config_kv (key, value, updated_at) \
             VALUES (?1, ?2, datetime('now', 'localtime')) \
             ON CONFLICT(key) DO UPDATE SET value = ?2, updated_at = datetime('now', 'localtime')",
            params![key, value],
        )?;
        Ok(())
    }

    /// 从 config_kv 表读取配置值，带默认值
    fn get_config_or_default(&self, key: &str, default: &str) -> Result<String, Box<dyn Error>> {
        Ok(self
            .get_config_value(key)?
            .unwrap_or_else(|| default.to_string()))
    }

    // ===== 排课配置 =====

    /// 批量排课未指定课时数时的默认值
    ///
    /// # 返回
    /// - f64: 默认课时数（默认 2.0）
    pub fn get_default_lesson_hours(&self) -> Result<f64, Box<dyn Error>> {
        let value = self.get_config_or_default(config_keys::DEFAULT_LESSON_HOURS, "2.0")?;
        Ok(value.parse::<f64>().unwrap_or(2.0))
    }

    // ===== 考勤配置 =====

    /// 缺勤是否默认扣课时
    pub fn get_absent_deduct_default(&self) -> Result<bool, Box<dyn Error>> {
        let value = self.get_config_or_default(config_keys::ABSENT_DEDUCT_DEFAULT, "true")?;
        Ok(parse_bool(&value, true))
    }

    // ===== 课时配置 =====

    /// 乐观锁冲突时的最大重试次数
    pub fn get_hours_max_retry(&self) -> Result<u32, Box<dyn Error>> {
        let value = self.get_config_or_default(config_keys::HOURS_MAX_RETRY, "3")?;
        Ok(value.parse::<u32>().unwrap_or(3))
    }

    /// 课时浮点比较容差
    pub fn get_hours_epsilon(&self) -> Result<f64, Box<dyn Error>> {
        let value = self.get_config_or_default(config_keys::HOURS_EPSILON, "0.000001")?;
        Ok(value.parse::<f64>().unwrap_or(1e-6))
    }
}

fn parse_bool(value: &str, default: bool) -> bool {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => true,
        "false" | "0" | "no" | "off" => false,
        _ => default,
    }
}

// ==========================================
// 配置键常量
// ==========================================
pub mod config_keys {
    // 排课
    pub const DEFAULT_LESSON_HOURS: &str = "schedule.default_lesson_hours";

    // 考勤
    pub const ABSENT_DEDUCT_DEFAULT: &str = "attendance.absent_deduct_default";

    // 课时
    pub const HOURS_MAX_RETRY: &str = "hours.max_retry";
    pub const HOURS_EPSILON: &str = "hours.epsilon";
}
