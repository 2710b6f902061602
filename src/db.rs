// ==========================================
// 教培排课与课时管理引擎 - SQLite 连接初始化
// ==========================================
// 目标:
// - 统一所有 Connection::open 的 PRAGMA 行为，避免“部分模块外键开启/部分不开启”
// - 统一 busy_timeout，减少并发写入时的偶发 busy 错误
// - 提供幂等建表入口，测试与生产共用同一份 schema
// ==========================================

use rusqlite::Connection;
use rusqlite::OptionalExtension;
use std::time::Duration;

/// 默认 busy_timeout（毫秒）
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// 当前代码所期望的 schema_version
///
/// 说明：
/// - 版本号用于**提示/告警**（不做自动迁移），避免静默在旧库上运行导致隐性错误。
pub const CURRENT_SCHEMA_VERSION: i64 = 1;

/// 配置 SQLite 连接的统一 PRAGMA
///
/// 说明：
/// - foreign_keys 需要“每个连接”单独开启
/// - busy_timeout 需要“每个连接”单独配置
pub fn configure_sqlite_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))?;
    Ok(())
}

/// 打开 SQLite 连接并应用统一配置
pub fn open_sqlite_connection(db_path: &str) -> rusqlite::Result<Connection> {
    let conn = Connection::open(db_path)?;
    configure_sqlite_connection(&conn)?;
    Ok(conn)
}

/// 读取 schema_version（若表不存在则返回 None）
pub fn read_schema_version(conn: &Connection) -> rusqlite::Result<Option<i64>> {
    let has_table: bool = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version' LIMIT 1",
            [],
            |_row| Ok(true),
        )
        .optional()?
        .unwrap_or(false);

    if !has_table {
        return Ok(None);
    }

    let v: Option<i64> = conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))?;
    Ok(v)
}

/// 幂等初始化数据库结构
///
/// 协作方主数据（student / teacher / classroom / class_plan）只保留
/// 引擎需要读取的字段；完整档案由外部系统维护。
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS student (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'active'
        );

        CREATE TABLE IF NOT EXISTS teacher (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'active'
        );

        CREATE TABLE IF NOT EXISTS classroom (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            capacity INTEGER
        );

        CREATE TABLE IF NOT EXISTS class_plan (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            course_id INTEGER,
            campus_id INTEGER,
            head_teacher_id INTEGER,
            classroom_id INTEGER,
            current_students INTEGER NOT NULL DEFAULT 0,
            max_students INTEGER NOT NULL DEFAULT 0,
            total_lessons INTEGER NOT NULL DEFAULT 0,
            completed_lessons INTEGER NOT NULL DEFAULT 0,
            status TEXT NOT NULL DEFAULT 'active',
            start_date TEXT,
            end_date TEXT
        );

        CREATE TABLE IF NOT EXISTS enrollment (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            student_id INTEGER NOT NULL REFERENCES student(id),
            class_plan_id INTEGER NOT NULL REFERENCES class_plan(id),
            status TEXT NOT NULL DEFAULT 'active',
            purchased_hours REAL NOT NULL DEFAULT 0,
            used_hours REAL NOT NULL DEFAULT 0,
            enrollment_date TEXT,
            revision INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL DEFAULT (datetime('now', 'localtime')),
            updated_at TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_enrollment_plan_status
          ON enrollment(class_plan_id, status);
        CREATE INDEX IF NOT EXISTS idx_enrollment_student
          ON enrollment(student_id, class_plan_id);

        CREATE TABLE IF NOT EXISTS schedule (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            class_plan_id INTEGER NOT NULL REFERENCES class_plan(id),
            teacher_id INTEGER,
            classroom_id INTEGER,
            schedule_date TEXT NOT NULL,
            start_time TEXT NOT NULL,
            end_time TEXT NOT NULL,
            lesson_hours REAL NOT NULL DEFAULT 2.0,
            status TEXT NOT NULL DEFAULT 'scheduled',
            batch_no TEXT,
            title TEXT,
            notes TEXT,
            created_by TEXT NOT NULL DEFAULT '',
            updated_by TEXT,
            created_at TEXT NOT NULL DEFAULT (datetime('now', 'localtime')),
            updated_at TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_schedule_teacher_date
          ON schedule(teacher_id, schedule_date);
        CREATE INDEX IF NOT EXISTS idx_schedule_classroom_date
          ON schedule(classroom_id, schedule_date);
        CREATE INDEX IF NOT EXISTS idx_schedule_plan_date
          ON schedule(class_plan_id, schedule_date);
        CREATE INDEX IF NOT EXISTS idx_schedule_batch
          ON schedule(batch_no);

        CREATE TABLE IF NOT EXISTS student_attendance (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            enrollment_id INTEGER NOT NULL REFERENCES enrollment(id),
            schedule_id INTEGER NOT NULL REFERENCES schedule(id),
            student_id INTEGER NOT NULL,
            class_plan_id INTEGER NOT NULL,
            status TEXT NOT NULL,
            leave_reason TEXT,
            apply_time TEXT,
            deduct_hours INTEGER NOT NULL DEFAULT 0,
            marked_by TEXT,
            marked_at TEXT,
            notes TEXT,
            UNIQUE (enrollment_id, schedule_id)
        );

        CREATE INDEX IF NOT EXISTS idx_attendance_schedule
          ON student_attendance(schedule_id);

        CREATE TABLE IF NOT EXISTS lesson_record (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            enrollment_id INTEGER NOT NULL REFERENCES enrollment(id),
            schedule_id INTEGER,
            record_date TEXT NOT NULL,
            hours REAL NOT NULL,
            record_type TEXT NOT NULL,
            notes TEXT,
            created_by TEXT NOT NULL DEFAULT '',
            created_at TEXT NOT NULL DEFAULT (datetime('now', 'localtime'))
        );

        CREATE INDEX IF NOT EXISTS idx_lesson_record_enrollment
          ON lesson_record(enrollment_id);
        CREATE INDEX IF NOT EXISTS idx_lesson_record_schedule
          ON lesson_record(schedule_id);

        CREATE TABLE IF NOT EXISTS action_log (
            action_id TEXT PRIMARY KEY,
            action_type TEXT NOT NULL,
            operator TEXT NOT NULL,
            payload_json TEXT,
            created_at TEXT NOT NULL DEFAULT (datetime('now', 'localtime'))
        );

        CREATE TABLE IF NOT EXISTS config_kv (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at TEXT NOT NULL DEFAULT (datetime('now', 'localtime'))
        );

        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now', 'localtime'))
        );

        INSERT OR IGNORE INTO schema_version (version) VALUES (1);
        "#,
    )?;
    Ok(())
}
