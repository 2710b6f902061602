// ==========================================
// 测试辅助函数
// ==========================================
// 职责: 提供测试所需的数据库初始化、基础数据种子等功能
// 说明: 学生/教师/教室/班级由外部系统维护, 测试里直接写表
// ==========================================

use rusqlite::{params, Connection};
use std::error::Error;
use tempfile::NamedTempFile;

use class_schedule_engine::db::{init_schema, open_sqlite_connection};

/// 创建临时测试数据库并初始化 schema
///
/// # 返回
/// - NamedTempFile: 临时数据库文件（需要保持存活）
/// - String: 数据库文件路径
pub fn create_test_db() -> Result<(NamedTempFile, String), Box<dyn Error>> {
    let temp_file = NamedTempFile::new()?;
    let db_path = temp_file.path().to_str().unwrap().to_string();

    let conn = open_sqlite_connection(&db_path)?;
    init_schema(&conn)?;

    Ok((temp_file, db_path))
}

/// 插入学生, 返回 id
pub fn seed_student(conn: &Connection, name: &str) -> Result<i64, Box<dyn Error>> {
    conn.execute("INSERT INTO student (name) VALUES (?1)", params![name])?;
    Ok(conn.last_insert_rowid())
}

/// 插入教师, 返回 id
pub fn seed_teacher(conn: &Connection, name: &str) -> Result<i64, Box<dyn Error>> {
    conn.execute("INSERT INTO teacher (name) VALUES (?1)", params![name])?;
    Ok(conn.last_insert_rowid())
}

/// 插入教室, 返回 id
pub fn seed_classroom(conn: &Connection, name: &str) -> Result<i64, Box<dyn Error>> {
    conn.execute(
        "INSERT INTO classroom (name, capacity) VALUES (?1, 30)",
        params![name],
    )?;
    Ok(conn.last_insert_rowid())
}

/// 插入班级计划, 返回 id
pub fn seed_class_plan(conn: &Connection, name: &str) -> Result<i64, Box<dyn Error>> {
    conn.execute(
        "INSERT INTO class_plan (name, status) VALUES (?1, 'active')",
        params![name],
    )?;
    Ok(conn.last_insert_rowid())
}

/// 插入在读报名, 返回 id
pub fn seed_enrollment(
    conn: &Connection,
    student_id: i64,
    class_plan_id: i64,
    purchased_hours: f64,
    used_hours: f64,
) -> Result<i64, Box<dyn Error>> {
    conn.execute(
        r#"INSERT INTO enrollment (student_id, class_plan_id, status, purchased_hours, used_hours, enrollment_date)
           VALUES (?1, ?2, 'active', ?3, ?4, '2024-05-01')"#,
        params![student_id, class_plan_id, purchased_hours, used_hours],
    )?;
    Ok(conn.last_insert_rowid())
}

/// 直接插入一条排课 (绕过冲突检测, 用于构造"他人已占用"的场景), 返回 id
#[allow(clippy::too_many_arguments)]
pub fn seed_schedule(
    conn: &Connection,
    class_plan_id: i64,
    teacher_id: Option<i64>,
    classroom_id: Option<i64>,
    schedule_date: &str,
    start_time: &str,
    end_time: &str,
    lesson_hours: f64,
) -> Result<i64, Box<dyn Error>> {
    conn.execute(
        r#"INSERT INTO schedule
             (class_plan_id, teacher_id, classroom_id, schedule_date, start_time, end_time,
              lesson_hours, status, created_by)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'scheduled', 'seed')"#,
        params![
            class_plan_id,
            teacher_id,
            classroom_id,
            schedule_date,
            start_time,
            end_time,
            lesson_hours
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// 读取报名的 (used_hours, revision)
pub fn read_enrollment_hours(
    conn: &Connection,
    enrollment_id: i64,
) -> Result<(f64, i64), Box<dyn Error>> {
    let row = conn.query_row(
        "SELECT used_hours, revision FROM enrollment WHERE id = ?1",
        params![enrollment_id],
        |row| Ok((row.get::<_, f64>(0)?, row.get::<_, i64>(1)?)),
    )?;
    Ok(row)
}

/// 统计某报名的课时流水条数
pub fn count_lesson_records(conn: &Connection, enrollment_id: i64) -> Result<i64, Box<dyn Error>> {
    let n = conn.query_row(
        "SELECT COUNT(*) FROM lesson_record WHERE enrollment_id = ?1",
        params![enrollment_id],
        |row| row.get::<_, i64>(0),
    )?;
    Ok(n)
}
