// ==========================================
// 过期课次清扫测试
// ==========================================
// 职责: 验证按截止日期自动完成课次的范围、防重与幂等
// ==========================================

#[path = "test_helpers.rs"]
mod test_helpers;

#[cfg(test)]
mod overdue_sweep_test {
    use class_schedule_engine::api::{
        ApiError, AttendanceApi, MarkAttendanceRequest, ScheduleApi, ScheduleUpdate,
    };
    use class_schedule_engine::config::ConfigManager;
    use class_schedule_engine::db::open_sqlite_connection;
    use class_schedule_engine::domain::types::{AttendanceStatus, ScheduleStatus};
    use class_schedule_engine::repository::{
        ActionLogRepository, AttendanceRepository, ClassPlanRepository, EnrollmentRepository,
        LessonRecordRepository, MasterDataRepository, ScheduleRepository,
    };
    use std::sync::{Arc, Mutex};
    use tempfile::NamedTempFile;

    use crate::test_helpers::{
        count_lesson_records, create_test_db, read_enrollment_hours, seed_class_plan,
        seed_enrollment, seed_schedule, seed_student,
    };

    // ==========================================
    // 测试辅助函数
    // ==========================================

    /// 创建测试环境
    fn setup_test_env() -> (NamedTempFile, String, Arc<ScheduleApi>, Arc<AttendanceApi>) {
        let (temp_file, db_path) = create_test_db().unwrap();

        let conn = Arc::new(Mutex::new(open_sqlite_connection(&db_path).unwrap()));
        let schedule_repo = Arc::new(ScheduleRepository::from_connection(conn.clone()));
        let class_plan_repo = Arc::new(ClassPlanRepository::from_connection(conn.clone()));
        let enrollment_repo = Arc::new(EnrollmentRepository::from_connection(conn.clone()));
        let attendance_repo = Arc::new(AttendanceRepository::from_connection(conn.clone()));
        let lesson_record_repo = Arc::new(LessonRecordRepository::from_connection(conn.clone()));
        let master_repo = Arc::new(MasterDataRepository::from_connection(conn.clone()));
        let action_log_repo = Arc::new(ActionLogRepository::from_connection(conn.clone()));
        let config_manager = Arc::new(ConfigManager::from_connection(conn.clone()).unwrap());

        let attendance_api = Arc::new(AttendanceApi::new(
            attendance_repo.clone(),
            enrollment_repo.clone(),
            lesson_record_repo.clone(),
            schedule_repo.clone(),
            master_repo.clone(),
            action_log_repo.clone(),
            config_manager.clone(),
        ));
        let schedule_api = Arc::new(ScheduleApi::new(
            schedule_repo,
            class_plan_repo,
            enrollment_repo,
            attendance_repo,
            master_repo,
            action_log_repo,
            config_manager,
            attendance_api.clone(),
        ));

        (temp_file, db_path, schedule_api, attendance_api)
    }

    // ==========================================
    // 测试1: 只清扫截止日之前的待上课次
    // ==========================================

    #[test]
    fn test_sweep_completes_only_past_scheduled_sessions() {
        let (_temp_file, db_path, schedule_api, _attendance_api) = setup_test_env();
        let conn = open_sqlite_connection(&db_path).unwrap();

        // 1. 四节课横跨清扫截止线 (as_of 6/10 → 截止 6/9)
        let plan_id = seed_class_plan(&conn, "初一数学班").unwrap();
        let s1 = seed_student(&conn, "张三").unwrap();
        let e1 = seed_enrollment(&conn, s1, plan_id, 20.0, 0.0).unwrap();
        for date in ["2024-06-03", "2024-06-09", "2024-06-10", "2024-06-12"] {
            seed_schedule(&conn, plan_id, None, None, date, "09:00", "10:30", 1.5).unwrap();
        }

        // 2. 清扫
        let response = schedule_api.complete_overdue("2024-06-10", "cli").unwrap();
        assert_eq!(response.completed_count, 2);
        assert_eq!(response.records_created, 2);
        assert!(response.failures.is_empty());

        // 3. 6/3 与 6/9 完成, 6/10 与 6/12 保持待上
        let schedules = schedule_api.list_by_class_plan(plan_id, None, None).unwrap();
        for schedule in &schedules {
            let date = schedule.schedule_date.format("%Y-%m-%d").to_string();
            if date.as_str() < "2024-06-10" {
                assert_eq!(schedule.status, ScheduleStatus::Completed, "日期: {}", date);
            } else {
                assert_eq!(schedule.status, ScheduleStatus::Scheduled, "日期: {}", date);
            }
        }

        // 4. 两节课各扣 1.5
        let (used, _) = read_enrollment_hours(&conn, e1).unwrap();
        assert!((used - 3.0).abs() < 1e-9);
    }

    // ==========================================
    // 测试2: 已有扣费记录的学生不会被扣第二次
    // ==========================================

    #[test]
    fn test_sweep_never_double_deducts_marked_students() {
        let (_temp_file, db_path, schedule_api, attendance_api) = setup_test_env();
        let conn = open_sqlite_connection(&db_path).unwrap();

        // 1. 一节过期课, 张三课前已被点名扣费, 李四未点
        let plan_id = seed_class_plan(&conn, "初一数学班").unwrap();
        let s1 = seed_student(&conn, "张三").unwrap();
        let s2 = seed_student(&conn, "李四").unwrap();
        let e1 = seed_enrollment(&conn, s1, plan_id, 20.0, 0.0).unwrap();
        let e2 = seed_enrollment(&conn, s2, plan_id, 20.0, 0.0).unwrap();
        let schedule_id = seed_schedule(
            &conn, plan_id, None, None, "2024-06-03", "09:00", "10:30", 1.5,
        )
        .unwrap();

        attendance_api
            .mark(
                MarkAttendanceRequest {
                    enrollment_id: e1,
                    schedule_id,
                    status: AttendanceStatus::Normal,
                    deduct_hours: None,
                    notes: None,
                },
                "admin",
            )
            .unwrap();

        // 2. 清扫只给李四补记录
        let response = schedule_api.complete_overdue("2024-06-10", "cli").unwrap();
        assert_eq!(response.completed_count, 1);
        assert_eq!(response.records_created, 1);

        let (used1, _) = read_enrollment_hours(&conn, e1).unwrap();
        let (used2, _) = read_enrollment_hours(&conn, e2).unwrap();
        assert!((used1 - 1.5).abs() < 1e-9, "已扣费的不再扣");
        assert!((used2 - 1.5).abs() < 1e-9);
        assert_eq!(count_lesson_records(&conn, e1).unwrap(), 1);
        assert_eq!(count_lesson_records(&conn, e2).unwrap(), 1);
    }

    // ==========================================
    // 测试3: 清扫幂等
    // ==========================================

    #[test]
    fn test_sweep_is_idempotent() {
        let (_temp_file, db_path, schedule_api, _attendance_api) = setup_test_env();
        let conn = open_sqlite_connection(&db_path).unwrap();

        let plan_id = seed_class_plan(&conn, "初一数学班").unwrap();
        let s1 = seed_student(&conn, "张三").unwrap();
        let e1 = seed_enrollment(&conn, s1, plan_id, 20.0, 0.0).unwrap();
        seed_schedule(&conn, plan_id, None, None, "2024-06-03", "09:00", "10:30", 1.5).unwrap();

        // 1. 第一次清扫动一次
        let first = schedule_api.complete_overdue("2024-06-10", "cli").unwrap();
        assert_eq!(first.completed_count, 1);
        assert_eq!(first.records_created, 1);

        // 2. 第二次无事可做
        let second = schedule_api.complete_overdue("2024-06-10", "cli").unwrap();
        assert_eq!(second.completed_count, 0);
        assert_eq!(second.records_created, 0);

        let (used, _) = read_enrollment_hours(&conn, e1).unwrap();
        assert!((used - 1.5).abs() < 1e-9);
        assert_eq!(count_lesson_records(&conn, e1).unwrap(), 1);
    }

    // ==========================================
    // 测试4: 已取消的过期课次不被清扫
    // ==========================================

    #[test]
    fn test_sweep_ignores_cancelled_sessions() {
        let (_temp_file, db_path, schedule_api, _attendance_api) = setup_test_env();
        let conn = open_sqlite_connection(&db_path).unwrap();

        let plan_id = seed_class_plan(&conn, "初一数学班").unwrap();
        let s1 = seed_student(&conn, "张三").unwrap();
        let e1 = seed_enrollment(&conn, s1, plan_id, 20.0, 0.0).unwrap();
        let schedule_id = seed_schedule(
            &conn, plan_id, None, None, "2024-06-03", "09:00", "10:30", 1.5,
        )
        .unwrap();

        schedule_api
            .update_schedule(
                schedule_id,
                ScheduleUpdate {
                    status: Some(ScheduleStatus::Cancelled),
                    ..Default::default()
                },
                "admin",
            )
            .unwrap();

        let response = schedule_api.complete_overdue("2024-06-10", "cli").unwrap();
        assert_eq!(response.completed_count, 0);
        assert_eq!(response.records_created, 0);

        let (used, _) = read_enrollment_hours(&conn, e1).unwrap();
        assert!(used.abs() < 1e-9);
    }

    // ==========================================
    // 测试5: 截止日期入参校验
    // ==========================================

    #[test]
    fn test_sweep_rejects_invalid_date() {
        let (_temp_file, _db_path, schedule_api, _attendance_api) = setup_test_env();

        let result = schedule_api.complete_overdue("2024/06/10", "cli");
        assert!(matches!(result, Err(ApiError::ValidationError(_))));
    }
}
