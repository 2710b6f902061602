// ==========================================
// 课时并发控制测试
// ==========================================
// 职责: 验证多线程消课下计数器不丢更新、revision 乐观锁生效
// ==========================================

#[path = "test_helpers.rs"]
mod test_helpers;

#[cfg(test)]
mod concurrent_hours_test {
    use class_schedule_engine::api::{
        ApiError, AttendanceApi, BatchScheduleRequest, DateRangeInput, EnrollmentApi,
        MarkAttendanceRequest, ScheduleApi, TimeSlotInput,
    };
    use class_schedule_engine::config::ConfigManager;
    use class_schedule_engine::db::open_sqlite_connection;
    use class_schedule_engine::domain::types::AttendanceStatus;
    use class_schedule_engine::repository::{
        ActionLogRepository, AttendanceRepository, ClassPlanRepository, EnrollmentRepository,
        LessonRecordRepository, MasterDataRepository, RepositoryError, ScheduleRepository,
    };
    use std::sync::{Arc, Barrier, Mutex};
    use std::thread;
    use tempfile::NamedTempFile;

    use crate::test_helpers::{
        count_lesson_records, create_test_db, read_enrollment_hours, seed_class_plan,
        seed_enrollment, seed_schedule, seed_student,
    };

    // ==========================================
    // 测试辅助函数
    // ==========================================

    /// 创建测试环境
    ///
    /// 并发测试把重试上限调高, 让争用只影响重试次数而不影响最终结果
    fn setup_test_env() -> (
        NamedTempFile,
        String,
        Arc<AttendanceApi>,
        Arc<EnrollmentApi>,
        Arc<ScheduleApi>,
        Arc<EnrollmentRepository>,
    ) {
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
        config_manager.set_config_value("hours.max_retry", "20").unwrap();

        let attendance_api = Arc::new(AttendanceApi::new(
            attendance_repo.clone(),
            enrollment_repo.clone(),
            lesson_record_repo.clone(),
            schedule_repo.clone(),
            master_repo.clone(),
            action_log_repo.clone(),
            config_manager.clone(),
        ));
        let enrollment_api = Arc::new(EnrollmentApi::new(
            enrollment_repo.clone(),
            lesson_record_repo,
            schedule_repo.clone(),
            attendance_repo.clone(),
            class_plan_repo.clone(),
            master_repo.clone(),
            action_log_repo.clone(),
            config_manager.clone(),
        ));
        let schedule_api = Arc::new(ScheduleApi::new(
            schedule_repo,
            class_plan_repo,
            enrollment_repo.clone(),
            attendance_repo,
            master_repo,
            action_log_repo,
            config_manager,
            attendance_api.clone(),
        ));

        (
            temp_file,
            db_path,
            attendance_api,
            enrollment_api,
            schedule_api,
            enrollment_repo,
        )
    }

    // ==========================================
    // 测试1: 并行消课不丢更新
    // ==========================================

    #[test]
    fn test_parallel_marks_do_not_lose_updates() {
        let (_temp_file, db_path, attendance_api, _enrollment_api, _schedule_api, _enrollment_repo) =
            setup_test_env();
        let conn = open_sqlite_connection(&db_path).unwrap();

        // 1. 一名学生八节课
        let plan_id = seed_class_plan(&conn, "初一数学班").unwrap();
        let s1 = seed_student(&conn, "张三").unwrap();
        let enrollment_id = seed_enrollment(&conn, s1, plan_id, 100.0, 0.0).unwrap();

        let mut schedule_ids = Vec::new();
        for day in 3..11 {
            let date = format!("2024-06-{:02}", day);
            let id = seed_schedule(&conn, plan_id, None, None, &date, "09:00", "10:30", 1.5)
                .unwrap();
            schedule_ids.push(id);
        }

        // 2. 八个线程各标一节课
        let mut handles = Vec::new();
        for schedule_id in schedule_ids {
            let api = attendance_api.clone();
            handles.push(thread::spawn(move || {
                api.mark(
                    MarkAttendanceRequest {
                        enrollment_id,
                        schedule_id,
                        status: AttendanceStatus::Normal,
                        deduct_hours: Some(true),
                        notes: None,
                    },
                    "admin",
                )
            }));
        }
        for handle in handles {
            handle.join().unwrap().unwrap();
        }

        // 3. 计数器恰好累计八次, revision 每次加一
        let (used, revision) = read_enrollment_hours(&conn, enrollment_id).unwrap();
        assert!((used - 12.0).abs() < 1e-9, "8次消课共12课时, 实际: {}", used);
        assert_eq!(revision, 8);
        assert_eq!(count_lesson_records(&conn, enrollment_id).unwrap(), 8);
    }

    // ==========================================
    // 测试2: 并行人工调整恰好累计
    // ==========================================

    #[test]
    fn test_parallel_adjusts_accumulate_exactly() {
        let (_temp_file, db_path, _attendance_api, enrollment_api, _schedule_api, _enrollment_repo) =
            setup_test_env();
        let conn = open_sqlite_connection(&db_path).unwrap();

        let plan_id = seed_class_plan(&conn, "初一数学班").unwrap();
        let s1 = seed_student(&conn, "张三").unwrap();
        let enrollment_id = seed_enrollment(&conn, s1, plan_id, 100.0, 0.0).unwrap();

        // 1. 十个线程各补扣 1.0
        let mut handles = Vec::new();
        for i in 0..10 {
            let api = enrollment_api.clone();
            handles.push(thread::spawn(move || {
                api.adjust_hours(enrollment_id, 1.0, Some(format!("批次{}", i)), "admin")
            }));
        }
        for handle in handles {
            handle.join().unwrap().unwrap();
        }

        // 2. 一次不丢
        let (used, revision) = read_enrollment_hours(&conn, enrollment_id).unwrap();
        assert!((used - 10.0).abs() < 1e-9);
        assert_eq!(revision, 10);
        assert_eq!(count_lesson_records(&conn, enrollment_id).unwrap(), 10);
    }

    // ==========================================
    // 测试3: 过期 revision 被拒绝
    // ==========================================

    #[test]
    fn test_stale_revision_rejected() {
        let (_temp_file, db_path, _attendance_api, _enrollment_api, _schedule_api, enrollment_repo) =
            setup_test_env();
        let conn = open_sqlite_connection(&db_path).unwrap();

        let plan_id = seed_class_plan(&conn, "初一数学班").unwrap();
        let s1 = seed_student(&conn, "张三").unwrap();
        let enrollment_id = seed_enrollment(&conn, s1, plan_id, 20.0, 0.0).unwrap();

        // 1. 两次读到同一个 revision
        let snapshot1 = enrollment_repo.find_by_id(enrollment_id).unwrap().unwrap();
        let snapshot2 = enrollment_repo.find_by_id(enrollment_id).unwrap().unwrap();
        assert_eq!(snapshot1.revision, snapshot2.revision);

        // 2. 第一次按旧 revision 更新成功
        enrollment_repo
            .apply_hours_delta(enrollment_id, 1.5, snapshot1.revision)
            .unwrap();

        // 3. 第二次还按旧 revision 更新, 乐观锁拒绝
        let stale = enrollment_repo.apply_hours_delta(enrollment_id, 1.5, snapshot2.revision);
        match stale {
            Err(RepositoryError::OptimisticLockFailure {
                enrollment_id: id, ..
            }) => {
                assert_eq!(id, enrollment_id);
            }
            other => panic!("应返回乐观锁冲突, 实际: {:?}", other),
        }

        // 4. 失败的更新不落账
        let (used, revision) = read_enrollment_hours(&conn, enrollment_id).unwrap();
        assert!((used - 1.5).abs() < 1e-9);
        assert_eq!(revision, 1);
    }

    // ==========================================
    // 测试4: 重试耗尽以并发冲突错误浮出
    // ==========================================

    #[test]
    fn test_lock_failure_surfaces_as_concurrency_conflict() {
        let repo_err = RepositoryError::OptimisticLockFailure {
            enrollment_id: 42,
            expected: 3,
            actual: 5,
        };
        let api_err: ApiError = repo_err.into();
        assert!(matches!(api_err, ApiError::ConcurrencyConflict(_)));

        let not_found = RepositoryError::NotFound {
            entity: "enrollment".to_string(),
            id: "42".to_string(),
        };
        let api_err: ApiError = not_found.into();
        assert!(matches!(api_err, ApiError::NotFound(_)));
    }

    // ==========================================
    // 测试5: 混合并发负载下总账仍然对平
    // ==========================================

    #[test]
    fn test_mixed_concurrent_load_balances() {
        let (_temp_file, db_path, attendance_api, enrollment_api, _schedule_api, _enrollment_repo) =
            setup_test_env();
        let conn = open_sqlite_connection(&db_path).unwrap();

        let plan_id = seed_class_plan(&conn, "初一数学班").unwrap();
        let s1 = seed_student(&conn, "张三").unwrap();
        let enrollment_id = seed_enrollment(&conn, s1, plan_id, 100.0, 0.0).unwrap();

        let mut schedule_ids = Vec::new();
        for day in 3..7 {
            let date = format!("2024-06-{:02}", day);
            let id = seed_schedule(&conn, plan_id, None, None, &date, "09:00", "10:30", 1.5)
                .unwrap();
            schedule_ids.push(id);
        }

        // 1. 四个消课线程 + 四个调整线程同时跑
        let mut handles: Vec<thread::JoinHandle<()>> = Vec::new();
        for schedule_id in schedule_ids {
            let api = attendance_api.clone();
            handles.push(thread::spawn(move || {
                api.mark(
                    MarkAttendanceRequest {
                        enrollment_id,
                        schedule_id,
                        status: AttendanceStatus::Normal,
                        deduct_hours: Some(true),
                        notes: None,
                    },
                    "admin",
                )
                .unwrap();
            }));
        }
        for _ in 0..4 {
            let api = enrollment_api.clone();
            handles.push(thread::spawn(move || {
                api.adjust_hours(enrollment_id, 0.5, None, "admin").unwrap();
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        // 2. 4×1.5 + 4×0.5 = 8.0, 计数器与台账完全一致
        let (used, revision) = read_enrollment_hours(&conn, enrollment_id).unwrap();
        assert!((used - 8.0).abs() < 1e-9, "实际: {}", used);
        assert_eq!(revision, 8);

        let reconciled = enrollment_api.reconcile(enrollment_id).unwrap();
        assert!(!reconciled.repaired, "并发之后台账与计数器不应有偏差");
    }

    // ==========================================
    // 测试6: 余量只够一节时并行消课恰有一个成功
    // ==========================================

    #[test]
    fn test_parallel_marks_with_tight_budget_admit_exactly_one() {
        let (_temp_file, db_path, attendance_api, _enrollment_api, _schedule_api, _enrollment_repo) =
            setup_test_env();
        let conn = open_sqlite_connection(&db_path).unwrap();

        // 1. 已购2课时, 两节各2课时的课, 只够消一节
        let plan_id = seed_class_plan(&conn, "初一数学班").unwrap();
        let s1 = seed_student(&conn, "张三").unwrap();
        let enrollment_id = seed_enrollment(&conn, s1, plan_id, 2.0, 0.0).unwrap();
        let sched_a =
            seed_schedule(&conn, plan_id, None, None, "2024-06-03", "09:00", "11:00", 2.0).unwrap();
        let sched_b =
            seed_schedule(&conn, plan_id, None, None, "2024-06-04", "09:00", "11:00", 2.0).unwrap();

        // 2. 两个线程同时起跑各消一节
        let barrier = Arc::new(Barrier::new(2));
        let mut handles = Vec::new();
        for schedule_id in [sched_a, sched_b] {
            let api = attendance_api.clone();
            let barrier = barrier.clone();
            handles.push(thread::spawn(move || {
                barrier.wait();
                api.mark(
                    MarkAttendanceRequest {
                        enrollment_id,
                        schedule_id,
                        status: AttendanceStatus::Normal,
                        deduct_hours: Some(true),
                        notes: None,
                    },
                    "admin",
                )
            }));
        }
        let results: Vec<_> = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .collect();

        // 3. 恰有一个成功, 落败方以课时不足报错
        let ok_count = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(ok_count, 1, "余量只够一节, 不得两个都成功: {:?}", results);
        let failure = results.into_iter().find(|r| r.is_err()).unwrap();
        match failure {
            Err(ApiError::InsufficientHours { enrollment_ids }) => {
                assert_eq!(enrollment_ids, vec![enrollment_id]);
            }
            other => panic!("应返回课时不足, 实际: {:?}", other),
        }

        // 4. 计数器与台账恰好记了一节, 失败的标记不留考勤行
        let (used, _) = read_enrollment_hours(&conn, enrollment_id).unwrap();
        assert!((used - 2.0).abs() < 1e-9, "实际: {}", used);
        assert_eq!(count_lesson_records(&conn, enrollment_id).unwrap(), 1);
        let attendance_count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM student_attendance WHERE enrollment_id = ?1",
                [enrollment_id],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(attendance_count, 1, "回滚的标记不应留下考勤行");
    }

    // ==========================================
    // 测试7: 余量只够一批时并行排课恰有一批落库
    // ==========================================

    #[test]
    fn test_parallel_commits_with_tight_budget_admit_exactly_one() {
        let (_temp_file, db_path, _attendance_api, _enrollment_api, schedule_api, _enrollment_repo) =
            setup_test_env();
        let conn = open_sqlite_connection(&db_path).unwrap();

        // 1. 已购2课时, 两个批次各要排2课时, 只装得下一批
        let plan_id = seed_class_plan(&conn, "初一数学班").unwrap();
        let s1 = seed_student(&conn, "张三").unwrap();
        let enrollment_id = seed_enrollment(&conn, s1, plan_id, 2.0, 0.0).unwrap();

        // 2024-06-03 是周一, 2024-06-04 是周二, 两批各生成一节
        let requests = [
            ("2024-06-03", 0u8),
            ("2024-06-04", 1u8),
        ]
        .map(|(date, weekday)| BatchScheduleRequest {
            class_plan_id: plan_id,
            teacher_id: None,
            classroom_id: None,
            date_ranges: vec![DateRangeInput {
                start_date: date.to_string(),
                end_date: date.to_string(),
            }],
            time_slots: vec![TimeSlotInput {
                weekdays: vec![weekday],
                start_time: "09:00".to_string(),
                end_time: "11:00".to_string(),
            }],
            lesson_hours: Some(2.0),
            max_count: None,
            title: None,
            notes: None,
            hour_bounded: false,
        });

        // 2. 两个批次同时提交
        let barrier = Arc::new(Barrier::new(2));
        let mut handles = Vec::new();
        for request in requests {
            let api = schedule_api.clone();
            let barrier = barrier.clone();
            handles.push(thread::spawn(move || {
                barrier.wait();
                api.commit_batch(request, "admin")
            }));
        }
        let results: Vec<_> = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .collect();

        // 3. 恰有一批落库, 落败方以课时不足报错
        let ok_count = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(ok_count, 1, "余量只够一批, 不得两批都落库");
        match results.into_iter().find(|r| r.is_err()).unwrap() {
            Err(ApiError::InsufficientHours { enrollment_ids }) => {
                assert_eq!(enrollment_ids, vec![enrollment_id]);
            }
            other => panic!("应返回课时不足, 实际: {:?}", other),
        }

        // 4. 库里恰好一节, 待扣合计没有超出已购
        let schedule_count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM schedule WHERE class_plan_id = ?1",
                [plan_id],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(schedule_count, 1);
    }
}
