mod common;

use std::fs;
use std::io::Read;
use std::path::Path;

use chrono::NaiveDate;
use zip::ZipArchive;

use common::{FakeDatabase, FakeTable, WindowCall, connection, refuse_connection};
use sqlbak_core::{
    ArchiveStatus, BackupRequest, CellValue, ExportConfig, ExportError, ExportStatus, NoProgress, Stage, TableFilter,
    run_backup_with, run_with,
};

const SCRIPT: &str = "FAC01_2024-01-01-00-00-00.sql";

fn config(folder: &Path) -> ExportConfig {
    ExportConfig::new(connection(), folder, SCRIPT)
}

fn patients() -> FakeTable {
    FakeTable::new("t", &[("id", "int"), ("name", "text"), ("flag", "tinyint(1)")])
        .row(vec![CellValue::Int(1), CellValue::Bytes(b"O'Brien".to_vec()), CellValue::Int(1)])
        .row(vec![CellValue::Int(2), CellValue::Null, CellValue::Int(0)])
}

fn numbered(
    name: &str,
    count: i64,
) -> FakeTable {
    (1..=count).fold(FakeTable::new(name, &[("id", "int")]), |table, id| {
        table.row(vec![CellValue::Int(id)])
    })
}

#[test]
fn full_export_writes_sections_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let db = FakeDatabase::new()
        .table(patients())
        .view("v", "CREATE VIEW `v` AS select `t`.`id` AS `id` from `t`")
        .procedure("p", Some("CREATE PROCEDURE `p`()\nBEGIN\n  SELECT 1;\nEND"))
        .function("f", Some("CREATE FUNCTION `f`() RETURNS int\nRETURN 1;"));

    let mut stages = vec![];
    let mut sink = |stage: Stage, _: &str| stages.push(stage);
    let result = run_with(&config(dir.path()), db.connector(), &mut sink);

    assert_eq!(result.status, ExportStatus::Complete);
    assert!(result.error.is_none());
    assert_eq!(result.tables.len(), 1);
    assert_eq!(result.tables[0].rows, 2);
    assert_eq!(
        stages,
        vec![
            Stage::Connected,
            Stage::IntrospectionComplete,
            Stage::TableComplete,
            Stage::ViewsComplete,
            Stage::RoutinesComplete,
            Stage::ExportComplete,
        ]
    );

    let script = fs::read_to_string(dir.path().join(SCRIPT)).unwrap();
    assert!(script.starts_with("/*\n * Source: mysql://db:3306/openmrs\n"));
    assert!(!script.contains("secret"));

    let order = [
        "SET FOREIGN_KEY_CHECKS=0;\n",
        "-- Structure for table `t`\nDROP TABLE IF EXISTS `t`;\nCREATE TABLE `t`",
        "-- Data for table `t`\n",
        "INSERT INTO `t` (id, name, flag) VALUES (1, 'O\\'Brien', 1), (2, NULL, 0);\n",
        "-- Definition for view `v`\nCREATE VIEW `v` AS select `t`.`id` AS `id` from `t`;\n",
        "-- Stored Procedure: p\nDELIMITER $$\nCREATE PROCEDURE `p`()\nBEGIN\n  SELECT 1;\nEND $$\nDELIMITER ;\n",
        "-- Stored Function: f\nDELIMITER $$\n",
        "SET FOREIGN_KEY_CHECKS=1;\n",
    ];
    let mut last = 0;
    for piece in order {
        let at = script[last..]
            .find(piece)
            .unwrap_or_else(|| panic!("missing or out of order: {:?}", piece));
        last += at + piece.len();
    }
    assert_eq!(last, script.len());
}

#[test]
fn windows_are_disjoint_and_cover_the_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let db = FakeDatabase::new().table(numbered("obs", 25));

    let result = run_with(&config(dir.path()).window_size(10), db.connector(), &mut NoProgress);

    assert_eq!(result.status, ExportStatus::Complete);
    assert_eq!(result.tables[0].rows, 25);

    let calls: Vec<(u64, u64)> = db.window_calls().iter().map(|c| (c.offset, c.limit)).collect();
    assert_eq!(calls, vec![(0, 10), (10, 10), (20, 5)]);

    let script = fs::read_to_string(dir.path().join(SCRIPT)).unwrap();
    assert_eq!(script.matches("INSERT INTO `obs`").count(), 3);
    for id in 1..=25 {
        assert_eq!(script.matches(&format!("({})", id)).count(), 1, "row {}", id);
    }
}

#[test]
fn empty_window_writes_no_insert() {
    let dir = tempfile::tempdir().unwrap();
    let mut shrinking = numbered("encounter", 5);
    shrinking.reported_rows = Some(15);
    let db = FakeDatabase::new().table(shrinking).table(numbered("empty", 0));

    let result = run_with(&config(dir.path()).window_size(10), db.connector(), &mut NoProgress);

    assert_eq!(result.status, ExportStatus::Complete);
    assert_eq!(result.tables[0].rows, 5);
    assert_eq!(result.tables[1].rows, 0);
    assert_eq!(
        db.window_calls(),
        vec![
            WindowCall {
                table: "encounter".into(),
                offset: 0,
                limit: 10
            },
            WindowCall {
                table: "encounter".into(),
                offset: 10,
                limit: 5
            },
        ]
    );

    let script = fs::read_to_string(dir.path().join(SCRIPT)).unwrap();
    assert_eq!(script.matches("INSERT INTO").count(), 1);
    assert!(script.contains("-- Data for table `empty`\n"));
    assert!(!script.contains("VALUES ;"));
}

#[test]
fn rows_added_after_snapshot_are_not_exported() {
    let dir = tempfile::tempdir().unwrap();
    let mut growing = numbered("g", 8);
    growing.reported_rows = Some(5);
    let db = FakeDatabase::new().table(growing);

    let result = run_with(&config(dir.path()).window_size(10), db.connector(), &mut NoProgress);

    assert_eq!(result.status, ExportStatus::Complete);
    assert_eq!(result.tables[0].rows, 5);
    assert_eq!(
        db.window_calls(),
        vec![WindowCall {
            table: "g".into(),
            offset: 0,
            limit: 5
        }]
    );

    let script = fs::read_to_string(dir.path().join(SCRIPT)).unwrap();
    assert!(script.contains("INSERT INTO `g` (id) VALUES (1), (2), (3), (4), (5);\n"));
    assert!(!script.contains("(6)"));
}

#[test]
fn failing_table_makes_export_partial() {
    let dir = tempfile::tempdir().unwrap();
    let mut broken = numbered("b", 20);
    broken.fail_window_at = Some(10);
    let db = FakeDatabase::new()
        .table(numbered("a", 3))
        .table(broken)
        .table(numbered("c", 2));

    let result = run_with(&config(dir.path()).window_size(10), db.connector(), &mut NoProgress);

    assert_eq!(result.status, ExportStatus::Partial);
    assert!(result.error.is_none());
    let outcomes: Vec<(&str, u64, bool)> = result
        .tables
        .iter()
        .map(|t| (t.table.as_str(), t.rows, t.is_ok()))
        .collect();
    assert_eq!(outcomes, vec![("a", 3, true), ("b", 10, false), ("c", 2, true)]);

    // 每个已写出的窗口都是完整语句，脚本仍以恢复外键检查结尾
    let script = fs::read_to_string(dir.path().join(SCRIPT)).unwrap();
    assert_eq!(script.matches("INSERT INTO `b`").count(), 1);
    assert!(script.contains("INSERT INTO `c` (id) VALUES (1), (2);\n"));
    assert!(script.ends_with("\nSET FOREIGN_KEY_CHECKS=1;\n"));
}

#[test]
fn connection_failure_fails_without_script() {
    let dir = tempfile::tempdir().unwrap();
    let mut stages = vec![];
    let mut sink = |stage: Stage, _: &str| stages.push(stage);

    let result = run_with(&config(dir.path()), refuse_connection, &mut sink);

    assert_eq!(result.status, ExportStatus::Failed);
    assert!(matches!(result.error, Some(ExportError::Connection(_))));
    assert!(result.tables.is_empty());
    assert!(!dir.path().join(SCRIPT).exists());
    assert_eq!(stages, vec![Stage::Failed]);
}

#[test]
fn introspection_failure_fails_without_script() {
    let dir = tempfile::tempdir().unwrap();
    let db = FakeDatabase {
        fail_table_names: true,
        ..FakeDatabase::new().table(patients())
    };

    let result = run_with(&config(dir.path()), db.connector(), &mut NoProgress);

    assert_eq!(result.status, ExportStatus::Failed);
    assert!(matches!(result.error, Some(ExportError::Introspection(_))));
    assert!(!dir.path().join(SCRIPT).exists());
}

#[test]
fn unusable_folder_is_a_filesystem_error() {
    let dir = tempfile::tempdir().unwrap();
    let occupied = dir.path().join("backup");
    fs::write(&occupied, b"not a directory").unwrap();
    let db = FakeDatabase::new().table(patients());

    let result = run_with(&config(&occupied), db.connector(), &mut NoProgress);

    assert_eq!(result.status, ExportStatus::Failed);
    assert!(matches!(result.error, Some(ExportError::Filesystem { .. })));
}

#[cfg(target_os = "linux")]
#[test]
fn script_write_failure_fails_and_removes_script() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let script_path = config.script_path();
    // 脚本路径指向 /dev/full，任何写入都返回 ENOSPC
    std::os::unix::fs::symlink("/dev/full", &script_path).unwrap();
    let db = FakeDatabase::new().table(patients());

    let mut stages = vec![];
    let mut sink = |stage: Stage, _: &str| stages.push(stage);
    let result = run_with(&config, db.connector(), &mut sink);

    assert_eq!(result.status, ExportStatus::Failed);
    assert!(matches!(result.error, Some(ExportError::Write(_))));
    assert!(result.tables.is_empty());
    assert_eq!(stages.last(), Some(&Stage::Failed));
    assert!(!stages.contains(&Stage::ExportComplete));
    assert!(fs::symlink_metadata(&script_path).is_err());
}

#[test]
fn view_and_routine_failures_are_not_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let db = FakeDatabase {
        fail_views: true,
        ..FakeDatabase::new()
            .table(patients())
            .view("v", "CREATE VIEW `v` AS select 1")
            .procedure("hidden", None)
            .function("f", Some("CREATE FUNCTION `f`() RETURNS int\nRETURN 1;"))
    };

    let result = run_with(&config(dir.path()), db.connector(), &mut NoProgress);

    assert_eq!(result.status, ExportStatus::Partial);
    assert!(result.error.is_none());
    assert!(result.tables.iter().all(|t| t.is_ok()));
    assert_eq!(result.warnings.len(), 2);
    assert!(result.warnings[0].starts_with("视图未导出"));
    assert!(result.warnings[1].contains("hidden"));
    let script = fs::read_to_string(dir.path().join(SCRIPT)).unwrap();
    assert!(!script.contains("-- Definition for view"));
    assert!(!script.contains("hidden"));
    assert!(script.contains("-- Stored Function: f\nDELIMITER $$\nCREATE FUNCTION `f`() RETURNS int\nRETURN 1; $$\nDELIMITER ;\n"));

    let db = FakeDatabase {
        fail_routines: true,
        ..FakeDatabase::new().table(patients()).view("v", "CREATE VIEW `v` AS select 1")
    };
    let result = run_with(&config(dir.path()), db.connector(), &mut NoProgress);

    assert_eq!(result.status, ExportStatus::Partial);
    assert_eq!(result.warnings.len(), 1);
    assert!(result.warnings[0].starts_with("存储过程与函数未导出"));
    let script = fs::read_to_string(dir.path().join(SCRIPT)).unwrap();
    assert!(script.contains("-- Definition for view `v`\n"));
    assert!(!script.contains("DELIMITER"));
}

#[test]
fn table_filters_select_tables() {
    let dir = tempfile::tempdir().unwrap();
    let db = FakeDatabase::new()
        .table(numbered("patient", 1))
        .table(numbered("obs", 1))
        .table(numbered("hl7_in_archive", 1));

    let included = config(dir.path()).tables(TableFilter::from_settings("obs,patient,missing", "obs"));
    let result = run_with(&included, db.connector(), &mut NoProgress);
    let names: Vec<&str> = result.tables.iter().map(|t| t.table.as_str()).collect();
    assert_eq!(names, vec!["patient", "obs"]);

    let excluded = config(dir.path()).tables(TableFilter::from_settings("all", "hl7_in_archive"));
    let result = run_with(&excluded, db.connector(), &mut NoProgress);
    let names: Vec<&str> = result.tables.iter().map(|t| t.table.as_str()).collect();
    assert_eq!(names, vec!["patient", "obs"]);

    let script = fs::read_to_string(dir.path().join(SCRIPT)).unwrap();
    assert!(!script.contains("hl7_in_archive"));
}

#[test]
fn special_values_survive_encoding() {
    let dir = tempfile::tempdir().unwrap();
    let table = FakeTable::new("note", &[("id", "bigint"), ("text", "longtext"), ("content", "blob")]).row(vec![
        CellValue::Int(7),
        CellValue::Text("line1\nline2\t\\ \"quoted\" \u{1a}".into()),
        CellValue::Bytes(vec![0x00, 0xff, 0x27]),
    ]);
    let db = FakeDatabase::new().table(table);

    run_with(&config(dir.path()), db.connector(), &mut NoProgress);

    let script = fs::read_to_string(dir.path().join(SCRIPT)).unwrap();
    assert!(script.contains(
        "INSERT INTO `note` (id, `text`, content) VALUES (7, 'line1\\nline2\\t\\\\ \\\"quoted\\\" \\Z', X'00FF27');\n"
    ));
}

fn request(folder: &Path) -> BackupRequest {
    BackupRequest::new("FAC01", connection(), folder)
}

fn started_at() -> chrono::NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 1, 1)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
}

#[test]
fn backup_produces_archive_and_removes_script() {
    let dir = tempfile::tempdir().unwrap();
    let folder = dir.path().join("nested/backup");
    let db = FakeDatabase::new().table(patients());

    let mut stages = vec![];
    let mut sink = |stage: Stage, _: &str| stages.push(stage);
    let report = run_backup_with(&request(&folder), db.connector(), started_at(), &mut sink);

    assert!(report.succeeded());
    let archive = report.archive.as_ref().unwrap();
    assert_eq!(archive.status, ArchiveStatus::Created);
    assert_eq!(archive.archive_path, folder.join("FAC01_2024-01-01-00-00-00.zip"));
    assert_eq!(
        report.message,
        format!("The backup file is ready at: {}", archive.archive_path.display())
    );
    assert!(!folder.join(SCRIPT).exists());
    assert_eq!(
        &stages[stages.len() - 3..],
        &[Stage::ExportComplete, Stage::PackagingStarted, Stage::PackagingComplete]
    );

    let mut zip = ZipArchive::new(fs::File::open(&archive.archive_path).unwrap()).unwrap();
    assert_eq!(zip.len(), 1);
    let mut entry = zip.by_index(0).unwrap();
    assert_eq!(entry.name(), SCRIPT);
    let mut content = String::new();
    entry.read_to_string(&mut content).unwrap();
    assert!(content.contains("INSERT INTO `t` (id, name, flag) VALUES (1, 'O\\'Brien', 1), (2, NULL, 0);\n"));
}

#[test]
fn partial_backup_is_still_packaged() {
    let dir = tempfile::tempdir().unwrap();
    let mut broken = numbered("b", 5);
    broken.fail_window_at = Some(0);
    let db = FakeDatabase::new().table(numbered("a", 2)).table(broken);

    let report = run_backup_with(&request(dir.path()), db.connector(), started_at(), &mut NoProgress);

    assert_eq!(report.export.status, ExportStatus::Partial);
    assert_eq!(report.archive.as_ref().map(|a| a.status), Some(ArchiveStatus::Created));
    assert!(report.succeeded());
}

#[test]
fn failed_backup_is_not_packaged() {
    let dir = tempfile::tempdir().unwrap();

    let report = run_backup_with(&request(dir.path()), refuse_connection, started_at(), &mut NoProgress);

    assert!(!report.succeeded());
    assert!(report.archive.is_none());
    assert!(report.message.starts_with("The backup failed: "));
    assert!(fs::read_dir(dir.path()).unwrap().next().is_none());
}
