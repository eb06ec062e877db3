// ==========================================
// 并发导入测试
// ==========================================
// 测试目标: 高并发下同一记录只被写一次 / 进度单调到达总数 / 取消后停止派发
// ==========================================

mod test_helpers;

use exam_reconcile::config::ImportConfig;
use exam_reconcile::domain::ImportProgress;
use exam_reconcile::importer::{ScheduleImporter, ScheduleImporterImpl};
use exam_reconcile::repository::{InMemoryRecordStore, RecordStore};
use exam_reconcile::SourceFormat;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use test_helpers::record;

const LINK: &str = "https://meet.example/p101";
const STUDENTS: usize = 40;

fn seeded_store() -> Arc<InMemoryRecordStore> {
    let records = (1..=STUDENTS)
        .map(|i| record(&format!("r{i}"), &format!("SV{i:03}"), "P101"))
        .collect();
    Arc::new(InMemoryRecordStore::with_records(records))
}

fn schedule_csv(group_rows: usize) -> String {
    let mut csv = String::from("MSSV,Ngày thi,Môn thi,Ca thi,Phòng thi,Link\n");
    for i in 1..=STUDENTS {
        csv.push_str(&format!(
            "SV{i:03},01/05/2024,Toán cao cấp,Sáng,P101,{LINK}\n"
        ));
        if i % (STUDENTS / group_rows.max(1)) == 0 {
            csv.push_str(&format!(",01/05/2024,Toán cao cấp,Sáng,P101,{LINK}\n"));
        }
    }
    csv
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_each_record_written_once_under_contention() {
    let store = seeded_store();
    let max_done = Arc::new(AtomicUsize::new(0));
    let seen = max_done.clone();

    let importer = ScheduleImporterImpl::new(
        store.clone(),
        ImportConfig::default().with_concurrency(16),
    )
    .with_progress(Arc::new(move |p: ImportProgress| {
        assert!(p.done <= p.total);
        seen.fetch_max(p.done, Ordering::SeqCst);
    }));

    let csv = schedule_csv(4);
    let report = importer
        .import_bytes(csv.as_bytes(), SourceFormat::Csv)
        .await
        .unwrap();

    assert_eq!(report.total_count, STUDENTS + 4);
    assert_eq!(report.processed_count, report.total_count);
    assert_eq!(max_done.load(Ordering::SeqCst), report.total_count);
    assert_eq!(report.error_count, 0);
    assert!(report.link_conflicts.is_empty());
    // 每条记录的链接只写入一次: 学号行补全或分组行传播,二者之一
    assert_eq!(report.updated_count + report.link_updated_count, STUDENTS);

    for r in store.list_all().await.unwrap() {
        assert_eq!(r.exam_link.as_deref(), Some(LINK));
    }

    let again = importer
        .import_bytes(csv.as_bytes(), SourceFormat::Csv)
        .await
        .unwrap();
    assert!(!again.has_writes());
    assert_eq!(again.duplicate_count, again.total_count);
}

#[tokio::test]
async fn test_cancel_stops_dispatch() {
    let store = seeded_store();
    let importer =
        ScheduleImporterImpl::new(store.clone(), ImportConfig::default().with_concurrency(2));
    let cancel = importer.cancel_flag();
    let importer = importer.with_progress(Arc::new(move |p: ImportProgress| {
        if p.done >= 5 {
            cancel.cancel();
        }
    }));

    let report = importer
        .import_bytes(schedule_csv(1).as_bytes(), SourceFormat::Csv)
        .await
        .unwrap();

    assert!(report.cancelled);
    assert!(report.processed_count >= 5);
    assert!(report.processed_count < report.total_count);

    // 未派发的行不产生写入
    let linked = store
        .list_all()
        .await
        .unwrap()
        .into_iter()
        .filter(|r| r.exam_link.is_some())
        .count();
    assert!(linked <= report.processed_count);
}
