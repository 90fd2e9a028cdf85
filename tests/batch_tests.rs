mod common;

use bytes::Bytes;
use common::FakeSource;
use easyeda_convertlib::{
    BatchEvent, BatchExporter, CancelFlag, ExportOptions, ExportRequest, Outcome,
};
use std::fs;
use std::path::Path;
use std::sync::atomic::Ordering;
use std::time::Duration;

const OBJ: &str = "newmtl body\nKd 0.2 0.2 0.2\nendmtl\nv 0 0 0\nv 2.54 0 0\nv 0 2.54 0\nusemtl body\nf 1 2 3\n";

fn request(ids: &[&str], root: &Path, options: ExportOptions) -> ExportRequest {
    ExportRequest {
        component_ids: ids.iter().map(|id| id.to_string()).collect(),
        options,
        export_path: Some(root.to_path_buf()),
        file_prefix: Some("parts".to_string()),
    }
}

fn symbol_only() -> ExportOptions {
    ExportOptions {
        symbol: true,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_missing_model_gives_partial_success() {
    let dir = tempfile::tempdir().unwrap();
    let source = FakeSource::default().with_component("C7593", "NE555");
    let options = ExportOptions {
        symbol: true,
        footprint: true,
        model3d: true,
        ..Default::default()
    };

    let report = BatchExporter::new(source)
        .export(request(&["C7593"], dir.path(), options))
        .await
        .unwrap();
    assert_eq!(report.total, 1);
    assert_eq!(report.partial_count, 1);

    let result = &report.results[0];
    assert_eq!(result.success, Outcome::Partial);
    let json = serde_json::to_value(result).unwrap();
    assert_eq!(json["componentId"], "C7593");
    assert_eq!(json["success"], "partial");
    assert_eq!(json["export_status"]["symbol"]["success"], true);
    assert_eq!(json["export_status"]["footprint"]["success"], true);
    assert_eq!(json["export_status"]["model3d"]["success"], false);

    assert!(dir.path().join("parts.kicad_sym").exists());
    assert!(dir.path().join("parts.pretty").join("SOT-23-5.kicad_mod").exists());
}

#[tokio::test]
async fn test_full_export_writes_every_artifact() {
    let dir = tempfile::tempdir().unwrap();
    let source = FakeSource {
        obj: Some(OBJ.to_string()),
        datasheet: Some(Bytes::from_static(b"%PDF-1.4 datasheet")),
        ..Default::default()
    }
    .with_component("C7593", "NE555");
    let options = ExportOptions {
        symbol: true,
        footprint: true,
        model3d: true,
        datasheet: true,
        ..Default::default()
    };

    let report = BatchExporter::new(source)
        .export(request(&["C7593"], dir.path(), options))
        .await
        .unwrap();
    let result = &report.results[0];
    assert_eq!(result.success, Outcome::Success, "{}", result.message);

    let wrl = dir
        .path()
        .join("parts.3dshapes")
        .join("SOT-23-5_L3.0-W1.7-H1.1.wrl");
    let pdf = dir.path().join("datasheet").join("C7593.pdf");
    assert!(result.files.contains(&wrl));
    assert!(result.files.contains(&pdf));
    assert!(fs::read_to_string(&wrl).unwrap().starts_with("#VRML V2.0 utf8"));

    let footprint =
        fs::read_to_string(dir.path().join("parts.pretty").join("SOT-23-5.kicad_mod")).unwrap();
    assert!(footprint.contains("(model \""));
    assert!(footprint.contains("parts.3dshapes/SOT-23-5_L3.0-W1.7-H1.1.wrl"));
}

#[tokio::test]
async fn test_footprint_without_model_request_has_no_model_clause() {
    let dir = tempfile::tempdir().unwrap();
    let source = FakeSource::default().with_component("C7593", "NE555");
    let options = ExportOptions {
        footprint: true,
        ..Default::default()
    };

    let report = BatchExporter::new(source)
        .export(request(&["C7593"], dir.path(), options))
        .await
        .unwrap();
    assert_eq!(report.success_count, 1);

    let footprint =
        fs::read_to_string(dir.path().join("parts.pretty").join("SOT-23-5.kicad_mod")).unwrap();
    assert!(!footprint.contains("(model"));
}

#[tokio::test]
async fn test_second_export_reports_already_present() {
    let dir = tempfile::tempdir().unwrap();
    let exporter = BatchExporter::new(FakeSource::default().with_component("C7593", "NE555"));

    let first = exporter
        .export(request(&["C7593"], dir.path(), symbol_only()))
        .await
        .unwrap();
    assert_eq!(first.success_count, 1);

    let second = exporter
        .export(request(&["C7593"], dir.path(), symbol_only()))
        .await
        .unwrap();
    let result = &second.results[0];
    assert_eq!(result.success, Outcome::Success);
    assert_eq!(result.export_status.symbol.message, "NE555 already present");

    let text = fs::read_to_string(dir.path().join("parts.kicad_sym")).unwrap();
    assert_eq!(text.matches("\n  (symbol \"NE555\"").count(), 1);
}

#[tokio::test]
async fn test_invalid_id_fails_without_fetching() {
    let dir = tempfile::tempdir().unwrap();
    let exporter = BatchExporter::new(FakeSource::default());

    let report = exporter
        .export(request(&["capacitor"], dir.path(), symbol_only()))
        .await
        .unwrap();
    assert_eq!(report.failure_count, 1);
    let result = &report.results[0];
    assert_eq!(result.component_id, "capacitor");
    assert!(!result.export_status.symbol.success);
}

#[tokio::test]
async fn test_unknown_component_fails() {
    let dir = tempfile::tempdir().unwrap();
    let report = BatchExporter::new(FakeSource::default())
        .export(request(&["C1", "C2"], dir.path(), symbol_only()))
        .await
        .unwrap();
    assert_eq!(report.total, 2);
    assert_eq!(report.failure_count, 2);
    assert!(report.results.iter().all(|r| r.success == Outcome::Failure));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_pool_cap_bounds_concurrency() {
    let dir = tempfile::tempdir().unwrap();
    let ids: Vec<String> = (1..=50).map(|i| format!("C{i}")).collect();
    let mut source = FakeSource {
        delay: Duration::from_millis(20),
        ..Default::default()
    };
    for id in &ids {
        source = source.with_component(id, &format!("PART{id}"));
    }

    let exporter = BatchExporter::new(source).with_pool_cap(15);
    let request = ExportRequest {
        component_ids: ids.clone(),
        options: symbol_only(),
        export_path: Some(dir.path().to_path_buf()),
        file_prefix: Some("parts".to_string()),
    };
    let report = exporter.export(request).await.unwrap();

    assert_eq!(report.total, 50);
    assert_eq!(report.success_count, 50);
    assert_eq!(report.results.len(), 50);

    let text = fs::read_to_string(dir.path().join("parts.kicad_sym")).unwrap();
    assert_eq!(text.matches("\n  (symbol \"PART").count(), 50);
    assert_eq!(text.matches('(').count(), text.matches(')').count());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_in_flight_fetches_never_exceed_cap() {
    let dir = tempfile::tempdir().unwrap();
    let ids: Vec<String> = (1..=50).map(|i| format!("C{i}")).collect();
    let fake = FakeSource {
        delay: Duration::from_millis(20),
        ..Default::default()
    };
    let exporter = BatchExporter::new(fake).with_pool_cap(15);
    let request = ExportRequest {
        component_ids: ids,
        options: symbol_only(),
        export_path: Some(dir.path().to_path_buf()),
        file_prefix: None,
    };
    let report = exporter.export(request).await.unwrap();
    assert_eq!(report.failure_count, 50);

    let source = exporter.source();
    assert_eq!(source.calls.load(Ordering::SeqCst), 50);
    let peak = source.max_in_flight.load(Ordering::SeqCst);
    assert!(peak <= 15, "peak concurrency {peak}");
    assert!(peak > 1);
}

#[tokio::test]
async fn test_cancelled_batch_skips_everything() {
    let dir = tempfile::tempdir().unwrap();
    let flag = CancelFlag::new();
    let exporter = BatchExporter::new(FakeSource::default().with_component("C7593", "NE555"))
        .with_cancel_flag(flag.clone());
    flag.cancel();

    let report = exporter
        .export(request(&["C7593", "C2040", "C8952"], dir.path(), symbol_only()))
        .await
        .unwrap();
    assert_eq!(report.total, 3);
    assert_eq!(report.cancelled, 3);
    assert!(report.results.is_empty());
    assert_eq!(exporter.source().calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_events_report_progress() {
    let dir = tempfile::tempdir().unwrap();
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let source = FakeSource::default()
        .with_component("C1", "A")
        .with_component("C2", "B")
        .with_component("C3", "C");
    let exporter = BatchExporter::new(source).with_events(tx);

    let report = exporter
        .export(request(&["C1", "C2", "C3"], dir.path(), symbol_only()))
        .await
        .unwrap();
    assert_eq!(report.success_count, 3);
    drop(exporter);

    let mut progress = Vec::new();
    let mut completed = 0;
    while let Some(event) = rx.recv().await {
        match event {
            BatchEvent::Progress {
                completed: done,
                total,
                ..
            } => {
                assert_eq!(total, 3);
                progress.push(done);
            }
            BatchEvent::Completed(_) => completed += 1,
        }
    }
    progress.sort_unstable();
    assert_eq!(progress, vec![1, 2, 3]);
    assert_eq!(completed, 3);
}
