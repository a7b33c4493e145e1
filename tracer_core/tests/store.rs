use tempfile::tempdir;
use tracer_config::{MarkEntry, MarkKind, PersistedCalibration, PersistedRecord};
use tracer_core::{FileStore, MemStore, RecordStore};

fn record() -> PersistedRecord {
    PersistedRecord {
        calibration: Some(PersistedCalibration {
            bias: vec![400; 16],
            range: vec![3200; 16],
            threshold: 0.5,
        }),
        marks: vec![
            MarkEntry {
                kind: MarkKind::Left,
                tick: 36_000,
            },
            MarkEntry {
                kind: MarkKind::Both,
                tick: 120_500,
            },
        ],
    }
}

#[test]
fn missing_file_loads_an_empty_record() {
    let dir = tempdir().unwrap();
    let mut store = FileStore::new(dir.path().join("record.toml"));
    let rec = store.load().unwrap();
    assert_eq!(rec, PersistedRecord::default());
}

#[test]
fn flush_then_load_returns_the_same_record() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("nested").join("record.toml");
    let mut store = FileStore::new(&path);
    assert!(store.flush(&record()));
    assert!(path.exists());
    assert_eq!(store.load().unwrap(), record());

    // A second flush replaces the first.
    let mut shorter = record();
    shorter.marks.truncate(1);
    assert!(store.flush(&shorter));
    assert_eq!(store.load().unwrap().marks.len(), 1);
}

#[test]
fn failed_flush_reports_false() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("record.toml");
    // The target is a directory, so the final rename cannot succeed.
    std::fs::create_dir(&path).unwrap();
    let mut store = FileStore::new(&path);
    assert!(!store.flush(&record()));
    assert!(path.is_dir());
}

#[test]
fn stored_calibration_is_validated_on_load() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("record.toml");
    let mut range = vec!["3200"; 16];
    range[5] = "0";
    let text = format!(
        "[calibration]\nbias = [{}]\nrange = [{}]\nthreshold = 0.5\n",
        vec!["400"; 16].join(", "),
        range.join(", ")
    );
    std::fs::write(&path, text).unwrap();
    let err = FileStore::new(&path).load().unwrap_err();
    assert!(format!("{err:#}").contains("range[5]"));
}

#[test]
fn garbage_file_is_an_error_not_a_default() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("record.toml");
    std::fs::write(&path, "marks = 7\n").unwrap();
    assert!(FileStore::new(&path).load().is_err());
}

#[test]
fn mem_store_fail_next_fails_exactly_once() {
    let mut store = MemStore::default();
    store.fail_next();
    assert!(!store.flush(&record()));
    assert_eq!(store.flushes(), 0);
    assert_eq!(store.record(), &PersistedRecord::default());
    assert!(store.flush(&record()));
    assert_eq!(store.flushes(), 1);
    assert_eq!(store.load().unwrap(), record());
}
