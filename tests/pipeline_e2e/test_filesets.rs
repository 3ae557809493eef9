//! Multi-file filesets: side-car grouping, attachments and per-fileset stats.

use image_import_lib::models::EventStatus;

use super::fakes::FakeConverter;
use super::test_helpers::*;

#[tokio::test]
async fn test_side_cars_travel_with_their_primary() {
    let h = Harness::new(FakeConverter::new("Scope1", ACQUIRED));

    let events = h
        .import(
            vec![
                incoming("scan.emi", 1000),
                incoming("scan_1.ser", 2000),
                incoming("scan_2.ser", 2000),
                incoming("grid.mrc", 3000),
                incoming("grid.xml", 100),
            ],
            &[],
        )
        .await;

    // Events are keyed by the primary files only.
    for side_car in ["scan_1.ser", "scan_2.ser", "grid.xml"] {
        assert!(events_for(&events, side_car).is_empty(), "{}", side_car);
    }
    for primary in ["scan.emi", "grid.mrc"] {
        let mine = events_for(&events, primary);
        assert_eq!(terminal(&mine).status(), Some(EventStatus::Success), "{}", primary);
    }

    let mut counts: Vec<i32> = h.stats.rows().iter().map(|r| r.file_count).collect();
    counts.sort();
    assert_eq!(counts, vec![2, 3]);

    let attachments = h.repo.attachments();
    assert_eq!(attachments.len(), 1);
    assert_eq!(attachments[0].1, "grid.xml");
    let grid = h
        .repo
        .images()
        .into_iter()
        .find(|i| i.name == "grid.mrc")
        .unwrap();
    assert_eq!(attachments[0].0, grid.id);

    assert!(h.staged_files().is_empty(), "{:?}", h.staged_files());
}

#[tokio::test]
async fn test_unpaired_side_car_is_imported_alone() {
    let h = Harness::new(FakeConverter::new("Scope1", ACQUIRED));

    let acceptance = h
        .pipeline
        .import_files(
            vec![incoming("lonely.xml", 100), incoming("other.mrc", 100)],
            Default::default(),
            &caller("alice"),
        )
        .await;

    assert!(acceptance.accepted);
    let mut files = acceptance.files.clone();
    files.sort();
    assert_eq!(files, vec!["lonely.xml", "other.mrc"]);
}
