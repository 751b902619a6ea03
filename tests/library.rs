mod common;

use std::collections::HashSet;
use std::sync::atomic::AtomicBool;
use std::sync::mpsc;

use common::{FakeExifTool, FlakyFs, TestLibrary};
use filmvault::assets::DeletePolicy;
use filmvault::db::RollEdit;
use filmvault::exif::{ExifData, PhotoExifPayload};
use filmvault::import::{ImportProgress, ImportResult};
use filmvault::tasks::TaskKind;
use filmvault::{LibraryError, Location};

fn import(lib: &TestLibrary) -> ImportResult {
    lib.library
        .import_folder(&lib.options(), &AtomicBool::new(false), None)
        .unwrap()
}

fn cover_count(lib: &TestLibrary, roll_id: i64) -> usize {
    lib.library
        .get_roll_with_photos(roll_id)
        .unwrap()
        .photos
        .iter()
        .filter(|p| p.is_cover)
        .count()
}

#[test]
fn test_exactly_one_cover_through_cover_changes() {
    let lib = TestLibrary::new(FlakyFs::default());
    lib.add_scans(&["01.png", "02.png", "03.png"]);
    let result = import(&lib);
    let photos = lib.library.get_roll_with_photos(result.roll_id).unwrap().photos;
    assert_eq!(cover_count(&lib, result.roll_id), 1);
    assert!(photos[0].is_cover);

    for photo in [&photos[2], &photos[1], &photos[1], &photos[0]] {
        assert!(lib.library.set_photo_as_cover(result.roll_id, photo.id).unwrap());
        assert_eq!(cover_count(&lib, result.roll_id), 1);
    }

    // Deleting the cover hands it to the first remaining photo
    assert!(lib.library.delete_photo(photos[0].id, false).unwrap());
    let detail = lib.library.get_roll_with_photos(result.roll_id).unwrap();
    assert_eq!(cover_count(&lib, result.roll_id), 1);
    assert_eq!(detail.cover_photo.map(|p| p.id), Some(photos[1].id));
}

#[test]
fn test_delete_roll_keeping_files() {
    let lib = TestLibrary::new(FlakyFs::default());
    lib.add_scans(&["01.png", "02.png"]);
    let result = import(&lib);
    let detail = lib.library.get_roll_with_photos(result.roll_id).unwrap();

    assert!(lib.library.delete_roll(result.roll_id, DeletePolicy::KEEP_FILES).unwrap());

    assert!(lib.library.get_roll_with_photos(result.roll_id).unwrap_err().is_not_found());
    assert_eq!(lib.library.database().photo_count().unwrap(), 0);
    for photo in &detail.photos {
        assert!(photo.file_path.exists());
        assert!(photo.thumbnail_path.as_ref().unwrap().exists());
    }
    assert!(!lib.library.delete_roll(result.roll_id, DeletePolicy::KEEP_FILES).unwrap());
}

#[test]
fn test_delete_roll_derived_only_keeps_originals() {
    let lib = TestLibrary::new(FlakyFs::default());
    lib.add_scans(&["01.png", "02.png"]);
    let result = import(&lib);
    let detail = lib.library.get_roll_with_photos(result.roll_id).unwrap();
    let roll_dir = detail.roll.path.clone();
    assert!(roll_dir.join("thumbnails").is_dir());
    assert!(roll_dir.join("previews").is_dir());

    assert!(lib.library.delete_roll(result.roll_id, DeletePolicy::DERIVED_ONLY).unwrap());

    assert!(!roll_dir.join("thumbnails").exists());
    assert!(!roll_dir.join("previews").exists());
    for photo in &detail.photos {
        assert!(image::open(&photo.file_path).is_ok());
    }
}

#[test]
fn test_delete_roll_everything_removes_folder() {
    let lib = TestLibrary::new(FlakyFs::default());
    lib.add_scans(&["01.png"]);
    let result = import(&lib);
    let roll_dir = lib.library.get_roll_with_photos(result.roll_id).unwrap().roll.path;

    assert!(lib.library.delete_roll(result.roll_id, DeletePolicy::EVERYTHING).unwrap());
    assert!(!roll_dir.exists());
    // Copy mode: the scans themselves are untouched
    assert!(lib.source.join("01.png").exists());
}

#[test]
fn test_batch_photo_delete_survives_file_failure() {
    let fs = FlakyFs {
        fail_delete: HashSet::from(["02.jpg".to_string()]),
        ..Default::default()
    };
    let lib = TestLibrary::new(fs);
    lib.add_scans(&["01.png", "02.png", "03.png"]);
    let result = import(&lib);
    let ids: Vec<i64> = lib
        .library
        .get_roll_with_photos(result.roll_id)
        .unwrap()
        .photos
        .iter()
        .map(|p| p.id)
        .collect();

    let deleted = lib.library.delete_photos(&ids, true).unwrap();
    assert_eq!(deleted, ids.len());
    assert!(lib.library.get_roll_with_photos(result.roll_id).unwrap().photos.is_empty());
}

#[test]
fn test_apply_roll_location_is_idempotent_and_keeps_overrides() {
    let lib = TestLibrary::new(FlakyFs::default());
    lib.add_scans(&["01.png", "02.png", "03.png"]);
    let result = import(&lib);
    let photos = lib.library.get_roll_with_photos(result.roll_id).unwrap().photos;

    let kyoto = Location::new(35.0116, 135.7681, "Kyoto", "Japan").unwrap();
    assert!(lib.library.update_photo_location(photos[1].id, Some(&kyoto)).unwrap());

    let first = lib
        .library
        .apply_roll_location_to_photos(result.roll_id, 35.6762, 139.6503, "Tokyo", "Japan")
        .unwrap();
    let second = lib
        .library
        .apply_roll_location_to_photos(result.roll_id, 35.6762, 139.6503, "Tokyo", "Japan")
        .unwrap();
    assert_eq!(first, 2);
    assert_eq!(second, first);

    let detail = lib.library.get_roll_with_photos(result.roll_id).unwrap();
    assert_eq!(detail.photos[1].location.as_ref(), Some(&kyoto));
    assert_eq!(detail.photos[0].location.as_ref().map(|l| l.city.as_str()), Some("Tokyo"));
    assert_eq!(detail.roll.location.map(|l| l.city), Some("Tokyo".to_string()));
}

#[test]
fn test_location_edits_follow_auto_write() {
    let lib = TestLibrary::auto_writing(FlakyFs::default());
    lib.add_scans(&["01.png", "02.png"]);
    let result = import(&lib);
    let comment = |lib: &TestLibrary| -> Vec<(bool, Option<String>)> {
        lib.library
            .get_roll_with_photos(result.roll_id)
            .unwrap()
            .photos
            .iter()
            .map(|p| (p.exif_synced, lib.tool.tags(&p.file_path).get("UserComment").cloned()))
            .collect()
    };

    let tokyo = Location::new(35.6762, 139.6503, "Tokyo", "Japan").unwrap();
    assert!(lib.library.update_roll_location(result.roll_id, Some(&tokyo)).unwrap());
    let expected = Some("Shot on Kodak Portra 400 | Tokyo, Japan".to_string());
    assert_eq!(comment(&lib), vec![(true, expected.clone()), (true, expected)]);

    lib.library
        .apply_roll_location_to_photos(result.roll_id, 48.8566, 2.3522, "Paris", "France")
        .unwrap();
    let expected = Some("Shot on Kodak Portra 400 | Paris, France".to_string());
    assert_eq!(comment(&lib), vec![(true, expected.clone()), (true, expected)]);
}

#[test]
fn test_roll_exif_comment_without_notes() {
    let lib = TestLibrary::new(FlakyFs::default());
    lib.add_scans(&["01.png"]);
    let result = import(&lib);
    lib.library
        .apply_roll_location_to_photos(result.roll_id, 35.6762, 139.6503, "Tokyo", "Japan")
        .unwrap();

    let write = lib.library.write_roll_exif(result.roll_id, false).unwrap();
    assert_eq!(write.success_count, 1);
    assert!(!write.has_failures());

    let photo = &lib.library.get_roll_with_photos(result.roll_id).unwrap().photos[0];
    let tags = lib.tool.tags(&photo.file_path);
    assert_eq!(
        tags.get("UserComment").map(String::as_str),
        Some("Shot on Kodak Portra 400 | Tokyo, Japan")
    );
    assert_eq!(tags.get("Make").map(String::as_str), Some("Canon"));
    assert_eq!(tags.get("Model").map(String::as_str), Some("AE-1"));
    assert_eq!(
        tags.get("DateTimeOriginal").map(String::as_str),
        Some("2024:01:15 12:00:00")
    );
}

#[test]
fn test_exif_synced_follows_edits_and_writes() {
    let lib = TestLibrary::new(FlakyFs::default());
    lib.add_scans(&["01.png", "02.png"]);
    let result = import(&lib);
    let synced = |lib: &TestLibrary| -> Vec<bool> {
        lib.library
            .get_roll_with_photos(result.roll_id)
            .unwrap()
            .photos
            .iter()
            .map(|p| p.exif_synced)
            .collect()
    };
    assert_eq!(synced(&lib), vec![false, false]);

    lib.library.write_roll_exif(result.roll_id, false).unwrap();
    assert_eq!(synced(&lib), vec![true, true]);

    let roll = lib.library.get_roll_with_photos(result.roll_id).unwrap().roll;
    let edit = RollEdit {
        id: roll.id,
        name: roll.name.clone(),
        film_stock: "Ilford HP5".into(),
        camera: roll.camera.clone(),
        lens: roll.lens.clone(),
        shoot_date: roll.shoot_date.clone(),
        lab_info: roll.lab_info.clone(),
        notes: roll.notes.clone(),
    };
    assert!(lib.library.update_roll(&edit).unwrap());
    assert_eq!(synced(&lib), vec![false, false]);

    // Only the written photo becomes current
    let first = lib.library.get_roll_with_photos(result.roll_id).unwrap().photos[0].id;
    let payload = PhotoExifPayload::CommentOnly {
        comment: "first frame".into(),
    };
    assert!(lib.library.write_photo_exif(first, &payload).unwrap());
    assert_eq!(synced(&lib), vec![true, false]);
}

#[test]
fn test_catalogue_only_edit_keeps_sync_state() {
    let lib = TestLibrary::new(FlakyFs::default());
    lib.add_scans(&["01.png"]);
    let result = import(&lib);
    lib.library.write_roll_exif(result.roll_id, false).unwrap();

    let roll = lib.library.get_roll_with_photos(result.roll_id).unwrap().roll;
    let edit = RollEdit {
        id: roll.id,
        name: "Renamed".into(),
        film_stock: roll.film_stock.clone(),
        camera: roll.camera.clone(),
        lens: roll.lens.clone(),
        shoot_date: roll.shoot_date.clone(),
        lab_info: Some("Local lab".into()),
        notes: roll.notes.clone(),
    };
    lib.library.update_roll(&edit).unwrap();
    assert!(lib.library.get_roll_with_photos(result.roll_id).unwrap().photos[0].exif_synced);
}

#[test]
fn test_photo_comment_round_trips_through_read() {
    let lib = TestLibrary::new(FlakyFs::default());
    lib.add_scans(&["01.png"]);
    let result = import(&lib);
    let photo_id = lib.library.get_roll_with_photos(result.roll_id).unwrap().photos[0].id;

    let payload = PhotoExifPayload::CommentOnly {
        comment: "harbour at dusk".into(),
    };
    lib.library.write_photo_exif(photo_id, &payload).unwrap();

    let data = lib.library.read_photo_exif(photo_id).unwrap();
    assert_eq!(
        data.user_comment.as_deref(),
        Some("Shot on Kodak Portra 400 | harbour at dusk")
    );
    assert_eq!(data.film_stock.as_deref(), Some("Kodak Portra 400"));

    // Writing the read-back comment again does not nest the prefix
    let again = PhotoExifPayload::CommentOnly {
        comment: data.user_comment.clone().unwrap(),
    };
    lib.library.write_photo_exif(photo_id, &again).unwrap();
    assert_eq!(lib.library.read_photo_exif(photo_id).unwrap().user_comment, data.user_comment);
}

#[test]
fn test_photo_comment_round_trip_after_location_change() {
    let lib = TestLibrary::new(FlakyFs::default());
    lib.add_scans(&["01.png"]);
    let result = import(&lib);
    let photo_id = lib.library.get_roll_with_photos(result.roll_id).unwrap().photos[0].id;

    let tokyo = Location::new(35.6762, 139.6503, "Tokyo", "Japan").unwrap();
    lib.library.update_photo_location(photo_id, Some(&tokyo)).unwrap();
    let payload = PhotoExifPayload::CommentOnly {
        comment: "dusk".into(),
    };
    lib.library.write_photo_exif(photo_id, &payload).unwrap();
    let read_back = lib.library.read_photo_exif(photo_id).unwrap().user_comment.unwrap();
    assert_eq!(read_back, "Shot on Kodak Portra 400 | Tokyo, Japan | dusk");

    let paris = Location::new(48.8566, 2.3522, "Paris", "France").unwrap();
    lib.library.update_photo_location(photo_id, Some(&paris)).unwrap();
    let again = PhotoExifPayload::CommentOnly { comment: read_back };
    lib.library.write_photo_exif(photo_id, &again).unwrap();

    assert_eq!(
        lib.library.read_photo_exif(photo_id).unwrap().user_comment.as_deref(),
        Some("Shot on Kodak Portra 400 | Paris, France | dusk")
    );
}

#[test]
fn test_rating_change_after_photo_write_marks_unsynced() {
    let lib = TestLibrary::new(FlakyFs::default());
    lib.add_scans(&["01.png"]);
    let result = import(&lib);
    let photo_id = lib.library.get_roll_with_photos(result.roll_id).unwrap().photos[0].id;

    let payload = PhotoExifPayload::Fields(ExifData {
        rating: Some(4),
        ..Default::default()
    });
    assert!(lib.library.write_photo_exif(photo_id, &payload).unwrap());
    let photo = &lib.library.get_roll_with_photos(result.roll_id).unwrap().photos[0];
    assert!(photo.exif_synced);
    assert_eq!(photo.rating, 4);
    assert_eq!(lib.library.read_photo_exif(photo_id).unwrap().rating, Some(4));

    assert!(lib.library.update_photo_rating(photo_id, 2).unwrap());
    let photo = &lib.library.get_roll_with_photos(result.roll_id).unwrap().photos[0];
    assert_eq!(photo.rating, 2);
    assert!(!photo.exif_synced);
}

#[test]
fn test_locked_file_is_a_per_item_failure() {
    let lib = TestLibrary::new(FlakyFs::default());
    lib.add_scans(&["01.png", "02.png", "03.png"]);
    let result = import(&lib);
    let photos = lib.library.get_roll_with_photos(result.roll_id).unwrap().photos;
    lib.tool.lock(&photos[1].file_path);

    let write = lib.library.write_roll_exif(result.roll_id, false).unwrap();
    assert_eq!(write.success_count, 2);
    assert_eq!(write.failed_count, 1);
    assert_eq!(write.failed_files[0].path, photos[1].file_path);

    let err = write.partial_failure().unwrap();
    assert!(matches!(err, LibraryError::PartialFailure { succeeded: 2, failed: 1, .. }));

    let synced: Vec<bool> = lib
        .library
        .get_roll_with_photos(result.roll_id)
        .unwrap()
        .photos
        .iter()
        .map(|p| p.exif_synced)
        .collect();
    assert_eq!(synced, vec![true, false, true]);
}

#[test]
fn test_tool_unavailable_fails_before_any_file() {
    let tool = FakeExifTool {
        unavailable: true,
        ..Default::default()
    };
    let lib = TestLibrary::with_tool(FlakyFs::default(), tool);
    lib.add_scans(&["01.png"]);
    let result = import(&lib);

    assert!(matches!(
        lib.library.write_roll_exif(result.roll_id, false),
        Err(LibraryError::ToolUnavailable(_))
    ));
    assert!(lib.library.write_roll_exif(result.roll_id, true).unwrap().total() == 0);
    assert!(lib.tool.files.lock().unwrap().is_empty());
}

#[test]
fn test_empty_folder_creates_no_roll() {
    let lib = TestLibrary::new(FlakyFs::default());
    std::fs::write(lib.source.join("notes.txt"), b"not a scan").unwrap();

    assert_eq!(lib.library.preview_import_count(&lib.source).unwrap(), 0);
    let err = lib
        .library
        .import_folder(&lib.options(), &AtomicBool::new(false), None)
        .unwrap_err();
    assert!(matches!(err, LibraryError::NothingToImport(_)));
    assert_eq!(lib.library.database().roll_count().unwrap(), 0);
    assert!(lib
        .library
        .preview_import_count(&lib.source.join("missing"))
        .is_err());
}

#[test]
fn test_third_of_five_copy_failure() {
    let fs = FlakyFs {
        fail_copy: HashSet::from(["03.png".to_string()]),
        ..Default::default()
    };
    let lib = TestLibrary::new(fs);
    lib.add_scans(&["01.png", "02.png", "03.png", "04.png", "05.png"]);

    let (tx, rx) = mpsc::channel();
    let result = lib
        .library
        .import_folder(&lib.options(), &AtomicBool::new(false), Some(tx))
        .unwrap();
    assert_eq!(result.photos_count, 4);

    let files: Vec<(usize, usize, bool)> = rx
        .iter()
        .filter_map(|event| match event {
            ImportProgress::File {
                current,
                total,
                error,
                ..
            } => Some((current, total, error.is_some())),
            _ => None,
        })
        .collect();
    assert_eq!(files.len(), 5);
    assert_eq!(files[2], (3, 5, true));
    assert!(files.iter().filter(|f| f.2).count() == 1);

    let detail = lib.library.get_roll_with_photos(result.roll_id).unwrap();
    assert_eq!(detail.photos.len(), 4);
    assert!(!detail.roll.path.join("03.png").exists());
}

#[test]
fn test_background_import_reports_failed_file() {
    let fs = FlakyFs {
        fail_copy: HashSet::from(["03.png".to_string()]),
        ..Default::default()
    };
    let lib = TestLibrary::new(fs);
    lib.add_scans(&["01.png", "02.png", "03.png", "04.png", "05.png"]);

    let handle = lib.library.spawn_import(lib.options());
    let id = handle.id;
    handle.join();

    let reports = lib.library.poll_tasks();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].id, id);
    assert_eq!(
        reports[0].kind,
        TaskKind::Import {
            source: lib.source.clone()
        }
    );
    assert!(reports[0].outcome.is_success());
    assert!(reports[0].outcome.message().contains("4 of 5"));
    assert_eq!(reports[0].progress.total, 5);
    assert_eq!(reports[0].progress.failed, 1);
    assert!(!lib.library.has_running_tasks());
}

#[test]
fn test_import_layout_and_auto_name() {
    let lib = TestLibrary::new(FlakyFs::default());
    lib.add_scans(&["01.png"]);
    let result = import(&lib);
    assert_eq!(
        result.message,
        "Imported 1 photos as roll '2024-01-15_Kodak_Portra_400_Canon_AE-1'"
    );

    let detail = lib.library.get_roll_with_photos(result.roll_id).unwrap();
    assert_eq!(
        detail.roll.path,
        lib.library_root.join("2024").join("2024-01-15_Kodak_Portra_400_Canon_AE-1")
    );
    let photo = &detail.photos[0];
    assert_eq!(photo.thumbnail_path, Some(detail.roll.path.join("thumbnails/01.jpg")));
    assert_eq!(photo.preview_path, Some(detail.roll.path.join("previews/01.jpg")));
}
