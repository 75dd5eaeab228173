use std::io::Cursor;

use chrono::Utc;
use dog_media::{
    EntityId, EntityStore, ImageSizeSpec, LogId, MediaConfig, MediaDisk, MediaError, MediaLibrary,
    MemoryDisk, MemoryEntityStore, MemoryUploadLogStore, NewUploadLog, OwningEntity, PruneOutcome,
    SizeSlot, SlotKey, UploadLogStore, UploadRequest, UploadSource, UploadedVariant,
};
use image::{DynamicImage, ImageFormat};

fn png(width: u32, height: u32) -> Vec<u8> {
    let img = DynamicImage::new_rgb8(width, height);
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, ImageFormat::Png).unwrap();
    buf.into_inner()
}

fn variant(slot: &str, filename: &str) -> UploadedVariant {
    UploadedVariant {
        slot_key: SlotKey::from(slot),
        filename: filename.to_string(),
        width: 10,
        height: 10,
    }
}

struct Harness {
    disk: MemoryDisk,
    logs: MemoryUploadLogStore,
    entities: MemoryEntityStore,
    library: MediaLibrary,
}

fn harness(config: MediaConfig) -> Harness {
    let disk = MemoryDisk::new("public");
    let logs = MemoryUploadLogStore::new();
    let entities = MemoryEntityStore::new();
    let library = MediaLibrary::builder(config)
        .disk(disk.clone())
        .logs(logs.clone())
        .entities(entities.clone())
        .build()
        .unwrap();
    Harness {
        disk,
        logs,
        entities,
        library,
    }
}

/// Deleting the medium column tries both candidates, nulls it and drops the log entry
#[tokio::test]
async fn test_end_to_end_delete() {
    let config = MediaConfig::new().with_sizes(vec![SizeSlot::new(
        "medium",
        ImageSizeSpec::new(300, 200).cropped(),
    )]);
    let h = harness(config);
    let mut post = OwningEntity::new(EntityId::new("post-1"));

    let outcome = h
        .library
        .upload_for_entity(
            &mut post,
            UploadRequest::new(png(640, 480), "jpg").with_title("Hello World!"),
        )
        .await
        .unwrap();
    let log_id = outcome.log.unwrap().id;
    assert_eq!(post.image("medium"), Some("hello-world-300x200.jpg"));
    assert!(h.disk.exists("blog/hello-world-300x200.jpg").await.unwrap());

    let report = h.library.remove_entity_slots(&mut post, &["medium"]).await.unwrap();

    assert_eq!(
        h.disk.delete_calls(),
        vec![vec![
            "blog/hello-world-300x200.jpg".to_string(),
            "hello-world-300x200.jpg".to_string(),
        ]]
    );
    assert!(!h.disk.exists("blog/hello-world-300x200.jpg").await.unwrap());
    assert!(report.deleted.contains("medium"));
    assert!(report.is_clean());
    assert_eq!(report.deleted_logs, vec![log_id.clone()]);
    assert!(h.logs.get(&log_id).await.unwrap().is_none());

    assert!(!post.has_image("medium"));
    let stored = h.entities.get(&post.id).await.unwrap().unwrap();
    assert!(!stored.has_image("medium"));
}

/// A backend that keeps reporting deleted files still gets its record cleared
#[tokio::test]
async fn test_db_authoritative_delete() {
    let h = harness(MediaConfig::default());
    h.disk.insert("blog/a-1000x700.jpg", &b"l"[..]);
    h.disk.insert("blog/a-600x400.jpg", &b"m"[..]);
    h.disk.set_stale_reads(true);
    let mut post = OwningEntity::new(EntityId::new("post-2"))
        .with_image("large", "a-1000x700.jpg")
        .with_image("medium", "a-600x400.jpg");
    h.entities.insert(post.clone());

    let report = h.library.remove_entity_images(&mut post).await.unwrap();

    assert!(!report.is_clean());
    let unconfirmed: Vec<&str> = report.unconfirmed.keys().map(|k| k.as_str()).collect();
    assert_eq!(unconfirmed, vec!["large", "medium"]);
    assert_eq!(report.unconfirmed["large"][0].path, "blog/a-1000x700.jpg");
    assert!(report.deleted.is_empty());
    assert_eq!(report.cleared.len(), 2);

    assert!(post.populated_slots().is_empty());
    let stored = h.entities.get(&post.id).await.unwrap().unwrap();
    assert!(stored.populated_slots().is_empty());
    assert!(!h.disk.contains("blog/a-1000x700.jpg"));
}

/// An unreachable disk aborts before any record changes
#[tokio::test]
async fn test_transport_error_leaves_records_unchanged() {
    let h = harness(MediaConfig::default());
    let log = h
        .logs
        .create(NewUploadLog::new(UploadSource::BlogFeaturedImage).with_variant(variant("large", "t.jpg")))
        .await
        .unwrap();
    let original = OwningEntity::new(EntityId::new("post-3")).with_image("large", "t.jpg");
    let mut post = original.clone();
    h.disk.set_unavailable(true);

    let err = h.library.remove_entity_images(&mut post).await.unwrap_err();

    assert!(err.is_transport());
    assert_eq!(post, original);
    assert_eq!(h.entities.save_count(), 0);
    assert_eq!(h.logs.get(&log.id).await.unwrap(), Some(log));

    // Retrying once the disk is back converges
    h.disk.set_unavailable(false);
    let report = h.library.remove_entity_images(&mut post).await.unwrap();
    assert!(report.deleted.contains("large"));
    assert!(h.logs.is_empty());
}

/// Columns written with the directory embedded are still found and cleaned up
#[tokio::test]
async fn test_legacy_prefixed_columns() {
    let h = harness(MediaConfig::default());
    h.disk.insert("blog/old-600x400.jpg", &b"m"[..]);
    let log = h
        .logs
        .create(
            NewUploadLog::new(UploadSource::BlogFeaturedImage)
                .with_variant(variant("medium", "old-600x400.jpg"))
                .with_variant(variant("large", "old-1000x700.jpg")),
        )
        .await
        .unwrap();
    let mut post = OwningEntity::new(EntityId::new("post-4")).with_image("medium", "\\blog\\old-600x400.jpg");

    let report = h.library.remove_entity_images(&mut post).await.unwrap();

    assert!(report.deleted.contains("medium"));
    assert!(h.disk.keys().is_empty());
    assert_eq!(report.pruned_logs, vec![log.id.clone()]);
    let remaining = h.logs.get(&log.id).await.unwrap().unwrap();
    assert!(remaining.variant("medium").is_none());
    assert!(remaining.variant("large").is_some());
}

/// Entity removal only prunes the log variants it owned
#[tokio::test]
async fn test_log_entry_survives_partial_prune() {
    let h = harness(MediaConfig::default());
    let log = h
        .logs
        .create(
            NewUploadLog::new(UploadSource::BlogFeaturedImage)
                .with_variant(variant("large", "p-1000x700.jpg"))
                .with_variant(variant("medium", "p-600x400.jpg"))
                .with_variant(variant("thumbnail", "p-150x150.jpg")),
        )
        .await
        .unwrap();
    let mut post = OwningEntity::new(EntityId::new("post-5")).with_image("thumbnail", "p-150x150.jpg");

    let report = h.library.remove_entity_images(&mut post).await.unwrap();

    assert_eq!(report.cleared.len(), 1);
    assert!(report.deleted_logs.is_empty());
    let remaining = h.logs.get(&log.id).await.unwrap().unwrap();
    assert_eq!(remaining.variants.len(), 2);
}

/// Without log cleanup only the file goes; with it the entry is pruned
#[tokio::test]
async fn test_delete_variant_cleanup_flag() {
    let h = harness(MediaConfig::default());
    h.disk.insert("blog/v-1000x700.jpg", &b"l"[..]);
    h.disk.insert("blog/v-600x400.jpg", &b"m"[..]);
    let log = h
        .logs
        .create(
            NewUploadLog::new(UploadSource::ImageUpload)
                .with_variant(variant("large", "v-1000x700.jpg"))
                .with_variant(variant("medium", "v-600x400.jpg")),
        )
        .await
        .unwrap();

    let outcome = h
        .library
        .delete_variant(&log.id, "large", "v-1000x700.jpg", false)
        .await
        .unwrap();
    assert!(outcome.is_none());
    assert!(!h.disk.contains("blog/v-1000x700.jpg"));
    assert_eq!(h.logs.get(&log.id).await.unwrap().unwrap().variants.len(), 2);

    let outcome = h
        .library
        .delete_variant(&log.id, "medium", "v-600x400.jpg", true)
        .await
        .unwrap();
    match outcome {
        Some(PruneOutcome::Pruned(entry)) => {
            let slots: Vec<&str> = entry.variants.keys().map(|k| k.as_str()).collect();
            assert_eq!(slots, vec!["large"]);
        }
        other => panic!("expected pruned entry, got {other:?}"),
    }
    assert!(h.disk.keys().is_empty());
}

/// Whole-log deletion removes each variant and the row
#[tokio::test]
async fn test_delete_log() {
    let h = harness(MediaConfig::default());
    let outcome = h
        .library
        .upload(
            UploadRequest::new(png(400, 300), "png")
                .with_title("Gallery")
                .with_slots(["medium", "thumbnail", "fullsize"]),
        )
        .await
        .unwrap();
    let log_id = outcome.log.unwrap().id;
    assert_eq!(h.disk.keys().len(), 3);

    let keys = h.library.delete_log(&log_id).await.unwrap();

    assert_eq!(keys.len(), 6);
    assert!(h.disk.keys().is_empty());
    assert!(h.logs.is_empty());

    let err = h.library.delete_log(&log_id).await.unwrap_err();
    assert!(matches!(err, MediaError::LogNotFound { .. }));
}

/// The library view flags variants the disk no longer has
#[tokio::test]
async fn test_inventory_reports_missing_files() {
    let h = harness(MediaConfig::default());
    h.disk.insert("blog/i-600x400.jpg", &b"m"[..]);
    h.logs.insert(
        NewUploadLog::new(UploadSource::ImageUpload)
            .with_title("Inventory")
            .with_variant(variant("medium", "i-600x400.jpg"))
            .with_variant(variant("thumbnail", "i-150x150.jpg"))
            .into_entry(LogId::new(), Utc::now()),
    );

    let inventory = h.library.inventory(10).await.unwrap();

    assert_eq!(inventory.len(), 1);
    let missing: Vec<&str> = inventory[0].missing().map(|f| f.filename.as_str()).collect();
    assert_eq!(missing, vec!["i-150x150.jpg"]);
    assert_eq!(inventory[0].preview().unwrap().filename, "i-600x400.jpg");
}

/// Removing images for an id that does not exist is an error, not a no-op
#[tokio::test]
async fn test_remove_by_unknown_id() {
    let h = harness(MediaConfig::default());
    let err = h
        .library
        .remove_images_by_id(&EntityId::new("ghost"))
        .await
        .unwrap_err();
    assert!(matches!(err, MediaError::EntityNotFound { .. }));
}
