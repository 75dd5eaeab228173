use std::collections::HashSet;
use std::io::Cursor;

use dog_media::{
    BroadcastEvents, CodecError, EncodeFormat, EntityId, ImageCodec, ImageSizeSpec, MediaConfig,
    MediaDisk, MediaError, MediaEvent, MediaLibrary, MemoryDisk, MemoryEntityStore,
    MemoryUploadLogStore, OwningEntity, RasterCodec, SizeSlot, UploadLogStore, UploadRequest,
    UploadSource,
};
use image::{DynamicImage, ImageFormat};

/// Solid PNG of the given size
fn png(width: u32, height: u32) -> Vec<u8> {
    let img = DynamicImage::new_rgb8(width, height);
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, ImageFormat::Png).unwrap();
    buf.into_inner()
}

fn medium_only() -> MediaConfig {
    MediaConfig::new().with_sizes(vec![SizeSlot::new(
        "medium",
        ImageSizeSpec::new(300, 200).cropped(),
    )])
}

/// Codec that fails any resize targeting the given width
struct FailingCodec {
    inner: RasterCodec,
    fail_width: u32,
}

impl ImageCodec for FailingCodec {
    fn decode(&self, bytes: &[u8]) -> Result<DynamicImage, CodecError> {
        self.inner.decode(bytes)
    }

    fn resize(&self, image: &DynamicImage, width: u32, height: u32) -> Result<DynamicImage, CodecError> {
        if width == self.fail_width {
            return Err(CodecError::Resize("forced failure".into()));
        }
        self.inner.resize(image, width, height)
    }

    fn fit(&self, image: &DynamicImage, width: u32, height: u32) -> Result<DynamicImage, CodecError> {
        if width == self.fail_width {
            return Err(CodecError::Resize("forced failure".into()));
        }
        self.inner.fit(image, width, height)
    }

    fn encode(&self, image: &DynamicImage, format: EncodeFormat, quality: u8) -> Result<Vec<u8>, CodecError> {
        self.inner.encode(image, format, quality)
    }
}

/// "Hello World!" with one 300x200 crop slot lands at blog/hello-world-300x200.jpg
#[tokio::test]
async fn test_end_to_end_upload_naming() {
    let disk = MemoryDisk::new("public");
    let logs = MemoryUploadLogStore::new();
    let events = BroadcastEvents::default();
    let mut rx = events.subscribe();
    let library = MediaLibrary::builder(medium_only())
        .disk(disk.clone())
        .logs(logs.clone())
        .events(events)
        .build()
        .unwrap();

    let outcome = library
        .upload(
            UploadRequest::new(png(800, 600), "jpg")
                .with_title("Hello World!")
                .with_slot("medium"),
        )
        .await
        .unwrap();

    assert!(outcome.is_complete());
    let log = outcome.log.expect("log entry persisted");
    let medium = log.variant("medium").unwrap();
    assert_eq!(medium.filename, "hello-world-300x200.jpg");
    assert_eq!((medium.width, medium.height), (300, 200));
    assert_eq!(log.title.as_deref(), Some("Hello World!"));
    assert_eq!(log.source, UploadSource::ImageUpload);

    // Round trip: the key is visible right away
    assert!(disk.exists("blog/hello-world-300x200.jpg").await.unwrap());
    assert_eq!(logs.get(&log.id).await.unwrap(), Some(log.clone()));

    match rx.recv().await.unwrap() {
        MediaEvent::VariantUploaded { filename, width, height, entity, .. } => {
            assert_eq!(filename, "hello-world-300x200.jpg");
            assert_eq!((width, height), (300, 200));
            assert_eq!(entity, None);
        }
        other => panic!("unexpected event {other:?}"),
    }
}

/// A codec failure on slot 2 of 3 leaves slots 1 and 3 logged
#[tokio::test]
async fn test_partial_failure_isolation() {
    let disk = MemoryDisk::new("public");
    let library = MediaLibrary::builder(MediaConfig::default())
        .disk(disk.clone())
        .codec(FailingCodec {
            inner: RasterCodec::new(),
            fail_width: 600,
        })
        .build()
        .unwrap();

    let outcome = library
        .upload(
            UploadRequest::new(png(1200, 900), "png")
                .with_title("Partial")
                .with_slots(["large", "medium", "thumbnail"]),
        )
        .await
        .unwrap();

    let log = outcome.log.as_ref().unwrap();
    let slots: Vec<&str> = log.variants.keys().map(|k| k.as_str()).collect();
    assert_eq!(slots, vec!["large", "thumbnail"]);
    assert_eq!(outcome.errors.len(), 1);
    assert!(matches!(outcome.errors.get("medium"), Some(MediaError::Codec(_))));
    assert_eq!(
        disk.keys(),
        vec!["blog/partial-1000x700.png".to_string(), "blog/partial-150x150.png".to_string()]
    );
}

/// A failed write for one slot is reported and its siblings still land
#[tokio::test]
async fn test_storage_write_failure_is_per_slot() {
    let disk = MemoryDisk::new("public");
    disk.fail_puts_containing("150x150");
    let library = MediaLibrary::builder(MediaConfig::default())
        .disk(disk.clone())
        .build()
        .unwrap();

    let outcome = library
        .upload(
            UploadRequest::new(png(300, 300), "webp")
                .with_title("Writes")
                .with_slots(["medium", "thumbnail"]),
        )
        .await
        .unwrap();

    assert!(outcome.variant("medium").is_some());
    assert!(outcome.errors.get("thumbnail").unwrap().is_transport());
    assert_eq!(outcome.log.unwrap().variants.len(), 1);
    assert!(disk.contains("blog/writes-600x400.webp"));
}

/// Exhausting the filename budget aborts the batch and removes what it wrote
#[tokio::test]
async fn test_allocation_exhaustion_is_fatal() {
    let disk = MemoryDisk::new("public");
    disk.insert("blog/busy-600x400.png", &b"taken"[..]);
    let logs = MemoryUploadLogStore::new();
    let library = MediaLibrary::builder(MediaConfig::default().with_allocation_attempts(1))
        .disk(disk.clone())
        .logs(logs.clone())
        .build()
        .unwrap();

    let err = library
        .upload(
            UploadRequest::new(png(50, 50), "png")
                .with_title("Busy")
                .with_slots(["large", "medium"]),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, MediaError::AllocationExhausted { attempts: 1, .. }));
    assert_eq!(disk.keys(), vec!["blog/busy-600x400.png".to_string()]);
    assert!(logs.is_empty());
}

/// Uploading the same title repeatedly never reuses a filename
#[tokio::test]
async fn test_repeated_titles_get_distinct_filenames() {
    let disk = MemoryDisk::new("public");
    let library = MediaLibrary::builder(medium_only())
        .disk(disk.clone())
        .build()
        .unwrap();

    let mut seen = HashSet::new();
    for _ in 0..5 {
        let outcome = library
            .upload(UploadRequest::new(png(20, 20), "jpg").with_title("Same").with_slot("medium"))
            .await
            .unwrap();
        let filename = outcome.variant("medium").unwrap().filename.clone();
        assert!(seen.insert(filename));
    }
    assert!(seen.contains("same-300x200.jpg"));
    assert_eq!(disk.keys().len(), 5);
}

/// Two slots with identical boxes still get separate files within one batch
#[tokio::test]
async fn test_same_box_slots_do_not_collide() {
    let config = MediaConfig::new().with_sizes(vec![
        SizeSlot::new("square", ImageSizeSpec::new(100, 100).cropped()),
        SizeSlot::new("avatar", ImageSizeSpec::new(100, 100).cropped()),
    ]);
    let library = MediaLibrary::builder(config)
        .disk(MemoryDisk::new("public"))
        .build()
        .unwrap();

    let outcome = library
        .upload(UploadRequest::new(png(200, 200), "png").with_title("Face").with_slots(["square", "avatar"]))
        .await
        .unwrap();

    let square = &outcome.variant("square").unwrap().filename;
    let avatar = &outcome.variant("avatar").unwrap().filename;
    assert_eq!(square, "face-100x100.png");
    assert_ne!(square, avatar);
}

/// Unknown extensions are encoded as JPEG
#[tokio::test]
async fn test_unknown_extension_defaults_to_jpg() {
    let disk = MemoryDisk::new("public");
    let library = MediaLibrary::builder(medium_only())
        .disk(disk.clone())
        .build()
        .unwrap();

    let outcome = library
        .upload(UploadRequest::new(png(400, 400), "BMP").with_title("Legacy").with_slot("medium"))
        .await
        .unwrap();

    assert_eq!(outcome.variant("medium").unwrap().filename, "legacy-300x200.jpg");
    let bytes = disk.read("blog/legacy-300x200.jpg").unwrap();
    assert_eq!(image::guess_format(&bytes).unwrap(), ImageFormat::Jpeg);
}

/// Featured uploads point the entity's columns at the new variants
#[tokio::test]
async fn test_upload_for_entity_sets_columns() {
    let disk = MemoryDisk::new("public");
    let entities = MemoryEntityStore::new();
    let library = MediaLibrary::builder(MediaConfig::default())
        .disk(disk.clone())
        .entities(entities.clone())
        .build()
        .unwrap();
    let mut post = OwningEntity::new(EntityId::new("post-7"));

    let outcome = library
        .upload_for_entity(&mut post, UploadRequest::new(png(1600, 1200), "jpeg").with_title("Cover"))
        .await
        .unwrap();

    assert_eq!(outcome.log.as_ref().unwrap().source, UploadSource::BlogFeaturedImage);
    assert_eq!(post.image("large"), Some("cover-1000x700.jpg"));
    assert_eq!(post.image("medium"), Some("cover-600x400.jpg"));
    assert_eq!(post.image("thumbnail"), Some("cover-150x150.jpg"));
    assert_eq!(entities.save_count(), 1);
    assert_eq!(
        library.image_url(&post, "thumbnail").as_deref(),
        Some("/storage/public/blog/cover-150x150.jpg")
    );
}
