//! File Service
//!
//! Attaches uploads to owners and keeps each owner's files in sync, scoped
//! by type tag. Every write goes through `save_file`, which names the blob,
//! downsizes oversized images, stores the bytes, and records the result.

use std::collections::HashSet;
use std::sync::Arc;

use fileable_core::{FileConfig, FileOwner, Id, Identifiable, OwnerRef, DEFAULT_FILE_TYPE};
use tracing::{debug, info, instrument, warn};

use crate::error::{FileError, FileResult};
use crate::model::{FileRecord, UploadedFile};
use crate::naming::{storage_path, unique_original_name};
use crate::owner::{OwnerRegistry, SharedOwner};
use crate::storage::{Disk, Disks, FileMetadata};
use crate::store::FileStore;
use crate::transform::{ImageTransform, MakeMode};

pub struct FileService<St: FileStore> {
    store: Arc<St>,
    disks: Arc<Disks>,
    owners: Arc<OwnerRegistry>,
    config: FileConfig,
}

impl<St: FileStore> FileService<St> {
    pub fn new(store: Arc<St>, disks: Arc<Disks>, config: FileConfig) -> Self {
        Self {
            store,
            disks,
            owners: Arc::new(OwnerRegistry::new()),
            config,
        }
    }

    pub fn with_owners(mut self, owners: Arc<OwnerRegistry>) -> Self {
        self.owners = owners;
        self
    }

    pub fn config(&self) -> &FileConfig {
        &self.config
    }

    pub fn disks(&self) -> &Disks {
        &self.disks
    }

    /// Replace every file of `file_type` with a single new upload
    #[instrument(skip(self, owner, upload), fields(owner = %owner.owner_ref()))]
    pub async fn set_single_file<O: FileOwner + ?Sized>(
        &self,
        owner: &O,
        upload: UploadedFile,
        disk: &str,
        file_type: &str,
    ) -> FileResult<FileRecord> {
        let owner = owner.owner_ref();

        let old_files = self.store.for_owner_and_type(&owner, file_type).await?;
        for old_file in &old_files {
            self.delete_record(old_file).await?;
        }

        let file = self.save_file(&owner, &upload, disk, file_type).await?;
        info!(replaced = old_files.len(), path = %file.path, "File set");

        Ok(file)
    }

    /// Add uploads to `file_type` without touching existing files.
    ///
    /// Records are returned in upload order.
    #[instrument(skip(self, owner, uploads), fields(owner = %owner.owner_ref(), count = uploads.len()))]
    pub async fn attach_files<O: FileOwner + ?Sized>(
        &self,
        owner: &O,
        uploads: Vec<UploadedFile>,
        disk: &str,
        file_type: &str,
    ) -> FileResult<Vec<FileRecord>> {
        let owner = owner.owner_ref();

        let mut files = Vec::with_capacity(uploads.len());
        for upload in &uploads {
            files.push(self.save_file(&owner, upload, disk, file_type).await?);
        }

        Ok(files)
    }

    /// Reconcile the files of `file_type` against `keep_ids` and new uploads.
    ///
    /// Existing files whose ID is not in `keep_ids` are deleted, uploads are
    /// attached, and the full resulting set is returned. IDs in `keep_ids`
    /// that do not belong to this owner and type are ignored.
    ///
    /// New files are stored before old ones are removed, so a failure part
    /// way through never loses files the caller meant to keep or add; it can
    /// leave files that were due for deletion in place.
    #[instrument(skip(self, owner, uploads), fields(owner = %owner.owner_ref(), uploads = uploads.len()))]
    pub async fn sync_files<O: FileOwner + ?Sized>(
        &self,
        owner: &O,
        uploads: Vec<UploadedFile>,
        keep_ids: &[Id],
        disk: &str,
        file_type: &str,
    ) -> FileResult<Vec<FileRecord>> {
        let owner = owner.owner_ref();

        let keep: HashSet<Id> = keep_ids.iter().copied().collect();
        let stale: Vec<Id> = self
            .store
            .ids_for_owner_and_type(&owner, file_type)
            .await?
            .into_iter()
            .filter(|id| !keep.contains(id))
            .collect();

        if !uploads.is_empty() {
            self.attach_files(&owner, uploads, disk, file_type).await?;
        }

        let deletions = self
            .store
            .for_owner_type_and_ids(&owner, file_type, &stale)
            .await?;
        for file in &deletions {
            self.delete_record(file).await?;
        }

        let files = self.store.for_owner_and_type(&owner, file_type).await?;
        info!(deleted = deletions.len(), total = files.len(), "Files synced");

        Ok(files)
    }

    /// Every file of an owner, all type tags
    pub async fn files<O: FileOwner + ?Sized>(&self, owner: &O) -> FileResult<Vec<FileRecord>> {
        Ok(self.store.for_owner(&owner.owner_ref()).await?)
    }

    /// Files of an owner with one type tag
    pub async fn files_of_type<O: FileOwner + ?Sized>(
        &self,
        owner: &O,
        file_type: &str,
    ) -> FileResult<Vec<FileRecord>> {
        Ok(self
            .store
            .for_owner_and_type(&owner.owner_ref(), file_type)
            .await?)
    }

    /// Files of an owner tagged "attachment"
    pub async fn attachments<O: FileOwner + ?Sized>(&self, owner: &O) -> FileResult<Vec<FileRecord>> {
        self.files_of_type(owner, DEFAULT_FILE_TYPE).await
    }

    /// Get a file by ID
    pub async fn get(&self, id: Id) -> FileResult<Option<FileRecord>> {
        Ok(self.store.get(id).await?)
    }

    /// Public URL of a file on its disk
    pub async fn url(&self, file: &FileRecord) -> FileResult<String> {
        Ok(self.disk(&file.disk)?.url(&file.path).await?)
    }

    /// The entity a file is attached to
    pub async fn owner_of(&self, file: &FileRecord) -> FileResult<Option<SharedOwner>> {
        self.owners.resolve(&file.owner()).await
    }

    /// Delete a file and its blob
    #[instrument(skip(self))]
    pub async fn delete(&self, id: Id) -> FileResult<()> {
        let file = self.store.get(id).await?.ok_or(FileError::NotFound(id))?;
        self.delete_record(&file).await
    }

    /// Remove the blob, then the record.
    ///
    /// A blob that cannot be removed (already gone, disk unavailable) is
    /// logged and does not keep the record alive.
    async fn delete_record(&self, file: &FileRecord) -> FileResult<()> {
        let id = file.id().ok_or_else(|| {
            FileError::InvalidArgument(format!("file {} has not been persisted", file.path))
        })?;

        match self.disks.get(&file.disk) {
            Some(disk) => {
                if let Err(e) = disk.delete(&file.path).await {
                    warn!(id, disk = %file.disk, path = %file.path, error = %e, "Failed to delete blob");
                }
            }
            None => warn!(id, disk = %file.disk, path = %file.path, "Blob is on an unknown disk"),
        }

        self.store.delete(id).await?;
        debug!(id, path = %file.path, "File deleted");

        Ok(())
    }

    async fn save_file(
        &self,
        owner: &OwnerRef,
        upload: &UploadedFile,
        disk_name: &str,
        file_type: &str,
    ) -> FileResult<FileRecord> {
        let disk = self.disk(disk_name)?;

        let original_name = unique_original_name(&upload.original_name);
        let path = storage_path(file_type, &original_name);

        let written = self.upload_file(upload, disk.as_ref(), &path).await?;
        let size = disk.size(&path).await?;
        if size != written.size {
            warn!(path = %path, written = written.size, stored = size, "Stored size differs from bytes written");
        }

        let mut file = FileRecord::new(
            owner,
            disk_name,
            file_type,
            &path,
            original_name,
            &upload.mime_type,
            upload.extension(),
            size as i64,
        );

        if let Err(e) = self.store.create(&mut file).await {
            // Keep the disk free of blobs no record points at
            if let Err(cleanup) = disk.delete(&path).await {
                warn!(path = %path, error = %cleanup, "Failed to remove blob of unsaved file");
            }
            return Err(e.into());
        }

        info!(
            id = file.id,
            path = %file.path,
            size = file.size,
            client_name = %upload.original_name,
            "File saved"
        );

        Ok(file)
    }

    /// Write an upload to disk, downsizing it first if it is an oversized image
    async fn upload_file(
        &self,
        upload: &UploadedFile,
        disk: &dyn Disk,
        path: &str,
    ) -> FileResult<FileMetadata> {
        let data = if self.needs_resize(upload) {
            self.resize_image(upload)?
        } else {
            upload.data.clone()
        };

        let metadata = disk.put(path, data).await?;
        debug!(path, size = metadata.size, content_type = %metadata.content_type, "Blob written");

        Ok(metadata)
    }

    fn needs_resize(&self, upload: &UploadedFile) -> bool {
        upload.size() > self.config.image_max_filesize && upload.has_image_extension()
    }

    /// Scale an image to the configured width, never wider than the source
    fn resize_image(&self, upload: &UploadedFile) -> FileResult<bytes::Bytes> {
        let builder = ImageTransform::builder(upload)?;
        let natural_width = builder.target_size().0;
        let width = self.config.image_resize_width.min(natural_width);

        let transform = builder.size(width, None).build();
        let data = transform.to_stream(MakeMode::Resize)?;

        debug!(
            from = ?transform.natural_size(),
            to = ?transform.size(),
            bytes_in = upload.size(),
            bytes_out = data.len(),
            "Image downsized"
        );

        Ok(data)
    }

    fn disk(&self, name: &str) -> FileResult<Arc<dyn Disk>> {
        self.disks
            .get(name)
            .ok_or_else(|| FileError::UnknownDisk(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryDisk;
    use crate::store::MemoryFileStore;
    use fileable_core::DEFAULT_DISK;
    use image::{DynamicImage, GenericImageView, ImageOutputFormat, Rgb, RgbImage};
    use std::io::Cursor;

    struct Post {
        id: Id,
    }

    impl FileOwner for Post {
        fn owner_type(&self) -> &str {
            "Post"
        }

        fn owner_id(&self) -> Id {
            self.id
        }
    }

    struct Harness {
        service: FileService<MemoryFileStore>,
        store: Arc<MemoryFileStore>,
        disk: Arc<MemoryDisk>,
    }

    fn harness(config: FileConfig) -> Harness {
        let store = Arc::new(MemoryFileStore::new());
        let disk = Arc::new(MemoryDisk::new(DEFAULT_DISK));
        let disks = Arc::new(Disks::new().with(disk.clone()));
        Harness {
            service: FileService::new(store.clone(), disks, config),
            store,
            disk,
        }
    }

    fn text(name: &str) -> UploadedFile {
        UploadedFile::guess(name, format!("contents of {}", name))
    }

    /// Noisy image so PNG compression cannot shrink it much
    fn noisy_png(name: &str, width: u32, height: u32) -> UploadedFile {
        let img = RgbImage::from_fn(width, height, |x, y| {
            let mut v = x.wrapping_mul(73_856_093) ^ y.wrapping_mul(19_349_663);
            v ^= v >> 13;
            v = v.wrapping_mul(0x5bd1_e995);
            v ^= v >> 15;
            Rgb([v as u8, (v >> 8) as u8, (v >> 16) as u8])
        });
        let mut buffer = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img)
            .write_to(&mut buffer, ImageOutputFormat::Png)
            .unwrap();
        UploadedFile::new(name, "image/png", buffer.into_inner())
    }

    fn ids(files: &[FileRecord]) -> HashSet<Id> {
        files.iter().filter_map(|f| f.id).collect()
    }

    #[tokio::test]
    async fn test_attach_files_in_order() {
        let h = harness(FileConfig::default());
        let post = Post { id: 1 };

        let files = h
            .service
            .attach_files(&post, vec![text("a.txt"), text("b.txt"), text("c.txt")], "public", "attachment")
            .await
            .unwrap();

        assert_eq!(files.len(), 3);
        assert!(files[0].original_name.starts_with("a-"));
        assert!(files[1].original_name.starts_with("b-"));
        assert!(files[2].original_name.starts_with("c-"));
        assert!(files.iter().all(|f| f.path.starts_with("attachment/")));
        assert!(files.iter().all(|f| f.owner() == OwnerRef::new("Post", 1)));
        assert_eq!(h.disk.len().await, 3);
    }

    #[tokio::test]
    async fn test_saved_record_metadata() {
        let h = harness(FileConfig::default());
        let upload = UploadedFile::new("Quarterly Report.PDF", "application/x-custom", "%PDF-1.4");

        let file = h
            .service
            .set_single_file(&Post { id: 1 }, upload, "public", "report")
            .await
            .unwrap();

        assert!(file.original_name.starts_with("quarterly-report-"));
        assert!(file.original_name.ends_with(".pdf"));
        assert_eq!(file.path, format!("report/{}", file.original_name));
        // Client metadata is stored as given
        assert_eq!(file.mime_type, "application/x-custom");
        assert_eq!(file.extension, "PDF");
        assert_eq!(file.size, 8);
        assert_eq!(file.disk, "public");
        assert_eq!(file.file_type, "report");
    }

    #[tokio::test]
    async fn test_set_single_file_replaces_type() {
        let h = harness(FileConfig::default());
        let post = Post { id: 1 };

        let old = h
            .service
            .attach_files(&post, vec![text("a.txt"), text("b.txt")], "public", "avatar")
            .await
            .unwrap();
        let other = h
            .service
            .attach_files(&post, vec![text("keep.txt")], "public", "attachment")
            .await
            .unwrap();

        let new = h
            .service
            .set_single_file(&post, text("new.txt"), "public", "avatar")
            .await
            .unwrap();

        let avatars = h.service.files_of_type(&post, "avatar").await.unwrap();
        assert_eq!(ids(&avatars), ids(&[new]));
        for file in &old {
            assert!(!h.disk.exists(&file.path).await.unwrap());
        }
        assert_eq!(ids(&h.service.attachments(&post).await.unwrap()), ids(&other));
    }

    #[tokio::test]
    async fn test_sync_files_set_algebra() {
        let h = harness(FileConfig::default());
        let post = Post { id: 1 };

        let existing = h
            .service
            .attach_files(&post, vec![text("a.txt"), text("b.txt"), text("c.txt")], "public", "attachment")
            .await
            .unwrap();
        let keep = vec![existing[0].id.unwrap(), existing[2].id.unwrap()];

        let files = h
            .service
            .sync_files(&post, vec![text("d.txt")], &keep, "public", "attachment")
            .await
            .unwrap();

        let new_ids: HashSet<Id> = ids(&files).difference(&ids(&existing)).copied().collect();
        assert_eq!(new_ids.len(), 1);

        let mut expected: HashSet<Id> = keep.iter().copied().collect();
        expected.extend(new_ids);
        assert_eq!(ids(&files), expected);

        assert!(!h.disk.exists(&existing[1].path).await.unwrap());
        assert_eq!(h.disk.len().await, 3);
    }

    #[tokio::test]
    async fn test_sync_files_is_idempotent() {
        let h = harness(FileConfig::default());
        let post = Post { id: 1 };

        let existing = h
            .service
            .attach_files(&post, vec![text("a.txt"), text("b.txt")], "public", "attachment")
            .await
            .unwrap();
        let keep = vec![existing[1].id.unwrap()];

        let once = h
            .service
            .sync_files(&post, vec![], &keep, "public", "attachment")
            .await
            .unwrap();
        let twice = h
            .service
            .sync_files(&post, vec![], &keep, "public", "attachment")
            .await
            .unwrap();

        assert_eq!(ids(&once), ids(&twice));
        assert_eq!(ids(&once), keep.into_iter().collect::<HashSet<_>>());
    }

    #[tokio::test]
    async fn test_sync_files_with_empty_keep_deletes_type() {
        let h = harness(FileConfig::default());
        let post = Post { id: 1 };

        h.service
            .attach_files(&post, vec![text("a.txt"), text("b.txt")], "public", "attachment")
            .await
            .unwrap();
        h.service
            .attach_files(&post, vec![text("cover.txt")], "public", "cover")
            .await
            .unwrap();

        let files = h
            .service
            .sync_files(&post, vec![text("c.txt")], &[], "public", "attachment")
            .await
            .unwrap();

        assert_eq!(files.len(), 1);
        assert!(files[0].original_name.starts_with("c-"));
        assert_eq!(h.service.files_of_type(&post, "cover").await.unwrap().len(), 1);
        assert_eq!(h.service.files(&post).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_sync_files_ignores_foreign_keep_ids() {
        let h = harness(FileConfig::default());
        let post = Post { id: 1 };
        let other = Post { id: 2 };

        let theirs = h
            .service
            .attach_files(&other, vec![text("theirs.txt")], "public", "attachment")
            .await
            .unwrap();
        h.service
            .attach_files(&post, vec![text("mine.txt")], "public", "attachment")
            .await
            .unwrap();

        let files = h
            .service
            .sync_files(&post, vec![], &[theirs[0].id.unwrap()], "public", "attachment")
            .await
            .unwrap();

        assert!(files.is_empty());
        assert_eq!(ids(&h.service.attachments(&other).await.unwrap()), ids(&theirs));
    }

    #[tokio::test]
    async fn test_delete_cascades_to_blob() {
        let h = harness(FileConfig::default());
        let post = Post { id: 1 };

        let file = h
            .service
            .set_single_file(&post, text("a.txt"), "public", "attachment")
            .await
            .unwrap();
        let id = file.id.unwrap();

        h.service.delete(id).await.unwrap();

        assert!(h.service.get(id).await.unwrap().is_none());
        assert!(h.disk.size(&file.path).await.is_err());
        assert!(h.disk.get(&file.path).await.is_err());
        assert!(matches!(h.service.delete(id).await, Err(FileError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_delete_with_missing_blob() {
        let h = harness(FileConfig::default());
        let file = h
            .service
            .set_single_file(&Post { id: 1 }, text("a.txt"), "public", "attachment")
            .await
            .unwrap();

        h.disk.delete(&file.path).await.unwrap();
        h.service.delete(file.id.unwrap()).await.unwrap();

        assert!(h.store.is_empty().await);
    }

    #[tokio::test]
    async fn test_identical_names_get_distinct_paths() {
        let h = harness(FileConfig::default());
        let upload = UploadedFile::new("photo.jpg", "image/jpeg", vec![1u8, 2, 3]);

        let files = h
            .service
            .attach_files(&Post { id: 1 }, vec![upload.clone(), upload], "public", "attachment")
            .await
            .unwrap();

        assert_ne!(files[0].path, files[1].path);
    }

    #[tokio::test]
    async fn test_oversized_image_is_downsized() {
        let config = FileConfig {
            image_max_filesize: 1000,
            image_resize_width: 32,
            ..FileConfig::default()
        };
        let h = harness(config);
        let upload = noisy_png("photo.png", 64, 48);
        assert!(upload.size() > 1000);

        let file = h
            .service
            .set_single_file(&Post { id: 1 }, upload.clone(), "public", "attachment")
            .await
            .unwrap();

        let stored = h.disk.get(&file.path).await.unwrap();
        assert_ne!(stored, upload.data);
        let decoded = image::load_from_memory(&stored).unwrap();
        assert_eq!(decoded.dimensions(), (32, 24));
        assert_eq!(file.size, stored.len() as i64);
    }

    #[tokio::test]
    async fn test_resize_never_widens() {
        let config = FileConfig {
            image_max_filesize: 1000,
            ..FileConfig::default()
        };
        let h = harness(config);
        let upload = noisy_png("photo.PNG", 64, 48);

        let file = h
            .service
            .set_single_file(&Post { id: 1 }, upload, "public", "attachment")
            .await
            .unwrap();

        let stored = h.disk.get(&file.path).await.unwrap();
        assert_eq!(image::load_from_memory(&stored).unwrap().dimensions(), (64, 48));
    }

    #[tokio::test]
    async fn test_small_images_and_other_files_are_stored_verbatim() {
        let config = FileConfig {
            image_max_filesize: 1000,
            ..FileConfig::default()
        };
        let h = harness(config);

        let pdf = UploadedFile::new("big.pdf", "application/pdf", vec![7u8; 1500]);
        let small = noisy_png("small.png", 4, 4);
        assert!(small.size() <= 1000);

        let files = h
            .service
            .attach_files(&Post { id: 1 }, vec![pdf.clone(), small.clone()], "public", "attachment")
            .await
            .unwrap();

        assert_eq!(h.disk.get(&files[0].path).await.unwrap(), pdf.data);
        assert_eq!(h.disk.get(&files[1].path).await.unwrap(), small.data);
    }

    #[tokio::test]
    async fn test_oversized_fake_image_fails_without_record() {
        let config = FileConfig {
            image_max_filesize: 10,
            ..FileConfig::default()
        };
        let h = harness(config);
        let upload = UploadedFile::new("fake.jpg", "image/jpeg", vec![0u8; 64]);

        let result = h
            .service
            .set_single_file(&Post { id: 1 }, upload, "public", "attachment")
            .await;

        assert!(matches!(result, Err(FileError::InvalidArgument(_))));
        assert!(h.store.is_empty().await);
        assert!(h.disk.is_empty().await);
    }

    #[tokio::test]
    async fn test_failed_sync_keeps_existing_and_stored_files() {
        let config = FileConfig {
            image_max_filesize: 10,
            ..FileConfig::default()
        };
        let h = harness(config);
        let post = Post { id: 1 };

        let existing = h
            .service
            .attach_files(&post, vec![text("a.txt"), text("b.txt")], "public", "attachment")
            .await
            .unwrap();

        let uploads = vec![
            text("new.txt"),
            UploadedFile::new("fake.jpg", "image/jpeg", vec![0u8; 64]),
        ];
        let result = h
            .service
            .sync_files(&post, uploads, &[], "public", "attachment")
            .await;
        assert!(matches!(result, Err(FileError::InvalidArgument(_))));

        let files = h.service.attachments(&post).await.unwrap();
        assert_eq!(files.len(), 3);
        for file in &existing {
            assert!(h.service.get(file.id.unwrap()).await.unwrap().is_some());
            assert!(h.disk.exists(&file.path).await.unwrap());
        }
        let added: Vec<_> = files
            .iter()
            .filter(|f| f.original_name.starts_with("new-"))
            .collect();
        assert_eq!(added.len(), 1);
        assert!(h.disk.exists(&added[0].path).await.unwrap());
        assert_eq!(h.disk.len().await, 3);
    }

    #[tokio::test]
    async fn test_oversized_gif_is_stored_verbatim() {
        let config = FileConfig {
            image_max_filesize: 10,
            ..FileConfig::default()
        };
        let h = harness(config);
        let upload = UploadedFile::new("anim.gif", "image/gif", vec![0u8; 64]);

        let file = h
            .service
            .set_single_file(&Post { id: 1 }, upload.clone(), "public", "attachment")
            .await
            .unwrap();

        assert_eq!(h.disk.get(&file.path).await.unwrap(), upload.data);
        assert_eq!(file.size, 64);
    }

    #[tokio::test]
    async fn test_unknown_disk() {
        let h = harness(FileConfig::default());

        let result = h
            .service
            .attach_files(&Post { id: 1 }, vec![text("a.txt")], "s3", "attachment")
            .await;

        assert!(matches!(result, Err(FileError::UnknownDisk(ref d)) if d == "s3"));
        assert!(h.store.is_empty().await);
    }

    #[tokio::test]
    async fn test_url_and_owner_lookup() {
        let owners = OwnerRegistry::new().with("Post", |id| async move {
            Some(Arc::new(Post { id }) as SharedOwner)
        });
        let h = harness(FileConfig::default());
        let service = h.service.with_owners(Arc::new(owners));

        let file = service
            .set_single_file(&Post { id: 42 }, text("a.txt"), "public", "attachment")
            .await
            .unwrap();

        let url = service.url(&file).await.unwrap();
        assert_eq!(url, format!("/memory/public/{}", file.path));

        let owner = service.owner_of(&file).await.unwrap().unwrap();
        assert_eq!(owner.owner_id(), 42);
        assert_eq!(owner.owner_type(), "Post");
    }
}
