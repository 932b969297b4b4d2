use std::path::PathBuf;
use std::sync::Arc;

use futures_util::StreamExt;
use salvo_core::async_trait;
use tokio::fs;
use tokio::io::{self, AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio_util::io::ReaderStream;
use tracing::warn;

use crate::composer::StoreComposer;
use crate::error::{StoreError, StoreResult};
use crate::stores::{
    ByteStream, Concatenator, ContentReader, DataStore, Finisher, LengthDeferrer, Terminator,
    UploadInfo,
};

/// Filesystem store: per upload a `<id>.bin` content file plus a `<id>.json`
/// sidecar descriptor. Sidecar writes go through a tmp file and rename, so a
/// crash never leaves a torn descriptor and partial append progress is
/// visible to the next request.
///
/// Registers every optional capability; use [`DiskStore::compose`] to get a
/// fully equipped composer.
#[derive(Clone, Debug)]
pub struct DiskStore {
    root: PathBuf,
}

impl Default for DiskStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DiskStore {
    pub fn new() -> Self {
        Self {
            root: "./tus-uploads".into(),
        }
    }

    #[must_use]
    pub fn disk_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        self
    }

    /// A composer with every capability of this store registered.
    pub fn compose(self) -> StoreComposer {
        let store = Arc::new(self);
        StoreComposer::new(store.clone())
            .use_reader(store.clone())
            .use_terminator(store.clone())
            .use_concatenator(store.clone())
            .use_length_deferrer(store.clone())
            .use_finisher(store)
    }

    async fn ensure_root(&self) -> StoreResult<()> {
        fs::create_dir_all(&self.root)
            .await
            .map_err(|e| StoreError::Other(e.to_string()))
    }

    fn data_path(&self, id: &str) -> PathBuf {
        self.root.join(format!("{id}.bin"))
    }

    fn meta_path(&self, id: &str) -> PathBuf {
        self.root.join(format!("{id}.json"))
    }

    fn meta_tmp_path(&self, id: &str) -> PathBuf {
        self.root.join(format!("{id}.json.tmp"))
    }

    async fn read_meta(&self, id: &str) -> StoreResult<UploadInfo> {
        let bytes = fs::read(self.meta_path(id)).await.map_err(StoreError::from)?;
        serde_json::from_slice::<UploadInfo>(&bytes)
            .map_err(|e| StoreError::Other(format!("invalid descriptor json: {e}")))
    }

    async fn write_meta_atomic(&self, meta: &UploadInfo) -> StoreResult<()> {
        let tmp = self.meta_tmp_path(&meta.id);
        let final_path = self.meta_path(&meta.id);

        let json = serde_json::to_vec(meta)
            .map_err(|e| StoreError::Other(format!("serialize descriptor json: {e}")))?;

        fs::write(&tmp, json)
            .await
            .map_err(|e| StoreError::Other(e.to_string()))?;

        #[cfg(windows)]
        {
            let _ = fs::remove_file(&final_path).await;
        }

        fs::rename(&tmp, &final_path)
            .await
            .map_err(|e| StoreError::Other(format!("rename descriptor tmp: {e}")))?;

        Ok(())
    }
}

#[async_trait]
impl DataStore for DiskStore {
    async fn create(&self, info: UploadInfo) -> StoreResult<UploadInfo> {
        self.ensure_root().await?;

        let mut info = info;
        info.offset = 0;

        let data_path = self.data_path(&info.id);
        fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&data_path)
            .await
            .map_err(|e| match e.kind() {
                io::ErrorKind::AlreadyExists => {
                    StoreError::Other(format!("upload id already exists: {}", info.id))
                }
                _ => StoreError::Other(e.to_string()),
            })?;

        if let Err(err) = self.write_meta_atomic(&info).await {
            let _ = fs::remove_file(&data_path).await;
            return Err(err);
        }

        Ok(info)
    }

    async fn append(&self, id: &str, offset: u64, stream: ByteStream) -> StoreResult<u64> {
        use std::io::SeekFrom;

        let mut meta = self.read_meta(id).await?;
        if meta.offset != offset {
            return Err(StoreError::OffsetMismatch {
                expected: meta.offset,
                got: offset,
            });
        }

        let mut file = fs::OpenOptions::new()
            .write(true)
            .open(self.data_path(id))
            .await
            .map_err(StoreError::from)?;

        file.seek(SeekFrom::Start(offset))
            .await
            .map_err(|e| StoreError::Other(e.to_string()))?;

        let mut written: u64 = 0;
        let mut failure: Option<StoreError> = None;
        let mut stream = stream;
        while let Some(item) = stream.next().await {
            let chunk = match item {
                Ok(chunk) => chunk,
                Err(e) => {
                    failure = Some(StoreError::Other(e.to_string()));
                    break;
                }
            };
            if chunk.is_empty() {
                continue;
            }
            if let Err(e) = file.write_all(&chunk).await {
                failure = Some(StoreError::Other(e.to_string()));
                break;
            }
            written += chunk.len() as u64;
        }

        if let Err(e) = file.flush().await {
            failure.get_or_insert(StoreError::Other(e.to_string()));
        }

        // Progress made before a failure stays durable and discoverable.
        meta.offset = offset + written;
        self.write_meta_atomic(&meta).await?;

        match failure {
            Some(err) => Err(err),
            None => Ok(written),
        }
    }

    async fn info(&self, id: &str) -> StoreResult<UploadInfo> {
        self.read_meta(id).await
    }
}

#[async_trait]
impl ContentReader for DiskStore {
    async fn reader(&self, id: &str) -> StoreResult<ByteStream> {
        let meta = self.read_meta(id).await?;
        let file = fs::File::open(self.data_path(id))
            .await
            .map_err(StoreError::from)?;
        // The content file never exceeds the offset, but cap anyway so a
        // descriptor lagging behind a crashed write cannot leak bytes.
        let stream = ReaderStream::new(file.take(meta.offset));
        Ok(Box::pin(stream))
    }
}

#[async_trait]
impl Terminator for DiskStore {
    async fn terminate(&self, id: &str) -> StoreResult<()> {
        let mut removed = false;

        match fs::remove_file(self.data_path(id)).await {
            Ok(()) => removed = true,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(StoreError::Other(e.to_string())),
        }

        match fs::remove_file(self.meta_path(id)).await {
            Ok(()) => removed = true,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(StoreError::Other(e.to_string())),
        }

        if removed { Ok(()) } else { Err(StoreError::NotFound) }
    }
}

#[async_trait]
impl Concatenator for DiskStore {
    async fn concatenate(&self, id: &str, partial_ids: &[String]) -> StoreResult<()> {
        let mut meta = self.read_meta(id).await?;

        let mut dest = fs::OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(self.data_path(id))
            .await
            .map_err(StoreError::from)?;

        let mut total: u64 = 0;
        for partial_id in partial_ids {
            // Missing source metadata means the partial is gone.
            self.read_meta(partial_id).await?;
            let mut source = fs::File::open(self.data_path(partial_id))
                .await
                .map_err(StoreError::from)?;
            total += io::copy(&mut source, &mut dest)
                .await
                .map_err(|e| StoreError::Other(e.to_string()))?;
        }

        dest.flush()
            .await
            .map_err(|e| StoreError::Other(e.to_string()))?;

        if meta.size != Some(total) {
            warn!(
                id,
                expected = ?meta.size,
                actual = total,
                "concatenated size differs from declared size"
            );
            meta.size = Some(total);
        }
        meta.offset = total;
        self.write_meta_atomic(&meta).await
    }
}

#[async_trait]
impl LengthDeferrer for DiskStore {
    async fn declare_length(&self, id: &str, size: u64) -> StoreResult<()> {
        let mut meta = self.read_meta(id).await?;

        if meta.size.is_some() {
            return Err(StoreError::Other(format!(
                "upload length already declared: {id}"
            )));
        }
        if size < meta.offset {
            return Err(StoreError::Other(format!(
                "declared length {size} is below the current offset {}",
                meta.offset
            )));
        }

        meta.size = Some(size);
        self.write_meta_atomic(&meta).await
    }
}

#[async_trait]
impl Finisher for DiskStore {
    async fn finish(&self, id: &str) -> StoreResult<()> {
        // Content is written in place; completion needs no assembly step.
        self.read_meta(id).await.map(|_| ())
    }
}
