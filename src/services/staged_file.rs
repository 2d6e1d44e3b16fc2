use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

#[derive(Debug, thiserror::Error)]
pub enum StagedFileError {
    #[error("file not uploaded yet")]
    NotUploaded,
    #[error("file already uploaded")]
    AlreadyUploaded,
    #[error("upload exceeds max size of {0} bytes")]
    TooLarge(u64),
    #[error("staged file io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Default)]
struct StagedState {
    filename: Option<String>,
    uploaded: bool,
}

/// The single file staged for one edit session.
///
/// Owns `<uploads_root>/<id>`; the filename is bound on the first (and only)
/// upload. Shared between the SSH session handler that created it and the
/// HTTP handlers that read it back or overwrite it on save, but destroyed
/// only through [`StagedFile::close`].
#[derive(Debug)]
pub struct StagedFile {
    id: String,
    temp_dir: PathBuf,
    state: Mutex<StagedState>,
}

impl StagedFile {
    /// Create a handle bound to its own temp directory. Nothing touches the
    /// filesystem until the first upload.
    pub fn new(uploads_root: &Path, id: &str) -> Self {
        Self {
            id: id.to_string(),
            temp_dir: uploads_root.join(id),
            state: Mutex::new(StagedState::default()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }

    pub async fn is_uploaded(&self) -> bool {
        self.state.lock().await.uploaded
    }

    /// Basename the upload was stored under, once uploaded.
    pub async fn filename(&self) -> Option<String> {
        self.state.lock().await.filename.clone()
    }

    /// Full on-disk path of the staged file, once uploaded.
    pub async fn path(&self) -> Option<PathBuf> {
        let state = self.state.lock().await;
        state
            .filename
            .as_ref()
            .map(|name| self.temp_dir.join(name))
    }

    /// Start the one-shot upload: bind the filename to the basename of the
    /// requested path and open the target for truncating write.
    pub async fn begin_upload(&self, requested_path: &str) -> Result<fs::File, StagedFileError> {
        let mut state = self.state.lock().await;
        if state.uploaded {
            return Err(StagedFileError::AlreadyUploaded);
        }

        let filename = sanitize_filename(requested_path);
        fs::DirBuilder::new()
            .recursive(true)
            .mode(0o755)
            .create(&self.temp_dir)
            .await?;

        let full_path = self.temp_dir.join(&filename);
        let file = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o644)
            .open(&full_path)
            .await?;

        info!(id = %self.id, path = %full_path.display(), "created staged file for upload");
        state.filename = Some(filename);
        state.uploaded = true;
        Ok(file)
    }

    /// Stage a complete document in one call; used by the HTTP upload path.
    pub async fn stage_bytes(
        &self,
        requested_path: &str,
        content: &[u8],
    ) -> Result<(), StagedFileError> {
        let mut file = self.begin_upload(requested_path).await?;
        file.write_all(content).await?;
        file.flush().await?;
        Ok(())
    }

    /// Open the staged file for reading. Fails until an upload succeeded.
    pub async fn open_read(&self) -> Result<fs::File, StagedFileError> {
        let path = self.uploaded_path().await?;
        Ok(fs::File::open(&path).await?)
    }

    /// Current contents of the staged file.
    pub async fn read_content(&self) -> Result<Vec<u8>, StagedFileError> {
        let path = self.uploaded_path().await?;
        Ok(fs::read(&path).await?)
    }

    /// Overwrite the staged file with new content; used by the save path.
    pub async fn write_content(&self, content: &[u8]) -> Result<(), StagedFileError> {
        let path = self.uploaded_path().await?;
        fs::write(&path, content).await?;
        debug!(id = %self.id, len = content.len(), "staged file overwritten");
        Ok(())
    }

    /// Remove the whole temp directory. Safe to call more than once; errors
    /// are logged and returned but never fatal to the caller.
    pub async fn close(&self) -> Result<(), StagedFileError> {
        match fs::remove_dir_all(&self.temp_dir).await {
            Ok(()) => {
                debug!(dir = %self.temp_dir.display(), "cleaned temp directory");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => {
                error!(dir = %self.temp_dir.display(), err = %e, "failed to clean temp directory");
                Err(e.into())
            }
        }
    }

    async fn uploaded_path(&self) -> Result<PathBuf, StagedFileError> {
        let state = self.state.lock().await;
        if !state.uploaded {
            return Err(StagedFileError::NotUploaded);
        }
        match &state.filename {
            Some(name) => Ok(self.temp_dir.join(name)),
            None => Err(StagedFileError::NotUploaded),
        }
    }
}

/// Reduce a client-supplied path to a safe basename.
fn sanitize_filename(requested_path: &str) -> String {
    let name = Path::new(requested_path)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("document");
    if name.is_empty() || name == "." || name == ".." {
        "document".to_string()
    } else {
        name.to_string()
    }
}
