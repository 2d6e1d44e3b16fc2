use crate::config::{Config, MAX_UPLOAD_SIZE};
use crate::services::{FileRegistry, SshConnRegistry, StagedFile, StagedFileError};
use crate::ssh::handler::SessionState;
use rand::seq::SliceRandom;
use russh::keys::ssh_encoding::Encode;
use russh::server::Handle;
use russh_sftp::protocol::{
    Attrs, Data, ExtendedReply, File, FileAttributes, Handle as FileHandle, Name, OpenFlags,
    Packet, Status, StatusCode, Version,
};
use russh_sftp::server::StatusReply;
use std::collections::HashMap;
use std::io::SeekFrom;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Extended request advancing the session to `FileInfo`; the reply carries
/// the file id and the edit URL as SSH-encoded strings.
pub const FILE_INFO_REQUEST: &str = "file-info";

/// Extended request publishing the session into the registries.
pub const LISTEN_REQUEST: &str = "listen";

#[derive(Debug, thiserror::Error)]
pub enum SftpError {
    #[error("{0}")]
    Staged(#[from] StagedFileError),
    #[error("unsupported operation")]
    Unsupported,
    #[error("unknown file handle")]
    UnknownHandle,
    #[error("{0} request received in wrong state")]
    WrongState(&'static str),
    #[error("failed to encode reply")]
    Encode,
    #[error("end of file")]
    Eof,
    #[error("{0}")]
    Io(#[from] std::io::Error),
}

impl From<SftpError> for StatusReply {
    fn from(err: SftpError) -> Self {
        let code = match &err {
            SftpError::Unsupported => StatusCode::OpUnsupported,
            SftpError::UnknownHandle => StatusCode::BadMessage,
            SftpError::Eof => StatusCode::Eof,
            SftpError::Staged(StagedFileError::NotUploaded) => StatusCode::NoSuchFile,
            SftpError::Io(e) if e.kind() == std::io::ErrorKind::NotFound => StatusCode::NoSuchFile,
            _ => StatusCode::Failure,
        };
        code.with_message(err.to_string())
    }
}

enum OpenFile {
    Read(tokio::fs::File),
    Write(tokio::fs::File),
}

/// SFTP request server for one SSH session.
///
/// Serves the single staged upload plus read-back, and carries the
/// `file-info` / `listen` control requests that walk the session state
/// machine forward. Everything else is refused.
pub struct SftpSession {
    file_id: String,
    staged: Arc<StagedFile>,
    state: Arc<Mutex<SessionState>>,
    handle: Handle,
    files: Arc<FileRegistry>,
    ssh_conns: Arc<SshConnRegistry>,
    config: Arc<Config>,
    version: Option<u32>,
    open_files: HashMap<String, OpenFile>,
    next_handle_id: u64,
}

impl SftpSession {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        file_id: String,
        staged: Arc<StagedFile>,
        state: Arc<Mutex<SessionState>>,
        handle: Handle,
        files: Arc<FileRegistry>,
        ssh_conns: Arc<SshConnRegistry>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            file_id,
            staged,
            state,
            handle,
            files,
            ssh_conns,
            config,
            version: None,
            open_files: HashMap::new(),
            next_handle_id: 0,
        }
    }

    fn new_handle_id(&mut self) -> String {
        self.next_handle_id += 1;
        format!("{:x}", self.next_handle_id)
    }

    async fn staged_attrs(&self) -> Result<FileAttributes, SftpError> {
        let path = self
            .staged
            .path()
            .await
            .ok_or(StagedFileError::NotUploaded)?;
        let metadata = tokio::fs::metadata(&path).await?;
        Ok(FileAttributes::from(&metadata))
    }
}

impl russh_sftp::server::Handler for SftpSession {
    type Error = SftpError;

    fn unimplemented(&self) -> Self::Error {
        SftpError::Unsupported
    }

    async fn init(
        &mut self,
        version: u32,
        extensions: HashMap<String, String>,
    ) -> Result<Version, Self::Error> {
        if self.version.is_some() {
            warn!("duplicate SSH_FXP_INIT packet");
            return Err(SftpError::Unsupported);
        }
        self.version = Some(version);
        debug!(version, ?extensions, "SFTP session initialized");
        Ok(Version::new())
    }

    async fn open(
        &mut self,
        id: u32,
        filename: String,
        pflags: OpenFlags,
        _attrs: FileAttributes,
    ) -> Result<FileHandle, Self::Error> {
        let open_file = if pflags.contains(OpenFlags::WRITE) {
            debug!(path = %filename, "SFTP write request");
            OpenFile::Write(self.staged.begin_upload(&filename).await?)
        } else if pflags.contains(OpenFlags::READ) {
            debug!(path = %filename, "SFTP read request");
            OpenFile::Read(self.staged.open_read().await?)
        } else {
            return Err(SftpError::Unsupported);
        };

        let handle = self.new_handle_id();
        self.open_files.insert(handle.clone(), open_file);
        Ok(FileHandle { id, handle })
    }

    async fn write(
        &mut self,
        id: u32,
        handle: String,
        offset: u64,
        data: Vec<u8>,
    ) -> Result<Status, Self::Error> {
        if offset.saturating_add(data.len() as u64) > MAX_UPLOAD_SIZE {
            warn!(offset, length = data.len(), "upload size exceeds limit");
            return Err(StagedFileError::TooLarge(MAX_UPLOAD_SIZE).into());
        }
        let file = match self.open_files.get_mut(&handle) {
            Some(OpenFile::Write(file)) => file,
            Some(OpenFile::Read(_)) => return Err(SftpError::Unsupported),
            None => return Err(SftpError::UnknownHandle),
        };
        file.seek(SeekFrom::Start(offset)).await?;
        file.write_all(&data).await?;
        Ok(Status {
            id,
            status_code: StatusCode::Ok,
            error_message: "Ok".to_string(),
            language_tag: "en-US".to_string(),
        })
    }

    async fn read(
        &mut self,
        id: u32,
        handle: String,
        offset: u64,
        len: u32,
    ) -> Result<Data, Self::Error> {
        let file = match self.open_files.get_mut(&handle) {
            Some(OpenFile::Read(file)) => file,
            Some(OpenFile::Write(_)) => return Err(SftpError::Unsupported),
            None => return Err(SftpError::UnknownHandle),
        };
        file.seek(SeekFrom::Start(offset)).await?;
        let mut data = vec![0; len as usize];
        let mut total = 0;
        while total < data.len() {
            let n = file.read(&mut data[total..]).await?;
            if n == 0 {
                break;
            }
            total += n;
        }
        if total == 0 {
            return Err(SftpError::Eof);
        }
        data.truncate(total);
        Ok(Data { id, data })
    }

    async fn close(&mut self, id: u32, handle: String) -> Result<Status, Self::Error> {
        match self.open_files.remove(&handle) {
            Some(OpenFile::Write(mut file)) => {
                file.flush().await?;
                file.sync_all().await?;
                let mut state = self.state.lock().await;
                if state.try_advance(SessionState::None, SessionState::FileUpload) {
                    info!(fileid = %self.file_id, "file upload complete");
                }
            }
            Some(OpenFile::Read(_)) => {}
            None => return Err(SftpError::UnknownHandle),
        }
        Ok(Status {
            id,
            status_code: StatusCode::Ok,
            error_message: "Ok".to_string(),
            language_tag: "en-US".to_string(),
        })
    }

    async fn realpath(&mut self, id: u32, path: String) -> Result<Name, Self::Error> {
        // enough path normalization for stock clients to resolve their target
        let normalized = match path.trim_start_matches("./").trim_end_matches('/') {
            "" | "." => "/".to_string(),
            p if p.starts_with('/') => p.to_string(),
            p => format!("/{p}"),
        };
        Ok(Name {
            id,
            files: vec![File::dummy(normalized)],
        })
    }

    async fn stat(&mut self, id: u32, _path: String) -> Result<Attrs, Self::Error> {
        Ok(Attrs {
            id,
            attrs: self.staged_attrs().await?,
        })
    }

    async fn lstat(&mut self, id: u32, path: String) -> Result<Attrs, Self::Error> {
        self.stat(id, path).await
    }

    async fn fstat(&mut self, id: u32, handle: String) -> Result<Attrs, Self::Error> {
        if !self.open_files.contains_key(&handle) {
            return Err(SftpError::UnknownHandle);
        }
        Ok(Attrs {
            id,
            attrs: self.staged_attrs().await?,
        })
    }

    // no directory traversal
    async fn opendir(&mut self, _id: u32, path: String) -> Result<FileHandle, Self::Error> {
        debug!(path = %path, "rejecting directory listing");
        Err(SftpError::Unsupported)
    }

    async fn readdir(&mut self, _id: u32, _handle: String) -> Result<Name, Self::Error> {
        Err(SftpError::Unsupported)
    }

    // no file commands beyond the single upload
    async fn remove(&mut self, _id: u32, filename: String) -> Result<Status, Self::Error> {
        debug!(path = %filename, "rejecting remove command");
        Err(SftpError::Unsupported)
    }

    async fn rename(
        &mut self,
        _id: u32,
        oldpath: String,
        _newpath: String,
    ) -> Result<Status, Self::Error> {
        debug!(path = %oldpath, "rejecting rename command");
        Err(SftpError::Unsupported)
    }

    async fn mkdir(
        &mut self,
        _id: u32,
        _path: String,
        _attrs: FileAttributes,
    ) -> Result<Status, Self::Error> {
        Err(SftpError::Unsupported)
    }

    async fn rmdir(&mut self, _id: u32, _path: String) -> Result<Status, Self::Error> {
        Err(SftpError::Unsupported)
    }

    async fn setstat(
        &mut self,
        _id: u32,
        _path: String,
        _attrs: FileAttributes,
    ) -> Result<Status, Self::Error> {
        Err(SftpError::Unsupported)
    }

    async fn extended(
        &mut self,
        id: u32,
        request: String,
        _data: Vec<u8>,
    ) -> Result<Packet, Self::Error> {
        match request.as_str() {
            FILE_INFO_REQUEST => {
                {
                    let mut state = self.state.lock().await;
                    if !state.try_advance(SessionState::FileUpload, SessionState::FileInfo) {
                        warn!(state = ?*state, "file-info request received in wrong state");
                        return Err(SftpError::WrongState(FILE_INFO_REQUEST));
                    }
                }
                let edit_url = build_edit_url(&self.config.server_urls, &self.file_id);
                info!(fileid = %self.file_id, editurl = %edit_url, "sending file info");
                let data = encode_file_info(&self.file_id, &edit_url)?;
                Ok(Packet::ExtendedReply(ExtendedReply { id, data }))
            }
            LISTEN_REQUEST => {
                {
                    let mut state = self.state.lock().await;
                    if !state.try_advance(SessionState::FileInfo, SessionState::Listen) {
                        warn!(state = ?*state, "listen request received in wrong state");
                        return Err(SftpError::WrongState(LISTEN_REQUEST));
                    }
                }
                self.files.insert(&self.file_id, self.staged.clone()).await;
                self.ssh_conns
                    .insert(&self.file_id, self.handle.clone())
                    .await;
                info!(fileid = %self.file_id, "session listening for edits");
                Ok(Packet::Status(Status {
                    id,
                    status_code: StatusCode::Ok,
                    error_message: "Ok".to_string(),
                    language_tag: "en-US".to_string(),
                }))
            }
            other => {
                debug!(request = %other, "rejecting unknown extended request");
                Err(SftpError::Unsupported)
            }
        }
    }
}

/// Pick an edit-URL base at random; every configured URL is equally valid.
pub fn build_edit_url(server_urls: &[String], file_id: &str) -> String {
    let base = server_urls
        .choose(&mut rand::thread_rng())
        .map(String::as_str)
        .unwrap_or("http://localhost:3000");
    format!("{}/edit/{}", base.trim_end_matches('/'), file_id)
}

/// SSH-encode the `file-info` reply payload: two length-prefixed strings.
fn encode_file_info(file_id: &str, edit_url: &str) -> Result<Vec<u8>, SftpError> {
    let mut data = Vec::new();
    file_id.encode(&mut data).map_err(|_| SftpError::Encode)?;
    edit_url.encode(&mut data).map_err(|_| SftpError::Encode)?;
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edit_url_uses_a_configured_base() {
        let urls = vec![
            "https://edit.example.com".to_string(),
            "https://alt.example.com/".to_string(),
        ];
        for _ in 0..16 {
            let url = build_edit_url(&urls, "3b1f");
            assert!(
                url == "https://edit.example.com/edit/3b1f"
                    || url == "https://alt.example.com/edit/3b1f",
                "unexpected url: {url}"
            );
        }
    }

    #[test]
    fn file_info_payload_is_two_ssh_strings() {
        let data = encode_file_info("abc", "https://e/edit/abc").expect("encode");
        // 4-byte big-endian length prefix, then the bytes, twice over
        assert_eq!(&data[0..4], &3u32.to_be_bytes());
        assert_eq!(&data[4..7], b"abc");
        assert_eq!(&data[7..11], &(18u32).to_be_bytes());
        assert_eq!(&data[11..], b"https://e/edit/abc");
    }

    #[test]
    fn oversize_write_names_the_ceiling() {
        let err = SftpError::from(StagedFileError::TooLarge(MAX_UPLOAD_SIZE));
        assert_eq!(
            err.to_string(),
            format!("upload exceeds max size of {MAX_UPLOAD_SIZE} bytes")
        );
    }
}
