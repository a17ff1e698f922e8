//! File-system and dialog seams consumed by the session and tree synchronizer.
//! 工作階段與樹狀同步器所使用的檔案系統與對話框介面。

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// One entry of a directory listing.
/// 目錄列表中的單一項目。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub is_directory: bool,
    pub path: PathBuf,
}

/// A file picked through an open dialog, already read into memory.
/// 透過開啟對話框選取並已讀入記憶體的檔案。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenedFile {
    pub content: String,
    pub file_path: PathBuf,
}

/// File type offered by the save dialog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Icd,
    Json,
}

impl FileType {
    pub fn extension(self) -> &'static str {
        match self {
            FileType::Icd => "icd",
            FileType::Json => "json",
        }
    }
}

/// Failures reported at the gateway boundary. Cancellation is not an error.
/// 閘道層回報的錯誤；使用者取消不視為錯誤。
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{0} is not supported by this gateway")]
    Unsupported(&'static str),
    #[error("gateway request failed: {0}")]
    Failed(String),
}

impl GatewayError {
    fn io(path: &Path, source: io::Error) -> Self {
        GatewayError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Raw directory and file access.
/// 原始目錄與檔案存取。
pub trait FileSystemGateway {
    fn read_directory(&self, path: &Path) -> Result<Vec<DirEntry>, GatewayError>;
    fn read_file_content(&self, path: &Path) -> Result<String, GatewayError>;
    fn write_file_content(&self, path: &Path, content: &str) -> Result<(), GatewayError>;
}

impl<G: FileSystemGateway + ?Sized> FileSystemGateway for &G {
    fn read_directory(&self, path: &Path) -> Result<Vec<DirEntry>, GatewayError> {
        (**self).read_directory(path)
    }

    fn read_file_content(&self, path: &Path) -> Result<String, GatewayError> {
        (**self).read_file_content(path)
    }

    fn write_file_content(&self, path: &Path, content: &str) -> Result<(), GatewayError> {
        (**self).write_file_content(path, content)
    }
}

/// Native open/save dialogs.
/// 原生開啟/儲存對話框。
pub trait DialogGateway {
    /// Returns the picked files; an empty list means the user cancelled.
    fn open_file_dialog(&self, multi_select: bool) -> Result<Vec<OpenedFile>, GatewayError>;

    /// Writes `content` to a user-chosen path; `Ok(None)` means the user cancelled.
    fn save_file_dialog(
        &self,
        content: &str,
        file_type: FileType,
    ) -> Result<Option<PathBuf>, GatewayError>;
}

/// [`FileSystemGateway`] backed by the local disk.
/// 以本機磁碟實作的檔案系統閘道。
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFileSystem;

impl FileSystemGateway for LocalFileSystem {
    fn read_directory(&self, path: &Path) -> Result<Vec<DirEntry>, GatewayError> {
        let entries = fs::read_dir(path).map_err(|err| GatewayError::io(path, err))?;
        let mut listing = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|err| GatewayError::io(path, err))?;
            let entry_path = entry.path();
            listing.push(DirEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                is_directory: entry_path.is_dir(),
                path: entry_path,
            });
        }
        Ok(listing)
    }

    fn read_file_content(&self, path: &Path) -> Result<String, GatewayError> {
        fs::read_to_string(path).map_err(|err| GatewayError::io(path, err))
    }

    fn write_file_content(&self, path: &Path, content: &str) -> Result<(), GatewayError> {
        write_atomic(path, content.as_bytes()).map_err(|err| GatewayError::io(path, err))
    }
}

/// Writes data atomically through a temporary sibling file followed by rename.
/// 以臨時檔案搭配 rename 實現原子寫入。
pub fn write_atomic(path: &Path, data: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);
    fs::write(&tmp_path, data)?;
    fs::rename(&tmp_path, path)?;
    Ok(())
}
