//! Workspace directory listing exposed as a lazily expanded tree.
//! 以延遲展開樹狀結構呈現的工作區目錄。

use std::cmp::Ordering;
use std::path::{Path, PathBuf};

use crate::gateway::{DirEntry, FileSystemGateway, GatewayError};
use crate::tree::{ChildSource, TreeItem, TreeItemKind};

/// [`ChildSource`] backed by a [`FileSystemGateway`]. Item ids are the entries' paths.
/// 以檔案系統閘道為資料來源；項目識別碼為完整路徑。
#[derive(Debug, Clone)]
pub struct DirectorySource<G> {
    gateway: G,
    root: PathBuf,
}

impl<G: FileSystemGateway> DirectorySource<G> {
    pub fn new(gateway: G, root: impl Into<PathBuf>) -> Self {
        Self {
            gateway,
            root: root.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    fn list(&self, path: &Path) -> Result<Vec<TreeItem>, GatewayError> {
        let mut entries = self.gateway.read_directory(path)?;
        entries.sort_by(compare_entries);
        Ok(entries.into_iter().map(entry_item).collect())
    }
}

impl<G: FileSystemGateway> ChildSource for DirectorySource<G> {
    fn roots(&self) -> Result<Vec<TreeItem>, GatewayError> {
        self.list(&self.root)
    }

    fn children(&self, parent: &TreeItem) -> Result<Vec<TreeItem>, GatewayError> {
        if parent.kind != TreeItemKind::Directory {
            return Ok(Vec::new());
        }
        self.list(Path::new(&parent.id))
    }
}

/// Directories first, then case-insensitive by name.
fn compare_entries(a: &DirEntry, b: &DirEntry) -> Ordering {
    b.is_directory
        .cmp(&a.is_directory)
        .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
        .then_with(|| a.name.cmp(&b.name))
}

fn entry_item(entry: DirEntry) -> TreeItem {
    let kind = if entry.is_directory {
        TreeItemKind::Directory
    } else {
        TreeItemKind::File
    };
    TreeItem::new(
        entry.path.to_string_lossy().into_owned(),
        entry.name,
        kind,
        entry.is_directory,
    )
}
