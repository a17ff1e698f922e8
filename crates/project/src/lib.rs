//! Project graph store, multi-document session and lazy tree synchronization for IcdStudio.
//! IcdStudio 的專案圖資料、多文件工作階段與延遲樹狀同步核心模組。

pub mod document;
pub mod explorer;
pub mod gateway;
pub mod id;
pub mod outline;
pub mod properties;
pub mod selection;
pub mod session;
pub mod tree;

pub use document::{
    now_timestamp, DocumentError, Edge, EdgeData, EdgeDraft, EdgeUpdate, Node, NodeData,
    NodeDraft, NodeUpdate, Position, Project, ProjectMetadata, Removal, DEFAULT_EDGE_LABEL,
    DEFAULT_NODE_LABEL, DEFAULT_PROJECT_NAME, SCHEMA_VERSION,
};
pub use explorer::DirectorySource;
pub use gateway::{
    write_atomic, DialogGateway, DirEntry, FileSystemGateway, FileType, GatewayError,
    LocalFileSystem, OpenedFile,
};
pub use id::{allocate_unique_name, new_id, ProjectId};
pub use outline::{OutlineSource, OutlineTarget};
pub use properties::{flatten_property_keys, property_at, set_property_path, Properties};
pub use selection::Selection;
pub use session::{ImportReport, Session, SessionError, SessionSnapshot, SessionState};
pub use tree::{
    to_tree_nodes, ChildSource, ExpandOutcome, ExpandTicket, FetchFailure, FetchRequest,
    HierarchyTree, LoadState, RefreshReport, TreeError, TreeItem, TreeItemKind, TreeNode,
    TreeSynchronizer, VisibleRow,
};
