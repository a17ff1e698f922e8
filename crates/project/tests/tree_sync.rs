use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use icdstudio_project::{
    ChildSource, DirEntry, DirectorySource, ExpandTicket, FileSystemGateway, GatewayError,
    LoadState, TreeSynchronizer,
};

/// In-memory directory tree that counts `read_directory` calls per path.
#[derive(Default)]
struct FakeFs {
    dirs: HashMap<PathBuf, Vec<(String, bool)>>,
    broken: RefCell<Vec<PathBuf>>,
    reads: RefCell<HashMap<PathBuf, usize>>,
}

impl FakeFs {
    fn workspace() -> Self {
        let mut dirs = HashMap::new();
        dirs.insert(
            PathBuf::from("/ws"),
            vec![
                ("readme.md".into(), false),
                ("specs".into(), true),
                ("archive".into(), true),
            ],
        );
        dirs.insert(
            PathBuf::from("/ws/specs"),
            vec![("bus.icd".into(), false), ("can".into(), true)],
        );
        dirs.insert(PathBuf::from("/ws/specs/can"), vec![("frame.icd".into(), false)]);
        dirs.insert(PathBuf::from("/ws/archive"), vec![]);
        Self {
            dirs,
            ..Self::default()
        }
    }

    fn reads(&self, path: &str) -> usize {
        self.reads.borrow().get(Path::new(path)).copied().unwrap_or(0)
    }

    fn break_dir(&self, path: &str) {
        self.broken.borrow_mut().push(PathBuf::from(path));
    }

    fn heal(&self) {
        self.broken.borrow_mut().clear();
    }
}

impl FileSystemGateway for FakeFs {
    fn read_directory(&self, path: &Path) -> Result<Vec<DirEntry>, GatewayError> {
        *self.reads.borrow_mut().entry(path.to_path_buf()).or_default() += 1;
        if self.broken.borrow().iter().any(|broken| broken == path) {
            return Err(GatewayError::Failed(format!("permission denied: {}", path.display())));
        }
        let entries = self
            .dirs
            .get(path)
            .ok_or_else(|| GatewayError::Failed(format!("not found: {}", path.display())))?;
        Ok(entries
            .iter()
            .map(|(name, is_directory)| DirEntry {
                name: name.clone(),
                is_directory: *is_directory,
                path: path.join(name),
            })
            .collect())
    }

    fn read_file_content(&self, _path: &Path) -> Result<String, GatewayError> {
        Err(GatewayError::Unsupported("read_file_content"))
    }

    fn write_file_content(&self, _path: &Path, _content: &str) -> Result<(), GatewayError> {
        Err(GatewayError::Unsupported("write_file_content"))
    }
}

fn synced(fs: &FakeFs) -> TreeSynchronizer<DirectorySource<&FakeFs>> {
    let mut sync = TreeSynchronizer::new(DirectorySource::new(fs, "/ws"));
    sync.refresh().unwrap();
    sync
}

#[test]
fn roots_are_sorted_directories_first() {
    let fs = FakeFs::workspace();
    let sync = synced(&fs);
    let labels: Vec<_> = sync
        .tree()
        .roots()
        .iter()
        .map(|node| node.label.as_str())
        .collect();
    assert_eq!(labels, vec!["archive", "specs", "readme.md"]);
}

#[test]
fn repeated_expand_and_collapse_fetch_once() {
    let fs = FakeFs::workspace();
    let mut sync = synced(&fs);

    for _ in 0..3 {
        sync.expand(&["/ws/specs"]).unwrap();
        sync.collapse(&["/ws/specs"]).unwrap();
    }
    sync.expand(&["/ws/specs"]).unwrap();

    assert_eq!(fs.reads("/ws/specs"), 1);
    let specs = sync.tree().find(&["/ws/specs"]).unwrap();
    assert!(specs.is_expanded);
    assert_eq!(specs.children.len(), 2);
}

#[test]
fn expanding_one_directory_shares_its_siblings() {
    let fs = FakeFs::workspace();
    let mut sync = synced(&fs);
    let before = sync.tree().clone();

    sync.expand(&["/ws/specs"]).unwrap();
    let after = sync.tree();

    assert!(Arc::ptr_eq(&before.roots()[0], &after.roots()[0]));
    assert!(Arc::ptr_eq(&before.roots()[2], &after.roots()[2]));
    assert!(!Arc::ptr_eq(&before.roots()[1], &after.roots()[1]));
    assert!(after.revision() > before.revision());
}

#[test]
fn failed_listing_is_distinguishable_from_empty_directory() {
    let fs = FakeFs::workspace();
    let mut sync = synced(&fs);
    fs.break_dir("/ws/specs");

    let failed = sync.expand(&["/ws/specs"]).unwrap();
    assert!(failed.error.is_some());
    sync.expand(&["/ws/archive"]).unwrap();

    let specs = sync.tree().find(&["/ws/specs"]).unwrap();
    let archive = sync.tree().find(&["/ws/archive"]).unwrap();
    assert!(!specs.is_expanded);
    assert!(specs.load_error().is_some());
    assert!(archive.is_expanded);
    assert_eq!(archive.load_state, LoadState::Loaded);
    assert!(specs.children.is_empty() && archive.children.is_empty());

    fs.heal();
    sync.expand(&["/ws/specs"]).unwrap();
    assert!(sync.tree().find(&["/ws/specs"]).unwrap().is_loaded());
    assert_eq!(fs.reads("/ws/specs"), 2);
}

#[test]
fn in_flight_expand_is_not_duplicated() {
    let fs = FakeFs::workspace();
    let mut sync = synced(&fs);

    let ExpandTicket::Fetch(request) = sync.begin_expand(&["/ws/specs"]).unwrap() else {
        panic!("first expand should request a fetch");
    };
    let second = sync.expand(&["/ws/specs"]).unwrap();
    assert!(!second.fetched);
    assert_eq!(fs.reads("/ws/specs"), 0);

    let listing = sync.source().children(&request.item);
    assert!(sync.complete_expand(&request.node_id, listing).unwrap());
    assert_eq!(fs.reads("/ws/specs"), 1);
    assert_eq!(sync.tree().find(&["/ws/specs"]).unwrap().children.len(), 2);
}

#[test]
fn refresh_keeps_nested_expansion_and_reports_failures() {
    let fs = FakeFs::workspace();
    let mut sync = synced(&fs);
    sync.expand(&["/ws/specs"]).unwrap();
    sync.expand(&["/ws/specs", "/ws/specs/can"]).unwrap();

    fs.break_dir("/ws/specs/can");
    let report = sync.refresh().unwrap();

    assert_eq!(fs.reads("/ws"), 2);
    assert_eq!(fs.reads("/ws/specs"), 2);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].node_id, "/ws/specs/can");

    let specs = sync.tree().find(&["/ws/specs"]).unwrap();
    assert!(specs.is_expanded);
    let can = sync.tree().find(&["/ws/specs", "/ws/specs/can"]).unwrap();
    assert!(!can.is_expanded);
    assert!(matches!(can.load_state, LoadState::Failed(_)));
}

#[test]
fn failed_root_listing_keeps_previous_tree() {
    let fs = FakeFs::workspace();
    let mut sync = synced(&fs);
    sync.expand(&["/ws/specs"]).unwrap();
    let before = sync.tree().clone();

    fs.break_dir("/ws");
    assert!(sync.refresh().is_err());
    assert_eq!(sync.tree(), &before);
}
