use std::collections::HashSet;
use std::sync::Arc;

use log::{debug, warn};
use thiserror::Error;

use crate::gateway::GatewayError;
use crate::selection::Selection;

/// What a tree item stands for; lets renderers pick icons and carets.
/// 樹狀項目的種類，供繪製端選擇圖示。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TreeItemKind {
    Directory,
    File,
    Project,
    NodeGroup,
    EdgeGroup,
    Node,
    Edge,
}

/// Shell describing one external item before it becomes a [`TreeNode`].
/// 外部資料來源中的單一項目。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeItem {
    pub id: String,
    pub label: String,
    pub kind: TreeItemKind,
    pub has_children: bool,
}

impl TreeItem {
    pub fn new(
        id: impl Into<String>,
        label: impl Into<String>,
        kind: TreeItemKind,
        has_children: bool,
    ) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            kind,
            has_children,
        }
    }
}

/// Child-listing lifecycle of a node.
/// 節點子項目的載入狀態。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum LoadState {
    /// Children have not been fetched, or the cache was invalidated.
    #[default]
    Idle,
    /// A fetch is in flight; further expands wait for it.
    Loading,
    /// `children` reflects the last successful fetch (possibly empty).
    Loaded,
    /// The last fetch failed; `children` is empty because of the error, not the source.
    Failed(String),
}

/// Immutable, lazily expanded tree element.
/// 不可變且延遲展開的樹狀節點。
#[derive(Debug, Clone, PartialEq)]
pub struct TreeNode {
    pub id: String,
    pub label: String,
    pub kind: TreeItemKind,
    pub has_children: bool,
    pub is_expanded: bool,
    pub is_selected: bool,
    pub load_state: LoadState,
    pub children: Vec<Arc<TreeNode>>,
}

impl TreeNode {
    pub fn from_item(item: TreeItem) -> Self {
        Self {
            id: item.id,
            label: item.label,
            kind: item.kind,
            has_children: item.has_children,
            is_expanded: false,
            is_selected: false,
            load_state: LoadState::Idle,
            children: Vec::new(),
        }
    }

    pub fn item(&self) -> TreeItem {
        TreeItem {
            id: self.id.clone(),
            label: self.label.clone(),
            kind: self.kind,
            has_children: self.has_children,
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.load_state == LoadState::Loaded
    }

    pub fn is_loading(&self) -> bool {
        self.load_state == LoadState::Loading
    }

    /// Error message of the last failed fetch, if any.
    pub fn load_error(&self) -> Option<&str> {
        match &self.load_state {
            LoadState::Failed(message) => Some(message),
            _ => None,
        }
    }

    fn needs_fetch(&self) -> bool {
        self.has_children && matches!(self.load_state, LoadState::Idle | LoadState::Failed(_))
    }
}

/// Maps external items to collapsed, unfetched node shells.
/// 將外部項目轉換為尚未展開的節點外殼。
pub fn to_tree_nodes(items: Vec<TreeItem>) -> Vec<Arc<TreeNode>> {
    items
        .into_iter()
        .map(|item| Arc::new(TreeNode::from_item(item)))
        .collect()
}

/// Same as [`to_tree_nodes`] but restores expansion and selection flags by id.
fn shells_with_flags(
    items: Vec<TreeItem>,
    expanded: &HashSet<String>,
    selection: &Selection,
) -> Vec<Arc<TreeNode>> {
    items
        .into_iter()
        .map(|item| {
            let mut node = TreeNode::from_item(item);
            node.is_expanded = node.has_children && expanded.contains(&node.id);
            node.is_selected = selection.contains(&node.id);
            Arc::new(node)
        })
        .collect()
}

/// A row of the flattened, currently visible tree.
#[derive(Debug, Clone)]
pub struct VisibleRow {
    pub depth: usize,
    pub node: Arc<TreeNode>,
}

/// Children a driver must fetch for `node_id` before calling
/// [`TreeSynchronizer::complete_expand`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub node_id: String,
    pub item: TreeItem,
}

/// Errors raised by path-addressed tree mutations.
/// 以路徑定位的樹狀操作錯誤。
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TreeError {
    #[error("tree path must not be empty")]
    EmptyPath,
    #[error("no tree node at path {0:?}")]
    PathNotFound(Vec<String>),
}

/// Immutable snapshot of a lazily materialised hierarchy.
///
/// Every mutation returns a new tree in which only the ancestors of the
/// touched node are reallocated; untouched subtrees are shared by `Arc`.
/// 延遲展開階層的不可變快照；修改時僅重建目標節點的祖先鏈。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HierarchyTree {
    roots: Vec<Arc<TreeNode>>,
    revision: u64,
}

impl HierarchyTree {
    pub fn new(items: Vec<TreeItem>) -> Self {
        Self {
            roots: to_tree_nodes(items),
            revision: 0,
        }
    }

    pub fn roots(&self) -> &[Arc<TreeNode>] {
        &self.roots
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    /// Resolves a root-to-node path of ids.
    /// 依根至節點的識別碼路徑尋找節點。
    pub fn find<S: AsRef<str>>(&self, path: &[S]) -> Option<&Arc<TreeNode>> {
        let (head, rest) = path.split_first()?;
        let mut current = self.roots.iter().find(|node| node.id == head.as_ref())?;
        for segment in rest {
            current = current
                .children
                .iter()
                .find(|node| node.id == segment.as_ref())?;
        }
        Some(current)
    }

    /// Locates a node anywhere in the tree by id.
    pub fn find_by_id(&self, id: &str) -> Option<&Arc<TreeNode>> {
        fn walk<'a>(nodes: &'a [Arc<TreeNode>], id: &str) -> Option<&'a Arc<TreeNode>> {
            nodes.iter().find_map(|node| {
                if node.id == id {
                    Some(node)
                } else {
                    walk(&node.children, id)
                }
            })
        }
        walk(&self.roots, id)
    }

    /// Root-to-node path of the first node carrying `id`.
    /// 取得指定識別碼節點的根路徑。
    pub fn path_to(&self, id: &str) -> Option<Vec<String>> {
        fn walk(nodes: &[Arc<TreeNode>], id: &str, trail: &mut Vec<String>) -> bool {
            for node in nodes {
                trail.push(node.id.clone());
                if node.id == id || walk(&node.children, id, trail) {
                    return true;
                }
                trail.pop();
            }
            false
        }
        let mut trail = Vec::new();
        walk(&self.roots, id, &mut trail).then_some(trail)
    }

    /// Applies `f` to the node at `path` and returns the resulting tree.
    /// Siblings along the way are reused, not copied.
    /// 對路徑上的節點套用 `f` 並回傳新樹；兄弟節點沿用原參照。
    pub fn update_at<S, F>(&self, path: &[S], f: F) -> Result<Self, TreeError>
    where
        S: AsRef<str>,
        F: FnOnce(&TreeNode) -> TreeNode,
    {
        if path.is_empty() {
            return Err(TreeError::EmptyPath);
        }
        let roots = update_in(&self.roots, path, f).ok_or_else(|| {
            TreeError::PathNotFound(path.iter().map(|s| s.as_ref().to_string()).collect())
        })?;
        Ok(Self {
            roots,
            revision: self.revision.wrapping_add(1),
        })
    }

    /// Sets `is_expanded` on the node at `path`; cached children are untouched.
    pub fn set_expanded<S: AsRef<str>>(
        &self,
        path: &[S],
        expanded: bool,
    ) -> Result<Self, TreeError> {
        self.update_at(path, |node| TreeNode {
            is_expanded: expanded,
            ..node.clone()
        })
    }

    /// Ids of every node currently marked expanded.
    pub fn expanded_ids(&self) -> HashSet<String> {
        fn walk(nodes: &[Arc<TreeNode>], out: &mut HashSet<String>) {
            for node in nodes {
                if node.is_expanded {
                    out.insert(node.id.clone());
                }
                walk(&node.children, out);
            }
        }
        let mut out = HashSet::new();
        walk(&self.roots, &mut out);
        out
    }

    /// Replaces the roots with fresh shells, restoring expansion and selection by id.
    /// 以新項目重建根節點，並依識別碼還原展開與選取狀態。
    pub fn rebuild(
        &self,
        items: Vec<TreeItem>,
        expanded: &HashSet<String>,
        selection: &Selection,
    ) -> Self {
        Self {
            roots: shells_with_flags(items, expanded, selection),
            revision: self.revision.wrapping_add(1),
        }
    }

    /// Drops every cached child listing so the next expand refetches.
    /// `is_expanded` and `is_selected` are kept on the surviving nodes.
    /// 清除所有快取的子節點；保留展開與選取旗標。
    pub fn invalidate(&self) -> Self {
        let roots = self
            .roots
            .iter()
            .map(|node| {
                Arc::new(TreeNode {
                    load_state: LoadState::Idle,
                    children: Vec::new(),
                    ..(**node).clone()
                })
            })
            .collect();
        Self {
            roots,
            revision: self.revision.wrapping_add(1),
        }
    }

    /// Reapplies `is_selected` from `selection` by id, reusing unchanged subtrees.
    /// 依識別碼重新套用選取狀態。
    pub fn mark_selected(&self, selection: &Selection) -> Self {
        let roots: Vec<Arc<TreeNode>> = self
            .roots
            .iter()
            .map(|node| reselect(node, selection))
            .collect();
        let changed = roots
            .iter()
            .zip(&self.roots)
            .any(|(next, prev)| !Arc::ptr_eq(next, prev));
        Self {
            roots,
            revision: if changed {
                self.revision.wrapping_add(1)
            } else {
                self.revision
            },
        }
    }

    /// Depth-first list of the rows a renderer shows: children of collapsed nodes are skipped.
    /// 依深度優先列出目前可見的列。
    pub fn visible_rows(&self) -> Vec<VisibleRow> {
        fn walk(nodes: &[Arc<TreeNode>], depth: usize, rows: &mut Vec<VisibleRow>) {
            for node in nodes {
                rows.push(VisibleRow {
                    depth,
                    node: Arc::clone(node),
                });
                if node.is_expanded {
                    walk(&node.children, depth + 1, rows);
                }
            }
        }
        let mut rows = Vec::new();
        walk(&self.roots, 0, &mut rows);
        rows
    }

    /// Nodes flagged expanded whose children are not cached yet (after a rebuild or invalidate).
    pub fn pending_expansions(&self) -> Vec<FetchRequest> {
        fn walk(nodes: &[Arc<TreeNode>], out: &mut Vec<FetchRequest>) {
            for node in nodes {
                if node.is_expanded && node.has_children && node.load_state == LoadState::Idle {
                    out.push(FetchRequest {
                        node_id: node.id.clone(),
                        item: node.item(),
                    });
                }
                walk(&node.children, out);
            }
        }
        let mut out = Vec::new();
        walk(&self.roots, &mut out);
        out
    }
}

fn update_in<S, F>(nodes: &[Arc<TreeNode>], path: &[S], f: F) -> Option<Vec<Arc<TreeNode>>>
where
    S: AsRef<str>,
    F: FnOnce(&TreeNode) -> TreeNode,
{
    let (head, rest) = path.split_first()?;
    let index = nodes.iter().position(|node| node.id == head.as_ref())?;
    let target = &nodes[index];
    let replacement = if rest.is_empty() {
        f(target)
    } else {
        let children = update_in(&target.children, rest, f)?;
        TreeNode {
            children,
            ..(**target).clone()
        }
    };
    let mut next = nodes.to_vec();
    next[index] = Arc::new(replacement);
    Some(next)
}

fn reselect(node: &Arc<TreeNode>, selection: &Selection) -> Arc<TreeNode> {
    let selected = selection.contains(&node.id);
    let children: Vec<Arc<TreeNode>> = node
        .children
        .iter()
        .map(|child| reselect(child, selection))
        .collect();
    let children_unchanged = children
        .iter()
        .zip(&node.children)
        .all(|(next, prev)| Arc::ptr_eq(next, prev));
    if selected == node.is_selected && children_unchanged {
        return Arc::clone(node);
    }
    Arc::new(TreeNode {
        is_selected: selected,
        children,
        ..(**node).clone()
    })
}

/// External hierarchy the synchronizer materialises on demand.
/// 同步器依需求展開的外部階層資料來源。
pub trait ChildSource {
    fn roots(&self) -> Result<Vec<TreeItem>, GatewayError>;
    fn children(&self, parent: &TreeItem) -> Result<Vec<TreeItem>, GatewayError>;
}

/// What [`TreeSynchronizer::begin_expand`] asks the caller to do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExpandTicket {
    /// Children were cached; the node is now expanded.
    Cached,
    /// The node has nothing to expand.
    Leaf,
    /// A fetch for this node is already in flight.
    InFlight,
    /// The node is marked loading; fetch its children and hand them back.
    Fetch(FetchRequest),
}

/// Result of a synchronous expand.
#[derive(Debug, Default)]
pub struct ExpandOutcome {
    /// Whether the source was asked for children.
    pub fetched: bool,
    /// Fetch failure, also recorded on the node as [`LoadState::Failed`].
    pub error: Option<GatewayError>,
}

/// A per-node failure collected while restoring expanded nodes.
#[derive(Debug)]
pub struct FetchFailure {
    pub node_id: String,
    pub error: GatewayError,
}

/// Summary of a refresh pass.
#[derive(Debug, Default)]
pub struct RefreshReport {
    pub fetched: usize,
    pub failures: Vec<FetchFailure>,
}

/// Owns the current [`HierarchyTree`] and keeps it in step with a [`ChildSource`].
/// 持有目前的樹狀快照並與資料來源保持同步。
#[derive(Debug)]
pub struct TreeSynchronizer<S> {
    source: S,
    tree: HierarchyTree,
    selection: Selection,
    remembered_expanded: HashSet<String>,
}

impl<S: ChildSource> TreeSynchronizer<S> {
    /// Creates an empty synchronizer; call [`TreeSynchronizer::refresh`] to load the roots.
    pub fn new(source: S) -> Self {
        Self {
            source,
            tree: HierarchyTree::default(),
            selection: Selection::new(),
            remembered_expanded: HashSet::new(),
        }
    }

    pub fn tree(&self) -> &HierarchyTree {
        &self.tree
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    /// Refetches the roots and every node still flagged expanded.
    ///
    /// A root-listing failure leaves the current tree untouched and is returned;
    /// failures below the roots are recorded per node and reported.
    /// 重新讀取根節點與所有仍展開的節點。
    pub fn refresh(&mut self) -> Result<RefreshReport, GatewayError> {
        let items = self.source.roots()?;
        self.remembered_expanded.extend(self.tree.expanded_ids());
        self.tree = self
            .tree
            .rebuild(items, &self.remembered_expanded, &self.selection);
        Ok(self.restore_expanded())
    }

    /// Swaps the backing data (e.g. a new outline snapshot) and rebuilds.
    /// 替換資料來源並重建樹狀結構。
    pub fn replace_source(&mut self, source: S) -> Result<RefreshReport, GatewayError> {
        self.source = source;
        self.refresh()
    }

    /// Marks every cached listing stale without fetching anything.
    pub fn invalidate(&mut self) {
        self.remembered_expanded.extend(self.tree.expanded_ids());
        self.tree = self.tree.invalidate();
    }

    /// Fetches whatever [`HierarchyTree::pending_expansions`] reports, level by level.
    pub fn restore_expanded(&mut self) -> RefreshReport {
        let report = self.fetch_pending(None);
        self.remembered_expanded.clear();
        report
    }

    /// Fetches pending expansions, limited to descendants of `under` when given.
    fn fetch_pending(&mut self, under: Option<&str>) -> RefreshReport {
        let mut report = RefreshReport::default();
        loop {
            let pending: Vec<FetchRequest> = self
                .tree
                .pending_expansions()
                .into_iter()
                .filter(|request| match under {
                    Some(ancestor) => self
                        .tree
                        .path_to(&request.node_id)
                        .is_some_and(|path| path.iter().any(|id| id == ancestor)),
                    None => true,
                })
                .collect();
            if pending.is_empty() {
                break;
            }
            for request in pending {
                self.tree = self.mark_loading(&request.node_id);
                let result = self.source.children(&request.item);
                report.fetched += 1;
                if let Err(error) = self.complete_expand(&request.node_id, result) {
                    report.failures.push(FetchFailure {
                        node_id: request.node_id,
                        error,
                    });
                }
            }
        }
        report
    }

    /// Expands the node at `path`, fetching its children at most once.
    /// Descendants that come back flagged expanded are fetched as well.
    /// 展開指定路徑的節點；子節點最多讀取一次。
    pub fn expand<P: AsRef<str>>(&mut self, path: &[P]) -> Result<ExpandOutcome, TreeError> {
        match self.begin_expand(path)? {
            ExpandTicket::Fetch(request) => {
                let result = self.source.children(&request.item);
                let error = self.complete_expand(&request.node_id, result).err();
                if error.is_none() {
                    self.fetch_pending(Some(request.node_id.as_str()));
                }
                Ok(ExpandOutcome {
                    fetched: true,
                    error,
                })
            }
            ExpandTicket::Cached | ExpandTicket::Leaf | ExpandTicket::InFlight => {
                Ok(ExpandOutcome::default())
            }
        }
    }

    /// First half of an asynchronous expand: flips cached nodes open or marks the
    /// node loading and returns what to fetch.
    /// 非同步展開的前半段。
    pub fn begin_expand<P: AsRef<str>>(&mut self, path: &[P]) -> Result<ExpandTicket, TreeError> {
        let node = self.tree.find(path).cloned().ok_or_else(|| {
            TreeError::PathNotFound(path.iter().map(|s| s.as_ref().to_string()).collect())
        })?;
        if !node.has_children {
            return Ok(ExpandTicket::Leaf);
        }
        if node.is_loading() {
            return Ok(ExpandTicket::InFlight);
        }
        if node.needs_fetch() {
            self.tree = self.tree.update_at(path, |node| TreeNode {
                load_state: LoadState::Loading,
                ..node.clone()
            })?;
            debug!("event=tree_fetch_started module=tree node_id={}", node.id);
            return Ok(ExpandTicket::Fetch(FetchRequest {
                node_id: node.id.clone(),
                item: node.item(),
            }));
        }
        if !node.is_expanded {
            self.tree = self.tree.set_expanded(path, true)?;
        }
        Ok(ExpandTicket::Cached)
    }

    /// Second half of an asynchronous expand. Results are merged into whichever node
    /// currently carries `node_id`; a node that has since disappeared is skipped.
    ///
    /// Returns `Ok(true)` when merged, `Ok(false)` when the node is gone, and hands
    /// a fetch error back after recording it on the node.
    /// 非同步展開的後半段：依識別碼合併結果。
    pub fn complete_expand(
        &mut self,
        node_id: &str,
        result: Result<Vec<TreeItem>, GatewayError>,
    ) -> Result<bool, GatewayError> {
        let Some(path) = self.tree.path_to(node_id) else {
            debug!("event=tree_fetch_dropped module=tree node_id={node_id} reason=node_gone");
            return match result {
                Ok(_) => Ok(false),
                Err(error) => Err(error),
            };
        };

        match result {
            Ok(items) => {
                let count = items.len();
                let children = shells_with_flags(items, &self.remembered_expanded, &self.selection);
                self.remembered_expanded.remove(node_id);
                for child in children.iter().filter(|child| child.is_expanded) {
                    self.remembered_expanded.remove(&child.id);
                }
                if let Ok(next) = self.tree.update_at(&path, move |node| TreeNode {
                    is_expanded: true,
                    load_state: LoadState::Loaded,
                    children,
                    ..node.clone()
                }) {
                    self.tree = next;
                }
                debug!("event=tree_fetch_merged module=tree node_id={node_id} children={count}");
                Ok(true)
            }
            Err(error) => {
                let message = error.to_string();
                self.remembered_expanded.remove(node_id);
                warn!("event=tree_fetch_failed module=tree node_id={node_id} error={message}");
                if let Ok(next) = self.tree.update_at(&path, move |node| TreeNode {
                    is_expanded: false,
                    load_state: LoadState::Failed(message),
                    children: Vec::new(),
                    ..node.clone()
                }) {
                    self.tree = next;
                }
                Err(error)
            }
        }
    }

    /// Collapses the node at `path`; cached children are kept for a free re-expand.
    /// 收合節點並保留快取的子節點。
    pub fn collapse<P: AsRef<str>>(&mut self, path: &[P]) -> Result<(), TreeError> {
        self.tree = self.tree.set_expanded(path, false)?;
        if let Some(id) = path.last() {
            self.remembered_expanded.remove(id.as_ref());
        }
        Ok(())
    }

    pub fn toggle<P: AsRef<str>>(&mut self, path: &[P]) -> Result<ExpandOutcome, TreeError> {
        let expanded = self
            .tree
            .find(path)
            .map(|node| node.is_expanded)
            .ok_or_else(|| {
                TreeError::PathNotFound(path.iter().map(|s| s.as_ref().to_string()).collect())
            })?;
        if expanded {
            self.collapse(path)?;
            Ok(ExpandOutcome::default())
        } else {
            self.expand(path)
        }
    }

    /// Replaces the selection and re-marks the tree by id.
    pub fn select(&mut self, selection: Selection) {
        self.selection = selection;
        self.tree = self.tree.mark_selected(&self.selection);
    }

    fn mark_loading(&self, node_id: &str) -> HierarchyTree {
        self.tree
            .path_to(node_id)
            .and_then(|path| {
                self.tree
                    .update_at(&path, |node| TreeNode {
                        load_state: LoadState::Loading,
                        ..node.clone()
                    })
                    .ok()
            })
            .unwrap_or_else(|| self.tree.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::HashMap;

    /// In-memory source that counts fetches per parent id.
    #[derive(Default)]
    struct CountingSource {
        listing: HashMap<String, Vec<TreeItem>>,
        roots: Vec<TreeItem>,
        failing: HashSet<String>,
        calls: RefCell<HashMap<String, usize>>,
    }

    impl CountingSource {
        fn sample() -> Self {
            let dir = |id: &str| TreeItem::new(id, id, TreeItemKind::Directory, true);
            let file = |id: &str| TreeItem::new(id, id, TreeItemKind::File, false);
            let mut listing = HashMap::new();
            listing.insert("a".to_string(), vec![dir("a/x"), file("a/y")]);
            listing.insert("a/x".to_string(), vec![file("a/x/z")]);
            listing.insert("b".to_string(), vec![]);
            Self {
                listing,
                roots: vec![dir("a"), dir("b"), file("c")],
                ..Self::default()
            }
        }

        fn calls(&self, id: &str) -> usize {
            self.calls.borrow().get(id).copied().unwrap_or(0)
        }
    }

    impl ChildSource for CountingSource {
        fn roots(&self) -> Result<Vec<TreeItem>, GatewayError> {
            Ok(self.roots.clone())
        }

        fn children(&self, parent: &TreeItem) -> Result<Vec<TreeItem>, GatewayError> {
            *self.calls.borrow_mut().entry(parent.id.clone()).or_default() += 1;
            if self.failing.contains(&parent.id) {
                return Err(GatewayError::Failed(format!("cannot list {}", parent.id)));
            }
            Ok(self.listing.get(&parent.id).cloned().unwrap_or_default())
        }
    }

    fn loaded(source: CountingSource) -> TreeSynchronizer<CountingSource> {
        let mut sync = TreeSynchronizer::new(source);
        sync.refresh().unwrap();
        sync
    }

    #[test]
    fn to_tree_nodes_builds_collapsed_shells() {
        let nodes = to_tree_nodes(vec![TreeItem::new("d", "d", TreeItemKind::Directory, true)]);
        assert_eq!(nodes.len(), 1);
        assert!(nodes[0].has_children);
        assert!(!nodes[0].is_expanded);
        assert!(nodes[0].children.is_empty());
        assert_eq!(nodes[0].load_state, LoadState::Idle);
    }

    #[test]
    fn update_at_reuses_untouched_siblings() {
        let mut sync = loaded(CountingSource::sample());
        sync.expand(&["a"]).unwrap();
        let before = sync.tree().clone();

        let after = before
            .update_at(&["a", "a/y"], |node| TreeNode {
                label: "renamed".into(),
                ..node.clone()
            })
            .unwrap();

        assert_eq!(after.find(&["a", "a/y"]).unwrap().label, "renamed");
        assert!(Arc::ptr_eq(&before.roots()[1], &after.roots()[1]));
        assert!(Arc::ptr_eq(&before.roots()[2], &after.roots()[2]));
        assert!(Arc::ptr_eq(
            before.find(&["a", "a/x"]).unwrap(),
            after.find(&["a", "a/x"]).unwrap()
        ));
        assert!(!Arc::ptr_eq(&before.roots()[0], &after.roots()[0]));
        assert_eq!(before.find(&["a", "a/y"]).unwrap().label, "a/y");
    }

    #[test]
    fn update_at_reports_missing_path() {
        let tree = HierarchyTree::new(vec![TreeItem::new("a", "a", TreeItemKind::File, false)]);
        let empty: [&str; 0] = [];
        assert_eq!(tree.update_at(&empty, |n| n.clone()), Err(TreeError::EmptyPath));
        assert_eq!(
            tree.update_at(&["a", "zz"], |n| n.clone()),
            Err(TreeError::PathNotFound(vec!["a".into(), "zz".into()]))
        );
    }

    #[test]
    fn expanding_a_loaded_node_does_not_refetch() {
        let mut sync = loaded(CountingSource::sample());
        let first = sync.expand(&["a"]).unwrap();
        assert!(first.fetched);
        let second = sync.expand(&["a"]).unwrap();
        assert!(!second.fetched);
        assert_eq!(sync.source().calls("a"), 1);
    }

    #[test]
    fn collapse_then_expand_reuses_cached_children() {
        let mut sync = loaded(CountingSource::sample());
        sync.expand(&["a"]).unwrap();
        let cached = sync.tree().find(&["a"]).unwrap().children.clone();

        sync.collapse(&["a"]).unwrap();
        let collapsed = sync.tree().find(&["a"]).unwrap();
        assert!(!collapsed.is_expanded);
        assert_eq!(collapsed.children.len(), 2);

        sync.expand(&["a"]).unwrap();
        let reopened = sync.tree().find(&["a"]).unwrap();
        assert!(reopened.is_expanded);
        assert!(reopened
            .children
            .iter()
            .zip(&cached)
            .all(|(a, b)| Arc::ptr_eq(a, b)));
        assert_eq!(sync.source().calls("a"), 1);
    }

    #[test]
    fn empty_directory_is_loaded_not_failed() {
        let mut sync = loaded(CountingSource::sample());
        sync.expand(&["b"]).unwrap();
        let node = sync.tree().find(&["b"]).unwrap();
        assert!(node.is_expanded);
        assert!(node.children.is_empty());
        assert!(node.is_loaded());
    }

    #[test]
    fn failed_fetch_leaves_node_collapsed_with_error() {
        let mut source = CountingSource::sample();
        source.failing.insert("a".into());
        let mut sync = loaded(source);

        let outcome = sync.expand(&["a"]).unwrap();
        assert!(outcome.fetched);
        assert!(matches!(outcome.error, Some(GatewayError::Failed(_))));
        let node = sync.tree().find(&["a"]).unwrap();
        assert!(!node.is_expanded);
        assert!(node.children.is_empty());
        assert_eq!(node.load_error(), Some("gateway request failed: cannot list a"));

        sync.expand(&["a"]).unwrap();
        assert_eq!(sync.source().calls("a"), 2);
    }

    #[test]
    fn second_begin_while_loading_waits_for_first() {
        let mut sync = loaded(CountingSource::sample());
        let ticket = sync.begin_expand(&["a"]).unwrap();
        let ExpandTicket::Fetch(request) = ticket else {
            panic!("expected fetch ticket, got {ticket:?}");
        };
        assert!(sync.tree().find(&["a"]).unwrap().is_loading());
        assert_eq!(sync.begin_expand(&["a"]).unwrap(), ExpandTicket::InFlight);

        let items = sync.source().children(&request.item);
        assert_eq!(sync.complete_expand(&request.node_id, items).unwrap(), true);
        assert_eq!(sync.source().calls("a"), 1);
        assert!(sync.tree().find(&["a"]).unwrap().is_expanded);
    }

    #[test]
    fn late_results_merge_by_id_after_rebuild() {
        let mut sync = loaded(CountingSource::sample());
        let ExpandTicket::Fetch(request) = sync.begin_expand(&["a"]).unwrap() else {
            panic!("expected fetch ticket");
        };
        sync.refresh().unwrap();

        let items = Ok(vec![TreeItem::new("a/late", "late", TreeItemKind::File, false)]);
        assert!(sync.complete_expand(&request.node_id, items).unwrap());
        let node = sync.tree().find(&["a"]).unwrap();
        assert_eq!(node.children.len(), 1);
        assert_eq!(node.children[0].id, "a/late");
    }

    #[test]
    fn late_results_for_vanished_node_are_dropped() {
        let mut sync = loaded(CountingSource::sample());
        let before = sync.tree().clone();
        let merged = sync
            .complete_expand("ghost", Ok(vec![TreeItem::new("g", "g", TreeItemKind::File, false)]))
            .unwrap();
        assert!(!merged);
        assert_eq!(sync.tree(), &before);
    }

    #[test]
    fn refresh_refetches_and_preserves_expansion_by_id() {
        let mut sync = loaded(CountingSource::sample());
        sync.expand(&["a"]).unwrap();
        sync.expand(&["a", "a/x"]).unwrap();

        let report = sync.refresh().unwrap();
        assert_eq!(report.fetched, 2);
        assert!(report.failures.is_empty());
        assert_eq!(sync.source().calls("a"), 2);
        assert_eq!(sync.source().calls("a/x"), 2);

        let inner = sync.tree().find(&["a", "a/x"]).unwrap();
        assert!(inner.is_expanded);
        assert_eq!(inner.children.len(), 1);
        let visible: Vec<_> = sync
            .tree()
            .visible_rows()
            .into_iter()
            .map(|row| (row.depth, row.node.id.clone()))
            .collect();
        assert_eq!(
            visible,
            vec![
                (0, "a".to_string()),
                (1, "a/x".to_string()),
                (2, "a/x/z".to_string()),
                (1, "a/y".to_string()),
                (0, "b".to_string()),
                (0, "c".to_string()),
            ]
        );
    }

    #[test]
    fn invalidate_forces_next_expand_to_refetch() {
        let mut sync = loaded(CountingSource::sample());
        sync.expand(&["a"]).unwrap();
        sync.invalidate();

        let node = sync.tree().find(&["a"]).unwrap();
        assert!(node.is_expanded);
        assert!(node.children.is_empty());
        assert_eq!(node.load_state, LoadState::Idle);

        let report = sync.restore_expanded();
        assert_eq!(report.fetched, 1);
        assert_eq!(sync.source().calls("a"), 2);
        assert_eq!(sync.tree().find(&["a"]).unwrap().children.len(), 2);
    }

    #[test]
    fn expand_after_invalidate_reloads_nested_expansion() {
        let mut sync = loaded(CountingSource::sample());
        sync.expand(&["a"]).unwrap();
        sync.expand(&["a", "a/x"]).unwrap();
        sync.invalidate();

        sync.expand(&["a"]).unwrap();
        let inner = sync.tree().find(&["a", "a/x"]).unwrap();
        assert!(inner.is_expanded);
        assert!(inner.is_loaded());
        assert_eq!(inner.children.len(), 1);
        assert_eq!(sync.source().calls("a/x"), 2);
        assert!(sync.tree().pending_expansions().is_empty());
    }

    #[test]
    fn collapse_after_invalidate_survives_refresh() {
        let mut sync = loaded(CountingSource::sample());
        sync.expand(&["a"]).unwrap();
        sync.expand(&["a", "a/x"]).unwrap();
        sync.invalidate();
        sync.expand(&["a"]).unwrap();

        sync.collapse(&["a", "a/x"]).unwrap();
        sync.refresh().unwrap();

        assert!(sync.tree().find(&["a"]).unwrap().is_expanded);
        assert!(!sync.tree().find(&["a", "a/x"]).unwrap().is_expanded);
    }

    #[test]
    fn selection_is_reapplied_by_id_after_fetch() {
        let mut sync = loaded(CountingSource::sample());
        sync.select(["a/y", "c"].into_iter().collect());
        assert!(sync.tree().find(&["c"]).unwrap().is_selected);

        sync.expand(&["a"]).unwrap();
        assert!(sync.tree().find(&["a", "a/y"]).unwrap().is_selected);
        assert!(!sync.tree().find(&["a", "a/x"]).unwrap().is_selected);

        let before = sync.tree().clone();
        sync.select(["c", "a/y"].into_iter().collect());
        assert!(Arc::ptr_eq(&before.roots()[0], &sync.tree().roots()[0]));
        assert_eq!(before.revision(), sync.tree().revision());
    }

    #[test]
    fn toggle_on_leaf_is_a_no_op() {
        let mut sync = loaded(CountingSource::sample());
        let outcome = sync.toggle(&["c"]).unwrap();
        assert!(!outcome.fetched);
        assert!(!sync.tree().find(&["c"]).unwrap().is_expanded);
        assert_eq!(sync.source().calls("c"), 0);
    }
}
