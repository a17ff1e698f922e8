//! Project → {Nodes, Edges} → item hierarchy derived from a session snapshot.
//! 由工作階段快照推導的專案大綱階層。

use std::sync::Arc;

use crate::document::Project;
use crate::gateway::GatewayError;
use crate::session::SessionSnapshot;
use crate::tree::{ChildSource, TreeItem, TreeItemKind};

const ID_SEPARATOR: &str = "::";
const NODES_SEGMENT: &str = "nodes";
const EDGES_SEGMENT: &str = "edges";
const NODE_SEGMENT: &str = "node";
const EDGE_SEGMENT: &str = "edge";

/// Tree ids are namespaced by project id since node and edge ids repeat across projects.
/// 大綱識別碼以專案識別碼為前綴，避免跨專案重複。
pub fn nodes_group_id(project_id: &str) -> String {
    format!("{project_id}{ID_SEPARATOR}{NODES_SEGMENT}")
}

pub fn edges_group_id(project_id: &str) -> String {
    format!("{project_id}{ID_SEPARATOR}{EDGES_SEGMENT}")
}

pub fn node_item_id(project_id: &str, node_id: &str) -> String {
    format!("{project_id}{ID_SEPARATOR}{NODE_SEGMENT}{ID_SEPARATOR}{node_id}")
}

pub fn edge_item_id(project_id: &str, edge_id: &str) -> String {
    format!("{project_id}{ID_SEPARATOR}{EDGE_SEGMENT}{ID_SEPARATOR}{edge_id}")
}

/// What an outline tree id points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutlineTarget<'a> {
    Project(&'a str),
    Nodes(&'a str),
    Edges(&'a str),
    Node { project: &'a str, node: &'a str },
    Edge { project: &'a str, edge: &'a str },
}

impl<'a> OutlineTarget<'a> {
    /// Decodes an id produced by the helpers above. Plain ids are read as project ids.
    pub fn parse(id: &'a str) -> Self {
        let Some((head, tail)) = id.split_once(ID_SEPARATOR) else {
            return OutlineTarget::Project(id);
        };
        match tail.split_once(ID_SEPARATOR) {
            Some((NODE_SEGMENT, node)) => OutlineTarget::Node {
                project: head,
                node,
            },
            Some((EDGE_SEGMENT, edge)) => OutlineTarget::Edge {
                project: head,
                edge,
            },
            _ if tail == NODES_SEGMENT => OutlineTarget::Nodes(head),
            _ if tail == EDGES_SEGMENT => OutlineTarget::Edges(head),
            _ => OutlineTarget::Project(id),
        }
    }

    /// Entity id a selection would carry for this row (project, node or edge id).
    pub fn entity_id(&self) -> Option<&'a str> {
        match *self {
            OutlineTarget::Project(id) => Some(id),
            OutlineTarget::Node { node, .. } => Some(node),
            OutlineTarget::Edge { edge, .. } => Some(edge),
            OutlineTarget::Nodes(_) | OutlineTarget::Edges(_) => None,
        }
    }
}

/// [`ChildSource`] over the in-memory outline; never fails.
/// 以記憶體中的大綱為資料來源。
#[derive(Debug, Clone, Default)]
pub struct OutlineSource {
    snapshot: SessionSnapshot,
}

impl OutlineSource {
    pub fn new(snapshot: SessionSnapshot) -> Self {
        Self { snapshot }
    }

    pub fn snapshot(&self) -> &SessionSnapshot {
        &self.snapshot
    }

    fn project(&self, id: &str) -> Option<&Arc<Project>> {
        self.snapshot
            .outline
            .iter()
            .find(|project| project.project_id.as_str() == id)
    }

    fn project_item(project: &Project) -> TreeItem {
        let label = if project.name().trim().is_empty() {
            project.project_id.to_string()
        } else {
            project.name().to_string()
        };
        TreeItem::new(
            project.project_id.as_str(),
            label,
            TreeItemKind::Project,
            !project.nodes.is_empty() || !project.edges.is_empty(),
        )
    }

    fn groups(project: &Project) -> Vec<TreeItem> {
        let pid = project.project_id.as_str();
        vec![
            TreeItem::new(
                nodes_group_id(pid),
                format!("Nodes ({})", project.nodes.len()),
                TreeItemKind::NodeGroup,
                !project.nodes.is_empty(),
            ),
            TreeItem::new(
                edges_group_id(pid),
                format!("Edges ({})", project.edges.len()),
                TreeItemKind::EdgeGroup,
                !project.edges.is_empty(),
            ),
        ]
    }
}

impl ChildSource for OutlineSource {
    fn roots(&self) -> Result<Vec<TreeItem>, GatewayError> {
        Ok(self
            .snapshot
            .outline
            .iter()
            .map(|project| Self::project_item(project))
            .collect())
    }

    fn children(&self, parent: &TreeItem) -> Result<Vec<TreeItem>, GatewayError> {
        let items = match OutlineTarget::parse(&parent.id) {
            OutlineTarget::Project(pid) => self
                .project(pid)
                .map(|project| Self::groups(project))
                .unwrap_or_default(),
            OutlineTarget::Nodes(pid) => self
                .project(pid)
                .map(|project| {
                    project
                        .nodes
                        .iter()
                        .map(|node| {
                            let label = if node.label().is_empty() {
                                node.id.as_str()
                            } else {
                                node.label()
                            };
                            TreeItem::new(
                                node_item_id(pid, &node.id),
                                label,
                                TreeItemKind::Node,
                                false,
                            )
                        })
                        .collect()
                })
                .unwrap_or_default(),
            OutlineTarget::Edges(pid) => self
                .project(pid)
                .map(|project| {
                    project
                        .edges
                        .iter()
                        .map(|edge| {
                            let label = if edge.label.is_empty() {
                                &edge.id
                            } else {
                                &edge.label
                            };
                            TreeItem::new(
                                edge_item_id(pid, &edge.id),
                                label,
                                TreeItemKind::Edge,
                                false,
                            )
                        })
                        .collect()
                })
                .unwrap_or_default(),
            OutlineTarget::Node { .. } | OutlineTarget::Edge { .. } => Vec::new(),
        };
        Ok(items)
    }
}
