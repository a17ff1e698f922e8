use std::collections::HashSet;

use chrono::{SecondsFormat, Utc};
use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::id::{allocate_unique_name, new_id, ProjectId};
use crate::properties::Properties;

/// Schema version written into newly created projects.
pub const SCHEMA_VERSION: &str = "1.0.0";

pub const DEFAULT_PROJECT_NAME: &str = "Untitled Project";
pub const DEFAULT_NODE_LABEL: &str = "New Node";
pub const DEFAULT_EDGE_LABEL: &str = "New Edge";

const REQUIRED_FILE_KEYS: [&str; 3] = ["metadata", "nodes", "edges"];

/// Project-level metadata stored alongside nodes and edges.
/// 專案層級的中繼資料。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectMetadata {
    #[serde(default)]
    pub project_name: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub updated_at: String,
    #[serde(default)]
    pub description: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Canvas position of a node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeData {
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub properties: Properties,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A vertex of the project graph. Ids are unique within the owning project only.
/// 專案圖中的節點；識別碼僅在所屬專案內唯一。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    #[serde(default)]
    pub position: Position,
    #[serde(default)]
    pub data: NodeData,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Node {
    pub fn label(&self) -> &str {
        &self.data.label
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EdgeData {
    #[serde(default)]
    pub properties: Properties,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A directed, labelled connection between two nodes of the same project.
/// 同一專案內兩節點之間的有向連線。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub id: String,
    pub source: String,
    pub target: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub data: EdgeData,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Edge {
    /// Returns `true` when either endpoint is `node_id`.
    pub fn touches(&self, node_id: &str) -> bool {
        self.source == node_id || self.target == node_id
    }
}

/// Caller-supplied fields for a new node; id and final label are assigned on insert.
/// 新增節點時由呼叫端提供的欄位。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeDraft {
    pub position: Position,
    pub label: Option<String>,
    pub properties: Properties,
    /// Extra top-level node fields such as `type`, stored verbatim.
    pub extra: Map<String, Value>,
}

impl NodeDraft {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn at(mut self, x: f64, y: f64) -> Self {
        self.position = Position::new(x, y);
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: Value) -> Self {
        self.properties.insert(key.into(), value);
        self
    }

    pub fn with_properties(mut self, properties: Properties) -> Self {
        self.properties = properties;
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}

/// Caller-supplied fields for a new edge.
/// 新增連線時由呼叫端提供的欄位。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EdgeDraft {
    pub source: String,
    pub target: String,
    pub label: Option<String>,
    pub properties: Properties,
    /// Extra top-level edge fields such as `sourceHandle`.
    pub extra: Map<String, Value>,
}

impl EdgeDraft {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            label: None,
            properties: Properties::new(),
            extra: Map::new(),
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_properties(mut self, properties: Properties) -> Self {
        self.properties = properties;
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}

/// Shallow update applied to a node; `None` leaves the field untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeUpdate {
    pub position: Option<Position>,
    pub data: Option<NodeData>,
}

/// Shallow update applied to an edge; `None` leaves the field untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EdgeUpdate {
    pub source: Option<String>,
    pub target: Option<String>,
    pub label: Option<String>,
    pub data: Option<EdgeData>,
}

/// Entities dropped by a removal, including cascaded edges.
/// 刪除操作實際移除的實體（含連帶刪除的連線）。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Removal {
    pub nodes: Vec<String>,
    pub edges: Vec<String>,
}

impl Removal {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.edges.is_empty()
    }
}

/// Errors raised by project parsing and validated mutations.
/// 專案解析與驗證式修改可能產生的錯誤。
#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("invalid project file: {0}")]
    InvalidProjectFile(String),
    #[error("project data is missing `projectId`")]
    MissingProjectId,
    #[error("edge references missing node `{node_id}`")]
    DanglingReference { node_id: String },
    #[error("failed to serialise project: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// A graph document: metadata plus nodes and directed edges.
/// 圖形文件：中繼資料、節點與有向連線。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    #[serde(default = "default_schema_version")]
    pub schema_version: String,
    pub project_id: ProjectId,
    #[serde(default)]
    pub metadata: ProjectMetadata,
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_schema_version() -> String {
    SCHEMA_VERSION.to_string()
}

impl Project {
    /// Creates an empty project with a fresh id and matching created/updated stamps.
    /// 建立空白專案並配發新的識別碼。
    pub fn new(name: impl Into<String>) -> Self {
        let timestamp = now_timestamp();
        Self {
            schema_version: default_schema_version(),
            project_id: ProjectId::new(),
            metadata: ProjectMetadata {
                project_name: name.into(),
                author: String::new(),
                created_at: timestamp.clone(),
                updated_at: timestamp,
                description: String::new(),
                extra: Map::new(),
            },
            nodes: Vec::new(),
            edges: Vec::new(),
            extra: Map::new(),
        }
    }

    pub fn id(&self) -> &ProjectId {
        &self.project_id
    }

    pub fn name(&self) -> &str {
        &self.metadata.project_name
    }

    /// Parses a persisted project file. `metadata`, `nodes` and `edges` must all be present.
    /// 解析專案檔；必須包含 `metadata`、`nodes` 與 `edges`。
    pub fn parse_project_file(json: &str) -> Result<Self, DocumentError> {
        let value: Value = serde_json::from_str(json)
            .map_err(|err| DocumentError::InvalidProjectFile(err.to_string()))?;
        Self::from_project_value(value)
    }

    /// Strict conversion from an already-parsed JSON value.
    pub fn from_project_value(value: Value) -> Result<Self, DocumentError> {
        let object = value.as_object().ok_or_else(|| {
            DocumentError::InvalidProjectFile("top-level value must be an object".into())
        })?;
        for key in REQUIRED_FILE_KEYS {
            if !object.contains_key(key) {
                return Err(DocumentError::InvalidProjectFile(format!(
                    "missing required key `{key}`"
                )));
            }
        }
        if !object.contains_key("projectId") {
            return Err(DocumentError::MissingProjectId);
        }
        serde_json::from_value(value)
            .map_err(|err| DocumentError::InvalidProjectFile(err.to_string()))
    }

    /// Lenient parse used by outline import: only `projectId` is required,
    /// missing collections default to empty.
    /// 匯入大綱時的寬鬆解析：僅要求 `projectId`。
    pub fn parse_import(json: &str) -> Result<Self, DocumentError> {
        let value: Value = serde_json::from_str(json)
            .map_err(|err| DocumentError::InvalidProjectFile(err.to_string()))?;
        let has_id = value
            .get("projectId")
            .and_then(Value::as_str)
            .map(|id| !id.trim().is_empty())
            .unwrap_or(false);
        if !has_id {
            return Err(DocumentError::MissingProjectId);
        }
        serde_json::from_value(value)
            .map_err(|err| DocumentError::InvalidProjectFile(err.to_string()))
    }

    /// Stamps `metadata.updatedAt` and serialises the whole project as pretty JSON.
    /// 更新 `updatedAt` 後將整個專案序列化為 JSON。
    pub fn export_to_json(&mut self) -> Result<String, DocumentError> {
        self.touch();
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn touch(&mut self) {
        self.metadata.updated_at = now_timestamp();
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|node| node.id == id)
    }

    pub fn edge(&self, id: &str) -> Option<&Edge> {
        self.edges.iter().find(|edge| edge.id == id)
    }

    pub fn contains_node(&self, id: &str) -> bool {
        self.node(id).is_some()
    }

    /// Edges whose source or target is `node_id`.
    pub fn incident_edges<'a>(&'a self, node_id: &'a str) -> impl Iterator<Item = &'a Edge> + 'a {
        self.edges.iter().filter(move |edge| edge.touches(node_id))
    }

    /// Appends a node with a fresh id and a label deduplicated against existing node labels.
    /// 新增節點：配發識別碼並避免標籤重複。
    pub fn add_node(&mut self, draft: NodeDraft) -> Node {
        let base = non_empty(draft.label.as_deref()).unwrap_or(DEFAULT_NODE_LABEL);
        let labels: HashSet<&str> = self.nodes.iter().map(|node| node.label()).collect();
        let label = allocate_unique_name(base, &labels);

        let node = Node {
            id: self.unused_id("node", |project, id| project.contains_node(id)),
            position: draft.position,
            data: NodeData {
                label,
                properties: draft.properties,
                extra: Map::new(),
            },
            extra: draft.extra,
        };
        self.nodes.push(node.clone());
        node
    }

    /// Shallow-merges `update` into the matching node. Returns `None` when the id is unknown.
    /// 將更新內容淺層合併至節點；找不到時回傳 `None`。
    pub fn update_node(&mut self, id: &str, update: NodeUpdate) -> Option<Node> {
        let node = self.nodes.iter_mut().find(|node| node.id == id)?;
        if let Some(position) = update.position {
            node.position = position;
        }
        if let Some(data) = update.data {
            node.data = data;
        }
        Some(node.clone())
    }

    /// Removes a node and every edge that references it.
    ///
    /// Edges are filtered by id even when no node with that id exists, so edges
    /// created without endpoint validation never outlive a removal request.
    /// 移除節點並連帶刪除所有引用它的連線。
    pub fn remove_node(&mut self, id: &str) -> Removal {
        let mut removal = Removal::default();
        let before = self.nodes.len();
        self.nodes.retain(|node| node.id != id);
        if self.nodes.len() != before {
            removal.nodes.push(id.to_string());
        }

        self.edges.retain(|edge| {
            if edge.touches(id) {
                removal.edges.push(edge.id.clone());
                false
            } else {
                true
            }
        });

        if !removal.is_empty() {
            debug!(
                "event=node_removed module=document node_id={} cascaded_edges={}",
                id,
                removal.edges.len()
            );
        }
        removal
    }

    /// Appends an edge without checking that its endpoints exist.
    /// 新增連線（不檢查端點是否存在）。
    pub fn add_edge(&mut self, draft: EdgeDraft) -> Edge {
        let base = non_empty(draft.label.as_deref()).unwrap_or(DEFAULT_EDGE_LABEL);
        let labels: HashSet<&str> = self.edges.iter().map(|edge| edge.label.as_str()).collect();
        let label = allocate_unique_name(base, &labels);

        let edge = Edge {
            id: self.unused_id("edge", |project, id| project.edge(id).is_some()),
            source: draft.source,
            target: draft.target,
            label,
            data: EdgeData {
                properties: draft.properties,
                extra: Map::new(),
            },
            extra: draft.extra,
        };
        self.edges.push(edge.clone());
        edge
    }

    /// Like [`Project::add_edge`] but rejects endpoints that are not nodes of this project.
    /// 與 `add_edge` 相同，但端點必須存在。
    pub fn add_edge_checked(&mut self, draft: EdgeDraft) -> Result<Edge, DocumentError> {
        for endpoint in [&draft.source, &draft.target] {
            if !self.contains_node(endpoint) {
                return Err(DocumentError::DanglingReference {
                    node_id: endpoint.clone(),
                });
            }
        }
        Ok(self.add_edge(draft))
    }

    pub fn update_edge(&mut self, id: &str, update: EdgeUpdate) -> Option<Edge> {
        let edge = self.edges.iter_mut().find(|edge| edge.id == id)?;
        if let Some(source) = update.source {
            edge.source = source;
        }
        if let Some(target) = update.target {
            edge.target = target;
        }
        if let Some(label) = update.label {
            edge.label = label;
        }
        if let Some(data) = update.data {
            edge.data = data;
        }
        Some(edge.clone())
    }

    pub fn remove_edge(&mut self, id: &str) -> Removal {
        let mut removal = Removal::default();
        let before = self.edges.len();
        self.edges.retain(|edge| edge.id != id);
        if self.edges.len() != before {
            removal.edges.push(id.to_string());
        }
        removal
    }

    fn unused_id(&self, prefix: &str, taken: impl Fn(&Self, &str) -> bool) -> String {
        loop {
            let id = new_id(prefix);
            if !taken(self, &id) {
                return id;
            }
        }
    }
}

/// Current time as RFC 3339 with millisecond precision (`2024-05-01T08:30:00.000Z`).
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Only a missing or empty label falls back to the default; whitespace is kept.
fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|text| !text.is_empty())
}
