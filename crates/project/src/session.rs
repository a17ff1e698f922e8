use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, info, warn};
use serde_json::Value;
use thiserror::Error;

use crate::document::{
    DocumentError, Edge, EdgeDraft, EdgeUpdate, Node, NodeDraft, NodeUpdate, Project, Removal,
    DEFAULT_PROJECT_NAME,
};
use crate::gateway::{DialogGateway, FileSystemGateway, FileType, GatewayError};
use crate::id::{allocate_unique_name, ProjectId};
use crate::selection::Selection;

/// Errors surfaced by session operations. Unknown ids are not errors.
/// 工作階段操作的錯誤；找不到識別碼不視為錯誤。
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("invalid project file: {0}")]
    InvalidProjectFile(String),
    #[error("project data is missing `projectId`")]
    MissingProjectId,
    #[error("no project is active")]
    NoActiveProject,
    #[error(transparent)]
    Document(DocumentError),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

impl From<DocumentError> for SessionError {
    fn from(error: DocumentError) -> Self {
        match error {
            DocumentError::InvalidProjectFile(message) => SessionError::InvalidProjectFile(message),
            DocumentError::MissingProjectId => SessionError::MissingProjectId,
            other => SessionError::Document(other),
        }
    }
}

/// Coarse lifecycle of a session.
/// 工作階段的狀態。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No project is loaded.
    Empty,
    /// Projects are loaded but none is active.
    LoadedInactive,
    /// One project is open for editing.
    Active,
}

/// Read-only view handed to view adapters. Projects are shared with the
/// session until the session next mutates them.
/// 提供給檢視端的唯讀快照。
#[derive(Debug, Clone, Default)]
pub struct SessionSnapshot {
    pub outline: Vec<Arc<Project>>,
    pub active: Option<ProjectId>,
    pub selection: Selection,
    pub revision: u64,
}

impl SessionSnapshot {
    pub fn active_project(&self) -> Option<&Arc<Project>> {
        let id = self.active.as_ref()?;
        self.outline.iter().find(|project| &project.project_id == id)
    }

    pub fn state(&self) -> SessionState {
        state_of(&self.outline, self.active.as_ref())
    }
}

/// Outcome of a multi-file import.
#[derive(Debug, Default)]
pub struct ImportReport {
    /// Projects appended to the outline.
    pub added: Vec<ProjectId>,
    /// Files whose `projectId` was already loaded; the loaded copy was kept.
    pub duplicates: Vec<ProjectId>,
    /// Files that could not be parsed, with the reason.
    pub rejected: Vec<(PathBuf, String)>,
}

/// Loaded projects plus the single active one.
/// 已載入的專案列表與目前作用中的專案。
#[derive(Debug, Default)]
pub struct Session {
    outline: Vec<Arc<Project>>,
    active: Option<ProjectId>,
    selection: Selection,
    file_paths: HashMap<ProjectId, PathBuf>,
    revision: u64,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> SessionState {
        state_of(&self.outline, self.active.as_ref())
    }

    /// Bumped on every change; adapters compare it to skip redundant re-renders.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            outline: self.outline.clone(),
            active: self.active.clone(),
            selection: self.selection.clone(),
            revision: self.revision,
        }
    }

    pub fn outline_projects(&self) -> &[Arc<Project>] {
        &self.outline
    }

    pub fn project(&self, id: &str) -> Option<&Project> {
        self.outline
            .iter()
            .find(|project| project.project_id.as_str() == id)
            .map(|project| project.as_ref())
    }

    pub fn active_project_id(&self) -> Option<&ProjectId> {
        self.active.as_ref()
    }

    pub fn active_project(&self) -> Option<&Project> {
        self.project(self.active.as_ref()?.as_str())
    }

    /// Path the project was last opened from or saved to.
    pub fn file_path(&self, id: &str) -> Option<&Path> {
        self.file_paths.get(id).map(PathBuf::as_path)
    }

    /// Appends `project` unless its id is already loaded. Never changes the active project.
    ///
    /// Returns `Ok(false)` for a duplicate id; the loaded copy is kept untouched.
    /// 將專案加入大綱；重複識別碼時不做任何變更。
    pub fn import_project_to_outline(&mut self, project: Project) -> Result<bool, SessionError> {
        if project.project_id.is_empty() {
            warn!("event=project_import module=session status=rejected reason=missing_project_id");
            return Err(SessionError::MissingProjectId);
        }
        if self.project(project.project_id.as_str()).is_some() {
            debug!(
                "event=project_import module=session status=duplicate project_id={}",
                project.project_id
            );
            return Ok(false);
        }
        info!(
            "event=project_import module=session status=added project_id={}",
            project.project_id
        );
        self.outline.push(Arc::new(project));
        self.bump();
        Ok(true)
    }

    /// Lenient import of raw JSON: only `projectId` is required.
    pub fn import_project_json(&mut self, json: &str) -> Result<bool, SessionError> {
        let project = Project::parse_import(json).map_err(|err| {
            warn!("event=project_import module=session status=rejected error={err}");
            err
        })?;
        self.import_project_to_outline(project)
    }

    /// Activates the outline project with `id` and clears the selection.
    /// Unknown ids leave the session untouched and return `false`.
    /// 設定作用中專案並清除選取；找不到時不變更狀態。
    pub fn set_active_project(&mut self, id: &str) -> bool {
        let Some(project) = self.project(id) else {
            warn!("event=set_active module=session status=unknown project_id={id}");
            return false;
        };
        let id = project.project_id.clone();
        info!("event=set_active module=session status=ok project_id={id}");
        self.active = Some(id);
        self.selection.clear();
        self.bump();
        true
    }

    /// Creates an empty project, deduplicating its name against the outline, and activates it.
    /// 建立新專案（名稱去重）並設為作用中。
    pub fn create_new_active_project(&mut self, name: Option<&str>) -> ProjectId {
        let base = name
            .filter(|name| !name.trim().is_empty())
            .unwrap_or(DEFAULT_PROJECT_NAME);
        let names: HashSet<&str> = self.outline.iter().map(|project| project.name()).collect();
        let project = Project::new(allocate_unique_name(base, &names));
        let id = project.project_id.clone();

        self.outline.push(Arc::new(project));
        self.set_active_project(id.as_str());
        id
    }

    /// Strictly parses a project file and makes it active. Nothing changes on failure.
    ///
    /// When the id is already loaded the existing outline entry is activated.
    /// 嚴格解析專案檔並設為作用中；失敗時保持原狀。
    pub fn load_project_as_active(&mut self, json: &str) -> Result<ProjectId, SessionError> {
        let project = Project::parse_project_file(json)?;
        Ok(self.activate_loaded(project)?.0)
    }

    pub fn load_project_value_as_active(
        &mut self,
        value: Value,
    ) -> Result<ProjectId, SessionError> {
        let project = Project::from_project_value(value)?;
        Ok(self.activate_loaded(project)?.0)
    }

    /// Returns the id and whether the project was newly added to the outline.
    fn activate_loaded(&mut self, project: Project) -> Result<(ProjectId, bool), SessionError> {
        let id = project.project_id.clone();
        let added = self.import_project_to_outline(project)?;
        self.set_active_project(id.as_str());
        Ok((id, added))
    }

    /// Remembers `path` for a freshly opened project. A project that was already
    /// loaded keeps its own path so a later save never lands on the opened file.
    fn remember_opened_path(&mut self, id: &ProjectId, added: bool, path: PathBuf) {
        if added {
            self.file_paths.insert(id.clone(), path);
        } else {
            warn!(
                "event=project_open module=session status=already_loaded project_id={id} path={}",
                path.display()
            );
        }
    }

    /// Serialises the active project after stamping `updatedAt`; `Ok(None)` when none is active.
    /// 匯出作用中專案；沒有作用中專案時回傳 `None`。
    pub fn export_active_project_to_json(&mut self) -> Result<Option<String>, SessionError> {
        let Some(project) = self.active_mut() else {
            return Ok(None);
        };
        let json = project.export_to_json()?;
        self.bump();
        Ok(Some(json))
    }

    /// Drops a project from the outline.
    /// Deactivates it and clears the selection when it was active.
    pub fn remove_project_from_outline(&mut self, id: &str) -> bool {
        let before = self.outline.len();
        self.outline.retain(|project| project.project_id.as_str() != id);
        if self.outline.len() == before {
            return false;
        }
        self.file_paths.remove(id);
        if self.active.as_ref().is_some_and(|active| active.as_str() == id) {
            self.active = None;
            self.selection.clear();
        }
        info!("event=project_removed module=session project_id={id}");
        self.bump();
        true
    }

    pub fn add_node_to_active_project(&mut self, draft: NodeDraft) -> Option<Node> {
        let node = self.active_mut()?.add_node(draft);
        self.bump();
        Some(node)
    }

    pub fn update_active_node(&mut self, id: &str, update: NodeUpdate) -> Option<Node> {
        let node = self.active_mut()?.update_node(id, update)?;
        self.bump();
        Some(node)
    }

    /// Removes a node of the active project together with its incident edges.
    pub fn remove_node_from_active_project(&mut self, id: &str) -> Removal {
        let removal = self
            .active_mut()
            .map(|project| project.remove_node(id))
            .unwrap_or_default();
        if !removal.is_empty() {
            self.bump();
        }
        removal
    }

    /// Unchecked edge insert; endpoints are not validated.
    pub fn add_edge_to_active_project(&mut self, draft: EdgeDraft) -> Option<Edge> {
        let edge = self.active_mut()?.add_edge(draft);
        self.bump();
        Some(edge)
    }

    /// Edge insert that rejects endpoints missing from the active project.
    pub fn add_checked_edge_to_active_project(
        &mut self,
        draft: EdgeDraft,
    ) -> Result<Edge, SessionError> {
        let project = self.active_mut().ok_or(SessionError::NoActiveProject)?;
        let edge = project.add_edge_checked(draft)?;
        self.bump();
        Ok(edge)
    }

    pub fn update_active_edge(&mut self, id: &str, update: EdgeUpdate) -> Option<Edge> {
        let edge = self.active_mut()?.update_edge(id, update)?;
        self.bump();
        Some(edge)
    }

    pub fn remove_edge_from_active_project(&mut self, id: &str) -> Removal {
        let removal = self
            .active_mut()
            .map(|project| project.remove_edge(id))
            .unwrap_or_default();
        if !removal.is_empty() {
            self.bump();
        }
        removal
    }

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    /// Replaces the selection; unions for multi-select are the caller's job.
    pub fn set_selection<I, S>(&mut self, ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.selection.replace(ids);
        self.bump();
    }

    pub fn clear_selection(&mut self) {
        if !self.selection.is_empty() {
            self.selection.clear();
            self.bump();
        }
    }

    /// Reads `path` through the gateway and loads it as the active project.
    /// 透過閘道讀取檔案並設為作用中專案。
    pub fn open_project_file<G: FileSystemGateway>(
        &mut self,
        gateway: &G,
        path: &Path,
    ) -> Result<ProjectId, SessionError> {
        let content = gateway.read_file_content(path)?;
        let (id, added) = self.activate_loaded(Project::parse_project_file(&content)?)?;
        self.remember_opened_path(&id, added, path.to_path_buf());
        Ok(id)
    }

    /// Reads `path` through the gateway and adds it to the outline without activating it.
    pub fn import_project_file<G: FileSystemGateway>(
        &mut self,
        gateway: &G,
        path: &Path,
    ) -> Result<bool, SessionError> {
        let content = gateway.read_file_content(path)?;
        let project = Project::parse_import(&content)?;
        let id = project.project_id.clone();
        let added = self.import_project_to_outline(project)?;
        if added {
            self.file_paths.insert(id, path.to_path_buf());
        }
        Ok(added)
    }

    /// File > Open. `Ok(None)` when the dialog was cancelled.
    pub fn open_project_from_dialog<D: DialogGateway>(
        &mut self,
        dialog: &D,
    ) -> Result<Option<ProjectId>, SessionError> {
        let Some(file) = dialog.open_file_dialog(false)?.into_iter().next() else {
            debug!("event=open_dialog module=session status=cancelled");
            return Ok(None);
        };
        let (id, added) = self.activate_loaded(Project::parse_project_file(&file.content)?)?;
        self.remember_opened_path(&id, added, file.file_path);
        Ok(Some(id))
    }

    /// Multi-select import into the outline. Unparseable files are reported, not fatal.
    /// 多選匯入至大綱；無法解析的檔案會記錄於報告中。
    pub fn import_projects_from_dialog<D: DialogGateway>(
        &mut self,
        dialog: &D,
    ) -> Result<ImportReport, SessionError> {
        let mut report = ImportReport::default();
        for file in dialog.open_file_dialog(true)? {
            let project = match Project::parse_import(&file.content) {
                Ok(project) => project,
                Err(err) => {
                    warn!(
                        "event=project_import module=session status=rejected path={} error={err}",
                        file.file_path.display()
                    );
                    report.rejected.push((file.file_path, err.to_string()));
                    continue;
                }
            };
            let id = project.project_id.clone();
            if self.import_project_to_outline(project)? {
                self.file_paths.insert(id.clone(), file.file_path);
                report.added.push(id);
            } else {
                report.duplicates.push(id);
            }
        }
        Ok(report)
    }

    /// Writes the active project to its remembered path. `Ok(false)` when it has none yet.
    /// 將作用中專案寫回目前檔案路徑；尚無路徑時回傳 `false`。
    pub fn save_active_project<G: FileSystemGateway>(
        &mut self,
        gateway: &G,
    ) -> Result<bool, SessionError> {
        let id = self.active.clone().ok_or(SessionError::NoActiveProject)?;
        let Some(path) = self.file_paths.get(&id).cloned() else {
            return Ok(false);
        };
        let json = self
            .export_active_project_to_json()?
            .ok_or(SessionError::NoActiveProject)?;
        gateway.write_file_content(&path, &json)?;
        info!(
            "event=project_saved module=session project_id={id} path={}",
            path.display()
        );
        Ok(true)
    }

    /// File > Save As. Remembers the chosen path; `Ok(None)` when cancelled.
    pub fn save_active_project_as<D: DialogGateway>(
        &mut self,
        dialog: &D,
    ) -> Result<Option<PathBuf>, SessionError> {
        let id = self.active.clone().ok_or(SessionError::NoActiveProject)?;
        let Some(path) = self.write_through_dialog(dialog, FileType::Icd)? else {
            return Ok(None);
        };
        self.file_paths.insert(id, path.clone());
        Ok(Some(path))
    }

    /// Export as plain JSON; the remembered path is left alone.
    pub fn export_active_project<D: DialogGateway>(
        &mut self,
        dialog: &D,
    ) -> Result<Option<PathBuf>, SessionError> {
        self.write_through_dialog(dialog, FileType::Json)
    }

    fn write_through_dialog<D: DialogGateway>(
        &mut self,
        dialog: &D,
        file_type: FileType,
    ) -> Result<Option<PathBuf>, SessionError> {
        let json = self
            .export_active_project_to_json()?
            .ok_or(SessionError::NoActiveProject)?;
        let path = dialog.save_file_dialog(&json, file_type)?;
        if path.is_none() {
            debug!("event=save_dialog module=session status=cancelled");
        }
        Ok(path)
    }

    fn active_mut(&mut self) -> Option<&mut Project> {
        let id = self.active.as_ref()?;
        let slot = self
            .outline
            .iter_mut()
            .find(|project| &project.project_id == id)?;
        Some(Arc::make_mut(slot))
    }

    fn bump(&mut self) {
        self.revision = self.revision.wrapping_add(1);
    }
}

fn state_of(outline: &[Arc<Project>], active: Option<&ProjectId>) -> SessionState {
    match (outline.is_empty(), active) {
        (true, _) => SessionState::Empty,
        (false, Some(_)) => SessionState::Active,
        (false, None) => SessionState::LoadedInactive,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_session_is_empty() {
        let session = Session::new();
        assert_eq!(session.state(), SessionState::Empty);
        assert!(session.active_project().is_none());
    }

    #[test]
    fn created_projects_get_deduplicated_names() {
        let mut session = Session::new();
        session.create_new_active_project(None);
        session.create_new_active_project(None);
        let third = session.create_new_active_project(Some("  "));
        let names: Vec<&str> = session
            .outline_projects()
            .iter()
            .map(|project| project.name())
            .collect();
        assert_eq!(
            names,
            vec!["Untitled Project", "Untitled Project 1", "Untitled Project 2"]
        );
        assert_eq!(session.active_project_id(), Some(&third));
        assert_eq!(session.state(), SessionState::Active);
    }

    #[test]
    fn import_does_not_change_active_project() {
        let mut session = Session::new();
        let active = session.create_new_active_project(Some("Main"));
        assert!(session
            .import_project_json(r#"{ "projectId": "p2", "metadata": { "projectName": "Other" } }"#)
            .unwrap());
        assert_eq!(session.active_project_id(), Some(&active));
        assert_eq!(session.outline_projects().len(), 2);
    }

    #[test]
    fn import_without_id_is_rejected() {
        let mut session = Session::new();
        let err = session.import_project_json(r#"{ "nodes": [] }"#).unwrap_err();
        assert!(matches!(err, SessionError::MissingProjectId));
        assert_eq!(session.state(), SessionState::Empty);
    }

    #[test]
    fn mutations_without_active_project_are_no_ops() {
        let mut session = Session::new();
        assert!(session.add_node_to_active_project(NodeDraft::new()).is_none());
        assert!(session
            .add_edge_to_active_project(EdgeDraft::new("a", "b"))
            .is_none());
        assert!(session.remove_node_from_active_project("a").is_empty());
        assert!(session.export_active_project_to_json().unwrap().is_none());
        assert!(matches!(
            session.add_checked_edge_to_active_project(EdgeDraft::new("a", "b")),
            Err(SessionError::NoActiveProject)
        ));
        assert_eq!(session.revision(), 0);
    }

    #[test]
    fn snapshot_is_isolated_from_later_edits() {
        let mut session = Session::new();
        session.create_new_active_project(Some("Demo"));
        let before = session.snapshot();
        session.add_node_to_active_project(NodeDraft::new().with_label("A"));

        assert!(before.active_project().unwrap().nodes.is_empty());
        assert_eq!(session.active_project().unwrap().nodes.len(), 1);
        assert!(session.revision() > before.revision);
    }

    #[test]
    fn untouched_projects_stay_shared_with_snapshot() {
        let mut session = Session::new();
        session
            .import_project_json(r#"{ "projectId": "p1" }"#)
            .unwrap();
        session.create_new_active_project(None);
        let before = session.snapshot();
        session.add_node_to_active_project(NodeDraft::new());
        let after = session.snapshot();
        assert!(Arc::ptr_eq(&before.outline[0], &after.outline[0]));
        assert!(!Arc::ptr_eq(&before.outline[1], &after.outline[1]));
    }

    #[test]
    fn removing_the_active_project_deactivates_it() {
        let mut session = Session::new();
        let id = session.create_new_active_project(None);
        session
            .import_project_json(r#"{ "projectId": "p2" }"#)
            .unwrap();
        session.set_selection(["x"]);

        assert!(session.remove_project_from_outline(id.as_str()));
        assert_eq!(session.state(), SessionState::LoadedInactive);
        assert!(session.selection().is_empty());
        assert!(!session.remove_project_from_outline(id.as_str()));
    }

    #[test]
    fn failed_load_keeps_previous_active_project() {
        let mut session = Session::new();
        let id = session.create_new_active_project(Some("Keep"));
        session.add_node_to_active_project(NodeDraft::new().with_label("A"));
        let revision = session.revision();

        let err = session
            .load_project_as_active(r#"{ "projectId": "p9", "nodes": [], "edges": [] }"#)
            .unwrap_err();
        assert!(matches!(err, SessionError::InvalidProjectFile(_)));
        assert_eq!(session.active_project_id(), Some(&id));
        assert_eq!(session.active_project().unwrap().nodes.len(), 1);
        assert_eq!(session.revision(), revision);
    }
}
