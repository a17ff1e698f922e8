mod logging;

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use icdstudio_project::{
    flatten_property_keys, set_property_path, ChildSource, DirectorySource, EdgeDraft,
    FileSystemGateway, HierarchyTree, LoadState, LocalFileSystem, NodeDraft, NodeUpdate,
    OutlineSource, Position, Session, TreeItemKind, TreeSynchronizer,
};
use icdstudio_settings::{preferences_path, Preferences, PreferencesStore};
use log::{info, warn};
use serde_json::Value as SerdeValue;

use crate::logging::{init_logging, DEFAULT_LOG_LEVEL};

const PROJECT_EXTENSIONS: [&str; 2] = ["icd", "json"];

#[derive(Parser)]
#[command(
    name = "icdstudio-cli",
    about = "Utility commands for IcdStudio projects",
    author,
    version
)]
struct Cli {
    /// 指定工作區根目錄；預設為目前目錄。 / Workspace root (defaults to current directory).
    #[arg(long, global = true, value_name = "PATH")]
    workspace: Option<PathBuf>,
    /// 日誌等級（trace|debug|info|warn|error）；RUST_LOG 優先。 / Log level (trace|debug|info|warn|error); RUST_LOG wins when set.
    #[arg(long, global = true, value_name = "LEVEL", default_value = DEFAULT_LOG_LEVEL)]
    log_level: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 建立或檢視專案檔。 / Create or inspect project files.
    #[command(subcommand)]
    Project(ProjectCommand),
    /// 編輯專案中的節點。 / Edit the nodes of a project.
    #[command(subcommand)]
    Node(NodeCommand),
    /// 編輯專案中的連線。 / Edit the edges of a project.
    #[command(subcommand)]
    Edge(EdgeCommand),
    /// 匯入多個專案並列出完整大綱。 / Import projects and print the expanded outline.
    Outline(OutlineArgs),
    /// 列出工作區目錄樹。 / Print the workspace directory tree.
    Explore(ExploreArgs),
    /// 檢視或修改偏好設定。 / Show or change preferences.
    #[command(subcommand)]
    Settings(SettingsCommand),
}

#[derive(Subcommand)]
enum ProjectCommand {
    /// 建立空白專案檔。 / Create an empty project file.
    New(ProjectNewArgs),
    /// 顯示專案摘要。 / Print a project summary.
    Show(ProjectFileArgs),
}

#[derive(Args)]
struct ProjectNewArgs {
    /// 新專案檔的路徑。 / Path of the new project file.
    file: PathBuf,
    /// 專案名稱；與同資料夾的專案重複時自動編號。 / Project name; numbered when a sibling project already uses it.
    #[arg(long)]
    name: Option<String>,
}

#[derive(Args)]
struct ProjectFileArgs {
    /// 專案檔路徑。 / Project file path.
    file: PathBuf,
}

#[derive(Subcommand)]
enum NodeCommand {
    /// 新增節點。 / Add a node.
    Add(NodeAddArgs),
    /// 移除節點及其連線。 / Remove a node and its edges.
    Remove(EntityArgs),
    /// 更新節點標籤或位置。 / Update a node's label or position.
    Update(NodeUpdateArgs),
}

#[derive(Args)]
struct NodeAddArgs {
    /// 專案檔路徑。 / Project file path.
    file: PathBuf,
    /// 節點標籤。 / Node label.
    #[arg(long)]
    label: Option<String>,
    /// X 座標。 / X coordinate.
    #[arg(long, default_value_t = 0.0)]
    x: f64,
    /// Y 座標。 / Y coordinate.
    #[arg(long, default_value_t = 0.0)]
    y: f64,
    /// 以 `key.path=value` 設定屬性，可重複。 / Property as `key.path=value`; repeatable.
    #[arg(long = "property", value_name = "KEY=VALUE")]
    properties: Vec<String>,
}

#[derive(Args)]
struct NodeUpdateArgs {
    /// 專案檔路徑。 / Project file path.
    file: PathBuf,
    /// 節點識別碼。 / Node id.
    id: String,
    /// 新標籤。 / New label.
    #[arg(long)]
    label: Option<String>,
    /// 新的 X 座標。 / New X coordinate.
    #[arg(long)]
    x: Option<f64>,
    /// 新的 Y 座標。 / New Y coordinate.
    #[arg(long)]
    y: Option<f64>,
}

#[derive(Args)]
struct EntityArgs {
    /// 專案檔路徑。 / Project file path.
    file: PathBuf,
    /// 實體識別碼。 / Entity id.
    id: String,
}

#[derive(Subcommand)]
enum EdgeCommand {
    /// 新增連線。 / Add an edge.
    Add(EdgeAddArgs),
    /// 移除連線。 / Remove an edge.
    Remove(EntityArgs),
}

#[derive(Args)]
struct EdgeAddArgs {
    /// 專案檔路徑。 / Project file path.
    file: PathBuf,
    /// 起點節點識別碼。 / Source node id.
    #[arg(long)]
    source: String,
    /// 終點節點識別碼。 / Target node id.
    #[arg(long)]
    target: String,
    /// 連線標籤。 / Edge label.
    #[arg(long)]
    label: Option<String>,
    /// 要求兩端節點必須存在。 / Reject endpoints that are not nodes of the project.
    #[arg(long)]
    strict: bool,
}

#[derive(Args)]
struct OutlineArgs {
    /// 要匯入的專案檔。 / Project files to import.
    #[arg(required = true)]
    files: Vec<PathBuf>,
}

#[derive(Args)]
struct ExploreArgs {
    /// 要列出的資料夾；預設為偏好設定中的工作區路徑。 / Directory to list; defaults to the workspace path from preferences.
    dir: Option<PathBuf>,
    /// 根節點以下展開的層數。 / Levels to expand below the roots.
    #[arg(long, default_value_t = 1)]
    depth: usize,
}

#[derive(Subcommand)]
enum SettingsCommand {
    /// 顯示目前偏好設定。 / Print current preferences.
    Show,
    /// 設定單一偏好值。 / Set a single preference.
    Set(SettingsSetArgs),
}

#[derive(Args)]
struct SettingsSetArgs {
    /// 設定鍵，例如 theme、ui-scale、explorer.show-icons。 / Key such as theme, ui-scale, explorer.show-icons.
    key: String,
    /// 新值。 / New value.
    value: String,
}

fn main() {
    if let Err(err) = run() {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let Cli {
        workspace,
        log_level,
        command,
    } = Cli::parse();
    let _logger = init_logging(&log_level)?;
    let workspace_root = resolve_workspace(workspace)?;
    match command {
        Commands::Project(subcommand) => execute_project_command(subcommand),
        Commands::Node(subcommand) => execute_node_command(subcommand),
        Commands::Edge(subcommand) => execute_edge_command(subcommand),
        Commands::Outline(args) => execute_outline(args, &workspace_root),
        Commands::Explore(args) => execute_explore(args, &workspace_root),
        Commands::Settings(subcommand) => execute_settings_command(subcommand, &workspace_root),
    }
}

fn execute_project_command(command: ProjectCommand) -> Result<()> {
    match command {
        ProjectCommand::New(args) => create_project(args),
        ProjectCommand::Show(args) => show_project(args),
    }
}

fn create_project(args: ProjectNewArgs) -> Result<()> {
    let path = resolve_input_path(&args.file)?;
    if path.exists() {
        bail!("'{}' already exists", path.display());
    }

    let mut session = Session::new();
    if let Some(dir) = path.parent() {
        load_sibling_projects(&mut session, dir);
    }
    let id = session.create_new_active_project(args.name.as_deref());
    let json = session
        .export_active_project_to_json()?
        .context("new project is not active")?;
    LocalFileSystem
        .write_file_content(&path, &json)
        .with_context(|| format!("failed to write {}", path.display()))?;

    let name = session
        .active_project()
        .map(|project| project.name().to_string())
        .unwrap_or_default();
    info!(
        "event=project_created module=cli project_id={id} path={}",
        path.display()
    );
    println!("Created project '{name}' ({id}) at {}", path.display());
    Ok(())
}

/// Imports sibling project files so new names are numbered against them.
fn load_sibling_projects(session: &mut Session, dir: &Path) {
    let Ok(entries) = LocalFileSystem.read_directory(dir) else {
        return;
    };
    for entry in entries
        .into_iter()
        .filter(|entry| !entry.is_directory && is_project_file(&entry.path))
    {
        if let Err(err) = session.import_project_file(&LocalFileSystem, &entry.path) {
            warn!(
                "event=sibling_skipped module=cli path={} error={err}",
                entry.path.display()
            );
        }
    }
}

fn is_project_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            PROJECT_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
        .unwrap_or(false)
}

fn show_project(args: ProjectFileArgs) -> Result<()> {
    let (session, _) = open_session(&args.file)?;
    let project = session.active_project().context("project is not active")?;

    println!("Name: {}", project.name());
    println!("Id: {}", project.project_id);
    println!("Schema: {}", project.schema_version);
    println!("Updated: {}", project.metadata.updated_at);
    println!("Nodes: {}", project.nodes.len());
    println!("Edges: {}", project.edges.len());
    let node_keys = flatten_property_keys(project.nodes.iter().map(|node| &node.data.properties));
    if !node_keys.is_empty() {
        println!("Node properties: {}", node_keys.join(", "));
    }
    let edge_keys = flatten_property_keys(project.edges.iter().map(|edge| &edge.data.properties));
    if !edge_keys.is_empty() {
        println!("Edge properties: {}", edge_keys.join(", "));
    }
    Ok(())
}

fn execute_node_command(command: NodeCommand) -> Result<()> {
    match command {
        NodeCommand::Add(args) => add_node(args),
        NodeCommand::Remove(args) => remove_node(args),
        NodeCommand::Update(args) => update_node(args),
    }
}

fn add_node(args: NodeAddArgs) -> Result<()> {
    let (mut session, path) = open_session(&args.file)?;
    let mut draft = NodeDraft::new().at(args.x, args.y);
    if let Some(label) = args.label {
        draft = draft.with_label(label);
    }
    for assignment in &args.properties {
        let (key, raw) = assignment
            .split_once('=')
            .with_context(|| format!("property '{assignment}' must look like key.path=value"))?;
        if key.trim().is_empty() {
            bail!("property '{assignment}' has an empty key");
        }
        set_property_path(&mut draft.properties, key.trim(), parse_property_value(raw));
    }

    let node = session
        .add_node_to_active_project(draft)
        .context("project is not active")?;
    save_session(&mut session, &path)?;
    println!("Added node '{}' ({})", node.label(), node.id);
    Ok(())
}

/// JSON literals are stored as-is; anything else is kept as a string.
fn parse_property_value(raw: &str) -> SerdeValue {
    serde_json::from_str(raw).unwrap_or_else(|_| SerdeValue::String(raw.to_string()))
}

fn remove_node(args: EntityArgs) -> Result<()> {
    let (mut session, path) = open_session(&args.file)?;
    let removal = session.remove_node_from_active_project(&args.id);
    if removal.is_empty() {
        println!("No node or edge references '{}'; nothing removed", args.id);
        return Ok(());
    }
    save_session(&mut session, &path)?;
    println!(
        "Removed {} node(s) and {} edge(s)",
        removal.nodes.len(),
        removal.edges.len()
    );
    Ok(())
}

fn update_node(args: NodeUpdateArgs) -> Result<()> {
    let (mut session, path) = open_session(&args.file)?;
    let current = session
        .active_project()
        .and_then(|project| project.node(&args.id))
        .cloned()
        .with_context(|| format!("node '{}' not found", args.id))?;

    let mut update = NodeUpdate::default();
    if args.x.is_some() || args.y.is_some() {
        update.position = Some(Position::new(
            args.x.unwrap_or(current.position.x),
            args.y.unwrap_or(current.position.y),
        ));
    }
    if let Some(label) = args.label {
        let mut data = current.data.clone();
        data.label = label;
        update.data = Some(data);
    }
    if update == NodeUpdate::default() {
        bail!("nothing to update; pass --label, --x or --y");
    }

    let node = session
        .update_active_node(&args.id, update)
        .with_context(|| format!("node '{}' not found", args.id))?;
    save_session(&mut session, &path)?;
    println!(
        "Updated node '{}' ({}) at ({}, {})",
        node.label(),
        node.id,
        node.position.x,
        node.position.y
    );
    Ok(())
}

fn execute_edge_command(command: EdgeCommand) -> Result<()> {
    match command {
        EdgeCommand::Add(args) => add_edge(args),
        EdgeCommand::Remove(args) => remove_edge(args),
    }
}

fn add_edge(args: EdgeAddArgs) -> Result<()> {
    let (mut session, path) = open_session(&args.file)?;
    let mut draft = EdgeDraft::new(args.source, args.target);
    if let Some(label) = args.label {
        draft = draft.with_label(label);
    }

    let edge = if args.strict {
        session.add_checked_edge_to_active_project(draft)?
    } else {
        session
            .add_edge_to_active_project(draft)
            .context("project is not active")?
    };
    save_session(&mut session, &path)?;
    println!(
        "Added edge '{}' ({}) {} -> {}",
        edge.label, edge.id, edge.source, edge.target
    );
    Ok(())
}

fn remove_edge(args: EntityArgs) -> Result<()> {
    let (mut session, path) = open_session(&args.file)?;
    if session.remove_edge_from_active_project(&args.id).is_empty() {
        println!("No edge '{}'; nothing removed", args.id);
        return Ok(());
    }
    save_session(&mut session, &path)?;
    println!("Removed edge {}", args.id);
    Ok(())
}

fn execute_outline(args: OutlineArgs, workspace_root: &Path) -> Result<()> {
    let mut session = Session::new();
    for file in &args.files {
        let path = resolve_input_path(file)?;
        let added = session
            .import_project_file(&LocalFileSystem, &path)
            .with_context(|| format!("failed to import {}", path.display()))?;
        if !added {
            eprintln!(
                "Skipped {}: project already imported",
                path.display()
            );
        }
    }

    let show_icons = load_preferences(workspace_root)?.workspace.outline.show_icons;
    let mut sync = TreeSynchronizer::new(OutlineSource::new(session.snapshot()));
    sync.refresh().context("failed to build outline")?;
    expand_to_depth(&mut sync, usize::MAX)?;
    print!("{}", render_tree(sync.tree(), show_icons));
    Ok(())
}

fn execute_explore(args: ExploreArgs, workspace_root: &Path) -> Result<()> {
    let prefs = load_preferences(workspace_root)?;
    let root = match args.dir {
        Some(dir) => resolve_input_path(&dir)?,
        None => prefs
            .workspace
            .path
            .clone()
            .unwrap_or_else(|| workspace_root.to_path_buf()),
    };
    if !root.is_dir() {
        bail!("'{}' is not a directory", root.display());
    }

    let mut sync = TreeSynchronizer::new(DirectorySource::new(LocalFileSystem, root.clone()));
    sync.refresh()
        .with_context(|| format!("failed to list {}", root.display()))?;
    expand_to_depth(&mut sync, args.depth)?;
    println!("{}", root.display());
    print!("{}", render_tree(sync.tree(), prefs.workspace.explorer.show_icons));
    Ok(())
}

/// Expands every node shallower than `max_depth`. Failed listings stay collapsed.
fn expand_to_depth<S: ChildSource>(sync: &mut TreeSynchronizer<S>, max_depth: usize) -> Result<()> {
    loop {
        let tree = sync.tree();
        let pending: Vec<Vec<String>> = tree
            .visible_rows()
            .into_iter()
            .filter(|row| {
                row.depth < max_depth
                    && row.node.has_children
                    && !row.node.is_expanded
                    && !matches!(row.node.load_state, LoadState::Failed(_))
            })
            .filter_map(|row| tree.path_to(&row.node.id))
            .collect();
        if pending.is_empty() {
            return Ok(());
        }
        for path in pending {
            let outcome = sync.expand(&path)?;
            if let Some(err) = outcome.error {
                warn!(
                    "event=expand_failed module=cli node_id={} error={err}",
                    path.last().map(String::as_str).unwrap_or_default()
                );
            }
        }
    }
}

fn render_tree(tree: &HierarchyTree, show_icons: bool) -> String {
    let mut out = String::new();
    for row in tree.visible_rows() {
        let node = &row.node;
        out.push_str(&"  ".repeat(row.depth));
        if show_icons {
            out.push_str(icon_for(node.kind));
            out.push(' ');
        }
        out.push_str(&node.label);
        if node.kind == TreeItemKind::Directory {
            out.push('/');
        }
        if let Some(err) = node.load_error() {
            out.push_str(&format!(" [error: {err}]"));
        }
        out.push('\n');
    }
    out
}

fn icon_for(kind: TreeItemKind) -> &'static str {
    match kind {
        TreeItemKind::Directory => "📁",
        TreeItemKind::File => "📄",
        TreeItemKind::Project => "📦",
        TreeItemKind::NodeGroup | TreeItemKind::EdgeGroup => "🗂",
        TreeItemKind::Node => "●",
        TreeItemKind::Edge => "→",
    }
}

fn execute_settings_command(command: SettingsCommand, workspace_root: &Path) -> Result<()> {
    match command {
        SettingsCommand::Show => {
            let prefs = load_preferences(workspace_root)?;
            print_preferences(&prefs);
            Ok(())
        }
        SettingsCommand::Set(args) => {
            let prefs_path = preferences_path(workspace_root);
            let mut store = PreferencesStore::load(&prefs_path).with_context(|| {
                format!("failed to load preferences from {}", prefs_path.display())
            })?;
            store.preferences_mut().set_value(&args.key, &args.value)?;
            store.save().with_context(|| {
                format!("failed to save preferences to {}", prefs_path.display())
            })?;
            println!("Set {} for {}", args.key, workspace_root.display());
            Ok(())
        }
    }
}

fn print_preferences(prefs: &Preferences) {
    let appearance = &prefs.appearance;
    let workspace = &prefs.workspace;
    println!("theme = {}", appearance.theme);
    println!("language = {}", appearance.language);
    println!("ui-scale = {}", appearance.ui_scale);
    println!(
        "workspace-path = {}",
        workspace
            .path
            .as_ref()
            .map(|path| path.display().to_string())
            .unwrap_or_default()
    );
    for (panel, values) in [("explorer", &workspace.explorer), ("outline", &workspace.outline)] {
        println!("{panel}.show-icons = {}", values.show_icons);
        println!("{panel}.show-on-start = {}", values.show_on_start);
        println!("{panel}.show-animation = {}", values.show_animation);
    }
}

fn load_preferences(workspace_root: &Path) -> Result<Preferences> {
    let prefs_path = preferences_path(workspace_root);
    let store = PreferencesStore::load(&prefs_path)
        .with_context(|| format!("failed to load preferences from {}", prefs_path.display()))?;
    Ok(store.preferences().clone())
}

/// Opens `file` as the active project of a fresh session.
fn open_session(file: &Path) -> Result<(Session, PathBuf)> {
    let path = resolve_input_path(file)?;
    let mut session = Session::new();
    session
        .open_project_file(&LocalFileSystem, &path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    Ok((session, path))
}

fn save_session(session: &mut Session, path: &Path) -> Result<()> {
    if !session
        .save_active_project(&LocalFileSystem)
        .with_context(|| format!("failed to save {}", path.display()))?
    {
        bail!("no file path is known for the active project");
    }
    Ok(())
}

fn resolve_workspace(workspace: Option<PathBuf>) -> Result<PathBuf> {
    match workspace {
        Some(path) => resolve_input_path(&path),
        None => std::env::current_dir().context("determine current directory"),
    }
}

fn resolve_input_path(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()
            .context("determine current directory")?
            .join(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn property_values_prefer_json_literals() {
        assert_eq!(parse_property_value("42"), SerdeValue::from(42));
        assert_eq!(parse_property_value("true"), SerdeValue::Bool(true));
        assert_eq!(parse_property_value("can0"), SerdeValue::from("can0"));
    }

    #[test]
    fn project_extensions_are_case_insensitive() {
        assert!(is_project_file(Path::new("bus.ICD")));
        assert!(is_project_file(Path::new("bus.json")));
        assert!(!is_project_file(Path::new("bus.txt")));
        assert!(!is_project_file(Path::new("bus")));
    }

    #[test]
    fn render_marks_directories_and_failures() {
        let tree = HierarchyTree::new(vec![icdstudio_project::TreeItem::new(
            "/ws/specs",
            "specs",
            TreeItemKind::Directory,
            true,
        )]);
        let tree = tree
            .update_at(&["/ws/specs"], |node| icdstudio_project::TreeNode {
                load_state: LoadState::Failed("denied".into()),
                ..node.clone()
            })
            .unwrap();
        assert_eq!(render_tree(&tree, false), "specs/ [error: denied]\n");
    }
}
