use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

use log::{debug, info};

use crate::path_codec;

const PREFERENCES_VERSION: u32 = 1;
const PREFERENCES_DIR: &str = ".icdstudio";
const PREFERENCES_FILE: &str = "preferences.json";

pub const KNOWN_THEMES: [&str; 2] = ["dark", "light"];
pub const MIN_UI_SCALE: f32 = 0.5;
pub const MAX_UI_SCALE: f32 = 2.0;

/// Settings file location under a workspace root.
/// 工作區根目錄下的偏好設定檔位置。
pub fn preferences_path(workspace: &Path) -> PathBuf {
    workspace.join(PREFERENCES_DIR).join(PREFERENCES_FILE)
}

#[derive(Debug, Error)]
pub enum PreferencesError {
    #[error("failed to read preferences {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse preferences {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to serialize preferences {path}: {source}")]
    Serialize {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to write preferences {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to prepare directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("unknown preference key `{0}`")]
    UnknownKey(String),
    #[error("invalid value `{value}` for `{key}`")]
    InvalidValue { key: String, value: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preferences {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub appearance: AppearancePreferences,
    #[serde(default)]
    pub workspace: WorkspacePreferences,
}

fn default_version() -> u32 {
    PREFERENCES_VERSION
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            version: PREFERENCES_VERSION,
            appearance: AppearancePreferences::default(),
            workspace: WorkspacePreferences::default(),
        }
    }
}

impl Preferences {
    pub fn sanitize(&mut self) {
        if self.version == 0 {
            self.version = PREFERENCES_VERSION;
        }
        self.appearance.sanitize();
    }

    /// Sets one dotted key from its textual form, as typed on a command line.
    /// 以字串設定單一偏好值（供命令列使用）。
    pub fn set_value(&mut self, key: &str, value: &str) -> Result<(), PreferencesError> {
        let invalid = || PreferencesError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        };
        match key {
            "theme" => {
                let theme = value.trim().to_ascii_lowercase();
                if !KNOWN_THEMES.contains(&theme.as_str()) {
                    return Err(invalid());
                }
                self.appearance.theme = theme;
            }
            "language" => {
                if value.trim().is_empty() {
                    return Err(invalid());
                }
                self.appearance.language = value.trim().to_string();
            }
            "ui-scale" => {
                let scale: f32 = value.trim().parse().map_err(|_| invalid())?;
                if !scale.is_finite() {
                    return Err(invalid());
                }
                self.appearance.ui_scale = scale;
            }
            "workspace-path" => {
                self.workspace.path = if value.is_empty() {
                    None
                } else {
                    Some(PathBuf::from(value))
                };
            }
            "explorer.show-icons" => {
                self.workspace.explorer.show_icons = parse_flag(value).ok_or_else(invalid)?
            }
            "explorer.show-on-start" => {
                self.workspace.explorer.show_on_start = parse_flag(value).ok_or_else(invalid)?
            }
            "explorer.show-animation" => {
                self.workspace.explorer.show_animation = parse_flag(value).ok_or_else(invalid)?
            }
            "outline.show-icons" => {
                self.workspace.outline.show_icons = parse_flag(value).ok_or_else(invalid)?
            }
            "outline.show-on-start" => {
                self.workspace.outline.show_on_start = parse_flag(value).ok_or_else(invalid)?
            }
            "outline.show-animation" => {
                self.workspace.outline.show_animation = parse_flag(value).ok_or_else(invalid)?
            }
            other => return Err(PreferencesError::UnknownKey(other.to_string())),
        }
        self.sanitize();
        Ok(())
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "on" | "yes" | "1" => Some(true),
        "false" | "off" | "no" | "0" => Some(false),
        _ => None,
    }
}

/// Theme, language and zoom of the application chrome.
/// 外觀設定：主題、語言與介面縮放。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppearancePreferences {
    #[serde(default = "default_theme")]
    pub theme: String,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default = "default_ui_scale")]
    pub ui_scale: f32,
}

fn default_theme() -> String {
    "dark".to_string()
}

fn default_language() -> String {
    "en".to_string()
}

fn default_ui_scale() -> f32 {
    1.0
}

impl Default for AppearancePreferences {
    fn default() -> Self {
        Self {
            theme: default_theme(),
            language: default_language(),
            ui_scale: default_ui_scale(),
        }
    }
}

impl AppearancePreferences {
    fn sanitize(&mut self) {
        let theme = self.theme.trim().to_ascii_lowercase();
        self.theme = if KNOWN_THEMES.contains(&theme.as_str()) {
            theme
        } else {
            default_theme()
        };
        if self.language.trim().is_empty() {
            self.language = default_language();
        }
        if !self.ui_scale.is_finite() {
            self.ui_scale = default_ui_scale();
        }
        self.ui_scale = self.ui_scale.clamp(MIN_UI_SCALE, MAX_UI_SCALE);
    }
}

/// Workspace root plus the explorer and outline panel toggles.
/// 工作區路徑與檔案總管、大綱面板的顯示設定。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspacePreferences {
    #[serde(
        default,
        with = "path_codec",
        skip_serializing_if = "Option::is_none"
    )]
    pub path: Option<PathBuf>,
    #[serde(default)]
    pub explorer: PanelPreferences,
    #[serde(default)]
    pub outline: PanelPreferences,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PanelPreferences {
    #[serde(default = "default_true")]
    pub show_icons: bool,
    #[serde(default)]
    pub show_on_start: bool,
    #[serde(default = "default_true")]
    pub show_animation: bool,
}

fn default_true() -> bool {
    true
}

impl Default for PanelPreferences {
    fn default() -> Self {
        Self {
            show_icons: true,
            show_on_start: false,
            show_animation: true,
        }
    }
}

#[derive(Debug)]
pub struct PreferencesStore {
    path: PathBuf,
    data: Preferences,
}

impl PreferencesStore {
    pub fn new(path: impl Into<PathBuf>, preferences: Preferences) -> Self {
        Self {
            path: path.into(),
            data: preferences,
        }
    }

    /// Loads the settings file, falling back to defaults when it does not exist yet.
    /// 讀取偏好設定檔；檔案不存在時使用預設值。
    pub fn load(path: impl AsRef<Path>) -> Result<Self, PreferencesError> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            debug!(
                "event=preferences_load module=settings status=defaults path={}",
                path.display()
            );
            let mut data = Preferences::default();
            data.sanitize();
            return Ok(Self { path, data });
        }

        let data = read_preferences(&path)?;
        Ok(Self { path, data })
    }

    pub fn preferences(&self) -> &Preferences {
        &self.data
    }

    pub fn preferences_mut(&mut self) -> &mut Preferences {
        &mut self.data
    }

    pub fn update<F>(&mut self, mut op: F) -> Result<(), PreferencesError>
    where
        F: FnMut(&mut Preferences),
    {
        op(&mut self.data);
        self.data.sanitize();
        self.save()
    }

    pub fn overwrite(&mut self, preferences: Preferences) -> Result<(), PreferencesError> {
        self.data = preferences;
        self.data.sanitize();
        self.save()
    }

    pub fn save(&self) -> Result<(), PreferencesError> {
        ensure_parent(&self.path)?;
        let payload = self.payload(&self.path)?;

        let tmp_path = self.path.with_extension("tmp");
        fs::write(&tmp_path, payload.as_bytes()).map_err(|source| PreferencesError::Write {
            path: tmp_path.clone(),
            source,
        })?;
        fs::rename(&tmp_path, &self.path).map_err(|source| PreferencesError::Write {
            path: self.path.clone(),
            source,
        })?;
        debug!(
            "event=preferences_saved module=settings path={}",
            self.path.display()
        );
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn export_to(&self, path: impl AsRef<Path>) -> Result<(), PreferencesError> {
        let path = path.as_ref().to_path_buf();
        ensure_parent(&path)?;
        let payload = self.payload(&path)?;
        fs::write(&path, payload.as_bytes())
            .map_err(|source| PreferencesError::Write { path, source })
    }

    /// Replaces the current settings with `source`, keeping a `.bak` copy of the old file.
    /// 匯入設定並將原檔備份為 `.bak`。
    pub fn import_from(&mut self, source: impl AsRef<Path>) -> Result<(), PreferencesError> {
        let data = read_preferences(source.as_ref())?;
        self.backup_existing()?;
        self.data = data;
        info!(
            "event=preferences_imported module=settings source={}",
            source.as_ref().display()
        );
        self.save()
    }

    fn payload(&self, path: &Path) -> Result<String, PreferencesError> {
        serde_json::to_string_pretty(&self.data).map_err(|source| PreferencesError::Serialize {
            path: path.to_path_buf(),
            source,
        })
    }

    fn backup_existing(&self) -> Result<(), PreferencesError> {
        if self.path.exists() {
            let backup = self.path.with_extension("bak");
            fs::copy(&self.path, &backup).map_err(|source| PreferencesError::Write {
                path: backup,
                source,
            })?;
        }
        Ok(())
    }
}

fn read_preferences(path: &Path) -> Result<Preferences, PreferencesError> {
    let contents = fs::read_to_string(path).map_err(|source| PreferencesError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let mut data: Preferences =
        serde_json::from_str(&contents).map_err(|source| PreferencesError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
    data.sanitize();
    Ok(data)
}

fn ensure_parent(path: &Path) -> Result<(), PreferencesError> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| PreferencesError::CreateDir {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_first_run() {
        let prefs = Preferences::default();
        assert_eq!(prefs.appearance.theme, "dark");
        assert_eq!(prefs.appearance.language, "en");
        assert_eq!(prefs.appearance.ui_scale, 1.0);
        assert!(prefs.workspace.path.is_none());
        assert!(prefs.workspace.explorer.show_icons);
        assert!(!prefs.workspace.outline.show_on_start);
    }

    #[test]
    fn sanitize_repairs_out_of_range_values() {
        let mut prefs = Preferences::default();
        prefs.version = 0;
        prefs.appearance.theme = "Neon".into();
        prefs.appearance.language = " ".into();
        prefs.appearance.ui_scale = 9.0;
        prefs.sanitize();
        assert_eq!(prefs.version, PREFERENCES_VERSION);
        assert_eq!(prefs.appearance.theme, "dark");
        assert_eq!(prefs.appearance.language, "en");
        assert_eq!(prefs.appearance.ui_scale, MAX_UI_SCALE);
    }

    #[test]
    fn set_value_parses_keys() {
        let mut prefs = Preferences::default();
        prefs.set_value("theme", "Light").unwrap();
        prefs.set_value("ui-scale", "0.1").unwrap();
        prefs.set_value("outline.show-icons", "off").unwrap();
        prefs.set_value("workspace-path", "/srv/icd").unwrap();
        assert_eq!(prefs.appearance.theme, "light");
        assert_eq!(prefs.appearance.ui_scale, MIN_UI_SCALE);
        assert!(!prefs.workspace.outline.show_icons);
        assert_eq!(prefs.workspace.path, Some(PathBuf::from("/srv/icd")));

        assert!(matches!(
            prefs.set_value("theme", "neon"),
            Err(PreferencesError::InvalidValue { .. })
        ));
        assert!(matches!(
            prefs.set_value("font", "mono"),
            Err(PreferencesError::UnknownKey(_))
        ));
        assert!(matches!(
            prefs.set_value("explorer.show-icons", "maybe"),
            Err(PreferencesError::InvalidValue { .. })
        ));
    }

    #[test]
    fn partial_documents_fill_in_defaults() {
        let prefs: Preferences =
            serde_json::from_str(r#"{ "appearance": { "theme": "light" } }"#).unwrap();
        assert_eq!(prefs.version, PREFERENCES_VERSION);
        assert_eq!(prefs.appearance.theme, "light");
        assert_eq!(prefs.appearance.language, "en");
        assert!(prefs.workspace.explorer.show_animation);
    }
}
