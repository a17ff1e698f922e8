//! Persisted application settings for IcdStudio.
//! IcdStudio 的應用程式偏好設定。

mod path_codec;
pub mod preferences;

pub use preferences::{
    preferences_path, AppearancePreferences, PanelPreferences, Preferences, PreferencesError,
    PreferencesStore, WorkspacePreferences, KNOWN_THEMES, MAX_UI_SCALE, MIN_UI_SCALE,
};
