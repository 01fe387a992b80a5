//! Tool settings
//!
//! Settings live in a small JSON file next to the user, pointing at the
//! translation checkout and the installed game. Every field is optional in
//! the file; validation happens at the point of use so `status` can run with
//! a partial configuration.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Default settings file names, probed in the working directory.
const SETTINGS_CANDIDATES: [&str; 2] = ["locsync.json", ".locsync.json"];

/// Folder inside the game installation holding the source-language files.
fn default_reference_subdir() -> String {
    "Localize/en".to_string()
}

/// Filename prefix marking source-language files in the game tree.
fn default_language_prefix() -> String {
    "EN_".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Settings {
    /// Path to the translation repository checkout.
    pub repository_path: String,
    /// Path to the game installation root.
    pub game_path: String,
    /// Personal access token for pushing over https.
    pub github_token: String,
    /// Reference-file location relative to `game_path`.
    pub reference_subdir: String,
    /// Prefix stripped from reference filenames.
    pub language_prefix: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            repository_path: String::new(),
            game_path: String::new(),
            github_token: String::new(),
            reference_subdir: default_reference_subdir(),
            language_prefix: default_language_prefix(),
        }
    }
}

impl Settings {
    /// Load settings from `path`, or probe the default candidates in the
    /// working directory.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => Self::find_default()
                .context("no settings file found; create locsync.json or pass --config")?,
        };
        debug!(path = %path.display(), "loading settings");
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("failed to read settings file: {}", path.display()))?;
        let settings: Settings = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse settings file: {}", path.display()))?;
        Ok(settings)
    }

    fn find_default() -> Option<PathBuf> {
        SETTINGS_CANDIDATES
            .iter()
            .map(PathBuf::from)
            .find(|candidate| candidate.is_file())
    }

    /// The access token, if one is configured.
    pub fn token(&self) -> Option<String> {
        let token = self.github_token.trim();
        if token.is_empty() {
            None
        } else {
            Some(token.to_string())
        }
    }

    /// Root of the translation repository checkout.
    pub fn repository_root(&self) -> Result<PathBuf> {
        if self.repository_path.trim().is_empty() {
            bail!("repositoryPath is not set in the settings file");
        }
        Ok(PathBuf::from(&self.repository_path))
    }

    /// Directory holding the game's source-language files.
    pub fn reference_root(&self) -> Result<PathBuf> {
        if self.game_path.trim().is_empty() {
            bail!("gamePath is not set in the settings file");
        }
        Ok(PathBuf::from(&self.game_path).join(&self.reference_subdir))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn load_parses_partial_file_with_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("locsync.json");
        fs::write(&path, r#"{"repositoryPath": "/tmp/repo"}"#).unwrap();

        let settings = Settings::load(Some(&path)).unwrap();
        assert_eq!(settings.repository_path, "/tmp/repo");
        assert_eq!(settings.reference_subdir, "Localize/en");
        assert_eq!(settings.language_prefix, "EN_");
        assert!(settings.token().is_none());
    }

    #[test]
    fn load_rejects_malformed_json() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("locsync.json");
        fs::write(&path, "not json").unwrap();
        assert!(Settings::load(Some(&path)).is_err());
    }

    #[test]
    fn blank_token_is_treated_as_absent() {
        let settings = Settings {
            github_token: "   ".to_string(),
            ..Settings::default()
        };
        assert!(settings.token().is_none());

        let settings = Settings {
            github_token: "ghp_abc".to_string(),
            ..Settings::default()
        };
        assert_eq!(settings.token().as_deref(), Some("ghp_abc"));
    }

    #[test]
    fn reference_root_joins_game_path_and_subdir() {
        let settings = Settings {
            game_path: "/games/limbus".to_string(),
            ..Settings::default()
        };
        let root = settings.reference_root().unwrap();
        assert_eq!(root, PathBuf::from("/games/limbus/Localize/en"));
    }

    #[test]
    fn unset_paths_are_rejected() {
        let settings = Settings::default();
        assert!(settings.repository_root().is_err());
        assert!(settings.reference_root().is_err());
    }
}
