use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::audio::AudioRouting;

/// Persisted player configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    pub audio_routing: AudioRouting,
    /// Feed the separate audio graph from this file instead of a second media source.
    pub audio_file_input: Option<PathBuf>,
    /// Put the player in frame-server mode so frames are copied into the shared texture.
    pub frame_server: bool,
    /// Override for the access list location.
    pub access_list_path: Option<PathBuf>,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            audio_routing: AudioRouting::PlayerNative,
            audio_file_input: None,
            frame_server: true,
            access_list_path: None,
        }
    }
}

impl PlayerConfig {
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("tandem")
            .join("player.json")
    }

    pub fn load() -> Self {
        Self::load_from(&Self::config_path())
    }

    pub fn load_from(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(config) => {
                    log::info!("Loaded player config from {}", path.display());
                    config
                }
                Err(e) => {
                    log::warn!("Failed to parse player config: {e}");
                    Self::default()
                }
            },
            Err(_) => {
                log::info!("No player config found, using defaults");
                Self::default()
            }
        }
    }

    pub fn save(&self) {
        self.save_to(&Self::config_path());
    }

    pub fn save_to(&self, path: &Path) {
        if let Some(parent) = path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                log::error!("Failed to create config dir: {e}");
                return;
            }
        }
        match serde_json::to_string_pretty(self) {
            Ok(json) => {
                if let Err(e) = std::fs::write(path, json) {
                    log::error!("Failed to write player config: {e}");
                } else {
                    log::debug!("Saved player config to {}", path.display());
                }
            }
            Err(e) => log::error!("Failed to serialize player config: {e}"),
        }
    }

    pub fn access_list_path(&self) -> PathBuf {
        self.access_list_path
            .clone()
            .unwrap_or_else(crate::media::FutureAccessList::default_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn player_config_defaults() {
        let c = PlayerConfig::default();
        assert_eq!(c.audio_routing, AudioRouting::PlayerNative);
        assert!(c.frame_server);
        assert!(c.audio_file_input.is_none());
    }

    #[test]
    fn player_config_partial_json_uses_defaults() {
        let c: PlayerConfig =
            serde_json::from_str(r#"{"audio_routing":"SeparateGraphToFrameSink"}"#).unwrap();
        assert_eq!(c.audio_routing, AudioRouting::SeparateGraphToFrameSink);
        assert!(c.frame_server);
    }

    #[test]
    fn player_config_save_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tandem").join("player.json");
        let c = PlayerConfig {
            audio_routing: AudioRouting::SeparateGraphToSoundCard,
            audio_file_input: Some(PathBuf::from("/music/bed.wav")),
            frame_server: false,
            access_list_path: None,
        };
        c.save_to(&path);
        assert_eq!(PlayerConfig::load_from(&path), c);
    }

    #[test]
    fn player_config_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let c = PlayerConfig::load_from(&dir.path().join("absent.json"));
        assert_eq!(c, PlayerConfig::default());
    }
}
