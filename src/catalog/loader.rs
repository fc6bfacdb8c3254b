//! Configuration loaders.
//!
//! The catalog resolves definitions out of raw configuration values; where
//! those values come from is pluggable. The filesystem loader reads the
//! layout used by the CLI and the server:
//!
//! ```text
//! <base>/sources/*.yaml            # each file maps source_name -> config
//! <base>/dimensions/<name>.yaml    # one dimension per file, optional
//! <base>/metrics/<name>.yaml       # one metric per file
//! <secrets>/<connection>.json      # one secret per file
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{MimirError, MimirResult};

/// The kinds of definition configuration the catalog can ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigKind {
    Source,
    Dimension,
    Metric,
}

impl std::fmt::Display for ConfigKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ConfigKind::Source => "source",
            ConfigKind::Dimension => "dimension",
            ConfigKind::Metric => "metric",
        })
    }
}

/// Fetches raw configuration for definitions and secrets.
pub trait ConfigLoader: Send + Sync {
    /// A single configuration by name, `None` if absent.
    fn get(&self, kind: ConfigKind, name: &str) -> MimirResult<Option<serde_json::Value>>;

    /// Every configuration of a kind, keyed by name.
    fn get_all(&self, kind: ConfigKind) -> MimirResult<BTreeMap<String, serde_json::Value>>;

    /// A secret by name, `None` if absent or secrets are not configured.
    fn get_secret(&self, name: &str) -> MimirResult<Option<serde_json::Value>>;
}

/// Loads definitions and secrets from the local filesystem.
pub struct FileConfigLoader {
    folders: BTreeMap<&'static str, PathBuf>,
    secret_folder: Option<PathBuf>,
}

impl FileConfigLoader {
    pub fn new(base_path: impl AsRef<Path>, secret_base_path: Option<impl AsRef<Path>>) -> Self {
        let base = base_path.as_ref();
        let mut folders = BTreeMap::new();
        folders.insert("source", base.join("sources"));
        folders.insert("dimension", base.join("dimensions"));
        folders.insert("metric", base.join("metrics"));
        FileConfigLoader {
            folders,
            secret_folder: secret_base_path.map(|p| p.as_ref().to_path_buf()),
        }
    }

    fn folder(&self, kind: ConfigKind) -> &PathBuf {
        // The map is populated for every kind in `new`.
        &self.folders[kind_key(kind)]
    }

    /// All YAML files in a kind's folder, optionally restricted to one stem.
    fn config_files(&self, kind: ConfigKind, stem: Option<&str>) -> MimirResult<Vec<PathBuf>> {
        let folder = self.folder(kind);
        let mut matches = Vec::new();
        let entries = match std::fs::read_dir(folder) {
            Ok(entries) => entries,
            Err(_) => return Ok(matches),
        };
        for entry in entries {
            let path = entry?.path();
            let is_yaml = matches!(
                path.extension().and_then(|e| e.to_str()),
                Some("yaml") | Some("yml")
            );
            if !is_yaml {
                continue;
            }
            if let Some(stem) = stem {
                if path.file_stem().and_then(|s| s.to_str()) != Some(stem) {
                    continue;
                }
            }
            matches.push(path);
        }
        matches.sort();
        Ok(matches)
    }

    fn read_yaml(&self, path: &Path) -> MimirResult<serde_json::Value> {
        let bytes = std::fs::read(path)?;
        serde_yaml::from_slice(&bytes).map_err(|e| {
            MimirError::config(format!(
                "unparseable configuration file '{}': {e}",
                path.display()
            ))
        })
    }

    /// Source files each hold a `source_name -> config` mapping; merge them.
    fn sources_configs(&self) -> MimirResult<BTreeMap<String, serde_json::Value>> {
        let mut merged = BTreeMap::new();
        for path in self.config_files(ConfigKind::Source, None)? {
            let value = self.read_yaml(&path)?;
            let serde_json::Value::Object(map) = value else {
                return Err(MimirError::config(format!(
                    "source file '{}' is not a mapping of source names to configs",
                    path.display()
                )));
            };
            for (name, config) in map {
                merged.insert(name, config);
            }
        }
        Ok(merged)
    }
}

fn kind_key(kind: ConfigKind) -> &'static str {
    match kind {
        ConfigKind::Source => "source",
        ConfigKind::Dimension => "dimension",
        ConfigKind::Metric => "metric",
    }
}

impl ConfigLoader for FileConfigLoader {
    fn get(&self, kind: ConfigKind, name: &str) -> MimirResult<Option<serde_json::Value>> {
        if kind == ConfigKind::Source {
            return Ok(self.sources_configs()?.remove(name));
        }

        let mut options = self.config_files(kind, Some(name))?;
        match options.len() {
            0 => {
                if kind == ConfigKind::Dimension {
                    Ok(None)
                } else {
                    Err(MimirError::config(format!(
                        "no file matching for configuration pattern: {name}"
                    )))
                }
            }
            1 => Ok(Some(self.read_yaml(&options.remove(0))?)),
            _ => Err(MimirError::config(format!(
                "multiple configs matching for {name}: {}",
                options
                    .iter()
                    .map(|p| p.display().to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            ))),
        }
    }

    fn get_all(&self, kind: ConfigKind) -> MimirResult<BTreeMap<String, serde_json::Value>> {
        if kind == ConfigKind::Source {
            return self.sources_configs();
        }

        let mut configs = BTreeMap::new();
        for path in self.config_files(kind, None)? {
            let value = self.read_yaml(&path)?;
            let Some(name) = value.get("name").and_then(|n| n.as_str()) else {
                continue;
            };
            configs.insert(name.to_string(), value);
        }
        Ok(configs)
    }

    fn get_secret(&self, name: &str) -> MimirResult<Option<serde_json::Value>> {
        let Some(folder) = &self.secret_folder else {
            return Ok(None);
        };
        let path = folder.join(format!("{name}.json"));
        if !path.exists() {
            return Ok(None);
        }
        let bytes = std::fs::read(&path)?;
        let value: serde_json::Value = serde_json::from_slice(&bytes).map_err(|e| {
            MimirError::config(format!("unparseable secret '{}': {e}", path.display()))
        })?;
        if !value.is_object() {
            return Err(MimirError::config(format!(
                "secret '{}' is not a JSON object",
                path.display()
            )));
        }
        Ok(Some(value))
    }
}
