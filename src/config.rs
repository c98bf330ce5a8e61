use crate::deducer::DeduceOptions;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct DeduceConfig {
    pub project: Option<String>,
    pub stack: Option<String>,
    pub bundle_dir: Option<PathBuf>,
    pub bundle_filename: Option<String>,
    pub export_name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub search_paths: Vec<PathBuf>,
    /// Target platform the architecture is generated for, e.g. `AWS`
    pub platform: Option<String>,
}

impl DeduceConfig {
    /// The config `init` writes, with every default spelled out
    pub fn with_defaults() -> Self {
        let defaults = DeduceOptions::default();
        Self {
            project: Some(defaults.project),
            stack: Some(defaults.stack),
            bundle_dir: Some(defaults.bundle_dir),
            bundle_filename: Some(defaults.bundle_filename),
            export_name: Some(defaults.export_name),
            search_paths: Vec::new(),
            platform: Some("AWS".to_string()),
        }
    }

    /// Values set in `overrides` win over the ones in `self`
    pub fn overridden_by(self, overrides: DeduceConfig) -> Self {
        Self {
            project: overrides.project.or(self.project),
            stack: overrides.stack.or(self.stack),
            bundle_dir: overrides.bundle_dir.or(self.bundle_dir),
            bundle_filename: overrides.bundle_filename.or(self.bundle_filename),
            export_name: overrides.export_name.or(self.export_name),
            search_paths: if overrides.search_paths.is_empty() {
                self.search_paths
            } else {
                overrides.search_paths
            },
            platform: overrides.platform.or(self.platform),
        }
    }

    pub fn to_options(&self) -> DeduceOptions {
        let defaults = DeduceOptions::default();
        DeduceOptions {
            project: self.project.clone().unwrap_or(defaults.project),
            stack: self.stack.clone().unwrap_or(defaults.stack),
            bundle_dir: self.bundle_dir.clone().unwrap_or(defaults.bundle_dir),
            bundle_filename: self.bundle_filename.clone().unwrap_or(defaults.bundle_filename),
            export_name: self.export_name.clone().unwrap_or(defaults.export_name),
        }
    }
}

pub fn default_config_path() -> PathBuf {
    PathBuf::from("archdeduce.toml")
}

pub fn load_config(path: Option<&Path>) -> anyhow::Result<Option<DeduceConfig>> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(default_config_path);
    if !path.exists() {
        return Ok(None);
    }

    let contents = std::fs::read_to_string(&path)?;
    let config: DeduceConfig = toml::from_str(&contents)?;
    Ok(Some(config))
}

pub fn write_config(path: &Path, config: &DeduceConfig, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!("config already exists at {} (use --force to overwrite)", path.display());
    }

    let contents = toml::to_string_pretty(config)?;
    std::fs::write(path, contents)?;
    Ok(())
}

pub fn ensure_gitignore(project_root: &Path) -> anyhow::Result<()> {
    let gitignore_path = project_root.join(".gitignore");
    let entry = ".archdeduce/";

    let mut content = String::new();
    if gitignore_path.exists() {
        content = std::fs::read_to_string(&gitignore_path)?;
        if content.lines().any(|line| line.trim() == entry) {
            return Ok(());
        }
        if !content.is_empty() && !content.ends_with('\n') {
            content.push('\n');
        }
    }
    content.push_str(entry);
    content.push('\n');
    std::fs::write(&gitignore_path, content)?;
    Ok(())
}
