use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::backends::EngineKind;
use crate::cluster::ClusterConfig;
use crate::lang::ScriptLanguage;
use crate::layout::LayoutConfig;
use crate::orchestrator::OrchestratorConfig;

const DEFAULT_SETTINGS_TOML: &str = include_str!("../settings.toml");

#[derive(Debug, Clone)]
pub struct Settings {
    pub from_lang: ScriptLanguage,
    pub to_lang: String,
    pub engine: EngineKind,
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub max_output_tokens: u32,
    pub temperature: f32,
    pub queue: OrchestratorConfig,
    pub cluster: ClusterConfig,
    pub layout: LayoutConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            from_lang: ScriptLanguage::Japanese,
            to_lang: "en".to_string(),
            engine: EngineKind::Cloud,
            api_key: None,
            model: None,
            max_output_tokens: 8192,
            temperature: 0.3,
            queue: OrchestratorConfig::default(),
            cluster: ClusterConfig::default(),
            layout: LayoutConfig::default(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct SettingsFile {
    languages: Option<LanguagesSettings>,
    engine: Option<EngineSettings>,
    queue: Option<OrchestratorConfig>,
    cluster: Option<ClusterConfig>,
    layout: Option<LayoutConfig>,
}

#[derive(Debug, Default, Deserialize)]
struct LanguagesSettings {
    from: Option<String>,
    to: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct EngineSettings {
    kind: Option<String>,
    api_key: Option<String>,
    model: Option<String>,
    max_output_tokens: Option<u32>,
    temperature: Option<f32>,
}

pub fn load_settings(extra_path: Option<&Path>) -> Result<Settings> {
    let mut settings = Settings::default();
    ensure_home_settings_file()?;

    let mut ordered_paths = Vec::new();
    ordered_paths.push(PathBuf::from("settings.toml"));
    ordered_paths.push(PathBuf::from("settings.local.toml"));
    if let Some(home) = home_dir() {
        ordered_paths.push(home.join("settings.toml"));
        ordered_paths.push(home.join("settings.local.toml"));
    }
    if let Some(extra) = extra_path {
        if !extra.exists() {
            return Err(anyhow!("settings file not found: {}", extra.display()));
        }
        ordered_paths.push(extra.to_path_buf());
    }

    for path in ordered_paths {
        if path.exists() {
            let content = fs::read_to_string(&path)
                .with_context(|| format!("failed to read settings: {}", path.display()))?;
            let parsed: SettingsFile = toml::from_str(&content)
                .with_context(|| format!("failed to parse settings: {}", path.display()))?;
            settings.merge(parsed)?;
        }
    }

    Ok(settings)
}

impl Settings {
    fn merge(&mut self, incoming: SettingsFile) -> Result<()> {
        if let Some(languages) = incoming.languages {
            if let Some(from) = languages.from
                && !from.trim().is_empty()
            {
                self.from_lang = ScriptLanguage::from_name(&from)?;
            }
            if let Some(to) = languages.to
                && !to.trim().is_empty()
            {
                self.to_lang = to.trim().to_lowercase();
            }
        }
        if let Some(engine) = incoming.engine {
            if let Some(kind) = engine.kind
                && !kind.trim().is_empty()
            {
                self.engine = EngineKind::from_name(&kind)?;
            }
            if let Some(key) = engine.api_key
                && !key.trim().is_empty()
            {
                self.api_key = Some(key);
            }
            if let Some(model) = engine.model
                && !model.trim().is_empty()
            {
                self.model = Some(model);
            }
            if let Some(tokens) = engine.max_output_tokens
                && tokens > 0
            {
                self.max_output_tokens = tokens;
            }
            if let Some(temperature) = engine.temperature
                && temperature >= 0.0
            {
                self.temperature = temperature;
            }
        }
        // Algorithm tables override wholesale; unset fields take defaults.
        if let Some(queue) = incoming.queue {
            self.queue = queue;
        }
        if let Some(cluster) = incoming.cluster {
            self.cluster = cluster;
        }
        if let Some(layout) = incoming.layout {
            self.layout = layout;
        }
        Ok(())
    }
}

fn ensure_home_settings_file() -> Result<()> {
    let Some(home) = home_dir() else {
        return Ok(());
    };
    fs::create_dir_all(&home)
        .with_context(|| format!("failed to create settings directory: {}", home.display()))?;
    let path = home.join("settings.toml");
    if !path.exists() {
        fs::write(&path, DEFAULT_SETTINGS_TOML)
            .with_context(|| format!("failed to write settings: {}", path.display()))?;
    }
    Ok(())
}

fn home_dir() -> Option<PathBuf> {
    std::env::var("HOME").ok().and_then(|home| {
        let home = home.trim();
        if home.is_empty() {
            None
        } else {
            Some(Path::new(home).join(".manga-translator-rust"))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_defaults_parse() {
        let parsed: SettingsFile = toml::from_str(DEFAULT_SETTINGS_TOML).unwrap();
        let mut settings = Settings::default();
        settings.merge(parsed).unwrap();
        assert_eq!(settings.from_lang, ScriptLanguage::Japanese);
        assert_eq!(settings.to_lang, "en");
        assert_eq!(settings.engine, EngineKind::Cloud);
        assert_eq!(settings.queue.max_source_groups, 5);
        assert_eq!(settings.queue.jobs_per_source, 1);
    }

    #[test]
    fn later_values_override_earlier_ones() {
        let mut settings = Settings::default();
        let first: SettingsFile = toml::from_str(
            r#"
            [languages]
            from = "korean"
            [engine]
            kind = "statistical"
            "#,
        )
        .unwrap();
        let second: SettingsFile = toml::from_str(
            r#"
            [languages]
            to = "fr"
            [queue]
            max_source_groups = 2
            "#,
        )
        .unwrap();
        settings.merge(first).unwrap();
        settings.merge(second).unwrap();
        assert_eq!(settings.from_lang, ScriptLanguage::Korean);
        assert_eq!(settings.engine, EngineKind::Statistical);
        assert_eq!(settings.to_lang, "fr");
        assert_eq!(settings.queue.max_source_groups, 2);
    }

    #[test]
    fn partial_cluster_table_keeps_defaults_for_the_rest() {
        let parsed: SettingsFile = toml::from_str(
            r#"
            [cluster]
            angle_tolerance = 15.0
            "#,
        )
        .unwrap();
        let mut settings = Settings::default();
        settings.merge(parsed).unwrap();
        assert_eq!(settings.cluster.angle_tolerance, 15.0);
        assert_eq!(settings.cluster.scroll_height, 2300.0);
    }
}
