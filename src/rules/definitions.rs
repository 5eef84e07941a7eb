//! Declarative challenge/badge definition loading.
//!
//! One TOML file per definition under the configured directory, validated
//! against a strict schema before the idempotent upsert: re-loading
//! identical content is a no-op at the store level, changed content
//! overwrites. Definitions are never hand-edited in the store.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::{info, warn};

use crate::constants::limits;
use crate::db::Store;
use crate::entities::{badges, challenges};

use super::RuleRegistry;

static ID_PATTERN: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"^[a-z0-9][a-z0-9_-]*$").expect("static regex"));

const CATEGORIES: &[&str] = &[
    "session_security",
    "agent_security",
    "business_logic",
    "data_protection",
];

const DIFFICULTIES: &[&str] = &["easy", "medium", "hard", "expert"];

const RARITIES: &[&str] = &["common", "uncommon", "rare", "legendary"];

#[derive(Debug, Deserialize)]
pub struct DefinitionFile {
    pub challenge: Option<ChallengeDefinition>,
    pub badge: Option<BadgeDefinition>,
}

#[derive(Debug, Deserialize)]
pub struct ChallengeDefinition {
    pub id: String,

    #[serde(default = "default_version")]
    pub version: i32,

    pub title: String,

    pub description: String,

    pub category: String,

    pub difficulty: String,

    #[serde(default)]
    pub points: i32,

    pub detector_class: String,

    pub detector_config: Option<toml::Value>,

    #[serde(default = "default_active")]
    pub active: bool,
}

#[derive(Debug, Deserialize)]
pub struct BadgeDefinition {
    pub id: String,

    #[serde(default = "default_version")]
    pub version: i32,

    pub title: String,

    pub description: String,

    pub rarity: String,

    pub evaluator_class: String,

    pub evaluator_config: Option<toml::Value>,

    #[serde(default = "default_active")]
    pub active: bool,
}

const fn default_version() -> i32 {
    1
}

const fn default_active() -> bool {
    true
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LoadSummary {
    pub challenges: usize,
    pub badges: usize,
    pub skipped: usize,
}

pub struct DefinitionLoader {
    dir: PathBuf,
    store: Store,
}

impl DefinitionLoader {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>, store: Store) -> Self {
        Self {
            dir: dir.into(),
            store,
        }
    }

    /// Read every definition file, validate, and upsert. Invalid files and
    /// unregistered rule classes are skipped with a warning; they never
    /// abort the rest of the load.
    pub async fn load_all(&self, registry: &RuleRegistry) -> Result<LoadSummary> {
        let mut summary = LoadSummary::default();

        if !self.dir.exists() {
            info!("Definitions directory {} missing, nothing to load", self.dir.display());
            return Ok(summary);
        }

        let mut paths: Vec<PathBuf> = std::fs::read_dir(&self.dir)
            .with_context(|| format!("Failed to read {}", self.dir.display()))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.extension().and_then(|e| e.to_str()) == Some("toml"))
            .collect();
        paths.sort();

        for path in paths {
            match self.load_file(&path, registry).await {
                Ok((challenges, badges)) => {
                    summary.challenges += challenges;
                    summary.badges += badges;
                }
                Err(e) => {
                    summary.skipped += 1;
                    warn!("Skipping definition file {}: {e:#}", path.display());
                }
            }
        }

        info!(
            "Definitions loaded: {} challenges, {} badges ({} skipped)",
            summary.challenges, summary.badges, summary.skipped
        );
        Ok(summary)
    }

    async fn load_file(&self, path: &Path, registry: &RuleRegistry) -> Result<(usize, usize)> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let file: DefinitionFile =
            toml::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))?;

        if file.challenge.is_none() && file.badge.is_none() {
            anyhow::bail!("File declares neither [challenge] nor [badge]");
        }

        let mut counts = (0, 0);

        if let Some(challenge) = file.challenge {
            validate_challenge(&challenge).map_err(|e| anyhow::anyhow!(e))?;
            if !registry.has_detector(&challenge.detector_class) {
                warn!(
                    "Challenge {} references unregistered detector class {}; definition is inert",
                    challenge.id, challenge.detector_class
                );
            }
            self.store
                .upsert_challenge(challenges::Model {
                    id: challenge.id,
                    version: challenge.version,
                    title: challenge.title,
                    description: challenge.description,
                    category: challenge.category,
                    difficulty: challenge.difficulty,
                    points: challenge.points,
                    detector_class: challenge.detector_class,
                    detector_config: config_json(challenge.detector_config.as_ref())?,
                    active: challenge.active,
                    updated_at: chrono::Utc::now().to_rfc3339(),
                })
                .await?;
            counts.0 += 1;
        }

        if let Some(badge) = file.badge {
            validate_badge(&badge).map_err(|e| anyhow::anyhow!(e))?;
            if !registry.has_evaluator(&badge.evaluator_class) {
                warn!(
                    "Badge {} references unregistered evaluator class {}; definition is inert",
                    badge.id, badge.evaluator_class
                );
            }
            self.store
                .upsert_badge(badges::Model {
                    id: badge.id,
                    version: badge.version,
                    title: badge.title,
                    description: badge.description,
                    rarity: badge.rarity,
                    evaluator_class: badge.evaluator_class,
                    evaluator_config: config_json(badge.evaluator_config.as_ref())?,
                    active: badge.active,
                    updated_at: chrono::Utc::now().to_rfc3339(),
                })
                .await?;
            counts.1 += 1;
        }

        Ok(counts)
    }
}

fn config_json(config: Option<&toml::Value>) -> Result<String> {
    let value = match config {
        Some(value) => serde_json::to_value(value).context("Invalid rule config")?,
        None => serde_json::json!({}),
    };
    Ok(value.to_string())
}

fn validate_id(id: &str) -> Result<(), String> {
    if id.len() > limits::MAX_DEFINITION_ID_LEN {
        return Err(format!("id exceeds {} characters", limits::MAX_DEFINITION_ID_LEN));
    }
    if !ID_PATTERN.is_match(id) {
        return Err(format!("id '{id}' must match ^[a-z0-9][a-z0-9_-]*$"));
    }
    Ok(())
}

fn validate_strings(title: &str, description: &str) -> Result<(), String> {
    if title.is_empty() || title.len() > limits::MAX_TITLE_LEN {
        return Err(format!("title must be 1..={} characters", limits::MAX_TITLE_LEN));
    }
    if description.len() > limits::MAX_DESCRIPTION_LEN {
        return Err(format!(
            "description exceeds {} characters",
            limits::MAX_DESCRIPTION_LEN
        ));
    }
    Ok(())
}

fn validate_challenge(def: &ChallengeDefinition) -> Result<(), String> {
    validate_id(&def.id)?;
    validate_strings(&def.title, &def.description)?;
    if !CATEGORIES.contains(&def.category.as_str()) {
        return Err(format!("unknown category '{}'", def.category));
    }
    if !DIFFICULTIES.contains(&def.difficulty.as_str()) {
        return Err(format!("unknown difficulty '{}'", def.difficulty));
    }
    if def.detector_class.is_empty() {
        return Err("detector_class cannot be empty".to_string());
    }
    Ok(())
}

fn validate_badge(def: &BadgeDefinition) -> Result<(), String> {
    validate_id(&def.id)?;
    validate_strings(&def.title, &def.description)?;
    if !RARITIES.contains(&def.rarity.as_str()) {
        return Err(format!("unknown rarity '{}'", def.rarity));
    }
    if def.evaluator_class.is_empty() {
        return Err("evaluator_class cannot be empty".to_string());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn challenge(id: &str, category: &str, difficulty: &str) -> ChallengeDefinition {
        ChallengeDefinition {
            id: id.to_string(),
            version: 1,
            title: "A title".to_string(),
            description: "A description".to_string(),
            category: category.to_string(),
            difficulty: difficulty.to_string(),
            points: 100,
            detector_class: "prompt_leak".to_string(),
            detector_config: None,
            active: true,
        }
    }

    #[test]
    fn test_valid_challenge_passes() {
        let def = challenge("prompt-leak_1", "agent_security", "easy");
        assert!(validate_challenge(&def).is_ok());
    }

    #[test]
    fn test_id_pattern_is_enforced() {
        assert!(validate_challenge(&challenge("Bad Id", "agent_security", "easy")).is_err());
        assert!(validate_challenge(&challenge("-leading", "agent_security", "easy")).is_err());
        assert!(validate_challenge(&challenge(&"x".repeat(65), "agent_security", "easy")).is_err());
    }

    #[test]
    fn test_enums_are_enforced() {
        assert!(validate_challenge(&challenge("ok-id", "nonsense", "easy")).is_err());
        assert!(validate_challenge(&challenge("ok-id", "agent_security", "trivial")).is_err());
    }

    #[test]
    fn test_bounded_lengths() {
        let mut def = challenge("ok-id", "agent_security", "easy");
        def.title = "t".repeat(201);
        assert!(validate_challenge(&def).is_err());

        let mut def = challenge("ok-id", "agent_security", "easy");
        def.description = "d".repeat(2001);
        assert!(validate_challenge(&def).is_err());
    }

    #[test]
    fn test_definition_file_parses() {
        let parsed: DefinitionFile = toml::from_str(
            r#"
            [challenge]
            id = "prompt-leak-basic"
            title = "Leak the prompt"
            description = "Get the agent to reveal its instructions."
            category = "agent_security"
            difficulty = "easy"
            points = 100
            detector_class = "prompt_leak"

            [challenge.detector_config]
            patterns = ["system prompt"]
            "#,
        )
        .unwrap();

        let challenge = parsed.challenge.unwrap();
        assert_eq!(challenge.version, 1);
        assert!(challenge.active);
        let config = config_json(challenge.detector_config.as_ref()).unwrap();
        assert!(config.contains("system prompt"));
    }
}
