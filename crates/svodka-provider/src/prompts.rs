//! String-keyed prompt table. Kept as an external YAML asset so the prompt
//! text can be tuned without touching core logic; the core only needs
//! `lookup(key) -> prompt text`.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{anyhow, Context, Result};

const BUILTIN_PROMPTS: &str = include_str!("../assets/prompts.yaml");

#[derive(Debug, Clone)]
pub struct PromptSet {
    prompts: HashMap<String, String>,
}

impl PromptSet {
    pub fn from_yaml_str(raw: &str) -> Result<Self> {
        let prompts: HashMap<String, String> =
            serde_yaml::from_str(raw).context("failed to parse prompts yaml")?;
        Ok(Self { prompts })
    }

    /// The prompts shipped with the binary.
    pub fn builtin() -> Self {
        Self::from_yaml_str(BUILTIN_PROMPTS).expect("builtin prompts yaml is valid")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read prompts file: {}", path.display()))?;
        Self::from_yaml_str(&raw)
    }

    /// Unknown keys are programmer errors, not recoverable conditions.
    pub fn lookup(&self, key: &str) -> Result<&str> {
        self.prompts
            .get(key)
            .map(String::as_str)
            .ok_or_else(|| anyhow!("unknown prompt key: {key}"))
    }
}
