//! Short team code ↔ site display name lookup.
//!
//! The site labels each team logo with the team's full name as alt text, so
//! every navigation starts here. The table is loaded once from a flat TOML
//! file (`mtl = "montreal canadiens"`) and never mutated afterwards.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use tracing::info;

use crate::error::{Result, ScrapeError};

/// Bidirectional, case-insensitive team lookup.
#[derive(Debug, Clone)]
pub struct TeamDirectory {
    /// lowercase code → lowercase display name
    names: BTreeMap<String, String>,
    /// lowercase display name → lowercase code
    codes: HashMap<String, String>,
}

impl TeamDirectory {
    /// Load the directory from a TOML file. A missing or malformed file is
    /// fatal.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ScrapeError::Config(format!("failed to read team file {}: {}", path.display(), e))
        })?;
        let dir = Self::from_toml_str(&content)?;
        info!("Loaded {} teams from {}", dir.len(), path.display());
        Ok(dir)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let raw: BTreeMap<String, String> = toml::from_str(content)
            .map_err(|e| ScrapeError::Config(format!("failed to parse team file: {}", e)))?;
        Self::from_pairs(raw)
    }

    /// Build from `(code, display name)` pairs, enforcing three-letter codes
    /// and a one-to-one mapping.
    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut names = BTreeMap::new();
        let mut codes = HashMap::new();

        for (code, name) in pairs {
            let code = code.as_ref().trim().to_lowercase();
            let name = name.as_ref().trim().to_lowercase();

            if code.len() != 3 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
                return Err(ScrapeError::Config(format!(
                    "team code must be three letters: {:?}",
                    code
                )));
            }
            if name.is_empty() {
                return Err(ScrapeError::Config(format!("team {} has an empty name", code)));
            }
            if let Some(other) = codes.insert(name.clone(), code.clone()) {
                return Err(ScrapeError::Config(format!(
                    "teams {} and {} share the display name {:?}",
                    other, code, name
                )));
            }
            if names.insert(code.clone(), name).is_some() {
                return Err(ScrapeError::Config(format!("duplicate team code {}", code)));
            }
        }

        Ok(TeamDirectory { names, codes })
    }

    /// Display name for a short code, lowercase.
    pub fn name(&self, code: &str) -> Result<&str> {
        self.names
            .get(&code.trim().to_lowercase())
            .map(String::as_str)
            .ok_or_else(|| ScrapeError::UnknownTeam(code.to_string()))
    }

    /// Logo alt text as rendered on the site (upper-cased display name).
    pub fn logo_alt(&self, code: &str) -> Result<String> {
        self.name(code).map(str::to_uppercase)
    }

    /// Short code (lowercase) for a display name or logo alt text.
    pub fn code(&self, name: &str) -> Result<&str> {
        self.codes
            .get(&name.trim().to_lowercase())
            .map(String::as_str)
            .ok_or_else(|| ScrapeError::UnknownTeam(name.to_string()))
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn codes(&self) -> impl Iterator<Item = &str> {
        self.names.keys().map(String::as_str)
    }
}
