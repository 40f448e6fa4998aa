//! Expansion of $(arg), $(env), $(dir) and $(timestamp) patterns in plan files

use chrono::format::{Item, StrftimeItems};
use regex::Regex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::LazyLock;

/// Matches `$(kind)` and `$(kind value)`
static PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\((\w+)(?:\s+([^)]*))?\)").expect("substitution pattern is valid")
});

/// Arguments referring to other arguments may nest at most this deep
const MAX_DEPTH: usize = 8;

/// Values available to substitution patterns
#[derive(Debug, Clone, Default)]
pub struct Substitutions {
    /// Plan arguments (defaults merged with overrides)
    pub args: HashMap<String, String>,
    /// Plan-level environment, consulted before the process environment
    pub env: HashMap<String, String>,
    /// Directory containing the plan file
    pub plan_dir: Option<PathBuf>,
}

impl Substitutions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_arg(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.args.insert(name.into(), value.into());
        self
    }

    pub fn with_args(mut self, args: impl IntoIterator<Item = (String, String)>) -> Self {
        self.args.extend(args);
        self
    }

    pub fn with_env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(name.into(), value.into());
        self
    }

    pub fn with_envs(mut self, envs: impl IntoIterator<Item = (String, String)>) -> Self {
        self.env.extend(envs);
        self
    }

    pub fn with_plan_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.plan_dir = Some(dir.into());
        self
    }

    /// Expand every pattern in `input`
    pub fn expand(&self, input: &str) -> Result<String, SubstitutionError> {
        self.expand_at(input, 0)
    }

    fn expand_at(&self, input: &str, depth: usize) -> Result<String, SubstitutionError> {
        if depth > MAX_DEPTH {
            return Err(SubstitutionError::TooDeep(input.to_string()));
        }

        let mut output = String::with_capacity(input.len());
        let mut cursor = 0;

        for caps in PATTERN.captures_iter(input) {
            let (Some(whole), Some(kind)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            let value = caps.get(2).map(|v| v.as_str().trim()).unwrap_or("");

            output.push_str(&input[cursor..whole.start()]);

            let resolved = self.resolve(kind.as_str(), value)?;
            if resolved.contains("$(") {
                output.push_str(&self.expand_at(&resolved, depth + 1)?);
            } else {
                output.push_str(&resolved);
            }

            cursor = whole.end();
        }

        output.push_str(&input[cursor..]);
        Ok(output)
    }

    fn resolve(&self, kind: &str, value: &str) -> Result<String, SubstitutionError> {
        match kind {
            "arg" => self
                .args
                .get(value)
                .cloned()
                .ok_or_else(|| SubstitutionError::UndefinedArg(value.to_string())),
            "env" => self
                .env
                .get(value)
                .cloned()
                .or_else(|| std::env::var(value).ok())
                .ok_or_else(|| SubstitutionError::UndefinedEnv(value.to_string())),
            "dir" => Ok(self
                .plan_dir
                .as_ref()
                .map(|d| d.to_string_lossy().into_owned())
                .unwrap_or_else(|| ".".to_string())),
            "timestamp" => {
                let format = if value.is_empty() { "%Y%m%d_%H%M%S" } else { value };
                let items: Vec<Item<'_>> = StrftimeItems::new(format).collect();
                if items.iter().any(|item| matches!(item, Item::Error)) {
                    return Err(SubstitutionError::InvalidTimestampFormat(format.to_string()));
                }
                Ok(chrono::Local::now()
                    .format_with_items(items.into_iter())
                    .to_string())
            }
            other => Err(SubstitutionError::UnknownKind(other.to_string())),
        }
    }
}

/// Errors that can occur during substitution
#[derive(Debug, thiserror::Error)]
pub enum SubstitutionError {
    #[error("Unknown substitution type: {0}")]
    UnknownKind(String),

    #[error("Undefined argument: {0}")]
    UndefinedArg(String),

    #[error("Undefined environment variable: {0}")]
    UndefinedEnv(String),

    #[error("Substitution nested too deeply in: {0}")]
    TooDeep(String),

    #[error("Invalid timestamp format: {0}")]
    InvalidTimestampFormat(String),
}
