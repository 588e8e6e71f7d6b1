//! Substitution engine for $(arg) and $(env) patterns in parameter values

use regex::{Captures, Regex};
use std::collections::HashMap;
use std::sync::LazyLock;

/// Regex for matching substitution patterns: $(type value), where type may be
/// hyphenated as in $(find-pkg-share pkg)
static SUBSTITUTION_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\(([\w-]+)\s+([^)]+)\)|\$\(([\w-]+)\)").unwrap());

/// Substitution context containing all available variables
#[derive(Debug, Clone, Default)]
pub struct SubstitutionContext {
    /// Deployment arguments
    pub args: HashMap<String, String>,
    /// Environment variables that take precedence over the process environment
    pub env: HashMap<String, String>,
    /// Only consult `env`, never the process environment
    pub isolated: bool,
}

impl SubstitutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an argument
    pub fn with_arg(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.args.insert(name.into(), value.into());
        self
    }

    /// Add multiple arguments
    pub fn with_args<I, K, V>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.args
            .extend(args.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Add an environment variable
    pub fn with_env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(name.into(), value.into());
        self
    }

    /// Stop falling back to the process environment
    pub fn isolated(mut self) -> Self {
        self.isolated = true;
        self
    }

    /// Whether the input contains anything this engine would touch
    pub fn has_patterns(input: &str) -> bool {
        SUBSTITUTION_PATTERN.is_match(input)
    }

    /// Substitute all patterns in a string
    pub fn substitute(&self, input: &str) -> Result<String, SubstitutionError> {
        let mut result = input.to_string();
        let mut last_result = String::new();

        // Iterate until no more substitutions are made (handles nested substitutions)
        let max_iterations = 10;
        let mut iterations = 0;

        while result != last_result && iterations < max_iterations {
            last_result = result.clone();
            result = self.substitute_once(&result)?;
            iterations += 1;
        }

        if iterations >= max_iterations && result != last_result {
            return Err(SubstitutionError::MaxIterationsExceeded(input.to_string()));
        }

        Ok(result)
    }

    /// Perform a single pass of substitution
    fn substitute_once(&self, input: &str) -> Result<String, SubstitutionError> {
        let mut error: Option<SubstitutionError> = None;

        let result = SUBSTITUTION_PATTERN.replace_all(input, |caps: &Captures| {
            if error.is_some() {
                return String::new();
            }

            match self.resolve_capture(caps) {
                Ok(value) => value,
                Err(e) => {
                    error = Some(e);
                    String::new()
                }
            }
        });

        if let Some(e) = error {
            return Err(e);
        }

        Ok(result.into_owned())
    }

    /// Resolve a single capture group
    fn resolve_capture(&self, caps: &Captures) -> Result<String, SubstitutionError> {
        let whole = caps.get(0).map(|m| m.as_str()).unwrap_or_default();

        // $(type value), e.g. $(arg vehicle_id)
        if let (Some(subst_type), Some(value)) = (caps.get(1), caps.get(2)) {
            return self.resolve_typed(subst_type.as_str(), value.as_str().trim(), whole);
        }

        // $(type), e.g. $(dirname)
        if let Some(subst_type) = caps.get(3) {
            return self.resolve_typed(subst_type.as_str(), "", whole);
        }

        Err(SubstitutionError::InvalidPattern(whole.to_string()))
    }

    /// Resolve a typed substitution. Types this engine does not know are left
    /// in place for downstream launch emitters.
    fn resolve_typed(
        &self,
        subst_type: &str,
        value: &str,
        whole: &str,
    ) -> Result<String, SubstitutionError> {
        match subst_type {
            "arg" => self.resolve_arg(value),
            "env" => self.resolve_env(value),
            _ => Ok(whole.to_string()),
        }
    }

    /// Resolve an argument reference
    fn resolve_arg(&self, name: &str) -> Result<String, SubstitutionError> {
        self.args
            .get(name)
            .cloned()
            .ok_or_else(|| SubstitutionError::UndefinedArg(name.to_string()))
    }

    /// Resolve an environment variable reference, `NAME` or `NAME default`
    fn resolve_env(&self, value: &str) -> Result<String, SubstitutionError> {
        let (name, default) = match value.split_once(char::is_whitespace) {
            Some((name, default)) => (name, Some(default.trim())),
            None => (value, None),
        };

        // First check our local env overrides
        if let Some(value) = self.env.get(name) {
            return Ok(value.clone());
        }

        // Then check system environment
        let found = if self.isolated {
            None
        } else {
            std::env::var(name).ok()
        };
        found
            .or_else(|| default.map(str::to_string))
            .ok_or_else(|| SubstitutionError::UndefinedEnv(name.to_string()))
    }
}

/// Errors that can occur during substitution
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SubstitutionError {
    #[error("Undefined argument: {0}")]
    UndefinedArg(String),

    #[error("Undefined environment variable: {0}")]
    UndefinedEnv(String),

    #[error("Invalid substitution pattern: {0}")]
    InvalidPattern(String),

    #[error("Maximum substitution iterations exceeded for: {0}")]
    MaxIterationsExceeded(String),
}
