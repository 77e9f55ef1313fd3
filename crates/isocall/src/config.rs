//! # Worker Configuration
//!
//! Options for [`create_inline_worker`](crate::worker::create_inline_worker),
//! built fluently or read from the environment.

use std::fmt;
use std::str::FromStr;

/// Environment variable selecting the [`Isolation`] mode.
pub const ISOLATION_ENV: &str = "ISOCALL_ISOLATION";

/// Environment variable holding comma-separated dependency locators.
pub const DEPENDENCIES_ENV: &str = "ISOCALL_DEPENDENCIES";

/// Where calls run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Isolation {
    /// On an isolate thread if the environment supports one, otherwise inline.
    #[default]
    Auto,
    /// Always in the caller's task.
    Inline,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseIsolationError(String);

impl fmt::Display for ParseIsolationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown isolation mode `{}` (expected `auto` or `inline`)", self.0)
    }
}

impl std::error::Error for ParseIsolationError {}

impl FromStr for Isolation {
    type Err = ParseIsolationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "inline" => Ok(Self::Inline),
            _ => Err(ParseIsolationError(s.to_string())),
        }
    }
}

/// Options for one worker.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WorkerOptions {
    /// Dependency locators, loaded in order before the callable.
    pub dependencies: Vec<String>,
    /// Exported function to call; defaults to the module's only export.
    pub entry: Option<String>,
    pub isolation: Isolation,
    /// Names the isolate thread and tags log lines.
    pub name: Option<String>,
}

impl WorkerOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads options from `ISOCALL_ISOLATION` and `ISOCALL_DEPENDENCIES`.
    ///
    /// Unset variables keep their defaults; an unknown isolation mode is logged
    /// and ignored.
    pub fn from_env() -> Self {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    fn from_vars(var: impl Fn(&str) -> Option<String>) -> Self {
        let mut options = Self::new();

        if let Some(mode) = var(ISOLATION_ENV) {
            match mode.parse() {
                Ok(isolation) => options.isolation = isolation,
                Err(e) => tracing::warn!(variable = ISOLATION_ENV, "{}", e),
            }
        }

        if let Some(list) = var(DEPENDENCIES_ENV) {
            options.dependencies = list
                .split(',')
                .map(str::trim)
                .filter(|locator| !locator.is_empty())
                .map(str::to_string)
                .collect();
        }

        options
    }

    pub fn dependency(mut self, locator: impl Into<String>) -> Self {
        self.dependencies.push(locator.into());
        self
    }

    pub fn dependencies<I, S>(mut self, locators: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies.extend(locators.into_iter().map(Into::into));
        self
    }

    pub fn entry(mut self, entry: impl Into<String>) -> Self {
        self.entry = Some(entry.into());
        self
    }

    pub fn isolation(mut self, isolation: Isolation) -> Self {
        self.isolation = isolation;
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}
