use std::path::PathBuf;

pub const LOG_ENV: &str = "GRADESHEETD_LOG";
pub const WORKSPACE_ENV: &str = "GRADESHEETD_WORKSPACE";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonConfig {
    pub log_filter: String,
    /// Workspace opened before the first request, if any.
    pub workspace: Option<PathBuf>,
}

impl DaemonConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |k: &str| lookup(k).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let log_filter = non_empty(LOG_ENV)
            .or_else(|| non_empty("RUST_LOG"))
            .unwrap_or_else(|| "info".to_string());

        Self {
            log_filter,
            workspace: non_empty(WORKSPACE_ENV).map(PathBuf::from),
        }
    }
}
