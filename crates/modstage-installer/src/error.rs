use std::path::PathBuf;

use thiserror::Error;

/// Errors that abort a whole installer operation.
#[derive(Debug, Error)]
pub enum InstallError {
    #[error("unknown entry point '{0}'")]
    UnknownEntryPoint(String),

    #[error("another installation holds {}{}", .path.display(), holder_suffix(.holder))]
    Locked {
        path: PathBuf,
        holder: Option<String>,
    },

    #[error("configuration error: {0:#}")]
    Configuration(anyhow::Error),

    #[error("failed to persist install ledger: {0:#}")]
    Ledger(anyhow::Error),
}

/// Failure raised by a module lifecycle hook.
#[derive(Debug, Error)]
pub enum HookError {
    /// Structured failure carrying a message key and its parameters.
    #[error("{key}{}", format_params(.params))]
    Installer { key: String, params: Vec<String> },

    #[error(transparent)]
    Runtime(#[from] anyhow::Error),
}

impl HookError {
    pub fn installer(key: impl Into<String>, params: Vec<String>) -> Self {
        Self::Installer {
            key: key.into(),
            params,
        }
    }
}

fn holder_suffix(holder: &Option<String>) -> String {
    holder
        .as_deref()
        .map(|pid| format!(" (pid={pid})"))
        .unwrap_or_default()
}

fn format_params(params: &[String]) -> String {
    if params.is_empty() {
        String::new()
    } else {
        format!(" ({})", params.join(", "))
    }
}
