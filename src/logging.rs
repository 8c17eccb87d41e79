use anyhow::Context;
use chrono::Local;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter used when RUST_LOG is not set
pub fn default_filter(verbose: bool) -> &'static str {
    if verbose {
        "ontotree=debug,info"
    } else {
        "ontotree=info,warn"
    }
}

/// Default log file location
pub fn default_log_path() -> PathBuf {
    if let Some(data_dir) = dirs::data_dir() {
        data_dir.join("ontotree").join("ontotree.log")
    } else {
        PathBuf::from("ontotree.log")
    }
}

/// Install the global tracing subscriber.
///
/// Logs go to stderr, or appended to `log_file` when one is given. Returns
/// the file path in use, if any.
pub fn init_logging(verbose: bool, log_file: Option<&Path>) -> anyhow::Result<Option<PathBuf>> {
    let filter = default_filter(verbose);
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());

    let Some(path) = log_file else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .try_init()
            .context("Failed to install logger")?;
        return Ok(None);
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open log file {}", path.display()))?;

    let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S");
    writeln!(file, "\n=== OntoTree Session Started at {} ===\n", timestamp)?;

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_ansi(false)
                .with_writer(Mutex::new(file)),
        )
        .try_init()
        .context("Failed to install logger")?;

    Ok(Some(path.to_path_buf()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter() {
        assert_eq!(default_filter(false), "ontotree=info,warn");
        assert_eq!(default_filter(true), "ontotree=debug,info");
    }

    #[test]
    fn test_default_log_path() {
        let path = default_log_path();
        assert!(path.ends_with("ontotree.log"));
    }

    #[test]
    fn test_file_logging_writes_marker() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("ontotree.log");
        // Another test may already own the global subscriber; the marker is
        // written before installation either way.
        let _ = init_logging(false, Some(&path));
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("OntoTree Session Started"));
    }
}
