pub mod act;
pub mod config;
pub mod list;
pub mod poll;
pub mod status;
pub mod terminal;
pub mod watch;

/// Runtime for commands that drive async core code.
pub(crate) fn runtime() -> anyhow::Result<tokio::runtime::Runtime> {
    Ok(tokio::runtime::Runtime::new()?)
}

/// Context attached to datastore failures.
pub(crate) fn db_hint(path: &std::path::Path) -> String {
    format!(
        "cannot read {} (run as a member of the agent's group, or as root)",
        path.display()
    )
}
