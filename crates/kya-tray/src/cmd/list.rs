use crate::output::{print_json, print_table, truncate};
use anyhow::Context;
use kya_core::config::TrayConfig;
use kya_core::datastore::SqliteStore;

pub fn run(config: &TrayConfig, json: bool) -> anyhow::Result<()> {
    let store = SqliteStore::new(&config.db_path);
    let open = store
        .list_open()
        .with_context(|| super::db_hint(store.path()))?;

    if json {
        return print_json(&open);
    }
    if open.is_empty() {
        println!("No open suggestions.");
        return Ok(());
    }

    let rows = open
        .iter()
        .map(|s| {
            vec![
                s.id.to_string(),
                s.when(),
                s.check_name.clone(),
                s.severity.to_string(),
                truncate(&s.message, 60),
                s.fix_command.as_deref().map(|f| truncate(f, 40)).unwrap_or_default(),
            ]
        })
        .collect();
    print_table(&["ID", "WHEN", "CHECK", "SEVERITY", "MESSAGE", "FIX"], rows);
    Ok(())
}
