use crate::output::print_json;
use anyhow::Context;
use kya_core::config::TrayConfig;
use kya_core::datastore::SqliteStore;

pub fn run(config: &TrayConfig, json: bool) -> anyhow::Result<()> {
    let store = SqliteStore::new(&config.db_path);
    let sample = store
        .latest_sample()
        .with_context(|| super::db_hint(store.path()))?;

    if json {
        return print_json(&sample);
    }
    match sample {
        Some(s) => println!("{}", s.status_line()),
        None => println!("No metrics yet"),
    }
    Ok(())
}
