use crate::output::print_json;
use kya_core::config::{NotificationBackend, TrayConfig};
use kya_core::cursor::JsonCursorStore;
use kya_core::datastore::SqliteStore;
use kya_core::notify::NotificationDispatcher;
use kya_core::tray::Tray;
use serde::Serialize;
use std::sync::Arc;

#[derive(Serialize)]
struct PollReport {
    presented: Vec<i64>,
    cursor: Option<i64>,
}

/// Button presses need a running router and a one-shot poll has none, so
/// the rich backend is left out.
fn without_buttons(config: &TrayConfig) -> TrayConfig {
    let mut config = config.clone();
    config
        .notifications
        .retain(|b| *b != NotificationBackend::Rich);
    config
}

pub fn run(config: &TrayConfig, json: bool) -> anyhow::Result<()> {
    let state_path = config.state_path()?;
    let rt = super::runtime()?;
    let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
    let dispatcher = NotificationDispatcher::from_config(&without_buttons(config), tx);
    let report = rt.block_on(async {
        let mut tray = Tray::new(
            Arc::new(SqliteStore::new(&config.db_path)),
            Arc::new(JsonCursorStore::new(&state_path)),
            dispatcher,
        );
        let presented = tray.cycle().await;
        PollReport {
            presented,
            cursor: tray.cursor().last_id(),
        }
    });

    if json {
        return print_json(&report);
    }
    match report.cursor {
        None => println!("Cursor not seeded (datastore unreadable?)"),
        Some(last) if report.presented.is_empty() => {
            println!("No new suggestions (cursor at {last})")
        }
        Some(_) => {
            for id in &report.presented {
                println!("{id}");
            }
        }
    }
    Ok(())
}
