use crate::output::print_json;
use kya_core::config::TrayConfig;
use kya_core::datastore::SqliteStore;
use kya_core::escalation::{DispatchOutcome, EscalationExecutor, PrivilegeEnv};
use kya_core::gateway::{ActionGateway, ControlAction};
use kya_core::KyaError;
use serde::Serialize;

#[derive(Debug, Clone, Copy)]
pub enum Verb {
    Apply,
    Dismiss,
}

impl From<Verb> for ControlAction {
    fn from(v: Verb) -> Self {
        match v {
            Verb::Apply => ControlAction::Apply,
            Verb::Dismiss => ControlAction::Dismiss,
        }
    }
}

#[derive(Serialize)]
struct ActReport<'a> {
    action: ControlAction,
    id: i64,
    path: &'a str,
    outcome: &'a DispatchOutcome,
}

/// Refuse ids the datastore says are gone or already closed. An unreadable
/// datastore is not fatal; the control utility has the final word.
fn ensure_open(config: &TrayConfig, id: i64) -> anyhow::Result<()> {
    match SqliteStore::new(&config.db_path).open_suggestion(id) {
        Ok(record) => {
            tracing::debug!(id, check = %record.check_name, "suggestion is open");
            Ok(())
        }
        Err(e @ (KyaError::SuggestionNotFound(_) | KyaError::SuggestionClosed { .. })) => {
            Err(e.into())
        }
        Err(e) => {
            tracing::warn!(id, error = %e, "could not check suggestion status; running anyway");
            Ok(())
        }
    }
}

/// Run one action through the escalation chain and wait for the result.
pub fn run(config: &TrayConfig, verb: Verb, id: i64, json: bool) -> anyhow::Result<()> {
    let action = ControlAction::from(verb);
    ensure_open(config, id)?;
    let executor = EscalationExecutor::new(
        ActionGateway::from_config(config),
        PrivilegeEnv::detect(config),
    );

    let rt = super::runtime()?;
    let (path, outcome) = rt.block_on(async {
        let handle = executor.dispatch(action, id);
        let path = handle.path.name();
        (path, handle.outcome().await)
    });

    if json {
        print_json(&ActReport {
            action,
            id,
            path,
            outcome: &outcome,
        })?;
    } else {
        match &outcome {
            DispatchOutcome::Completed(o) if o.success() => {
                println!("[ok] {} {id}", action.past_tense())
            }
            DispatchOutcome::Completed(o) => {
                eprintln!("[ERR] {} exit {}", action.label(), o.exit_code);
                if !o.stderr.is_empty() {
                    eprint!("{}", o.stderr);
                }
            }
            DispatchOutcome::Failed { reason } => {
                eprintln!("[ERR] {} failed: {reason}", action.label())
            }
            DispatchOutcome::Deferred {
                command_line,
                terminal_opened: true,
            } => println!("Finish in the terminal window: {command_line}"),
            DispatchOutcome::Deferred {
                command_line,
                terminal_opened: false,
            } => println!("Run manually: {command_line}"),
        }
    }

    match outcome {
        DispatchOutcome::Completed(o) if !o.success() => {
            anyhow::bail!("{action} {id}: control utility exited with {}", o.exit_code)
        }
        DispatchOutcome::Failed { reason } => anyhow::bail!("{action} {id}: {reason}"),
        _ => Ok(()),
    }
}
