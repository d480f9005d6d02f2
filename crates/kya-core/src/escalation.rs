//! Privilege escalation for mutating actions.
//!
//! Path selection is a pure function of the detected [`PrivilegeEnv`]:
//!
//! 1. already root            → [`EscalationPath::Direct`]
//! 2. elevation helper found  → [`EscalationPath::Prompted`] (`pkexec kya ...`)
//! 3. otherwise               → [`EscalationPath::Terminal`] (`sudo kya ...` in a
//!    terminal window, outcome never observed)
//!
//! A prompted run whose helper fails to *start* drops to the terminal path. A
//! cancelled prompt is not a start failure: it comes back as an ordinary
//! nonzero gateway outcome.
//!
//! [`EscalationExecutor::dispatch`] always returns immediately with a
//! [`DispatchHandle`]; every subprocess runs on a spawned task.

use std::path::PathBuf;
use std::process::Stdio;

use serde::Serialize;
use tokio::process::Command;
use tokio::task::JoinHandle;

use crate::config::TrayConfig;
use crate::error::KyaError;
use crate::gateway::{ActionGateway, ControlAction, GatewayOutcome, GatewayRequest};

// ---------------------------------------------------------------------------
// Environment detection
// ---------------------------------------------------------------------------

/// What the current process can use to reach root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrivilegeEnv {
    pub elevated: bool,
    /// Resolved path of the interactive elevation helper, if installed.
    pub elevation_helper: Option<PathBuf>,
    /// Terminal emulator for the manual fallback.
    pub terminal: String,
}

impl PrivilegeEnv {
    pub fn detect(config: &TrayConfig) -> Self {
        let elevation_helper = which::which(&config.elevation_helper).ok();
        if elevation_helper.is_none() {
            tracing::debug!(helper = %config.elevation_helper, "elevation helper not found on PATH");
        }
        Self {
            elevated: is_elevated(),
            elevation_helper,
            terminal: config.terminal.clone(),
        }
    }
}

#[cfg(unix)]
pub fn is_elevated() -> bool {
    // SAFETY: geteuid has no preconditions and cannot fail.
    unsafe { libc::geteuid() == 0 }
}

#[cfg(not(unix))]
pub fn is_elevated() -> bool {
    false
}

// ---------------------------------------------------------------------------
// Path selection
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EscalationPath {
    Direct,
    Prompted { helper: PathBuf },
    Terminal { emulator: String },
}

impl EscalationPath {
    pub fn name(&self) -> &'static str {
        match self {
            EscalationPath::Direct => "direct",
            EscalationPath::Prompted { .. } => "prompted",
            EscalationPath::Terminal { .. } => "terminal",
        }
    }
}

pub fn select_path(env: &PrivilegeEnv) -> EscalationPath {
    if env.elevated {
        return EscalationPath::Direct;
    }
    match &env.elevation_helper {
        Some(helper) => EscalationPath::Prompted {
            helper: helper.clone(),
        },
        None => EscalationPath::Terminal {
            emulator: env.terminal.clone(),
        },
    }
}

// ---------------------------------------------------------------------------
// Dispatch results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DispatchOutcome {
    /// The control utility ran; `exit_code` tells success from failure.
    Completed(GatewayOutcome),
    /// The utility could not be run or did not finish (spawn error, timeout).
    Failed { reason: String },
    /// Handed to the user in a terminal window; result deliberately unobserved.
    Deferred {
        command_line: String,
        terminal_opened: bool,
    },
}

impl DispatchOutcome {
    pub fn succeeded(&self) -> bool {
        matches!(self, DispatchOutcome::Completed(o) if o.success())
    }
}

/// Handle to a dispatched action.
///
/// Await [`DispatchHandle::outcome`] to observe the result. Dropping the
/// handle leaves the task running unobserved.
#[derive(Debug)]
pub struct DispatchHandle {
    pub action: ControlAction,
    pub id: i64,
    pub path: EscalationPath,
    task: JoinHandle<DispatchOutcome>,
}

impl DispatchHandle {
    pub async fn outcome(self) -> DispatchOutcome {
        match self.task.await {
            Ok(outcome) => outcome,
            Err(e) => DispatchOutcome::Failed {
                reason: format!("dispatch task aborted: {e}"),
            },
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

// ---------------------------------------------------------------------------
// EscalationExecutor
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct EscalationExecutor {
    gateway: ActionGateway,
    env: PrivilegeEnv,
}

impl EscalationExecutor {
    pub fn new(gateway: ActionGateway, env: PrivilegeEnv) -> Self {
        Self { gateway, env }
    }

    /// Start `action` on suggestion `id` without waiting for it.
    ///
    /// Must be called from inside a tokio runtime.
    pub fn dispatch(&self, action: ControlAction, id: i64) -> DispatchHandle {
        let path = select_path(&self.env);
        tracing::info!(action = %action, id, path = path.name(), "dispatching suggestion action");
        let gateway = self.gateway.clone();
        let chosen = path.clone();
        let terminal = self.env.terminal.clone();
        let task =
            tokio::spawn(async move { execute(&gateway, &chosen, &terminal, action, id).await });
        DispatchHandle {
            action,
            id,
            path,
            task,
        }
    }
}

async fn execute(
    gateway: &ActionGateway,
    path: &EscalationPath,
    terminal: &str,
    action: ControlAction,
    id: i64,
) -> DispatchOutcome {
    let request = GatewayRequest::new(action, id, true);
    match path {
        EscalationPath::Direct => settle(gateway.invoke(&request, None).await, action, id),
        EscalationPath::Prompted { helper } => {
            match gateway.invoke(&request, Some(helper.as_path())).await {
                Err(KyaError::GatewaySpawn { program, source }) => {
                    tracing::warn!(helper = %program, error = %source, "elevation helper failed to start; falling back to terminal");
                    open_terminal(gateway, terminal, action, id)
                }
                other => settle(other, action, id),
            }
        }
        EscalationPath::Terminal { emulator } => open_terminal(gateway, emulator, action, id),
    }
}

fn settle(
    result: crate::Result<GatewayOutcome>,
    action: ControlAction,
    id: i64,
) -> DispatchOutcome {
    match result {
        Ok(outcome) => {
            if outcome.success() {
                tracing::info!(action = %action, id, "control utility succeeded");
            } else {
                tracing::warn!(
                    action = %action,
                    id,
                    exit_code = outcome.exit_code,
                    stderr = %outcome.stderr.trim_end(),
                    "control utility failed"
                );
            }
            DispatchOutcome::Completed(outcome)
        }
        Err(e) => {
            tracing::warn!(action = %action, id, error = %e, "control utility could not be run");
            DispatchOutcome::Failed {
                reason: e.to_string(),
            }
        }
    }
}

/// Open `emulator -e bash -lc "sudo kya <action> <id>"` and return at once.
fn open_terminal(
    gateway: &ActionGateway,
    emulator: &str,
    action: ControlAction,
    id: i64,
) -> DispatchOutcome {
    let command_line = gateway.command_line(&GatewayRequest::new(action, id, false), Some("sudo"));
    let terminal_opened = open_in_terminal(emulator, &command_line);
    DispatchOutcome::Deferred {
        command_line,
        terminal_opened,
    }
}

/// Run `command_line` under `bash -lc` in a new `emulator` window.
///
/// The child is never awaited; the user finishes it by hand. Returns false
/// when the window could not be opened, after logging the command so the
/// user can run it themselves. Must be called from inside a tokio runtime.
pub fn open_in_terminal(emulator: &str, command_line: &str) -> bool {
    let spawned = Command::new(emulator)
        .args(["-e", "bash", "-lc", command_line])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn();
    match spawned {
        Ok(_child) => {
            tracing::info!(terminal = %emulator, command = %command_line, "opened terminal; result will not be observed");
            true
        }
        Err(e) => {
            tracing::warn!(terminal = %emulator, error = %e, "could not open a terminal; run in a terminal: {command_line}");
            false
        }
    }
}


#[cfg(all(test, unix))]
mod process_tests {
    use super::*;
    use crate::gateway::fakes::script;
    use std::path::Path;
    use std::time::{Duration, Instant};
    use tempfile::TempDir;

    struct Rig {
        dir: TempDir,
        kya: PathBuf,
        terminal_log: PathBuf,
        terminal: PathBuf,
    }

    fn rig(kya_body: &str) -> Rig {
        let dir = TempDir::new().unwrap();
        let kya = script(dir.path(), "kya", kya_body);
        let terminal_log = dir.path().join("terminal.txt");
        let terminal = script(
            dir.path(),
            "term",
            &format!("echo \"$@\" > '{}'", terminal_log.display()),
        );
        Rig {
            dir,
            kya,
            terminal_log,
            terminal,
        }
    }

    fn executor(rig: &Rig, elevated: bool, helper: Option<PathBuf>) -> EscalationExecutor {
        EscalationExecutor::new(
            ActionGateway::new(&rig.kya, Some(Duration::from_secs(10))),
            PrivilegeEnv {
                elevated,
                elevation_helper: helper,
                terminal: rig.terminal.display().to_string(),
            },
        )
    }

    async fn wait_for(path: &Path) -> String {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            if let Ok(s) = std::fs::read_to_string(path) {
                if !s.is_empty() {
                    return s;
                }
            }
            assert!(Instant::now() < deadline, "timed out waiting for {}", path.display());
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    }

    #[tokio::test]
    async fn elevated_process_calls_gateway_directly() {
        let rig = rig("exit 0");
        let handle = executor(&rig, true, None).dispatch(ControlAction::Apply, 6);
        assert_eq!(handle.path, EscalationPath::Direct);
        assert!(handle.outcome().await.succeeded());
        assert!(!rig.terminal_log.exists());
    }

    #[tokio::test]
    async fn direct_failure_surfaces_stderr() {
        let rig = rig("echo 'refusing: already applied' >&2\nexit 2");
        let outcome = executor(&rig, true, None)
            .dispatch(ControlAction::Dismiss, 3)
            .outcome()
            .await;
        assert_eq!(
            outcome,
            DispatchOutcome::Completed(GatewayOutcome {
                exit_code: 2,
                stderr: "refusing: already applied\n".into(),
            })
        );
    }

    #[tokio::test]
    async fn prompted_path_runs_through_helper() {
        let rig = rig("exit 0");
        let helper_log = rig.dir.path().join("helper.txt");
        let helper = script(
            rig.dir.path(),
            "pkexec",
            &format!("echo \"$@\" > '{}'\nexec \"$@\"", helper_log.display()),
        );
        let handle = executor(&rig, false, Some(helper)).dispatch(ControlAction::Apply, 9);
        assert_eq!(handle.path.name(), "prompted");
        assert!(handle.outcome().await.succeeded());
        let argv = std::fs::read_to_string(&helper_log).unwrap();
        assert_eq!(argv.trim(), format!("{} apply 9 --yes", rig.kya.display()));
        assert!(!rig.terminal_log.exists());
    }

    #[tokio::test]
    async fn cancelled_prompt_is_a_plain_failure() {
        let rig = rig("exit 0");
        let helper = script(
            rig.dir.path(),
            "pkexec",
            "echo 'Error executing command as another user: Request dismissed' >&2\nexit 126",
        );
        let outcome = executor(&rig, false, Some(helper))
            .dispatch(ControlAction::Apply, 4)
            .outcome()
            .await;
        match outcome {
            DispatchOutcome::Completed(o) => {
                assert_eq!(o.exit_code, 126);
                assert!(o.stderr.contains("Request dismissed"));
            }
            other => panic!("expected Completed, got {other:?}"),
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!rig.terminal_log.exists(), "cancel must not open a terminal");
    }

    #[tokio::test]
    async fn helper_that_cannot_start_falls_back_to_terminal() {
        let rig = rig("exit 0");
        let missing = rig.dir.path().join("no-such-pkexec");
        let outcome = executor(&rig, false, Some(missing))
            .dispatch(ControlAction::Dismiss, 5)
            .outcome()
            .await;
        match outcome {
            DispatchOutcome::Deferred {
                command_line,
                terminal_opened,
            } => {
                assert!(terminal_opened);
                assert_eq!(command_line, format!("sudo {} dismiss 5", rig.kya.display()));
            }
            other => panic!("expected Deferred, got {other:?}"),
        }
        let argv = wait_for(&rig.terminal_log).await;
        assert!(argv.starts_with("-e bash -lc sudo"), "{argv}");
    }

    #[tokio::test]
    async fn no_helper_opens_terminal_without_yes() {
        let rig = rig("exit 0");
        let outcome = executor(&rig, false, None)
            .dispatch(ControlAction::Apply, 6)
            .outcome()
            .await;
        assert!(matches!(
            outcome,
            DispatchOutcome::Deferred {
                terminal_opened: true,
                ..
            }
        ));
        let argv = wait_for(&rig.terminal_log).await;
        assert_eq!(
            argv.trim(),
            format!("-e bash -lc sudo {} apply 6", rig.kya.display())
        );
    }

    #[tokio::test]
    async fn missing_terminal_still_reports_command_line() {
        let rig = rig("exit 0");
        let mut exec = executor(&rig, false, None);
        exec.env.terminal = rig.dir.path().join("no-term").display().to_string();
        let outcome = exec.dispatch(ControlAction::Apply, 8).outcome().await;
        assert_eq!(
            outcome,
            DispatchOutcome::Deferred {
                command_line: format!("sudo {} apply 8", rig.kya.display()),
                terminal_opened: false,
            }
        );
    }

    #[tokio::test]
    async fn dispatch_returns_before_the_utility_finishes() {
        let rig = rig("sleep 1\nexit 0");
        let started = Instant::now();
        let handle = executor(&rig, true, None).dispatch(ControlAction::Apply, 1);
        assert!(started.elapsed() < Duration::from_millis(500));
        assert!(!handle.is_finished());
        assert!(handle.outcome().await.succeeded());
    }
}
