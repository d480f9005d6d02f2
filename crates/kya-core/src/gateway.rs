//! Invocation of the privileged control utility (`kya apply|dismiss <id>`).
//!
//! The gateway is transport only: it reports the exit code and stderr
//! verbatim and never retries or interprets the message.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::process::Command;

use crate::config::TrayConfig;
use crate::error::{KyaError, Result};

// ---------------------------------------------------------------------------
// ControlAction / GatewayRequest
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlAction {
    Apply,
    Dismiss,
}

impl ControlAction {
    pub fn subcommand(&self) -> &'static str {
        match self {
            ControlAction::Apply => "apply",
            ControlAction::Dismiss => "dismiss",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ControlAction::Apply => "Apply",
            ControlAction::Dismiss => "Dismiss",
        }
    }

    pub fn past_tense(&self) -> &'static str {
        match self {
            ControlAction::Apply => "Applied",
            ControlAction::Dismiss => "Dismissed",
        }
    }
}

impl std::fmt::Display for ControlAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.subcommand())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GatewayRequest {
    pub action: ControlAction,
    pub id: i64,
    /// Pass `--yes` so `apply` does not prompt; ignored for `dismiss`.
    pub confirm: bool,
}

impl GatewayRequest {
    pub fn new(action: ControlAction, id: i64, confirm: bool) -> Self {
        Self {
            action,
            id,
            confirm,
        }
    }

    pub fn args(&self) -> Vec<String> {
        let mut args = vec![self.action.subcommand().to_string(), self.id.to_string()];
        if self.confirm && self.action == ControlAction::Apply {
            args.push("--yes".to_string());
        }
        args
    }
}

// ---------------------------------------------------------------------------
// GatewayOutcome
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayOutcome {
    pub exit_code: i32,
    pub stderr: String,
}

impl GatewayOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

// ---------------------------------------------------------------------------
// ActionGateway
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ActionGateway {
    utility: PathBuf,
    timeout: Option<Duration>,
}

impl ActionGateway {
    pub fn new(utility: impl Into<PathBuf>, timeout: Option<Duration>) -> Self {
        Self {
            utility: utility.into(),
            timeout,
        }
    }

    pub fn from_config(config: &TrayConfig) -> Self {
        Self::new(config.control_utility.clone(), config.gateway_timeout())
    }

    /// The command line a user would type for `request`, optionally behind
    /// `prefix` (e.g. `sudo`).
    pub fn command_line(&self, request: &GatewayRequest, prefix: Option<&str>) -> String {
        self.shell_command(&request.args(), prefix)
    }

    /// `[prefix] <utility> <args...>`, quoted for a POSIX shell.
    pub fn shell_command<S: AsRef<str>>(&self, args: &[S], prefix: Option<&str>) -> String {
        let mut words: Vec<String> = Vec::new();
        if let Some(p) = prefix {
            words.push(p.to_string());
        }
        words.push(shell_quote(&self.utility.to_string_lossy()));
        words.extend(args.iter().map(|a| shell_quote(a.as_ref())));
        words.join(" ")
    }

    /// Run the control utility, directly or behind `wrapper` (an elevation
    /// helper such as `pkexec`), and report its raw outcome.
    ///
    /// Fails with [`KyaError::GatewaySpawn`] when the program cannot be
    /// started and [`KyaError::GatewayTimeout`] when the configured bound
    /// expires; the child is killed in that case.
    pub async fn invoke(
        &self,
        request: &GatewayRequest,
        wrapper: Option<&Path>,
    ) -> Result<GatewayOutcome> {
        let mut cmd = match wrapper {
            Some(w) => {
                let mut c = Command::new(w);
                c.arg(&self.utility);
                c
            }
            None => Command::new(&self.utility),
        };
        cmd.args(request.args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let program = wrapper.unwrap_or(&self.utility).display().to_string();
        tracing::debug!(program = %program, action = %request.action, id = request.id, "invoking control utility");

        let child = cmd.spawn().map_err(|source| KyaError::GatewaySpawn {
            program: program.clone(),
            source,
        })?;

        let output = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, child.wait_with_output())
                .await
                .map_err(|_| KyaError::GatewayTimeout(limit.as_secs()))??,
            None => child.wait_with_output().await?,
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        if !stdout.trim().is_empty() {
            tracing::debug!(id = request.id, stdout = %stdout.trim_end(), "control utility output");
        }

        Ok(GatewayOutcome {
            exit_code: output.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Single-quote `word` for a POSIX shell unless it is plainly safe.
pub fn shell_quote(word: &str) -> String {
    let safe = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:@%+,".contains(c));
    if safe {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}
