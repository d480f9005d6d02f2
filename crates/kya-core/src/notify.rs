//! Presentation of new suggestions.
//!
//! Backends are checked once at startup and tried in rank order. The first
//! one that delivers is remembered; when it later fails the dispatcher moves
//! down the list. The log backend cannot fail, so `present` never errors.
//!
//! Buttons pressed on a rich notification come back as [`ActionRequest`]s on
//! an unbounded channel; the dispatcher never waits for them.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::io::AsyncBufReadExt;
use tokio::process::Command;
use tokio::sync::mpsc::UnboundedSender;

use crate::config::{NotificationBackend, TrayConfig};
use crate::error::{KyaError, Result};
use crate::gateway::ControlAction;
use crate::suggestion::SuggestionRecord;

pub const APP_NAME: &str = "Kydras System Agent";
const NOTIFY_SEND: &str = "notify-send";

// ---------------------------------------------------------------------------
// User actions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserAction {
    Apply,
    Dismiss,
    OpenDetail,
}

impl UserAction {
    pub const ALL: [UserAction; 3] = [UserAction::Apply, UserAction::Dismiss, UserAction::OpenDetail];

    /// Action key as reported back by the notification server.
    pub fn key(&self) -> &'static str {
        match self {
            UserAction::Apply => "apply",
            UserAction::Dismiss => "dismiss",
            UserAction::OpenDetail => "open",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            UserAction::Apply => "Apply",
            UserAction::Dismiss => "Dismiss",
            UserAction::OpenDetail => "Open GUI",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|a| a.key() == key.trim())
    }

    /// The privileged operation behind this action, if any.
    pub fn control_action(&self) -> Option<ControlAction> {
        match self {
            UserAction::Apply => Some(ControlAction::Apply),
            UserAction::Dismiss => Some(ControlAction::Dismiss),
            UserAction::OpenDetail => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActionRequest {
    pub action: UserAction,
    pub id: i64,
}

// ---------------------------------------------------------------------------
// Presenter
// ---------------------------------------------------------------------------

pub trait Presenter: Send + Sync {
    fn backend(&self) -> NotificationBackend;

    /// Checked once when the dispatcher is built.
    fn is_available(&self) -> bool;

    /// False once a popup failed after `present` had already returned.
    fn is_healthy(&self) -> bool {
        true
    }

    fn present(
        &self,
        record: &SuggestionRecord,
        actions: &UnboundedSender<ActionRequest>,
    ) -> Result<()>;
}

/// `notify-send --action ... --wait`: buttons, answer read from stdout.
///
/// The popup outlives `present`, so a failure shows up later as a nonzero
/// exit with no action chosen. That marks the notifier unhealthy.
pub struct RichNotifier {
    program: PathBuf,
    failed: Arc<AtomicBool>,
}

impl RichNotifier {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            failed: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl Presenter for RichNotifier {
    fn backend(&self) -> NotificationBackend {
        NotificationBackend::Rich
    }

    // libnotify grew --action in 0.7.9; older builds only do plain popups.
    fn is_available(&self) -> bool {
        std::process::Command::new(&self.program)
            .arg("--help")
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .output()
            .map(|o| String::from_utf8_lossy(&o.stdout).contains("--action"))
            .unwrap_or(false)
    }

    fn is_healthy(&self) -> bool {
        !self.failed.load(Ordering::Acquire)
    }

    fn present(
        &self,
        record: &SuggestionRecord,
        actions: &UnboundedSender<ActionRequest>,
    ) -> Result<()> {
        let mut cmd = Command::new(&self.program);
        cmd.arg(format!("--app-name={APP_NAME}"))
            .arg(format!("--urgency={}", record.severity.urgency()))
            .arg("--icon=dialog-information");
        for action in UserAction::ALL {
            cmd.arg(format!("--action={}={}", action.key(), action.label()));
        }
        cmd.arg("--wait")
            .arg(record.title())
            .arg(record.body())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());

        let mut child = cmd.spawn().map_err(|e| notification_error(self.backend(), e))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| notification_error(self.backend(), "stdout not captured"))?;

        let record = record.clone();
        let tx = actions.clone();
        let failed = Arc::clone(&self.failed);
        tokio::spawn(async move {
            let id = record.id;
            let mut lines = tokio::io::BufReader::new(stdout).lines();
            let chosen = lines.next_line().await.ok().flatten();
            let status = child.wait().await;
            if let Some(action) = chosen.as_deref().and_then(UserAction::from_key) {
                tracing::debug!(id, action = action.key(), "notification action chosen");
                if tx.send(ActionRequest { action, id }).is_err() {
                    tracing::warn!(id, "action router is gone; dropping notification action");
                }
                return;
            }
            let reason = match status {
                Ok(s) if s.success() => {
                    tracing::debug!(id, "notification closed without an action");
                    return;
                }
                Ok(s) => s.to_string(),
                Err(e) => e.to_string(),
            };
            tracing::warn!(id, reason = %reason, "rich notification failed; degrading");
            failed.store(true, Ordering::Release);
            log_line(&record);
        });
        Ok(())
    }
}

/// Plain `notify-send title body`.
pub struct BasicNotifier {
    program: PathBuf,
}

impl BasicNotifier {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Presenter for BasicNotifier {
    fn backend(&self) -> NotificationBackend {
        NotificationBackend::Basic
    }

    fn is_available(&self) -> bool {
        resolves(&self.program)
    }

    fn present(
        &self,
        record: &SuggestionRecord,
        _actions: &UnboundedSender<ActionRequest>,
    ) -> Result<()> {
        let mut child = Command::new(&self.program)
            .arg(format!("--app-name={APP_NAME}"))
            .arg(format!("--urgency={}", record.severity.urgency()))
            .arg(record.title())
            .arg(record.body())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| notification_error(self.backend(), e))?;
        let id = record.id;
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) if !status.success() => {
                    tracing::warn!(id, status = %status, "notify-send exited with failure")
                }
                Err(e) => tracing::warn!(id, error = %e, "notify-send wait failed"),
                Ok(_) => {}
            }
        });
        Ok(())
    }
}

/// Log line; used headless and as the last resort.
pub struct LogNotifier;

impl Presenter for LogNotifier {
    fn backend(&self) -> NotificationBackend {
        NotificationBackend::Log
    }

    fn is_available(&self) -> bool {
        true
    }

    fn present(
        &self,
        record: &SuggestionRecord,
        _actions: &UnboundedSender<ActionRequest>,
    ) -> Result<()> {
        log_line(record);
        Ok(())
    }
}

fn log_line(record: &SuggestionRecord) {
    tracing::info!(
        id = record.id,
        severity = %record.severity,
        check = %record.check_name,
        "new suggestion: {}",
        record.message
    );
}

fn resolves(program: &Path) -> bool {
    if program.components().count() > 1 {
        program.is_file()
    } else {
        which::which(program).is_ok()
    }
}

fn notification_error(backend: NotificationBackend, reason: impl std::fmt::Display) -> KyaError {
    KyaError::Notification {
        backend: backend.as_str().to_string(),
        reason: reason.to_string(),
    }
}

// ---------------------------------------------------------------------------
// NotificationDispatcher
// ---------------------------------------------------------------------------

pub struct NotificationDispatcher {
    presenters: Vec<Box<dyn Presenter>>,
    preferred: usize,
    actions: UnboundedSender<ActionRequest>,
}

impl NotificationDispatcher {
    /// Keep the available presenters, in the order given. A log presenter is
    /// appended when none was listed.
    pub fn new(candidates: Vec<Box<dyn Presenter>>, actions: UnboundedSender<ActionRequest>) -> Self {
        let mut presenters: Vec<Box<dyn Presenter>> = Vec::with_capacity(candidates.len() + 1);
        for p in candidates {
            if p.is_available() {
                tracing::debug!(backend = p.backend().as_str(), "notification backend available");
                presenters.push(p);
            } else {
                tracing::info!(backend = p.backend().as_str(), "notification backend unavailable; skipping");
            }
        }
        if !presenters
            .iter()
            .any(|p| p.backend() == NotificationBackend::Log)
        {
            presenters.push(Box::new(LogNotifier));
        }
        Self {
            presenters,
            preferred: 0,
            actions,
        }
    }

    pub fn from_config(config: &TrayConfig, actions: UnboundedSender<ActionRequest>) -> Self {
        let candidates = config
            .notifications
            .iter()
            .map(|b| -> Box<dyn Presenter> {
                match b {
                    NotificationBackend::Rich => Box::new(RichNotifier::new(NOTIFY_SEND)),
                    NotificationBackend::Basic => Box::new(BasicNotifier::new(NOTIFY_SEND)),
                    NotificationBackend::Log => Box::new(LogNotifier),
                }
            })
            .collect();
        Self::new(candidates, actions)
    }

    /// Healthy backends still in play, preferred first.
    pub fn backends(&self) -> Vec<NotificationBackend> {
        self.presenters[self.preferred..]
            .iter()
            .filter(|p| p.is_healthy())
            .map(|p| p.backend())
            .collect()
    }

    /// Show `record` through the best working backend and report which one.
    pub fn present(&mut self, record: &SuggestionRecord) -> NotificationBackend {
        while self.preferred < self.presenters.len() {
            let presenter = &self.presenters[self.preferred];
            if !presenter.is_healthy() {
                tracing::warn!(backend = presenter.backend().as_str(), "notification backend reported failures; degrading");
                self.preferred += 1;
                continue;
            }
            match presenter.present(record, &self.actions) {
                Ok(()) => return presenter.backend(),
                Err(e) => {
                    tracing::warn!(id = record.id, error = %e, "notification backend failed; degrading");
                    self.preferred += 1;
                }
            }
        }
        // Only reachable with a caller-supplied log presenter that errored.
        log_line(record);
        NotificationBackend::Log
    }
}
