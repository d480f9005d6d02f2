//! The tray runtime: poll loop, presentation and action routing.
//!
//! Two tasks share nothing but a channel and a [`Notify`]. The poll loop
//! owns the feed, the cursor store and the notification dispatcher; the
//! [`ActionRouter`] owns the escalation executor. A finished control
//! utility run wakes the poll loop early so the change is picked up without
//! waiting for the next tick.

use std::future::Future;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::config::TrayConfig;
use crate::cursor::{Cursor, CursorStore, JsonCursorStore};
use crate::datastore::{SqliteStore, SuggestionSource};
use crate::error::Result;
use crate::escalation::{DispatchOutcome, EscalationExecutor, PrivilegeEnv};
use crate::feed::ChangeFeed;
use crate::gateway::ActionGateway;
use crate::notify::{ActionRequest, NotificationDispatcher};

// ---------------------------------------------------------------------------
// Tray
// ---------------------------------------------------------------------------

pub struct Tray {
    feed: ChangeFeed,
    cursor_store: Arc<dyn CursorStore>,
    persisted: Cursor,
    dispatcher: NotificationDispatcher,
}

impl Tray {
    /// Restore the cursor from `cursor_store` and build the feed over `source`.
    pub fn new(
        source: Arc<dyn SuggestionSource>,
        cursor_store: Arc<dyn CursorStore>,
        dispatcher: NotificationDispatcher,
    ) -> Self {
        let cursor = cursor_store.load();
        tracing::debug!(cursor = %cursor, "restored suggestion cursor");
        Self {
            feed: ChangeFeed::new(source, cursor),
            cursor_store,
            persisted: cursor,
            dispatcher,
        }
    }

    pub fn cursor(&self) -> Cursor {
        self.feed.cursor()
    }

    /// One poll cycle. Returns the ids presented, in order.
    ///
    /// Every record is handed to the dispatcher before the cursor moves past
    /// it. The cursor is written once per cycle, and only when it changed.
    pub async fn cycle(&mut self) -> Vec<i64> {
        let batch = self.feed.poll().await;
        let mut shown = Vec::with_capacity(batch.len());
        for record in &batch {
            let backend = self.dispatcher.present(record);
            tracing::debug!(id = record.id, backend = backend.as_str(), "suggestion presented");
            self.feed.mark_delivered(record.id);
            shown.push(record.id);
        }
        self.persist();
        shown
    }

    fn persist(&mut self) {
        let cursor = self.feed.cursor();
        if cursor == self.persisted {
            return;
        }
        match self.cursor_store.save(cursor) {
            Ok(()) => self.persisted = cursor,
            // Retried next cycle; the in-memory cursor keeps us from repeating.
            Err(e) => tracing::warn!(cursor = %cursor, error = %e, "failed to persist suggestion cursor"),
        }
    }

    /// Poll every `interval`, or sooner when `refresh` fires. Never returns.
    pub async fn run(mut self, interval: Duration, refresh: Arc<Notify>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = refresh.notified() => tracing::debug!("refresh requested"),
            }
            let shown = self.cycle().await;
            if !shown.is_empty() {
                tracing::info!(count = shown.len(), cursor = %self.cursor(), "new suggestions presented");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// ActionRouter
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct ActionRouter {
    executor: EscalationExecutor,
    detail_command: String,
    refresh: Arc<Notify>,
}

impl ActionRouter {
    pub fn new(executor: EscalationExecutor, detail_command: String, refresh: Arc<Notify>) -> Self {
        Self {
            executor,
            detail_command,
            refresh,
        }
    }

    pub fn from_config(config: &TrayConfig, refresh: Arc<Notify>) -> Self {
        let executor = EscalationExecutor::new(
            ActionGateway::from_config(config),
            PrivilegeEnv::detect(config),
        );
        Self::new(executor, config.detail_command.clone(), refresh)
    }

    pub async fn run(self, mut actions: UnboundedReceiver<ActionRequest>) {
        while let Some(request) = actions.recv().await {
            // The reporting task logs the outcome itself; nobody waits on it here.
            let _reporter = self.route(request);
        }
        tracing::debug!("action channel closed; router stopping");
    }

    /// Act on one user choice without blocking.
    ///
    /// Apply and Dismiss go through the executor; the returned task resolves
    /// to its outcome. Opening the detail view returns `None`.
    pub fn route(&self, request: ActionRequest) -> Option<JoinHandle<DispatchOutcome>> {
        let Some(action) = request.action.control_action() else {
            launch_detail(&self.detail_command, request.id);
            return None;
        };
        let handle = self.executor.dispatch(action, request.id);
        let refresh = Arc::clone(&self.refresh);
        Some(tokio::spawn(async move {
            let outcome = handle.outcome().await;
            match &outcome {
                DispatchOutcome::Completed(_) => refresh.notify_one(),
                DispatchOutcome::Failed { .. } => {}
                DispatchOutcome::Deferred {
                    command_line,
                    terminal_opened,
                } => tracing::info!(
                    id = request.id,
                    command = %command_line,
                    terminal_opened,
                    "action left to the user"
                ),
            }
            outcome
        }))
    }
}

/// Start the detail viewer and forget about it.
fn launch_detail(command: &str, id: i64) {
    let mut words = command.split_whitespace();
    let Some(program) = words.next() else {
        tracing::warn!(id, "no detail_command configured");
        return;
    };
    let spawned = tokio::process::Command::new(program)
        .args(words)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn();
    match spawned {
        Ok(mut child) => {
            tracing::info!(id, program, "opened suggestion viewer");
            tokio::spawn(async move {
                let _ = child.wait().await;
            });
        }
        Err(e) => tracing::warn!(id, program, error = %e, "could not open suggestion viewer"),
    }
}

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

/// Run the tray from `config` until `shutdown` resolves.
pub async fn watch(config: &TrayConfig, shutdown: impl Future<Output = ()>) -> Result<()> {
    let state_path = config.state_path()?;
    let refresh = Arc::new(Notify::new());
    let (tx, rx) = mpsc::unbounded_channel();

    // Availability checks run `notify-send --help`; keep them off the runtime threads.
    let startup_config = config.clone();
    let dispatcher =
        tokio::task::spawn_blocking(move || NotificationDispatcher::from_config(&startup_config, tx))
            .await?;
    let backends: Vec<&str> = dispatcher.backends().iter().map(|b| b.as_str()).collect();
    let router = ActionRouter::from_config(config, Arc::clone(&refresh));
    let tray = Tray::new(
        Arc::new(SqliteStore::new(&config.db_path)),
        Arc::new(JsonCursorStore::new(&state_path)),
        dispatcher,
    );

    tracing::info!(
        db = %config.db_path.display(),
        state = %state_path.display(),
        interval_secs = config.poll_interval().as_secs(),
        backends = ?backends,
        cursor = %tray.cursor(),
        "tray started"
    );

    let router_task = tokio::spawn(router.run(rx));
    let poll_task = tokio::spawn(tray.run(config.poll_interval(), refresh));

    shutdown.await;
    tracing::info!("shutting down");
    poll_task.abort();
    router_task.abort();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NotificationBackend;
    use crate::datastore::fixtures;
    use crate::notify::{Presenter, UserAction};
    use crate::suggestion::SuggestionRecord;
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;
    use tempfile::TempDir;
    use tokio::sync::mpsc::UnboundedSender;

    struct Recorder(Arc<Mutex<Vec<i64>>>);

    impl Presenter for Recorder {
        fn backend(&self) -> NotificationBackend {
            NotificationBackend::Log
        }
        fn is_available(&self) -> bool {
            true
        }
        fn present(&self, record: &SuggestionRecord, _: &UnboundedSender<ActionRequest>) -> Result<()> {
            self.0.lock().unwrap().push(record.id);
            Ok(())
        }
    }

    struct Setup {
        dir: TempDir,
        db: PathBuf,
        state: PathBuf,
        shown: Arc<Mutex<Vec<i64>>>,
    }

    fn setup(backlog: usize) -> Setup {
        let dir = TempDir::new().unwrap();
        let db = dir.path().join("agent.db");
        fixtures::create(&db);
        for i in 0..backlog {
            fixtures::insert(&db, &format!("check_{i}"), "warning");
        }
        let state = dir.path().join("state/tray_state.json");
        Setup {
            dir,
            db,
            state,
            shown: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn tray(s: &Setup, state: &Path) -> Tray {
        let (tx, _rx) = mpsc::unbounded_channel();
        let dispatcher =
            NotificationDispatcher::new(vec![Box::new(Recorder(Arc::clone(&s.shown)))], tx);
        Tray::new(
            Arc::new(SqliteStore::new(&s.db)),
            Arc::new(JsonCursorStore::new(state)),
            dispatcher,
        )
    }

    fn saved(state: &Path) -> serde_json::Value {
        serde_json::from_str(&std::fs::read_to_string(state).unwrap()).unwrap()
    }

    #[tokio::test]
    async fn first_run_seeds_without_notifying() {
        let s = setup(5);
        let mut t = tray(&s, &s.state);
        assert!(t.cycle().await.is_empty());
        assert!(s.shown.lock().unwrap().is_empty());
        assert_eq!(saved(&s.state)["last_id"], 5);
    }

    #[tokio::test]
    async fn new_suggestion_is_presented_once_and_persisted() {
        let s = setup(5);
        let mut t = tray(&s, &s.state);
        t.cycle().await;

        fixtures::insert(&s.db, "journald_size", "warning");
        assert_eq!(t.cycle().await, vec![6]);
        assert_eq!(saved(&s.state)["last_id"], 6);
        assert!(t.cycle().await.is_empty());
        assert_eq!(*s.shown.lock().unwrap(), vec![6]);
    }

    #[tokio::test]
    async fn restart_resumes_from_saved_cursor() {
        let s = setup(3);
        let mut first = tray(&s, &s.state);
        first.cycle().await;
        fixtures::insert(&s.db, "swap", "info");
        first.cycle().await;
        drop(first);

        fixtures::insert(&s.db, "disk", "critical");
        let mut second = tray(&s, &s.state);
        assert_eq!(second.cursor(), Cursor::Seen(4));
        assert_eq!(second.cycle().await, vec![5]);
        assert_eq!(*s.shown.lock().unwrap(), vec![4, 5]);
    }

    #[tokio::test]
    async fn unwritable_state_still_advances_in_memory() {
        let s = setup(1);
        let blocker = s.dir.path().join("not-a-dir");
        std::fs::write(&blocker, "").unwrap();
        let mut t = tray(&s, &blocker.join("tray_state.json"));

        t.cycle().await;
        fixtures::insert(&s.db, "a", "info");
        assert_eq!(t.cycle().await, vec![2]);
        assert!(t.cycle().await.is_empty(), "must not repeat after a failed save");
        assert_eq!(t.cursor(), Cursor::Seen(2));
    }

    async fn wait_until(what: &str, limit: Duration, mut done: impl FnMut() -> bool) {
        let deadline = tokio::time::Instant::now() + limit;
        while !done() {
            assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {what}");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    #[tokio::test]
    async fn run_loop_polls_on_every_tick() {
        let s = setup(2);
        let t = tray(&s, &s.state);
        let task = tokio::spawn(t.run(Duration::from_millis(50), Arc::new(Notify::new())));

        let state = s.state.clone();
        wait_until("seed", Duration::from_secs(5), || state.exists()).await;
        fixtures::insert(&s.db, "swap", "info");
        let shown = Arc::clone(&s.shown);
        wait_until("tick delivery", Duration::from_secs(5), || {
            *shown.lock().unwrap() == vec![3]
        })
        .await;
        task.abort();
    }

    #[tokio::test]
    async fn refresh_wakes_loop_before_interval() {
        let s = setup(0);
        let t = tray(&s, &s.state);
        let refresh = Arc::new(Notify::new());
        let task = tokio::spawn(t.run(Duration::from_secs(3600), Arc::clone(&refresh)));

        // The first tick fires at once and seeds.
        let state = s.state.clone();
        wait_until("seed", Duration::from_secs(5), || state.exists()).await;

        let shown = Arc::clone(&s.shown);
        for expected in [vec![1], vec![1, 2]] {
            fixtures::insert(&s.db, "disk", "critical");
            refresh.notify_one();
            let shown = Arc::clone(&shown);
            wait_until("refresh delivery", Duration::from_secs(5), move || {
                *shown.lock().unwrap() == expected
            })
            .await;
        }
        assert_eq!(saved(&s.state)["last_id"], 2);
        task.abort();
    }

    #[tokio::test]
    async fn watch_seeds_and_stops_on_shutdown() {
        let s = setup(4);
        let config = TrayConfig {
            db_path: s.db.clone(),
            state_file: Some(s.state.clone()),
            notifications: vec![NotificationBackend::Log],
            poll_interval_secs: 3600,
            ..TrayConfig::default()
        };
        let state = s.state.clone();
        let shutdown = async move {
            let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
            while !state.exists() && tokio::time::Instant::now() < deadline {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        };
        tokio::time::timeout(Duration::from_secs(10), watch(&config, shutdown))
            .await
            .expect("watch did not stop")
            .unwrap();
        assert_eq!(saved(&s.state)["last_id"], 4);
    }

    #[cfg(unix)]
    mod routing {
        use super::*;
        use crate::gateway::fakes::script;

        fn router(s: &Setup, kya_body: &str, refresh: Arc<Notify>) -> ActionRouter {
            let kya = script(s.dir.path(), "kya", kya_body);
            let executor = EscalationExecutor::new(
                ActionGateway::new(kya, Some(Duration::from_secs(10))),
                PrivilegeEnv {
                    elevated: true,
                    elevation_helper: None,
                    terminal: "true".into(),
                },
            );
            ActionRouter::new(executor, "true".into(), refresh)
        }

        #[tokio::test]
        async fn apply_runs_utility_and_requests_refresh() {
            let s = setup(5);
            let mut t = tray(&s, &s.state);
            t.cycle().await;
            let id = fixtures::insert(&s.db, "journald_size", "warning");
            assert_eq!(t.cycle().await, vec![id]);

            let argv = s.dir.path().join("argv.txt");
            let refresh = Arc::new(Notify::new());
            let r = router(
                &s,
                &format!("echo \"$@\" > '{}'", argv.display()),
                Arc::clone(&refresh),
            );
            let outcome = r
                .route(ActionRequest {
                    action: UserAction::Apply,
                    id,
                })
                .unwrap()
                .await
                .unwrap();
            assert!(outcome.succeeded(), "{outcome:?}");
            assert_eq!(std::fs::read_to_string(&argv).unwrap().trim(), "apply 6 --yes");
            tokio::time::timeout(Duration::from_secs(1), refresh.notified())
                .await
                .expect("refresh not requested");

            // The real utility closes the record; simulate that.
            fixtures::set_status(&s.db, id, "applied");
            assert!(t.cycle().await.is_empty());
            let open: Vec<i64> = SqliteStore::new(&s.db)
                .list_open()
                .unwrap()
                .iter()
                .map(|r| r.id)
                .collect();
            assert!(!open.contains(&id));
        }

        #[tokio::test]
        async fn failed_apply_leaves_record_open_and_unrepeated() {
            let s = setup(0);
            let mut t = tray(&s, &s.state);
            t.cycle().await;
            let id = fixtures::insert(&s.db, "swap", "critical");
            t.cycle().await;

            let r = router(&s, "echo 'fix failed' >&2\nexit 1", Arc::new(Notify::new()));
            let outcome = r
                .route(ActionRequest {
                    action: UserAction::Apply,
                    id,
                })
                .unwrap()
                .await
                .unwrap();
            match outcome {
                DispatchOutcome::Completed(o) => {
                    assert_eq!(o.exit_code, 1);
                    assert_eq!(o.stderr, "fix failed\n");
                }
                other => panic!("unexpected outcome {other:?}"),
            }
            let store = SqliteStore::new(&s.db);
            assert!(store.get(id).unwrap().unwrap().status.as_str() == "open");
            assert!(t.cycle().await.is_empty());
        }

        #[tokio::test]
        async fn open_detail_spawns_viewer_without_dispatch() {
            let s = setup(0);
            let marker = s.dir.path().join("viewer.txt");
            let viewer = script(
                s.dir.path(),
                "viewer",
                &format!("echo opened > '{}'", marker.display()),
            );
            let mut r = router(&s, "exit 0", Arc::new(Notify::new()));
            r.detail_command = viewer.display().to_string();

            assert!(r
                .route(ActionRequest {
                    action: UserAction::OpenDetail,
                    id: 1,
                })
                .is_none());
            for _ in 0..50 {
                if marker.exists() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            assert!(marker.exists());
        }
    }
}
