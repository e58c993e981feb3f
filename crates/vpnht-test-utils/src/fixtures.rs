//! Fake collaborators that record how the lifecycle used them.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;
use vpnht_core::BoxFuture;
use vpnht_core::collab::{
    Authenticator, BackgroundTask, CollaboratorError, Collaborators, RouteRegistrar, Session,
    SessionError, SessionRegistry, StaleStateCleaner, Watcher,
};

/// What [`RecordingSession::stop`] does when called.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopBehavior {
    Succeed,
    Fail,
    Panic,
}

type Hook = Box<dyn Fn() + Send + Sync>;

/// A session that counts `stop` calls.
pub struct RecordingSession {
    id: String,
    behavior: StopBehavior,
    stops: AtomicUsize,
    on_stop: Option<Hook>,
}

impl RecordingSession {
    pub fn new(id: &str, behavior: StopBehavior) -> Self {
        Self {
            id: id.to_string(),
            behavior,
            stops: AtomicUsize::new(0),
            on_stop: None,
        }
    }

    /// Run `hook` inside `stop`, before the configured behavior.
    pub fn with_hook(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_stop = Some(Box::new(hook));
        self
    }

    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

impl Session for RecordingSession {
    fn id(&self) -> &str {
        &self.id
    }

    fn stop(&self) -> BoxFuture<'_, Result<(), SessionError>> {
        Box::pin(async move {
            self.stops.fetch_add(1, Ordering::SeqCst);
            if let Some(hook) = &self.on_stop {
                hook();
            }
            match self.behavior {
                StopBehavior::Succeed => Ok(()),
                StopBehavior::Fail => Err(SessionError::Stop {
                    id: self.id.clone(),
                    reason: "simulated failure".to_string(),
                }),
                StopBehavior::Panic => panic!("session {} panicked while stopping", self.id),
            }
        })
    }
}

/// A fixed list of sessions.
#[derive(Default)]
pub struct StaticSessions {
    sessions: Vec<Arc<RecordingSession>>,
}

impl StaticSessions {
    pub fn new(sessions: Vec<Arc<RecordingSession>>) -> Self {
        Self { sessions }
    }
}

impl SessionRegistry for StaticSessions {
    fn active_sessions(&self) -> Vec<Arc<dyn Session>> {
        self.sessions
            .iter()
            .map(|s| Arc::clone(s) as Arc<dyn Session>)
            .collect()
    }
}

/// A background task that records whether it ran and whether it saw cancellation.
#[derive(Default)]
pub struct CountingTask {
    started: AtomicBool,
    cancelled: AtomicBool,
}

impl CountingTask {
    pub fn started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub fn cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

impl BackgroundTask for CountingTask {
    fn name(&self) -> &str {
        "counting-task"
    }

    fn run(&self, cancel: CancellationToken) -> BoxFuture<'_, ()> {
        self.started.store(true, Ordering::SeqCst);
        Box::pin(async move {
            cancel.cancelled().await;
            self.cancelled.store(true, Ordering::SeqCst);
        })
    }
}

/// A watcher that remembers the token it was started with.
#[derive(Default)]
pub struct RecordingWatcher {
    token: Mutex<Option<CancellationToken>>,
    on_start: Option<Hook>,
}

impl RecordingWatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `hook` inside `start`.
    pub fn with_hook(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_start = Some(Box::new(hook));
        self
    }

    pub fn started(&self) -> bool {
        self.token.lock().unwrap().is_some()
    }

    pub fn cancelled(&self) -> bool {
        self.token
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
    }
}

impl Watcher for RecordingWatcher {
    fn start(&self, cancel: CancellationToken) {
        if let Some(hook) = &self.on_start {
            hook();
        }
        *self.token.lock().unwrap() = Some(cancel);
    }
}

struct StubAuth {
    fail: bool,
}

impl Authenticator for StubAuth {
    fn init(&self) -> BoxFuture<'_, Result<(), CollaboratorError>> {
        let fail = self.fail;
        Box::pin(async move {
            if fail {
                Err(CollaboratorError::Failed("simulated auth failure".to_string()))
            } else {
                Ok(())
            }
        })
    }
}

struct StubCleaner;

impl StaleStateCleaner for StubCleaner {
    fn check_and_clean(&self) -> BoxFuture<'_, Result<(), CollaboratorError>> {
        Box::pin(async { Ok(()) })
    }
}

/// Builder for a [`Collaborators`] set made of fakes.
pub struct FakeCollaborators {
    auth_fails: bool,
    sessions: Vec<Arc<RecordingSession>>,
    routes: Arc<dyn RouteRegistrar>,
    watcher: Arc<RecordingWatcher>,
    task: Arc<CountingTask>,
}

impl FakeCollaborators {
    pub fn new() -> Self {
        Self {
            auth_fails: false,
            sessions: Vec::new(),
            routes: Arc::new(|router: axum::Router| router),
            watcher: Arc::new(RecordingWatcher::new()),
            task: Arc::new(CountingTask::default()),
        }
    }

    pub fn failing_auth(mut self) -> Self {
        self.auth_fails = true;
        self
    }

    pub fn session(mut self, session: Arc<RecordingSession>) -> Self {
        self.sessions.push(session);
        self
    }

    pub fn routes(mut self, routes: impl RouteRegistrar + 'static) -> Self {
        self.routes = Arc::new(routes);
        self
    }

    pub fn watcher(mut self, watcher: Arc<RecordingWatcher>) -> Self {
        self.watcher = watcher;
        self
    }

    /// The ticker task, for asserting on after the run.
    pub fn task(&self) -> Arc<CountingTask> {
        Arc::clone(&self.task)
    }

    pub fn build(self) -> Collaborators {
        Collaborators {
            auth: Arc::new(StubAuth {
                fail: self.auth_fails,
            }),
            cleaner: Arc::new(StubCleaner),
            routes: self.routes,
            watcher: self.watcher,
            pinger: self.task,
            sessions: Arc::new(StaticSessions::new(self.sessions)),
        }
    }
}

impl Default for FakeCollaborators {
    fn default() -> Self {
        Self::new()
    }
}
