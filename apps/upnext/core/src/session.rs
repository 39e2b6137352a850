//! Local mode: one queue/cursor state owned by this process and mirrored to a
//! key-value store after every committed change.

use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, error};

use crate::{
    focus::{Advance, AutoAdvance, FocusSignal},
    navigation::Navigation,
    parser::parse,
    queue::{NumberQueue, QueueState, Transition},
    storage::{corrupt, KeyValueStore, StoreError, AUTO_MODE_KEY, CURSOR_KEY, QUEUE_KEY},
};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type SessionResult<T> = Result<T, SessionError>;

/// A committed change, as seen by observers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Commit {
    pub transition: Transition,
    pub auto_mode_changed: bool,
}

impl Commit {
    fn is_noop(&self) -> bool {
        self.transition.is_noop() && !self.auto_mode_changed
    }
}

/// Read-only view handed to observers after a commit.
pub struct SessionView<'a> {
    pub state: &'a QueueState,
    pub auto_mode: bool,
}

/// Invoked synchronously, once, after each state change that actually changed
/// something. No-op operations never notify.
pub trait StateObserver: Send {
    fn on_commit(&mut self, view: &SessionView<'_>, commit: Commit) -> Result<(), StoreError>;
}

/// Writes exactly the keys a commit touched.
pub struct StorageObserver<S> {
    store: S,
}

impl<S: KeyValueStore> StorageObserver<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn into_inner(self) -> S {
        self.store
    }
}

impl<S: KeyValueStore> StateObserver for StorageObserver<S> {
    fn on_commit(&mut self, view: &SessionView<'_>, commit: Commit) -> Result<(), StoreError> {
        if commit.transition.queue_changed {
            let encoded = serde_json::to_string(view.state.queue().as_slice())
                .map_err(|err| corrupt(QUEUE_KEY, err))?;
            self.store.set(QUEUE_KEY, &encoded)?;
        }
        if commit.transition.cursor_changed {
            self.store
                .set(CURSOR_KEY, &view.state.cursor().to_string())?;
        }
        if commit.auto_mode_changed {
            self.store
                .set(AUTO_MODE_KEY, if view.auto_mode { "true" } else { "false" })?;
        }
        Ok(())
    }
}

/// Values persisted by a previous session; missing keys fall back to defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct Persisted {
    pub queue: NumberQueue,
    pub cursor: usize,
    pub auto_mode: bool,
}

impl Default for Persisted {
    fn default() -> Self {
        Self {
            queue: NumberQueue::new(),
            cursor: 0,
            auto_mode: true,
        }
    }
}

impl Persisted {
    pub fn load(store: &dyn KeyValueStore) -> Result<Self, StoreError> {
        let mut persisted = Persisted::default();
        if let Some(raw) = store.get(QUEUE_KEY)? {
            let numbers: Vec<u64> =
                serde_json::from_str(&raw).map_err(|err| corrupt(QUEUE_KEY, err))?;
            persisted.queue = NumberQueue::from_unsorted(numbers);
        }
        if let Some(raw) = store.get(CURSOR_KEY)? {
            persisted.cursor = raw
                .trim()
                .parse()
                .map_err(|err| corrupt(CURSOR_KEY, err))?;
        }
        if let Some(raw) = store.get(AUTO_MODE_KEY)? {
            persisted.auto_mode =
                serde_json::from_str(&raw).map_err(|err| corrupt(AUTO_MODE_KEY, err))?;
        }
        Ok(persisted)
    }
}

pub struct LocalSession {
    state: QueueState,
    auto_mode: bool,
    pending: String,
    observers: Vec<Box<dyn StateObserver>>,
}

impl LocalSession {
    /// Loads persisted state from `store` and keeps it in sync from then on.
    pub fn open<S: KeyValueStore + 'static>(store: S) -> SessionResult<Self> {
        let persisted = Persisted::load(&store)?;
        debug!(
            queue_len = persisted.queue.len(),
            cursor = persisted.cursor,
            auto_mode = persisted.auto_mode,
            "restored local session"
        );
        let mut session = Self::from_persisted(persisted);
        session.observe(StorageObserver::new(store));
        Ok(session)
    }

    /// A session with no storage attached.
    pub fn from_persisted(persisted: Persisted) -> Self {
        Self {
            state: QueueState::from_parts(persisted.queue, persisted.cursor),
            auto_mode: persisted.auto_mode,
            pending: String::new(),
            observers: Vec::new(),
        }
    }

    pub fn observe(&mut self, observer: impl StateObserver + 'static) {
        self.observers.push(Box::new(observer));
    }

    pub fn state(&self) -> &QueueState {
        &self.state
    }

    pub fn navigation(&self) -> Navigation {
        Navigation::of(&self.state)
    }

    pub fn auto_mode(&self) -> bool {
        self.auto_mode
    }

    pub fn pending(&self) -> &str {
        &self.pending
    }

    pub fn set_pending(&mut self, text: impl Into<String>) {
        self.pending = text.into();
    }

    /// Parses the pending text into the queue. The text is cleared only once
    /// the merge has been committed and persisted.
    pub fn submit(&mut self) -> SessionResult<Transition> {
        let numbers = parse(&self.pending);
        let transition = self.state.add(&numbers);
        self.commit(Commit {
            transition,
            auto_mode_changed: false,
        })?;
        self.pending.clear();
        Ok(transition)
    }

    pub fn add_text(&mut self, raw: &str) -> SessionResult<Transition> {
        let transition = self.state.add(&parse(raw));
        self.commit_transition(transition)
    }

    pub fn clear(&mut self) -> SessionResult<Transition> {
        let transition = self.state.clear();
        self.commit_transition(transition)
    }

    pub fn prev(&mut self) -> SessionResult<Transition> {
        let transition = self.state.prev();
        self.commit_transition(transition)
    }

    pub fn next(&mut self) -> SessionResult<Transition> {
        let transition = self.state.next();
        self.commit_transition(transition)
    }

    pub fn set_cursor(&mut self, value: i64) -> SessionResult<Transition> {
        let transition = self.state.set_cursor(value);
        self.commit_transition(transition)
    }

    pub fn set_auto_mode(&mut self, enabled: bool) -> SessionResult<bool> {
        if self.auto_mode == enabled {
            return Ok(false);
        }
        self.auto_mode = enabled;
        self.commit(Commit {
            transition: Transition::NONE,
            auto_mode_changed: true,
        })?;
        Ok(true)
    }

    fn commit_transition(&mut self, transition: Transition) -> SessionResult<Transition> {
        self.commit(Commit {
            transition,
            auto_mode_changed: false,
        })?;
        Ok(transition)
    }

    fn commit(&mut self, commit: Commit) -> SessionResult<()> {
        if commit.is_noop() {
            return Ok(());
        }
        let view = SessionView {
            state: &self.state,
            auto_mode: self.auto_mode,
        };
        for observer in self.observers.iter_mut() {
            observer.on_commit(&view, commit)?;
        }
        Ok(())
    }
}

/// Shared handle used when the session is reached from signal handlers.
#[derive(Clone)]
pub struct SessionHandle(Arc<Mutex<LocalSession>>);

impl SessionHandle {
    pub fn new(session: LocalSession) -> Self {
        Self(Arc::new(Mutex::new(session)))
    }

    pub fn lock(&self) -> parking_lot::MutexGuard<'_, LocalSession> {
        self.0.lock()
    }
}

impl Advance for SessionHandle {
    fn advance(&self) -> bool {
        match self.0.lock().next() {
            Ok(transition) => transition.cursor_changed,
            Err(err) => {
                error!(error = %err, "failed to persist auto-advance");
                false
            }
        }
    }
}

/// A local session wired to a focus signal, honouring its persisted
/// auto-advance mode.
pub struct LocalTracker {
    session: SessionHandle,
    auto_advance: AutoAdvance,
}

impl LocalTracker {
    pub fn new(session: LocalSession, focus: FocusSignal) -> Self {
        let enabled = session.auto_mode();
        let session = SessionHandle::new(session);
        let auto_advance = AutoAdvance::new(focus, Arc::new(session.clone()), enabled);
        Self {
            session,
            auto_advance,
        }
    }

    pub fn session(&self) -> &SessionHandle {
        &self.session
    }

    /// Persists the mode and re-subscribes (or detaches) the focus handler.
    pub fn set_auto_mode(&mut self, enabled: bool) -> SessionResult<()> {
        self.session.lock().set_auto_mode(enabled)?;
        self.auto_advance.set_enabled(enabled);
        Ok(())
    }

    pub fn auto_advance_enabled(&self) -> bool {
        self.auto_advance.is_enabled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{FileStore, MemoryStore};

    /// Records commits so tests can count notifications.
    #[derive(Clone, Default)]
    struct Recorder(Arc<Mutex<Vec<Commit>>>);

    impl StateObserver for Recorder {
        fn on_commit(&mut self, _: &SessionView<'_>, commit: Commit) -> Result<(), StoreError> {
            self.0.lock().push(commit);
            Ok(())
        }
    }

    /// Shares a memory store with the test body.
    #[derive(Clone, Default)]
    struct SharedStore(Arc<Mutex<MemoryStore>>);

    impl KeyValueStore for SharedStore {
        fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
            self.0.lock().get(key)
        }
        fn set(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
            self.0.lock().set(key, value)
        }
        fn remove(&mut self, key: &str) -> Result<(), StoreError> {
            self.0.lock().remove(key)
        }
    }

    struct FailingStore;

    impl KeyValueStore for FailingStore {
        fn get(&self, _: &str) -> Result<Option<String>, StoreError> {
            Ok(None)
        }
        fn set(&mut self, key: &str, _: &str) -> Result<(), StoreError> {
            Err(corrupt(key, "disk full"))
        }
        fn remove(&mut self, _: &str) -> Result<(), StoreError> {
            Ok(())
        }
    }

    #[test]
    fn defaults_when_store_is_empty() {
        let session = LocalSession::open(MemoryStore::new()).unwrap();
        assert!(session.state().queue().is_empty());
        assert_eq!(session.state().cursor(), 0);
        assert!(session.auto_mode());
    }

    #[test]
    fn restores_and_clamps_persisted_values() {
        let store = MemoryStore::new()
            .with_entry(QUEUE_KEY, "[42,7,13,7]")
            .with_entry(CURSOR_KEY, "9")
            .with_entry(AUTO_MODE_KEY, "false");
        let session = LocalSession::open(store).unwrap();
        assert_eq!(session.state().queue().as_slice(), &[7, 13, 42]);
        assert_eq!(session.state().cursor(), 2);
        assert!(!session.auto_mode());
    }

    #[test]
    fn corrupt_values_fail_startup() {
        let store = MemoryStore::new().with_entry(QUEUE_KEY, "{oops");
        let err = LocalSession::open(store).err().unwrap();
        assert!(matches!(
            err,
            SessionError::Store(StoreError::Corrupt { ref key, .. }) if key == QUEUE_KEY
        ));
    }

    #[test]
    fn writes_changed_keys_after_each_commit() {
        let store = SharedStore::default();
        let mut session = LocalSession::open(store.clone()).unwrap();

        session.set_pending("Q13, 7\n7  #42 0");
        session.submit().unwrap();
        assert_eq!(session.pending(), "");
        assert_eq!(
            store.get(QUEUE_KEY).unwrap().as_deref(),
            Some("[7,13,42]")
        );
        assert_eq!(store.get(CURSOR_KEY).unwrap(), None);

        session.next().unwrap();
        assert_eq!(store.get(CURSOR_KEY).unwrap().as_deref(), Some("1"));

        session.set_auto_mode(false).unwrap();
        assert_eq!(store.get(AUTO_MODE_KEY).unwrap().as_deref(), Some("false"));

        session.clear().unwrap();
        assert_eq!(store.get(QUEUE_KEY).unwrap().as_deref(), Some("[]"));
        assert_eq!(store.get(CURSOR_KEY).unwrap().as_deref(), Some("0"));
    }

    #[test]
    fn observers_fire_once_per_change_and_never_on_noops() {
        let recorder = Recorder::default();
        let mut session = LocalSession::from_persisted(Persisted::default());
        session.observe(recorder.clone());

        session.prev().unwrap();
        session.next().unwrap();
        session.add_text("").unwrap();
        assert!(recorder.0.lock().is_empty());

        session.add_text("3 1 2").unwrap();
        session.add_text("3 1 2").unwrap();
        session.next().unwrap();
        session.next().unwrap();
        session.next().unwrap();
        session.set_auto_mode(true).unwrap();

        let commits = recorder.0.lock().clone();
        assert_eq!(commits.len(), 3);
        assert!(commits[0].transition.queue_changed);
        assert!(commits[1].transition.cursor_changed);
        assert!(commits[2].transition.cursor_changed);
    }

    #[test]
    fn failed_persist_keeps_pending_text() {
        let mut session = LocalSession::open(FailingStore).unwrap();
        session.set_pending("5 6");
        assert!(session.submit().is_err());
        assert_eq!(session.pending(), "5 6");
    }

    #[test]
    fn survives_restart_through_file_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("upnext.json");
        {
            let mut session = LocalSession::open(FileStore::open(&path).unwrap()).unwrap();
            session.add_text("10 20 30").unwrap();
            session.set_cursor(2).unwrap();
        }
        let session = LocalSession::open(FileStore::open(&path).unwrap()).unwrap();
        assert_eq!(session.navigation().current, Some(30));
        assert_eq!(session.navigation().previous, Some(20));
    }

    #[test]
    fn focus_advances_local_session_until_the_end() {
        let focus = FocusSignal::new();
        let mut session = LocalSession::from_persisted(Persisted::default());
        session.add_text("1 2 3").unwrap();
        session.set_cursor(1).unwrap();
        let tracker = LocalTracker::new(session, focus.clone());

        focus.emit();
        assert_eq!(tracker.session().lock().state().cursor(), 2);
        focus.emit();
        assert_eq!(tracker.session().lock().state().cursor(), 2);
    }

    #[test]
    fn toggling_auto_mode_detaches_and_reattaches() {
        let focus = FocusSignal::new();
        let store = SharedStore::default();
        let mut session = LocalSession::open(store.clone()).unwrap();
        session.add_text("4 5 6").unwrap();
        let mut tracker = LocalTracker::new(session, focus.clone());
        assert!(tracker.auto_advance_enabled());

        tracker.set_auto_mode(false).unwrap();
        assert_eq!(focus.subscriber_count(), 0);
        focus.emit();
        assert_eq!(tracker.session().lock().state().cursor(), 0);
        assert_eq!(store.get(AUTO_MODE_KEY).unwrap().as_deref(), Some("false"));

        tracker.set_auto_mode(true).unwrap();
        assert_eq!(focus.subscriber_count(), 1);
        tracker.session().lock().clear().unwrap();
        tracker.session().lock().add_text("8 9").unwrap();
        focus.emit();
        assert_eq!(tracker.session().lock().navigation().current, Some(9));
    }
}
