use std::sync::{Arc, Mutex, PoisonError};

use log::debug;

use crate::records::HybridUpdateState;

/// Receives the outcome of sync attempts. Methods run on whichever thread
/// resolves the attempt and must not block.
pub trait SyncObserver: Send + Sync {
    /// An optional bundle update wants the user's consent. Keep a clone of
    /// `consent` to answer later; the first answer from any observer wins.
    fn require_hybrid_consent(&self, consent: ConsentRequest) {
        consent.respond(true);
    }

    fn after_sync(&self, success: bool, update: Option<&HybridUpdateState>);

    fn native_dialog_responded(&self, _accepted: bool) {}

    /// A native update finished downloading and needs a restart to apply.
    fn native_update_downloaded(&self) {}
}

type ConsentResolver = Box<dyn FnOnce(Option<bool>) + Send>;

/// Pending request for consent to an optional bundle update.
///
/// If every clone is dropped without an answer the request resolves as
/// dismissed, which ends the sync attempt without touching any file.
#[derive(Clone)]
pub struct ConsentRequest {
    shared: Arc<ConsentShared>,
}

struct ConsentShared {
    target_version: String,
    resolver: Mutex<Option<ConsentResolver>>,
}

impl ConsentRequest {
    pub(crate) fn new(
        target_version: String,
        resolver: impl FnOnce(Option<bool>) + Send + 'static,
    ) -> Self {
        Self {
            shared: Arc::new(ConsentShared {
                target_version,
                resolver: Mutex::new(Some(Box::new(resolver))),
            }),
        }
    }

    #[must_use]
    pub fn target_version(&self) -> &str {
        &self.shared.target_version
    }

    /// Answer the request. Returns `false` if it was already answered.
    pub fn respond(&self, accepted: bool) -> bool {
        match self.shared.take_resolver() {
            Some(resolver) => {
                resolver(Some(accepted));
                true
            }
            None => {
                debug!("Ignoring repeated consent response");
                false
            }
        }
    }

    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.shared
            .resolver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}

impl std::fmt::Debug for ConsentRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsentRequest")
            .field("target_version", &self.shared.target_version)
            .field("resolved", &self.is_resolved())
            .finish()
    }
}

impl ConsentShared {
    fn take_resolver(&self) -> Option<ConsentResolver> {
        self.resolver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

impl Drop for ConsentShared {
    fn drop(&mut self) {
        if let Some(resolver) = self.take_resolver() {
            debug!("Consent request for {} dismissed", self.target_version);
            resolver(None);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

struct Registration {
    id: ObserverId,
    context: String,
    observer: Arc<dyn SyncObserver>,
}

#[derive(Default)]
struct Registrations {
    next_id: u64,
    entries: Vec<Registration>,
}

/// Observers keyed by an opaque host context. Notifications iterate over a
/// snapshot, so observers may (un)register while being notified.
#[derive(Default)]
pub struct ObserverRegistry {
    registrations: Mutex<Registrations>,
}

impl ObserverRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Registrations> {
        self.registrations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn register(
        &self,
        context: impl Into<String>,
        observer: Arc<dyn SyncObserver>,
    ) -> ObserverId {
        let mut registrations = self.lock();
        let id = ObserverId(registrations.next_id);
        registrations.next_id += 1;
        registrations.entries.push(Registration {
            id,
            context: context.into(),
            observer,
        });
        id
    }

    pub fn unregister(&self, id: ObserverId) -> bool {
        let mut registrations = self.lock();
        let before = registrations.entries.len();
        registrations.entries.retain(|entry| entry.id != id);
        registrations.entries.len() != before
    }

    /// Drop every observer registered under `context`.
    pub fn unregister_context(&self, context: &str) -> usize {
        let mut registrations = self.lock();
        let before = registrations.entries.len();
        registrations.entries.retain(|entry| entry.context != context);
        before - registrations.entries.len()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn snapshot(&self) -> Vec<Arc<dyn SyncObserver>> {
        self.lock()
            .entries
            .iter()
            .map(|entry| Arc::clone(&entry.observer))
            .collect()
    }

    pub fn notify_after_sync(&self, success: bool, update: Option<&HybridUpdateState>) {
        for observer in self.snapshot() {
            observer.after_sync(success, update);
        }
    }

    pub fn notify_native_dialog_responded(&self, accepted: bool) {
        for observer in self.snapshot() {
            observer.native_dialog_responded(accepted);
        }
    }

    pub fn notify_native_update_downloaded(&self) {
        for observer in self.snapshot() {
            observer.native_update_downloaded();
        }
    }

    pub fn request_consent(&self, consent: &ConsentRequest) {
        for observer in self.snapshot() {
            observer.require_hybrid_consent(consent.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use super::{ConsentRequest, ObserverRegistry, SyncObserver};
    use crate::records::HybridUpdateState;

    #[derive(Default)]
    struct CountingObserver {
        after_sync: AtomicUsize,
    }

    impl SyncObserver for CountingObserver {
        fn after_sync(&self, _success: bool, _update: Option<&HybridUpdateState>) {
            self.after_sync.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct SelfRemovingObserver {
        registry: Arc<ObserverRegistry>,
        context: &'static str,
    }

    impl SyncObserver for SelfRemovingObserver {
        fn after_sync(&self, _success: bool, _update: Option<&HybridUpdateState>) {
            self.registry.unregister_context(self.context);
        }
    }

    fn recording_request(answers: &Arc<Mutex<Vec<Option<bool>>>>) -> ConsentRequest {
        let answers = Arc::clone(answers);
        ConsentRequest::new("12".to_string(), move |answer| {
            answers.lock().expect("answers lock").push(answer);
        })
    }

    #[test]
    fn unregister_context_removes_only_that_context() {
        let registry = ObserverRegistry::new();
        let first = Arc::new(CountingObserver::default());
        let second = Arc::new(CountingObserver::default());
        registry.register("screen-a", first.clone());
        registry.register("screen-b", second.clone());

        assert_eq!(registry.unregister_context("screen-a"), 1);
        registry.notify_after_sync(true, None);

        assert_eq!(first.after_sync.load(Ordering::SeqCst), 0);
        assert_eq!(second.after_sync.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unregister_by_id() {
        let registry = ObserverRegistry::new();
        let id = registry.register("screen", Arc::new(CountingObserver::default()));

        assert!(registry.unregister(id));
        assert!(!registry.unregister(id));
        assert!(registry.is_empty());
    }

    #[test]
    fn observers_can_unregister_during_notification() {
        let registry = Arc::new(ObserverRegistry::new());
        let counter = Arc::new(CountingObserver::default());
        registry.register(
            "screen",
            Arc::new(SelfRemovingObserver {
                registry: Arc::clone(&registry),
                context: "screen",
            }),
        );
        registry.register("screen", counter.clone());

        registry.notify_after_sync(true, None);

        assert_eq!(counter.after_sync.load(Ordering::SeqCst), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn first_consent_answer_wins() {
        let answers = Arc::new(Mutex::new(Vec::new()));
        let request = recording_request(&answers);
        let clone = request.clone();

        assert!(request.respond(false));
        assert!(!clone.respond(true));
        drop(request);
        drop(clone);

        assert_eq!(*answers.lock().expect("answers lock"), vec![Some(false)]);
    }

    #[test]
    fn dropping_unanswered_request_dismisses_it() {
        let answers = Arc::new(Mutex::new(Vec::new()));
        let request = recording_request(&answers);
        let clone = request.clone();

        drop(request);
        assert!(answers.lock().expect("answers lock").is_empty());
        drop(clone);

        assert_eq!(*answers.lock().expect("answers lock"), vec![None]);
    }

    #[test]
    fn default_observer_accepts_consent() {
        let registry = ObserverRegistry::new();
        registry.register("screen", Arc::new(CountingObserver::default()));
        let answers = Arc::new(Mutex::new(Vec::new()));
        let request = recording_request(&answers);

        registry.request_consent(&request);

        assert!(request.is_resolved());
        assert_eq!(*answers.lock().expect("answers lock"), vec![Some(true)]);
    }
}
