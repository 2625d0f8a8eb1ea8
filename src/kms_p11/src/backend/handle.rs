use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use super::object::Object;
use super::session::Session;
use crate::ck;

/// Process-wide handle registry. Object and session handles share one
/// monotonic counter, so a handle value is globally unique within a run;
/// zero is never allocated, and values are never reused.
struct Registry {
    next: AtomicU64,
    objects: RwLock<HashMap<u64, Arc<Object>>>,
    sessions: RwLock<HashMap<u64, Arc<Mutex<Session>>>>,
}

lazy_static! {
    static ref REGISTRY: Registry = Registry {
        next: AtomicU64::new(1),
        objects: RwLock::new(HashMap::new()),
        sessions: RwLock::new(HashMap::new()),
    };
}

fn next_handle() -> u64 {
    REGISTRY.next.fetch_add(1, Ordering::Relaxed)
}

pub fn register_object(object: Arc<Object>) -> ck::CK_OBJECT_HANDLE {
    let handle = next_handle();
    REGISTRY.objects.write().unwrap().insert(handle, object);
    handle
}

pub fn object(handle: ck::CK_OBJECT_HANDLE) -> Option<Arc<Object>> {
    REGISTRY.objects.read().unwrap().get(&handle).cloned()
}

pub fn release_object(handle: ck::CK_OBJECT_HANDLE) {
    REGISTRY.objects.write().unwrap().remove(&handle);
}

pub fn register_session(session: Arc<Mutex<Session>>) -> ck::CK_SESSION_HANDLE {
    let handle = next_handle();
    REGISTRY.sessions.write().unwrap().insert(handle, session);
    handle
}

pub fn session(handle: ck::CK_SESSION_HANDLE) -> Option<Arc<Mutex<Session>>> {
    REGISTRY.sessions.read().unwrap().get(&handle).cloned()
}

pub fn release_session(handle: ck::CK_SESSION_HANDLE) -> Option<Arc<Mutex<Session>>> {
    REGISTRY.sessions.write().unwrap().remove(&handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn handles_are_nonzero_and_unique() {
        let mut seen = HashSet::new();
        for _ in 0..1000 {
            let h = next_handle();
            assert_ne!(h, ck::CK_INVALID_HANDLE);
            assert!(seen.insert(h));
        }
    }

    #[test]
    fn missing_lookups_are_none() {
        assert!(object(ck::CK_INVALID_HANDLE).is_none());
        assert!(session(ck::CK_INVALID_HANDLE).is_none());
    }
}
