use std::sync::Arc;

use crate::models::EgressPath;

/// Holds one slot of a path's in-flight counter, released on drop
pub struct InFlightGuard {
    path: Arc<EgressPath>,
}

impl InFlightGuard {
    /// Wrap a slot that has already been taken on `path`
    pub(crate) fn adopt(path: Arc<EgressPath>) -> Self {
        Self { path }
    }

    /// Take a slot unconditionally
    pub fn new(path: Arc<EgressPath>) -> Self {
        path.enter();
        Self { path }
    }

    pub fn path(&self) -> &Arc<EgressPath> {
        &self.path
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.path.leave();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::transport::mock::ScriptedTransport;

    #[test]
    fn test_guard_releases_exactly_once() {
        let path = Arc::new(EgressPath::direct(Arc::new(ScriptedTransport::new())));

        let first = InFlightGuard::new(path.clone());
        let second = InFlightGuard::new(path.clone());
        assert_eq!(path.in_flight(), 2);

        drop(first);
        assert_eq!(path.in_flight(), 1);
        drop(second);
        assert_eq!(path.in_flight(), 0);
    }

    #[test]
    fn test_adopted_slot_is_released() {
        let path = Arc::new(EgressPath::direct(Arc::new(ScriptedTransport::new())));
        assert!(path.try_enter(1));

        let guard = InFlightGuard::adopt(path.clone());
        assert_eq!(guard.path().in_flight(), 1);
        drop(guard);
        assert_eq!(path.in_flight(), 0);
    }
}
