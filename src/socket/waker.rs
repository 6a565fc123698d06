use alloc::vec::Vec;
use core::task::Waker;

/// Utility struct to register and wake a set of wakers.
#[derive(Debug, Default)]
pub struct WakerRegistration {
    wakers: Vec<Waker>,
}

impl WakerRegistration {
    pub const fn new() -> Self {
        Self { wakers: Vec::new() }
    }

    /// Register a waker. Overwrites the previously registered wakers, if any.
    pub fn register(&mut self, w: &Waker) {
        match self.wakers.as_slice() {
            // Same task as the only registered waker: skip the clone.
            [only] if only.will_wake(w) => {}
            _ => {
                self.wakers.clear();
                self.wakers.push(w.clone());
            }
        }
    }

    /// Register an additional waker, unless one waking the same task is already there.
    pub fn add(&mut self, w: &Waker) {
        if !self.wakers.iter().any(|other| other.will_wake(w)) {
            self.wakers.push(w.clone());
        }
    }

    /// Wake every registered waker and forget them.
    pub fn wake_all(&mut self) {
        for waker in self.wakers.drain(..) {
            waker.wake();
        }
    }

    /// Forget every registered waker without waking it.
    pub fn clear(&mut self) {
        self.wakers.clear();
    }
}

impl Drop for WakerRegistration {
    fn drop(&mut self) {
        self.wake_all()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::task::Wake;

    struct Counter(AtomicUsize);

    impl Wake for Counter {
        fn wake(self: Arc<Self>) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_register_replaces_and_add_appends() {
        let first = Arc::new(Counter(AtomicUsize::new(0)));
        let second = Arc::new(Counter(AtomicUsize::new(0)));
        let first_waker = Waker::from(first.clone());
        let second_waker = Waker::from(second.clone());

        let mut registration = WakerRegistration::new();
        registration.register(&first_waker);
        registration.register(&second_waker);
        registration.add(&first_waker);
        registration.add(&first_waker);
        registration.wake_all();
        assert_eq!(first.0.load(Ordering::SeqCst), 1);
        assert_eq!(second.0.load(Ordering::SeqCst), 1);

        // woken wakers are forgotten
        registration.wake_all();
        assert_eq!(first.0.load(Ordering::SeqCst), 1);

        registration.add(&first_waker);
        registration.clear();
        drop(registration);
        assert_eq!(first.0.load(Ordering::SeqCst), 1);
    }
}
