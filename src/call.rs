use parking_lot::{Condvar, Mutex};
use tracing::trace;

#[derive(Debug)]
enum Status<T, E> {
    Pending,
    Done(Result<T, E>),
    Abandoned,
}

/// Call is an in-flight or completed `Group::work` call.
///
/// The status moves out of `Pending` exactly once. The result is written
/// under the mutex before waiters are notified, so whoever sees `Done` sees
/// the whole value.
#[derive(Debug)]
pub(crate) struct Call<T, E> {
    status: Mutex<Status<T, E>>,
    cvar: Condvar,
}

impl<T, E> Call<T, E> {
    pub(crate) fn new() -> Self {
        Call {
            status: Mutex::new(Status::Pending),
            cvar: Condvar::new(),
        }
    }

    /// complete stores the result of the work and wakes every waiter.
    pub(crate) fn complete(&self, result: Result<T, E>) {
        let mut status = self.status.lock();
        if let Status::Pending = *status {
            *status = Status::Done(result);
            drop(status);
            self.cvar.notify_all();
        }
    }

    /// abandon marks a call whose executor went away without a result.
    /// Returns false if the call had already completed.
    pub(crate) fn abandon(&self) -> bool {
        let mut status = self.status.lock();
        match *status {
            Status::Pending => {
                *status = Status::Abandoned;
                drop(status);
                self.cvar.notify_all();
                true
            }
            _ => false,
        }
    }
}

impl<T: Clone, E: Clone> Call<T, E> {
    /// wait blocks until the executor is done. `None` means the call was
    /// abandoned and the caller has to try again.
    pub(crate) fn wait(&self) -> Option<Result<T, E>> {
        let mut status = self.status.lock();
        loop {
            match &*status {
                Status::Pending => {
                    trace!("Not return, waiting...");
                    self.cvar.wait(&mut status);
                    trace!("Work done noticed");
                }
                Status::Done(result) => return Some(result.clone()),
                Status::Abandoned => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use super::Call;

    #[test]
    fn test_wait_after_complete() {
        let call = Call::<i32, ()>::new();
        call.complete(Ok(7));
        assert_eq!(call.wait(), Some(Ok(7)));
        assert_eq!(call.wait(), Some(Ok(7)));
    }

    #[test]
    fn test_complete_once() {
        let call = Call::<i32, ()>::new();
        call.complete(Err(()));
        call.complete(Ok(1));
        assert!(!call.abandon());
        assert_eq!(call.wait(), Some(Err(())));
    }

    #[test]
    fn test_abandon_wakes_waiters() {
        let call = Arc::new(Call::<i32, ()>::new());
        thread::scope(|s| {
            let waiters = (0..4)
                .map(|_| s.spawn(|| call.wait()))
                .collect::<Vec<_>>();
            thread::sleep(Duration::from_millis(20));
            assert!(call.abandon());
            for waiter in waiters {
                assert_eq!(waiter.join().unwrap(), None);
            }
        });
        call.complete(Ok(1));
        assert_eq!(call.wait(), None);
    }
}
