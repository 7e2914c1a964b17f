use parking_lot::{const_mutex, Mutex};
use std::borrow::Borrow;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use tokio::sync::watch;
use tracing::{instrument, trace, warn};

use crate::types::Role;

type Slot<T, E> = Option<Result<T, E>>;

/// AsyncGroup is like [`Group`](crate::Group) but for `async` work.
///
/// Waiters park on a watch channel instead of a thread. The executing
/// future is polled by its own caller, so dropping it cancels the work; when
/// that happens one of the waiters runs its own future instead.
pub struct AsyncGroup<T, E, K = String> {
    calls: Mutex<Option<HashMap<K, watch::Receiver<Slot<T, E>>>>>,
}

enum Attached<T, E> {
    Executor(watch::Sender<Slot<T, E>>, watch::Receiver<Slot<T, E>>),
    Waiter(watch::Receiver<Slot<T, E>>),
}

impl<T, E, K> AsyncGroup<T, E, K> {
    pub const fn new() -> Self {
        AsyncGroup {
            calls: const_mutex(None),
        }
    }

    /// in_flight returns the number of keys with an execution in progress.
    pub fn in_flight(&self) -> usize {
        self.calls.lock().as_ref().map_or(0, HashMap::len)
    }
}

impl<T, E, K> Default for AsyncGroup<T, E, K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E, K> fmt::Debug for AsyncGroup<T, E, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncGroup")
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

impl<T, E, K> AsyncGroup<T, E, K>
where
    T: Clone,
    E: Clone,
    K: Eq + Hash,
{
    /// work awaits `fut` for the first caller of `key` and hands a copy of
    /// its output to every caller that arrives while it runs.
    pub async fn work<Q, F>(&self, key: &Q, fut: F) -> Result<T, E>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq + ToOwned<Owned = K> + fmt::Debug,
        F: Future<Output = Result<T, E>>,
    {
        self.work_with_role(key, fut).await.0
    }

    #[instrument(skip(self, fut))]
    pub async fn work_with_role<Q, F>(&self, key: &Q, fut: F) -> (Result<T, E>, Role)
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq + ToOwned<Owned = K> + fmt::Debug,
        F: Future<Output = Result<T, E>>,
    {
        loop {
            match self.attach(key) {
                Attached::Waiter(mut rx) => {
                    trace!("Not return, waiting...");
                    let result = rx
                        .wait_for(Option::is_some)
                        .await
                        .ok()
                        .and_then(|slot| slot.clone());
                    match result {
                        Some(result) => {
                            trace!("Value returned");
                            return (result, Role::Waiter);
                        }
                        None => {
                            warn!("Executor dropped, retrying");
                            continue;
                        }
                    }
                }
                Attached::Executor(tx, rx) => {
                    let flight = Flight {
                        group: self,
                        key,
                        tx,
                        rx,
                    };
                    trace!("working...");
                    let result = fut.await;
                    flight.tx.send_replace(Some(result.clone()));
                    trace!("Work done");
                    drop(flight);
                    return (result, Role::Executor);
                }
            }
        }
    }

    /// forget stops tracking the in-flight call for `key`; see
    /// [`Group::forget`](crate::Group::forget).
    #[instrument(skip(self))]
    pub fn forget<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq + fmt::Debug,
    {
        let mut calls = self.calls.lock();
        let forgotten = calls
            .as_mut()
            .is_some_and(|calls| calls.remove(key).is_some());
        if forgotten {
            trace!("Entry forgotten");
        }
        forgotten
    }

    /// is_in_flight reports whether an execution for `key` is in progress.
    pub fn is_in_flight<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        self.calls
            .lock()
            .as_ref()
            .is_some_and(|calls| calls.contains_key(key))
    }

    fn attach<Q>(&self, key: &Q) -> Attached<T, E>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq + ToOwned<Owned = K>,
    {
        let mut calls = self.calls.lock();
        let calls = calls.get_or_insert_with(HashMap::new);
        if let Some(rx) = calls.get(key) {
            trace!("Key in flight, attaching");
            return Attached::Waiter(rx.clone());
        }
        let (tx, rx) = watch::channel(None);
        calls.insert(key.to_owned(), rx.clone());
        trace!("Entry inited");
        Attached::Executor(tx, rx)
    }
}

/// Flight owns the sending half of an executing call. It is dropped either
/// after the result was sent or, if the work future was dropped or panicked,
/// without one, which closes the channel and releases the waiters.
struct Flight<'a, T, E, K, Q>
where
    K: Eq + Hash + Borrow<Q>,
    Q: ?Sized + Hash + Eq,
{
    group: &'a AsyncGroup<T, E, K>,
    key: &'a Q,
    tx: watch::Sender<Slot<T, E>>,
    rx: watch::Receiver<Slot<T, E>>,
}

impl<T, E, K, Q> Drop for Flight<'_, T, E, K, Q>
where
    K: Eq + Hash + Borrow<Q>,
    Q: ?Sized + Hash + Eq,
{
    fn drop(&mut self) {
        let mut calls = self.group.calls.lock();
        if let Some(calls) = calls.as_mut() {
            if calls
                .get(self.key)
                .is_some_and(|rx| rx.same_channel(&self.rx))
            {
                calls.remove(self.key);
                trace!("Entry removed");
            }
        }
        drop(calls);

        if self.tx.borrow().is_none() {
            warn!("Work dropped before completion, waking waiters");
        }
    }
}
