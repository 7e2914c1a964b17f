use parking_lot::{const_mutex, Mutex};
use std::borrow::Borrow;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use tracing::{instrument, trace, warn};

use crate::call::Call;
use crate::types::Role;

/// Group represents a class of work and forms a namespace in which units of
/// work can be executed with duplicate suppression.
///
/// A group needs no setup and can live in a `static`:
///
/// ```
/// use singleflight::Group;
///
/// static USERS: Group<String, std::io::ErrorKind> = Group::new();
///
/// let name = USERS.work("user:42", || Ok("gopher".to_string()));
/// assert_eq!(name, Ok("gopher".to_string()));
/// ```
pub struct Group<T, E, K = String> {
    calls: Mutex<Option<HashMap<K, Arc<Call<T, E>>>>>,
}

impl<T, E, K> Group<T, E, K> {
    pub const fn new() -> Self {
        Group {
            calls: const_mutex(None),
        }
    }

    /// in_flight returns the number of keys with an execution in progress.
    pub fn in_flight(&self) -> usize {
        self.calls.lock().as_ref().map_or(0, HashMap::len)
    }
}

impl<T, E, K> Default for Group<T, E, K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E, K> fmt::Debug for Group<T, E, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Group")
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

impl<T, E, K> Group<T, E, K>
where
    T: Clone,
    E: Clone,
    K: Eq + Hash,
{
    /// work executes and returns the results of the given function, making
    /// sure that only one execution is in-flight for a given key at a
    /// time. If a duplicate comes in, the duplicate caller waits for the
    /// original to complete and receives the same results.
    ///
    /// `work` runs on the calling thread. The group holds no lock while it
    /// runs, so calls for different keys proceed in parallel. Calling `work`
    /// for the same key from inside `work` never returns.
    ///
    /// If the executing `work` panics the panic propagates to its caller,
    /// and one of the waiters runs its own `work` in its place.
    pub fn work<Q, F>(&self, key: &Q, work: F) -> Result<T, E>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq + ToOwned<Owned = K> + fmt::Debug,
        F: FnOnce() -> Result<T, E>,
    {
        self.work_with_role(key, work).0
    }

    /// work_with_role is like work but also reports whether this caller ran
    /// the function or received the result of another caller's run.
    #[instrument(skip(self, work))]
    pub fn work_with_role<Q, F>(&self, key: &Q, work: F) -> (Result<T, E>, Role)
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq + ToOwned<Owned = K> + fmt::Debug,
        F: FnOnce() -> Result<T, E>,
    {
        loop {
            let (call, role) = self.attach(key);
            match role {
                Role::Waiter => match call.wait() {
                    Some(result) => {
                        trace!("Value returned");
                        return (result, Role::Waiter);
                    }
                    None => {
                        warn!("Executor panicked, retrying");
                        continue;
                    }
                },
                Role::Executor => {
                    let flight = Flight {
                        group: self,
                        key,
                        call: &call,
                    };
                    trace!("working...");
                    let result = work();
                    call.complete(result.clone());
                    trace!("Work done");
                    drop(flight);
                    return (result, Role::Executor);
                }
            }
        }
    }

    /// forget tells the group to stop tracking the in-flight call for `key`.
    /// Callers already waiting still get its result, later callers start a
    /// new execution. Returns whether a call was in flight.
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

    fn attach<Q>(&self, key: &Q) -> (Arc<Call<T, E>>, Role)
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq + ToOwned<Owned = K>,
    {
        let mut calls = self.calls.lock();
        let calls = calls.get_or_insert_with(HashMap::new);
        if let Some(call) = calls.get(key) {
            trace!("Key in flight, attaching");
            return (call.clone(), Role::Waiter);
        }
        let call = Arc::new(Call::new());
        calls.insert(key.to_owned(), call.clone());
        trace!("Entry inited");
        (call, Role::Executor)
    }
}

/// Flight belongs to the executor of a call. Dropping it removes the call
/// from the group, and abandons the call if no result was stored.
struct Flight<'a, T, E, K, Q>
where
    K: Eq + Hash + Borrow<Q>,
    Q: ?Sized + Hash + Eq,
{
    group: &'a Group<T, E, K>,
    key: &'a Q,
    call: &'a Arc<Call<T, E>>,
}

impl<T, E, K, Q> Drop for Flight<'_, T, E, K, Q>
where
    K: Eq + Hash + Borrow<Q>,
    Q: ?Sized + Hash + Eq,
{
    fn drop(&mut self) {
        let mut calls = self.group.calls.lock();
        if let Some(calls) = calls.as_mut() {
            // A forgotten key may already belong to a newer call.
            if calls
                .get(self.key)
                .is_some_and(|call| Arc::ptr_eq(call, self.call))
            {
                calls.remove(self.key);
                trace!("Entry removed");
            }
        }
        drop(calls);

        if self.call.abandon() {
            warn!("Work panicked, waking waiters");
        }
    }
}
