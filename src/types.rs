/// Role tells a caller how it obtained the value returned by a group.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Role {
    /// The caller found no call in flight for its key and ran the work itself.
    Executor,
    /// The caller attached to a call already in flight and received a copy of
    /// its result.
    Waiter,
}

impl Role {
    /// is_executor reports whether the caller ran the work itself.
    pub fn is_executor(self) -> bool {
        matches!(self, Role::Executor)
    }

    /// is_shared reports whether the result was handed over from another
    /// caller's execution.
    pub fn is_shared(self) -> bool {
        matches!(self, Role::Waiter)
    }
}
