/// What a fired timer asks the replica to do. Dispatched by
/// `Replica::tick`; no production timer is armed in this version, the
/// scaffolding stays for recovery-after-no-progress events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TimerKind {
    /// Sweep the executor's pending queue.
    Execute,
}

/// A cooperative countdown advanced once per replica tick. Infinite timers
/// reset when they fire; one-time timers unregister themselves.
#[derive(Debug)]
pub(crate) struct TickingTimer {
    timeout: usize,
    remaining: usize,
    recurring: bool,
    kind: TimerKind,
}

impl TickingTimer {
    pub(crate) fn infinite(timeout: usize, kind: TimerKind) -> Self {
        Self {
            timeout,
            remaining: timeout,
            recurring: true,
            kind,
        }
    }

    pub(crate) fn one_time(timeout: usize, kind: TimerKind) -> Self {
        Self {
            timeout,
            remaining: timeout,
            recurring: false,
            kind,
        }
    }

    pub(crate) fn kind(&self) -> TimerKind {
        self.kind
    }

    pub(crate) fn recurring(&self) -> bool {
        self.recurring
    }

    /// Advance one unit. Returns true when the timer fires.
    pub(crate) fn tick(&mut self) -> bool {
        if self.remaining > 0 {
            self.remaining -= 1;
        }
        self.remaining == 0
    }

    pub(crate) fn reset(&mut self) {
        self.remaining = self.timeout;
    }
}
