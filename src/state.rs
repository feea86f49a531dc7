use std::sync::atomic::{AtomicU32, Ordering};

/// Liveness of a monitored connection.
///
/// Transitions only move forward: `Ok` → `RemoteClosed` → `Closed`, or
/// straight from `Ok` to `Closed`. Nothing leaves `Closed`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ConnState {
    /// The connection is normal.
    Ok,
    /// The remote side hung up, reset, or errored the connection.
    RemoteClosed,
    /// The connection has been closed by the local side.
    Closed,
}

impl ConnState {
    #[inline]
    fn as_u32(self) -> u32 {
        match self {
            ConnState::Ok => 0,
            ConnState::RemoteClosed => 1,
            ConnState::Closed => 2,
        }
    }

    #[inline]
    fn from_u32(val: u32) -> ConnState {
        match val {
            0 => ConnState::Ok,
            1 => ConnState::RemoteClosed,
            _ => ConnState::Closed,
        }
    }
}

/// Lock-free cell holding a `ConnState`, shared between a `ConnStater` and
/// the descriptor record that points back at it.
#[derive(Debug)]
pub(crate) struct AtomicState(AtomicU32);

impl AtomicState {
    pub(crate) fn new() -> AtomicState {
        AtomicState(AtomicU32::new(ConnState::Ok.as_u32()))
    }

    #[inline]
    pub(crate) fn load(&self) -> ConnState {
        ConnState::from_u32(self.0.load(Ordering::Acquire))
    }

    /// Peer-side transition. A no-op unless the state is still `Ok`.
    #[inline]
    pub(crate) fn remote_close(&self) -> bool {
        self.0
            .compare_exchange(
                ConnState::Ok.as_u32(),
                ConnState::RemoteClosed.as_u32(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Local-side transition; `Closed` is terminal so a plain store is enough.
    #[inline]
    pub(crate) fn close(&self) {
        self.0.store(ConnState::Closed.as_u32(), Ordering::Release);
    }
}
