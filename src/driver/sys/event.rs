//! Readiness event types

use std::{fmt, ops};

use crate::driver::Token;

/// A set of peer-close readiness kinds.
///
/// Only conditions that mean the connection is no longer usable are
/// represented; ordinary readable or writable readiness is never armed, so it
/// never shows up here. Each backend translates its native flags into a
/// `Ready` value before dispatch.
///
/// # Examples
///
/// ```
/// use connstate::driver::Ready;
///
/// let ready = Ready::hup() | Ready::read_closed();
///
/// assert!(ready.is_hup());
/// assert!(ready.is_read_closed());
/// assert!(!ready.is_error());
/// ```
#[derive(Copy, PartialEq, Eq, Clone, PartialOrd, Ord)]
pub struct Ready(usize);

const ERROR: usize = 0b0001;
const HUP: usize = 0b0010;
const READ_CLOSED: usize = 0b0100;

impl Ready {
    /// Returns the empty `Ready` set.
    #[inline]
    pub fn empty() -> Ready {
        Ready(0)
    }

    /// Returns a `Ready` representing error readiness.
    ///
    /// The socket entered an error state, typically after a reset from the
    /// peer.
    #[inline]
    pub fn error() -> Ready {
        Ready(ERROR)
    }

    /// Returns a `Ready` representing HUP readiness.
    ///
    /// A HUP (or hang-up) signifies that the stream socket **peer** closed
    /// the connection.
    #[inline]
    pub fn hup() -> Ready {
        Ready(HUP)
    }

    /// Returns a `Ready` representing a read-side close.
    ///
    /// The peer shut down its writing half; the local end will read EOF once
    /// the buffered payload is drained.
    #[inline]
    pub fn read_closed() -> Ready {
        Ready(READ_CLOSED)
    }

    /// Returns true if no readiness kind is set.
    #[inline]
    pub fn is_empty(&self) -> bool {
        *self == Ready::empty()
    }

    /// Returns true if the value includes error readiness.
    #[inline]
    pub fn is_error(&self) -> bool {
        self.contains(Ready::error())
    }

    /// Returns true if the value includes HUP readiness.
    #[inline]
    pub fn is_hup(&self) -> bool {
        self.contains(Ready::hup())
    }

    /// Returns true if the value includes a read-side close.
    #[inline]
    pub fn is_read_closed(&self) -> bool {
        self.contains(Ready::read_closed())
    }

    /// Adds all readiness represented by `other` into `self`.
    #[inline]
    pub fn insert<T: Into<Self>>(&mut self, other: T) {
        let other = other.into();
        self.0 |= other.0;
    }

    /// Returns true if `self` is a superset of `other`.
    #[inline]
    pub fn contains<T: Into<Self>>(&self, other: T) -> bool {
        let other = other.into();
        (*self & other) == other
    }
}

impl ops::BitOr for Ready {
    type Output = Ready;

    #[inline]
    fn bitor(self, other: Ready) -> Ready {
        Ready(self.0 | other.0)
    }
}

impl ops::BitAnd for Ready {
    type Output = Ready;

    #[inline]
    fn bitand(self, other: Ready) -> Ready {
        Ready(self.0 & other.0)
    }
}

impl fmt::Debug for Ready {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut one = false;
        let flags = [
            (Ready::error(), "Error"),
            (Ready::hup(), "Hup"),
            (Ready::read_closed(), "ReadClosed"),
        ];

        for &(flag, msg) in &flags {
            if self.contains(flag) {
                if one {
                    write!(fmt, " | ")?
                }
                write!(fmt, "{}", msg)?;

                one = true
            }
        }

        if !one {
            fmt.write_str("(empty)")?;
        }

        Ok(())
    }
}

/// Registration operation passed to [`Poller::control`].
///
/// [`Poller::control`]: ../trait.Poller.html#tymethod.control
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Op {
    /// Arm an edge-triggered peer-close watch.
    Add,
    /// Disarm the watch.
    Delete,
}

/// A readiness event as translated from the kernel.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Event {
    token: Token,
    ready: Ready,
}

impl Event {
    /// Creates a new `Event` for `token` carrying `ready`.
    pub fn new(token: Token, ready: Ready) -> Event {
        Event { token, ready }
    }

    /// Returns the event's token.
    pub fn token(&self) -> Token {
        self.token
    }

    /// Returns the event's readiness.
    pub fn readiness(&self) -> Ready {
        self.ready
    }
}

#[test]
fn test_debug_ready() {
    assert_eq!("(empty)", format!("{:?}", Ready::empty()));
    assert_eq!("Error", format!("{:?}", Ready::error()));
    assert_eq!("Hup | ReadClosed", format!("{:?}", Ready::hup() | Ready::read_closed()));
}

#[test]
fn test_ready_insert() {
    let mut ready = Ready::empty();
    ready.insert(Ready::hup());
    ready.insert(Ready::read_closed());
    assert!(ready.is_hup());
    assert!(ready.is_read_closed());
    assert!(!ready.is_error());
    assert!(ready.contains(Ready::hup() | Ready::read_closed()));
    assert!(!ready.contains(Ready::hup() | Ready::error()));
}
