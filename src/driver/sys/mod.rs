//! Operating system selectors.
//!
//! # Features
//!
//! * Edge-triggered peer-close notification backed by epoll on Linux
//! * The same notification backed by kqueue on macOS and the BSDs
//! * Zero allocations per event
//!
//! Each backend exposes a `Selector` implementing [`Poller`]. Only hang-up,
//! error and peer-reset conditions are ever armed; readable or writable
//! readiness never reaches the dispatcher.
//!
//! [`Poller`]: ../trait.Poller.html

pub mod event;

#[cfg(any(target_os = "linux", target_os = "android"))]
mod linux;
#[cfg(any(target_os = "linux", target_os = "android"))]
pub use self::linux::Selector;

#[cfg(any(
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "dragonfly"
))]
mod bsd;
#[cfg(any(
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "dragonfly"
))]
pub use self::bsd::Selector;

#[cfg(not(any(
    target_os = "linux",
    target_os = "android",
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "dragonfly"
)))]
compile_error!(
    "connstate supports linux, android, macos, ios, freebsd and dragonfly only"
);

use std::io;
#[cfg(any(target_os = "linux", target_os = "android"))]
use std::time::Duration;

trait IsMinusOne {
    fn is_minus_one(&self) -> bool;
}

impl IsMinusOne for i32 {
    fn is_minus_one(&self) -> bool {
        *self == -1
    }
}

fn cvt<T: IsMinusOne>(t: T) -> io::Result<T> {
    if t.is_minus_one() {
        Err(io::Error::last_os_error())
    } else {
        Ok(t)
    }
}

/// Clamps a wait timeout to whole milliseconds; `None` blocks forever.
#[cfg(any(target_os = "linux", target_os = "android"))]
fn timeout_millis(timeout: Option<Duration>) -> libc::c_int {
    const MAX: u128 = libc::c_int::max_value() as u128;

    timeout
        .map(|to| {
            // round up so a sub-millisecond timeout does not spin
            let ms = to.as_millis() + u128::from(to.subsec_nanos() % 1_000_000 != 0);
            ms.min(MAX) as libc::c_int
        })
        .unwrap_or(-1)
}

#[test]
#[cfg(any(target_os = "linux", target_os = "android"))]
fn test_timeout_millis() {
    assert_eq!(timeout_millis(None), -1);
    assert_eq!(timeout_millis(Some(Duration::from_millis(0))), 0);
    assert_eq!(timeout_millis(Some(Duration::from_micros(10))), 1);
    assert_eq!(timeout_millis(Some(Duration::from_millis(100))), 100);
    assert_eq!(
        timeout_millis(Some(Duration::from_secs(u64::max_value()))),
        libc::c_int::max_value()
    );
}
