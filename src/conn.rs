use std::fmt;
use std::io;
use std::net::{Shutdown, TcpStream};
use std::os::unix::io::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::driver::{Driver, Token, NO_TOKEN};
use crate::state::{AtomicState, ConnState};

/// A connection whose raw descriptor can be borrowed for a bounded scope.
///
/// `control` must run `f` at most once, while the descriptor is guaranteed
/// to stay open; registration with the poller happens inside that scope.
/// `close` must be idempotent: only the first call may release OS
/// resources, later calls return `Ok(())`.
pub trait SyscallConn {
    /// Run `f` with the connection's raw descriptor.
    fn control<F: FnOnce(RawFd)>(&self, f: F) -> io::Result<()>;

    /// Close the connection.
    fn close(&self) -> io::Result<()>;
}

impl<'a, T: SyscallConn> SyscallConn for &'a T {
    fn control<F: FnOnce(RawFd)>(&self, f: F) -> io::Result<()> {
        (**self).control(f)
    }

    fn close(&self) -> io::Result<()> {
        (**self).close()
    }
}

impl<T: SyscallConn> SyscallConn for Box<T> {
    fn control<F: FnOnce(RawFd)>(&self, f: F) -> io::Result<()> {
        (**self).control(f)
    }

    fn close(&self) -> io::Result<()> {
        (**self).close()
    }
}

impl<T: SyscallConn> SyscallConn for Arc<T> {
    fn control<F: FnOnce(RawFd)>(&self, f: F) -> io::Result<()> {
        (**self).control(f)
    }

    fn close(&self) -> io::Result<()> {
        (**self).close()
    }
}

// Shutting down both halves unblocks pending I/O and makes further writes
// fail; the descriptor itself is released when the stream is dropped.
fn shutdown<F: FnOnce() -> io::Result<()>>(f: F) -> io::Result<()> {
    match f() {
        Err(ref e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
        res => res,
    }
}

impl SyscallConn for TcpStream {
    fn control<F: FnOnce(RawFd)>(&self, f: F) -> io::Result<()> {
        f(self.as_raw_fd());
        Ok(())
    }

    fn close(&self) -> io::Result<()> {
        shutdown(|| self.shutdown(Shutdown::Both))
    }
}

impl SyscallConn for UnixStream {
    fn control<F: FnOnce(RawFd)>(&self, f: F) -> io::Result<()> {
        f(self.as_raw_fd());
        Ok(())
    }

    fn close(&self) -> io::Result<()> {
        shutdown(|| self.shutdown(Shutdown::Both))
    }
}

/// Attaches peer-close monitoring to `conn` using the process-wide poller.
///
/// It's generally used for availability checks when taking connections out
/// of a pool. No payload is read: the check relies only on the kernel
/// reporting hang-up, read-side shutdown, or an error on the socket.
///
/// # Errors
///
/// Fails if the process-wide poller could not be created, if `conn` fails
/// to expose its descriptor, or if the descriptor cannot be registered. No
/// record is leaked on any of these paths.
///
/// # Examples
///
/// ```no_run
/// use std::net::TcpStream;
/// use connstate::{listen_conn_state, ConnState};
///
/// # fn main() -> std::io::Result<()> {
/// let stream = TcpStream::connect("127.0.0.1:8080")?;
/// let stater = listen_conn_state(stream)?;
///
/// if stater.state() != ConnState::Ok {
///     stater.close()?;
/// }
/// # Ok(())
/// # }
/// ```
pub fn listen_conn_state<C: SyscallConn>(conn: C) -> io::Result<ConnStater<C>> {
    Driver::global()?.listen(conn)
}

/// A connection with peer-close monitoring attached.
///
/// Must be closed with [`close`](#method.close) to release the monitoring
/// record; dropping it without closing only releases the record and leaves
/// closing to `C`'s own `Drop`.
pub struct ConnStater<C: SyscallConn> {
    conn: C,
    token: AtomicUsize,
    state: Arc<AtomicState>,
    driver: Arc<Driver>,
}

impl<C: SyscallConn> ConnStater<C> {
    pub(crate) fn new(
        conn: C,
        token: Token,
        state: Arc<AtomicState>,
        driver: Arc<Driver>,
    ) -> ConnStater<C> {
        debug_assert_ne!(usize::from(token), NO_TOKEN);
        ConnStater {
            conn,
            token: AtomicUsize::new(token.into()),
            state,
            driver,
        }
    }

    /// Current state of the connection. Never blocks.
    #[inline]
    pub fn state(&self) -> ConnState {
        self.state.load()
    }

    /// Detaches monitoring and closes the underlying connection.
    ///
    /// Safe to call any number of times from any number of threads. Exactly
    /// one caller unregisters the descriptor; every caller marks the state
    /// `Closed` and invokes `C::close`, whose error is returned.
    pub fn close(&self) -> io::Result<()> {
        let token = self.token.swap(NO_TOKEN, Ordering::AcqRel);
        self.state.close();
        if token != NO_TOKEN {
            self.driver.detach(Token(token));
        }
        self.conn.close()
    }

    /// Token of the active registration, `None` once closed.
    pub fn token(&self) -> Option<Token> {
        match self.token.load(Ordering::Acquire) {
            NO_TOKEN => None,
            token => Some(Token(token)),
        }
    }

    /// Returns a reference to the underlying connection.
    pub fn get_ref(&self) -> &C {
        &self.conn
    }
}

impl<C: SyscallConn> Drop for ConnStater<C> {
    fn drop(&mut self) {
        let token = *self.token.get_mut();
        if token != NO_TOKEN {
            self.state.close();
            self.driver.detach(Token(token));
        }
    }
}

impl<C: SyscallConn + fmt::Debug> fmt::Debug for ConnStater<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnStater")
            .field("conn", &self.conn)
            .field("state", &self.state())
            .field("token", &self.token())
            .finish()
    }
}
