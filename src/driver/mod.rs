//! Descriptor-event driver.
//!
//! A [`Driver`] ties together the descriptor-record arena ([`PollCache`]) and
//! an OS [`Poller`]. It owns the attach/detach protocol used by
//! [`listen_conn_state`]: records are allocated and registered inside one
//! scoped descriptor access, and released so that the poller can never act on
//! a record that was recycled for another connection.
//!
//! One driver is created lazily per process and lives until exit. A driver
//! can also be built around a custom [`Poller`], which is how tests run in
//! isolation from the global one.
//!
//! [`listen_conn_state`]: ../fn.listen_conn_state.html

pub mod cache;
pub mod sys;

mod token;

pub use self::cache::{Operator, OperatorRef, PollCache};
pub use self::sys::event::{Event, Op, Ready};
pub use self::token::Token;

pub(crate) use self::token::NO_TOKEN;

use std::fmt;
use std::io;
use std::sync::Arc;

use lazy_static::lazy_static;
use log::{debug, error};

use crate::config::Config;
use crate::conn::{ConnStater, SyscallConn};
use crate::runtime::{Spawner, ThreadSpawner};
use crate::state::AtomicState;

/// OS readiness backend.
///
/// `control` arms or disarms the peer-close watch of one record; `wait`
/// runs the event loop forever, resolving every event through the record
/// arena and calling [`PollCache::reclaim_pass`] after each batch.
pub trait Poller: Send + Sync {
    /// Register (`Op::Add`) or unregister (`Op::Delete`) `op`'s descriptor.
    fn control(&self, op: &Operator, action: Op) -> io::Result<()>;

    /// Block the current context, dispatching events until a fatal error.
    fn wait(&self) -> io::Result<()>;
}

lazy_static! {
    static ref GLOBAL: io::Result<Arc<Driver>> = {
        let driver = Driver::open(Config::default());
        if let Err(ref e) = driver {
            error!("connstate: failed to open poller: {}", e);
        }
        driver
    };
}

/// Record arena plus poller, shared by every [`ConnStater`] it created.
///
/// [`ConnStater`]: ../struct.ConnStater.html
pub struct Driver {
    cache: Arc<PollCache>,
    poller: Arc<dyn Poller>,
}

impl Driver {
    /// The process-wide driver, opened on first use.
    ///
    /// A failure to create the OS polling instance is permanent; every call
    /// reports it again.
    pub fn global() -> io::Result<Arc<Driver>> {
        match *GLOBAL {
            Ok(ref driver) => Ok(driver.clone()),
            Err(ref e) => Err(io::Error::new(
                e.kind(),
                format!("connstate poller unavailable: {}", e),
            )),
        }
    }

    /// Opens a native poller and starts its loop on a dedicated thread.
    ///
    /// The thread runs for the rest of the process.
    pub fn open(config: Config) -> io::Result<Arc<Driver>> {
        let spawner = ThreadSpawner::new(config.thread_name.clone());
        Driver::open_with(config, spawner)
    }

    /// Like [`open`](#method.open), running the loop through `spawner`.
    pub fn open_with<S: Spawner>(config: Config, spawner: S) -> io::Result<Arc<Driver>> {
        let cache = Arc::new(PollCache::with_block_bytes(config.block_bytes));
        let selector = sys::Selector::open(cache.clone(), &config)?;
        Driver::with_poller(cache, Arc::new(selector), spawner)
    }

    /// Builds a driver around `poller` and starts `poller.wait()` through
    /// `spawner`.
    pub fn with_poller<S: Spawner>(
        cache: Arc<PollCache>,
        poller: Arc<dyn Poller>,
        mut spawner: S,
    ) -> io::Result<Arc<Driver>> {
        let looped = poller.clone();
        spawner
            .block(Box::new(move || run(looped)))
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;

        Ok(Driver::from_parts(cache, poller))
    }

    /// Builds a driver without starting any event loop.
    pub fn from_parts(cache: Arc<PollCache>, poller: Arc<dyn Poller>) -> Arc<Driver> {
        Arc::new(Driver { cache, poller })
    }

    /// The driver's descriptor-record arena.
    pub fn cache(&self) -> &Arc<PollCache> {
        &self.cache
    }

    /// Attaches peer-close monitoring to `conn`.
    ///
    /// See [`listen_conn_state`](../fn.listen_conn_state.html).
    pub fn listen<C: SyscallConn>(self: &Arc<Self>, conn: C) -> io::Result<ConnStater<C>> {
        let state = Arc::new(AtomicState::new());
        let mut registered = None;

        let res = conn.control(|fd| {
            registered = Some(self.cache.alloc().map(|op| {
                op.attach(fd, state.clone());
                let added = self.poller.control(&op, Op::Add);
                (op, added)
            }));
        });

        let (op, added) = match registered {
            Some(Ok(registered)) => registered,
            Some(Err(e)) => {
                debug!("connstate: no record for fd: {}", e);
                return Err(e);
            }
            None => {
                return Err(res.err().unwrap_or_else(|| {
                    io::Error::new(io::ErrorKind::Other, "connection exposed no descriptor")
                }))
            }
        };
        let token = op.token();

        match (res, added) {
            (Ok(()), Ok(())) => Ok(ConnStater::new(conn, token, state, self.clone())),
            (Err(e), Ok(())) => {
                // registered, but the descriptor may not be trusted: undo
                let _ = conn.control(|_| {
                    if let Err(e) = self.poller.control(&op, Op::Delete) {
                        debug!("connstate: unregister {:?} failed: {}", token, e);
                    }
                });
                self.cache.release(token);
                Err(e)
            }
            (Err(e), Err(_)) | (Ok(()), Err(e)) => {
                debug!("connstate: register fd {} failed: {}", op.fd(), e);
                self.cache.release(token);
                Err(e)
            }
        }
    }

    /// Unregisters the record behind `token` and hands it back to the arena.
    pub(crate) fn detach(&self, token: Token) {
        if let Some(op) = self.cache.resolve(token) {
            if op.generation() == token.generation() {
                if let Err(e) = self.poller.control(&op, Op::Delete) {
                    debug!("connstate: unregister {:?} failed: {}", token, e);
                }
            }
        }
        self.cache.release(token);
    }
}

impl fmt::Debug for Driver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Driver").field("cache", &self.cache).finish()
    }
}

fn run(poller: Arc<dyn Poller>) {
    debug!("connstate: poller started");
    match poller.wait() {
        Ok(()) => debug!("connstate: poller exited"),
        Err(e) => error!("connstate: poller exited: {}", e),
    }
}
