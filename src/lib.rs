//! # Passive peer-close detection
//!
//! Attach liveness monitoring to an already-open connection and find out
//! that the remote peer closed, shut down, or reset it, without reading a
//! single byte of payload. The kernel is asked, through epoll on Linux and
//! kqueue on macOS and the BSDs, to report hang-up and error conditions
//! edge-triggered; one background thread applies those reports to each
//! connection's state.
//!
//! Connection pools use it to evict dead connections before handing them
//! out again.
//!
//! # Examples
//! __Pool check__
//! ```rust,no_run
//! use std::io::Read;
//! use std::net::TcpStream;
//! use connstate::{listen_conn_state, ConnState};
//!
//! fn main() -> std::io::Result<()> {
//!     let stream = TcpStream::connect("127.0.0.1:8080")?;
//!     let stater = listen_conn_state(stream)?;
//!
//!     // ... later, before reusing the pooled connection
//!     match stater.state() {
//!         ConnState::Ok => {
//!             let mut stream = stater.get_ref();
//!             let mut buf = [0; 64];
//!             let _ = stream.read(&mut buf)?;
//!         }
//!         ConnState::RemoteClosed | ConnState::Closed => stater.close()?,
//!     }
//!     Ok(())
//! }
//! ```
//!
//! The poller lives for the rest of the process once the first connection
//! is attached. [`Driver`] can be built directly with a custom [`Poller`]
//! where isolation from the process-wide one is needed.
//!
//! [`Driver`]: driver/struct.Driver.html
//! [`Poller`]: driver/trait.Poller.html

#![warn(
    rust_2018_idioms,
    unreachable_pub,
    missing_debug_implementations,
    missing_docs
)]
#![allow(clippy::new_without_default)]

#[cfg(not(unix))]
compile_error!("connstate needs a unix socket API");

pub mod driver;
pub mod runtime;

mod config;
mod conn;
mod state;

#[doc(inline)]
pub use crate::config::Config;
#[doc(inline)]
pub use crate::conn::{listen_conn_state, ConnStater, SyscallConn};
#[doc(inline)]
pub use crate::state::ConnState;
