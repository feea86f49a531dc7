use std::os::unix::io::RawFd;
use std::sync::Arc;
use std::time::Duration;
use std::{cmp, io, mem, ptr};

use libc::{self, c_int};
use log::trace;

use crate::config::Config;
use crate::driver::cache::{Operator, PollCache};
use crate::driver::sys::cvt;
use crate::driver::sys::event::{Event, Op, Ready};
use crate::driver::{Poller, Token};

// Identifier of the control event armed at open time.
const WAKE_IDENT: usize = 0;

// A read filter whose low-water mark can never be reached: ordinary payload
// never fires it, while EOF and socket errors still do.
const LOWAT_UNREACHABLE: isize = 0x7FFF_FFFF;

#[cfg(any(target_os = "macos", target_os = "ios"))]
const ADD_FLAGS: u16 = libc::EV_ADD | libc::EV_ENABLE | libc::EV_CLEAR | libc::EV_OOBAND;
#[cfg(not(any(target_os = "macos", target_os = "ios")))]
const ADD_FLAGS: u16 = libc::EV_ADD | libc::EV_ENABLE | libc::EV_CLEAR;

/// kqueue instance watching descriptors for peer close.
#[derive(Debug)]
pub struct Selector {
    kq: RawFd,
    cache: Arc<PollCache>,
    events: usize,
    timeout: Option<Duration>,
}

fn kevent(ident: usize, filter: i16, flags: u16, udata: usize) -> libc::kevent {
    let mut ev: libc::kevent = unsafe { mem::zeroed() };
    ev.ident = ident as _;
    ev.filter = filter as _;
    ev.flags = flags as _;
    // the token travels as an integer; it is never dereferenced
    ev.udata = udata as _;
    ev
}

fn timespec(timeout: Duration) -> libc::timespec {
    libc::timespec {
        tv_sec: cmp::min(timeout.as_secs(), libc::time_t::max_value() as u64) as libc::time_t,
        tv_nsec: timeout.subsec_nanos() as libc::c_long,
    }
}

impl Selector {
    /// Creates the kqueue instance and arms its permanent control event so
    /// the queue is never empty.
    pub fn open(cache: Arc<PollCache>, config: &Config) -> io::Result<Selector> {
        let kq = unsafe { cvt(libc::kqueue())? };
        let selector = Selector {
            kq,
            cache,
            events: config.events.max(1),
            timeout: config.poll_timeout,
        };

        let wake = kevent(WAKE_IDENT, libc::EVFILT_USER, libc::EV_ADD | libc::EV_CLEAR, 0);
        selector.apply(&wake)?;

        Ok(selector)
    }

    fn apply(&self, change: &libc::kevent) -> io::Result<()> {
        unsafe {
            cvt(libc::kevent(
                self.kq,
                change,
                1,
                ptr::null_mut(),
                0,
                ptr::null(),
            ))?;
        }
        Ok(())
    }

    fn select(&self, evts: &mut Vec<libc::kevent>) -> io::Result<usize> {
        let max = cmp::min(evts.capacity(), c_int::max_value() as usize) as c_int;
        let ts = self.timeout.map(timespec);
        let timeout = ts
            .as_ref()
            .map(|ts| ts as *const libc::timespec)
            .unwrap_or(ptr::null());

        unsafe {
            evts.set_len(0);
            let cnt = cvt(libc::kevent(
                self.kq,
                ptr::null(),
                0,
                evts.as_mut_ptr(),
                max,
                timeout,
            ))?;
            let cnt = cnt as usize;
            evts.set_len(cnt);
            Ok(cnt)
        }
    }
}

impl Poller for Selector {
    fn control(&self, op: &Operator, action: Op) -> io::Result<()> {
        let fd = op.fd();
        if fd < 0 {
            return Err(io::Error::from_raw_os_error(libc::EBADF));
        }

        let change = match action {
            Op::Add => {
                let mut ev = kevent(
                    fd as usize,
                    libc::EVFILT_READ,
                    ADD_FLAGS,
                    usize::from(op.token()),
                );
                ev.fflags = libc::NOTE_LOWAT;
                ev.data = LOWAT_UNREACHABLE as _;
                ev
            }
            Op::Delete => kevent(fd as usize, libc::EVFILT_READ, libc::EV_DELETE, 0),
        };

        self.apply(&change)
    }

    fn wait(&self) -> io::Result<()> {
        let mut evts = Vec::with_capacity(self.events);

        loop {
            match self.select(&mut evts) {
                Ok(_) => {}
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }

            for ev in evts.iter() {
                if ev.filter == libc::EVFILT_USER {
                    continue;
                }
                let token = Token(ev.udata as usize);
                let ready = readiness(ev.flags as u16, ev.fflags as u32);
                if self.cache.dispatch(Event::new(token, ready)) {
                    trace!("{:?} closed by peer ({:?})", token, ready);
                }
            }

            // every event of this batch has been handled
            self.cache.reclaim_pass();
        }
    }
}

impl Drop for Selector {
    fn drop(&mut self) {
        unsafe {
            let _ = libc::close(self.kq);
        }
    }
}

fn readiness(flags: u16, fflags: u32) -> Ready {
    let mut ready = Ready::empty();

    if (flags & libc::EV_ERROR) != 0 {
        ready.insert(Ready::error());
    }
    if (flags & libc::EV_EOF) != 0 {
        ready.insert(Ready::read_closed() | Ready::hup());
        // on EOF, fflags carries the pending socket error, if any
        if fflags != 0 {
            ready.insert(Ready::error());
        }
    }

    ready
}
