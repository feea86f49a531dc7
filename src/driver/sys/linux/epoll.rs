use std::os::unix::io::RawFd;
use std::sync::Arc;
use std::{cmp, io};

use libc::{self, c_int};
use log::trace;

use crate::config::Config;
use crate::driver::cache::{Operator, PollCache};
use crate::driver::sys::event::{Event, Op, Ready};
use crate::driver::sys::{cvt, timeout_millis};
use crate::driver::{Poller, Token};

// Peer hang-up, read-side shutdown and socket errors only, edge-triggered.
// EPOLLIN/EPOLLOUT are never armed so payload traffic never wakes the loop.
const INTEREST: u32 =
    (libc::EPOLLHUP | libc::EPOLLRDHUP | libc::EPOLLERR | libc::EPOLLET) as u32;

/// epoll instance watching descriptors for peer close.
#[derive(Debug)]
pub struct Selector {
    epfd: RawFd,
    cache: Arc<PollCache>,
    events: usize,
    timeout: c_int,
}

impl Selector {
    /// Creates the epoll instance. Records are resolved through `cache`.
    pub fn open(cache: Arc<PollCache>, config: &Config) -> io::Result<Selector> {
        let epfd = unsafe { cvt(libc::epoll_create1(libc::EPOLL_CLOEXEC))? };

        Ok(Selector {
            epfd,
            cache,
            events: config.events.max(1),
            timeout: timeout_millis(config.poll_timeout),
        })
    }

    fn select(&self, evts: &mut Vec<libc::epoll_event>) -> io::Result<usize> {
        let max = cmp::min(evts.capacity(), c_int::max_value() as usize) as c_int;

        unsafe {
            evts.set_len(0);
            let cnt = cvt(libc::epoll_wait(
                self.epfd,
                evts.as_mut_ptr(),
                max,
                self.timeout,
            ))?;
            let cnt = cnt as usize;
            evts.set_len(cnt);
            Ok(cnt)
        }
    }
}

impl Poller for Selector {
    fn control(&self, op: &Operator, action: Op) -> io::Result<()> {
        let mut info = libc::epoll_event { events: 0, u64: 0 };
        let ctl = match action {
            Op::Add => {
                info.events = INTEREST;
                info.u64 = usize::from(op.token()) as u64;
                libc::EPOLL_CTL_ADD
            }
            Op::Delete => libc::EPOLL_CTL_DEL,
        };

        unsafe {
            cvt(libc::epoll_ctl(self.epfd, ctl, op.fd(), &mut info))?;
        }
        Ok(())
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
                let token = Token(ev.u64 as usize);
                let ready = readiness(ev.events);
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
            let _ = libc::close(self.epfd);
        }
    }
}

fn readiness(epoll: u32) -> Ready {
    let mut ready = Ready::empty();

    if (epoll & libc::EPOLLERR as u32) != 0 {
        ready.insert(Ready::error());
    }
    if (epoll & libc::EPOLLHUP as u32) != 0 {
        ready.insert(Ready::hup());
    }
    if (epoll & libc::EPOLLRDHUP as u32) != 0 {
        ready.insert(Ready::read_closed());
    }

    ready
}
