//! Arena of descriptor records.
//!
//! Records are handed out by [`PollCache::alloc`] and handed back with
//! [`PollCache::release`]. A released record is not reusable right away: the
//! poller may already hold a kernel event tagged with its token. The index
//! first waits in a pending batch, ages by one completed poller pass, and only
//! after a further pass (which necessarily began after the release) does it
//! return to the free list. On top of that every release bumps the slot
//! generation, so a token captured before the release no longer matches.

use std::cmp;
use std::fmt;
use std::io;
use std::mem;
use std::ops;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam_utils::CachePadded;
use log::trace;
use parking_lot::Mutex;

use crate::driver::sys::event::Event;
use crate::driver::token::{wrap_generation, MAX_INDEX};
use crate::driver::Token;
use crate::state::AtomicState;

/// Default size of one arena block, in bytes.
pub const POLL_BLOCK_SIZE: usize = 4 * 1024;

/// A descriptor record: one slot of the arena.
///
/// The poller only ever sees the record through its [`Token`]; the owner
/// back-reference is a lookup into the connection's state cell and is cleared
/// the moment the record is released.
#[derive(Debug)]
pub struct Operator {
    index: usize,
    generation: AtomicUsize,
    fd: AtomicI32,
    conn: Mutex<Option<Arc<AtomicState>>>,
}

impl Operator {
    fn new(index: usize) -> Operator {
        Operator {
            index,
            generation: AtomicUsize::new(0),
            fd: AtomicI32::new(-1),
            conn: Mutex::new(None),
        }
    }

    /// Stable arena index of this record.
    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }

    /// Raw descriptor watched through this record, or `-1` when unused.
    #[inline]
    pub fn fd(&self) -> RawFd {
        self.fd.load(Ordering::Acquire)
    }

    /// Current slot generation.
    #[inline]
    pub fn generation(&self) -> usize {
        self.generation.load(Ordering::Acquire)
    }

    /// Token to store in the kernel event's user data.
    #[inline]
    pub fn token(&self) -> Token {
        Token::new(self.index, self.generation())
    }

    pub(crate) fn attach(&self, fd: RawFd, state: Arc<AtomicState>) {
        self.fd.store(fd, Ordering::Release);
        *self.conn.lock() = Some(state);
    }

    fn owner(&self) -> Option<Arc<AtomicState>> {
        self.conn.lock().clone()
    }

    fn retire(&self) {
        self.conn.lock().take();
        self.fd.store(-1, Ordering::Release);
        let next = wrap_generation(self.generation().wrapping_add(1));
        self.generation.store(next, Ordering::Release);
    }
}

/// Shared handle to one record inside an arena block.
#[derive(Clone)]
pub struct OperatorRef {
    block: Arc<[Operator]>,
    offset: usize,
}

impl ops::Deref for OperatorRef {
    type Target = Operator;

    fn deref(&self) -> &Operator {
        &self.block[self.offset]
    }
}

impl fmt::Debug for OperatorRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}

/// Block-allocated arena of [`Operator`]s with deferred reclamation.
pub struct PollCache {
    inner: Mutex<Inner>,
    // set while a released batch still waits for poller passes
    dirty: CachePadded<AtomicBool>,
    per_block: usize,
    // number of indices a token can address
    limit: usize,
}

#[derive(Default)]
struct Inner {
    blocks: Vec<Arc<[Operator]>>,
    free: Vec<usize>,
    // released since the last completed pass
    pending: Vec<usize>,
    // released before the last completed pass; reusable after the next one
    retired: Vec<usize>,
}

impl Inner {
    fn grow(&mut self, per_block: usize, limit: usize) -> Option<usize> {
        let base = self.blocks.len() * per_block;
        if base >= limit {
            return None;
        }
        let block: Arc<[Operator]> = (base..base + per_block).map(Operator::new).collect();
        self.blocks.push(block);
        // reversed so that pops hand out ascending indices
        self.free.extend((base + 1..cmp::min(base + per_block, limit)).rev());
        Some(base)
    }

    fn get(&self, index: usize, per_block: usize) -> Option<OperatorRef> {
        let block = self.blocks.get(index / per_block)?;
        Some(OperatorRef {
            block: block.clone(),
            offset: index % per_block,
        })
    }
}

impl PollCache {
    /// Creates an empty cache using [`POLL_BLOCK_SIZE`] blocks.
    pub fn new() -> PollCache {
        PollCache::with_block_bytes(POLL_BLOCK_SIZE)
    }

    /// Creates an empty cache whose blocks span roughly `bytes` bytes.
    pub fn with_block_bytes(bytes: usize) -> PollCache {
        PollCache::with_limit(bytes, MAX_INDEX + 1)
    }

    pub(crate) fn with_limit(bytes: usize, limit: usize) -> PollCache {
        let per_block = (bytes / mem::size_of::<Operator>()).max(1);
        PollCache {
            inner: Mutex::new(Inner::default()),
            dirty: CachePadded::new(AtomicBool::new(false)),
            per_block,
            limit,
        }
    }

    /// Number of records in one arena block.
    pub fn block_len(&self) -> usize {
        self.per_block
    }

    /// Hands out a record that no live registration is using.
    ///
    /// Fails once every index a [`Token`] can address is in use or still
    /// waiting for reclamation.
    pub fn alloc(&self) -> io::Result<OperatorRef> {
        let per_block = self.per_block;
        let mut inner = self.inner.lock();
        let index = match inner.free.pop() {
            Some(index) => index,
            None => inner.grow(per_block, self.limit).ok_or_else(|| {
                io::Error::new(io::ErrorKind::Other, "descriptor records exhausted")
            })?,
        };
        let op = inner.get(index, per_block);
        drop(inner);
        match op {
            Some(op) => Ok(op),
            None => unreachable!("free list holds index {} outside the arena", index),
        }
    }

    /// Looks up the record a token points at.
    ///
    /// The generation is not checked here; callers compare it themselves.
    pub fn resolve(&self, token: Token) -> Option<OperatorRef> {
        self.inner.lock().get(token.index(), self.per_block)
    }

    /// Marks the record identified by `token` reclaimable.
    ///
    /// The owner reference is cleared first so an in-flight dispatch skips
    /// it. A token whose generation already moved on is ignored, which makes
    /// a second release of the same registration a no-op.
    pub fn release(&self, token: Token) -> bool {
        let mut inner = self.inner.lock();
        let op = match inner.get(token.index(), self.per_block) {
            Some(op) => op,
            None => return false,
        };
        if op.generation() != token.generation() {
            return false;
        }
        op.retire();
        inner.pending.push(token.index());
        self.dirty.store(true, Ordering::Release);
        true
    }

    /// Called by the poller after every wait batch.
    pub fn reclaim_pass(&self) {
        if !self.dirty.load(Ordering::Acquire) {
            return;
        }
        let mut inner = self.inner.lock();
        let pending = mem::take(&mut inner.pending);
        let mut retired = mem::replace(&mut inner.retired, pending);
        if !retired.is_empty() {
            trace!("reclaimed {} descriptor records", retired.len());
            inner.free.append(&mut retired);
        }
        // keep the emptied buffer around for the next batch
        inner.pending = retired;
        if inner.retired.is_empty() {
            self.dirty.store(false, Ordering::Release);
        }
    }

    /// Applies one kernel event. Returns true if a connection moved to
    /// `RemoteClosed`.
    pub(crate) fn dispatch(&self, event: Event) -> bool {
        if event.readiness().is_empty() {
            return false;
        }
        let token = event.token();
        let op = match self.resolve(token) {
            Some(op) => op,
            None => {
                trace!("event for unknown {:?}", token);
                return false;
            }
        };
        if op.generation() != token.generation() {
            trace!("stale event for {:?}", token);
            return false;
        }
        match op.owner() {
            Some(state) => state.remote_close(),
            None => false,
        }
    }

    #[cfg(test)]
    fn counts(&self) -> (usize, usize, usize) {
        let inner = self.inner.lock();
        (inner.free.len(), inner.pending.len(), inner.retired.len())
    }
}

impl fmt::Debug for PollCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("PollCache")
            .field("blocks", &inner.blocks.len())
            .field("block_len", &self.per_block)
            .field("free", &inner.free.len())
            .field("pending", &inner.pending.len())
            .field("retired", &inner.retired.len())
            .finish()
    }
}

impl Default for PollCache {
    fn default() -> PollCache {
        PollCache::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::sys::event::Ready;
    use crate::state::ConnState;

    use std::collections::HashSet;
    use std::sync::atomic::AtomicUsize;

    use crossbeam_utils::thread;
    use rand::Rng;

    #[test]
    fn alloc_hands_out_distinct_records() {
        let cache = PollCache::new();
        let op1 = cache.alloc().unwrap();
        let op2 = cache.alloc().unwrap();

        assert_ne!(op1.index(), op2.index());
        assert_eq!(op1.fd(), -1);
        assert_eq!(op1.generation(), 0);
    }

    #[test]
    fn alloc_grows_by_whole_blocks() {
        let cache = PollCache::with_block_bytes(mem::size_of::<Operator>() * 4);
        assert_eq!(cache.block_len(), 4);

        let ops: Vec<_> = (0..10).map(|_| cache.alloc().unwrap()).collect();
        let indices: HashSet<_> = ops.iter().map(|op| op.index()).collect();
        assert_eq!(indices.len(), 10);
        assert_eq!(cache.inner.lock().blocks.len(), 3);
    }

    #[test]
    fn tiny_blocks_still_hold_one_record() {
        let cache = PollCache::with_block_bytes(1);
        assert_eq!(cache.block_len(), 1);
        let a = cache.alloc().unwrap();
        let b = cache.alloc().unwrap();
        assert_ne!(a.index(), b.index());
    }

    #[test]
    fn alloc_stops_at_token_capacity() {
        let cache = PollCache::with_limit(mem::size_of::<Operator>() * 4, 6);
        let ops: Vec<_> = (0..6).map(|_| cache.alloc().unwrap()).collect();
        for op in &ops {
            assert!(op.index() < 6);
            assert_eq!(op.token().index(), op.index());
        }
        assert!(cache.alloc().is_err());

        // exhaustion is not sticky: a reclaimed record is handed out again
        let index = ops[3].index();
        assert!(cache.release(ops[3].token()));
        assert!(cache.alloc().is_err());
        cache.reclaim_pass();
        cache.reclaim_pass();
        assert_eq!(cache.alloc().unwrap().index(), index);
        assert!(cache.alloc().is_err());
    }

    #[test]
    fn default_capacity_fits_in_a_token() {
        let cache = PollCache::new();
        assert_eq!(cache.limit, MAX_INDEX + 1);
        assert_eq!(Token::new(cache.limit - 1, 0).index(), cache.limit - 1);
    }

    #[test]
    fn debug_prints_counts_not_records() {
        let cache = PollCache::with_block_bytes(mem::size_of::<Operator>() * 4);
        let op = cache.alloc().unwrap();
        let _other = cache.alloc().unwrap();
        assert!(cache.release(op.token()));

        assert_eq!(
            format!("{:?}", cache),
            "PollCache { blocks: 1, block_len: 4, free: 2, pending: 1, retired: 0 }"
        );
        assert!(format!("{:?}", op).starts_with("Operator {"));
    }

    #[test]
    fn release_waits_for_two_passes() {
        let cache = PollCache::with_block_bytes(mem::size_of::<Operator>());
        let op = cache.alloc().unwrap();
        let index = op.index();
        assert!(cache.release(op.token()));
        assert_eq!(cache.counts(), (0, 1, 0));

        // the pass in flight at release time does not count
        cache.reclaim_pass();
        assert_eq!(cache.counts(), (0, 0, 1));
        assert_ne!(cache.alloc().unwrap().index(), index);

        cache.reclaim_pass();
        assert_eq!(cache.counts(), (1, 0, 0));
        assert_eq!(cache.alloc().unwrap().index(), index);
    }

    #[test]
    fn reclaim_pass_without_releases_is_noop() {
        let cache = PollCache::new();
        let _op = cache.alloc().unwrap();
        let free = cache.counts().0;
        cache.reclaim_pass();
        assert_eq!(cache.counts().0, free);
        assert!(!cache.dirty.load(Ordering::Acquire));
    }

    #[test]
    fn double_release_is_ignored() {
        let cache = PollCache::new();
        let op = cache.alloc().unwrap();
        let token = op.token();

        assert!(cache.release(token));
        assert!(!cache.release(token));
        assert_eq!(cache.counts().1, 1);
        assert_eq!(op.generation(), 1);
    }

    #[test]
    fn release_clears_owner_and_fd() {
        let cache = PollCache::new();
        let op = cache.alloc().unwrap();
        let state = Arc::new(AtomicState::new());
        op.attach(9, state.clone());
        let token = op.token();

        cache.release(token);
        assert_eq!(op.fd(), -1);
        assert!(op.owner().is_none());
        assert!(!cache.dispatch(Event::new(token, Ready::hup())));
        assert_eq!(state.load(), ConnState::Ok);
    }

    #[test]
    fn dispatch_moves_owner_to_remote_closed() {
        let cache = PollCache::new();
        let op = cache.alloc().unwrap();
        let state = Arc::new(AtomicState::new());
        op.attach(9, state.clone());

        assert!(!cache.dispatch(Event::new(op.token(), Ready::empty())));
        assert_eq!(state.load(), ConnState::Ok);

        assert!(cache.dispatch(Event::new(op.token(), Ready::read_closed())));
        assert_eq!(state.load(), ConnState::RemoteClosed);
        assert!(!cache.dispatch(Event::new(op.token(), Ready::error())));
    }

    #[test]
    fn stale_token_does_not_touch_recycled_record() {
        let cache = PollCache::with_block_bytes(mem::size_of::<Operator>());
        let op = cache.alloc().unwrap();
        let stale = op.token();
        cache.release(stale);
        cache.reclaim_pass();
        cache.reclaim_pass();

        let reused = cache.alloc().unwrap();
        assert_eq!(reused.index(), stale.index());
        let state = Arc::new(AtomicState::new());
        reused.attach(11, state.clone());

        assert!(!cache.dispatch(Event::new(stale, Ready::hup())));
        assert_eq!(state.load(), ConnState::Ok);
        assert!(cache.dispatch(Event::new(reused.token(), Ready::hup())));
    }

    #[test]
    fn unknown_index_is_skipped() {
        let cache = PollCache::new();
        assert!(cache.resolve(Token::new(3, 0)).is_none());
        assert!(!cache.dispatch(Event::new(Token::new(3, 0), Ready::hup() | Ready::error())));
    }

    #[test]
    fn concurrent_traffic_never_shares_live_index() {
        let cache = PollCache::with_block_bytes(mem::size_of::<Operator>() * 8);
        let live = Mutex::new(HashSet::new());
        let done = AtomicBool::new(false);
        let passes = AtomicUsize::new(0);

        thread::scope(|s| {
            s.spawn(|_| {
                while !done.load(Ordering::Acquire) {
                    cache.reclaim_pass();
                    passes.fetch_add(1, Ordering::Relaxed);
                }
            });

            let workers: Vec<_> = (0..8)
                .map(|_| {
                    s.spawn(|_| {
                        let mut rng = rand::thread_rng();
                        let mut held = Vec::new();
                        for _ in 0..2_000 {
                            let op = cache.alloc().unwrap();
                            assert!(
                                live.lock().insert(op.index()),
                                "index {} handed out twice",
                                op.index()
                            );
                            held.push(op);
                            if rng.gen_range(0, 3) != 0 {
                                let idx = rng.gen_range(0, held.len());
                                let op = held.swap_remove(idx);
                                live.lock().remove(&op.index());
                                assert!(cache.release(op.token()));
                            }
                        }
                        for op in held {
                            live.lock().remove(&op.index());
                            cache.release(op.token());
                        }
                    })
                })
                .collect();

            for worker in workers {
                worker.join().unwrap();
            }
            done.store(true, Ordering::Release);
        })
        .unwrap();

        assert!(passes.load(Ordering::Relaxed) > 0);
        assert!(live.lock().is_empty());
    }
}
