//! In-process communicator world.
//!
//! Every rank of a loopback world lives in the same process (usually one
//! thread per rank). Operations follow the non-blocking native contract: the
//! start call validates its arguments, returns a status immediately and fills
//! in a [`Request`] that must be tested until it completes. Nothing progresses
//! unless somebody tests.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use super::{NativeRequest, Status};

/// Shared element buffer handed to native operations.
///
/// Cloning shares the storage, so an in-flight operation keeps its buffer
/// alive until it completes.
#[derive(Clone, Default)]
pub struct Buffer(Arc<Mutex<Vec<i32>>>);

impl Buffer {
    /// Zero-filled buffer of `len` elements.
    pub fn new(len: usize) -> Self {
        Self::from_vec(vec![0; len])
    }

    pub fn from_vec(data: Vec<i32>) -> Self {
        Self(Arc::new(Mutex::new(data)))
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn get(&self, index: usize) -> Option<i32> {
        self.lock().get(index).copied()
    }

    /// Overwrite one element. Returns `false` if `index` is out of bounds.
    pub fn set(&self, index: usize, value: i32) -> bool {
        match self.lock().get_mut(index) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    pub fn to_vec(&self) -> Vec<i32> {
        self.lock().clone()
    }

    fn read(&self, count: usize) -> Vec<i32> {
        let data = self.lock();
        data[..count.min(data.len())].to_vec()
    }

    fn write(&self, src: &[i32]) {
        let mut data = self.lock();
        let n = src.len().min(data.len());
        data[..n].copy_from_slice(&src[..n]);
    }

    fn lock(&self) -> MutexGuard<'_, Vec<i32>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Buffer").field(&*self.lock()).finish()
    }
}

struct Posted {
    data: Vec<i32>,
    receivers_left: usize,
}

#[derive(Default)]
struct Barrier {
    arrived: usize,
    departed: usize,
}

/// (source, destination, tag)
type MailboxKey = (usize, usize, i32);

#[derive(Default)]
struct WorldState {
    broadcasts: HashMap<u64, Posted>,
    barriers: HashMap<u64, Barrier>,
    mailboxes: HashMap<MailboxKey, VecDeque<Vec<i32>>>,
}

struct WorldShared {
    size: usize,
    state: Mutex<WorldState>,
}

impl WorldShared {
    fn lock(&self) -> MutexGuard<'_, WorldState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn take_broadcast(&self, seq: u64, buf: &Buffer, count: usize) -> Option<Status> {
        let data = {
            let mut state = self.lock();
            let posted = state.broadcasts.get_mut(&seq)?;
            let data = posted.data.clone();
            posted.receivers_left -= 1;
            if posted.receivers_left == 0 {
                state.broadcasts.remove(&seq);
            }
            data
        };

        if data.len() > count {
            buf.write(&data[..count]);
            Some(Status::ERR_TRUNCATE)
        } else {
            buf.write(&data);
            Some(Status::SUCCESS)
        }
    }

    fn take_message(&self, key: MailboxKey, buf: &Buffer, count: usize) -> Option<Status> {
        let message = {
            let mut state = self.lock();
            let queue = state.mailboxes.get_mut(&key)?;
            let message = queue.pop_front()?;
            if queue.is_empty() {
                state.mailboxes.remove(&key);
            }
            message
        };

        if message.len() > count {
            buf.write(&message[..count]);
            Some(Status::ERR_TRUNCATE)
        } else {
            buf.write(&message);
            Some(Status::SUCCESS)
        }
    }

    fn leave_barrier(&self, seq: u64) -> Option<Status> {
        let mut state = self.lock();
        let barrier = state.barriers.get_mut(&seq)?;
        if barrier.arrived < self.size {
            return None;
        }
        barrier.departed += 1;
        if barrier.departed == self.size {
            state.barriers.remove(&seq);
        }
        Some(Status::SUCCESS)
    }
}

/// Create a world of `size` ranks, returning one communicator per rank.
pub fn world(size: usize) -> Vec<Comm> {
    let shared = Arc::new(WorldShared {
        size,
        state: Mutex::new(WorldState::default()),
    });
    (0..size)
        .map(|rank| Comm {
            rank,
            world: Arc::clone(&shared),
            collectives: Arc::new(AtomicU64::new(0)),
        })
        .collect()
}

/// One rank's endpoint into a loopback world.
///
/// Clones share the rank's collective sequence, so they may be moved into
/// invoke closures freely.
#[derive(Clone)]
pub struct Comm {
    rank: usize,
    world: Arc<WorldShared>,
    collectives: Arc<AtomicU64>,
}

impl Comm {
    pub fn rank(&self) -> i32 {
        self.rank as i32
    }

    pub fn size(&self) -> i32 {
        self.world.size as i32
    }

    fn check_rank(&self, rank: i32) -> Option<usize> {
        usize::try_from(rank).ok().filter(|r| *r < self.world.size)
    }

    /// Collective calls are matched across ranks by call order.
    fn next_collective(&self) -> u64 {
        self.collectives.fetch_add(1, Ordering::Relaxed)
    }
}

impl fmt::Debug for Comm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Comm")
            .field("rank", &self.rank)
            .field("size", &self.world.size)
            .finish()
    }
}

/// Broadcast `count` elements of `buf` from `root` to every rank.
pub fn ibcast(buf: &Buffer, count: usize, root: i32, comm: &Comm, request: &mut Request) -> Status {
    let Some(root) = comm.check_rank(root) else {
        return Status::ERR_ROOT;
    };
    if count > buf.len() {
        return Status::ERR_COUNT;
    }

    let seq = comm.next_collective();
    if comm.rank == root {
        if comm.world.size > 1 {
            let data = buf.read(count);
            comm.world.lock().broadcasts.insert(
                seq,
                Posted {
                    data,
                    receivers_left: comm.world.size - 1,
                },
            );
        }
        *request = Request::done(Status::SUCCESS);
    } else {
        *request = Request::pending(RequestState::Broadcast {
            world: Arc::clone(&comm.world),
            seq,
            buf: buf.clone(),
            count,
        });
    }
    Status::SUCCESS
}

/// Buffered send of `count` elements to `dest`. Completes as soon as it is tested.
pub fn isend(
    buf: &Buffer,
    count: usize,
    dest: i32,
    tag: i32,
    comm: &Comm,
    request: &mut Request,
) -> Status {
    let Some(dest) = comm.check_rank(dest) else {
        return Status::ERR_RANK;
    };
    if tag < 0 {
        return Status::ERR_TAG;
    }
    if count > buf.len() {
        return Status::ERR_COUNT;
    }

    let data = buf.read(count);
    comm.world
        .lock()
        .mailboxes
        .entry((comm.rank, dest, tag))
        .or_default()
        .push_back(data);
    *request = Request::done(Status::SUCCESS);
    Status::SUCCESS
}

/// Receive up to `count` elements from `source` with `tag`.
///
/// A longer message completes with [`Status::ERR_TRUNCATE`] after the first
/// `count` elements were written.
pub fn irecv(
    buf: &Buffer,
    count: usize,
    source: i32,
    tag: i32,
    comm: &Comm,
    request: &mut Request,
) -> Status {
    let Some(source) = comm.check_rank(source) else {
        return Status::ERR_RANK;
    };
    if tag < 0 {
        return Status::ERR_TAG;
    }
    if count > buf.len() {
        return Status::ERR_COUNT;
    }

    *request = Request::pending(RequestState::Receive {
        world: Arc::clone(&comm.world),
        key: (source, comm.rank, tag),
        buf: buf.clone(),
        count,
    });
    Status::SUCCESS
}

/// Non-blocking barrier: completes once every rank has entered it.
pub fn ibarrier(comm: &Comm, request: &mut Request) -> Status {
    let seq = comm.next_collective();
    comm.world.lock().barriers.entry(seq).or_default().arrived += 1;
    *request = Request::pending(RequestState::Barrier {
        world: Arc::clone(&comm.world),
        seq,
    });
    Status::SUCCESS
}

/// Start a generalized request whose completion is signalled by user code.
pub fn grequest_start(request: &mut Request) -> GrequestHandle {
    let state = Arc::new(OnceLock::new());
    *request = Request::pending(RequestState::Generalized(Arc::clone(&state)));
    GrequestHandle { state }
}

/// Completion side of a generalized request.
#[derive(Clone, Debug)]
pub struct GrequestHandle {
    state: Arc<OnceLock<Status>>,
}

impl GrequestHandle {
    /// Mark the request complete. Only the first call has an effect.
    pub fn complete(&self, status: Status) -> bool {
        self.state.set(status).is_ok()
    }

    pub fn is_complete(&self) -> bool {
        self.state.get().is_some()
    }
}

#[derive(Default)]
enum RequestState {
    #[default]
    Null,
    Done(Status),
    Broadcast {
        world: Arc<WorldShared>,
        seq: u64,
        buf: Buffer,
        count: usize,
    },
    Receive {
        world: Arc<WorldShared>,
        key: MailboxKey,
        buf: Buffer,
        count: usize,
    },
    Barrier {
        world: Arc<WorldShared>,
        seq: u64,
    },
    Generalized(Arc<OnceLock<Status>>),
}

/// Native request handle of the loopback world.
///
/// The default value is the null request.
#[derive(Default)]
pub struct Request {
    state: RequestState,
}

impl Request {
    fn pending(state: RequestState) -> Self {
        Self { state }
    }

    fn done(status: Status) -> Self {
        Self {
            state: RequestState::Done(status),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self.state, RequestState::Null)
    }
}

impl NativeRequest for Request {
    fn test(&mut self) -> Option<Status> {
        let status = match &self.state {
            RequestState::Null => return Some(Status::SUCCESS),
            RequestState::Done(status) => *status,
            RequestState::Broadcast {
                world,
                seq,
                buf,
                count,
            } => world.take_broadcast(*seq, buf, *count)?,
            RequestState::Receive {
                world,
                key,
                buf,
                count,
            } => world.take_message(*key, buf, *count)?,
            RequestState::Barrier { world, seq } => world.leave_barrier(*seq)?,
            RequestState::Generalized(state) => *state.get()?,
        };
        self.state = RequestState::Null;
        Some(status)
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.state {
            RequestState::Null => "null",
            RequestState::Done(_) => "done",
            RequestState::Broadcast { .. } => "broadcast",
            RequestState::Receive { .. } => "receive",
            RequestState::Barrier { .. } => "barrier",
            RequestState::Generalized(_) => "generalized",
        };
        f.debug_struct("Request").field("kind", &kind).finish()
    }
}
