//! Search threads.
//!
//! Each `SearchThread` owns one OS thread parked in [`idle_loop`] on its own
//! condition variable. The lifecycle state is only changed with the state
//! lock held, and every change is followed by a notification, so a wake-up
//! can never be lost between a check and a wait.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::JoinHandle;

use chess::Board;
use parking_lot::{Condvar, Mutex};

use crate::main_thread::{self, MainThreadState};
use crate::position::{StateInfo, StateList};
use crate::root_moves::RootMoves;
use crate::search::SearchContext;
use crate::search::history::HistoryTables;
use crate::tablebases::TbConfig;
use crate::thread_pool::PoolShared;
use crate::types::Depth;

const SEARCH_STACK_SIZE: usize = 16 * 1024 * 1024;

/// Lifecycle of a search thread.
///
/// Exit is a state of its own so that a termination request can never be
/// mistaken for a search request by the parked thread.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ThreadState {
    Idle,
    Searching,
    ExitRequested,
}

/// Counters read by other threads while the owner is searching.
#[repr(C, align(64))]
#[derive(Default)]
pub(crate) struct ThreadCounters {
    nodes: AtomicU64,
    tb_hits: AtomicU64,
    best_move_changes_bits: AtomicU64,
}

impl ThreadCounters {
    fn reset(&self) {
        self.nodes.store(0, Ordering::Relaxed);
        self.tb_hits.store(0, Ordering::Relaxed);
        self.best_move_changes_bits.store(0f64.to_bits(), Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn nodes(&self) -> u64 {
        self.nodes.load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn tb_hits(&self) -> u64 {
        self.tb_hits.load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn best_move_changes(&self) -> f64 {
        f64::from_bits(self.best_move_changes_bits.load(Ordering::Relaxed))
    }

    #[inline]
    pub(crate) fn set_best_move_changes(&self, v: f64) {
        self.best_move_changes_bits.store(v.to_bits(), Ordering::Relaxed);
    }
}

/// Per-thread data handed to the search algorithm.
pub struct Worker {
    id: usize,
    pub root_board: Board,
    /// History tail of the root: fields a board snapshot cannot carry.
    pub root_state: StateInfo,
    /// Game history shared read-only by every worker of the pool.
    pub game_states: Arc<StateList>,
    pub root_moves: RootMoves,
    pub root_depth: Depth,
    pub completed_depth: Depth,
    pub sel_depth: i32,
    pub nmp_min_ply: i32,
    pub pv_idx: usize,
    pub tb_config: TbConfig,
    pub history: Box<HistoryTables>,
    /// Present only on the main thread (slot 0).
    pub main: Option<MainThreadState>,
    counters: Arc<ThreadCounters>,
}

impl Worker {
    fn new(id: usize, counters: Arc<ThreadCounters>) -> Self {
        let board = Board::default();
        Self {
            id,
            root_board: board,
            root_state: StateInfo::root(&board, 0, 0),
            game_states: Arc::new(Vec::new()),
            root_moves: Vec::new(),
            root_depth: 0,
            completed_depth: 0,
            sel_depth: 0,
            nmp_min_ply: 0,
            pv_idx: 0,
            tb_config: TbConfig::default(),
            history: Box::new(HistoryTables::new()),
            main: (id == 0).then(MainThreadState::new),
            counters,
        }
    }

    #[inline]
    pub fn id(&self) -> usize {
        self.id
    }

    #[inline]
    pub fn is_main(&self) -> bool {
        self.main.is_some()
    }

    /// Only the owning thread writes its node counter, so a plain
    /// load/store pair is enough.
    #[inline]
    pub fn inc_nodes(&self) {
        let n = self.counters.nodes.load(Ordering::Relaxed);
        self.counters.nodes.store(n + 1, Ordering::Relaxed);
    }

    #[inline]
    pub fn nodes(&self) -> u64 {
        self.counters.nodes()
    }

    #[inline]
    pub fn add_tb_hits(&self, n: u64) {
        self.counters.tb_hits.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub fn tb_hits(&self) -> u64 {
        self.counters.tb_hits()
    }

    #[inline]
    pub fn best_move_changes(&self) -> f64 {
        self.counters.best_move_changes()
    }

    #[inline]
    pub fn add_best_move_change(&self) {
        let v = self.counters.best_move_changes();
        self.counters.set_best_move_changes(v + 1.0);
    }

    /// Periodic stop check; a no-op on helper threads.
    #[inline]
    pub fn check_time(&mut self, ctx: &SearchContext<'_>) {
        if let Some(main) = self.main.as_mut() {
            main.check_time(ctx);
        }
    }

    /// Prepares the worker for a new `go`.
    pub(crate) fn prepare(
        &mut self,
        board: &Board,
        states: &Arc<StateList>,
        root_moves: &RootMoves,
        tb_config: TbConfig,
    ) {
        self.counters.reset();
        self.nmp_min_ply = 0;
        self.root_depth = 0;
        self.completed_depth = 0;
        self.sel_depth = 0;
        self.pv_idx = 0;
        self.root_moves = root_moves.clone();
        self.root_board = *board;
        self.root_state = states
            .last()
            .copied()
            .unwrap_or_else(|| StateInfo::root(board, 0, 0));
        self.game_states = Arc::clone(states);
        self.tb_config = tb_config;
    }
}

pub(crate) struct ThreadInner {
    id: usize,
    state: Mutex<ThreadState>,
    condvar: Condvar,
    worker: Mutex<Worker>,
    pub(crate) counters: Arc<ThreadCounters>,
}

impl ThreadInner {
    pub(crate) fn start_searching(&self) {
        {
            let mut state = self.state.lock();
            assert_eq!(
                *state,
                ThreadState::Idle,
                "thread {} started while not idle",
                self.id
            );
            *state = ThreadState::Searching;
        }
        // waiters of wait_for_search_finished park on the same condvar
        self.condvar.notify_all();
    }

    pub(crate) fn wait_for_search_finished(&self) {
        let mut state = self.state.lock();
        while *state == ThreadState::Searching {
            self.condvar.wait(&mut state);
        }
    }

    pub(crate) fn state(&self) -> ThreadState {
        *self.state.lock()
    }

    pub(crate) fn with_worker<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut Worker) -> R,
    {
        let mut worker = self.worker.lock();
        f(&mut worker)
    }
}

pub struct SearchThread {
    inner: Arc<ThreadInner>,
    handle: Option<JoinHandle<()>>,
}

impl SearchThread {
    /// Spawns the OS thread and returns once it is parked in its idle loop.
    pub(crate) fn spawn(id: usize, pool: Arc<PoolShared>) -> io::Result<Self> {
        let counters = Arc::new(ThreadCounters::default());
        let inner = Arc::new(ThreadInner {
            id,
            // the idle loop moves this to Idle once the thread is running
            state: Mutex::new(ThreadState::Searching),
            condvar: Condvar::new(),
            worker: Mutex::new(Worker::new(id, Arc::clone(&counters))),
            counters,
        });
        let name = format!("{}-search-{id}", pool.session.name());
        let thread_inner = Arc::clone(&inner);
        let handle = std::thread::Builder::new()
            .name(name)
            .stack_size(SEARCH_STACK_SIZE)
            .spawn(move || idle_loop(thread_inner, pool))?;

        let thread = Self {
            inner,
            handle: Some(handle),
        };
        thread.wait_for_search_finished();
        Ok(thread)
    }

    #[inline]
    pub fn id(&self) -> usize {
        self.inner.id
    }

    /// Slot 0 of a pool is the main thread.
    #[inline]
    pub fn is_main(&self) -> bool {
        self.inner.id == 0
    }

    pub fn state(&self) -> ThreadState {
        self.inner.state()
    }

    /// Wakes the thread to run one search. Returns immediately.
    pub fn start_searching(&self) {
        self.inner.start_searching();
    }

    /// Blocks until the thread is no longer searching.
    pub fn wait_for_search_finished(&self) {
        self.inner.wait_for_search_finished();
    }

    /// Resets the learning tables. The thread must not be searching.
    pub fn clear(&self) {
        debug_assert_ne!(self.state(), ThreadState::Searching);
        self.inner.with_worker(|w| w.history.clear());
    }

    pub fn with_worker<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut Worker) -> R,
    {
        self.inner.with_worker(f)
    }

    pub fn nodes(&self) -> u64 {
        self.inner.counters.nodes()
    }

    pub fn tb_hits(&self) -> u64 {
        self.inner.counters.tb_hits()
    }

    pub fn best_move_changes(&self) -> f64 {
        self.inner.counters.best_move_changes()
    }

    pub(crate) fn inner(&self) -> &Arc<ThreadInner> {
        &self.inner
    }
}

impl Drop for SearchThread {
    fn drop(&mut self) {
        {
            let mut state = self.inner.state.lock();
            assert_ne!(
                *state,
                ThreadState::Searching,
                "search thread {} destroyed while searching",
                self.inner.id
            );
            *state = ThreadState::ExitRequested;
        }
        self.inner.condvar.notify_all();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("search thread {} panicked", self.inner.id);
            }
        }
    }
}

fn idle_loop(inner: Arc<ThreadInner>, pool: Arc<PoolShared>) {
    loop {
        {
            let mut state = inner.state.lock();
            *state = ThreadState::Idle;
            inner.condvar.notify_all();

            while *state == ThreadState::Idle {
                inner.condvar.wait(&mut state);
            }
            if *state == ThreadState::ExitRequested {
                log::trace!("search thread {} exiting", inner.id);
                return;
            }
        }

        let mut worker = inner.worker.lock();
        if worker.is_main() {
            main_thread::search(&mut worker, &pool);
        } else {
            let ctx = SearchContext::new(&pool);
            pool.session.algorithm().search(&mut worker, &ctx);
        }
    }
}
