//! The pool of search threads owned by one session.
//!
//! Slot 0 is always the main thread. The pool is only resized while the
//! main thread is idle; `set` waits for it first.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use chess::Board;
use parking_lot::{Mutex, RwLock};
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;

use crate::best_thread::{ThreadSnapshot, select_best_thread};
use crate::limits::LimitsType;
use crate::position::StateList;
use crate::root_moves::build_root_moves;
use crate::session::SessionContext;
use crate::tablebases::{TbConfig, rank_root_moves};
use crate::thread::{SearchThread, ThreadInner, ThreadState, Worker};

/// State shared between the pool owner and its running threads.
pub(crate) struct PoolShared {
    pub(crate) session: Arc<SessionContext>,
    pub(crate) stop: AtomicBool,
    pub(crate) increase_depth: AtomicBool,
    /// Main thread: searching on the opponent's time.
    pub(crate) ponder: AtomicBool,
    /// Main thread: out of time while pondering, stop as soon as ponderhit arrives.
    pub(crate) stop_on_ponderhit: AtomicBool,
    pub(crate) limits: RwLock<LimitsType>,
    pub(crate) skills_rng: Mutex<Xoshiro256PlusPlus>,
    threads: RwLock<Vec<Arc<ThreadInner>>>,
}

impl PoolShared {
    pub(crate) fn thread_count(&self) -> usize {
        self.threads.read().len()
    }

    /// Wakes every thread except the main one.
    pub(crate) fn start_helpers(&self) {
        for th in self.threads.read().iter().skip(1) {
            th.start_searching();
        }
    }

    /// Waits for every thread except the main one.
    pub(crate) fn wait_helpers(&self) {
        let helpers: Vec<_> = self.threads.read().iter().skip(1).cloned().collect();
        for th in helpers {
            th.wait_for_search_finished();
        }
    }

    pub(crate) fn nodes_searched(&self) -> u64 {
        self.threads.read().iter().map(|th| th.counters.nodes()).sum()
    }

    pub(crate) fn tb_hits(&self) -> u64 {
        self.threads.read().iter().map(|th| th.counters.tb_hits()).sum()
    }

    pub(crate) fn take_best_move_changes(&self) -> f64 {
        self.threads
            .read()
            .iter()
            .map(|th| {
                let v = th.counters.best_move_changes();
                th.counters.set_best_move_changes(0.0);
                v
            })
            .sum()
    }

    /// Slot of the thread whose result should be played.
    ///
    /// The main thread calls this while it holds its own worker, so it
    /// passes that worker for slot 0 instead of locking it again.
    pub(crate) fn best_thread_id(&self, locked_main: Option<&Worker>) -> usize {
        let threads: Vec<_> = self.threads.read().iter().cloned().collect();
        let snapshots: Vec<_> = threads
            .iter()
            .enumerate()
            .map(|(id, th)| match locked_main {
                Some(main) if id == 0 => ThreadSnapshot::of(main),
                _ => th.with_worker(|w| ThreadSnapshot::of(w)),
            })
            .collect();
        select_best_thread(&snapshots)
    }

    pub(crate) fn with_worker<F, R>(&self, id: usize, f: F) -> Option<R>
    where
        F: FnOnce(&mut Worker) -> R,
    {
        let th = self.threads.read().get(id).cloned()?;
        Some(th.with_worker(f))
    }
}

pub struct ThreadPool {
    threads: Vec<SearchThread>,
    shared: Arc<PoolShared>,
    /// Game history handed over by the last `start_thinking` that carried one.
    setup_states: Option<Arc<StateList>>,
}

impl ThreadPool {
    /// Creates an empty pool bound to `session`. Call [`ThreadPool::set`] to start threads.
    pub fn new(session: Arc<SessionContext>) -> Self {
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_nanos() as u64);
        Self {
            threads: Vec::new(),
            shared: Arc::new(PoolShared {
                session,
                stop: AtomicBool::new(false),
                increase_depth: AtomicBool::new(true),
                ponder: AtomicBool::new(false),
                stop_on_ponderhit: AtomicBool::new(false),
                limits: RwLock::new(LimitsType::default()),
                skills_rng: Mutex::new(Xoshiro256PlusPlus::seed_from_u64(seed)),
                threads: RwLock::new(Vec::new()),
            }),
            setup_states: None,
        }
    }

    pub fn session(&self) -> &Arc<SessionContext> {
        &self.shared.session
    }

    /// Resizes the pool to exactly `requested` threads.
    ///
    /// Existing threads are joined last-first after the main thread has
    /// finished. New threads start with the main thread in slot 0; then
    /// everything that depends on the thread count is rebuilt.
    pub fn set(&mut self, requested: usize) -> io::Result<()> {
        self.shutdown();

        if requested > 0 {
            for id in 0..requested {
                match SearchThread::spawn(id, Arc::clone(&self.shared)) {
                    Ok(th) => self.threads.push(th),
                    Err(e) => {
                        log::error!("[{}] failed to spawn search thread {id}: {e}", self.session().name());
                        self.shutdown();
                        return Err(e);
                    }
                }
            }
            *self.shared.threads.write() = self.threads.iter().map(|th| Arc::clone(th.inner())).collect();

            self.clear();
            let session = self.session();
            let hash_mb = session.options().read().int("Hash").max(1) as usize;
            session.tt().resize(hash_mb, requested);
            session.params().write().init(requested);
        }
        log::debug!("[{}] thread pool resized to {requested}", self.session().name());
        Ok(())
    }

    /// Waits for the main thread, then destroys every thread in reverse order.
    fn shutdown(&mut self) {
        if let Some(main) = self.threads.first() {
            main.wait_for_search_finished();
        }
        self.shared.threads.write().clear();
        while let Some(th) = self.threads.pop() {
            drop(th);
        }
    }

    pub fn size(&self) -> usize {
        self.threads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }

    pub fn threads(&self) -> &[SearchThread] {
        &self.threads
    }

    pub fn main(&self) -> Option<&SearchThread> {
        self.threads.first()
    }

    /// Resets every thread's learning tables and the main thread's
    /// iteration tracking.
    pub fn clear(&self) {
        for th in &self.threads {
            th.clear();
        }
        if let Some(main) = self.main() {
            main.with_worker(|w| {
                if let Some(state) = w.main.as_mut() {
                    state.reset();
                }
            });
        }
    }

    /// New-game reset: hash table, thread tables and tablebase registry.
    pub fn search_clear(&self) {
        if let Some(main) = self.main() {
            main.wait_for_search_finished();
        }
        let session = self.session();
        session.tt().clear(self.size());
        self.clear();
        let path = session.options().read().string("SyzygyPath").to_string();
        session.tablebases().init(&path);
    }

    /// Starts a search on `board` and returns immediately.
    ///
    /// `states` is taken out of the caller: after the call it is `None` and
    /// the pool owns the history. Passing `None` reuses the history from the
    /// previous call.
    pub fn start_thinking(
        &mut self,
        board: &Board,
        states: &mut Option<StateList>,
        limits: LimitsType,
        ponder_mode: bool,
    ) {
        let Some(main) = self.threads.first() else {
            log::warn!("[{}] go ignored: no search threads", self.session().name());
            return;
        };
        main.wait_for_search_finished();

        let shared = &self.shared;
        shared.stop_on_ponderhit.store(false, Ordering::Relaxed);
        shared.stop.store(false, Ordering::Relaxed);
        shared.increase_depth.store(true, Ordering::Relaxed);
        shared.ponder.store(ponder_mode, Ordering::Relaxed);

        let mut root_moves = build_root_moves(board, limits.searchmoves.as_deref());

        assert!(
            states.is_some() || self.setup_states.is_some(),
            "start_thinking needs a position history"
        );
        if let Some(list) = states.take() {
            self.setup_states = Some(Arc::new(list));
        }
        let Some(setup) = self.setup_states.as_ref().map(Arc::clone) else {
            return;
        };

        let session = &shared.session;
        let tb_config = if root_moves.is_empty() {
            TbConfig::default()
        } else {
            let rule50 = setup.last().map_or(0, |st| st.rule50);
            let options = session.options().read();
            rank_root_moves(session.tablebases().as_ref(), &options, board, rule50, &mut root_moves)
        };

        *shared.limits.write() = limits;

        for th in &self.threads {
            th.with_worker(|w| w.prepare(board, &setup, &root_moves, tb_config));
        }

        main.start_searching();
    }

    /// Wakes every thread except the main one.
    pub fn start_searching(&self) {
        self.shared.start_helpers();
    }

    /// Waits for every thread except the main one.
    pub fn wait_for_search_finished(&self) {
        self.shared.wait_helpers();
    }

    /// Picks the thread whose result should be played.
    ///
    /// Only meaningful once every thread is idle.
    pub fn get_best_thread(&self) -> Option<&SearchThread> {
        debug_assert!(self.threads.iter().all(|th| th.state() != ThreadState::Searching));
        if self.threads.is_empty() {
            return None;
        }
        self.threads.get(self.shared.best_thread_id(None))
    }

    pub fn nodes_searched(&self) -> u64 {
        self.shared.nodes_searched()
    }

    pub fn tb_hits(&self) -> u64 {
        self.shared.tb_hits()
    }

    /// Requests every thread to stop; the search finishes asynchronously.
    pub fn stop(&self) {
        self.shared.stop.store(true, Ordering::Relaxed);
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.stop.load(Ordering::Relaxed)
    }

    /// The opponent played the expected move: continue as a normal search,
    /// or stop at once if the budget already ran out while pondering.
    pub fn ponderhit(&self) {
        if self.shared.stop_on_ponderhit.load(Ordering::Relaxed) {
            self.stop();
        }
        self.shared.ponder.store(false, Ordering::Relaxed);
    }
}

impl Drop for ThreadPool {
    /// Destroys the threads without waiting: dropping a pool that is still
    /// searching is a bug and trips the thread destructor's assertion.
    fn drop(&mut self) {
        self.shared.threads.write().clear();
        while let Some(th) = self.threads.pop() {
            drop(th);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::position;
    use crate::search::{SearchAlgorithm, SearchContext};
    use crate::session::SessionSetup;
    use crate::search::AlphaBeta;
    use crate::session_io::{Capture, SessionIo};
    use crate::types::Value;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    /// Blocks every worker until the gate opens and counts invocations.
    struct GatedSearch {
        open: parking_lot::Mutex<bool>,
        cv: parking_lot::Condvar,
        calls: [AtomicUsize; 8],
    }

    impl GatedSearch {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                open: parking_lot::Mutex::new(false),
                cv: parking_lot::Condvar::new(),
                calls: Default::default(),
            })
        }

        fn open(&self) {
            *self.open.lock() = true;
            self.cv.notify_all();
        }
    }

    impl SearchAlgorithm for GatedSearch {
        fn search(&self, worker: &mut Worker, _ctx: &SearchContext<'_>) {
            self.calls[worker.id()].fetch_add(1, Ordering::SeqCst);
            let mut open = self.open.lock();
            while !*open {
                self.cv.wait(&mut open);
            }
        }
    }

    /// Returns at once, leaving the root moves untouched.
    struct Instant;

    impl SearchAlgorithm for Instant {
        fn search(&self, worker: &mut Worker, _ctx: &SearchContext<'_>) {
            worker.completed_depth = 1;
        }
    }

    /// Slot 2 finds a tablebase win on the second root move; the others
    /// agree on the first one with a small edge.
    struct TbWinOnSlotTwo;

    impl SearchAlgorithm for TbWinOnSlotTwo {
        fn search(&self, worker: &mut Worker, _ctx: &SearchContext<'_>) {
            worker.completed_depth = 5;
            if worker.id() == 2 {
                worker.root_moves.swap(0, 1);
                worker.root_moves[0].score = Value::TB_WIN_IN_MAX_PLY + 5;
            } else {
                worker.root_moves[0].score = Value::new(30);
            }
        }
    }

    fn pool_with(algorithm: Arc<dyn SearchAlgorithm>) -> ThreadPool {
        let setup = SessionSetup::new("test").with_algorithm(algorithm).with_option("Hash", "1");
        let io = Arc::new(SessionIo::new("test", std::io::empty(), std::io::sink()));
        ThreadPool::new(Arc::new(SessionContext::new(setup, io)))
    }

    fn pool_with_output(algorithm: Arc<dyn SearchAlgorithm>, sink: Capture) -> ThreadPool {
        let setup = SessionSetup::new("test").with_algorithm(algorithm).with_option("Hash", "1");
        let io = Arc::new(SessionIo::new("test", std::io::empty(), sink));
        ThreadPool::new(Arc::new(SessionContext::new(setup, io)))
    }

    fn snapshots(pool: &ThreadPool) -> Vec<ThreadSnapshot> {
        pool.threads().iter().map(|th| th.with_worker(|w| ThreadSnapshot::of(w))).collect()
    }

    #[test]
    fn set_resizes_with_single_main_in_slot_zero() {
        let mut pool = pool_with(Arc::new(Instant));
        for n in [3, 1, 0, 4, 0] {
            pool.set(n).unwrap();
            assert_eq!(pool.size(), n);
            let mains: Vec<_> = pool.threads().iter().filter(|th| th.is_main()).map(SearchThread::id).collect();
            if n == 0 {
                assert!(mains.is_empty());
            } else {
                assert_eq!(mains, vec![0]);
                assert_eq!(pool.session().params().read().thread_count(), n);
            }
            assert!(pool.threads().iter().all(|th| th.state() == ThreadState::Idle));
        }
    }

    #[test]
    fn helpers_start_once_and_report_idle() {
        let gate = GatedSearch::new();
        let mut pool = pool_with(gate.clone());
        pool.set(4).unwrap();

        pool.start_searching();
        for th in &pool.threads()[1..] {
            assert_eq!(th.state(), ThreadState::Searching);
        }
        assert_eq!(pool.main().unwrap().state(), ThreadState::Idle);

        gate.open();
        pool.wait_for_search_finished();
        for th in &pool.threads()[1..] {
            assert_eq!(th.state(), ThreadState::Idle);
            assert_eq!(gate.calls[th.id()].load(Ordering::SeqCst), 1);
        }
        assert_eq!(gate.calls[0].load(Ordering::SeqCst), 0);
    }

    #[test]
    fn start_wait_cycles_never_lose_a_wakeup() {
        const CYCLES: usize = 3000;
        let mut pool = pool_with(Arc::new(Instant));
        pool.set(5).unwrap();
        let pool = Arc::new(pool);
        let running = Arc::new(AtomicBool::new(true));
        let (done_tx, done_rx) = crossbeam_channel::unbounded::<&str>();

        // a second waiter parks on the same condvars while cycles run
        let observer = {
            let (pool, running, done_tx) = (Arc::clone(&pool), Arc::clone(&running), done_tx.clone());
            std::thread::spawn(move || {
                while running.load(Ordering::SeqCst) {
                    pool.wait_for_search_finished();
                }
                let _ = done_tx.send("observer");
            })
        };
        let driver = {
            let (pool, running) = (Arc::clone(&pool), Arc::clone(&running));
            std::thread::spawn(move || {
                let mut cycles = 0;
                for _ in 0..CYCLES {
                    pool.start_searching();
                    pool.wait_for_search_finished();
                    cycles += 1;
                }
                running.store(false, Ordering::SeqCst);
                let _ = done_tx.send("driver");
                cycles
            })
        };

        for _ in 0..2 {
            assert!(
                done_rx.recv_timeout(Duration::from_secs(60)).is_ok(),
                "start/wait cycles hung"
            );
        }
        assert_eq!(driver.join().unwrap(), CYCLES);
        observer.join().unwrap();
        assert!(pool.threads().iter().all(|th| th.state() == ThreadState::Idle));
    }

    #[test]
    fn get_best_thread_matches_main_thread_choice() {
        let sink = Capture::default();
        let mut pool = pool_with_output(Arc::new(TbWinOnSlotTwo), sink.clone());
        pool.set(3).unwrap();
        let (board, states) = position::startpos();
        let second = build_root_moves(&board, None)[1].pv[0];

        pool.start_thinking(&board, &mut Some(states), LimitsType::new(), false);
        pool.main().unwrap().wait_for_search_finished();

        assert_eq!(pool.get_best_thread().map(SearchThread::id), Some(2));
        assert_eq!(select_best_thread(&snapshots(&pool)), 2);
        let text = sink.text();
        assert!(text.lines().any(|l| l.starts_with(&format!("bestmove {second}"))), "{text}");
    }

    #[test]
    fn get_best_thread_agrees_with_snapshots_after_real_search() {
        let mut pool = pool_with(Arc::new(AlphaBeta));
        pool.set(3).unwrap();
        let (board, states) = position::setup(position::START_FEN, &["d2d4", "g8f6"]).unwrap();
        let mut limits = LimitsType::new();
        limits.movetime = 100;
        pool.start_thinking(&board, &mut Some(states), limits, false);
        pool.main().unwrap().wait_for_search_finished();

        let expected = select_best_thread(&snapshots(&pool));
        let first = pool.get_best_thread().map(SearchThread::id);
        assert_eq!(first, Some(expected));
        assert_eq!(pool.get_best_thread().map(SearchThread::id), first);
    }

    #[test]
    fn ponderhit_stops_when_budget_ran_out() {
        let pool = pool_with(Arc::new(Instant));
        pool.shared.ponder.store(true, Ordering::Relaxed);
        pool.ponderhit();
        assert!(!pool.shared.ponder.load(Ordering::Relaxed));
        assert!(!pool.is_stopped());

        pool.shared.ponder.store(true, Ordering::Relaxed);
        pool.shared.stop_on_ponderhit.store(true, Ordering::Relaxed);
        pool.ponderhit();
        assert!(pool.is_stopped());
    }

    #[test]
    fn start_thinking_takes_history_and_replicates_root() {
        let mut pool = pool_with(Arc::new(Instant));
        pool.set(3).unwrap();

        let (board, states) = position::setup(position::START_FEN, &["e2e4", "c7c5"]).unwrap();
        let mut states = Some(states);
        let mut limits = LimitsType::new();
        limits.depth = 1;
        pool.start_thinking(&board, &mut states, limits, false);
        assert!(states.is_none());

        pool.main().unwrap().wait_for_search_finished();
        for th in pool.threads() {
            th.with_worker(|w| {
                assert_eq!(w.root_board, board);
                assert_eq!(w.root_state.game_ply, 2);
                assert_eq!(w.game_states.len(), 3);
                assert_eq!(w.root_moves.len(), 30);
            });
        }

        // a second go without a new position reuses the retained history
        pool.start_thinking(&board, &mut None, LimitsType::new(), false);
        pool.main().unwrap().wait_for_search_finished();
        pool.main().unwrap().with_worker(|w| assert_eq!(w.game_states.len(), 3));
    }

    #[test]
    fn clear_resets_main_iteration_state() {
        let mut pool = pool_with(Arc::new(Instant));
        pool.set(2).unwrap();
        pool.main().unwrap().with_worker(|w| {
            let main = w.main.as_mut().unwrap();
            main.calls_cnt = 77;
            main.best_previous_score = crate::types::Value::new(12);
            main.previous_time_reduction = 0.3;
        });
        pool.clear();
        pool.main().unwrap().with_worker(|w| {
            let main = w.main.as_ref().unwrap();
            assert_eq!(main.calls_cnt, 0);
            assert_eq!(main.best_previous_score, crate::types::Value::INFINITE);
            assert_eq!(main.previous_time_reduction, 1.0);
        });
        assert!(pool.threads()[1].with_worker(|w| w.main.is_none()));
    }

    #[test]
    #[should_panic(expected = "destroyed while searching")]
    fn dropping_a_searching_pool_is_fatal() {
        let mut pool = pool_with(Arc::new(Instant));
        pool.set(1).unwrap();
        let (board, states) = position::startpos();
        let mut limits = LimitsType::new();
        // the main thread keeps searching until told to stop
        limits.infinite = true;
        pool.start_thinking(&board, &mut Some(states), limits, false);
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(pool.main().unwrap().state(), ThreadState::Searching);
        drop(pool);
    }
}
