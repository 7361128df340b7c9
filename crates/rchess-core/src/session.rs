//! One independently running engine instance.
//!
//! A session owns its options, transposition table, time manager, tablebase
//! registry and tuning parameters. Nothing in a [`SessionContext`] is shared
//! with another session; the only process-wide state is the read-only
//! [`StaticTables`], built once behind a mutex.

use std::io::{Read, Write};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::RwLock;

use crate::error::SessionError;
use crate::options::OptionsMap;
use crate::search::{AlphaBeta, SearchAlgorithm, SearchParams};
use crate::session_io::SessionIo;
use crate::static_init::{self, StaticTables};
use crate::tablebases::{EndgameTables, Tablebases};
use crate::thread_pool::ThreadPool;
use crate::time::TimeManagement;
use crate::tt::TranspositionTable;
use crate::uci::{self, UciLoop};

/// How to build a session.
#[derive(Clone)]
pub struct SessionSetup {
    name: String,
    algorithm: Arc<dyn SearchAlgorithm>,
    tablebases: Option<Arc<dyn EndgameTables>>,
    tune: bool,
    options: Vec<(String, String)>,
    banner: bool,
}

impl SessionSetup {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            algorithm: Arc::new(AlphaBeta),
            tablebases: None,
            tune: false,
            options: Vec::new(),
            banner: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn with_algorithm(mut self, algorithm: Arc<dyn SearchAlgorithm>) -> Self {
        self.algorithm = algorithm;
        self
    }

    /// Replaces the built-in file registry. Each session should get its own
    /// instance.
    pub fn with_tablebases(mut self, tablebases: Arc<dyn EndgameTables>) -> Self {
        self.tablebases = Some(tablebases);
        self
    }

    /// Exposes the search parameters as options.
    pub fn with_tuning(mut self, tune: bool) -> Self {
        self.tune = tune;
        self
    }

    /// Initial option value, applied before the pool is built.
    pub fn with_option(mut self, name: &str, value: &str) -> Self {
        self.options.push((name.to_string(), value.to_string()));
        self
    }

    /// Print the engine banner when the session starts.
    pub fn with_banner(mut self, banner: bool) -> Self {
        self.banner = banner;
        self
    }
}

/// Configuration and shared tables private to one session.
pub struct SessionContext {
    name: String,
    io: Arc<SessionIo>,
    options: RwLock<OptionsMap>,
    tt: TranspositionTable,
    time: RwLock<TimeManagement>,
    tablebases: Arc<dyn EndgameTables>,
    params: RwLock<SearchParams>,
    algorithm: Arc<dyn SearchAlgorithm>,
    tables: &'static StaticTables,
}

impl SessionContext {
    pub fn new(setup: SessionSetup, io: Arc<SessionIo>) -> Self {
        let tables = static_init::init();

        let mut params = SearchParams::default();
        let mut options = OptionsMap::with_defaults();
        if setup.tune {
            params.register_options(&mut options);
        }
        for (name, value) in &setup.options {
            if let Err(e) = options.set(name, value) {
                log::warn!("[{}] {e}", setup.name);
            }
        }

        if setup.tune {
            params.read_options(&options);
        }
        let hash_mb = options.int("Hash").max(1) as usize;

        Self {
            tt: TranspositionTable::new(hash_mb),
            tablebases: setup.tablebases.unwrap_or_else(|| Arc::new(Tablebases::new())),
            name: setup.name,
            io,
            options: RwLock::new(options),
            time: RwLock::new(TimeManagement::new()),
            params: RwLock::new(params),
            algorithm: setup.algorithm,
            tables,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn io(&self) -> &Arc<SessionIo> {
        &self.io
    }

    pub fn options(&self) -> &RwLock<OptionsMap> {
        &self.options
    }

    pub fn tt(&self) -> &TranspositionTable {
        &self.tt
    }

    pub fn time(&self) -> &RwLock<TimeManagement> {
        &self.time
    }

    pub fn tablebases(&self) -> &Arc<dyn EndgameTables> {
        &self.tablebases
    }

    pub fn params(&self) -> &RwLock<SearchParams> {
        &self.params
    }

    pub fn algorithm(&self) -> &dyn SearchAlgorithm {
        self.algorithm.as_ref()
    }

    pub fn tables(&self) -> &'static StaticTables {
        self.tables
    }
}

/// Runs one session on the calling thread until `quit` or end of input.
///
/// All search threads are joined before this returns.
pub fn run_session<R, W>(setup: SessionSetup, input: R, output: W) -> Result<(), SessionError>
where
    R: Read + Send + 'static,
    W: Write + Send + 'static,
{
    let name = setup.name.clone();
    let banner = setup.banner;
    let io = Arc::new(SessionIo::new(&name, input, output));
    let session = Arc::new(SessionContext::new(setup, Arc::clone(&io)));
    log::info!("[{name}] session started");

    if banner {
        io.println(&format!("{} by {}", uci::engine_info(), uci::ENGINE_AUTHOR))
            .map_err(SessionError::Io)?;
    }

    let mut pool = ThreadPool::new(Arc::clone(&session));
    let threads = session.options().read().int("Threads").max(1) as usize;
    pool.set(threads).map_err(SessionError::Spawn)?;
    pool.search_clear();

    let mut uci = UciLoop::new(pool);
    let result = uci.run();
    uci.shutdown();

    match &result {
        Ok(()) => log::info!("[{name}] session finished"),
        Err(e) => log::error!("[{name}] session failed: {e}"),
    }
    result
}

/// Starts [`run_session`] on a dedicated thread.
///
/// If the thread cannot be created, both streams are dropped (closed) before
/// the error is returned.
pub fn spawn_session<R, W>(
    setup: SessionSetup,
    input: R,
    output: W,
) -> Result<JoinHandle<Result<(), SessionError>>, SessionError>
where
    R: Read + Send + 'static,
    W: Write + Send + 'static,
{
    std::thread::Builder::new()
        .name(format!("session-{}", setup.name))
        .spawn(move || run_session(setup, input, output))
        .map_err(SessionError::Spawn)
}
