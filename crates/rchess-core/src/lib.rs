//! rchess-core: worker coordination of a multithreaded chess engine.
//!
//! A [`ThreadPool`] runs a [`SearchAlgorithm`] on every search thread and
//! picks the final answer from all of them. Several sessions, each with its
//! own pool, options and I/O, can run side by side in one process.

pub mod best_thread;
pub mod error;
pub mod limits;
pub mod main_thread;
pub mod options;
pub mod position;
pub mod root_moves;
pub mod search;
pub mod session;
pub mod session_io;
pub mod static_init;
pub mod supervisor;
pub mod tablebases;
pub mod thread;
pub mod thread_pool;
pub mod time;
pub mod tt;
pub mod types;
pub mod uci;

pub use best_thread::{ThreadSnapshot, select_best_thread};
pub use error::{SessionError, exit_status};
pub use limits::LimitsType;
pub use options::{OptionError, OptionsMap, UciOption};
pub use position::{PositionError, StateInfo, StateList};
pub use root_moves::{RootMove, RootMoves};
pub use search::{AlphaBeta, SearchAlgorithm, SearchContext, SearchParams};
pub use session::{SessionContext, SessionSetup, run_session, spawn_session};
pub use session_io::SessionIo;
pub use static_init::init_count;
pub use supervisor::{PipedSession, Script, ScriptStep, Transcript, drive_session, open_session, run_concurrent};
pub use tablebases::{EndgameTables, RootProbe, Tablebases, TbConfig};
pub use thread::{SearchThread, ThreadState, Worker};
pub use thread_pool::ThreadPool;
pub use types::{Depth, MAX_PLY, Value};
pub use uci::UciLoop;
