//! In-process host: the arena document, JSON files on disk and a virtual
//! clock that makes debounce timing deterministic.

pub mod clock;
pub mod session;
pub mod storage;

pub use clock::{FiredTimer, TestClock};
pub use session::Session;
pub use storage::FileStorage;
