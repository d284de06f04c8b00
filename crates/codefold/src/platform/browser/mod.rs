//! Browser host: the live page through web-sys, `localStorage`, and zoon
//! tasks and timers.

pub mod dom;
pub mod runtime;
pub mod storage;

pub use dom::{BrowserDom, BrowserNode};
pub use runtime::{start, start_with};
pub use storage::LocalStorage;
