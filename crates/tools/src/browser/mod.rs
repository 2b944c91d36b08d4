//! Browser access for action handlers.
//!
//! - `backend`: the `BrowserBackend` trait handlers are written against
//! - `cdp`: Chrome DevTools Protocol client over WebSocket
//! - `session`: CDP-backed implementation mapping numeric tab ids to targets
//! - `snapshot`: per-tab interactive element cache

pub mod backend;
pub mod cdp;
pub mod session;
pub mod snapshot;

pub use backend::{BrowserBackend, TabInfo};
pub use session::CdpBackend;
pub use snapshot::{InteractiveNode, InteractiveSnapshot, NodeType, Rect, SnapshotCache};
