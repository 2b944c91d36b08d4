//! Browser-side half of the control plane: receives action requests over a
//! WebSocket, runs them one at a time, and answers each exactly once.

pub mod client;
pub mod controller;
pub mod response_queue;
pub mod tracker;
pub mod validator;

pub use client::{ConnectionState, ControllerClient};
pub use controller::{BrowserController, Transport};
pub use response_queue::ResponseQueue;
pub use tracker::{RequestStatus, RequestTracker, TrackedRequest, TrackerStats};
pub use validator::RequestValidator;
