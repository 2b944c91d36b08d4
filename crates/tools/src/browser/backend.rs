use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tabrelay_core::Result;

use super::snapshot::{InteractiveNode, Rect};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabInfo {
    pub id: i64,
    pub url: String,
    pub title: String,
    pub active: bool,
}

/// Browser operations the action handlers need. Tab ids are the numeric ids
/// handed out by the backend and stay stable while the tab is open.
#[async_trait]
pub trait BrowserBackend: Send + Sync {
    async fn list_tabs(&self) -> Result<Vec<TabInfo>>;

    async fn active_tab(&self) -> Result<TabInfo>;

    /// Navigates `tab_id`, or opens a new tab when `None`.
    async fn navigate(&self, tab_id: Option<i64>, url: &str) -> Result<TabInfo>;

    async fn close_tab(&self, tab_id: i64) -> Result<()>;

    /// Interactive elements currently in the tab, with viewport rects.
    async fn interactive_elements(&self, tab_id: i64) -> Result<Vec<InteractiveNode>>;

    async fn click_at(&self, tab_id: i64, x: f64, y: f64) -> Result<()>;

    /// Scrolls the node into view and returns its fresh rect.
    async fn locate_node(&self, tab_id: i64, node_id: i64) -> Result<Rect>;

    async fn type_into(&self, tab_id: i64, node_id: i64, text: &str, clear: bool) -> Result<()>;

    /// Base64-encoded PNG.
    async fn screenshot(&self, tab_id: i64) -> Result<String>;

    async fn evaluate(&self, tab_id: i64, code: &str) -> Result<Value>;

    async fn scroll_by(&self, tab_id: i64, delta_y: f64) -> Result<()>;
}
