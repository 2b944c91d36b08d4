//! Per-tab cache of the last interactive-element snapshot.
//!
//! Lets click/type actions resolve on-screen coordinates without fetching a
//! second snapshot. The rect index is always rebuilt from the snapshot it
//! belongs to and both are swapped in under one write lock.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn center(&self) -> (f64, f64) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    Clickable,
    Typeable,
    Selectable,
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractiveNode {
    pub node_id: i64,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rect: Option<Rect>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractiveSnapshot {
    pub snapshot_id: u64,
    pub timestamp: i64,
    pub elements: Vec<InteractiveNode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hierarchical_structure: Option<String>,
    pub processing_time_ms: u64,
}

struct TabEntry {
    snapshot: Arc<InteractiveSnapshot>,
    rects: HashMap<i64, Rect>,
}

#[derive(Default)]
pub struct SnapshotCache {
    tabs: RwLock<HashMap<i64, TabEntry>>,
}

impl SnapshotCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<i64, TabEntry>> {
        self.tabs.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<i64, TabEntry>> {
        self.tabs.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Replaces the tab's snapshot and its rect index together.
    pub fn set(&self, tab_id: i64, snapshot: InteractiveSnapshot) {
        let rects: HashMap<i64, Rect> = snapshot
            .elements
            .iter()
            .filter_map(|el| el.rect.map(|r| (el.node_id, r)))
            .collect();
        debug!(
            tab_id,
            elements = snapshot.elements.len(),
            rects = rects.len(),
            "Cached snapshot"
        );
        let entry = TabEntry {
            snapshot: Arc::new(snapshot),
            rects,
        };
        self.write().insert(tab_id, entry);
    }

    pub fn get(&self, tab_id: i64) -> Option<Arc<InteractiveSnapshot>> {
        self.read().get(&tab_id).map(|e| e.snapshot.clone())
    }

    pub fn node_rect(&self, tab_id: i64, node_id: i64) -> Option<Rect> {
        self.read().get(&tab_id).and_then(|e| e.rects.get(&node_id).copied())
    }

    pub fn element(&self, tab_id: i64, node_id: i64) -> Option<InteractiveNode> {
        self.read().get(&tab_id).and_then(|e| {
            e.snapshot
                .elements
                .iter()
                .find(|el| el.node_id == node_id)
                .cloned()
        })
    }

    pub fn clear(&self, tab_id: i64) {
        if self.write().remove(&tab_id).is_some() {
            debug!(tab_id, "Cleared snapshot cache");
        }
    }

    pub fn clear_all(&self) {
        self.write().clear();
    }

    pub fn has(&self, tab_id: i64) -> bool {
        self.read().contains_key(&tab_id)
    }
}
