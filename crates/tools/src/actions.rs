//! Built-in browser actions.
//!
//! Every handler works on a tab id; when the payload omits `tabId` the
//! backend's active tab is used. Actions that move or replace page content
//! (navigate, closeTab, scroll) drop the tab's cached snapshot so stale
//! coordinates are never reused.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tabrelay_core::Result;
use tracing::debug;

use crate::browser::{BrowserBackend, InteractiveNode, InteractiveSnapshot, SnapshotCache};
use crate::{parse_input, ActionHandler, ActionRegistry, ActionSchema};

const DEFAULT_SCROLL_PX: f64 = 600.0;

#[derive(Clone)]
pub struct ActionContext {
    pub backend: Arc<dyn BrowserBackend>,
    pub cache: Arc<SnapshotCache>,
}

impl ActionContext {
    async fn resolve_tab(&self, tab_id: Option<i64>) -> Result<i64> {
        match tab_id {
            Some(id) => Ok(id),
            None => Ok(self.backend.active_tab().await?.id),
        }
    }
}

/// Registers every built-in action on `registry`.
pub fn register_builtin_actions(registry: &ActionRegistry, ctx: ActionContext) {
    let handlers: Vec<Arc<dyn ActionHandler>> = vec![
        Arc::new(GetTabsAction { ctx: ctx.clone() }),
        Arc::new(GetActiveTabAction { ctx: ctx.clone() }),
        Arc::new(NavigateAction { ctx: ctx.clone() }),
        Arc::new(CloseTabAction { ctx: ctx.clone() }),
        Arc::new(SnapshotAction {
            ctx: ctx.clone(),
            next_snapshot_id: AtomicU64::new(1),
        }),
        Arc::new(ClickElementAction { ctx: ctx.clone() }),
        Arc::new(InputTextAction { ctx: ctx.clone() }),
        Arc::new(ScreenshotAction { ctx: ctx.clone() }),
        Arc::new(ExecuteJavaScriptAction { ctx: ctx.clone() }),
        Arc::new(ScrollAction { ctx: ctx.clone(), direction: ScrollDirection::Down }),
        Arc::new(ScrollAction { ctx, direction: ScrollDirection::Up }),
    ];
    for handler in handlers {
        registry.register(handler);
    }
}

/// Schemas of the built-in actions, for the agent side which has no backend.
pub fn builtin_schemas() -> Vec<ActionSchema> {
    vec![
        get_tabs_schema(),
        get_active_tab_schema(),
        navigate_schema(),
        close_tab_schema(),
        snapshot_schema(),
        click_schema(),
        input_text_schema(),
        screenshot_schema(),
        execute_js_schema(),
        scroll_schema(ScrollDirection::Down),
        scroll_schema(ScrollDirection::Up),
    ]
}

fn tab_only_parameters() -> Value {
    json!({
        "type": "object",
        "properties": {
            "tabId": {"type": "integer", "description": "Tab id; defaults to the active tab"}
        }
    })
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TabInput {
    #[serde(default)]
    tab_id: Option<i64>,
}

#[derive(Deserialize)]
struct EmptyInput {}

// ─── getTabs / getActiveTab ───────────────────────────────────────

fn get_tabs_schema() -> ActionSchema {
    ActionSchema {
        name: "getTabs",
        description: "List open browser tabs with their ids, URLs and titles.",
        parameters: json!({"type": "object", "properties": {}}),
    }
}

struct GetTabsAction {
    ctx: ActionContext,
}

#[async_trait]
impl ActionHandler for GetTabsAction {
    fn schema(&self) -> ActionSchema {
        get_tabs_schema()
    }

    fn validate(&self, payload: &Value) -> Result<()> {
        parse_input::<EmptyInput>(payload).map(|_| ())
    }

    async fn execute(&self, _payload: Value) -> Result<Value> {
        let tabs = self.ctx.backend.list_tabs().await?;
        Ok(json!({ "tabs": tabs }))
    }
}

fn get_active_tab_schema() -> ActionSchema {
    ActionSchema {
        name: "getActiveTab",
        description: "Get the currently active tab.",
        parameters: json!({"type": "object", "properties": {}}),
    }
}

struct GetActiveTabAction {
    ctx: ActionContext,
}

#[async_trait]
impl ActionHandler for GetActiveTabAction {
    fn schema(&self) -> ActionSchema {
        get_active_tab_schema()
    }

    fn validate(&self, payload: &Value) -> Result<()> {
        parse_input::<EmptyInput>(payload).map(|_| ())
    }

    async fn execute(&self, _payload: Value) -> Result<Value> {
        Ok(serde_json::to_value(self.ctx.backend.active_tab().await?)?)
    }
}

// ─── navigate / closeTab ──────────────────────────────────────────

fn navigate_schema() -> ActionSchema {
    ActionSchema {
        name: "navigate",
        description: "Open a URL. Without tabId a new tab is opened.",
        parameters: json!({
            "type": "object",
            "properties": {
                "url": {"type": "string", "description": "Absolute URL to open"},
                "tabId": {"type": "integer", "description": "Tab to navigate; omit to open a new tab"}
            },
            "required": ["url"]
        }),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct NavigateInput {
    url: String,
    #[serde(default)]
    tab_id: Option<i64>,
}

struct NavigateAction {
    ctx: ActionContext,
}

#[async_trait]
impl ActionHandler for NavigateAction {
    fn schema(&self) -> ActionSchema {
        navigate_schema()
    }

    fn validate(&self, payload: &Value) -> Result<()> {
        let input: NavigateInput = parse_input(payload)?;
        if input.url.trim().is_empty() {
            return Err(tabrelay_core::Error::Validation("url: must not be empty".to_string()));
        }
        Ok(())
    }

    async fn execute(&self, payload: Value) -> Result<Value> {
        let input: NavigateInput = parse_input(&payload)?;
        if let Some(id) = input.tab_id {
            self.ctx.cache.clear(id);
        }
        let tab = self.ctx.backend.navigate(input.tab_id, &input.url).await?;
        // The page changed under whatever snapshot we held.
        self.ctx.cache.clear(tab.id);
        Ok(json!({ "tabId": tab.id, "url": tab.url, "title": tab.title }))
    }
}

fn close_tab_schema() -> ActionSchema {
    ActionSchema {
        name: "closeTab",
        description: "Close a tab by id.",
        parameters: json!({
            "type": "object",
            "properties": {"tabId": {"type": "integer"}},
            "required": ["tabId"]
        }),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CloseTabInput {
    tab_id: i64,
}

struct CloseTabAction {
    ctx: ActionContext,
}

#[async_trait]
impl ActionHandler for CloseTabAction {
    fn schema(&self) -> ActionSchema {
        close_tab_schema()
    }

    fn validate(&self, payload: &Value) -> Result<()> {
        parse_input::<CloseTabInput>(payload).map(|_| ())
    }

    async fn execute(&self, payload: Value) -> Result<Value> {
        let input: CloseTabInput = parse_input(&payload)?;
        self.ctx.backend.close_tab(input.tab_id).await?;
        self.ctx.cache.clear(input.tab_id);
        Ok(json!({ "closed": input.tab_id }))
    }
}

// ─── getInteractiveSnapshot ───────────────────────────────────────

fn snapshot_schema() -> ActionSchema {
    ActionSchema {
        name: "getInteractiveSnapshot",
        description: "List interactive elements (links, buttons, inputs) of a tab. \
                      Use the returned nodeId values with clickElement and inputText.",
        parameters: tab_only_parameters(),
    }
}

struct SnapshotAction {
    ctx: ActionContext,
    next_snapshot_id: AtomicU64,
}

fn outline(elements: &[InteractiveNode]) -> String {
    elements
        .iter()
        .map(|el| {
            let kind = serde_json::to_value(el.node_type)
                .ok()
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_default();
            match &el.name {
                Some(name) => format!("[{}] {} \"{}\"", el.node_id, kind, name),
                None => format!("[{}] {}", el.node_id, kind),
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[async_trait]
impl ActionHandler for SnapshotAction {
    fn schema(&self) -> ActionSchema {
        snapshot_schema()
    }

    fn validate(&self, payload: &Value) -> Result<()> {
        parse_input::<TabInput>(payload).map(|_| ())
    }

    async fn execute(&self, payload: Value) -> Result<Value> {
        let input: TabInput = parse_input(&payload)?;
        let tab_id = self.ctx.resolve_tab(input.tab_id).await?;

        let started = Instant::now();
        let elements = self.ctx.backend.interactive_elements(tab_id).await?;
        let snapshot = InteractiveSnapshot {
            snapshot_id: self.next_snapshot_id.fetch_add(1, Ordering::SeqCst),
            timestamp: chrono::Utc::now().timestamp_millis(),
            hierarchical_structure: Some(outline(&elements)),
            elements,
            processing_time_ms: started.elapsed().as_millis() as u64,
        };
        debug!(tab_id, elements = snapshot.elements.len(), "Snapshot taken");

        let mut data = serde_json::to_value(&snapshot)?;
        data["tabId"] = json!(tab_id);
        self.ctx.cache.set(tab_id, snapshot);
        Ok(data)
    }
}

// ─── clickElement / inputText ─────────────────────────────────────

fn click_schema() -> ActionSchema {
    ActionSchema {
        name: "clickElement",
        description: "Click an element from the latest snapshot by nodeId.",
        parameters: json!({
            "type": "object",
            "properties": {
                "tabId": {"type": "integer"},
                "nodeId": {"type": "integer"}
            },
            "required": ["nodeId"]
        }),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct NodeInput {
    #[serde(default)]
    tab_id: Option<i64>,
    node_id: i64,
}

struct ClickElementAction {
    ctx: ActionContext,
}

#[async_trait]
impl ActionHandler for ClickElementAction {
    fn schema(&self) -> ActionSchema {
        click_schema()
    }

    fn validate(&self, payload: &Value) -> Result<()> {
        parse_input::<NodeInput>(payload).map(|_| ())
    }

    async fn execute(&self, payload: Value) -> Result<Value> {
        let input: NodeInput = parse_input(&payload)?;
        let tab_id = self.ctx.resolve_tab(input.tab_id).await?;

        let (rect, cached) = match self.ctx.cache.node_rect(tab_id, input.node_id) {
            Some(rect) => (rect, true),
            None => (self.ctx.backend.locate_node(tab_id, input.node_id).await?, false),
        };
        let (x, y) = rect.center();
        self.ctx.backend.click_at(tab_id, x, y).await?;

        Ok(json!({
            "clicked": true,
            "nodeId": input.node_id,
            "x": x,
            "y": y,
            "usedCachedRect": cached
        }))
    }
}

fn input_text_schema() -> ActionSchema {
    ActionSchema {
        name: "inputText",
        description: "Type text into an input element from the latest snapshot.",
        parameters: json!({
            "type": "object",
            "properties": {
                "tabId": {"type": "integer"},
                "nodeId": {"type": "integer"},
                "text": {"type": "string"},
                "clear": {"type": "boolean", "description": "Clear existing value first"}
            },
            "required": ["nodeId", "text"]
        }),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct InputTextInput {
    #[serde(default)]
    tab_id: Option<i64>,
    node_id: i64,
    text: String,
    #[serde(default)]
    clear: bool,
}

struct InputTextAction {
    ctx: ActionContext,
}

#[async_trait]
impl ActionHandler for InputTextAction {
    fn schema(&self) -> ActionSchema {
        input_text_schema()
    }

    fn validate(&self, payload: &Value) -> Result<()> {
        parse_input::<InputTextInput>(payload).map(|_| ())
    }

    async fn execute(&self, payload: Value) -> Result<Value> {
        let input: InputTextInput = parse_input(&payload)?;
        let tab_id = self.ctx.resolve_tab(input.tab_id).await?;
        self.ctx
            .backend
            .type_into(tab_id, input.node_id, &input.text, input.clear)
            .await?;
        Ok(json!({ "typed": input.text.chars().count(), "nodeId": input.node_id }))
    }
}

// ─── captureScreenshot / executeJavaScript ────────────────────────

fn screenshot_schema() -> ActionSchema {
    ActionSchema {
        name: "captureScreenshot",
        description: "Capture a PNG screenshot of a tab's viewport.",
        parameters: tab_only_parameters(),
    }
}

struct ScreenshotAction {
    ctx: ActionContext,
}

#[async_trait]
impl ActionHandler for ScreenshotAction {
    fn schema(&self) -> ActionSchema {
        screenshot_schema()
    }

    fn validate(&self, payload: &Value) -> Result<()> {
        parse_input::<TabInput>(payload).map(|_| ())
    }

    async fn execute(&self, payload: Value) -> Result<Value> {
        let input: TabInput = parse_input(&payload)?;
        let tab_id = self.ctx.resolve_tab(input.tab_id).await?;
        let data = self.ctx.backend.screenshot(tab_id).await?;
        Ok(json!({ "tabId": tab_id, "mimeType": "image/png", "data": data }))
    }
}

fn execute_js_schema() -> ActionSchema {
    ActionSchema {
        name: "executeJavaScript",
        description: "Evaluate a JavaScript expression in the page and return its JSON value.",
        parameters: json!({
            "type": "object",
            "properties": {
                "tabId": {"type": "integer"},
                "code": {"type": "string"}
            },
            "required": ["code"]
        }),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExecuteJsInput {
    #[serde(default)]
    tab_id: Option<i64>,
    code: String,
}

struct ExecuteJavaScriptAction {
    ctx: ActionContext,
}

#[async_trait]
impl ActionHandler for ExecuteJavaScriptAction {
    fn schema(&self) -> ActionSchema {
        execute_js_schema()
    }

    fn validate(&self, payload: &Value) -> Result<()> {
        parse_input::<ExecuteJsInput>(payload).map(|_| ())
    }

    async fn execute(&self, payload: Value) -> Result<Value> {
        let input: ExecuteJsInput = parse_input(&payload)?;
        let tab_id = self.ctx.resolve_tab(input.tab_id).await?;
        let result = self.ctx.backend.evaluate(tab_id, &input.code).await?;
        Ok(json!({ "result": result }))
    }
}

// ─── scrollDown / scrollUp ────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
enum ScrollDirection {
    Down,
    Up,
}

fn scroll_schema(direction: ScrollDirection) -> ActionSchema {
    let (name, description) = match direction {
        ScrollDirection::Down => ("scrollDown", "Scroll the page down."),
        ScrollDirection::Up => ("scrollUp", "Scroll the page up."),
    };
    ActionSchema {
        name,
        description,
        parameters: json!({
            "type": "object",
            "properties": {
                "tabId": {"type": "integer"},
                "amount": {"type": "number", "description": "Pixels to scroll, default 600"}
            }
        }),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScrollInput {
    #[serde(default)]
    tab_id: Option<i64>,
    #[serde(default)]
    amount: Option<f64>,
}

struct ScrollAction {
    ctx: ActionContext,
    direction: ScrollDirection,
}

#[async_trait]
impl ActionHandler for ScrollAction {
    fn schema(&self) -> ActionSchema {
        scroll_schema(self.direction)
    }

    fn validate(&self, payload: &Value) -> Result<()> {
        parse_input::<ScrollInput>(payload).map(|_| ())
    }

    async fn execute(&self, payload: Value) -> Result<Value> {
        let input: ScrollInput = parse_input(&payload)?;
        let tab_id = self.ctx.resolve_tab(input.tab_id).await?;
        let amount = input.amount.unwrap_or(DEFAULT_SCROLL_PX).abs();
        let delta = match self.direction {
            ScrollDirection::Down => amount,
            ScrollDirection::Up => -amount,
        };
        self.ctx.backend.scroll_by(tab_id, delta).await?;
        // Viewport rects are relative to the scroll position.
        self.ctx.cache.clear(tab_id);
        Ok(json!({ "tabId": tab_id, "scrolledBy": delta }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::{NodeType, Rect, TabInfo};
    use std::sync::Mutex;
    use tabrelay_core::Error;

    #[derive(Default)]
    struct FakeBackend {
        calls: Mutex<Vec<String>>,
    }

    impl FakeBackend {
        fn log(&self, call: String) {
            self.calls.lock().unwrap().push(call);
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    fn tab(id: i64) -> TabInfo {
        TabInfo {
            id,
            url: format!("https://site{}.test/", id),
            title: format!("Site {}", id),
            active: id == 1,
        }
    }

    #[async_trait]
    impl BrowserBackend for FakeBackend {
        async fn list_tabs(&self) -> Result<Vec<TabInfo>> {
            Ok(vec![tab(1), tab(2)])
        }

        async fn active_tab(&self) -> Result<TabInfo> {
            Ok(tab(1))
        }

        async fn navigate(&self, tab_id: Option<i64>, url: &str) -> Result<TabInfo> {
            self.log(format!("navigate {:?} {}", tab_id, url));
            Ok(TabInfo {
                url: url.to_string(),
                ..tab(tab_id.unwrap_or(3))
            })
        }

        async fn close_tab(&self, tab_id: i64) -> Result<()> {
            self.log(format!("close {}", tab_id));
            Ok(())
        }

        async fn interactive_elements(&self, _tab_id: i64) -> Result<Vec<InteractiveNode>> {
            Ok(vec![
                InteractiveNode {
                    node_id: 1,
                    node_type: NodeType::Clickable,
                    name: Some("Sign in".to_string()),
                    rect: Some(Rect { x: 10.0, y: 20.0, width: 100.0, height: 40.0 }),
                    attributes: None,
                },
                InteractiveNode {
                    node_id: 2,
                    node_type: NodeType::Typeable,
                    name: None,
                    rect: None,
                    attributes: None,
                },
            ])
        }

        async fn click_at(&self, tab_id: i64, x: f64, y: f64) -> Result<()> {
            self.log(format!("click {} {} {}", tab_id, x, y));
            Ok(())
        }

        async fn locate_node(&self, _tab_id: i64, node_id: i64) -> Result<Rect> {
            self.log(format!("locate {}", node_id));
            if node_id == 404 {
                return Err(Error::Other("Element 404 not found".to_string()));
            }
            Ok(Rect { x: 0.0, y: 0.0, width: 2.0, height: 2.0 })
        }

        async fn type_into(&self, tab_id: i64, node_id: i64, text: &str, clear: bool) -> Result<()> {
            self.log(format!("type {} {} {} {}", tab_id, node_id, text, clear));
            Ok(())
        }

        async fn screenshot(&self, _tab_id: i64) -> Result<String> {
            Ok("iVBORw0KGgo=".to_string())
        }

        async fn evaluate(&self, _tab_id: i64, code: &str) -> Result<Value> {
            if code == "throw" {
                return Err(Error::Other("ReferenceError: boom".to_string()));
            }
            Ok(json!(2))
        }

        async fn scroll_by(&self, tab_id: i64, delta_y: f64) -> Result<()> {
            self.log(format!("scroll {} {}", tab_id, delta_y));
            Ok(())
        }
    }

    fn setup() -> (ActionRegistry, Arc<FakeBackend>, Arc<SnapshotCache>) {
        let backend = Arc::new(FakeBackend::default());
        let cache = Arc::new(SnapshotCache::new());
        let registry = ActionRegistry::new();
        register_builtin_actions(
            &registry,
            ActionContext {
                backend: backend.clone(),
                cache: cache.clone(),
            },
        );
        (registry, backend, cache)
    }

    #[test]
    fn test_all_builtins_registered() {
        let (registry, _, _) = setup();
        let names: Vec<String> = builtin_schemas().iter().map(|s| s.name.to_string()).collect();
        assert_eq!(registry.action_count(), names.len());
        for name in names {
            assert!(registry.has_action(&name), "missing {}", name);
        }
    }

    #[tokio::test]
    async fn test_snapshot_populates_cache() {
        let (registry, _, cache) = setup();
        let resp = registry.dispatch("getInteractiveSnapshot", json!({"tabId": 2})).await;
        assert!(resp.is_ok());
        let data = resp.data().unwrap();
        assert_eq!(data["tabId"], 2);
        assert_eq!(data["elements"].as_array().unwrap().len(), 2);
        assert!(data["hierarchicalStructure"].as_str().unwrap().contains("[1] clickable \"Sign in\""));

        assert!(cache.has(2));
        assert_eq!(cache.node_rect(2, 1).unwrap().width, 100.0);
        assert!(cache.node_rect(2, 2).is_none());
    }

    #[tokio::test]
    async fn test_click_uses_cached_rect() {
        let (registry, backend, _) = setup();
        registry.dispatch("getInteractiveSnapshot", json!({"tabId": 1})).await;

        let resp = registry.dispatch("clickElement", json!({"tabId": 1, "nodeId": 1})).await;
        assert_eq!(resp.data().unwrap()["usedCachedRect"], true);
        assert_eq!(backend.calls(), vec!["click 1 60 40".to_string()]);
    }

    #[tokio::test]
    async fn test_click_falls_back_to_locate() {
        let (registry, backend, _) = setup();
        let resp = registry.dispatch("clickElement", json!({"nodeId": 9})).await;
        assert_eq!(resp.data().unwrap()["usedCachedRect"], false);
        assert_eq!(backend.calls(), vec!["locate 9".to_string(), "click 1 1 1".to_string()]);
    }

    #[tokio::test]
    async fn test_click_missing_element_is_structured_failure() {
        let (registry, _, _) = setup();
        let resp = registry.dispatch("clickElement", json!({"nodeId": 404})).await;
        assert_eq!(
            resp.error(),
            Some("Action execution failed: Element 404 not found")
        );
    }

    #[tokio::test]
    async fn test_navigate_clears_cache() {
        let (registry, backend, cache) = setup();
        registry.dispatch("getInteractiveSnapshot", json!({"tabId": 1})).await;
        assert!(cache.has(1));

        let resp = registry
            .dispatch("navigate", json!({"tabId": 1, "url": "https://example.test"}))
            .await;
        assert!(resp.is_ok());
        assert!(!cache.has(1));
        assert_eq!(backend.calls(), vec!["navigate Some(1) https://example.test".to_string()]);
    }

    #[tokio::test]
    async fn test_navigate_requires_url() {
        let (registry, _, _) = setup();
        let resp = registry.dispatch("navigate", json!({"url": "  "})).await;
        assert!(resp.error().unwrap().starts_with("Validation error"));
        let resp = registry.dispatch("navigate", json!({})).await;
        assert!(resp.error().unwrap().contains("url"));
    }

    #[tokio::test]
    async fn test_close_tab_clears_cache() {
        let (registry, _, cache) = setup();
        registry.dispatch("getInteractiveSnapshot", json!({"tabId": 2})).await;
        registry.dispatch("closeTab", json!({"tabId": 2})).await;
        assert!(!cache.has(2));
        assert!(cache.node_rect(2, 1).is_none());
    }

    #[tokio::test]
    async fn test_scroll_direction_and_cache() {
        let (registry, backend, cache) = setup();
        registry.dispatch("getInteractiveSnapshot", json!({})).await;
        registry.dispatch("scrollUp", json!({"amount": 200})).await;
        registry.dispatch("scrollDown", json!({})).await;
        assert_eq!(
            backend.calls(),
            vec!["scroll 1 -200".to_string(), "scroll 1 600".to_string()]
        );
        assert!(!cache.has(1));
    }

    #[tokio::test]
    async fn test_input_text_and_js() {
        let (registry, backend, _) = setup();
        let resp = registry
            .dispatch("inputText", json!({"tabId": 2, "nodeId": 2, "text": "hello", "clear": true}))
            .await;
        assert_eq!(resp.data().unwrap()["typed"], 5);
        assert_eq!(backend.calls(), vec!["type 2 2 hello true".to_string()]);

        let resp = registry.dispatch("executeJavaScript", json!({"code": "1+1"})).await;
        assert_eq!(resp.data().unwrap()["result"], 2);
        let resp = registry.dispatch("executeJavaScript", json!({"code": "throw"})).await;
        assert!(resp.error().unwrap().contains("ReferenceError"));
    }

    #[tokio::test]
    async fn test_get_tabs_and_screenshot() {
        let (registry, _, _) = setup();
        let resp = registry.dispatch("getTabs", Value::Null).await;
        assert_eq!(resp.data().unwrap()["tabs"].as_array().unwrap().len(), 2);

        let resp = registry.dispatch("captureScreenshot", json!({"tabId": 1})).await;
        assert_eq!(resp.data().unwrap()["mimeType"], "image/png");
    }
}
