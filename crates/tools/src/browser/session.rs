//! CDP-backed `BrowserBackend`.
//!
//! Chrome identifies tabs by opaque target ids; the agent works with small
//! integers. `TabTable` keeps the two in sync and caches the flat-mode CDP
//! session attached to each target.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use tabrelay_core::{Error, Result};
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::backend::{BrowserBackend, TabInfo};
use super::cdp::CdpClient;
use super::snapshot::{InteractiveNode, Rect};

const NODE_ATTR: &str = "data-tabrelay-node";

const COLLECT_ELEMENTS_JS: &str = r#"(() => {
  const ATTR = 'data-tabrelay-node';
  const selector = 'a[href], button, input, textarea, select, summary, [role="button"], [role="link"], [role="checkbox"], [role="tab"], [role="menuitem"], [contenteditable="true"], [onclick]';
  const nonText = ['button', 'submit', 'reset', 'checkbox', 'radio', 'image', 'file', 'hidden'];
  let next = window.__tabrelayNextNode || 1;
  const out = [];
  for (const el of document.querySelectorAll(selector)) {
    const style = window.getComputedStyle(el);
    if (style.visibility === 'hidden' || style.display === 'none') continue;
    let id = el.getAttribute(ATTR);
    if (!id) { id = String(next++); el.setAttribute(ATTR, id); }
    const tag = el.tagName.toLowerCase();
    let type = 'clickable';
    if (tag === 'select') type = 'selectable';
    else if (tag === 'textarea' || el.isContentEditable) type = 'typeable';
    else if (tag === 'input') type = nonText.includes((el.type || '').toLowerCase()) ? 'clickable' : 'typeable';
    const name = (el.getAttribute('aria-label') || el.innerText || el.value || el.getAttribute('placeholder') || el.getAttribute('title') || '').trim().slice(0, 120);
    const attributes = {};
    for (const a of ['id', 'href', 'type', 'placeholder', 'role']) { const v = el.getAttribute(a); if (v) attributes[a] = v; }
    const r = el.getBoundingClientRect();
    const node = { nodeId: Number(id), type, attributes };
    if (name) node.name = name;
    if (r.width > 0 && r.height > 0) node.rect = { x: r.x, y: r.y, width: r.width, height: r.height };
    out.push(node);
  }
  window.__tabrelayNextNode = next;
  return out;
})()"#;

#[derive(Default)]
struct TabTable {
    next_id: i64,
    by_id: HashMap<i64, String>,
    by_target: HashMap<String, i64>,
    sessions: HashMap<String, String>,
    active: Option<i64>,
}

impl TabTable {
    fn id_for(&mut self, target_id: &str) -> i64 {
        if let Some(id) = self.by_target.get(target_id) {
            return *id;
        }
        self.next_id += 1;
        let id = self.next_id;
        self.by_id.insert(id, target_id.to_string());
        self.by_target.insert(target_id.to_string(), id);
        id
    }

    fn forget(&mut self, tab_id: i64) {
        if let Some(target) = self.by_id.remove(&tab_id) {
            self.by_target.remove(&target);
            self.sessions.remove(&target);
        }
        if self.active == Some(tab_id) {
            self.active = None;
        }
    }
}

pub struct CdpBackend {
    cdp: CdpClient,
    tabs: Mutex<TabTable>,
}

impl CdpBackend {
    pub fn new(cdp: CdpClient) -> Self {
        Self {
            cdp,
            tabs: Mutex::new(TabTable::default()),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.cdp.is_closed()
    }

    async fn target_for(&self, tab_id: i64) -> Result<String> {
        if let Some(t) = self.tabs.lock().await.by_id.get(&tab_id) {
            return Ok(t.clone());
        }
        // Unknown id: refresh from the browser once before giving up.
        self.list_tabs().await?;
        self.tabs
            .lock()
            .await
            .by_id
            .get(&tab_id)
            .cloned()
            .ok_or_else(|| Error::Other(format!("Tab {} not found", tab_id)))
    }

    async fn session_for(&self, tab_id: i64) -> Result<String> {
        let target = self.target_for(tab_id).await?;
        let mut tabs = self.tabs.lock().await;
        if let Some(sid) = tabs.sessions.get(&target) {
            return Ok(sid.clone());
        }
        let sid = self.cdp.attach_to_target(&target).await?;
        debug!(tab_id, target = %target, session = %sid, "Attached to tab");
        tabs.sessions.insert(target, sid.clone());
        Ok(sid)
    }

    async fn tab_info(&self, tab_id: i64) -> Result<TabInfo> {
        self.list_tabs()
            .await?
            .into_iter()
            .find(|t| t.id == tab_id)
            .ok_or_else(|| Error::Other(format!("Tab {} not found", tab_id)))
    }

    async fn wait_for_load(&self, session_id: &str) {
        for _ in 0..50 {
            match self.cdp.evaluate_js(session_id, "document.readyState").await {
                Ok(Value::String(state)) if state == "complete" => return,
                _ => tokio::time::sleep(std::time::Duration::from_millis(100)).await,
            }
        }
        debug!("Page did not reach readyState=complete, continuing");
    }
}

fn node_selector(node_id: i64) -> String {
    format!("document.querySelector('[{}=\"{}\"]')", NODE_ATTR, node_id)
}

#[async_trait]
impl BrowserBackend for CdpBackend {
    async fn list_tabs(&self) -> Result<Vec<TabInfo>> {
        let targets = self.cdp.get_targets().await?;
        let mut tabs = self.tabs.lock().await;
        let mut seen = Vec::new();
        let mut out = Vec::new();
        for target in targets {
            if target.get("type").and_then(|v| v.as_str()) != Some("page") {
                continue;
            }
            let Some(target_id) = target.get("targetId").and_then(|v| v.as_str()) else {
                continue;
            };
            let id = tabs.id_for(target_id);
            seen.push(id);
            out.push(TabInfo {
                id,
                url: target.get("url").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
                title: target.get("title").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
                active: false,
            });
        }

        let stale: Vec<i64> = tabs.by_id.keys().filter(|id| !seen.contains(id)).copied().collect();
        for id in stale {
            tabs.forget(id);
        }
        let active = tabs.active.or_else(|| out.first().map(|t| t.id));
        for tab in &mut out {
            tab.active = Some(tab.id) == active;
        }
        Ok(out)
    }

    async fn active_tab(&self) -> Result<TabInfo> {
        self.list_tabs()
            .await?
            .into_iter()
            .find(|t| t.active)
            .ok_or_else(|| Error::Other("No open tabs".to_string()))
    }

    async fn navigate(&self, tab_id: Option<i64>, url: &str) -> Result<TabInfo> {
        let tab_id = match tab_id {
            Some(id) => {
                let sid = self.session_for(id).await?;
                self.cdp.navigate(&sid, url).await?;
                id
            }
            None => {
                let target = self.cdp.create_target(url).await?;
                let id = self.tabs.lock().await.id_for(&target);
                info!(tab_id = id, url, "Opened new tab");
                id
            }
        };

        let target = self.target_for(tab_id).await?;
        self.cdp.activate_target(&target).await?;
        self.tabs.lock().await.active = Some(tab_id);

        let sid = self.session_for(tab_id).await?;
        self.wait_for_load(&sid).await;
        self.tab_info(tab_id).await
    }

    async fn close_tab(&self, tab_id: i64) -> Result<()> {
        let target = self.target_for(tab_id).await?;
        self.cdp.close_target(&target).await?;
        self.tabs.lock().await.forget(tab_id);
        info!(tab_id, "Closed tab");
        Ok(())
    }

    async fn interactive_elements(&self, tab_id: i64) -> Result<Vec<InteractiveNode>> {
        let sid = self.session_for(tab_id).await?;
        let raw = self.cdp.evaluate_js(&sid, COLLECT_ELEMENTS_JS).await?;
        serde_json::from_value(raw).map_err(Error::from)
    }

    async fn click_at(&self, tab_id: i64, x: f64, y: f64) -> Result<()> {
        let sid = self.session_for(tab_id).await?;
        self.cdp.click_at(&sid, x, y).await
    }

    async fn locate_node(&self, tab_id: i64, node_id: i64) -> Result<Rect> {
        let sid = self.session_for(tab_id).await?;
        let js = format!(
            "(() => {{ const el = {}; if (!el) return null; \
             el.scrollIntoView({{block: 'center', inline: 'center'}}); \
             const r = el.getBoundingClientRect(); \
             return {{x: r.x, y: r.y, width: r.width, height: r.height}}; }})()",
            node_selector(node_id)
        );
        match self.cdp.evaluate_js(&sid, &js).await? {
            Value::Null => Err(Error::Other(format!(
                "Element {} not found. Take a new snapshot.",
                node_id
            ))),
            v => serde_json::from_value(v).map_err(Error::from),
        }
    }

    async fn type_into(&self, tab_id: i64, node_id: i64, text: &str, clear: bool) -> Result<()> {
        let sid = self.session_for(tab_id).await?;
        let js = format!(
            "(() => {{ const el = {}; if (!el) return false; el.focus(); \
             if ({}) {{ if ('value' in el) el.value = ''; else el.textContent = ''; \
             el.dispatchEvent(new Event('input', {{bubbles: true}})); }} return true; }})()",
            node_selector(node_id),
            clear
        );
        if self.cdp.evaluate_js(&sid, &js).await? != json!(true) {
            return Err(Error::Other(format!(
                "Element {} not found. Take a new snapshot.",
                node_id
            )));
        }
        self.cdp.insert_text(&sid, text).await
    }

    async fn screenshot(&self, tab_id: i64) -> Result<String> {
        let sid = self.session_for(tab_id).await?;
        self.cdp.screenshot(&sid).await
    }

    async fn evaluate(&self, tab_id: i64, code: &str) -> Result<Value> {
        let sid = self.session_for(tab_id).await?;
        self.cdp.evaluate_js(&sid, code).await
    }

    async fn scroll_by(&self, tab_id: i64, delta_y: f64) -> Result<()> {
        let sid = self.session_for(tab_id).await?;
        self.cdp
            .evaluate_js(&sid, &format!("window.scrollBy(0, {})", delta_y))
            .await?;
        Ok(())
    }
}
