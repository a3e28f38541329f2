//! DevTools-protocol implementation of [`ContextEngine`].
//!
//! One headless Chromium process per execution context. The process is
//! launched with `--user-data-dir` pointing at the context's profile store,
//! so everything the portal session needs lives in that directory and cloning
//! a store clones the authentication state.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::{
    ClearBrowserCacheParams, ClearBrowserCookiesParams,
};
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::page::Page;
use dashmap::DashMap;
use formpilot_core_types::ContextId;
use futures::StreamExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::{ContextEngine, ContextHandle, ContextKind};

struct LiveContext {
    browser: Mutex<Browser>,
    page: Page,
    handler: JoinHandle<()>,
}

pub struct CdpContextEngine {
    config: EngineConfig,
    contexts: DashMap<ContextId, Arc<LiveContext>>,
}

impl CdpContextEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            contexts: DashMap::new(),
        }
    }

    fn live(&self, ctx: &ContextHandle) -> Result<Arc<LiveContext>, EngineError> {
        self.contexts
            .get(&ctx.id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(EngineError::UnknownContext(ctx.id))
    }

    fn browser_config(&self, store: &Path) -> Result<BrowserConfig, EngineError> {
        let mut builder = BrowserConfig::builder()
            .user_data_dir(store)
            .window_size(self.config.window_width, self.config.window_height)
            .no_sandbox()
            .args(self.config.extra_args.clone());
        if let Some(binary) = self.config.resolve_binary() {
            builder = builder.chrome_executable(binary);
        }
        if !self.config.headless {
            builder = builder.with_head();
        }
        builder.build().map_err(EngineError::Launch)
    }
}

#[async_trait]
impl ContextEngine for CdpContextEngine {
    async fn create_context(
        &self,
        kind: ContextKind,
        store: &Path,
    ) -> Result<ContextHandle, EngineError> {
        let config = self.browser_config(store)?;
        let launch = timeout(self.config.launch_timeout, Browser::launch(config))
            .await
            .map_err(|_| EngineError::Launch("browser launch timed out".into()))?;
        let (browser, mut handler) = launch.map_err(|err| EngineError::Launch(err.to_string()))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        let page = match timeout(self.config.launch_timeout, browser.new_page("about:blank")).await
        {
            Ok(Ok(page)) => page,
            Ok(Err(err)) => {
                handler_task.abort();
                return Err(EngineError::Launch(err.to_string()));
            }
            Err(_) => {
                handler_task.abort();
                return Err(EngineError::Launch("initial page timed out".into()));
            }
        };

        let handle = ContextHandle::new(kind, store);
        self.contexts.insert(
            handle.id,
            Arc::new(LiveContext {
                browser: Mutex::new(browser),
                page,
                handler: handler_task,
            }),
        );
        info!(target: "engine", id = %handle.id, kind = ?kind, store = %store.display(), "context launched");
        Ok(handle)
    }

    async fn navigate(
        &self,
        ctx: &ContextHandle,
        url: &str,
        nav_timeout: Duration,
    ) -> Result<(), EngineError> {
        let live = self.live(ctx)?;
        let page = live.page.clone();
        let target = url.to_string();
        let result = timeout(nav_timeout, async move {
            page.goto(target.as_str()).await?;
            page.wait_for_navigation().await?;
            Ok::<(), chromiumoxide::error::CdpError>(())
        })
        .await
        .map_err(|_| EngineError::NavTimeout(nav_timeout))?;
        result.map_err(|err| EngineError::CdpIo(err.to_string()))?;
        debug!(target: "engine", id = %ctx.id, url, "navigation settled");
        Ok(())
    }

    async fn has_marker(
        &self,
        ctx: &ContextHandle,
        selector: &str,
        op_timeout: Duration,
    ) -> Result<bool, EngineError> {
        let live = self.live(ctx)?;
        let script = format!("document.querySelector({:?}) !== null", selector);
        let evaluated = timeout(op_timeout, live.page.evaluate(script))
            .await
            .map_err(|_| EngineError::NavTimeout(op_timeout))?
            .map_err(|err| EngineError::CdpIo(err.to_string()))?;
        evaluated
            .into_value::<bool>()
            .map_err(|err| EngineError::CdpIo(err.to_string()))
    }

    async fn fill_field(
        &self,
        ctx: &ContextHandle,
        selector: &str,
        value: &str,
    ) -> Result<(), EngineError> {
        let live = self.live(ctx)?;
        let element = timeout(self.config.op_timeout, live.page.find_element(selector))
            .await
            .map_err(|_| EngineError::NavTimeout(self.config.op_timeout))?
            .map_err(|_| EngineError::ElementMissing(selector.to_string()))?;
        element
            .click()
            .await
            .map_err(|err| EngineError::CdpIo(err.to_string()))?;
        element
            .type_str(value)
            .await
            .map_err(|err| EngineError::CdpIo(err.to_string()))?;
        Ok(())
    }

    async fn click(&self, ctx: &ContextHandle, selector: &str) -> Result<(), EngineError> {
        let live = self.live(ctx)?;
        let element = timeout(self.config.op_timeout, live.page.find_element(selector))
            .await
            .map_err(|_| EngineError::NavTimeout(self.config.op_timeout))?
            .map_err(|_| EngineError::ElementMissing(selector.to_string()))?;
        element
            .click()
            .await
            .map_err(|err| EngineError::CdpIo(err.to_string()))?;
        Ok(())
    }

    async fn capture_image(
        &self,
        ctx: &ContextHandle,
        selector: &str,
    ) -> Result<Vec<u8>, EngineError> {
        let live = self.live(ctx)?;
        let element = timeout(self.config.op_timeout, live.page.find_element(selector))
            .await
            .map_err(|_| EngineError::NavTimeout(self.config.op_timeout))?
            .map_err(|_| EngineError::ElementMissing(selector.to_string()))?;
        let bytes = element
            .screenshot(CaptureScreenshotFormat::Png)
            .await
            .map_err(|err| EngineError::Challenge(err.to_string()))?;
        if bytes.is_empty() {
            return Err(EngineError::Challenge(format!(
                "empty capture for {selector}"
            )));
        }
        Ok(bytes)
    }

    async fn clear_transient_state(&self, ctx: &ContextHandle) -> Result<(), EngineError> {
        let live = self.live(ctx)?;
        live.page
            .execute(ClearBrowserCookiesParams::default())
            .await
            .map_err(|err| EngineError::CdpIo(err.to_string()))?;
        live.page
            .execute(ClearBrowserCacheParams::default())
            .await
            .map_err(|err| EngineError::CdpIo(err.to_string()))?;
        Ok(())
    }

    async fn destroy(&self, ctx: &ContextHandle) -> Result<(), EngineError> {
        let Some((_, live)) = self.contexts.remove(&ctx.id) else {
            // Already gone; destruction is idempotent.
            return Ok(());
        };
        {
            let mut browser = live.browser.lock().await;
            if let Err(err) = browser.close().await {
                warn!(target: "engine", id = %ctx.id, error = %err, "browser close failed");
            }
        }
        live.handler.abort();
        info!(target: "engine", id = %ctx.id, "context destroyed");
        Ok(())
    }
}
