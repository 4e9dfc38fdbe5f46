//! Headless Chrome over the DevTools protocol
//!
//! Launches a local Chrome (or attaches to one already running when
//! `devtools_url` is set) through `chromiumoxide` and drives a single tab.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig as LaunchConfig};
use chromiumoxide::cdp::browser_protocol::dom::SetFileInputFilesParams;
use chromiumoxide::element::Element;
use chromiumoxide::error::CdpError;
use chromiumoxide::Page;
use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::{BrowserDriver, Cookie};
use crate::config::BrowserConfig;
use crate::error::PlatformError;
use crate::platforms::AdapterResult;
use crate::types::Platform;

const COMMAND_TIMEOUT: Duration = Duration::from_secs(90);

struct Running {
    browser: Browser,
    page: Page,
    /// Pumps DevTools messages until the browser goes away
    handler: JoinHandle<()>,
    /// Attached to a browser someone else started; only our tab is closed
    attached: bool,
}

pub struct ChromeDriver {
    platform: Platform,
    config: BrowserConfig,
    running: Option<Running>,
}

impl ChromeDriver {
    pub fn new(platform: Platform, config: &BrowserConfig) -> Self {
        Self {
            platform,
            config: config.clone(),
            running: None,
        }
    }

    fn launch_config(&self) -> AdapterResult<LaunchConfig> {
        let mut builder = LaunchConfig::builder().request_timeout(COMMAND_TIMEOUT);
        if !self.config.headless {
            builder = builder.with_head();
        }
        if let Some(path) = &self.config.chrome_executable {
            builder = builder.chrome_executable(shellexpand::tilde(path).to_string());
        }
        builder
            .build()
            .map_err(|e| PlatformError::Unexpected(format!("{} browser config: {}", self.platform, e)))
    }

    fn page(&self) -> AdapterResult<&Page> {
        self.running.as_ref().map(|r| &r.page).ok_or_else(|| {
            PlatformError::SessionExpired(format!("no {} browser session running", self.platform))
        })
    }

    async fn find(&self, selector: &str) -> AdapterResult<Element> {
        self.page()?
            .find_element(selector)
            .await
            .map_err(|e| map_cdp_error(self.platform, &e, selector))
    }

    fn fail(&self, context: &str) -> impl Fn(CdpError) -> PlatformError + '_ {
        let context = context.to_string();
        move |e| map_cdp_error(self.platform, &e, &context)
    }
}

/// Classify a DevTools failure
pub fn map_cdp_error(platform: Platform, error: &CdpError, context: &str) -> PlatformError {
    let detail = format!("{} browser failed during {}: {}", platform, context, error);
    match error {
        CdpError::Timeout | CdpError::NoResponse => PlatformError::Timeout(detail),
        CdpError::Ws(_) | CdpError::Io(_) => PlatformError::Network(detail),
        _ => PlatformError::Unexpected(detail),
    }
}

#[async_trait]
impl BrowserDriver for ChromeDriver {
    async fn start(&mut self) -> AdapterResult<()> {
        if self.running.is_some() {
            return Ok(());
        }

        let attached = self.config.devtools_url.is_some();
        let (browser, mut events) = match &self.config.devtools_url {
            Some(url) => Browser::connect(url.clone()).await,
            None => Browser::launch(self.launch_config()?).await,
        }
        .map_err(self.fail("browser start"))?;

        let handler = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                if let Err(e) = event {
                    debug!("DevTools connection closed: {}", e);
                    break;
                }
            }
        });

        let page = match browser.new_page("about:blank").await {
            Ok(page) => page,
            Err(e) => {
                handler.abort();
                return Err(map_cdp_error(self.platform, &e, "opening a tab"));
            }
        };

        info!(platform = %self.platform, attached, "Browser started");
        self.running = Some(Running {
            browser,
            page,
            handler,
            attached,
        });
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running.is_some()
    }

    async fn navigate(&self, url: &str) -> AdapterResult<()> {
        self.page()?.goto(url).await.map_err(self.fail("navigation"))?;
        Ok(())
    }

    async fn current_url(&self) -> AdapterResult<String> {
        let url = self.page()?.url().await.map_err(self.fail("url lookup"))?;
        Ok(url.unwrap_or_default())
    }

    async fn fill(&self, selector: &str, value: &str) -> AdapterResult<()> {
        let element = self.find(selector).await?;
        element.click().await.map_err(self.fail(selector))?;
        element.type_str(value).await.map_err(self.fail(selector))?;
        Ok(())
    }

    async fn click(&self, selector: &str) -> AdapterResult<()> {
        let element = self.find(selector).await?;
        element.click().await.map_err(self.fail(selector))?;
        self.page()?
            .wait_for_navigation()
            .await
            .map_err(self.fail(selector))?;
        Ok(())
    }

    async fn upload(&self, selector: &str, path: &Path) -> AdapterResult<()> {
        let element = self.find(selector).await?;
        let params = SetFileInputFilesParams::builder()
            .file(path.to_string_lossy().into_owned())
            .backend_node_id(element.backend_node_id)
            .build()
            .map_err(|e| PlatformError::InvalidPayload(format!("{}: {}", selector, e)))?;
        self.page()?.execute(params).await.map_err(self.fail(selector))?;
        Ok(())
    }

    async fn cookies(&self) -> AdapterResult<Vec<Cookie>> {
        let cookies = self
            .page()?
            .get_cookies()
            .await
            .map_err(self.fail("cookie read"))?;
        Ok(cookies
            .into_iter()
            .map(|c| Cookie {
                name: c.name,
                value: c.value,
            })
            .collect())
    }

    async fn quit(&mut self) -> AdapterResult<bool> {
        let Some(mut running) = self.running.take() else {
            return Ok(false);
        };

        let closed = if running.attached {
            running.page.close().await
        } else {
            running.browser.close().await.map(|_| ())
        };
        if !running.attached {
            // Reap the child process
            let _ = running.browser.wait().await;
        }
        running.handler.abort();

        closed.map_err(|e| map_cdp_error(self.platform, &e, "browser shutdown"))?;
        Ok(true)
    }
}
