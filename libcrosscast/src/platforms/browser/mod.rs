//! Browser-automation adapters for marketplaces without a public API
//!
//! Adapters drive a [`BrowserDriver`]; the production driver is headless
//! Chrome over DevTools ([`chrome::ChromeDriver`]). Login state lives in a
//! [`session::BrowserSession`] with an expiry.

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::AdapterResult;

pub mod chrome;
pub mod marketplace;
pub mod session;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cookie {
    pub name: String,
    pub value: String,
}

/// The handful of page interactions the marketplace scripts need
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    /// Open a browser session if none is running
    async fn start(&mut self) -> AdapterResult<()>;

    fn is_running(&self) -> bool;

    async fn navigate(&self, url: &str) -> AdapterResult<()>;

    async fn current_url(&self) -> AdapterResult<String>;

    /// Type `value` into the first element matching `selector`
    async fn fill(&self, selector: &str, value: &str) -> AdapterResult<()>;

    async fn click(&self, selector: &str) -> AdapterResult<()>;

    /// Attach a local file to a file input
    async fn upload(&self, selector: &str, path: &Path) -> AdapterResult<()>;

    async fn cookies(&self) -> AdapterResult<Vec<Cookie>>;

    /// Close the browser; `false` if nothing was running
    async fn quit(&mut self) -> AdapterResult<bool>;
}
