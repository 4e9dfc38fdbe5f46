//! Platform → adapter factory mapping

use std::collections::HashMap;
use std::sync::Arc;

use super::browser::marketplace::{MarketplaceAdapter, MERCARI, POSHMARK};
use super::browser::chrome::ChromeDriver;
use super::facebook::FacebookAdapter;
use super::instagram::InstagramAdapter;
use super::pinterest::PinterestAdapter;
use super::PlatformAdapter;
use crate::config::PlatformsConfig;
use crate::types::Platform;

pub type AdapterFactory = Arc<dyn Fn() -> Box<dyn PlatformAdapter> + Send + Sync>;

/// Builds adapters on demand
///
/// Adding a platform means registering a factory here; nothing downstream
/// matches on [`Platform`].
#[derive(Clone, Default)]
pub struct PlatformRegistry {
    factories: HashMap<Platform, AdapterFactory>,
}

impl PlatformRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Real adapters for every platform enabled in `config`
    pub fn with_defaults(config: &PlatformsConfig) -> Self {
        let mut registry = Self::new();

        if config.facebook.enabled {
            let facebook = config.facebook.clone();
            registry.register(Platform::Facebook, move || {
                Box::new(FacebookAdapter::new(&facebook))
            });
        }
        if config.instagram.enabled {
            let instagram = config.instagram.clone();
            registry.register(Platform::Instagram, move || {
                Box::new(InstagramAdapter::new(&instagram))
            });
        }
        if config.pinterest.enabled {
            let pinterest = config.pinterest.clone();
            registry.register(Platform::Pinterest, move || {
                Box::new(PinterestAdapter::new(&pinterest))
            });
        }

        for script in [POSHMARK, MERCARI] {
            let browser = config.browser.clone();
            registry.register(script.platform, move || {
                let driver = ChromeDriver::new(script.platform, &browser);
                Box::new(MarketplaceAdapter::new(script, Box::new(driver), &browser))
            });
        }

        registry
    }

    /// Register (or replace) the factory for `platform`
    pub fn register<F>(&mut self, platform: Platform, factory: F) -> &mut Self
    where
        F: Fn() -> Box<dyn PlatformAdapter> + Send + Sync + 'static,
    {
        self.factories.insert(platform, Arc::new(factory));
        self
    }

    pub fn create(&self, platform: Platform) -> Option<Box<dyn PlatformAdapter>> {
        self.factories.get(&platform).map(|factory| factory())
    }

    pub fn is_registered(&self, platform: Platform) -> bool {
        self.factories.contains_key(&platform)
    }

    pub fn platforms(&self) -> Vec<Platform> {
        let mut platforms: Vec<Platform> = self.factories.keys().copied().collect();
        platforms.sort();
        platforms
    }
}
