//! Marketplace listing adapters driven through a browser
//!
//! Poshmark and Mercari share one flow: log in through the web form, open
//! the new-listing page, fill it, attach photos and submit. Each platform
//! only contributes a [`MarketplaceScript`] of URLs and selectors.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde_json::json;
use tempfile::TempDir;
use tracing::{debug, info};

use super::session::BrowserSession;
use super::BrowserDriver;
use crate::config::BrowserConfig;
use crate::error::PlatformError;
use crate::platforms::api::map_transport_error;
use crate::platforms::{AdapterResult, ContentLimits, PlatformAdapter};
use crate::types::{Credentials, Platform, PostContent, PublishReceipt};

/// URLs and selectors for one marketplace
#[derive(Debug, Clone, Copy)]
pub struct MarketplaceScript {
    pub platform: Platform,
    pub base_url: &'static str,
    pub login_path: &'static str,
    pub username_field: &'static str,
    pub password_field: &'static str,
    pub login_button: &'static str,
    pub new_listing_path: &'static str,
    pub title_field: &'static str,
    pub description_field: &'static str,
    pub photo_input: &'static str,
    pub submit_button: &'static str,
    /// Path segment preceding the listing id in the post-submit URL
    pub listing_marker: &'static str,
    pub limits: ContentLimits,
}

pub const POSHMARK: MarketplaceScript = MarketplaceScript {
    platform: Platform::Poshmark,
    base_url: "https://poshmark.com",
    login_path: "/login",
    username_field: "input[name='login_form[username_email]']",
    password_field: "input[name='login_form[password]']",
    login_button: "button[type='submit']",
    new_listing_path: "/create-listing",
    title_field: "input[data-vv-name='title']",
    description_field: "textarea[data-vv-name='description']",
    photo_input: "input[type='file']",
    submit_button: "button[data-et-name='next']",
    listing_marker: "/listing/",
    limits: ContentLimits {
        title_max: 80,
        description_max: 1_500,
        max_hashtags: 10,
        max_images: 16,
        requires_image: true,
    },
};

pub const MERCARI: MarketplaceScript = MarketplaceScript {
    platform: Platform::Mercari,
    base_url: "https://www.mercari.com",
    login_path: "/login",
    username_field: "input[name='email']",
    password_field: "input[name='password']",
    login_button: "button[type='submit']",
    new_listing_path: "/sell",
    title_field: "input[data-testid='Title']",
    description_field: "textarea[data-testid='Description']",
    photo_input: "input[data-testid='PhotoUploadInput']",
    submit_button: "button[data-testid='ListButton']",
    listing_marker: "/item/",
    limits: ContentLimits {
        title_max: 80,
        description_max: 1_000,
        max_hashtags: 3,
        max_images: 12,
        requires_image: true,
    },
};

/// Photo paths ready for upload
///
/// Downloaded copies live in `scratch`, which is deleted with everything in
/// it when this is dropped, whether the listing went through or not.
struct StagedImages {
    paths: Vec<PathBuf>,
    scratch: Option<TempDir>,
}

pub struct MarketplaceAdapter {
    script: MarketplaceScript,
    driver: Box<dyn BrowserDriver>,
    session: Option<BrowserSession>,
    session_ttl_hours: i64,
    download_dir: PathBuf,
    http: reqwest::Client,
}

impl MarketplaceAdapter {
    pub fn new(script: MarketplaceScript, driver: Box<dyn BrowserDriver>, config: &BrowserConfig) -> Self {
        Self {
            script,
            driver,
            session: None,
            session_ttl_hours: config.session_ttl_hours,
            download_dir: PathBuf::from(shellexpand::tilde(&config.download_dir).to_string()),
            http: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.script.base_url, path)
    }

    fn on_login_page(&self, url: &str) -> bool {
        url.contains(self.script.login_path)
    }

    /// Redirected to the login form mid-flow means the cookies died
    async fn ensure_logged_in(&self, step: &str) -> AdapterResult<String> {
        let url = self.driver.current_url().await?;
        if self.on_login_page(&url) {
            return Err(PlatformError::SessionExpired(format!(
                "{} redirected to login during {}",
                self.script.platform, step
            )));
        }
        Ok(url)
    }

    /// Local files for `images`, downloading remote URLs into a scratch
    /// directory under the upload dir
    async fn stage_images(&self, images: &[String]) -> AdapterResult<StagedImages> {
        let mut staged = StagedImages {
            paths: Vec::with_capacity(images.len()),
            scratch: None,
        };
        for (index, image) in images.iter().enumerate() {
            if !(image.starts_with("http://") || image.starts_with("https://")) {
                staged.paths.push(PathBuf::from(image));
                continue;
            }

            let response = self
                .http
                .get(image)
                .send()
                .await
                .map_err(|e| map_transport_error(self.script.platform, &e, "image download"))?;
            if !response.status().is_success() {
                return Err(PlatformError::InvalidPayload(format!(
                    "image {} could not be fetched: {}",
                    image,
                    response.status()
                )));
            }
            let bytes = response
                .bytes()
                .await
                .map_err(|e| map_transport_error(self.script.platform, &e, "image download"))?;

            let dir = match &staged.scratch {
                Some(dir) => dir.path().to_path_buf(),
                None => {
                    let dir = self.scratch_dir().await?;
                    let path = dir.path().to_path_buf();
                    staged.scratch = Some(dir);
                    path
                }
            };
            let path = dir.join(format!("{}{}", index, extension_of(image)));
            tokio::fs::write(&path, &bytes)
                .await
                .map_err(|e| PlatformError::Unexpected(format!("writing {}: {}", path.display(), e)))?;
            debug!(platform = %self.script.platform, path = %path.display(), "Staged image");
            staged.paths.push(path);
        }
        Ok(staged)
    }

    async fn scratch_dir(&self) -> AdapterResult<TempDir> {
        tokio::fs::create_dir_all(&self.download_dir)
            .await
            .map_err(|e| PlatformError::Unexpected(format!("upload dir: {}", e)))?;
        tempfile::Builder::new()
            .prefix(&format!("{}-", self.script.platform))
            .tempdir_in(&self.download_dir)
            .map_err(|e| PlatformError::Unexpected(format!("upload dir: {}", e)))
    }
}

/// `.jpg`-style extension from a URL path, ignoring query strings
fn extension_of(url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| e.len() <= 5)
        .map(|e| format!(".{}", e))
        .unwrap_or_default()
}

/// Listing id following `marker` in `url`
fn listing_id(url: &str, marker: &str) -> Option<String> {
    let rest = &url[url.find(marker)? + marker.len()..];
    let id: String = rest
        .chars()
        .take_while(|c| !matches!(c, '/' | '?' | '#'))
        .collect();
    (!id.is_empty()).then_some(id)
}

#[async_trait]
impl PlatformAdapter for MarketplaceAdapter {
    fn platform(&self) -> Platform {
        self.script.platform
    }

    fn limits(&self) -> ContentLimits {
        self.script.limits
    }

    async fn authenticate(&mut self, credentials: &Credentials) -> AdapterResult<bool> {
        let (Some(username), Some(password)) = (&credentials.username, &credentials.password)
        else {
            return Ok(false);
        };

        self.session = None;
        self.driver.start().await?;
        self.driver.navigate(&self.url(self.script.login_path)).await?;
        self.driver.fill(self.script.username_field, username).await?;
        self.driver
            .fill(self.script.password_field, password.expose_secret())
            .await?;
        self.driver.click(self.script.login_button).await?;

        let landed = self.driver.current_url().await?;
        if self.on_login_page(&landed) {
            return Ok(false);
        }

        let cookies = self.driver.cookies().await?;
        let now = chrono::Utc::now().timestamp();
        self.session = Some(BrowserSession::new(cookies, self.session_ttl_hours, now));
        info!(platform = %self.script.platform, "Browser session established");
        Ok(true)
    }

    async fn validate_connection(&mut self) -> AdapterResult<bool> {
        let now = chrono::Utc::now().timestamp();
        let valid = self.driver.is_running()
            && self.session.as_ref().is_some_and(|s| s.is_valid(now));
        if !valid {
            self.session = None;
        }
        Ok(valid)
    }

    async fn post_content(&self, content: &PostContent) -> AdapterResult<PublishReceipt> {
        let now = chrono::Utc::now().timestamp();
        let session = self.session.as_ref().filter(|s| s.is_valid(now)).ok_or_else(|| {
            PlatformError::SessionExpired(format!("{} session has expired", self.script.platform))
        })?;

        let staged = self.stage_images(&content.images).await?;
        let photos = &staged.paths;

        self.driver.navigate(&self.url(self.script.new_listing_path)).await?;
        self.ensure_logged_in("listing form").await?;

        self.driver.fill(self.script.title_field, &content.title).await?;
        self.driver
            .fill(self.script.description_field, &content.caption())
            .await?;
        for photo in photos {
            self.driver.upload(self.script.photo_input, photo).await?;
        }
        self.driver.click(self.script.submit_button).await?;

        let url = self.ensure_logged_in("submit").await?;
        if url.contains(self.script.new_listing_path) {
            return Err(PlatformError::ContentRejected(format!(
                "{} did not accept the listing form",
                self.script.platform
            )));
        }
        let id = listing_id(&url, self.script.listing_marker).ok_or_else(|| {
            PlatformError::Unexpected(format!(
                "{} landed on {} without a listing id",
                self.script.platform, url
            ))
        })?;

        let mut metadata = serde_json::Map::new();
        metadata.insert("photo_count".to_string(), json!(photos.len()));
        metadata.insert("session_created_at".to_string(), json!(session.created_at));

        Ok(PublishReceipt {
            post_id: id,
            url: Some(url),
            published_at: Some(chrono::Utc::now().timestamp()),
            metadata,
        })
    }

    async fn disconnect(&mut self) -> AdapterResult<bool> {
        let had_session = self.session.take().is_some();
        let quit = self.driver.quit().await?;
        Ok(had_session || quit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platforms::browser::Cookie;
    use secrecy::SecretString;
    use std::sync::{Arc, Mutex};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[derive(Default)]
    struct FakeState {
        running: bool,
        url: String,
        accept_login: bool,
        /// Navigating to the listing form bounces to login
        session_dead: bool,
        /// Submitting leaves the browser on the form
        reject_listing: bool,
        filled: Vec<(String, String)>,
        uploads: Vec<PathBuf>,
        /// Whether each upload's file was on disk when it was attached
        present_at_upload: Vec<bool>,
    }

    #[derive(Clone)]
    struct FakeDriver {
        script: MarketplaceScript,
        state: Arc<Mutex<FakeState>>,
    }

    #[async_trait]
    impl BrowserDriver for FakeDriver {
        async fn start(&mut self) -> AdapterResult<()> {
            self.state.lock().unwrap().running = true;
            Ok(())
        }

        fn is_running(&self) -> bool {
            self.state.lock().unwrap().running
        }

        async fn navigate(&self, url: &str) -> AdapterResult<()> {
            let mut state = self.state.lock().unwrap();
            state.url = if state.session_dead && url.contains(self.script.new_listing_path) {
                format!("{}{}", self.script.base_url, self.script.login_path)
            } else {
                url.to_string()
            };
            Ok(())
        }

        async fn current_url(&self) -> AdapterResult<String> {
            Ok(self.state.lock().unwrap().url.clone())
        }

        async fn fill(&self, selector: &str, value: &str) -> AdapterResult<()> {
            self.state
                .lock()
                .unwrap()
                .filled
                .push((selector.to_string(), value.to_string()));
            Ok(())
        }

        async fn click(&self, selector: &str) -> AdapterResult<()> {
            let mut state = self.state.lock().unwrap();
            if selector == self.script.login_button && state.accept_login {
                state.url = format!("{}/feed", self.script.base_url);
            } else if selector == self.script.submit_button && !state.reject_listing {
                state.url = format!("{}{}abc123?ref=new", self.script.base_url, self.script.listing_marker);
            }
            Ok(())
        }

        async fn upload(&self, _selector: &str, path: &Path) -> AdapterResult<()> {
            let mut state = self.state.lock().unwrap();
            state.uploads.push(path.to_path_buf());
            state.present_at_upload.push(path.exists());
            Ok(())
        }

        async fn cookies(&self) -> AdapterResult<Vec<Cookie>> {
            Ok(vec![Cookie {
                name: "sid".to_string(),
                value: "s3cr3t".to_string(),
            }])
        }

        async fn quit(&mut self) -> AdapterResult<bool> {
            let mut state = self.state.lock().unwrap();
            let was = state.running;
            state.running = false;
            Ok(was)
        }
    }

    fn adapter(script: MarketplaceScript, state: FakeState) -> (MarketplaceAdapter, Arc<Mutex<FakeState>>) {
        adapter_with(script, state, &BrowserConfig::default())
    }

    fn adapter_with(
        script: MarketplaceScript,
        state: FakeState,
        config: &BrowserConfig,
    ) -> (MarketplaceAdapter, Arc<Mutex<FakeState>>) {
        let state = Arc::new(Mutex::new(state));
        let driver = FakeDriver {
            script,
            state: state.clone(),
        };
        let adapter = MarketplaceAdapter::new(script, Box::new(driver), config);
        (adapter, state)
    }

    /// Serve a small JPEG body to any request on a local port
    async fn serve_photo() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut request = [0_u8; 2048];
                    let _ = socket.read(&mut request).await;
                    let body: &[u8] = b"\xff\xd8\xff\xe0 not really a jpeg";
                    let head = format!(
                        "HTTP/1.1 200 OK\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                        body.len()
                    );
                    let _ = socket.write_all(head.as_bytes()).await;
                    let _ = socket.write_all(body).await;
                });
            }
        });
        format!("http://{}/photos/front.jpg", addr)
    }

    fn download_config(dir: &TempDir) -> BrowserConfig {
        BrowserConfig {
            download_dir: dir.path().to_string_lossy().to_string(),
            ..Default::default()
        }
    }

    fn entries(dir: &TempDir) -> usize {
        std::fs::read_dir(dir.path()).unwrap().count()
    }

    fn credentials() -> Credentials {
        Credentials {
            username: Some("seller@example.com".to_string()),
            password: Some(SecretString::from("hunter2".to_string())),
            ..Default::default()
        }
    }

    fn listing() -> PostContent {
        PostContent {
            title: "Denim jacket".to_string(),
            description: "Size M".to_string(),
            hashtags: vec!["vintage".to_string()],
            images: vec!["/tmp/jacket-front.jpg".to_string(), "/tmp/jacket-back.jpg".to_string()],
        }
    }

    #[tokio::test]
    async fn test_login_then_list() {
        let (mut posh, state) = adapter(
            POSHMARK,
            FakeState {
                accept_login: true,
                ..Default::default()
            },
        );

        assert!(!posh.validate_connection().await.unwrap());
        assert!(posh.authenticate(&credentials()).await.unwrap());
        assert!(posh.validate_connection().await.unwrap());

        let receipt = posh.post_content(&listing()).await.unwrap();
        assert_eq!(receipt.post_id, "abc123");
        assert!(receipt.url.unwrap().starts_with("https://poshmark.com/listing/"));
        assert_eq!(receipt.metadata["photo_count"], 2);

        let state = state.lock().unwrap();
        assert_eq!(state.uploads.len(), 2);
        assert!(state
            .filled
            .iter()
            .any(|(sel, val)| sel == POSHMARK.description_field && val == "Size M\n\n#vintage"));
    }

    #[tokio::test]
    async fn test_rejected_login_returns_false() {
        let (mut mercari, _state) = adapter(MERCARI, FakeState::default());
        assert!(!mercari.authenticate(&credentials()).await.unwrap());
        assert!(!mercari.validate_connection().await.unwrap());
    }

    #[tokio::test]
    async fn test_missing_password_is_refused_without_browsing() {
        let (mut mercari, state) = adapter(MERCARI, FakeState::default());
        let creds = Credentials {
            username: Some("seller".to_string()),
            ..Default::default()
        };
        assert!(!mercari.authenticate(&creds).await.unwrap());
        assert!(!state.lock().unwrap().running);
    }

    #[tokio::test]
    async fn test_post_without_session_is_session_expired() {
        let (mercari, _state) = adapter(MERCARI, FakeState::default());
        let err = mercari.post_content(&listing()).await.unwrap_err();
        assert!(matches!(err, PlatformError::SessionExpired(_)));
    }

    #[tokio::test]
    async fn test_redirect_to_login_is_session_expired() {
        let (mut mercari, state) = adapter(
            MERCARI,
            FakeState {
                accept_login: true,
                ..Default::default()
            },
        );
        mercari.authenticate(&credentials()).await.unwrap();
        state.lock().unwrap().session_dead = true;

        let err = mercari.post_content(&listing()).await.unwrap_err();
        assert!(matches!(err, PlatformError::SessionExpired(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_form_left_open_is_content_rejected() {
        let (mut mercari, _state) = adapter(
            MERCARI,
            FakeState {
                accept_login: true,
                reject_listing: true,
                ..Default::default()
            },
        );
        mercari.authenticate(&credentials()).await.unwrap();

        let err = mercari.post_content(&listing()).await.unwrap_err();
        assert!(matches!(err, PlatformError::ContentRejected(_)));
    }

    #[tokio::test]
    async fn test_disconnect_closes_browser() {
        let (mut posh, state) = adapter(
            POSHMARK,
            FakeState {
                accept_login: true,
                ..Default::default()
            },
        );
        posh.authenticate(&credentials()).await.unwrap();
        assert!(posh.disconnect().await.unwrap());
        assert!(!state.lock().unwrap().running);
        assert!(!posh.disconnect().await.unwrap());
    }

    #[tokio::test]
    async fn test_downloaded_photos_removed_after_listing() {
        let uploads = TempDir::new().unwrap();
        let (mut posh, state) = adapter_with(
            POSHMARK,
            FakeState {
                accept_login: true,
                ..Default::default()
            },
            &download_config(&uploads),
        );
        posh.authenticate(&credentials()).await.unwrap();

        let mut content = listing();
        content.images = vec![serve_photo().await, "/tmp/jacket-back.jpg".to_string()];
        let receipt = posh.post_content(&content).await.unwrap();
        assert_eq!(receipt.metadata["photo_count"], 2);

        let state = state.lock().unwrap();
        assert!(state.uploads[0].starts_with(uploads.path()));
        assert!(state.present_at_upload[0]);
        assert!(!state.uploads[0].exists());
        assert_eq!(state.uploads[1], PathBuf::from("/tmp/jacket-back.jpg"));
        assert_eq!(entries(&uploads), 0);
    }

    #[tokio::test]
    async fn test_downloaded_photos_removed_after_rejection() {
        let uploads = TempDir::new().unwrap();
        let (mut mercari, state) = adapter_with(
            MERCARI,
            FakeState {
                accept_login: true,
                reject_listing: true,
                ..Default::default()
            },
            &download_config(&uploads),
        );
        mercari.authenticate(&credentials()).await.unwrap();

        let photo = serve_photo().await;
        let mut content = listing();
        content.images = vec![photo.clone(), photo];
        for _ in 0..2 {
            let err = mercari.post_content(&content).await.unwrap_err();
            assert!(matches!(err, PlatformError::ContentRejected(_)));
        }

        let state = state.lock().unwrap();
        assert_eq!(state.uploads.len(), 4);
        assert!(state.present_at_upload.iter().all(|present| *present));
        assert_eq!(entries(&uploads), 0);
    }

    #[test]
    fn test_listing_id_extraction() {
        assert_eq!(
            listing_id("https://www.mercari.com/item/m123/?ref=x", "/item/").as_deref(),
            Some("m123")
        );
        assert!(listing_id("https://www.mercari.com/sell", "/item/").is_none());
    }

    #[test]
    fn test_extension_of_ignores_query() {
        assert_eq!(extension_of("https://cdn.example.com/a/b.jpeg?w=800"), ".jpeg");
        assert_eq!(extension_of("https://cdn.example.com/raw"), "");
    }
}
