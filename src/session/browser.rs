//! Headless Chromium session provider.
//!
//! Each acquisition launches a fresh browser on its own proxy identity,
//! visits a known item page so the anti-bot scripts run and set their
//! cookies, harvests the jar and tears the browser down again.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::fetch::{
    AuthChallengeResponse, AuthChallengeResponseResponse, ContinueRequestParams,
    ContinueWithAuthParams, EnableParams, EventAuthRequired, EventRequestPaused,
};
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use tokio::task::JoinHandle;

use super::{ProxyIdentity, SessionError, SessionProvider};
use crate::fetch::CHROME_124;
use crate::protocol::Session;

pub const WARMUP_URL: &str = "https://www.goofish.com/item?id=995598771021";

#[derive(Debug, Clone)]
pub struct BrowserSessionConfig {
    pub headless: bool,
    pub warmup_url: String,
    pub navigation_timeout: Duration,
    pub settle_delay: Duration,
    pub window: (u32, u32),
    pub locale: String,
    pub user_agent: String,
    pub chrome_executable: Option<PathBuf>,
    pub extra_args: Vec<String>,
}

impl Default for BrowserSessionConfig {
    fn default() -> Self {
        Self {
            headless: true,
            warmup_url: WARMUP_URL.to_string(),
            navigation_timeout: Duration::from_secs(120),
            settle_delay: Duration::from_secs(8),
            window: (1920, 1080),
            locale: "zh-CN".to_string(),
            user_agent: CHROME_124.user_agent.to_string(),
            chrome_executable: None,
            extra_args: Vec::new(),
        }
    }
}

impl BrowserSessionConfig {
    pub fn with_headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }

    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    pub fn with_navigation_timeout(mut self, timeout: Duration) -> Self {
        self.navigation_timeout = timeout;
        self
    }

    pub fn with_chrome_executable(mut self, path: impl Into<PathBuf>) -> Self {
        self.chrome_executable = Some(path.into());
        self
    }

    fn launch_config(&self, identity: &ProxyIdentity) -> Result<BrowserConfig, SessionError> {
        let (width, height) = self.window;
        let mut builder = BrowserConfig::builder()
            .window_size(width, height)
            .arg(format!("--user-agent={}", self.user_agent))
            .arg(format!("--lang={}", self.locale))
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--disable-infobars")
            .arg("--disable-dev-shm-usage")
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            .arg("--disable-background-networking")
            .arg("--disable-sync")
            .arg("--no-sandbox");

        if !self.headless {
            builder = builder.with_head();
        }
        if let Some(path) = &self.chrome_executable {
            builder = builder.chrome_executable(path);
        }
        if let Some(server) = identity.server() {
            builder = builder.arg(format!("--proxy-server={server}"));
        }
        for arg in &self.extra_args {
            builder = builder.arg(arg);
        }

        builder.build().map_err(SessionError::Launch)
    }
}

/// [`SessionProvider`] backed by a real Chromium instance per acquisition.
pub struct BrowserSessionProvider {
    config: BrowserSessionConfig,
}

impl BrowserSessionProvider {
    pub fn new(config: BrowserSessionConfig) -> Self {
        Self { config }
    }

    async fn harvest(&self, browser: &Browser, identity: &ProxyIdentity) -> Result<Session, SessionError> {
        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|err| SessionError::Launch(err.to_string()))?;

        let auth_task = if identity.has_credentials() {
            Some(answer_proxy_auth(&page, identity).await?)
        } else {
            None
        };

        let result = self.warm_up_and_collect(browser, &page, identity).await;

        if let Some(task) = auth_task {
            task.abort();
        }
        let _ = page.close().await;
        result
    }

    async fn warm_up_and_collect(
        &self,
        browser: &Browser,
        page: &Page,
        identity: &ProxyIdentity,
    ) -> Result<Session, SessionError> {
        log::debug!("sid={} warming up on {}", identity.session_id, self.config.warmup_url);
        match tokio::time::timeout(self.config.navigation_timeout, page.goto(self.config.warmup_url.as_str())).await {
            Ok(Ok(_)) => {}
            Ok(Err(err)) => return Err(SessionError::Navigation(err.to_string())),
            Err(_) => {
                return Err(SessionError::Navigation(format!(
                    "timed out after {:?}",
                    self.config.navigation_timeout
                )));
            }
        }

        tokio::time::sleep(self.config.settle_delay).await;

        let cookies = browser
            .get_cookies()
            .await
            .map_err(|err| SessionError::Cookies(err.to_string()))?;

        let jar: BTreeMap<String, String> = cookies
            .into_iter()
            .map(|cookie| (cookie.name, cookie.value))
            .collect();
        log::debug!("sid={} harvested {} cookies", identity.session_id, jar.len());

        Ok(Session::from_cookies(jar, identity.endpoint(), identity.session_id.clone()))
    }
}

impl Default for BrowserSessionProvider {
    fn default() -> Self {
        Self::new(BrowserSessionConfig::default())
    }
}

/// Answers proxy authentication challenges on `page` with the identity's
/// credentials and lets every other paused request through.
async fn answer_proxy_auth(page: &Page, identity: &ProxyIdentity) -> Result<JoinHandle<()>, SessionError> {
    let mut auth_events = page
        .event_listener::<EventAuthRequired>()
        .await
        .map_err(|err| SessionError::Launch(err.to_string()))?;
    let mut paused_events = page
        .event_listener::<EventRequestPaused>()
        .await
        .map_err(|err| SessionError::Launch(err.to_string()))?;

    page.execute(EnableParams::builder().handle_auth_requests(true).build())
        .await
        .map_err(|err| SessionError::Launch(err.to_string()))?;

    let page = page.clone();
    let username = identity.username.clone();
    let password = identity.password.clone();

    Ok(tokio::spawn(async move {
        loop {
            tokio::select! {
                Some(event) = auth_events.next() => {
                    let response = AuthChallengeResponse {
                        response: AuthChallengeResponseResponse::ProvideCredentials,
                        username: Some(username.clone()),
                        password: Some(password.clone()),
                    };
                    let params = ContinueWithAuthParams::new(event.request_id.clone(), response);
                    if let Err(err) = page.execute(params).await {
                        log::warn!("proxy auth reply failed: {}", err);
                    }
                }
                Some(event) = paused_events.next() => {
                    let _ = page.execute(ContinueRequestParams::new(event.request_id.clone())).await;
                }
                else => break,
            }
        }
    }))
}

#[async_trait]
impl SessionProvider for BrowserSessionProvider {
    async fn acquire(&self, identity: &ProxyIdentity) -> Result<Session, SessionError> {
        let config = self.config.launch_config(identity)?;
        log::info!(
            "Launching browser sid={} proxy={}",
            identity.session_id,
            identity.server().as_deref().unwrap_or("direct")
        );

        let (mut browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|err| SessionError::Launch(err.to_string()))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        let result = self.harvest(&browser, identity).await;

        // Tear down on every path, including failed warm-ups.
        if let Err(err) = browser.close().await {
            log::debug!("browser close failed: {}", err);
        }
        let _ = browser.wait().await;
        handler_task.abort();

        let session = result?;
        if session.is_usable() {
            log::info!(
                "Session sid={} ready token={}...",
                session.session_id,
                session.token_preview()
            );
        } else {
            log::warn!("Session sid={} came back without token", session.session_id);
        }
        Ok(session)
    }
}
