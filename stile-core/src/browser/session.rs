use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig as ChromiumConfig};
use chromiumoxide::cdp::browser_protocol::page::NavigateParams;
use chromiumoxide::cdp::browser_protocol::target::CreateTargetParams;
use chromiumoxide::page::Page;
use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::BrowserSection;
use crate::task::TaskRequest;
use crate::worker::{BrowserDriver, SessionFactory};

use super::error::{SessionError, SessionResult};
use super::headers::{HeaderProfile, HeaderProfilePool};
use super::proxy::ProxyPool;

const TOKEN_QUERY: &str = r#"(() => {
    const inputs = document.querySelectorAll('input[name="cf-turnstile-response"]');
    for (const input of inputs) {
        if (input.value) {
            return input.value;
        }
    }
    return null;
})()"#;

const WIDGET_CLICK_SELECTORS: &[&str] = &[
    ".cf-turnstile",
    "[data-sitekey]",
    r#"iframe[src*="challenges.cloudflare.com"]"#,
    r#"iframe[src*="turnstile"]"#,
];

const JS_CLICK: &str = "document.querySelector('.cf-turnstile')?.click()";

/// Polls before the session gives up on a page. Combined with the adaptive
/// wait this stays under typical solve timeouts.
const POLL_BUDGET: usize = 20;
/// Poll index at which the overlay fallback is injected when the page never
/// exposed a widget of its own.
const OVERLAY_POLL: usize = 10;
/// Settle time after initial navigation before the first poll.
const SETTLE_DELAY: Duration = Duration::from_secs(3);

/// Builds browser sessions bound to an immutable configuration: variant
/// executable, headless flag, one header profile, and optionally one proxy
/// endpoint. Implements `SessionFactory` so workers can recreate sessions
/// after a fault.
#[derive(Debug, Clone)]
pub struct SessionLauncher {
    config: Arc<BrowserSection>,
    headers: HeaderProfilePool,
    proxies: ProxyPool,
}

impl SessionLauncher {
    pub fn new(config: BrowserSection, headers: HeaderProfilePool, proxies: ProxyPool) -> Self {
        Self {
            config: Arc::new(config),
            headers,
            proxies,
        }
    }

    pub fn config(&self) -> &BrowserSection {
        &self.config
    }

    pub async fn launch(&self) -> SessionResult<BrowserSession> {
        let profile = self.headers.select();
        let proxy = self.proxies.next();
        let chromium_config = self.build_chromium_config(&profile, proxy.as_deref())?;
        info!(
            variant = %self.config.variant,
            browser = %profile.browser,
            version = %profile.version,
            headless = self.config.headless,
            proxy = proxy.as_deref().unwrap_or("none"),
            "launching browser session"
        );

        let (browser, mut handler) = Browser::launch(chromium_config)
            .await
            .map_err(|err| SessionError::Launch(err.to_string()))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(err) = event {
                    debug!(error = %err, "browser handler reported error");
                }
            }
        });

        Ok(BrowserSession {
            browser,
            handler_task: Some(handler_task),
            profile,
            proxy,
            page: None,
        })
    }

    fn build_chromium_config(
        &self,
        profile: &HeaderProfile,
        proxy: Option<&str>,
    ) -> SessionResult<ChromiumConfig> {
        let mut builder = ChromiumConfig::builder().chrome_executable(self.config.executable());

        if !self.config.headless {
            builder = builder.with_head();
        }
        if !self.config.sandbox {
            builder = builder.no_sandbox();
        }

        let [width, height] = self.config.window;
        let mut args = vec![
            format!("--user-agent={}", profile.user_agent),
            format!("--window-size={width},{height}"),
            "--window-position=0,0".to_string(),
            "--no-first-run".to_string(),
            "--disable-dev-shm-usage".to_string(),
            "--disable-blink-features=AutomationControlled".to_string(),
            "--disable-background-timer-throttling".to_string(),
            "--disable-renderer-backgrounding".to_string(),
        ];
        if self.config.disable_gpu {
            args.push("--disable-gpu".to_string());
        }
        if let Some(lang) = &self.config.lang {
            args.push(format!("--lang={lang}"));
        }
        if let Some(proxy) = proxy {
            args.push(format!("--proxy-server={proxy}"));
        }
        args.extend(self.config.extra_args.iter().cloned());

        builder = builder.args(args);
        builder.build().map_err(SessionError::Configuration)
    }
}

#[async_trait]
impl SessionFactory for SessionLauncher {
    async fn create(&self) -> SessionResult<Box<dyn BrowserDriver>> {
        Ok(Box::new(self.launch().await?))
    }
}

/// One long-lived automation-engine instance, owned by exactly one worker.
/// The current page is kept on the session so an interrupted attempt can be
/// cleaned up by `recycle`.
#[derive(Debug)]
pub struct BrowserSession {
    browser: Browser,
    handler_task: Option<JoinHandle<()>>,
    profile: HeaderProfile,
    proxy: Option<String>,
    page: Option<Page>,
}

impl BrowserSession {
    pub fn user_agent(&self) -> &str {
        &self.profile.user_agent
    }

    pub fn proxy(&self) -> Option<&str> {
        self.proxy.as_deref()
    }

    async fn open_page(&mut self, url: &str) -> SessionResult<Page> {
        self.discard_page().await;
        let params = CreateTargetParams::new("about:blank");
        let page = self.browser.new_page(params).await?;
        page.enable_stealth_mode_with_agent(&self.profile.user_agent)
            .await?;
        self.page = Some(page.clone());

        let params = NavigateParams::builder()
            .url(url)
            .build()
            .map_err(SessionError::Configuration)?;
        page.goto(params).await?;
        page.wait_for_navigation().await?;
        Ok(page)
    }

    async fn discard_page(&mut self) {
        if let Some(page) = self.page.take() {
            if let Err(err) = page.close().await {
                debug!(error = %err, "failed to close page");
            }
        }
    }

    async fn poll_token(page: &Page) -> SessionResult<Option<String>> {
        page.evaluate(TOKEN_QUERY)
            .await?
            .into_value::<Option<String>>()
            .map_err(|err| SessionError::Unusable(format!("failed to read token value: {err}")))
    }

    /// Nudges the widget: checkbox/iframe clicks first, JS click as the last
    /// resort. Failures are expected while the challenge renders.
    async fn try_click_strategies(page: &Page) {
        for selector in WIDGET_CLICK_SELECTORS {
            if let Ok(element) = page.find_element(*selector).await {
                if element.click().await.is_ok() {
                    debug!(selector, "clicked challenge widget");
                    return;
                }
            }
        }
        if let Err(err) = page.evaluate(JS_CLICK).await {
            debug!(error = %err, "js click fallback failed");
        }
    }

    /// Injects a Turnstile overlay hosting the site key directly, for pages
    /// that never render a widget themselves.
    async fn inject_overlay(page: &Page, site_key: &str, action: &str) -> SessionResult<()> {
        let script = format!(
            r#"(() => {{
    const existing = document.querySelector('#stile-overlay');
    if (existing) existing.remove();

    const overlay = document.createElement('div');
    overlay.id = 'stile-overlay';
    overlay.style.position = 'absolute';
    overlay.style.top = '0';
    overlay.style.left = '0';
    overlay.style.width = '100vw';
    overlay.style.height = '100vh';
    overlay.style.zIndex = '1000';

    const widget = document.createElement('div');
    widget.className = 'cf-turnstile';
    widget.setAttribute('data-sitekey', '{site_key}');
    widget.setAttribute('data-action', '{action}');
    overlay.appendChild(widget);
    document.body.appendChild(overlay);

    const loader = document.createElement('script');
    loader.src = 'https://challenges.cloudflare.com/turnstile/v0/api.js';
    loader.async = true;
    loader.defer = true;
    document.head.appendChild(loader);
}})()"#
        );
        page.evaluate(script.as_str()).await?;
        Ok(())
    }

    async fn has_token_input(page: &Page) -> bool {
        page.find_element(r#"input[name="cf-turnstile-response"]"#)
            .await
            .is_ok()
    }
}

#[async_trait]
impl BrowserDriver for BrowserSession {
    async fn attempt(&mut self, request: &TaskRequest) -> SessionResult<String> {
        debug!(
            url = %request.url,
            site_key = %request.site_key,
            "starting solve attempt"
        );
        let page = self.open_page(&request.url).await?;
        sleep(SETTLE_DELAY).await;

        let mut consecutive_errors = 0usize;
        for poll in 0..POLL_BUDGET {
            match Self::poll_token(&page).await {
                Ok(Some(token)) => {
                    let prefix = token.get(..10).unwrap_or(&token);
                    info!(token_prefix = prefix, "token captured");
                    self.discard_page().await;
                    return Ok(token);
                }
                Ok(None) => {
                    consecutive_errors = 0;
                }
                Err(err) => {
                    consecutive_errors += 1;
                    debug!(poll, error = %err, "token poll failed");
                    if consecutive_errors >= 5 {
                        // The page stopped answering; treat as a session
                        // fault rather than an unsolved challenge.
                        return Err(err);
                    }
                }
            }

            if poll > 2 && poll % 3 == 0 {
                Self::try_click_strategies(&page).await;
            }
            if poll == OVERLAY_POLL && !Self::has_token_input(&page).await {
                debug!("no widget found, injecting overlay fallback");
                if let Err(err) = Self::inject_overlay(
                    &page,
                    &request.site_key,
                    request.action.as_deref().unwrap_or(""),
                )
                .await
                {
                    debug!(error = %err, "overlay injection failed");
                }
            }

            // Adaptive wait: back off as the challenge stays unsolved.
            let wait_ms = (500 + poll as u64 * 50).min(2000);
            sleep(Duration::from_millis(wait_ms)).await;
        }

        self.discard_page().await;
        Err(SessionError::ChallengeNotSolved)
    }

    async fn recycle(&mut self) -> SessionResult<()> {
        self.discard_page().await;
        // An unanswered version probe means the browser process itself is
        // gone; the worker must recreate the session.
        self.browser
            .version()
            .await
            .map_err(|err| SessionError::Unusable(format!("browser not responding: {err}")))?;
        Ok(())
    }

    async fn close(mut self: Box<Self>) {
        self.discard_page().await;
        if let Err(err) = self.browser.close().await {
            warn!(error = %err, "failed to close browser gracefully");
        }
        if let Some(handle) = self.handler_task.take() {
            handle.abort();
            if let Err(err) = handle.await {
                if !err.is_cancelled() {
                    warn!(error = %err, "browser handler join error");
                }
            }
        }
    }
}

impl Drop for BrowserSession {
    fn drop(&mut self) {
        if let Some(handle) = &self.handler_task {
            if !handle.is_finished() {
                warn!("browser session dropped without explicit close");
            }
        }
    }
}
