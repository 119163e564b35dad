//! Chrome DevTools implementation of the browser traits.
//!
//! Each page subscribes to the Runtime, Log, Network and Fetch domains before
//! navigating. Events are funnelled through one channel and converted to
//! [`RawEvent`]s when the runner drains them; Fetch interception applies the
//! blocking policy.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::fetch::{
    ContinueRequestParams, EnableParams as FetchEnableParams, EventRequestPaused, FailRequestParams,
};
use chromiumoxide::cdp::browser_protocol::log::{EnableParams as LogEnableParams, EventEntryAdded};
use chromiumoxide::cdp::browser_protocol::network::{
    EnableParams as NetworkEnableParams, ErrorReason, EventLoadingFailed, EventRequestWillBeSent,
    EventResponseReceived,
};
use chromiumoxide::cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams;
use chromiumoxide::cdp::js_protocol::runtime::{
    EventConsoleApiCalled, EventExceptionThrown, RemoteObject,
};
use chromiumoxide::handler::viewport::Viewport;
use chromiumoxide::Page;
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::browser::blocking::{BlockRule, BlockingPolicy};
use crate::browser::stealth::LaunchProfile;
use crate::browser::{BrowserInstance, BrowserLauncher, ConsoleLevel, PageHandle, RawEvent};
use crate::cli::config::BrowserSettings;
use crate::error::BrowserError;

/// Launches local Chrome/Chromium processes
pub struct ChromeLauncher {
    profile: LaunchProfile,
    executable: Option<PathBuf>,
}

impl ChromeLauncher {
    pub fn new(settings: &BrowserSettings) -> Self {
        Self {
            profile: LaunchProfile::from_settings(settings),
            executable: settings.executable.clone(),
        }
    }

    fn browser_config(&self) -> Result<BrowserConfig, BrowserError> {
        let mut builder = BrowserConfig::builder()
            .window_size(self.profile.width, self.profile.height)
            .viewport(Viewport {
                width: self.profile.width,
                height: self.profile.height,
                ..Default::default()
            })
            .args(self.profile.args.clone());

        if !self.profile.headless {
            builder = builder.with_head();
        }
        if let Some(path) = &self.executable {
            builder = builder.chrome_executable(path);
        }

        builder.build().map_err(BrowserError::Launch)
    }
}

#[async_trait]
impl BrowserLauncher for ChromeLauncher {
    async fn launch(&self) -> Result<Box<dyn BrowserInstance>, BrowserError> {
        let config = self.browser_config()?;
        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| BrowserError::Launch(e.to_string()))?;

        let connected = Arc::new(AtomicBool::new(true));
        let flag = connected.clone();

        // The handler drives the DevTools connection and must be polled for
        // the browser to make progress
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("DevTools handler error: {}", e);
                }
            }
            flag.store(false, Ordering::SeqCst);
            debug!("DevTools connection closed");
        });

        debug!("Browser launched");

        Ok(Box::new(ChromeInstance {
            browser,
            handler_task: Some(handler_task),
            connected,
            profile: self.profile.clone(),
        }))
    }
}

/// One running browser process
pub struct ChromeInstance {
    browser: Browser,
    handler_task: Option<JoinHandle<()>>,
    connected: Arc<AtomicBool>,
    profile: LaunchProfile,
}

#[async_trait]
impl BrowserInstance for ChromeInstance {
    async fn open_page(&self, policy: &BlockingPolicy) -> Result<Box<dyn PageHandle>, BrowserError> {
        if !self.is_connected() {
            return Err(BrowserError::Disconnected("browser connection is closed".to_string()));
        }

        let page = self
            .browser
            .new_page("about:blank")
            .await
            .map_err(|e| BrowserError::PageCreation(e.to_string()))?;

        match ChromePage::attach(page.clone(), policy.clone(), &self.profile, self.connected.clone()).await {
            Ok(page) => Ok(Box::new(page)),
            Err(e) => {
                // Don't leak the tab when listener setup fails
                if let Err(close_err) = page.close().await {
                    warn!("Failed to close page after setup error: {}", close_err);
                }
                Err(e)
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn close(&mut self) -> Result<(), BrowserError> {
        let result = match self.browser.close().await {
            Ok(_) => {
                if let Err(e) = self.browser.wait().await {
                    warn!("Error waiting for browser process to exit: {}", e);
                }
                Ok(())
            }
            Err(e) => Err(BrowserError::Protocol(e.to_string())),
        };

        if let Some(task) = self.handler_task.take() {
            task.abort();
        }
        self.connected.store(false, Ordering::SeqCst);
        debug!("Browser closed");

        result
    }
}

impl Drop for ChromeInstance {
    fn drop(&mut self) {
        if let Some(task) = self.handler_task.take() {
            task.abort();
        }
    }
}

/// DevTools events kept until the page is drained
enum Captured {
    Console(Arc<EventConsoleApiCalled>),
    Log(Arc<EventEntryAdded>),
    Exception(Arc<EventExceptionThrown>),
    RequestSent(Arc<EventRequestWillBeSent>),
    LoadingFailed(Arc<EventLoadingFailed>),
    Response(Arc<EventResponseReceived>),
}

/// A single tab with event capture and request interception attached
pub struct ChromePage {
    page: Page,
    policy: BlockingPolicy,
    receiver: mpsc::UnboundedReceiver<Captured>,
    /// Documents aborted by the interceptor, keyed by URL
    blocked_documents: Arc<Mutex<HashMap<String, BlockRule>>>,
    /// Request id to URL, filled as requests are drained
    request_urls: HashMap<String, String>,
    connected: Arc<AtomicBool>,
    tasks: Vec<JoinHandle<()>>,
}

impl ChromePage {
    async fn attach(
        page: Page,
        policy: BlockingPolicy,
        profile: &LaunchProfile,
        connected: Arc<AtomicBool>,
    ) -> Result<Self, BrowserError> {
        let protocol = |e: chromiumoxide::error::CdpError| BrowserError::Protocol(e.to_string());

        page.execute(profile.user_agent_override()).await.map_err(protocol)?;
        page.execute(AddScriptToEvaluateOnNewDocumentParams::new(profile.init_script))
            .await
            .map_err(protocol)?;

        // Subscribe before enabling so nothing emitted during enable is lost
        let console = page.event_listener::<EventConsoleApiCalled>().await.map_err(protocol)?;
        let log = page.event_listener::<EventEntryAdded>().await.map_err(protocol)?;
        let exceptions = page.event_listener::<EventExceptionThrown>().await.map_err(protocol)?;
        let sent = page.event_listener::<EventRequestWillBeSent>().await.map_err(protocol)?;
        let failed = page.event_listener::<EventLoadingFailed>().await.map_err(protocol)?;
        let responses = page.event_listener::<EventResponseReceived>().await.map_err(protocol)?;
        let paused = page.event_listener::<EventRequestPaused>().await.map_err(protocol)?;

        page.execute(LogEnableParams::default()).await.map_err(protocol)?;
        page.execute(NetworkEnableParams::default()).await.map_err(protocol)?;
        page.execute(FetchEnableParams::default()).await.map_err(protocol)?;

        let streams: Vec<BoxStream<'static, Captured>> = vec![
            console.map(Captured::Console).boxed(),
            log.map(Captured::Log).boxed(),
            exceptions.map(Captured::Exception).boxed(),
            sent.map(Captured::RequestSent).boxed(),
            failed.map(Captured::LoadingFailed).boxed(),
            responses.map(Captured::Response).boxed(),
        ];
        let mut merged = stream::select_all(streams);

        let (sender, receiver) = mpsc::unbounded_channel();
        let forwarder = tokio::spawn(async move {
            while let Some(event) = merged.next().await {
                if sender.send(event).is_err() {
                    break;
                }
            }
        });

        let blocked_documents = Arc::new(Mutex::new(HashMap::new()));
        let interceptor = tokio::spawn(intercept_requests(
            page.clone(),
            paused,
            policy.clone(),
            blocked_documents.clone(),
        ));

        Ok(Self {
            page,
            policy,
            receiver,
            blocked_documents,
            request_urls: HashMap::new(),
            connected,
            tasks: vec![forwarder, interceptor],
        })
    }

    fn blocked_document(&self, url: &str) -> Option<BlockRule> {
        self.blocked_documents
            .lock()
            .ok()
            .and_then(|blocked| blocked.get(url).cloned())
    }

    fn convert(&mut self, event: Captured) -> Option<RawEvent> {
        match event {
            Captured::Console(event) => {
                let frame = event
                    .stack_trace
                    .as_ref()
                    .and_then(|trace| trace.call_frames.first());
                Some(RawEvent::Console {
                    level: ConsoleLevel::parse(&format!("{:?}", event.r#type)),
                    text: console_text(&event.args),
                    url: frame.map(|f| f.url.clone()).filter(|u| !u.is_empty()),
                    line: frame.map(|f| f.line_number + 1),
                })
            }
            Captured::Log(event) => {
                let entry = &event.entry;
                Some(RawEvent::Console {
                    level: ConsoleLevel::parse(&format!("{:?}", entry.level)),
                    text: Some(entry.text.clone()),
                    url: entry.url.clone(),
                    line: entry.line_number.map(|line| line + 1),
                })
            }
            Captured::Exception(event) => {
                let details = &event.exception_details;
                let description = details
                    .exception
                    .as_ref()
                    .and_then(|exception| exception.description.clone());
                let (message, stack) = match description {
                    Some(description) => split_description(&description),
                    None => (details.text.clone(), None),
                };
                let frame = details
                    .stack_trace
                    .as_ref()
                    .and_then(|trace| trace.call_frames.first());
                Some(RawEvent::PageError {
                    message: Some(message),
                    stack,
                    url: details
                        .url
                        .clone()
                        .or_else(|| frame.map(|f| f.url.clone()))
                        .filter(|u| !u.is_empty()),
                    line: Some(details.line_number + 1),
                })
            }
            Captured::RequestSent(event) => {
                self.request_urls
                    .insert(event.request_id.inner().clone(), event.request.url.clone());
                None
            }
            Captured::LoadingFailed(event) => Some(RawEvent::RequestFailed {
                url: self.request_urls.get(event.request_id.inner()).cloned(),
                error_text: Some(event.error_text.clone()),
                resource_type: Some(format!("{:?}", event.r#type)),
            }),
            Captured::Response(event) => Some(RawEvent::Response {
                url: Some(event.response.url.clone()),
                status: event.response.status,
                status_text: Some(event.response.status_text.clone()),
            }),
        }
    }

    fn stop_tasks(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

#[async_trait]
impl PageHandle for ChromePage {
    async fn navigate(&mut self, url: &str) -> Result<(), BrowserError> {
        debug!("Navigating to: {}", url);
        match self.page.goto(url).await {
            Ok(_) => Ok(()),
            Err(e) => {
                let reason = e.to_string();
                let blocked = self.blocked_document(url);
                if let Some(rule) = self.policy.explains_navigation_abort(url, &reason, blocked.as_ref()) {
                    return Err(BrowserError::BlockedByPolicy {
                        url: url.to_string(),
                        rule: rule.to_string(),
                    });
                }
                if !self.connected.load(Ordering::SeqCst) {
                    return Err(BrowserError::Disconnected(reason));
                }
                Err(BrowserError::Navigation {
                    url: url.to_string(),
                    reason,
                })
            }
        }
    }

    fn drain_events(&mut self) -> Vec<RawEvent> {
        let mut captured = Vec::new();
        while let Ok(event) = self.receiver.try_recv() {
            captured.push(event);
        }

        // Request ids first, so failures can be matched to their URL
        // regardless of arrival order
        for event in &captured {
            if let Captured::RequestSent(sent) = event {
                self.request_urls
                    .insert(sent.request_id.inner().clone(), sent.request.url.clone());
            }
        }

        captured
            .into_iter()
            .filter_map(|event| self.convert(event))
            .collect()
    }

    async fn close(mut self: Box<Self>) -> Result<(), BrowserError> {
        self.stop_tasks();
        let page = self.page.clone();
        page.close()
            .await
            .map_err(|e| BrowserError::Protocol(e.to_string()))
    }
}

impl Drop for ChromePage {
    fn drop(&mut self) {
        self.stop_tasks();
    }
}

/// Continue or fail every paused request according to the policy
async fn intercept_requests(
    page: Page,
    mut paused: chromiumoxide::listeners::EventStream<EventRequestPaused>,
    policy: BlockingPolicy,
    blocked_documents: Arc<Mutex<HashMap<String, BlockRule>>>,
) {
    while let Some(event) = paused.next().await {
        let resource_type = format!("{:?}", event.resource_type);
        match policy.decide(&resource_type, &event.request.url) {
            Some(rule) => {
                if resource_type.eq_ignore_ascii_case("document") {
                    if let Ok(mut blocked) = blocked_documents.lock() {
                        blocked.insert(event.request.url.clone(), rule.clone());
                    }
                }
                let params = FailRequestParams::new(event.request_id.clone(), ErrorReason::BlockedByClient);
                if let Err(e) = page.execute(params).await {
                    debug!("Failed to abort {}: {}", event.request.url, e);
                }
            }
            None => {
                if let Err(e) = page.execute(ContinueRequestParams::new(event.request_id.clone())).await {
                    debug!("Failed to continue {}: {}", event.request.url, e);
                }
            }
        }
    }
}

fn console_text(args: &[RemoteObject]) -> Option<String> {
    let parts: Vec<String> = args
        .iter()
        .filter_map(|arg| match &arg.value {
            Some(serde_json::Value::String(s)) => Some(s.clone()),
            Some(value) => Some(value.to_string()),
            None => arg.description.clone(),
        })
        .collect();

    if parts.is_empty() {
        None
    } else {
        Some(parts.join(" "))
    }
}

/// Split a V8 error description into its message line and stack summary
fn split_description(description: &str) -> (String, Option<String>) {
    let mut lines = description.lines();
    let message = lines.next().unwrap_or_default().trim().to_string();
    let stack: Vec<&str> = lines.map(str::trim).filter(|l| !l.is_empty()).take(5).collect();
    if stack.is_empty() {
        (message, None)
    } else {
        (message, Some(stack.join("\n")))
    }
}
