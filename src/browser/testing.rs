//! Scripted in-memory browser for exercising the crawler without Chrome.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::browser::{BlockingPolicy, BrowserInstance, BrowserLauncher, ConsoleLevel, PageHandle, RawEvent};
use crate::error::BrowserError;

/// What one navigation attempt does
#[derive(Debug, Clone)]
pub enum Outcome {
    /// Load after `delay`, emitting `events`
    Load { events: Vec<RawEvent>, delay: Duration },
    /// Never finish; the runner's timeout fires
    Hang,
    /// Fail immediately with this error
    Fail(BrowserError),
}

impl Outcome {
    pub fn clean() -> Self {
        Outcome::Load { events: Vec::new(), delay: Duration::from_millis(10) }
    }

    pub fn events(events: Vec<RawEvent>) -> Self {
        Outcome::Load { events, delay: Duration::from_millis(10) }
    }

    pub fn slow(delay: Duration) -> Self {
        Outcome::Load { events: Vec::new(), delay }
    }
}

pub fn console_error(text: &str, url: Option<&str>) -> RawEvent {
    RawEvent::Console {
        level: ConsoleLevel::Error,
        text: Some(text.to_string()),
        url: url.map(str::to_string),
        line: Some(1),
    }
}

#[derive(Debug, Default)]
pub struct Stats {
    pub launches: usize,
    pub instances_closed: usize,
    /// Pages opened per successfully launched instance, in launch order
    pub pages_per_instance: Vec<usize>,
    pub pages_open: usize,
    pub max_pages_open: usize,
    pub pages_closed: usize,
    pub attempts: HashMap<String, usize>,
}

#[derive(Default)]
struct Shared {
    scripts: HashMap<String, VecDeque<Outcome>>,
    stats: Stats,
    /// Launch numbers (1-based) that fail
    failing_launches: Vec<usize>,
    /// Launch numbers whose instance reports itself disconnected after open
    disconnecting_launches: Vec<usize>,
}

/// Launcher whose pages follow per-URL scripts. Unscripted URLs load cleanly.
#[derive(Clone, Default)]
pub struct ScriptedLauncher {
    shared: Arc<Mutex<Shared>>,
}

impl ScriptedLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue outcomes for successive attempts on `url`; the last one repeats
    pub fn script(self, url: &str, outcomes: Vec<Outcome>) -> Self {
        self.shared
            .lock()
            .unwrap()
            .scripts
            .insert(url.to_string(), outcomes.into());
        self
    }

    pub fn fail_launch(self, launch_number: usize) -> Self {
        self.shared.lock().unwrap().failing_launches.push(launch_number);
        self
    }

    pub fn disconnect_launch(self, launch_number: usize) -> Self {
        self.shared.lock().unwrap().disconnecting_launches.push(launch_number);
        self
    }

    pub fn with_stats<T>(&self, f: impl FnOnce(&Stats) -> T) -> T {
        f(&self.shared.lock().unwrap().stats)
    }

    pub fn attempts(&self, url: &str) -> usize {
        self.with_stats(|stats| stats.attempts.get(url).copied().unwrap_or(0))
    }
}

#[async_trait]
impl BrowserLauncher for ScriptedLauncher {
    async fn launch(&self) -> Result<Box<dyn BrowserInstance>, BrowserError> {
        let mut shared = self.shared.lock().unwrap();
        shared.stats.launches += 1;
        let number = shared.stats.launches;
        if shared.failing_launches.contains(&number) {
            return Err(BrowserError::Launch(format!("launch {} refused", number)));
        }
        // refused launches get no slot, so index by instances actually created
        let index = shared.stats.pages_per_instance.len();
        shared.stats.pages_per_instance.push(0);
        let disconnects = shared.disconnecting_launches.contains(&number);
        Ok(Box::new(ScriptedInstance {
            shared: self.shared.clone(),
            index,
            disconnects,
        }))
    }
}

struct ScriptedInstance {
    shared: Arc<Mutex<Shared>>,
    index: usize,
    disconnects: bool,
}

#[async_trait]
impl BrowserInstance for ScriptedInstance {
    async fn open_page(&self, _policy: &BlockingPolicy) -> Result<Box<dyn PageHandle>, BrowserError> {
        let mut shared = self.shared.lock().unwrap();
        shared.stats.pages_per_instance[self.index] += 1;
        shared.stats.pages_open += 1;
        shared.stats.max_pages_open = shared.stats.max_pages_open.max(shared.stats.pages_open);
        Ok(Box::new(ScriptedPage {
            shared: self.shared.clone(),
            events: Vec::new(),
        }))
    }

    fn is_connected(&self) -> bool {
        !(self.disconnects && self.shared.lock().unwrap().stats.pages_per_instance[self.index] > 0)
    }

    async fn close(&mut self) -> Result<(), BrowserError> {
        self.shared.lock().unwrap().stats.instances_closed += 1;
        Ok(())
    }
}

struct ScriptedPage {
    shared: Arc<Mutex<Shared>>,
    events: Vec<RawEvent>,
}

#[async_trait]
impl PageHandle for ScriptedPage {
    async fn navigate(&mut self, url: &str) -> Result<(), BrowserError> {
        let outcome = {
            let mut shared = self.shared.lock().unwrap();
            *shared.stats.attempts.entry(url.to_string()).or_default() += 1;
            let next = match shared.scripts.get_mut(url) {
                Some(queue) if queue.len() > 1 => queue.pop_front(),
                Some(queue) => queue.front().cloned(),
                None => None,
            };
            next.unwrap_or_else(Outcome::clean)
        };

        match outcome {
            Outcome::Load { events, delay } => {
                tokio::time::sleep(delay).await;
                self.events = events;
                Ok(())
            }
            Outcome::Hang => {
                std::future::pending::<()>().await;
                Ok(())
            }
            Outcome::Fail(error) => Err(error),
        }
    }

    fn drain_events(&mut self) -> Vec<RawEvent> {
        std::mem::take(&mut self.events)
    }

    async fn close(self: Box<Self>) -> Result<(), BrowserError> {
        let mut shared = self.shared.lock().unwrap();
        shared.stats.pages_open -= 1;
        shared.stats.pages_closed += 1;
        Ok(())
    }
}
