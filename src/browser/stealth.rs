use chromiumoxide::cdp::browser_protocol::network::SetUserAgentOverrideParams;

use crate::cli::config::BrowserSettings;

/// Runs before any page script to hide the usual automation tells.
pub const STEALTH_SCRIPT: &str = r#"
Object.defineProperty(navigator, 'webdriver', { get: () => undefined });
Object.defineProperty(navigator, 'languages', { get: () => ['en-US', 'en'] });
Object.defineProperty(navigator, 'plugins', { get: () => [1, 2, 3, 4, 5] });
window.chrome = window.chrome || { runtime: {} };
"#;

/// Fixed launch configuration for a session's browser.
///
/// Every session launches with the same profile so results do not depend on
/// which instance happened to load a page.
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchProfile {
    pub headless: bool,
    pub width: u32,
    pub height: u32,
    pub user_agent: String,
    pub locale: String,
    pub args: Vec<String>,
    pub init_script: &'static str,
}

impl LaunchProfile {
    pub fn from_settings(settings: &BrowserSettings) -> Self {
        let width = settings.viewport.width;
        let height = settings.viewport.height;

        let mut args = vec![
            // Sandboxing is unavailable in most containers
            "--no-sandbox".to_string(),
            "--disable-setuid-sandbox".to_string(),
            "--disable-dev-shm-usage".to_string(),
            "--disable-gpu".to_string(),
            // Fingerprinting protection
            "--disable-blink-features=AutomationControlled".to_string(),
            format!("--lang={}", settings.locale),
            format!("--window-size={},{}", width, height),
        ];
        args.extend(settings.extra_args.iter().cloned());

        Self {
            headless: settings.headless,
            width,
            height,
            user_agent: settings.user_agent.clone(),
            locale: settings.locale.clone(),
            args,
            init_script: STEALTH_SCRIPT,
        }
    }

    /// Per-page override so workers and `navigator` agree with the request headers
    pub fn user_agent_override(&self) -> SetUserAgentOverrideParams {
        let mut params = SetUserAgentOverrideParams::new(self.user_agent.clone());
        params.accept_language = Some(self.locale.clone());
        params
    }
}
