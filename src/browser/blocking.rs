use std::collections::HashSet;
use std::fmt;

use url::Url;

use crate::cli::config::BlockingSettings;

/// Net error strings the browser reports for loads we cancelled ourselves
const ABORT_MARKERS: &[&str] = &["net::ERR_ABORTED", "net::ERR_BLOCKED_BY_CLIENT"];

/// Why a request was blocked
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockRule {
    /// Heavy subresource type (image, font, media, stylesheet)
    ResourceType(String),
    /// Document whose path ends in a non-HTML extension (pdf, zip, ...)
    DocumentExtension(String),
}

impl fmt::Display for BlockRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockRule::ResourceType(kind) => write!(f, "resource type {}", kind),
            BlockRule::DocumentExtension(ext) => write!(f, "non-HTML document .{}", ext),
        }
    }
}

/// Request interception rules applied to every page
#[derive(Debug, Clone, Default)]
pub struct BlockingPolicy {
    resource_types: HashSet<String>,
    document_extensions: HashSet<String>,
}

impl BlockingPolicy {
    pub fn new<R, D>(resource_types: R, document_extensions: D) -> Self
    where
        R: IntoIterator,
        R::Item: AsRef<str>,
        D: IntoIterator,
        D::Item: AsRef<str>,
    {
        Self {
            resource_types: resource_types
                .into_iter()
                .map(|t| t.as_ref().to_ascii_lowercase())
                .collect(),
            document_extensions: document_extensions
                .into_iter()
                .map(|e| e.as_ref().trim_start_matches('.').to_ascii_lowercase())
                .collect(),
        }
    }

    pub fn from_settings(settings: &BlockingSettings) -> Self {
        Self::new(&settings.resource_types, &settings.document_extensions)
    }

    /// Decide whether a request should be aborted.
    ///
    /// `resource_type` uses the DevTools names, case-insensitively.
    pub fn decide(&self, resource_type: &str, url: &str) -> Option<BlockRule> {
        let resource_type = resource_type.to_ascii_lowercase();
        if self.resource_types.contains(&resource_type) {
            return Some(BlockRule::ResourceType(resource_type));
        }
        if resource_type == "document" {
            return self.document_rule(url);
        }
        None
    }

    /// The named rule behind reclassifying a failed navigation as a policy abort.
    ///
    /// Applies when the interceptor blocked the primary document itself, or
    /// when the browser reports an abort for a URL whose extension the policy
    /// blocks (some downloads are cancelled before interception sees them).
    pub fn explains_navigation_abort(
        &self,
        url: &str,
        error_text: &str,
        blocked_document: Option<&BlockRule>,
    ) -> Option<BlockRule> {
        if let Some(rule) = blocked_document {
            return Some(rule.clone());
        }
        if !is_abort_error(error_text) {
            return None;
        }
        self.document_rule(url)
    }

    fn document_rule(&self, url: &str) -> Option<BlockRule> {
        let ext = path_extension(url)?;
        if self.document_extensions.contains(&ext) {
            Some(BlockRule::DocumentExtension(ext))
        } else {
            None
        }
    }
}

/// True for the error strings produced by an intentionally cancelled load
pub fn is_abort_error(text: &str) -> bool {
    ABORT_MARKERS.iter().any(|marker| text.contains(marker))
}

fn path_extension(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let last = parsed.path_segments()?.last()?;
    let (_, ext) = last.rsplit_once('.')?;
    if ext.is_empty() {
        None
    } else {
        Some(ext.to_ascii_lowercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> BlockingPolicy {
        BlockingPolicy::new(["image", "font", "media", "stylesheet"], ["pdf", ".zip"])
    }

    #[test]
    fn blocks_heavy_resource_types() {
        let policy = policy();
        assert_eq!(
            policy.decide("Image", "https://example.com/logo.png"),
            Some(BlockRule::ResourceType("image".to_string()))
        );
        assert!(policy.decide("Stylesheet", "https://example.com/site.css").is_some());
        assert!(policy.decide("Script", "https://example.com/app.js").is_none());
    }

    #[test]
    fn blocks_non_html_documents_only() {
        let policy = policy();
        assert_eq!(
            policy.decide("Document", "https://example.com/files/Report.PDF?dl=1"),
            Some(BlockRule::DocumentExtension("pdf".to_string()))
        );
        assert!(policy.decide("Document", "https://example.com/archive.zip").is_some());
        assert!(policy.decide("Document", "https://example.com/page.html").is_none());
        assert!(policy.decide("Document", "https://example.com/").is_none());
        // A script fetching a pdf is not a document navigation
        assert!(policy.decide("Fetch", "https://example.com/a.pdf").is_none());
    }

    #[test]
    fn navigation_abort_needs_abort_error_and_blocked_extension() {
        let policy = policy();
        assert!(policy
            .explains_navigation_abort("https://example.com/a.pdf", "net::ERR_ABORTED at https://example.com/a.pdf", None)
            .is_some());
        assert!(policy
            .explains_navigation_abort("https://example.com/a.pdf", "net::ERR_NAME_NOT_RESOLVED", None)
            .is_none());
        assert!(policy
            .explains_navigation_abort("https://example.com/page", "net::ERR_ABORTED", None)
            .is_none());
    }

    #[test]
    fn interceptor_block_always_explains_abort() {
        let rule = BlockRule::DocumentExtension("pdf".to_string());
        let explained = policy().explains_navigation_abort("https://example.com/download", "anything", Some(&rule));
        assert_eq!(explained, Some(rule));
    }
}
