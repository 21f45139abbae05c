//! HTML generation through the model, shared by the page and report tools.
//!
//! Both tools ask the model for a complete HTML document with a one-shot
//! (non-streaming) completion, then strip whatever wrapping the model added
//! around it.

use blocks_core::error::ToolError;
use blocks_core::message::Message;
use blocks_core::payload::ColorScheme;
use blocks_core::provider::{Provider, ProviderRequest};
use std::sync::Arc;
use tracing::debug;

/// Default completion budget for one generated document.
pub const DEFAULT_MAX_TOKENS: u32 = 4000;

/// Brand gradient used in every generated document.
pub const BRAND_GRADIENT: &str = "linear-gradient(135deg, #FF6B6B 0%, #69D2E7 50%, #1ABC9C 100%)";

/// Colors handed to the model for a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Palette {
    pub background: &'static str,
    pub card: &'static str,
    pub text: &'static str,
    pub accent: &'static str,
    pub secondary: &'static str,
    pub tertiary: &'static str,
    pub muted: &'static str,
    pub border: &'static str,
}

impl Palette {
    pub fn for_scheme(scheme: ColorScheme) -> Self {
        match scheme {
            ColorScheme::Dark => Self {
                background: "#1a1a2e",
                card: "rgba(255, 255, 255, 0.05)",
                text: "#ffffff",
                accent: "#69D2E7",
                secondary: "#FF6B6B",
                tertiary: "#1ABC9C",
                muted: "#8c8c8c",
                border: "rgba(255, 255, 255, 0.1)",
            },
            ColorScheme::Light => Self {
                background: "#ffffff",
                card: "#fafafa",
                text: "#1a1a2e",
                accent: "#69D2E7",
                secondary: "#FF6B6B",
                tertiary: "#1ABC9C",
                muted: "#5c5c6d",
                border: "#e8e8e8",
            },
            ColorScheme::Blue => Self {
                background: "#1a1a2e",
                card: "rgba(105, 210, 231, 0.1)",
                text: "#ffffff",
                accent: "#69D2E7",
                secondary: "#5DADE2",
                tertiary: "#1ABC9C",
                muted: "#b3b3b3",
                border: "rgba(105, 210, 231, 0.3)",
            },
            ColorScheme::Green => Self {
                background: "#1a1a2e",
                card: "rgba(26, 188, 156, 0.1)",
                text: "#ffffff",
                accent: "#1ABC9C",
                secondary: "#69D2E7",
                tertiary: "#00C853",
                muted: "#b3b3b3",
                border: "rgba(26, 188, 156, 0.3)",
            },
            ColorScheme::Purple => Self {
                background: "#1a1a2e",
                card: "rgba(255, 107, 107, 0.1)",
                text: "#ffffff",
                accent: "#FF6B6B",
                secondary: "#69D2E7",
                tertiary: "#1ABC9C",
                muted: "#b3b3b3",
                border: "rgba(255, 107, 107, 0.3)",
            },
        }
    }
}

/// Strip markdown fences and any preamble before the doctype.
pub fn clean_html(raw: &str) -> String {
    let mut html = raw.trim();

    if let Some(rest) = strip_prefix_ignore_case(html, "```html") {
        html = rest.trim_start();
    } else if let Some(rest) = html.strip_prefix("```") {
        html = rest.trim_start();
    }
    if let Some(rest) = html.strip_suffix("```") {
        html = rest.trim_end();
    }
    let html = html.trim();

    let lower = html.to_ascii_lowercase();
    if !lower.starts_with("<!doctype") {
        if let Some(start) = lower.find("<!doctype") {
            return html[start..].to_string();
        }
    }
    html.to_string()
}

fn strip_prefix_ignore_case<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    let head = s.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix).then(|| &s[prefix.len()..])
}

/// Asks the model for one complete HTML document.
#[derive(Clone)]
pub struct HtmlGenerator {
    provider: Arc<dyn Provider>,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl HtmlGenerator {
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            temperature: 0.7,
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Run one completion and return the cleaned document.
    pub async fn generate(&self, system: &str, prompt: String) -> Result<String, ToolError> {
        let mut request = ProviderRequest::new(
            self.model.clone(),
            vec![Message::system(system), Message::user(prompt)],
        );
        request.temperature = self.temperature;
        request.max_tokens = Some(self.max_tokens);

        let response = self.provider.complete(request).await?;
        let html = clean_html(&response.message.content);
        debug!(model = %self.model, bytes = html.len(), "Generated HTML document");

        if html.is_empty() {
            return Err(ToolError::ExecutionFailed {
                tool_name: "html".into(),
                reason: "model returned an empty document".into(),
            });
        }
        Ok(html)
    }
}
