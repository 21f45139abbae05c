//! Page generation tool: builds a standalone HTML page or mini-app.

use crate::html::{BRAND_GRADIENT, HtmlGenerator, Palette};
use async_trait::async_trait;
use blocks_core::error::ToolError;
use blocks_core::payload::{
    CREATE_PAGE, ColorScheme, CreatePageInput, PageOutput, PageType, ToolInput, ToolOutput,
};
use blocks_core::store::{ChatStore, PageRecord};
use blocks_core::tool::{Tool, ToolContext, ToolResult};
use std::sync::Arc;
use tracing::info;

const SYSTEM_PROMPT: &str = "You are an expert web developer. Output ONLY raw HTML code. \
Never use markdown code blocks. Never add explanations. \
Just output the HTML starting with <!DOCTYPE html>.";

pub struct CreatePageTool {
    generator: HtmlGenerator,
    store: Arc<dyn ChatStore>,
}

impl CreatePageTool {
    pub fn new(generator: HtmlGenerator, store: Arc<dyn ChatStore>) -> Self {
        Self { generator, store }
    }

    async fn run(&self, args: CreatePageInput, ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        let scheme = args.color_scheme.unwrap_or_default();
        let html = self
            .generator
            .generate(SYSTEM_PROMPT, page_prompt(&args, Palette::for_scheme(scheme)))
            .await?;

        let page = PageRecord {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: ctx.user_id.clone(),
            title: args.title.clone(),
            page_type: args.page_type.as_str().to_string(),
            description: args.description.clone(),
            html_content: html.clone(),
            color_scheme: scheme.as_str().to_string(),
        };
        self.store.save_page(&page).await?;
        info!(page_id = %page.id, page_type = args.page_type.as_str(), "Page created");

        Ok(ToolOutput::Page(PageOutput {
            page_id: page.id,
            message: format!("Page \"{}\" created successfully!", args.title),
            title: args.title,
            page_type: args.page_type,
            preview_html: html,
        }))
    }
}

fn page_prompt(args: &CreatePageInput, colors: Palette) -> String {
    format!(
        "Create a polished, working HTML page. Reply with the complete document only.\n\
\n\
PAGE TYPE: {page_type}\n\
TITLE: {title}\n\
\n\
WHAT THE USER ASKED FOR (follow it exactly):\n\
{description}\n\
\n\
FALLBACK COLORS (only when the user named none):\n\
- Background: {bg}\n\
- Cards and containers: {card}\n\
- Text: {text}\n\
- Primary accent: {accent}\n\
- Secondary accent: {secondary}\n\
- Tertiary accent: {tertiary}\n\
- Gradient: {gradient}\n\
- Muted text: {muted}\n\
- Borders: {border}\n\
\n\
RULES:\n\
1. Colors, fonts and styles the user asked for override the fallbacks above.\n\
2. Plain HTML only: no markdown, no code fences, no commentary.\n\
3. Put all CSS in a <style> tag inside <head>.\n\
4. Put any JavaScript in <script> tags at the end of <body>.\n\
5. Load Inter from Google Fonts unless the user wants another font.\n\
6. Responsive layout that works on phones.\n\
7. Subtle animations and hover states.\n\
8. Forms and buttons must work (an alert on submit is fine).\n\
9. Realistic placeholder content that fits the request.\n\
10. Modern CSS: flexbox or grid, rounded corners, soft shadows.\n\
\n\
Write the full document now:",
        page_type = args.page_type.as_str(),
        title = args.title,
        description = args.description,
        bg = colors.background,
        card = colors.card,
        text = colors.text,
        accent = colors.accent,
        secondary = colors.secondary,
        tertiary = colors.tertiary,
        gradient = BRAND_GRADIENT,
        muted = colors.muted,
        border = colors.border,
    )
}

#[async_trait]
impl Tool for CreatePageTool {
    fn name(&self) -> &str {
        CREATE_PAGE
    }

    fn description(&self) -> &str {
        "Creates a functional page or mini-app from the user's requirements. Use it when the user \
wants something visual: a form (contact, feedback, signup, survey), a dashboard or data display, \
a landing or marketing page, a calculator or other interactive tool, a list, table or card layout, \
or any custom UI component. The page is generated as complete, self-contained HTML."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "pageType": {
                    "type": "string",
                    "enum": PageType::ALL,
                    "description": "The type of page to create"
                },
                "title": {
                    "type": "string",
                    "description": "The title or name of the page"
                },
                "description": {
                    "type": "string",
                    "description": "Detailed description of what the page should contain and do"
                },
                "colorScheme": {
                    "type": "string",
                    "enum": ColorScheme::ALL,
                    "description": "Color scheme for the page (optional, defaults to dark)"
                }
            },
            "required": ["pageType", "title", "description"]
        })
    }

    async fn execute(&self, input: ToolInput, ctx: &ToolContext) -> ToolResult {
        let outcome = match input {
            ToolInput::CreatePage(args) => self.run(args, ctx).await,
            _ => Err(ToolError::InvalidArguments("expected create_page arguments".into())),
        };
        ToolResult::from_outcome(outcome, "Failed to create page")
    }
}
