//! Typed tool payloads.
//!
//! The two built-in tools get individually typed input and output shapes.
//! Anything else (a tool registered by an embedder) falls back to raw JSON.
//! All variants serialize untagged, so the wire shape is exactly the JSON
//! the model produced or the tool returned.

use serde::{Deserialize, Serialize};

/// Name of the page-generation tool.
pub const CREATE_PAGE: &str = "create_page";

/// Name of the data-analysis tool.
pub const ANALYZE_DATA: &str = "analyze_data";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PageType {
    Form,
    Dashboard,
    Landing,
    Calculator,
    List,
    Custom,
}

impl PageType {
    pub const ALL: [&'static str; 6] = ["form", "dashboard", "landing", "calculator", "list", "custom"];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Form => "form",
            Self::Dashboard => "dashboard",
            Self::Landing => "landing",
            Self::Calculator => "calculator",
            Self::List => "list",
            Self::Custom => "custom",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorScheme {
    Light,
    #[default]
    Dark,
    Blue,
    Green,
    Purple,
}

impl ColorScheme {
    pub const ALL: [&'static str; 5] = ["light", "dark", "blue", "green", "purple"];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Light => "light",
            Self::Dark => "dark",
            Self::Blue => "blue",
            Self::Green => "green",
            Self::Purple => "purple",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisType {
    Summary,
    Trends,
    Comparison,
    Distribution,
    Report,
}

impl AnalysisType {
    pub const ALL: [&'static str; 5] = ["summary", "trends", "comparison", "distribution", "report"];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Summary => "summary",
            Self::Trends => "trends",
            Self::Comparison => "comparison",
            Self::Distribution => "distribution",
            Self::Report => "report",
        }
    }
}

/// Arguments for `create_page`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePageInput {
    pub page_type: PageType,
    pub title: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color_scheme: Option<ColorScheme>,
}

/// Arguments for `analyze_data`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeDataInput {
    pub data: String,
    pub analysis_type: AnalysisType,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question: Option<String>,
}

/// Parsed arguments of one tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolInput {
    CreatePage(CreatePageInput),
    AnalyzeData(AnalyzeDataInput),
    Other(serde_json::Value),
}

impl ToolInput {
    /// Parse the raw argument text the model streamed for `tool`.
    ///
    /// Known tools must match their typed shape; unknown tools only need to
    /// be valid JSON.
    pub fn parse(tool: &str, raw: &str) -> Result<Self, serde_json::Error> {
        let value: serde_json::Value = serde_json::from_str(raw)?;
        Self::from_value(tool, value)
    }

    pub fn from_value(tool: &str, value: serde_json::Value) -> Result<Self, serde_json::Error> {
        match tool {
            CREATE_PAGE => serde_json::from_value(value).map(Self::CreatePage),
            ANALYZE_DATA => serde_json::from_value(value).map(Self::AnalyzeData),
            _ => Ok(Self::Other(value)),
        }
    }
}

/// Successful output of `create_page`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageOutput {
    pub page_id: String,
    pub title: String,
    pub page_type: PageType,
    pub message: String,
    pub preview_html: String,
}

/// Successful output of `analyze_data`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportOutput {
    pub title: String,
    pub analysis_type: AnalysisType,
    pub summary: String,
    pub report_html: String,
    pub message: String,
}

/// The `data` payload of a successful tool result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolOutput {
    Page(PageOutput),
    Report(ReportOutput),
    Other(serde_json::Value),
}

impl ToolOutput {
    /// The renderable HTML document carried by this output, if any.
    pub fn preview_html(&self) -> Option<&str> {
        match self {
            Self::Page(page) => Some(&page.preview_html),
            Self::Report(report) => Some(&report.report_html),
            Self::Other(value) => value
                .get("reportHtml")
                .or_else(|| value.get("previewHtml"))
                .and_then(|v| v.as_str()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_known_tool_into_typed_input() {
        let input = ToolInput::parse(
            ANALYZE_DATA,
            r#"{"data":"Category,Amount\nRent,2400","analysisType":"summary","title":"Expenses"}"#,
        )
        .unwrap();
        match input {
            ToolInput::AnalyzeData(args) => {
                assert_eq!(args.analysis_type, AnalysisType::Summary);
                assert!(args.question.is_none());
            }
            other => panic!("expected AnalyzeData, got {other:?}"),
        }
    }

    #[test]
    fn rejects_out_of_enum_values_for_known_tool() {
        let err = ToolInput::parse(
            CREATE_PAGE,
            r#"{"pageType":"wizard","title":"t","description":"d"}"#,
        );
        assert!(err.is_err());
    }

    #[test]
    fn unknown_tool_keeps_raw_json() {
        let input = ToolInput::parse("weather", r#"{"city":"Oslo"}"#).unwrap();
        assert_eq!(input, ToolInput::Other(json!({"city": "Oslo"})));
    }

    #[test]
    fn input_serializes_back_to_model_shape() {
        let raw = json!({"pageType":"form","title":"Contact","description":"A contact form"});
        let input = ToolInput::from_value(CREATE_PAGE, raw.clone()).unwrap();
        assert_eq!(serde_json::to_value(&input).unwrap(), raw);
    }

    #[test]
    fn output_deserializes_to_typed_variant() {
        let output: ToolOutput = serde_json::from_value(json!({
            "title": "Expenses",
            "analysisType": "summary",
            "summary": "Performed summary analysis on 2 data points",
            "reportHtml": "<!DOCTYPE html><html></html>",
            "message": "done"
        }))
        .unwrap();
        assert!(matches!(output, ToolOutput::Report(_)));
        assert_eq!(output.preview_html(), Some("<!DOCTYPE html><html></html>"));
    }

    #[test]
    fn other_output_exposes_html_by_key() {
        let output = ToolOutput::Other(json!({"previewHtml": "<p>x</p>"}));
        assert_eq!(output.preview_html(), Some("<p>x</p>"));
        assert_eq!(ToolOutput::Other(json!({"n": 1})).preview_html(), None);
    }
}
