//! Data analysis tool: turns user data into an HTML report.

use crate::html::{BRAND_GRADIENT, HtmlGenerator};
use crate::profile::{DataProfile, profile_data};
use async_trait::async_trait;
use blocks_core::error::ToolError;
use blocks_core::payload::{ANALYZE_DATA, AnalysisType, AnalyzeDataInput, ReportOutput, ToolInput, ToolOutput};
use blocks_core::tool::{Tool, ToolContext, ToolResult};
use tracing::{debug, info};

const SYSTEM_PROMPT: &str = "You are an expert data analyst and web developer. Output ONLY raw HTML code. \
Never use markdown code blocks. Never add explanations. \
Calculate real statistics from the provided data. Start with <!DOCTYPE html>.";

/// Returned as-is when the data cannot be read in any format.
pub const UNPARSEABLE_DATA: &str =
    "Could not parse the provided data. Please provide data in CSV, JSON, or comma-separated format.";

pub struct AnalyzeDataTool {
    generator: HtmlGenerator,
}

impl AnalyzeDataTool {
    pub fn new(generator: HtmlGenerator) -> Self {
        Self { generator }
    }

    async fn run(&self, args: AnalyzeDataInput, profile: DataProfile) -> Result<ToolOutput, ToolError> {
        let report_html = self
            .generator
            .generate(SYSTEM_PROMPT, report_prompt(&args, &profile))
            .await?;
        info!(rows = profile.row_count, analysis = args.analysis_type.as_str(), "Report generated");

        let kind = args.analysis_type.as_str();
        Ok(ToolOutput::Report(ReportOutput {
            summary: format!("Performed {kind} analysis on {} data points", profile.row_count),
            message: format!("Analysis complete! Generated a comprehensive {kind} report."),
            title: args.title,
            analysis_type: args.analysis_type,
            report_html,
        }))
    }
}

fn report_prompt(args: &AnalyzeDataInput, profile: &DataProfile) -> String {
    let mut info = format!(
        "- {} data points\n- {}\n",
        profile.row_count,
        if profile.is_numeric { "Numeric data" } else { "Structured data" }
    );
    if let Some(headers) = profile.headers.as_ref().filter(|h| !h.is_empty()) {
        info.push_str(&format!("- Columns: {}\n", headers.join(", ")));
    }
    info.push_str(&format!("- Preview:\n{}\n", profile.preview));

    let question = args
        .question
        .as_deref()
        .filter(|q| !q.trim().is_empty())
        .map(|q| format!("QUESTION TO ANSWER: {q}\n"))
        .unwrap_or_default();
    let question_section = if question.is_empty() {
        ""
    } else {
        "   - A section that answers the question directly\n"
    };

    format!(
        "Analyze the data below and write a complete HTML report.\n\
\n\
DATA:\n\
{data}\n\
\n\
DATA INFO:\n\
{info}\
\n\
ANALYSIS TYPE: {kind}\n\
REPORT TITLE: {title}\n\
{question}\
\n\
RULES:\n\
1. Plain HTML only: no markdown, no code fences, no commentary.\n\
2. Put all CSS in a <style> tag.\n\
3. Dark theme in the Blocks palette: background #1a1a2e, cards rgba(255, 255, 255, 0.05), \
accents #69D2E7, #FF6B6B and #1ABC9C, gradient {gradient}, text #ffffff, muted text #8c8c8c, \
borders rgba(255, 255, 255, 0.1).\n\
4. Load Inter from Google Fonts.\n\
5. Dashboard layout with:\n\
   - A gradient header carrying the title\n\
   - Key metrics in cards\n\
   - Statistics actually computed from the data (mean, median, min, max, trends)\n\
   - An insights section with emoji bullets\n\
   - CSS-only charts such as bars or progress meters\n\
{question_section}\
6. Compute real numbers and call out patterns.\n\
\n\
Write the full document now:",
        data = args.data,
        kind = args.analysis_type.as_str(),
        title = args.title,
        gradient = BRAND_GRADIENT,
    )
}

#[async_trait]
impl Tool for AnalyzeDataTool {
    fn name(&self) -> &str {
        ANALYZE_DATA
    }

    fn description(&self) -> &str {
        "Analyzes data provided by the user and produces an HTML report with insights and \
visualizations. Use it when the user provides data (CSV, JSON, numbers, or text) and wants \
insights, asks for trends, patterns or summaries, wants a visual report or dashboard, needs \
statistics or comparisons, or wants to understand what the data means."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "data": {
                    "type": "string",
                    "description": "The data to analyze (CSV format, JSON, or comma-separated values)"
                },
                "analysisType": {
                    "type": "string",
                    "enum": AnalysisType::ALL,
                    "description": "Type of analysis to perform"
                },
                "title": {
                    "type": "string",
                    "description": "Title for the analysis report"
                },
                "question": {
                    "type": "string",
                    "description": "Specific question the user wants answered about the data (optional)"
                }
            },
            "required": ["data", "analysisType", "title"]
        })
    }

    async fn execute(&self, input: ToolInput, _ctx: &ToolContext) -> ToolResult {
        let args = match input {
            ToolInput::AnalyzeData(args) => args,
            _ => {
                return ToolResult::from_outcome(
                    Err(ToolError::InvalidArguments("expected analyze_data arguments".into())),
                    "Analysis failed",
                );
            }
        };

        let Some(profile) = profile_data(&args.data).filter(|p| p.row_count > 0) else {
            debug!("analyze_data received unparseable data");
            return ToolResult::failure(UNPARSEABLE_DATA);
        };

        ToolResult::from_outcome(self.run(args, profile).await, "Analysis failed")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blocks_core::error::ProviderError;
    use blocks_providers::ScriptedProvider;
    use serde_json::json;
    use std::sync::Arc;

    fn ctx() -> ToolContext {
        ToolContext {
            user_id: "u1".into(),
            conversation_id: "c1".into(),
        }
    }

    fn input(data: &str, question: Option<&str>) -> ToolInput {
        let mut value = json!({"data": data, "analysisType": "summary", "title": "Monthly Expenses"});
        if let Some(q) = question {
            value["question"] = json!(q);
        }
        ToolInput::from_value(ANALYZE_DATA, value).unwrap()
    }

    #[tokio::test]
    async fn produces_report_for_csv() {
        let provider = Arc::new(ScriptedProvider::new().with_completion("<!DOCTYPE html><h1>Report</h1>"));
        let tool = AnalyzeDataTool::new(HtmlGenerator::new(provider.clone(), "gpt-4.1"));

        let result = tool
            .execute(input("Category,Amount\nRent,2400\nFood,850", Some("Where does most go?")), &ctx())
            .await;
        assert!(result.success);
        match result.data {
            Some(ToolOutput::Report(report)) => {
                assert_eq!(report.summary, "Performed summary analysis on 2 data points");
                assert_eq!(report.report_html, "<!DOCTYPE html><h1>Report</h1>");
                assert_eq!(report.message, "Analysis complete! Generated a comprehensive summary report.");
            }
            other => panic!("expected report output, got {other:?}"),
        }

        let prompt = &provider.requests()[0].messages[1].content;
        assert!(prompt.contains("- Columns: Category, Amount"));
        assert!(prompt.contains("QUESTION TO ANSWER: Where does most go?"));
    }

    #[tokio::test]
    async fn unparseable_data_fails_without_calling_model() {
        let provider = Arc::new(ScriptedProvider::new());
        let tool = AnalyzeDataTool::new(HtmlGenerator::new(provider.clone(), "gpt-4.1"));

        let result = tool.execute(input("no numbers here", None), &ctx()).await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some(UNPARSEABLE_DATA));
        assert!(provider.requests().is_empty());
    }

    #[tokio::test]
    async fn empty_json_array_has_no_rows() {
        let tool = AnalyzeDataTool::new(HtmlGenerator::new(Arc::new(ScriptedProvider::new()), "m"));
        let result = tool.execute(input("[]", None), &ctx()).await;
        assert_eq!(result.error.as_deref(), Some(UNPARSEABLE_DATA));
    }

    #[tokio::test]
    async fn model_failure_is_prefixed() {
        let provider = Arc::new(ScriptedProvider::new().with_completion_error(ProviderError::ApiError {
            status_code: 500,
            message: "boom".into(),
        }));
        let tool = AnalyzeDataTool::new(HtmlGenerator::new(provider, "gpt-4.1"));

        let result = tool.execute(input("1,2,3", None), &ctx()).await;
        assert!(!result.success);
        assert_eq!(
            result.error.as_deref(),
            Some("Analysis failed: API request failed: boom (status: 500)")
        );
    }
}
