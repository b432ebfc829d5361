use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::session::SUGGESTION_COUNT;

pub const SUGGESTIONS_KEY: &str = "questions";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HighlightStyle {
    #[default]
    Bold,
    Plain,
}

impl HighlightStyle {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Bold => "bold",
            Self::Plain => "plain",
        }
    }
}

impl fmt::Display for HighlightStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HighlightStyle {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "bold" => Ok(Self::Bold),
            "plain" | "none" => Ok(Self::Plain),
            other => Err(format!(
                "unknown highlight style '{other}' (expected bold or plain)"
            )),
        }
    }
}

/// Wording knobs for the initial-analysis instruction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptTemplate {
    pub include_recommendations: bool,
    pub highlight_style: HighlightStyle,
    /// Ask the overview to be understandable without domain knowledge.
    pub plain_language_overview: bool,
}

impl PromptTemplate {
    pub fn analysis_instruction(&self) -> String {
        let mut overview = String::from(
            "- Summarize what the graph shows and name the type of graph.",
        );
        if self.plain_language_overview {
            overview.push_str(
                "\n- Make the summary understandable to someone with no technical or domain knowledge: explain what the graph represents and its most important conclusions.",
            );
        }

        let recommendations = if self.include_recommendations {
            "- Close with concrete recommendations the line team could act on, tied to the evidence in the graph."
        } else {
            "- Strictly do not include any recommendations or forward-looking implications based on the data."
        };

        let highlight = match self.highlight_style {
            HighlightStyle::Bold => {
                "Highlight key figures and the most important points with **bold** markup."
            }
            HighlightStyle::Plain => "Do not use emphasis markup.",
        };

        format!(
            "You are an expert graph interpreter with deep expertise in the manufacturing domain, including machines, processes, production systems, control systems (PLCs), firmware, and part types (both discrete and continuous production).\n\n\
1. **Overview:**\n{overview}\n\n\
2. **Insights:**\n\
- Think like the people working on the manufacturing line and include the information they need for this type of graph.\n\
- State whether the data shows a general increase, decrease, or stability.\n\
- Identify outliers and explain how they differ from the rest of the data.\n\
- For a scatter plot, describe the relationship between the two variables, noting any correlation and what it implies.\n\
- Use variance, outliers, similarities, trends, and comparisons where they help, with supporting numbers.\n\
{recommendations}\n\n\
Keep the output concise: 2-4 short paragraphs. {highlight}"
        )
    }
}

pub fn suggestion_instruction() -> String {
    format!(
        "Based on the graph and the conversation so far, propose exactly {SUGGESTION_COUNT} short follow-up questions the user could ask next. Respond with a single JSON object and nothing else, in the form {{\"{SUGGESTIONS_KEY}\": [\"...\", \"...\", \"...\", \"...\"]}}. Do not add any prose, explanation, or markdown outside the JSON."
    )
}

#[cfg(test)]
mod tests {
    use super::{suggestion_instruction, HighlightStyle, PromptTemplate, SUGGESTIONS_KEY};

    #[test]
    fn default_template_forbids_recommendations_and_bolds_figures() {
        let text = PromptTemplate::default().analysis_instruction();
        assert!(text.contains("expert graph interpreter"));
        assert!(text.contains("manufacturing domain"));
        assert!(text.contains("**Overview:**"));
        assert!(text.contains("**Insights:**"));
        assert!(text.contains("2-4 short paragraphs"));
        assert!(text.contains("Strictly do not include any recommendations"));
        assert!(text.contains("**bold**"));
        assert!(!text.contains("no technical or domain knowledge"));
    }

    #[test]
    fn template_variants_change_wording_only() {
        let template = PromptTemplate {
            include_recommendations: true,
            highlight_style: HighlightStyle::Plain,
            plain_language_overview: true,
        };
        let text = template.analysis_instruction();
        assert!(text.contains("Close with concrete recommendations"));
        assert!(!text.contains("Strictly do not include"));
        assert!(text.contains("Do not use emphasis markup."));
        assert!(text.contains("no technical or domain knowledge"));
    }

    #[test]
    fn highlight_style_parses_from_cli_text() {
        assert_eq!("bold".parse::<HighlightStyle>(), Ok(HighlightStyle::Bold));
        assert_eq!(" Plain ".parse::<HighlightStyle>(), Ok(HighlightStyle::Plain));
        assert!("italic".parse::<HighlightStyle>().is_err());
    }

    #[test]
    fn suggestion_instruction_demands_strict_json() {
        let text = suggestion_instruction();
        assert!(text.contains("exactly 4"));
        assert!(text.contains(&format!("{{\"{SUGGESTIONS_KEY}\"")));
        assert!(text.contains("nothing else"));
    }
}
