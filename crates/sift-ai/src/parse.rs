//! Prompt construction and response parsing for the analysis collaborator.
//!
//! Parsing is two-stage: a strict pass over an extracted JSON block, then a
//! lenient regex scrape for payloads that carry the right content in the
//! wrong shape.

use regex::Regex;
use serde_json::Value;

use crate::{AnalysisRequest, WordPatternInsight};

const MAX_PROMPT_SAMPLES: usize = 10;

/// Builds the structured prompt handed to the collaborator.
pub fn build_analysis_prompt(request: &AnalysisRequest) -> String {
    let mut prompt = String::new();
    prompt.push_str(
        "You are analyzing sales conversation responses. Compare the successful and \
         unsuccessful samples below and identify word-usage patterns that distinguish them.\n\n",
    );
    prompt.push_str(&format!(
        "Successful cohort: {} responses total, {} samples shown.\n",
        request.successful_total,
        request.successful_samples.len().min(MAX_PROMPT_SAMPLES)
    ));
    for sample in request.successful_samples.iter().take(MAX_PROMPT_SAMPLES) {
        prompt.push_str(&format!("- {sample}\n"));
    }
    prompt.push_str(&format!(
        "\nUnsuccessful cohort: {} responses total, {} samples shown.\n",
        request.failure_total,
        request.failure_samples.len().min(MAX_PROMPT_SAMPLES)
    ));
    for sample in request.failure_samples.iter().take(MAX_PROMPT_SAMPLES) {
        prompt.push_str(&format!("- {sample}\n"));
    }
    prompt.push_str(
        "\nRespond with a JSON array only. Each element must be an object with keys \
         \"successful_words\" (array of strings), \"failure_words\" (array of strings), \
         \"confidence\" (number between 0 and 1), and \"reasoning\" (string).\n",
    );
    prompt
}

/// Strict-then-lenient parse of collaborator output text.
pub fn parse_insights(text: &str) -> Vec<WordPatternInsight> {
    if let Some(insights) = parse_insights_strict(text) {
        if !insights.is_empty() {
            return insights;
        }
    }
    parse_insights_lenient(text)
}

/// Parses an embedded JSON array of insight objects. `None` when no JSON
/// block parses.
fn parse_insights_strict(text: &str) -> Option<Vec<WordPatternInsight>> {
    let block = extract_json_array(text)?;
    let parsed: Value = serde_json::from_str(block).ok()?;
    let items = parsed.as_array()?;
    let mut insights = Vec::new();
    for item in items {
        if let Ok(insight) = serde_json::from_value::<WordPatternInsight>(item.clone()) {
            if !insight.successful_words.is_empty() || !insight.failure_words.is_empty() {
                insights.push(insight);
            }
        }
    }
    Some(insights)
}

/// Scrapes `successful words:` / `failure words:` style lines out of
/// unstructured output. Returns at most one recovered insight.
pub fn parse_insights_lenient(text: &str) -> Vec<WordPatternInsight> {
    let successful_words = scrape_word_list(text, r"(?i)successful[ _-]?words?\s*[:=]\s*(.+)");
    let failure_words = scrape_word_list(text, r"(?i)fail(?:ure|ing)?[ _-]?words?\s*[:=]\s*(.+)");
    if successful_words.is_empty() && failure_words.is_empty() {
        return Vec::new();
    }
    vec![WordPatternInsight {
        successful_words,
        failure_words,
        confidence: 0.5,
        reasoning: "recovered from unstructured analysis output".to_string(),
    }]
}

fn scrape_word_list(text: &str, pattern: &str) -> Vec<String> {
    let Ok(matcher) = Regex::new(pattern) else {
        return Vec::new();
    };
    let Some(captures) = matcher.captures(text) else {
        return Vec::new();
    };
    let Some(raw_list) = captures.get(1) else {
        return Vec::new();
    };
    raw_list
        .as_str()
        .split([',', ';'])
        .map(|token| {
            token
                .trim()
                .trim_matches(|c: char| !c.is_alphanumeric())
                .to_ascii_lowercase()
        })
        .filter(|token| !token.is_empty())
        .collect()
}

fn extract_json_array(text: &str) -> Option<&str> {
    let start = text.find('[')?;
    let end = text.rfind(']')?;
    if end <= start {
        return None;
    }
    Some(&text[start..=end])
}

#[cfg(test)]
mod tests {
    use super::{build_analysis_prompt, parse_insights, parse_insights_lenient};
    use crate::AnalysisRequest;

    fn sample_request() -> AnalysisRequest {
        AnalysisRequest {
            company_id: "co-1".to_string(),
            successful_samples: vec!["we offer a full warranty".to_string()],
            failure_samples: vec!["that is not possible".to_string()],
            successful_total: 24,
            failure_total: 17,
        }
    }

    #[test]
    fn prompt_carries_samples_and_counts() {
        let prompt = build_analysis_prompt(&sample_request());
        assert!(prompt.contains("24 responses total"));
        assert!(prompt.contains("17 responses total"));
        assert!(prompt.contains("full warranty"));
        assert!(prompt.contains("JSON array"));
    }

    #[test]
    fn strict_parse_reads_embedded_json_array() {
        let text = r#"Here is my analysis:
[{"successful_words": ["warranty", "guarantee"], "failure_words": ["impossible"],
  "confidence": 0.8, "reasoning": "warranty language builds trust"}]
Done."#;
        let insights = parse_insights(text);
        assert_eq!(insights.len(), 1);
        assert_eq!(insights[0].successful_words, vec!["warranty", "guarantee"]);
        assert_eq!(insights[0].confidence, 0.8);
    }

    #[test]
    fn lenient_parse_recovers_from_prose_output() {
        let text = "Successful words: Warranty, Guarantee, refund.\nFailure words: impossible";
        let insights = parse_insights_lenient(text);
        assert_eq!(insights.len(), 1);
        assert_eq!(
            insights[0].successful_words,
            vec!["warranty", "guarantee", "refund"]
        );
        assert_eq!(insights[0].failure_words, vec!["impossible"]);
        assert_eq!(insights[0].confidence, 0.5);
    }

    #[test]
    fn malformed_json_falls_back_to_lenient_scrape() {
        let text = "[{broken json}] but successful words: warranty";
        let insights = parse_insights(text);
        assert_eq!(insights.len(), 1);
        assert_eq!(insights[0].successful_words, vec!["warranty"]);
    }

    #[test]
    fn unusable_output_yields_nothing() {
        assert!(parse_insights("no patterns worth reporting").is_empty());
    }
}
