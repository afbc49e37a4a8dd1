//! Tool output parsing and success/failure judgment.
//!
//! Every tool reports as loosely structured text: an optional `Exit Code:`
//! line plus optional labeled `Output:`/`Error:` sections. The classifier
//! normalizes that into a `ParsedOutput` and then applies a fixed-priority
//! rule set. An explicit exit code is the strongest signal and overrides
//! keyword scanning; the keyword sweep only runs when no exit code exists,
//! so a program that prints the word "error" while exiting 0 still counts
//! as a success as long as it produced output.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref EXIT_CODE_LINE: Regex =
        Regex::new(r"(?m)^Exit Code:\s*(-?\d+)").expect("exit code regex");
    static ref OUTPUT_MARKER: Regex =
        Regex::new(r"(?i)^(Output|Stdout Log):").expect("output marker regex");
    static ref ERROR_MARKER: Regex =
        Regex::new(r"(?i)^(Error|Errors|Stderr Log):").expect("error marker regex");
}

/// Normalized view of a raw tool result. Derived purely from text and
/// recomputed on demand, never stored.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedOutput {
    pub exit_code: Option<i32>,
    pub output: String,
    pub error: String,
    pub raw: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Assessment {
    pub failed: bool,
    pub reason: Option<String>,
}

impl Assessment {
    fn success() -> Self {
        Self { failed: false, reason: None }
    }

    fn failure(reason: impl Into<String>) -> Self {
        Self { failed: true, reason: Some(reason.into()) }
    }

    pub fn reason_text(&self) -> String {
        self.reason.clone().unwrap_or_else(|| "Unknown failure".to_string())
    }
}

/// Bucket the raw text into exit code, output and error sections.
pub fn parse_tool_output(raw: &str) -> ParsedOutput {
    let exit_code = EXIT_CODE_LINE
        .captures(raw)
        .and_then(|caps| caps[1].parse::<i32>().ok());

    #[derive(PartialEq)]
    enum Section {
        None,
        Out,
        Err,
    }

    let mut out_lines: Vec<&str> = Vec::new();
    let mut err_lines: Vec<&str> = Vec::new();
    let mut section = Section::None;
    for line in raw.lines() {
        if OUTPUT_MARKER.is_match(line) {
            section = Section::Out;
            continue;
        }
        if ERROR_MARKER.is_match(line) {
            section = Section::Err;
            continue;
        }
        if line.starts_with("Exit Code:") {
            section = Section::None;
            continue;
        }
        match section {
            Section::Out => out_lines.push(line),
            Section::Err => err_lines.push(line),
            Section::None => {}
        }
    }

    let mut output = out_lines.join("\n").trim().to_string();
    let mut error = err_lines.join("\n").trim().to_string();

    // No labeled sections at all: the residue is error text unless the tool
    // explicitly reported exit 0.
    if output.is_empty() && error.is_empty() {
        let residue = match EXIT_CODE_LINE.find(raw) {
            Some(m) => format!("{}{}", &raw[..m.start()], &raw[m.end()..]),
            None => raw.to_string(),
        };
        let residue = residue.trim().to_string();
        if !residue.is_empty() {
            if exit_code == Some(0) {
                output = residue;
            } else {
                error = residue;
            }
        }
    }

    ParsedOutput {
        exit_code,
        output,
        error,
        raw: raw.to_string(),
    }
}

/// Failure judgment, first match wins:
/// 1. explicit non-zero exit code;
/// 2. no exit code but a configured keyword appears in the raw text;
/// 3. exit code zero with nothing in either section (suspicious);
/// 4. otherwise success.
pub fn assess(parsed: &ParsedOutput, keywords: &[String]) -> Assessment {
    if let Some(code) = parsed.exit_code {
        if code != 0 {
            return Assessment::failure(format!("Non-zero exit ({})", code));
        }
    } else {
        let lower = parsed.raw.to_lowercase();
        if keywords.iter().any(|kw| lower.contains(kw.as_str())) {
            return Assessment::failure("Error keyword detected");
        }
    }

    if parsed.exit_code == Some(0) && parsed.output.is_empty() && parsed.error.is_empty() {
        return Assessment::failure("Exit 0 but no output");
    }

    Assessment::success()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keywords() -> Vec<String> {
        crate::config::AgentConfig::default().failure_keywords
    }

    #[test]
    fn parses_labeled_sections() {
        let parsed = parse_tool_output("Exit Code: 0\nOutput:\nhello\nworld\nErrors:\nminor hiccup");
        assert_eq!(parsed.exit_code, Some(0));
        assert_eq!(parsed.output, "hello\nworld");
        assert_eq!(parsed.error, "minor hiccup");
    }

    #[test]
    fn accepts_stdout_and_stderr_log_markers() {
        let parsed = parse_tool_output("Exit Code: 0\nStdout Log:\nfine\nStderr Log:\nnoise");
        assert_eq!(parsed.output, "fine");
        assert_eq!(parsed.error, "noise");
    }

    #[test]
    fn unlabeled_text_goes_to_error_on_nonzero_exit() {
        let parsed = parse_tool_output("Exit Code: 2\nsomething broke");
        assert_eq!(parsed.exit_code, Some(2));
        assert_eq!(parsed.error, "something broke");
        assert!(parsed.output.is_empty());
    }

    #[test]
    fn unlabeled_text_goes_to_output_on_zero_exit() {
        let parsed = parse_tool_output("Exit Code: 0\nhi");
        assert_eq!(parsed.output, "hi");
    }

    #[test]
    fn unlabeled_text_without_exit_code_is_error_text() {
        let parsed = parse_tool_output("Paris is the capital of France");
        assert!(parsed.output.is_empty());
        assert_eq!(parsed.error, "Paris is the capital of France");
    }

    #[test]
    fn classification_is_idempotent() {
        let raw = "Exit Code: 1\nError:\nboom";
        assert_eq!(parse_tool_output(raw), parse_tool_output(raw));
    }

    #[test]
    fn nonzero_exit_wins() {
        let parsed = parse_tool_output("Exit Code: 1\nOutput:\nall good here");
        let verdict = assess(&parsed, &keywords());
        assert!(verdict.failed);
        assert!(verdict.reason_text().contains("Non-zero exit"));
    }

    #[test]
    fn zero_exit_with_output_overrides_keywords() {
        // The word "error" in the output does not matter once the tool
        // reported a clean exit and produced something.
        let parsed = parse_tool_output("Exit Code: 0\nOutput:\nno error found in logs");
        let verdict = assess(&parsed, &keywords());
        assert!(!verdict.failed);
    }

    #[test]
    fn keyword_detection_without_exit_code() {
        let parsed = parse_tool_output("Error: connection refused");
        let verdict = assess(&parsed, &keywords());
        assert!(verdict.failed);
        assert_eq!(verdict.reason_text(), "Error keyword detected");
    }

    #[test]
    fn zero_exit_with_empty_sections_is_suspicious() {
        let parsed = parse_tool_output("Exit Code: 0");
        let verdict = assess(&parsed, &keywords());
        assert!(verdict.failed);
        assert_eq!(verdict.reason_text(), "Exit 0 but no output");
    }

    #[test]
    fn clean_text_without_exit_code_is_success() {
        let parsed = parse_tool_output("The weather in Berlin is sunny, 24C");
        let verdict = assess(&parsed, &keywords());
        assert!(!verdict.failed);
    }
}
