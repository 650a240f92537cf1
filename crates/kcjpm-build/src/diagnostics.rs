//! Line-oriented parser for cjc diagnostic output.
//!
//! The compiler emits multi-line diagnostics:
//!
//! ```text
//! warning: unused function:'name'
//!  ==> src/b.cj:3:1:
//!   |
//! 3 | func name() {}
//!   | ^^^^^^^^^^^^^
//!   |
//! 1 warning generated, 1 warning printed.
//! ```
//!
//! The parser is a small state machine (idle, pending, collecting-snippet).
//! ANSI colour escapes are stripped before matching, so coloured output
//! parses identically to plain output.

use regex::Regex;

/// Diagnostic severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Error => f.write_str("error"),
            Severity::Warning => f.write_str("warning"),
        }
    }
}

/// One structured compiler diagnostic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    pub file: Option<String>,
    pub line: Option<u32>,
    pub column: Option<u32>,
    pub snippet: Option<String>,
}

impl Diagnostic {
    /// `file:line:col: message` when located, the bare message otherwise.
    pub fn render(&self) -> String {
        match (&self.file, self.line, self.column) {
            (Some(file), Some(line), Some(col)) => {
                format!("{}:{}:{}: {}", file, line, col, self.message)
            }
            _ => self.message.clone(),
        }
    }
}

/// What one fed line produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseEvent {
    Diagnostic(Diagnostic),
    Progress(String),
}

#[derive(Debug)]
enum State {
    Idle,
    /// Severity and message seen, location expected next.
    Pending(Partial),
    /// Location attached, snippet lines accumulating.
    Collecting(Partial),
}

#[derive(Debug)]
struct Partial {
    severity: Severity,
    message: String,
    file: Option<String>,
    line: Option<u32>,
    column: Option<u32>,
    snippet: Vec<String>,
}

impl Partial {
    fn finish(self) -> Diagnostic {
        let snippet = if self.snippet.is_empty() {
            None
        } else {
            Some(self.snippet.join("\n"))
        };
        Diagnostic {
            severity: self.severity,
            message: self.message,
            file: self.file,
            line: self.line,
            column: self.column,
            snippet,
        }
    }
}

/// The diagnostic parser state machine. One instance per output stream.
pub struct DiagnosticParser {
    state: State,
    ansi: Regex,
    head: Regex,
    location: Regex,
    summary: Regex,
}

impl Default for DiagnosticParser {
    fn default() -> Self {
        Self::new()
    }
}

impl DiagnosticParser {
    pub fn new() -> Self {
        Self {
            state: State::Idle,
            ansi: Regex::new(r"\x1b\[[0-9;]*m").expect("valid regex"),
            head: Regex::new(r"^(warning|error): (.*)$").expect("valid regex"),
            location: Regex::new(r"^\s*==>\s+(.+?):(\d+):(\d+):\s*$").expect("valid regex"),
            summary: Regex::new(r"^\d+\s+(warning|error)s?\s+generated").expect("valid regex"),
        }
    }

    /// Feed one output line; returns the events it completed.
    pub fn feed(&mut self, line: &str) -> Vec<ParseEvent> {
        let clean = self.ansi.replace_all(line, "").into_owned();

        match std::mem::replace(&mut self.state, State::Idle) {
            State::Idle => self.feed_idle(&clean),
            State::Pending(partial) => {
                if let Some(caps) = self.location.captures(&clean) {
                    let mut partial = partial;
                    partial.file = Some(caps[1].to_string());
                    partial.line = caps[2].parse().ok();
                    partial.column = caps[3].parse().ok();
                    self.state = State::Collecting(partial);
                    Vec::new()
                } else {
                    // no location followed; close the diagnostic and let the
                    // line take its normal path
                    let mut events = vec![ParseEvent::Diagnostic(partial.finish())];
                    events.extend(self.feed_idle(&clean));
                    events
                }
            }
            State::Collecting(partial) => {
                if clean.trim().is_empty() {
                    vec![ParseEvent::Diagnostic(partial.finish())]
                } else if clean.trim_start().starts_with('#') {
                    vec![ParseEvent::Diagnostic(partial.finish())]
                } else if self.summary.is_match(&clean) {
                    vec![
                        ParseEvent::Diagnostic(partial.finish()),
                        ParseEvent::Progress(clean),
                    ]
                } else {
                    let mut partial = partial;
                    partial.snippet.push(clean);
                    self.state = State::Collecting(partial);
                    Vec::new()
                }
            }
        }
    }

    fn feed_idle(&mut self, clean: &str) -> Vec<ParseEvent> {
        if let Some(caps) = self.head.captures(clean) {
            let severity = if &caps[1] == "error" {
                Severity::Error
            } else {
                Severity::Warning
            };
            self.state = State::Pending(Partial {
                severity,
                message: caps[2].to_string(),
                file: None,
                line: None,
                column: None,
                snippet: Vec::new(),
            });
            return Vec::new();
        }

        if clean.starts_with("Compiling package") || self.summary.is_match(clean) {
            return vec![ParseEvent::Progress(clean.to_string())];
        }

        Vec::new()
    }

    /// Flush a diagnostic still in flight at end of stream.
    pub fn finish(&mut self) -> Option<Diagnostic> {
        match std::mem::replace(&mut self.state, State::Idle) {
            State::Idle => None,
            State::Pending(partial) | State::Collecting(partial) => Some(partial.finish()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(lines: &[&str]) -> Vec<ParseEvent> {
        let mut parser = DiagnosticParser::new();
        let mut events = Vec::new();
        for line in lines {
            events.extend(parser.feed(line));
        }
        if let Some(d) = parser.finish() {
            events.push(ParseEvent::Diagnostic(d));
        }
        events
    }

    fn diagnostics(events: &[ParseEvent]) -> Vec<&Diagnostic> {
        events
            .iter()
            .filter_map(|e| match e {
                ParseEvent::Diagnostic(d) => Some(d),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn canonical_warning_block() {
        let events = run(&[
            "warning: unused function:'name'",
            " ==> src/b.cj:3:1:",
            "  |",
            "3 | func name() {}",
            "  | ^^^^^^^^^^^^^",
            "  |",
            "1 warning generated, 1 warning printed.",
        ]);

        let diags = diagnostics(&events);
        assert_eq!(diags.len(), 1);
        let d = diags[0];
        assert_eq!(d.severity, Severity::Warning);
        assert_eq!(d.message, "unused function:'name'");
        assert_eq!(d.file.as_deref(), Some("src/b.cj"));
        assert_eq!(d.line, Some(3));
        assert_eq!(d.column, Some(1));
        assert!(d.snippet.as_deref().unwrap().contains("func name() {}"));

        // the summary line surfaces as progress, not as a diagnostic
        assert!(events
            .iter()
            .any(|e| matches!(e, ParseEvent::Progress(p) if p.contains("generated"))));
    }

    #[test]
    fn error_block_parses_with_location() {
        let events = run(&[
            "error: undeclared identifier 'foo'",
            " ==> src/main.cj:12:9:",
            "  |",
            "12 | foo()",
            "  |",
        ]);
        let diags = diagnostics(&events);
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].severity, Severity::Error);
        assert_eq!(diags[0].file.as_deref(), Some("src/main.cj"));
        assert_eq!(diags[0].line, Some(12));
        assert_eq!(diags[0].column, Some(9));
    }

    #[test]
    fn ansi_escapes_do_not_change_parsed_values() {
        let events = run(&[
            "\x1b[33mwarning: \x1b[0munused function:'name'",
            "\x1b[34m ==> \x1b[0msrc/b.cj:3:1:",
            "",
        ]);
        let diags = diagnostics(&events);
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].message, "unused function:'name'");
        assert_eq!(diags[0].file.as_deref(), Some("src/b.cj"));
        assert_eq!(diags[0].line, Some(3));
        assert_eq!(diags[0].column, Some(1));
    }

    #[test]
    fn diagnostic_without_location_still_emits() {
        let events = run(&["error: linker failed", "some unrelated line"]);
        let diags = diagnostics(&events);
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].message, "linker failed");
        assert!(diags[0].file.is_none());
    }

    #[test]
    fn back_to_back_diagnostics() {
        let events = run(&[
            "error: first problem",
            "error: second problem",
            " ==> src/a.cj:1:1:",
            "",
        ]);
        let diags = diagnostics(&events);
        assert_eq!(diags.len(), 2);
        assert_eq!(diags[0].message, "first problem");
        assert!(diags[0].file.is_none());
        assert_eq!(diags[1].message, "second problem");
        assert_eq!(diags[1].file.as_deref(), Some("src/a.cj"));
    }

    #[test]
    fn hash_note_terminates_snippet() {
        let events = run(&[
            "warning: something",
            " ==> a.cj:1:2:",
            "1 | code",
            "# note: extra detail",
        ]);
        let diags = diagnostics(&events);
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].snippet.as_deref(), Some("1 | code"));
    }

    #[test]
    fn compiling_lines_become_progress() {
        let events = run(&["Compiling package `core`"]);
        assert_eq!(
            events,
            vec![ParseEvent::Progress("Compiling package `core`".to_string())]
        );
    }

    #[test]
    fn unmatched_lines_produce_nothing() {
        let events = run(&["ld: some noise", "   "]);
        assert!(events.is_empty());
    }

    #[test]
    fn render_includes_location() {
        let d = Diagnostic {
            severity: Severity::Error,
            message: "broken".to_string(),
            file: Some("src/a.cj".to_string()),
            line: Some(4),
            column: Some(7),
            snippet: None,
        };
        assert_eq!(d.render(), "src/a.cj:4:7: broken");
    }
}
