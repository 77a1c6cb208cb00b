//! Prompt library: per-kind instructions, templates and generation settings.
//!
//! The built-in library covers every job kind. A YAML file may replace any
//! section; sections it omits keep their built-in values.
//!
//! ```yaml
//! review:
//!   system: "You are a meticulous reviewer."
//!   template: "Review {{ filename }} ({{ language }}):\n{{ code }}"
//!   max_output: 2048
//!   temperature: 0.7
//! cache_ttl:
//!   debug_secs: 3600
//! security:
//!   max_code_size: 20000
//! ```
//!
//! Templates are rendered with Tera. Available variables: `language`,
//! `filename`, `code`, `error_log`, `cursor_context`, `error_type`,
//! `error_message` and `error_lines`; absent values render as empty strings.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tera::{Context, Tera};
use thiserror::Error;

use crate::cache::CacheTtls;
use crate::lint::LintReport;
use crate::llm::ReasoningRequest;
use crate::safety::SecuritySettings;
use crate::scheduler::job::{JobInput, JobKind};

/// Errors that can occur while loading or rendering prompts.
#[derive(Debug, Error)]
pub enum PromptError {
    #[error("Failed to read prompt library: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid prompt library: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Failed to render {kind} template: {source}")]
    Render {
        kind: JobKind,
        #[source]
        source: tera::Error,
    },
}

/// Instruction, template and generation settings of one job kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KindPrompt {
    /// System instruction sent with every request of this kind.
    pub system: String,
    /// Tera template producing the user input.
    pub template: String,
    pub max_output: u32,
    pub temperature: f64,
}

/// Prompt pieces ready to send.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedPrompt {
    pub system_instruction: String,
    pub user_input: String,
    pub max_output: u32,
    pub temperature: f64,
}

impl RenderedPrompt {
    /// Builds the reasoning request for `model`.
    pub fn request(&self, model: &str) -> ReasoningRequest {
        ReasoningRequest::new(&self.system_instruction, &self.user_input)
            .with_max_output(self.max_output)
            .with_temperature(self.temperature)
            .with_model(model)
    }
}

/// All prompt configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptLibrary {
    pub review: KindPrompt,
    pub debug: KindPrompt,
    pub architecture: KindPrompt,
    pub cache_ttl: CacheTtls,
    pub security: SecuritySettings,
}

impl Default for PromptLibrary {
    fn default() -> Self {
        Self {
            review: KindPrompt {
                system: "You are an expert code reviewer. Analyze the code and provide concise, \
                         actionable feedback."
                    .to_string(),
                template: REVIEW_TEMPLATE.to_string(),
                max_output: 2048,
                temperature: 0.7,
            },
            debug: KindPrompt {
                system: "You are a debugging expert. Identify root causes and provide fixes."
                    .to_string(),
                template: DEBUG_TEMPLATE.to_string(),
                max_output: 2048,
                temperature: 0.5,
            },
            architecture: KindPrompt {
                system: "You are a software architect. Design scalable system architectures."
                    .to_string(),
                template: ARCHITECTURE_TEMPLATE.to_string(),
                max_output: 4096,
                temperature: 0.7,
            },
            cache_ttl: CacheTtls::default(),
            security: SecuritySettings::default(),
        }
    }
}

const REVIEW_TEMPLATE: &str = "Review the following {{ language }} file `{{ filename }}`.

```{{ language }}
{{ code }}
```

Report bugs, security issues, performance problems and readability concerns. \
For each finding give the line, the problem and a concrete fix.";

const DEBUG_TEMPLATE: &str = "Diagnose the error raised by `{{ filename }}`.

Error log:
```
{{ error_log }}
```

Source ({{ language }}):
```{{ language }}
{{ code }}
```

Explain the root cause, propose a fix and list the steps to verify it.";

const ARCHITECTURE_TEMPLATE: &str = "Design an architecture for the system described in \
`{{ filename }}`.

{{ code }}

Cover components, data flow, storage, scaling strategy and the main trade-offs.";

impl PromptLibrary {
    /// Loads a library from a YAML file and checks that every template renders.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, PromptError> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&raw)
    }

    pub fn from_yaml(raw: &str) -> Result<Self, PromptError> {
        let library: Self = serde_yaml::from_str(raw)?;
        library.validate()?;
        Ok(library)
    }

    /// Renders every template against a sample input.
    pub fn validate(&self) -> Result<(), PromptError> {
        let sample = JobInput::new("python", "example.py", "print('hello')")
            .with_error_log("ValueError: bad value")
            .with_cursor_context("print");
        for kind in JobKind::ALL {
            self.render(kind, &sample)?;
        }
        Ok(())
    }

    pub fn for_kind(&self, kind: JobKind) -> &KindPrompt {
        match kind {
            JobKind::Review => &self.review,
            JobKind::Debug => &self.debug,
            JobKind::Architecture => &self.architecture,
        }
    }

    /// Cache lifetime for results of `kind`.
    pub fn cache_ttl(&self, kind: JobKind) -> Duration {
        self.cache_ttl.for_kind(kind)
    }

    /// Renders the instruction and input of a job without lint findings.
    pub fn render(&self, kind: JobKind, input: &JobInput) -> Result<RenderedPrompt, PromptError> {
        self.render_with_lint(kind, input, &LintReport::default())
    }

    /// Renders the instruction and input of a job.
    ///
    /// Debug jobs get a stack trace analysis appended when the error log
    /// references line numbers; review jobs get the cursor context. Both
    /// then get the top lint issues. Architecture jobs ignore `lint`.
    pub fn render_with_lint(
        &self,
        kind: JobKind,
        input: &JobInput,
        lint: &LintReport,
    ) -> Result<RenderedPrompt, PromptError> {
        let prompt = self.for_kind(kind);
        let error_log = input.error_log.as_deref().unwrap_or_default();
        let analysis = StackTraceAnalysis::parse(error_log, &input.file_path);

        let mut context = Context::new();
        context.insert("language", &input.language);
        context.insert("filename", &input.file_path);
        context.insert("code", &input.file_content);
        context.insert("error_log", error_log);
        context.insert(
            "cursor_context",
            input.cursor_context.as_deref().unwrap_or_default(),
        );
        context.insert(
            "error_type",
            analysis.error_type.as_deref().unwrap_or_default(),
        );
        context.insert(
            "error_message",
            analysis.error_message.as_deref().unwrap_or_default(),
        );
        context.insert("error_lines", &analysis.error_lines);

        let mut user_input = Tera::one_off(&prompt.template, &context, false)
            .map_err(|source| PromptError::Render { kind, source })?;

        match kind {
            JobKind::Debug => {
                if !analysis.error_lines.is_empty() {
                    user_input.push_str(&analysis.summary());
                }
                user_input.push_str(&lint.prompt_section("STATIC ANALYSIS RESULTS"));
            }
            JobKind::Review => {
                if let Some(cursor) = input.cursor_context.as_deref().filter(|c| !c.is_empty()) {
                    user_input.push_str("\n\nCURSOR CONTEXT:\n");
                    user_input.push_str(cursor);
                }
                user_input.push_str(&lint.prompt_section("PRE-LINT ANALYSIS"));
            }
            JobKind::Architecture => {}
        }

        Ok(RenderedPrompt {
            system_instruction: prompt.system.clone(),
            user_input,
            max_output: prompt.max_output,
            temperature: prompt.temperature,
        })
    }
}

/// Facts extracted from an error log.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StackTraceAnalysis {
    /// Exception class, e.g. `ValueError`.
    pub error_type: Option<String>,
    pub error_message: Option<String>,
    /// Referenced line numbers, ascending and deduplicated.
    pub error_lines: Vec<u32>,
}

fn error_type_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\w+Error):\s*(.+)").expect("Invalid regex for error type"))
}

fn line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)line (\d+)").expect("Invalid regex for line numbers"))
}

fn js_frame_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"at\s+[^:]+:(\d+):\d+").expect("Invalid regex for JS frames"))
}

impl StackTraceAnalysis {
    /// Extracts the error type, message and line numbers from Python and
    /// JavaScript style traces.
    pub fn parse(error_log: &str, file_path: &str) -> Self {
        let mut analysis = Self::default();
        if error_log.is_empty() {
            return analysis;
        }

        if let Some(caps) = error_type_re().captures(error_log) {
            analysis.error_type = Some(caps[1].to_string());
            analysis.error_message = Some(caps[2].trim().to_string());
        }

        let mut lines = BTreeSet::new();
        let mut collect = |re: &Regex| {
            for caps in re.captures_iter(error_log) {
                if let Ok(line) = caps[1].parse::<u32>() {
                    lines.insert(line);
                }
            }
        };

        collect(line_re());
        collect(js_frame_re());

        let basename = file_path.rsplit('/').next().unwrap_or(file_path);
        if !basename.is_empty() {
            let pattern = format!(
                r#"File\s+"[^"]*{}",\s+line\s+(\d+)"#,
                regex::escape(basename)
            );
            if let Ok(re) = Regex::new(&pattern) {
                collect(&re);
            }
        }

        analysis.error_lines = lines.into_iter().collect();
        analysis
    }

    /// Section appended to debug prompts.
    pub fn summary(&self) -> String {
        let lines = self
            .error_lines
            .iter()
            .map(|l| l.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "\n\nSTACK TRACE ANALYSIS:\nError occurs at lines: {}\nError type: {}\n",
            lines,
            self.error_type.as_deref().unwrap_or("Unknown")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const PY_TRACE: &str = r#"Traceback (most recent call last):
  File "/srv/app/main.py", line 12, in <module>
    run()
  File "/srv/app/main.py", line 7, in run
    parse(value)
ValueError: invalid literal for int() with base 10: 'x'"#;

    #[test]
    fn test_parse_python_trace() {
        let analysis = StackTraceAnalysis::parse(PY_TRACE, "app/main.py");
        assert_eq!(analysis.error_type.as_deref(), Some("ValueError"));
        assert_eq!(
            analysis.error_message.as_deref(),
            Some("invalid literal for int() with base 10: 'x'")
        );
        assert_eq!(analysis.error_lines, vec![7, 12]);
    }

    #[test]
    fn test_parse_js_trace() {
        let log = "TypeError: Cannot read properties of undefined (reading 'id')\n    \
                   at handler (/srv/api/routes.js:42:17)\n    \
                   at next (/srv/api/router.js:8:3)";
        let analysis = StackTraceAnalysis::parse(log, "api/routes.js");
        assert_eq!(analysis.error_type.as_deref(), Some("TypeError"));
        assert_eq!(analysis.error_lines, vec![8, 42]);
    }

    #[test]
    fn test_parse_empty_log() {
        assert_eq!(
            StackTraceAnalysis::parse("", "main.py"),
            StackTraceAnalysis::default()
        );
    }

    #[test]
    fn test_render_review() {
        let library = PromptLibrary::default();
        let input = JobInput::new("python", "src/app.py", "def add(a, b):\n    return a + b\n");
        let prompt = library
            .render(JobKind::Review, &input)
            .expect("render should work");

        assert!(prompt.system_instruction.contains("code reviewer"));
        assert!(prompt.user_input.contains("`src/app.py`"));
        assert!(prompt.user_input.contains("```python\ndef add(a, b):"));
        assert!(!prompt.user_input.contains("CURSOR CONTEXT"));
        assert_eq!(prompt.max_output, 2048);
        assert!((prompt.temperature - 0.7).abs() < f64::EPSILON);
    }

    #[test]
    fn test_render_review_with_cursor_context() {
        let library = PromptLibrary::default();
        let input = JobInput::new("python", "a.py", "x = 1").with_cursor_context("x = 1");
        let prompt = library
            .render(JobKind::Review, &input)
            .expect("render should work");
        assert!(prompt.user_input.ends_with("\n\nCURSOR CONTEXT:\nx = 1"));
    }

    #[test]
    fn test_render_debug_appends_analysis() {
        let library = PromptLibrary::default();
        let input =
            JobInput::new("python", "app/main.py", "def run(): ...").with_error_log(PY_TRACE);
        let prompt = library
            .render(JobKind::Debug, &input)
            .expect("render should work");

        assert!(prompt.user_input.contains("ValueError: invalid literal"));
        let expected =
            "STACK TRACE ANALYSIS:\nError occurs at lines: 7, 12\nError type: ValueError";
        assert!(prompt.user_input.contains(expected));
        assert!((prompt.temperature - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_render_appends_lint_issues() {
        use crate::lint::{LintIssue, LintSeverity};

        let library = PromptLibrary::default();
        let input =
            JobInput::new("python", "app/main.py", "import os\nx = 1").with_error_log(PY_TRACE);
        let lint = LintReport::new(vec![LintIssue::new(
            1,
            LintSeverity::Warning,
            "unused import 'os'",
        )]);

        let review = library
            .render_with_lint(JobKind::Review, &input, &lint)
            .expect("render should work");
        let expected =
            "\n\nPRE-LINT ANALYSIS:\nFound 1 issues:\n- Line 1: [warning] unused import 'os'\n";
        assert!(review.user_input.ends_with(expected));

        let debug = library
            .render_with_lint(JobKind::Debug, &input, &lint)
            .expect("render should work");
        let analysis = debug.user_input.find("STACK TRACE ANALYSIS").expect("analysis");
        let lint_at = debug.user_input.find("STATIC ANALYSIS RESULTS").expect("lint");
        assert!(analysis < lint_at);

        let plain = library.render(JobKind::Review, &input).expect("render should work");
        assert_ne!(plain.user_input, review.user_input);

        let architecture = library
            .render_with_lint(JobKind::Architecture, &input, &lint)
            .expect("render should work");
        assert_eq!(
            architecture,
            library.render(JobKind::Architecture, &input).expect("render should work")
        );
    }

    #[test]
    fn test_render_does_not_interpret_code() {
        let library = PromptLibrary::default();
        let input = JobInput::new("jinja", "page.html", "{{ user.name }} {% if x %}");
        let prompt = library
            .render(JobKind::Architecture, &input)
            .expect("render should work");
        assert!(prompt.user_input.contains("{{ user.name }} {% if x %}"));
        assert_eq!(prompt.max_output, 4096);
    }

    #[test]
    fn test_rendering_is_deterministic() {
        let library = PromptLibrary::default();
        let input = JobInput::new("rust", "lib.rs", "pub fn f() {}");
        let a = library.render(JobKind::Review, &input).expect("render should work");
        let b = library.render(JobKind::Review, &input).expect("render should work");
        assert_eq!(a, b);
    }

    #[test]
    fn test_load_partial_yaml() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        write!(
            file,
            "review:\n  system: \"Be brief.\"\n  \
             template: \"{{{{ filename }}}}: {{{{ code }}}}\"\n  \
             max_output: 512\n  temperature: 0.2\n\
             cache_ttl:\n  debug_secs: 60\n\
             security:\n  max_code_size: 100\n"
        )
        .expect("write yaml");

        let library = PromptLibrary::load(file.path()).expect("library should load");
        assert_eq!(library.review.system, "Be brief.");
        assert_eq!(library.review.max_output, 512);
        assert_eq!(library.debug, PromptLibrary::default().debug);
        assert_eq!(library.cache_ttl(JobKind::Debug), Duration::from_secs(60));
        assert_eq!(library.cache_ttl(JobKind::Review), Duration::from_secs(604_800));
        assert_eq!(library.security.max_code_size, 100);
        assert!(!library.security.redact_patterns.is_empty());

        let prompt = library
            .render(JobKind::Review, &JobInput::new("python", "a.py", "x = 1"))
            .expect("render should work");
        assert_eq!(prompt.user_input, "a.py: x = 1");
    }

    #[test]
    fn test_load_rejects_broken_template() {
        let raw = "review:\n  system: s\n  template: \"{{ code \"\n  \
                   max_output: 1\n  temperature: 0.1\n";
        let err = PromptLibrary::from_yaml(raw).unwrap_err();
        assert!(matches!(
            err,
            PromptError::Render {
                kind: JobKind::Review,
                ..
            }
        ));
    }

    #[test]
    fn test_load_missing_file() {
        let err = PromptLibrary::load("/nonexistent/prompts.yaml").unwrap_err();
        assert!(matches!(err, PromptError::Io(_)));
    }
}
