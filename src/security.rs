//! Static security pre-screening of submitted source code
//!
//! Pattern matching, not parsing: each language has three rule categories
//! (banned calls, banned module/import targets, banned bare keywords) matched
//! with word-boundary-aware regular expressions. The check is deliberately
//! conservative and can both under- and over-match; tightening it to AST-based
//! analysis would change which existing solutions are accepted and is a
//! product decision, not a default.

use regex::Regex;

use crate::language::Language;

/// Outcome of the pre-screen
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityVerdict {
    pub clean: bool,
    pub reason: Option<String>,
}

impl SecurityVerdict {
    fn clean() -> Self {
        Self {
            clean: true,
            reason: None,
        }
    }

    fn violation(reason: String) -> Self {
        Self {
            clean: false,
            reason: Some(reason),
        }
    }
}

struct Rule {
    token: &'static str,
    pattern: Regex,
}

struct RuleSet {
    functions: Vec<Rule>,
    modules: Vec<Rule>,
    keywords: Vec<Rule>,
}

/// Compiles every rule set once; shared read-only across requests
pub struct SecurityAnalyzer {
    script: RuleSet,
    python: RuleSet,
    java: RuleSet,
    cpp: RuleSet,
}

fn rule(token: &'static str, pattern: &str) -> Rule {
    Rule {
        token,
        pattern: Regex::new(pattern).expect("invalid security rule pattern"),
    }
}

/// Call-shaped rule: the token followed by an opening parenthesis
fn call_rule(token: &'static str) -> Rule {
    rule(token, &format!(r"\b{}\s*\(", regex::escape(token)))
}

/// Bare keyword rule, word-boundary anchored
fn keyword_rule(token: &'static str) -> Rule {
    rule(token, &format!(r"\b{}\b", regex::escape(token)))
}

fn script_rules() -> RuleSet {
    let js_module = |token: &'static str| {
        rule(
            token,
            &format!(
                r#"(?:\brequire\s*\(\s*|\bfrom\s+)["']{}["']"#,
                regex::escape(token)
            ),
        )
    };
    RuleSet {
        functions: vec![
            call_rule("eval"),
            rule("Function", r"\bnew\s+Function\b|\bFunction\s*\("),
            call_rule("fetch"),
            rule("XMLHttpRequest", r"\bnew\s+XMLHttpRequest\b"),
        ],
        modules: vec![
            js_module("fs"),
            js_module("child_process"),
            js_module("net"),
            js_module("http"),
            js_module("https"),
            js_module("os"),
            js_module("worker_threads"),
            js_module("cluster"),
            js_module("vm"),
        ],
        keywords: vec![keyword_rule("process")],
    }
}

fn python_rules() -> RuleSet {
    let py_module = |token: &'static str| {
        let m = regex::escape(token);
        rule(
            token,
            &format!(r#"(?m)^\s*(?:import\s+{m}\b|from\s+{m}\b)|\b__import__\s*\(\s*["']{m}["']"#),
        )
    };
    RuleSet {
        functions: vec![
            call_rule("open"),
            call_rule("exec"),
            call_rule("eval"),
            call_rule("compile"),
            call_rule("__import__"),
        ],
        modules: vec![
            py_module("os"),
            py_module("sys"),
            py_module("subprocess"),
            py_module("socket"),
            py_module("shutil"),
            py_module("pathlib"),
            py_module("ctypes"),
        ],
        keywords: vec![keyword_rule("breakpoint")],
    }
}

fn java_rules() -> RuleSet {
    let java_import = |token: &'static str| {
        rule(
            token,
            &format!(r"(?m)^\s*import\s+{}\.", regex::escape(token)),
        )
    };
    RuleSet {
        functions: vec![
            rule("Runtime.getRuntime", r"\bRuntime\s*\.\s*getRuntime\s*\("),
            rule("ProcessBuilder", r"\bnew\s+ProcessBuilder\b"),
            rule("System.exit", r"\bSystem\s*\.\s*exit\s*\("),
        ],
        modules: vec![
            java_import("java.io"),
            java_import("java.net"),
            java_import("java.nio.file"),
            java_import("java.lang.reflect"),
        ],
        keywords: vec![keyword_rule("native")],
    }
}

fn cpp_rules() -> RuleSet {
    let include = |token: &'static str| {
        rule(
            token,
            &format!(r#"(?m)^\s*#\s*include\s*[<"]{}[>"]"#, regex::escape(token)),
        )
    };
    RuleSet {
        functions: vec![
            call_rule("system"),
            call_rule("popen"),
            call_rule("fork"),
            rule("exec", r"\bexec[lv]p?e?\s*\("),
        ],
        modules: vec![
            include("fstream"),
            include("filesystem"),
            include("sys/socket.h"),
            include("unistd.h"),
        ],
        keywords: vec![keyword_rule("asm"), keyword_rule("__asm__")],
    }
}

impl SecurityAnalyzer {
    pub fn new() -> Self {
        Self {
            script: script_rules(),
            python: python_rules(),
            java: java_rules(),
            cpp: cpp_rules(),
        }
    }

    fn rules_for(&self, language: Language) -> &RuleSet {
        match language {
            Language::JavaScript | Language::TypeScript => &self.script,
            Language::Python => &self.python,
            Language::Java => &self.java,
            Language::Cpp => &self.cpp,
        }
    }

    /// Screens source code before any sandboxed execution
    ///
    /// The first violation short-circuits with a reason naming the offending
    /// token; `clean` is true only when all three categories have zero
    /// matches.
    pub fn analyze(&self, code: &str, language: Language) -> SecurityVerdict {
        let rules = self.rules_for(language);

        for r in &rules.functions {
            if r.pattern.is_match(code) {
                return SecurityVerdict::violation(format!("Banned function used: {}", r.token));
            }
        }
        for r in &rules.modules {
            if r.pattern.is_match(code) {
                return SecurityVerdict::violation(format!("Banned module import: {}", r.token));
            }
        }
        for r in &rules.keywords {
            if r.pattern.is_match(code) {
                return SecurityVerdict::violation(format!("Banned keyword: {}", r.token));
            }
        }

        SecurityVerdict::clean()
    }
}

impl Default for SecurityAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}
