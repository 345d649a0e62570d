use grep::regex::RegexMatcher;
use grep::searcher::{Searcher, Sink, SinkMatch};
use std::error::Error;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

// Directories holding the crate's own Rust sources.
const SOURCE_DIRS: [&str; 3] = ["ranking", "tests", "benches"];

// A source rule enforced on every file under SOURCE_DIRS.
struct Rule {
    pattern: &'static str,
    description: &'static str,
    advice: &'static str,
    filter: fn(&str) -> bool,
}

// Collects every line of one file that violates a rule.
struct RuleCollector<'a> {
    rule: &'a Rule,
    violations: Vec<String>,
    file_path: PathBuf,
}

impl<'a> RuleCollector<'a> {
    fn new(rule: &'a Rule, file_path: &Path) -> Self {
        Self {
            rule,
            violations: Vec::new(),
            file_path: file_path.to_path_buf(),
        }
    }

    fn check_and_get_error_message(&self) -> Option<String> {
        if self.violations.is_empty() {
            return None;
        }

        let file_name = self.file_path.to_str().unwrap_or("?");
        let mut error_msg = format!(
            "\n❌ ERROR: Found {} {} in {}:\n",
            self.violations.len(),
            self.rule.description,
            file_name
        );
        for violation in &self.violations {
            error_msg.push_str(&format!("   {violation}\n"));
        }
        error_msg.push_str(&format!(
            "\n⚠️ {} are STRICTLY FORBIDDEN in this project.\n   {}\n",
            self.rule.description, self.rule.advice
        ));
        Some(error_msg)
    }
}

impl Sink for RuleCollector<'_> {
    type Error = std::io::Error;

    fn matched(&mut self, _: &Searcher, mat: &SinkMatch) -> Result<bool, Self::Error> {
        let line_number = mat.line_number().unwrap_or(0);
        let line_text = std::str::from_utf8(mat.bytes()).unwrap_or("").trim_end();
        if (self.rule.filter)(line_text) {
            self.violations.push(format!("{line_number}:{line_text}"));
        }
        Ok(true)
    }
}

fn is_comment(line: &str) -> bool {
    line.trim_start().starts_with("//")
}

fn is_doc_comment(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.starts_with("///") || trimmed.starts_with("//!")
}

// Underscore-prefixed names inside comments or string literals are not bindings.
fn is_underscore_binding(line: &str) -> bool {
    if is_comment(line) {
        return false;
    }
    let in_string = line
        .split('"')
        .enumerate()
        .any(|(i, part)| i % 2 == 1 && part.contains('_'));
    !in_string
}

fn is_plain_comment_with_stars(line: &str) -> bool {
    !is_doc_comment(line)
}

fn is_shouting_comment(line: &str) -> bool {
    let Some(start) = line.find("//") else {
        return false;
    };
    let text = line[start..].trim_start_matches(['/', '!']);
    let mut letters = text.chars().filter(|c| c.is_alphabetic()).peekable();
    letters.peek().is_some() && letters.all(|c| c.is_uppercase())
}

fn always(_: &str) -> bool {
    true
}

const RULES: [Rule; 5] = [
    Rule {
        pattern: r"\b(_[a-zA-Z0-9_]+)\b",
        description: "underscore-prefixed variables",
        advice: "Either use the variable (removing the underscore) or remove it completely.",
        filter: is_underscore_binding,
    },
    Rule {
        pattern: r"#\s*\[\s*allow\s*\(\s*dead_code\s*\)\s*\]",
        description: "#[allow(dead_code)] attributes",
        advice: "Either use the code (removing the attribute) or remove it completely.",
        filter: always,
    },
    Rule {
        pattern: r"(//|/\*).*(?:FIXED|CORRECTED|FIX|NEW|CHANGED|CHANGE|MODIFIED|UPDATED|UPDATE)",
        description: "change-log style comments",
        advice: "Describe what the code does, not how it was edited.",
        filter: always,
    },
    Rule {
        pattern: r"(//|/\*).*\*\*",
        description: "emphasis markers in plain comments",
        advice: "Use plain text in non-doc comments.",
        filter: is_plain_comment_with_stars,
    },
    Rule {
        pattern: r"//.*",
        description: "comments where all alphabetic characters are uppercase",
        advice: "STRONGLY CONSIDER deleting the comment completely.",
        filter: is_shouting_comment,
    },
];

fn rust_sources() -> impl Iterator<Item = PathBuf> {
    SOURCE_DIRS.into_iter().flat_map(|dir| {
        WalkDir::new(dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().is_some_and(|ext| ext == "rs"))
            .map(|e| e.into_path())
    })
}

fn scan_sources() -> Result<(), Box<dyn Error>> {
    let mut searcher = Searcher::new();
    for rule in &RULES {
        let matcher = RegexMatcher::new_line_matcher(rule.pattern)?;
        for path in rust_sources() {
            let mut collector = RuleCollector::new(rule, &path);
            searcher.search_path(&matcher, &path, &mut collector)?;
            if let Some(error_message) = collector.check_and_get_error_message() {
                return Err(error_message.into());
            }
        }
    }
    Ok(())
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    for dir in SOURCE_DIRS {
        println!("cargo:rerun-if-changed={dir}");
    }

    if let Err(e) = scan_sources() {
        eprintln!("{e}");
        std::process::exit(1);
    }
}
