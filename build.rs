use grep::regex::RegexMatcher;
use grep::searcher::{Searcher, Sink, SinkMatch};
use std::error::Error;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use walkdir::WalkDir;

// Directories holding the crate's own Rust sources. Anything else in the
// checkout (vendored data, scratch directories) is not subject to the policy.
const SOURCE_DIRS: [&str; 4] = ["peb", "cli", "tests", "benches"];

// Which policy a collector enforces, used to build its error message.
#[derive(Clone, Copy)]
enum Policy {
    UnderscorePrefix,
    ForbiddenComment,
    UppercaseComment,
    AllowDeadCode,
}

impl Policy {
    fn heading(self) -> &'static str {
        match self {
            Policy::UnderscorePrefix => "underscore-prefixed identifiers",
            Policy::ForbiddenComment => "forbidden comment patterns",
            Policy::UppercaseComment => "comments with all uppercase alphabetic characters",
            Policy::AllowDeadCode => "#[allow(dead_code)] attributes",
        }
    }

    fn advice(self) -> &'static str {
        match self {
            Policy::UnderscorePrefix => {
                "Underscore-prefixed names are not allowed in this project.\n   Either use the binding (removing the underscore) or remove it completely."
            }
            Policy::ForbiddenComment => {
                "Comments recording edit history ('FIXED', 'CHANGED', 'UPDATED', ...) and '**' in non-doc comments are not allowed.\n   Remove them rather than commenting them out."
            }
            Policy::UppercaseComment => {
                "Comments where all alphabetic characters are uppercase are not allowed.\n   Strongly consider deleting the comment."
            }
            Policy::AllowDeadCode => {
                "#[allow(dead_code)] is not allowed.\n   Either use the code or remove it completely."
            }
        }
    }
}

// Collects matching lines of one file, applying the policy's own filtering.
struct ViolationCollector {
    policy: Policy,
    violations: Vec<String>,
    file_path: PathBuf,
}

impl ViolationCollector {
    fn new(policy: Policy, file_path: &Path) -> Self {
        Self {
            policy,
            violations: Vec::new(),
            file_path: file_path.to_path_buf(),
        }
    }

    fn check_and_get_error_message(&self) -> Option<String> {
        if self.violations.is_empty() {
            return None;
        }

        let mut error_msg = format!(
            "\n❌ ERROR: Found {} {} in {}:\n",
            self.violations.len(),
            self.policy.heading(),
            self.file_path.display()
        );
        for violation in &self.violations {
            error_msg.push_str(&format!("   {violation}\n"));
        }
        error_msg.push_str(&format!("\n⚠️ {}\n", self.policy.advice()));
        Some(error_msg)
    }

    fn accepts(&self, line_text: &str) -> bool {
        match self.policy {
            Policy::UnderscorePrefix => !is_comment(line_text) && !is_inside_string(line_text),
            Policy::ForbiddenComment => {
                // '**' is fine in doc comments; history words never are.
                !(is_doc_comment(line_text)
                    && line_text.contains("**")
                    && !contains_history_word(line_text))
            }
            Policy::UppercaseComment => match comment_text(line_text) {
                Some(text) => {
                    let alpha: Vec<char> = text.chars().filter(|c| c.is_alphabetic()).collect();
                    !alpha.is_empty() && alpha.iter().all(|c| c.is_uppercase())
                }
                None => false,
            },
            Policy::AllowDeadCode => true,
        }
    }
}

impl Sink for ViolationCollector {
    type Error = std::io::Error;

    fn matched(&mut self, _: &Searcher, mat: &SinkMatch) -> Result<bool, Self::Error> {
        let line_number = mat.line_number().unwrap_or(0);
        let line_text = std::str::from_utf8(mat.bytes()).unwrap_or("").trim_end();
        if self.accepts(line_text) {
            self.violations.push(format!("{line_number}:{line_text}"));
        }
        Ok(true)
    }
}

const HISTORY_WORDS: [&str; 14] = [
    "FIXED",
    "CORRECTED",
    "FIX",
    "FIXES",
    "NEW",
    "CHANGED",
    "CHANGES",
    "CHANGE",
    "MODIFIED",
    "MODIFIES",
    "MODIFY",
    "UPDATED",
    "UPDATES",
    "UPDATE",
];

fn contains_history_word(line: &str) -> bool {
    HISTORY_WORDS.iter().any(|word| line.contains(word))
}

fn is_doc_comment(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.starts_with("///") || trimmed.starts_with("//!")
}

fn is_comment(line: &str) -> bool {
    line.trim_start().starts_with("//")
        || (line.contains("/*") && !line.contains("*/match") && !line.contains("*/let"))
}

// A match between an odd and even quote is inside a string literal.
fn is_inside_string(line: &str) -> bool {
    line.split('"')
        .enumerate()
        .any(|(i, part)| i % 2 == 1 && part.contains('_'))
}

fn comment_text(line: &str) -> Option<&str> {
    let trimmed = line.trim_start();
    if let Some(rest) = trimmed
        .strip_prefix("///")
        .or_else(|| trimmed.strip_prefix("//!"))
        .or_else(|| trimmed.strip_prefix("//"))
    {
        return Some(rest.trim());
    }
    let idx = line.find("/*")?;
    let body = &line[idx + 2..];
    Some(match body.find("*/") {
        Some(end) => body[..end].trim(),
        None => body.trim(),
    })
}

fn rust_sources() -> Vec<PathBuf> {
    let mut files = Vec::new();
    for dir in SOURCE_DIRS {
        files.extend(
            WalkDir::new(dir)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.path().extension().is_some_and(|ext| ext == "rs"))
                .map(|e| e.into_path()),
        );
    }
    files.push(PathBuf::from("build.rs"));
    files
}

fn scan(policy: Policy, pattern: &str, include_build_script: bool) -> Result<(), Box<dyn Error>> {
    let matcher = RegexMatcher::new_line_matcher(pattern)?;
    let mut searcher = Searcher::new();

    for path in rust_sources() {
        if !include_build_script && path == Path::new("build.rs") {
            continue;
        }
        if std::fs::metadata(&path).is_err() {
            continue;
        }

        let mut collector = ViolationCollector::new(policy, &path);
        searcher.search_path(&matcher, &path, &mut collector)?;
        if let Some(error_message) = collector.check_and_get_error_message() {
            return Err(error_message.into());
        }
    }
    Ok(())
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    for dir in SOURCE_DIRS {
        println!("cargo:rerun-if-changed={dir}");
    }

    let checks: [(Policy, &str, bool); 5] = [
        (Policy::UnderscorePrefix, r"\b(_[a-zA-Z0-9_]+)\b", true),
        (
            Policy::ForbiddenComment,
            r"(//|/\*).*(?:FIXED|CORRECTED|FIX|FIXES|NEW|CHANGED|CHANGES|CHANGE|MODIFIED|MODIFIES|MODIFY|UPDATED|UPDATES|UPDATE)",
            false,
        ),
        (Policy::ForbiddenComment, r"(//|/\*).*\*\*", false),
        (Policy::UppercaseComment, r"(//|/\*).*", false),
        (
            Policy::AllowDeadCode,
            r"#\s*\[\s*allow\s*\(\s*dead_code\s*\)\s*\]",
            false,
        ),
    ];
    for (policy, pattern, include_build_script) in checks {
        if let Err(e) = scan(policy, pattern, include_build_script) {
            // Printed to stderr so cargo shows it with the failed build.
            eprintln!("{e}");
            std::process::exit(1);
        }
    }

    // Read by `pebmatrix version`.
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    println!("cargo:rustc-env=PEBMATRIX_BUILD_TIMESTAMP={timestamp}");
}
