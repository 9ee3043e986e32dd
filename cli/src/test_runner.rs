use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use session::{Session, SessionConfig, Submission, Warning};

#[derive(Debug, Deserialize)]
pub struct ExpectedWarning {
    /// Substring that must appear in the warning message.
    pub contains: String,

    /// If set, the warning must point at this 1-based line of the code
    /// fragment.
    #[serde(default)]
    pub line: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct TestConfig {
    /// Human-readable test description.
    #[serde(default)]
    pub description: Option<String>,

    /// Enable progressive unlocking for the session under test.
    #[serde(default)]
    pub progressive: bool,

    /// Exercise to submit. Defaults to the document's first exercise.
    #[serde(default)]
    pub exercise: Option<String>,

    /// Code to submit. Defaults to the exercise's author-default code.
    #[serde(default)]
    pub code: Option<String>,

    /// Expected rendered Output (trimmed comparison).
    #[serde(default)]
    pub expect_output: Option<String>,

    /// Expected execution fault — the fault's Display string must contain
    /// this substring.
    #[serde(default)]
    pub expect_fault: Option<String>,

    /// Expected load failure — the error's Display string must contain
    /// this substring.
    #[serde(default)]
    pub expect_load_error: Option<String>,

    /// Expected warnings. If present (even empty), warning count and
    /// content are checked.
    #[serde(default)]
    pub expect_warnings: Option<Vec<ExpectedWarning>>,
}

/// Parse a `.test.md` file into its TOML config and lesson source.
fn parse_test_file(content: &str) -> Result<(TestConfig, &str), String> {
    let content = content.trim_start_matches('\u{feff}'); // strip BOM

    if !content.starts_with("---") {
        return Err("missing opening --- frontmatter delimiter".into());
    }

    let after_open = &content[3..];
    let after_open = after_open
        .strip_prefix('\n')
        .or_else(|| after_open.strip_prefix("\r\n"))
        .unwrap_or(after_open);

    let close_pos = after_open
        .find("\n---")
        .ok_or("missing closing --- frontmatter delimiter")?;

    let toml_str = after_open[..close_pos].trim_end_matches('\r');
    let rest_start = close_pos + 4; // skip \n---
    let source = after_open[rest_start..]
        .strip_prefix("\r\n")
        .or_else(|| after_open[rest_start..].strip_prefix('\n'))
        .unwrap_or(&after_open[rest_start..]);

    let config: TestConfig =
        toml::from_str(toml_str).map_err(|e| format!("TOML parse error: {}", e))?;

    Ok((config, source))
}

pub enum TestOutcome {
    Pass,
    Fail(String),
}

pub struct TestResult {
    pub path: PathBuf,
    pub description: Option<String>,
    pub outcome: TestOutcome,
}

fn fail(path: &Path, description: Option<String>, reason: String) -> TestResult {
    TestResult {
        path: path.to_path_buf(),
        description,
        outcome: TestOutcome::Fail(reason),
    }
}

fn run_single_test(path: &Path) -> TestResult {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => return fail(path, None, format!("cannot read file: {}", e)),
    };

    let (config, source) = match parse_test_file(&content) {
        Ok(pair) => pair,
        Err(e) => return fail(path, None, format!("frontmatter error: {}", e)),
    };
    let description = config.description.clone();

    let session_config = SessionConfig {
        progressive: config.progressive,
        time_budget: None,
    };
    let load_result = Session::load(source, session_config);

    // Load-failure expectations short-circuit the submission phase.
    if let Some(expected) = &config.expect_load_error {
        return match load_result {
            Err(error) => {
                let text = error.to_string();
                if text.contains(expected.as_str()) {
                    TestResult {
                        path: path.to_path_buf(),
                        description,
                        outcome: TestOutcome::Pass,
                    }
                } else {
                    fail(
                        path,
                        description,
                        format!(
                            "expected load error containing \"{}\", got: {}",
                            expected, text
                        ),
                    )
                }
            }
            Ok(_) => fail(
                path,
                description,
                format!(
                    "expected load error containing \"{}\", but loading succeeded",
                    expected
                ),
            ),
        };
    }

    let mut session = match load_result {
        Ok(s) => s,
        Err(error) => return fail(path, description, format!("unexpected load error: {}", error)),
    };

    // Pick the exercise and the code to submit.
    let exercise_id = match &config.exercise {
        Some(id) => id.clone(),
        None => match session.exercises().next() {
            Some(ex) => ex.id().to_string(),
            None => return fail(path, description, "document has no exercises".into()),
        },
    };
    let code = match &config.code {
        Some(code) => code.clone(),
        None => match session.exercise(&exercise_id) {
            Some(ex) => ex.default_code().to_string(),
            None => {
                return fail(
                    path,
                    description,
                    format!("unknown exercise '{}'", exercise_id),
                );
            }
        },
    };

    let submission = match session.submit(&exercise_id, &code) {
        Ok(s) => s,
        Err(e) => return fail(path, description, format!("submit rejected: {}", e)),
    };

    let reason = check_submission(&config, &submission);
    match reason {
        Some(reason) => fail(path, description, reason),
        None => TestResult {
            path: path.to_path_buf(),
            description,
            outcome: TestOutcome::Pass,
        },
    }
}

/// Check fault/output/warning expectations. Returns `Some(reason)` on the
/// first mismatch.
fn check_submission(config: &TestConfig, submission: &Submission) -> Option<String> {
    match (&config.expect_fault, submission) {
        (Some(expected), Submission::Faulted(fault)) => {
            let text = fault.to_string();
            if !text.contains(expected.as_str()) {
                return Some(format!(
                    "expected fault containing \"{}\", got: {}",
                    expected, text
                ));
            }
            None
        }
        (Some(expected), Submission::Completed { .. }) => Some(format!(
            "expected fault containing \"{}\", but the submission succeeded",
            expected
        )),
        (None, Submission::Faulted(fault)) => {
            Some(format!("unexpected execution fault: {}", fault))
        }
        (None, Submission::Completed { output, warnings }) => {
            if let Some(expected) = &config.expect_output {
                let actual = output.to_string();
                let actual_trimmed = actual.trim();
                let expected_trimmed = expected.trim();
                if actual_trimmed != expected_trimmed {
                    return Some(format!(
                        "output mismatch\n  expected: {}\n  actual:   {}",
                        expected_trimmed, actual_trimmed
                    ));
                }
            }
            if let Some(expected) = &config.expect_warnings {
                return check_warnings(warnings, expected);
            }
            None
        }
    }
}

/// Check that actual warnings match expectations.
fn check_warnings(actual: &[Warning], expected: &[ExpectedWarning]) -> Option<String> {
    if actual.len() != expected.len() {
        let actual_msgs: Vec<String> = actual.iter().map(|w| format!("  - {}", w)).collect();
        return Some(format!(
            "expected {} warning(s), got {}\n  actual warnings:\n{}",
            expected.len(),
            actual.len(),
            if actual_msgs.is_empty() {
                "    (none)".to_string()
            } else {
                actual_msgs.join("\n")
            }
        ));
    }

    for (i, (actual, expected)) in actual.iter().zip(expected.iter()).enumerate() {
        if !actual.message.contains(&expected.contains) {
            return Some(format!(
                "warning[{}]: expected message containing \"{}\", got: {}",
                i, expected.contains, actual.message
            ));
        }
        if let Some(expected_line) = expected.line {
            if actual.line != Some(expected_line) {
                return Some(format!(
                    "warning[{}]: expected on line {}, but warning reports {:?}",
                    i, expected_line, actual.line
                ));
            }
        }
    }

    None
}

// ---------------------------------------------------------------------------
// Discovery and reporting
// ---------------------------------------------------------------------------

/// Discover `.test.md` files grouped by category (subfolder relative to
/// root). Files directly in `root` get category "" (uncategorized).
fn discover_categorized(root: &Path) -> BTreeMap<String, Vec<PathBuf>> {
    let mut categories: BTreeMap<String, Vec<PathBuf>> = BTreeMap::new();
    collect_tests(root, root, &mut categories);
    for files in categories.values_mut() {
        files.sort();
    }
    categories
}

fn collect_tests(dir: &Path, root: &Path, out: &mut BTreeMap<String, Vec<PathBuf>>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_tests(&path, root, out);
        } else if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            if name.ends_with(".test.md") {
                let category = path
                    .parent()
                    .and_then(|p| p.strip_prefix(root).ok())
                    .map(|p| p.to_string_lossy().replace('\\', "/"))
                    .unwrap_or_default();
                out.entry(category).or_default().push(path);
            }
        }
    }
}

/// List available categories for the given test path.
pub fn list_categories(path: &Path) {
    if path.is_file() {
        eprintln!("(single file, no categories)");
        return;
    }

    let categories = discover_categorized(path);
    if categories.is_empty() {
        eprintln!("no .test.md files found in {}", path.display());
        return;
    }

    eprintln!("available categories:");
    for (cat, files) in &categories {
        let label = if cat.is_empty() { "(root)" } else { cat.as_str() };
        eprintln!("  {} ({} tests)", label, files.len());
    }
}

fn pass_label(no_color: bool) -> &'static str {
    if no_color { "PASS" } else { "\x1b[32mPASS\x1b[0m" }
}

fn fail_label(no_color: bool) -> &'static str {
    if no_color { "FAIL" } else { "\x1b[31mFAIL\x1b[0m" }
}

fn bold(s: &str, no_color: bool) -> String {
    if no_color {
        s.to_string()
    } else {
        format!("\x1b[1m{}\x1b[0m", s)
    }
}

fn report(result: &TestResult, no_color: bool) -> bool {
    let label = result.description.as_deref().unwrap_or_else(|| {
        result
            .path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("?")
    });
    match &result.outcome {
        TestOutcome::Pass => {
            eprintln!("  {}  {}", pass_label(no_color), label);
            true
        }
        TestOutcome::Fail(_) => {
            eprintln!("  {}  {}", fail_label(no_color), label);
            false
        }
    }
}

fn print_failures(failures: &[TestResult]) {
    if failures.is_empty() {
        return;
    }
    eprintln!();
    eprintln!("failures:");
    for f in failures {
        eprintln!();
        eprintln!("  --- {} ---", f.path.display());
        if let TestOutcome::Fail(reason) = &f.outcome {
            for line in reason.lines() {
                eprintln!("  {}", line);
            }
        }
    }
}

fn print_summary(passed: usize, failed: usize, no_color: bool) {
    eprintln!();
    if failed == 0 {
        let ok = if no_color { "ok" } else { "\x1b[32mok\x1b[0m" };
        eprintln!("test result: {}. {} passed, 0 failed", ok, passed);
    } else {
        let label = if no_color {
            "FAILED"
        } else {
            "\x1b[31mFAILED\x1b[0m"
        };
        eprintln!(
            "test result: {}. {} passed, {} failed (of {})",
            label,
            passed,
            failed,
            passed + failed
        );
    }
}

/// Run all `.test.md` files under `path` (or a single file).
/// If `categories` is non-empty, only run tests in those categories.
/// Returns exit code: 0 = all pass, 1 = any failure.
pub fn run_tests(path: &Path, no_color: bool, categories: &[String]) -> i32 {
    // Single file mode — ignore categories.
    if path.is_file() {
        let result = run_single_test(path);
        let passed = report(&result, no_color);
        if !passed {
            print_failures(std::slice::from_ref(&result));
        }
        print_summary(passed as usize, !passed as usize, no_color);
        return if passed { 0 } else { 1 };
    }

    let all_categories = discover_categorized(path);
    if all_categories.is_empty() {
        eprintln!("no .test.md files found in {}", path.display());
        return 1;
    }

    // Filter categories if specified.
    let run_categories: BTreeMap<&str, &Vec<PathBuf>> = if categories.is_empty() {
        all_categories.iter().map(|(k, v)| (k.as_str(), v)).collect()
    } else {
        let mut filtered = BTreeMap::new();
        for requested in categories {
            let req = requested.trim_matches('/');
            let mut found = false;
            for (cat, files) in &all_categories {
                if cat == req || cat.starts_with(&format!("{}/", req)) {
                    filtered.insert(cat.as_str(), files);
                    found = true;
                }
            }
            if !found {
                eprintln!(
                    "warning: category '{}' not found (available: {})",
                    req,
                    all_categories
                        .keys()
                        .map(|k| if k.is_empty() { "(root)" } else { k.as_str() })
                        .collect::<Vec<_>>()
                        .join(", ")
                );
            }
        }
        filtered
    };

    if run_categories.is_empty() {
        eprintln!("no matching categories found");
        return 1;
    }

    let mut passed = 0usize;
    let mut failures: Vec<TestResult> = Vec::new();

    for (cat, files) in &run_categories {
        let header = if cat.is_empty() {
            "(root)".to_string()
        } else {
            cat.to_string()
        };
        eprintln!();
        eprintln!("{}", bold(&header, no_color));

        for file in *files {
            let result = run_single_test(file);
            if report(&result, no_color) {
                passed += 1;
            } else {
                failures.push(result);
            }
        }
    }

    print_failures(&failures);
    print_summary(passed, failures.len(), no_color);
    if failures.is_empty() { 0 } else { 1 }
}
