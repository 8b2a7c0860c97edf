//! Manifest-driven test harness for compiler test cases
//!
//! Discovers `expect.toml` manifests and runs every `[[case]]` they list:
//! a `.parl` source is compiled and either diffed against a golden
//! assembly file or matched against an expected error substring. Results
//! print as `name ... ok` / `FAILED` lines with a summary block.
//!
//! ```toml
//! [[case]]
//! file = "draw.parl"
//! asm = "draw.parir"
//!
//! [[case]]
//! file = "bad-return.parl"
//! error = "Not all code paths"
//! ```

use crate::compile_to_asm;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

/// File name the runner looks for.
pub const MANIFEST_NAME: &str = "expect.toml";

/// Parsed `expect.toml`.
#[derive(Debug, Deserialize)]
pub struct Manifest {
    #[serde(rename = "case", default)]
    pub cases: Vec<Case>,
}

/// One test case. Paths are relative to the manifest's directory. With
/// neither `asm` nor `error`, the case just asserts that the source
/// compiles.
#[derive(Debug, Deserialize)]
pub struct Case {
    /// Source file to compile.
    pub file: String,
    /// Golden assembly file the output must match.
    #[serde(default)]
    pub asm: Option<String>,
    /// Substring the compilation error must contain.
    #[serde(default)]
    pub error: Option<String>,
}

impl Manifest {
    pub fn from_toml(toml_str: &str) -> Result<Self, String> {
        toml::from_str(toml_str).map_err(|e| format!("Failed to parse test manifest: {}", e))
    }
}

/// Result of running a single case.
#[derive(Debug)]
pub struct TestResult {
    pub name: String,
    pub passed: bool,
    pub duration_ms: u64,
    pub error_output: Option<String>,
}

/// Results for one manifest.
#[derive(Debug)]
pub struct FileTestResults {
    pub path: PathBuf,
    pub tests: Vec<TestResult>,
    pub manifest_error: Option<String>,
}

/// Summary of all results.
#[derive(Debug, Default)]
pub struct TestSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub file_results: Vec<FileTestResults>,
}

pub struct TestRunner {
    pub verbose: bool,
    pub filter: Option<String>,
}

impl TestRunner {
    pub fn new(verbose: bool, filter: Option<String>) -> Self {
        TestRunner { verbose, filter }
    }

    /// Find manifests under the given paths.
    pub fn discover_manifests(&self, paths: &[PathBuf]) -> Vec<PathBuf> {
        let mut manifests = Vec::new();
        for path in paths {
            if path.is_file() {
                if path.file_name().is_some_and(|n| n == MANIFEST_NAME) {
                    manifests.push(path.clone());
                }
            } else if path.is_dir() {
                self.discover_in_directory(path, &mut manifests);
            }
        }
        manifests.sort();
        manifests
    }

    fn discover_in_directory(&self, dir: &Path, manifests: &mut Vec<PathBuf>) {
        if let Ok(entries) = fs::read_dir(dir) {
            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_dir() {
                    self.discover_in_directory(&path, manifests);
                } else if path.file_name().is_some_and(|n| n == MANIFEST_NAME) {
                    manifests.push(path);
                }
            }
        }
    }

    fn matches_filter(&self, name: &str) -> bool {
        match &self.filter {
            Some(pattern) => name.contains(pattern),
            None => true,
        }
    }

    /// Run every case of one manifest.
    pub fn run_manifest(&self, path: &Path) -> FileTestResults {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                return FileTestResults {
                    path: path.to_path_buf(),
                    tests: vec![],
                    manifest_error: Some(format!("Failed to read manifest: {}", e)),
                };
            }
        };

        let manifest = match Manifest::from_toml(&content) {
            Ok(manifest) => manifest,
            Err(e) => {
                return FileTestResults {
                    path: path.to_path_buf(),
                    tests: vec![],
                    manifest_error: Some(e),
                };
            }
        };

        let dir = path.parent().unwrap_or(Path::new("."));
        let tests = manifest
            .cases
            .iter()
            .filter(|case| self.matches_filter(&case.file))
            .map(|case| self.run_case(dir, case))
            .collect();

        FileTestResults {
            path: path.to_path_buf(),
            tests,
            manifest_error: None,
        }
    }

    fn run_case(&self, dir: &Path, case: &Case) -> TestResult {
        let start = Instant::now();
        let outcome = self.case_outcome(dir, case);
        TestResult {
            name: case.file.clone(),
            passed: outcome.is_ok(),
            duration_ms: start.elapsed().as_millis() as u64,
            error_output: outcome.err(),
        }
    }

    fn case_outcome(&self, dir: &Path, case: &Case) -> Result<(), String> {
        let source_path = dir.join(&case.file);
        let source = fs::read_to_string(&source_path)
            .map_err(|e| format!("Failed to read {}: {}", source_path.display(), e))?;

        match (compile_to_asm(&source), &case.error) {
            (Err(err), Some(expected)) => {
                if err.contains(expected) {
                    Ok(())
                } else {
                    Err(format!(
                        "expected an error containing '{}', got: {}",
                        expected, err
                    ))
                }
            }
            (Err(err), None) => Err(format!("Compilation error: {}", err)),
            (Ok(_), Some(expected)) => Err(format!(
                "expected an error containing '{}', but compilation succeeded",
                expected
            )),
            (Ok(asm), None) => match &case.asm {
                Some(golden) => {
                    let golden_path = dir.join(golden);
                    let expected = fs::read_to_string(&golden_path)
                        .map_err(|e| format!("Failed to read {}: {}", golden_path.display(), e))?;
                    if asm.trim_end() == expected.trim_end() {
                        Ok(())
                    } else {
                        Err(first_difference(expected.trim_end(), asm.trim_end()))
                    }
                }
                None => Ok(()),
            },
        }
    }

    /// Run all manifests and collect a summary.
    pub fn run(&self, paths: &[PathBuf]) -> TestSummary {
        let manifests = self.discover_manifests(paths);
        let mut summary = TestSummary::default();

        for path in manifests {
            let file_results = self.run_manifest(&path);
            for test in &file_results.tests {
                summary.total += 1;
                if test.passed {
                    summary.passed += 1;
                } else {
                    summary.failed += 1;
                }
            }
            summary.file_results.push(file_results);
        }

        summary
    }

    pub fn print_results(&self, summary: &TestSummary) {
        for file_result in &summary.file_results {
            if let Some(ref error) = file_result.manifest_error {
                eprintln!("\nFailed to process {}:", file_result.path.display());
                eprintln!("  {}", error);
                continue;
            }

            if file_result.tests.is_empty() {
                continue;
            }

            println!("\nRunning cases from {}...", file_result.path.display());
            for test in &file_result.tests {
                let status = if test.passed { "ok" } else { "FAILED" };
                if self.verbose {
                    println!("  {} ... {} ({}ms)", test.name, status, test.duration_ms);
                } else {
                    println!("  {} ... {}", test.name, status);
                }
            }
        }

        println!("\n========================================");
        println!(
            "Results: {} passed, {} failed",
            summary.passed, summary.failed
        );

        let failures: Vec<_> = summary
            .file_results
            .iter()
            .flat_map(|fr| fr.tests.iter().filter(|t| !t.passed).map(|t| (&fr.path, t)))
            .collect();

        if !failures.is_empty() {
            println!("\nFAILURES:\n");
            for (path, test) in failures {
                println!("{}::{}", path.display(), test.name);
                if let Some(ref error) = test.error_output {
                    for line in error.lines() {
                        println!("  {}", line);
                    }
                }
                println!();
            }
        }
    }
}

/// Point at the first line where the golden text and the produced text
/// diverge.
fn first_difference(expected: &str, actual: &str) -> String {
    for (number, (want, got)) in expected.lines().zip(actual.lines()).enumerate() {
        if want != got {
            return format!(
                "assembly differs at line {}: expected '{}', got '{}'",
                number + 1,
                want,
                got
            );
        }
    }
    format!(
        "assembly differs in length: expected {} lines, got {} lines",
        expected.lines().count(),
        actual.lines().count()
    )
}
