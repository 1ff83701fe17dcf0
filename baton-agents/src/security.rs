//! Security role: pattern scanning over a filesystem tree.
//!
//! The scan fans out across available CPU cores and falls back to a
//! single thread when parallelism is unavailable. Results are findings
//! with severity and location, summarised in the final step.

use crate::patterns::{scan_content, ScanFinding};
use async_trait::async_trait;
use baton_core::{AgentFailure, AgentRoleKind, ErrorKind, PatternCategory, Severity};
use baton_runtime::{AgentBehavior, StepContext, StepPlan};
use serde_json::json;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Files larger than this are skipped; scanning is line-oriented and a
/// multi-megabyte blob is noise.
const MAX_FILE_BYTES: u64 = 256 * 1024;

/// Directories that are never worth scanning.
const SKIP_DIRS: &[&str] = &[".git", "target", "node_modules", ".venv", "__pycache__"];

pub struct SecurityRole {
    plan: StepPlan,
}

impl Default for SecurityRole {
    fn default() -> Self {
        Self::new()
    }
}

impl SecurityRole {
    pub fn new() -> Self {
        let plan = StepPlan::from_names(&[
            "init-patterns",
            "scan-secrets",
            "scan-vulnerabilities",
            "scan-configuration",
            "scan-modern",
            "summarize",
        ])
        .expect("plan within step budget");
        Self { plan }
    }

    fn scan_root(cx: &StepContext) -> Result<PathBuf, AgentFailure> {
        cx.input
            .get("path")
            .and_then(|v| v.as_str())
            .map(PathBuf::from)
            .ok_or_else(|| {
                AgentFailure::new(ErrorKind::ConfigInvalid, "scan input requires a 'path'")
            })
    }

    async fn scan_category(
        root: PathBuf,
        category: PatternCategory,
    ) -> Result<Vec<ScanFinding>, AgentFailure> {
        tokio::task::spawn_blocking(move || {
            let files = collect_files(&root);
            scan_files_parallel(&files, category)
        })
        .await
        .map_err(|e| {
            AgentFailure::new(ErrorKind::StateViolation, format!("scan task panicked: {e}"))
        })
    }
}

/// Walk the tree, collecting regular files under the size cap.
fn collect_files(root: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let Ok(file_type) = entry.file_type() else {
                continue;
            };
            if file_type.is_dir() {
                let name = entry.file_name();
                if !SKIP_DIRS.iter().any(|skip| name == *skip) {
                    stack.push(path);
                }
            } else if file_type.is_file() {
                if let Ok(meta) = entry.metadata() {
                    if meta.len() <= MAX_FILE_BYTES {
                        files.push(path);
                    }
                }
            }
        }
    }
    files
}

/// Scan across available cores; a single chunk degrades to the current
/// thread.
fn scan_files_parallel(files: &[PathBuf], category: PatternCategory) -> Vec<ScanFinding> {
    let workers = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .min(files.len().max(1));

    let mut findings = if workers <= 1 {
        scan_chunk(files, category)
    } else {
        let chunk_size = files.len().div_ceil(workers);
        std::thread::scope(|scope| {
            let handles: Vec<_> = files
                .chunks(chunk_size)
                .map(|chunk| scope.spawn(move || scan_chunk(chunk, category)))
                .collect();
            handles
                .into_iter()
                .flat_map(|h| h.join().unwrap_or_default())
                .collect()
        })
    };

    findings.sort_by(|a, b| a.path.cmp(&b.path).then(a.line.cmp(&b.line)));
    debug!(files = files.len(), workers, %category, count = findings.len(), "scan pass complete");
    findings
}

fn scan_chunk(files: &[PathBuf], category: PatternCategory) -> Vec<ScanFinding> {
    let mut findings = Vec::new();
    for file in files {
        let Ok(content) = std::fs::read_to_string(file) else {
            continue; // binary or unreadable; skip
        };
        findings.extend(scan_content(&file.display().to_string(), &content, category));
    }
    findings
}

/// Count findings at or above each severity for the summary.
fn severity_counts(findings: &[ScanFinding]) -> serde_json::Value {
    let count = |severity: Severity| findings.iter().filter(|f| f.severity == severity).count();
    json!({
        "critical": count(Severity::Critical),
        "high": count(Severity::High),
        "medium": count(Severity::Medium),
        "low": count(Severity::Low),
        "info": count(Severity::Info),
    })
}

#[async_trait]
impl AgentBehavior for SecurityRole {
    fn role(&self) -> AgentRoleKind {
        AgentRoleKind::Security
    }

    fn plan(&self) -> &StepPlan {
        &self.plan
    }

    async fn execute_step(
        &self,
        step: &str,
        cx: &StepContext,
    ) -> Result<serde_json::Value, AgentFailure> {
        let category = match step {
            "init-patterns" => {
                let root = Self::scan_root(cx)?;
                if !root.exists() {
                    return Err(AgentFailure::new(
                        ErrorKind::ConfigInvalid,
                        format!("scan path does not exist: {}", root.display()),
                    ));
                }
                let compiled = crate::patterns::PATTERNS.len();
                return Ok(json!({"patterns": compiled}));
            }
            "scan-secrets" => PatternCategory::Secrets,
            "scan-vulnerabilities" => PatternCategory::Vulnerabilities,
            "scan-configuration" => PatternCategory::Configurations,
            "scan-modern" => PatternCategory::ModernThreats,
            "summarize" => {
                let mut all: Vec<ScanFinding> = Vec::new();
                for key in [
                    "scan-secrets",
                    "scan-vulnerabilities",
                    "scan-configuration",
                    "scan-modern",
                ] {
                    if let Some(findings) = cx.working[key].get("findings") {
                        if let Ok(parsed) =
                            serde_json::from_value::<Vec<ScanFinding>>(findings.clone())
                        {
                            all.extend(parsed);
                        }
                    }
                }
                let clean = all.is_empty();
                return Ok(json!({
                    "total": all.len(),
                    "clean": clean,
                    "by_severity": severity_counts(&all),
                }));
            }
            other => {
                return Err(AgentFailure::new(
                    ErrorKind::StateViolation,
                    format!("unknown step '{other}'"),
                ))
            }
        };

        let root = Self::scan_root(cx)?;
        let findings = Self::scan_category(root, category).await?;
        Ok(json!({
            "category": category.to_string(),
            "count": findings.len(),
            "findings": findings,
        }))
    }
}
