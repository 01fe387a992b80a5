//! File-level reconciliation between the game reference tree and the
//! translated localization tree
//!
//! Walks every `.json` file under the reference root, strips the language
//! prefix from its name, and either copies it into the destination tree
//! (new module) or folds it into the existing translated file with the
//! additive merge engine. Per-file problems are reported through an anomaly
//! sink and never abort the batch.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::merge::{additive_merge, identity_of};

/// Filename prefix marking reference-language files, e.g. `EN_Buffs.json`.
pub const DEFAULT_LANGUAGE_PREFIX: &str = "EN_";

/// Progress reporting cadence, in files.
const PROGRESS_INTERVAL: usize = 50;

/// Aggregate counts for one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Reference files copied verbatim because no destination existed.
    pub created: usize,
    /// Destination files that actually changed during a merge.
    pub merged: usize,
    /// Every reference file looked at, including skipped and anomalous ones.
    pub examined: usize,
}

/// A progress update emitted during a reconciliation pass.
#[derive(Debug, Clone)]
pub struct Progress {
    pub message: String,
    pub processed: usize,
    pub total: usize,
}

/// A per-file data-integrity problem. The batch continues past these; they
/// are surfaced so a developer can inspect the offending file.
#[derive(Debug, Clone)]
pub struct FileAnomaly {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("reference directory does not exist: {0}")]
    MissingReferenceRoot(PathBuf),
    #[error("reconciliation cancelled after examining {0} file(s)")]
    Cancelled(usize),
    #[error("failed to walk reference tree: {0}")]
    Walk(#[from] walkdir::Error),
    #[error("failed to prepare destination directory {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

type ProgressSink<'a> = Box<dyn FnMut(Progress) + Send + 'a>;
type AnomalySink<'a> = Box<dyn FnMut(FileAnomaly) + Send + 'a>;

/// Drives one reconciliation pass. Callbacks and the cancellation flag are
/// optional; a default reconciler just does the work silently.
pub struct Reconciler<'a> {
    language_prefix: String,
    cancel: Arc<AtomicBool>,
    progress: Option<ProgressSink<'a>>,
    anomaly: Option<AnomalySink<'a>>,
}

impl Default for Reconciler<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> Reconciler<'a> {
    pub fn new() -> Self {
        Self {
            language_prefix: DEFAULT_LANGUAGE_PREFIX.to_string(),
            cancel: Arc::new(AtomicBool::new(false)),
            progress: None,
            anomaly: None,
        }
    }

    pub fn with_language_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.language_prefix = prefix.into();
        self
    }

    /// Flag checked between files; set it from another thread to stop the
    /// batch cooperatively.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn on_progress(mut self, sink: impl FnMut(Progress) + Send + 'a) -> Self {
        self.progress = Some(Box::new(sink));
        self
    }

    pub fn on_anomaly(mut self, sink: impl FnMut(FileAnomaly) + Send + 'a) -> Self {
        self.anomaly = Some(Box::new(sink));
        self
    }

    /// Reconcile every reference file into the destination tree.
    pub fn run(
        &mut self,
        reference_root: &Path,
        destination_root: &Path,
    ) -> Result<ReconcileReport, ReconcileError> {
        if !reference_root.is_dir() {
            return Err(ReconcileError::MissingReferenceRoot(
                reference_root.to_path_buf(),
            ));
        }
        fs::create_dir_all(destination_root).map_err(|source| ReconcileError::Io {
            path: destination_root.to_path_buf(),
            source,
        })?;

        let mut files = Vec::new();
        for entry in WalkDir::new(reference_root) {
            let entry = entry?;
            if entry.file_type().is_file() && is_json_file(entry.path()) {
                files.push(entry.into_path());
            }
        }
        let total = files.len();
        let mut report = ReconcileReport::default();

        self.report_progress(
            format!("Found {total} reference files"),
            0,
            total,
        );

        for (processed, path) in files.iter().enumerate() {
            if self.cancel.load(Ordering::Relaxed) {
                return Err(ReconcileError::Cancelled(report.examined));
            }
            report.examined += 1;

            let Ok(relative) = path.strip_prefix(reference_root) else {
                continue;
            };
            let destination = destination_root.join(self.strip_prefix_from_name(relative));

            if destination.exists() {
                match self.merge_file(path, &destination) {
                    Ok(true) => report.merged += 1,
                    Ok(false) => {}
                    Err(reason) => self.report_anomaly(path.clone(), reason),
                }
            } else {
                match copy_reference_file(path, &destination) {
                    Ok(()) => report.created += 1,
                    Err(reason) => self.report_anomaly(path.clone(), reason),
                }
            }

            let done = processed + 1;
            if done % PROGRESS_INTERVAL == 0 && done < total {
                self.report_progress(
                    format!(
                        "Processed {done}/{total} files... (added: {}, merged: {})",
                        report.created, report.merged
                    ),
                    done,
                    total,
                );
            }
        }

        self.report_progress(
            format!(
                "Completed: added {} file(s), merged {} file(s), examined {}",
                report.created, report.merged, report.examined
            ),
            total,
            total,
        );
        Ok(report)
    }

    /// Strip the language prefix from the final path component only; the
    /// directory structure is mirrored as-is.
    fn strip_prefix_from_name(&self, relative: &Path) -> PathBuf {
        let Some(name) = relative.file_name().and_then(|n| n.to_str()) else {
            return relative.to_path_buf();
        };
        let clean = name.strip_prefix(&self.language_prefix).unwrap_or(name);
        match relative.parent() {
            Some(parent) => parent.join(clean),
            None => PathBuf::from(clean),
        }
    }

    /// Merge a reference file into an existing destination file. Returns
    /// whether the destination changed. An `Err` is an anomaly message, not a
    /// batch failure.
    fn merge_file(&mut self, reference: &Path, destination: &Path) -> Result<bool, String> {
        let source_text = fs::read_to_string(reference)
            .map_err(|e| format!("failed to read reference file: {e}"))?;
        let destination_text = fs::read_to_string(destination)
            .map_err(|e| format!("failed to read destination file: {e}"))?;

        if has_conflict_markers(&source_text) {
            return Err("reference file contains unresolved Git conflict markers".to_string());
        }
        if has_conflict_markers(&destination_text) {
            return Err(
                "destination file contains unresolved Git conflict markers; resolve it manually"
                    .to_string(),
            );
        }

        let source: Value = serde_json::from_str(&source_text)
            .map_err(|e| format!("reference file is not valid JSON: {e}"))?;
        let mut dest: Value = serde_json::from_str(&destination_text)
            .map_err(|e| format!("destination file is not valid JSON: {e}"))?;

        let Value::Object(source_obj) = &source else {
            return Err("reference file is not a JSON object".to_string());
        };
        let Some(source_key) = data_list_key(source_obj) else {
            return Err("reference file has no dataList array".to_string());
        };
        let source_list = &source_obj[source_key];
        warn_on_duplicate_identities(reference, source_list);

        let Value::Object(dest_obj) = &mut dest else {
            return Err("destination file is not a JSON object".to_string());
        };

        let changed = match data_list_key(dest_obj) {
            Some(dest_key) => {
                let dest_list = dest_obj
                    .get_mut(dest_key)
                    .expect("key just located in destination");
                additive_merge(dest_list, source_list)
            }
            None => {
                // No usable list on the destination side yet: adopt the
                // reference list wholesale, keeping the source's key casing.
                debug!(path = %destination.display(), "destination has no dataList, adopting reference list");
                dest_obj.insert(source_key.to_string(), source_list.clone());
                true
            }
        };

        if changed {
            let rendered = serde_json::to_string_pretty(&dest)
                .map_err(|e| format!("failed to serialize merged file: {e}"))?;
            fs::write(destination, rendered)
                .map_err(|e| format!("failed to write merged file: {e}"))?;
        }
        Ok(changed)
    }

    fn report_progress(&mut self, message: String, processed: usize, total: usize) {
        debug!("{message}");
        if let Some(sink) = &mut self.progress {
            sink(Progress {
                message,
                processed,
                total,
            });
        }
    }

    fn report_anomaly(&mut self, path: PathBuf, reason: String) {
        warn!(path = %path.display(), "{reason}");
        if let Some(sink) = &mut self.anomaly {
            sink(FileAnomaly { path, reason });
        }
    }
}

fn is_json_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false)
}

/// Locate the record list, tolerating the case drift present in real game
/// data (`dataList` in most files, `DataList` in a few).
fn data_list_key(obj: &serde_json::Map<String, Value>) -> Option<&'static str> {
    for key in ["dataList", "DataList"] {
        if matches!(obj.get(key), Some(Value::Array(_))) {
            return Some(key);
        }
    }
    None
}

fn has_conflict_markers(text: &str) -> bool {
    text.lines()
        .any(|line| line.starts_with("<<<<<<<") || line.starts_with(">>>>>>>"))
}

/// Duplicate identities inside one reference array are resolved by
/// first-match-wins downstream; log them so the hazard stays visible.
fn warn_on_duplicate_identities(path: &Path, list: &Value) {
    let Value::Array(items) = list else { return };
    let mut seen = std::collections::HashSet::new();
    for item in items {
        if let Value::Object(record) = item
            && let Some(id) = identity_of(record)
            && !seen.insert(id.clone())
        {
            warn!(path = %path.display(), id, "duplicate identity in reference dataList");
        }
    }
}

fn copy_reference_file(reference: &Path, destination: &Path) -> Result<(), String> {
    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("failed to create destination directory: {e}"))?;
    }
    fs::copy(reference, destination).map_err(|e| format!("failed to copy file: {e}"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn write(root: &Path, rel: &str, content: &str) -> PathBuf {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn new_file_is_copied_verbatim_with_prefix_stripped() {
        let reference = tempdir().unwrap();
        let destination = tempdir().unwrap();
        let content = r#"{"dataList":[{"id":"1","name":"Burn"}]}"#;
        write(reference.path(), "EN_Buffs.json", content);

        let report = Reconciler::new()
            .run(reference.path(), destination.path())
            .unwrap();

        assert_eq!(report.created, 1);
        assert_eq!(report.merged, 0);
        assert_eq!(report.examined, 1);
        let copied = fs::read_to_string(destination.path().join("Buffs.json")).unwrap();
        assert_eq!(copied, content);
    }

    #[test]
    fn nested_directories_are_mirrored() {
        let reference = tempdir().unwrap();
        let destination = tempdir().unwrap();
        write(
            reference.path(),
            "StoryData/EN_Chapter1.json",
            r#"{"dataList":[]}"#,
        );

        let report = Reconciler::new()
            .run(reference.path(), destination.path())
            .unwrap();

        assert_eq!(report.created, 1);
        assert!(destination.path().join("StoryData/Chapter1.json").exists());
    }

    #[test]
    fn existing_file_is_merged_not_replaced() {
        let reference = tempdir().unwrap();
        let destination = tempdir().unwrap();
        write(
            reference.path(),
            "EN_Buffs.json",
            r#"{"dataList":[{"id":"1","name":"Burn","desc":"desc"}]}"#,
        );
        let dest_file = write(
            destination.path(),
            "Buffs.json",
            r#"{"dataList":[{"id":"1","name":"ПереведеноВручную"}]}"#,
        );

        let report = Reconciler::new()
            .run(reference.path(), destination.path())
            .unwrap();

        assert_eq!(report.created, 0);
        assert_eq!(report.merged, 1);
        assert_eq!(report.examined, 1);
        let merged: Value =
            serde_json::from_str(&fs::read_to_string(&dest_file).unwrap()).unwrap();
        assert_eq!(
            merged["dataList"][0],
            json!({"id": "1", "name": "ПереведеноВручную", "desc": "desc"})
        );
    }

    #[test]
    fn empty_destination_list_is_filled_and_counted_as_merged() {
        let reference = tempdir().unwrap();
        let destination = tempdir().unwrap();
        write(
            reference.path(),
            "EN_Buffs.json",
            r#"{"dataList":[{"id":"1","name":"Burn","desc":"desc"}]}"#,
        );
        let dest_file = write(destination.path(), "Buffs.json", r#"{"dataList":[]}"#);

        let report = Reconciler::new()
            .run(reference.path(), destination.path())
            .unwrap();

        assert_eq!(report.merged, 1);
        assert_eq!(report.examined, 1);
        let merged: Value =
            serde_json::from_str(&fs::read_to_string(&dest_file).unwrap()).unwrap();
        assert_eq!(
            merged["dataList"],
            json!([{"id": "1", "name": "Burn", "desc": "desc"}])
        );
    }

    #[test]
    fn unchanged_file_is_examined_but_not_merged() {
        let reference = tempdir().unwrap();
        let destination = tempdir().unwrap();
        let content = r#"{"dataList":[{"id":"1","name":"Burn"}]}"#;
        write(reference.path(), "EN_Buffs.json", content);
        let dest_file = write(destination.path(), "Buffs.json", content);
        let before = fs::read_to_string(&dest_file).unwrap();

        let report = Reconciler::new()
            .run(reference.path(), destination.path())
            .unwrap();

        assert_eq!(report.merged, 0);
        assert_eq!(report.examined, 1);
        // Unchanged files are not rewritten.
        assert_eq!(fs::read_to_string(&dest_file).unwrap(), before);
    }

    #[test]
    fn missing_data_list_is_reported_and_batch_continues() {
        let reference = tempdir().unwrap();
        let destination = tempdir().unwrap();
        write(reference.path(), "EN_Broken.json", r#"{"other": 1}"#);
        write(destination.path(), "Broken.json", r#"{"dataList":[]}"#);
        write(
            reference.path(),
            "EN_Good.json",
            r#"{"dataList":[{"id":"1"}]}"#,
        );

        let mut anomalies = Vec::new();
        let mut reconciler = Reconciler::new().on_anomaly(|a| anomalies.push(a));
        let report = reconciler
            .run(reference.path(), destination.path())
            .unwrap();
        drop(reconciler);

        assert_eq!(report.examined, 2);
        assert_eq!(report.created, 1);
        assert_eq!(anomalies.len(), 1);
        assert!(anomalies[0].reason.contains("dataList"));
        assert!(anomalies[0].path.ends_with("EN_Broken.json"));
    }

    #[test]
    fn invalid_json_is_reported_not_fatal() {
        let reference = tempdir().unwrap();
        let destination = tempdir().unwrap();
        write(reference.path(), "EN_Bad.json", "<html>not json</html>");
        write(destination.path(), "Bad.json", r#"{"dataList":[]}"#);

        let mut anomalies = Vec::new();
        let mut reconciler = Reconciler::new().on_anomaly(|a| anomalies.push(a));
        let report = reconciler
            .run(reference.path(), destination.path())
            .unwrap();
        drop(reconciler);

        assert_eq!(report.examined, 1);
        assert_eq!(report.merged, 0);
        assert_eq!(anomalies.len(), 1);
    }

    #[test]
    fn conflict_markers_are_reported_without_rewriting() {
        let reference = tempdir().unwrap();
        let destination = tempdir().unwrap();
        write(
            reference.path(),
            "EN_Buffs.json",
            r#"{"dataList":[{"id":"1"}]}"#,
        );
        let conflicted = "<<<<<<< HEAD\n{\"dataList\":[]}\n=======\n{}\n>>>>>>> theirs\n";
        let dest_file = write(destination.path(), "Buffs.json", conflicted);

        let mut anomalies = Vec::new();
        let mut reconciler = Reconciler::new().on_anomaly(|a| anomalies.push(a));
        reconciler
            .run(reference.path(), destination.path())
            .unwrap();
        drop(reconciler);

        assert_eq!(anomalies.len(), 1);
        assert!(anomalies[0].reason.contains("conflict markers"));
        assert_eq!(fs::read_to_string(&dest_file).unwrap(), conflicted);
    }

    #[test]
    fn data_list_case_drift_is_tolerated() {
        let reference = tempdir().unwrap();
        let destination = tempdir().unwrap();
        write(
            reference.path(),
            "EN_Old.json",
            r#"{"DataList":[{"id":"9","name":"New"}]}"#,
        );
        let dest_file = write(
            destination.path(),
            "Old.json",
            r#"{"DataList":[{"id":"9","name":"Старый"}]}"#,
        );

        let report = Reconciler::new()
            .run(reference.path(), destination.path())
            .unwrap();

        assert_eq!(report.merged, 0);
        let after: Value = serde_json::from_str(&fs::read_to_string(&dest_file).unwrap()).unwrap();
        assert_eq!(after["DataList"][0]["name"], "Старый");
    }

    #[test]
    fn cancellation_stops_between_files() {
        let reference = tempdir().unwrap();
        let destination = tempdir().unwrap();
        for i in 0..5 {
            write(
                reference.path(),
                &format!("EN_File{i}.json"),
                r#"{"dataList":[]}"#,
            );
        }

        let mut reconciler = Reconciler::new();
        reconciler.cancel_flag().store(true, Ordering::Relaxed);
        let result = reconciler.run(reference.path(), destination.path());
        assert!(matches!(result, Err(ReconcileError::Cancelled(0))));
    }

    #[test]
    fn missing_reference_root_is_fatal() {
        let destination = tempdir().unwrap();
        let result = Reconciler::new().run(Path::new("/nonexistent/reference"), destination.path());
        assert!(matches!(
            result,
            Err(ReconcileError::MissingReferenceRoot(_))
        ));
    }

    #[test]
    fn progress_reports_start_and_completion() {
        let reference = tempdir().unwrap();
        let destination = tempdir().unwrap();
        write(reference.path(), "EN_A.json", r#"{"dataList":[]}"#);

        let mut messages = Vec::new();
        let mut reconciler = Reconciler::new().on_progress(|p| messages.push(p));
        reconciler
            .run(reference.path(), destination.path())
            .unwrap();
        drop(reconciler);

        assert!(messages.len() >= 2);
        assert_eq!(messages.first().unwrap().total, 1);
        assert_eq!(messages.last().unwrap().processed, 1);
        assert!(messages.last().unwrap().message.contains("Completed"));
    }

    #[test]
    fn non_json_files_are_ignored() {
        let reference = tempdir().unwrap();
        let destination = tempdir().unwrap();
        write(reference.path(), "readme.txt", "not localization data");
        write(reference.path(), "EN_A.json", r#"{"dataList":[]}"#);

        let report = Reconciler::new()
            .run(reference.path(), destination.path())
            .unwrap();
        assert_eq!(report.examined, 1);
        assert!(!destination.path().join("readme.txt").exists());
    }
}
