//! End-to-end `export` run: fetch catalog → extract → render → write → manifest.
//!
//! Phase 1 talks to the instance and materializes the whole catalog; any
//! connectivity failure aborts there, before a single file is written.
//! Phase 2 is local: extraction, rendering, and writes.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use kbmirror_client::ServiceNowClient;
use kbmirror_markdown::RenderOptions;
use kbmirror_shared::{Catalog, ExportConfig, Result};

use crate::document::build_document;
use crate::extract::{ExtractionReport, extract};
use crate::writer::{ArticleWriter, ExportManifest, MANIFEST_FILE, ManifestEntry, manifest_path};

/// A file that could not be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedWrite {
    /// Path relative to the output root.
    pub path: PathBuf,
    pub error: String,
}

/// Result of an export run.
#[derive(Debug, Clone)]
pub struct ExportResult {
    pub run_id: Uuid,
    pub output_dir: PathBuf,
    /// What extraction kept and skipped.
    pub report: ExtractionReport,
    /// Article files written.
    pub written: usize,
    /// Articles whose body fell back to plain text.
    pub degraded: usize,
    pub failed: Vec<FailedWrite>,
    /// `manifest.json`, when one was written.
    pub manifest_path: Option<PathBuf>,
    pub elapsed: Duration,
}

impl ExportResult {
    fn new(run_id: Uuid, output_dir: PathBuf, report: ExtractionReport) -> Self {
        Self {
            run_id,
            output_dir,
            report,
            written: 0,
            degraded: 0,
            failed: Vec::new(),
            manifest_path: None,
            elapsed: Duration::ZERO,
        }
    }

    /// Articles dropped during extraction.
    pub fn skipped(&self) -> usize {
        self.report.articles_skipped()
    }

    /// Rows rejected at the fetch boundary.
    pub fn rejected(&self) -> usize {
        self.report.rejected_records
    }

    /// Whether any write failed; the CLI exits non-zero when it did.
    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty()
    }
}

/// Progress callback for reporting export status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called after each article file is written.
    fn article_written(&self, path: &str, current: usize, total: usize);
    /// Called when the run completes.
    fn done(&self, result: &ExportResult);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn article_written(&self, _path: &str, _current: usize, _total: usize) {}
    fn done(&self, _result: &ExportResult) {}
}

/// Run a full export against the configured instance.
///
/// 1. Fetch knowledge bases, categories, and articles
/// 2. Extract output units
/// 3. Render, build, and write each article
/// 4. Write the manifest
#[instrument(skip_all, fields(instance = %config.instance_url, output = %config.output_dir.display()))]
pub async fn run_export(
    config: &ExportConfig,
    progress: &dyn ProgressReporter,
) -> Result<ExportResult> {
    let start = Instant::now();
    let run_id = Uuid::now_v7();

    info!(%run_id, "starting export");

    // --- Phase 1: Fetch ---
    progress.phase("Fetching catalog");
    let client = ServiceNowClient::new(config)?;
    let catalog = client.fetch_catalog().await?;

    // --- Phase 2: Extract + write ---
    let mut result = export_catalog(&catalog, config, run_id, progress)?;
    result.elapsed = start.elapsed();

    progress.done(&result);

    info!(
        %run_id,
        written = result.written,
        skipped = result.skipped(),
        rejected = result.rejected(),
        degraded = result.degraded,
        failed = result.failed.len(),
        elapsed_ms = result.elapsed.as_millis(),
        "export complete"
    );

    Ok(result)
}

/// Extract and write an already-fetched catalog.
///
/// Fails only when the output root can't be created; individual write
/// failures are logged and listed in the result.
pub fn export_catalog(
    catalog: &Catalog,
    config: &ExportConfig,
    run_id: Uuid,
    progress: &dyn ProgressReporter,
) -> Result<ExportResult> {
    let start = Instant::now();

    progress.phase("Planning export");
    let plan = extract(catalog, &config.allow_list);
    let mut result = ExportResult::new(run_id, config.output_dir.clone(), plan.report.clone());

    if let Some(reason) = plan.report.empty_reason {
        warn!(%reason, "nothing to export");
        result.elapsed = start.elapsed();
        return Ok(result);
    }

    progress.phase("Writing articles");
    let writer = ArticleWriter::create(&config.output_dir)?;
    let render_opts = RenderOptions {
        base_url: Some(config.instance_url.clone()),
    };

    let total = plan.units.len();
    let mut entries = Vec::with_capacity(total);

    for (i, unit) in plan.units.iter().enumerate() {
        let article = unit.article;
        let rendered = kbmirror_markdown::render(&article.body_html, &render_opts);
        if rendered.degraded {
            warn!(sys_id = %article.sys_id, "body exported as plain text");
            result.degraded += 1;
        }

        let contents = build_document(unit, &rendered.markdown);
        let relative = manifest_path(&unit.path);

        match writer.write(&unit.path, &contents) {
            Ok(file) => {
                progress.article_written(&relative, i + 1, total);
                entries.push(ManifestEntry {
                    path: relative,
                    sys_id: article.sys_id.clone(),
                    title: article.title.clone(),
                    sha256: file.sha256,
                    size_bytes: file.size_bytes,
                });
            }
            Err(e) => {
                warn!(path = %relative, error = %e, "failed to write article, skipping");
                result.failed.push(FailedWrite {
                    path: unit.path.clone(),
                    error: e.to_string(),
                });
            }
        }
    }

    result.written = entries.len();

    progress.phase("Writing manifest");
    let manifest = ExportManifest {
        run_id: run_id.to_string(),
        instance: config.instance_url.to_string(),
        exported_at: Utc::now(),
        tool_version: config.tool_version.clone(),
        files: entries,
    };
    match writer.write_manifest(&manifest) {
        Ok(path) => result.manifest_path = Some(path),
        Err(e) => {
            warn!(error = %e, "failed to write manifest");
            result.failed.push(FailedWrite {
                path: PathBuf::from(MANIFEST_FILE),
                error: e.to_string(),
            });
        }
    }

    result.elapsed = start.elapsed();
    Ok(result)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::Mutex;

    use kbmirror_shared::{AllowList, Article, Category, Credentials, KbMirrorError, KnowledgeBase};
    use serde_json::json;
    use url::Url;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn temp_dir() -> PathBuf {
        std::env::temp_dir().join(format!("kbmirror-export-test-{}", Uuid::now_v7()))
    }

    fn test_config(uri: &str, output_dir: &Path) -> ExportConfig {
        ExportConfig {
            instance_url: Url::parse(uri).unwrap(),
            credentials: Credentials {
                username: "admin".into(),
                password: "secret".into(),
            },
            allow_list: AllowList::default(),
            output_dir: output_dir.to_path_buf(),
            page_size: 100,
            timeout_secs: 5,
            article_query: None,
            tool_version: "0.1.0-test".into(),
        }
    }

    fn page(rows: serde_json::Value) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({ "result": rows }))
    }

    fn catalog() -> Catalog {
        Catalog {
            knowledge_bases: vec![
                KnowledgeBase {
                    sys_id: "kb1".into(),
                    name: "IT".into(),
                },
                KnowledgeBase {
                    sys_id: "kb2".into(),
                    name: "HR".into(),
                },
            ],
            categories: vec![
                Category {
                    sys_id: "c1".into(),
                    name: "Security".into(),
                    knowledge_base: Some("kb1".into()),
                    parent: None,
                },
                Category {
                    sys_id: "c2".into(),
                    name: "Payroll".into(),
                    knowledge_base: Some("kb2".into()),
                    parent: None,
                },
            ],
            articles: vec![
                Article {
                    sys_id: "a1".into(),
                    title: "What is Spam".into(),
                    body_html: "<p>Spam is unwanted mail.</p>".into(),
                    category: Some("c1".into()),
                    knowledge_base: Some("kb1".into()),
                    author: None,
                    created: None,
                    updated: None,
                    view_count: None,
                    rating: None,
                },
                Article {
                    sys_id: "a2".into(),
                    title: "Payslips".into(),
                    body_html: "<p>Monthly.</p>".into(),
                    category: Some("c2".into()),
                    knowledge_base: Some("kb2".into()),
                    author: None,
                    created: None,
                    updated: None,
                    view_count: None,
                    rating: None,
                },
            ],
            rejected: vec![],
        }
    }

    /// Records every progress callback, for asserting on order.
    #[derive(Default)]
    struct RecordingProgress {
        events: Mutex<Vec<String>>,
    }

    impl ProgressReporter for RecordingProgress {
        fn phase(&self, name: &str) {
            self.events.lock().unwrap().push(format!("phase:{name}"));
        }
        fn article_written(&self, path: &str, current: usize, total: usize) {
            self.events
                .lock()
                .unwrap()
                .push(format!("wrote:{path}:{current}/{total}"));
        }
        fn done(&self, result: &ExportResult) {
            self.events
                .lock()
                .unwrap()
                .push(format!("done:{}", result.written));
        }
    }

    #[test]
    fn export_catalog_writes_articles_and_manifest() {
        let tmp = temp_dir();
        let config = test_config("https://acme.service-now.com", &tmp);
        let progress = RecordingProgress::default();

        let result = export_catalog(&catalog(), &config, Uuid::now_v7(), &progress).unwrap();

        assert_eq!(result.written, 2);
        assert!(!result.has_failures());

        let spam = std::fs::read_to_string(tmp.join("IT/Security/What-is-Spam.md")).unwrap();
        assert!(spam.contains("knowledge_base: \"IT\"\n"));
        assert!(spam.contains("category: \"Security\"\n"));
        assert!(spam.ends_with("# What is Spam\n\nSpam is unwanted mail.\n"));
        assert!(tmp.join("HR/Payroll/Payslips.md").exists());

        let manifest: ExportManifest = serde_json::from_str(
            &std::fs::read_to_string(tmp.join(MANIFEST_FILE)).unwrap(),
        )
        .unwrap();
        assert_eq!(manifest.run_id, result.run_id.to_string());
        assert_eq!(manifest.instance, "https://acme.service-now.com/");
        let paths: Vec<&str> = manifest.files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["HR/Payroll/Payslips.md", "IT/Security/What-is-Spam.md"]);

        let events = progress.events.lock().unwrap();
        assert!(events.contains(&"wrote:IT/Security/What-is-Spam.md:2/2".to_string()));

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn export_catalog_is_deterministic() {
        let first_dir = temp_dir();
        let second_dir = temp_dir();
        let catalog = catalog();

        for dir in [&first_dir, &second_dir] {
            let config = test_config("https://acme.service-now.com", dir);
            export_catalog(&catalog, &config, Uuid::now_v7(), &SilentProgress).unwrap();
        }

        for rel in ["IT/Security/What-is-Spam.md", "HR/Payroll/Payslips.md"] {
            assert_eq!(
                std::fs::read(first_dir.join(rel)).unwrap(),
                std::fs::read(second_dir.join(rel)).unwrap()
            );
        }

        let _ = std::fs::remove_dir_all(&first_dir);
        let _ = std::fs::remove_dir_all(&second_dir);
    }

    #[test]
    fn empty_plan_writes_nothing() {
        let tmp = temp_dir();
        let mut config = test_config("https://acme.service-now.com", &tmp);
        config.allow_list = AllowList::new(["Finance"]);

        let result = export_catalog(&catalog(), &config, Uuid::now_v7(), &SilentProgress).unwrap();

        assert_eq!(result.written, 0);
        assert_eq!(
            result.report.empty_reason,
            Some(crate::extract::EmptyReason::NoKnowledgeBasesMatched)
        );
        assert!(result.manifest_path.is_none());
        assert!(!tmp.exists());
    }

    #[test]
    fn failed_write_is_skipped_and_reported() {
        let tmp = temp_dir();
        std::fs::create_dir_all(&tmp).unwrap();
        // A file where the HR directory should go.
        std::fs::write(tmp.join("HR"), "in the way").unwrap();
        let config = test_config("https://acme.service-now.com", &tmp);

        let result = export_catalog(&catalog(), &config, Uuid::now_v7(), &SilentProgress).unwrap();

        assert_eq!(result.written, 1);
        assert!(result.has_failures());
        assert_eq!(result.failed[0].path, Path::new("HR/Payroll/Payslips.md"));
        assert!(tmp.join("IT/Security/What-is-Spam.md").exists());
        assert!(result.manifest_path.is_some());

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[tokio::test]
    async fn run_export_end_to_end() {
        let server = MockServer::start().await;
        let tmp = temp_dir();

        Mock::given(method("GET"))
            .and(path("/api/now/table/kb_knowledge_base"))
            .respond_with(page(json!([{"sys_id": "kb1", "title": "IT"}])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/now/table/kb_category"))
            .respond_with(page(json!([{
                "sys_id": "c1",
                "label": "Security",
                "kb_knowledge_base": "kb1",
                "parent_id": "",
                "parent_table": ""
            }])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/now/table/kb_knowledge"))
            .respond_with(page(json!([
                {
                    "sys_id": "a1",
                    "short_description": "What is Spam",
                    "text": "<p>Spam is <b>unwanted</b> mail. See <a href=\"/kb/42\">policy</a>.</p>",
                    "kb_category": "c1",
                    "kb_knowledge_base": "kb1",
                    "author": "u1",
                    "sys_created_on": "2024-01-02 03:04:05",
                    "sys_updated_on": "2024-02-03 04:05:06",
                    "sys_view_count": "17",
                    "rating": "4.5"
                },
                {
                    "sys_id": "a2",
                    "short_description": "Ghost",
                    "text": "",
                    "kb_category": "missing"
                },
                {
                    "sys_id": "a3",
                    "text": "<p>untitled</p>"
                }
            ])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/now/table/sys_user/u1"))
            .respond_with(page(json!({"first_name": "Ada", "last_name": "Lovelace"})))
            .mount(&server)
            .await;

        let config = test_config(&server.uri(), &tmp);
        let result = run_export(&config, &SilentProgress).await.unwrap();

        assert_eq!(result.written, 1);
        assert_eq!(result.skipped(), 1);
        assert_eq!(result.rejected(), 1);
        assert_eq!(result.report.articles_unresolved, 1);

        let doc = std::fs::read_to_string(tmp.join("IT/Security/What-is-Spam.md")).unwrap();
        let base = config.instance_url.as_str();
        let expected = format!(
            "title: \"What is Spam\"\n\
             author: \"Ada Lovelace\"\n\
             author_sys_id: \"u1\"\n\
             created_date: \"2024-01-02 03:04:05\"\n\
             updated_date: \"2024-02-03 04:05:06\"\n\
             views: \"17\"\n\
             rating: \"4.5\"\n\
             knowledge_base: \"IT\"\n\
             category: \"Security\"\n\
             sys_id: \"a1\"\n\
             \n\
             # What is Spam\n\
             \n\
             Spam is **unwanted** mail. See [policy]({base}kb/42).\n"
        );
        assert_eq!(doc, expected);

        let manifest: ExportManifest = serde_json::from_str(
            &std::fs::read_to_string(tmp.join(MANIFEST_FILE)).unwrap(),
        )
        .unwrap();
        assert_eq!(manifest.files.len(), 1);
        assert_eq!(manifest.files[0].sys_id, "a1");
        assert_eq!(manifest.files[0].size_bytes, doc.len());

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[tokio::test]
    async fn auth_failure_aborts_before_writing() {
        let server = MockServer::start().await;
        let tmp = temp_dir();

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let config = test_config(&server.uri(), &tmp);
        let err = run_export(&config, &SilentProgress).await.unwrap_err();

        assert!(matches!(err, KbMirrorError::Auth { status: 401, .. }), "{err}");
        assert!(err.is_connectivity());
        assert!(!tmp.exists());
    }
}
