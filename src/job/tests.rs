use super::test_helpers::*;
use super::*;
use crate::config::ExtractorConfig;
use crate::path::PathFormat;
use crate::types::{HookEvent, Value};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const CATEGORIES: [&str; 4] = ["site", "child", "grandchild", "other"];

fn context(dir: &TempDir, mut options: Value, scripts: &Scripts) -> JobContext {
    options["base-directory"] = json!(format!("{}/", dir.path().display()));
    let mut registry = ExtractorRegistry::new();
    for category in CATEGORIES {
        scripts.register(&mut registry, category);
    }
    JobContext::new(Config::from_value(options).unwrap(), registry)
}

async fn run(ctx: JobContext, url: &str) -> Result<JobStatus> {
    Job::new(Arc::new(ctx), url).unwrap().run().await
}

fn file(dir: &TempDir, category: &str, name: &str) -> PathBuf {
    dir.path().join(category).join(format!("{name}.txt"))
}

fn touch(path: &Path) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, b"old").unwrap();
}

/// Records every hook event it sees
fn recorder(log: &Arc<Mutex<Vec<String>>>) -> PostProcessorRegistry {
    struct Recorder(Arc<Mutex<Vec<String>>>);

    impl PostProcessor for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }

        fn register(self: Box<Self>, hooks: &mut Hooks) {
            for event in HookEvent::ALL {
                let log = Arc::clone(&self.0);
                hooks.register(
                    event,
                    Box::new(move |_: &mut PathFormat| {
                        log.lock().unwrap().push(event.to_string());
                        Ok(())
                    }),
                );
            }
        }
    }

    let log = Arc::clone(log);
    let mut registry = PostProcessorRegistry::new();
    let factory: PostProcessorFactory = Arc::new(move |_: &Value, _: &ExtractorConfig| {
        Ok(Box::new(Recorder(Arc::clone(&log))) as Box<dyn PostProcessor>)
    });
    registry.register("recorder", factory);
    registry
}

#[tokio::test]
async fn downloads_and_runs_hooks_in_order() {
    let dir = TempDir::new().unwrap();
    let scripts = Scripts::default();
    scripts.add("site:1", vec![directory(json!({})), text("a"), text("b")]);

    let log = Arc::new(Mutex::new(Vec::new()));
    let ctx = context(
        &dir,
        json!({"extractor": {"site": {"postprocessors": ["recorder"]}}}),
        &scripts,
    )
    .with_postprocessors(recorder(&log));

    let status = run(ctx, "site:1").await.unwrap();
    assert_eq!(status, JobStatus::empty());
    assert_eq!(std::fs::read_to_string(file(&dir, "site", "a")).unwrap(), "a");
    assert_eq!(std::fs::read_to_string(file(&dir, "site", "b")).unwrap(), "b");

    let per_file = ["prepare", "prepare-after", "file", "after"];
    let mut expected = vec!["init", "post"];
    expected.extend(per_file);
    expected.extend(per_file);
    expected.extend(["post-after", "finalize-success", "finalize"]);
    assert_eq!(*log.lock().unwrap(), expected);
    assert_eq!(scripts.count("finalize site:1"), 1);
}

#[tokio::test]
async fn url_before_directory_initializes_paths() {
    let dir = TempDir::new().unwrap();
    let scripts = Scripts::default();
    scripts.add("site:1", vec![text("a")]);

    let status = run(context(&dir, json!({}), &scripts), "site:1").await.unwrap();
    assert_eq!(status, JobStatus::empty());
    assert!(file(&dir, "site", "a").exists());
}

#[tokio::test]
async fn existing_files_are_skipped() {
    let dir = TempDir::new().unwrap();
    touch(&file(&dir, "site", "a"));
    let scripts = Scripts::default();
    scripts.add("site:1", vec![directory(json!({})), text("a"), text("b")]);

    let status = run(context(&dir, json!({}), &scripts), "site:1").await.unwrap();
    assert_eq!(status, JobStatus::empty());
    assert_eq!(std::fs::read(file(&dir, "site", "a")).unwrap(), b"old");
    assert!(file(&dir, "site", "b").exists());
}

#[tokio::test]
async fn skip_streak_aborts_the_job() {
    let dir = TempDir::new().unwrap();
    touch(&file(&dir, "site", "a"));
    touch(&file(&dir, "site", "b"));
    let scripts = Scripts::default();
    scripts.add(
        "site:1",
        vec![directory(json!({})), text("a"), text("b"), text("c")],
    );

    let ctx = context(&dir, json!({"extractor": {"site": {"skip": "abort:2"}}}), &scripts);
    let status = run(ctx, "site:1").await.unwrap();
    assert_eq!(status, JobStatus::empty());
    assert!(!file(&dir, "site", "c").exists());
    assert_eq!(scripts.count("yield text:c"), 0);
}

#[tokio::test]
async fn downloads_reset_the_skip_streak() {
    let dir = TempDir::new().unwrap();
    touch(&file(&dir, "site", "a"));
    touch(&file(&dir, "site", "c"));
    let scripts = Scripts::default();
    scripts.add(
        "site:1",
        vec![directory(json!({})), text("a"), text("b"), text("c"), text("d")],
    );

    let ctx = context(&dir, json!({"extractor": {"site": {"skip": "abort:2"}}}), &scripts);
    run(ctx, "site:1").await.unwrap();
    assert!(file(&dir, "site", "d").exists());
}

#[tokio::test]
async fn skip_filter_limits_counted_skips() {
    let dir = TempDir::new().unwrap();
    touch(&file(&dir, "site", "a"));
    touch(&file(&dir, "site", "b"));
    let scripts = Scripts::default();
    scripts.add(
        "site:1",
        vec![directory(json!({})), text("a"), text("b"), text("c")],
    );

    let ctx = context(
        &dir,
        json!({"extractor": {"site": {"skip": "abort:2", "skip-filter": "filename != 'a'"}}}),
        &scripts,
    );
    run(ctx, "site:1").await.unwrap();
    assert!(file(&dir, "site", "c").exists());
}

#[tokio::test]
async fn abort_depth_unwinds_parent() {
    let dir = TempDir::new().unwrap();
    touch(&file(&dir, "child", "x"));
    let scripts = Scripts::default();
    scripts.add(
        "site:1",
        vec![
            directory(json!({})),
            queue("child:1", json!({})),
            queue("child:2", json!({})),
            text("after"),
        ],
    );
    scripts.add("child:1", vec![directory(json!({})), text("x"), text("y")]);
    scripts.add("child:2", vec![directory(json!({})), text("z")]);

    let ctx = context(
        &dir,
        json!({"extractor": {"child": {"skip": "abort:1:2"}}}),
        &scripts,
    );
    let status = run(ctx, "site:1").await.unwrap();
    assert_eq!(status, JobStatus::empty());

    assert!(!file(&dir, "child", "y").exists());
    assert_eq!(scripts.count("init child:2"), 0);
    assert!(!file(&dir, "site", "after").exists());
    assert_eq!(scripts.count("finalize child:1"), 1);
    assert_eq!(scripts.count("finalize site:1"), 1);
}

#[tokio::test]
async fn abort_depth_stops_below_the_root() {
    let dir = TempDir::new().unwrap();
    touch(&file(&dir, "grandchild", "x"));
    let scripts = Scripts::default();
    scripts.add(
        "site:1",
        vec![directory(json!({})), queue("child:1", json!({})), text("root")],
    );
    scripts.add(
        "child:1",
        vec![queue("grandchild:1", json!({})), text("middle")],
    );
    scripts.add("grandchild:1", vec![directory(json!({})), text("x")]);

    let ctx = context(
        &dir,
        json!({"extractor": {"grandchild": {"skip": "abort:1:2"}}}),
        &scripts,
    );
    run(ctx, "site:1").await.unwrap();
    assert!(!file(&dir, "child", "middle").exists());
    assert!(file(&dir, "site", "root").exists());
}

#[tokio::test]
async fn terminate_ends_the_tree() {
    let dir = TempDir::new().unwrap();
    touch(&file(&dir, "grandchild", "x"));
    let scripts = Scripts::default();
    scripts.add(
        "site:1",
        vec![directory(json!({})), queue("child:1", json!({})), text("root")],
    );
    scripts.add(
        "child:1",
        vec![queue("grandchild:1", json!({})), text("middle")],
    );
    scripts.add("grandchild:1", vec![directory(json!({})), text("x")]);

    let ctx = context(
        &dir,
        json!({"extractor": {"grandchild": {"skip": "terminate:1"}}}),
        &scripts,
    );
    run(ctx, "site:1").await.unwrap();
    assert!(!file(&dir, "child", "middle").exists());
    assert!(!file(&dir, "site", "root").exists());
    assert_eq!(scripts.count("finalize site:1"), 1);
}

#[tokio::test]
async fn exit_is_reported_to_the_caller() {
    let dir = TempDir::new().unwrap();
    touch(&file(&dir, "child", "x"));
    let scripts = Scripts::default();
    scripts.add(
        "site:1",
        vec![queue("child:1", json!({})), text("root")],
    );
    scripts.add("child:1", vec![directory(json!({})), text("x")]);

    let ctx = context(&dir, json!({"extractor": {"child": {"skip": "exit:1"}}}), &scripts);
    let err = run(ctx, "site:1").await.unwrap_err();
    assert!(matches!(err, Error::Exit(1)));
    assert!(!file(&dir, "site", "root").exists());
}

#[tokio::test]
async fn extractor_signals() {
    let dir = TempDir::new().unwrap();
    let scripts = Scripts::default();
    scripts.add(
        "site:1",
        vec![
            text("a"),
            signal(ControlFlow::Abort("rate limited".to_string())),
            text("b"),
            signal(ControlFlow::Continue),
            signal(ControlFlow::stop()),
            text("c"),
        ],
    );

    let status = run(context(&dir, json!({}), &scripts), "site:1").await.unwrap();
    assert_eq!(status, JobStatus::ABORTED);
    assert!(file(&dir, "site", "b").exists());
    assert!(!file(&dir, "site", "c").exists());
}

#[tokio::test]
async fn restart_builds_a_fresh_extractor() {
    let dir = TempDir::new().unwrap();
    let scripts = Scripts::default();
    scripts.add("site:1", vec![text("a"), signal(ControlFlow::Restart), text("never")]);
    scripts.add("site:1", vec![text("b")]);

    let status = run(context(&dir, json!({}), &scripts), "site:1").await.unwrap();
    assert_eq!(status, JobStatus::empty());
    assert!(file(&dir, "site", "a").exists());
    assert!(file(&dir, "site", "b").exists());
    assert!(!file(&dir, "site", "never").exists());
    assert_eq!(scripts.count("init site:1"), 2);
}

#[tokio::test]
async fn queued_urls_run_once_per_tree() {
    let dir = TempDir::new().unwrap();
    let scripts = Scripts::default();
    scripts.add(
        "site:1",
        vec![queue("child:1", json!({})), queue("child:1", json!({}))],
    );
    scripts.add("child:1", vec![text("x")]);

    run(context(&dir, json!({}), &scripts), "site:1").await.unwrap();
    assert_eq!(scripts.count("init child:1"), 1);
    assert!(file(&dir, "child", "x").exists());
}

#[tokio::test]
async fn queue_filters_and_missing_extractors() {
    let dir = TempDir::new().unwrap();
    let scripts = Scripts::default();
    scripts.add(
        "site:1",
        vec![
            queue("site:2", json!({})),
            queue("nowhere:1", json!({})),
            queue("child:1", json!({"_extractor": "other"})),
        ],
    );
    scripts.add("site:2", vec![text("self")]);
    scripts.add("child:1", vec![text("routed")]);

    let status = run(context(&dir, json!({}), &scripts), "site:1").await.unwrap();
    assert_eq!(status, JobStatus::NO_EXTRACTOR);
    assert_eq!(scripts.count("init site:2"), 0);
    assert!(file(&dir, "other", "routed").exists());
}

#[tokio::test]
async fn whitelist_replaces_the_default_blacklist() {
    let dir = TempDir::new().unwrap();
    let scripts = Scripts::default();
    scripts.add(
        "site:1",
        vec![queue("site:2", json!({})), queue("child:1", json!({}))],
    );
    scripts.add("site:2", vec![text("self")]);
    scripts.add("child:1", vec![text("x")]);

    let ctx = context(&dir, json!({"extractor": {"site": {"whitelist": ["site"]}}}), &scripts);
    let status = run(ctx, "site:1").await.unwrap();
    assert_eq!(status, JobStatus::NO_EXTRACTOR);
    assert!(file(&dir, "site", "self").exists());
    assert_eq!(scripts.count("init child:1"), 0);
}

#[tokio::test]
async fn child_status_reaches_the_root() {
    let dir = TempDir::new().unwrap();
    let scripts = Scripts::default();
    scripts.add("site:1", vec![queue("child:1", json!({})), text("a")]);
    scripts.add("child:1", vec![Item::NotFound]);

    let status = run(context(&dir, json!({}), &scripts), "site:1").await.unwrap();
    assert_eq!(status, JobStatus::NOT_FOUND);
    assert!(file(&dir, "site", "a").exists());
}

#[tokio::test]
async fn failed_child_falls_back_to_direct_download() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rescued.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"saved".to_vec()))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let scripts = Scripts::default();
    let fallback = format!("{}/rescued.txt", server.uri());
    scripts.add(
        "site:1",
        vec![queue("child:1", json!({"_fallback": [fallback]}))],
    );
    scripts.add("child:1", vec![Item::NotFound]);

    let status = run(context(&dir, json!({}), &scripts), "site:1").await.unwrap();
    assert_eq!(status, JobStatus::NOT_FOUND);
    assert_eq!(
        std::fs::read_to_string(file(&dir, "site", "rescued")).unwrap(),
        "saved"
    );
}

#[tokio::test]
async fn child_format_error_falls_back_to_direct_download() {
    let dir = TempDir::new().unwrap();
    let scripts = Scripts::default();
    scripts.add(
        "site:1",
        vec![queue("child:1", json!({"_fallback": ["text:rescued"]}))],
    );
    scripts.add("child:1", vec![text("a")]);

    let ctx = context(
        &dir,
        json!({"extractor": {"child": {"filename": "{filename!z}"}}}),
        &scripts,
    );
    let status = run(ctx, "site:1").await.unwrap();
    assert_eq!(status, JobStatus::FORMAT_ERROR);
    assert_eq!(
        std::fs::read_to_string(file(&dir, "site", "rescued")).unwrap(),
        "rescued"
    );
    assert!(!file(&dir, "child", "a").exists());
}

#[tokio::test]
async fn invalid_path_format_ends_the_job() {
    let dir = TempDir::new().unwrap();
    let scripts = Scripts::default();
    scripts.add("site:1", vec![directory(json!({})), text("a"), text("b")]);

    let ctx = context(
        &dir,
        json!({"extractor": {"filename": "{filename!z}.{extension}"}}),
        &scripts,
    );
    let status = run(ctx, "site:1").await.unwrap();
    assert_eq!(status, JobStatus::FORMAT_ERROR);
    assert_eq!(scripts.log(), ["init site:1", "finalize site:1"]);
}

#[tokio::test]
async fn directory_condition_errors_only_affect_the_item() {
    let dir = TempDir::new().unwrap();
    let scripts = Scripts::default();
    scripts.add(
        "site:1",
        vec![
            url("text:x", json!({"filename": "x", "extension": "txt"})),
            url("text:y", json!({"filename": "y", "extension": "txt", "size": 5})),
        ],
    );

    let ctx = context(
        &dir,
        json!({"extractor": {"site": {"directory": {"size > 1": ["big"], "": ["small"]}}}}),
        &scripts,
    );
    let status = run(ctx, "site:1").await.unwrap();
    assert_eq!(status, JobStatus::FORMAT_ERROR);
    assert!(dir.path().join("big").join("y.txt").exists());
}

#[tokio::test]
async fn fallback_urls_after_failed_download() {
    let dir = TempDir::new().unwrap();
    let scripts = Scripts::default();
    scripts.add(
        "site:1",
        vec![
            url(
                "ftp://example.org/a.txt",
                json!({"filename": "a", "extension": "txt", "_fallback": ["text:second"]}),
            ),
            Item::Message(crate::types::Message::Urllist(
                vec!["ftp://example.org/b".to_string(), "text:from list".to_string()],
                kw(json!({"filename": "b", "extension": "txt"})),
            )),
        ],
    );

    let status = run(context(&dir, json!({}), &scripts), "site:1").await.unwrap();
    assert_eq!(status, JobStatus::empty());
    assert_eq!(std::fs::read_to_string(file(&dir, "site", "a")).unwrap(), "second");
    assert_eq!(std::fs::read_to_string(file(&dir, "site", "b")).unwrap(), "from list");
}

#[tokio::test]
async fn failed_downloads_run_error_hooks() {
    let dir = TempDir::new().unwrap();
    let scripts = Scripts::default();
    scripts.add(
        "site:1",
        vec![url(
            "ftp://example.org/a.txt",
            json!({"filename": "a", "extension": "txt", "_fallback": ["text:second"]}),
        )],
    );

    let log = Arc::new(Mutex::new(Vec::new()));
    let ctx = context(
        &dir,
        json!({"extractor": {"site": {"fallback": false, "postprocessors": ["recorder"]}}}),
        &scripts,
    )
    .with_postprocessors(recorder(&log));

    let status = run(ctx, "site:1").await.unwrap();
    assert_eq!(status, JobStatus::DOWNLOAD_FAILED);
    assert!(!file(&dir, "site", "a").exists());
    let log = log.lock().unwrap();
    assert!(log.contains(&"error".to_string()));
    assert!(log.contains(&"finalize-error".to_string()));
    assert!(!log.contains(&"file".to_string()));
}

#[tokio::test]
async fn archive_skips_known_files() {
    let dir = TempDir::new().unwrap();
    let archive = dir.path().join("archive.sqlite3");
    let options = json!({"extractor": {"site": {"archive": archive.to_str().unwrap()}}});

    let scripts = Scripts::default();
    scripts.add("site:1", vec![directory(json!({})), text("a")]);

    run(context(&dir, options.clone(), &scripts), "site:1").await.unwrap();
    std::fs::remove_file(file(&dir, "site", "a")).unwrap();

    let log = Arc::new(Mutex::new(Vec::new()));
    let mut options = options;
    options["extractor"]["site"]["postprocessors"] = json!(["recorder"]);
    let ctx = context(&dir, options, &scripts).with_postprocessors(recorder(&log));
    run(ctx, "site:1").await.unwrap();

    assert!(!file(&dir, "site", "a").exists());
    assert!(log.lock().unwrap().contains(&"skip".to_string()));
}

#[tokio::test]
async fn memory_archive_is_only_written_on_success() {
    let dir = TempDir::new().unwrap();
    let archive = dir.path().join("archive.sqlite3");
    let options = json!({"extractor": {"site": {
        "archive": archive.to_str().unwrap(),
        "archive-mode": "memory",
    }}});

    let scripts = Scripts::default();
    scripts.add("site:1", vec![text("a"), Item::NotFound]);
    run(context(&dir, options.clone(), &scripts), "site:1").await.unwrap();
    std::fs::remove_file(file(&dir, "site", "a")).unwrap();

    let scripts = Scripts::default();
    scripts.add("site:1", vec![text("a")]);
    run(context(&dir, options.clone(), &scripts), "site:1").await.unwrap();
    assert!(file(&dir, "site", "a").exists());
    std::fs::remove_file(file(&dir, "site", "a")).unwrap();

    run(context(&dir, options, &scripts), "site:1").await.unwrap();
    assert!(!file(&dir, "site", "a").exists());
}

#[tokio::test]
async fn archive_skip_event_records_existing_files() {
    let dir = TempDir::new().unwrap();
    let archive = dir.path().join("archive.sqlite3");
    touch(&file(&dir, "site", "a"));
    let options = json!({"extractor": {"site": {
        "archive": archive.to_str().unwrap(),
        "archive-event": "file,skip",
        "skip": false,
    }}});
    let skip_only = json!({"extractor": {"site": {
        "archive": archive.to_str().unwrap(),
        "archive-event": "file,skip",
    }}});

    let scripts = Scripts::default();
    scripts.add("site:1", vec![text("a")]);

    // a skipped file is recorded, so overwriting is prevented afterwards
    run(context(&dir, skip_only, &scripts), "site:1").await.unwrap();
    run(context(&dir, options, &scripts), "site:1").await.unwrap();
    assert_eq!(std::fs::read(file(&dir, "site", "a")).unwrap(), b"old");
}

#[tokio::test]
async fn predicates_screen_items() {
    let dir = TempDir::new().unwrap();
    let scripts = Scripts::default();
    scripts.add(
        "site:1",
        vec![text("a"), text("b"), text("c"), text("d"), text("e")],
    );

    let ctx = context(
        &dir,
        json!({"extractor": {"site": {"image-range": "2-3", "image-filter": "filename != 'c'"}}}),
        &scripts,
    );
    run(ctx, "site:1").await.unwrap();

    let exists = |name| file(&dir, "site", name).exists();
    assert!(!exists("a"));
    assert!(exists("b"));
    assert!(!exists("c"));
    assert!(exists("d"));
    assert!(!exists("e"));
}

#[tokio::test]
async fn range_lets_the_extractor_skip_ahead() {
    let dir = TempDir::new().unwrap();
    let scripts = Scripts::default();
    scripts.add("site:1", vec![text("a"), text("b"), text("c")]);

    let ctx = context(&dir, json!({"extractor": {"site": {"image-range": "3-"}}}), &scripts);
    run(ctx, "site:1").await.unwrap();
    assert_eq!(scripts.count("yield text:a"), 0);
    assert!(file(&dir, "site", "c").exists());
}

#[tokio::test]
async fn empty_range_downloads_everything() {
    let dir = TempDir::new().unwrap();
    let scripts = Scripts::default();
    scripts.add("site:1", vec![text("a"), text("b")]);

    let ctx = context(&dir, json!({"extractor": {"image-range": ""}}), &scripts);
    let status = run(ctx, "site:1").await.unwrap();
    assert_eq!(status, JobStatus::empty());
    assert!(file(&dir, "site", "a").exists());
    assert!(file(&dir, "site", "b").exists());
}

#[tokio::test]
async fn filter_errors_only_affect_the_item() {
    let dir = TempDir::new().unwrap();
    let scripts = Scripts::default();
    scripts.add(
        "site:1",
        vec![
            url("text:x", json!({"filename": "x", "extension": "txt"})),
            url("text:y", json!({"filename": "y", "extension": "txt", "size": 5})),
        ],
    );

    let ctx = context(&dir, json!({"extractor": {"site": {"image-filter": "size > 1"}}}), &scripts);
    let status = run(ctx, "site:1").await.unwrap();
    assert_eq!(status, JobStatus::FILTER_ERROR);
    assert!(file(&dir, "site", "y").exists());
}

#[tokio::test]
async fn unsupported_version_ends_the_job() {
    let dir = TempDir::new().unwrap();
    let scripts = Scripts::default();
    scripts.add(
        "site:1",
        vec![
            Item::Message(crate::types::Message::Version(1)),
            text("a"),
            Item::Message(crate::types::Message::Version(2)),
            text("b"),
        ],
    );

    let status = run(context(&dir, json!({}), &scripts), "site:1").await.unwrap();
    assert_eq!(status, JobStatus::ERROR);
    assert!(file(&dir, "site", "a").exists());
    assert!(!file(&dir, "site", "b").exists());
}

#[tokio::test]
async fn parent_options_flow_into_children() {
    let dir = TempDir::new().unwrap();
    let scripts = Scripts::default();
    scripts.add(
        "site:1",
        vec![
            directory(json!({"title": "album"})),
            queue("child:1", json!({"page": 7})),
        ],
    );
    scripts.add("child:1", vec![directory(json!({})), text("x")]);

    let ctx = context(
        &dir,
        json!({"extractor": {
            "site": {
                "directory": ["{category}", "{title}"],
                "parent-directory": true,
                "parent-metadata": "parent",
                "keywords": {"source": "root"},
            },
            "child": {"filename": "{parent[page]}_{parent[source]}_{filename}.{extension}"},
        }}),
        &scripts,
    );
    run(ctx, "site:1").await.unwrap();

    let expected = dir
        .path()
        .join("site")
        .join("album")
        .join("child")
        .join("7_root_x.txt");
    assert!(expected.exists(), "missing {}", expected.display());
}

#[tokio::test]
async fn category_transfer_renames_children() {
    let dir = TempDir::new().unwrap();
    let scripts = Scripts::default();
    scripts.add(
        "site:1",
        vec![queue("child:1", json!({})), queue("child:2", json!({}))],
    );
    scripts.add("child:1", vec![text("x")]);

    let ctx = context(
        &dir,
        json!({"extractor": {"site": {"category-transfer": true, "metadata-url": "origin"}}}),
        &scripts,
    );
    run(ctx, "site:1").await.unwrap();
    assert!(file(&dir, "site", "x").exists());
    assert!(!dir.path().join("child").exists());
}

#[tokio::test]
async fn sleep_before_each_download() {
    let dir = TempDir::new().unwrap();
    let scripts = Scripts::default();
    scripts.add("site:1", vec![text("a")]);

    let ctx = context(&dir, json!({"extractor": {"site": {"sleep": 1.5}}}), &scripts);
    run(ctx, "site:1").await.unwrap();
    assert_eq!(scripts.count("sleep 1.5"), 1);
}

#[tokio::test]
async fn download_disabled_only_resolves_paths() {
    let dir = TempDir::new().unwrap();
    let scripts = Scripts::default();
    scripts.add("site:1", vec![text("a")]);

    let log = Arc::new(Mutex::new(Vec::new()));
    let ctx = context(
        &dir,
        json!({"extractor": {"site": {"download": false, "postprocessors": ["recorder"]}}}),
        &scripts,
    )
    .with_postprocessors(recorder(&log));
    let status = run(ctx, "site:1").await.unwrap();
    assert_eq!(status, JobStatus::empty());
    assert!(!file(&dir, "site", "a").exists());
    assert!(log.lock().unwrap().contains(&"after".to_string()));
}

async fn listing(ctx: JobContext, url: &str, kind: fn(JobOutput) -> JobKind) -> (JobStatus, String) {
    let buffer = Arc::new(Mutex::new(Vec::<u8>::new()));
    let job = Job::with_kind(Arc::new(ctx), url, kind(buffer.clone())).unwrap();
    let status = job.run().await.unwrap();
    let text = String::from_utf8(buffer.lock().unwrap().clone()).unwrap();
    (status, text)
}

#[tokio::test]
async fn url_listing_descends_into_children() {
    let dir = TempDir::new().unwrap();
    let scripts = Scripts::default();
    scripts.add(
        "site:1",
        vec![
            directory(json!({})),
            text("a"),
            queue("child:1", json!({})),
            Item::Message(crate::types::Message::Urllist(
                vec!["text:d".to_string(), "text:e".to_string()],
                kw(json!({"filename": "d", "extension": "txt"})),
            )),
        ],
    );
    scripts.add("child:1", vec![text("b"), queue("grandchild:1", json!({}))]);
    scripts.add("grandchild:1", vec![text("c")]);

    let ctx = context(&dir, json!({}), &scripts);
    let (status, output) = listing(ctx, "site:1", JobKind::Urls).await;
    assert_eq!(status, JobStatus::empty());
    assert_eq!(output, "text:a\ntext:b\ntext:c\ntext:d\n| text:e\n");
    assert_eq!(scripts.count("finalize grandchild:1"), 1);
    assert!(!file(&dir, "site", "a").exists());
    assert!(!file(&dir, "grandchild", "c").exists());
}

#[tokio::test]
async fn keyword_listing_stops_after_the_first_file() {
    let dir = TempDir::new().unwrap();
    let scripts = Scripts::default();
    scripts.add(
        "site:1",
        vec![
            directory(json!({"title": "T"})),
            queue("child:1", json!({})),
            text("a"),
            text("b"),
        ],
    );

    let ctx = context(&dir, json!({}), &scripts);
    let (status, output) = listing(ctx, "site:1", JobKind::Keywords).await;
    assert_eq!(status, JobStatus::empty());
    assert_eq!(
        output,
        "Keywords for directory names:\n\
         category:    site\n\
         subcategory: \n\
         title:       T\n\
         \n\
         Keywords for filenames:\n\
         category:    site\n\
         extension:   txt\n\
         filename:    a\n\
         subcategory: \n\
         \n"
    );
    assert_eq!(scripts.count("init child:1"), 0);
    assert_eq!(scripts.count("yield text:b"), 0);
    assert!(!file(&dir, "site", "a").exists());
}

#[tokio::test]
async fn restarted_jobs_keep_their_kind() {
    let dir = TempDir::new().unwrap();
    let scripts = Scripts::default();
    scripts.add("site:1", vec![text("a"), signal(ControlFlow::Restart)]);
    scripts.add("site:1", vec![text("b")]);

    let ctx = context(&dir, json!({}), &scripts);
    let (status, output) = listing(ctx, "site:1", JobKind::Urls).await;
    assert_eq!(status, JobStatus::empty());
    assert_eq!(output, "text:a\ntext:b\n");
    assert!(!file(&dir, "site", "b").exists());
}

#[tokio::test]
async fn unknown_urls_have_no_job() {
    let dir = TempDir::new().unwrap();
    let scripts = Scripts::default();
    let ctx = Arc::new(context(&dir, json!({}), &scripts));
    assert!(matches!(
        Job::new(ctx, "nowhere:1"),
        Err(Error::NoExtractor(_))
    ));
}
