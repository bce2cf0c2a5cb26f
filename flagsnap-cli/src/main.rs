mod config;
mod lint;
mod pull;
mod watch;

use std::collections::BTreeSet;
use std::io::{self, BufRead, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Mutex;

use clap::{Parser, Subcommand};
use flagsnap_lib::bucket::{bucket, BUCKET_COUNT};
use flagsnap_lib::parse::snapshot_document;
use flagsnap_lib::testfile::{self, context_from_pairs, parse_expectations, Verdict};
use flagsnap_lib::{
    parse_patch, parse_snapshot, EvaluationError, FeatureId, FeatureRegistry, Reason, Registry,
    Snapshot, SnapshotMeta, StableId,
};
use ignore::WalkBuilder;
use regex::Regex;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::FsnapConfig;

#[derive(Parser, Debug)]
#[command(name = "Flagsnap")]
#[command(version)]
#[command(about = "Validate, evaluate and test feature flag snapshots", long_about = None)]
struct Args {
    /// Path to config file
    #[arg(short = 'c', long = "config", default_value = "fsnap.toml", global = true)]
    config: String,

    /// Path to the snapshot (overrides fsnap.toml and FSNAP_SNAPSHOT)
    #[arg(short = 's', long = "snapshot", global = true)]
    snapshot: Option<String>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    Init, // creates fsnap.toml, flags.json and flags.tests with demo flags
    Validate,
    List {
        /// Show type, state and rule count
        #[arg(short = 'd', long = "description")]
        description: bool,
    },
    Eval {
        /// Flag key to evaluate (e.g. feature::global::darkMode)
        flag_key: String,

        /// Context key=value pairs (e.g. platform=IOS locale=US id=user-123)
        context: Vec<String>,
    },
    /// Print the rollout bucket of a stable id
    Bucket {
        salt: String,

        flag_key: String,

        /// Hex-encoded stable id
        stable_id: String,
    },
    /// Apply a patch document and print the resulting snapshot
    Patch {
        /// Path to the patch document
        patch: String,

        /// Write the result here instead of stdout
        #[arg(short = 'o', long = "output")]
        output: Option<String>,
    },
    Lint,
    Test {
        /// Path to the expectation file
        #[arg(short = 't', long = "testfile")]
        testfile: Option<String>,
    },
    /// Run validate, lint, and test together
    Check {
        /// Path to the expectation file
        #[arg(short = 't', long = "testfile")]
        testfile: Option<String>,
    },
    /// Find flag references in source files and report unreferenced flags
    Find {
        /// Directory to search in
        #[arg(default_value = ".")]
        path: String,
    },
    /// Reload the snapshot whenever the file changes
    Watch,
    /// Download a snapshot, writing it only if it validates
    Pull {
        url: String,

        /// Where to write the snapshot (defaults to the configured snapshot path)
        #[arg(short = 'o', long = "output")]
        output: Option<String>,

        /// Bearer token sent with the request
        #[arg(long = "token", env = "FSNAP_TOKEN")]
        token: Option<String>,
    },
}

/// Resolved paths and config shared by every command.
pub struct Settings {
    pub config: FsnapConfig,
    pub snapshot: String,
    pub tests: String,
}

impl Settings {
    fn new(config_path: &str, snapshot: Option<String>) -> Self {
        let config = FsnapConfig::load(config_path);
        Self {
            snapshot: snapshot.unwrap_or_else(|| config.snapshot.clone()),
            tests: config.tests.clone(),
            config,
        }
    }

    pub fn features(&self) -> Result<FeatureRegistry, ()> {
        self.config.feature_registry().map_err(|e| {
            eprintln!("Invalid feature declarations: {}", e);
        })
    }

    pub fn load_snapshot(&self) -> Result<Snapshot, ()> {
        let features = self.features()?;
        let bytes = match std::fs::read(&self.snapshot) {
            Ok(bytes) => bytes,
            Err(_) => {
                eprintln!("{} does not exist", self.snapshot);
                return Err(());
            }
        };
        parse_snapshot(&bytes, &features).map_err(|e| {
            eprintln!("Parsing failed: {}", e);
        })
    }
}

const INIT_CONFIG: &str = r#"snapshot = "flags.json"
tests = "flags.tests"

[[features]]
key = "feature::global::darkMode"
type = "boolean"

[[features]]
key = "feature::global::apiEndpoint"
type = "string"

[[features]]
key = "feature::ui::theme"
type = "enum"
class = "Theme"
variants = ["LIGHT", "DARK", "SEPIA"]
"#;

const INIT_SNAPSHOT: &str = r#"{
  "flags": [
    {
      "key": "feature::global::darkMode",
      "defaultValue": { "type": "BOOLEAN", "value": false },
      "salt": "v1",
      "isActive": true,
      "rules": [
        {
          "value": { "type": "BOOLEAN", "value": true },
          "rampUp": 50.0,
          "rampUpAllowlist": ["71612d646576696365"],
          "note": "half of iOS",
          "platforms": ["IOS"],
          "locales": [],
          "versionRange": { "type": "UNBOUNDED" }
        }
      ]
    },
    {
      "key": "feature::global::apiEndpoint",
      "defaultValue": { "type": "STRING", "value": "https://api.example.com" },
      "salt": "v1",
      "isActive": true,
      "rules": [
        {
          "value": { "type": "STRING", "value": "https://api-ios.example.com" },
          "rampUp": 100.0,
          "platforms": ["IOS"],
          "locales": [],
          "versionRange": { "type": "UNBOUNDED" }
        },
        {
          "value": { "type": "STRING", "value": "https://api-us-ios.example.com" },
          "rampUp": 100.0,
          "platforms": ["IOS"],
          "locales": ["US"],
          "versionRange": { "type": "UNBOUNDED" }
        }
      ]
    },
    {
      "key": "feature::ui::theme",
      "defaultValue": { "type": "ENUM", "value": "LIGHT", "enumClassName": "Theme" },
      "salt": "v1",
      "isActive": true,
      "rules": [
        {
          "value": { "type": "ENUM", "value": "DARK", "enumClassName": "Theme" },
          "rampUp": 100.0,
          "note": "redesign",
          "platforms": [],
          "locales": [],
          "versionRange": {
            "type": "MIN_BOUND",
            "min": { "major": 2, "minor": 0, "patch": 0 }
          }
        }
      ]
    }
  ],
  "meta": { "version": "1", "source": "fsnap init" }
}
"#;

const INIT_TESTS: &str = r#"// user-123 lands in bucket 8841, outside the 50% rollout
feature::global::darkMode(platform=IOS,id=user-123) == false
// qa-device is allowlisted on the iOS rule
feature::global::darkMode(platform=IOS,id=qa-device) == true
feature::global::darkMode(platform=ANDROID,id=qa-device) == false
feature::global::apiEndpoint(platform=IOS,locale=US) == "https://api-us-ios.example.com"
feature::global::apiEndpoint(platform=IOS,locale=DE) == "https://api-ios.example.com"
feature::global::apiEndpoint == "https://api.example.com"
feature::ui::theme(version=2.1.0) == Theme.DARK
feature::ui::theme(version=1.9.9) == LIGHT
"#;

fn run_init() {
    let files = [
        ("fsnap.toml", INIT_CONFIG),
        ("flags.json", INIT_SNAPSHOT),
        ("flags.tests", INIT_TESTS),
    ];

    let existing: Vec<&str> = files
        .iter()
        .map(|(name, _)| *name)
        .filter(|name| Path::new(name).exists())
        .collect();
    if !existing.is_empty() {
        for name in existing {
            eprintln!("{} already exists in current folder", name);
        }
        process::exit(1);
    }

    for (name, content) in files {
        std::fs::write(name, content).unwrap_or_else(|e| {
            eprintln!("Failed to create {}: {}", name, e);
            process::exit(1);
        });
    }

    println!("Created fsnap.toml, flags.json and flags.tests");
}

fn run_list(settings: &Settings, show_description: bool) {
    let Ok(snapshot) = settings.load_snapshot() else {
        process::exit(1);
    };

    for def in snapshot.flags() {
        if show_description {
            let state = if def.is_active() { "active" } else { "inactive" };
            println!(
                "{} ({}, {}, {} rules)",
                def.id(),
                def.value_type(),
                state,
                def.bounds().len()
            );
        } else {
            println!("{}", def.id());
        }
    }
}

fn run_check(settings: &Settings, testfile_path: &str) {
    let mut failed = false;

    println!("=== validate ===");
    if run_validate_inner(settings).is_err() {
        failed = true;
    }

    println!();
    println!("=== lint ===");
    if lint::run_lint_inner(settings).is_err() {
        failed = true;
    }

    println!();
    println!("=== test ===");
    if run_tests_inner(settings, testfile_path).is_err() {
        failed = true;
    }

    if failed {
        process::exit(1);
    }
}

/// Inner validate logic that returns Ok(()) on success or Err(()) on failure.
/// Used by both the standalone `validate` command and the combined `check` command.
fn run_validate_inner(settings: &Settings) -> Result<(), ()> {
    let snapshot = settings.load_snapshot()?;

    let mut total_rules = 0;
    let mut namespaces = BTreeSet::new();

    println!("Flags:");
    for def in snapshot.flags() {
        total_rules += def.bounds().len();
        namespaces.insert(def.id().namespace().to_string());
        println!(
            "  {} ({}, {} rules)",
            def.id(),
            def.value_type(),
            def.bounds().len()
        );
    }

    if let Some(meta) = snapshot.meta() {
        println!();
        if let Some(version) = &meta.version {
            println!("Version: {}", version);
        }
        if let Some(generated_at) = meta.generated_at {
            println!("Generated: {}", generated_at.to_rfc3339());
        }
        if let Some(source) = &meta.source {
            println!("Source: {}", source);
        }
    }

    println!();
    println!(
        "{} ok, {} flags, {} rules, {} namespaces",
        settings.snapshot,
        snapshot.len(),
        total_rules,
        namespaces.len()
    );
    Ok(())
}

fn run_validate(settings: &Settings) {
    if run_validate_inner(settings).is_err() {
        process::exit(1);
    }
}

/// Inner test logic that returns Ok(()) on success or Err(()) on failure.
/// Used by both the standalone `test` command and the combined `check` command.
fn run_tests_inner(settings: &Settings, testfile_path: &str) -> Result<(), ()> {
    let use_color = io::stdout().is_terminal();
    let pass_label = if use_color {
        "\x1b[32mPASS\x1b[0m"
    } else {
        "PASS"
    };
    let fail_label = if use_color {
        "\x1b[31mFAIL\x1b[0m"
    } else {
        "FAIL"
    };

    let registry = Registry::with_snapshot(settings.load_snapshot()?);

    let tests_content = match std::fs::read_to_string(testfile_path) {
        Ok(content) => content,
        Err(_) => {
            eprintln!("{} does not exist", testfile_path);
            return Err(());
        }
    };

    let expectations = match parse_expectations(&tests_content) {
        Ok(expectations) => expectations,
        Err(e) => {
            eprintln!("{}: {}", testfile_path, e);
            return Err(());
        }
    };

    let mut passed = 0;
    let mut failed = 0;

    println!("--- {} ---", testfile_path);
    for expectation in &expectations {
        let line = &expectation.text;
        match testfile::check(&registry, expectation) {
            Verdict::Pass => {
                println!("{}  {}", pass_label, line);
                passed += 1;
            }
            Verdict::Fail { actual } => {
                println!("{}  {} - got {}", fail_label, line, actual);
                failed += 1;
            }
            Verdict::FlagNotFound => {
                println!("{}  {} - flag not found", fail_label, line);
                failed += 1;
            }
            Verdict::Error(e) => {
                println!("{}  {} - {}", fail_label, line, e);
                failed += 1;
            }
        }
    }

    println!();
    println!(
        "{} passed, {} failed out of {} tests",
        passed,
        failed,
        expectations.len()
    );

    if failed > 0 {
        Err(())
    } else {
        Ok(())
    }
}

fn run_tests(settings: &Settings, testfile_path: &str) {
    if run_tests_inner(settings, testfile_path).is_err() {
        process::exit(1);
    }
}

fn parse_flag_key(flag_key: &str) -> FeatureId {
    flag_key.parse().unwrap_or_else(|e| {
        eprintln!("{}", e);
        process::exit(1);
    })
}

fn run_eval(settings: &Settings, flag_key: &str, context_args: &[String]) {
    let id = parse_flag_key(flag_key);
    let Ok(snapshot) = settings.load_snapshot() else {
        process::exit(1);
    };

    let pairs = context_args.iter().filter_map(|arg| arg.split_once('='));
    let context = context_from_pairs(pairs).unwrap_or_else(|e| {
        eprintln!("Invalid context: {}", e);
        process::exit(1);
    });

    let registry = Registry::with_snapshot(snapshot);
    match registry.explain(&id, &context) {
        Ok(resolution) => {
            println!("{}", resolution.value);
            match resolution.reason {
                Reason::Inactive => println!("  (flag is inactive)"),
                Reason::Default => println!("  (default, no rule applied)"),
                Reason::Rule { index, note: None } => println!("  (rule {})", index),
                Reason::Rule {
                    index,
                    note: Some(note),
                } => println!("  (rule {}: {})", index, note),
            }
        }
        Err(EvaluationError::FlagNotFound(_)) => {
            eprintln!("Flag '{}' not found", flag_key);
            process::exit(1);
        }
        Err(e) => {
            eprintln!("{}", e);
            process::exit(1);
        }
    }
}

fn run_bucket(salt: &str, flag_key: &str, stable_id: &str) {
    let id = parse_flag_key(flag_key);
    let stable_id = StableId::from_hex(stable_id).unwrap_or_else(|e| {
        eprintln!("{}", e);
        process::exit(1);
    });

    let b = bucket(salt, id.as_str(), stable_id.as_hex());
    // admitted once the threshold exceeds the bucket
    let from = f64::from(b + 1) / 100.0;
    println!("bucket {} of {}", b, BUCKET_COUNT);
    println!("admitted at rollouts of {:.2}% and above", from);
}

fn run_patch(settings: &Settings, patch_path: &str, output: Option<&str>) {
    let (Ok(features), Ok(current)) = (settings.features(), settings.load_snapshot()) else {
        process::exit(1);
    };

    let bytes = std::fs::read(patch_path).unwrap_or_else(|_| {
        eprintln!("{} does not exist", patch_path);
        process::exit(1);
    });

    let next = parse_patch(&bytes, &current, &features).unwrap_or_else(|e| {
        eprintln!("Patch rejected: {}", e);
        process::exit(1);
    });
    let next = stamp_if_unchanged(next, &current);

    let document = snapshot_document(&next);
    let written = match output {
        Some(path) => std::fs::File::create(path)
            .map_err(|e| e.to_string())
            .and_then(|file| {
                serde_json::to_writer_pretty(io::BufWriter::new(file), &document)
                    .map_err(|e| e.to_string())
            }),
        None => {
            let mut out = io::stdout().lock();
            serde_json::to_writer_pretty(&mut out, &document)
                .map_err(|e| e.to_string())
                .and_then(|()| writeln!(out).map_err(|e| e.to_string()))
        }
    };

    if let Err(e) = written {
        eprintln!("Failed to write snapshot: {}", e);
        process::exit(1);
    }

    if let Some(path) = output {
        println!(
            "{} -> {} ({} flags, was {})",
            patch_path,
            path,
            next.len(),
            current.len()
        );
    }
}

/// A patch that carries no generation time of its own gets the time it was
/// applied, keeping the previous version and source.
fn stamp_if_unchanged(next: Snapshot, current: &Snapshot) -> Snapshot {
    let generated_at = |s: &Snapshot| s.meta().and_then(|m| m.generated_at);
    if generated_at(&next).is_some() && generated_at(&next) != generated_at(current) {
        return next;
    }
    let meta = SnapshotMeta {
        generated_at: SnapshotMeta::generated_now().generated_at,
        ..next.meta().cloned().unwrap_or_default()
    };
    next.with_meta(meta)
}

fn reference_pattern() -> Regex {
    Regex::new(r"\bfeature::[\w-]+::[\w-]+").unwrap_or_else(|e| {
        eprintln!("Invalid pattern: {}", e);
        process::exit(1);
    })
}

fn run_find(settings: &Settings, path: &str) {
    let pattern = reference_pattern();
    let use_color = io::stdout().is_terminal();
    let stdout = Mutex::new(io::stdout());
    let referenced: Mutex<BTreeSet<String>> = Mutex::new(BTreeSet::new());

    // the snapshot and expectation files name every flag, skip them
    let skipped: Vec<PathBuf> = [&settings.snapshot, &settings.tests]
        .into_iter()
        .filter_map(|p| std::fs::canonicalize(p).ok())
        .collect();

    WalkBuilder::new(path).build_parallel().run(|| {
        let pattern = pattern.clone();
        let stdout = &stdout;
        let referenced = &referenced;
        let skipped = &skipped;
        Box::new(move |entry| {
            let entry = match entry {
                Ok(e) => e,
                Err(_) => return ignore::WalkState::Continue,
            };

            if !entry.file_type().is_some_and(|ft| ft.is_file()) {
                return ignore::WalkState::Continue;
            }

            let path = entry.path();
            if std::fs::canonicalize(path).is_ok_and(|p| skipped.contains(&p)) {
                return ignore::WalkState::Continue;
            }

            let file = match std::fs::File::open(path) {
                Ok(f) => f,
                Err(_) => return ignore::WalkState::Continue,
            };

            let reader = io::BufReader::new(file);
            let display_path = path.display();

            // Batch output per file to reduce lock contention
            let mut matches = Vec::new();
            let mut keys = Vec::new();
            for (line_idx, line) in reader.lines().enumerate() {
                let line = match line {
                    Ok(l) => l,
                    Err(_) => break, // binary file or encoding error
                };

                if pattern.is_match(&line) {
                    keys.extend(pattern.find_iter(&line).map(|m| m.as_str().to_string()));
                    let colored_line = if use_color {
                        pattern.replace_all(&line, "\x1b[31m$0\x1b[0m").into_owned()
                    } else {
                        line
                    };
                    matches.push(format!(
                        "{}:{}:{}",
                        display_path,
                        line_idx + 1,
                        colored_line
                    ));
                }
            }

            if !matches.is_empty() {
                referenced
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .extend(keys);
                let mut out = stdout.lock().unwrap_or_else(|e| e.into_inner());
                for m in &matches {
                    let _ = writeln!(out, "{}", m);
                }
            }

            ignore::WalkState::Continue
        })
    });

    if !Path::new(&settings.snapshot).exists() {
        return;
    }
    let Ok(snapshot) = settings.load_snapshot() else {
        process::exit(1);
    };

    let referenced = referenced.into_inner().unwrap_or_else(|e| e.into_inner());
    let unreferenced: Vec<&FeatureId> = snapshot
        .flags()
        .map(|def| def.id())
        .filter(|id| !referenced.contains(id.as_str()))
        .collect();

    println!();
    if unreferenced.is_empty() {
        println!("All {} flags in {} are referenced", snapshot.len(), settings.snapshot);
    } else {
        println!("Unreferenced flags in {}:", settings.snapshot);
        for id in unreferenced {
            println!("  {}", id);
        }
    }
}

async fn run_watch(settings: &Settings) {
    let Ok(features) = settings.features() else {
        process::exit(1);
    };
    if watch::watch_snapshot(features, PathBuf::from(&settings.snapshot))
        .await
        .is_err()
    {
        process::exit(1);
    }
}

async fn run_pull(settings: &Settings, url: &str, output: Option<&str>, token: Option<&str>) {
    let Ok(features) = settings.features() else {
        process::exit(1);
    };
    let output = output.unwrap_or(&settings.snapshot);
    if pull::run_pull_inner(url, output, token, &features)
        .await
        .is_err()
    {
        process::exit(1);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("FSNAP_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    let use_ansi = io::stderr().is_terminal();
    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(io::stderr)
                .with_ansi(use_ansi)
                .without_time()
                .compact(),
        )
        .init();
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Args::parse();
    let settings = Settings::new(&cli.config, cli.snapshot);
    match cli.cmd {
        Command::Init => run_init(),
        Command::Validate => run_validate(&settings),
        Command::List { description } => run_list(&settings, description),
        Command::Eval { flag_key, context } => run_eval(&settings, &flag_key, &context),
        Command::Bucket {
            salt,
            flag_key,
            stable_id,
        } => run_bucket(&salt, &flag_key, &stable_id),
        Command::Patch { patch, output } => run_patch(&settings, &patch, output.as_deref()),
        Command::Lint => lint::run_lint(&settings),
        Command::Test { testfile } => {
            let testfile = testfile.unwrap_or_else(|| settings.tests.clone());
            run_tests(&settings, &testfile)
        }
        Command::Check { testfile } => {
            let testfile = testfile.unwrap_or_else(|| settings.tests.clone());
            run_check(&settings, &testfile)
        }
        Command::Find { path } => run_find(&settings, &path),
        Command::Watch => run_watch(&settings).await,
        Command::Pull { url, output, token } => {
            run_pull(&settings, &url, output.as_deref(), token.as_deref()).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_files_are_consistent() {
        let config: FsnapConfig = toml::from_str(INIT_CONFIG).unwrap();
        let features = config.feature_registry().unwrap();
        let snapshot = parse_snapshot(INIT_SNAPSHOT.as_bytes(), &features).unwrap();
        assert_eq!(snapshot.len(), 3);
        assert!(lint::check_snapshot(&snapshot).is_empty());

        let registry = Registry::with_snapshot(snapshot);
        let expectations = parse_expectations(INIT_TESTS).unwrap();
        assert_eq!(expectations.len(), 8);
        for expectation in &expectations {
            assert_eq!(
                testfile::check(&registry, expectation),
                Verdict::Pass,
                "{}",
                expectation.text
            );
        }
    }

    #[test]
    fn test_patched_snapshot_is_stamped() {
        use chrono::TimeZone;

        let earlier = chrono::Utc.timestamp_millis_opt(1_700_000_000_000).single();
        let current = Snapshot::empty().with_meta(SnapshotMeta {
            version: Some("1".into()),
            generated_at: earlier,
            source: None,
        });

        let stamped = stamp_if_unchanged(current.clone(), &current);
        let meta = stamped.meta().unwrap();
        assert_eq!(meta.version.as_deref(), Some("1"));
        assert!(meta.generated_at > earlier);

        let later = chrono::Utc.timestamp_millis_opt(1_800_000_000_000).single();
        let patched = current.clone().with_meta(SnapshotMeta {
            generated_at: later,
            ..Default::default()
        });
        let kept = stamp_if_unchanged(patched, &current);
        assert_eq!(kept.meta().unwrap().generated_at, later);
    }

    #[test]
    fn test_reference_pattern() {
        let pattern = reference_pattern();
        let line = r#"let id = "feature::global::darkMode".parse()?; // see feature::ui::theme-v2"#;
        let found: Vec<&str> = pattern.find_iter(line).map(|m| m.as_str()).collect();
        assert_eq!(found, ["feature::global::darkMode", "feature::ui::theme-v2"]);
    }
}
