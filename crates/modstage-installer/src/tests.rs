use super::*;
use std::cell::RefCell;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use modstage_core::{EntryPointConfig, ProjectManifest};
use modstage_resolver::ItemErrorCode;
use semver::Version;

use crate::command_hooks::parameter_env_name;

static TEST_LAYOUT_COUNTER: AtomicU64 = AtomicU64::new(0);

fn build_test_layout_path(nanos: u128) -> PathBuf {
    let mut path = std::env::temp_dir();
    let sequence = TEST_LAYOUT_COUNTER.fetch_add(1, Ordering::Relaxed);
    path.push(format!(
        "modstage-installer-tests-{}-{}-{}",
        std::process::id(),
        nanos,
        sequence
    ));
    path
}

fn test_layout() -> AppLayout {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system time")
        .as_nanos();
    AppLayout::new(build_test_layout_path(nanos))
}

fn v(raw: &str) -> Version {
    Version::parse(raw).expect("test version must parse")
}

fn write_file(path: &Path, contents: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("must create parent dir");
    }
    fs::write(path, contents).expect("must write fixture");
}

fn write_project(layout: &AppLayout, entrypoints: &[(&str, &str)]) {
    let mut raw = String::from("name = \"demo\"\n");
    for (file, config) in entrypoints {
        raw.push_str(&format!(
            "\n[[entrypoints]]\nfile = \"{file}\"\nconfig = \"{config}\"\n"
        ));
    }
    write_file(&layout.project_manifest_path(), &raw);
}

fn write_config(layout: &AppLayout, config: &str, raw: &str) {
    write_file(&layout.config_path(config), raw);
}

fn binding(name: &str) -> String {
    format!("[[modules]]\nname = \"{name}\"\npath = \"modules/{name}\"\n\n")
}

fn write_module(layout: &AppLayout, name: &str, raw: &str) {
    write_file(
        &layout.module_manifest_path(&format!("modules/{name}")),
        raw,
    );
}

/// One entry point `index.php` using `core` 1.0 and `blog` 2.1, where blog
/// needs core >= 1.0.
fn core_and_blog(layout: &AppLayout) {
    write_project(layout, &[("index.php", "index.toml")]);
    write_config(
        layout,
        "index.toml",
        &format!("{}{}", binding("core"), binding("blog")),
    );
    write_module(
        layout,
        "core",
        "name = \"core\"\nversion = \"1.0\"\ndate = \"2024-01-01\"\n",
    );
    write_module(
        layout,
        "blog",
        r#"name = "blog"
version = "2.1"
date = "2024-01-02"

[[dependencies]]
name = "core"
min_version = "1.0"
"#,
    );
}

fn seed_ledger(layout: &AppLayout, scope: &str, module: &str, version: &str) {
    let mut ledger = InstallLedger::open(layout.ledger_path()).expect("must open ledger");
    ledger.write_install(scope, module, &v(version), "2023-01-01");
    ledger.save().expect("must save ledger");
}

fn disk_ledger(layout: &AppLayout) -> InstallLedger {
    InstallLedger::open(layout.ledger_path()).expect("must reopen ledger")
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Seen {
    call: String,
    parameters: BTreeMap<String, String>,
    revision: u64,
    whole_app: bool,
}

type CallLog = Rc<RefCell<Vec<Seen>>>;

fn calls(log: &CallLog) -> Vec<String> {
    log.borrow().iter().map(|seen| seen.call.clone()).collect()
}

struct SpyInstaller {
    label: String,
    log: CallLog,
    failures: HashSet<String>,
}

impl SpyInstaller {
    fn record(&self, hook: &str, ctx: &HookContext<'_>) -> Result<(), HookError> {
        let call = format!("{}:{hook}", self.label);
        self.log.borrow_mut().push(Seen {
            call: call.clone(),
            parameters: ctx.parameters.clone(),
            revision: ctx.entry_point.config_revision(),
            whole_app: ctx.whole_app,
        });
        if self.failures.contains(&call) {
            return Err(HookError::installer("test.hook.failed", vec![call]));
        }
        Ok(())
    }
}

impl ModuleInstaller for SpyInstaller {
    fn pre_install(&mut self, ctx: &mut HookContext<'_>) -> Result<(), HookError> {
        self.record("pre_install", ctx)
    }

    fn install(&mut self, ctx: &mut HookContext<'_>) -> Result<(), HookError> {
        self.record("install", ctx)
    }

    fn post_install(&mut self, ctx: &mut HookContext<'_>) -> Result<(), HookError> {
        self.record("post_install", ctx)
    }

    fn pre_uninstall(&mut self, ctx: &mut HookContext<'_>) -> Result<(), HookError> {
        self.record("pre_uninstall", ctx)
    }

    fn uninstall(&mut self, ctx: &mut HookContext<'_>) -> Result<(), HookError> {
        self.record("uninstall", ctx)
    }

    fn post_uninstall(&mut self, ctx: &mut HookContext<'_>) -> Result<(), HookError> {
        self.record("post_uninstall", ctx)
    }
}

/// Hands out spies: `<module>` for installers, `<module>@<version>` for
/// upgraders declared in the module manifest.
#[derive(Default)]
struct SpyProvider {
    log: CallLog,
    failures: HashSet<String>,
    requests: usize,
}

impl SpyProvider {
    fn failing(calls: &[&str]) -> Self {
        Self {
            failures: calls.iter().map(|call| call.to_string()).collect(),
            ..Self::default()
        }
    }

    fn spy(&self, label: String) -> SpyInstaller {
        SpyInstaller {
            label,
            log: self.log.clone(),
            failures: self.failures.clone(),
        }
    }
}

impl HandlerProvider for SpyProvider {
    fn installer(
        &mut self,
        module: &ModuleDescriptor,
        _entry_point: &EntryPointContext,
        _whole_app: bool,
    ) -> anyhow::Result<Option<Box<dyn ModuleInstaller>>> {
        self.requests += 1;
        Ok(Some(Box::new(self.spy(module.name.clone()))))
    }

    fn upgraders(
        &mut self,
        module: &ModuleDescriptor,
        _entry_point: &EntryPointContext,
    ) -> anyhow::Result<Vec<Upgrader>> {
        self.requests += 1;
        Ok(module
            .manifest
            .upgraders
            .iter()
            .map(|spec| Upgrader {
                version: spec.version.clone(),
                date: spec.date.clone(),
                handler: Box::new(self.spy(format!("{}@{}", module.name, spec.version))),
            })
            .collect())
    }
}

fn open(layout: &AppLayout, provider: SpyProvider) -> Installer<MemoryReporter, SpyProvider> {
    Installer::open(layout, MemoryReporter::new(), provider).expect("installer must open")
}

struct Noop;

impl ModuleInstaller for Noop {}

#[test]
fn build_test_layout_path_disambiguates_same_timestamp_calls() {
    let first = build_test_layout_path(42);
    let second = build_test_layout_path(42);
    assert_ne!(first, second);
}

#[test]
fn install_records_ledger_and_runs_phases_in_order() {
    let layout = test_layout();
    core_and_blog(&layout);
    let provider = SpyProvider::default();
    let log = provider.log.clone();

    let mut installer = open(&layout, provider);
    assert!(installer
        .install_application(InstallFlags::ALL)
        .expect("install must run"));

    assert_eq!(
        calls(&log),
        vec![
            "core:pre_install",
            "blog:pre_install",
            "core:install",
            "blog:install",
            "core:post_install",
            "blog:post_install",
        ]
    );
    assert!(log.borrow().iter().all(|seen| seen.whole_app));

    let ledger = disk_ledger(&layout);
    assert_eq!(ledger.get_value("core.installed", "index"), Some("1"));
    assert_eq!(ledger.get_value("core.version", "index"), Some("1.0.0"));
    assert_eq!(ledger.get_value("core.firstversion", "index"), Some("1.0.0"));
    assert_eq!(ledger.get_value("core.version.date", "index"), Some("2024-01-01"));
    let blog = ledger.record("index", "blog").expect("blog must be recorded");
    assert!(blog.installed);
    assert_eq!(blog.version.as_deref(), Some("2.1.0"));
    assert_eq!(blog.first_version.as_deref(), Some("2.1.0"));

    let reporter = installer.reporter();
    assert_eq!(reporter.starts, 1);
    assert_eq!(reporter.ends, 1);
    assert!(reporter.errors().is_empty());
    assert!(reporter.contains("module 'blog' installed"));
    assert!(reporter.contains("entry point 'index' is ready"));

    let core = installer
        .entry_point("index")
        .and_then(|ep| ep.module("core"))
        .expect("core must be bound");
    assert!(core.installed);
    assert_eq!(core.installed_version, Some(v("1.0.0")));

    let _ = fs::remove_dir_all(layout.root());
}

#[test]
fn second_run_has_nothing_to_do() {
    let layout = test_layout();
    core_and_blog(&layout);
    let mut installer = open(&layout, SpyProvider::default());
    assert!(installer
        .install_application(InstallFlags::ALL)
        .expect("first run"));
    drop(installer);

    let provider = SpyProvider::default();
    let log = provider.log.clone();
    let mut installer = open(&layout, provider);
    assert!(installer
        .install_application(InstallFlags::ALL)
        .expect("second run"));
    assert!(installer.reporter().contains("nothing to do for entry point 'index'"));
    assert_eq!(installer.provider().requests, 0);
    assert!(log.borrow().is_empty());

    let _ = fs::remove_dir_all(layout.root());
}

#[test]
fn upgrade_walks_each_step_then_reconciles_to_source_version() {
    let layout = test_layout();
    write_project(&layout, &[("index.php", "index.toml")]);
    write_config(&layout, "index.toml", &binding("core"));
    write_module(
        &layout,
        "core",
        r#"name = "core"
version = "1.3"
date = "2024-05-01"

[[upgraders]]
version = "1.2"
date = "2024-04-01"

[[upgraders]]
version = "1.1"
date = "2024-03-01"
"#,
    );
    seed_ledger(&layout, "index", "core", "1.0.0");
    let provider = SpyProvider::default();
    let log = provider.log.clone();

    let mut installer = open(&layout, provider);
    assert!(installer
        .install_application(InstallFlags::ALL)
        .expect("upgrade must run"));

    assert_eq!(
        calls(&log),
        vec![
            "core@1.1.0:pre_install",
            "core@1.2.0:pre_install",
            "core@1.1.0:install",
            "core@1.2.0:install",
            "core@1.1.0:post_install",
            "core@1.2.0:post_install",
        ]
    );
    let reporter = installer.reporter();
    assert!(reporter.contains("module 'core' upgraded to 1.1.0"));
    assert!(reporter.contains("module 'core' upgraded to 1.2.0"));
    assert!(reporter.contains("module 'core' upgraded to 1.3.0"));

    let record = disk_ledger(&layout)
        .record("index", "core")
        .expect("core must be recorded");
    assert_eq!(record.version.as_deref(), Some("1.3.0"));
    assert_eq!(record.version_date.as_deref(), Some("2024-05-01"));
    assert_eq!(record.first_version.as_deref(), Some("1.0.0"));

    let _ = fs::remove_dir_all(layout.root());
}

#[test]
fn failed_upgrade_step_leaves_last_completed_version_and_resumes() {
    let layout = test_layout();
    write_project(&layout, &[("index.php", "index.toml")]);
    write_config(&layout, "index.toml", &binding("core"));
    write_module(
        &layout,
        "core",
        r#"name = "core"
version = "3.0"

[[upgraders]]
version = "2.0"
date = "2024-02-01"

[[upgraders]]
version = "3.0"
date = "2024-03-01"
"#,
    );
    seed_ledger(&layout, "index", "core", "1.0.0");

    let provider = SpyProvider::failing(&["core@3.0.0:install"]);
    let mut installer = open(&layout, provider);
    assert!(!installer
        .install_application(InstallFlags::ALL)
        .expect("upgrade must run"));
    assert!(installer.reporter().contains("test.hook.failed (core@3.0.0:install)"));
    drop(installer);

    let ledger = disk_ledger(&layout);
    assert_eq!(ledger.get_value("core.version", "index"), Some("2.0.0"));
    assert_eq!(ledger.get_value("core.version.date", "index"), Some("2024-02-01"));

    let provider = SpyProvider::default();
    let log = provider.log.clone();
    let mut installer = open(&layout, provider);
    assert!(installer
        .install_application(InstallFlags::ALL)
        .expect("resumed upgrade must run"));
    assert_eq!(
        calls(&log),
        vec![
            "core@3.0.0:pre_install",
            "core@3.0.0:install",
            "core@3.0.0:post_install",
        ]
    );

    let record = disk_ledger(&layout)
        .record("index", "core")
        .expect("core must be recorded");
    assert_eq!(record.version.as_deref(), Some("3.0.0"));
    assert_eq!(record.version_date.as_deref(), Some("2024-03-01"));
    assert_eq!(record.first_version.as_deref(), Some("1.0.0"));

    let _ = fs::remove_dir_all(layout.root());
}

#[test]
fn disabled_installers_move_ledger_without_any_hook() {
    let layout = test_layout();
    core_and_blog(&layout);
    write_config(
        &layout,
        "index.toml",
        &format!(
            "disable_installers = true\n\n{}{}",
            binding("core"),
            binding("blog")
        ),
    );
    let provider = SpyProvider::default();
    let log = provider.log.clone();

    let mut installer = open(&layout, provider);
    assert!(installer
        .install_application(InstallFlags::ALL)
        .expect("install must run"));

    assert!(log.borrow().is_empty());
    assert_eq!(installer.provider().requests, 0);
    assert!(installer
        .reporter()
        .contains("module installers are disabled"));
    let ledger = disk_ledger(&layout);
    assert_eq!(ledger.get_value("core.installed", "index"), Some("1"));
    assert_eq!(ledger.get_value("blog.installed", "index"), Some("1"));

    let _ = fs::remove_dir_all(layout.root());
}

#[test]
fn failing_entry_point_stops_the_run_and_keeps_saved_modules() {
    let layout = test_layout();
    core_and_blog(&layout);
    write_project(
        &layout,
        &[("index.php", "index.toml"), ("admin.php", "admin.toml")],
    );
    write_config(&layout, "admin.toml", &binding("stats"));
    write_module(&layout, "stats", "name = \"stats\"\nversion = \"0.4\"\n");
    let provider = SpyProvider::failing(&["blog:install"]);
    let log = provider.log.clone();

    let mut installer = open(&layout, provider);
    assert!(!installer
        .install_application(InstallFlags::ALL)
        .expect("install must run"));

    let calls = calls(&log);
    assert!(calls.iter().all(|call| !call.starts_with("stats")));
    assert!(!calls.contains(&"core:post_install".to_string()));

    let ledger = disk_ledger(&layout);
    let core = ledger.record("index", "core").expect("core must be recorded");
    assert!(core.installed);
    assert_eq!(core.version.as_deref(), Some("1.0.0"));
    assert_eq!(ledger.get_value("blog.installed", "index"), Some("0"));
    assert!(!ledger
        .record("admin", "stats")
        .map(|record| record.installed)
        .unwrap_or(false));

    let reporter = installer.reporter();
    assert!(reporter.contains("module 'blog': test.hook.failed (blog:install)"));
    assert!(reporter.contains("installation of entry point 'index' stopped on errors"));

    let _ = fs::remove_dir_all(layout.root());
}

#[test]
fn pre_phase_reports_every_failure_before_aborting() {
    let layout = test_layout();
    core_and_blog(&layout);
    let provider = SpyProvider::failing(&["core:pre_install", "blog:pre_install"]);
    let log = provider.log.clone();

    let mut installer = open(&layout, provider);
    assert!(!installer
        .install_application(InstallFlags::ALL)
        .expect("install must run"));

    assert_eq!(calls(&log), vec!["core:pre_install", "blog:pre_install"]);
    assert_eq!(installer.reporter().errors().len(), 2);
    assert_eq!(
        disk_ledger(&layout).get_value("core.installed", "index"),
        Some("0")
    );

    let _ = fs::remove_dir_all(layout.root());
}

#[test]
fn post_phase_failure_still_runs_remaining_post_hooks() {
    let layout = test_layout();
    core_and_blog(&layout);
    let provider = SpyProvider::failing(&["core:post_install"]);
    let log = provider.log.clone();

    let mut installer = open(&layout, provider);
    assert!(!installer
        .install_application(InstallFlags::ALL)
        .expect("install must run"));

    assert!(calls(&log).contains(&"blog:post_install".to_string()));
    let ledger = disk_ledger(&layout);
    assert_eq!(ledger.get_value("core.installed", "index"), Some("1"));
    assert_eq!(ledger.get_value("blog.installed", "index"), Some("1"));

    let _ = fs::remove_dir_all(layout.root());
}

#[test]
fn flags_gate_hooks_but_not_bookkeeping() {
    let layout = test_layout();
    core_and_blog(&layout);
    let provider = SpyProvider::default();
    let log = provider.log.clone();

    let mut installer = open(&layout, provider);
    assert!(installer
        .install_application(InstallFlags::UPGRADE | InstallFlags::REMOVE)
        .expect("install must run"));

    assert!(log.borrow().is_empty());
    assert_eq!(installer.provider().requests, 2);
    assert_eq!(
        disk_ledger(&layout).get_value("blog.installed", "index"),
        Some("1")
    );

    let _ = fs::remove_dir_all(layout.root());
}

struct StampingInstaller {
    seen: Rc<RefCell<Vec<(String, Vec<String>)>>>,
}

impl ModuleInstaller for StampingInstaller {
    fn install(&mut self, ctx: &mut HookContext<'_>) -> Result<(), HookError> {
        let keys = ctx.entry_point.config().extra.keys().cloned().collect();
        self.seen.borrow_mut().push((ctx.module.to_string(), keys));

        let path = ctx.entry_point.config_path().to_path_buf();
        let existing = fs::read_to_string(&path).map_err(anyhow::Error::from)?;
        fs::write(&path, format!("stamp_{} = true\n{existing}", ctx.module))
            .map_err(anyhow::Error::from)?;
        Ok(())
    }
}

#[derive(Default)]
struct StampingProvider {
    seen: Rc<RefCell<Vec<(String, Vec<String>)>>>,
}

impl HandlerProvider for StampingProvider {
    fn installer(
        &mut self,
        _module: &ModuleDescriptor,
        _entry_point: &EntryPointContext,
        _whole_app: bool,
    ) -> anyhow::Result<Option<Box<dyn ModuleInstaller>>> {
        Ok(Some(Box::new(StampingInstaller {
            seen: self.seen.clone(),
        })))
    }

    fn upgraders(
        &mut self,
        _module: &ModuleDescriptor,
        _entry_point: &EntryPointContext,
    ) -> anyhow::Result<Vec<Upgrader>> {
        Ok(Vec::new())
    }
}

#[test]
fn config_is_reloaded_after_every_hook() {
    let layout = test_layout();
    core_and_blog(&layout);
    let provider = StampingProvider::default();
    let seen = provider.seen.clone();

    let mut installer = Installer::open(&layout, MemoryReporter::new(), provider)
        .expect("installer must open");
    assert!(installer
        .install_application(InstallFlags::ALL)
        .expect("install must run"));

    assert_eq!(
        *seen.borrow(),
        vec![
            ("core".to_string(), Vec::new()),
            ("blog".to_string(), vec!["stamp_core".to_string()]),
        ]
    );
    let entry_point = installer.entry_point("index").expect("entry point");
    assert!(entry_point.config().extra.contains_key("stamp_core"));
    assert!(entry_point.config().extra.contains_key("stamp_blog"));
    assert_eq!(entry_point.config_revision(), 4);

    let _ = fs::remove_dir_all(layout.root());
}

#[test]
fn install_modules_targets_disabled_modules() {
    let layout = test_layout();
    core_and_blog(&layout);
    write_config(
        &layout,
        "index.toml",
        &format!(
            "{}{}[[modules]]\nname = \"extra\"\npath = \"modules/extra\"\nenabled = false\n",
            binding("core"),
            binding("blog")
        ),
    );
    write_module(&layout, "extra", "name = \"extra\"\nversion = \"0.1\"\n");
    let provider = SpyProvider::default();
    let log = provider.log.clone();

    let mut installer = open(&layout, provider);
    assert!(installer
        .install_application(InstallFlags::ALL)
        .expect("install must run"));
    assert!(!calls(&log).contains(&"extra:install".to_string()));

    log.borrow_mut().clear();
    assert!(installer
        .install_modules(&["extra".to_string()], Some("index.php"))
        .expect("install_modules must run"));
    assert_eq!(
        calls(&log),
        vec!["extra:pre_install", "extra:install", "extra:post_install"]
    );
    assert!(log.borrow().iter().all(|seen| !seen.whole_app));
    assert_eq!(
        disk_ledger(&layout).get_value("extra.installed", "index"),
        Some("1")
    );

    let _ = fs::remove_dir_all(layout.root());
}

#[test]
fn install_modules_upgrades_outdated_dependency_of_named_module() {
    let layout = test_layout();
    core_and_blog(&layout);
    write_module(
        &layout,
        "core",
        "name = \"core\"\nversion = \"2.0\"\ndate = \"2024-03-01\"\n",
    );
    write_module(
        &layout,
        "blog",
        r#"name = "blog"
version = "2.1"

[[dependencies]]
name = "core"
min_version = "2.0"
"#,
    );
    seed_ledger(&layout, "index", "core", "1.0.0");
    let provider = SpyProvider::default();
    let log = provider.log.clone();

    let mut installer = open(&layout, provider);
    assert!(installer
        .install_modules(&["blog".to_string()], None)
        .expect("install_modules must run"));

    assert!(installer.reporter().contains("module 'core' upgraded to 2.0.0"));
    assert_eq!(
        calls(&log),
        vec!["blog:pre_install", "blog:install", "blog:post_install"]
    );
    let ledger = disk_ledger(&layout);
    assert_eq!(ledger.get_value("core.version", "index"), Some("2.0.0"));
    assert_eq!(ledger.get_value("blog.installed", "index"), Some("1"));

    let _ = fs::remove_dir_all(layout.root());
}

#[test]
fn empty_module_request_reports_nothing_to_do() {
    let layout = test_layout();
    core_and_blog(&layout);
    let provider = SpyProvider::default();
    let log = provider.log.clone();

    let mut installer = open(&layout, provider);
    assert!(installer
        .install_modules(&[], None)
        .expect("empty request must run"));
    assert!(installer
        .uninstall_modules(&[], Some("index"))
        .expect("empty request must run"));

    assert!(installer
        .reporter()
        .contains("no module given, nothing to do"));
    assert!(log.borrow().is_empty());
    assert_eq!(disk_ledger(&layout).get_value("core.installed", "index"), Some("0"));

    let _ = fs::remove_dir_all(layout.root());
}

#[test]
fn install_modules_reports_unknown_modules_and_entry_points() {
    let layout = test_layout();
    core_and_blog(&layout);
    let mut installer = open(&layout, SpyProvider::default());

    assert!(!installer
        .install_modules(&["nope".to_string()], None)
        .expect("unknown module is reported"));
    assert!(installer.reporter().contains("unknown module 'nope'"));

    let err = installer
        .install_modules(&["core".to_string()], Some("missing"))
        .err()
        .expect("unknown entry point must fail");
    assert!(matches!(err, InstallError::UnknownEntryPoint(name) if name == "missing"));

    let _ = fs::remove_dir_all(layout.root());
}

#[test]
fn install_modules_without_entry_point_skips_entry_points_not_using_them() {
    let layout = test_layout();
    core_and_blog(&layout);
    write_project(
        &layout,
        &[("index.php", "index.toml"), ("admin.php", "admin.toml")],
    );
    write_config(&layout, "admin.toml", &binding("stats"));
    write_module(&layout, "stats", "name = \"stats\"\nversion = \"0.4\"\n");
    let provider = SpyProvider::default();
    let log = provider.log.clone();

    let mut installer = open(&layout, provider);
    assert!(installer
        .install_modules(&["stats".to_string()], None)
        .expect("install_modules must run"));

    assert!(installer
        .reporter()
        .contains("module 'stats' is not used by entry point 'index'"));
    assert!(calls(&log).iter().all(|call| call.starts_with("stats:")));
    assert_eq!(
        disk_ledger(&layout).get_value("stats.installed", "admin"),
        Some("1")
    );

    let _ = fs::remove_dir_all(layout.root());
}

#[test]
fn uninstall_refuses_to_orphan_dependents_then_removes_in_reverse_order() {
    let layout = test_layout();
    core_and_blog(&layout);
    let provider = SpyProvider::default();
    let log = provider.log.clone();

    let mut installer = open(&layout, provider);
    assert!(installer
        .install_application(InstallFlags::ALL)
        .expect("install must run"));
    log.borrow_mut().clear();

    assert!(!installer
        .uninstall_modules(&["core".to_string()], None)
        .expect("uninstall must run"));
    assert!(installer
        .reporter()
        .contains("module 'core' cannot be removed: 'blog' depends on it"));
    assert!(log.borrow().is_empty());

    assert!(installer
        .uninstall_modules(&["blog".to_string(), "core".to_string()], None)
        .expect("uninstall must run"));
    let calls = calls(&log);
    let blog = calls
        .iter()
        .position(|call| call == "blog:uninstall")
        .expect("blog uninstall hook");
    let core = calls
        .iter()
        .position(|call| call == "core:uninstall")
        .expect("core uninstall hook");
    assert!(blog < core);

    let ledger = disk_ledger(&layout);
    assert!(ledger.record("index", "core").is_none());
    assert!(ledger.record("index", "blog").is_none());
    assert!(installer.reporter().contains("module 'core' uninstalled"));

    let _ = fs::remove_dir_all(layout.root());
}

#[test]
fn resolution_failures_mark_modules_in_error() {
    let layout = test_layout();
    write_project(&layout, &[("index.php", "index.toml")]);
    write_config(
        &layout,
        "index.toml",
        &format!("{}{}{}", binding("a"), binding("b"), binding("c")),
    );
    write_module(
        &layout,
        "a",
        "name = \"a\"\nversion = \"1.0\"\n\n[[dependencies]]\nname = \"b\"\n",
    );
    write_module(
        &layout,
        "b",
        "name = \"b\"\nversion = \"1.0\"\n\n[[dependencies]]\nname = \"a\"\n",
    );
    write_module(&layout, "c", "name = \"c\"\nversion = \"1.0\"\n");
    let provider = SpyProvider::default();
    let log = provider.log.clone();

    let mut installer = open(&layout, provider);
    assert!(!installer
        .install_application(InstallFlags::ALL)
        .expect("install must run"));

    assert!(log.borrow().is_empty());
    assert!(installer.reporter().contains("circular dependency"));
    let entry_point = installer.entry_point("index").expect("entry point");
    assert!(entry_point
        .modules()
        .iter()
        .any(|module| module.in_error == Some(ItemErrorCode::CircularDependency)));
    assert_eq!(
        disk_ledger(&layout).get_value("c.installed", "index"),
        Some("0")
    );

    let _ = fs::remove_dir_all(layout.root());
}

#[test]
fn missing_dependency_marks_module_in_error() {
    let layout = test_layout();
    write_project(&layout, &[("index.php", "index.toml")]);
    write_config(&layout, "index.toml", &binding("blog"));
    write_module(
        &layout,
        "blog",
        "name = \"blog\"\nversion = \"1.0\"\n\n[[dependencies]]\nname = \"ghost\"\n",
    );

    let mut installer = open(&layout, SpyProvider::default());
    assert!(!installer
        .install_application(InstallFlags::ALL)
        .expect("install must run"));

    assert!(installer.reporter().contains("ghost"));
    let blog = installer
        .entry_point("index")
        .and_then(|ep| ep.module("blog"))
        .expect("blog must be bound");
    assert_eq!(blog.in_error, Some(ItemErrorCode::MissingDependencies));

    let _ = fs::remove_dir_all(layout.root());
}

#[test]
fn forced_version_triggers_upgrade_steps() {
    let layout = test_layout();
    write_project(&layout, &[("index.php", "index.toml")]);
    write_config(&layout, "index.toml", &binding("core"));
    write_module(
        &layout,
        "core",
        "name = \"core\"\nversion = \"2.0\"\n\n[[upgraders]]\nversion = \"2.0\"\n",
    );
    let provider = SpyProvider::default();
    let log = provider.log.clone();

    let mut installer = open(&layout, provider);
    assert!(installer
        .install_application(InstallFlags::ALL)
        .expect("install must run"));
    assert!(!calls(&log).contains(&"core@2.0.0:install".to_string()));

    assert!(installer.force_module_version("core", v("1.0.0")));
    assert!(!installer.force_module_version("ghost", v("1.0.0")));
    assert!(installer
        .install_application(InstallFlags::ALL)
        .expect("upgrade must run"));
    assert!(calls(&log).contains(&"core@2.0.0:install".to_string()));
    assert_eq!(
        disk_ledger(&layout).get_value("core.version", "index"),
        Some("2.0.0")
    );

    let _ = fs::remove_dir_all(layout.root());
}

#[test]
fn module_parameters_reach_hooks() {
    let layout = test_layout();
    core_and_blog(&layout);
    let provider = SpyProvider::default();
    let log = provider.log.clone();

    let mut installer = open(&layout, provider);
    let parameters = BTreeMap::from([("dsn".to_string(), "pg".to_string())]);
    installer
        .set_module_parameters("core", parameters.clone(), Some("index"))
        .expect("entry point must exist");
    assert!(installer
        .install_entry_point("index.php")
        .expect("install must run"));

    let log = log.borrow();
    let core = log
        .iter()
        .find(|seen| seen.call == "core:install")
        .expect("core install hook");
    assert_eq!(core.parameters, parameters);
    let blog = log
        .iter()
        .find(|seen| seen.call == "blog:install")
        .expect("blog install hook");
    assert!(blog.parameters.is_empty());
    assert_eq!(blog.revision, 1);

    let _ = fs::remove_dir_all(layout.root());
}

#[test]
fn unknown_entry_point_is_a_configuration_error() {
    let layout = test_layout();
    core_and_blog(&layout);
    let mut installer = open(&layout, SpyProvider::default());

    let err = installer
        .install_entry_point("nowhere.php")
        .err()
        .expect("must fail");
    assert_eq!(err.to_string(), "unknown entry point 'nowhere.php'");
    assert_eq!(installer.reporter().starts, 0);

    let _ = fs::remove_dir_all(layout.root());
}

#[test]
fn second_open_is_refused_while_lock_is_held() {
    let layout = test_layout();
    core_and_blog(&layout);

    let first = open(&layout, SpyProvider::default());
    let second = Installer::open(&layout, MemoryReporter::new(), SpyProvider::default());
    assert!(matches!(second, Err(InstallError::Locked { .. })));

    drop(first);
    assert!(!layout.lock_path().exists());
    let _third = open(&layout, SpyProvider::default());

    let _ = fs::remove_dir_all(layout.root());
}

#[cfg(unix)]
#[test]
fn lock_left_by_dead_process_does_not_block_resuming() {
    let layout = test_layout();
    core_and_blog(&layout);
    seed_ledger(&layout, "index", "core", "1.0.0");
    write_file(&layout.lock_path(), "999999999\n");

    let provider = SpyProvider::default();
    let log = provider.log.clone();
    let mut installer = open(&layout, provider);
    let holder = fs::read_to_string(layout.lock_path()).expect("lock must be rewritten");
    assert_eq!(holder.trim(), std::process::id().to_string());

    assert!(installer
        .install_application(InstallFlags::ALL)
        .expect("install must run"));
    assert_eq!(
        calls(&log),
        vec!["blog:pre_install", "blog:install", "blog:post_install"]
    );
    drop(installer);
    assert!(!layout.lock_path().exists());

    let _ = fs::remove_dir_all(layout.root());
}

#[test]
fn lock_with_unknown_holder_is_kept() {
    let layout = test_layout();
    core_and_blog(&layout);
    write_file(&layout.lock_path(), "not-a-pid\n");

    let opened = Installer::open(&layout, MemoryReporter::new(), SpyProvider::default());
    assert!(matches!(
        opened,
        Err(InstallError::Locked { holder: Some(ref holder), .. }) if holder == "not-a-pid"
    ));
    assert!(!InstallLock::break_stale(&layout.lock_path()).expect("must inspect lock"));
    assert!(layout.lock_path().exists());

    let _ = fs::remove_dir_all(layout.root());
}

#[test]
fn open_prunes_modules_no_longer_bound() {
    let layout = test_layout();
    core_and_blog(&layout);
    seed_ledger(&layout, "index", "retired", "0.9.0");
    seed_ledger(&layout, "index", "core", "1.0.0");

    let installer = open(&layout, SpyProvider::default());
    assert!(installer.ledger().record("index", "retired").is_none());
    assert_eq!(
        installer.ledger().get_value("blog.installed", "index"),
        Some("0")
    );
    drop(installer);

    let ledger = disk_ledger(&layout);
    assert!(ledger.get_value("retired.installed", "index").is_none());
    assert_eq!(ledger.get_value("core.version", "index"), Some("1.0.0"));

    let _ = fs::remove_dir_all(layout.root());
}

#[test]
fn entry_points_sharing_a_config_are_loaded_once() {
    let layout = test_layout();
    core_and_blog(&layout);
    write_project(
        &layout,
        &[("index.php", "index.toml"), ("other.php", "index.toml")],
    );

    let installer = open(&layout, SpyProvider::default());
    assert_eq!(installer.entry_points().len(), 1);
    assert_eq!(
        installer.entry_point("other.php").map(|ep| ep.id()),
        Some("index")
    );
    assert_eq!(
        installer.entry_point("other").map(|ep| ep.id()),
        Some("index")
    );

    let _ = fs::remove_dir_all(layout.root());
}

#[test]
fn from_parts_runs_without_claiming_the_lock() {
    let layout = test_layout();
    core_and_blog(&layout);
    let project =
        ProjectManifest::load(&layout.project_manifest_path()).expect("project must load");
    let ledger = InstallLedger::open(layout.ledger_path()).expect("ledger must open");
    let context = EntryPointContext::load(&layout, &project.entrypoints[0], &ledger)
        .expect("entry point must load");

    let mut installer = Installer::from_parts(
        ledger,
        vec![context],
        MemoryReporter::new(),
        SpyProvider::default(),
    );
    assert!(!layout.lock_path().exists());
    assert!(installer
        .install_entry_point("index")
        .expect("install must run"));
    assert_eq!(
        disk_ledger(&layout).get_value("core.installed", "index"),
        Some("1")
    );

    let _ = fs::remove_dir_all(layout.root());
}

#[test]
fn preview_resolves_without_running_hooks() {
    let layout = test_layout();
    core_and_blog(&layout);
    let provider = SpyProvider::default();
    let log = provider.log.clone();

    let installer = open(&layout, provider);
    let previews = installer.preview().expect("preview must build");
    assert_eq!(previews.len(), 1);
    let (id, chain) = &previews[0];
    assert_eq!(id, "index");
    let chain = chain.as_ref().expect("chain must resolve");
    assert_eq!(chain.names(), vec!["core", "blog"]);
    assert!(log.borrow().is_empty());

    let _ = fs::remove_dir_all(layout.root());
}

#[cfg(unix)]
#[test]
fn command_hooks_run_in_app_root_with_module_environment() {
    let layout = test_layout();
    write_project(&layout, &[("index.php", "index.toml")]);
    write_config(
        &layout,
        "index.toml",
        &format!("{}[modules.parameters]\ndsn = \"sqlite\"\n", binding("core")),
    );
    write_module(
        &layout,
        "core",
        r#"name = "core"
version = "1.0"

[hooks]
install = ["printf '%s:%s:%s' \"$MODSTAGE_MODULE\" \"$MODSTAGE_ENTRYPOINT\" \"$MODSTAGE_PARAM_DSN\" > installed.txt"]
"#,
    );

    let provider = CommandHandlerProvider::new(layout.root());
    let mut installer =
        Installer::open(&layout, MemoryReporter::new(), provider).expect("installer must open");
    assert!(installer
        .install_application(InstallFlags::ALL)
        .expect("install must run"));

    let written =
        fs::read_to_string(layout.root().join("installed.txt")).expect("hook output");
    assert_eq!(written, "core:index:sqlite");

    let _ = fs::remove_dir_all(layout.root());
}

#[cfg(unix)]
#[test]
fn failing_command_hook_aborts_the_entry_point() {
    let layout = test_layout();
    write_project(&layout, &[("index.php", "index.toml")]);
    write_config(&layout, "index.toml", &binding("core"));
    write_module(
        &layout,
        "core",
        "name = \"core\"\nversion = \"1.0\"\n\n[hooks]\ninstall = [\"exit 3\"]\n",
    );

    let provider = CommandHandlerProvider::new(layout.root());
    let mut installer =
        Installer::open(&layout, MemoryReporter::new(), provider).expect("installer must open");
    assert!(!installer
        .install_application(InstallFlags::ALL)
        .expect("install must run"));
    assert!(installer
        .reporter()
        .contains("install command 'exit 3' failed"));
    assert_eq!(
        disk_ledger(&layout).get_value("core.installed", "index"),
        Some("0")
    );

    let _ = fs::remove_dir_all(layout.root());
}

#[test]
fn parameter_names_become_env_vars() {
    assert_eq!(parameter_env_name("dsn"), "MODSTAGE_PARAM_DSN");
    assert_eq!(parameter_env_name("db-host.name"), "MODSTAGE_PARAM_DB_HOST_NAME");
}

#[test]
fn upgrade_steps_are_bounded_and_sorted() {
    let upgraders = ["1.4.0", "1.1.0", "2.0.0", "1.0.0", "1.2.0"]
        .into_iter()
        .map(|raw| Upgrader::new(v(raw), Box::new(Noop)))
        .collect::<Vec<_>>();

    let steps = select_upgrade_steps(upgraders, Some(&v("1.0.0")), &v("1.4.0"));
    let versions = steps
        .iter()
        .map(|step| step.version.to_string())
        .collect::<Vec<_>>();
    assert_eq!(versions, vec!["1.1.0", "1.2.0", "1.4.0"]);

    let all = select_upgrade_steps(
        vec![Upgrader::new(v("0.5.0"), Box::new(Noop)).with_date("2024-01-01")],
        None,
        &v("1.0.0"),
    );
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].date.as_deref(), Some("2024-01-01"));
}

#[test]
fn install_flags_combine_and_check_bits() {
    let flags = InstallFlags::INSTALL | InstallFlags::REMOVE;
    assert_eq!(flags.bits(), 5);
    assert!(flags.contains(InstallFlags::INSTALL));
    assert!(!flags.contains(InstallFlags::UPGRADE));
    assert!(InstallFlags::ALL.contains(flags));
    assert_eq!(InstallFlags::from_bits(0xff), InstallFlags::ALL);
    assert_eq!(InstallFlags::default(), InstallFlags::ALL);
}

#[test]
fn ledger_round_trips_scoped_values() {
    let layout = test_layout();
    let mut ledger = InstallLedger::open(layout.ledger_path()).expect("must open");
    assert_eq!(ledger.scopes().count(), 0);

    ledger.set_value("core.installed", "1", "index");
    ledger.set_value("core.version", "1.0.0", "index");
    ledger.set_value("stats.installed", "1", "admin");
    ledger.save().expect("must save");

    let mut reopened = disk_ledger(&layout);
    assert_eq!(reopened, ledger);
    assert_eq!(reopened.get_values("index").len(), 2);

    assert!(reopened.remove_value("stats.installed", "admin"));
    assert!(!reopened.remove_value("stats.installed", "admin"));
    assert_eq!(reopened.scopes().collect::<Vec<_>>(), vec!["index"]);
    assert!(!layout.ledger_path().with_extension("toml.tmp").exists());

    let _ = fs::remove_dir_all(layout.root());
}

#[test]
fn lock_is_released_on_drop() {
    let layout = test_layout();
    let lock = InstallLock::acquire(&layout.lock_path()).expect("must lock");
    assert_eq!(lock.path(), layout.lock_path());

    let err = InstallLock::acquire(&layout.lock_path()).expect_err("must be held");
    assert!(err.to_string().contains(&format!("pid={}", std::process::id())));

    drop(lock);
    InstallLock::acquire(&layout.lock_path()).expect("must lock again");

    let _ = fs::remove_dir_all(layout.root());
}

#[test]
fn entry_point_config_replacement_bumps_revision() {
    let layout = test_layout();
    core_and_blog(&layout);
    let project =
        ProjectManifest::load(&layout.project_manifest_path()).expect("project must load");
    let ledger = InstallLedger::open(layout.ledger_path()).expect("ledger must open");
    let mut context = EntryPointContext::load(&layout, &project.entrypoints[0], &ledger)
        .expect("entry point must load");
    assert_eq!(context.config_revision(), 0);
    assert!(!context.is_cli());

    context.replace_config(EntryPointConfig::default());
    assert_eq!(context.config_revision(), 1);
    assert!(context.config().modules.is_empty());
    assert_eq!(context.modules().len(), 2);

    context.reload_config().expect("must reload");
    assert_eq!(context.config_revision(), 2);
    assert_eq!(context.config().modules.len(), 2);

    let _ = fs::remove_dir_all(layout.root());
}

#[test]
fn descriptor_rejects_manifest_with_other_name() {
    let binding = modstage_core::ModuleBinding {
        name: "core".to_string(),
        path: "modules/core".to_string(),
        enabled: true,
        parameters: BTreeMap::new(),
    };
    let manifest = modstage_core::ModuleManifest::from_toml_str(
        "name = \"kernel\"\nversion = \"1.0\"\n",
    )
    .expect("manifest must parse");
    let err = ModuleDescriptor::new(&binding, manifest).expect_err("names differ");
    assert!(err.to_string().contains("declares the name 'kernel'"));
}

#[test]
fn hook_errors_render_key_and_params() {
    let err = HookError::installer("install.db.failed", vec!["core".into(), "pg".into()]);
    assert_eq!(err.to_string(), "install.db.failed (core, pg)");
    let bare = HookError::installer("install.db.failed", Vec::new());
    assert_eq!(bare.to_string(), "install.db.failed");
}

#[test]
fn messages_carry_stable_keys_and_severities() {
    let message = InstallMessage::ModuleUpgraded {
        module: "core".to_string(),
        version: v("1.2.0"),
    };
    assert_eq!(message.key(), "install.module.upgraded");
    assert_eq!(message.severity(), Severity::Ok);
    assert_eq!(message.to_string(), "module 'core' upgraded to 1.2.0");

    let conflict = InstallMessage::Conflict(modstage_resolver::ResolveError::DeletionConflict {
        item: "core".to_string(),
        dependent: "blog".to_string(),
    });
    assert_eq!(conflict.key(), "install.error.delete.dependency");
    assert_eq!(conflict.severity(), Severity::Error);
    assert_eq!(
        InstallMessage::EntryPointBadEnd("index".into()).severity(),
        Severity::Warning
    );
    assert_eq!(InstallMessage::NoModulesRequested.key(), "module.none.requested");
    assert_eq!(InstallMessage::NoModulesRequested.severity(), Severity::Notice);
}
