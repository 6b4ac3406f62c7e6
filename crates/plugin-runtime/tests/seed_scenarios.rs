//! Cross-module seed end-to-end scenarios.
//!
//! Each test below is one literal scenario from the component design's
//! testable-properties section, exercised through the public crate surface
//! rather than any single module's internals.

use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sha2::{Digest, Sha256};

use plugin_runtime::context::Permission;
use plugin_runtime::extensions::{ConflictPolicy, ExtensionRegistry};
use plugin_runtime::hot_reload::{HostFlags, HotReloader, ReloadListener, ReloadStatus};
use plugin_runtime::lifecycle::LifecycleManager;
use plugin_runtime::loader::BundleLoader;
use plugin_runtime::registry::LifecycleState;
use plugin_runtime::revocation::{compute_fingerprint, RevocationList, RevokedCertificateEntry};
use plugin_runtime::signature::TrustPolicy;
use plugin_runtime::version::Version;

fn write_bundle(root: &std::path::Path, id: &str, deps_toml: &str) {
    let dir = root.join(id);
    fs::create_dir_all(&dir).unwrap();
    fs::write(
        dir.join("manifest.toml"),
        format!("id = \"{id}\"\nhuman_name = \"{id}\"\nversion = \"1.0.0\"\nmin_host_version = \"1.0.0\"\n{deps_toml}"),
    )
    .unwrap();
}

fn manager_at(root: &std::path::Path, data: &std::path::Path) -> LifecycleManager {
    let loader = BundleLoader::new(vec![root.to_path_buf()], TrustPolicy::default(), RevocationList::empty());
    LifecycleManager::new(Version::new(1, 0, 0), data.to_path_buf(), loader, vec![Permission::DataRead])
}

#[test]
fn scenario_1_happy_path_loads_in_dependency_order() {
    let root = tempfile::tempdir().unwrap();
    let data = tempfile::tempdir().unwrap();
    write_bundle(root.path(), "a", "");
    write_bundle(root.path(), "b", "[[dependencies]]\ntarget_id = \"a\"\nrange = \"^1.0.0\"\noptional = false\n");
    write_bundle(
        root.path(),
        "c",
        "[[dependencies]]\ntarget_id = \"a\"\nrange = \"^1.0.0\"\noptional = false\n[[dependencies]]\ntarget_id = \"b\"\nrange = \"^1.0.0\"\noptional = false\n",
    );

    let manager = manager_at(root.path(), data.path());
    let report = manager.initialize().unwrap();
    assert_eq!(report.load_order, vec!["a", "b", "c"]);
    for id in ["a", "b", "c"] {
        assert!(matches!(manager.registry().get(id).unwrap().state, LifecycleState::Loaded));
    }
}

#[test]
fn scenario_2_missing_required_dependency_blocks_and_fails() {
    let root = tempfile::tempdir().unwrap();
    let data = tempfile::tempdir().unwrap();
    write_bundle(root.path(), "a", "[[dependencies]]\ntarget_id = \"x\"\nrange = \"^1.0.0\"\noptional = false\n");

    let manager = manager_at(root.path(), data.path());
    let report = manager.initialize().unwrap();
    assert!(report.blocked["a"].contains("Missing required dependency"));
    assert!(matches!(manager.registry().get("a").unwrap().state, LifecycleState::Failed(_)));
}

#[test]
fn scenario_3_missing_optional_dependency_warns_but_loads() {
    let root = tempfile::tempdir().unwrap();
    let data = tempfile::tempdir().unwrap();
    write_bundle(root.path(), "a", "[[dependencies]]\ntarget_id = \"x\"\nrange = \"^1.0.0\"\noptional = true\n");

    let manager = manager_at(root.path(), data.path());
    let report = manager.initialize().unwrap();
    assert!(report.warnings.iter().any(|w| w.contains("Optional dependency missing")));
    assert!(matches!(manager.registry().get("a").unwrap().state, LifecycleState::Loaded));
}

#[test]
fn scenario_4_incompatible_version_blocks_dependent_only() {
    let root = tempfile::tempdir().unwrap();
    let data = tempfile::tempdir().unwrap();
    write_bundle(root.path(), "a", "");
    write_bundle(root.path(), "b", "[[dependencies]]\ntarget_id = \"a\"\nrange = \">=2.0.0\"\noptional = false\n");

    let manager = manager_at(root.path(), data.path());
    let report = manager.initialize().unwrap();
    assert!(report.blocked["b"].contains("version mismatch"));
    assert!(matches!(manager.registry().get("a").unwrap().state, LifecycleState::Loaded));
    assert!(matches!(manager.registry().get("b").unwrap().state, LifecycleState::Failed(_)));
}

#[test]
fn scenario_5_cycle_marks_all_participants_failed() {
    let root = tempfile::tempdir().unwrap();
    let data = tempfile::tempdir().unwrap();
    write_bundle(root.path(), "a", "[[dependencies]]\ntarget_id = \"b\"\nrange = \"^1.0.0\"\noptional = false\n");
    write_bundle(root.path(), "b", "[[dependencies]]\ntarget_id = \"c\"\nrange = \"^1.0.0\"\noptional = false\n");
    write_bundle(root.path(), "c", "[[dependencies]]\ntarget_id = \"a\"\nrange = \"^1.0.0\"\noptional = false\n");

    let manager = manager_at(root.path(), data.path());
    let err = manager.initialize().unwrap_err();
    assert_eq!(err.code(), "PLUGIN_RESOLVER_CIRCULAR_DEPENDENCY");
    for id in ["a", "b", "c"] {
        assert!(matches!(manager.registry().get(id).unwrap().state, LifecycleState::Failed(_)));
    }
}

#[test]
fn scenario_6_revoked_signer_rejects_bundle_before_registry_entry() {
    let root = tempfile::tempdir().unwrap();
    let data = tempfile::tempdir().unwrap();
    write_bundle(root.path(), "a", "");
    let bundle_dir = root.path().join("a");
    let manifest_bytes = fs::read(bundle_dir.join("manifest.toml")).unwrap();
    let manifest_digest = format!("sha256:{}", hex::encode(Sha256::digest(&manifest_bytes)));

    let signer_subject = "CN=Revoked Signer";
    let fingerprint = compute_fingerprint(signer_subject.as_bytes());
    let now = Utc::now();
    fs::write(
        bundle_dir.join("signature.toml"),
        format!(
            "manifest_digest = \"{manifest_digest}\"\n[[certificate_chain]]\nsubject = \"{signer_subject}\"\nnot_before = \"{}\"\nnot_after = \"{}\"\n",
            now - chrono::Duration::days(1),
            now + chrono::Duration::days(365),
        ),
    )
    .unwrap();

    let mut revocation_list = RevocationList::empty();
    revocation_list.revoke(RevokedCertificateEntry::new(&fingerprint, Some("compromised".into()), now).unwrap());

    write_bundle(root.path(), "b", "");

    let loader = BundleLoader::new(vec![root.path().to_path_buf()], TrustPolicy::default(), revocation_list);
    let manager = LifecycleManager::new(Version::new(1, 0, 0), data.path().to_path_buf(), loader, vec![]);

    let report = manager.initialize().unwrap();
    assert!(manager.registry().get("a").is_none());
    assert_eq!(report.load_order, vec!["b".to_string()]);
    assert!(matches!(manager.registry().get("b").unwrap().state, LifecycleState::Loaded));
}

#[test]
fn scenario_7_debounced_hot_reload_fires_once_with_full_sequence() {
    let root = tempfile::tempdir().unwrap();
    let data = tempfile::tempdir().unwrap();
    write_bundle(root.path(), "a", "");

    let manager = Arc::new(manager_at(root.path(), data.path()));
    manager.initialize().unwrap();
    manager.enable("a").unwrap();

    struct CountingListener {
        started: AtomicUsize,
        completed_success: AtomicUsize,
    }
    impl ReloadListener for CountingListener {
        fn on_event(&self, _bundle_id: &str, status: ReloadStatus) {
            match status {
                ReloadStatus::Started => {
                    self.started.fetch_add(1, Ordering::SeqCst);
                }
                ReloadStatus::Completed { success: true } => {
                    self.completed_success.fetch_add(1, Ordering::SeqCst);
                }
                ReloadStatus::Completed { success: false } => {}
            }
        }
    }
    let listener = Arc::new(CountingListener {
        started: AtomicUsize::new(0),
        completed_success: AtomicUsize::new(0),
    });

    let mut flags = HostFlags::default();
    flags.0.insert("plugin.hotreload".to_string(), "true".to_string());
    let reloader = HotReloader::new(Arc::clone(&manager), &flags, Duration::from_millis(500))
        .unwrap()
        .with_listener(listener.clone());

    reloader.register("a", root.path().join("a")).unwrap();
    reloader.start(root.path()).unwrap();

    fs::write(root.path().join("a").join("manifest.toml"), fs::read_to_string(root.path().join("a").join("manifest.toml")).unwrap()).unwrap();
    std::thread::sleep(Duration::from_millis(100));
    fs::write(root.path().join("a").join("manifest.toml"), fs::read_to_string(root.path().join("a").join("manifest.toml")).unwrap()).unwrap();

    std::thread::sleep(Duration::from_millis(1200));
    reloader.stop();

    assert_eq!(listener.started.load(Ordering::SeqCst), 1);
    assert_eq!(listener.completed_success.load(Ordering::SeqCst), 1);
    assert!(matches!(manager.registry().get("a").unwrap().state, LifecycleState::Enabled));
}

#[test]
fn scenario_8_extension_conflict_ordering() {
    let priority: ExtensionRegistry<&str> = ExtensionRegistry::new(ConflictPolicy::PriorityOrder);
    priority.register(Some("bundle-a"), "nav", Some(100), "a", "bundle(100)").unwrap();
    priority.register(None, "nav", Some(10), "host", "host(10)").unwrap();
    priority.register(Some("bundle-b"), "nav", Some(50), "b", "bundle(50)").unwrap();
    assert_eq!(priority.get("nav"), vec!["host(10)", "bundle(50)", "bundle(100)"]);

    let registration: ExtensionRegistry<&str> = ExtensionRegistry::new(ConflictPolicy::RegistrationOrder);
    registration.register(Some("bundle-a"), "nav", Some(100), "a", "first").unwrap();
    registration.register(None, "nav", Some(10), "host", "second").unwrap();
    registration.register(Some("bundle-b"), "nav", Some(50), "b", "third").unwrap();
    assert_eq!(registration.get("nav"), vec!["first", "second", "third"]);
}
