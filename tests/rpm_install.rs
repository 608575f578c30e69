// tests/rpm_install.rs

//! Integration tests for the RPM installer's step ordering and cleanup.

mod common;

use common::{RecordingMounter, RecordingRunner, failure, store_bytes, success, temp_store};
use std::cell::RefCell;
use std::fs;
use std::path::PathBuf;
use std::rc::Rc;
use tempfile::TempDir;
use treeforge::install::rpm::{PLACEHOLDER_MACHINE_ID, RpmInstaller, RpmOptions};
use treeforge::{ChecksumStore, Error, FILES_SOURCE, Invocation, RunContext, ToolConfig};

const DB_QUERY: &str = "bash\t(none)\t5.2.26\t1.fc40\tx86_64\tabcdef\t(none)\t0102\n\
                        filesystem\t(none)\t3.18\t8.fc40\tx86_64\t123456\t(none)\t(none)\n\
                        gpg-pubkey\t(none)\t18b8e74c\t62f2920f\t(none)\t(none)\t(none)\t(none)\n";

fn is_rpm(inv: &Invocation, flag: &str) -> bool {
    inv.program == "rpm" && inv.args.iter().any(|a| a == flag)
}

fn options(json: serde_json::Value) -> RpmOptions {
    serde_json::from_value(json).unwrap()
}

struct Fixture {
    _store_dir: TempDir,
    store: treeforge::DirStore,
    tree: TempDir,
    work: TempDir,
    tools: ToolConfig,
}

impl Fixture {
    fn new() -> Self {
        let (_store_dir, store) = temp_store();
        Self {
            _store_dir,
            store,
            tree: TempDir::new().unwrap(),
            work: TempDir::new().unwrap(),
            tools: ToolConfig::default(),
        }
    }

    fn ctx(&self) -> RunContext {
        RunContext::under(self.work.path())
    }
}

#[test]
fn test_full_install_sequence() {
    let fx = Fixture::new();
    let pkg_a = store_bytes(&fx.store, b"package a");
    let pkg_b = store_bytes(&fx.store, b"package b");

    let seen_manifest = Rc::new(RefCell::new(String::new()));
    let seen_machine_id = Rc::new(RefCell::new(String::new()));
    let manifest_capture = Rc::clone(&seen_manifest);
    let machine_id_capture = Rc::clone(&seen_machine_id);
    let machine_id_path = fx.tree.path().join("etc/machine-id");

    let runner = RecordingRunner::new()
        .on(
            |inv| is_rpm(inv, "--install"),
            move |inv| {
                let manifest = inv.args.last().unwrap();
                *manifest_capture.borrow_mut() = fs::read_to_string(manifest).unwrap();
                *machine_id_capture.borrow_mut() = fs::read_to_string(&machine_id_path).unwrap();
                success("")
            },
        )
        .on(|inv| is_rpm(inv, "--query"), |_| success(DB_QUERY));
    let mounter = RecordingMounter::new();

    let opts = options(serde_json::json!({
        "gpgkeys": ["-----BEGIN PGP PUBLIC KEY BLOCK-----"],
        "packages": [
            {"checksum": pkg_a.to_string(), "check_gpg": true},
            pkg_b.to_string(),
        ]
    }));

    let metadata = RpmInstaller::new(&fx.store, &runner, &mounter, &fx.tools)
        .install(&fx.ctx(), fx.tree.path(), &opts)
        .unwrap();

    // import -> checksig (only the package that asked) -> install -> query
    let calls = runner.calls();
    assert_eq!(calls.len(), 4);
    assert!(calls[0].args.iter().any(|a| a == "--import"));
    assert!(calls[1].args.iter().any(|a| a == "--checksig"));
    assert!(calls[1].args.last().unwrap().ends_with(&pkg_a.to_string()));
    assert!(is_rpm(&calls[2], "--install"));
    assert!(is_rpm(&calls[3], "--query"));

    // Transaction runs from the resolved directory against the manifest
    let resolved = fx.store.resolve(FILES_SOURCE, &[pkg_a.clone()]).unwrap();
    assert_eq!(calls[2].cwd.as_deref(), Some(resolved.as_path()));
    assert!(calls[2].args.iter().any(|a| a == "--nosignature"));
    assert!(calls[2].args.iter().any(|a| a == "--nodigest"));
    assert_eq!(
        seen_manifest.borrow().lines().collect::<Vec<_>>(),
        vec![pkg_a.to_string(), pkg_b.to_string()]
    );

    // Placeholder visible during the transaction, empty afterwards
    assert_eq!(*seen_machine_id.borrow(), PLACEHOLDER_MACHINE_ID);
    assert_eq!(fs::read_to_string(fx.tree.path().join("etc/machine-id")).unwrap(), "");

    // API filesystems were mounted and are all gone again
    assert_eq!(mounter.log().iter().filter(|l| l.starts_with("bind")).count(), 3);
    assert!(mounter.active().is_empty());

    // Records come from the database, not from the request
    let names: Vec<_> = metadata.packages.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, vec!["bash", "filesystem", "gpg-pubkey"]);
    assert_eq!(metadata.packages[0].siggpg.as_deref(), Some("0102"));
    assert_eq!(metadata.packages[2].arch, None);
}

#[test]
fn test_signature_failure_installs_nothing() {
    let fx = Fixture::new();
    let good = store_bytes(&fx.store, b"signed");
    let bad = store_bytes(&fx.store, b"tampered");
    let bad_name = bad.to_string();

    let runner = RecordingRunner::new().on(
        move |inv| inv.program == "rpmkeys" && inv.args.last().unwrap().ends_with(&bad_name),
        |_| failure("NOT OK: digests SIGNATURES NOT OK"),
    );
    let mounter = RecordingMounter::new();

    let opts = options(serde_json::json!({
        "gpgkeys": ["KEY"],
        "packages": [
            {"checksum": good.to_string(), "check_gpg": true},
            {"checksum": bad.to_string(), "check_gpg": true},
        ]
    }));

    let err = RpmInstaller::new(&fx.store, &runner, &mounter, &fx.tools)
        .install(&fx.ctx(), fx.tree.path(), &opts)
        .unwrap_err();

    match &err {
        Error::SignatureInvalid { checksum, stderr } => {
            assert_eq!(checksum, &bad.to_string());
            assert!(stderr.contains("NOT OK"));
        }
        other => panic!("unexpected error: {other}"),
    }

    assert!(mounter.log().is_empty());
    assert!(runner.calls().iter().all(|inv| !is_rpm(inv, "--install")));
    assert!(!fx.tree.path().join("etc/machine-id").exists());
}

#[test]
fn test_transaction_failure_releases_mounts() {
    let fx = Fixture::new();
    let pkg = store_bytes(&fx.store, b"conflicting package");

    let runner = RecordingRunner::new().fail("rpm", "--install", "file /usr/bin/x conflicts");
    let mounter = RecordingMounter::new();
    let opts = options(serde_json::json!({"packages": [pkg.to_string()]}));

    let err = RpmInstaller::new(&fx.store, &runner, &mounter, &fx.tools)
        .install(&fx.ctx(), fx.tree.path(), &opts)
        .unwrap_err();

    assert!(matches!(err, Error::Transaction { code: 1, .. }));
    assert!(err.to_string().contains("conflicts"));
    assert!(mounter.active().is_empty());
    assert_eq!(mounter.log().iter().filter(|l| l.starts_with("umount")).count(), 3);
    // No database query after a failed transaction
    assert!(runner.calls().iter().all(|inv| !is_rpm(inv, "--query")));
}

#[test]
fn test_missing_package_fails_before_verification() {
    let fx = Fixture::new();
    let present = store_bytes(&fx.store, b"present");
    let absent = "sha256:0000000000000000000000000000000000000000000000000000000000000000";

    let runner = RecordingRunner::new();
    let mounter = RecordingMounter::new();
    let opts = options(serde_json::json!({
        "gpgkeys": ["KEY"],
        "packages": [
            {"checksum": present.to_string(), "check_gpg": true},
            {"checksum": absent, "check_gpg": true},
        ]
    }));

    let err = RpmInstaller::new(&fx.store, &runner, &mounter, &fx.tools)
        .install(&fx.ctx(), fx.tree.path(), &opts)
        .unwrap_err();

    match &err {
        Error::ChecksumNotFound { missing, .. } => assert_eq!(missing, &vec![absent.to_string()]),
        other => panic!("unexpected error: {other}"),
    }
    // Keys were imported; nothing was checked or mounted
    assert_eq!(runner.calls_with("--import").len(), 1);
    assert!(runner.calls_with("--checksig").is_empty());
    assert!(mounter.log().is_empty());
}

#[test]
fn test_key_import_failure_stops_everything() {
    let fx = Fixture::new();
    let pkg = store_bytes(&fx.store, b"pkg");

    let runner = RecordingRunner::new().fail("rpmkeys", "--import", "invalid key");
    let mounter = RecordingMounter::new();
    let opts = options(serde_json::json!({
        "gpgkeys": ["BROKEN"],
        "packages": [{"checksum": pkg.to_string(), "check_gpg": true}]
    }));

    let err = RpmInstaller::new(&fx.store, &runner, &mounter, &fx.tools)
        .install(&fx.ctx(), fx.tree.path(), &opts)
        .unwrap_err();

    assert!(matches!(err, Error::KeyImport { index: 0, .. }));
    assert_eq!(runner.calls().len(), 1);
    assert!(mounter.log().is_empty());
}

#[test]
fn test_keys_only_batch_skips_transaction() {
    let fx = Fixture::new();
    let runner = RecordingRunner::new().on(
        |inv| is_rpm(inv, "--query"),
        |_| success("gpg-pubkey\t(none)\t18b8e74c\t62f2920f\t(none)\t(none)\t(none)\t(none)\n"),
    );
    let mounter = RecordingMounter::new();
    let opts = options(serde_json::json!({"gpgkeys": ["KEY"], "packages": []}));

    let metadata = RpmInstaller::new(&fx.store, &runner, &mounter, &fx.tools)
        .install(&fx.ctx(), fx.tree.path(), &opts)
        .unwrap();

    assert_eq!(runner.calls_with("--import").len(), 1);
    assert!(runner.calls().iter().all(|inv| !is_rpm(inv, "--install")));
    assert!(mounter.log().is_empty());
    assert!(!fx.tree.path().join("etc/machine-id").exists());
    assert_eq!(metadata.packages.len(), 1);
    assert_eq!(metadata.packages[0].name, "gpg-pubkey");
}

#[test]
fn test_existing_machine_id_kept_and_seed_removed() {
    let fx = Fixture::new();
    let pkg = store_bytes(&fx.store, b"systemd");
    let tree = fx.tree.path();

    fs::create_dir_all(tree.join("etc")).unwrap();
    fs::write(tree.join("etc/machine-id"), "5f3b0e7c9d6a4e1f8b2c3d4e5f6a7b8c\n").unwrap();

    // A scriptlet that seeds the RNG during the transaction
    let seed: PathBuf = tree.join("var/lib/systemd/random-seed");
    let seed_path = seed.clone();
    let runner = RecordingRunner::new().on(
        |inv| is_rpm(inv, "--install"),
        move |_| {
            fs::create_dir_all(seed_path.parent().unwrap()).unwrap();
            fs::write(&seed_path, [7u8; 32]).unwrap();
            success("")
        },
    );
    let mounter = RecordingMounter::new();
    let opts = options(serde_json::json!({"packages": [pkg.to_string()]}));

    let metadata = RpmInstaller::new(&fx.store, &runner, &mounter, &fx.tools)
        .install(&fx.ctx(), tree, &opts)
        .unwrap();

    assert!(metadata.packages.is_empty());
    assert!(!seed.exists());
    assert_eq!(
        fs::read_to_string(tree.join("etc/machine-id")).unwrap(),
        "5f3b0e7c9d6a4e1f8b2c3d4e5f6a7b8c\n"
    );
}
