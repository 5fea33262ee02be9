use soul_launcher_core::launcher::launch::LaunchOptions;
use soul_launcher_core::launcher::Launcher;
use soul_launcher_core::ModLoader;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use zip::write::SimpleFileOptions;

struct TestRoots {
    _dir: TempDir,
    common: PathBuf,
    instances: PathBuf,
}

fn test_roots() -> TestRoots {
    let dir = tempfile::tempdir().unwrap();
    let common = dir.path().join("minecraft");
    let instances = dir.path().join("instances");
    TestRoots {
        common,
        instances,
        _dir: dir,
    }
}

fn launcher(roots: &TestRoots) -> Launcher {
    Launcher::new(roots.common.clone(), roots.instances.clone()).unwrap()
}

/// Builds a zip archive from (path, contents) pairs. Paths ending in '/'
/// become directories.
fn build_zip(target: &Path, entries: &[(&str, &str)]) -> PathBuf {
    let file = File::create(target).unwrap();
    let mut zip = zip::ZipWriter::new(file);
    let options = SimpleFileOptions::default();

    for (path, contents) in entries {
        if path.ends_with('/') {
            zip.add_directory(*path, options).unwrap();
        } else {
            zip.start_file(*path, options).unwrap();
            zip.write_all(contents.as_bytes()).unwrap();
        }
    }
    zip.finish().unwrap();
    target.to_path_buf()
}

#[tokio::test]
async fn install_flattens_wrapper_and_relocates_shared_assets() {
    let roots = test_roots();
    let launcher = launcher(&roots);

    let scratch = tempfile::tempdir().unwrap();
    let archive = build_zip(
        &scratch.path().join("pack.zip"),
        &[
            ("TestPack-1.0/mods/alpha.jar", "alpha"),
            ("TestPack-1.0/config/settings.toml", "threads = 4"),
            ("TestPack-1.0/versions/1.20.1/1.20.1.json", "{}"),
        ],
    );

    let outcome = launcher
        .install_instance_from_archive("Test Pack!", &archive)
        .await;
    assert!(outcome.success, "{:?}", outcome.error);

    let instance = outcome.path.unwrap();
    assert_eq!(instance, roots.instances.join("test_pack_"));

    // The wrapper folder is gone and its children were promoted.
    assert!(!instance.join("TestPack-1.0").exists());
    assert!(instance.join("mods/alpha.jar").exists());
    assert!(instance.join("config/settings.toml").exists());

    // Shared assets were copied into the common root, source left in place.
    assert!(roots.common.join("versions/1.20.1/1.20.1.json").exists());
    assert!(instance.join("versions/1.20.1/1.20.1.json").exists());
}

#[tokio::test]
async fn flatten_skips_archives_with_multiple_top_level_entries() {
    let roots = test_roots();
    let launcher = launcher(&roots);

    let scratch = tempfile::tempdir().unwrap();
    let archive = build_zip(
        &scratch.path().join("pack.zip"),
        &[
            ("mods/alpha.jar", "alpha"),
            ("config/settings.toml", "threads = 4"),
        ],
    );

    let outcome = launcher.install_instance_from_archive("Flat Pack", &archive).await;
    assert!(outcome.success);

    let instance = outcome.path.unwrap();
    assert!(instance.join("mods/alpha.jar").exists());
    assert!(instance.join("config/settings.toml").exists());
}

#[tokio::test]
async fn reinstall_replaces_mods_and_config_without_residue() {
    let roots = test_roots();
    let launcher = launcher(&roots);
    let scratch = tempfile::tempdir().unwrap();

    let first = build_zip(
        &scratch.path().join("first.zip"),
        &[
            ("mods/old-mod.jar", "old"),
            ("config/old.toml", "old"),
        ],
    );
    let outcome = launcher.install_instance_from_archive("My Pack", &first).await;
    assert!(outcome.success);
    let instance = outcome.path.unwrap();

    // A manual addition that the clean-overlay policy must remove.
    std::fs::write(instance.join("mods/manually-added.jar"), b"manual").unwrap();

    let second = build_zip(
        &scratch.path().join("second.zip"),
        &[
            ("mods/new-mod.jar", "new"),
            ("config/new.toml", "new"),
        ],
    );
    let outcome = launcher.install_instance_from_archive("My Pack", &second).await;
    assert!(outcome.success);

    assert!(instance.join("mods/new-mod.jar").exists());
    assert!(instance.join("config/new.toml").exists());
    assert!(!instance.join("mods/old-mod.jar").exists());
    assert!(!instance.join("mods/manually-added.jar").exists());
    assert!(!instance.join("config/old.toml").exists());
}

#[tokio::test]
async fn relocation_never_overwrites_existing_destination_files() {
    let roots = test_roots();
    let launcher = launcher(&roots);

    // Pre-existing shared asset with content "A".
    let shared = roots.common.join("libraries/org/example/lib.jar");
    std::fs::create_dir_all(shared.parent().unwrap()).unwrap();
    std::fs::write(&shared, b"A").unwrap();

    let scratch = tempfile::tempdir().unwrap();
    let archive = build_zip(
        &scratch.path().join("pack.zip"),
        &[
            ("libraries/org/example/lib.jar", "B"),
            ("mods/alpha.jar", "alpha"),
        ],
    );

    let outcome = launcher.install_instance_from_archive("Lib Pack", &archive).await;
    assert!(outcome.success, "{:?}", outcome.error);

    // First writer wins at the destination.
    assert_eq!(std::fs::read(&shared).unwrap(), b"A");
}

#[tokio::test]
async fn list_mods_returns_sorted_jars_and_tolerates_missing_folder() {
    let roots = test_roots();
    let launcher = launcher(&roots);

    let outcome = launcher.list_mods(7, "Ghost Pack").await;
    assert!(outcome.success);
    assert!(outcome.mods.is_empty());

    let mods_dir = roots.instances.join("real_pack").join("mods");
    std::fs::create_dir_all(&mods_dir).unwrap();
    std::fs::write(mods_dir.join("zeta.jar"), b"z").unwrap();
    std::fs::write(mods_dir.join("Alpha.JAR"), b"a").unwrap();
    std::fs::write(mods_dir.join("readme.txt"), b"not a mod").unwrap();

    let outcome = launcher.list_mods(8, "Real Pack").await;
    assert!(outcome.success);
    assert_eq!(outcome.mods, vec!["Alpha.JAR", "zeta.jar"]);
}

#[tokio::test]
async fn uninstall_removes_instance_directory() {
    let roots = test_roots();
    let launcher = launcher(&roots);

    let instance = roots.instances.join("doomed_pack");
    std::fs::create_dir_all(instance.join("mods")).unwrap();

    let outcome = launcher.uninstall_instance(3, "Doomed Pack").await;
    assert!(outcome.success);
    assert!(!instance.exists());

    // Uninstalling an absent instance still succeeds.
    let outcome = launcher.uninstall_instance(3, "Doomed Pack").await;
    assert!(outcome.success);
}

/// Answers every request with 404 and closes the connection, counting hits.
async fn failing_http_server(hits: Arc<AtomicUsize>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            hits.fetch_add(1, Ordering::SeqCst);
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;
            let _ = socket
                .write_all(
                    b"HTTP/1.1 404 Not Found\r\ncontent-length: 0\r\nconnection: close\r\n\r\n",
                )
                .await;
        }
    });
    format!("http://{}/pack.zip", addr)
}

#[tokio::test]
async fn failed_archive_download_is_not_retried() {
    let roots = test_roots();
    let launcher = launcher(&roots);

    let hits = Arc::new(AtomicUsize::new(0));
    let url = failing_http_server(hits.clone()).await;

    let outcome = launcher.install_instance(9, "Dead Pack", &url).await;
    assert!(!outcome.success);
    assert!(outcome.error.unwrap().contains("download"));
    // The first failure surfaces immediately, one request on the wire.
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn single_top_level_file_is_not_treated_as_wrapper() {
    let roots = test_roots();
    let launcher = launcher(&roots);

    let scratch = tempfile::tempdir().unwrap();
    let archive = build_zip(&scratch.path().join("pack.zip"), &[("README.txt", "docs")]);

    let outcome = launcher.install_instance_from_archive("Doc Pack", &archive).await;
    assert!(outcome.success, "{:?}", outcome.error);

    // Flattening only applies to a lone directory; a lone file stays put.
    let instance = outcome.path.unwrap();
    assert!(instance.join("README.txt").exists());
    assert_eq!(std::fs::read(instance.join("README.txt")).unwrap(), b"docs");
}

#[tokio::test]
async fn install_with_empty_url_fails_with_download_stage() {
    let roots = test_roots();
    let launcher = launcher(&roots);

    let outcome = launcher.install_instance(1, "Broken Pack", "").await;
    assert!(!outcome.success);
    assert!(outcome.error.unwrap().contains("download"));
}

#[tokio::test]
async fn launch_without_release_fails_synchronously() {
    let roots = test_roots();
    let launcher = launcher(&roots);

    let outcome = launcher
        .launch(LaunchOptions {
            name: "Steve".to_string(),
            uuid: "uuid".to_string(),
            access_token: "token".to_string(),
            release: "".to_string(),
            loader: ModLoader::Vanilla,
            instance_id: 1,
            instance_name: "Test Pack".to_string(),
            memory: Default::default(),
            aikar_flags: false,
        })
        .await;

    assert!(!outcome.success);
    assert!(outcome.error.unwrap().contains("version"));
    // No instance directory may appear as a side effect.
    assert!(!roots.instances.join("test_pack").exists());
}

#[tokio::test]
async fn display_names_differing_only_in_punctuation_share_an_instance() {
    let roots = test_roots();
    let launcher = launcher(&roots);
    let scratch = tempfile::tempdir().unwrap();

    let archive = build_zip(
        &scratch.path().join("pack.zip"),
        &[("mods/alpha.jar", "alpha"), ("config/a.toml", "a")],
    );

    let first = launcher.install_instance_from_archive("Sky Factory", &archive).await;
    let second = launcher.install_instance_from_archive("Sky-Factory", &archive).await;

    // Documented collision: sanitization is the filesystem identity.
    assert_eq!(first.path.unwrap(), second.path.unwrap());
}
