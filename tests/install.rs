use std::fs;
use std::io::Write as _;
use std::path::Path;

use flate2::write::GzEncoder;
use flate2::Compression;
use sha2::{Digest as _, Sha256};

use leafpress_launcher_lib::binary::BinaryLocation;
use leafpress_launcher_lib::paths::LauncherPaths;
use leafpress_launcher_lib::platform::Platform;
use leafpress_launcher_lib::{commands, Launcher};

const RELEASE_PATH: &str = "/repos/leafpress-dev/leafpress/releases/latest";

/// Release archive with the binary nested under a versioned top directory.
fn release_archive(platform: &Platform, asset_name: &str) -> Vec<u8> {
    let inner = format!("leafpress-v1.3.0/{}", platform.executable_name);
    let body = b"#!/bin/sh\necho leafpress 1.3.0\n";

    if platform.is_windows() {
        let mut buf = std::io::Cursor::new(Vec::new());
        {
            let mut zip = zip::ZipWriter::new(&mut buf);
            let options = zip::write::SimpleFileOptions::default();
            zip.start_file(inner.as_str(), options).unwrap();
            zip.write_all(body).unwrap();
            zip.start_file("leafpress-v1.3.0/README.md", options).unwrap();
            zip.write_all(b"readme").unwrap();
            zip.finish().unwrap();
        }
        return buf.into_inner();
    }

    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut tar = tar::Builder::new(encoder);
    for (name, data, mode) in [
        (inner.as_str(), &body[..], 0o644),
        ("leafpress-v1.3.0/README.md", &b"readme"[..], 0o644),
    ] {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(mode);
        header.set_cksum();
        tar.append_data(&mut header, name, data).unwrap();
    }
    let gz = tar.into_inner().unwrap();
    let bytes = gz.finish().unwrap();
    assert!(asset_name.ends_with(".tar.gz"));
    bytes
}

fn asset_name(platform: &Platform) -> String {
    platform.archive_pattern.replace('*', "1.3.0")
}

#[tokio::test]
async fn missing_binary_is_installed_verified_and_executable() {
    let Ok(platform) = Platform::current() else {
        return;
    };
    let asset = asset_name(&platform);
    let archive = release_archive(&platform, &asset);
    let digest = hex::encode(Sha256::digest(&archive));

    let mut server = mockito::Server::new_async().await;
    let url = server.url();
    let release = serde_json::json!({
        "tag_name": "v1.3.0",
        "assets": [
            {
                "name": "checksums.txt",
                "browser_download_url": format!("{url}/download/checksums.txt"),
                "size": 1,
            },
            {
                "name": asset,
                "browser_download_url": format!("{url}/download/{asset}"),
                "size": archive.len(),
            },
        ],
    });

    let release_mock = server
        .mock("GET", RELEASE_PATH)
        .match_header("user-agent", "leafpress-launcher")
        .with_body(release.to_string())
        .expect(1)
        .create_async()
        .await;
    let _manifest = server
        .mock("GET", "/download/checksums.txt")
        .with_body(format!("{digest}  {asset}\n0000  other.zip\n"))
        .create_async()
        .await;
    let _asset = server
        .mock("GET", format!("/download/{asset}").as_str())
        .with_body(archive)
        .create_async()
        .await;

    let temp = tempfile::tempdir().unwrap();
    let paths = LauncherPaths::new(temp.path().join("install"), temp.path().join("vault"));
    fs::create_dir_all(paths.content_root()).unwrap();
    let launcher = Launcher::activate_with(paths, platform.clone(), url.as_str()).unwrap();

    let location = launcher.binary().resolve_path();
    let BinaryLocation::Managed(expected) = &location else {
        panic!("fresh install should use the managed binary");
    };
    assert!(!expected.exists());

    let installed = commands::install_binary(&launcher).await.unwrap();
    assert_eq!(&installed, expected);
    assert!(installed.exists());
    assert_no_archives_left(&launcher.paths().bin_dir());

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt as _;
        let mode = fs::metadata(&installed).unwrap().permissions().mode();
        assert_eq!(mode & 0o111, 0o111, "mode {mode:o} is not executable");
    }

    // Present now, so no second fetch.
    commands::install_binary(&launcher).await.unwrap();
    release_mock.assert_async().await;

    launcher.deactivate().await;
}

fn assert_no_archives_left(bin_dir: &Path) {
    let leftovers: Vec<_> = fs::read_dir(bin_dir)
        .unwrap()
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .filter(|name| name.ends_with(".tar.gz") || name.ends_with(".zip"))
        .collect();
    assert!(leftovers.is_empty(), "archives left behind: {leftovers:?}");
}
