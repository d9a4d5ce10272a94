mod common;

use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom};
use std::os::fd::AsFd;

use modproxy_client::{ModuleError, ModuleLoadState, map_code_segments};
use tempfile::TempDir;

use common::{deflated, stored, write_container};

static PRIMARY: [u8; 100] = [0xA1; 100];
static SECONDARY: [u8; 50] = [0xB2; 50];
static NATIVE: [u8; 10] = [0xC3; 10];

#[test]
fn test_maps_stored_dex_entries() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("module.apk");
    write_container(
        &path,
        &[
            stored("classes.dex", &PRIMARY),
            stored("classes2.dex", &SECONDARY),
            stored("lib.so", &NATIVE),
        ],
    );

    let file = File::open(&path).unwrap();
    let state = ModuleLoadState::new(path.to_string_lossy(), file.as_fd());
    let segments = map_code_segments(&state).unwrap();

    assert_eq!(segments.len(), 2);
    assert_eq!(segments[0].name(), "classes.dex");
    assert_eq!(segments[0].as_bytes(), &PRIMARY[..]);
    assert_eq!(segments[1].name(), "classes2.dex");
    assert_eq!(segments[1].as_bytes(), &SECONDARY[..]);

    let raw = fs::read(&path).unwrap();
    for segment in &segments {
        let start = segment.offset() as usize;
        assert_eq!(&raw[start..start + segment.len()], segment.as_bytes());
    }
}

#[test]
fn test_compressed_dex_is_skipped() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("module.apk");
    write_container(
        &path,
        &[
            deflated("classes.dex", &PRIMARY),
            stored("classes2.dex", &SECONDARY),
        ],
    );

    let file = File::open(&path).unwrap();
    let segments = ModuleLoadState::new("module.apk", file.as_fd())
        .map_dex_segments()
        .unwrap();

    assert_eq!(segments.len(), 1);
    assert_eq!(segments[0].name(), "classes2.dex");
}

#[test]
fn test_container_without_dex_maps_nothing() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("module.apk");
    write_container(
        &path,
        &[
            stored("lib.so", &NATIVE),
            stored("assets/classes.dex", &PRIMARY),
            stored("classes.dex.orig", &PRIMARY),
        ],
    );

    let file = File::open(&path).unwrap();
    let segments = ModuleLoadState::new("module.apk", file.as_fd())
        .map_dex_segments()
        .unwrap();
    assert!(segments.is_empty());
}

#[test]
fn test_empty_dex_is_mapped() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("module.apk");
    write_container(
        &path,
        &[stored("classes.dex", b""), stored("classes2.dex", &SECONDARY)],
    );

    let file = File::open(&path).unwrap();
    let segments = ModuleLoadState::new("module.apk", file.as_fd())
        .map_dex_segments()
        .unwrap();
    assert_eq!(segments.len(), 2);
    assert_eq!(segments[0].name(), "classes.dex");
    assert!(segments[0].is_empty());
    assert_eq!(segments[1].as_bytes(), &SECONDARY[..]);
}

#[test]
fn test_caller_descriptor_is_left_intact() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("module.apk");
    write_container(&path, &[stored("classes.dex", &PRIMARY)]);

    let mut file = File::open(&path).unwrap();
    file.seek(SeekFrom::Start(7)).unwrap();

    let segments = ModuleLoadState::new("module.apk", file.as_fd())
        .map_dex_segments()
        .unwrap();
    assert_eq!(segments.len(), 1);

    // Offset untouched and descriptor still open
    assert_eq!(file.stream_position().unwrap(), 7);
    let mut rest = Vec::new();
    file.read_to_end(&mut rest).unwrap();
    assert_eq!(rest.len() as u64, fs::metadata(&path).unwrap().len() - 7);

    // The mapping outlives the descriptor
    drop(file);
    assert_eq!(segments[0].as_bytes(), &PRIMARY[..]);
}

#[test]
fn test_directory_order_is_kept() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("module.apk");
    write_container(
        &path,
        &[
            stored("classes3.dex", &NATIVE),
            stored("classes.dex", &PRIMARY),
            stored("classes2.dex", &SECONDARY),
        ],
    );

    let file = File::open(&path).unwrap();
    let segments = ModuleLoadState::new("module.apk", file.as_fd())
        .map_dex_segments()
        .unwrap();
    let names: Vec<_> = segments.iter().map(|s| s.name()).collect();
    assert_eq!(names, ["classes3.dex", "classes.dex", "classes2.dex"]);
}

#[test]
fn test_not_a_container() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("module.apk");
    fs::write(&path, b"definitely not a zip archive").unwrap();

    let file = File::open(&path).unwrap();
    let result = ModuleLoadState::new("module.apk", file.as_fd()).map_dex_segments();
    assert!(matches!(result, Err(ModuleError::Zip(_))));
}
