use std::collections::BTreeMap;

use zip::write::SimpleFileOptions;

use super::*;

fn build_zip(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    for (name, data) in entries {
        writer.start_file(*name, options).expect("start entry");
        writer.write_all(data).expect("write entry");
    }
    writer.finish().expect("finish zip").into_inner()
}

fn tree(root: &Path) -> BTreeMap<String, Vec<u8>> {
    list_files(root)
        .expect("walk tree")
        .into_iter()
        .map(|path| {
            let name = relative_slash_path(&path, root).expect("relative name");
            let data = fs::read(&path).expect("read file");
            (name, data)
        })
        .collect()
}

fn small_limits() -> ArchiveLimits {
    ArchiveLimits {
        max_archive_bytes: 1024 * 1024,
        max_entries: 10,
        max_name_len: 32,
        max_entry_bytes: 1024,
        max_total_bytes: 2048,
    }
}

fn assert_rejected(
    bytes: &[u8],
    limits: ArchiveLimits,
    expected: impl Fn(&ArchiveSecurityError) -> bool,
) {
    let dest = tempfile::tempdir().expect("tempdir");
    let err = ArchiveGateway::new(limits)
        .extract(bytes, dest.path())
        .expect_err("archive should be rejected");
    match err {
        ArchiveError::Security(security) => assert!(expected(&security), "unexpected {security:?}"),
        other => panic!("expected a security error, got {other:?}"),
    }
    assert!(tree(dest.path()).is_empty(), "nothing may be written");
}

#[test]
fn pack_then_extract_reproduces_tree() {
    let src = tempfile::tempdir().expect("tempdir");
    let nested = src.path().join("Campaign 1").join("Radiometria");
    fs::create_dir_all(&nested).expect("mkdir");
    fs::write(src.path().join("top.txt"), b"top").expect("write");
    fs::write(nested.join("a_rad.txt"), b"1.0\n2.0\n").expect("write");
    fs::write(nested.join("empty.txt"), b"").expect("write");

    let gateway = ArchiveGateway::new(ArchiveLimits::default());
    let bytes = gateway
        .pack(src.path(), &[("metadata.json".to_string(), b"{}".to_vec())])
        .expect("pack");

    let dest = tempfile::tempdir().expect("tempdir");
    let count = gateway.extract(&bytes, dest.path()).expect("extract");
    assert_eq!(count, 4);

    let mut expected = tree(src.path());
    expected.insert("metadata.json".to_string(), b"{}".to_vec());
    assert_eq!(tree(dest.path()), expected);
}

#[test]
fn directory_entries_are_skipped_but_their_files_extracted() {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default();
    writer.add_directory("batch/", options).expect("dir");
    writer.start_file("batch/file1.txt", options).expect("file");
    writer.write_all(b"x").expect("write");
    let bytes = writer.finish().expect("finish").into_inner();

    let dest = tempfile::tempdir().expect("tempdir");
    let count = ArchiveGateway::new(ArchiveLimits::default())
        .extract(&bytes, dest.path())
        .expect("extract");
    assert_eq!(count, 1);
    assert_eq!(fs::read(dest.path().join("batch").join("file1.txt")).expect("read"), b"x");
}

#[test]
fn parent_segment_is_rejected() {
    let bytes = build_zip(&[("ok.txt", &b"fine"[..]), ("../evil.txt", &b"boom"[..])]);
    assert_rejected(&bytes, ArchiveLimits::default(), |err| {
        matches!(err, ArchiveSecurityError::PathTraversal { .. })
    });
}

#[test]
fn backslash_traversal_is_rejected() {
    let bytes = build_zip(&[("data\\..\\..\\evil.txt", &b"boom"[..])]);
    assert_rejected(&bytes, ArchiveLimits::default(), |err| {
        matches!(err, ArchiveSecurityError::PathTraversal { .. })
    });
}

#[test]
fn absolute_path_is_rejected() {
    let bytes = build_zip(&[("/etc/passwd", &b"root:x:0:0"[..])]);
    assert_rejected(&bytes, ArchiveLimits::default(), |err| {
        matches!(err, ArchiveSecurityError::AbsolutePath { name } if name == "/etc/passwd")
    });
}

#[test]
fn drive_letter_path_is_rejected() {
    let bytes = build_zip(&[("C:/Windows/win.ini", &b"x"[..])]);
    assert_rejected(&bytes, ArchiveLimits::default(), |err| {
        matches!(err, ArchiveSecurityError::AbsolutePath { .. })
    });
}

#[test]
fn symlink_entry_is_rejected() {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default();
    writer.start_file("plain.txt", options).expect("file");
    writer.write_all(b"plain").expect("write");
    writer
        .add_symlink("link", "/etc/passwd", options)
        .expect("symlink");
    let bytes = writer.finish().expect("finish").into_inner();

    assert_rejected(&bytes, ArchiveLimits::default(), |err| {
        matches!(err, ArchiveSecurityError::Symlink { name } if name == "link")
    });
}

#[test]
fn oversized_entry_is_rejected() {
    let big = vec![b'a'; 4096];
    let bytes = build_zip(&[("small.txt", &b"ok"[..]), ("big.txt", big.as_slice())]);
    assert_rejected(&bytes, small_limits(), |err| {
        matches!(err, ArchiveSecurityError::EntryTooLarge { name, .. } if name == "big.txt")
    });
}

#[test]
fn total_uncompressed_size_is_bounded() {
    let chunk = vec![b'z'; 1000];
    let bytes = build_zip(&[
        ("a.txt", chunk.as_slice()),
        ("b.txt", chunk.as_slice()),
        ("c.txt", chunk.as_slice()),
    ]);
    assert_rejected(&bytes, small_limits(), |err| {
        matches!(err, ArchiveSecurityError::TotalTooLarge { .. })
    });
}

#[test]
fn entry_count_is_bounded() {
    let names: Vec<String> = (0..11).map(|index| format!("f{index}.txt")).collect();
    let entries: Vec<(&str, &[u8])> = names.iter().map(|name| (name.as_str(), &b"x"[..])).collect();
    let bytes = build_zip(&entries);
    assert_rejected(&bytes, small_limits(), |err| {
        matches!(err, ArchiveSecurityError::TooManyEntries { count: 11, limit: 10 })
    });
}

#[test]
fn long_basename_is_rejected() {
    let name = format!("dir/{}.txt", "n".repeat(40));
    let bytes = build_zip(&[(name.as_str(), &b"x"[..])]);
    assert_rejected(&bytes, small_limits(), |err| {
        matches!(err, ArchiveSecurityError::NameTooLong { limit: 32, .. })
    });
}

#[test]
fn compressed_size_is_bounded() {
    let bytes = build_zip(&[("a.txt", &b"payload"[..])]);
    let limits = ArchiveLimits {
        max_archive_bytes: 8,
        ..ArchiveLimits::default()
    };
    assert_rejected(&bytes, limits, |err| {
        matches!(err, ArchiveSecurityError::ArchiveTooLarge { limit: 8, .. })
    });
}

#[test]
fn garbage_bytes_are_corrupt() {
    let dest = tempfile::tempdir().expect("tempdir");
    let err = ArchiveGateway::new(ArchiveLimits::default())
        .extract(b"definitely not a zip", dest.path())
        .expect_err("garbage");
    assert!(matches!(err, ArchiveError::Corrupt(_)));
}

#[test]
fn safe_join_refuses_escape_components() {
    let base = Path::new("/srv/in");
    assert_eq!(
        safe_join(base, Path::new("a/b.txt"), "a/b.txt").expect("inside"),
        PathBuf::from("/srv/in/a/b.txt")
    );
    assert!(safe_join(base, Path::new("../b.txt"), "../b.txt").is_err());
    assert!(safe_join(base, Path::new("/etc/passwd"), "/etc/passwd").is_err());
    assert!(safe_join(base, Path::new("."), ".").is_err());
}

#[test]
fn pack_skips_symlinks_in_source_tree() {
    let src = tempfile::tempdir().expect("tempdir");
    fs::write(src.path().join("real.txt"), b"real").expect("write");
    #[cfg(unix)]
    std::os::unix::fs::symlink(src.path().join("real.txt"), src.path().join("alias.txt"))
        .expect("symlink");

    let bytes = ArchiveGateway::new(ArchiveLimits::default())
        .pack(src.path(), &[])
        .expect("pack");
    let archive = ZipArchive::new(Cursor::new(bytes.as_slice())).expect("read back");
    let names: Vec<&str> = archive.file_names().collect();
    assert_eq!(names, vec!["real.txt"]);
}

/// Rewrites the uncompressed size recorded for `name` in both its local and
/// central headers, leaving the compressed stream untouched.
fn understate_size(bytes: &mut [u8], name: &str, declared: u32) {
    const LOCAL: [u8; 4] = [0x50, 0x4b, 0x03, 0x04];
    const CENTRAL: [u8; 4] = [0x50, 0x4b, 0x01, 0x02];
    let declared = declared.to_le_bytes();
    let mut patched = 0;
    for at in 0..bytes.len().saturating_sub(4) {
        let signature = &bytes[at..at + 4];
        let (size_at, name_at) = if signature == LOCAL {
            (at + 22, at + 30)
        } else if signature == CENTRAL {
            (at + 24, at + 46)
        } else {
            continue;
        };
        if bytes.get(name_at..name_at + name.len()) == Some(name.as_bytes()) {
            bytes[size_at..size_at + 4].copy_from_slice(&declared);
            patched += 1;
        }
    }
    assert_eq!(patched, 2, "both headers of {name} should be rewritten");
}

#[test]
fn copy_capped_stops_one_byte_past_the_cap() {
    let source = vec![7u8; 4096];
    let mut sink = Vec::new();
    let copied = copy_capped(source.as_slice(), &mut sink, 100).expect("copy");
    assert_eq!(copied, 101);
    assert_eq!(sink.len(), 101);

    let mut short = Vec::new();
    assert_eq!(copy_capped(&b"abc"[..], &mut short, 100).expect("copy"), 3);
}

#[test]
fn entry_inflating_past_declared_size_is_stopped_while_writing() {
    let padding = vec![0u8; 4096];
    let mut bytes = build_zip(&[("a.txt", &b"first entry"[..]), ("b.txt", padding.as_slice())]);
    understate_size(&mut bytes, "b.txt", 16);

    let limits = ArchiveLimits {
        max_entry_bytes: 100,
        max_total_bytes: 1024 * 1024,
        ..small_limits()
    };
    let dest = tempfile::tempdir().expect("tempdir");
    let err = ArchiveGateway::new(limits)
        .extract(&bytes, dest.path())
        .expect_err("inflated entry");
    assert!(
        matches!(
            err,
            ArchiveError::Security(ArchiveSecurityError::EntryTooLarge {
                ref name,
                size: 101,
                limit: 100,
            }) if name == "b.txt"
        ),
        "unexpected {err:?}"
    );
    assert!(tree(dest.path()).is_empty(), "written entries must be rolled back");
}

#[test]
fn inflated_bytes_count_against_the_total() {
    let padding = vec![0u8; 4096];
    let mut bytes = build_zip(&[("a.txt", &[1u8; 64][..]), ("b.txt", padding.as_slice())]);
    understate_size(&mut bytes, "b.txt", 16);

    let limits = ArchiveLimits {
        max_entry_bytes: 10_000,
        max_total_bytes: 1000,
        ..small_limits()
    };
    let dest = tempfile::tempdir().expect("tempdir");
    let err = ArchiveGateway::new(limits)
        .extract(&bytes, dest.path())
        .expect_err("total exceeded");
    assert!(
        matches!(
            err,
            ArchiveError::Security(ArchiveSecurityError::TotalTooLarge { total: 1001, limit: 1000 })
        ),
        "unexpected {err:?}"
    );
    assert!(tree(dest.path()).is_empty(), "written entries must be rolled back");
}
