//! Batch round-trip checks over real files on disk.

use std::fs;
use tempfile::tempdir;
use treewire::json::{check_print_idempotence, parse, print};
use treewire::tree::NodeArena;
use treewire::WireError;

const SAMPLES: &[(&str, &str)] = &[
    ("minimal.json", "null"),
    ("config.json", "// app config\n{\n  \"name\": \"svc\",\n  \"port\": 8080,\n  \"tags\": [\"a\", \"b\"]\n}\n"),
    ("comments.json", "/* top */ { \"k\": /* mid */ [1, 2] } // end"),
    ("empty.json", "{\n  // nothing yet\n}\n"),
    ("unicode.json", "{\"gr\u{00fc}n\": \"\u{2603}\"}\n"),
    ("no_trailing_newline.json", "[1,2,3]"),
];

#[test]
fn test_files_round_trip_byte_for_byte() {
    let dir = tempdir().unwrap();
    for (name, text) in SAMPLES {
        let path = dir.path().join(name);
        fs::write(&path, text).unwrap();

        let read_back = fs::read_to_string(&path).unwrap();
        let mut arena = NodeArena::new();
        let root = parse(&mut arena, name, &read_back).unwrap();
        assert_eq!(print(&arena, root), *text, "lossy round trip for {name}");
        check_print_idempotence(&arena, root, name).unwrap();
    }
}

#[test]
fn test_malformed_file_reports_path_and_offset() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("broken.json");
    fs::write(&path, "{\"a\": }").unwrap();

    let text = fs::read_to_string(&path).unwrap();
    let mut arena = NodeArena::new();
    match parse(&mut arena, "broken.json", &text) {
        Err(WireError::Encoding {
            path,
            offset,
            message,
        }) => {
            assert_eq!(path, "broken.json");
            assert_eq!(offset, 6);
            assert!(!message.is_empty());
        }
        other => panic!("expected an encoding error, got {other:?}"),
    }
}

#[test]
fn test_one_bad_file_does_not_poison_the_batch() {
    let dir = tempdir().unwrap();
    let files = [
        ("good_a.json", "[1]", true),
        ("bad.json", "[1,", false),
        ("good_b.json", "{\"x\": true}", true),
    ];
    for (name, text, _) in &files {
        fs::write(dir.path().join(name), text).unwrap();
    }

    let mut ok = 0;
    let mut failed = 0;
    for (name, _, expect_ok) in &files {
        let text = fs::read_to_string(dir.path().join(name)).unwrap();
        let mut arena = NodeArena::new();
        match parse(&mut arena, name, &text) {
            Ok(root) => {
                check_print_idempotence(&arena, root, name).unwrap();
                ok += 1;
                assert!(expect_ok, "{name} parsed unexpectedly");
            }
            Err(_) => {
                failed += 1;
                assert!(!expect_ok, "{name} failed unexpectedly");
            }
        }
    }
    assert_eq!((ok, failed), (2, 1));
}
