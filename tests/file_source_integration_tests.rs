// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use filesource::bounded_channel;
use filesource::sources::file::checkpoint::{FILE_POINTER_KEY, TAILED_FILE_KEY};
use filesource::sources::file::{
    ChannelListener, Checkpoint, Error, FileSource, FileSourceConfig, Record, RecordListener,
    Result,
};
use tempfile::TempDir;

fn options(root: &Path, pairs: &[(&str, &str)]) -> HashMap<String, String> {
    let mut opts: HashMap<String, String> = [
        ("uri", root.to_str().unwrap()),
        ("tail.poll.interval.ms", "10"),
        ("discovery.interval.ms", "10"),
    ]
    .iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();
    for (k, v) in pairs {
        opts.insert(k.to_string(), v.to_string());
    }
    opts
}

fn collector() -> (Arc<Mutex<Vec<Record>>>, Arc<dyn RecordListener>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let listener = move |r: Record| -> Result<()> {
        sink.lock().unwrap().push(r);
        Ok(())
    };
    let listener: Arc<dyn RecordListener> = Arc::new(listener);
    (seen, listener)
}

fn payloads(seen: &Arc<Mutex<Vec<Record>>>) -> Vec<String> {
    seen.lock()
        .unwrap()
        .iter()
        .map(|r| r.as_str_lossy().into_owned())
        .collect()
}

fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    cond()
}

fn start(opts: HashMap<String, String>) -> (FileSource, Arc<Mutex<Vec<Record>>>) {
    let config = FileSourceConfig::from_options(&opts).unwrap();
    let (seen, listener) = collector();
    let mut source = FileSource::new(config, listener).unwrap();
    source.connect().unwrap();
    (source, seen)
}

// Files dropped into a watched directory appear complete, the way producers
// usually publish them.
fn publish(dir: &TempDir, root: &Path, name: &str, content: &[u8]) -> PathBuf {
    let staging = dir.path().join(format!(".staging-{name}"));
    fs::write(&staging, content).unwrap();
    let target = root.join(name);
    fs::rename(&staging, &target).unwrap();
    target
}

fn append(path: &Path, content: &[u8]) {
    let mut f = OpenOptions::new().append(true).open(path).unwrap();
    f.write_all(content).unwrap();
    f.flush().unwrap();
}

#[test]
fn line_mode_delete_in_name_order() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("in");
    fs::create_dir(&root).unwrap();
    fs::write(root.join("b.log"), b"B\n").unwrap();
    fs::write(root.join("a.log"), b"A\n").unwrap();

    let (mut source, seen) = start(options(
        &root,
        &[("mode", "line"), ("tailing", "false"), ("action.after.process", "DELETE")],
    ));

    assert!(wait_for(|| payloads(&seen).len() == 2));
    assert!(wait_for(|| fs::read_dir(&root).unwrap().count() == 0));
    source.disconnect().unwrap();

    assert_eq!(payloads(&seen), vec!["A", "B"]);
    let records = seen.lock().unwrap();
    assert_eq!(records[0].path, root.join("a.log"));
    assert_eq!(records[0].offset, 0);
    assert_eq!(records[0].end_offset(), 2);
}

#[test]
fn text_full_mode_emits_whole_file() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("in");
    fs::create_dir(&root).unwrap();
    fs::write(root.join("doc.txt"), b"line1\nline2\n").unwrap();

    let (mut source, seen) = start(options(
        &root,
        &[("mode", "text.full"), ("action.after.process", "DELETE")],
    ));

    assert!(wait_for(|| !root.join("doc.txt").exists()));
    source.disconnect().unwrap();

    assert_eq!(payloads(&seen), vec!["line1\nline2\n"]);
}

#[test]
fn binary_full_mode_keeps_bytes() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("in");
    fs::create_dir(&root).unwrap();
    let content = [0u8, 159, 146, 150, b'\n', 0xff];
    fs::write(root.join("blob.bin"), content).unwrap();

    let (mut source, seen) = start(options(
        &root,
        &[("mode", "binary.full"), ("action.after.process", "DELETE")],
    ));

    assert!(wait_for(|| seen.lock().unwrap().len() == 1));
    source.disconnect().unwrap();

    assert_eq!(&seen.lock().unwrap()[0].payload[..], &content[..]);
}

#[test]
fn regex_mode_extracts_delimited_records() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("in");
    fs::create_dir(&root).unwrap();
    fs::write(root.join("events.txt"), b"{a}} noise {b}}").unwrap();

    let (mut source, seen) = start(options(
        &root,
        &[
            ("mode", "regex"),
            ("begin.regex", r"\{"),
            ("end.regex", r"\}\}"),
            ("tailing", "false"),
            ("action.after.process", "DELETE"),
        ],
    ));

    assert!(wait_for(|| !root.join("events.txt").exists()));
    source.disconnect().unwrap();

    assert_eq!(payloads(&seen), vec!["a", "b"]);
}

#[test]
fn long_lines_are_truncated_to_max_record_size() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("in");
    fs::create_dir(&root).unwrap();
    let mut content = vec![b'x'; 40];
    content.extend_from_slice(b"\nshort\n");
    fs::write(root.join("a.log"), &content).unwrap();

    let (mut source, seen) = start(options(
        &root,
        &[
            ("mode", "line"),
            ("tailing", "false"),
            ("action.after.process", "DELETE"),
            ("max.record.size", "16"),
            ("read.chunk.size", "8"),
        ],
    ));

    assert!(wait_for(|| !root.join("a.log").exists()));
    source.disconnect().unwrap();

    assert_eq!(payloads(&seen), vec!["x".repeat(16), "short".to_string()]);
    let records = seen.lock().unwrap();
    assert_eq!(records[1].offset, 41);
}

#[test]
fn tailing_follows_appends_and_checkpoints() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("in");
    fs::create_dir(&root).unwrap();
    let tailed = root.join("app.log");
    fs::write(&tailed, b"X\n").unwrap();

    let (mut source, seen) = start(options(&root, &[("mode", "line")]));

    assert!(wait_for(|| payloads(&seen) == vec!["X"]));
    assert!(wait_for(|| source.snapshot() == Checkpoint::new(2, Some(tailed.clone()))));

    append(&tailed, b"P\n");
    assert!(wait_for(|| payloads(&seen) == vec!["X", "P"]));
    assert!(wait_for(|| source.snapshot().offset == 4));

    append(&tailed, b"Q\n");
    assert!(wait_for(|| payloads(&seen) == vec!["X", "P", "Q"]));
    assert!(wait_for(|| source.snapshot().offset == 6));

    let state = source.snapshot_state();
    assert_eq!(state.get(FILE_POINTER_KEY).map(String::as_str), Some("6"));
    assert_eq!(
        state.get(TAILED_FILE_KEY).map(PathBuf::from),
        Some(tailed.clone())
    );

    source.disconnect().unwrap();
    assert!(tailed.exists());
}

#[test]
fn tailing_holds_back_partial_line() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("in");
    fs::create_dir(&root).unwrap();
    let tailed = root.join("app.log");
    fs::write(&tailed, b"one\ntw").unwrap();

    let (mut source, seen) = start(options(&root, &[("mode", "line")]));

    assert!(wait_for(|| payloads(&seen) == vec!["one"]));
    thread::sleep(Duration::from_millis(100));
    assert_eq!(payloads(&seen), vec!["one"]);
    assert_eq!(source.snapshot().offset, 4);

    append(&tailed, b"o\n");
    assert!(wait_for(|| payloads(&seen) == vec!["one", "two"]));
    source.disconnect().unwrap();
}

#[test]
fn restart_resumes_from_checkpoint() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("in");
    fs::create_dir(&root).unwrap();
    let tailed = root.join("app.log");
    fs::write(&tailed, b"AAA\nBBB\n").unwrap();

    let first_checkpoint = {
        let (mut source, seen) = start(options(&root, &[("mode", "line")]));
        assert!(wait_for(|| payloads(&seen) == vec!["AAA", "BBB"]));
        assert!(wait_for(|| source.snapshot().offset == 8));
        source.disconnect().unwrap();
        source.snapshot_state()
    };

    append(&tailed, b"CCC\n");

    let config = FileSourceConfig::from_options(&options(&root, &[("mode", "line")])).unwrap();
    let (seen, listener) = collector();
    let mut source = FileSource::new(config, listener).unwrap();
    source.restore_state(&first_checkpoint).unwrap();
    source.connect().unwrap();

    assert!(wait_for(|| payloads(&seen) == vec!["CCC"]));
    thread::sleep(Duration::from_millis(100));
    source.disconnect().unwrap();

    assert_eq!(payloads(&seen), vec!["CCC"]);
    assert_eq!(seen.lock().unwrap()[0].offset, 8);
}

#[test]
fn restore_mid_file_offset() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("in");
    fs::create_dir(&root).unwrap();
    let tailed = root.join("app.log");
    fs::write(&tailed, b"AAA\nBBB\n").unwrap();

    let config = FileSourceConfig::from_options(&options(&root, &[("mode", "line")])).unwrap();
    let (seen, listener) = collector();
    let mut source = FileSource::new(config, listener).unwrap();
    source
        .restore(Checkpoint::new(4, Some(tailed.clone())))
        .unwrap();
    source.connect().unwrap();

    assert!(wait_for(|| payloads(&seen) == vec!["BBB"]));
    source.disconnect().unwrap();
}

#[test]
fn tailed_file_is_never_post_processed() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("in");
    fs::create_dir(&root).unwrap();
    fs::write(root.join("a.log"), b"tail-1\n").unwrap();
    fs::write(root.join("b.log"), b"other-1\nother-2\n").unwrap();

    let (mut source, seen) = start(options(
        &root,
        &[("mode", "line"), ("action.after.process", "DELETE")],
    ));

    assert!(wait_for(|| !root.join("b.log").exists()));
    assert!(wait_for(|| payloads(&seen).len() == 3));

    let late = publish(&dir, &root, "c.log", b"late\n");
    assert!(wait_for(|| !late.exists()));

    source.disconnect().unwrap();

    let mut got = payloads(&seen);
    got.sort();
    assert_eq!(got, vec!["late", "other-1", "other-2", "tail-1"]);
    assert!(root.join("a.log").exists());
    assert_eq!(source.snapshot().tailed_file, Some(root.join("a.log")));
}

#[test]
fn move_defaults_to_sibling_read_directory() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("in");
    fs::create_dir(&root).unwrap();
    fs::write(root.join("a.txt"), b"hello\n").unwrap();

    let (mut source, seen) = start(options(
        &root,
        &[("mode", "line"), ("tailing", "false"), ("action.after.process", "MOVE")],
    ));

    let moved = dir.path().join("read").join("a.txt");
    assert!(wait_for(|| moved.exists()));
    source.disconnect().unwrap();

    assert!(!root.join("a.txt").exists());
    assert_eq!(fs::read(&moved).unwrap(), b"hello\n");
    assert_eq!(payloads(&seen), vec!["hello"]);
}

#[test]
fn move_to_explicit_target() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("in");
    let done = dir.path().join("archive").join("done");
    fs::create_dir(&root).unwrap();
    fs::write(root.join("a.txt"), b"x\n").unwrap();

    let (mut source, _seen) = start(options(
        &root,
        &[
            ("mode", "text.full"),
            ("action.after.process", "move"),
            ("move.after.process", done.to_str().unwrap()),
        ],
    ));

    assert!(wait_for(|| done.join("a.txt").exists()));
    source.disconnect().unwrap();
    assert!(!dir.path().join("read").exists());
}

#[test]
fn records_flow_through_bounded_channel() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("in");
    fs::create_dir(&root).unwrap();
    fs::write(root.join("a.log"), b"1\n2\n3\n").unwrap();

    let config = FileSourceConfig::from_options(&options(
        &root,
        &[("mode", "line"), ("tailing", "false"), ("action.after.process", "DELETE")],
    ))
    .unwrap();
    let (tx, rx) = bounded_channel::bounded(1);
    let mut source = FileSource::new(config, Arc::new(ChannelListener::new(tx))).unwrap();
    source.connect().unwrap();

    let mut got = Vec::new();
    while got.len() < 3 {
        match rx.recv_timeout(Duration::from_secs(10)) {
            bounded_channel::RecvTimeout::Item(record) => {
                got.push(record.as_str_lossy().into_owned())
            }
            bounded_channel::RecvTimeout::Timeout => panic!("timed out waiting for record"),
            bounded_channel::RecvTimeout::Disconnected => panic!("record channel closed"),
        }
    }

    assert!(wait_for(|| !root.join("a.log").exists()));
    source.disconnect().unwrap();
    assert_eq!(got, vec!["1", "2", "3"]);
}

#[test]
fn invalid_option_combinations() {
    let dir = TempDir::new().unwrap();
    let root = dir.path();

    let cases: Vec<Vec<(&str, &str)>> = vec![
        vec![("mode", "text.full"), ("tailing", "true")],
        vec![("mode", "line"), ("tailing", "false")],
        vec![("mode", "xml"), ("action.after.process", "DELETE")],
        vec![("mode", "line"), ("action.after.process", "ARCHIVE")],
        vec![("mode", "line"), ("tailing", "maybe")],
        vec![("mode", "regex"), ("begin.regex", "(")],
    ];
    for case in cases {
        let res = FileSourceConfig::from_options(&options(root, &case));
        assert!(
            matches!(res, Err(Error::Config(_))),
            "expected config error for {case:?}"
        );
    }

    let mut no_uri = options(root, &[("mode", "line")]);
    no_uri.remove("uri");
    assert!(FileSourceConfig::from_options(&no_uri).is_err());

    let mut remote = options(root, &[("mode", "line")]);
    remote.insert("uri".to_string(), "s3://bucket/logs".to_string());
    assert!(FileSourceConfig::from_options(&remote).is_err());
}

#[test]
fn file_uri_is_accepted() {
    let dir = TempDir::new().unwrap();
    let uri = format!("file://{}", dir.path().display());
    let mut opts = options(dir.path(), &[("mode", "line")]);
    opts.insert("uri".to_string(), uri);

    let config = FileSourceConfig::from_options(&opts).unwrap();
    assert_eq!(config.root, dir.path());
}
