#![expect(clippy::indexing_slicing, reason = "test")]

use {
    super::*,
    crate::{
        address::tests::{FAST_KDF, ScriptedSalts},
        batch::tests::ScriptedPrompt,
        conflict::{ConflictChoice, ConflictPolicy},
        progress::{CancelFlag, NoProgress, ProgressSink},
    },
    blobcrypt_format::Salt,
    std::fs,
    tempfile::TempDir,
};

const OPTIONS: ArchiveOptions = ArchiveOptions {
    cipher: CipherKind::XChaCha20Poly1305,
    address_kdf: FAST_KDF,
};

struct Fixture {
    dir: TempDir,
    key: ArchiveKey,
}

impl Fixture {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("archive")).unwrap();
        fs::create_dir(dir.path().join("src")).unwrap();
        Self {
            dir,
            key: ArchiveKey::generate().unwrap(),
        }
    }

    fn archive_dir(&self) -> PathBuf {
        self.dir.path().join("archive")
    }

    fn container(&self) -> PathBuf {
        self.archive_dir().join("container.bca")
    }

    fn out_dir(&self) -> PathBuf {
        self.dir.path().join("out")
    }

    fn archive(&self) -> Archive {
        Archive::new(self.archive_dir(), OPTIONS)
    }

    fn item(&self, path: &str, content: &[u8]) -> AddItem {
        let source = self.dir.path().join("src").join(path.replace('/', "_"));
        fs::write(&source, content).unwrap();
        AddItem {
            source,
            path: EntryPath::new(path).unwrap(),
        }
    }

    fn files_in_archive_dir(&self) -> usize {
        fs::read_dir(self.archive_dir()).unwrap().count()
    }
}

fn options<'a>(
    prompt: &'a mut ScriptedPrompt,
    progress: &'a mut dyn ProgressSink,
) -> BatchOptions<'a> {
    BatchOptions {
        prompt,
        progress,
        cancel: CancelFlag::new(),
        conflict_policy: ConflictPolicy::Ask,
    }
}

fn add(archive: &mut Archive, key: &ArchiveKey, items: &[AddItem]) -> BatchSummary {
    let mut prompt = ScriptedPrompt::default();
    let summary = archive
        .add_files(items, key, options(&mut prompt, &mut NoProgress))
        .unwrap();
    assert!(summary.failed.is_empty(), "{:?}", summary.failed);
    summary
}

fn all_indices(archive: &Archive) -> Vec<usize> {
    (0..archive.entries().len()).collect()
}

fn flip_last_byte(path: &Path) {
    let mut data = fs::read(path).unwrap();
    let last = data.len() - 1;
    data[last] ^= 0x01;
    fs::write(path, data).unwrap();
}

#[test]
fn add_write_read_extract() {
    let fixture = Fixture::new();
    let mut archive = fixture.archive();
    let items = [
        fixture.item("notes.txt", b"first"),
        fixture.item("docs/report.txt", &b"report ".repeat(10_000)),
        fixture.item("docs/empty", b""),
    ];
    let summary = add(&mut archive, &fixture.key, &items);
    assert_eq!(summary.succeeded, 3);
    assert_eq!(fixture.files_in_archive_dir(), 3);
    archive.write(&fixture.container(), &fixture.key).unwrap();

    let (opened, dropped) = Archive::read(&fixture.container(), &fixture.key, OPTIONS).unwrap();
    assert!(dropped.is_empty());
    assert_eq!(opened.entries(), archive.entries());
    assert_eq!(opened.hash(), archive.hash());
    assert_eq!(opened.total_size(), 5 + 70_000);

    let mut prompt = ScriptedPrompt::default();
    let summary = opened
        .extract_files(
            &all_indices(&opened),
            &fixture.out_dir(),
            &fixture.key,
            options(&mut prompt, &mut NoProgress),
        )
        .unwrap();
    assert_eq!(summary.succeeded, 3);
    for (item, entry) in items.iter().zip(opened.entries()) {
        let extracted = entry.path.to_local(&fixture.out_dir());
        assert_eq!(fs::read(&extracted).unwrap(), fs::read(&item.source).unwrap());
        let modified = fs::metadata(&extracted).unwrap().modified().unwrap();
        assert_eq!(DateTimeUtc::from(modified), entry.modified_at);
    }
}

#[test]
fn aes_siv_archive() {
    let fixture = Fixture::new();
    let options_siv = ArchiveOptions {
        cipher: CipherKind::Aes256Siv,
        ..OPTIONS
    };
    let mut archive = Archive::new(fixture.archive_dir(), options_siv);
    add(&mut archive, &fixture.key, &[fixture.item("a", b"content")]);
    archive.write(&fixture.container(), &fixture.key).unwrap();

    let (opened, _) = Archive::read(&fixture.container(), &fixture.key, options_siv).unwrap();
    let mut prompt = ScriptedPrompt::default();
    let report = opened
        .validate_files(&[0], &fixture.key, options(&mut prompt, &mut NoProgress))
        .unwrap();
    assert!(report.failed.is_empty());

    let restricted = fixture
        .key
        .clone()
        .with_allowed_ciphers(vec![CipherKind::XChaCha20Poly1305]);
    Archive::read(&fixture.container(), &restricted, options_siv).unwrap_err();
}

#[test]
fn read_with_wrong_key() {
    let fixture = Fixture::new();
    let mut archive = fixture.archive();
    add(&mut archive, &fixture.key, &[fixture.item("a", b"1")]);
    archive.write(&fixture.container(), &fixture.key).unwrap();

    let other = ArchiveKey::generate().unwrap();
    let err = Archive::read(&fixture.container(), &other, OPTIONS).unwrap_err();
    assert_eq!(ErrorKind::of(&err), ErrorKind::Key);
}

#[test]
fn container_damage_is_key_error() {
    let fixture = Fixture::new();
    let mut archive = fixture.archive();
    add(&mut archive, &fixture.key, &[fixture.item("a", b"1"), fixture.item("b/c", b"2")]);
    archive.write(&fixture.container(), &fixture.key).unwrap();
    let original = fs::read(fixture.container()).unwrap();

    // Stream header (6 bytes) and the block length prefix (4 bytes) come first.
    for index in 10..original.len() {
        let mut data = original.clone();
        data[index] ^= 0x20;
        fs::write(fixture.container(), &data).unwrap();
        let err = Archive::read(&fixture.container(), &fixture.key, OPTIONS).unwrap_err();
        assert_eq!(ErrorKind::of(&err), ErrorKind::Key, "byte {index}");
    }
}

#[test]
fn container_cut_after_header_is_key_error() {
    let fixture = Fixture::new();
    let mut archive = fixture.archive();
    add(&mut archive, &fixture.key, &[fixture.item("a", b"1")]);
    archive.write(&fixture.container(), &fixture.key).unwrap();

    // Only the stream header is left, so every block is gone and the stream still
    // decrypts to an empty container.
    let data = fs::read(fixture.container()).unwrap();
    fs::write(fixture.container(), &data[..6]).unwrap();
    let err = Archive::read(&fixture.container(), &fixture.key, OPTIONS).unwrap_err();
    assert_eq!(ErrorKind::of(&err), ErrorKind::Key);
}

#[test]
fn missing_blobs_are_dropped_on_read() {
    let fixture = Fixture::new();
    let mut archive = fixture.archive();
    add(
        &mut archive,
        &fixture.key,
        &[fixture.item("a", b"1"), fixture.item("b", b"2"), fixture.item("c", b"3")],
    );
    archive.write(&fixture.container(), &fixture.key).unwrap();
    fs::remove_file(archive.blob_path(&archive.entries()[1])).unwrap();

    let (opened, dropped) = Archive::read(&fixture.container(), &fixture.key, OPTIONS).unwrap();
    assert_eq!(dropped, [EntryPath::new("b").unwrap()]);
    let paths: Vec<&str> = opened.entries().iter().map(|e| e.path.as_str()).collect();
    assert_eq!(paths, ["a", "c"]);
}

#[test]
fn colliding_salts_get_fresh_addresses() {
    let fixture = Fixture::new();
    let s0 = Salt([1; 32]);
    let s1 = Salt([2; 32]);
    let s2 = Salt([3; 32]);
    let entropy = ScriptedSalts::new([s0, s0, s0, s1, s1, s2]);
    let mut archive = fixture.archive().with_entropy(Box::new(entropy));

    for path in ["x", "y", "z"] {
        add(&mut archive, &fixture.key, &[fixture.item(path, b"same content")]);
    }
    let salts: Vec<Salt> = archive.entries().iter().map(|e| e.salt).collect();
    assert_eq!(salts, [s0, s1, s2]);
    let addresses: HashSet<Address> = archive.entries().iter().map(|e| e.address).collect();
    assert_eq!(addresses.len(), 3);
    assert_eq!(fixture.files_in_archive_dir(), 3);
}

#[test]
fn replace_all_is_sticky() {
    let fixture = Fixture::new();
    let mut archive = fixture.archive();
    add(
        &mut archive,
        &fixture.key,
        &[fixture.item("f2", b"old 2"), fixture.item("f4", b"old 4")],
    );

    let batch = [
        fixture.item("f1", b"new 1"),
        fixture.item("f2", b"new 2!"),
        fixture.item("f3", b"new 3"),
        fixture.item("f4", b"new 4!"),
        fixture.item("f5", b"new 5"),
    ];
    let mut prompt = ScriptedPrompt::with_choices([ConflictChoice::ReplaceAll]);
    let summary = archive
        .add_files(&batch, &fixture.key, options(&mut prompt, &mut NoProgress))
        .unwrap();
    assert_eq!(prompt.conflicts, ["f2"]);
    assert_eq!(summary.succeeded, 5);
    assert_eq!(archive.entries().len(), 5);
    // replaced blobs are deleted
    assert_eq!(fixture.files_in_archive_dir(), 5);

    let indices = archive
        .indices_of(&[EntryPath::new("f2").unwrap(), EntryPath::new("f4").unwrap()])
        .unwrap();
    let mut prompt = ScriptedPrompt::default();
    archive
        .extract_files(
            &indices,
            &fixture.out_dir(),
            &fixture.key,
            options(&mut prompt, &mut NoProgress),
        )
        .unwrap();
    assert_eq!(fs::read(fixture.out_dir().join("f2")).unwrap(), b"new 2!");
    assert_eq!(fs::read(fixture.out_dir().join("f4")).unwrap(), b"new 4!");
}

#[test]
fn skip_and_cancel_conflicts() {
    let fixture = Fixture::new();
    let mut archive = fixture.archive();
    add(&mut archive, &fixture.key, &[fixture.item("a", b"old")]);
    let old = archive.entries()[0].clone();

    let mut prompt = ScriptedPrompt::with_choices([ConflictChoice::Skip]);
    let summary = archive
        .add_files(
            &[fixture.item("a", b"new")],
            &fixture.key,
            options(&mut prompt, &mut NoProgress),
        )
        .unwrap();
    assert_eq!(summary.skipped, 1);
    assert_eq!(archive.entries()[0], old);

    let mut prompt = ScriptedPrompt::with_choices([ConflictChoice::Cancel]);
    let summary = archive
        .add_files(
            &[fixture.item("b", b"b"), fixture.item("a", b"new"), fixture.item("c", b"c")],
            &fixture.key,
            options(&mut prompt, &mut NoProgress),
        )
        .unwrap();
    assert!(summary.cancelled);
    let paths: Vec<&str> = archive.entries().iter().map(|e| e.path.as_str()).collect();
    assert_eq!(paths, ["a", "b"]);
    assert_eq!(archive.entries()[0], old);
}

#[test]
fn configured_policy_skips_without_prompt() {
    let fixture = Fixture::new();
    let mut archive = fixture.archive();
    add(&mut archive, &fixture.key, &[fixture.item("a", b"old")]);
    let mut prompt = ScriptedPrompt::default();
    let summary = archive
        .add_files(
            &[fixture.item("a", b"new")],
            &fixture.key,
            BatchOptions {
                prompt: &mut prompt,
                progress: &mut NoProgress,
                cancel: CancelFlag::new(),
                conflict_policy: ConflictPolicy::SkipAll,
            },
        )
        .unwrap();
    assert_eq!(summary.skipped, 1);
    assert!(prompt.conflicts.is_empty());
}

struct CancelOnStart(CancelFlag);

impl ProgressSink for CancelOnStart {
    fn on_progress(&mut self, _unit: usize, _fraction: f64) {
        self.0.raise();
    }
}

#[test]
fn cancelled_add_leaves_no_temp_file() {
    let fixture = Fixture::new();
    let mut archive = fixture.archive();
    let cancel = CancelFlag::new();
    let mut progress = CancelOnStart(cancel.clone());
    let mut prompt = ScriptedPrompt::default();
    let summary = archive
        .add_files(
            &[fixture.item("a", b"content"), fixture.item("b", b"content")],
            &fixture.key,
            BatchOptions {
                prompt: &mut prompt,
                progress: &mut progress,
                cancel,
                conflict_policy: ConflictPolicy::Ask,
            },
        )
        .unwrap();
    assert!(summary.cancelled);
    assert_eq!(summary.processed, 0);
    assert!(archive.entries().is_empty());
    assert_eq!(fixture.files_in_archive_dir(), 0);
    assert!(prompt.continue_asked.is_empty());
}

#[test]
fn partial_delete_keeps_index_change() {
    let fixture = Fixture::new();
    let mut archive = fixture.archive();
    add(
        &mut archive,
        &fixture.key,
        &[fixture.item("a", b"1"), fixture.item("b", b"2"), fixture.item("c", b"3")],
    );
    // A non-empty directory in place of the blob can't be removed as a file.
    let blob = archive.blob_path(&archive.entries()[1]);
    fs::remove_file(&blob).unwrap();
    fs::create_dir(&blob).unwrap();
    fs::write(blob.join("keep"), "x").unwrap();

    let report = archive.delete_files(&[0, 1, 2]).unwrap();
    assert!(archive.entries().is_empty());
    assert_eq!(report.removed.len(), 3);
    assert_eq!(report.not_deleted, [EntryPath::new("b").unwrap()]);
    assert_eq!(fixture.files_in_archive_dir(), 1);
}

#[test]
fn delete_rejects_bad_index() {
    let fixture = Fixture::new();
    let mut archive = fixture.archive();
    add(&mut archive, &fixture.key, &[fixture.item("a", b"1")]);
    archive.delete_files(&[0, 5]).unwrap_err();
    assert_eq!(archive.entries().len(), 1);
}

#[test]
fn validate_reports_failed_indices() {
    let fixture = Fixture::new();
    let mut archive = fixture.archive();
    let items: Vec<AddItem> = (0..10)
        .map(|i| fixture.item(&format!("file{i}"), format!("content {i}").as_bytes()))
        .collect();
    add(&mut archive, &fixture.key, &items);
    for index in [2, 5, 7] {
        flip_last_byte(&archive.blob_path(&archive.entries()[index]));
    }

    let mut prompt = ScriptedPrompt::default();
    let report = archive
        .validate_files(&all_indices(&archive), &fixture.key, options(&mut prompt, &mut NoProgress))
        .unwrap();
    assert_eq!(report.summary.processed, 10);
    assert_eq!(report.failed, [2, 5, 7]);
    assert_eq!(report.to_string(), "processed 10, 3 failed");
    assert!(prompt.continue_asked.is_empty());
}

#[test]
fn validate_reports_truncated_and_empty_blobs() {
    let fixture = Fixture::new();
    let mut archive = fixture.archive();
    let items: Vec<AddItem> = (0..3)
        .map(|i| fixture.item(&format!("file{i}"), format!("content {i}").as_bytes()))
        .collect();
    add(&mut archive, &fixture.key, &items);
    let truncated = archive.blob_path(&archive.entries()[1]);
    let data = fs::read(&truncated).unwrap();
    fs::write(&truncated, &data[..data.len() - 3]).unwrap();
    fs::write(archive.blob_path(&archive.entries()[2]), b"").unwrap();

    let mut prompt = ScriptedPrompt::default();
    let report = archive
        .validate_files(
            &all_indices(&archive),
            &fixture.key,
            options(&mut prompt, &mut NoProgress),
        )
        .unwrap();
    assert_eq!(report.failed, [1, 2]);
    assert_eq!(report.to_string(), "processed 3, 2 failed");
    assert!(report.summary.failed.is_empty());
    assert!(prompt.continue_asked.is_empty());
}

#[test]
fn extract_detects_replaced_blob() {
    let fixture = Fixture::new();
    let mut archive = fixture.archive();
    add(&mut archive, &fixture.key, &[fixture.item("a", b"aaa"), fixture.item("b", b"bbb")]);
    fs::copy(
        archive.blob_path(&archive.entries()[0]),
        archive.blob_path(&archive.entries()[1]),
    )
    .unwrap();

    let mut prompt = ScriptedPrompt::default();
    let summary = archive
        .extract_files(
            &[1, 0],
            &fixture.out_dir(),
            &fixture.key,
            options(&mut prompt, &mut NoProgress),
        )
        .unwrap();
    assert_eq!(summary.failed.len(), 1);
    assert_eq!(summary.failed[0].kind, ErrorKind::Key);
    assert_eq!(prompt.continue_asked, ["b"]);
    assert!(!fixture.out_dir().join("b").exists());
    assert_eq!(fs::read(fixture.out_dir().join("a")).unwrap(), b"aaa");
}

#[test]
fn extract_conflict_with_existing_file() {
    let fixture = Fixture::new();
    let mut archive = fixture.archive();
    add(&mut archive, &fixture.key, &[fixture.item("dir/a", b"archived")]);
    fs::create_dir_all(fixture.out_dir().join("dir")).unwrap();
    let target = fixture.out_dir().join("dir").join("a");
    fs::write(&target, "local").unwrap();

    let mut prompt = ScriptedPrompt::with_choices([ConflictChoice::Skip]);
    archive
        .extract_files(
            &[0],
            &fixture.out_dir(),
            &fixture.key,
            options(&mut prompt, &mut NoProgress),
        )
        .unwrap();
    assert_eq!(fs::read_to_string(&target).unwrap(), "local");

    let mut prompt = ScriptedPrompt::with_choices([ConflictChoice::Replace]);
    archive
        .extract_files(
            &[0],
            &fixture.out_dir(),
            &fixture.key,
            options(&mut prompt, &mut NoProgress),
        )
        .unwrap();
    assert_eq!(fs::read_to_string(&target).unwrap(), "archived");
    assert_eq!(fs::read_dir(fixture.out_dir().join("dir")).unwrap().count(), 1);
}

#[test]
fn write_keeps_foreign_file_as_sidecar() {
    let fixture = Fixture::new();
    fs::write(fixture.container(), "previous").unwrap();
    let mut archive = fixture.archive();
    archive.write(&fixture.container(), &fixture.key).unwrap();
    let sidecar = fixture.archive_dir().join("container.bca-old");
    assert_eq!(fs::read_to_string(&sidecar).unwrap(), "previous");

    // the file now belongs to this archive, so it's replaced in place
    fs::remove_file(&sidecar).unwrap();
    add(&mut archive, &fixture.key, &[fixture.item("a", b"1")]);
    archive.write(&fixture.container(), &fixture.key).unwrap();
    assert!(!sidecar.exists());
    let (opened, _) = Archive::read(&fixture.container(), &fixture.key, OPTIONS).unwrap();
    assert_eq!(opened.entries().len(), 1);
}

#[test]
fn write_to_same_file_by_another_path() {
    let fixture = Fixture::new();
    let mut archive = fixture.archive();
    add(&mut archive, &fixture.key, &[fixture.item("a", b"1")]);
    archive.write(&fixture.container(), &fixture.key).unwrap();

    let (mut opened, _) = Archive::read(&fixture.container(), &fixture.key, OPTIONS).unwrap();
    let other_spelling = fixture
        .archive_dir()
        .join("..")
        .join("archive")
        .join("container.bca");
    opened.write(&other_spelling, &fixture.key).unwrap();
    assert!(!fixture.archive_dir().join("container.bca-old").exists());
    assert_eq!(fixture.files_in_archive_dir(), 2);
}

#[test]
fn find_and_sort() {
    let fixture = Fixture::new();
    let mut archive = fixture.archive();
    add(
        &mut archive,
        &fixture.key,
        &[
            fixture.item("a/b.txt", b"1"),
            fixture.item("a.txt", b"22"),
            fixture.item("a/c.txt", b"333"),
        ],
    );
    archive.sort(SortingOrder::default());
    let paths: Vec<&str> = archive.entries().iter().map(|e| e.path.as_str()).collect();
    assert_eq!(paths, ["a.txt", "a/b.txt", "a/c.txt"]);

    archive.sort(SortingOrder::new(SortKey::Size, SortDirection::Descending));
    assert_eq!(archive.find(&EntryPath::new("a/c.txt").unwrap()), Some(0));
    archive
        .indices_of(&[EntryPath::new("missing").unwrap()])
        .unwrap_err();
}
