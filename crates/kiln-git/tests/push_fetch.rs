//! Push and fetch round trips through the smart HTTP service handlers.

use kiln_git::{
    advertise_refs, collect_reachable, read_sideband, receive_pack, upload_pack, DecodeMode,
    PackBuilder, PackParser, PktLine, PktLineReader, PktLineWriter, Service,
};
use kiln_storage::{FileChange, ObjectId, Repository, Signature};
use std::io::Cursor;

fn author(timestamp: i64) -> Signature {
    Signature::new("Bob", "bob@example.com", timestamp)
}

/// Builds the body a client sends for a push of `new` to `refs/heads/main`.
fn push_body(client: &Repository, old: ObjectId, new: ObjectId, have: &[ObjectId]) -> Vec<u8> {
    let mut body = Vec::new();
    {
        let mut w = PktLineWriter::new(&mut body);
        w.write_data(
            format!(
                "{} {} refs/heads/main\0report-status side-band-64k",
                old, new
            )
            .as_bytes(),
        )
        .unwrap();
        w.flush_pkt().unwrap();
    }
    let mut builder = PackBuilder::new();
    for object in collect_reachable(&client.objects, &[new], have).unwrap() {
        builder.add(object);
    }
    body.extend_from_slice(&builder.build().unwrap());
    body
}

fn fetch_body(want: ObjectId, caps: &str) -> Vec<u8> {
    let mut body = Vec::new();
    let mut w = PktLineWriter::new(&mut body);
    w.write_line(&format!("want {} {}", want, caps)).unwrap();
    w.flush_pkt().unwrap();
    w.write_line("done").unwrap();
    body
}

#[test]
fn test_push_then_clone() {
    let client = Repository::in_memory("project", "bob").unwrap();
    let first = client
        .commit_changes(
            "main",
            &[
                FileChange::write("README.md", "# project\n"),
                FileChange::write("src/main.rs", "fn main() {}\n"),
            ],
            &author(100),
            "first",
        )
        .unwrap();

    let server = Repository::in_memory("project", "bob").unwrap();
    let mut response = Vec::new();
    let report = receive_pack(
        &mut Cursor::new(push_body(&client, ObjectId::zero(), first, &[])),
        &mut response,
        &server,
        DecodeMode::FailFast,
    )
    .unwrap();
    assert!(report.all_ok());
    assert_eq!(server.resolve_ref("main"), Some(first));

    // Sideband-wrapped report-status.
    let mut reader = PktLineReader::new(Cursor::new(response));
    let status = read_sideband(&mut reader).unwrap();
    let text = String::from_utf8_lossy(&status);
    assert!(text.contains("unpack ok"));
    assert!(text.contains("ok refs/heads/main"));

    // The advertisement now lists the pushed branch.
    let mut advert = Vec::new();
    advertise_refs(&mut advert, &server, Service::UploadPack).unwrap();
    let advert = String::from_utf8_lossy(&advert);
    assert!(advert.contains(&format!("{} refs/heads/main", first)));

    // Clone into a third repository.
    let mut output = Vec::new();
    let sent = upload_pack(
        &mut Cursor::new(fetch_body(first, "side-band-64k")),
        &mut output,
        &server,
    )
    .unwrap();
    assert_eq!(sent, 5);

    let mut reader = PktLineReader::new(Cursor::new(output));
    assert_eq!(reader.read().unwrap(), Some(PktLine::from_string("NAK\n")));
    let pack = read_sideband(&mut reader).unwrap();

    let clone = Repository::in_memory("clone", "carol").unwrap();
    let unpacked = PackParser::new(&pack).parse(&clone.objects).unwrap();
    assert!(unpacked.is_clean());
    assert_eq!(unpacked.stored().len(), 5);
    clone.create_branch("main", first).unwrap();
    assert_eq!(
        clone.read_blob("main", "src/main.rs").unwrap().unwrap().text(),
        "fn main() {}\n"
    );
}

#[test]
fn test_incremental_push_and_fetch() {
    let client = Repository::in_memory("project", "bob").unwrap();
    let server = Repository::in_memory("project", "bob").unwrap();

    let first = client
        .commit_changes("main", &[FileChange::write("a.txt", "a\n")], &author(1), "a")
        .unwrap();
    receive_pack(
        &mut Cursor::new(push_body(&client, ObjectId::zero(), first, &[])),
        &mut Vec::new(),
        &server,
        DecodeMode::BestEffort,
    )
    .unwrap();

    let second = client
        .commit_changes("main", &[FileChange::write("b.txt", "b\n")], &author(2), "b")
        .unwrap();
    let report = receive_pack(
        &mut Cursor::new(push_body(&client, first, second, &[first])),
        &mut Vec::new(),
        &server,
        DecodeMode::BestEffort,
    )
    .unwrap();
    assert!(report.all_ok());
    // commit, root tree and both blobs; the walk only prunes at the have itself
    assert_eq!(report.unpack.as_ref().unwrap().stored().len(), 4);
    assert_eq!(server.resolve_ref("main"), Some(second));

    let log = server.log("main", 10).unwrap();
    assert_eq!(log.iter().map(|c| c.id).collect::<Vec<_>>(), vec![second, first]);

    // Replaying the first push now loses the compare-and-swap.
    let replay = receive_pack(
        &mut Cursor::new(push_body(&client, ObjectId::zero(), first, &[])),
        &mut Vec::new(),
        &server,
        DecodeMode::BestEffort,
    )
    .unwrap();
    assert!(!replay.all_ok());
    assert_eq!(server.resolve_ref("main"), Some(second));
}

#[test]
fn test_push_to_disk_backed_repository() {
    let dir = tempfile::tempdir().unwrap();
    let store = kiln_storage::RepoStore::on_disk(dir.path()).unwrap();
    let server = store.create("bob", "project", "main").unwrap();

    let client = Repository::in_memory("project", "bob").unwrap();
    let head = client
        .commit_changes("main", &[FileChange::write("x", "1")], &author(5), "x")
        .unwrap();
    let report = receive_pack(
        &mut Cursor::new(push_body(&client, ObjectId::zero(), head, &[])),
        &mut Vec::new(),
        &server,
        DecodeMode::FailFast,
    )
    .unwrap();
    assert!(report.all_ok());

    // Reopening from disk sees the pushed branch.
    let reopened = kiln_storage::RepoStore::on_disk(dir.path()).unwrap();
    let repo = reopened.get("bob", "project").unwrap();
    assert_eq!(repo.resolve_ref("main"), Some(head));
}
