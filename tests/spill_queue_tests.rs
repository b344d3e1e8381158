//! Spill queue behaviour against in-memory and on-disk chunk storage.

use std::io;

use timeshift_core::id::SessionId;
use timeshift_io::{Fault, FsStorage, MemoryStorage};
use timeshift_spill::{SpillError, SpillQueue, Storage};

fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect()
}

fn mem_queue(chunk_size: usize) -> (SpillQueue<MemoryStorage>, MemoryStorage) {
    let storage = MemoryStorage::new();
    let queue = SpillQueue::new(storage.clone(), SessionId::random(), chunk_size).expect("queue");
    (queue, storage)
}

/// Read everything out, `step` bytes at a time.
fn drain<S: Storage>(queue: &mut SpillQueue<S>, step: usize) -> Vec<u8> {
    let mut out = Vec::new();
    let mut buf = vec![0u8; step];
    while queue.is_data_available().expect("available") {
        let n = queue.read(&mut buf).expect("read");
        assert!(n > 0);
        out.extend_from_slice(&buf[..n]);
        queue.advance(n).expect("advance");
    }
    out
}

#[test]
fn test_fifo_order_across_many_writes() {
    let (mut queue, storage) = mem_queue(7);
    let writes: Vec<Vec<u8>> = (0..20).map(|i| pattern(i * 3 + 1, i as u8)).collect();
    for w in &writes {
        queue.write_all(w).expect("write");
    }
    let expected: Vec<u8> = writes.concat();
    assert_eq!(queue.available_bytes().unwrap(), expected.len());

    let got = drain(&mut queue, 5);
    assert_eq!(got, expected);
    assert_eq!(queue.available_bytes().unwrap(), 0);
    assert_eq!(queue.chunk_count(), 1, "partially filled tail chunk stays");
    queue.drain_all().unwrap();
    assert!(storage.is_empty());
}

#[test]
fn test_chunk_boundary_transparency() {
    let chunk_size = 64;
    let (mut queue, _storage) = mem_queue(chunk_size);
    let data = pattern(chunk_size + 1, 9);

    queue.write_all(&data).unwrap();
    assert_eq!(queue.chunk_count(), 2);
    assert_eq!(drain(&mut queue, 4096), data);
}

#[test]
fn test_single_write_may_be_partial() {
    let (mut queue, _storage) = mem_queue(4);
    let accepted = queue.write(b"abcdefg").unwrap();
    assert_eq!(accepted, 4, "one write fills at most the tail chunk");
    assert_eq!(queue.write(b"efg").unwrap(), 3);
    assert_eq!(queue.chunk_count(), 2);
    assert_eq!(queue.write(b"").unwrap(), 0);
}

#[test]
fn test_abcde_with_two_byte_chunks() {
    let (mut queue, storage) = mem_queue(2);
    queue.write_all(b"ABCDE").unwrap();

    let names = queue.chunk_names();
    assert_eq!(names.len(), 3);
    let contents: Vec<Vec<u8>> = names
        .iter()
        .map(|n| storage.contents(n).expect("chunk present"))
        .collect();
    assert_eq!(contents, vec![b"AB".to_vec(), b"CD".to_vec(), b"E".to_vec()]);

    let got = drain(&mut queue, 5);
    assert_eq!(got, b"ABCDE");
    assert!(!queue.is_data_available().unwrap());

    // The last chunk is not full, so it survives draining until teardown.
    assert!(!storage.contains(&names[0]));
    assert!(!storage.contains(&names[1]));
    queue.drain_all().unwrap();
    assert!(storage.is_empty());
    assert_eq!(storage.created(), 3);
}

#[test]
fn test_read_never_spans_chunks() {
    let (mut queue, _storage) = mem_queue(3);
    queue.write_all(b"abcdef").unwrap();

    let mut buf = [0u8; 16];
    assert_eq!(queue.read(&mut buf).unwrap(), 3);
    assert_eq!(&buf[..3], b"abc");
    queue.advance(3).unwrap();
    assert_eq!(queue.read(&mut buf).unwrap(), 3);
    assert_eq!(&buf[..3], b"def");
}

#[test]
fn test_reclaim_before_next_availability_check() {
    let (mut queue, storage) = mem_queue(4);
    queue.write_all(b"0123456789").unwrap();
    let first = queue.chunk_names()[0].clone();

    let mut buf = [0u8; 4];
    assert_eq!(queue.read(&mut buf).unwrap(), 4);
    queue.advance(4).unwrap();
    // Drained but not yet reclaimed.
    assert!(storage.contains(&first));

    assert!(queue.is_data_available().unwrap());
    assert!(!storage.contains(&first));
    assert_eq!(queue.stats().chunks_removed, 1);
}

#[test]
fn test_availability_accuracy() {
    let (mut queue, _storage) = mem_queue(5);
    assert!(!queue.is_data_available().unwrap());
    assert_eq!(queue.available_bytes().unwrap(), 0);

    queue.write_all(&pattern(12, 0)).unwrap();
    assert!(queue.is_data_available().unwrap());
    assert_eq!(queue.available_bytes().unwrap(), 12);

    let mut buf = [0u8; 3];
    queue.read(&mut buf).unwrap();
    assert_eq!(queue.available_bytes().unwrap(), 12, "peek consumes nothing");
    queue.advance(3).unwrap();
    assert_eq!(queue.available_bytes().unwrap(), 9);

    drain(&mut queue, 2);
    assert!(!queue.is_data_available().unwrap());
    assert_eq!(queue.available_bytes().unwrap(), 0);
}

#[test]
fn test_partial_advance_exposes_only_remainder() {
    let (mut queue, _storage) = mem_queue(32);
    queue.write_all(b"hello world").unwrap();

    let mut buf = [0u8; 8];
    assert_eq!(queue.read(&mut buf).unwrap(), 8);
    assert_eq!(&buf, b"hello wo");
    queue.advance(3).unwrap();

    let mut buf = [0u8; 32];
    let n = queue.read(&mut buf).unwrap();
    assert_eq!(&buf[..n], b"lo world");

    // Repeated peeks see the same bytes.
    let n2 = queue.read(&mut buf).unwrap();
    assert_eq!(&buf[..n2], b"lo world");
}

#[test]
fn test_advance_past_written_is_rejected() {
    let (mut queue, _storage) = mem_queue(32);
    queue.write_all(b"abc").unwrap();
    let err = queue.advance(4).unwrap_err();
    assert!(matches!(err, SpillError::AdvancePastWrite { requested: 4, available: 3, .. }));

    // Nothing was skipped.
    assert_eq!(drain(&mut queue, 8), b"abc");
    assert!(matches!(queue.advance(1), Err(SpillError::AdvancePastWrite { .. })));
}

#[test]
fn test_advance_cannot_skip_unread_bytes() {
    let (mut queue, _storage) = mem_queue(32);
    queue.write_all(b"abcdef").unwrap();

    let mut buf = [0u8; 2];
    assert_eq!(queue.read(&mut buf).unwrap(), 2);
    assert_eq!(&buf, b"ab");
    queue.advance(2).unwrap();
    let err = queue.advance(2).unwrap_err();
    assert!(matches!(err, SpillError::AdvancePastRead { requested: 2, peeked: 0, .. }));

    let mut buf = [0u8; 3];
    assert_eq!(queue.read(&mut buf).unwrap(), 3);
    assert_eq!(&buf, b"cde");

    // A peek may be committed in several steps, but not beyond its length.
    queue.advance(1).unwrap();
    queue.advance(1).unwrap();
    assert!(matches!(queue.advance(2), Err(SpillError::AdvancePastRead { peeked: 1, .. })));
    assert_eq!(drain(&mut queue, 8), b"ef");
}

#[test]
fn test_read_from_empty_queue_fails() {
    let (mut queue, _storage) = mem_queue(8);
    let mut buf = [0u8; 4];
    assert!(matches!(queue.read(&mut buf), Err(SpillError::Empty)));
    assert!(matches!(queue.advance(1), Err(SpillError::Empty)));
}

#[test]
fn test_disk_full_accepts_and_discards() {
    let (mut queue, storage) = mem_queue(16);
    queue.write_all(b"kept").unwrap();

    storage.inject(Fault::Writes(io::ErrorKind::StorageFull));
    assert_eq!(queue.write(b"lost bytes").unwrap(), 10);
    queue.write_all(b"more lost").unwrap();

    storage.clear_fault();
    queue.write_all(b"+back").unwrap();

    let stats = queue.stats();
    assert_eq!(stats.bytes_discarded, 19);
    assert_eq!(stats.bytes_stored, 9);
    assert_eq!(queue.available_bytes().unwrap(), 9);
    assert_eq!(drain(&mut queue, 64), b"kept+back");
}

#[test]
fn test_other_write_errors_are_fatal() {
    let (mut queue, storage) = mem_queue(16);
    storage.inject(Fault::Writes(io::ErrorKind::PermissionDenied));
    let err = queue.write(b"abc").unwrap_err();
    assert!(matches!(err, SpillError::Write { .. }));
    assert!(err.to_string().contains("write chunk"));
}

#[test]
fn test_read_errors_are_fatal() {
    let (mut queue, storage) = mem_queue(16);
    queue.write_all(b"abc").unwrap();
    storage.inject(Fault::Reads(io::ErrorKind::Other));
    let mut buf = [0u8; 4];
    assert!(matches!(queue.read(&mut buf), Err(SpillError::Read { .. })));
}

#[test]
fn test_short_writes_are_retried() {
    let (mut queue, storage) = mem_queue(10);
    storage.inject(Fault::ShortWrites(3));
    let data = pattern(25, 4);
    queue.write_all(&data).unwrap();
    storage.clear_fault();
    assert_eq!(queue.chunk_count(), 3);
    assert_eq!(drain(&mut queue, 7), data);
}

#[test]
fn test_missing_backing_file_is_unexpected_eof_or_read_error() {
    let (mut queue, storage) = mem_queue(16);
    queue.write_all(b"abc").unwrap();
    let name = queue.chunk_names()[0].clone();
    storage.remove(&name).unwrap();
    let mut buf = [0u8; 4];
    let err = queue.read(&mut buf).unwrap_err();
    assert!(matches!(
        err,
        SpillError::Read { .. } | SpillError::UnexpectedEof { .. }
    ));
}

#[test]
fn test_zero_chunk_size_rejected() {
    let res = SpillQueue::new(MemoryStorage::new(), SessionId::random(), 0);
    assert!(matches!(res, Err(SpillError::InvalidChunkSize(0))));
}

#[test]
fn test_drop_releases_all_chunks() {
    let storage = MemoryStorage::new();
    {
        let mut queue = SpillQueue::new(storage.clone(), SessionId::random(), 4).unwrap();
        queue.write_all(&pattern(30, 1)).unwrap();
        assert_eq!(storage.len(), 8);
    }
    assert!(storage.is_empty());
}

#[test]
fn test_stats_track_lifecycle() {
    let (mut queue, _storage) = mem_queue(4);
    queue.write_all(&pattern(10, 2)).unwrap();
    assert_eq!(queue.stats().peak_buffered, 10);
    drain(&mut queue, 3);
    queue.drain_all().unwrap();

    let stats = queue.stats();
    assert_eq!(stats.chunks_created, 3);
    assert_eq!(stats.chunks_removed, 3);
    assert_eq!(stats.bytes_stored, 10);
    assert_eq!(stats.bytes_consumed, 10);
}

#[test]
fn test_fs_queue_roundtrip_and_file_reclaim() {
    let dir = tempfile::tempdir().unwrap();
    let storage = FsStorage::new(dir.path());
    let mut queue = SpillQueue::new(storage.clone(), SessionId::random(), 1000).unwrap();

    let data = pattern(4500, 7);
    queue.write_all(&data).unwrap();
    assert_eq!(storage.list_chunks().unwrap().len(), 5);

    let mut buf = vec![0u8; 1000];
    let n = queue.read(&mut buf).unwrap();
    queue.advance(n).unwrap();
    assert!(queue.is_data_available().unwrap());
    assert_eq!(storage.list_chunks().unwrap().len(), 4);

    let rest = drain(&mut queue, 333);
    assert_eq!(rest, &data[1000..]);
    assert_eq!(storage.list_chunks().unwrap().len(), 1);

    queue.drain_all().unwrap();
    assert!(storage.list_chunks().unwrap().is_empty());
}

#[test]
fn test_fs_sessions_share_directory_without_collision() {
    let dir = tempfile::tempdir().unwrap();
    let storage = FsStorage::new(dir.path());
    let mut a = SpillQueue::new(storage.clone(), SessionId::random(), 8).unwrap();
    let mut b = SpillQueue::new(storage.clone(), SessionId::random(), 8).unwrap();

    a.write_all(b"first session data").unwrap();
    b.write_all(b"second session").unwrap();
    assert_eq!(storage.list_chunks().unwrap().len(), 3 + 2);

    assert_eq!(drain(&mut b, 16), b"second session");
    assert_eq!(drain(&mut a, 16), b"first session data");

    drop(a);
    drop(b);
    assert!(storage.list_chunks().unwrap().is_empty());
}

#[test]
fn test_fs_interleaved_write_and_read() {
    let dir = tempfile::tempdir().unwrap();
    let storage = FsStorage::new(dir.path());
    let mut queue = SpillQueue::new(storage, SessionId::random(), 10).unwrap();

    let mut expected = Vec::new();
    let mut got = Vec::new();
    let mut buf = [0u8; 6];
    for i in 0..50u8 {
        let piece = pattern((i as usize % 9) + 1, i);
        queue.write_all(&piece).unwrap();
        expected.extend_from_slice(&piece);
        if i % 3 == 0 && queue.is_data_available().unwrap() {
            let n = queue.read(&mut buf).unwrap();
            got.extend_from_slice(&buf[..n]);
            queue.advance(n).unwrap();
        }
    }
    got.extend(drain(&mut queue, 6));
    assert_eq!(got, expected);
}
