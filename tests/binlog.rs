use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};

use hive::binlog::{event, Binlog, BinlogError, DbKey};

static COUNTER: AtomicUsize = AtomicUsize::new(0);

fn temp_path(name: &str) -> PathBuf {
    let mut path = std::env::temp_dir();
    path.push(format!(
        "hive-binlog-{}-{}-{}",
        name,
        std::process::id(),
        COUNTER.fetch_add(1, Ordering::Relaxed)
    ));
    let _ = Binlog::destroy(&path);
    path
}

fn replay_all(
    path: &PathBuf,
    db_key: DbKey,
    old_db_key: DbKey,
) -> Result<(Vec<(u64, i32, Vec<u8>)>, Binlog), BinlogError> {
    let mut replayed = Vec::new();
    let binlog = Binlog::open(
        path,
        |event| replayed.push((event.id, event.type_, event.data().to_vec())),
        db_key,
        old_db_key,
    )?;
    Ok((replayed, binlog))
}

#[test]
fn write_rewrite_replay() {
    let path = temp_path("rewrite");

    let mut binlog = Binlog::open(&path, |_| {}, DbKey::empty(), DbKey::empty()).unwrap();
    assert!(binlog.info().was_created);
    let first = binlog.add(1, b"aaaa");
    let second = binlog.add(1, b"bbbb");
    binlog.rewrite(first, 1, b"BBBB");
    binlog.close(true).unwrap();

    let (replayed, binlog) = replay_all(&path, DbKey::empty(), DbKey::empty()).unwrap();
    assert_eq!(
        replayed,
        vec![
            (first, 1, b"BBBB".to_vec()),
            (second, 1, b"bbbb".to_vec()),
        ]
    );
    assert!(!binlog.info().was_created);
    assert_eq!(binlog.info().last_event_id, second);

    drop(binlog);
    Binlog::destroy(&path).unwrap();
}

#[test]
fn minimum_size_record() {
    let path = temp_path("minimal");

    let mut binlog = Binlog::open(&path, |_| {}, DbKey::empty(), DbKey::empty()).unwrap();
    let id = binlog.add(0, b"");
    binlog.close(true).unwrap();

    assert_eq!(fs::metadata(&path).unwrap().len(), event::MIN_SIZE as u64);

    let (replayed, binlog) = replay_all(&path, DbKey::empty(), DbKey::empty()).unwrap();
    assert_eq!(replayed, vec![(id, 0, Vec::new())]);

    drop(binlog);
    Binlog::destroy(&path).unwrap();
}

#[test]
fn empty_file_is_empty_projection() {
    let path = temp_path("empty");

    let binlog = Binlog::open(&path, |_| {}, DbKey::empty(), DbKey::empty()).unwrap();
    drop(binlog);

    let (replayed, binlog) = replay_all(&path, DbKey::empty(), DbKey::empty()).unwrap();
    assert!(replayed.is_empty());
    assert!(!binlog.info().was_created);

    drop(binlog);
    Binlog::destroy(&path).unwrap();
}

#[test]
fn unaligned_tail_is_truncated() {
    let path = temp_path("tail3");

    let mut binlog = Binlog::open(&path, |_| {}, DbKey::empty(), DbKey::empty()).unwrap();
    binlog.add(1, b"datadata");
    binlog.close(true).unwrap();
    let good_size = fs::metadata(&path).unwrap().len();

    let mut file = fs::OpenOptions::new().append(true).open(&path).unwrap();
    file.write_all(b"xyz").unwrap();
    drop(file);

    let (replayed, binlog) = replay_all(&path, DbKey::empty(), DbKey::empty()).unwrap();
    assert_eq!(replayed.len(), 1);
    drop(binlog);
    assert_eq!(fs::metadata(&path).unwrap().len(), good_size);

    Binlog::destroy(&path).unwrap();
}

#[test]
fn zero_filled_tail_is_discarded() {
    let path = temp_path("zerotail");

    let mut binlog = Binlog::open(&path, |_| {}, DbKey::empty(), DbKey::empty()).unwrap();
    binlog.add(1, b"keepkeep");
    binlog.close(true).unwrap();
    let good_size = fs::metadata(&path).unwrap().len();

    let mut file = fs::OpenOptions::new().append(true).open(&path).unwrap();
    file.write_all(&[0u8; 64]).unwrap();
    drop(file);

    let (replayed, binlog) = replay_all(&path, DbKey::empty(), DbKey::empty()).unwrap();
    assert_eq!(replayed.len(), 1);
    drop(binlog);
    assert_eq!(fs::metadata(&path).unwrap().len(), good_size);

    Binlog::destroy(&path).unwrap();
}

#[test]
fn torn_tail_record_is_dropped() {
    let path = temp_path("torn");

    let mut binlog = Binlog::open(&path, |_| {}, DbKey::empty(), DbKey::empty()).unwrap();
    let mut ids = Vec::new();
    for i in 0..10u8 {
        ids.push(binlog.add(1, &[i; 8]));
    }
    binlog.sync().unwrap();
    binlog.close(true).unwrap();
    let good_size = fs::metadata(&path).unwrap().len();

    // a crash mid-write leaves a prefix of the next record behind
    let unflushed = hive::BinlogEvent::new(ids[9] + 1, 1, 0, 0, b"lostlost");
    let half = unflushed.raw().len() / 2;
    let mut file = fs::OpenOptions::new().append(true).open(&path).unwrap();
    file.write_all(&unflushed.raw()[..half]).unwrap();
    drop(file);

    let (replayed, binlog) = replay_all(&path, DbKey::empty(), DbKey::empty()).unwrap();
    assert_eq!(replayed.len(), 10);
    assert_eq!(
        replayed.iter().map(|(id, _, _)| *id).collect::<Vec<_>>(),
        ids
    );
    drop(binlog);
    assert_eq!(fs::metadata(&path).unwrap().len(), good_size);

    Binlog::destroy(&path).unwrap();
}

#[test]
fn password_protects_log() {
    let path = temp_path("password");

    let mut binlog = Binlog::open(&path, |_| {}, DbKey::password("secret"), DbKey::empty()).unwrap();
    let ids: Vec<u64> = (0..3).map(|i| binlog.add(2, &[i; 4])).collect();
    binlog.close(true).unwrap();

    // correct password replays everything
    let (replayed, binlog) = replay_all(&path, DbKey::password("secret"), DbKey::empty()).unwrap();
    assert_eq!(
        replayed.iter().map(|(id, _, _)| *id).collect::<Vec<_>>(),
        ids
    );
    binlog.close(true).unwrap();

    // wrong password is rejected and the file is untouched
    let before = fs::read(&path).unwrap();
    let err = replay_all(&path, DbKey::password("wrong"), DbKey::empty()).unwrap_err();
    assert!(matches!(err, BinlogError::WrongPassword));
    assert_eq!(fs::read(&path).unwrap(), before);

    // no key at all is just as wrong
    let err = replay_all(&path, DbKey::empty(), DbKey::empty()).unwrap_err();
    assert!(matches!(err, BinlogError::WrongPassword));

    Binlog::destroy(&path).unwrap();
}

#[test]
fn decrypt_with_old_key() {
    let path = temp_path("decrypt");

    let mut binlog = Binlog::open(&path, |_| {}, DbKey::password("secret"), DbKey::empty()).unwrap();
    let id = binlog.add(2, b"payload!");
    binlog.close(true).unwrap();

    // empty new key + matching old key rewrites the log in the clear
    let (replayed, binlog) =
        replay_all(&path, DbKey::empty(), DbKey::password("secret")).unwrap();
    assert_eq!(replayed, vec![(id, 2, b"payload!".to_vec())]);
    binlog.close(true).unwrap();

    // and it now opens without any key
    let (replayed, binlog) = replay_all(&path, DbKey::empty(), DbKey::empty()).unwrap();
    assert_eq!(replayed, vec![(id, 2, b"payload!".to_vec())]);
    drop(binlog);

    Binlog::destroy(&path).unwrap();
}

#[test]
fn encrypt_existing_log() {
    let path = temp_path("encrypt");

    let mut binlog = Binlog::open(&path, |_| {}, DbKey::empty(), DbKey::empty()).unwrap();
    let id = binlog.add(7, b"sensitiv");
    binlog.close(true).unwrap();

    // opening a plain log with a key encrypts it
    let (replayed, binlog) = replay_all(&path, DbKey::password("pw"), DbKey::empty()).unwrap();
    assert_eq!(replayed, vec![(id, 7, b"sensitiv".to_vec())]);
    binlog.close(true).unwrap();

    // the payload is no longer readable from the raw file
    let raw = fs::read(&path).unwrap();
    assert!(!raw.windows(8).any(|window| window == b"sensitiv"));

    let (replayed, binlog) = replay_all(&path, DbKey::password("pw"), DbKey::empty()).unwrap();
    assert_eq!(replayed, vec![(id, 7, b"sensitiv".to_vec())]);
    drop(binlog);

    Binlog::destroy(&path).unwrap();
}

#[test]
fn raw_key_round_trip() {
    let path = temp_path("rawkey");
    let key = DbKey::raw_key([42u8; 32]);

    let mut binlog = Binlog::open(&path, |_| {}, key.clone(), DbKey::empty()).unwrap();
    let id = binlog.add(1, b"rawrawra");
    binlog.close(true).unwrap();

    let (replayed, binlog) = replay_all(&path, key, DbKey::empty()).unwrap();
    assert_eq!(replayed, vec![(id, 1, b"rawrawra".to_vec())]);
    drop(binlog);

    Binlog::destroy(&path).unwrap();
}

#[test]
fn change_key_rekeys_log() {
    let path = temp_path("rekey");

    let mut binlog = Binlog::open(&path, |_| {}, DbKey::password("one"), DbKey::empty()).unwrap();
    let id = binlog.add(3, b"contents");

    // same key: observable only as a rewrite
    binlog.change_key(DbKey::password("one")).unwrap();
    binlog.change_key(DbKey::password("two")).unwrap();
    binlog.close(true).unwrap();

    let err = replay_all(&path, DbKey::password("one"), DbKey::empty()).unwrap_err();
    assert!(matches!(err, BinlogError::WrongPassword));

    let (replayed, binlog) = replay_all(&path, DbKey::password("two"), DbKey::empty()).unwrap();
    assert_eq!(replayed, vec![(id, 3, b"contents".to_vec())]);
    drop(binlog);

    Binlog::destroy(&path).unwrap();
}

#[test]
fn rewriting_many_times_keeps_last_version() {
    let path = temp_path("nversions");

    let mut binlog = Binlog::open(&path, |_| {}, DbKey::empty(), DbKey::empty()).unwrap();
    let id = binlog.add(1, b"v0v0");
    for version in 1..=5u8 {
        binlog.rewrite(id, 1, &[version; 4]);
    }
    binlog.close(true).unwrap();

    let (replayed, binlog) = replay_all(&path, DbKey::empty(), DbKey::empty()).unwrap();
    assert_eq!(replayed, vec![(id, 1, vec![5u8; 4])]);
    drop(binlog);

    Binlog::destroy(&path).unwrap();
}

#[test]
fn reindex_reclaims_space() {
    let path = temp_path("reindex");

    let mut binlog = Binlog::open(&path, |_| {}, DbKey::empty(), DbKey::empty()).unwrap();
    let payload = [9u8; 500];
    let ids: Vec<u64> = (0..200).map(|_| binlog.add(1, &payload)).collect();
    binlog.sync().unwrap();
    let full_size = binlog.size();
    assert!(full_size > 100_000);

    for id in &ids[..180] {
        binlog.erase(*id);
    }
    binlog.close(true).unwrap();

    // the erase wave pushed garbage over the threshold and triggered a
    // rewrite: only the live tail survives on disk
    let on_disk = fs::metadata(&path).unwrap().len() as i64;
    assert!(on_disk < full_size / 3, "still {} bytes on disk", on_disk);

    let (replayed, binlog) = replay_all(&path, DbKey::empty(), DbKey::empty()).unwrap();
    assert_eq!(
        replayed.iter().map(|(id, _, _)| *id).collect::<Vec<_>>(),
        ids[180..].to_vec()
    );
    drop(binlog);

    Binlog::destroy(&path).unwrap();
}

#[test]
fn partial_records_commit_together() {
    let path = temp_path("partial");

    let mut binlog = Binlog::open(&path, |_| {}, DbKey::empty(), DbKey::empty()).unwrap();
    let a = binlog.add_partial(4, b"part-one");
    let b = binlog.add_partial(4, b"part-two");
    let c = binlog.add(4, b"commit!!");
    binlog.close(true).unwrap();

    let (replayed, mut binlog) = replay_all(&path, DbKey::empty(), DbKey::empty()).unwrap();
    assert_eq!(
        replayed.iter().map(|(id, _, _)| *id).collect::<Vec<_>>(),
        vec![a, b, c]
    );

    // an uncommitted run of partials is not durable
    binlog.add_partial(4, b"dangling");
    binlog.close(true).unwrap();

    let (replayed, binlog) = replay_all(&path, DbKey::empty(), DbKey::empty()).unwrap();
    assert_eq!(replayed.len(), 3);
    drop(binlog);

    Binlog::destroy(&path).unwrap();
}

#[test]
fn second_open_in_process_is_rejected() {
    let path = temp_path("locked");

    let binlog = Binlog::open(&path, |_| {}, DbKey::empty(), DbKey::empty()).unwrap();
    let err = Binlog::open(&path, |_| {}, DbKey::empty(), DbKey::empty()).unwrap_err();
    assert!(matches!(err, BinlogError::Io(_)));
    drop(binlog);

    // releasing the first handle frees the lock
    let binlog = Binlog::open(&path, |_| {}, DbKey::empty(), DbKey::empty()).unwrap();
    drop(binlog);

    Binlog::destroy(&path).unwrap();
}
