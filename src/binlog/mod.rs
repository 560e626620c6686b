//! Append-only durable log with rewrite-in-place semantics and transparent
//! AES-CTR encryption. Controllers append records describing their
//! decisions; on open the log replays the coalesced projection (latest
//! version per logical id) through a callback. Garbage is reclaimed by
//! rewriting the live projection into a fresh file.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::mem;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use fs2::FileExt;
use log::{error, info, warn};
use thiserror::Error;

pub use event::{
    BinlogEvent, FLAG_PARTIAL, FLAG_REWRITE, MAX_SIZE, MIN_SIZE, TYPE_AES_CTR_ENCRYPTION,
    TYPE_EMPTY, TYPE_HEADER,
};
pub use processor::BinlogEventsProcessor;

mod encryption;
pub mod event;
mod processor;

use encryption::{AesCtrState, EncryptionRecord, IV_SIZE, KEY_SIZE};

use crate::time;

#[derive(Debug, Error)]
pub enum BinlogError {
    #[error("binlog io error: {0}")]
    Io(#[from] io::Error),
    #[error("binlog is corrupted: {0}")]
    Corruption(String),
    #[error("wrong password")]
    WrongPassword,
    #[error("binlog protocol violation: {0}")]
    ProtocolViolation(String),
}

/// The key protecting a log file. A passphrase is stretched through the
/// slow KDF; a raw key is used (almost) as is.
#[derive(Debug, Clone)]
pub enum DbKey {
    Empty,
    Password(String),
    RawKey([u8; KEY_SIZE]),
}

impl DbKey {
    pub fn empty() -> DbKey {
        DbKey::Empty
    }

    pub fn password(password: impl Into<String>) -> DbKey {
        DbKey::Password(password.into())
    }

    pub fn raw_key(key: [u8; KEY_SIZE]) -> DbKey {
        DbKey::RawKey(key)
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, DbKey::Empty)
    }

    pub(crate) fn is_raw_key(&self) -> bool {
        matches!(self, DbKey::RawKey(_))
    }

    pub(crate) fn data(&self) -> &[u8] {
        match self {
            DbKey::Empty => b"",
            DbKey::Password(password) => password.as_bytes(),
            DbKey::RawKey(key) => key,
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct BinlogInfo {
    pub was_created: bool,
    pub last_event_id: u64,
}

#[derive(Debug, PartialEq)]
enum State {
    Load,
    Run,
    Reindex,
}

// Guards against the same process opening one log twice; the OS lock only
// protects against other processes.
static LOCAL_LOCKS: Mutex<Vec<PathBuf>> = Mutex::new(Vec::new());

fn acquire_local_lock(path: &Path) -> Result<(), BinlogError> {
    let mut locks = match LOCAL_LOCKS.lock() {
        Ok(locks) => locks,
        Err(poisoned) => poisoned.into_inner(),
    };
    if locks.iter().any(|p| p == path) {
        return Err(BinlogError::Io(io::Error::new(
            io::ErrorKind::WouldBlock,
            format!("binlog {:?} is already open in this process", path),
        )));
    }
    locks.push(path.to_path_buf());
    Ok(())
}

fn release_local_lock(path: &Path) {
    let mut locks = match LOCAL_LOCKS.lock() {
        Ok(locks) => locks,
        Err(poisoned) => poisoned.into_inner(),
    };
    locks.retain(|p| p != path);
}

fn rewrite_path(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_os_string();
    os.push(".new");
    PathBuf::from(os)
}

fn file_size(path: &Path) -> i64 {
    fs::metadata(path).map(|m| m.len() as i64).unwrap_or(0)
}

/// Read decrypted bytes into `pending` until it holds `need` bytes; false
/// on EOF before that.
fn fill_buffer(
    fd: &mut File,
    cipher: &mut Option<AesCtrState>,
    pending: &mut Vec<u8>,
    need: usize,
) -> io::Result<bool> {
    let mut chunk = [0u8; 4096];
    while pending.len() < need {
        let n = fd.read(&mut chunk)?;
        if n == 0 {
            return Ok(false);
        }
        let start = pending.len();
        pending.extend_from_slice(&chunk[..n]);
        if let Some(cipher) = cipher {
            cipher.apply(&mut pending[start..]);
        }
    }
    Ok(true)
}

/// Power loss under AES-CTR commonly leaves a zero-filled tail instead of
/// ciphertext; such tails carry no data and are safe to discard.
fn raw_tail_is_zero(fd: &mut File, from: u64) -> io::Result<bool> {
    fd.seek(SeekFrom::Start(from))?;
    let mut chunk = [0u8; 4096];
    loop {
        let n = fd.read(&mut chunk)?;
        if n == 0 {
            return Ok(true);
        }
        if chunk[..n].iter().any(|&b| b != 0) {
            return Ok(false);
        }
    }
}

#[derive(Debug)]
pub struct Binlog {
    path: PathBuf,
    fd: File,
    state: State,
    processor: BinlogEventsProcessor,
    /// Staged plaintext; encrypted (if at all) when flushed to the fd.
    write_buf: Vec<u8>,
    pending_partial: Vec<BinlogEvent>,
    db_key: DbKey,
    old_db_key: DbKey,
    db_key_used: bool,
    encrypted: bool,
    key: [u8; KEY_SIZE],
    key_salt: Vec<u8>,
    iv: [u8; IV_SIZE],
    cipher: Option<AesCtrState>,
    /// File offset where ciphertext starts, one past the encryption header.
    encryption_offset: i64,
    /// Logical size: file bytes plus staged bytes.
    fd_size: i64,
    /// Bytes actually written to the fd.
    flushed_size: i64,
    fd_events: u64,
    need_sync: bool,
    last_event_id: u64,
    info: BinlogInfo,
    is_open: bool,
}

impl Binlog {
    /// Open or create the log at `path`, validate it, and replay the live
    /// projection through `replay_cb`.
    ///
    /// Key handling: with `db_key` set the log is (or becomes) encrypted;
    /// with `db_key` empty and `old_db_key` set an encrypted log is
    /// rewritten in the clear; with both set and the stored key hash only
    /// matching `old_db_key`, the log is rekeyed to `db_key`. A hash
    /// matching neither returns [`BinlogError::WrongPassword`] and leaves
    /// the file untouched.
    pub fn open(
        path: impl AsRef<Path>,
        mut replay_cb: impl FnMut(&BinlogEvent),
        db_key: DbKey,
        old_db_key: DbKey,
    ) -> Result<Binlog, BinlogError> {
        let path = path.as_ref().to_path_buf();

        // a crash between unlink and rename leaves only the finished
        // rewrite behind
        if !path.exists() {
            let _ = fs::rename(rewrite_path(&path), &path);
        }
        let was_created = !path.exists();

        acquire_local_lock(&path)?;
        let fd = match OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)
            .and_then(|fd| {
                fd.try_lock_exclusive()?;
                Ok(fd)
            }) {
            Ok(fd) => fd,
            Err(err) => {
                release_local_lock(&path);
                return Err(BinlogError::Io(err));
            }
        };

        let mut binlog = Binlog {
            path,
            fd,
            state: State::Load,
            processor: BinlogEventsProcessor::new(),
            write_buf: Vec::new(),
            pending_partial: Vec::new(),
            db_key,
            old_db_key,
            db_key_used: false,
            encrypted: false,
            key: [0u8; KEY_SIZE],
            key_salt: Vec::new(),
            iv: [0u8; IV_SIZE],
            cipher: None,
            encryption_offset: 0,
            fd_size: 0,
            flushed_size: 0,
            fd_events: 0,
            need_sync: false,
            last_event_id: 0,
            info: BinlogInfo {
                was_created,
                last_event_id: 0,
            },
            is_open: true,
        };

        binlog.load(&mut replay_cb)?;
        Ok(binlog)
    }

    pub fn info(&self) -> &BinlogInfo {
        &self.info
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Logical size in bytes, staged writes included.
    pub fn size(&self) -> i64 {
        self.fd_size
    }

    pub fn event_count(&self) -> u64 {
        self.fd_events
    }

    /// Walk the live projection in id order.
    pub fn for_each(&self, callback: impl FnMut(&BinlogEvent)) {
        self.processor.for_each(callback);
    }

    /// Allocate the next logical event id.
    pub fn next_event_id(&mut self) -> u64 {
        self.last_event_id += 1;
        self.last_event_id
    }

    /// Append a fresh user record; returns its id.
    pub fn add(&mut self, type_: i32, data: &[u8]) -> u64 {
        assert!(type_ >= 0, "user record types are non-negative");
        let id = self.next_event_id();
        self.add_raw_event(BinlogEvent::new(id, type_, 0, 0, data));
        id
    }

    /// Append a partial record: buffered, committed atomically together
    /// with the next non-partial record.
    pub fn add_partial(&mut self, type_: i32, data: &[u8]) -> u64 {
        assert!(type_ >= 0, "user record types are non-negative");
        let id = self.next_event_id();
        self.add_raw_event(BinlogEvent::new(id, type_, FLAG_PARTIAL, 0, data));
        id
    }

    /// Replace the record with logical id `id`.
    pub fn rewrite(&mut self, id: u64, type_: i32, data: &[u8]) {
        assert!(type_ >= 0, "user record types are non-negative");
        self.add_raw_event(BinlogEvent::new(id, type_, FLAG_REWRITE, 0, data));
    }

    /// Erase the record with logical id `id` from the projection.
    pub fn erase(&mut self, id: u64) {
        self.add_raw_event(BinlogEvent::new(id, TYPE_EMPTY, FLAG_REWRITE, 0, b""));
    }

    pub fn add_raw_event(&mut self, event: BinlogEvent) {
        self.do_add_event(event);
        self.lazy_flush();
        if self.state == State::Run {
            self.check_reindex();
        }
    }

    /// Stage-then-write: encrypt the staged bytes if encryption is active
    /// and push them to the fd. Does not fsync. On failure the staged
    /// bytes, the file and the keystream are rolled back so a later flush
    /// can retry.
    pub fn flush(&mut self) -> Result<(), BinlogError> {
        if self.state == State::Load || self.write_buf.is_empty() {
            return Ok(());
        }
        let mut buf = self.write_buf.clone();
        if let Some(cipher) = &mut self.cipher {
            cipher.apply(&mut buf);
        }
        if let Err(err) = self.fd.write_all(&buf) {
            let rollback = self
                .fd
                .set_len(self.flushed_size as u64)
                .and_then(|()| self.fd.seek(SeekFrom::Start(self.flushed_size as u64)));
            if let Err(rollback_err) = rollback {
                // a half-written tail we cannot cut off desynchronizes the
                // keystream from the file
                panic!(
                    "failed to roll back binlog {:?} after write error {}: {}",
                    self.path, err, rollback_err
                );
            }
            if let Some(cipher) = &mut self.cipher {
                cipher.seek((self.flushed_size - self.encryption_offset) as u64);
            }
            return Err(BinlogError::Io(err));
        }
        self.flushed_size += buf.len() as i64;
        self.write_buf.clear();
        self.need_sync = true;
        Ok(())
    }

    /// `flush` plus fsync; pair with this when durability is required.
    pub fn sync(&mut self) -> Result<(), BinlogError> {
        self.flush()?;
        if self.need_sync {
            self.fd.sync_all()?;
            self.need_sync = false;
        }
        Ok(())
    }

    /// Close the log, syncing first when `need_sync` is set.
    pub fn close(mut self, need_sync: bool) -> Result<(), BinlogError> {
        self.close_impl(need_sync)
    }

    /// Schedule a full rewrite under `new_key`.
    pub fn change_key(&mut self, new_key: DbKey) -> Result<(), BinlogError> {
        self.db_key = new_key;
        self.key_salt.clear();
        self.do_reindex()
    }

    /// Remove the log and any unfinished rewrite of it.
    pub fn destroy(path: impl AsRef<Path>) -> io::Result<()> {
        let path = path.as_ref();
        // the regenerated version goes first, so it cannot become the main
        // version through the crash-recovery rename
        match fs::remove_file(rewrite_path(path)) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(err),
        }
        match fs::remove_file(path) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(err),
        }
        Ok(())
    }

    /* ---- internals ---- */

    fn close_impl(&mut self, need_sync: bool) -> Result<(), BinlogError> {
        if !self.is_open {
            return Ok(());
        }
        let result = if need_sync { self.sync() } else { self.flush() };
        let _ = fs2::FileExt::unlock(&self.fd);
        release_local_lock(&self.path);
        self.is_open = false;
        result
    }

    fn do_add_event(&mut self, mut event: BinlogEvent) {
        if event.is_partial() {
            event.clear_flag(FLAG_PARTIAL);
            self.pending_partial.push(event);
        } else {
            let pending = mem::take(&mut self.pending_partial);
            for pending_event in pending {
                self.do_run_event(pending_event);
            }
            self.do_run_event(event);
        }
    }

    /// Append one committed record in Run state: stage its bytes and feed
    /// the projection.
    fn do_run_event(&mut self, mut event: BinlogEvent) {
        debug_assert!(self.state == State::Run);
        self.append_staged(event.raw());
        event.offset = self.fd_size;
        if let Err(err) = self.processor.add_event(event) {
            // an id the projection cannot accept is a caller bug; the
            // record is already staged, so there is no way to unwind
            panic!("invalid binlog append: {}", err);
        }
    }

    fn append_staged(&mut self, raw: &[u8]) {
        self.write_buf.extend_from_slice(raw);
        self.fd_size += raw.len() as i64;
        self.fd_events += 1;
    }

    fn lazy_flush(&mut self) {
        if self.write_buf.len() > (1 << 14) {
            if let Err(err) = self.flush() {
                error!("binlog flush failed: {}", err);
            }
        }
    }

    fn check_reindex(&mut self) {
        let fd_size = self.fd_size;
        let live = self.processor.total_raw_events_size();
        let need = |min_size: i64, rate: i64| fd_size > min_size && fd_size / rate > live;
        if need(50_000, 5) || need(100_000, 4) || need(300_000, 3) || need(500_000, 2) {
            info!(
                "regenerating binlog {:?}: {} bytes on disk, {} live",
                self.path, fd_size, live
            );
            if let Err(err) = self.do_reindex() {
                error!("binlog reindex failed: {}", err);
            }
        }
    }

    /// Write the encryption header and route every byte after it through a
    /// fresh AES-CTR stream. No-op in the clear.
    fn reset_encryption(&mut self) -> Result<(), BinlogError> {
        if self.db_key.is_empty() {
            self.encrypted = false;
            return Ok(());
        }

        let salt = if self.key_salt.is_empty() {
            None
        } else {
            Some(self.key_salt.clone())
        };
        let mut record = EncryptionRecord::generate(salt);
        let key = if !self.key_salt.is_empty() && record.key_salt == self.key_salt {
            self.key
        } else {
            encryption::generate_key(&self.db_key, &record.key_salt)
        };
        record.key_hash = encryption::generate_hash(&key);

        let header = BinlogEvent::new(0, TYPE_AES_CTR_ENCRYPTION, 0, 0, &record.store());
        self.append_staged(header.raw());
        self.flush()?; // the header itself stays in the clear

        self.key = key;
        self.key_salt = record.key_salt;
        self.iv = record.iv;
        self.encryption_offset = self.fd_size;
        self.cipher = Some(AesCtrState::new(&self.key, &self.iv));
        self.encrypted = true;
        self.db_key_used = true;
        Ok(())
    }

    /// Rewrite the whole log from the live projection into `<path>.new`,
    /// then swap it into place. The only unrecoverable step is the final
    /// rename: past it the old file is gone, so failure is fatal.
    fn do_reindex(&mut self) -> Result<(), BinlogError> {
        debug_assert!(self.state == State::Run);
        self.flush()?;
        self.state = State::Reindex;

        let start_time = time::now();
        let start_size = file_size(&self.path);
        let start_events = self.fd_events;

        let new_path = rewrite_path(&self.path);
        if let Err(err) = acquire_local_lock(&new_path) {
            self.state = State::Run;
            return Err(err);
        }
        let new_fd = match OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&new_path)
            .and_then(|fd| {
                fd.try_lock_exclusive()?;
                Ok(fd)
            }) {
            Ok(fd) => fd,
            Err(err) => {
                release_local_lock(&new_path);
                self.state = State::Run;
                error!("cannot open {:?} for regeneration: {}", new_path, err);
                return Err(BinlogError::Io(err));
            }
        };

        // the old fd keeps its lock until the old file is unlinked
        let old_fd = mem::replace(&mut self.fd, new_fd);
        self.write_buf.clear();
        self.cipher = None;
        self.encrypted = false;
        self.encryption_offset = 0;
        self.fd_size = 0;
        self.flushed_size = 0;
        self.fd_events = 0;
        self.need_sync = false;

        if let Err(err) = self.reset_encryption() {
            panic!("failed to regenerate binlog {:?}: {}", new_path, err);
        }
        let events: Vec<BinlogEvent> = {
            let mut events = Vec::new();
            self.processor.for_each(|event| events.push(event.clone()));
            events
        };
        for event in &events {
            self.append_staged(event.raw());
        }
        if let Err(err) = self.flush() {
            panic!("failed to regenerate binlog {:?}: {}", new_path, err);
        }
        if start_size != 0 {
            // must sync creation of the replacement before dropping the
            // original
            if let Err(err) = self.fd.sync_all() {
                panic!("failed to sync regenerated binlog {:?}: {}", new_path, err);
            }
        }
        self.need_sync = false;

        if let Err(err) = fs::remove_file(&self.path) {
            panic!("failed to unlink old binlog {:?}: {}", self.path, err);
        }
        drop(old_fd); // releases the old OS lock
        if let Err(err) = fs::rename(&new_path, &self.path) {
            // the original is already gone; storage is compromised
            panic!(
                "failed to rename binlog {:?} over {:?}: {}",
                new_path, self.path, err
            );
        }
        release_local_lock(&new_path);
        self.state = State::Run;

        info!(
            "regenerated binlog {:?} in {:.3}s: {} -> {} bytes, {} -> {} events",
            self.path,
            time::now() - start_time,
            start_size,
            self.fd_size,
            start_events,
            self.fd_events
        );
        Ok(())
    }

    /* ---- load ---- */

    fn load(&mut self, replay_cb: &mut dyn FnMut(&BinlogEvent)) -> Result<(), BinlogError> {
        let file_len = self.fd.metadata().map_err(BinlogError::Io)?.len() as i64;
        self.fd.seek(SeekFrom::Start(0))?;

        let mut read_cipher: Option<AesCtrState> = None;
        let mut pending: Vec<u8> = Vec::new();
        let mut parse_offset: i64 = 0;
        let mut failure: Option<BinlogError> = None;

        loop {
            if !fill_buffer(&mut self.fd, &mut read_cipher, &mut pending, 4)? {
                if !pending.is_empty() {
                    warn!(
                        "binlog {:?}: dropping {} trailing bytes",
                        self.path,
                        pending.len()
                    );
                }
                break;
            }
            let size =
                u32::from_le_bytes([pending[0], pending[1], pending[2], pending[3]]) as usize;
            if size < MIN_SIZE || size > MAX_SIZE || size % 4 != 0 {
                let err = BinlogError::Corruption(format!(
                    "bad event size {} at offset {}",
                    size, parse_offset
                ));
                failure = self.classify_bad_tail(parse_offset, file_len, err)?;
                break;
            }
            if !fill_buffer(&mut self.fd, &mut read_cipher, &mut pending, size)? {
                warn!(
                    "binlog {:?}: truncated event at offset {}",
                    self.path, parse_offset
                );
                break;
            }

            let raw: Vec<u8> = pending.drain(..size).collect();
            let mut event = match BinlogEvent::from_raw(raw) {
                Ok(event) => event,
                Err(err) => {
                    let at_tail = parse_offset + size as i64 >= file_len;
                    if at_tail {
                        warn!(
                            "binlog {:?}: discarding torn tail record at {}: {}",
                            self.path, parse_offset, err
                        );
                        break;
                    }
                    failure = self.classify_bad_tail(parse_offset, file_len, err)?;
                    break;
                }
            };

            parse_offset += size as i64;
            event.offset = parse_offset;

            if event.type_ == TYPE_AES_CTR_ENCRYPTION {
                self.apply_encryption_record(&event)?;
                read_cipher = Some(AesCtrState::new(&self.key, &self.iv));
                self.encryption_offset = parse_offset;
                // bytes already buffered past the header are ciphertext
                if let Some(cipher) = &mut read_cipher {
                    cipher.apply(&mut pending);
                }
            }

            // partial records commit together with the next full record;
            // an uncommitted run at EOF is discarded by the final truncate
            if event.is_partial() {
                event.clear_flag(FLAG_PARTIAL);
                self.pending_partial.push(event);
                continue;
            }
            let pending_events = mem::take(&mut self.pending_partial);
            let mut feed_error = None;
            for pending_event in pending_events {
                if let Err(err) = self.processor.add_event(pending_event) {
                    feed_error = Some(err);
                    break;
                }
            }
            if feed_error.is_none() {
                if let Err(err) = self.processor.add_event(event) {
                    feed_error = Some(err);
                }
            }
            if let Some(err) = feed_error {
                let good_offset = self.processor.offset();
                failure = self.classify_bad_tail(good_offset, file_len, err)?;
                break;
            }
        }
        self.pending_partial.clear();

        if let Some(err) = failure {
            return Err(err);
        }

        // settle the file at the last accepted record boundary
        let offset = self.processor.offset();
        if offset != file_len {
            warn!(
                "truncating binlog {:?} from {} to {} bytes",
                self.path, file_len, offset
            );
            self.fd.set_len(offset as u64)?;
            self.db_key_used = false; // force a rewrite of the settled log
        }
        self.fd.seek(SeekFrom::Start(offset as u64))?;
        self.fd_size = offset;
        self.flushed_size = offset;

        self.processor.for_each(|event| replay_cb(event));

        self.state = State::Run;
        self.last_event_id = self.processor.last_event_id();
        self.info.last_event_id = self.last_event_id;

        if self.encrypted {
            // continue the write keystream where the settled file ends
            let mut cipher = AesCtrState::new(&self.key, &self.iv);
            cipher.seek((self.fd_size - self.encryption_offset) as u64);
            self.cipher = Some(cipher);
        }

        // encrypt, decrypt or rekey when the given keys disagree with the
        // stored state
        if (!self.db_key.is_empty() && !self.db_key_used)
            || (self.db_key.is_empty() && self.encrypted)
        {
            self.key_salt.clear();
            self.do_reindex()?;
        }

        Ok(())
    }

    /// Decide whether a bad region is a discardable tail. Returns `None`
    /// (and truncates nothing yet; the caller's final truncate settles the
    /// file) for an all-zero or empty remainder, or passes `err` back for
    /// anything else.
    fn classify_bad_tail(
        &mut self,
        good_offset: i64,
        file_len: i64,
        err: BinlogError,
    ) -> Result<Option<BinlogError>, BinlogError> {
        if good_offset >= file_len {
            return Ok(None);
        }
        if raw_tail_is_zero(&mut self.fd, good_offset as u64)? {
            warn!(
                "binlog {:?}: zero-filled tail after offset {} ({})",
                self.path, good_offset, err
            );
            return Ok(None);
        }
        Ok(Some(err))
    }

    fn apply_encryption_record(&mut self, event: &BinlogEvent) -> Result<(), BinlogError> {
        let record = EncryptionRecord::parse(event.data())?;

        let mut key = if !self.key_salt.is_empty() && self.key_salt == record.key_salt {
            self.key
        } else if !self.db_key.is_empty() {
            record.generate_key(&self.db_key)
        } else {
            [0u8; KEY_SIZE]
        };

        if encryption::generate_hash(&key) != record.key_hash {
            if self.old_db_key.is_empty() {
                return Err(BinlogError::WrongPassword);
            }
            key = record.generate_key(&self.old_db_key);
            if encryption::generate_hash(&key) != record.key_hash {
                return Err(BinlogError::WrongPassword);
            }
            // the old key opens the log; leave db_key_used unset so the
            // log is rewritten under the new key after load
        } else if !self.db_key.is_empty() {
            self.db_key_used = true;
        }

        self.key = key;
        self.key_salt = record.key_salt;
        self.iv = record.iv;
        self.encrypted = true;
        Ok(())
    }
}

impl Drop for Binlog {
    fn drop(&mut self) {
        if let Err(err) = self.close_impl(true) {
            error!("failed to close binlog {:?}: {}", self.path, err);
        }
    }
}
