use std::fmt;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::actor::ActorId;

/// Readiness conditions of a registered descriptor, as seen by its owner.
#[derive(Copy, Clone, Default, PartialEq, Eq)]
pub struct PollFlags(u32);

const WRITE: u32 = 0x001;
const READ: u32 = 0x002;
const CLOSE: u32 = 0x004;
const ERROR: u32 = 0x008;

impl PollFlags {
    pub fn empty() -> PollFlags {
        PollFlags(0)
    }

    pub fn read() -> PollFlags {
        PollFlags(READ)
    }

    pub fn write() -> PollFlags {
        PollFlags(WRITE)
    }

    pub fn close() -> PollFlags {
        PollFlags(CLOSE)
    }

    pub fn error() -> PollFlags {
        PollFlags(ERROR)
    }

    pub fn read_write() -> PollFlags {
        PollFlags(READ | WRITE)
    }

    pub fn can_read(&self) -> bool {
        self.has(PollFlags::read())
    }

    pub fn can_write(&self) -> bool {
        self.has(PollFlags::write())
    }

    pub fn can_close(&self) -> bool {
        self.has(PollFlags::close())
    }

    pub fn has_pending_error(&self) -> bool {
        self.has(PollFlags::error())
    }

    pub fn has(&self, flags: PollFlags) -> bool {
        (self.0 & flags.0) == flags.0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn raw(&self) -> u32 {
        self.0
    }

    pub fn from_raw(raw: u32) -> PollFlags {
        PollFlags(raw)
    }
}

impl std::ops::BitOr for PollFlags {
    type Output = PollFlags;

    fn bitor(self, other: PollFlags) -> PollFlags {
        PollFlags(self.0 | other.0)
    }
}

impl fmt::Debug for PollFlags {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        let mut one = false;
        for (flag, name) in [
            (PollFlags::read(), "Read"),
            (PollFlags::write(), "Write"),
            (PollFlags::close(), "Close"),
            (PollFlags::error(), "Error"),
        ] {
            if self.has(flag) {
                if one {
                    write!(fmt, " | ")?;
                }
                write!(fmt, "{}", name)?;
                one = true;
            }
        }
        if !one {
            fmt.write_str("(empty)")?;
        }
        Ok(())
    }
}

/// Two-word readiness accumulator. `to_write` takes bits from any thread
/// (the poll loop, or a forced `add_flags` from a producer); `flags` is the
/// folded view and is touched only by the owning scheduler thread.
#[derive(Default)]
pub struct PollFlagsSet {
    to_write: AtomicU32,
    flags: AtomicU32,
}

impl PollFlagsSet {
    pub fn new() -> PollFlagsSet {
        PollFlagsSet::default()
    }

    /// Publish readiness from another thread. Returns true when new bits
    /// were added.
    pub fn write_flags(&self, flags: PollFlags) -> bool {
        if flags.is_empty() {
            return false;
        }
        let old = self.to_write.fetch_or(flags.raw(), Ordering::Release);
        old | flags.raw() != old
    }

    /// Fold bits published by other threads into the local view. Owner
    /// thread only. Returns true when the local view changed.
    pub fn sync_with_poll(&self) -> bool {
        let pending = self.to_write.swap(0, Ordering::Acquire);
        if pending == 0 {
            return false;
        }
        let old = self.flags.load(Ordering::Relaxed);
        self.flags.store(old | pending, Ordering::Relaxed);
        old | pending != old
    }

    pub fn read_flags(&self) -> PollFlags {
        self.sync_with_poll();
        self.read_flags_local()
    }

    pub fn read_flags_local(&self) -> PollFlags {
        PollFlags::from_raw(self.flags.load(Ordering::Relaxed))
    }

    /// The owner drained condition `flags`; drop those bits.
    pub fn clear_flags(&self, flags: PollFlags) {
        let old = self.flags.load(Ordering::Relaxed);
        self.flags.store(old & !flags.raw(), Ordering::Relaxed);
    }

    /// Force-mark a condition from the owner thread.
    pub fn add_flags(&self, flags: PollFlags) {
        let old = self.flags.load(Ordering::Relaxed);
        self.flags.store(old | flags.raw(), Ordering::Relaxed);
    }

    pub fn clear(&self) {
        self.to_write.store(0, Ordering::Relaxed);
        self.flags.store(0, Ordering::Relaxed);
    }
}

pub struct PollableFdInfo {
    fd: RawFd,
    flags: PollFlagsSet,
    observer: Option<ActorId<()>>,
    /// Slot in the scheduler's registration table, offset by one; zero
    /// while unregistered.
    token: AtomicUsize,
}

impl PollableFdInfo {
    pub fn raw_fd(&self) -> RawFd {
        self.fd
    }

    pub fn flags(&self) -> &PollFlagsSet {
        &self.flags
    }

    pub fn observer(&self) -> Option<&ActorId<()>> {
        self.observer.as_ref()
    }

    pub(crate) fn set_token(&self, token: usize) {
        self.token.store(token, Ordering::Relaxed);
    }

    pub(crate) fn take_token(&self) -> usize {
        self.token.swap(0, Ordering::Relaxed)
    }
}

/// Owner handle of a descriptor registered (or registrable) with a
/// scheduler. The descriptor itself is not owned: the caller closes it,
/// after `unsubscribe_before_close`.
pub struct PollableFd {
    info: Arc<PollableFdInfo>,
}

impl PollableFd {
    pub fn new(fd: RawFd, observer: Option<ActorId<()>>) -> PollableFd {
        PollableFd {
            info: Arc::new(PollableFdInfo {
                fd,
                flags: PollFlagsSet::new(),
                observer,
                token: AtomicUsize::new(0),
            }),
        }
    }

    pub fn raw_fd(&self) -> RawFd {
        self.info.fd
    }

    pub fn sync_with_poll(&self) -> bool {
        self.info.flags.sync_with_poll()
    }

    pub fn get_flags(&self) -> PollFlags {
        self.info.flags.read_flags()
    }

    pub fn clear_flags(&self, flags: PollFlags) {
        self.info.flags.clear_flags(flags)
    }

    pub fn add_flags(&self, flags: PollFlags) {
        self.info.flags.add_flags(flags)
    }

    pub fn get_ref(&self) -> PollableFdRef {
        PollableFdRef {
            info: self.info.clone(),
        }
    }

    pub(crate) fn info(&self) -> &Arc<PollableFdInfo> {
        &self.info
    }
}

/// Detached reference to a registered descriptor: what the owner keeps
/// after handing the `PollableFd` to a scheduler. Reads the same readiness
/// side-table entry.
#[derive(Clone)]
pub struct PollableFdRef {
    info: Arc<PollableFdInfo>,
}

impl PollableFdRef {
    pub fn raw_fd(&self) -> RawFd {
        self.info.fd
    }

    pub fn sync_with_poll(&self) -> bool {
        self.info.flags.sync_with_poll()
    }

    pub fn get_flags(&self) -> PollFlags {
        self.info.flags.read_flags()
    }

    pub fn clear_flags(&self, flags: PollFlags) {
        self.info.flags.clear_flags(flags)
    }

    pub fn add_flags(&self, flags: PollFlags) {
        self.info.flags.add_flags(flags)
    }

    pub(crate) fn info(&self) -> &Arc<PollableFdInfo> {
        &self.info
    }
}
