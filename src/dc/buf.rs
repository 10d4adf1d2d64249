use crate::dc::page::{FullPageId, Page};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::{
    ops::{Deref, DerefMut},
    sync::{
        atomic::{AtomicI64, Ordering},
        Arc,
    },
};

/// A pinned page. The page stays pinned while any clone of the guard is
/// alive. Content is reached through [`PinGuard::read`] and
/// [`PinGuard::write`], whose guards release the page lock on drop.
#[derive(Clone)]
pub struct PinGuard(Arc<PinGuardInner>);

impl PinGuard {
    pub(crate) fn new(buf: Buffer) -> Self {
        PinGuard(Arc::new(PinGuardInner::new(buf)))
    }

    pub fn full_id(&self) -> FullPageId {
        self.0.buf.inner.full_id
    }

    /// Acquire the page for read.
    pub fn read(&self) -> PageReadGuard<'_> {
        PageReadGuard {
            guard: self.0.buf.inner.state.read(),
        }
    }

    /// Acquire the page for write. The page is marked dirty.
    pub fn write(&self) -> PageWriteGuard<'_> {
        let mut guard = self.0.buf.inner.state.write();
        guard.is_dirty = true;
        PageWriteGuard { guard }
    }
}

struct PinGuardInner {
    buf: Buffer,
}

impl PinGuardInner {
    fn new(buf: Buffer) -> Self {
        buf.inner.pin_count.fetch_add(1, Ordering::Release);
        Self { buf }
    }
}

impl Drop for PinGuardInner {
    fn drop(&mut self) {
        self.buf.inner.pin_count.fetch_add(-1, Ordering::Release);
    }
}

pub struct PageReadGuard<'a> {
    guard: RwLockReadGuard<'a, BufferState>,
}

impl Deref for PageReadGuard<'_> {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.guard.page.data()
    }
}

pub struct PageWriteGuard<'a> {
    guard: RwLockWriteGuard<'a, BufferState>,
}

impl Deref for PageWriteGuard<'_> {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.guard.page.data()
    }
}

impl DerefMut for PageWriteGuard<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.guard.page.data_mut()
    }
}

#[derive(Clone)]
pub(crate) struct Buffer {
    inner: Arc<BufferInner>,
}

impl Buffer {
    pub fn new(full_id: FullPageId, page: Page, is_dirty: bool) -> Self {
        let inner = BufferInner {
            full_id,
            pin_count: AtomicI64::new(0),
            state: RwLock::new(BufferState { is_dirty, page }),
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    pub fn pin(&self) -> PinGuard {
        PinGuard::new(self.clone())
    }

    pub fn pin_count(&self) -> i64 {
        self.inner.pin_count.load(Ordering::Acquire)
    }

    /// Lock the buffer state exclusively, used by the buffer manager to
    /// flush or reset a page.
    pub fn lock_state(&self) -> RwLockWriteGuard<'_, BufferState> {
        self.inner.state.write()
    }
}

/// Shared state for a buffer. Operations on this struct should
/// hold a lock.
pub(crate) struct BufferState {
    pub is_dirty: bool,
    pub page: Page,
}

struct BufferInner {
    full_id: FullPageId,
    pin_count: AtomicI64,
    state: RwLock<BufferState>,
}
