use std::cell::RefCell;
use std::rc::Rc;

use crate::device::{RenderingDevice, Rid};

/// Device resources that are logically freed but may still be referenced by
/// submitted draw lists. They are destroyed by [`RetireQueue::flush`], which
/// the renderer only calls from `update()`.
#[derive(Clone, Default)]
pub(crate) struct RetireQueue {
    pending: Rc<RefCell<Vec<Rid>>>,
}

impl RetireQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn retire(&self, rid: Rid) {
        self.pending.borrow_mut().push(rid);
    }

    pub(crate) fn len(&self) -> usize {
        self.pending.borrow().len()
    }

    pub(crate) fn flush<D: RenderingDevice>(&self, device: &mut D) -> usize {
        let pending = std::mem::take(&mut *self.pending.borrow_mut());
        for rid in &pending {
            device.free(*rid);
        }
        pending.len()
    }
}

/// Owns a device resource and hands it to the retire queue when dropped.
pub(crate) struct Retained {
    rid: Rid,
    queue: RetireQueue,
}

impl Retained {
    pub(crate) fn new(rid: Rid, queue: &RetireQueue) -> Self {
        Self {
            rid,
            queue: queue.clone(),
        }
    }

    pub(crate) fn rid(&self) -> Rid {
        self.rid
    }
}

impl Drop for Retained {
    fn drop(&mut self) {
        self.queue.retire(self.rid);
    }
}
