//! Frame ownership and the packet unit carried on the session ring.
//!
//! `FrameDoneNotifier` is the "`Arc<Frame>` with a drop hook" the
//! Cloning it (done once per ST 2022-7 redundant copy) increments the
//! shared refcount the same way an mbuf external-buffer refcount would;
//! dropping the last clone fires `notify_frame_done` exactly once.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Owned frames allocate their own buffer; external frames point at
/// application-owned memory. Kept as a sum type (per the design notes)
/// to avoid a double-free between the two kinds.
pub enum FrameStorage {
    Owned(Vec<u8>),
    External { ptr: *mut u8, len: usize, iova: u64 },
}

// SAFETY: external frame pointers are supplied and synchronized by the
// application across the `get_next_frame`/`notify_frame_done` protocol;
// we never alias mutation across threads without that protocol's
// already-established ordering.
unsafe impl Send for FrameStorage {}
unsafe impl Sync for FrameStorage {}

impl FrameStorage {
    pub fn as_slice(&self) -> &[u8] {
        match self {
            FrameStorage::Owned(v) => v.as_slice(),
            FrameStorage::External { ptr, len, .. } => unsafe {
                std::slice::from_raw_parts(*ptr, *len)
            },
        }
    }

    pub fn len(&self) -> usize {
        match self {
            FrameStorage::Owned(v) => v.len(),
            FrameStorage::External { len, .. } => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iova(&self) -> u64 {
        match self {
            FrameStorage::Owned(_) => 0,
            FrameStorage::External { iova, .. } => *iova,
        }
    }
}

/// Fires the app's `notify_frame_done(index)` callback once the last
/// clone (the last in-flight packet referencing this frame) is dropped.
pub struct FrameDoneNotifier {
    index: u32,
    remaining: Arc<AtomicUsize>,
    on_done: Arc<dyn Fn(u32) + Send + Sync>,
}

impl FrameDoneNotifier {
    pub fn index(&self) -> u32 {
        self.index
    }
}

impl Clone for FrameDoneNotifier {
    fn clone(&self) -> Self {
        // A clone models a new in-flight reference (e.g. the ST 2022-7
        // redundant-port copy): bump the shared count.
        self.remaining.fetch_add(1, Ordering::AcqRel);
        Self {
            index: self.index,
            remaining: Arc::clone(&self.remaining),
            on_done: Arc::clone(&self.on_done),
        }
    }
}

impl Drop for FrameDoneNotifier {
    fn drop(&mut self) {
        if self.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
            (self.on_done)(self.index);
        }
    }
}

/// One slot in a session's fixed frame pool (N frames, N in [2, 256]
/// for ST20).
struct FrameSlot {
    storage: FrameStorage,
    refcount: Arc<AtomicUsize>,
    checked_out: bool,
}

/// A session-owned, fixed-capacity pool of frames. `get_next_frame`
/// picks a slot with refcount 0, `checkout` reserves it for the
/// duration of one frame's packets.
pub struct FramePool {
    slots: Vec<FrameSlot>,
    on_done: Arc<dyn Fn(u32) + Send + Sync>,
}

impl FramePool {
    /// Allocate `count` owned frames of `frame_size` bytes each.
    pub fn new_owned(count: usize, frame_size: usize, on_done: Arc<dyn Fn(u32) + Send + Sync>) -> Self {
        let slots = (0..count)
            .map(|_| FrameSlot {
                storage: FrameStorage::Owned(vec![0u8; frame_size]),
                refcount: Arc::new(AtomicUsize::new(0)),
                checked_out: false,
            })
            .collect();
        Self { slots, on_done }
    }

    /// Allocate `count` external frame slots; buffers are populated
    /// later via `set_external` — for external frames, `buffer` and
    /// `iova` must be set before the builder selects the frame.
    pub fn new_external(count: usize, on_done: Arc<dyn Fn(u32) + Send + Sync>) -> Self {
        let slots = (0..count)
            .map(|_| FrameSlot {
                storage: FrameStorage::External {
                    ptr: std::ptr::null_mut(),
                    len: 0,
                    iova: 0,
                },
                refcount: Arc::new(AtomicUsize::new(0)),
                checked_out: false,
            })
            .collect();
        Self { slots, on_done }
    }

    pub fn set_external(&mut self, index: u32, ptr: *mut u8, len: usize, iova: u64) {
        if let Some(slot) = self.slots.get_mut(index as usize) {
            slot.storage = FrameStorage::External { ptr, len, iova };
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Returns the first frame index with refcount 0 and not already
    /// checked out, mirroring the app's `get_next_frame` pull model
    /// applied to a pool the core itself owns (used by tests and the
    /// sample binary's default frame source).
    pub fn next_free(&self) -> Option<u32> {
        self.slots
            .iter()
            .enumerate()
            .find(|(_, s)| !s.checked_out && s.refcount.load(Ordering::Acquire) == 0)
            .map(|(i, _)| i as u32)
    }

    /// Check out a frame for building. Fails with
    /// `frame_refcnt_nonzero_on_pick` if the refcount
    /// observed by the app is nonzero.
    pub fn checkout(&mut self, index: u32) -> Result<(), crate::error::CoreError> {
        let slot = self
            .slots
            .get_mut(index as usize)
            .ok_or(crate::error::CoreError::FrameRefcntNonzeroOnPick)?;
        if slot.refcount.load(Ordering::Acquire) != 0 {
            return Err(crate::error::CoreError::FrameRefcntNonzeroOnPick);
        }
        slot.checked_out = true;
        Ok(())
    }

    pub fn mark_returned(&mut self, index: u32) {
        if let Some(slot) = self.slots.get_mut(index as usize) {
            slot.checked_out = false;
        }
    }

    pub fn storage(&self, index: u32) -> &FrameStorage {
        &self.slots[index as usize].storage
    }

    /// Construct a fresh notifier for one packet of `index`. The
    /// refcount starts (or is incremented) from zero at the first call
    /// for a frame and is driven back to zero by packet drops.
    pub fn new_packet_notifier(&self, index: u32) -> FrameDoneNotifier {
        let slot = &self.slots[index as usize];
        slot.refcount.fetch_add(1, Ordering::AcqRel);
        FrameDoneNotifier {
            index,
            remaining: Arc::clone(&slot.refcount),
            on_done: Arc::clone(&self.on_done),
        }
    }

    /// Reset every slot's refcount to zero without firing callbacks,
    /// used by fatal-error recovery to drop all current refcounts.
    pub fn reset_all(&mut self) {
        for slot in &mut self.slots {
            slot.refcount.store(0, Ordering::SeqCst);
            slot.checked_out = false;
        }
    }
}

/// The wire-level unit carried on the session ring (the "mbuf-like
/// unit"). `seq` is the full 32-bit ext-sequence counter; the 16-bit
/// wire sequence is `seq as u16`.
#[derive(Clone)]
pub struct Packet {
    pub seq: u32,
    pub target_tsc: u64,
    pub frame_index: u32,
    pub rtp_timestamp: u32,
    pub marker: bool,
    pub second_field: bool,
    pub is_pad: bool,
    pub is_dummy: bool,
    pub payload: Vec<u8>,
    pub done: Option<FrameDoneNotifier>,
}

impl Packet {
    pub fn pad(target_tsc: u64) -> Self {
        Self {
            seq: 0,
            target_tsc,
            frame_index: 0,
            rtp_timestamp: 0,
            marker: false,
            second_field: false,
            is_pad: true,
            is_dummy: false,
            payload: Vec::new(),
            done: None,
        }
    }

    pub fn dummy(target_tsc: u64) -> Self {
        Self {
            is_dummy: true,
            ..Self::pad(target_tsc)
        }
    }

    #[cfg(test)]
    pub fn new_test(seq: u32, target_tsc: u64) -> Self {
        Self {
            seq,
            target_tsc,
            frame_index: 0,
            rtp_timestamp: 0,
            marker: false,
            second_field: false,
            is_pad: false,
            is_dummy: false,
            payload: vec![0u8; 16],
            done: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[test]
    fn notify_fires_once_after_all_packets_of_a_frame_drop() {
        let done_count = Arc::new(AtomicU32::new(0));
        let done_count2 = Arc::clone(&done_count);
        let pool = FramePool::new_owned(
            2,
            1024,
            Arc::new(move |_idx| {
                done_count2.fetch_add(1, Ordering::SeqCst);
            }),
        );

        let n1 = pool.new_packet_notifier(0);
        let n2 = pool.new_packet_notifier(0);
        let n3 = n2.clone(); // models the redundant-port copy

        assert_eq!(done_count.load(Ordering::SeqCst), 0);
        drop(n1);
        assert_eq!(done_count.load(Ordering::SeqCst), 0);
        drop(n2);
        assert_eq!(done_count.load(Ordering::SeqCst), 0);
        drop(n3);
        assert_eq!(done_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn checkout_rejects_nonzero_refcount() {
        let pool = FramePool::new_owned(1, 16, Arc::new(|_| {}));
        let _n = pool.new_packet_notifier(0);
        let mut pool = pool;
        assert!(pool.checkout(0).is_err());
    }

    #[test]
    fn next_free_skips_checked_out_and_inflight_frames() {
        let mut pool = FramePool::new_owned(2, 16, Arc::new(|_| {}));
        assert_eq!(pool.next_free(), Some(0));
        pool.checkout(0).unwrap();
        assert_eq!(pool.next_free(), Some(1));
    }
}
