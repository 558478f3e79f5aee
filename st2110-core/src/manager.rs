//! Session Manager: fixed-capacity per-kind slot
//! tables, scheduler selection satisfying quota/mask/NUMA constraints,
//! and quota-based shedding on "session-late".

use crate::collab::NetworkInfo;
use crate::config::ManagerConfig;
use crate::error::{CoreError, CoreResult};
use crate::scheduler::tasklet::TaskletOps;
use crate::scheduler::Scheduler;
use crate::stats::SessionStats;
use st2110_wire::{EthHdr, Ipv4Hdr, UdpHdr};
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum SessionKind {
    St20,
    St22,
    St30,
    St40,
    St41,
}

/// Cached L2/L3/L4 header template for one slot's destination, rebuilt
/// by `update_destination` whenever the application (re)resolves the
/// destination MAC.
#[derive(Debug, Copy, Clone, Default)]
pub struct HdrTemplate {
    pub eth: EthHdr,
    pub ip: Ipv4Hdr,
    pub udp: UdpHdr,
}

struct Slot {
    active: bool,
    scheduler_id: Option<usize>,
    tasklet_id: Option<usize>,
    stats: SessionStats,
    hdr_template: Option<HdrTemplate>,
}

impl Default for Slot {
    fn default() -> Self {
        Self { active: false, scheduler_id: None, tasklet_id: None, stats: SessionStats::default(), hdr_template: None }
    }
}

/// Fixed-capacity slot table for one session kind, guarded by a single
/// mutex standing in for a per-slot spinlock — the core's tick rate
/// makes contention negligible in practice.
struct SlotTable {
    slots: Mutex<Vec<Slot>>,
}

impl SlotTable {
    fn new(capacity: usize) -> Self {
        Self { slots: Mutex::new((0..capacity).map(|_| Slot::default()).collect()) }
    }
}

/// Owns the fixed slot tables and the set of schedulers sessions can
/// be attached to. Does not own the schedulers' lifecycle (the
/// application starts/stops them); it only picks among the live ones.
pub struct SessionManager {
    schedulers: Vec<Arc<Scheduler>>,
    video: SlotTable,
    audio: SlotTable,
    anc: SlotTable,
    fastmeta: SlotTable,
}

impl SessionManager {
    pub fn new(config: ManagerConfig, schedulers: Vec<Arc<Scheduler>>) -> Self {
        let video = SlotTable::new(config.tx_video_slots_per_scheduler * schedulers.len().max(1));
        let audio = SlotTable::new(config.tx_audio_slots_global);
        let anc = SlotTable::new(config.tx_anc_slots_global);
        let fastmeta = SlotTable::new(config.tx_fastmeta_slots_global);
        Self { schedulers, video, audio, anc, fastmeta }
    }

    fn table(&self, kind: SessionKind) -> &SlotTable {
        match kind {
            SessionKind::St20 | SessionKind::St22 => &self.video,
            SessionKind::St30 => &self.audio,
            SessionKind::St40 => &self.anc,
            SessionKind::St41 => &self.fastmeta,
        }
    }

    /// Reserve `required_mbs` of quota on the first scheduler with room,
    /// in order. A real NUMA-aware pick would also check
    /// `Scheduler::claimed_lcore`'s socket; this selects purely on quota
    /// headroom, leaving socket affinity to the caller's
    /// `preferred_socket` at `Scheduler::start`.
    fn reserve_scheduler(&self, required_mbs: u64) -> Option<usize> {
        self.schedulers.iter().position(|sch| sch.add_quota(required_mbs))
    }

    /// Attach a new session of `kind`, registering `ops` as a tasklet
    /// on a scheduler with room. Returns the slot index on success.
    pub fn attach(&self, kind: SessionKind, required_mbs: u64, ops: Box<dyn TaskletOps>) -> CoreResult<usize> {
        let table = self.table(kind);
        let mut slots = table.slots.lock().unwrap();
        let Some(slot_idx) = slots.iter().position(|s| !s.active) else {
            return Err(CoreError::NoSessionSlot);
        };
        let Some(sch_idx) = self.reserve_scheduler(required_mbs) else {
            return Err(CoreError::NoSessionSlot);
        };
        let tasklet_id = self.schedulers[sch_idx].attach_tasklet(ops);

        slots[slot_idx] = Slot {
            active: true,
            scheduler_id: Some(sch_idx),
            tasklet_id: Some(tasklet_id),
            stats: SessionStats::default(),
            hdr_template: None,
        };
        Ok(slot_idx)
    }

    /// Rebuild the slot's L2/L3/L4 header template under the slot
    /// lock: resolves the destination MAC through `net`, then fills in
    /// the Ethernet/IPv4/UDP templates the session's builder prepends
    /// to every packet.
    #[allow(clippy::too_many_arguments)]
    pub fn update_destination(
        &self,
        kind: SessionKind,
        slot_idx: usize,
        port: u16,
        net: &dyn NetworkInfo,
        dst_ip: Ipv4Addr,
        dst_port: u16,
        src_port: u16,
        resolve_timeout: Duration,
    ) -> CoreResult<()> {
        let table = self.table(kind);
        let mut slots = table.slots.lock().unwrap();
        let Some(slot) = slots.get_mut(slot_idx).filter(|s| s.active) else {
            return Err(CoreError::NoSessionSlot);
        };

        let dst_mac = net.dst_ip_to_mac(port, dst_ip, resolve_timeout)?;
        let src_mac = net.src_mac(port);
        let src_ip = net.src_ip(port);

        let eth = EthHdr { dst_mac, src_mac, ethertype: 0x0800u16.to_be_bytes() };
        let mut ip = Ipv4Hdr {
            version_ihl: 0x45,
            dscp_ecn: 0,
            total_len: [0, 0],
            id: [0, 0],
            flags_frag_off: [0, 0],
            ttl: 64,
            protocol: 17,
            checksum: [0, 0],
            src_ip: src_ip.octets(),
            dst_ip: dst_ip.octets(),
        };
        ip.fix_checksum();
        let udp = UdpHdr { src_port: src_port.to_be_bytes(), dst_port: dst_port.to_be_bytes(), len: [0, 0], checksum: [0, 0] };

        slot.hdr_template = Some(HdrTemplate { eth, ip, udp });
        Ok(())
    }

    pub fn hdr_template(&self, kind: SessionKind, slot_idx: usize) -> Option<HdrTemplate> {
        let table = self.table(kind);
        let slots = table.slots.lock().unwrap();
        slots.get(slot_idx).filter(|s| s.active).and_then(|s| s.hdr_template)
    }

    /// Idempotent: detaching an already-inactive slot is a no-op.
    pub fn detach(&self, kind: SessionKind, slot_idx: usize) {
        let table = self.table(kind);
        let mut slots = table.slots.lock().unwrap();
        let Some(slot) = slots.get_mut(slot_idx) else {
            return;
        };
        if !slot.active {
            return;
        }
        if let (Some(sch_idx), Some(tasklet_id)) = (slot.scheduler_id, slot.tasklet_id) {
            self.schedulers[sch_idx].detach_tasklet(tasklet_id);
        }
        *slot = Slot::default();
    }

    pub fn get_session_stats(&self, kind: SessionKind, slot_idx: usize) -> Option<SessionStats> {
        let table = self.table(kind);
        let slots = table.slots.lock().unwrap();
        slots.get(slot_idx).filter(|s| s.active).map(|s| s.stats)
    }

    pub fn reset_session_stats(&self, kind: SessionKind, slot_idx: usize) {
        let table = self.table(kind);
        let mut slots = table.slots.lock().unwrap();
        if let Some(slot) = slots.get_mut(slot_idx).filter(|s| s.active) {
            slot.stats.reset();
        }
    }

    /// Record a late session and drop its reserved quota, enforcing a
    /// hard session-late condition by shedding quota back to the pool.
    pub fn shed_quota(&self, kind: SessionKind, slot_idx: usize, mbs: u64) {
        let table = self.table(kind);
        let slots = table.slots.lock().unwrap();
        if let Some(slot) = slots.get(slot_idx).filter(|s| s.active) {
            if let Some(sch_idx) = slot.scheduler_id {
                self.schedulers[sch_idx].put(mbs);
            }
        }
    }

    pub fn capacity(&self, kind: SessionKind) -> usize {
        self.table(kind).slots.lock().unwrap().len()
    }

    pub fn active_count(&self, kind: SessionKind) -> usize {
        self.table(kind).slots.lock().unwrap().iter().filter(|s| s.active).count()
    }
}
