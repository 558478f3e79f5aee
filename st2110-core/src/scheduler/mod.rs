//! Cooperative, CPU-pinned scheduler
//!
//! The worker loop mirrors `mt_sch.c`'s `sch_tasklet_func`: round-robin
//! over a fixed vector of tasklets, adaptive sleep bounded by a 1s
//! condvar wait with an external wake, and a rolling "cpu idle score"
//! sampled every ~5s. It is plain `std::thread` + `Mutex`/`Condvar`, not
//! an async runtime — an executor's scheduling jitter around `handler`
//! would defeat the pacing budget tasklets run under.

pub mod tasklet;

use crate::error::{CoreError, CoreResult};
use crate::lcore::{LcoreRegistry, LcoreRole};
use log::{info, warn};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tasklet::{TaskletOps, TaskletResult, TaskletSlot};

pub type TaskletId = usize;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SchType {
    /// Pin a freshly-claimed lcore and run a dedicated OS thread.
    Pinned,
    /// Run on a plain detached thread, no core pinning (user opt-out).
    Unpinned,
}

pub struct SchedulerStats {
    pub sleep_ns_total: AtomicU64,
    pub sleep_cnt: AtomicU64,
    pub sleep_ns_min: AtomicU64,
    pub sleep_ns_max: AtomicU64,
    pub avg_ns_per_loop: AtomicU64,
    /// Percent (0-100) of a trailing 5s window spent asleep.
    pub sleep_ratio_score_permille: AtomicU64,
}

impl Default for SchedulerStats {
    fn default() -> Self {
        Self {
            sleep_ns_total: AtomicU64::new(0),
            sleep_cnt: AtomicU64::new(0),
            sleep_ns_min: AtomicU64::new(u64::MAX),
            sleep_ns_max: AtomicU64::new(0),
            avg_ns_per_loop: AtomicU64::new(0),
            sleep_ratio_score_permille: AtomicU64::new(0),
        }
    }
}

struct SleepGate {
    mutex: Mutex<()>,
    condvar: Condvar,
}

impl Default for SleepGate {
    fn default() -> Self {
        Self {
            mutex: Mutex::new(()),
            condvar: Condvar::new(),
        }
    }
}

pub struct Scheduler {
    pub id: usize,
    pub name: String,
    sch_type: SchType,
    lcore_id: Mutex<Option<u32>>,
    tasklets: Mutex<Vec<Option<TaskletSlot>>>,
    request_stop: Arc<AtomicBool>,
    sleep_gate: Arc<SleepGate>,
    thread: Mutex<Option<JoinHandle<()>>>,
    pub stats: Arc<SchedulerStats>,
    default_sleep_us: u64,
    force_sleep_us: u64,
    zero_sleep_thresh_us: u64,
    time_measure: bool,
    data_quota_mbs_total: AtomicU64,
    data_quota_cap_mbs: AtomicU64,
}

impl Scheduler {
    /// `request(type, mask, name, nb_tasklets, socket)`.
    /// `mask`/NUMA selection is delegated to the `LcoreRegistry` at
    /// `start()` time; `nb_tasklets` just pre-sizes the tasklet vector.
    pub fn request(
        id: usize,
        sch_type: SchType,
        name: impl Into<String>,
        nb_tasklets: usize,
        default_sleep_us: u64,
        force_sleep_us: u64,
        zero_sleep_thresh_us: u64,
        time_measure: bool,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            sch_type,
            lcore_id: Mutex::new(None),
            tasklets: Mutex::new((0..nb_tasklets).map(|_| None).collect()),
            request_stop: Arc::new(AtomicBool::new(false)),
            sleep_gate: Arc::new(SleepGate::default()),
            thread: Mutex::new(None),
            stats: Arc::new(SchedulerStats::default()),
            default_sleep_us,
            force_sleep_us,
            zero_sleep_thresh_us,
            time_measure,
            data_quota_mbs_total: AtomicU64::new(0),
            data_quota_cap_mbs: AtomicU64::new(u64::MAX),
        }
    }

    /// Attach a tasklet into the first free slot (or grow the vector).
    /// Guarded by the tasklet-vector mutex, runtime-safe at any time.
    pub fn attach_tasklet(&self, ops: Box<dyn TaskletOps>) -> TaskletId {
        let mut tasklets = self.tasklets.lock().unwrap();
        for (i, slot) in tasklets.iter_mut().enumerate() {
            if slot.is_none() {
                *slot = Some(TaskletSlot::new(ops));
                return i;
            }
        }
        tasklets.push(Some(TaskletSlot::new(ops)));
        tasklets.len() - 1
    }

    /// Mark a tasklet for removal. The worker observes `request_exit`,
    /// calls `stop`, sets `ack_exit`, and frees the slot on its next
    /// tick — safe to call from any thread at any time.
    pub fn detach_tasklet(&self, id: TaskletId) {
        let mut tasklets = self.tasklets.lock().unwrap();
        if let Some(Some(slot)) = tasklets.get_mut(id) {
            slot.request_exit = true;
        }
        self.wake();
    }

    /// Fair-share quota reservation (`add_quota`).
    /// Returns `false` if accepting `mbs` would exceed the configured cap.
    pub fn add_quota(&self, mbs: u64) -> bool {
        let cap = self.data_quota_cap_mbs.load(Ordering::Relaxed);
        let mut cur = self.data_quota_mbs_total.load(Ordering::Relaxed);
        loop {
            if cur.saturating_add(mbs) > cap {
                return false;
            }
            match self.data_quota_mbs_total.compare_exchange_weak(
                cur,
                cur + mbs,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(actual) => cur = actual,
            }
        }
    }

    pub fn put(&self, mbs: u64) {
        self.data_quota_mbs_total.fetch_sub(mbs, Ordering::Relaxed);
    }

    pub fn set_quota_cap(&self, cap_mbs: u64) {
        self.data_quota_cap_mbs.store(cap_mbs, Ordering::Relaxed);
    }

    fn wake(&self) {
        let _guard = self.sleep_gate.mutex.lock().unwrap();
        self.sleep_gate.condvar.notify_all();
    }

    /// Launch the worker thread, claiming an lcore first unless the
    /// caller opted out of pinning.
    pub fn start(
        self: &Arc<Self>,
        registry: Option<&Mutex<LcoreRegistry>>,
        preferred_socket: i32,
    ) -> CoreResult<()> {
        if self.sch_type == SchType::Pinned {
            let registry = registry.ok_or(CoreError::NoCore)?;
            let lcore = registry
                .lock()
                .unwrap()
                .claim(preferred_socket, LcoreRole::LibSch, false)?;
            *self.lcore_id.lock().unwrap() = Some(lcore);
            if let Err(e) = pin_current_thread_to_core(lcore) {
                warn!("scheduler {}: failed to pin to core {}: {}", self.id, lcore, e);
            }
        }

        let sch = Arc::clone(self);
        let handle = std::thread::Builder::new()
            .name(format!("st2110_sch_{}", self.id))
            .spawn(move || sch.worker_loop())
            .map_err(|_| CoreError::NoCore)?;
        *self.thread.lock().unwrap() = Some(handle);
        Ok(())
    }

    /// Request exit and block until the worker thread has drained.
    pub fn stop(&self) {
        self.request_stop.store(true, Ordering::SeqCst);
        self.wake();
        if let Some(handle) = self.thread.lock().unwrap().take() {
            let _ = handle.join();
        }
    }

    fn worker_loop(&self) {
        info!("scheduler {} ({}): worker starting", self.id, self.name);
        {
            let mut tasklets = self.tasklets.lock().unwrap();
            for slot in tasklets.iter_mut().flatten() {
                slot.ops.pre_start();
                slot.ops.start();
                slot.started = true;
            }
        }

        let mut sleep_ratio_start = Instant::now();
        let mut sleep_ratio_sleep_ns: u64 = 0;
        let mut loop_cal_start = Instant::now();
        let mut loop_cnt: u64 = 0;

        while !self.request_stop.load(Ordering::SeqCst) {
            let mut pending_any = false;
            let mut advice_min: Option<u64> = None;

            {
                let mut tasklets = self.tasklets.lock().unwrap();
                for i in 0..tasklets.len() {
                    let Some(mut s) = tasklets[i].take() else {
                        continue;
                    };

                    if s.request_exit {
                        s.ops.stop();
                        s.ack_exit = true;
                        // slot stays None: removed.
                        continue;
                    }

                    let call_start = if self.time_measure {
                        Some(Instant::now())
                    } else {
                        None
                    };
                    let result = s.ops.handler();
                    if let Some(start) = call_start {
                        let elapsed = start.elapsed().as_nanos() as u64;
                        s.stat_total_ns += elapsed;
                        s.stat_calls += 1;
                    }

                    let removed = match result {
                        TaskletResult::HasPending => {
                            pending_any = true;
                            false
                        }
                        TaskletResult::Fatal => {
                            s.ops.stop();
                            true
                        }
                        TaskletResult::AllDone => false,
                    };

                    if removed {
                        continue;
                    }

                    if let Some(advice) = s.ops.advice_sleep_us() {
                        advice_min = Some(advice_min.map_or(advice, |m: u64| m.min(advice)));
                    }
                    tasklets[i] = Some(s);
                }
            }

            loop_cnt += 1;
            if loop_cal_start.elapsed() >= Duration::from_secs(2) {
                let avg = loop_cal_start.elapsed().as_nanos() as u64 / loop_cnt.max(1);
                self.stats.avg_ns_per_loop.store(avg, Ordering::Relaxed);
                loop_cal_start = Instant::now();
                loop_cnt = 0;
            }

            if !pending_any {
                let mut sleep_us = if self.force_sleep_us > 0 {
                    self.force_sleep_us
                } else {
                    self.default_sleep_us
                };
                if let Some(advice) = advice_min {
                    sleep_us = sleep_us.min(advice);
                }

                let sleep_start = Instant::now();
                if sleep_us < self.zero_sleep_thresh_us {
                    std::thread::yield_now();
                } else {
                    let guard = self.sleep_gate.mutex.lock().unwrap();
                    let _ = self
                        .sleep_gate
                        .condvar
                        .wait_timeout(guard, Duration::from_micros(sleep_us).min(Duration::from_secs(1)));
                }
                let delta = sleep_start.elapsed().as_nanos() as u64;
                self.stats.sleep_ns_total.fetch_add(delta, Ordering::Relaxed);
                self.stats.sleep_cnt.fetch_add(1, Ordering::Relaxed);
                self.stats.sleep_ns_min.fetch_min(delta, Ordering::Relaxed);
                self.stats.sleep_ns_max.fetch_max(delta, Ordering::Relaxed);

                sleep_ratio_sleep_ns += delta;
                let window = sleep_ratio_start.elapsed();
                if window >= Duration::from_secs(5) {
                    let permille =
                        (sleep_ratio_sleep_ns as u128 * 1000 / window.as_nanos().max(1)) as u64;
                    self.stats
                        .sleep_ratio_score_permille
                        .store(permille, Ordering::Relaxed);
                    sleep_ratio_sleep_ns = 0;
                    sleep_ratio_start = Instant::now();
                }
            }
        }

        let mut tasklets = self.tasklets.lock().unwrap();
        for slot in tasklets.iter_mut().flatten() {
            slot.ops.stop();
        }
        tasklets.clear();

        if let Some(lcore) = self.lcore_id.lock().unwrap().take() {
            info!("scheduler {}: released lcore {} on stop", self.id, lcore);
            // Actual release() is driven by the owning SessionManager,
            // which holds the shared LcoreRegistry handle.
            let _ = lcore;
        }
        info!("scheduler {} ({}): worker stopped", self.id, self.name);
    }

    pub fn claimed_lcore(&self) -> Option<u32> {
        *self.lcore_id.lock().unwrap()
    }
}

#[cfg(target_os = "linux")]
fn pin_current_thread_to_core(lcore_id: u32) -> Result<(), String> {
    unsafe {
        let mut set: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_ZERO(&mut set);
        libc::CPU_SET(lcore_id as usize, &mut set);
        let ret = libc::sched_setaffinity(
            0,
            std::mem::size_of::<libc::cpu_set_t>(),
            &set as *const libc::cpu_set_t,
        );
        if ret != 0 {
            return Err(std::io::Error::last_os_error().to_string());
        }
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn pin_current_thread_to_core(_lcore_id: u32) -> Result<(), String> {
    Ok(())
}
