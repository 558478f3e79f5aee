//! LCore Registry: a host-wide, crash-safe claim/release
//! of exclusive CPU cores backed by a named shared memory segment and a
//! `flock`-guarded file, not an in-process mutex — claims must be visible
//! across process boundaries, which an in-process lock cannot give.
//!
//! Grounded on the mmap-based zero-copy ring in
//! `runtime::sequencer::SequencerConsumer` (same `memmap2` + raw
//! pointer idiom), but here the segment is a small fixed-capacity table
//! of entries rather than a ring of events, and every write is
//! serialised by an exclusive `flock` instead of being a read-only
//! consumer.

use crate::error::{CoreError, CoreResult};
use bytemuck::{Pod, Zeroable};
use log::{info, warn};
use std::fs::OpenOptions;
use std::io;
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};

pub const DEFAULT_MAX_LCORES: usize = 128;
const HOSTNAME_LEN: usize = 64;
const USER_LEN: usize = 32;
const COMM_LEN: usize = 16;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub enum LcoreRole {
    LibSch = 0,
    AppAllocated = 1,
    LibAppSch = 2,
}

/// One slot of the shared segment. `#[repr(C)]`/`Pod` so it can be
/// written directly into the mmap, the same way `SequencedSlot` is.
#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable, Debug)]
struct LcoreEntry {
    active: u8,
    role: u8,
    _pad: [u8; 2],
    socket: i32,
    pid: u32,
    hostname: [u8; HOSTNAME_LEN],
    user: [u8; USER_LEN],
    comm: [u8; COMM_LEN],
}

impl LcoreEntry {
    fn is_active(&self) -> bool {
        self.active != 0
    }

    fn hostname_str(&self) -> String {
        bytes_to_string(&self.hostname)
    }

    fn user_str(&self) -> String {
        bytes_to_string(&self.user)
    }

    fn comm_str(&self) -> String {
        bytes_to_string(&self.comm)
    }
}

fn bytes_to_string(b: &[u8]) -> String {
    let end = b.iter().position(|&c| c == 0).unwrap_or(b.len());
    String::from_utf8_lossy(&b[..end]).into_owned()
}

fn string_to_bytes(s: &str, buf: &mut [u8]) {
    buf.fill(0);
    let bytes = s.as_bytes();
    let n = bytes.len().min(buf.len() - 1);
    buf[..n].copy_from_slice(&bytes[..n]);
}

#[derive(Debug, Clone)]
pub struct LcoreInfo {
    pub lcore_id: u32,
    pub pid: u32,
    pub hostname: String,
    pub user: String,
    pub comm: String,
    pub role: u8,
    pub socket: i32,
}

pub enum CleanAction {
    DeadPids,
    SpecificLcore(u32),
}

/// Holds the open lock file and the mmap for the lifetime of the
/// registry handle. Every process that calls `LcoreRegistry::open`
/// shares the same backing file.
pub struct LcoreRegistry {
    lock_path: PathBuf,
    mmap: memmap2::MmapMut,
    max_lcores: usize,
}

impl LcoreRegistry {
    /// Open (creating if necessary) the registry at `base_dir`, sized
    /// for `max_lcores` entries.
    pub fn open(base_dir: &Path, max_lcores: usize) -> CoreResult<Self> {
        std::fs::create_dir_all(base_dir).map_err(|_| CoreError::LcoreShmAttachFailed)?;
        let lock_path = base_dir.join("lcore_registry.lock");
        let seg_path = base_dir.join("lcore_registry.seg");

        let seg_len = max_lcores * std::mem::size_of::<LcoreEntry>();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&seg_path)
            .map_err(|_| CoreError::LcoreShmAttachFailed)?;
        file.set_len(seg_len as u64)
            .map_err(|_| CoreError::LcoreShmAttachFailed)?;

        let mmap = unsafe {
            memmap2::MmapOptions::new()
                .len(seg_len)
                .map_mut(&file)
                .map_err(|_| CoreError::LcoreShmAttachFailed)?
        };

        Ok(Self {
            lock_path,
            mmap,
            max_lcores,
        })
    }

    fn entries_mut(&mut self) -> &mut [LcoreEntry] {
        bytemuck::cast_slice_mut(&mut self.mmap[..])
    }

    fn entries(&self) -> &[LcoreEntry] {
        bytemuck::cast_slice(&self.mmap[..])
    }

    /// Run `f` while holding an exclusive `flock` on `lock_path`. This
    /// is the only mutation path: all writers across all processes on
    /// this host serialise here.
    fn with_lock<T>(&mut self, f: impl FnOnce(&mut Self) -> T) -> CoreResult<T> {
        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&self.lock_path)
            .map_err(|_| CoreError::FileLockFailed)?;
        let fd = lock_file.as_raw_fd();
        let ret = unsafe { libc::flock(fd, libc::LOCK_EX) };
        if ret != 0 {
            return Err(CoreError::FileLockFailed);
        }
        let result = f(self);
        unsafe { libc::flock(fd, libc::LOCK_UN) };
        Ok(result)
    }

    /// Claim a core for `role`, preferring `preferred_socket` unless
    /// `cross_numa_fallback` permits any socket.
    pub fn claim(
        &mut self,
        preferred_socket: i32,
        role: LcoreRole,
        cross_numa_fallback: bool,
    ) -> CoreResult<u32> {
        let pid = std::process::id();
        let hostname = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_default();
        let user = std::env::var("USER").unwrap_or_else(|_| "unknown".to_string());
        let comm = std::env::current_exe()
            .ok()
            .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
            .unwrap_or_else(|| "st2110".to_string());

        self.with_lock(move |reg| reg.claim_locked(preferred_socket, role, cross_numa_fallback, pid, &hostname, &user, &comm))?
    }

    #[allow(clippy::too_many_arguments)]
    fn claim_locked(
        &mut self,
        preferred_socket: i32,
        role: LcoreRole,
        cross_numa_fallback: bool,
        pid: u32,
        hostname: &str,
        user: &str,
        comm: &str,
    ) -> CoreResult<u32> {
        let max_lcores = self.max_lcores;
        let local_hostname = hostname.to_string();
        let local_user = user.to_string();

        for lcore_id in 0..max_lcores {
            let matches_socket = {
                let e = &self.entries()[lcore_id];
                e.socket == preferred_socket || cross_numa_fallback
            };
            if !matches_socket {
                continue;
            }

            let reclaim = {
                let e = &self.entries()[lcore_id];
                if !e.is_active() {
                    true
                } else if e.hostname_str() == local_hostname && e.user_str() == local_user {
                    !pid_alive(e.pid)
                } else {
                    false
                }
            };

            if reclaim {
                let e = &mut self.entries_mut()[lcore_id];
                e.active = 1;
                e.role = role as u8;
                e.socket = preferred_socket;
                e.pid = pid;
                string_to_bytes(&local_hostname, &mut e.hostname);
                string_to_bytes(&local_user, &mut e.user);
                string_to_bytes(comm, &mut e.comm);
                info!("lcore registry: claimed core {} for pid {}", lcore_id, pid);
                return Ok(lcore_id as u32);
            }
        }

        Err(CoreError::NoCore)
    }

    pub fn release(&mut self, lcore_id: u32) -> CoreResult<()> {
        let idx = lcore_id as usize;
        if idx >= self.max_lcores {
            return Err(CoreError::BadSocket);
        }
        self.with_lock(move |reg| {
            let e = &mut reg.entries_mut()[idx];
            *e = LcoreEntry::zeroed();
        })
    }

    pub fn list(&self) -> Vec<LcoreInfo> {
        self.entries()
            .iter()
            .enumerate()
            .filter(|(_, e)| e.is_active())
            .map(|(i, e)| LcoreInfo {
                lcore_id: i as u32,
                pid: e.pid,
                hostname: e.hostname_str(),
                user: e.user_str(),
                comm: e.comm_str(),
                role: e.role,
                socket: e.socket,
            })
            .collect()
    }

    /// Administrative recovery: reclaim entries left by dead processes.
    pub fn clean(&mut self, action: CleanAction) -> CoreResult<usize> {
        self.with_lock(move |reg| match action {
            CleanAction::DeadPids => {
                let mut reclaimed = 0;
                for e in reg.entries_mut() {
                    if e.is_active() && !pid_alive(e.pid) {
                        warn!("lcore registry: reclaiming stale entry for dead pid {}", e.pid);
                        *e = LcoreEntry::zeroed();
                        reclaimed += 1;
                    }
                }
                reclaimed
            }
            CleanAction::SpecificLcore(id) => {
                let idx = id as usize;
                if idx < reg.max_lcores && reg.entries()[idx].is_active() {
                    reg.entries_mut()[idx] = LcoreEntry::zeroed();
                    1
                } else {
                    0
                }
            }
        })
    }
}

/// `kill(pid, 0)` without sending a signal, to check liveness.
fn pid_alive(pid: u32) -> bool {
    let ret = unsafe { libc::kill(pid as libc::pid_t, 0) };
    if ret == 0 {
        true
    } else {
        io::Error::last_os_error().raw_os_error() != Some(libc::ESRCH)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claim_then_release_frees_the_slot() {
        let dir = tempfile::tempdir().unwrap();
        let mut reg = LcoreRegistry::open(dir.path(), 4).unwrap();
        let id = reg.claim(0, LcoreRole::LibSch, false).unwrap();
        assert_eq!(reg.list().len(), 1);
        reg.release(id).unwrap();
        assert_eq!(reg.list().len(), 0);
    }

    #[test]
    fn claim_exhausts_capacity() {
        let dir = tempfile::tempdir().unwrap();
        let mut reg = LcoreRegistry::open(dir.path(), 2).unwrap();
        reg.claim(0, LcoreRole::LibSch, true).unwrap();
        reg.claim(0, LcoreRole::LibSch, true).unwrap();
        assert_eq!(reg.claim(0, LcoreRole::LibSch, true), Err(CoreError::NoCore));
    }

    #[test]
    fn clean_dead_pids_reclaims_stale_entries() {
        let dir = tempfile::tempdir().unwrap();
        let mut reg = LcoreRegistry::open(dir.path(), 4).unwrap();
        let id = reg.claim(0, LcoreRole::LibSch, true).unwrap();
        {
            let e = &mut reg.entries_mut()[id as usize];
            e.pid = 999_999_999; // very unlikely to be alive
        }
        let reclaimed = reg.clean(CleanAction::DeadPids).unwrap();
        assert_eq!(reclaimed, 1);
        assert_eq!(reg.list().len(), 0);
    }

    #[test]
    fn cross_numa_fallback_ignores_socket_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let mut reg = LcoreRegistry::open(dir.path(), 4).unwrap();
        // all entries default to socket 0; request socket 7 without fallback fails
        assert_eq!(reg.claim(7, LcoreRole::LibSch, false), Err(CoreError::NoCore));
        assert!(reg.claim(7, LcoreRole::LibSch, true).is_ok());
    }
}
