//! Process probing: liveness for garbage-collecting dead tables and parent
//! discovery for inheritance at registration.

use std::fs;

use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid;

/// Outcome of probing one process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Liveness {
    Alive,
    Dead,
    /// The probe failed for a reason other than "no such process"; the
    /// table must be kept.
    Unknown(String),
}

pub trait ProcessProbe: Send + Sync {
    fn liveness(&self, pid: u32) -> Liveness;

    /// Parent of `pid` as the OS reports it, if known.
    fn parent_of(&self, _pid: u32) -> Option<u32> {
        None
    }
}

/// Signal-0 liveness plus `/proc/<pid>/stat` parent lookup.
#[derive(Debug, Default, Clone, Copy)]
pub struct SignalProbe;

impl ProcessProbe for SignalProbe {
    fn liveness(&self, pid: u32) -> Liveness {
        // 0 and anything past i32::MAX would address a process group.
        let raw = match i32::try_from(pid) {
            Ok(raw) if raw > 0 => raw,
            _ => return Liveness::Unknown(format!("pid {} cannot be probed", pid)),
        };
        match kill(Pid::from_raw(raw), None) {
            Ok(()) => Liveness::Alive,
            // Exists, owned by someone else.
            Err(Errno::EPERM) => Liveness::Alive,
            Err(Errno::ESRCH) => Liveness::Dead,
            Err(e) => Liveness::Unknown(e.to_string()),
        }
    }

    fn parent_of(&self, pid: u32) -> Option<u32> {
        let stat = fs::read_to_string(format!("/proc/{}/stat", pid)).ok()?;
        parse_stat_ppid(&stat)
    }
}

/// ppid from a `/proc/<pid>/stat` line. The command name sits in
/// parentheses and may itself contain spaces or parentheses.
fn parse_stat_ppid(stat: &str) -> Option<u32> {
    let after_comm = &stat[stat.rfind(')')? + 1..];
    let mut fields = after_comm.split_whitespace();
    let _state = fields.next()?;
    fields.next()?.parse().ok().filter(|&p| p != 0)
}
