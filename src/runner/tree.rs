//! Process tree termination.
//!
//! Descendants are found by walking parent ids from `/proc/<pid>/stat`.
//! A process that has already exited is not an error.

use std::collections::{HashMap, VecDeque};

use tracing::debug;

/// Signal sent to a process tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TermSignal {
    Term,
    Kill,
}

/// Every descendant of `pid`, parents before children.
pub fn descendants(pid: u32) -> Vec<u32> {
    let children = children_by_parent();
    let mut found = Vec::new();
    let mut queue = VecDeque::from([pid]);

    while let Some(parent) = queue.pop_front() {
        if let Some(kids) = children.get(&parent) {
            for &kid in kids {
                if !found.contains(&kid) {
                    found.push(kid);
                    queue.push_back(kid);
                }
            }
        }
    }

    found
}

/// Signal every descendant of `pid`. The process itself is left alone.
///
/// Returns the number of processes that received the signal.
pub fn terminate_tree(pid: u32, signal: TermSignal) -> usize {
    let targets = descendants(pid);
    debug!(pid, descendants = targets.len(), ?signal, "terminating process tree");
    targets
        .into_iter()
        .map(|child| signal_process(child, signal))
        .sum()
}

/// Signal one process; 1 if delivered, 0 if it was already gone.
#[cfg(unix)]
pub fn signal_process(pid: u32, signal: TermSignal) -> usize {
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid;

    let sig = match signal {
        TermSignal::Term => Signal::SIGTERM,
        TermSignal::Kill => Signal::SIGKILL,
    };
    match signal::kill(Pid::from_raw(pid as i32), sig) {
        Ok(()) => 1,
        Err(nix::errno::Errno::ESRCH) => 0,
        Err(e) => {
            debug!(pid, error = %e, "failed to signal process");
            0
        }
    }
}

#[cfg(not(unix))]
pub fn signal_process(_pid: u32, _signal: TermSignal) -> usize {
    0
}

fn children_by_parent() -> HashMap<u32, Vec<u32>> {
    let mut map: HashMap<u32, Vec<u32>> = HashMap::new();
    let Ok(entries) = std::fs::read_dir("/proc") else {
        return map;
    };

    for entry in entries.flatten() {
        let Some(pid) = entry.file_name().to_str().and_then(|s| s.parse::<u32>().ok()) else {
            continue;
        };
        // Processes can vanish between read_dir and read
        let Ok(stat) = std::fs::read_to_string(entry.path().join("stat")) else {
            continue;
        };
        if let Some(ppid) = parse_ppid(&stat) {
            map.entry(ppid).or_default().push(pid);
        }
    }

    map
}

/// Parent pid from a `/proc/<pid>/stat` line.
///
/// The command name is parenthesised and may itself contain spaces or
/// parentheses, so parsing starts after the last `)`.
fn parse_ppid(stat: &str) -> Option<u32> {
    let rest = &stat[stat.rfind(')')? + 1..];
    let mut fields = rest.split_whitespace();
    let _state = fields.next()?;
    fields.next()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ppid() {
        assert_eq!(parse_ppid("1234 (make) S 1200 1234 1200 0 -1"), Some(1200));
        assert_eq!(parse_ppid("77 (cc1 (odd) name) R 76 77 76"), Some(76));
        assert_eq!(parse_ppid("garbage"), None);
    }

    #[test]
    fn test_missing_process_is_not_an_error() {
        // Pid far above any default pid_max
        assert_eq!(terminate_tree(4_000_000, TermSignal::Term), 0);
        assert_eq!(signal_process(4_000_000, TermSignal::Term), 0);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_terminate_tree_kills_grandchildren() {
        use std::process::Command;
        use std::time::Duration;

        let mut shell = Command::new("sh")
            .args(["-c", "sleep 30 & sleep 30 & wait"])
            .spawn()
            .unwrap();
        std::thread::sleep(Duration::from_millis(300));

        let before = descendants(shell.id());
        assert_eq!(before.len(), 2);

        assert_eq!(terminate_tree(shell.id(), TermSignal::Term), 2);
        // The shell's wait returns once both sleeps are gone
        let status = shell.wait().unwrap();
        assert!(status.code().is_some());
    }
}
