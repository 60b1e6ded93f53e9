//! Child process plumbing shared by the compiler and the test executor.

use std::fs;
use std::io::{self, Read};
use std::path::Path;

use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;

/// Kills the whole process group led by a child when dropped.
///
/// The child must have been spawned with `process_group(0)` so that its pid
/// is also its group id. Dropping the guard reaches every descendant that
/// stayed in the group, including ones left behind after the leader exited.
pub struct ProcessGroup(Option<Pid>);

impl ProcessGroup {
    pub fn of(child: &tokio::process::Child) -> Self {
        Self(child.id().map(|id| Pid::from_raw(id as i32)))
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        if let Some(pgid) = self.0 {
            // ESRCH once every member is gone
            let _ = killpg(pgid, Signal::SIGKILL);
        }
    }
}

/// Reads at most `limit` bytes from the start of `path`
pub fn read_head(path: &Path, limit: usize) -> io::Result<Vec<u8>> {
    let file = fs::File::open(path)?;
    let mut head = Vec::with_capacity(limit.min(64 * 1024));
    file.take(limit as u64).read_to_end(&mut head)?;
    Ok(head)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_read_head_stops_at_limit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out");
        fs::write(&path, "abcdef").unwrap();

        assert_eq!(read_head(&path, 4).unwrap(), b"abcd");
        assert_eq!(read_head(&path, 100).unwrap(), b"abcdef");
        assert!(read_head(&dir.path().join("missing"), 4).is_err());
    }
}
