//! Resident memory of the worker process.
//!
//! Test cases are charged with the growth of the *worker's* resident set
//! across their run. This approximates the child's usage only loosely; a
//! stronger measurement would read the child's own peak RSS from the OS.

use std::fs;

/// Current resident set size in KiB, or `None` where `/proc` is unavailable
pub fn resident_kb() -> Option<i64> {
    let status = fs::read_to_string("/proc/self/status").ok()?;
    parse_vm_rss(&status)
}

/// Extracts `VmRSS` (already in kB) from the text of a `status` file
fn parse_vm_rss(status: &str) -> Option<i64> {
    status
        .lines()
        .find_map(|line| line.strip_prefix("VmRSS:"))?
        .split_whitespace()
        .next()?
        .parse()
        .ok()
}

/// Growth between two snapshots; zero when either snapshot is missing
pub fn delta_kb(before: Option<i64>, after: Option<i64>) -> i64 {
    match (before, after) {
        (Some(before), Some(after)) => after - before,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(target_os = "linux")]
    #[test]
    fn test_resident_kb_is_positive_on_linux() {
        assert!(resident_kb().unwrap() > 0);
    }

    #[test]
    fn test_parse_vm_rss() {
        let status = concat!(
            "Name:\toj-pipeline\n",
            "VmPeak:\t   20480 kB\n",
            "VmRSS:\t    9876 kB\n",
            "Threads:\t4\n",
        );
        assert_eq!(parse_vm_rss(status), Some(9876));
        assert_eq!(parse_vm_rss("Name:\tkthreadd\n"), None);
    }

    #[test]
    fn test_delta_kb() {
        assert_eq!(delta_kb(Some(100), Some(164)), 64);
        assert_eq!(delta_kb(Some(164), Some(100)), -64);
        assert_eq!(delta_kb(None, Some(100)), 0);
    }
}
