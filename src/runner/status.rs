use std::path::Path;
use std::time::SystemTime;

use chrono::NaiveDateTime;
use serde::Serialize;
use sysinfo::{Disks, System};

use super::Mode;

/// Snapshot of the runner, logged on every mode switch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusReport {
    pub proj_id: String,
    pub mode: Mode,
    pub at: NaiveDateTime,
    pub live_workers: Vec<String>,
    pub last_event: Option<String>,
    /// Seconds since anything under the project directory was last written.
    pub idle_secs: Option<u64>,
    /// Percent used of the disk holding the data directory.
    pub disk_usage: Option<f32>,
    /// Percent of physical memory in use.
    pub mem_usage: Option<f32>,
}

impl StatusReport {
    /// One-line JSON rendering; empty object if serialization fails.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Host readings attached to a status report.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct HostReadings {
    pub idle_secs: Option<u64>,
    pub disk_usage: Option<f32>,
    pub mem_usage: Option<f32>,
}

impl HostReadings {
    pub fn sample(proj_dir: &Path, data_dir: &Path) -> Self {
        Self {
            idle_secs: newest_mtime(proj_dir)
                .and_then(|t| SystemTime::now().duration_since(t).ok())
                .map(|d| d.as_secs()),
            disk_usage: disk_usage(data_dir),
            mem_usage: mem_usage(),
        }
    }
}

/// Latest modification time of `dir` or anything below it.
pub fn newest_mtime(dir: &Path) -> Option<SystemTime> {
    let mut newest = std::fs::metadata(dir).and_then(|m| m.modified()).ok();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(next) = pending.pop() {
        let Ok(entries) = std::fs::read_dir(&next) else {
            continue;
        };
        for entry in entries.flatten() {
            let Ok(meta) = entry.metadata() else {
                continue;
            };
            if meta.is_dir() {
                pending.push(entry.path());
            }
            if let Ok(modified) = meta.modified() {
                newest = newest.max(Some(modified));
            }
        }
    }
    newest
}

fn disk_usage(path: &Path) -> Option<f32> {
    let path = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    let disks = Disks::new_with_refreshed_list();
    let disk = disks
        .list()
        .iter()
        .filter(|d| path.starts_with(d.mount_point()))
        .max_by_key(|d| d.mount_point().as_os_str().len())?;
    percent(
        disk.total_space().saturating_sub(disk.available_space()),
        disk.total_space(),
    )
}

fn mem_usage() -> Option<f32> {
    let mut sys = System::new();
    sys.refresh_memory();
    percent(sys.used_memory(), sys.total_memory())
}

fn percent(used: u64, total: u64) -> Option<f32> {
    (total > 0).then(|| (used as f64 / total as f64 * 100.0) as f32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::time::Duration;

    #[test]
    fn test_json_shape() {
        let report = StatusReport {
            proj_id: "abc_t1_mz_050124".into(),
            mode: Mode::Passive,
            at: NaiveDate::from_ymd_opt(2024, 5, 1)
                .and_then(|d| d.and_hms_opt(9, 30, 0))
                .unwrap(),
            live_workers: vec!["NOTIFY".into(), "UPLOAD_0".into()],
            last_event: Some("ENTER_PASSIVE_MODE".into()),
            idle_secs: Some(42),
            disk_usage: Some(50.0),
            mem_usage: None,
        };
        let v: serde_json::Value = serde_json::from_str(&report.to_json()).unwrap();
        assert_eq!(v["mode"], "passive");
        assert_eq!(v["at"], "2024-05-01T09:30:00");
        assert_eq!(v["live_workers"][1], "UPLOAD_0");
        assert_eq!(v["idle_secs"], 42);
        assert_eq!(v["disk_usage"], 50.0);
        assert!(v["mem_usage"].is_null());
    }

    #[test]
    fn test_newest_mtime_looks_below_the_root() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("Videos").join("day1");
        std::fs::create_dir_all(&nested).unwrap();
        let file = nested.join("clip.mp4");
        std::fs::write(&file, b"x").unwrap();
        let old = SystemTime::now() - Duration::from_secs(3600);
        std::fs::File::options()
            .write(true)
            .open(&file)
            .unwrap()
            .set_modified(old)
            .unwrap();

        let newest = newest_mtime(dir.path()).unwrap();
        assert!(newest >= std::fs::metadata(&nested).unwrap().modified().unwrap());
        assert!(newest_mtime(&dir.path().join("absent")).is_none());
    }

    #[test]
    fn test_host_readings_are_percentages() {
        let dir = tempfile::tempdir().unwrap();
        let r = HostReadings::sample(dir.path(), dir.path());
        assert!(r.idle_secs.is_some_and(|s| s < 60));
        for pct in [r.disk_usage, r.mem_usage].into_iter().flatten() {
            assert!((0.0..=100.0).contains(&pct));
        }
        assert_eq!(percent(1, 4), Some(25.0));
        assert_eq!(percent(1, 0), None);
    }
}
