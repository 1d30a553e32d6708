//! Optional per-worker profiling output.
//!
//! When `NGRAPH_PROFILE_DIR` is set, each parallel worker writes a small
//! timing-stats file named `<analysis>_thread_<id>_<uuid>.stats` into
//! that directory. Profiling is skipped in serial mode so an outer
//! profiler wrapping the whole run is never nested.

use std::fs;
use std::path::PathBuf;
use std::time::Instant;

use tracing::debug;

/// Environment variable naming the profile output directory.
pub const PROFILE_DIR_ENV: &str = "NGRAPH_PROFILE_DIR";

pub(crate) struct WorkerProfiler {
    start: Instant,
    dir: PathBuf,
    analysis_name: String,
}

impl WorkerProfiler {
    /// Begin profiling for one worker task. Returns `None` when the env
    /// var is unset or the run is serial.
    pub(crate) fn begin(analysis_name: &str, serial: bool) -> Option<Self> {
        if serial {
            return None;
        }
        let dir = std::env::var_os(PROFILE_DIR_ENV)?;
        Some(Self {
            start: Instant::now(),
            dir: PathBuf::from(dir),
            analysis_name: analysis_name.to_string(),
        })
    }

    /// Write the stats file. Failures are logged, never fatal.
    pub(crate) fn finish(self) {
        let elapsed = self.start.elapsed();
        let thread_id = format!("{:?}", std::thread::current().id());
        let thread_id: String = thread_id
            .chars()
            .filter(|c| c.is_ascii_digit())
            .collect();
        let unique = uuid::Uuid::new_v4().simple().to_string();
        let path = self.dir.join(format!(
            "{}_thread_{}_{}.stats",
            self.analysis_name,
            thread_id,
            &unique[..8]
        ));
        let body = format!(
            "analysis: {}\nthread: {}\nwall_seconds: {:.6}\n",
            self.analysis_name,
            thread_id,
            elapsed.as_secs_f64()
        );
        if let Err(err) = fs::create_dir_all(&self.dir).and_then(|_| fs::write(&path, body)) {
            debug!(?path, %err, "failed to write worker profile");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serial_mode_disables_profiling() {
        assert!(WorkerProfiler::begin("max_flow", true).is_none());
    }

    #[test]
    fn test_profile_file_written() {
        let dir = tempfile::tempdir().unwrap();
        std::env::set_var(PROFILE_DIR_ENV, dir.path());
        let profiler = WorkerProfiler::begin("max_flow", false).expect("profiler enabled");
        profiler.finish();
        std::env::remove_var(PROFILE_DIR_ENV);

        let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
        let name = entries[0].as_ref().unwrap().file_name();
        let name = name.to_string_lossy();
        assert!(name.starts_with("max_flow_thread_"));
        assert!(name.ends_with(".stats"));
    }
}
