//! CPU and memory sampling via sysinfo.

use std::sync::Mutex;
use sysinfo::System;

/// Shared sampler for process-host CPU and memory utilisation.
///
/// sysinfo derives CPU usage from the delta between two refreshes, so the
/// very first sample reads low; the governor only consults the monitor on
/// acquire paths where a conservative first reading is harmless.
pub struct SystemMonitor {
    system: Mutex<System>,
}

impl SystemMonitor {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu_usage();
        system.refresh_memory();
        Self {
            system: Mutex::new(system),
        }
    }

    /// Sample current (cpu%, memory%) in the 0-100 range.
    pub fn sample(&self) -> (f32, f32) {
        let mut sys = match self.system.lock() {
            Ok(guard) => guard,
            // A poisoned sampler must not wedge acquires; report idle.
            Err(_) => return (0.0, 0.0),
        };

        sys.refresh_cpu_usage();
        sys.refresh_memory();

        let cpu = sys.global_cpu_info().cpu_usage();
        let total = sys.total_memory();
        let memory = if total == 0 {
            0.0
        } else {
            (sys.used_memory() as f32 / total as f32) * 100.0
        };

        (cpu, memory)
    }
}

impl Default for SystemMonitor {
    fn default() -> Self {
        Self::new()
    }
}
