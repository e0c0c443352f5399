//! Platform defaults for sandbox policies.

use std::path::PathBuf;

/// Returns standard Linux library paths that should be readable by default.
#[must_use]
pub fn linux_runtime_roots() -> Vec<PathBuf> {
    #[cfg(target_os = "linux")]
    {
        let candidates = [
            "/lib",
            "/lib64",
            "/usr/lib",
            "/usr/lib64",
            "/lib/x86_64-linux-gnu",
            "/usr/lib/x86_64-linux-gnu",
        ];
        candidates
            .iter()
            .filter_map(|path| {
                let candidate = std::path::Path::new(path);
                if candidate.exists() {
                    std::fs::canonicalize(candidate).ok()
                } else {
                    None
                }
            })
            .collect()
    }

    #[cfg(not(target_os = "linux"))]
    {
        Vec::new()
    }
}
