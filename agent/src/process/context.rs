//! Identification of the current OS process.

use std::path::Path;

/// Name of the current process as reported by the OS.
///
/// On Linux and Android this is the first argument in `/proc/self/cmdline`,
/// which the platform rewrites to the process name (`io.tunhost:bg`).
/// Elsewhere the executable file name is used.
pub fn current_process_name() -> String {
    #[cfg(any(target_os = "linux", target_os = "android"))]
    {
        if let Some(name) = read_cmdline_name(Path::new("/proc/self/cmdline")) {
            return name;
        }
    }

    std::env::current_exe()
        .ok()
        .as_deref()
        .and_then(Path::file_name)
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Read the process name from a NUL-separated cmdline file.
pub fn read_cmdline_name(path: &Path) -> Option<String> {
    let raw = std::fs::read(path).ok()?;
    parse_cmdline_name(&raw)
}

fn parse_cmdline_name(raw: &[u8]) -> Option<String> {
    let first = raw.split(|b| *b == 0).next()?;
    let name = String::from_utf8_lossy(first).trim().to_string();
    if name.is_empty() {
        None
    } else {
        Some(name)
    }
}
