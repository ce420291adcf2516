//! Process-wide panic reporting.

use std::sync::Once;

static INSTALL: Once = Once::new();

/// Install a panic hook that reports the panic through `tracing` and then
/// hands it to the previously installed hook. With `abort_on_panic` the
/// process is aborted afterwards, so a panic on any thread ends it.
///
/// Installs at most once per process; the first caller's policy sticks.
pub fn install_panic_hook(abort_on_panic: bool) {
    INSTALL.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            let thread = std::thread::current();
            let thread = thread.name().unwrap_or("<unnamed>");
            let location = info
                .location()
                .map(|l| format!("{}:{}", l.file(), l.line()))
                .unwrap_or_else(|| "unknown location".to_string());
            tracing::error!(
                "Uncaught panic in thread '{}' at {}: {}",
                thread,
                location,
                panic_message(info.payload())
            );
            previous(info);
            if abort_on_panic {
                std::process::abort();
            }
        }));
    });
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}
