/// Logs a line tagged with a component name as its target.
/// Usage:
/// ```rust
/// use log::Level;
/// fireguard::guard_log!(Level::Info, "link", "Connected to {}", "/dev/ttyUSB0");
/// ```
/// With the fern format installed by the binary this renders as:
/// [2025-04-25T16:32:10+02:00][INFO ][link][pid=4568][tid=ThreadId(2)] Connected to /dev/ttyUSB0
#[macro_export]
macro_rules! guard_log {
    ($level:expr, $component:expr, $fmt:expr $(, $($arg:tt)+)?) => {
        log::log!(target: $component, $level, $fmt $(, $($arg)+)?)
    };
}
