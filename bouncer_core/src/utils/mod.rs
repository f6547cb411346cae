mod line_wrapper;
pub use line_wrapper::LineWrapper;

mod or_log;
pub use or_log::OrLog;

mod pattern;
pub use pattern::Pattern;

/// Current time as a unix timestamp
pub fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Whether `name` looks like a channel name
pub fn is_channel_name(name: &str) -> bool {
    name.starts_with(['#', '&', '!', '+'].as_slice())
}
