pub mod clean;
pub mod pipeline;
pub mod prefs;
pub mod process;
pub mod rename;
pub mod watch;
