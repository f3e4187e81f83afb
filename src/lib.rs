pub mod commands;
pub mod config;
pub mod extract;
pub mod ffmpeg;
pub mod format;
pub mod job;
pub mod prefs;
pub mod queue;
pub mod template;
pub mod transport;
pub mod worker;
