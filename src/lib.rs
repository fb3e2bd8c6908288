pub mod cli;
pub mod config;
pub mod detector;
pub mod notify;
pub mod paths;
pub mod prompt;
pub mod remote;
pub mod ring;
pub mod serve;
pub mod setup;
pub mod sound_check;
pub mod supervisor;
pub mod term;
