//! Child process supervision with replayable, tailable output logs.
//!
//! Commands run through [`exec::Execution`], which records stdout, stderr and
//! stdin as framed records through a [`log::LogWriter`]. A [`log::LogReader`]
//! replays a finished log or follows one that is still being written.
//! [`process`] groups commands into jobs and [`api`] exposes them over HTTP.

pub mod api;
pub mod config;
pub mod exec;
pub mod log;
pub mod logging;
pub mod process;
