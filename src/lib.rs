//! Provision a container backed by a private staging copy of selected host
//! directories, and relay shell commands into it.

pub mod cli;
pub mod cmd;
pub mod command;
pub mod config;
pub mod container;
pub mod logger;
pub mod mount;
pub mod remote;
pub mod runtime;
pub mod spinner;
