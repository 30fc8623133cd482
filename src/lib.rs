//! Interactive history rewriting for content-addressed repositories.
//!
//! Given a linear run of commits and an edit plan (pick, edit, fold, drop,
//! or reword each one), the engine rewrites the run into a new linear
//! sequence, suspending to the user on conflicts and persisting its
//! progress so a later invocation can `--continue` or `--abort`. See the
//! `commands` module for the three entry modes and `repo` for the
//! repository contract.

pub mod actions;
pub mod collapse;
pub mod commands;
pub mod config;
pub mod context;
pub mod editor;
pub mod errors;
pub mod lock;
pub mod node;
pub mod plan;
pub mod repo;
pub mod replace;
pub mod state;
pub mod ui;
