//! Integration tests for cloudmirror-sync
//!
//! Runs the full engine (plan, schedule, chunked download) against an
//! in-memory remote with scripted faults, an in-memory SQLite progress
//! store and a scratch directory.

mod common;

mod test_failures;
mod test_resume;
mod test_scheduling;
