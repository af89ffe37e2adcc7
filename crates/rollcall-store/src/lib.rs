//! rollcall-store — SQLite persistence for enrolled students and their
//! attendance history.
//!
//! Implements [`rollcall_core::AttendanceStore`] so a recognition session
//! can load its catalog and record admissions directly against the database.

pub mod db;
pub mod student;

pub use db::{DbError, Store, UNKNOWN_SENTINEL};
pub use student::{AttendanceRecord, Gender, NewStudent, Student};
