//! Library to backup a [MongoDB][mongo] database on a schedule.
//!
//! Every tick of the [`schedule`] runs a [`job::BackupJob`]: the database is
//! dumped with [`mongodump`][mongodump] into a local folder, and optionally
//! zipped and uploaded to S3 via the [`backends`].
//!
//! [mongo]: https://www.mongodb.com/
//! [mongodump]: https://www.mongodb.com/docs/database-tools/mongodump/

#![forbid(unsafe_code)]

pub mod backends;
pub mod cli;
pub mod config;
pub mod job;
pub mod mongodb;
pub mod schedule;
pub mod util;
