//! Timer that starts a task on every instant selected by a [CronSchedule].

mod cron;

use std::thread;

use chrono::{DateTime, Local, NaiveDateTime, TimeZone};

pub use cron::{CronParseError, CronSchedule};

/// Fires a task on every tick of a [CronSchedule] in local time.
///
/// Every tick runs on its own thread. A tick doesn't wait for the previous
/// one to finish.
#[derive(Debug, Clone)]
pub struct Scheduler {
    schedule: CronSchedule,
}

impl Scheduler {
    pub fn new(schedule: CronSchedule) -> Self {
        Self { schedule }
    }

    pub fn schedule(&self) -> &CronSchedule {
        &self.schedule
    }

    /// Local fire times after `from`.
    ///
    /// Wall clock instants skipped by a DST transition are left out, ambiguous
    /// ones fire on their first occurrence.
    pub fn upcoming<Tz: TimeZone>(&self, from: DateTime<Tz>) -> Upcoming<'_, Tz> {
        Upcoming {
            schedule: &self.schedule,
            tz: from.timezone(),
            cursor: Some(from.naive_local()),
        }
    }

    /// Fire time following the tick at `fired`, seen at `now`.
    ///
    /// Ticks that passed while the process was suspended or the wall clock
    /// jumped forward are skipped, not caught up.
    pub fn next_tick<Tz: TimeZone>(
        &self,
        fired: DateTime<Tz>,
        now: DateTime<Tz>,
    ) -> Option<DateTime<Tz>> {
        let next = self.upcoming(fired.clone()).next()?;
        if next > now {
            return Some(next);
        }

        log::warn!(
            target: "scheduler",
            "Woke up late, skipping backups due between {} and {}",
            fired.naive_local(),
            now.naive_local()
        );
        self.upcoming(now).next()
    }

    /// Runs `task` on every tick. Never returns.
    pub fn run<F>(&self, task: F) -> !
    where
        F: Fn() + Clone + Send + 'static,
    {
        log::info!(target: "scheduler", "Scheduling backups with '{}'", self.schedule);

        let mut next = self.upcoming(Local::now()).next();
        let mut tick: u64 = 0;
        while let Some(due) = next {
            log::debug!(target: "scheduler", "Next backup at {due}");

            let wait = due.signed_duration_since(Local::now());
            if let Ok(wait) = wait.to_std() {
                thread::sleep(wait);
            }
            tick += 1;

            let task = task.clone();
            let spawned = thread::Builder::new()
                .name(format!("backup-{tick}"))
                .spawn(move || task());
            if let Err(e) = spawned {
                log::error!(target: "scheduler", "Starting backup #{tick} failed: {e}");
            }

            next = self.next_tick(due, Local::now());
        }

        log::error!(target: "scheduler", "Cron expression '{}' never fires again", self.schedule);
        loop {
            thread::park();
        }
    }
}

/// Iterator over the fire times of a [Scheduler]. See [Scheduler::upcoming].
pub struct Upcoming<'a, Tz: TimeZone> {
    schedule: &'a CronSchedule,
    tz: Tz,
    cursor: Option<NaiveDateTime>,
}

impl<Tz: TimeZone> Iterator for Upcoming<'_, Tz> {
    type Item = DateTime<Tz>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let naive = self.schedule.next_after(self.cursor?)?;
            self.cursor = Some(naive);
            if let Some(dt) = self.tz.from_local_datetime(&naive).earliest() {
                return Some(dt);
            }
            log::trace!(target: "scheduler", "Skipping non-existent local time {naive}");
        }
    }
}
