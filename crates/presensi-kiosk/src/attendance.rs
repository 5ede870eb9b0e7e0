//! The attendance desk: turns a pending mode plus a recognized identity into
//! a durable mark, a popup and a spoken confirmation.
//!
//! The durable store is the source of truth for "already marked". Memory is
//! a per-day cache in front of it and is only set after the write has been
//! queued.

use crate::context::{KioskContext, Popup, Rgb};
use crate::event::{AttendanceEvent, Mode};
use crate::notify::{Announcer, Cue};
use crate::store::AttendanceStore;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use presensi_core::{IdentityKey, IdentityStore};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

const CHECK_IN_COLOR: Rgb = (0, 200, 0);
const CHECK_OUT_COLOR: Rgb = (200, 0, 0);

/// Cutoff times deciding the status string for a mark.
#[derive(Debug, Clone, Copy)]
pub struct StatusPolicy {
    pub check_in_cutoff: NaiveTime,
    pub check_out_cutoff: NaiveTime,
}

impl StatusPolicy {
    pub fn classify(&self, mode: Mode, time: NaiveTime) -> &'static str {
        match mode {
            Mode::CheckIn if time <= self.check_in_cutoff => "on time",
            Mode::CheckIn => "late",
            Mode::CheckOut if time >= self.check_out_cutoff => "on time to leave",
            Mode::CheckOut => "left early",
        }
    }
}

impl Default for StatusPolicy {
    fn default() -> Self {
        Self {
            check_in_cutoff: NaiveTime::from_hms_opt(8, 15, 0).unwrap_or_default(),
            check_out_cutoff: NaiveTime::from_hms_opt(17, 0, 0).unwrap_or_default(),
        }
    }
}

/// Spoken text for a cue. Cached audio is keyed by `(name, cue)`, so this
/// must stay a pure function of both.
pub fn announcement_text(name: &IdentityKey, cue: Cue) -> String {
    match cue {
        Cue::Success(Mode::CheckIn) => format!("Thank you {name}, check in recorded"),
        Cue::Success(Mode::CheckOut) => {
            format!("Thank you {name}, check out recorded. Take care on the way home.")
        }
        Cue::Duplicate(Mode::CheckIn) => format!("{name} has already checked in today"),
        Cue::Duplicate(Mode::CheckOut) => format!("{name} has already checked out today"),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct DayMarks {
    date: NaiveDate,
    checked_in: bool,
    checked_out: bool,
}

impl DayMarks {
    fn fresh(date: NaiveDate) -> Self {
        Self {
            date,
            checked_in: false,
            checked_out: false,
        }
    }

    fn get(&self, mode: Mode) -> bool {
        match mode {
            Mode::CheckIn => self.checked_in,
            Mode::CheckOut => self.checked_out,
        }
    }

    fn set(&mut self, mode: Mode) {
        match mode {
            Mode::CheckIn => self.checked_in = true,
            Mode::CheckOut => self.checked_out = true,
        }
    }
}

/// Session cache of today's marks, keyed by identity.
#[derive(Debug, Default)]
pub struct AttendanceMemory {
    marks: HashMap<IdentityKey, DayMarks>,
}

impl AttendanceMemory {
    /// Today's marks for `name`; an entry from an earlier day is reset first.
    fn today(&mut self, name: &IdentityKey, today: NaiveDate) -> &mut DayMarks {
        let marks = self
            .marks
            .entry(name.clone())
            .or_insert_with(|| DayMarks::fresh(today));
        if marks.date != today {
            *marks = DayMarks::fresh(today);
        }
        marks
    }

    pub fn is_marked(&self, name: &IdentityKey, date: NaiveDate, mode: Mode) -> bool {
        self.marks
            .get(name)
            .is_some_and(|m| m.date == date && m.get(mode))
    }

    pub fn clear(&mut self) {
        self.marks.clear();
    }
}

/// What a trigger did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Recorded(AttendanceEvent),
    Duplicate { name: IdentityKey, mode: Mode },
}

pub struct AttendanceDesk {
    catalog: Arc<IdentityStore>,
    store: Arc<AttendanceStore>,
    announcer: Arc<Announcer>,
    policy: StatusPolicy,
    popup_ttl: Duration,
    memory: AttendanceMemory,
}

impl AttendanceDesk {
    pub fn new(
        catalog: Arc<IdentityStore>,
        store: Arc<AttendanceStore>,
        announcer: Arc<Announcer>,
        policy: StatusPolicy,
        popup_ttl: Duration,
    ) -> Self {
        Self {
            catalog,
            store,
            announcer,
            policy,
            popup_ttl,
            memory: AttendanceMemory::default(),
        }
    }

    pub fn memory(&self) -> &AttendanceMemory {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut AttendanceMemory {
        &mut self.memory
    }

    /// Handle a trigger for `name` at wall-clock `now`. Returns `None` when no
    /// mode is pending. The pending mode is consumed in every other case.
    pub fn handle(
        &mut self,
        ctx: &mut KioskContext,
        name: &IdentityKey,
        now: NaiveDateTime,
        clock: Instant,
    ) -> Option<Outcome> {
        let mode = ctx.take_mode()?;
        let today = now.date();
        let time = now.time().with_nanosecond(0).unwrap_or_else(|| now.time());

        let remembered = self.memory.today(name, today).get(mode);
        let already = remembered || self.store.exists(name, today, mode);

        if already {
            tracing::info!(%name, %mode, remembered, "already marked today");
            let cue = Cue::Duplicate(mode);
            self.announcer.announce(name, cue, || announcement_text(name, cue));
            return Some(Outcome::Duplicate {
                name: name.clone(),
                mode,
            });
        }

        let status = self.policy.classify(mode, time);
        let meta = self.catalog.metadata(name);
        let color = match mode {
            Mode::CheckIn => CHECK_IN_COLOR,
            Mode::CheckOut => CHECK_OUT_COLOR,
        };
        ctx.show_popup(Popup::new(
            vec![
                format!("Name   : {name}"),
                format!("Org    : {}", meta.org),
                format!("Status : {}", meta.status),
                format!("{} {} ({status})", mode.label(), time.format("%H:%M:%S")),
            ],
            color,
            self.popup_ttl,
            clock,
        ));

        let event = AttendanceEvent {
            name: name.clone(),
            date: today,
            time,
            mode,
            status: status.to_string(),
        };
        self.store.record(event.clone());
        let cue = Cue::Success(mode);
        self.announcer.announce(name, cue, || announcement_text(name, cue));
        self.memory.today(name, today).set(mode);

        Some(Outcome::Recorded(event))
    }
}
