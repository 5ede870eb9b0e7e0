use chrono::{NaiveDate, NaiveTime};
use presensi_core::IdentityKey;
use std::fmt;
use std::str::FromStr;

/// The attendance action selected on the kiosk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    CheckIn,
    CheckOut,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::CheckIn => "CHECK_IN",
            Mode::CheckOut => "CHECK_OUT",
        }
    }

    /// Spoken/printed form, e.g. "check in".
    pub fn label(self) -> &'static str {
        match self {
            Mode::CheckIn => "check in",
            Mode::CheckOut => "check out",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CHECK_IN" => Ok(Mode::CheckIn),
            "CHECK_OUT" => Ok(Mode::CheckOut),
            other => Err(format!("unknown mode '{other}'")),
        }
    }
}

/// One durable attendance mark. Written once, never updated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttendanceEvent {
    pub name: IdentityKey,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub mode: Mode,
    pub status: String,
}

impl fmt::Display for AttendanceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} | {} | {} | {}",
            self.date.format("%Y-%m-%d"),
            self.time.format("%H:%M:%S"),
            self.name,
            self.mode,
            self.status
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_roundtrip_str() {
        for mode in [Mode::CheckIn, Mode::CheckOut] {
            assert_eq!(mode.as_str().parse::<Mode>(), Ok(mode));
        }
        assert!("MASUK".parse::<Mode>().is_err());
    }

    #[test]
    fn test_event_display() {
        let event = AttendanceEvent {
            name: IdentityKey::new("alice"),
            date: NaiveDate::from_ymd_opt(2026, 10, 19).unwrap(),
            time: NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
            mode: Mode::CheckIn,
            status: "on time".into(),
        };
        assert_eq!(event.to_string(), "2026-10-19 08:00:00 | ALICE | CHECK_IN | on time");
    }
}
