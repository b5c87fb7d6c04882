//! Tar identifiers.
//!
//! A tar id is `<yyyyMMddHHmmssSSS>-<token>.tar`: a 17-digit UTC creation
//! timestamp, a dash, a uniqueness token and the `.tar` extension. The
//! finished file of a tar is named exactly after its id.

use std::cmp::Ordering;
use std::fmt;

use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tapestore_error::{Result, TapeError};

use crate::file_name::TAR_EXTENSION;

/// Number of digits in the creation date prefix.
pub const CREATION_DATE_DIGITS: usize = 17;

/// Immutable tar identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TarId {
    id: String,
    created_at: NaiveDateTime,
}

impl TarId {
    /// Parse and validate a tar id.
    pub fn parse(value: &str) -> Result<Self> {
        let invalid = |reason: &str| TapeError::InvalidTarId {
            value: value.to_owned(),
            reason: reason.to_owned(),
        };

        let Some(stem) = value.strip_suffix(TAR_EXTENSION) else {
            return Err(invalid("missing .tar extension"));
        };
        let Some((date, token)) = stem.split_once('-') else {
            return Err(invalid("missing '-' separator"));
        };
        if date.len() != CREATION_DATE_DIGITS || !date.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid("creation date must be 17 digits (yyyyMMddHHmmssSSS)"));
        }
        if token.is_empty() {
            return Err(invalid("empty uniqueness token"));
        }
        if !token.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_') {
            return Err(invalid("token must be [A-Za-z0-9_]"));
        }
        let created_at = parse_creation_date(date)
            .ok_or_else(|| invalid("creation date is not a valid instant"))?;

        Ok(Self {
            id: value.to_owned(),
            created_at,
        })
    }

    /// Build a tar id from a creation instant and a token.
    pub fn new(created_at: NaiveDateTime, token: &str) -> Result<Self> {
        Self::parse(&format!(
            "{}-{token}{TAR_EXTENSION}",
            format_creation_date(created_at)
        ))
    }

    /// Build a tar id for `created_at` with a random token.
    pub fn generate(created_at: NaiveDateTime) -> Result<Self> {
        let token: u64 = rand::thread_rng().r#gen();
        Self::new(created_at, &format!("{token:016x}"))
    }

    /// The id as a string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.id
    }

    /// Sortable creation date prefix (lexical order is chronological order).
    #[must_use]
    pub fn creation_date_key(&self) -> &str {
        &self.id[..CREATION_DATE_DIGITS]
    }

    /// Creation instant embedded in the id.
    #[must_use]
    pub const fn created_at(&self) -> NaiveDateTime {
        self.created_at
    }

    /// Name of the finished file for this tar.
    #[must_use]
    pub fn file_name(&self) -> &str {
        &self.id
    }

    /// Name of the temporary (in-progress) file for this tar.
    #[must_use]
    pub fn tmp_file_name(&self) -> String {
        format!("{}{}", self.id, crate::file_name::TMP_EXTENSION)
    }
}

impl fmt::Display for TarId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

impl PartialOrd for TarId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TarId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.creation_date_key()
            .cmp(other.creation_date_key())
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl TryFrom<String> for TarId {
    type Error = TapeError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<TarId> for String {
    fn from(value: TarId) -> Self {
        value.id
    }
}

fn format_creation_date(at: NaiveDateTime) -> String {
    format!(
        "{:04}{:02}{:02}{:02}{:02}{:02}{:03}",
        at.year(),
        at.month(),
        at.day(),
        at.hour(),
        at.minute(),
        at.second(),
        at.nanosecond() / 1_000_000 % 1000
    )
}

fn parse_creation_date(digits: &str) -> Option<NaiveDateTime> {
    let field = |range: std::ops::Range<usize>| digits.get(range)?.parse::<u32>().ok();
    let year = i32::try_from(field(0..4)?).ok()?;
    NaiveDate::from_ymd_opt(year, field(4..6)?, field(6..8)?)?.and_hms_milli_opt(
        field(8..10)?,
        field(10..12)?,
        field(12..14)?,
        field(14..17)?,
    )
}
