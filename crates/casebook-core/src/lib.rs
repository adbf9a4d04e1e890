use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use time::{Date, Duration, Month, PrimitiveDateTime, Time, Weekday};

/// Upper bound on the number of occurrences a single recurrence expansion may
/// produce.
pub const MAX_OCCURRENCES: u32 = 366;

/// Upper bound on a recurrence interval (days, weeks, or months depending on
/// the pattern).
pub const MAX_INTERVAL: u32 = 1_000;

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum CoreError {
    #[error("invalid reference: {0}")]
    InvalidReference(String),
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),
    #[error("recurrence unresolvable: {0}")]
    RecurrenceUnresolvable(String),
    #[error("not authorized: {0}")]
    NotAuthorized(String),
    #[error("validation error: {0}")]
    Validation(String),
}

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

define_id!(OrganizationId);
define_id!(TopicId);
define_id!(ParticipantId);
define_id!(ResourceId);
define_id!(UserId);
define_id!(UserGroupId);
define_id!(GroupId);
define_id!(ExclusiveSetId);
define_id!(CaseFileId);
define_id!(StatusRecordId);
define_id!(ActivityTypeId);
define_id!(ActivityId);
define_id!(ViewId);

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    Event,
    Document,
}

impl ActivityKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Event => "event",
            Self::Document => "document",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "event" => Some(Self::Event),
            "document" => Some(Self::Document),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ActivityStatus {
    Scheduled,
    InProgress,
    Available,
    Tentative,
    Confirmed,
    Cancelled,
}

impl ActivityStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::InProgress => "in_progress",
            Self::Available => "available",
            Self::Tentative => "tentative",
            Self::Confirmed => "confirmed",
            Self::Cancelled => "cancelled",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "scheduled" => Some(Self::Scheduled),
            "in_progress" => Some(Self::InProgress),
            "available" => Some(Self::Available),
            "tentative" => Some(Self::Tentative),
            "confirmed" => Some(Self::Confirmed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Whether this label closes an open responsibility tenure without a
    /// replacement.
    #[must_use]
    pub fn is_achieved(self) -> bool {
        self == Self::Available
    }

    #[must_use]
    pub fn applies_to(self, kind: ActivityKind) -> bool {
        match kind {
            ActivityKind::Document => {
                matches!(self, Self::Scheduled | Self::InProgress | Self::Available)
            }
            ActivityKind::Event => {
                matches!(self, Self::Tentative | Self::Confirmed | Self::Cancelled)
            }
        }
    }

    /// Lifecycle labels for one activity kind, in lifecycle order.
    #[must_use]
    pub fn for_kind(kind: ActivityKind) -> &'static [Self] {
        match kind {
            ActivityKind::Document => &[Self::Scheduled, Self::InProgress, Self::Available],
            ActivityKind::Event => &[Self::Tentative, Self::Confirmed, Self::Cancelled],
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CaseStatus {
    Preadmission,
    Admission,
    Present,
    Left,
}

impl CaseStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Preadmission => "preadmission",
            Self::Admission => "admission",
            Self::Present => "present",
            Self::Left => "left",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "preadmission" => Some(Self::Preadmission),
            "admission" => Some(Self::Admission),
            "present" => Some(Self::Present),
            "left" => Some(Self::Left),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Orientation {
    Organization,
    Participant,
}

impl Orientation {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Organization => "organization",
            Self::Participant => "participant",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "organization" => Some(Self::Organization),
            "participant" => Some(Self::Participant),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RecurrencePattern {
    Daily,
    Weekly,
    Monthly,
}

impl RecurrencePattern {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "daily" => Some(Self::Daily),
            "weekly" => Some(Self::Weekly),
            "monthly" => Some(Self::Monthly),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MonthlyMode {
    ByDayOfMonth,
    ByOrdinalWeekday,
}

impl MonthlyMode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ByDayOfMonth => "by_day_of_month",
            Self::ByOrdinalWeekday => "by_ordinal_weekday",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "by_day_of_month" => Some(Self::ByDayOfMonth),
            "by_ordinal_weekday" => Some(Self::ByOrdinalWeekday),
            _ => None,
        }
    }
}

const WALL_CLOCK_FORMAT: &[BorrowedFormatItem<'_>] =
    format_description!("[day]/[month]/[year] [hour]:[minute]:[second]");
const WALL_CLOCK_DATE_FORMAT: &[BorrowedFormatItem<'_>] = format_description!("[day]/[month]/[year]");

/// Parse a wall-clock timestamp in the fixed `DD/MM/YYYY HH:MM:SS` calendar
/// format. A bare `DD/MM/YYYY` reads as midnight. Values carry no timezone
/// and are never converted.
///
/// # Errors
/// Returns [`CoreError::Validation`] when the input matches neither form.
pub fn parse_wall_clock(raw: &str) -> Result<PrimitiveDateTime, CoreError> {
    let trimmed = raw.trim();
    if let Ok(value) = PrimitiveDateTime::parse(trimmed, WALL_CLOCK_FORMAT) {
        return Ok(value);
    }
    if let Ok(date) = Date::parse(trimmed, WALL_CLOCK_DATE_FORMAT) {
        return Ok(PrimitiveDateTime::new(date, Time::MIDNIGHT));
    }
    Err(CoreError::Validation(format!(
        "invalid wall-clock timestamp `{raw}`; expected DD/MM/YYYY HH:MM:SS"
    )))
}

/// Parse a calendar date in the fixed `DD/MM/YYYY` format.
///
/// # Errors
/// Returns [`CoreError::Validation`] when the input does not match.
pub fn parse_wall_clock_date(raw: &str) -> Result<Date, CoreError> {
    Date::parse(raw.trim(), WALL_CLOCK_DATE_FORMAT).map_err(|_| {
        CoreError::Validation(format!("invalid calendar date `{raw}`; expected DD/MM/YYYY"))
    })
}

#[must_use]
pub fn format_wall_clock(value: PrimitiveDateTime) -> String {
    format!(
        "{:02}/{:02}/{:04} {:02}:{:02}:{:02}",
        value.day(),
        u8::from(value.month()),
        value.year(),
        value.hour(),
        value.minute(),
        value.second()
    )
}

#[must_use]
pub fn format_wall_clock_date(value: Date) -> String {
    format!("{:02}/{:02}/{:04}", value.day(), u8::from(value.month()), value.year())
}

/// Serde adapter for [`PrimitiveDateTime`] fields in the fixed wall-clock
/// format.
pub mod wall_clock {
    use serde::{Deserialize, Deserializer, Serializer};
    use time::PrimitiveDateTime;

    /// # Errors
    /// Propagates serializer failures.
    pub fn serialize<S: Serializer>(
        value: &PrimitiveDateTime,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format_wall_clock(*value))
    }

    /// # Errors
    /// Fails when the input is not a fixed-format wall-clock string.
    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<PrimitiveDateTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        super::parse_wall_clock(&raw).map_err(serde::de::Error::custom)
    }

    pub mod option {
        use serde::{Deserialize, Deserializer, Serializer};
        use time::PrimitiveDateTime;

        /// # Errors
        /// Propagates serializer failures.
        pub fn serialize<S: Serializer>(
            value: &Option<PrimitiveDateTime>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match value {
                Some(inner) => serializer.serialize_some(&crate::format_wall_clock(*inner)),
                None => serializer.serialize_none(),
            }
        }

        /// # Errors
        /// Fails when the input is not null and not a fixed-format wall-clock
        /// string.
        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<PrimitiveDateTime>, D::Error> {
            let raw = Option::<String>::deserialize(deserializer)?;
            raw.map(|value| crate::parse_wall_clock(&value).map_err(serde::de::Error::custom))
                .transpose()
        }
    }

    pub mod date {
        use serde::{Deserialize, Deserializer, Serializer};
        use time::Date;

        /// # Errors
        /// Propagates serializer failures.
        pub fn serialize<S: Serializer>(value: &Date, serializer: S) -> Result<S::Ok, S::Error> {
            serializer.serialize_str(&crate::format_wall_clock_date(*value))
        }

        /// # Errors
        /// Fails when the input is not a fixed-format calendar date.
        pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Date, D::Error> {
            let raw = String::deserialize(deserializer)?;
            crate::parse_wall_clock_date(&raw).map_err(serde::de::Error::custom)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct Organization {
    pub id: OrganizationId,
    pub name: String,
    pub description: Option<String>,
    pub internal: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct Topic {
    pub id: TopicId,
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct Participant {
    pub id: ParticipantId,
    pub firstname: String,
    pub lastname: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct Resource {
    pub id: ResourceId,
    pub name: String,
    #[serde(default)]
    pub topics: BTreeSet<TopicId>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct User {
    pub id: UserId,
    pub participant: ParticipantId,
    pub usergroup: Option<UserGroupId>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct CaseFile {
    pub id: CaseFileId,
    pub firstname: String,
    pub lastname: String,
    #[serde(with = "wall_clock::date")]
    pub birthdate: Date,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct Group {
    pub id: GroupId,
    pub organization: OrganizationId,
    pub name: String,
    pub description: Option<String>,
    pub mandatory: bool,
    pub orientation: Orientation,
    #[serde(default)]
    pub topics: BTreeSet<TopicId>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct ExclusiveSet {
    pub id: ExclusiveSetId,
    pub name: String,
    /// Member groups, ascending by group id.
    pub members: Vec<GroupId>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct UserGroup {
    pub id: UserGroupId,
    pub name: String,
    /// Case-file status labels this usergroup may act on. An empty window
    /// authorizes nothing.
    #[serde(default)]
    pub status_window: BTreeSet<CaseStatus>,
    /// Groups whose case files this usergroup reaches.
    #[serde(default)]
    pub case_file_groups: BTreeSet<GroupId>,
    /// Groups whose participants this usergroup acts on. Only groups of
    /// internal organizations may appear here.
    #[serde(default)]
    pub participant_groups: BTreeSet<GroupId>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct ActivityType {
    pub id: ActivityTypeId,
    pub kind: ActivityKind,
    /// Grouping label for event types ("incident", "outing", ...); documents
    /// carry none.
    pub category: Option<String>,
    pub name: String,
    /// Whether activities of this type target a single case file.
    pub individual: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct StatusRecord {
    pub id: StatusRecordId,
    pub case_file: CaseFileId,
    pub organization: OrganizationId,
    pub status: CaseStatus,
    #[serde(with = "wall_clock")]
    pub effective_from: PrimitiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct EventSchedule {
    #[serde(with = "wall_clock")]
    pub start: PrimitiveDateTime,
    #[serde(with = "wall_clock")]
    pub end: PrimitiveDateTime,
    pub all_day: bool,
    pub place: Option<String>,
    pub cost: Option<i64>,
}

/// An activity as submitted for creation, before the store assigns its
/// identity. Recurring events are expanded into one draft per occurrence.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct ActivityDraft {
    pub kind: ActivityKind,
    pub title: String,
    pub description: Option<String>,
    pub status: ActivityStatus,
    pub activity_type: Option<ActivityTypeId>,
    pub author: ParticipantId,
    pub responsible: Option<ParticipantId>,
    pub schedule: Option<EventSchedule>,
    #[serde(default)]
    pub topics: BTreeSet<TopicId>,
    #[serde(default)]
    pub case_files: BTreeSet<CaseFileId>,
    #[serde(default)]
    pub participants: BTreeSet<ParticipantId>,
    #[serde(default)]
    pub resources: BTreeSet<ResourceId>,
}

impl ActivityDraft {
    /// Validate kind/schedule/status coherence before any write.
    ///
    /// # Errors
    /// Returns [`CoreError::Validation`] when the title is empty, when an
    /// event lacks a schedule or a document carries one, when the schedule
    /// runs backwards, or when the status label does not belong to the kind.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.title.trim().is_empty() {
            return Err(CoreError::Validation("activity title MUST be non-empty".to_string()));
        }

        match (self.kind, &self.schedule) {
            (ActivityKind::Event, None) => {
                return Err(CoreError::Validation(
                    "an event MUST carry start and end times".to_string(),
                ));
            }
            (ActivityKind::Document, Some(_)) => {
                return Err(CoreError::Validation(
                    "a document MUST NOT carry a schedule".to_string(),
                ));
            }
            (ActivityKind::Event, Some(schedule)) if schedule.end < schedule.start => {
                return Err(CoreError::Validation(
                    "event end MUST NOT precede its start".to_string(),
                ));
            }
            _ => {}
        }

        if !self.status.applies_to(self.kind) {
            return Err(CoreError::Validation(format!(
                "status `{}` does not apply to a {}",
                self.status.as_str(),
                self.kind.as_str()
            )));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct Activity {
    pub id: ActivityId,
    pub kind: ActivityKind,
    pub title: String,
    pub description: Option<String>,
    pub status: ActivityStatus,
    pub activity_type: Option<ActivityTypeId>,
    pub author: ParticipantId,
    pub responsible: Option<ParticipantId>,
    pub schedule: Option<EventSchedule>,
    #[serde(default)]
    pub topics: BTreeSet<TopicId>,
    #[serde(default)]
    pub case_files: BTreeSet<CaseFileId>,
    #[serde(default)]
    pub participants: BTreeSet<ParticipantId>,
    #[serde(default)]
    pub resources: BTreeSet<ResourceId>,
}

impl Activity {
    #[must_use]
    pub fn from_draft(id: ActivityId, draft: ActivityDraft) -> Self {
        Self {
            id,
            kind: draft.kind,
            title: draft.title,
            description: draft.description,
            status: draft.status,
            activity_type: draft.activity_type,
            author: draft.author,
            responsible: draft.responsible,
            schedule: draft.schedule,
            topics: draft.topics,
            case_files: draft.case_files,
            participants: draft.participants,
            resources: draft.resources,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct View {
    pub id: ViewId,
    pub kind: ActivityKind,
    pub name: String,
    /// Event-type categories the view admits; empty admits every category.
    #[serde(default)]
    pub categories: BTreeSet<String>,
    /// Optional single-type restriction.
    pub type_filter: Option<ActivityTypeId>,
    /// Topic filter; empty means the view declares no topic filter.
    #[serde(default)]
    pub topics: BTreeSet<TopicId>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
pub struct RecurrenceRule {
    pub pattern: RecurrencePattern,
    pub interval: u32,
    pub monthly_mode: Option<MonthlyMode>,
    /// Total occurrences to produce, anchor included. Zero reads as one.
    pub occurrence_count: u32,
}

impl RecurrenceRule {
    /// # Errors
    /// Returns [`CoreError::Validation`] for a zero or oversized interval, an
    /// oversized occurrence count, or a monthly mode that disagrees with the
    /// pattern.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.interval == 0 {
            return Err(CoreError::Validation(
                "recurrence interval MUST be at least 1".to_string(),
            ));
        }
        if self.interval > MAX_INTERVAL {
            return Err(CoreError::Validation(format!(
                "recurrence interval MUST NOT exceed {MAX_INTERVAL}"
            )));
        }
        if self.occurrence_count > MAX_OCCURRENCES {
            return Err(CoreError::Validation(format!(
                "recurrence MUST NOT produce more than {MAX_OCCURRENCES} occurrences"
            )));
        }
        match (self.pattern, self.monthly_mode) {
            (RecurrencePattern::Monthly, None) => Err(CoreError::Validation(
                "monthly recurrence requires a monthly mode".to_string(),
            )),
            (RecurrencePattern::Daily | RecurrencePattern::Weekly, Some(_)) => {
                Err(CoreError::Validation(
                    "a monthly mode only applies to monthly recurrence".to_string(),
                ))
            }
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
pub struct TimeSlot {
    #[serde(with = "wall_clock")]
    pub start: PrimitiveDateTime,
    #[serde(with = "wall_clock")]
    pub end: PrimitiveDateTime,
}

fn arithmetic_overflow() -> CoreError {
    CoreError::Validation("date arithmetic overflow".to_string())
}

fn shift_days(anchor: PrimitiveDateTime, days: i64) -> Result<PrimitiveDateTime, CoreError> {
    anchor.checked_add(Duration::days(days)).ok_or_else(arithmetic_overflow)
}

fn add_months(date: Date, months: u32) -> Result<(i32, Month), CoreError> {
    let zero_based = i64::from(date.year()) * 12 + i64::from(u8::from(date.month())) - 1
        + i64::from(months);
    let year = i32::try_from(zero_based.div_euclid(12)).map_err(|_| arithmetic_overflow())?;
    let month_number = u8::try_from(zero_based.rem_euclid(12) + 1).map_err(|_| arithmetic_overflow())?;
    let month = Month::try_from(month_number).map_err(|_| arithmetic_overflow())?;
    Ok((year, month))
}

fn nth_weekday_in_month(year: i32, month: Month, weekday: Weekday, ordinal: u8) -> Option<Date> {
    let first = Date::from_calendar_date(year, month, 1).ok()?;
    let offset =
        (7 + weekday.number_days_from_monday() - first.weekday().number_days_from_monday()) % 7;
    let day = 1 + offset + (ordinal - 1) * 7;
    if day > time::util::days_in_month(month, year) {
        return None;
    }
    Date::from_calendar_date(year, month, day).ok()
}

fn shift_months(
    anchor: PrimitiveDateTime,
    months: u32,
    mode: MonthlyMode,
) -> Result<PrimitiveDateTime, CoreError> {
    let (year, month) = add_months(anchor.date(), months)?;
    let date = match mode {
        MonthlyMode::ByDayOfMonth => {
            // Shorter target months clamp to their last day.
            let day = anchor.date().day().min(time::util::days_in_month(month, year));
            Date::from_calendar_date(year, month, day).map_err(|_| arithmetic_overflow())?
        }
        MonthlyMode::ByOrdinalWeekday => {
            let weekday = anchor.date().weekday();
            let ordinal = (anchor.date().day() - 1) / 7 + 1;
            nth_weekday_in_month(year, month, weekday, ordinal).ok_or_else(|| {
                CoreError::RecurrenceUnresolvable(format!(
                    "no ordinal {ordinal} {weekday} in {month} {year}"
                ))
            })?
        }
    };
    Ok(PrimitiveDateTime::new(date, anchor.time()))
}

/// Expand one anchor interval under a recurrence rule into the full ordered
/// occurrence list. Every occurrence keeps the anchor's duration; the anchor
/// itself is occurrence zero.
///
/// # Errors
/// Returns [`CoreError::Validation`] for an invalid rule or interval, and
/// [`CoreError::RecurrenceUnresolvable`] when a monthly ordinal-weekday
/// occurrence has no valid date — the whole expansion fails rather than
/// producing a short batch.
pub fn expand_recurrence(
    anchor_start: PrimitiveDateTime,
    anchor_end: PrimitiveDateTime,
    rule: &RecurrenceRule,
) -> Result<Vec<TimeSlot>, CoreError> {
    rule.validate()?;
    if anchor_end < anchor_start {
        return Err(CoreError::Validation("anchor end MUST NOT precede its start".to_string()));
    }

    let duration = anchor_end - anchor_start;
    let count = rule.occurrence_count.max(1);
    let mut slots = Vec::with_capacity(usize::try_from(count).unwrap_or_default());

    for index in 0..count {
        let steps = i64::from(index) * i64::from(rule.interval);
        let start = match rule.pattern {
            RecurrencePattern::Daily => shift_days(anchor_start, steps)?,
            RecurrencePattern::Weekly => shift_days(anchor_start, steps * 7)?,
            RecurrencePattern::Monthly => {
                let mode = rule.monthly_mode.ok_or_else(|| {
                    CoreError::Validation("monthly recurrence requires a monthly mode".to_string())
                })?;
                shift_months(anchor_start, index * rule.interval, mode)?
            }
        };
        let end = start.checked_add(duration).ok_or_else(arithmetic_overflow)?;
        slots.push(TimeSlot { start, end });
    }

    Ok(slots)
}

/// Expand a draft into the ordered list of occurrence drafts to persist.
/// Non-recurring drafts pass through as a single element.
///
/// # Errors
/// Returns [`CoreError::Validation`] when the draft is invalid or recurrence
/// is requested for anything but an event, and propagates expansion failures
/// from [`expand_recurrence`].
pub fn expand_activity(
    draft: &ActivityDraft,
    recurrence: Option<&RecurrenceRule>,
) -> Result<Vec<ActivityDraft>, CoreError> {
    draft.validate()?;

    let Some(rule) = recurrence else {
        return Ok(vec![draft.clone()]);
    };

    if draft.kind != ActivityKind::Event {
        return Err(CoreError::Validation("recurrence applies to events only".to_string()));
    }
    let Some(schedule) = &draft.schedule else {
        return Err(CoreError::Validation("an event MUST carry start and end times".to_string()));
    };

    let slots = expand_recurrence(schedule.start, schedule.end, rule)?;
    Ok(slots
        .into_iter()
        .map(|slot| {
            let mut occurrence = draft.clone();
            if let Some(schedule) = &mut occurrence.schedule {
                schedule.start = slot.start;
                schedule.end = slot.end;
            }
            occurrence
        })
        .collect())
}

/// Append-only trail of per-case-file, per-organization status transitions.
/// The current status of a pair is the record with the latest effective date
/// not after the probe instant; equal effective dates resolve to the record
/// appended last.
#[derive(Debug, Clone, Default)]
pub struct StatusLedger {
    records: Vec<StatusRecord>,
}

impl StatusLedger {
    #[must_use]
    pub fn new(mut records: Vec<StatusRecord>) -> Self {
        records.sort_by_key(|record| {
            (record.case_file, record.organization, record.effective_from, record.id)
        });
        Self { records }
    }

    #[must_use]
    pub fn current_status(
        &self,
        case_file: CaseFileId,
        organization: OrganizationId,
        at: PrimitiveDateTime,
    ) -> Option<CaseStatus> {
        self.records
            .iter()
            .filter(|record| {
                record.case_file == case_file
                    && record.organization == organization
                    && record.effective_from <= at
            })
            .last()
            .map(|record| record.status)
    }

    #[must_use]
    pub fn history(&self, case_file: CaseFileId, organization: OrganizationId) -> Vec<StatusRecord> {
        self.records
            .iter()
            .filter(|record| record.case_file == case_file && record.organization == organization)
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
pub struct OpenTenure {
    pub responsible: ParticipantId,
    #[serde(with = "wall_clock")]
    pub attributed_at: PrimitiveDateTime,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
pub struct ClosedTenure {
    pub responsible: ParticipantId,
    #[serde(with = "wall_clock")]
    pub attributed_at: PrimitiveDateTime,
    #[serde(with = "wall_clock")]
    pub achieved_at: PrimitiveDateTime,
}

/// One tenure of accountability as read back from the ledger; `achieved_at`
/// is null while the tenure is still open.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
pub struct TenureRecord {
    pub responsible: ParticipantId,
    #[serde(with = "wall_clock")]
    pub attributed_at: PrimitiveDateTime,
    #[serde(with = "wall_clock::option")]
    pub achieved_at: Option<PrimitiveDateTime>,
}

/// Responsibility trail of one activity: closed tenures in attribution order
/// plus at most one open tenure. Closed tenures are immutable.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct ResponsibilityLedger {
    closed: Vec<ClosedTenure>,
    open: Option<OpenTenure>,
}

impl ResponsibilityLedger {
    /// Ledger state after the owning activity is created.
    #[must_use]
    pub fn on_create(responsible: Option<ParticipantId>, at: PrimitiveDateTime) -> Self {
        Self {
            closed: Vec::new(),
            open: responsible.map(|responsible| OpenTenure { responsible, attributed_at: at }),
        }
    }

    /// Rebuild a ledger from persisted tenure rows.
    ///
    /// # Errors
    /// Returns [`CoreError::ConstraintViolation`] when more than one open
    /// tenure is present.
    pub fn from_entries(entries: Vec<TenureRecord>) -> Result<Self, CoreError> {
        let mut closed = Vec::new();
        let mut open = None;
        for entry in entries {
            match entry.achieved_at {
                Some(achieved_at) => closed.push(ClosedTenure {
                    responsible: entry.responsible,
                    attributed_at: entry.attributed_at,
                    achieved_at,
                }),
                None => {
                    if open.is_some() {
                        return Err(CoreError::ConstraintViolation(
                            "an activity holds at most one open responsibility tenure".to_string(),
                        ));
                    }
                    open = Some(OpenTenure {
                        responsible: entry.responsible,
                        attributed_at: entry.attributed_at,
                    });
                }
            }
        }
        closed.sort_by_key(|tenure| tenure.attributed_at);
        Ok(Self { closed, open })
    }

    /// Apply one update call: a responsible change closes the open tenure and
    /// opens a replacement; reaching the achieved status closes without one.
    pub fn on_update(
        &mut self,
        new_responsible: Option<ParticipantId>,
        new_status: ActivityStatus,
        at: PrimitiveDateTime,
    ) {
        let open_responsible = self.open.as_ref().map(|tenure| tenure.responsible);
        if new_responsible != open_responsible {
            self.close_open(at);
            if let Some(responsible) = new_responsible {
                self.open = Some(OpenTenure { responsible, attributed_at: at });
            }
        }

        if new_status.is_achieved() {
            self.close_open(at);
        }
    }

    fn close_open(&mut self, at: PrimitiveDateTime) {
        if let Some(tenure) = self.open.take() {
            self.closed.push(ClosedTenure {
                responsible: tenure.responsible,
                attributed_at: tenure.attributed_at,
                achieved_at: at,
            });
        }
    }

    #[must_use]
    pub fn open_tenure(&self) -> Option<&OpenTenure> {
        self.open.as_ref()
    }

    /// Full trail ordered by attribution date ascending, open tenure last.
    #[must_use]
    pub fn history(&self) -> Vec<TenureRecord> {
        let mut entries: Vec<TenureRecord> = self
            .closed
            .iter()
            .map(|tenure| TenureRecord {
                responsible: tenure.responsible,
                attributed_at: tenure.attributed_at,
                achieved_at: Some(tenure.achieved_at),
            })
            .collect();
        if let Some(tenure) = &self.open {
            entries.push(TenureRecord {
                responsible: tenure.responsible,
                attributed_at: tenure.attributed_at,
                achieved_at: None,
            });
        }
        entries.sort_by_key(|entry| entry.attributed_at);
        entries
    }
}

/// Resolve the case files a usergroup may act on at one instant: for every
/// linked group, every case file assigned to it whose current status in the
/// group's organization falls inside the usergroup's status window.
#[must_use]
pub fn authorized_case_files(
    usergroup: Option<&UserGroup>,
    groups: &BTreeMap<GroupId, Group>,
    group_case_files: &BTreeMap<GroupId, BTreeSet<CaseFileId>>,
    ledger: &StatusLedger,
    at: PrimitiveDateTime,
) -> BTreeSet<CaseFileId> {
    let mut authorized = BTreeSet::new();
    let Some(usergroup) = usergroup else {
        return authorized;
    };
    if usergroup.status_window.is_empty() {
        return authorized;
    }

    for group_id in &usergroup.case_file_groups {
        let Some(group) = groups.get(group_id) else {
            continue;
        };
        let Some(case_files) = group_case_files.get(group_id) else {
            continue;
        };
        for case_file in case_files {
            let Some(status) = ledger.current_status(*case_file, group.organization, at) else {
                continue;
            };
            if usergroup.status_window.contains(&status) {
                authorized.insert(*case_file);
            }
        }
    }

    authorized
}

/// Whether a participant may mutate an activity: author, listed participant,
/// or at least one linked case file inside the authorized set.
#[must_use]
pub fn can_modify_activity(
    activity: &Activity,
    viewer: ParticipantId,
    authorized: &BTreeSet<CaseFileId>,
) -> bool {
    activity.author == viewer
        || activity.participants.contains(&viewer)
        || activity.case_files.iter().any(|case_file| authorized.contains(case_file))
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum GroupConstraintChange {
    SetMandatory(bool),
    JoinExclusiveSet,
    DeleteGroup,
}

/// Single chokepoint for the mandatory/exclusive mutual exclusion. Every
/// mutating path routes through here.
///
/// # Errors
/// Returns [`CoreError::ConstraintViolation`] when the proposed change would
/// break the invariant.
pub fn validate_group_constraints(
    group: &Group,
    exclusive_membership: Option<ExclusiveSetId>,
    change: GroupConstraintChange,
) -> Result<(), CoreError> {
    match change {
        GroupConstraintChange::SetMandatory(true) => {
            if let Some(set) = exclusive_membership {
                return Err(CoreError::ConstraintViolation(format!(
                    "group {} is a member of exclusive set {set} and cannot be mandatory",
                    group.id
                )));
            }
            Ok(())
        }
        GroupConstraintChange::SetMandatory(false) => Ok(()),
        GroupConstraintChange::JoinExclusiveSet => {
            if group.mandatory {
                return Err(CoreError::ConstraintViolation(format!(
                    "mandatory group {} cannot join an exclusive set",
                    group.id
                )));
            }
            if let Some(set) = exclusive_membership {
                return Err(CoreError::ConstraintViolation(format!(
                    "group {} already belongs to exclusive set {set}",
                    group.id
                )));
            }
            Ok(())
        }
        GroupConstraintChange::DeleteGroup => {
            if let Some(set) = exclusive_membership {
                return Err(CoreError::ConstraintViolation(format!(
                    "group {} belongs to exclusive set {set}; dissolve the set first",
                    group.id
                )));
            }
            Ok(())
        }
    }
}

/// Validate the member list of a new exclusive set: at least two distinct
/// groups, one shared organization, and every member free to join.
///
/// # Errors
/// Returns [`CoreError::Validation`] for an empty name and
/// [`CoreError::ConstraintViolation`] for any membership rule breach.
pub fn validate_exclusive_set_members(
    name: &str,
    members: &[Group],
    memberships: &BTreeMap<GroupId, ExclusiveSetId>,
) -> Result<(), CoreError> {
    if name.trim().is_empty() {
        return Err(CoreError::Validation("exclusive set name MUST be non-empty".to_string()));
    }

    let Some(first) = members.first() else {
        return Err(CoreError::ConstraintViolation(
            "an exclusive set requires at least two groups".to_string(),
        ));
    };

    let mut seen = BTreeSet::new();
    for group in members {
        if !seen.insert(group.id) {
            return Err(CoreError::ConstraintViolation(format!(
                "group {} is listed twice in the exclusive set",
                group.id
            )));
        }
    }
    if seen.len() < 2 {
        return Err(CoreError::ConstraintViolation(
            "an exclusive set requires at least two groups".to_string(),
        ));
    }

    if members.iter().any(|group| group.organization != first.organization) {
        return Err(CoreError::ConstraintViolation(
            "exclusive set members must share one organization".to_string(),
        ));
    }

    for group in members {
        validate_group_constraints(
            group,
            memberships.get(&group.id).copied(),
            GroupConstraintChange::JoinExclusiveSet,
        )?;
    }

    Ok(())
}

/// Validate a case-file assignment edge set against exclusive sets: at most
/// one member of any exclusive set may be assigned at a time.
///
/// # Errors
/// Returns [`CoreError::ConstraintViolation`] when two requested groups share
/// an exclusive set.
pub fn validate_case_file_groups(
    groups: &[GroupId],
    memberships: &BTreeMap<GroupId, ExclusiveSetId>,
) -> Result<(), CoreError> {
    let mut seen_sets: BTreeMap<ExclusiveSetId, GroupId> = BTreeMap::new();
    for group in groups {
        if let Some(set) = memberships.get(group) {
            if let Some(existing) = seen_sets.insert(*set, *group) {
                return Err(CoreError::ConstraintViolation(format!(
                    "groups {existing} and {group} share exclusive set {set} and cannot both be assigned"
                )));
            }
        }
    }
    Ok(())
}

/// One node of a field-selection tree: a leaf include flag or a nested
/// selection for a relation.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ProjectionNode {
    Include(bool),
    Nested(Projection),
}

/// A field-selection tree in request order. Projected objects carry exactly
/// the requested fields, in the requested order, so equal requests produce
/// byte-identical output.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct Projection {
    fields: Vec<(String, ProjectionNode)>,
}

impl Projection {
    /// Parse a selection tree from its JSON form: an object whose values are
    /// booleans for leaf fields and nested objects for relations.
    ///
    /// # Errors
    /// Returns [`CoreError::Validation`] for any other shape.
    pub fn from_value(value: &Value) -> Result<Self, CoreError> {
        let Value::Object(map) = value else {
            return Err(CoreError::Validation("a projection must be a JSON object".to_string()));
        };
        let mut fields = Vec::with_capacity(map.len());
        for (name, node) in map {
            let node = match node {
                Value::Bool(include) => ProjectionNode::Include(*include),
                Value::Object(_) => ProjectionNode::Nested(Self::from_value(node)?),
                _ => {
                    return Err(CoreError::Validation(format!(
                        "projection field `{name}` must be a boolean or a nested object"
                    )));
                }
            };
            fields.push((name.clone(), node));
        }
        Ok(Self { fields })
    }

    #[must_use]
    pub fn entries(&self) -> &[(String, ProjectionNode)] {
        &self.fields
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// A projected field as exposed by an entity: a scalar ready for output, or
/// a to-one / to-many relation the walker may recurse into.
pub enum ProjectedField<'a> {
    Scalar(Value),
    One(Option<&'a dyn Projectable>),
    Many(Vec<&'a dyn Projectable>),
}

/// An entity the generic projector can walk. `scalar_names` drives the
/// default rendering used when a relation is selected with a bare `true`.
pub trait Projectable {
    fn scalar_names(&self) -> &'static [&'static str];
    fn field(&self, name: &str) -> Option<ProjectedField<'_>>;
}

fn project_all_scalars(entity: &dyn Projectable) -> Value {
    let mut out = Map::new();
    for name in entity.scalar_names() {
        if let Some(ProjectedField::Scalar(value)) = entity.field(name) {
            out.insert((*name).to_string(), value);
        }
    }
    Value::Object(out)
}

/// Project one entity through a selection tree.
///
/// # Errors
/// Returns [`CoreError::Validation`] for a field the entity does not expose,
/// or for a nested selection applied to a scalar field.
pub fn project_entity(
    entity: &dyn Projectable,
    selection: &Projection,
) -> Result<Value, CoreError> {
    let mut out = Map::new();
    for (name, node) in selection.entries() {
        let Some(field) = entity.field(name) else {
            return Err(CoreError::Validation(format!("unknown projection field `{name}`")));
        };
        match node {
            ProjectionNode::Include(false) => {}
            ProjectionNode::Include(true) => {
                let value = match field {
                    ProjectedField::Scalar(value) => value,
                    ProjectedField::One(None) => Value::Null,
                    ProjectedField::One(Some(related)) => project_all_scalars(related),
                    ProjectedField::Many(related) => Value::Array(
                        related.into_iter().map(project_all_scalars).collect(),
                    ),
                };
                out.insert(name.clone(), value);
            }
            ProjectionNode::Nested(nested) => {
                let value = match field {
                    ProjectedField::Scalar(_) => {
                        return Err(CoreError::Validation(format!(
                            "projection field `{name}` is a scalar and takes no nested selection"
                        )));
                    }
                    ProjectedField::One(None) => Value::Null,
                    ProjectedField::One(Some(related)) => project_entity(related, nested)?,
                    ProjectedField::Many(related) => {
                        let mut items = Vec::with_capacity(related.len());
                        for entity in related {
                            items.push(project_entity(entity, nested)?);
                        }
                        Value::Array(items)
                    }
                };
                out.insert(name.clone(), value);
            }
        }
    }
    Ok(Value::Object(out))
}

/// Project an entity through an optional selection; an absent selection
/// renders every scalar field in declaration order.
///
/// # Errors
/// Propagates [`project_entity`] failures.
pub fn project_with(
    entity: &dyn Projectable,
    selection: Option<&Projection>,
) -> Result<Value, CoreError> {
    match selection {
        Some(selection) => project_entity(entity, selection),
        None => Ok(project_all_scalars(entity)),
    }
}

fn opt_string_value(value: Option<&String>) -> Value {
    value.map_or(Value::Null, |inner| Value::String(inner.clone()))
}

fn opt_time_value(value: Option<PrimitiveDateTime>) -> Value {
    value.map_or(Value::Null, |inner| Value::String(format_wall_clock(inner)))
}

fn slot_hours(schedule: &EventSchedule) -> f64 {
    (schedule.end - schedule.start).as_seconds_f64() / 3600.0
}

impl Projectable for Participant {
    fn scalar_names(&self) -> &'static [&'static str] {
        &["id", "firstname", "lastname"]
    }

    fn field(&self, name: &str) -> Option<ProjectedField<'_>> {
        match name {
            "id" => Some(ProjectedField::Scalar(Value::from(self.id.0))),
            "firstname" => Some(ProjectedField::Scalar(Value::String(self.firstname.clone()))),
            "lastname" => Some(ProjectedField::Scalar(Value::String(self.lastname.clone()))),
            _ => None,
        }
    }
}

impl Projectable for Topic {
    fn scalar_names(&self) -> &'static [&'static str] {
        &["id", "name", "description"]
    }

    fn field(&self, name: &str) -> Option<ProjectedField<'_>> {
        match name {
            "id" => Some(ProjectedField::Scalar(Value::from(self.id.0))),
            "name" => Some(ProjectedField::Scalar(Value::String(self.name.clone()))),
            "description" => {
                Some(ProjectedField::Scalar(opt_string_value(self.description.as_ref())))
            }
            _ => None,
        }
    }
}

impl Projectable for CaseFile {
    fn scalar_names(&self) -> &'static [&'static str] {
        &["id", "firstname", "lastname", "birthdate"]
    }

    fn field(&self, name: &str) -> Option<ProjectedField<'_>> {
        match name {
            "id" => Some(ProjectedField::Scalar(Value::from(self.id.0))),
            "firstname" => Some(ProjectedField::Scalar(Value::String(self.firstname.clone()))),
            "lastname" => Some(ProjectedField::Scalar(Value::String(self.lastname.clone()))),
            "birthdate" => Some(ProjectedField::Scalar(Value::String(format_wall_clock_date(
                self.birthdate,
            )))),
            _ => None,
        }
    }
}

impl Projectable for Resource {
    fn scalar_names(&self) -> &'static [&'static str] {
        &["id", "name"]
    }

    fn field(&self, name: &str) -> Option<ProjectedField<'_>> {
        match name {
            "id" => Some(ProjectedField::Scalar(Value::from(self.id.0))),
            "name" => Some(ProjectedField::Scalar(Value::String(self.name.clone()))),
            _ => None,
        }
    }
}

impl Projectable for ActivityType {
    fn scalar_names(&self) -> &'static [&'static str] {
        &["id", "kind", "category", "name", "individual"]
    }

    fn field(&self, name: &str) -> Option<ProjectedField<'_>> {
        match name {
            "id" => Some(ProjectedField::Scalar(Value::from(self.id.0))),
            "kind" => Some(ProjectedField::Scalar(Value::String(self.kind.as_str().to_string()))),
            "category" => Some(ProjectedField::Scalar(opt_string_value(self.category.as_ref()))),
            "name" => Some(ProjectedField::Scalar(Value::String(self.name.clone()))),
            "individual" => Some(ProjectedField::Scalar(Value::Bool(self.individual))),
            _ => None,
        }
    }
}

/// One responsibility tenure joined with its participant, ready for
/// projection inside an activity's `responsible_history`.
#[derive(Debug, Clone)]
pub struct TenureView<'a> {
    pub record: TenureRecord,
    pub responsible: &'a Participant,
}

impl Projectable for TenureView<'_> {
    fn scalar_names(&self) -> &'static [&'static str] {
        &["attributed_at", "achieved_at"]
    }

    fn field(&self, name: &str) -> Option<ProjectedField<'_>> {
        match name {
            "attributed_at" => Some(ProjectedField::Scalar(Value::String(format_wall_clock(
                self.record.attributed_at,
            )))),
            "achieved_at" => Some(ProjectedField::Scalar(opt_time_value(self.record.achieved_at))),
            "responsible" => Some(ProjectedField::One(Some(self.responsible))),
            _ => None,
        }
    }
}

/// An activity joined with every related entity the projector can reach.
/// The caller resolves the references; the bundle only walks them.
#[derive(Debug, Clone)]
pub struct ActivityBundle<'a> {
    pub activity: &'a Activity,
    pub activity_type: Option<&'a ActivityType>,
    pub author: &'a Participant,
    pub responsible: Option<&'a Participant>,
    pub topics: Vec<&'a Topic>,
    pub case_files: Vec<&'a CaseFile>,
    pub participants: Vec<&'a Participant>,
    pub resources: Vec<&'a Resource>,
    pub responsible_history: Vec<TenureView<'a>>,
}

impl Projectable for ActivityBundle<'_> {
    fn scalar_names(&self) -> &'static [&'static str] {
        &[
            "id",
            "kind",
            "title",
            "description",
            "status",
            "start_time",
            "end_time",
            "all_day",
            "place",
            "cost",
            "duration_hours",
        ]
    }

    fn field(&self, name: &str) -> Option<ProjectedField<'_>> {
        let schedule = self.activity.schedule.as_ref();
        match name {
            "id" => Some(ProjectedField::Scalar(Value::from(self.activity.id.0))),
            "kind" => Some(ProjectedField::Scalar(Value::String(
                self.activity.kind.as_str().to_string(),
            ))),
            "title" => Some(ProjectedField::Scalar(Value::String(self.activity.title.clone()))),
            "description" => Some(ProjectedField::Scalar(opt_string_value(
                self.activity.description.as_ref(),
            ))),
            "status" => Some(ProjectedField::Scalar(Value::String(
                self.activity.status.as_str().to_string(),
            ))),
            "start_time" => Some(ProjectedField::Scalar(opt_time_value(
                schedule.map(|schedule| schedule.start),
            ))),
            "end_time" => Some(ProjectedField::Scalar(opt_time_value(
                schedule.map(|schedule| schedule.end),
            ))),
            "all_day" => Some(ProjectedField::Scalar(
                schedule.map_or(Value::Null, |schedule| Value::Bool(schedule.all_day)),
            )),
            "place" => Some(ProjectedField::Scalar(
                schedule.map_or(Value::Null, |schedule| opt_string_value(schedule.place.as_ref())),
            )),
            "cost" => Some(ProjectedField::Scalar(
                schedule.and_then(|schedule| schedule.cost).map_or(Value::Null, Value::from),
            )),
            "duration_hours" => Some(ProjectedField::Scalar(
                schedule.map_or(Value::Null, |schedule| Value::from(slot_hours(schedule))),
            )),
            "activity_type" => Some(ProjectedField::One(
                self.activity_type.map(|related| related as &dyn Projectable),
            )),
            "author" => Some(ProjectedField::One(Some(self.author))),
            "responsible" => Some(ProjectedField::One(
                self.responsible.map(|related| related as &dyn Projectable),
            )),
            "topics" => Some(ProjectedField::Many(
                self.topics.iter().map(|related| *related as &dyn Projectable).collect(),
            )),
            "case_files" => Some(ProjectedField::Many(
                self.case_files.iter().map(|related| *related as &dyn Projectable).collect(),
            )),
            "participants" => Some(ProjectedField::Many(
                self.participants.iter().map(|related| *related as &dyn Projectable).collect(),
            )),
            "resources" => Some(ProjectedField::Many(
                self.resources.iter().map(|related| *related as &dyn Projectable).collect(),
            )),
            "responsible_history" => Some(ProjectedField::Many(
                self.responsible_history.iter().map(|related| related as &dyn Projectable).collect(),
            )),
            _ => None,
        }
    }
}

/// Caller-supplied filters layered over a view's own filter chain.
#[derive(Debug, Clone, Copy, Default)]
pub struct ActivityFilters {
    pub activity_type: Option<ActivityTypeId>,
    pub case_file: Option<CaseFileId>,
    pub from: Option<PrimitiveDateTime>,
    pub to: Option<PrimitiveDateTime>,
}

fn category_matches(
    view: &View,
    activity: &Activity,
    types: &BTreeMap<ActivityTypeId, ActivityType>,
) -> bool {
    if view.categories.is_empty() {
        return true;
    }
    activity
        .activity_type
        .and_then(|id| types.get(&id))
        .and_then(|activity_type| activity_type.category.as_ref())
        .is_some_and(|category| view.categories.contains(category))
}

fn schedule_overlaps(
    activity: &Activity,
    from: Option<PrimitiveDateTime>,
    to: Option<PrimitiveDateTime>,
) -> bool {
    if from.is_none() && to.is_none() {
        return true;
    }
    let Some(schedule) = &activity.schedule else {
        return false;
    };
    from.map_or(true, |from| schedule.end >= from)
        && to.map_or(true, |to| schedule.start <= to)
}

/// Compose a view for one reader: the activities that pass the view's kind,
/// type, category, and topic filters, the caller's extra filters, and the
/// reader's authorized case-file set, as an ascending id list. An activity
/// linked to no case file never appears here.
#[must_use]
pub fn compose_view(
    view: &View,
    activities: &[Activity],
    types: &BTreeMap<ActivityTypeId, ActivityType>,
    authorized: &BTreeSet<CaseFileId>,
    filters: &ActivityFilters,
) -> Vec<ActivityId> {
    let mut matched: Vec<ActivityId> = activities
        .iter()
        .filter(|activity| activity.kind == view.kind)
        .filter(|activity| match view.type_filter {
            Some(wanted) => activity.activity_type == Some(wanted),
            None => true,
        })
        .filter(|activity| match filters.activity_type {
            Some(wanted) => activity.activity_type == Some(wanted),
            None => true,
        })
        .filter(|activity| category_matches(view, activity, types))
        .filter(|activity| {
            view.topics.is_empty()
                || activity.topics.iter().any(|topic| view.topics.contains(topic))
        })
        .filter(|activity| match filters.case_file {
            Some(case_file) => activity.case_files.contains(&case_file),
            None => true,
        })
        .filter(|activity| schedule_overlaps(activity, filters.from, filters.to))
        .filter(|activity| {
            activity.case_files.iter().any(|case_file| authorized.contains(case_file))
        })
        .map(|activity| activity.id)
        .collect();
    matched.sort_unstable();
    matched
}

/// Activities where a participant is the author or a listed attendee, as an
/// ascending id list. This is the listing that stays reachable when the
/// reader holds no case-file authorization at all.
#[must_use]
pub fn participant_activities(
    activities: &[Activity],
    participant: ParticipantId,
    kind: Option<ActivityKind>,
) -> Vec<ActivityId> {
    let mut matched: Vec<ActivityId> = activities
        .iter()
        .filter(|activity| kind.map_or(true, |kind| activity.kind == kind))
        .filter(|activity| {
            activity.author == participant || activity.participants.contains(&participant)
        })
        .map(|activity| activity.id)
        .collect();
    matched.sort_unstable();
    matched
}

/// Activities linked to one case file, ascending by id.
#[must_use]
pub fn case_file_activities(
    activities: &[Activity],
    case_file: CaseFileId,
    kind: Option<ActivityKind>,
) -> Vec<ActivityId> {
    let mut matched: Vec<ActivityId> = activities
        .iter()
        .filter(|activity| kind.map_or(true, |kind| activity.kind == kind))
        .filter(|activity| activity.case_files.contains(&case_file))
        .map(|activity| activity.id)
        .collect();
    matched.sort_unstable();
    matched
}

/// Attendance totals for one participant across their activities.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct ActivityReport {
    pub activity_count: usize,
    pub total_hours: f64,
    pub total_days: i64,
}

/// Tally a participant's involvement: timed events add hours, all-day events
/// add calendar days, documents only count.
#[must_use]
pub fn participant_report(activities: &[Activity], participant: ParticipantId) -> ActivityReport {
    let mut report = ActivityReport::default();
    for activity in activities {
        if activity.author != participant && !activity.participants.contains(&participant) {
            continue;
        }
        report.activity_count += 1;
        if let Some(schedule) = &activity.schedule {
            if schedule.all_day {
                report.total_days +=
                    (schedule.end.date() - schedule.start.date()).whole_days() + 1;
            } else {
                report.total_hours += slot_hours(schedule);
            }
        }
    }
    report
}
