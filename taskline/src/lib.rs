//! Task-line annotation and recurrence engine.
//!
//! A task line is a single Markdown list item such as
//! `- [ ] Buy milk 📅 2024-01-10 🔁 every 1 week`. The engine reads inline
//! annotations loosely, rewrites them strictly, and leaves every other byte alone.
//! All operations are pure: callers resolve "today" and "now" once and pass them in.

pub mod core {
    use chrono::{Days, Months, NaiveDate, NaiveTime};
    use indexmap::IndexMap;
    use serde::{Deserialize, Serialize};
    use std::fmt;

    /* ------------------------------ Markers ------------------------------ */

    pub const DURATION_LABEL: &str = "duration::";
    pub const TIME_LOG_LABEL: &str = "time::";
    pub const REPEAT_GLYPH: &str = "🔁";

    /// Emoji presentation selector some editors append after a marker glyph.
    pub const VARIATION_SELECTOR: char = '\u{FE0F}';

    /// Marker glyphs that introduce a calendar date.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
    #[serde(rename_all = "lowercase")]
    pub enum DateMarker {
        Due,
        Scheduled,
        Start,
        Created,
        Done,
        Cancelled,
    }

    impl DateMarker {
        pub const ALL: [DateMarker; 6] = [
            DateMarker::Due,
            DateMarker::Scheduled,
            DateMarker::Start,
            DateMarker::Created,
            DateMarker::Done,
            DateMarker::Cancelled,
        ];

        /// Dates that anchor a recurring task, highest priority first.
        pub const ANCHORS: [DateMarker; 3] =
            [DateMarker::Due, DateMarker::Scheduled, DateMarker::Start];

        pub fn glyph(self) -> &'static str {
            match self {
                DateMarker::Due => "📅",
                DateMarker::Scheduled => "⏳",
                DateMarker::Start => "🛫",
                DateMarker::Created => "➕",
                DateMarker::Done => "✅",
                DateMarker::Cancelled => "❌",
            }
        }

        pub fn name(self) -> &'static str {
            match self {
                DateMarker::Due => "due",
                DateMarker::Scheduled => "scheduled",
                DateMarker::Start => "start",
                DateMarker::Created => "created",
                DateMarker::Done => "done",
                DateMarker::Cancelled => "cancelled",
            }
        }
    }

    /* ------------------------------ Checkbox ------------------------------ */

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(rename_all = "snake_case")]
    pub enum CheckboxState {
        Open,      // [ ]
        Done,      // [x] / [X]
        Cancelled, // [-]
        InProgress,
    }

    impl CheckboxState {
        pub fn from_mark(mark: char, opts: &LineOptions) -> Option<Self> {
            match mark {
                ' ' => Some(CheckboxState::Open),
                'x' | 'X' => Some(CheckboxState::Done),
                '-' => Some(CheckboxState::Cancelled),
                c if c == opts.in_progress_glyph => Some(CheckboxState::InProgress),
                _ => None,
            }
        }
    }

    /// Per-project reading options.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(default)]
    pub struct LineOptions {
        /// Glyph between the brackets that marks a task as in progress, e.g. `[/]`.
        pub in_progress_glyph: char,
    }

    impl Default for LineOptions {
        fn default() -> Self {
            Self {
                in_progress_glyph: '/',
            }
        }
    }

    /* ----------------------------- Recurrence ----------------------------- */

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(rename_all = "lowercase")]
    pub enum RecurrenceUnit {
        Day,
        Week,
        Month,
        Year,
    }

    impl RecurrenceUnit {
        pub fn as_str(self) -> &'static str {
            match self {
                RecurrenceUnit::Day => "day",
                RecurrenceUnit::Week => "week",
                RecurrenceUnit::Month => "month",
                RecurrenceUnit::Year => "year",
            }
        }
    }

    /// Decoded `🔁 every <n> <unit> [when done]` directive.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct RecurrenceInfo {
        /// Always at least 1.
        pub interval: u32,
        pub unit: RecurrenceUnit,
        /// Advance from the completion day instead of the task's own dates.
        pub when_done: bool,
    }

    impl RecurrenceInfo {
        /// Calendar-correct `base + interval × unit`.
        ///
        /// Month and year steps clamp to the last valid day of the target month
        /// (`2024-01-31` + 1 month is `2024-02-29`). Returns `None` when the result
        /// falls outside chrono's representable range.
        pub fn next_after(&self, base: NaiveDate) -> Option<NaiveDate> {
            let n = self.interval;
            match self.unit {
                RecurrenceUnit::Day => base.checked_add_days(Days::new(u64::from(n))),
                RecurrenceUnit::Week => base.checked_add_days(Days::new(u64::from(n) * 7)),
                RecurrenceUnit::Month => base.checked_add_months(Months::new(n)),
                RecurrenceUnit::Year => n
                    .checked_mul(12)
                    .and_then(|months| base.checked_add_months(Months::new(months))),
            }
        }
    }

    impl fmt::Display for RecurrenceInfo {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            if self.interval == 1 {
                write!(f, "every {}", self.unit.as_str())?;
            } else {
                write!(f, "every {} {}s", self.interval, self.unit.as_str())?;
            }
            if self.when_done {
                f.write_str(" when done")?;
            }
            Ok(())
        }
    }

    /* ----------------------------- Annotations ----------------------------- */

    /// A date annotation as returned by the locator; `iso()` is always `YYYY-MM-DD`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct DateAnnotation {
        pub marker: DateMarker,
        pub date: NaiveDate,
    }

    impl DateAnnotation {
        pub fn iso(&self) -> String {
            self.date.format("%Y-%m-%d").to_string()
        }
    }

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(tag = "kind", rename_all = "snake_case")]
    pub enum Annotation {
        Date {
            marker: DateMarker,
            date: NaiveDate,
        },
        Duration {
            value: String,
            parenthesized: bool,
        },
        TimeLog {
            time: NaiveTime,
        },
        /// A repeat marker. `rule` is `None` when no `every <unit>` schedule follows it.
        Repeat {
            rule: Option<RecurrenceInfo>,
        },
    }

    /// An annotation plus the exact text it was parsed from.
    ///
    /// While `source` is set the formatter replays it verbatim; edits clear it so the
    /// annotation is written in canonical form.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct AnnotationWithSource {
        pub annotation: Annotation,
        #[serde(skip_serializing, skip_deserializing)]
        pub source: Option<String>,
    }

    impl AnnotationWithSource {
        pub fn new(annotation: Annotation) -> Self {
            Self {
                annotation,
                source: None,
            }
        }

        pub fn from_source(annotation: Annotation, source: impl Into<String>) -> Self {
            Self {
                annotation,
                source: Some(source.into()),
            }
        }

        pub fn mark_dirty(&mut self) {
            self.source = None;
        }
    }

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(tag = "kind", content = "value", rename_all = "snake_case")]
    pub enum Segment {
        Text(String),
        Annotation(AnnotationWithSource),
    }

    /* ------------------------------ Task line ------------------------------ */

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "snake_case")]
    pub enum Prefix {
        /// `lead` is everything before `[`, e.g. `"  - "` or `"1. "`.
        Checkbox {
            lead: String,
            mark: char,
            state: CheckboxState,
        },
        /// No recognizable checkbox; the segments hold the whole line.
        Missing,
    }

    /// A line split into its checkbox prefix and an ordered run of text and annotations.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct TaskLine {
        pub prefix: Prefix,
        #[serde(default)]
        pub segments: Vec<Segment>,
    }

    impl TaskLine {
        pub fn checkbox(&self) -> Option<CheckboxState> {
            match &self.prefix {
                Prefix::Checkbox { state, .. } => Some(*state),
                Prefix::Missing => None,
            }
        }

        pub fn annotations(&self) -> impl Iterator<Item = &Annotation> {
            self.segments.iter().filter_map(|s| match s {
                Segment::Annotation(a) => Some(&a.annotation),
                Segment::Text(_) => None,
            })
        }

        pub fn annotations_mut(&mut self) -> impl Iterator<Item = &mut AnnotationWithSource> {
            self.segments.iter_mut().filter_map(|s| match s {
                Segment::Annotation(a) => Some(a),
                Segment::Text(_) => None,
            })
        }

        /// First valid date carrying `marker`.
        pub fn find_date(&self, marker: DateMarker) -> Option<NaiveDate> {
            self.annotations().find_map(|a| match a {
                Annotation::Date { marker: m, date } if *m == marker => Some(*date),
                _ => None,
            })
        }

        /// Every valid date keyed by marker, in order of first appearance.
        pub fn dates(&self) -> IndexMap<DateMarker, NaiveDate> {
            let mut out = IndexMap::new();
            for a in self.annotations() {
                if let Annotation::Date { marker, date } = a {
                    out.entry(*marker).or_insert(*date);
                }
            }
            out
        }

        pub fn recurrence(&self) -> Option<RecurrenceInfo> {
            self.annotations().find_map(|a| match a {
                Annotation::Repeat { rule } => *rule,
                _ => None,
            })
        }

        pub fn duration(&self) -> Option<&str> {
            self.annotations().find_map(|a| match a {
                Annotation::Duration { value, .. } => Some(value.as_str()),
                _ => None,
            })
        }

        pub fn time_log(&self) -> Option<NaiveTime> {
            self.annotations().find_map(|a| match a {
                Annotation::TimeLog { time } => Some(*time),
                _ => None,
            })
        }
    }

    /// Output of [`crate::mark_done`]. The caller writes `completed_line` over the
    /// original and inserts `next_task_line`, if any, as a new line.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct TaskCompletionResult {
        pub completed_line: String,
        pub next_task_line: Option<String>,
    }

    /* ---------------------------- Errors (domain) ---------------------------- */

    /// Caller contract violations. Malformed annotations inside a line are never errors.
    #[derive(Debug, thiserror::Error, PartialEq, Eq)]
    pub enum TaskLineError {
        #[error("invalid date {0:?}: expected YYYY-MM-DD")]
        InvalidToday(String),
        #[error("invalid time of day {0:?}: expected 24-hour HH:MM")]
        InvalidNow(String),
    }

}

pub mod parser {
    //! Line parser built on `nom`.
    //!
    //! Parsing strategy:
    //! - The checkbox prefix (`<indent><bullet> [c]`) is recognized once at the start.
    //! - The rest of the line is scanned character by character; at each position every
    //!   annotation recognizer is tried, and characters none of them claim accumulate
    //!   into text spans.
    //! - A marker followed by something malformed (an impossible date, a zero interval)
    //!   simply fails to match and stays plain text.

    use crate::core::*;
    use chrono::{NaiveDate, NaiveTime};
    use nom::{
        IResult,
        branch::alt,
        bytes::complete::{tag, tag_no_case, take_till1, take_while_m_n},
        character::complete::{anychar, char, digit1, satisfy, space0, space1},
        combinator::{all_consuming, map_res, not, opt, recognize, value},
        error::{VerboseError, VerboseErrorKind},
        sequence::{delimited, preceded, terminated, tuple},
    };
    use tracing::trace;

    /* ------------------------ Public entry points ------------------------ */

    /// Parse a task line with the default [`LineOptions`].
    pub fn parse_task_line(line: &str) -> TaskLine {
        parse_task_line_with_options(line, &LineOptions::default())
    }

    pub fn parse_task_line_with_options(line: &str, opts: &LineOptions) -> TaskLine {
        let (prefix, body) = match parse_checkbox_prefix(line, opts) {
            Ok((rest, (lead, mark, state))) => (
                Prefix::Checkbox {
                    lead: lead.to_string(),
                    mark,
                    state,
                },
                rest,
            ),
            Err(_) => (Prefix::Missing, line),
        };
        TaskLine {
            prefix,
            segments: parse_segments(body),
        }
    }

    /// First date annotation carrying `marker`, with its separator normalized to `-`.
    pub fn find_date(line: &str, marker: DateMarker) -> Option<DateAnnotation> {
        parse_task_line(line)
            .find_date(marker)
            .map(|date| DateAnnotation { marker, date })
    }

    /// Decode the line's repeat directive, if it declares an explicit schedule.
    pub fn parse_recurrence(line: &str) -> Option<RecurrenceInfo> {
        parse_task_line(line).recurrence()
    }

    /// Strict `YYYY-MM-DD` check for caller-supplied dates.
    pub fn validate_today(s: &str) -> Result<NaiveDate, TaskLineError> {
        let shaped = s.len() == 10 && s.as_bytes().get(4) == Some(&b'-');
        match all_consuming(parse_date)(s) {
            Ok((_, date)) if shaped => Ok(date),
            _ => Err(TaskLineError::InvalidToday(s.to_string())),
        }
    }

    /// Strict 24-hour `HH:MM` check for caller-supplied times.
    pub fn validate_now(s: &str) -> Result<NaiveTime, TaskLineError> {
        let shaped = s.len() == 5 && s.as_bytes().get(2) == Some(&b':');
        match all_consuming(parse_clock)(s) {
            Ok((_, time)) if shaped => Ok(time),
            _ => Err(TaskLineError::InvalidNow(s.to_string())),
        }
    }

    type PResult<'a, T> = IResult<&'a str, T, VerboseError<&'a str>>;

    fn fail<'a>(i: &'a str, context: &'static str) -> nom::Err<VerboseError<&'a str>> {
        nom::Err::Error(VerboseError {
            errors: vec![(i, VerboseErrorKind::Context(context))],
        })
    }

    /* ------------------------------ Checkbox ------------------------------ */

    fn parse_checkbox_prefix<'a>(
        i: &'a str,
        opts: &LineOptions,
    ) -> PResult<'a, (&'a str, char, CheckboxState)> {
        let (i, lead) = recognize(tuple((space0, parse_bullet, space1)))(i)?;
        let (i, mark) = delimited(char('['), anychar, char(']'))(i)?;
        match CheckboxState::from_mark(mark, opts) {
            Some(state) => Ok((i, (lead, mark, state))),
            None => Err(fail(i, "checkbox mark")),
        }
    }

    fn parse_bullet(i: &str) -> PResult<'_, &str> {
        alt((
            tag("-"),
            tag("*"),
            tag("+"),
            recognize(terminated(digit1, alt((char('.'), char(')'))))),
        ))(i)
    }

    /* ------------------------------ Segments ------------------------------ */

    fn parse_segments(body: &str) -> Vec<Segment> {
        let mut out = Vec::new();
        let mut text_start = 0;
        let mut pos = 0;
        let mut prev: Option<char> = None;

        while pos < body.len() {
            let rest = &body[pos..];
            if let Some((remaining, annotation)) = annotation_at(rest, prev) {
                let end = body.len() - remaining.len();
                if text_start < pos {
                    out.push(Segment::Text(body[text_start..pos].to_string()));
                }
                trace!(?annotation, "recognized annotation");
                out.push(Segment::Annotation(AnnotationWithSource::from_source(
                    annotation,
                    &body[pos..end],
                )));
                prev = body[..end].chars().next_back();
                pos = end;
                text_start = end;
                continue;
            }
            let Some(c) = rest.chars().next() else {
                break;
            };
            prev = Some(c);
            pos += c.len_utf8();
        }

        if text_start < body.len() {
            out.push(Segment::Text(body[text_start..].to_string()));
        }
        out
    }

    fn annotation_at(i: &str, prev: Option<char>) -> Option<(&str, Annotation)> {
        if let Ok(hit) = parse_date_annotation(i) {
            return Some(hit);
        }
        if let Ok(hit) = parse_duration_parenthesized(i) {
            return Some(hit);
        }
        if let Ok(hit) = parse_time_log_parenthesized(i) {
            return Some(hit);
        }
        // Bare labels only count at a word boundary, so `foo(duration::x` stays text.
        let at_boundary = prev.is_none_or(|c| !(c.is_alphanumeric() || c == '(' || c == ':'));
        if at_boundary {
            if let Ok(hit) = parse_duration_unclosed(i) {
                return Some(hit);
            }
            if let Ok(hit) = parse_duration_bare(i) {
                return Some(hit);
            }
            if let Ok(hit) = parse_time_log_bare(i) {
                return Some(hit);
            }
        }
        parse_repeat_annotation(i).ok()
    }

    /* ----------------------------- Dates ----------------------------- */

    fn parse_date_annotation(i: &str) -> PResult<'_, Annotation> {
        let (i, marker) = parse_date_marker(i)?;
        let (i, _) = space0(i)?;
        match parse_date(i) {
            Ok((i, date)) => Ok((i, Annotation::Date { marker, date })),
            Err(e) => {
                trace!(?marker, "marker without a valid date; keeping as text");
                Err(e)
            }
        }
    }

    fn parse_date_marker(i: &str) -> PResult<'_, DateMarker> {
        let (i, marker) = alt((
            date_marker(DateMarker::Due),
            date_marker(DateMarker::Scheduled),
            date_marker(DateMarker::Start),
            date_marker(DateMarker::Created),
            date_marker(DateMarker::Done),
            date_marker(DateMarker::Cancelled),
        ))(i)?;
        let (i, _) = opt(char(VARIATION_SELECTOR))(i)?;
        Ok((i, marker))
    }

    fn date_marker(marker: DateMarker) -> impl Fn(&str) -> PResult<'_, DateMarker> {
        move |i: &str| value(marker, tag(marker.glyph()))(i)
    }

    /// `YYYY-MM-DD` or `YYYY/MM/DD`; both separators must match.
    fn parse_date(i: &str) -> PResult<'_, NaiveDate> {
        let (i, year) = map_res(take_while_m_n(4, 4, char_is_digit), |s: &str| {
            s.parse::<i32>()
        })(i)?;
        let (i, sep) = alt((char('-'), char('/')))(i)?;
        let (i, month) = two_digits(i)?;
        let (i, _) = char(sep)(i)?;
        let (i, day) = two_digits(i)?;
        let (i, _) = not(satisfy(char_is_digit))(i)?;
        NaiveDate::from_ymd_opt(year, month, day)
            .map(|date| (i, date))
            .ok_or_else(|| fail(i, "calendar date"))
    }

    fn parse_clock(i: &str) -> PResult<'_, NaiveTime> {
        let (i, hour) = map_res(take_while_m_n(1, 2, char_is_digit), |s: &str| {
            s.parse::<u32>()
        })(i)?;
        let (i, _) = char(':')(i)?;
        let (i, minute) = two_digits(i)?;
        let (i, _) = not(satisfy(char_is_digit))(i)?;
        NaiveTime::from_hms_opt(hour, minute, 0)
            .map(|time| (i, time))
            .ok_or_else(|| fail(i, "time of day"))
    }

    fn two_digits(i: &str) -> PResult<'_, u32> {
        map_res(take_while_m_n(2, 2, char_is_digit), |s: &str| {
            s.parse::<u32>()
        })(i)
    }

    fn char_is_digit(c: char) -> bool {
        c.is_ascii_digit()
    }

    /* ------------------------- Duration and time-log ------------------------- */

    fn parse_duration_parenthesized(i: &str) -> PResult<'_, Annotation> {
        let (rest, value) = delimited(
            tuple((char('('), tag(DURATION_LABEL))),
            take_till1(|c: char| c == ')' || c == '('),
            char(')'),
        )(i)?;
        if value.trim().is_empty() {
            return Err(fail(i, "duration value"));
        }
        Ok((
            rest,
            Annotation::Duration {
                value: value.to_string(),
                parenthesized: true,
            },
        ))
    }

    /// `(duration::90m` with no closing parenthesis; rewritten as bare so wrapping
    /// replaces the dangling `(`.
    fn parse_duration_unclosed(i: &str) -> PResult<'_, Annotation> {
        let (i, value) = preceded(
            tuple((char('('), tag(DURATION_LABEL))),
            take_till1(|c: char| c.is_whitespace() || c == '(' || c == ')'),
        )(i)?;
        let (i, _) = not(char(')'))(i)?;
        Ok((
            i,
            Annotation::Duration {
                value: value.to_string(),
                parenthesized: false,
            },
        ))
    }

    fn parse_duration_bare(i: &str) -> PResult<'_, Annotation> {
        let (i, value) = preceded(
            tag(DURATION_LABEL),
            take_till1(|c: char| c.is_whitespace() || c == '(' || c == ')'),
        )(i)?;
        Ok((
            i,
            Annotation::Duration {
                value: value.to_string(),
                parenthesized: false,
            },
        ))
    }

    fn parse_time_log_parenthesized(i: &str) -> PResult<'_, Annotation> {
        let (i, time) = delimited(
            tuple((char('('), tag(TIME_LOG_LABEL))),
            parse_clock,
            char(')'),
        )(i)?;
        Ok((i, Annotation::TimeLog { time }))
    }

    fn parse_time_log_bare(i: &str) -> PResult<'_, Annotation> {
        let (i, time) = preceded(tag(TIME_LOG_LABEL), parse_clock)(i)?;
        Ok((i, Annotation::TimeLog { time }))
    }

    /* ----------------------------- Recurrence ----------------------------- */

    fn parse_repeat_annotation(i: &str) -> PResult<'_, Annotation> {
        let (i, _) = tag(REPEAT_GLYPH)(i)?;
        let (i, _) = opt(char(VARIATION_SELECTOR))(i)?;
        match parse_recurrence_rule(i) {
            Ok((rest, rule)) => Ok((rest, Annotation::Repeat { rule: Some(rule) })),
            Err(_) => {
                trace!("repeat marker without an `every <unit>` schedule");
                Ok((i, Annotation::Repeat { rule: None }))
            }
        }
    }

    fn parse_recurrence_rule(i: &str) -> PResult<'_, RecurrenceInfo> {
        let (i, _) = space0(i)?;
        let (i, _) = tag_no_case("every")(i)?;
        let (i, _) = space1(i)?;
        let (i, interval) = opt(terminated(
            map_res(digit1, |s: &str| s.parse::<u32>()),
            space1,
        ))(i)?;
        let (i, unit) = parse_recurrence_unit(i)?;
        let (i, when_done) = opt(parse_when_done)(i)?;

        let interval = interval.unwrap_or(1);
        if interval == 0 {
            return Err(fail(i, "positive interval"));
        }
        Ok((
            i,
            RecurrenceInfo {
                interval,
                unit,
                when_done: when_done.is_some(),
            },
        ))
    }

    fn parse_recurrence_unit(i: &str) -> PResult<'_, RecurrenceUnit> {
        let (i, unit) = alt((
            value(RecurrenceUnit::Day, tag_no_case("day")),
            value(RecurrenceUnit::Week, tag_no_case("week")),
            value(RecurrenceUnit::Month, tag_no_case("month")),
            value(RecurrenceUnit::Year, tag_no_case("year")),
        ))(i)?;
        let (i, _) = opt(tag_no_case("s"))(i)?;
        let (i, _) = not(satisfy(is_word_char))(i)?;
        Ok((i, unit))
    }

    fn parse_when_done(i: &str) -> PResult<'_, ()> {
        value(
            (),
            tuple((
                space1,
                tag_no_case("when"),
                space1,
                tag_no_case("done"),
                not(satisfy(is_word_char)),
            )),
        )(i)
    }

    fn is_word_char(c: char) -> bool {
        c.is_alphanumeric() || c == '_'
    }

}

pub mod format {
    use super::core::*;
    use std::fmt;

    pub fn format_task_line(line: &TaskLine) -> String {
        let mut out = String::new();
        if let Prefix::Checkbox { lead, mark, .. } = &line.prefix {
            out.push_str(lead);
            out.push('[');
            out.push(*mark);
            out.push(']');
        }
        append_segments(&mut out, &line.segments);
        out
    }

    pub(crate) fn append_segments(out: &mut String, segments: &[Segment]) {
        for segment in segments {
            match segment {
                Segment::Text(text) => out.push_str(text),
                Segment::Annotation(a) => append_annotation(out, a),
            }
        }
    }

    fn append_annotation(out: &mut String, a: &AnnotationWithSource) {
        if let Some(source) = &a.source {
            out.push_str(source);
            return;
        }
        out.push_str(&render_annotation(&a.annotation));
    }

    /// Canonical text for an annotation, used for anything the engine writes.
    pub fn render_annotation(annotation: &Annotation) -> String {
        match annotation {
            Annotation::Date { marker, date } => {
                format!("{} {}", marker.glyph(), date.format("%Y-%m-%d"))
            }
            Annotation::Duration {
                value,
                parenthesized: true,
            } => format!("({DURATION_LABEL}{value})"),
            Annotation::Duration {
                value,
                parenthesized: false,
            } => format!("{DURATION_LABEL}{value}"),
            Annotation::TimeLog { time } => {
                format!("({TIME_LOG_LABEL}{})", time.format("%H:%M"))
            }
            Annotation::Repeat { rule: Some(rule) } => format!("{REPEAT_GLYPH} {rule}"),
            Annotation::Repeat { rule: None } => REPEAT_GLYPH.to_string(),
        }
    }

    impl TaskLine {
        pub fn render(&self) -> String {
            format_task_line(self)
        }
    }

    impl fmt::Display for TaskLine {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(&format_task_line(self))
        }
    }

}

pub mod edit {
    //! Structural edits on a parsed [`TaskLine`].
    //!
    //! Edits touch only the segments they name. Removing an annotation collapses the
    //! gap it leaves to a single space; inserted annotations are separated from their
    //! neighbours by exactly one space.

    use super::core::*;
    use super::format::append_segments;
    use chrono::NaiveDate;

    impl TaskLine {
        /// Set the checkbox to done (`[x]`), synthesizing `- [x] ` if the line has none.
        pub fn check(&mut self) {
            self.set_checkbox(CheckboxState::Done, 'x');
        }

        /// Set the checkbox to open (`[ ]`), synthesizing `- [ ] ` if the line has none.
        pub fn reopen(&mut self) {
            self.set_checkbox(CheckboxState::Open, ' ');
        }

        fn set_checkbox(&mut self, state: CheckboxState, mark: char) {
            if let Prefix::Checkbox {
                mark: current,
                state: current_state,
                ..
            } = &mut self.prefix
            {
                *current = mark;
                *current_state = state;
                return;
            }
            let indent = self.strip_partial_prefix();
            self.prefix = Prefix::Checkbox {
                lead: format!("{indent}- "),
                mark,
                state,
            };
        }

        /// Drop a stray bullet and a partial bracket token such as `[]` from the start
        /// of the body, leaving a single separating space. Returns the indentation.
        fn strip_partial_prefix(&mut self) -> String {
            let Some(Segment::Text(text)) = self.segments.first_mut() else {
                self.segments.insert(0, Segment::Text(" ".to_string()));
                return String::new();
            };
            let body = text.trim_start();
            let indent_len = text.len() - body.len();
            let rest = strip_partial_bracket(strip_bullet(body).trim_start())
                .trim_start()
                .to_string();
            let indent = text[..indent_len].to_string();
            *text = format!(" {rest}");
            indent
        }

        /// Index of the first annotation matching `pred`.
        pub fn position<F>(&self, mut pred: F) -> Option<usize>
        where
            F: FnMut(&Annotation) -> bool,
        {
            self.segments
                .iter()
                .position(|s| matches!(s, Segment::Annotation(a) if pred(&a.annotation)))
        }

        /// Remove every annotation matching `pred`; returns how many were removed.
        pub fn remove_annotations<F>(&mut self, mut pred: F) -> usize
        where
            F: FnMut(&Annotation) -> bool,
        {
            let mut removed = 0;
            let mut idx = 0;
            while idx < self.segments.len() {
                let hit =
                    matches!(&self.segments[idx], Segment::Annotation(a) if pred(&a.annotation));
                if hit {
                    self.remove_at(idx);
                    removed += 1;
                } else {
                    idx += 1;
                }
            }
            if removed > 0 {
                self.normalize();
            }
            removed
        }

        /// Remove the `marker` date if it is the last thing on the line.
        pub fn remove_trailing_date(&mut self, marker: DateMarker) -> bool {
            let last = self
                .segments
                .iter()
                .rposition(|s| !matches!(s, Segment::Text(t) if t.trim().is_empty()));
            let Some(idx) = last else {
                return false;
            };
            let trailing = matches!(
                &self.segments[idx],
                Segment::Annotation(AnnotationWithSource {
                    annotation: Annotation::Date { marker: m, .. },
                    ..
                }) if *m == marker
            );
            if trailing {
                self.remove_at(idx);
                self.normalize();
            }
            trailing
        }

        /// Insert `annotation` immediately before segment `index`.
        pub fn insert_before(&mut self, index: usize, annotation: Annotation) {
            let index = index.min(self.segments.len());
            let mut pieces = Vec::with_capacity(3);
            if self.char_before(index).is_some_and(|c| !c.is_whitespace()) {
                pieces.push(Segment::Text(" ".to_string()));
            }
            pieces.push(Segment::Annotation(AnnotationWithSource::new(annotation)));
            let next_is_space = match self.segments.get(index) {
                Some(Segment::Text(t)) => t.starts_with(char::is_whitespace),
                Some(Segment::Annotation(_)) => false,
                None => true,
            };
            if !next_is_space {
                pieces.push(Segment::Text(" ".to_string()));
            }
            self.segments.splice(index..index, pieces);
            self.normalize();
        }

        /// Append `annotation` after the line's content, separated by one space.
        pub fn append(&mut self, annotation: Annotation) {
            self.trim_end();
            if self.char_before(self.segments.len()).is_some() {
                self.segments.push(Segment::Text(" ".to_string()));
            }
            self.segments
                .push(Segment::Annotation(AnnotationWithSource::new(annotation)));
            self.normalize();
        }

        /// Parenthesize every bare duration in place; returns how many changed.
        pub fn wrap_durations(&mut self) -> usize {
            let mut wrapped = 0;
            for a in self.annotations_mut() {
                if let Annotation::Duration { parenthesized, .. } = &mut a.annotation {
                    if !*parenthesized {
                        *parenthesized = true;
                        a.mark_dirty();
                        wrapped += 1;
                    }
                }
            }
            wrapped
        }

        /// Replace the date of every annotation whose marker is in `markers`.
        /// Markers absent from the line stay absent.
        pub fn set_dates(&mut self, markers: &[DateMarker], date: NaiveDate) -> usize {
            let mut changed = 0;
            for a in self.annotations_mut() {
                if let Annotation::Date { marker, date: current } = &mut a.annotation {
                    if markers.contains(marker) {
                        *current = date;
                        a.mark_dirty();
                        changed += 1;
                    }
                }
            }
            changed
        }

        /// Drop trailing whitespace from the end of the line.
        pub fn trim_end(&mut self) {
            while let Some(Segment::Text(text)) = self.segments.last_mut() {
                let keep = text.trim_end().len();
                text.truncate(keep);
                if !text.is_empty() {
                    break;
                }
                self.segments.pop();
            }
        }

        fn remove_at(&mut self, idx: usize) {
            self.segments.remove(idx);
            if idx == 0 {
                if matches!(self.prefix, Prefix::Missing) {
                    if let Some(Segment::Text(next)) = self.segments.first_mut() {
                        if next.starts_with(char::is_whitespace) {
                            next.remove(0);
                        }
                    }
                }
                return;
            }
            // Only collapse when the gap would otherwise hold two spaces or dangle at the end.
            let next_is_space = match self.segments.get(idx) {
                Some(Segment::Text(t)) => t.starts_with(char::is_whitespace),
                Some(Segment::Annotation(_)) => false,
                None => true,
            };
            if let Some(Segment::Text(prev)) = self.segments.get_mut(idx - 1) {
                if next_is_space && prev.ends_with(char::is_whitespace) {
                    prev.pop();
                }
            }
        }

        /// Last rendered character before segment `index`, including the prefix.
        fn char_before(&self, index: usize) -> Option<char> {
            let mut rendered = String::new();
            append_segments(&mut rendered, &self.segments[..index]);
            rendered.chars().next_back().or(match self.prefix {
                Prefix::Checkbox { .. } => Some(']'),
                Prefix::Missing => None,
            })
        }

        /// Merge adjacent text spans and drop empty ones.
        fn normalize(&mut self) {
            let mut merged: Vec<Segment> = Vec::with_capacity(self.segments.len());
            for segment in self.segments.drain(..) {
                if let Segment::Text(text) = &segment {
                    if text.is_empty() {
                        continue;
                    }
                    if let Some(Segment::Text(prev)) = merged.last_mut() {
                        prev.push_str(text);
                        continue;
                    }
                }
                merged.push(segment);
            }
            self.segments = merged;
        }
    }

    fn strip_bullet(s: &str) -> &str {
        let digits = s.len() - s.trim_start_matches(|c: char| c.is_ascii_digit()).len();
        let after = if digits > 0 {
            s[digits..].strip_prefix(['.', ')'])
        } else {
            s.strip_prefix(['-', '*', '+'])
        };
        match after {
            Some(rest)
                if rest.is_empty() || rest.starts_with(|c: char| c.is_whitespace() || c == '[') =>
            {
                rest
            }
            _ => s,
        }
    }

    /// `[`, `[]`, `[xx]` and similar leftovers of a mistyped checkbox.
    fn strip_partial_bracket(s: &str) -> &str {
        let Some(inner) = s.strip_prefix('[') else {
            return s;
        };
        let close = inner
            .char_indices()
            .take(3)
            .find(|(_, c)| *c == ']')
            .map(|(idx, _)| idx);
        match close {
            Some(idx) => &inner[idx + 1..],
            None => inner.trim_start_matches(|c: char| !c.is_whitespace()),
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::parser::parse_task_line;
        use chrono::NaiveTime;

        fn time_log(h: u32, m: u32) -> Annotation {
            Annotation::TimeLog {
                time: NaiveTime::from_hms_opt(h, m, 0).unwrap(),
            }
        }

        #[test]
        fn removal_collapses_to_single_space() {
            let mut line = parse_task_line("- [ ] a 📅 2024-01-01 b ✅ 2024-01-02");
            let removed = line.remove_annotations(|a| matches!(a, Annotation::Date { .. }));
            assert_eq!(removed, 2);
            assert_eq!(line.render(), "- [ ] a b");

            let mut line = parse_task_line("- [ ] ✅ 2024-01-02 first");
            line.remove_annotations(|a| matches!(a, Annotation::Date { .. }));
            assert_eq!(line.render(), "- [ ] first");

            let mut line = parse_task_line("- [ ] a (time::09:00)(duration::1h)");
            line.remove_annotations(|a| matches!(a, Annotation::TimeLog { .. }));
            assert_eq!(line.render(), "- [ ] a (duration::1h)");
        }

        #[test]
        fn trailing_date_only_when_last() {
            let mut line = parse_task_line("- [x] a ✅ 2024-01-02 b");
            assert!(!line.remove_trailing_date(DateMarker::Done));
            assert_eq!(line.render(), "- [x] a ✅ 2024-01-02 b");

            let mut line = parse_task_line("- [x] a ✅ 2024-01-02  ");
            assert!(line.remove_trailing_date(DateMarker::Done));
            assert_eq!(line.render(), "- [x] a  ");
        }

        #[test]
        fn insert_before_spaces_the_new_annotation() {
            let mut line = parse_task_line("- [ ] work(duration::1h)");
            let idx = line
                .position(|a| matches!(a, Annotation::Duration { .. }))
                .unwrap();
            line.insert_before(idx, time_log(8, 0));
            assert_eq!(line.render(), "- [ ] work (time::08:00) (duration::1h)");
        }

        #[test]
        fn append_on_empty_body() {
            let mut line = parse_task_line("- [ ]   ");
            line.append(time_log(8, 0));
            assert_eq!(line.render(), "- [ ] (time::08:00)");

            let mut line = parse_task_line("");
            line.append(time_log(8, 0));
            assert_eq!(line.render(), "(time::08:00)");
        }

        #[test]
        fn synthesized_checkbox_strips_partial_tokens() {
            let cases = [
                ("Buy milk", "- [x] Buy milk"),
                ("  - [] Buy milk", "  - [x] Buy milk"),
                ("- [?] Buy milk", "- [x] Buy milk"),
                ("[ ] Buy milk", "- [x] Buy milk"),
                ("* [ Buy milk", "- [x] Buy milk"),
                ("-[x Buy milk", "- [x] Buy milk"),
                ("2024 plans", "- [x] 2024 plans"),
            ];
            for (input, expected) in cases {
                let mut line = parse_task_line(input);
                line.check();
                assert_eq!(line.render(), expected, "checking {input:?}");
            }

            let mut line = parse_task_line("📅 2024-01-01 task");
            line.reopen();
            assert_eq!(line.render(), "- [ ] 📅 2024-01-01 task");
        }

        #[test]
        fn set_dates_leaves_absent_markers_absent() {
            let mut line = parse_task_line("- [ ] x ⏳ 2024/01/01 ➕ 2023-12-31");
            let next = NaiveDate::from_ymd_opt(2024, 2, 1).unwrap();
            assert_eq!(line.set_dates(&DateMarker::ANCHORS, next), 1);
            assert_eq!(line.render(), "- [ ] x ⏳ 2024-02-01 ➕ 2023-12-31");
        }
    }
}

pub mod transitions {
    //! Open → done completion and next-occurrence generation for recurring tasks.
    //!
    //! Every step works on the parsed line and serializes once at the end. The next
    //! occurrence is always derived from the original line, never from the completed one.

    use crate::core::*;
    use crate::parser::{parse_task_line, parse_task_line_with_options, validate_now, validate_today};
    use chrono::{NaiveDate, NaiveTime};
    use tracing::{debug, warn};

    /* ------------------------------ Completion ------------------------------ */

    /// Rewrite `line` as completed on `today` at `now`.
    pub fn complete_line(line: &str, today: NaiveDate, now: NaiveTime) -> String {
        let mut parsed = parse_task_line(line);
        complete_in_place(&mut parsed, today, now);
        parsed.render()
    }

    /// Completion steps, in order:
    /// 1. wrap bare durations in parentheses;
    /// 2. insert `(time::HH:MM)` before the first parenthesized duration, else a bare
    ///    duration, else the repeat marker, else append it;
    /// 3. set the checkbox to `[x]`, synthesizing `- [x] ` when missing;
    /// 4. append `✅ <today>`.
    ///
    /// A done stamp already ending the line and any earlier time-log are removed
    /// first, so completing twice leaves one of each.
    pub fn complete_in_place(line: &mut TaskLine, today: NaiveDate, now: NaiveTime) {
        line.remove_trailing_date(DateMarker::Done);
        line.remove_annotations(|a| matches!(a, Annotation::TimeLog { .. }));

        line.wrap_durations();

        let time_log = Annotation::TimeLog { time: now };
        match time_log_anchor(line) {
            Some(index) => line.insert_before(index, time_log),
            None => line.append(time_log),
        }

        line.check();
        line.append(Annotation::Date {
            marker: DateMarker::Done,
            date: today,
        });
    }

    // Fixed order; existing corpora depend on it.
    fn time_log_anchor(line: &TaskLine) -> Option<usize> {
        line.position(|a| {
            matches!(
                a,
                Annotation::Duration {
                    parenthesized: true,
                    ..
                }
            )
        })
        .or_else(|| {
            line.position(|a| {
                matches!(
                    a,
                    Annotation::Duration {
                        parenthesized: false,
                        ..
                    }
                )
            })
        })
        .or_else(|| line.position(|a| matches!(a, Annotation::Repeat { .. })))
    }

    /* ------------------------------ Base date ------------------------------ */

    /// Anchor date for the next occurrence of `line`.
    pub fn resolve_base_date(line: &str, when_done: bool, today: NaiveDate) -> NaiveDate {
        base_date(&parse_task_line(line), when_done, today)
    }

    /// `today` for "when done" rules; otherwise the first of due, scheduled, start that
    /// is present, falling back to `today`.
    pub fn base_date(line: &TaskLine, when_done: bool, today: NaiveDate) -> NaiveDate {
        if when_done {
            return today;
        }
        DateMarker::ANCHORS
            .iter()
            .find_map(|marker| line.find_date(*marker))
            .unwrap_or(today)
    }

    /* --------------------------- Next occurrence --------------------------- */

    /// Reopened copy of `line` with its anchor dates advanced from `base`.
    pub fn next_occurrence(line: &str, base: NaiveDate) -> String {
        let mut parsed = parse_task_line(line);
        next_occurrence_in_place(&mut parsed, base);
        parsed.render()
    }

    /// Reopen the checkbox, strip done/cancelled stamps and time-logs, then move every
    /// present due/scheduled/start date to `base + interval × unit`.
    ///
    /// Lines without a recurrence rule are only reopened and stripped. Durations,
    /// created dates and free text are never touched. Only trailing whitespace is
    /// trimmed; leading indentation stays so nested tasks keep their level.
    pub fn next_occurrence_in_place(line: &mut TaskLine, base: NaiveDate) {
        line.reopen();
        line.remove_annotations(|a| {
            matches!(
                a,
                Annotation::Date {
                    marker: DateMarker::Done | DateMarker::Cancelled,
                    ..
                }
            )
        });
        line.remove_annotations(|a| matches!(a, Annotation::TimeLog { .. }));

        if let Some(rule) = line.recurrence() {
            match rule.next_after(base) {
                Some(next) => {
                    let moved = line.set_dates(&DateMarker::ANCHORS, next);
                    debug!(%base, %next, moved, "advanced recurring task");
                }
                None => warn!(%base, %rule, "next occurrence is out of calendar range; dates kept"),
            }
        }
        line.trim_end();
    }

    /* ------------------------------ Orchestrator ------------------------------ */

    /// Complete `line` and, if it recurs, derive its next occurrence.
    ///
    /// `today` must be `YYYY-MM-DD` and `now` 24-hour `HH:MM`; both are checked before
    /// the line is touched.
    pub fn mark_done(
        line: &str,
        today: &str,
        now: &str,
    ) -> Result<TaskCompletionResult, TaskLineError> {
        mark_done_with_options(line, today, now, &LineOptions::default())
    }

    pub fn mark_done_with_options(
        line: &str,
        today: &str,
        now: &str,
        opts: &LineOptions,
    ) -> Result<TaskCompletionResult, TaskLineError> {
        let today = validate_today(today)?;
        let now = validate_now(now)?;
        Ok(mark_done_at_with_options(line, today, now, opts))
    }

    pub fn mark_done_at(line: &str, today: NaiveDate, now: NaiveTime) -> TaskCompletionResult {
        mark_done_at_with_options(line, today, now, &LineOptions::default())
    }

    pub fn mark_done_at_with_options(
        line: &str,
        today: NaiveDate,
        now: NaiveTime,
        opts: &LineOptions,
    ) -> TaskCompletionResult {
        let original = parse_task_line_with_options(line, opts);

        let mut completed = original.clone();
        complete_in_place(&mut completed, today, now);
        let completed_line = completed.render();

        let Some(rule) = original.recurrence() else {
            debug!(%today, "completed non-recurring task");
            return TaskCompletionResult {
                completed_line,
                next_task_line: None,
            };
        };

        let base = base_date(&original, rule.when_done, today);
        let mut next = original;
        next_occurrence_in_place(&mut next, base);
        debug!(%today, %rule, %base, "completed recurring task");

        TaskCompletionResult {
            completed_line,
            next_task_line: Some(next.render()),
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        fn date(y: i32, m: u32, d: u32) -> NaiveDate {
            NaiveDate::from_ymd_opt(y, m, d).unwrap()
        }

        fn at(h: u32, m: u32) -> NaiveTime {
            NaiveTime::from_hms_opt(h, m, 0).unwrap()
        }

        #[test]
        fn weekly_task_advances_due_date() {
            let result = mark_done(
                "- [ ] Buy milk 📅 2024-01-10 🔁 every 1 week",
                "2024-01-10",
                "09:00",
            )
            .expect("valid inputs");

            assert_eq!(
                result.completed_line,
                "- [x] Buy milk 📅 2024-01-10 (time::09:00) 🔁 every 1 week ✅ 2024-01-10"
            );
            assert!(result.completed_line.ends_with("✅ 2024-01-10"));
            assert_eq!(
                result.next_task_line.as_deref(),
                Some("- [ ] Buy milk 📅 2024-01-17 🔁 every 1 week")
            );
        }

        #[test]
        fn when_done_anchors_on_completion_day() {
            let result = mark_done(
                "- [ ] Water plants 📅 2024-01-01 🔁 every 3 days when done",
                "2024-01-20",
                "18:45",
            )
            .expect("valid inputs");
            assert_eq!(
                result.next_task_line.as_deref(),
                Some("- [ ] Water plants 📅 2024-01-23 🔁 every 3 days when done")
            );
        }

        #[test]
        fn scheduled_outranks_start_as_anchor() {
            let line = "- [ ] Review ⏳ 2024-03-01 🛫 2024-02-25 🔁 every month";
            assert_eq!(
                resolve_base_date(line, false, date(2024, 3, 5)),
                date(2024, 3, 1)
            );
            let result = mark_done(line, "2024-03-05", "08:00").expect("valid inputs");
            assert_eq!(
                result.next_task_line.as_deref(),
                Some("- [ ] Review ⏳ 2024-04-01 🛫 2024-04-01 🔁 every month")
            );
        }

        #[test]
        fn base_date_priority_and_fallbacks() {
            let today = date(2024, 6, 1);
            assert_eq!(
                resolve_base_date("- [ ] x 🛫 2024-01-03 📅 2024-01-01", false, today),
                date(2024, 1, 1)
            );
            assert_eq!(
                resolve_base_date("- [ ] x 📅 2024-01-01", true, today),
                today
            );
            assert_eq!(resolve_base_date("- [ ] x ➕ 2024-01-01", false, today), today);
            assert_eq!(
                resolve_base_date("- [ ] x 📅 2024-02-31 ⏳ 2024-02-10", false, today),
                date(2024, 2, 10)
            );
        }

        #[test]
        fn duration_is_wrapped_and_time_log_placed_before_it() {
            let completed = complete_line("- [ ] Deep work duration::90m", date(2024, 1, 10), at(14, 30));
            assert!(completed.contains("(time::14:30) (duration::90m)"));
            assert_eq!(
                completed,
                "- [x] Deep work (time::14:30) (duration::90m) ✅ 2024-01-10"
            );
        }

        #[test]
        fn unclosed_duration_is_closed_on_completion() {
            let completed = complete_line("- [ ] work (duration::90m", date(2024, 1, 10), at(9, 0));
            assert_eq!(
                completed,
                "- [x] work (time::09:00) (duration::90m) ✅ 2024-01-10"
            );
        }

        #[test]
        fn next_occurrence_keeps_indentation() {
            let next = next_occurrence(
                "    - [x] Nested 📅 2024-01-01 🔁 every day ✅ 2024-01-01   ",
                date(2024, 1, 1),
            );
            assert_eq!(next, "    - [ ] Nested 📅 2024-01-02 🔁 every day");
        }

        #[test]
        fn duration_outranks_repeat_marker_as_time_log_anchor() {
            let completed = complete_line(
                "- [ ] Run 🔁 every day (duration::30m)",
                date(2024, 1, 10),
                at(6, 0),
            );
            assert_eq!(
                completed,
                "- [x] Run 🔁 every day (time::06:00) (duration::30m) ✅ 2024-01-10"
            );
        }

        #[test]
        fn time_log_is_appended_without_anchor() {
            let completed = complete_line("- [ ] Call mom   ", date(2024, 1, 10), at(20, 5));
            assert_eq!(completed, "- [x] Call mom (time::20:05) ✅ 2024-01-10");
        }

        #[test]
        fn month_end_is_clamped() {
            let result = mark_done_at(
                "- [ ] Pay rent 📅 2024-01-31 🔁 every month",
                date(2024, 1, 31),
                at(9, 0),
            );
            assert_eq!(
                result.next_task_line.as_deref(),
                Some("- [ ] Pay rent 📅 2024-02-29 🔁 every month")
            );

            let result = mark_done_at(
                "- [ ] Pay rent 📅 2023-01-31 🔁 every month",
                date(2023, 1, 31),
                at(9, 0),
            );
            assert_eq!(
                result.next_task_line.as_deref(),
                Some("- [ ] Pay rent 📅 2023-02-28 🔁 every month")
            );
        }

        #[test]
        fn recompletion_keeps_a_single_done_stamp() {
            let once = complete_line("- [ ] Task 📅 2024-01-10", date(2024, 1, 10), at(9, 0));
            assert_eq!(once, "- [x] Task 📅 2024-01-10 (time::09:00) ✅ 2024-01-10");

            let twice = complete_line(&once, date(2024, 1, 11), at(10, 0));
            assert_eq!(twice, "- [x] Task 📅 2024-01-10 (time::10:00) ✅ 2024-01-11");
            assert_eq!(twice.matches("✅").count(), 1);
            assert_eq!(twice.matches("time::").count(), 1);
        }

        #[test]
        fn non_recurring_lines_have_no_next_occurrence() {
            for line in [
                "- [ ] Buy milk 📅 2024-01-10",
                "- [ ] Bare marker 🔁",
                "- [ ] Unknown schedule 🔁 every fortnight",
                "no checkbox at all",
            ] {
                let result = mark_done(line, "2024-01-10", "09:00").expect("valid inputs");
                assert_eq!(result.next_task_line, None, "{line:?}");
                assert!(result.completed_line.ends_with("✅ 2024-01-10"));
            }
        }

        #[test]
        fn bare_repeat_marker_still_anchors_time_log() {
            let result = mark_done("- [ ] Bare marker 🔁", "2024-01-10", "09:00").unwrap();
            assert_eq!(
                result.completed_line,
                "- [x] Bare marker (time::09:00) 🔁 ✅ 2024-01-10"
            );
        }

        #[test]
        fn text_outside_annotations_is_untouched() {
            let line = "  * [ ] Call  Bob   about (duration::1h) stuff 📅 2024/05/06 ➕ 2024-05-01 🔁 every 2 weeks   trailing";
            let result = mark_done(line, "2024-05-06", "08:15").expect("valid inputs");
            assert_eq!(
                result.completed_line,
                "  * [x] Call  Bob   about (time::08:15) (duration::1h) stuff 📅 2024/05/06 ➕ 2024-05-01 🔁 every 2 weeks   trailing ✅ 2024-05-06"
            );
            assert_eq!(
                result.next_task_line.as_deref(),
                Some(
                    "  * [ ] Call  Bob   about (duration::1h) stuff 📅 2024-05-20 ➕ 2024-05-01 🔁 every 2 weeks   trailing"
                )
            );
        }

        #[test]
        fn next_occurrence_drops_completion_and_cancellation_stamps() {
            let result = mark_done(
                "- [-] Gym 📅 2024-01-01 ❌ 2024-01-01 🔁 every day",
                "2024-01-02",
                "07:00",
            )
            .unwrap();
            assert_eq!(
                result.completed_line,
                "- [x] Gym 📅 2024-01-01 ❌ 2024-01-01 (time::07:00) 🔁 every day ✅ 2024-01-02"
            );
            assert_eq!(
                result.next_task_line.as_deref(),
                Some("- [ ] Gym 📅 2024-01-02 🔁 every day")
            );
        }

        #[test]
        fn generator_tolerates_non_recurring_lines() {
            let next = next_occurrence("- [x] Task (time::09:00) ✅ 2024-01-10  ", date(2024, 2, 1));
            assert_eq!(next, "- [ ] Task");
        }

        #[test]
        fn generator_never_invents_dates() {
            let result = mark_done("Stretch 🔁 every day", "2024-01-10", "07:00").unwrap();
            assert_eq!(
                result.completed_line,
                "- [x] Stretch (time::07:00) 🔁 every day ✅ 2024-01-10"
            );
            assert_eq!(
                result.next_task_line.as_deref(),
                Some("- [ ] Stretch 🔁 every day")
            );
        }

        #[test]
        fn out_of_range_step_keeps_dates() {
            let line = "- [ ] T 📅 2024-01-01 🔁 every 4000000000 years";
            assert_eq!(next_occurrence(line, date(2024, 1, 1)), line);
        }

        #[test]
        fn custom_in_progress_glyph() {
            let opts = LineOptions {
                in_progress_glyph: '>',
            };
            let result =
                mark_done_with_options("- [>] Draft 📅 2024-05-01", "2024-05-01", "10:15", &opts)
                    .unwrap();
            assert_eq!(
                result.completed_line,
                "- [x] Draft 📅 2024-05-01 (time::10:15) ✅ 2024-05-01"
            );
        }

        #[test]
        fn caller_contract_is_checked_before_rewriting() {
            assert_eq!(
                mark_done("- [ ] x", "2024-1-10", "09:00"),
                Err(TaskLineError::InvalidToday("2024-1-10".into()))
            );
            assert_eq!(
                mark_done("- [ ] x", "2024-01-10", "9am"),
                Err(TaskLineError::InvalidNow("9am".into()))
            );
        }
    }
}

pub use parser::{find_date, parse_recurrence, parse_task_line, parse_task_line_with_options};
pub use transitions::{
    complete_line, mark_done, mark_done_at, mark_done_with_options, next_occurrence,
    resolve_base_date,
};
