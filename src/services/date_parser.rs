use std::sync::LazyLock;

use chrono::{DateTime, Datelike, Days, Local, Months, NaiveDate, TimeZone, Weekday};
use regex::{Captures, Regex};
use tracing::debug;

use crate::models::search::TimeWindow;

const MONTH_NAMES: &str =
    "january|jan|february|feb|march|mar|april|apr|may|june|jun|july|jul|august|aug|september|sept|sep|october|oct|november|nov|december|dec";
const FULL_MONTHS: [&str; 12] = [
    "january",
    "february",
    "march",
    "april",
    "may",
    "june",
    "july",
    "august",
    "september",
    "october",
    "november",
    "december",
];
const WEEKDAYS: [(&str, Weekday); 7] = [
    ("monday", Weekday::Mon),
    ("tuesday", Weekday::Tue),
    ("wednesday", Weekday::Wed),
    ("thursday", Weekday::Thu),
    ("friday", Weekday::Fri),
    ("saturday", Weekday::Sat),
    ("sunday", Weekday::Sun),
];
const NUMBER_WORDS: [&str; 11] = [
    "zero", "one", "two", "three", "four", "five", "six", "seven", "eight", "nine", "ten",
];
const CONNECTIVES: [&str; 7] = ["from", "in", "on", "during", "since", "of", "at"];
const MAX_AGO: u32 = 200;

/// Query text with its date expression removed, plus the inclusive window it denotes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateQuery {
    pub text: String,
    pub start: i64,
    pub end: i64,
}

impl DateQuery {
    fn unbounded(query: &str) -> Self {
        Self {
            text: query.to_string(),
            start: 0,
            end: 0,
        }
    }

    pub fn window(&self) -> TimeWindow {
        TimeWindow {
            start: self.start,
            end: self.end,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Granularity {
    Day,
    Week,
    Month,
    Year,
}

type Resolver = fn(&Captures<'_>, NaiveDate) -> Option<NaiveDate>;

struct Rule {
    re: Regex,
    resolve: Resolver,
}

fn rule(pattern: &str, resolve: Resolver) -> Rule {
    Rule {
        re: Regex::new(&format!("(?i){pattern}")).expect("date rule regex"),
        resolve,
    }
}

static RULES: LazyLock<Vec<Rule>> = LazyLock::new(|| {
    vec![
        rule(r"\b(\d{4})-(\d{1,2})-(\d{1,2})\b", resolve_iso),
        rule(r"\b(\d{1,2})/(\d{1,2})/(\d{4})\b", resolve_day_first),
        rule(
            &format!(
                r"\b(?:(\d{{1,2}})(?:st|nd|rd|th)?\s+(?:of\s+)?)?({MONTH_NAMES})\b(?:\s+(\d{{1,2}})(?:st|nd|rd|th)?\b)?(?:,?\s+(\d{{4}})\b)?"
            ),
            resolve_month_name,
        ),
        rule(
            r"\b(last|past|previous|this|next)\s+(day|week|month|year)\b",
            resolve_relative,
        ),
        rule(r"\b(today|tonight|yesterday|tomorrow)\b", resolve_named_day),
        rule(
            r"\b(\d{1,3}|a|an|one|two|three|four|five|six|seven|eight|nine|ten)\s+(day|week|month|year)s?\s+ago\b",
            resolve_ago,
        ),
        rule(
            r"\b(?:(last|this|next)\s+)?(monday|tuesday|wednesday|thursday|friday|saturday|sunday)\b",
            resolve_weekday,
        ),
        rule(r"\b(19[7-9]\d|20\d{2})\b", resolve_year),
    ]
});

static FALLBACK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(last month|last week|yesterday)\b").expect("fallback regex")
});
static FROM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bfrom\b").expect("from regex"));

fn number(caps: &Captures<'_>, group: usize) -> Option<u32> {
    caps.get(group)?.as_str().parse().ok()
}

fn month_index(name: &str) -> Option<u32> {
    let name = name.to_lowercase();
    FULL_MONTHS
        .iter()
        .position(|full| full.starts_with(&name) && name.len() >= 3)
        .map(|i| i as u32 + 1)
}

fn weekday_index(name: &str) -> Option<Weekday> {
    let name = name.to_lowercase();
    WEEKDAYS
        .iter()
        .find(|(day, _)| *day == name)
        .map(|(_, weekday)| *weekday)
}

fn shift(today: NaiveDate, unit: &str, amount: i64) -> Option<NaiveDate> {
    let magnitude = amount.unsigned_abs();
    match unit {
        "day" => shift_days(today, amount),
        "week" => shift_days(today, amount * 7),
        "month" | "year" => {
            let months = if unit == "year" { magnitude * 12 } else { magnitude };
            let months = Months::new(u32::try_from(months).ok()?);
            if amount < 0 {
                today.checked_sub_months(months)
            } else {
                today.checked_add_months(months)
            }
        }
        _ => None,
    }
}

fn shift_days(date: NaiveDate, days: i64) -> Option<NaiveDate> {
    let delta = Days::new(days.unsigned_abs());
    if days < 0 {
        date.checked_sub_days(delta)
    } else {
        date.checked_add_days(delta)
    }
}

fn resolve_iso(caps: &Captures<'_>, _today: NaiveDate) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(number(caps, 1)? as i32, number(caps, 2)?, number(caps, 3)?)
}

fn resolve_day_first(caps: &Captures<'_>, _today: NaiveDate) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(number(caps, 3)? as i32, number(caps, 2)?, number(caps, 1)?)
}

fn resolve_month_name(caps: &Captures<'_>, today: NaiveDate) -> Option<NaiveDate> {
    let name = caps.get(2)?.as_str().to_lowercase();
    let day = number(caps, 1).or_else(|| number(caps, 3));
    let year = number(caps, 4);

    // A lone abbreviation or "may" is too ambiguous to read as a date.
    if day.is_none() && year.is_none() && (name == "may" || !FULL_MONTHS.contains(&name.as_str())) {
        return None;
    }

    let month = month_index(&name)?;
    match year {
        Some(year) => NaiveDate::from_ymd_opt(year as i32, month, day.unwrap_or(1)),
        None => {
            let candidate = NaiveDate::from_ymd_opt(today.year(), month, day.unwrap_or(1))?;
            if candidate > today {
                NaiveDate::from_ymd_opt(today.year() - 1, month, day.unwrap_or(1))
            } else {
                Some(candidate)
            }
        }
    }
}

fn resolve_relative(caps: &Captures<'_>, today: NaiveDate) -> Option<NaiveDate> {
    let direction = match caps.get(1)?.as_str().to_lowercase().as_str() {
        "last" | "past" | "previous" => -1,
        "next" => 1,
        _ => 0,
    };
    shift(today, &caps.get(2)?.as_str().to_lowercase(), direction)
}

fn resolve_named_day(caps: &Captures<'_>, today: NaiveDate) -> Option<NaiveDate> {
    match caps.get(1)?.as_str().to_lowercase().as_str() {
        "yesterday" => today.pred_opt(),
        "tomorrow" => today.succ_opt(),
        _ => Some(today),
    }
}

fn resolve_ago(caps: &Captures<'_>, today: NaiveDate) -> Option<NaiveDate> {
    let raw = caps.get(1)?.as_str().to_lowercase();
    let amount = match raw.as_str() {
        "a" | "an" => 1,
        word => match NUMBER_WORDS.iter().position(|w| *w == word) {
            Some(n) => n as u32,
            None => word.parse().ok()?,
        },
    };
    if amount > MAX_AGO {
        return None;
    }
    shift(today, &caps.get(2)?.as_str().to_lowercase(), -i64::from(amount))
}

fn resolve_weekday(caps: &Captures<'_>, today: NaiveDate) -> Option<NaiveDate> {
    let target = weekday_index(caps.get(2)?.as_str())?;
    let today_idx = i64::from(today.weekday().num_days_from_monday());
    let target_idx = i64::from(target.num_days_from_monday());
    let modifier = caps.get(1).map(|m| m.as_str().to_lowercase());

    let ahead = (target_idx - today_idx).rem_euclid(7);
    let behind = (today_idx - target_idx).rem_euclid(7);
    let offset = match modifier.as_deref() {
        Some("this") => target_idx - today_idx,
        Some("next") if ahead == 0 => 7,
        Some("next") => ahead,
        Some("last") if behind == 0 => -7,
        _ => -behind,
    };
    shift_days(today, offset)
}

fn resolve_year(caps: &Captures<'_>, _today: NaiveDate) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(number(caps, 1)? as i32, 1, 1)
}

fn contains_any(tokens: &[String], words: &[&str]) -> bool {
    tokens.iter().any(|t| words.contains(&t.as_str()))
}

fn granularity_of(phrase: &str) -> Granularity {
    let tokens: Vec<String> = phrase
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect();
    if contains_any(&tokens, &["month", "months"])
        || tokens
            .iter()
            .any(|t| MONTH_NAMES.split('|').any(|m| m == t.as_str()))
    {
        return Granularity::Month;
    }
    if contains_any(&tokens, &["week", "weeks"]) {
        return Granularity::Week;
    }
    let numeric: Vec<&String> = tokens
        .iter()
        .filter(|t| t.chars().all(|c| c.is_ascii_digit()))
        .collect();
    if contains_any(&tokens, &["year", "years"]) || (numeric.len() == 1 && numeric[0].len() == 4) {
        return Granularity::Year;
    }
    Granularity::Day
}

fn midnight<Tz: TimeZone>(tz: &Tz, date: NaiveDate) -> Option<i64> {
    // Some zones skip local midnight on DST days; fall back to 01:00.
    [0, 1].into_iter().find_map(|hour| {
        let local = date.and_hms_opt(hour, 0, 0)?;
        tz.from_local_datetime(&local)
            .earliest()
            .map(|dt| dt.timestamp())
    })
}

fn interval<Tz: TimeZone>(tz: &Tz, date: NaiveDate, granularity: Granularity) -> Option<(i64, i64)> {
    let (first, next) = match granularity {
        Granularity::Day => (date, date.succ_opt()?),
        Granularity::Week => {
            let monday = shift_days(date, -i64::from(date.weekday().num_days_from_monday()))?;
            (monday, shift_days(monday, 7)?)
        }
        Granularity::Month => {
            let first = date.with_day(1)?;
            (first, first.checked_add_months(Months::new(1))?)
        }
        Granularity::Year => {
            let first = NaiveDate::from_ymd_opt(date.year(), 1, 1)?;
            (first, NaiveDate::from_ymd_opt(date.year() + 1, 1, 1)?)
        }
    };
    let start = midnight(tz, first)?;
    let end = (midnight(tz, next)? - 1).max(start);
    Some((start, end))
}

/// Removes `query[start..end]` and one connective word right before it.
fn strip_span(query: &str, start: usize, end: usize) -> String {
    let mut head = query[..start].trim_end();
    let (before, last) = match head.rfind(char::is_whitespace) {
        Some(i) => (&head[..i], head[i..].trim_start()),
        None => ("", head),
    };
    if CONNECTIVES.contains(&last.to_lowercase().as_str()) {
        head = before;
    }
    format!("{head} {}", &query[end..])
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn recognize(query: &str, today: NaiveDate) -> Option<(usize, usize, NaiveDate)> {
    let mut best: Option<(usize, usize, NaiveDate)> = None;
    for rule in RULES.iter() {
        let found = rule.re.captures_iter(query).find_map(|caps| {
            let m = caps.get(0)?;
            (rule.resolve)(&caps, today).map(|date| (m.start(), m.end(), date))
        });
        let Some(candidate) = found else { continue };
        let better = match best {
            None => true,
            Some((start, end, _)) => {
                candidate.0 < start || (candidate.0 == start && candidate.1 - candidate.0 > end - start)
            }
        };
        if better {
            best = Some(candidate);
        }
    }
    best
}

fn fallback<Tz: TimeZone>(query: &str, now: &DateTime<Tz>) -> DateQuery {
    let tz = now.timezone();
    let today = now.date_naive();
    let Some(found) = FALLBACK_RE.find(query) else {
        return DateQuery::unbounded(query);
    };
    let phrase = found.as_str().to_lowercase();
    let window = match phrase.as_str() {
        "last month" => today
            .checked_sub_months(Months::new(1))
            .and_then(|d| interval(&tz, d, Granularity::Month)),
        "last week" => shift_days(today, -7).and_then(|d| interval(&tz, d, Granularity::Week)),
        _ => today.pred_opt().and_then(|d| interval(&tz, d, Granularity::Day)),
    };
    let Some((start, end)) = window else {
        return DateQuery::unbounded(query);
    };

    let without_phrase = FALLBACK_RE.replace_all(query, " ");
    let text = FROM_RE
        .replace_all(&without_phrase, " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    DateQuery { text, start, end }
}

pub fn parse_date_query(query: &str) -> DateQuery {
    parse_date_query_at(query, &Local::now())
}

/// Extracts the first date expression from `query`, relative to `now`.
pub fn parse_date_query_at<Tz: TimeZone>(query: &str, now: &DateTime<Tz>) -> DateQuery {
    let tz = now.timezone();
    let Some((start, end, date)) = recognize(query, now.date_naive()) else {
        return fallback(query, now);
    };

    let phrase = &query[start..end];
    let granularity = granularity_of(phrase);
    let Some((window_start, window_end)) = interval(&tz, date, granularity) else {
        return fallback(query, now);
    };
    debug!(phrase, ?granularity, window_start, window_end, "date expression");

    DateQuery {
        text: strip_span(query, start, end),
        start: window_start,
        end: window_end,
    }
}
