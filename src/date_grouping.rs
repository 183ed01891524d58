//! Date grouping expressions over epoch-millisecond columns
//!
//! Each mode extracts one or more calendar parts from
//! `from_unixtime(col/1000)`. Qualified modes pack several parts into one
//! sortable integer, e.g. `year * 1000 + day_of_year` for 2024-02-01 is
//! `2024032`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::IngestError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CalendarPart {
    Year,
    YearOfWeek,
    Quarter,
    Month,
    WeekOfYear,
    DayOfYear,
    DayOfMonth,
    DayOfWeek,
}

impl CalendarPart {
    pub fn sql_function(self) -> &'static str {
        match self {
            CalendarPart::Year => "year",
            CalendarPart::YearOfWeek => "year_of_week",
            CalendarPart::Quarter => "quarter",
            CalendarPart::Month => "month",
            CalendarPart::WeekOfYear => "week_of_year",
            CalendarPart::DayOfYear => "day_of_year",
            CalendarPart::DayOfMonth => "day_of_month",
            CalendarPart::DayOfWeek => "day_of_week",
        }
    }

    /// Largest value the engine returns for this part; years are unbounded.
    pub fn max_value(self) -> Option<u32> {
        match self {
            CalendarPart::Year | CalendarPart::YearOfWeek => None,
            CalendarPart::Quarter => Some(4),
            CalendarPart::Month => Some(12),
            CalendarPart::WeekOfYear => Some(53),
            CalendarPart::DayOfYear => Some(366),
            CalendarPart::DayOfMonth => Some(31),
            // ISO: Monday = 1 .. Sunday = 7
            CalendarPart::DayOfWeek => Some(7),
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DateGrouping {
    Year,
    YearOfWeek,
    Quarter,
    Month,
    WeekOfYear,
    DayOfYear,
    DayOfMonth,
    DayOfWeek,
    QualifiedQuarter,
    QualifiedMonth,
    QualifiedWeekOfYear,
    QualifiedDayOfYear,
    QualifiedDayOfMonth,
    QualifiedDayOfWeek,
    YearDayOfMonth,
    MonthDayOfMonth,
    YearDayOfWeek,
    WeekDayOfWeek,
}

impl DateGrouping {
    pub const ALL: [DateGrouping; 18] = [
        DateGrouping::Year,
        DateGrouping::YearOfWeek,
        DateGrouping::Quarter,
        DateGrouping::Month,
        DateGrouping::WeekOfYear,
        DateGrouping::DayOfYear,
        DateGrouping::DayOfMonth,
        DateGrouping::DayOfWeek,
        DateGrouping::QualifiedQuarter,
        DateGrouping::QualifiedMonth,
        DateGrouping::QualifiedWeekOfYear,
        DateGrouping::QualifiedDayOfYear,
        DateGrouping::QualifiedDayOfMonth,
        DateGrouping::QualifiedDayOfWeek,
        DateGrouping::YearDayOfMonth,
        DateGrouping::MonthDayOfMonth,
        DateGrouping::YearDayOfWeek,
        DateGrouping::WeekDayOfWeek,
    ];

    /// Parts from most to least significant, with their multipliers.
    pub fn terms(self) -> &'static [(CalendarPart, u32)] {
        use CalendarPart::*;
        match self {
            DateGrouping::Year => &[(Year, 1)],
            DateGrouping::YearOfWeek => &[(YearOfWeek, 1)],
            DateGrouping::Quarter => &[(Quarter, 1)],
            DateGrouping::Month => &[(Month, 1)],
            DateGrouping::WeekOfYear => &[(WeekOfYear, 1)],
            DateGrouping::DayOfYear => &[(DayOfYear, 1)],
            DateGrouping::DayOfMonth => &[(DayOfMonth, 1)],
            DateGrouping::DayOfWeek => &[(DayOfWeek, 1)],
            DateGrouping::QualifiedQuarter => &[(Year, 10), (Quarter, 1)],
            DateGrouping::QualifiedMonth => &[(Year, 100), (Month, 1)],
            DateGrouping::QualifiedWeekOfYear => &[(YearOfWeek, 100), (WeekOfYear, 1)],
            DateGrouping::QualifiedDayOfYear => &[(Year, 1000), (DayOfYear, 1)],
            DateGrouping::QualifiedDayOfMonth => &[(Year, 10000), (Month, 100), (DayOfMonth, 1)],
            DateGrouping::QualifiedDayOfWeek => {
                &[(YearOfWeek, 1000), (WeekOfYear, 10), (DayOfWeek, 1)]
            }
            DateGrouping::YearDayOfMonth => &[(Year, 100), (DayOfMonth, 1)],
            DateGrouping::MonthDayOfMonth => &[(Month, 100), (DayOfMonth, 1)],
            DateGrouping::YearDayOfWeek => &[(YearOfWeek, 100), (DayOfWeek, 1)],
            DateGrouping::WeekDayOfWeek => &[(WeekOfYear, 10), (DayOfWeek, 1)],
        }
    }

    pub fn is_qualified(self) -> bool {
        self.terms().len() > 1
    }

    pub fn name(self) -> &'static str {
        match self {
            DateGrouping::Year => "YEAR",
            DateGrouping::YearOfWeek => "YEAR_OF_WEEK",
            DateGrouping::Quarter => "QUARTER",
            DateGrouping::Month => "MONTH",
            DateGrouping::WeekOfYear => "WEEK_OF_YEAR",
            DateGrouping::DayOfYear => "DAY_OF_YEAR",
            DateGrouping::DayOfMonth => "DAY_OF_MONTH",
            DateGrouping::DayOfWeek => "DAY_OF_WEEK",
            DateGrouping::QualifiedQuarter => "QUALIFIED_QUARTER",
            DateGrouping::QualifiedMonth => "QUALIFIED_MONTH",
            DateGrouping::QualifiedWeekOfYear => "QUALIFIED_WEEK_OF_YEAR",
            DateGrouping::QualifiedDayOfYear => "QUALIFIED_DAY_OF_YEAR",
            DateGrouping::QualifiedDayOfMonth => "QUALIFIED_DAY_OF_MONTH",
            DateGrouping::QualifiedDayOfWeek => "QUALIFIED_DAY_OF_WEEK",
            DateGrouping::YearDayOfMonth => "YEAR_DAY_OF_MONTH",
            DateGrouping::MonthDayOfMonth => "MONTH_DAY_OF_MONTH",
            DateGrouping::YearDayOfWeek => "YEAR_DAY_OF_WEEK",
            DateGrouping::WeekDayOfWeek => "WEEK_DAY_OF_WEEK",
        }
    }
}

impl fmt::Display for DateGrouping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DateGrouping {
    type Err = IngestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_uppercase();
        DateGrouping::ALL
            .iter()
            .copied()
            .find(|g| g.name() == wanted)
            .ok_or_else(|| IngestError::InvalidArgument(format!("unknown date grouping '{}'", s)))
    }
}

fn quote_identifier(column_name: &str) -> String {
    format!("\"{}\"", column_name.replace('"', "\"\""))
}

/// SQL expression bucketing a millisecond-epoch column by `mode`.
pub fn date_grouping_expression(column_name: &str, mode: DateGrouping) -> String {
    let timestamp = format!("from_unixtime({}/1000)", quote_identifier(column_name));
    let terms = mode.terms();
    terms
        .iter()
        .enumerate()
        .map(|(idx, (part, multiplier))| {
            let call = format!("{}({})", part.sql_function(), timestamp);
            if idx + 1 < terms.len() {
                format!("({} * {})", call, multiplier)
            } else {
                call
            }
        })
        .collect::<Vec<_>>()
        .join(" + ")
}

/// Like [`date_grouping_expression`] for a mode given by name. Unknown
/// names pass the quoted column through unchanged.
pub fn date_grouping_expression_str(column_name: &str, mode: &str) -> String {
    match mode.parse::<DateGrouping>() {
        Ok(mode) => date_grouping_expression(column_name, mode),
        Err(_) => quote_identifier(column_name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_mode_passes_through() {
        assert_eq!(date_grouping_expression_str("foo", "unknown"), "\"foo\"");
    }

    #[test]
    fn test_qualified_day_of_year() {
        assert_eq!(
            date_grouping_expression("foo", DateGrouping::QualifiedDayOfYear),
            "(year(from_unixtime(\"foo\"/1000)) * 1000) + day_of_year(from_unixtime(\"foo\"/1000))"
        );
        assert_eq!(
            date_grouping_expression_str("foo", "qualified_day_of_year"),
            date_grouping_expression("foo", DateGrouping::QualifiedDayOfYear)
        );
    }

    #[test]
    fn test_unqualified_mode_is_single_call() {
        assert_eq!(
            date_grouping_expression("ts", DateGrouping::WeekOfYear),
            "week_of_year(from_unixtime(\"ts\"/1000))"
        );
        assert!(!DateGrouping::Month.is_qualified());
    }

    #[test]
    fn test_three_part_mode() {
        assert_eq!(
            date_grouping_expression("d", DateGrouping::QualifiedDayOfMonth),
            "(year(from_unixtime(\"d\"/1000)) * 10000) + (month(from_unixtime(\"d\"/1000)) * 100) + day_of_month(from_unixtime(\"d\"/1000))"
        );
    }

    #[test]
    fn test_every_mode_expression() {
        // T stands for the converted timestamp
        let expected = [
            (DateGrouping::Year, "year(T)"),
            (DateGrouping::YearOfWeek, "year_of_week(T)"),
            (DateGrouping::Quarter, "quarter(T)"),
            (DateGrouping::Month, "month(T)"),
            (DateGrouping::WeekOfYear, "week_of_year(T)"),
            (DateGrouping::DayOfYear, "day_of_year(T)"),
            (DateGrouping::DayOfMonth, "day_of_month(T)"),
            (DateGrouping::DayOfWeek, "day_of_week(T)"),
            (DateGrouping::QualifiedQuarter, "(year(T) * 10) + quarter(T)"),
            (DateGrouping::QualifiedMonth, "(year(T) * 100) + month(T)"),
            (
                DateGrouping::QualifiedWeekOfYear,
                "(year_of_week(T) * 100) + week_of_year(T)",
            ),
            (DateGrouping::QualifiedDayOfYear, "(year(T) * 1000) + day_of_year(T)"),
            (
                DateGrouping::QualifiedDayOfMonth,
                "(year(T) * 10000) + (month(T) * 100) + day_of_month(T)",
            ),
            (
                DateGrouping::QualifiedDayOfWeek,
                "(year_of_week(T) * 1000) + (week_of_year(T) * 10) + day_of_week(T)",
            ),
            (DateGrouping::YearDayOfMonth, "(year(T) * 100) + day_of_month(T)"),
            (DateGrouping::MonthDayOfMonth, "(month(T) * 100) + day_of_month(T)"),
            (DateGrouping::YearDayOfWeek, "(year_of_week(T) * 100) + day_of_week(T)"),
            (DateGrouping::WeekDayOfWeek, "(week_of_year(T) * 10) + day_of_week(T)"),
        ];
        assert_eq!(expected.len(), DateGrouping::ALL.len());

        for (mode, template) in expected {
            let want = template.replace('T', "from_unixtime(\"ts\"/1000)");
            assert_eq!(date_grouping_expression("ts", mode), want, "{}", mode);
            assert_eq!(date_grouping_expression_str("ts", mode.name()), want, "{}", mode);
        }
    }

    #[test]
    fn test_expression_is_pure() {
        for mode in DateGrouping::ALL {
            assert_eq!(
                date_grouping_expression("c", mode),
                date_grouping_expression("c", mode)
            );
        }
    }

    #[test]
    fn test_names_round_trip() {
        for mode in DateGrouping::ALL {
            assert_eq!(mode.name().parse::<DateGrouping>().unwrap(), mode);
        }
    }

    #[test]
    fn test_multipliers_leave_room_for_lower_parts() {
        // every lower-order tail must stay below the multiplier above it,
        // otherwise two dates could pack to the same integer
        for mode in DateGrouping::ALL.into_iter().filter(|m| m.is_qualified()) {
            let terms = mode.terms();
            for split in 1..terms.len() {
                let tail_max: u32 = terms[split..]
                    .iter()
                    .map(|(part, mul)| part.max_value().expect("lower parts are bounded") * mul)
                    .sum();
                assert!(
                    tail_max < terms[split - 1].1,
                    "{} overflows into its {:?} component",
                    mode,
                    terms[split - 1].0
                );
            }
        }
    }

    #[test]
    fn test_quotes_in_column_name() {
        assert_eq!(date_grouping_expression_str("a\"b", "nope"), "\"a\"\"b\"");
    }
}
