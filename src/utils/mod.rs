use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

/// Helper function to format a date the way the front desk writes it
///
/// This function takes a `NaiveDate` and formats it as a string in the "dd-mm-yyyy" format.
///
/// # Arguments
///
/// * `date` - A `NaiveDate` object representing the date to be formatted
///
/// # Returns
///
/// A `String` containing the formatted date
pub fn format_date(date: NaiveDate) -> String {
    date.format("%d-%m-%Y").to_string()
}

pub fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.format("%d-%m-%Y %H:%M").to_string()
}

/// Helper function to escape special characters for Markdown
///
/// Telegram's MarkdownV2 treats these characters as markup, so every one
/// of them is prefixed with a backslash to be shown literally.
///
/// # Arguments
///
/// * `text` - A string slice containing the text to be escaped
///
/// # Returns
///
/// A `String` with all Markdown special characters escaped
pub fn escape_markdown(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if "_*[]()~`>#+-=|{}.!\\".contains(c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

pub fn parse_uuid(text: &str) -> Option<Uuid> {
    Uuid::parse_str(text.trim()).ok()
}

/// Accepts `YYYY-MM-DD`.
pub fn parse_date(text: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(text.trim(), "%Y-%m-%d").ok()
}

/// Splits command arguments on whitespace, dropping empties.
pub fn split_args(text: &str) -> Vec<&str> {
    text.split_whitespace().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn dates_use_day_month_year() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 7).unwrap();
        assert_eq!(format_date(date), "07-03-2024");

        let ts = Utc.with_ymd_and_hms(2024, 3, 7, 9, 5, 0).unwrap();
        assert_eq!(format_timestamp(ts), "07-03-2024 09:05");
    }

    #[test]
    fn markdown_specials_are_prefixed() {
        assert_eq!(escape_markdown("Dr. O'Neil (ENT)"), "Dr\\. O'Neil \\(ENT\\)");
        assert_eq!(escape_markdown("plain"), "plain");
        assert_eq!(escape_markdown("a_b*c"), "a\\_b\\*c");
    }

    #[test]
    fn uuids_and_dates_parse_leniently_around_whitespace() {
        let id = Uuid::new_v4();
        assert_eq!(parse_uuid(&format!(" {} ", id)), Some(id));
        assert_eq!(parse_uuid("42"), None);
        assert_eq!(
            parse_date("2024-11-02"),
            NaiveDate::from_ymd_opt(2024, 11, 2)
        );
        assert_eq!(parse_date("02/11/2024"), None);
    }

    #[test]
    fn args_split_on_any_whitespace() {
        assert_eq!(split_args("  a  b\tc "), vec!["a", "b", "c"]);
        assert!(split_args("   ").is_empty());
    }
}
