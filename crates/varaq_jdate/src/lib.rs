//! Gregorian / Jalali (Solar-Hijri) calendar arithmetic and date formatting.
//!
//! The conversion routines are pure integer arithmetic over day counts; the
//! formatter resolves a strftime-style format string against either calendar,
//! selecting Solar-Hijri mode through a `SHC` (or `JC`) suffix on the format
//! string itself.

use std::fmt::Write as _;

use chrono::{Datelike, NaiveDateTime, Timelike};
use thiserror::Error;

const WEEKDAY_ABBR_NAME: [&str; 7] = ["۱ش", "۲ش", "۳ش", "۴ش", "۵ش", "ج", "ش"];
const WEEKDAY_FULL_NAME: [&str; 7] = [
    "یکشنبه",
    "دوشنبه",
    "سه‌شنبه",
    "چهارشنبه",
    "پنج‌شنبه",
    "جمعه",
    "شنبه",
];
const MONTH_FULL_NAME: [&str; 12] = [
    "فروردین",
    "اردیبهشت",
    "خرداد",
    "تیر",
    "مرداد",
    "شهریور",
    "مهر",
    "آبان",
    "آذر",
    "دی",
    "بهمن",
    "اسفند",
];
const MONTH_ABBR_NAME: [&str; 12] = [
    "فرو", "ارد", "خرد", "تیر", "امر", "شهر", "مهر", "آبا", "آذر", "دی", "بهم", "اسف",
];

#[derive(Debug, Error)]
pub enum FormatError {
    #[error("directive `%{0}` is not implemented for solar hijri dates")]
    UnsupportedDirective(char),
    #[error("invalid format string")]
    InvalidFormat,
}

/// Convert a Gregorian date to Jalali. Returns the `(year, month, day)`
/// triple and the zero-based day offset within the Jalali year.
pub fn gregorian_to_jalali(gy: i32, gm: u32, gd: u32) -> ((i32, u32, u32), i32) {
    const G_D_M: [i32; 12] = [0, 31, 59, 90, 120, 151, 181, 212, 243, 273, 304, 334];
    let gy2 = if gm > 2 { gy + 1 } else { gy };
    let mut days = 355_666
        + 365 * gy
        + (gy2 + 3) / 4
        - (gy2 + 99) / 100
        + (gy2 + 399) / 400
        + gd as i32
        + G_D_M[gm as usize - 1];
    let mut jy = -1595 + 33 * (days / 12_053);
    days %= 12_053;
    jy += 4 * (days / 1461);
    days %= 1461;
    if days > 365 {
        jy += (days - 1) / 365;
        days = (days - 1) % 365;
    }
    let (jm, jd) = if days < 186 {
        (1 + days / 31, 1 + days % 31)
    } else {
        (7 + (days - 186) / 30, 1 + (days - 186) % 30)
    };
    ((jy, jm as u32, jd as u32), days)
}

/// Convert a Jalali date to Gregorian. Returns the `(year, month, day)`
/// triple and the day remainder used by the conversion.
pub fn jalali_to_gregorian(jy: i32, jm: u32, jd: u32) -> ((i32, u32, u32), i32) {
    let jy = jy + 1595;
    let mut days = -355_668 + 365 * jy + (jy / 33) * 8 + ((jy % 33) + 3) / 4 + jd as i32;
    if jm < 7 {
        days += (jm as i32 - 1) * 31;
    } else {
        days += (jm as i32 - 7) * 30 + 186;
    }
    let mut gy = 400 * (days / 146_097);
    days %= 146_097;
    if days > 36_524 {
        days -= 1;
        gy += 100 * (days / 36_524);
        days %= 36_524;
        if days >= 365 {
            days += 1;
        }
    }
    gy += 4 * (days / 1461);
    days %= 1461;
    if days > 365 {
        gy += (days - 1) / 365;
        days = (days - 1) % 365;
    }
    let mut gd = days + 1;
    let kab = if (gy % 4 == 0 && gy % 100 != 0) || gy % 400 == 0 {
        29
    } else {
        28
    };
    let month_lengths = [31, kab, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];
    let mut gm = 0;
    while gm < 12 && gd > month_lengths[gm] {
        gd -= month_lengths[gm];
        gm += 1;
    }
    ((gy, gm as u32 + 1, gd as u32), days)
}

struct Fields {
    y: i32,
    m: u32,
    d: u32,
    weekday: usize,
    hour: u32,
    day_of_year: i32,
}

impl Fields {
    fn from_datetime(dt: &NaiveDateTime, solar_hijri: bool) -> Self {
        let ((y, m, d), day_of_year) = if solar_hijri {
            gregorian_to_jalali(dt.year(), dt.month(), dt.day())
        } else {
            ((dt.year(), dt.month(), dt.day()), dt.ordinal() as i32)
        };
        // num_days_from_ce() of 0001-01-01 (a Monday) is 1, so `% 7`
        // yields 0 for Sundays.
        let weekday = (dt.date().num_days_from_ce().rem_euclid(7)) as usize;
        Fields {
            y,
            m,
            d,
            weekday,
            hour: dt.hour(),
            day_of_year,
        }
    }

    fn resolve(&self, directive: char, solar_hijri: bool) -> Result<Option<String>, FormatError> {
        if !solar_hijri {
            return Ok(match directive {
                'u' => Some(format!("{}{}", self.d, ordinal_suffix(self.d))),
                _ => None,
            });
        }
        let value = match directive {
            'a' => WEEKDAY_ABBR_NAME[self.weekday].to_string(),
            'A' => WEEKDAY_FULL_NAME[self.weekday].to_string(),
            'd' => format!("{:02}", self.d),
            'x' => format!("{}", self.d),
            'b' => MONTH_ABBR_NAME[self.m as usize - 1].to_string(),
            'B' => MONTH_FULL_NAME[self.m as usize - 1].to_string(),
            'm' => format!("{:02}", self.m),
            'y' => format!("{:02}", self.y.rem_euclid(100)),
            'Y' => format!("{:04}", self.y),
            'p' => {
                if self.hour >= 12 {
                    "ب.ظ.".to_string()
                } else {
                    "ق.ظ.".to_string()
                }
            }
            'j' => format!("{:03}", self.day_of_year),
            'u' => format!("{}{}", self.d, ordinal_suffix(self.d)),
            'U' | 'W' | 'G' | 'V' => return Err(FormatError::UnsupportedDirective(directive)),
            _ => return Ok(None),
        };
        Ok(Some(value))
    }
}

fn ordinal_suffix(d: u32) -> &'static str {
    if d > 10 && d <= 20 {
        return "th";
    }
    match d % 10 {
        1 => "st",
        2 => "nd",
        3 => "rd",
        _ => "th",
    }
}

/// strftime-style formatting. A `SHC` or `JC` suffix on the format string
/// switches the calendar-dependent directives to the Jalali date; anything
/// not resolved here falls through to `chrono` against the Gregorian
/// instant. An even run of `%` escapes the directive that follows it.
pub fn jstrftime(dt: &NaiveDateTime, format: &str) -> Result<String, FormatError> {
    let (format, solar_hijri) = match format.strip_suffix("SHC") {
        Some(rest) => (rest, true),
        None => match format.strip_suffix("JC") {
            Some(rest) => (rest, true),
            None => (format, false),
        },
    };
    let fields = Fields::from_datetime(dt, solar_hijri);

    let mut resolved = String::with_capacity(format.len());
    let mut chars = format.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch != '%' {
            resolved.push(ch);
            continue;
        }
        let mut run = 1usize;
        while chars.peek() == Some(&'%') {
            chars.next();
            run += 1;
        }
        let directive = match chars.peek() {
            Some(&next) => next,
            None => {
                resolved.extend(std::iter::repeat_n('%', run));
                break;
            }
        };
        let replacement = if run % 2 == 1 {
            fields.resolve(directive, solar_hijri)?
        } else {
            None
        };
        match replacement {
            Some(value) => {
                chars.next();
                resolved.extend(std::iter::repeat_n('%', run - 1));
                resolved.push_str(&value);
            }
            None => {
                resolved.extend(std::iter::repeat_n('%', run));
            }
        }
    }

    let mut out = String::with_capacity(resolved.len());
    write!(out, "{}", dt.format(&resolved)).map_err(|_| FormatError::InvalidFormat)?;
    Ok(out)
}
