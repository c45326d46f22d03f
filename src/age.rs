//! Human-readable account ages ("1.5 minutes", "3 weeks").

use crate::error::DomainError;

const STEPS: [(f64, &str); 6] = [
  (1.0, "seconds"),
  (60.0, "minutes"),
  (60.0, "hours"),
  (24.0, "days"),
  (7.0, "weeks"),
  (52.0, "years"),
];

/// Express `seconds` in the coarsest unit that is at least one whole unit.
///
/// Values are rounded to two decimals, printed without a fractional part when
/// they are whole, and the unit is singular when the value is exactly one.
/// Durations under one second have no applicable unit and are rejected.
pub fn age_to_words(seconds: f64) -> Result<String, DomainError> {
  if !seconds.is_finite() || seconds < 1.0 {
    return Err(DomainError::DurationTooShort(seconds));
  }

  let mut unit_size = 1.0;
  let mut best = None;
  for (multiplier, unit) in STEPS {
    unit_size *= multiplier;
    let value = seconds / unit_size;
    if value >= 1.0 {
      best = Some(phrase(value, unit));
    }
  }
  best.ok_or(DomainError::DurationTooShort(seconds))
}

fn phrase(value: f64, unit: &str) -> String {
  let rounded = (value * 100.0).round() / 100.0;
  let unit = if rounded == 1.0 { &unit[..unit.len() - 1] } else { unit };
  if rounded.fract() == 0.0 {
    format!("{} {}", rounded as i64, unit)
  } else {
    format!("{} {}", rounded, unit)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn picks_coarsest_unit() {
    assert_eq!(age_to_words(90.0).unwrap(), "1.5 minutes");
    assert_eq!(age_to_words(60.0).unwrap(), "1 minute");
    assert_eq!(age_to_words(30.0).unwrap(), "30 seconds");
    assert_eq!(age_to_words(1.0).unwrap(), "1 second");
    assert_eq!(age_to_words(7_200.0).unwrap(), "2 hours");
    assert_eq!(age_to_words(86_400.0 * 3.0).unwrap(), "3 days");
  }

  #[test]
  fn years_are_fifty_two_weeks() {
    let year = 60.0 * 60.0 * 24.0 * 7.0 * 52.0;
    assert_eq!(age_to_words(year).unwrap(), "1 year");
    assert_eq!(age_to_words(year * 2.5).unwrap(), "2.5 years");
    // 53 weeks is still expressed in years
    assert_eq!(age_to_words(year + 604_800.0).unwrap(), "1.02 years");
  }

  #[test]
  fn rounds_to_two_decimals() {
    assert_eq!(age_to_words(100.0).unwrap(), "1.67 minutes");
    assert_eq!(age_to_words(60.1).unwrap(), "1 minute");
  }

  #[test]
  fn sub_second_and_invalid_input_is_rejected() {
    assert_eq!(age_to_words(0.0), Err(DomainError::DurationTooShort(0.0)));
    assert!(age_to_words(-5.0).is_err());
    assert!(age_to_words(0.5).is_err());
    assert!(age_to_words(f64::NAN).is_err());
  }
}
