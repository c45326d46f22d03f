//! Who may open the form: karma and account-age minimums, one submission per user.

use crate::domain::{Settings, UserRecord};

pub const FORM_CLOSED: &str = "This form is not accepting responses.";
pub const ALREADY_SUBMITTED: &str = "You have already submitted an application";

/// Reasons `user` may not view the form, empty when eligible.
///
/// Exempt users skip every check. `simulate` reports every issue regardless,
/// so moderators can preview the rejection page.
pub fn check(user: &UserRecord, settings: &Settings, now: i64, simulate: bool) -> Vec<String> {
  let mut issues = Vec::new();
  if user.is_exempt {
    return issues;
  }

  if user.combined_karma() < settings.min_karma || simulate {
    let mut msg = String::from("Combined karma (post + comment karma) is too low. ");
    if settings.expose_mins {
      msg.push_str(&format!(
        "Accounts must have at least {} karma to view this form.",
        settings.min_karma
      ));
    }
    issues.push(msg);
  }

  if now - user.created_utc < settings.min_age || simulate {
    let mut msg = String::from("Account is not old enough. ");
    if settings.expose_mins {
      msg.push_str(&format!(
        "Accounts must be at least {} old to view this form.",
        settings.min_age_word
      ));
    }
    issues.push(msg);
  }

  if user.submitted || simulate {
    issues.push(ALREADY_SUBMITTED.to_string());
  }
  issues
}
