//! Small utility helpers used across modules.

use std::time::{SystemTime, UNIX_EPOCH};

use rand::{distributions::Alphanumeric, Rng};

/// Random string over `[A-Za-z0-9]`.
pub fn random_alnum<R: Rng + ?Sized>(rng: &mut R, len: usize) -> String {
  (0..len).map(|_| char::from(rng.sample(Alphanumeric))).collect()
}

/// Current unix time in whole seconds.
pub fn now_ts() -> i64 {
  SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .map(|d| d.as_secs() as i64)
    .unwrap_or_default()
}

/// Log-safe truncation for large strings.
/// Avoids spamming logs with huge request/response payloads.
pub fn trunc_for_log(s: &str, max: usize) -> String {
  if s.len() <= max {
    return s.to_string();
  }
  let mut cut = max;
  while !s.is_char_boundary(cut) {
    cut -= 1;
  }
  format!("{}… ({} bytes total)", &s[..cut], s.len())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn random_alnum_has_requested_shape() {
    let s = random_alnum(&mut rand::thread_rng(), 32);
    assert_eq!(s.len(), 32);
    assert!(s.chars().all(|c| c.is_ascii_alphanumeric()));
  }

  #[test]
  fn truncation_respects_char_boundaries() {
    assert_eq!(trunc_for_log("short", 10), "short");
    assert_eq!(trunc_for_log("héllo", 2), "h… (6 bytes total)");
  }
}
