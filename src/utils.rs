use std::error::Error;

/// Boxed static error type
pub type Err = Box<dyn Error + 'static>;

/// Added to a rule's cost for every rule already on its LHS, so no two rules
/// on one symbol ever tie.
pub const COST_EPSILON: f64 = 1e-7;

/// Formats a cost the way diagnostics print it: trailing zeros trimmed.
pub fn fmt_cost(cost: f64) -> String {
  let s = format!("{:.7}", cost);
  let s = s.trim_end_matches('0');
  s.trim_end_matches('.').to_string()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_fmt_cost() {
    assert_eq!(fmt_cost(1.5), "1.5");
    assert_eq!(fmt_cost(2.0), "2");
    assert_eq!(fmt_cost(0.0000001), "0.0000001");
  }
}
