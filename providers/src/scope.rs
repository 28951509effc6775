// providers/src/scope.rs

//! Named lifetimes that gate where a `ContextResource` may be created.

use std::borrow::Cow;
use std::fmt;

/// A scope tag. Two scopes are equal when their names are equal.
///
/// The predefined tags are [`Scope::APP`], [`Scope::REQUEST`] and
/// [`Scope::INJECT`]. [`Scope::ANY`] is a pseudo-scope meaning "no
/// restriction": a provider declared with it may live in any context, but a
/// context can never be entered with it.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Scope(Cow<'static, str>);

impl Scope {
  pub const ANY: Scope = Scope(Cow::Borrowed("ANY"));
  pub const APP: Scope = Scope(Cow::Borrowed("APP"));
  pub const REQUEST: Scope = Scope(Cow::Borrowed("REQUEST"));
  pub const INJECT: Scope = Scope(Cow::Borrowed("INJECT"));

  /// Creates a custom scope tag.
  pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
    Scope(name.into())
  }

  pub fn name(&self) -> &str {
    &self.0
  }

  pub fn is_any(&self) -> bool {
    *self == Scope::ANY
  }
}

impl fmt::Display for Scope {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

impl fmt::Debug for Scope {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "Scope({})", self.0)
  }
}

impl From<&'static str> for Scope {
  fn from(name: &'static str) -> Self {
    Scope::new(name)
  }
}

impl From<String> for Scope {
  fn from(name: String) -> Self {
    Scope::new(name)
  }
}

/// Scope settings of a `ContextResource`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScopeConfig {
  pub scope: Scope,
  /// When set, the provider resolves only while the current scope is exactly
  /// `scope`, even if an instance is already cached further out.
  pub strict: bool,
}

impl Default for ScopeConfig {
  fn default() -> Self {
    Self {
      scope: Scope::ANY,
      strict: false,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn custom_scope_equals_predefined_by_name() {
    assert_eq!(Scope::new("APP"), Scope::APP);
    assert_ne!(Scope::new(String::from("JOB")), Scope::REQUEST);
    assert!(Scope::ANY.is_any());
    assert_eq!(Scope::INJECT.to_string(), "INJECT");
  }
}
