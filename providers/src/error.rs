// providers/src/error.rs

use crate::scope::Scope;

/// Error produced by a user-supplied creator. Carried untouched inside
/// [`Error::Construction`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors raised while resolving, entering contexts, tearing down or
/// configuring providers.
#[derive(Debug, thiserror::Error)]
pub enum Error {
  #[error("no context is active, cannot resolve {target}")]
  ContextNotSet { target: String },

  #[error("no active context can host '{provider}' (declared scope {expected}, current scope {current})")]
  InvalidContext {
    provider: String,
    expected: Scope,
    current: String,
  },

  #[error("scope {scope} cannot be entered")]
  UnenterableScope { scope: Scope },

  #[error("'{provider}' must be created asynchronously and cannot be resolved synchronously")]
  AsyncInSync { provider: String },

  /// Sync teardown checks every provider it would release before releasing
  /// any, so nothing has been torn down when this is returned.
  #[error("'{provider}' has an asynchronous finalizer and cannot be torn down synchronously")]
  CannotTearDownSync { provider: String },

  #[error("state '{provider}' was resolved outside of an init block")]
  StateNotInitialized { provider: String },

  #[error("creator of '{provider}' failed: {source}")]
  Construction {
    provider: String,
    #[source]
    source: BoxError,
  },

  #[error("circular dependency detected while creating '{provider}'")]
  CircularDependency { provider: String },

  #[error("selector '{provider}' chose key '{key}' which has no branch")]
  UnknownSelection { provider: String, key: String },

  #[error("container '{container}' has no provider named '{name}'")]
  UnknownProvider { container: String, name: String },

  #[error("override for '{provider}' must be of type {expected}")]
  OverrideTypeMismatch {
    provider: String,
    expected: &'static str,
  },

  #[error("failed to read configuration: {0}")]
  ConfigRead(#[from] std::io::Error),

  #[error("failed to parse configuration: {0}")]
  ConfigParse(String),

  #[error("invalid configuration value for '{field}': {message}")]
  InvalidConfigValue { field: String, message: String },
}

impl Error {
  pub(crate) fn construction(provider: String, source: BoxError) -> Self {
    Error::Construction { provider, source }
  }

  pub(crate) fn invalid_context(provider: String, expected: Scope, current: Option<Scope>) -> Self {
    Error::InvalidContext {
      provider,
      expected,
      current: match current {
        Some(scope) => scope.to_string(),
        None => "none".to_string(),
      },
    }
  }
}

impl From<serde_yaml::Error> for Error {
  fn from(err: serde_yaml::Error) -> Self {
    Error::ConfigParse(err.to_string())
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
