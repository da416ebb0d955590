use std::{convert::Infallible, env::VarError, str::FromStr};

/// Details about an environment variable. Config types list these in their
/// [`FromEnv::inventory`] so the binary can report what is missing before it
/// starts any tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvItemInfo {
    /// The environment variable name.
    pub var: &'static str,
    /// What the variable configures.
    pub description: &'static str,
    /// Whether the bridge can start without it.
    pub optional: bool,
}

/// Error type for loading from the environment. See the [`FromEnv`] trait for
/// more information.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FromEnvErr<Inner> {
    /// The environment variable could not be read.
    #[error("Error reading variable {0}: {1}")]
    EnvError(String, VarError),
    /// The environment variable is empty.
    #[error("Environment variable {0} is empty")]
    Empty(String),
    /// The environment variable is present, but the value could not be parsed.
    #[error("Failed to parse environment variable: {0}")]
    ParseError(#[from] Inner),
}

impl FromEnvErr<Infallible> {
    /// Convert an error from an infallible parse into any other error type.
    pub fn infallible_into<T>(self) -> FromEnvErr<T> {
        match self {
            Self::EnvError(s, e) => FromEnvErr::EnvError(s, e),
            Self::Empty(s) => FromEnvErr::Empty(s),
            Self::ParseError(never) => match never {},
        }
    }
}

impl<Inner> FromEnvErr<Inner> {
    /// Map the parse error to another type, keeping the variable information
    /// intact.
    pub fn map<New>(self, f: impl FnOnce(Inner) -> New) -> FromEnvErr<New> {
        match self {
            Self::EnvError(s, e) => FromEnvErr::EnvError(s, e),
            Self::Empty(s) => FromEnvErr::Empty(s),
            Self::ParseError(e) => FromEnvErr::ParseError(f(e)),
        }
    }

    /// Missing env var.
    pub fn env_err(var: &str, e: VarError) -> Self {
        Self::EnvError(var.to_string(), e)
    }

    /// Empty env var.
    pub fn empty(var: &str) -> Self {
        Self::Empty(var.to_string())
    }

    /// The variable name this error refers to, if it is not a parse error.
    pub fn var(&self) -> Option<&str> {
        match self {
            Self::EnvError(var, _) | Self::Empty(var) => Some(var),
            Self::ParseError(_) => None,
        }
    }
}

/// Read a variable, treating an empty value the same as a missing one.
fn read_non_empty<E>(env_var: &str) -> Result<String, FromEnvErr<E>> {
    let s = std::env::var(env_var).map_err(|e| FromEnvErr::env_err(env_var, e))?;
    if s.trim().is_empty() {
        return Err(FromEnvErr::empty(env_var));
    }
    Ok(s)
}

/// Convenience function for parsing a value from the environment, if present
/// and non-empty.
pub fn parse_env_if_present<T: FromStr>(env_var: &str) -> Result<T, FromEnvErr<T::Err>> {
    read_non_empty(env_var)?
        .trim()
        .parse()
        .map_err(FromEnvErr::ParseError)
}

/// Trait for config structs that are assembled from several environment
/// variables.
///
/// Implementations are written by hand, one variable per field, and must list
/// every variable they read in [`FromEnv::inventory`], optional ones
/// included.
pub trait FromEnv: core::fmt::Debug + Sized + 'static {
    /// Error type produced when loading from the environment.
    type Error: core::error::Error + Clone;

    /// Every environment variable this type reads.
    fn inventory() -> Vec<&'static EnvItemInfo>;

    /// Get a list of missing environment variables.
    ///
    /// Returns the non-optional entries of the inventory that are unset or
    /// empty.
    fn check_inventory() -> Result<(), Vec<&'static EnvItemInfo>> {
        let missing: Vec<_> = Self::inventory()
            .into_iter()
            .filter(|item| !item.optional)
            .filter(|item| read_non_empty::<Infallible>(item.var).is_err())
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(missing)
        }
    }

    /// Load from the environment.
    fn from_env() -> Result<Self, FromEnvErr<Self::Error>>;
}

/// Trait for values that live in a single environment variable.
pub trait FromEnvVar: core::fmt::Debug + Sized + 'static {
    /// Error type produced when parsing the value.
    type Error: core::error::Error;

    /// Load the value from the environment at the given variable.
    fn from_env_var(env_var: &str) -> Result<Self, FromEnvErr<Self::Error>>;
}

/// Unset and empty both load as [`None`]. A present but unparsable value is
/// still an error.
impl<T> FromEnvVar for Option<T>
where
    T: FromEnvVar,
{
    type Error = T::Error;

    fn from_env_var(env_var: &str) -> Result<Self, FromEnvErr<Self::Error>> {
        match std::env::var(env_var) {
            Ok(s) if s.trim().is_empty() => Ok(None),
            Ok(_) => T::from_env_var(env_var).map(Some),
            Err(_) => Ok(None),
        }
    }
}

impl FromEnvVar for String {
    type Error = Infallible;

    fn from_env_var(env_var: &str) -> Result<Self, FromEnvErr<Self::Error>> {
        read_non_empty(env_var)
    }
}

impl FromEnvVar for std::path::PathBuf {
    type Error = Infallible;

    fn from_env_var(env_var: &str) -> Result<Self, FromEnvErr<Self::Error>> {
        read_non_empty(env_var).map(Into::into)
    }
}

/// Comma separated list. Items are trimmed and blank items dropped.
impl FromEnvVar for Vec<String> {
    type Error = Infallible;

    fn from_env_var(env_var: &str) -> Result<Self, FromEnvErr<Self::Error>> {
        let s = read_non_empty(env_var)?;
        let items: Vec<_> = s
            .split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(ToOwned::to_owned)
            .collect();
        if items.is_empty() {
            return Err(FromEnvErr::empty(env_var));
        }
        Ok(items)
    }
}

/// `true` (any case) and `1` are true, anything else is false.
impl FromEnvVar for bool {
    type Error = Infallible;

    fn from_env_var(env_var: &str) -> Result<Self, FromEnvErr<Self::Error>> {
        let s = read_non_empty(env_var)?;
        let s = s.trim();
        Ok(s.eq_ignore_ascii_case("true") || s == "1")
    }
}

macro_rules! impl_for_parseable {
    ($($t:ty),*) => {
        $(
            impl FromEnvVar for $t {
                type Error = <$t as FromStr>::Err;

                fn from_env_var(env_var: &str) -> Result<Self, FromEnvErr<Self::Error>> {
                    parse_env_if_present(env_var)
                }
            }
        )*
    }
}

impl_for_parseable!(u16, u32, u64, url::Url);
