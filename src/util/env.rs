//! Process configuration, read from the environment (and a `.env` file when present).
//!
//! Variables map onto [`Settings`] through a small serde deserializer, in the spirit of the
//! [`envy`] crate: names are matched in SCREAMING_SNAKE_CASE and every tuning value has a
//! default.
//!
//! [`envy`]: https://github.com/softprops/envy

use serde::Deserialize;
use serde::de::value::MapDeserializer;
use serde::de::{self, IntoDeserializer};
use thiserror::Error;
use tokio::sync::OnceCell;

use crate::constants::{
    DEFAULT_COOLDOWN_SECS, DEFAULT_LEADERBOARD_SIZE, DEFAULT_LOG_FILTER, DEFAULT_SERVICE_NAME,
    DEFAULT_WORKER_COUNT, LOSER_ROLE_NAME, RULING_ROLE_NAME, TOP_ROLE_NAME,
};
use crate::rank::sync::RoleNames;

static SETTINGS: OnceCell<Settings> = OnceCell::const_new();

/// Loads the settings once and hands out the same instance afterwards.
pub async fn settings() -> EnvResult<&'static Settings> {
    SETTINGS.get_or_try_init(|| async { Settings::load() }).await
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct Settings {
    /// Postgres connection string; the in-memory store is used without one.
    #[serde(default)]
    pub database_url: Option<String>,
    /// OTLP collector; only console logging is set up without one.
    #[serde(default)]
    pub otel_exporter_otlp_endpoint: Option<String>,

    #[serde(default = "default_service_name")]
    pub service_name: String,
    #[serde(default = "default_log_filter")]
    pub log_filter: String,

    #[serde(default = "default_top_role")]
    pub top_role_name: String,
    #[serde(default = "default_ruling_role")]
    pub ruling_role_name: String,
    #[serde(default = "default_loser_role")]
    pub loser_role_name: String,

    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
    #[serde(default = "default_leaderboard_size")]
    pub leaderboard_size: usize,
}

fn default_service_name() -> String {
    DEFAULT_SERVICE_NAME.to_owned()
}
fn default_log_filter() -> String {
    DEFAULT_LOG_FILTER.to_owned()
}
fn default_top_role() -> String {
    TOP_ROLE_NAME.to_owned()
}
fn default_ruling_role() -> String {
    RULING_ROLE_NAME.to_owned()
}
fn default_loser_role() -> String {
    LOSER_ROLE_NAME.to_owned()
}
fn default_worker_count() -> usize {
    DEFAULT_WORKER_COUNT
}
fn default_cooldown_secs() -> u64 {
    DEFAULT_COOLDOWN_SECS
}
fn default_leaderboard_size() -> usize {
    DEFAULT_LEADERBOARD_SIZE
}

impl Settings {
    /// Reads `.env` (if any) and then the process environment.
    pub fn load() -> EnvResult<Self> {
        if let Err(e) = dotenvy::dotenv() {
            if !e.not_found() {
                return Err(e.into());
            }
        }

        Ok(from_iter(dotenvy::vars())?)
    }

    /// Blank values count as unset.
    pub fn database_url(&self) -> Option<&str> {
        self.database_url.as_deref().filter(|url| !url.trim().is_empty())
    }

    pub fn collector_endpoint(&self) -> Option<&str> {
        self.otel_exporter_otlp_endpoint
            .as_deref()
            .filter(|url| !url.trim().is_empty())
    }

    pub fn role_names(&self) -> RoleNames {
        RoleNames {
            top: self.top_role_name.clone(),
            ruling: self.ruling_role_name.clone(),
            loser: self.loser_role_name.clone(),
        }
    }
}

// ---
//  Deserializer implementation
// ---

/// A single variable's value; the name rides along for error messages.
struct Val(String, String);

struct Key(String);

struct Vars<Iter: Iterator<Item = (String, String)>>(Iter);

impl<Iter: Iterator<Item = (String, String)>> Iterator for Vars<Iter> {
    type Item = (Key, Val);

    fn next(&mut self) -> Option<Self::Item> {
        self.0.next().map(|(k, v)| (Key(k.clone()), Val(k, v)))
    }
}

impl<'de> IntoDeserializer<'de, EnvDeserializeError> for Val {
    type Deserializer = Self;
    fn into_deserializer(self) -> Self::Deserializer {
        self
    }
}

impl<'de> IntoDeserializer<'de, EnvDeserializeError> for Key {
    type Deserializer = Self;
    fn into_deserializer(self) -> Self::Deserializer {
        self
    }
}

macro_rules! parse_then_visit {
    ($($ty:ident => $method:ident,)*) => {
        $(
            fn $method<V>(self, visitor: V) -> Result<V::Value, EnvDeserializeError>
            where
                V: de::Visitor<'de>
            {
                match self.1.trim().parse::<$ty>() {
                    Ok(val) => val.into_deserializer().$method(visitor),
                    Err(e) => Err(de::Error::custom(format_args!(
                        "{}: while parsing '{}' ({})",
                        e, self.1, self.0
                    )))
                }
            }
        )*
    };
}

impl<'de> de::Deserializer<'de> for Val {
    type Error = EnvDeserializeError;

    fn deserialize_any<V>(self, visitor: V) -> Result<V::Value, Self::Error>
    where
        V: de::Visitor<'de>,
    {
        self.1.into_deserializer().deserialize_any(visitor)
    }

    fn deserialize_option<V>(self, visitor: V) -> Result<V::Value, Self::Error>
    where
        V: de::Visitor<'de>,
    {
        visitor.visit_some(self)
    }

    fn deserialize_newtype_struct<V>(
        self,
        _: &'static str,
        visitor: V,
    ) -> Result<V::Value, Self::Error>
    where
        V: de::Visitor<'de>,
    {
        visitor.visit_newtype_struct(self)
    }

    parse_then_visit! {
        bool => deserialize_bool,
        u8 => deserialize_u8,
        u16 => deserialize_u16,
        u32 => deserialize_u32,
        u64 => deserialize_u64,
        i8 => deserialize_i8,
        i16 => deserialize_i16,
        i32 => deserialize_i32,
        i64 => deserialize_i64,
        f32 => deserialize_f32,
        f64 => deserialize_f64,
    }

    serde::forward_to_deserialize_any! {
        char str string unit bytes byte_buf map seq enum
        unit_struct tuple_struct identifier tuple
        ignored_any struct
    }
}

impl<'de> de::Deserializer<'de> for Key {
    type Error = EnvDeserializeError;

    fn deserialize_any<V>(self, visitor: V) -> Result<V::Value, Self::Error>
    where
        V: de::Visitor<'de>,
    {
        self.0.into_deserializer().deserialize_any(visitor)
    }

    serde::forward_to_deserialize_any! {
        char str string unit seq option bytes byte_buf map newtype_struct
        unit_struct tuple_struct identifier tuple ignored_any
        bool u8 u16 u32 u64 i8 i16 i32 i64 f32 f64 enum struct
    }
}

pub fn from_iter<Iter, T>(iter: Iter) -> Result<T, EnvDeserializeError>
where
    T: de::DeserializeOwned,
    Iter: IntoIterator<Item = (String, String)>,
{
    T::deserialize(MapDeserializer::new(Vars(iter.into_iter())))
}

impl de::Error for EnvDeserializeError {
    fn custom<T>(msg: T) -> Self
    where
        T: std::fmt::Display,
    {
        EnvDeserializeError::Custom(msg.to_string())
    }

    fn missing_field(field: &'static str) -> Self {
        EnvDeserializeError::MissingValue(field)
    }
}

pub type EnvResult<T> = core::result::Result<T, EnvErr>;

#[derive(Debug, Error)]
pub enum EnvErr {
    #[error(transparent)]
    Dotenvy(#[from] dotenvy::Error),

    #[error(transparent)]
    DeserializationError(#[from] EnvDeserializeError),
}

#[derive(Debug, Error)]
pub enum EnvDeserializeError {
    #[error("env deserialization error: {0}")]
    Custom(String),

    #[error("missing environment variable {0}")]
    MissingValue(&'static str),
}

#[cfg(test)]
mod test {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect()
    }

    #[test]
    fn test_defaults() {
        let settings: Settings = from_iter(vars(&[("PATH", "/usr/bin")])).unwrap();

        assert_eq!(settings.database_url(), None);
        assert_eq!(settings.worker_count, DEFAULT_WORKER_COUNT);
        assert_eq!(settings.cooldown_secs, 300);
        assert_eq!(settings.leaderboard_size, 15);
        assert_eq!(settings.role_names(), RoleNames::default());
    }

    #[test]
    fn test_overrides() {
        let settings: Settings = from_iter(vars(&[
            ("DATABASE_URL", "postgres://localhost/respec"),
            ("OTEL_EXPORTER_OTLP_ENDPOINT", ""),
            ("WORKER_COUNT", "8"),
            ("COOLDOWN_SECS", " 60 "),
            ("LOSER_ROLE_NAME", "Clowns"),
        ]))
        .unwrap();

        assert_eq!(settings.database_url(), Some("postgres://localhost/respec"));
        assert_eq!(settings.collector_endpoint(), None);
        assert_eq!(settings.worker_count, 8);
        assert_eq!(settings.cooldown_secs, 60);
        assert_eq!(settings.role_names().loser, "Clowns");
    }

    #[test]
    fn test_bad_number() {
        let err = from_iter::<_, Settings>(vars(&[("WORKER_COUNT", "lots")])).unwrap_err();
        assert!(err.to_string().contains("WORKER_COUNT"));
    }
}
