//! The per-request environment handed to applications.
//!
//! An [`Environ`] is a string-keyed mapping built fresh for every request by
//! [`EnvironBuilder`]. Besides plain values it holds two handles: the request
//! body under `wsgi.input` and the error stream under `wsgi.errors`. The mapping
//! only marks where they live; the handles themselves are reached through
//! [`Environ::input_mut`] and [`Environ::errors`].

mod builder;
mod errors;
mod input;

pub use builder::ConnectionInfo;
pub use builder::EnvironBuilder;
pub use builder::header_key;
pub use errors::ErrorStream;
pub use input::RequestInput;

use std::collections::HashMap;
use std::collections::hash_map;
use std::fmt;

/// A value stored in an [`Environ`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvValue {
    Str(String),
    Int(i64),
    Bool(bool),
    /// `wsgi.version`, as `(major, minor)`
    Version(u8, u8),
    /// Marks `wsgi.input`
    Input,
    /// Marks `wsgi.errors`
    Errors,
}

impl EnvValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            EnvValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            EnvValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            EnvValue::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl fmt::Display for EnvValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnvValue::Str(s) => f.write_str(s),
            EnvValue::Int(i) => write!(f, "{i}"),
            EnvValue::Bool(b) => write!(f, "{b}"),
            EnvValue::Version(major, minor) => write!(f, "({major}, {minor})"),
            EnvValue::Input => f.write_str("<wsgi.input>"),
            EnvValue::Errors => f.write_str("<wsgi.errors>"),
        }
    }
}

impl From<String> for EnvValue {
    fn from(value: String) -> Self {
        EnvValue::Str(value)
    }
}

impl From<&str> for EnvValue {
    fn from(value: &str) -> Self {
        EnvValue::Str(value.to_owned())
    }
}

impl From<i64> for EnvValue {
    fn from(value: i64) -> Self {
        EnvValue::Int(value)
    }
}

impl From<bool> for EnvValue {
    fn from(value: bool) -> Self {
        EnvValue::Bool(value)
    }
}

/// The environment of one request.
#[derive(Debug)]
pub struct Environ {
    vars: HashMap<String, EnvValue>,
    input: RequestInput,
    errors: ErrorStream,
}

impl Environ {
    pub(crate) fn new(vars: HashMap<String, EnvValue>, input: RequestInput, errors: ErrorStream) -> Self {
        Self { vars, input, errors }
    }

    pub fn get(&self, key: &str) -> Option<&EnvValue> {
        self.vars.get(key)
    }

    /// The value of `key` if it is a string.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(EnvValue::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.vars.contains_key(key)
    }

    pub fn insert<K: Into<String>, V: Into<EnvValue>>(&mut self, key: K, value: V) -> Option<EnvValue> {
        self.vars.insert(key.into(), value.into())
    }

    pub fn remove(&mut self, key: &str) -> Option<EnvValue> {
        self.vars.remove(key)
    }

    pub fn iter(&self) -> hash_map::Iter<'_, String, EnvValue> {
        self.vars.iter()
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// `wsgi.input`: the request body.
    pub fn input_mut(&mut self) -> &mut RequestInput {
        &mut self.input
    }

    /// `wsgi.errors`: the error stream.
    pub fn errors(&self) -> &ErrorStream {
        &self.errors
    }

    /// `micro_wsgi.keep_alive`: whether the client allows the connection to be reused.
    pub fn keep_alive(&self) -> bool {
        self.get(builder::KEEP_ALIVE_KEY).and_then(EnvValue::as_bool).unwrap_or(false)
    }

    pub(crate) fn close_input(&mut self) {
        self.input.close();
    }
}

impl<'a> IntoIterator for &'a Environ {
    type Item = (&'a String, &'a EnvValue);
    type IntoIter = hash_map::Iter<'a, String, EnvValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
