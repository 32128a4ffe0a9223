//! Generic attribute model shared by requests, responses and directory reads.

use std::collections::BTreeMap;
use std::fmt;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// One or more string values of a single attribute.
///
/// Directory attributes are multi-valued, so even single values are stored
/// as a list. An empty list means the attribute was requested but is absent.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "OneOrMany", into = "Vec<String>")]
pub struct AttributeValue(Vec<String>);

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
    Flag(bool),
}

impl From<OneOrMany> for AttributeValue {
    fn from(value: OneOrMany) -> Self {
        match value {
            OneOrMany::One(value) => Self(vec![value]),
            OneOrMany::Many(values) => Self(values),
            OneOrMany::Flag(flag) => Self::from(flag),
        }
    }
}

impl From<AttributeValue> for Vec<String> {
    fn from(value: AttributeValue) -> Self {
        value.0
    }
}

impl From<Vec<String>> for AttributeValue {
    fn from(values: Vec<String>) -> Self {
        Self(values)
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        Self(vec![value.to_owned()])
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        Self(vec![value])
    }
}

/// LDAP Boolean syntax.
impl From<bool> for AttributeValue {
    fn from(flag: bool) -> Self {
        Self::from(if flag { "TRUE" } else { "FALSE" })
    }
}

impl AttributeValue {
    /// First value, if any.
    pub fn single(&self) -> Option<&str> {
        self.0.first().map(String::as_str)
    }

    pub fn values(&self) -> &[String] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether the first value reads as boolean `true`, case-insensitively.
    pub fn is_true(&self) -> bool {
        self.single().is_some_and(|v| v.eq_ignore_ascii_case("true"))
    }
}

/// Mapping from case-insensitive attribute name to [`AttributeValue`].
///
/// Keys are folded to lowercase for lookups; the spelling of the last
/// insertion is kept for output.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AttributeMap {
    entries: BTreeMap<String, (String, AttributeValue)>,
}

impl AttributeMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an attribute, returning the previous value.
    pub fn insert(
        &mut self,
        name: impl Into<String>,
        value: impl Into<AttributeValue>,
    ) -> Option<AttributeValue> {
        let name = name.into();
        self.entries
            .insert(name.to_ascii_lowercase(), (name, value.into()))
            .map(|(_, previous)| previous)
    }

    pub fn get(&self, name: &str) -> Option<&AttributeValue> {
        self.entries
            .get(&name.to_ascii_lowercase())
            .map(|(_, value)| value)
    }

    /// First value of an attribute.
    pub fn single_value(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(AttributeValue::single)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(&name.to_ascii_lowercase())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over `(name, value)` pairs, ordered by folded name.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &AttributeValue)> {
        self.entries
            .values()
            .map(|(name, value)| (name.as_str(), value))
    }
}

impl<N, V> FromIterator<(N, V)> for AttributeMap
where
    N: Into<String>,
    V: Into<AttributeValue>,
{
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        let mut map = AttributeMap::new();
        for (name, value) in iter {
            map.insert(name, value);
        }
        map
    }
}

impl Serialize for AttributeMap {
    fn serialize<S: Serializer>(
        &self,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.len()))?;
        for (name, value) in self.iter() {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for AttributeMap {
    fn deserialize<D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Self, D::Error> {
        struct AttributeMapVisitor;

        impl<'de> Visitor<'de> for AttributeMapVisitor {
            type Value = AttributeMap;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of attribute names to string values")
            }

            fn visit_map<A: MapAccess<'de>>(
                self,
                mut access: A,
            ) -> Result<Self::Value, A::Error> {
                let mut map = AttributeMap::new();
                while let Some((name, value)) =
                    access.next_entry::<String, AttributeValue>()?
                {
                    map.insert(name, value);
                }
                Ok(map)
            }
        }

        deserializer.deserialize_map(AttributeMapVisitor)
    }
}
