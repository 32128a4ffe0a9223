//! Directory entry to external contract translation.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};

use crate::provisioning::attributes::AttributeMap;
use crate::provisioning::schema::{
    AttributeRole, ID, Schema, WHEN_CHANGED, WHEN_CREATED,
};

/// Outcome of translating one entry.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Translation {
    pub attributes: AttributeMap,
    /// Attributes left out because they could not be translated.
    pub dropped: Vec<String>,
}

/// Decode an LDAP generalized time (`YYYYMMDDHHMMSS[.f](Z|±hhmm)`).
pub fn decode_generalized_time(
    value: &str,
) -> Result<DateTime<Utc>, chrono::ParseError> {
    if let Some(local) = value.strip_suffix(['Z', 'z']) {
        return NaiveDateTime::parse_from_str(local, "%Y%m%d%H%M%S%.f")
            .map(|time| time.and_utc());
    }

    DateTime::parse_from_str(value, "%Y%m%d%H%M%S%.f%z")
        .map(|time| time.with_timezone(&Utc))
}

/// Encode a timestamp as LDAP generalized time.
#[cfg(test)]
pub fn encode_generalized_time(time: &DateTime<Utc>) -> String {
    time.format("%Y%m%d%H%M%SZ").to_string()
}

/// Translate a stored entry into the response attribute map.
///
/// Each attribute is translated on its own: a timestamp that fails to
/// decode is dropped and reported, the rest of the record still goes out.
pub fn translate(schema: &Schema, entry: &AttributeMap) -> Translation {
    let mut translation = Translation::default();

    for (name, value) in entry.iter() {
        match schema.role(name) {
            role @ (AttributeRole::CreatedAt | AttributeRole::ModifiedAt) => {
                let contract = if role == AttributeRole::CreatedAt {
                    WHEN_CREATED
                } else {
                    WHEN_CHANGED
                };

                match value.single().map(decode_generalized_time) {
                    Some(Ok(time)) => {
                        translation.attributes.insert(
                            contract,
                            time.to_rfc3339_opts(SecondsFormat::Secs, true),
                        );
                    },
                    Some(Err(err)) => {
                        tracing::warn!(
                            attribute = name,
                            error = %err,
                            "cannot decode generalized time"
                        );
                        translation.dropped.push(name.to_owned());
                    },
                    None => {},
                }
            },
            AttributeRole::NamingAttribute => {
                translation.attributes.insert(ID, value.clone());
            },
            AttributeRole::ActiveFlag => {},
            _ => {
                translation.attributes.insert(name, value.clone());
            },
        }
    }

    translation
}
