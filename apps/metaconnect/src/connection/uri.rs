use std::collections::BTreeMap;

use thiserror::Error;
use url::Url;

use super::validate;
use super::{LocalProfile, MetaConnection};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum UriError {
    #[error("invalid origin: {0}")]
    InvalidOrigin(String),
    #[error("scanned data is not an http(s) connection uri")]
    InvalidBootstrapString,
    #[error("malformed connection uri: {0}")]
    MalformedUri(String),
}

/// Codec for the QR bootstrap URI:
/// `<origin>?id=<user>&name=<name>&socialMedia=<json>`.
///
/// Query values are percent-encoded on the way out, so handles containing
/// reserved characters survive the round trip.
#[derive(Debug, Clone)]
pub struct UriCodec {
    origin: Url,
}

impl UriCodec {
    /// The origin is injected from configuration; a bare host is promoted
    /// to https.
    pub fn new(origin: impl AsRef<str>) -> Result<Self, UriError> {
        let mut raw = origin.as_ref().trim().to_string();
        if raw.is_empty() {
            return Err(UriError::InvalidOrigin("origin cannot be empty".into()));
        }
        if !raw.starts_with("http://") && !raw.starts_with("https://") {
            raw = format!("https://{raw}");
        }
        let origin = Url::parse(&raw).map_err(|err| UriError::InvalidOrigin(err.to_string()))?;
        Ok(Self { origin })
    }

    pub fn origin(&self) -> &Url {
        &self.origin
    }

    /// Encode the local identity as a scannable URI.
    pub fn encode(&self, user_id: &str, profile: &LocalProfile) -> Url {
        let social = serde_json::to_string(&profile.social_media).unwrap_or_else(|_| "{}".into());
        let mut url = self.origin.clone();
        url.query_pairs_mut()
            .clear()
            .append_pair("id", user_id)
            .append_pair("name", &profile.name)
            .append_pair("socialMedia", &social);
        url
    }

    /// Decode a scanned string into the displaying peer plus the connection
    /// it advertised. The routability gate runs first so scan noise reports
    /// as `InvalidBootstrapString` rather than a parse failure; a uri that
    /// passes the gate but lacks `id`/`name`, or carries an unparseable
    /// `socialMedia` value, is `MalformedUri`.
    pub fn decode(input: &str) -> Result<DecodedConnection, UriError> {
        validate::validate_bootstrap_string(input)?;
        let url =
            Url::parse(input.trim()).map_err(|err| UriError::MalformedUri(err.to_string()))?;

        let mut id = None;
        let mut name = None;
        let mut social_raw = None;
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "id" => id = Some(value.into_owned()),
                "name" => name = Some(value.into_owned()),
                "socialMedia" => social_raw = Some(value.into_owned()),
                _ => {}
            }
        }

        let peer = id.ok_or_else(|| UriError::MalformedUri("missing id".into()))?;
        let name = name.ok_or_else(|| UriError::MalformedUri("missing name".into()))?;
        let social_media: BTreeMap<String, String> = match social_raw {
            Some(raw) => serde_json::from_str(&raw)
                .map_err(|err| UriError::MalformedUri(format!("socialMedia: {err}")))?,
            None => BTreeMap::new(),
        };

        Ok(DecodedConnection {
            peer,
            connection: MetaConnection {
                name,
                social_media,
                request: true,
            },
        })
    }
}

/// What a successful scan yields: whom to message back, and the record the
/// uri advertised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedConnection {
    pub peer: String,
    pub connection: MetaConnection,
}
