//! Wire endpoint and companion URL construction.
//!
//! ```text
//! display, shared room:    ws(s)://<host>/ws
//! display/mobile, session: ws(s)://<host>/ws/<session_id>
//! companion URL:           <origin>/mobile?session_id=<session_id>
//! ```

use thiserror::Error;
use url::Url;

use crate::session::{SessionError, SessionId};

/// Query parameter carrying the session id on the mobile page URL.
pub const SESSION_QUERY_PARAM: &str = "session_id";

#[derive(Debug, Error)]
pub enum EndpointError {
    #[error("invalid URL {input:?}: {source}")]
    InvalidUrl {
        input: String,
        #[source]
        source: url::ParseError,
    },
    #[error("unsupported scheme {0:?} (expected http, https, ws or wss)")]
    UnsupportedScheme(String),
    #[error("URL has no host")]
    MissingHost,
    #[error(transparent)]
    Session(#[from] SessionError),
}

/// Scheme and authority of the page the client was served from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageOrigin {
    secure: bool,
    /// `host[:port]`.
    authority: String,
}

impl PageOrigin {
    /// Parse `http(s)://host[:port][/...]`; `ws`/`wss` are accepted too.
    pub fn parse(input: &str) -> Result<Self, EndpointError> {
        let url = Url::parse(input).map_err(|source| EndpointError::InvalidUrl {
            input: input.to_string(),
            source,
        })?;
        Self::from_url(&url)
    }

    fn from_url(url: &Url) -> Result<Self, EndpointError> {
        let secure = match url.scheme() {
            "https" | "wss" => true,
            "http" | "ws" => false,
            other => return Err(EndpointError::UnsupportedScheme(other.to_string())),
        };
        let host = url.host_str().ok_or(EndpointError::MissingHost)?;
        let authority = match url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };
        Ok(Self { secure, authority })
    }

    pub fn is_secure(&self) -> bool {
        self.secure
    }

    pub fn authority(&self) -> &str {
        &self.authority
    }

    fn http_origin(&self) -> String {
        let scheme = if self.secure { "https" } else { "http" };
        format!("{scheme}://{}", self.authority)
    }

    fn ws_origin(&self) -> String {
        let scheme = if self.secure { "wss" } else { "ws" };
        format!("{scheme}://{}", self.authority)
    }
}

/// Where a role connects to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    SharedRoom { origin: PageOrigin },
    Session { origin: PageOrigin, session: SessionId },
}

impl Endpoint {
    /// Resolve the mobile endpoint from the page URL it was opened with. A
    /// missing `session_id` is [`SessionError::Missing`].
    pub fn from_mobile_page(page_url: &str) -> Result<Self, EndpointError> {
        let url = Url::parse(page_url).map_err(|source| EndpointError::InvalidUrl {
            input: page_url.to_string(),
            source,
        })?;
        let origin = PageOrigin::from_url(&url)?;
        let raw = url
            .query_pairs()
            .find(|(k, _)| k == SESSION_QUERY_PARAM)
            .map(|(_, v)| v.into_owned())
            .ok_or(SessionError::Missing)?;
        let session = SessionId::new(raw)?;
        Ok(Endpoint::Session { origin, session })
    }

    pub fn origin(&self) -> &PageOrigin {
        match self {
            Endpoint::SharedRoom { origin } | Endpoint::Session { origin, .. } => origin,
        }
    }

    pub fn session(&self) -> Option<&SessionId> {
        match self {
            Endpoint::SharedRoom { .. } => None,
            Endpoint::Session { session, .. } => Some(session),
        }
    }

    pub fn ws_url(&self) -> String {
        match self {
            Endpoint::SharedRoom { origin } => format!("{}/ws", origin.ws_origin()),
            Endpoint::Session { origin, session } => format!("{}/ws/{session}", origin.ws_origin()),
        }
    }

    /// URL the QR renderer encodes for the visitor's device.
    pub fn companion_url(&self) -> String {
        match self {
            Endpoint::SharedRoom { origin } => format!("{}/mobile", origin.http_origin()),
            Endpoint::Session { origin, session } => format!(
                "{}/mobile?{SESSION_QUERY_PARAM}={session}",
                origin.http_origin()
            ),
        }
    }
}
