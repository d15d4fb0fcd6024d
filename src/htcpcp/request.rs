//! Decoding of HTCPCP requests into core operations.

use std::str::FromStr;

use hyper::header::{HeaderMap, CONTENT_TYPE};
use hyper::Method;

use crate::brewing::TeaMenu;

/// Media type of tea control messages (RFC 7168).
pub const TEA_CONTENT_TYPE: &str = "message/teapot";
/// Media type of coffee control messages (RFC 2324).
pub const COFFEE_CONTENT_TYPE: &str = "message/coffeepot";
/// Header listing the pots a client may brew at.
pub const ALTERNATES: &str = "alternates";
/// Methods the pot answers to.
pub const ALLOWED_METHODS: &str = "BREW, POST, PROPFIND";

/// HTCPCP verbs understood by the pot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PotMethod {
    /// `BREW`, or `POST` for older clients.
    Brew,
    /// `PROPFIND`: pot metadata.
    Propfind,
}

impl PotMethod {
    pub fn from_method(method: &Method) -> Option<Self> {
        match method.as_str() {
            "BREW" | "POST" => Some(PotMethod::Brew),
            "PROPFIND" => Some(PotMethod::Propfind),
            _ => None,
        }
    }
}

/// What a request path points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target<'a> {
    /// The pot itself (`/`).
    Pot,
    /// A variant by name (`/{name}`).
    Variant(&'a str),
}

impl<'a> Target<'a> {
    pub fn from_path(path: &'a str) -> Self {
        match path.trim_start_matches('/') {
            "" => Target::Pot,
            name => Target::Variant(name),
        }
    }
}

/// Declared content type of a control message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageType {
    Tea,
    Coffee,
    Other(String),
    Missing,
}

impl MessageType {
    /// Classify the `Content-Type` header, ignoring parameters and case.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let Some(value) = headers.get(CONTENT_TYPE) else {
            return MessageType::Missing;
        };

        let essence = value
            .to_str()
            .unwrap_or_default()
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();

        match essence.as_str() {
            TEA_CONTENT_TYPE => MessageType::Tea,
            COFFEE_CONTENT_TYPE => MessageType::Coffee,
            "" => MessageType::Missing,
            _ => MessageType::Other(essence),
        }
    }
}

/// Requested control action, carried in the message body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrewAction {
    Start,
    Stop,
}

impl FromStr for BrewAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "start" => Ok(BrewAction::Start),
            "stop" => Ok(BrewAction::Stop),
            other => Err(format!("unknown brew action \"{}\", expected start or stop", other)),
        }
    }
}

/// Value of the `Alternates` header for the menu, e.g.
/// `{"/earl-grey" {type message/teapot}}`.
pub fn alternates(menu: &TeaMenu) -> String {
    menu.iter()
        .map(|variant| format!("{{\"/{}\" {{type {}}}}}", variant.name(), TEA_CONTENT_TYPE))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PotConfig;
    use hyper::header::HeaderValue;

    fn headers(content_type: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_str(content_type).unwrap());
        headers
    }

    #[test]
    fn test_alternates_lists_every_variant() {
        let menu = TeaMenu::from_config(&PotConfig::default()).unwrap();
        assert_eq!(
            alternates(&menu),
            "{\"/english-breakfast\" {type message/teapot}}, \
             {\"/earl-grey\" {type message/teapot}}"
        );
    }

    #[test]
    fn test_pot_methods() {
        let brew = Method::from_bytes(b"BREW").unwrap();
        let propfind = Method::from_bytes(b"PROPFIND").unwrap();

        assert_eq!(PotMethod::from_method(&brew), Some(PotMethod::Brew));
        assert_eq!(PotMethod::from_method(&Method::POST), Some(PotMethod::Brew));
        assert_eq!(PotMethod::from_method(&propfind), Some(PotMethod::Propfind));

        for method in [
            Method::GET,
            Method::PUT,
            Method::HEAD,
            Method::DELETE,
            Method::OPTIONS,
            Method::PATCH,
            Method::TRACE,
        ] {
            assert_eq!(PotMethod::from_method(&method), None, "{} should not brew", method);
        }
    }

    #[test]
    fn test_target_from_path() {
        assert_eq!(Target::from_path("/"), Target::Pot);
        assert_eq!(Target::from_path(""), Target::Pot);
        assert_eq!(Target::from_path("/earl-grey"), Target::Variant("earl-grey"));
        assert_eq!(Target::from_path("/a/b"), Target::Variant("a/b"));
    }

    #[test]
    fn test_message_type() {
        assert_eq!(MessageType::from_headers(&HeaderMap::new()), MessageType::Missing);
        assert_eq!(MessageType::from_headers(&headers("message/teapot")), MessageType::Tea);
        assert_eq!(
            MessageType::from_headers(&headers("Message/Teapot; charset=utf-8")),
            MessageType::Tea
        );
        assert_eq!(
            MessageType::from_headers(&headers("message/coffeepot")),
            MessageType::Coffee
        );
        assert_eq!(
            MessageType::from_headers(&headers("text/plain")),
            MessageType::Other("text/plain".to_string())
        );
    }

    #[test]
    fn test_brew_action() {
        assert_eq!("start".parse::<BrewAction>(), Ok(BrewAction::Start));
        assert_eq!(" STOP\r\n".parse::<BrewAction>(), Ok(BrewAction::Stop));
        assert!("pour".parse::<BrewAction>().is_err());
        assert!("".parse::<BrewAction>().is_err());
    }
}
