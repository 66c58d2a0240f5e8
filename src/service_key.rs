//! Service key parsing.
//!
//! A service key names the service a request is addressed to, in the form
//! `application.function.version.serialization`, e.g. `system.echo.0.raw`.
//! Locators index services by the derived search key
//! `application.serialization.version.function`.

use crate::error::{Fault, FaultCode};

use std::fmt;
use std::str::FromStr;

const MAX_NAME_LENGTH: usize = 32;
const MAX_VERSION_DIGITS: usize = 6;

/// Payload encoding agreed between client and service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Serialization {
    Cobol,
    Html,
    Json,
    Jms,
    NetString,
    Php,
    Soap,
    Xml,
    Raw,
}

impl Serialization {
    pub fn as_str(self) -> &'static str {
        match self {
            Serialization::Cobol => "COBOL",
            Serialization::Html => "HTML",
            Serialization::Json => "JSON",
            Serialization::Jms => "JMS",
            Serialization::NetString => "NETSTRING",
            Serialization::Php => "PHP",
            Serialization::Soap => "SOAP",
            Serialization::Xml => "XML",
            Serialization::Raw => "raw",
        }
    }

    fn parse(text: &str) -> Option<Self> {
        let serialization = match text {
            "COBOL" => Serialization::Cobol,
            "HTML" => Serialization::Html,
            "JSON" => Serialization::Json,
            "JMS" => Serialization::Jms,
            "NETSTRING" => Serialization::NetString,
            "PHP" => Serialization::Php,
            "SOAP" => Serialization::Soap,
            "XML" => Serialization::Xml,
            "raw" => Serialization::Raw,
            _ => return None,
        };

        Some(serialization)
    }
}

/// A validated service key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceKey {
    application: String,
    function: String,
    version: u32,
    serialization: Serialization,
}

impl ServiceKey {
    /// Parses a key supplied by a client. The function component is required.
    ///
    /// # Example
    /// ```ignore
    /// let key = ServiceKey::parse("system.echo.0.raw")?;
    /// assert_eq!(key.search_key(), "system.raw.0.echo");
    /// ```
    pub fn parse(text: &str) -> Result<Self, Fault> {
        Self::parse_with(text, true)
    }

    /// Parses a key registered by a service, where an empty function makes
    /// the service answer every function of its application.
    pub fn parse_service(text: &str) -> Result<Self, Fault> {
        Self::parse_with(text, false)
    }

    fn parse_with(text: &str, client: bool) -> Result<Self, Fault> {
        let bad = |reason: &str| Fault::new(FaultCode::ServiceKeyBad, format!("{reason}: {text:?}"));

        let tokens: Vec<&str> = text.split('.').collect();
        let [application, function, version, serialization] = tokens[..] else {
            return Err(bad("need four dot-separated tokens"));
        };

        if application.is_empty() || application.len() > MAX_NAME_LENGTH {
            return Err(bad("application name length is not in the range 1-32"));
        }
        if client && function.is_empty() {
            return Err(bad("service function is zero length"));
        }
        if function.len() > MAX_NAME_LENGTH {
            return Err(bad("service function is longer than 32 characters"));
        }
        if !is_name(application) || !is_name(function) {
            return Err(bad("names may only contain letters, digits, '_' and '-'"));
        }

        if version.is_empty() || version.len() > MAX_VERSION_DIGITS {
            return Err(bad("version length is not in the range 1-6"));
        }
        if version.len() > 1 && version.starts_with('0') {
            return Err(bad("version has ambiguous leading zero"));
        }
        if !version.bytes().all(|b| b.is_ascii_digit()) {
            return Err(bad("version is not a positive integer"));
        }
        let version = version
            .parse::<u32>()
            .map_err(|_| bad("version is not a positive integer"))?;

        if serialization.is_empty() {
            return Err(bad("serialization is zero length"));
        }
        let serialization =
            Serialization::parse(serialization).ok_or_else(|| bad("serialization type is unrecognized"))?;

        Ok(Self {
            application: application.to_string(),
            function: function.to_string(),
            version,
            serialization,
        })
    }

    pub fn application(&self) -> &str {
        &self.application
    }

    pub fn function(&self) -> &str {
        &self.function
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn serialization(&self) -> Serialization {
        self.serialization
    }

    /// The canonical `application.function.version.serialization` form.
    pub fn english_key(&self) -> String {
        self.to_string()
    }

    /// The `application.serialization.version.function` form used by locators.
    ///
    /// A key without a function omits the trailing component.
    pub fn search_key(&self) -> String {
        let base = self.wildcard_search_key();
        if self.function.is_empty() {
            base
        } else {
            format!("{base}.{}", self.function)
        }
    }

    /// The search key of a service that answers every function.
    pub fn wildcard_search_key(&self) -> String {
        format!(
            "{}.{}.{}",
            self.application,
            self.serialization.as_str(),
            self.version
        )
    }
}

fn is_name(text: &str) -> bool {
    text.bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

impl FromStr for ServiceKey {
    type Err = Fault;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        Self::parse(text)
    }
}

impl fmt::Display for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}",
            self.application,
            self.function,
            self.version,
            self.serialization.as_str()
        )
    }
}
