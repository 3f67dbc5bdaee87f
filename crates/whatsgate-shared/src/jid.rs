//! Protocol addresses.
//!
//! A JID has the shape `user[.agent][:device]@server`. The `agent` and
//! `device` parts only appear on addresses of individual linked devices
//! ("AD" JIDs); everything user-facing works with the non-AD form.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::constants::{BROADCAST_SERVER, GROUP_SERVER, STATUS_BROADCAST_USER};
use crate::error::JidError;

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Jid {
    pub user: String,
    pub agent: u8,
    pub device: u16,
    pub server: String,
}

impl Jid {
    pub fn new(user: impl Into<String>, server: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            agent: 0,
            device: 0,
            server: server.into(),
        }
    }

    /// Parse a JID string. Empty input is rejected.
    pub fn parse(s: &str) -> Result<Self, JidError> {
        if s.is_empty() {
            return Err(JidError::Empty);
        }

        let mut parts = s.split('@');
        let first = parts.next().unwrap_or_default();
        let Some(server) = parts.next() else {
            // A bare server, e.g. "s.whatsapp.net".
            return Ok(Self::new("", first));
        };
        if parts.next().is_some() {
            return Err(JidError::TooManyServers(s.to_string()));
        }

        let mut jid = Self::new(first, server);

        if first.contains('.') {
            let mut dots = first.split('.');
            let user = dots.next().unwrap_or_default();
            let ad = dots.next().unwrap_or_default();
            if dots.next().is_some() {
                return Err(JidError::TooManyDots(s.to_string()));
            }

            let mut colons = ad.split(':');
            let agent = colons.next().unwrap_or_default();
            let device = colons.next();
            if colons.next().is_some() {
                return Err(JidError::TooManyColons(s.to_string()));
            }

            jid.user = user.to_string();
            jid.agent = agent
                .parse()
                .map_err(|_| JidError::InvalidAgent(s.to_string()))?;
            if let Some(device) = device {
                jid.device = device
                    .parse()
                    .map_err(|_| JidError::InvalidDevice(s.to_string()))?;
            }
        } else if first.contains(':') {
            let mut colons = first.split(':');
            let user = colons.next().unwrap_or_default();
            let device = colons.next().unwrap_or_default();
            if colons.next().is_some() {
                return Err(JidError::TooManyColons(s.to_string()));
            }

            jid.user = user.to_string();
            jid.device = device
                .parse()
                .map_err(|_| JidError::InvalidDevice(s.to_string()))?;
        }

        Ok(jid)
    }

    /// Strip agent and device, leaving the user-level address.
    pub fn to_non_ad(&self) -> Self {
        Self::new(self.user.clone(), self.server.clone())
    }

    pub fn is_empty(&self) -> bool {
        self.user.is_empty() && self.server.is_empty()
    }

    pub fn is_group(&self) -> bool {
        self.server == GROUP_SERVER
    }

    pub fn is_broadcast(&self) -> bool {
        self.server == BROADCAST_SERVER
    }

    pub fn is_status_broadcast(&self) -> bool {
        self.is_broadcast() && self.user == STATUS_BROADCAST_USER
    }
}

impl fmt::Display for Jid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.agent > 0 {
            write!(f, "{}.{}:{}@{}", self.user, self.agent, self.device, self.server)
        } else if self.device > 0 {
            write!(f, "{}:{}@{}", self.user, self.device, self.server)
        } else if !self.user.is_empty() {
            write!(f, "{}@{}", self.user, self.server)
        } else {
            f.write_str(&self.server)
        }
    }
}

impl FromStr for Jid {
    type Err = JidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Jid {
    type Error = JidError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<Jid> for String {
    fn from(jid: Jid) -> Self {
        jid.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::DEFAULT_USER_SERVER;

    #[test]
    fn parse_user_jid() {
        let jid = Jid::parse("15551234567@s.whatsapp.net").unwrap();
        assert_eq!(jid.user, "15551234567");
        assert_eq!(jid.server, DEFAULT_USER_SERVER);
        assert_eq!(jid.device, 0);
        assert_eq!(jid.to_string(), "15551234567@s.whatsapp.net");
    }

    #[test]
    fn parse_device_jid() {
        let jid = Jid::parse("15551234567:12@s.whatsapp.net").unwrap();
        assert_eq!(jid.device, 12);
        assert_eq!(jid.to_string(), "15551234567:12@s.whatsapp.net");
        assert_eq!(jid.to_non_ad().to_string(), "15551234567@s.whatsapp.net");
    }

    #[test]
    fn parse_agent_jid() {
        let jid = Jid::parse("15551234567.1:3@s.whatsapp.net").unwrap();
        assert_eq!(jid.agent, 1);
        assert_eq!(jid.device, 3);
        assert_eq!(jid.to_string(), "15551234567.1:3@s.whatsapp.net");
    }

    #[test]
    fn parse_bare_server() {
        let jid = Jid::parse("g.us").unwrap();
        assert!(jid.user.is_empty());
        assert_eq!(jid.to_string(), "g.us");
    }

    #[test]
    fn reject_malformed() {
        assert_eq!(Jid::parse(""), Err(JidError::Empty));
        assert!(matches!(
            Jid::parse("a@b@c"),
            Err(JidError::TooManyServers(_))
        ));
        assert!(matches!(
            Jid::parse("a:1:2@s.whatsapp.net"),
            Err(JidError::TooManyColons(_))
        ));
        assert!(matches!(
            Jid::parse("a:x@s.whatsapp.net"),
            Err(JidError::InvalidDevice(_))
        ));
        assert!(matches!(
            Jid::parse("a.b.c@s.whatsapp.net"),
            Err(JidError::TooManyDots(_))
        ));
    }

    #[test]
    fn classify_servers() {
        assert!(Jid::parse("123-456@g.us").unwrap().is_group());
        assert!(Jid::parse("status@broadcast").unwrap().is_status_broadcast());
        assert!(!Jid::parse("1234@broadcast").unwrap().is_status_broadcast());
        assert!(Jid::default().is_empty());
    }

    #[test]
    fn serde_as_string() {
        let jid = Jid::parse("1:2@s.whatsapp.net").unwrap();
        let json = serde_json::to_string(&jid).unwrap();
        assert_eq!(json, "\"1:2@s.whatsapp.net\"");
        let back: Jid = serde_json::from_str(&json).unwrap();
        assert_eq!(back, jid);
    }
}
