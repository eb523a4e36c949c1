//! Configuration types for call sessions

use crate::media::MediaConstraints;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// DOM event dispatched on every native connection-state change
pub const DEFAULT_STATE_EVENT: &str = "connectionstatechange";

/// Main configuration for a `CallSession`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallConfig {
    /// Media requested from the host at connect time (default: audio + video)
    pub media: MediaConstraints,

    /// ICE servers used when the server replies with an empty list
    pub fallback_ice_servers: Vec<IceServer>,

    /// Upper bound on the `ice-servers` round trip (None waits forever)
    pub ice_servers_timeout_ms: Option<u64>,

    /// Name of the DOM event carrying connection-state changes
    pub state_event_name: String,
}

/// ICE server entry, in the browser's `RTCIceServer` shape
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    /// `stun:`, `stuns:`, `turn:` or `turns:` URLs; a single string is accepted
    #[serde(with = "one_or_many")]
    pub urls: Vec<String>,

    /// Username for TURN authentication
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    /// Credential for TURN authentication
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl IceServer {
    /// An unauthenticated STUN server
    pub fn stun(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            username: None,
            credential: None,
        }
    }

    /// A TURN server with credentials
    pub fn turn(
        url: impl Into<String>,
        username: impl Into<String>,
        credential: impl Into<String>,
    ) -> Self {
        Self {
            urls: vec![url.into()],
            username: Some(username.into()),
            credential: Some(credential.into()),
        }
    }

    fn is_turn(&self) -> bool {
        self.urls
            .iter()
            .any(|u| u.starts_with("turn:") || u.starts_with("turns:"))
    }

    /// Validate URL schemes and TURN credentials
    pub fn validate(&self) -> crate::Result<()> {
        use crate::Error;

        if self.urls.is_empty() {
            return Err(Error::InvalidConfig(
                "ICE server must list at least one URL".to_string(),
            ));
        }

        for url in &self.urls {
            let known = ["stun:", "stuns:", "turn:", "turns:"]
                .iter()
                .any(|scheme| url.starts_with(scheme));
            if !known {
                return Err(Error::InvalidConfig(format!(
                    "ICE server URL must start with stun:, stuns:, turn: or turns:, got {}",
                    url
                )));
            }
        }

        if self.is_turn() && (self.username.is_none() || self.credential.is_none()) {
            return Err(Error::InvalidConfig(format!(
                "TURN server {} requires username and credential",
                self.urls[0]
            )));
        }

        Ok(())
    }
}

mod one_or_many {
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Urls {
        One(String),
        Many(Vec<String>),
    }

    pub fn serialize<S>(urls: &[String], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_seq(urls)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(match Urls::deserialize(deserializer)? {
            Urls::One(url) => vec![url],
            Urls::Many(urls) => urls,
        })
    }
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            media: MediaConstraints::default(),
            fallback_ice_servers: vec![IceServer::stun(
                "stun:global.stun.twilio.com:3478?transport=udp",
            )],
            ice_servers_timeout_ms: Some(10_000),
            state_event_name: DEFAULT_STATE_EVENT.to_string(),
        }
    }
}

impl CallConfig {
    /// Validate configuration parameters
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `media` requests neither audio nor video
    /// - `ice_servers_timeout_ms` is `Some(0)`
    /// - a fallback ICE server is malformed
    /// - `state_event_name` is empty
    pub fn validate(&self) -> crate::Result<()> {
        use crate::Error;

        if self.media.is_empty() {
            return Err(Error::InvalidConfig(
                "media constraints must request audio or video".to_string(),
            ));
        }

        if self.ice_servers_timeout_ms == Some(0) {
            return Err(Error::InvalidConfig(
                "ice_servers_timeout_ms must be positive (use None to wait forever)".to_string(),
            ));
        }

        for server in &self.fallback_ice_servers {
            server.validate()?;
        }

        if self.state_event_name.trim().is_empty() {
            return Err(Error::InvalidConfig(
                "state_event_name must not be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Voice-only calls
    ///
    /// # Example
    ///
    /// ```
    /// use livecall_webrtc::config::CallConfig;
    ///
    /// let config = CallConfig::audio_only();
    /// assert!(config.media.audio);
    /// assert!(!config.media.video);
    /// ```
    pub fn audio_only() -> Self {
        Self {
            media: MediaConstraints::audio_only(),
            ..Default::default()
        }
    }

    /// Wait for the server's ICE server list without a deadline
    pub fn unbounded() -> Self {
        Self {
            ice_servers_timeout_ms: None,
            ..Default::default()
        }
    }

    /// Deadline for the ICE server request, if any
    pub fn ice_servers_timeout(&self) -> Option<Duration> {
        self.ice_servers_timeout_ms.map(Duration::from_millis)
    }

    pub fn with_fallback_ice_servers(mut self, servers: Vec<IceServer>) -> Self {
        self.fallback_ice_servers = servers;
        self
    }

    pub fn with_ice_servers_timeout_ms(mut self, timeout_ms: Option<u64>) -> Self {
        self.ice_servers_timeout_ms = timeout_ms;
        self
    }

    pub fn with_media(mut self, media: MediaConstraints) -> Self {
        self.media = media;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = CallConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.ice_servers_timeout(), Some(Duration::from_secs(10)));
    }

    #[test]
    fn test_empty_media_fails() {
        let config = CallConfig::default().with_media(MediaConstraints {
            audio: false,
            video: false,
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_timeout_fails() {
        let config = CallConfig::default().with_ice_servers_timeout_ms(Some(0));
        assert!(config.validate().is_err());

        let config = CallConfig::unbounded();
        assert!(config.validate().is_ok());
        assert!(config.ice_servers_timeout().is_none());
    }

    #[test]
    fn test_ice_server_scheme_validation() {
        assert!(IceServer::stun("stun:stun.l.google.com:19302").validate().is_ok());
        assert!(IceServer::stun("http://example.com").validate().is_err());
        assert!(IceServer::stun("turn:turn.example.com:3478").validate().is_err());
        assert!(IceServer::turn("turn:turn.example.com:3478", "user", "pass")
            .validate()
            .is_ok());
    }

    #[test]
    fn test_ice_server_accepts_single_url_string() {
        let server: IceServer =
            serde_json::from_str(r#"{"urls": "stun:stun.example.com:3478"}"#).unwrap();
        assert_eq!(server.urls, vec!["stun:stun.example.com:3478".to_string()]);

        let server: IceServer = serde_json::from_str(
            r#"{"urls": ["turn:a:3478", "turns:a:5349"], "username": "u", "credential": "c"}"#,
        )
        .unwrap();
        assert_eq!(server.urls.len(), 2);
        assert!(server.validate().is_ok());
    }

    #[test]
    fn test_config_serialization() {
        let config = CallConfig::audio_only();
        let json = serde_json::to_string(&config).unwrap();
        let deserialized: CallConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config.media, deserialized.media);
        assert_eq!(config.fallback_ice_servers, deserialized.fallback_ice_servers);
    }
}
