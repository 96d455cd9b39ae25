//! Server list documents
//!
//! JSON bodies of the status response and of disconnect reasons.

use serde::{Deserialize, Serialize};

use super::{PROTOCOL_VERSION, VERSION_NAME};

/// Chat text component, used for descriptions and disconnect reasons
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextComponent {
    pub text: String,
}

impl TextComponent {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

/// Game version advertised in the server list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionInfo {
    pub name: String,
    pub protocol: u32,
}

/// Player counts advertised in the server list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayersInfo {
    pub max: u32,
    pub online: u32,
    #[serde(default)]
    pub sample: Vec<PlayerSample>,
}

/// Entry of the hover list shown by clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerSample {
    pub name: String,
    pub id: String,
}

/// The status response document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerStatus {
    pub version: VersionInfo,
    pub players: PlayersInfo,
    pub description: TextComponent,
}

/// Static facts about this server, shared by every session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerDescriptor {
    pub protocol_version: u32,
    pub version_name: String,
    pub max_players: u32,
    pub description: String,
}

impl Default for ServerDescriptor {
    fn default() -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            version_name: VERSION_NAME.to_string(),
            max_players: 20,
            description: "A blockgate server".to_string(),
        }
    }
}

impl ServerDescriptor {
    /// Build the status document for the given number of online sessions
    pub fn status(&self, online: usize) -> ServerStatus {
        ServerStatus {
            version: VersionInfo {
                name: self.version_name.clone(),
                protocol: self.protocol_version,
            },
            players: PlayersInfo {
                max: self.max_players,
                online: u32::try_from(online).unwrap_or(u32::MAX),
                sample: Vec::new(),
            },
            description: TextComponent::new(self.description.clone()),
        }
    }
}
