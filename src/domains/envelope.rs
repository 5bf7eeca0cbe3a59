use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::error::{BedlamError, Result};

/// Hub topic every envelope is broadcast under.
pub const NEW_MESSAGE_TOPIC: &str = "newMessage";

/// Trusted caller-identity header. The relay overwrites `sender` with it.
pub const PRINCIPAL_HEADER: &str = "x-ms-client-principal-name";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PayloadCategory {
    User,
    Cards,
    Stage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    NewCard,
    PlayedCard,
    FaveCard,
    UnfaveCard,
    ChooseWinner,
    NewDealerviewCard,
    NextCard,
    PrevCard,
    AddUser,
    RemoveUser,
    AckUser,
    SetDealer,
    DoneFave,
    GameStage,
    Unknown,
}

impl MessageKind {
    pub const KNOWN: [MessageKind; 14] = [
        MessageKind::NewCard,
        MessageKind::PlayedCard,
        MessageKind::FaveCard,
        MessageKind::UnfaveCard,
        MessageKind::ChooseWinner,
        MessageKind::NewDealerviewCard,
        MessageKind::NextCard,
        MessageKind::PrevCard,
        MessageKind::AddUser,
        MessageKind::RemoveUser,
        MessageKind::AckUser,
        MessageKind::SetDealer,
        MessageKind::DoneFave,
        MessageKind::GameStage,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::NewCard => "new-card",
            Self::PlayedCard => "played-card",
            Self::FaveCard => "fave-card",
            Self::UnfaveCard => "unfave-card",
            Self::ChooseWinner => "choose-winner",
            Self::NewDealerviewCard => "new-dealerview-card",
            Self::NextCard => "next-card",
            Self::PrevCard => "prev-card",
            Self::AddUser => "add-user",
            Self::RemoveUser => "remove-user",
            Self::AckUser => "ack-user",
            Self::SetDealer => "set-dealer",
            Self::DoneFave => "done-fave",
            Self::GameStage => "game-stage",
            Self::Unknown => "unknown",
        }
    }

    /// `None` only for `Unknown`.
    pub fn category(self) -> Option<PayloadCategory> {
        match self {
            Self::NewCard
            | Self::PlayedCard
            | Self::FaveCard
            | Self::UnfaveCard
            | Self::ChooseWinner
            | Self::NewDealerviewCard
            | Self::NextCard
            | Self::PrevCard => Some(PayloadCategory::Cards),
            Self::AddUser | Self::RemoveUser | Self::AckUser | Self::SetDealer | Self::DoneFave => {
                Some(PayloadCategory::User)
            }
            Self::GameStage => Some(PayloadCategory::Stage),
            Self::Unknown => None,
        }
    }

    /// Point-to-point kinds must name a recipient.
    pub fn requires_recipient(self) -> bool {
        matches!(self, Self::AckUser)
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageKind {
    type Err = BedlamError;

    fn from_str(value: &str) -> Result<Self> {
        let value = value.trim();
        Self::KNOWN
            .iter()
            .copied()
            .find(|kind| kind.as_str() == value)
            .ok_or_else(|| BedlamError::Validation(format!("unknown message type `{value}`")))
    }
}

/// Ordered card ids. Older participants send a single integer, newer ones a list;
/// both decode here and the list form is always written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct CardIds(Vec<i64>);

impl CardIds {
    pub fn new(ids: Vec<i64>) -> Self {
        Self(ids)
    }

    pub fn as_slice(&self) -> &[i64] {
        &self.0
    }
}

impl<'de> Deserialize<'de> for CardIds {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            One(i64),
            Many(Vec<i64>),
        }

        Ok(match Repr::deserialize(deserializer)? {
            Repr::One(id) => CardIds(vec![id]),
            Repr::Many(ids) => CardIds(ids),
        })
    }
}

/// Comma-separated integers from the host, order preserved. A token that is not
/// an integer is rejected rather than carried as a sentinel.
pub fn parse_card_ids(raw: &str) -> Result<Vec<i64>> {
    raw.split(',')
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(|token| {
            token.parse::<i64>().map_err(|_| {
                BedlamError::Validation(format!("card id `{token}` is not an integer"))
            })
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum GameEvent {
    NewCard {
        #[serde(rename = "cardId")]
        cards: CardIds,
    },
    PlayedCard {
        #[serde(rename = "cardId")]
        cards: CardIds,
    },
    FaveCard {
        #[serde(rename = "cardId")]
        cards: CardIds,
    },
    UnfaveCard {
        #[serde(rename = "cardId")]
        cards: CardIds,
    },
    ChooseWinner {
        #[serde(rename = "cardId")]
        cards: CardIds,
    },
    NewDealerviewCard {
        #[serde(rename = "cardId")]
        cards: CardIds,
    },
    NextCard {
        #[serde(rename = "cardId")]
        cards: CardIds,
    },
    PrevCard {
        #[serde(rename = "cardId")]
        cards: CardIds,
    },
    AddUser {
        #[serde(rename = "userId")]
        user_id: String,
    },
    RemoveUser {
        #[serde(rename = "userId")]
        user_id: String,
    },
    AckUser {
        #[serde(rename = "userId")]
        user_id: String,
    },
    SetDealer {
        #[serde(rename = "userId")]
        user_id: String,
    },
    DoneFave {
        #[serde(rename = "userId")]
        user_id: String,
    },
    GameStage {
        stage: String,
    },
    /// Any `type` this build does not know. Ignored by participants.
    #[serde(other)]
    Unknown,
}

impl GameEvent {
    pub fn from_raw(kind: MessageKind, raw: &str) -> Result<Self> {
        let Some(category) = kind.category() else {
            return Err(BedlamError::Validation(
                "cannot build an event of unknown type".to_string(),
            ));
        };

        let event = match category {
            PayloadCategory::Cards => {
                let ids = parse_card_ids(raw)?;
                if ids.is_empty() {
                    return Err(BedlamError::Validation(format!(
                        "`{kind}` needs at least one card id"
                    )));
                }
                let cards = CardIds::new(ids);
                match kind {
                    MessageKind::NewCard => Self::NewCard { cards },
                    MessageKind::PlayedCard => Self::PlayedCard { cards },
                    MessageKind::FaveCard => Self::FaveCard { cards },
                    MessageKind::UnfaveCard => Self::UnfaveCard { cards },
                    MessageKind::ChooseWinner => Self::ChooseWinner { cards },
                    MessageKind::NewDealerviewCard => Self::NewDealerviewCard { cards },
                    MessageKind::NextCard => Self::NextCard { cards },
                    _ => Self::PrevCard { cards },
                }
            }
            PayloadCategory::User => {
                let user_id = raw.trim().to_string();
                if user_id.is_empty() {
                    return Err(BedlamError::Validation(format!("`{kind}` needs a user id")));
                }
                match kind {
                    MessageKind::AddUser => Self::AddUser { user_id },
                    MessageKind::RemoveUser => Self::RemoveUser { user_id },
                    MessageKind::AckUser => Self::AckUser { user_id },
                    MessageKind::SetDealer => Self::SetDealer { user_id },
                    _ => Self::DoneFave { user_id },
                }
            }
            PayloadCategory::Stage => {
                if raw.trim().is_empty() {
                    return Err(BedlamError::Validation(format!("`{kind}` needs a stage")));
                }
                Self::GameStage {
                    stage: raw.to_string(),
                }
            }
        };
        Ok(event)
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            Self::NewCard { .. } => MessageKind::NewCard,
            Self::PlayedCard { .. } => MessageKind::PlayedCard,
            Self::FaveCard { .. } => MessageKind::FaveCard,
            Self::UnfaveCard { .. } => MessageKind::UnfaveCard,
            Self::ChooseWinner { .. } => MessageKind::ChooseWinner,
            Self::NewDealerviewCard { .. } => MessageKind::NewDealerviewCard,
            Self::NextCard { .. } => MessageKind::NextCard,
            Self::PrevCard { .. } => MessageKind::PrevCard,
            Self::AddUser { .. } => MessageKind::AddUser,
            Self::RemoveUser { .. } => MessageKind::RemoveUser,
            Self::AckUser { .. } => MessageKind::AckUser,
            Self::SetDealer { .. } => MessageKind::SetDealer,
            Self::DoneFave { .. } => MessageKind::DoneFave,
            Self::GameStage { .. } => MessageKind::GameStage,
            Self::Unknown => MessageKind::Unknown,
        }
    }

    pub fn card_ids(&self) -> Option<&[i64]> {
        match self {
            Self::NewCard { cards }
            | Self::PlayedCard { cards }
            | Self::FaveCard { cards }
            | Self::UnfaveCard { cards }
            | Self::ChooseWinner { cards }
            | Self::NewDealerviewCard { cards }
            | Self::NextCard { cards }
            | Self::PrevCard { cards } => Some(cards.as_slice()),
            _ => None,
        }
    }

    pub fn user_id(&self) -> Option<&str> {
        match self {
            Self::AddUser { user_id }
            | Self::RemoveUser { user_id }
            | Self::AckUser { user_id }
            | Self::SetDealer { user_id }
            | Self::DoneFave { user_id } => Some(user_id),
            _ => None,
        }
    }

    pub fn stage(&self) -> Option<&str> {
        match self {
            Self::GameStage { stage } => Some(stage),
            _ => None,
        }
    }

    /// Host-facing `data`: card ids joined by `,`, the user id, or the stage.
    pub fn data_string(&self) -> Option<String> {
        if let Some(ids) = self.card_ids() {
            let joined = ids
                .iter()
                .map(|id| id.to_string())
                .collect::<Vec<_>>()
                .join(",");
            return Some(joined);
        }
        self.user_id()
            .or_else(|| self.stage())
            .map(|value| value.to_string())
    }
}

/// The unit exchanged between participants. Built once, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "messageID", alias = "messageId")]
    message_id: String,
    sender: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    recipient: Option<String>,
    #[serde(flatten)]
    event: GameEvent,
}

impl Envelope {
    /// Builds an outbound envelope with a fresh message id.
    pub fn new(kind: MessageKind, sender: &str, recipient: Option<&str>, raw: &str) -> Result<Self> {
        let sender = sender.trim();
        if sender.is_empty() {
            return Err(BedlamError::Validation("sender must not be empty".to_string()));
        }
        let recipient = recipient
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string);
        if kind.requires_recipient() && recipient.is_none() {
            return Err(BedlamError::Validation(format!(
                "`{kind}` is point-to-point and needs a recipient"
            )));
        }
        let event = GameEvent::from_raw(kind, raw)?;
        Ok(Self {
            message_id: Uuid::new_v4().to_string(),
            sender: sender.to_string(),
            recipient,
            event,
        })
    }

    pub fn from_parts(
        message_id: impl Into<String>,
        sender: impl Into<String>,
        recipient: Option<String>,
        event: GameEvent,
    ) -> Self {
        Self {
            message_id: message_id.into(),
            sender: sender.into(),
            recipient,
            event,
        }
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| BedlamError::Serialization(e.to_string()))
    }

    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        serde_json::from_value(value).map_err(|e| BedlamError::Serialization(e.to_string()))
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| BedlamError::Serialization(e.to_string()))
    }

    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    pub fn sender(&self) -> &str {
        &self.sender
    }

    pub fn recipient(&self) -> Option<&str> {
        self.recipient.as_deref()
    }

    pub fn event(&self) -> &GameEvent {
        &self.event
    }

    pub fn kind(&self) -> MessageKind {
        self.event.kind()
    }

    pub fn data_string(&self) -> Option<String> {
        self.event.data_string()
    }

    /// Absent and empty recipients both mean everyone.
    pub fn is_broadcast(&self) -> bool {
        self.recipient.as_deref().map_or(true, str::is_empty)
    }

    pub fn is_addressed_to(&self, participant_id: &str) -> bool {
        match self.recipient.as_deref() {
            None | Some("") => true,
            Some(recipient) => recipient == participant_id,
        }
    }
}
