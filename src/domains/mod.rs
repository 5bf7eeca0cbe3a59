pub mod envelope;

pub use envelope::{
    CardIds, Envelope, GameEvent, MessageKind, PayloadCategory, NEW_MESSAGE_TOPIC,
    PRINCIPAL_HEADER,
};
