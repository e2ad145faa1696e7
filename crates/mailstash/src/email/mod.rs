//! Email fetch and parsing.
//!
//! `ImapClient` is the mail-transport collaborator: it fills the raw
//! message staging store. `MessageParser` turns one raw RFC822 blob
//! into headers, body parts, attachments, and cloud-link candidates.

pub mod client;
pub mod error;
pub mod parser;
pub mod utf7;

pub use client::{build_search_criteria, ImapClient};
pub use error::EmailError;
pub use parser::{AttachmentData, BodyPart, MessageParser, ParsedMessage};
pub use utf7::decode_modified_utf7;
