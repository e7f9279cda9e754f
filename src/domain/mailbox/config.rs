use mailparse::MailAddr;
use serde::Deserialize;
use std::result;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot parse mailbox address {1}")]
    ParseMailboxAddrError(#[source] mailparse::MailParseError, String),
    #[error("cannot find mailbox address in {0}")]
    ParseMailboxAddrNotFoundError(String),
}

pub type Result<T> = result::Result<T, Error>;

/// Represents the configuration of a synchronized mailbox.
#[derive(Debug, Default, Clone, Eq, PartialEq, Deserialize)]
pub struct MailboxConfig {
    /// Represents the mailbox identifier, as known by the provider.
    pub id: String,
    /// Represents the email address owning the mailbox. Messages
    /// sent from this address are considered outgoing.
    pub address: String,
    /// Represents the display name of the mailbox owner.
    #[serde(default)]
    pub display_name: Option<String>,
}

impl MailboxConfig {
    pub fn new<I: ToString, A: ToString>(id: I, address: A) -> Self {
        Self {
            id: id.to_string(),
            address: address.to_string(),
            display_name: None,
        }
    }

    /// Builds the full RFC822 compliant owner address.
    pub fn owner(&self) -> Result<MailAddr> {
        let addr = match self.display_name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => format!("\"{}\" <{}>", name, self.address),
            _ => self.address.clone(),
        };

        let addr = mailparse::addrparse(&addr)
            .map_err(|err| Error::ParseMailboxAddrError(err, addr.to_owned()))?
            .first()
            .ok_or_else(|| Error::ParseMailboxAddrNotFoundError(addr.to_owned()))?
            .to_owned();

        Ok(addr)
    }
}
