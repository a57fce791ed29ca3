use notify_core::{Channel, DispatchError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Recipient required for channel {0}")]
    RecipientRequired(Channel),

    #[error("Provider {0} is not configured")]
    NotConfigured(String),

    #[error("No active provider for channel {0}")]
    NoActiveProvider(Channel),

    #[error("Provider is not healthy: {0}")]
    ProviderNotHealthy(String),

    #[error("Provider not found: {0}")]
    ProviderNotFound(String),

    #[error("Transport error: {0}")]
    Transport(String),
}

impl From<ChannelError> for DispatchError {
    fn from(err: ChannelError) -> Self {
        match err {
            ChannelError::Validation(msg) => DispatchError::Validation(msg),
            ChannelError::RecipientRequired(channel) => DispatchError::RecipientRequired(channel),
            ChannelError::NoActiveProvider(channel) => DispatchError::NoActiveProvider(channel),
            ChannelError::ProviderNotHealthy(name) => DispatchError::ProviderNotHealthy(name),
            ChannelError::ProviderNotFound(name) => DispatchError::ProviderNotFound(name),
            ChannelError::NotConfigured(_) | ChannelError::Transport(_) => {
                DispatchError::SendFailed(err.to_string())
            }
        }
    }
}
