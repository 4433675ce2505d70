use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("unknown role: {0}")]
    UnknownRole(String),
    #[error("role {role} references unknown or disabled provider {provider}")]
    RoleProviderMissing { role: String, provider: String },
    #[error("no enabled provider could resolve model {0}")]
    NoProviderForModel(String),
    #[error("provider {0} is disabled")]
    ProviderDisabled(String),
}
