//! Specific background job implementations.

pub mod client_secret_expiration;

pub use client_secret_expiration::{
    ClientSecretExpirationJob, ClientSecretExpirationJobOptions, RunSummary, SecretExpirationError,
};
