//! Client identity, installation and local-store lifecycle for end-to-end
//! encrypted messaging clients.
//!
//! A [`ClientManager`] turns a [`Signer`], a 32-byte [`EncryptionKey`] and
//! [`ClientOptions`] into a ready [`Client`]:
//!
//! 1. the [`EnvironmentResolver`] picks an isolated [`Namespace`] for the
//!    identity and environment;
//! 2. the namespace's encrypted store is opened or created;
//! 3. the [`registry`] is consulted and, for a new store, an installation is
//!    signed for and registered;
//! 4. the [`IdentityNetwork`] collaborator is told about it.
//!
//! ```no_run
//! # async fn demo(signer: impl inboxkit_core::Signer) -> inboxkit_core::ClientResult<()> {
//! use inboxkit_core::{ClientManager, ClientOptions, EncryptionKey, Environment};
//!
//! let manager = ClientManager::new();
//! let key = EncryptionKey::from_bytes([7u8; 32]);
//! let options = ClientOptions::default().with_env(Environment::Dev);
//!
//! let client = manager.create(&signer, &key, &options).await?;
//! let installation_id = *client.installation_id();
//! manager.logout(client, false)?;
//!
//! let client = manager.build(&signer.identity(), &key, &options).await?;
//! assert_eq!(client.installation_id(), &installation_id);
//! # Ok(())
//! # }
//! ```
#![deny(clippy::all, clippy::pedantic, clippy::nursery)]

mod client;
pub use client::*;

mod environment;
pub use environment::*;

mod error;
pub use error::*;

mod identity;
pub use identity::*;

pub mod logger;

mod network;
pub use network::*;

mod options;
pub use options::*;

pub mod registry;
pub use registry::{Authorization, Installation, InstallationId};

mod signer;
pub use signer::{signature_text, Signer, SignerError, SignerKind};

pub use inboxkit_db::{DbError, EncryptionKey};
