//! Newtypes for vendor status values to avoid stringly-typed code.

use std::fmt;
use std::ops::Deref;

use serde::Deserialize;

macro_rules! newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wraps a raw vendor value.
            #[must_use]
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Returns the raw vendor value.
            #[must_use]
            pub const fn as_str(&self) -> &str {
                self.0.as_str()
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_owned())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                self.as_str()
            }
        }

        impl Deref for $name {
            type Target = str;
            fn deref(&self) -> &Self::Target {
                self.as_str()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

newtype!(
    /// Status of a serverless containers namespace or container.
    ContainerStatus
);
newtype!(
    /// State of an instance server (`running`, `stopped`, ...).
    ServerState
);
newtype!(
    /// State of a private NIC.
    NicState
);
newtype!(
    /// Action accepted by an instance server.
    ServerAction
);

/// Statuses a namespace or container can be used in.
#[must_use]
pub fn container_ready() -> Vec<ContainerStatus> {
    vec![ContainerStatus::from("ready")]
}

/// Server states reached after power-on.
#[must_use]
pub fn server_running() -> Vec<ServerState> {
    vec![ServerState::from("running")]
}

/// Server states reached after power-off.
#[must_use]
pub fn server_stopped() -> Vec<ServerState> {
    vec![
        ServerState::from("stopped"),
        ServerState::from("stopped in place"),
    ]
}
