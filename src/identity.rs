//! Acting identities.
//!
//! Registered users carry their numeric account id; anonymous participants
//! carry an opaque UUID minted by the embedding application's session layer.
//! Admin standing is an explicit input on every operation, never ambient
//! state, so the same identity can act as a participant in one call and as
//! an administrator in the next.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Who is acting: a registered user or an anonymous guest.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Identity {
    User(i64),
    Guest(Uuid),
}

impl Identity {
    pub fn user_id(&self) -> Option<i64> {
        match self {
            Identity::User(id) => Some(*id),
            Identity::Guest(_) => None,
        }
    }

    pub fn guest_id(&self) -> Option<Uuid> {
        match self {
            Identity::User(_) => None,
            Identity::Guest(id) => Some(*id),
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identity::User(id) => write!(f, "user:{id}"),
            Identity::Guest(id) => write!(f, "guest:{id}"),
        }
    }
}

/// An identity plus the standing and origin it acts with.
#[derive(Clone, Debug)]
pub struct Actor {
    pub identity: Identity,
    pub admin: bool,
    /// Recorded on audit entries when known.
    pub remote_addr: Option<String>,
}

impl Actor {
    /// A registered user acting as a participant.
    pub fn user(id: i64) -> Actor {
        Actor { identity: Identity::User(id), admin: false, remote_addr: None }
    }

    /// An anonymous guest acting as a participant.
    pub fn guest(id: Uuid) -> Actor {
        Actor { identity: Identity::Guest(id), admin: false, remote_addr: None }
    }

    /// Any identity acting with administrator standing.
    pub fn admin(identity: Identity) -> Actor {
        Actor { identity, admin: true, remote_addr: None }
    }

    pub fn with_remote_addr(mut self, addr: impl Into<String>) -> Actor {
        self.remote_addr = Some(addr.into());
        self
    }
}
