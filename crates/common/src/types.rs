use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Declares a UUID-backed identifier newtype.
///
/// Every identifier is opaque to the domain: it can be compared, hashed,
/// ordered and serialized, but carries no internal structure.
macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Creates a new random identifier.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Creates an identifier from an existing UUID.
            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Returns the underlying UUID.
            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

uuid_id!(
    /// Unique identifier for an aggregate instance in the event store.
    ///
    /// Domain identifiers convert into this key when their aggregate is loaded
    /// or appended, so a ticket, a list and an allocator never share a stream
    /// unless they share a UUID.
    AggregateId
);

uuid_id!(
    /// Identifies one allocation transaction (a ticket allocator saga instance).
    AllocatorId
);

uuid_id!(
    /// Identifies a single ticket aggregate.
    TicketId
);

uuid_id!(
    /// Identifies a ticket list (pick list) that tickets are assigned onto.
    TicketListId
);

macro_rules! into_aggregate_id {
    ($($name:ident),*) => {
        $(
            impl From<$name> for AggregateId {
                fn from(id: $name) -> Self {
                    AggregateId(id.0)
                }
            }
        )*
    };
}

into_aggregate_id!(AllocatorId, TicketId, TicketListId);
