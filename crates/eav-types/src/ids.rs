//! Integer identifiers allocated by the backend's monotonic id source.

use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(i64);

        impl $name {
            /// Wrap a raw backend id.
            pub const fn new(raw: i64) -> Self {
                Self(raw)
            }

            /// The raw backend id.
            pub const fn get(self) -> i64 {
                self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, ":{}"), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(raw: i64) -> Self {
                Self(raw)
            }
        }

        impl From<$name> for i64 {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

define_id!(
    /// Identity of a persisted entity (`objects.id`).
    EntityId,
    "obj"
);
define_id!(
    /// Identity of a scheme (`schemes.id`).
    SchemeId,
    "scheme"
);
define_id!(
    /// Identity of a structure node (`structures.id`).
    StructureId,
    "struct"
);
define_id!(
    /// Identity of a value row (`values.id`).
    ValueId,
    "val"
);
define_id!(
    /// Identity of a list item in an external lookup table.
    ListItemId,
    "item"
);
define_id!(
    /// Identity of a user in the external user directory.
    UserId,
    "user"
);
define_id!(
    /// Identity of an entry in the type catalog (`types.id`).
    StorageTypeId,
    "type"
);
define_id!(
    /// Identity of a persisted purge task.
    PurgeTaskId,
    "purge"
);
