use std::fmt;

use serde::{Deserialize, Serialize};

/// Row ids are assigned by the store; these wrappers keep a lane id from being
/// passed where a host id is expected.
macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub i64);

        impl $name {
            pub fn get(self) -> i64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(v: i64) -> Self {
                Self(v)
            }
        }
    };
}

id_newtype!(LaneId);
id_newtype!(HostId);
id_newtype!(HostLaneId);
id_newtype!(CommandId);
id_newtype!(LaneFileId);
id_newtype!(RevisionId);
id_newtype!(RevisionWorkId);
id_newtype!(WorkId);
id_newtype!(WorkFileId);
id_newtype!(FileId);
id_newtype!(ObjectId);
