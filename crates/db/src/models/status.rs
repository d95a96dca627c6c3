//! Status ids mapping to the `job_statuses` lookup table.
//!
//! Discriminants match the seed order (1-based) of the migration.

use procapi_core::status::JobStatus;

/// Status ID type matching SMALLINT/SMALLSERIAL in the database.
pub type StatusId = i16;

macro_rules! define_status_enum {
    (
        $(#[$meta:meta])*
        $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident = $val:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[repr(i16)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub enum $name {
            $( $(#[$vmeta])* $variant = $val ),+
        }

        impl $name {
            /// Return the database status ID.
            pub fn id(self) -> StatusId {
                self as StatusId
            }

            /// Look up a variant by database status ID.
            pub fn from_id(id: StatusId) -> Option<Self> {
                match id {
                    $( $val => Some(Self::$variant), )+
                    _ => None,
                }
            }
        }

        impl From<$name> for StatusId {
            fn from(value: $name) -> Self {
                value as StatusId
            }
        }
    };
}

define_status_enum! {
    /// Job lifecycle status as stored.
    JobStatusId {
        Accepted = 1,
        Running = 2,
        Successful = 3,
        Failed = 4,
        Dismissed = 5,
    }
}

impl From<JobStatus> for JobStatusId {
    fn from(status: JobStatus) -> Self {
        match status {
            JobStatus::Accepted => Self::Accepted,
            JobStatus::Running => Self::Running,
            JobStatus::Successful => Self::Successful,
            JobStatus::Failed => Self::Failed,
            JobStatus::Dismissed => Self::Dismissed,
        }
    }
}

impl From<JobStatusId> for JobStatus {
    fn from(id: JobStatusId) -> Self {
        match id {
            JobStatusId::Accepted => Self::Accepted,
            JobStatusId::Running => Self::Running,
            JobStatusId::Successful => Self::Successful,
            JobStatusId::Failed => Self::Failed,
            JobStatusId::Dismissed => Self::Dismissed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_round_trip_every_status() {
        for status in JobStatus::ALL {
            let id = JobStatusId::from(status).id();
            let back = JobStatusId::from_id(id).map(JobStatus::from);
            assert_eq!(back, Some(status));
        }
    }

    #[test]
    fn unknown_id_is_none() {
        assert_eq!(JobStatusId::from_id(0), None);
        assert_eq!(JobStatusId::from_id(6), None);
    }
}
