//! Closed vocabularies for every status, type and role column.
//!
//! Each enum serializes to the exact string stored in the database so rows written
//! by older tooling stay readable. Parsing is case-insensitive and treats `_`, `-`
//! and spaces as equivalent separators.

use serde::{Deserialize, Serialize};

use crate::error::LifecycleError;

macro_rules! string_enum {
    (
        $(#[$meta:meta])*
        $name:ident {
            $($(#[$variant_meta:meta])* $variant:ident => $text:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(
                $(#[$variant_meta])*
                #[serde(rename = $text)]
                $variant,
            )+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text,)+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = LifecycleError;

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                let normalized = normalize_token(value);
                $name::ALL
                    .iter()
                    .copied()
                    .find(|candidate| normalize_token(candidate.as_str()) == normalized)
                    .ok_or_else(|| {
                        LifecycleError::InvalidInput(format!(
                            "unsupported {} value: {value:?}",
                            stringify!($name)
                        ))
                    })
            }
        }
    };
}

fn normalize_token(value: &str) -> String {
    value
        .trim()
        .to_ascii_lowercase()
        .replace(['_', '-'], " ")
}

string_enum! {
    /// What the client intends to do with the property.
    ClaimType {
        Sale => "sale",
        Rent => "rent",
    }
}

string_enum! {
    /// Service line a claim belongs to.
    ClaimSource {
        Brokerage => "brokerage",
        RentalPropertyManagement => "rental_property_management",
    }
}

string_enum! {
    FinalStatus {
        Pending => "pending",
        Completed => "completed",
        Cancelled => "cancelled",
    }
}

string_enum! {
    PaymentType {
        Deposit => "deposit",
        /// Reservation fee; its confirmation takes the property off the market.
        Claim => "claim",
        Rent => "rent",
        Application => "application",
        Owner => "owner",
        Client => "client",
    }
}

string_enum! {
    PaymentStatus {
        Pending => "pending",
        Confirmed => "confirmed",
    }
}

string_enum! {
    Availability {
        Available => "available",
        Reserved => "reserved",
        Unavailable => "unavailable",
    }
}

string_enum! {
    PaymentFrequency {
        Monthly => "monthly",
        Quarterly => "quarterly",
        Yearly => "yearly",
    }
}

impl PaymentFrequency {
    /// Number of calendar months covered by one invoice.
    pub fn interval_months(&self) -> u32 {
        match self {
            PaymentFrequency::Monthly => 1,
            PaymentFrequency::Quarterly => 3,
            PaymentFrequency::Yearly => 12,
        }
    }

    /// Reads a stored frequency, falling back to monthly billing for values
    /// outside the vocabulary.
    pub fn from_stored(value: &str) -> Self {
        value.parse().unwrap_or(PaymentFrequency::Monthly)
    }
}

string_enum! {
    RevisionUnit {
        Month => "month",
        Year => "year",
    }
}

string_enum! {
    ContractStatus {
        Pending => "pending",
        Active => "active",
        Terminated => "terminated",
        /// Replaced by a renewal row; kept for history.
        Superseded => "superseded",
    }
}

string_enum! {
    TerminationType {
        Notice => "notice",
        Immediate => "immediate",
        Mutual => "mutual",
        Expiry => "expiry",
    }
}

string_enum! {
    WarningType {
        Automatic => "automatic",
        Manual => "manual",
    }
}

string_enum! {
    NoticeStatus {
        Active => "active",
        Cancelled => "cancelled",
    }
}

string_enum! {
    ActorRole {
        Client => "client",
        Owner => "owner",
        Accountant => "accountant",
        Manager => "manager",
        GeneralManager => "general manager",
        FieldAgent => "field agent",
        /// Background jobs acting without a human session.
        System => "system",
    }
}

impl ActorRole {
    pub fn is_staff(&self) -> bool {
        matches!(
            self,
            ActorRole::Accountant
                | ActorRole::Manager
                | ActorRole::GeneralManager
                | ActorRole::FieldAgent
                | ActorRole::System
        )
    }
}

string_enum! {
    SignatoryParty {
        Client => "client",
        Owner => "owner",
    }
}
