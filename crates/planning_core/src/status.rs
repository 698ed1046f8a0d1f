use std::fmt;

use serde::{Deserialize, Serialize};

/// Closed set of lifecycle states a planning application can be in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ApplicationStatus {
    Pending,
    Approved,
    Refused,
    Withdrawn,
    Invalid,
    Appeal,
    #[default]
    Unknown,
}

impl ApplicationStatus {
    pub const ALL: [ApplicationStatus; 7] = [
        ApplicationStatus::Pending,
        ApplicationStatus::Approved,
        ApplicationStatus::Refused,
        ApplicationStatus::Withdrawn,
        ApplicationStatus::Invalid,
        ApplicationStatus::Appeal,
        ApplicationStatus::Unknown,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ApplicationStatus::Pending => "pending",
            ApplicationStatus::Approved => "approved",
            ApplicationStatus::Refused => "refused",
            ApplicationStatus::Withdrawn => "withdrawn",
            ApplicationStatus::Invalid => "invalid",
            ApplicationStatus::Appeal => "appeal",
            ApplicationStatus::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ApplicationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// Order matters: "invalid" must be tested before anything matching "valid",
// and appeals/withdrawals win over the decision words they often contain.
const KEYWORDS: &[(&str, ApplicationStatus)] = &[
    ("appeal", ApplicationStatus::Appeal),
    ("withdrawn", ApplicationStatus::Withdrawn),
    ("withdraw", ApplicationStatus::Withdrawn),
    ("invalid", ApplicationStatus::Invalid),
    ("incomplete", ApplicationStatus::Invalid),
    ("refus", ApplicationStatus::Refused),
    ("reject", ApplicationStatus::Refused),
    ("declin", ApplicationStatus::Refused),
    ("approv", ApplicationStatus::Approved),
    ("grant", ApplicationStatus::Approved),
    ("permitted", ApplicationStatus::Approved),
    ("no objection", ApplicationStatus::Approved),
    ("pending", ApplicationStatus::Pending),
    ("registered", ApplicationStatus::Pending),
    ("received", ApplicationStatus::Pending),
    ("consultation", ApplicationStatus::Pending),
    ("under consideration", ApplicationStatus::Pending),
    ("awaiting", ApplicationStatus::Pending),
    ("in progress", ApplicationStatus::Pending),
    ("validated", ApplicationStatus::Pending),
];

/// Map free-form council status text onto [`ApplicationStatus`].
///
/// Total: unrecognised text maps to `Unknown`. Idempotent: feeding the
/// `as_str()` of any result back in yields the same variant.
pub fn normalize_status(text: &str) -> ApplicationStatus {
    let lowered = text.trim().to_lowercase();
    if lowered.is_empty() {
        return ApplicationStatus::Unknown;
    }
    KEYWORDS
        .iter()
        .find(|(keyword, _)| lowered.contains(keyword))
        .map(|(_, status)| *status)
        .unwrap_or(ApplicationStatus::Unknown)
}
