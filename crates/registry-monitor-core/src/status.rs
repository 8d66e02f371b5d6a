//! Normalized record status.
//!
//! Registries publish free-text status strings ("En Calificación",
//! "Aprobado", "Approved with conditions", ...). [`Status::from_raw`] folds
//! them into a closed set so that snapshots taken on different days compare
//! by meaning rather than by spelling.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Closed set of normalized statuses.
///
/// `Approved` is the terminal value the integrity gate and the change
/// detector care about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    InAdmission,
    UnderReviewActive,
    UnderReviewSuspended,
    Approved,
    Rejected,
    Withdrawn,
    NotAdmitted,
    Other,
}

impl Status {
    pub const ALL: [Status; 8] = [
        Status::InAdmission,
        Status::UnderReviewActive,
        Status::UnderReviewSuspended,
        Status::Approved,
        Status::Rejected,
        Status::Withdrawn,
        Status::NotAdmitted,
        Status::Other,
    ];

    /// Classify a raw registry status string.
    ///
    /// Matching is case-, whitespace- and accent-insensitive. Order matters:
    /// "no admitido" must be checked before "admision", and "desfavorable"
    /// before "favorable".
    pub fn from_raw(raw: &str) -> Status {
        let text = fold(raw);
        if text.is_empty() {
            return Status::Other;
        }

        if text.contains("no admitido") || text.contains("not admitted") {
            return Status::NotAdmitted;
        }
        if text.contains("admision") || text.contains("admission") {
            return Status::InAdmission;
        }
        if text.contains("calificacion") {
            // Only a bare "en calificacion" or an explicit "activo" is active.
            return if text.contains("activo") || text == "en calificacion" {
                Status::UnderReviewActive
            } else {
                Status::UnderReviewSuspended
            };
        }
        if text.contains("under review") {
            return if text.contains("suspend") || text.contains("paused") {
                Status::UnderReviewSuspended
            } else {
                Status::UnderReviewActive
            };
        }
        if text.contains("desfavorable") || text.contains("rechazad") || text.contains("rejected")
        {
            return Status::Rejected;
        }
        if text.contains("aprobad") || text.contains("favorable") || text.contains("approved") {
            return Status::Approved;
        }
        if text.contains("desist") || text.contains("withdraw") {
            return Status::Withdrawn;
        }
        Status::Other
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Status::InAdmission => "in_admission",
            Status::UnderReviewActive => "under_review_active",
            Status::UnderReviewSuspended => "under_review_suspended",
            Status::Approved => "approved",
            Status::Rejected => "rejected",
            Status::Withdrawn => "withdrawn",
            Status::NotAdmitted => "not_admitted",
            Status::Other => "other",
        }
    }

    pub fn is_approved(&self) -> bool {
        matches!(self, Status::Approved)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Status::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| anyhow::anyhow!("unknown normalized status: '{}'", s))
    }
}

/// Lowercase, collapse whitespace, strip Latin accents and control chars.
fn fold(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for word in raw.split_whitespace() {
        if !out.is_empty() {
            out.push(' ');
        }
        for c in word.chars().flat_map(char::to_lowercase) {
            if c.is_control() {
                continue;
            }
            out.push(strip_accent(c));
        }
    }
    out
}

fn strip_accent(c: char) -> char {
    match c {
        'á' | 'à' | 'ä' | 'â' | 'ã' => 'a',
        'é' | 'è' | 'ë' | 'ê' => 'e',
        'í' | 'ì' | 'ï' | 'î' => 'i',
        'ó' | 'ò' | 'ö' | 'ô' | 'õ' => 'o',
        'ú' | 'ù' | 'ü' | 'û' => 'u',
        'ñ' => 'n',
        'ç' => 'c',
        other => other,
    }
}
