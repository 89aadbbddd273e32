//! Rotation policy
//!
//! Decides which certificates must be regenerated before the control plane
//! uses them. A certificate that is not valid right now is always flagged.
//! Otherwise the safety margin depends on the total lifetime:
//!
//! | lifetime          | flagged when remaining is under |
//! |-------------------|---------------------------------|
//! | under 5 years     | 7 months                        |
//! | 5 years or longer | 18 months                       |
//!
//! The margins are fixed and not derived from the lifetime. A month is 30
//! days.

use time::{Duration, OffsetDateTime};
use tracing::debug;

use crate::chains::CertificateChains;
use crate::error::{display_path, Result};
use crate::info::CertificateInfo;

/// Length of a month for rotation purposes
pub const MONTH: Duration = Duration::days(30);

/// Remaining lifetime under which a short-lived certificate is regenerated
pub const SHORT_LIVED_MARGIN: Duration = Duration::days(7 * 30);

/// Remaining lifetime under which a long-lived certificate is regenerated
pub const LONG_LIVED_MARGIN: Duration = Duration::days(18 * 30);

/// Whether `cert` must be regenerated at `now`
pub fn needs_regeneration(cert: &CertificateInfo, now: OffsetDateTime) -> bool {
    if !cert.is_valid_at(now) {
        return true;
    }
    let margin = if cert.is_short_lived() {
        SHORT_LIVED_MARGIN
    } else {
        LONG_LIVED_MARGIN
    };
    cert.remaining(now) < margin
}

/// Paths of every certificate in the tree that must be regenerated, in
/// walk order
pub fn certs_to_regenerate(chains: &CertificateChains, now: OffsetDateTime) -> Result<Vec<Vec<String>>> {
    let mut flagged = Vec::new();
    chains.walk_chains::<&str, _>(None, |path, cert| {
        if needs_regeneration(cert, now) {
            debug!(
                path = %display_path(path),
                not_after = %cert.not_after,
                "Certificate is due for regeneration"
            );
            flagged.push(path.to_vec());
        }
        Ok(())
    })?;
    Ok(flagged)
}
