//! Two-slot placeholder substitution for conversation bodies.
//!
//! Template bodies address the two parties through fixed placeholders:
//! the campaign persona and the pool persona. Both turns of a
//! conversation use the same mapping; only who is speaking changes.

/// Placeholder for the warmed-up mailbox's persona.
pub const CAMPAIGN_SLOT: &str = "{{test_user1}}";

/// Placeholder for the receiver pool mailbox's persona.
pub const POOL_SLOT: &str = "{{test_user2}}";

/// Substitute both personas into a step body. Names are bolded, matching
/// the HTML bodies the templates are written in.
#[must_use]
pub fn render(body: &str, campaign_name: &str, pool_name: &str) -> String {
    body.replace(CAMPAIGN_SLOT, &format!("<b>{campaign_name}</b>"))
        .replace(POOL_SLOT, &format!("<b>{pool_name}</b>"))
}
