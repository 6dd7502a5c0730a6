//! Sender allowlist.

/// Check if a peer is allowed to talk to the bot.
///
/// An empty allowlist means everyone is allowed. Entries are compared
/// case-insensitively against both the full peer ID and its user part (the
/// text before `@`, e.g. the phone number of a WhatsApp JID). `*` matches any
/// run of characters.
pub fn is_allowed(peer_id: &str, allowlist: &[String]) -> bool {
    if allowlist.is_empty() {
        return true;
    }
    let full = peer_id.to_lowercase();
    let user = full.split_once('@').map_or(full.as_str(), |(user, _)| user);
    allowlist.iter().any(|entry| {
        let pattern = entry.trim().trim_start_matches('+').to_lowercase();
        matches_pattern(&pattern, &full) || matches_pattern(&pattern, user)
    })
}

fn matches_pattern(pattern: &str, text: &str) -> bool {
    let Some((head, rest)) = pattern.split_once('*') else {
        return pattern == text;
    };
    let Some(mut remaining) = text.strip_prefix(head) else {
        return false;
    };

    let mut segments: Vec<&str> = rest.split('*').collect();
    let tail = segments.pop().unwrap_or_default();
    for segment in segments.into_iter().filter(|s| !s.is_empty()) {
        match remaining.find(segment) {
            Some(idx) => remaining = &remaining[idx + segment.len()..],
            None => return false,
        }
    }
    remaining.ends_with(tail)
}
