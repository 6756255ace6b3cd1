//! Bot and known-filtered-noise heuristics (part of Component A, SPEC_FULL.md §4.A).

/// Messages the browser itself emits for cross-origin script errors with no
/// useful stack trace. These are filtered, not treated as failures.
const FILTERED_MESSAGES: &[&str] = &["Script error.", "Script error"];

const BOT_UA_PATTERNS: &[&str] = &[
    "bot", "spider", "crawl", "slurp", "bingpreview", "facebookexternalhit", "headlesschrome",
    "pingdom", "uptimerobot", "monitor", "curl", "wget", "python-requests", "go-http-client",
];

pub fn is_known_bot_user_agent(user_agent: &str) -> bool {
    if user_agent.trim().is_empty() {
        return true;
    }
    let lower = user_agent.to_lowercase();
    BOT_UA_PATTERNS.iter().any(|pattern| lower.contains(pattern))
}

pub fn is_filtered_message(message: &str) -> bool {
    FILTERED_MESSAGES.iter().any(|filtered| filtered == &message.trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_common_bot_user_agents() {
        assert!(is_known_bot_user_agent("Mozilla/5.0 (compatible; Googlebot/2.1)"));
        assert!(is_known_bot_user_agent("curl/8.4.0"));
        assert!(is_known_bot_user_agent(""));
    }

    #[test]
    fn allows_ordinary_browser_user_agents() {
        assert!(!is_known_bot_user_agent(
            "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15"
        ));
    }

    #[test]
    fn filters_cross_origin_script_error() {
        assert!(is_filtered_message("Script error."));
        assert!(!is_filtered_message("TypeError: x is not a function"));
    }
}
