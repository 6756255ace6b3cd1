//! User-agent parsing (SPEC_FULL.md §4.D), via `woothee`.

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UaInfo {
    pub browser_name: String,
    pub browser_version: String,
    pub os_name: String,
    pub os_version: String,
    pub device_type: String,
    pub device_brand: String,
    pub device_model: String,
}

/// Parses `user_agent` deterministically; on any parse failure every field is
/// an empty string rather than the call failing.
pub fn parse_ua(user_agent: &str) -> UaInfo {
    if user_agent.is_empty() {
        return UaInfo::default();
    }

    let Some(result) = woothee::parser::Parser::new().parse(user_agent) else {
        return UaInfo::default();
    };

    let device_type = match result.category {
        "smartphone" | "mobilephone" => "mobile",
        "tablet" => "tablet",
        _ => "desktop",
    }
    .to_string();

    UaInfo {
        browser_name: result.name.to_string(),
        browser_version: result.version.to_string(),
        os_name: result.os.to_string(),
        os_version: result.os_version.to_string(),
        device_type,
        device_brand: String::new(),
        device_model: String::new(),
    }
}
