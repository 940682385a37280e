use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

static BOT_SIGNATURE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)bot|crawler|spider|scraper|headless|curl/|python-requests")
        .expect("bot signature pattern is valid")
});

static MOBILE_SIGNATURE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)mobile|android|iphone|ipad")
        .expect("mobile signature pattern is valid")
});

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Mobile,
    Desktop,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceInfo {
    pub device: DeviceKind,
    pub platform: String,
    pub browser: String,
}

pub fn is_bot_user_agent(user_agent: &str) -> bool {
    BOT_SIGNATURE.is_match(user_agent)
}

pub fn parse_user_agent(user_agent: &str) -> DeviceInfo {
    let ua = user_agent.to_lowercase();

    let device = if MOBILE_SIGNATURE.is_match(user_agent) {
        DeviceKind::Mobile
    } else {
        DeviceKind::Desktop
    };

    let platform = if ua.contains("android") {
        "android"
    } else if ua.contains("iphone") || ua.contains("ipad") || ua.contains("ios") {
        "ios"
    } else if ua.contains("windows") {
        "windows"
    } else if ua.contains("mac os") || ua.contains("macintosh") {
        "mac"
    } else if ua.contains("linux") {
        "linux"
    } else {
        "unknown"
    };

    // Order matters: Edge and Chrome UAs also mention Safari.
    let browser = if ua.contains("edg/") {
        "edge"
    } else if ua.contains("chrome") {
        "chrome"
    } else if ua.contains("firefox") {
        "firefox"
    } else if ua.contains("safari") {
        "safari"
    } else {
        "unknown"
    };

    DeviceInfo {
        device,
        platform: platform.to_string(),
        browser: browser.to_string(),
    }
}
