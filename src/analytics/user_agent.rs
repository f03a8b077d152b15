//! User-Agent heuristics for OS, browser and device
//!
//! All checks are ordered. Many UA strings are supersets of others (Edge
//! carries "Chrome", Chrome carries "Safari"), so the first match wins and
//! the order of the tables below must not change.

use regex::Regex;
use std::sync::LazyLock;

use crate::models::{Browser, Os};

/// Compile a constant pattern; failure is a programming error
fn compile_pattern(pattern: &str) -> Regex {
    Regex::new(pattern)
        .unwrap_or_else(|e| panic!("invalid user agent pattern '{pattern}': {e}"))
}

static IOS_DEVICE: LazyLock<Regex> = LazyLock::new(|| compile_pattern(r"\b(iphone|ipad|ipod)\b"));

static ANDROID: LazyLock<Regex> = LazyLock::new(|| {
    compile_pattern(r"\bandroid\b|\bsilk\b|\bkindle\b|\bkftt\b|\bkfps\b|\bkf[a-z]{2,}\b")
});

static AMAZON_TABLET: LazyLock<Regex> =
    LazyLock::new(|| compile_pattern(r"\bsilk\b|\bkindle\b|\bkf[a-z]{2,}\b"));

/// Detect the OS family. iOS is tested before Android.
pub fn detect_os(user_agent: &str) -> Os {
    let ua = user_agent.to_lowercase();

    // Older iPadOS reports a desktop Safari UA but keeps the "Mobile" token
    if IOS_DEVICE.is_match(&ua) || (ua.contains("mac os x") && ua.contains("mobile")) {
        Os::Ios
    } else if ANDROID.is_match(&ua) {
        Os::Android
    } else {
        Os::Other
    }
}

const BROWSER_TOKENS: &[(Browser, &[&str])] = &[
    (Browser::Edge, &["edg/", "edge/", "edga/", "edgios/"]),
    (Browser::Opera, &["opr/", "opera", "opios/"]),
    (Browser::Samsung, &["samsungbrowser"]),
    (Browser::Chrome, &["chrome/", "crios/", "chromium/"]),
    (Browser::Firefox, &["firefox/", "fxios/"]),
    (Browser::Safari, &["safari/"]),
];

pub fn detect_browser(user_agent: &str) -> Browser {
    let ua = user_agent.to_lowercase();

    for (browser, tokens) in BROWSER_TOKENS {
        if tokens.iter().any(|t| ua.contains(t)) {
            return *browser;
        }
    }

    // In-app web views on iOS drop the Safari token but keep WebKit + Mobile
    if ua.contains("applewebkit") && ua.contains("mobile/") && IOS_DEVICE.is_match(&ua) {
        return Browser::Safari;
    }

    Browser::Other
}

const ANDROID_OEMS: &[(&str, &[&str])] = &[
    ("Samsung", &["samsung", "sm-"]),
    ("Pixel", &["pixel"]),
    ("Huawei", &["huawei", "honor"]),
    ("Xiaomi", &["xiaomi", "redmi", "poco"]),
    ("OnePlus", &["oneplus"]),
    ("Oppo", &["oppo", "cph"]),
    ("Motorola", &["moto"]),
];

const DESKTOP_TOKENS: &[(&str, &[&str])] = &[
    ("Mac", &["macintosh", "mac os x"]),
    ("Windows", &["windows"]),
    ("ChromeOS", &["cros"]),
    ("Linux", &["linux", "x11"]),
];

pub fn detect_device(user_agent: &str) -> String {
    let ua = user_agent.to_lowercase();

    if ua.contains("ipad") {
        return "iPad".to_string();
    }
    if ua.contains("iphone") {
        return "iPhone".to_string();
    }
    if ua.contains("ipod") {
        return "iPod".to_string();
    }

    if detect_os(user_agent) == Os::Android {
        if AMAZON_TABLET.is_match(&ua) {
            return "Kindle Fire".to_string();
        }
        for (label, tokens) in ANDROID_OEMS {
            if tokens.iter().any(|t| ua.contains(t)) {
                return (*label).to_string();
            }
        }
        return "Android".to_string();
    }

    // Legacy iPadOS desktop UA
    if ua.contains("mac os x") && ua.contains("mobile") {
        return "iPad".to_string();
    }

    for (label, tokens) in DESKTOP_TOKENS {
        if tokens.iter().any(|t| ua.contains(t)) {
            return (*label).to_string();
        }
    }

    "Other".to_string()
}

/// Truncate to at most `max_chars` characters on a char boundary
pub fn truncate_chars(value: &str, max_chars: usize) -> String {
    value.chars().take(max_chars).collect()
}
