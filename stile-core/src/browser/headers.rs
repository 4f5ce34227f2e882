use rand::seq::SliceRandom;

use crate::config::HeadersSection;

/// One User-Agent + Sec-CH-UA pairing, bound to a session for its lifetime.
#[derive(Debug, Clone)]
pub struct HeaderProfile {
    pub browser: String,
    pub version: String,
    pub user_agent: String,
    pub sec_ch_ua: String,
}

// (browser, version, user_agent, sec_ch_ua). Chromium-family desktop
// profiles; all supported variants draw from the same family.
const BUILTIN_PROFILES: &[(&str, &str, &str, &str)] = &[
    (
        "chrome",
        "139",
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/139.0.0.0 Safari/537.36",
        "\"Not;A=Brand\";v=\"99\", \"Google Chrome\";v=\"139\", \"Chromium\";v=\"139\"",
    ),
    (
        "chrome",
        "138",
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/138.0.0.0 Safari/537.36",
        "\"Not)A;Brand\";v=\"8\", \"Chromium\";v=\"138\", \"Google Chrome\";v=\"138\"",
    ),
    (
        "chrome",
        "137",
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/137.0.0.0 Safari/537.36",
        "\"Google Chrome\";v=\"137\", \"Chromium\";v=\"137\", \"Not/A)Brand\";v=\"24\"",
    ),
    (
        "chrome",
        "136",
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/136.0.0.0 Safari/537.36",
        "\"Chromium\";v=\"136\", \"Google Chrome\";v=\"136\", \"Not.A/Brand\";v=\"99\"",
    ),
    (
        "edge",
        "139",
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/139.0.0.0 Safari/537.36 Edg/139.0.0.0",
        "\"Not;A=Brand\";v=\"99\", \"Microsoft Edge\";v=\"139\", \"Chromium\";v=\"139\"",
    ),
    (
        "edge",
        "138",
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/138.0.0.0 Safari/537.36 Edg/138.0.0.0",
        "\"Not)A;Brand\";v=\"8\", \"Chromium\";v=\"138\", \"Microsoft Edge\";v=\"138\"",
    ),
    (
        "edge",
        "137",
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/137.0.0.0 Safari/537.36 Edg/137.0.0.0",
        "\"Microsoft Edge\";v=\"137\", \"Chromium\";v=\"137\", \"Not/A)Brand\";v=\"24\"",
    ),
    (
        "brave",
        "139",
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/139.0.0.0 Safari/537.36",
        "\"Not;A=Brand\";v=\"99\", \"Brave\";v=\"139\", \"Chromium\";v=\"139\"",
    ),
    (
        "brave",
        "138",
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/138.0.0.0 Safari/537.36",
        "\"Not)A;Brand\";v=\"8\", \"Chromium\";v=\"138\", \"Brave\";v=\"138\"",
    ),
    (
        "brave",
        "137",
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/137.0.0.0 Safari/537.36",
        "\"Brave\";v=\"137\", \"Chromium\";v=\"137\", \"Not/A)Brand\";v=\"24\"",
    ),
];

fn profile_from_row(row: &(&str, &str, &str, &str)) -> HeaderProfile {
    HeaderProfile {
        browser: row.0.to_string(),
        version: row.1.to_string(),
        user_agent: row.2.to_string(),
        sec_ch_ua: row.3.to_string(),
    }
}

/// Draws header profiles for new sessions: a static User-Agent override
/// wins, then a pinned browser/version, then a random builtin profile.
#[derive(Debug, Clone, Default)]
pub struct HeaderProfilePool {
    static_user_agent: Option<String>,
    pinned: Option<HeaderProfile>,
}

impl HeaderProfilePool {
    pub fn from_config(section: &HeadersSection) -> Self {
        let pinned = match (&section.browser, &section.version) {
            (Some(browser), Some(version)) => Self::lookup(browser, version),
            _ => None,
        };
        Self {
            static_user_agent: section.user_agent.clone(),
            pinned,
        }
    }

    pub fn lookup(browser: &str, version: &str) -> Option<HeaderProfile> {
        BUILTIN_PROFILES
            .iter()
            .find(|row| row.0 == browser && row.1 == version)
            .map(profile_from_row)
    }

    pub fn select(&self) -> HeaderProfile {
        if let Some(user_agent) = &self.static_user_agent {
            return HeaderProfile {
                browser: "custom".to_string(),
                version: "custom".to_string(),
                user_agent: user_agent.clone(),
                sec_ch_ua: String::new(),
            };
        }
        if let Some(profile) = &self.pinned {
            return profile.clone();
        }
        let mut rng = rand::thread_rng();
        let row = BUILTIN_PROFILES
            .choose(&mut rng)
            .unwrap_or(&BUILTIN_PROFILES[0]);
        profile_from_row(row)
    }
}
