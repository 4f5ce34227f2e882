use rand::seq::SliceRandom;

use crate::config::ProxySection;

/// Pool of upstream proxy endpoints. `STILE_PROXIES` overrides the config;
/// otherwise the configured list plus an optional file are used when proxy
/// support is enabled.
#[derive(Debug, Clone, Default)]
pub struct ProxyPool {
    entries: Vec<String>,
}

impl ProxyPool {
    pub fn from_config(section: &ProxySection) -> Self {
        let mut entries = std::env::var("STILE_PROXIES")
            .unwrap_or_default()
            .split(',')
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .collect::<Vec<_>>();

        if entries.is_empty() && section.enabled {
            entries.extend(section.endpoints.iter().cloned());
            if let Some(path) = &section.file {
                if let Ok(contents) = std::fs::read_to_string(path) {
                    entries.extend(
                        contents
                            .lines()
                            .map(|line| line.trim().to_string())
                            .filter(|value| !value.is_empty()),
                    );
                }
            }
        }

        Self { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn next(&self) -> Option<String> {
        if self.entries.is_empty() {
            None
        } else {
            let mut rng = rand::thread_rng();
            self.entries.choose(&mut rng).cloned()
        }
    }
}
