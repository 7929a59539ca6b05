use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::lines::{Line, Lines};
use crate::timing::{parse_timestamp, Timestamp};

/// The banner dumpstate prints before its first section:
///
/// ```text
/// ========================================================
/// == dumpstate: 2016-03-18 14:22:05
/// ========================================================
///
/// Build: MRA58K
/// Build fingerprint: 'google/hammerhead/hammerhead:6.0/MRA58K/2256973:userdebug/dev-keys'
/// Kernel: Linux version 3.4.0 ...
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DumpstateHeader {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<Timestamp>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build_fingerprint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bootloader: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub radio: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kernel: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uptime: Option<String>,
}

fn dumpstate_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^== dumpstate: (\d{4}-\d\d-\d\d \d\d:\d\d:\d\d)\s*$").expect("dumpstate regex")
    })
}

fn field_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(Build|Build fingerprint|Bootloader|Radio|Kernel|Uptime): (.*)$").expect("header field regex")
    })
}

/// Reads the dumpstate banner and the key/value lines that follow it.
pub struct HeaderParser;

impl HeaderParser {
    pub fn new() -> Self {
        HeaderParser
    }

    /// Consumes the cursor; meant to be handed the lines before the first
    /// section header.
    pub fn parse(&self, lines: &mut Lines<'_, Line>) -> DumpstateHeader {
        let mut header = DumpstateHeader::default();

        for line in lines.by_ref() {
            if let Some(caps) = dumpstate_re().captures(&line.text) {
                header.start_time = parse_timestamp(&caps[1]);
                continue;
            }
            let caps = match field_re().captures(&line.text) {
                Some(caps) => caps,
                None => continue,
            };
            let value = caps[2].trim().trim_matches('\'').to_string();
            let slot = match &caps[1] {
                "Build" => &mut header.build,
                "Build fingerprint" => &mut header.build_fingerprint,
                "Bootloader" => &mut header.bootloader,
                "Radio" => &mut header.radio,
                "Kernel" => &mut header.kernel,
                _ => &mut header.uptime,
            };
            if slot.is_none() {
                *slot = Some(value);
            }
        }

        header
    }
}

impl Default for HeaderParser {
    fn default() -> Self {
        Self::new()
    }
}
