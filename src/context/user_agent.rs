//! Coarse User-Agent classification.
//!
//! Only the platform and browser family are extracted, using the lowercase
//! names earlier records were issued with (`windows`, `linux`, `firefox`, ...).
//! Order matters: Edge and Opera advertise Chrome, Chrome advertises Safari,
//! Android advertises Linux.

/// Platform and browser family. `None` when unrecognized.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClientSoftware {
    pub os: Option<&'static str>,
    pub browser: Option<&'static str>,
}

const PLATFORMS: &[(&str, &str)] = &[
    ("iphone", "iphone"),
    ("ipad", "ipad"),
    ("android", "android"),
    ("cros", "chromeos"),
    ("windows", "windows"),
    ("macintosh", "macos"),
    ("mac os x", "macos"),
    ("linux", "linux"),
    ("freebsd", "freebsd"),
];

const BROWSERS: &[(&str, &str)] = &[
    ("edg/", "edge"),
    ("edge/", "edge"),
    ("opr/", "opera"),
    ("opera", "opera"),
    ("firefox/", "firefox"),
    ("fxios/", "firefox"),
    ("chrome/", "chrome"),
    ("crios/", "chrome"),
    ("safari/", "safari"),
    ("msie ", "msie"),
    ("trident/", "msie"),
];

pub fn parse(user_agent: &str) -> ClientSoftware {
    let ua = user_agent.to_ascii_lowercase();
    let find = |table: &[(&str, &'static str)]| {
        table
            .iter()
            .find(|(needle, _)| ua.contains(needle))
            .map(|(_, name)| *name)
    };

    ClientSoftware {
        os: find(PLATFORMS),
        browser: find(BROWSERS),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(ua: &str, os: Option<&str>, browser: Option<&str>) {
        let parsed = parse(ua);
        assert_eq!(parsed.os, os, "{ua}");
        assert_eq!(parsed.browser, browser, "{ua}");
    }

    #[test]
    fn desktop_browsers() {
        check(
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/129.0.0.0 Safari/537.36",
            Some("windows"),
            Some("chrome"),
        );
        check(
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/129.0.0.0 Safari/537.36 Edg/129.0.2792.79",
            Some("windows"),
            Some("edge"),
        );
        check(
            "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_6) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.6 Safari/605.1.15",
            Some("macos"),
            Some("safari"),
        );
        check(
            "Mozilla/5.0 (X11; Linux x86_64; rv:131.0) Gecko/20100101 Firefox/131.0",
            Some("linux"),
            Some("firefox"),
        );
    }

    #[test]
    fn mobile_browsers() {
        check(
            "Mozilla/5.0 (Linux; Android 14; Pixel 8) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/129.0.0.0 Mobile Safari/537.36",
            Some("android"),
            Some("chrome"),
        );
        check(
            "Mozilla/5.0 (iPhone; CPU iPhone OS 17_6 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) CriOS/129.0 Mobile/15E148 Safari/604.1",
            Some("iphone"),
            Some("chrome"),
        );
    }

    #[test]
    fn unrecognized_agents() {
        check("curl/8.5.0", None, None);
        check("", None, None);
    }
}
