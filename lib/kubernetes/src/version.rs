use serde::Deserialize;

/// Info contains versioning information. how we'll want to distribute that information
#[derive(Deserialize, Debug)]
pub struct Version {
    /// Major version of the ApiServer
    pub major: String,

    /// Minor version of the ApiServer, managed services might append a `+`
    /// to it, e.g. "32+"
    pub minor: String,

    #[serde(default, rename = "gitVersion")]
    pub git_version: String,

    #[serde(default)]
    pub platform: String,
}

impl Version {
    /// Returns true if the server is at least `major.minor`
    pub fn at_least(&self, major: u32, minor: u32) -> bool {
        let parse = |s: &str| {
            s.trim_end_matches(|c: char| !c.is_ascii_digit())
                .parse::<u32>()
                .ok()
        };

        match (parse(&self.major), parse(&self.minor)) {
            (Some(got_major), Some(got_minor)) => (got_major, got_minor) >= (major, minor),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn version(major: &str, minor: &str) -> Version {
        Version {
            major: major.into(),
            minor: minor.into(),
            git_version: String::new(),
            platform: String::new(),
        }
    }

    #[test]
    fn compare() {
        assert!(version("1", "32").at_least(1, 32));
        assert!(version("1", "33+").at_least(1, 32));
        assert!(version("2", "0").at_least(1, 32));
        assert!(!version("1", "27").at_least(1, 32));
        assert!(!version("", "").at_least(1, 32));
    }
}
