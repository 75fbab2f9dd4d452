//! User-Agent string sent with every archive request.
//!
//! Public archives ask automated clients to identify themselves; a stable,
//! versioned UA lets operators tell this tool's traffic apart.

/// Tool identifier placed before the version.
const PRODUCT: &str = "archive-access";

/// Default User-Agent for archive requests.
#[must_use]
pub fn default_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("{PRODUCT}/{version} (polite-archive-client; rust-reqwest)")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_agent_carries_product_and_version() {
        let ua = default_user_agent();
        assert_eq!(
            Some(env!("CARGO_PKG_VERSION")),
            ua.strip_prefix("archive-access/")
                .and_then(|s| s.split(' ').next()),
            "UA must contain crate version: {ua}"
        );
        assert!(ua.contains("polite-archive-client"));
    }
}
