use crate::{Result, VaultError};

pub const MAX_SITE_ID_LEN: usize = 63;

/// Checks that a site id is usable both as a key segment and a DNS label.
pub fn validate_site_id(site_id: &str) -> Result<()> {
    if site_id.is_empty() || site_id.len() > MAX_SITE_ID_LEN {
        return Err(VaultError::InvalidSiteId(format!(
            "length must be between 1 and {} characters",
            MAX_SITE_ID_LEN
        )));
    }

    if !site_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(VaultError::InvalidSiteId(format!(
            "{}: only letters, digits, '-' and '_' are allowed",
            site_id
        )));
    }

    let edge = |c: char| c == '-' || c == '_';
    if site_id.starts_with(edge) || site_id.ends_with(edge) {
        return Err(VaultError::InvalidSiteId(format!(
            "{}: must start and end with a letter or digit",
            site_id
        )));
    }

    Ok(())
}

pub fn domain_label(site_id: &str) -> String {
    site_id.to_ascii_lowercase().replace('_', "-")
}

pub fn site_prefix(site_id: &str) -> String {
    format!("site/{}/", site_id)
}

/// Key of a file entry. `path` must already be normalized.
pub fn entry_key(site_id: &str, path: &str) -> String {
    format!("site/{}/file/{}", site_id, path)
}

pub fn metadata_key(site_id: &str) -> String {
    format!("site/{}/meta", site_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_ids() {
        for id in ["blog", "my-site", "my_site_2", "A1"] {
            assert!(validate_site_id(id).is_ok(), "{id}");
        }
    }

    #[test]
    fn rejects_bad_ids() {
        let long = "a".repeat(MAX_SITE_ID_LEN + 1);
        for id in ["", "-lead", "trail_", "has space", "dot.ted", "../x", long.as_str()] {
            assert!(
                matches!(validate_site_id(id), Err(VaultError::InvalidSiteId(_))),
                "{id}"
            );
        }
    }

    #[test]
    fn domain_label_is_deterministic() {
        assert_eq!(domain_label("My_Site"), "my-site");
        assert_eq!(domain_label("My_Site"), domain_label("My_Site"));
    }

    #[test]
    fn metadata_key_never_collides_with_files() {
        assert_ne!(metadata_key("blog"), entry_key("blog", "meta"));
        assert!(entry_key("blog", "index.html").starts_with(&site_prefix("blog")));
        assert!(metadata_key("blog").starts_with(&site_prefix("blog")));
    }
}
