use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;
use url::Url;

const MAX_SLUG_CHARS: usize = 256;
const MAX_VIEWER_ID_CHARS: usize = 128;

static EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email pattern is valid"));

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Email is required")]
    MissingEmail,

    #[error("Invalid email address")]
    InvalidEmail,

    #[error("Webhook URL is required")]
    MissingWebhookUrl,

    #[error("Invalid URL format")]
    InvalidUrl,

    #[error("URL must start with http:// or https://")]
    UnsupportedScheme,

    #[error("Slug required")]
    MissingSlug,

    #[error("Invalid slug")]
    InvalidSlug,

    #[error("Invalid viewer id")]
    InvalidViewerId,

    #[error("postTitle and postUrl are required")]
    MissingPostFields,
}

/// Trim, check the `local@domain.tld` shape, and lower-case.
pub fn normalize_email(raw: &str) -> Result<String, ValidationError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::MissingEmail);
    }
    if !EMAIL_RE.is_match(trimmed) {
        return Err(ValidationError::InvalidEmail);
    }
    Ok(trimmed.to_lowercase())
}

/// Identity used for unsubscribe: no shape check, so anything that was ever
/// stored can be removed.
pub fn email_identity(raw: &str) -> Result<String, ValidationError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::MissingEmail);
    }
    Ok(trimmed.to_lowercase())
}

/// Parse as an absolute URL and return its serialized form.
pub fn webhook_identity(raw: &str) -> Result<String, ValidationError> {
    Ok(parse_url(raw)?.into())
}

/// Like [`webhook_identity`] but only http and https are accepted.
pub fn normalize_webhook_url(raw: &str) -> Result<String, ValidationError> {
    let url = parse_url(raw)?;
    match url.scheme() {
        "http" | "https" => Ok(url.into()),
        _ => Err(ValidationError::UnsupportedScheme),
    }
}

fn parse_url(raw: &str) -> Result<Url, ValidationError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::MissingWebhookUrl);
    }
    Url::parse(trimmed).map_err(|_| ValidationError::InvalidUrl)
}

pub fn validate_slug(slug: &str) -> Result<&str, ValidationError> {
    if slug.is_empty() {
        return Err(ValidationError::MissingSlug);
    }
    if slug.chars().count() > MAX_SLUG_CHARS
        || slug.chars().any(|c| c.is_whitespace() || c.is_control())
    {
        return Err(ValidationError::InvalidSlug);
    }
    Ok(slug)
}

/// Viewer ids travel in a response header, so they are kept to visible ASCII.
pub fn validate_viewer_id(id: &str) -> Result<&str, ValidationError> {
    if id.is_empty() || id.len() > MAX_VIEWER_ID_CHARS || !id.chars().all(|c| c.is_ascii_graphic())
    {
        return Err(ValidationError::InvalidViewerId);
    }
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_is_trimmed_and_lowercased() {
        assert_eq!(
            normalize_email("  Test@Example.com ").unwrap(),
            "test@example.com"
        );
        assert_eq!(email_identity("test@example.com").unwrap(), "test@example.com");
    }

    #[test]
    fn email_shape_is_enforced() {
        assert_eq!(normalize_email(""), Err(ValidationError::MissingEmail));
        assert_eq!(normalize_email("   "), Err(ValidationError::MissingEmail));
        for bad in ["plainaddress", "a@b", "a b@c.d", "@example.com", "a@@b.c"] {
            assert_eq!(
                normalize_email(bad),
                Err(ValidationError::InvalidEmail),
                "{bad}"
            );
        }
        assert!(normalize_email("first.last+tag@sub.example.co").is_ok());
    }

    #[test]
    fn webhook_urls_are_normalized() {
        assert_eq!(
            normalize_webhook_url(" https://Hooks.Example.com ").unwrap(),
            "https://hooks.example.com/"
        );
        assert_eq!(
            normalize_webhook_url("http://example.com/a/../b?x=1").unwrap(),
            "http://example.com/b?x=1"
        );
    }

    #[test]
    fn webhook_urls_must_be_absolute_http() {
        assert_eq!(
            normalize_webhook_url("example.com/hook"),
            Err(ValidationError::InvalidUrl)
        );
        assert_eq!(
            normalize_webhook_url("ftp://example.com/hook"),
            Err(ValidationError::UnsupportedScheme)
        );
        assert_eq!(
            normalize_webhook_url(""),
            Err(ValidationError::MissingWebhookUrl)
        );
        // removal only needs a parseable URL
        assert_eq!(
            webhook_identity("ftp://example.com/hook").unwrap(),
            "ftp://example.com/hook"
        );
    }

    #[test]
    fn slugs_and_viewer_ids() {
        assert_eq!(validate_slug("my-first-post"), Ok("my-first-post"));
        assert_eq!(validate_slug(""), Err(ValidationError::MissingSlug));
        assert_eq!(validate_slug("a b"), Err(ValidationError::InvalidSlug));
        assert_eq!(
            validate_slug(&"x".repeat(257)),
            Err(ValidationError::InvalidSlug)
        );

        assert!(validate_viewer_id("1700000000000-abc1234").is_ok());
        assert_eq!(validate_viewer_id(""), Err(ValidationError::InvalidViewerId));
        assert_eq!(
            validate_viewer_id("caf\u{e9}"),
            Err(ValidationError::InvalidViewerId)
        );
    }
}
