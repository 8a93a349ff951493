use aem_types::Invocation;
use serde::Deserialize;
use tracing::debug;
use url::Url;

/// Query parameter carrying the JSON attribution payload.
pub const APPLINK_DATA_PARAMETER: &str = "al_applink_data";

#[derive(Debug, Default, Deserialize)]
struct AppLinkData {
    acs_token: Option<String>,
    campaign_ids: Option<String>,
    advertiser_id: Option<String>,
    acs_shared_secret: Option<String>,
    acs_config_id: Option<String>,
    business_ids: Option<String>,
}

/// Parse a deep link into an invocation.
///
/// Returns `None` for an empty or malformed URL, a missing or non-JSON
/// `al_applink_data` parameter, or a payload without `acs_token` or
/// `campaign_ids`. Nothing is recorded or persisted.
pub fn parse_url(raw: &str) -> Option<Invocation> {
    if raw.is_empty() {
        return None;
    }
    match Url::parse(raw) {
        Ok(url) => parse_applink(&url),
        Err(error) => {
            debug!(%error, "ignoring unparseable app link");
            None
        }
    }
}

/// [`parse_url`] for an already parsed URL.
pub fn parse_applink(url: &Url) -> Option<Invocation> {
    let (_, payload) = url
        .query_pairs()
        .find(|(key, _)| key == APPLINK_DATA_PARAMETER)?;
    let data: AppLinkData = match serde_json::from_str(&payload) {
        Ok(data) => data,
        Err(error) => {
            debug!(%error, "app link data is not valid JSON");
            return None;
        }
    };

    let mut invocation = match Invocation::new(
        data.campaign_ids.unwrap_or_default(),
        data.acs_token.unwrap_or_default(),
    ) {
        Ok(invocation) => invocation,
        Err(error) => {
            debug!(%error, "app link data has no attribution");
            return None;
        }
    };
    if let Some(secret) = data.acs_shared_secret {
        invocation = invocation.with_shared_secret(secret);
    }
    if let Some(config_id) = data.acs_config_id {
        invocation = invocation.with_acs_config_id(config_id);
    }
    if let Some(advertiser_id) = data.advertiser_id {
        invocation = invocation.with_advertiser_id(advertiser_id);
    }
    if let Some(business_id) = data.business_ids {
        invocation = invocation.with_business_id(business_id);
    }
    Some(invocation)
}

#[cfg(test)]
mod tests {
    use aem_types::ConfigMode;

    use super::*;

    const URL_WITH_ADVERTISER: &str = "fb123://test.com?al_applink_data=%7B%22acs_token%22%3A+%22test_token_1234567%22%2C+%22campaign_ids%22%3A+%22test_campaign_1234%22%2C+%22advertiser_id%22%3A+%22test_advertiserid_12345%22%7D";

    #[test]
    fn rejects_urls_without_attribution() {
        assert!(parse_url("").is_none());
        assert!(parse_url("not a url").is_none());
        assert!(parse_url("fb123://test.com").is_none());
        assert!(parse_url("fb123://test.com?al_applink_data=%7Bbroken").is_none());
        assert!(parse_url("fb123://test.com?other=1").is_none());
    }

    #[test]
    fn rejects_payloads_missing_required_fields() {
        assert!(parse_url("fb123://test.com?al_applink_data=%7B%22acs_token%22%3A%22T%22%7D").is_none());
        assert!(parse_url("fb123://test.com?al_applink_data=%7B%22campaign_ids%22%3A%22C%22%7D").is_none());
        assert!(
            parse_url("fb123://test.com?al_applink_data=%7B%22acs_token%22%3A%22%22%2C%22campaign_ids%22%3A%22C%22%7D")
                .is_none()
        );
    }

    #[test]
    fn parses_required_fields_only() {
        let invocation =
            parse_url("fb123://test.com?al_applink_data=%7B%22acs_token%22%3A%22T%22%2C%22campaign_ids%22%3A%22C%22%7D")
                .unwrap();

        assert_eq!(invocation.acs_token(), "T");
        assert_eq!(invocation.campaign_id(), "C");
        assert_eq!(invocation.advertiser_id(), None);
        assert!(!invocation.is_aggregated());
    }

    #[test]
    fn parses_form_encoded_payload_with_advertiser() {
        let invocation = parse_url(URL_WITH_ADVERTISER).unwrap();

        assert_eq!(invocation.acs_token(), "test_token_1234567");
        assert_eq!(invocation.campaign_id(), "test_campaign_1234");
        assert_eq!(invocation.advertiser_id(), Some("test_advertiserid_12345"));
        assert_eq!(invocation.config_mode(), ConfigMode::Default);
    }

    #[test]
    fn optional_fields_are_carried() {
        let payload = r#"{"acs_token":"T","campaign_ids":"C","acs_shared_secret":"S","acs_config_id":"K","business_ids":"B"}"#;
        let mut url = Url::parse("fb123://test.com").unwrap();
        url.query_pairs_mut().append_pair(APPLINK_DATA_PARAMETER, payload);

        let invocation = parse_applink(&url).unwrap();

        assert_eq!(invocation.acs_shared_secret(), Some("S"));
        assert_eq!(invocation.acs_config_id(), Some("K"));
        assert_eq!(invocation.business_id(), Some("B"));
        assert_eq!(invocation.config_mode(), ConfigMode::Brand);
    }
}
