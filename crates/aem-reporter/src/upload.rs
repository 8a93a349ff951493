use aem_types::Invocation;
use serde_json::{Map, Value, json};

/// Attribution delay flow reported with every conversion.
pub const DELAY_FLOW: &str = "server";

/// Body of one `aem_conversions` upload covering `invocations`.
pub fn conversions_payload<'a, I>(invocations: I) -> Value
where
    I: IntoIterator<Item = &'a Invocation>,
{
    let conversions: Vec<Value> = invocations.into_iter().map(conversion_entry).collect();
    json!({ "conversions": conversions })
}

fn conversion_entry(invocation: &Invocation) -> Value {
    let mut entry = Map::new();
    entry.insert("campaign_ids".into(), json!(invocation.campaign_id()));
    entry.insert("conversion_data".into(), json!(invocation.conversion_value()));
    entry.insert("consumption_hour".into(), json!(invocation.consumption_hour()));
    entry.insert("token".into(), json!(invocation.acs_token()));
    entry.insert("delay_flow".into(), json!(DELAY_FLOW));
    if let Some(config_id) = invocation.acs_config_id() {
        entry.insert("acs_config_id".into(), json!(config_id));
    }
    if let Some(advertiser_id) = invocation.advertiser_id() {
        entry.insert("advertiser_id".into(), json!(advertiser_id));
    }
    if let Some(business_id) = invocation.business_id() {
        entry.insert("business_id".into(), json!(business_id));
    }
    if let Some(signature) = invocation.upload_signature(DELAY_FLOW) {
        entry.insert("hmac".into(), json!(signature));
    }
    Value::Object(entry)
}
