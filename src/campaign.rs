use serde_json as json;

use datatype::{Error, Url};
use http::{Client, Response};


/// An update campaign offered by the server, with its optional metadata.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Campaign {
    pub id:          String,
    pub name:        String,
    pub auto_accept: bool,
    pub description: String,
    pub est_installation_duration: i64,
    pub est_preparation_duration:  i64,
}

impl Campaign {
    pub fn from_json(value: &json::Value) -> Result<Campaign, Error> {
        let obj = value.as_object().ok_or_else(|| Error::Campaign("campaign is not an object".into()))?;
        let id = obj.get("id").and_then(json::Value::as_str)
            .ok_or_else(|| Error::Campaign("missing `id` field".into()))?;
        let name = obj.get("name").and_then(json::Value::as_str)
            .ok_or_else(|| Error::Campaign("missing `name` field".into()))?;
        if id.is_empty() || name.is_empty() {
            return Err(Error::Campaign("empty `id` or `name` field".into()));
        }
        let auto_accept = obj.get("autoAccept").and_then(json::Value::as_bool).unwrap_or(false);

        let mut campaign = Campaign {
            id:          id.into(),
            name:        name.into(),
            auto_accept: auto_accept,
            ..Campaign::default()
        };

        if let Some(entries) = obj.get("metadata").and_then(json::Value::as_array) {
            for entry in entries {
                let kind = entry.get("type").and_then(json::Value::as_str).unwrap_or("");
                let value = entry.get("value").and_then(json::Value::as_str).unwrap_or("");
                match kind {
                    "DESCRIPTION" => {
                        if ! campaign.description.is_empty() {
                            return Err(Error::Campaign(format!("{}: duplicate DESCRIPTION", id)));
                        }
                        campaign.description = value.into();
                    }
                    "ESTIMATED_INSTALLATION_DURATION" => {
                        if campaign.est_installation_duration != 0 {
                            return Err(Error::Campaign(format!("{}: duplicate installation duration", id)));
                        }
                        campaign.est_installation_duration = value.parse()
                            .map_err(|_| Error::Campaign(format!("{}: `{}` is not a duration", id, value)))?;
                    }
                    "ESTIMATED_PREPARATION_DURATION" => {
                        if campaign.est_preparation_duration != 0 {
                            return Err(Error::Campaign(format!("{}: duplicate preparation duration", id)));
                        }
                        campaign.est_preparation_duration = value.parse()
                            .map_err(|_| Error::Campaign(format!("{}: `{}` is not a duration", id, value)))?;
                    }
                    _ => ()
                }
            }
        }
        Ok(campaign)
    }
}

/// Parse a `{"campaigns": [...]}` listing, dropping entries that don't parse.
pub fn campaigns_from_json(value: &json::Value) -> Vec<Campaign> {
    let entries = match value.get("campaigns").and_then(json::Value::as_array) {
        Some(entries) => entries,
        None => {
            error!("invalid campaigns object: {}", value);
            return Vec::new();
        }
    };
    entries.iter()
        .filter_map(|entry| match Campaign::from_json(entry) {
            Ok(campaign) => Some(campaign),
            Err(err) => { error!("error parsing campaign: {}", err); None }
        })
        .collect()
}

/// Fetch the campaigns currently offered to this device.
pub fn fetch_available(client: &Client, server: &Url) -> Result<Vec<Campaign>, Error> {
    let rx = client.get(server.join("campaigner/campaigns"), None);
    let body = match rx.recv() {
        Some(Response::Success(data)) => data.body,
        Some(Response::Failed(data)) => return Err(Error::Http(data)),
        Some(Response::Error(err)) => return Err(*err),
        None => return Err(Error::Client("no response to campaign fetch".into()))
    };
    Ok(campaigns_from_json(&json::from_slice(&body)?))
}
