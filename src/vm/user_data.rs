//! Bootstrap metadata injected as custom data at instance creation.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::{Value, json};

/// Encodes `{registry: {endpoint}, server: {name}, dns?: {nameserver}}` as
/// base64 JSON.
#[must_use]
pub fn encode_user_data(registry_endpoint: &str, vm_name: &str, dns: Option<&[String]>) -> String {
    let mut document = json!({
        "registry": { "endpoint": registry_endpoint },
        "server": { "name": vm_name },
    });
    if let (Some(nameservers), Some(object)) = (dns, document.as_object_mut()) {
        object.insert(
            String::from("dns"),
            json!({ "nameserver": nameservers }),
        );
    }
    STANDARD.encode(Value::to_string(&document))
}
